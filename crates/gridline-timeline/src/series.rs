//! Offset-indexed step functions for aggregate counts.

use std::collections::BTreeMap;

use gridline_types::Offset;

/// A step function that stores a point only where the value changes.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StepSeries {
    points: BTreeMap<Offset, usize>,
    current: Option<usize>,
}

impl StepSeries {
    /// An empty series.
    pub const fn new() -> Self {
        Self {
            points: BTreeMap::new(),
            current: None,
        }
    }

    /// Record `value` at `offset` if it differs from the latest value.
    /// Returns whether a point was stored.
    pub fn record(&mut self, offset: Offset, value: usize) -> bool {
        if self.current == Some(value) {
            return false;
        }
        self.current = Some(value);
        self.points.insert(offset, value);
        true
    }

    /// The most recently recorded value.
    pub const fn current(&self) -> Option<usize> {
        self.current
    }

    /// Value in effect at `offset`.
    pub fn value_at(&self, offset: Offset) -> Option<usize> {
        self.points.range(..=offset).next_back().map(|(_, v)| *v)
    }

    /// Drop points before `first`. The value in effect at `first` is kept as
    /// a point at `first` so the series still starts with a known level.
    pub fn trim_before(&mut self, first: Offset) {
        let carried = self.value_at(first);
        self.points = self.points.split_off(&first);
        if let Some(value) = carried {
            self.points.entry(first).or_insert(value);
        }
    }

    /// A copy of the stored points.
    pub fn to_map(&self) -> BTreeMap<Offset, usize> {
        self.points.clone()
    }

    /// Number of stored points.
    pub fn len(&self) -> usize {
        self.points.len()
    }

    /// Whether no points are stored.
    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn records_only_changes() {
        let mut series = StepSeries::new();
        assert!(series.record(0, 3));
        assert!(!series.record(10, 3));
        assert!(series.record(20, 4));
        assert_eq!(series.to_map(), BTreeMap::from([(0, 3), (20, 4)]));
        assert_eq!(series.value_at(15), Some(3));
        assert_eq!(series.value_at(-1), None);
    }

    #[test]
    fn trim_carries_level_forward() {
        let mut series = StepSeries::new();
        series.record(0, 1);
        series.record(100, 2);
        series.record(300, 5);
        series.trim_before(200);
        assert_eq!(series.to_map(), BTreeMap::from([(200, 2), (300, 5)]));
        assert_eq!(series.current(), Some(5));
    }
}
