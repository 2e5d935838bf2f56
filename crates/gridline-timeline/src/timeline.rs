//! The bounded, offset-indexed timeline.
//!
//! A [`Timeline`] owns a sliding window of raw snapshots, the log of events
//! derived from them, and two step functions counting running and queued
//! jobs. Ingestion is single-writer: [`Timeline::add_snapshot`] holds the
//! write lock for the whole derivation. Every reader takes the read lock and
//! returns owned copies, so playback never sees a half-applied snapshot.
//!
//! # Offsets
//!
//! All positions are milliseconds since the sampling time of the very first
//! snapshot ever added. The baseline is never moved, even after that
//! snapshot has been evicted from the window.
//!
//! # Window
//!
//! At most `max_snapshots` snapshots are retained. When a new one would
//! exceed the cap the oldest is dropped and the event log and both series
//! are trimmed to the new oldest snapshot's offset. That is the only bound
//! on memory.

use std::collections::{BTreeMap, VecDeque};
use std::num::NonZeroUsize;
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use chrono::{DateTime, Utc};
use lru::LruCache;
use gridline_state::{GridState, NodeTopology, StateDiscrepancy, StateError};
use gridline_types::{EventKey, FullJobId, Offset, Snapshot, TimelineEvent, offset_between};
use tracing::{debug, error, info, trace};

use crate::config::TimelineConfig;
use crate::deriver::{Bracket, EventDeriver};
use crate::error::TimelineError;
use crate::series::StepSeries;

/// Event log type: offset to the events at that offset, in application order.
pub type EventMap = BTreeMap<Offset, Vec<Arc<TimelineEvent>>>;

/// What happened to one snapshot passed to [`Timeline::add_snapshot`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IngestSummary {
    /// Offset of the snapshot's sampling time.
    pub offset: Offset,
    /// Offset of the previous snapshot derived (the bracket's lower bound).
    pub prev_offset: Offset,
    /// Lifecycle events inferred, before dedup.
    pub derived: usize,
    /// Lifecycle events dropped as already seen.
    pub duplicates: usize,
    /// Events that did not fit the accumulated state and were skipped.
    pub inconsistencies: usize,
    /// Whether the snapshot was kept in the window. A snapshot sampled at
    /// the same instant as the newest retained one replaces it.
    pub retained: bool,
    /// Snapshots evicted to make room.
    pub evicted: usize,
}

#[derive(Debug)]
struct Inner {
    baseline: Option<DateTime<Utc>>,
    snapshots: VecDeque<(Offset, Arc<Snapshot>)>,
    events: EventMap,
    running: StepSeries,
    queued: StepSeries,
    load_state: GridState,
    /// Derived event keys. Checked with `contains`, so eviction is in
    /// insertion order.
    dedup: LruCache<EventKey, ()>,
    prev_snapshot_offset: Offset,
    penultimate: Option<Arc<Snapshot>>,
    ultimate: Option<Arc<Snapshot>>,
}

/// Derived event history over a bounded window of snapshots.
#[derive(Debug)]
pub struct Timeline {
    config: TimelineConfig,
    topology: Arc<NodeTopology>,
    inner: RwLock<Inner>,
}

impl Timeline {
    /// An empty timeline. Nothing is ready until the first snapshot arrives.
    pub fn new(config: TimelineConfig, topology: Arc<NodeTopology>) -> Self {
        let capacity = NonZeroUsize::new(config.dedup_capacity).unwrap_or(NonZeroUsize::MIN);
        let dedup = LruCache::new(capacity);
        let load_state = GridState::empty(&topology, "load");
        Self {
            config,
            topology,
            inner: RwLock::new(Inner {
                baseline: None,
                snapshots: VecDeque::new(),
                events: BTreeMap::new(),
                running: StepSeries::new(),
                queued: StepSeries::new(),
                load_state,
                dedup,
                prev_snapshot_offset: 0,
                penultimate: None,
                ultimate: None,
            }),
        }
    }

    fn read(&self) -> RwLockReadGuard<'_, Inner> {
        self.inner.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, Inner> {
        self.inner.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// The window settings this timeline was built with.
    pub const fn config(&self) -> &TimelineConfig {
        &self.config
    }

    /// The node topology states are built against.
    pub const fn topology(&self) -> &Arc<NodeTopology> {
        &self.topology
    }

    // -----------------------------------------------------------------------
    // Ingestion
    // -----------------------------------------------------------------------

    /// Add the next snapshot.
    ///
    /// The first snapshot fixes the baseline and seeds the accumulated state.
    /// Every later one is derived against the accumulated state; its events
    /// are deduplicated, logged, and applied in offset order.
    ///
    /// # Errors
    ///
    /// - [`TimelineError::State`] with [`StateError::MissingTopology`] if the
    ///   snapshot contains a node with no slot capacity.
    /// - [`TimelineError::OutOfOrder`] if it was sampled before the latest
    ///   snapshot.
    ///
    /// In both cases the timeline is unchanged.
    pub fn add_snapshot(&self, mut snapshot: Snapshot) -> Result<IngestSummary, TimelineError> {
        snapshot.finalize();
        let mut guard = self.write();
        let inner = &mut *guard;

        let Some(baseline) = inner.baseline else {
            return self.seed(inner, snapshot);
        };

        let offset = offset_between(baseline, snapshot.sampling_time());
        let last = inner
            .ultimate
            .as_ref()
            .map_or(0, |s| offset_between(baseline, s.sampling_time()));
        if offset < last {
            return Err(TimelineError::OutOfOrder { offset, last });
        }
        for node in snapshot.nodes() {
            if self.topology.capacity(node.short_name()).is_none() {
                return Err(StateError::MissingTopology {
                    node: node.short_name().to_owned(),
                }
                .into());
            }
        }

        debug!(offset, "Adding snapshot");
        let snapshot = Arc::new(snapshot);
        inner.penultimate = inner.ultimate.replace(Arc::clone(&snapshot));

        // A same-time delivery replaces the newest retained snapshot. Its
        // events sit at that offset, which buffering does not replay.
        let spacing = i64::try_from(self.config.min_snapshot_spacing_ms).unwrap_or(i64::MAX);
        let last_retained = inner.snapshots.back().map_or(0, |(o, _)| *o);
        let retained = if let Some((_, kept)) = inner
            .snapshots
            .back_mut()
            .filter(|(o, _)| *o == offset)
        {
            debug!(offset, "Replacing retained snapshot with same-time delivery");
            *kept = Arc::clone(&snapshot);
            true
        } else if offset.saturating_sub(last_retained) > spacing {
            inner.snapshots.push_back((offset, Arc::clone(&snapshot)));
            true
        } else {
            false
        };
        let Inner {
            load_state: state,
            dedup,
            events,
            running,
            queued,
            prev_snapshot_offset,
            ..
        } = &mut *inner;

        let prev_offset = *prev_snapshot_offset;
        let bracket = Bracket::new(prev_offset, offset);
        let derivation = EventDeriver::new(baseline, bracket).derive(state, &snapshot);
        let derived = derivation.events.len();

        let mut accepted: Vec<_> = derivation
            .events
            .into_iter()
            .filter(|event| {
                let fresh = remember(dedup, event.key());
                if !fresh {
                    trace!(event = %event.cache_key(), "Event already derived, dropping");
                }
                fresh
            })
            .collect();
        let duplicates = derived.saturating_sub(accepted.len());
        accepted.sort_by_key(|event| event.offset);

        debug!(count = accepted.len(), "Applying events");
        let mut inconsistencies: usize = 0;
        for event in accepted {
            if let Err(err) = state.apply_event(&event) {
                inconsistencies = inconsistencies.saturating_add(1);
                error!(event = %event.cache_key(), error = %err, "Data inconsistency, skipping event");
            }
            running.record(event.offset, state.num_running_jobs());
            queued.record(event.offset, state.num_queued_jobs());
            events
                .entry(event.offset)
                .or_default()
                .push(Arc::new(TimelineEvent::Job(event)));
        }
        push_marker(events, offset);
        *prev_snapshot_offset = offset;

        if inconsistencies > 0 || derivation.missing_start_times > 0 {
            error!(
                inconsistencies,
                missing_start_times = derivation.missing_start_times,
                "Errors occurred during event processing"
            );
            match GridState::from_snapshot(&snapshot, &self.topology, "snapshot") {
                Ok(truth) => log_discrepancies(&state.diff_against(&truth)),
                Err(err) => error!(error = %err, "Cannot build state from snapshot for comparison"),
            }
        }

        let (num_running, num_queued) = (state.num_running_jobs(), state.num_queued_jobs());
        let evicted = self.evict(inner);

        info!(
            offset,
            derived,
            duplicates,
            inconsistencies,
            retained,
            evicted,
            running = num_running,
            queued = num_queued,
            "Added snapshot"
        );
        Ok(IngestSummary {
            offset,
            prev_offset,
            derived,
            duplicates,
            inconsistencies,
            retained,
            evicted,
        })
    }

    fn seed(&self, inner: &mut Inner, snapshot: Snapshot) -> Result<IngestSummary, TimelineError> {
        let state = GridState::from_snapshot(&snapshot, &self.topology, "load")?;
        let snapshot = Arc::new(snapshot);

        inner.baseline = Some(snapshot.sampling_time());
        inner.snapshots.push_back((0, Arc::clone(&snapshot)));
        inner.running.record(0, state.num_running_jobs());
        inner.queued.record(0, state.num_queued_jobs());
        push_marker(&mut inner.events, 0);
        inner.ultimate = Some(Arc::clone(&snapshot));
        inner.prev_snapshot_offset = 0;

        info!(
            baseline = %snapshot.sampling_time(),
            running = state.num_running_jobs(),
            queued = state.num_queued_jobs(),
            "Using snapshot as the timeline baseline"
        );
        inner.load_state = state;
        Ok(IngestSummary {
            offset: 0,
            prev_offset: 0,
            derived: 0,
            duplicates: 0,
            inconsistencies: 0,
            retained: true,
            evicted: 0,
        })
    }

    fn evict(&self, inner: &mut Inner) -> usize {
        let mut evicted: usize = 0;
        while inner.snapshots.len() > self.config.max_snapshots {
            inner.snapshots.pop_front();
            evicted = evicted.saturating_add(1);
        }
        if evicted > 0 {
            let first = inner.snapshots.front().map_or(0, |(o, _)| *o);
            inner.events = inner.events.split_off(&first);
            inner.running.trim_before(first);
            inner.queued.trim_before(first);
            info!(
                evicted,
                first_offset = first,
                max_snapshots = self.config.max_snapshots,
                "Evicted oldest snapshots"
            );
        }
        evicted
    }

    /// Remove a mis-derived job from every retained snapshot and from the
    /// accumulated state. Snapshots shared with readers are copied first.
    ///
    /// The job's events stay in the log and its keys stay in the dedup
    /// cache. A later snapshot that shows the job again at an offset where
    /// it already has an event gets that event dropped as a duplicate.
    ///
    /// Returns how many snapshot occurrences were removed.
    pub fn erase_job(&self, full_id: &FullJobId) -> usize {
        let mut guard = self.write();
        let inner = &mut *guard;
        let mut removed: usize = 0;
        for (_, snapshot) in &mut inner.snapshots {
            if snapshot.job(full_id).is_some() {
                removed = removed.saturating_add(Arc::make_mut(snapshot).erase_job(full_id));
            }
        }
        for snapshot in [&mut inner.penultimate, &mut inner.ultimate].into_iter().flatten() {
            if snapshot.job(full_id).is_some() {
                Arc::make_mut(snapshot).erase_job(full_id);
            }
        }
        inner.load_state.erase_job(full_id);
        debug!(job = %full_id, removed, "Erased job from timeline");
        removed
    }

    // -----------------------------------------------------------------------
    // Reads
    // -----------------------------------------------------------------------

    /// Events with offset in `[start, end)`, in application order.
    pub fn get_events(&self, start: Offset, end: Offset) -> Vec<Arc<TimelineEvent>> {
        if start >= end {
            return Vec::new();
        }
        self.read()
            .events
            .range(start..end)
            .flat_map(|(_, events)| events.iter().cloned())
            .collect()
    }

    /// A copy of the whole retained event log.
    pub fn events_all(&self) -> EventMap {
        self.read().events.clone()
    }

    /// Retained snapshots, oldest first.
    pub fn get_snapshots(&self) -> Vec<Arc<Snapshot>> {
        self.read().snapshots.iter().map(|(_, s)| Arc::clone(s)).collect()
    }

    /// Retained snapshots with their offsets, oldest first.
    pub fn get_indexed_snapshots(&self) -> Vec<(Offset, Arc<Snapshot>)> {
        self.read().snapshots.iter().cloned().collect()
    }

    /// Number of retained snapshots.
    pub fn num_snapshots(&self) -> usize {
        self.read().snapshots.len()
    }

    /// Running-job count, stored only where it changes.
    pub fn get_num_running_jobs_map(&self) -> BTreeMap<Offset, usize> {
        self.read().running.to_map()
    }

    /// Queued-job count, stored only where it changes.
    pub fn get_num_queued_jobs_map(&self) -> BTreeMap<Offset, usize> {
        self.read().queued.to_map()
    }

    /// Offset of the oldest retained snapshot, or 0 before any arrive.
    pub fn get_first_offset(&self) -> Offset {
        self.read().snapshots.front().map_or(0, |(o, _)| *o)
    }

    /// Span of retained history: the later of the last event and the last
    /// loaded snapshot, measured from the first offset. 0 until a second
    /// snapshot has been loaded.
    pub fn get_length(&self) -> Offset {
        let inner = self.read();
        Self::length(&inner)
    }

    fn length(inner: &Inner) -> Offset {
        let (Some(baseline), Some(_), Some(ultimate)) =
            (inner.baseline, inner.penultimate.as_ref(), inner.ultimate.as_ref())
        else {
            return 0;
        };
        let Some((first, _)) = inner.snapshots.front() else {
            return 0;
        };
        let last_event = inner.events.keys().next_back().copied().unwrap_or(0);
        let last_loaded = offset_between(baseline, ultimate.sampling_time());
        last_event
            .saturating_sub(*first)
            .max(last_loaded.saturating_sub(*first))
            .max(0)
    }

    /// `get_first_offset() + get_length()`.
    pub fn get_last_offset(&self) -> Offset {
        let inner = self.read();
        let first = inner.snapshots.front().map_or(0, |(o, _)| *o);
        first.saturating_add(Self::length(&inner))
    }

    /// A safe near-live playback target: one poll interval behind the
    /// penultimate snapshot, minus the configured lag, and never before the
    /// first offset. 0 until two snapshots have been loaded.
    pub fn get_live_offset(&self) -> Offset {
        let inner = self.read();
        let (Some(baseline), Some(pen), Some(ult)) =
            (inner.baseline, inner.penultimate.as_ref(), inner.ultimate.as_ref())
        else {
            return 0;
        };
        let pen_offset = offset_between(baseline, pen.sampling_time());
        let interval = offset_between(baseline, ult.sampling_time()).saturating_sub(pen_offset);
        let lag = i64::try_from(self.config.live_lag_ms).unwrap_or(i64::MAX);
        let first = inner.snapshots.front().map_or(0, |(o, _)| *o);
        pen_offset
            .saturating_sub(interval)
            .saturating_sub(lag)
            .max(first)
    }

    /// Whether the baseline has been fixed.
    pub fn is_ready(&self) -> bool {
        self.read().baseline.is_some()
    }

    /// Sampling time of the first snapshot ever added.
    pub fn baseline(&self) -> Option<DateTime<Utc>> {
        self.read().baseline
    }

    /// Milliseconds from the baseline to `time`. Negative before it.
    pub fn offset_of(&self, time: DateTime<Utc>) -> Option<Offset> {
        self.read().baseline.map(|b| offset_between(b, time))
    }

    /// The most recent snapshot added, whether or not it was retained.
    pub fn last_loaded_snapshot(&self) -> Option<Arc<Snapshot>> {
        self.read().ultimate.clone()
    }

    /// Running and queued counts of the accumulated state.
    pub fn current_counts(&self) -> (usize, usize) {
        let inner = self.read();
        (inner.load_state.num_running_jobs(), inner.load_state.num_queued_jobs())
    }

    // -----------------------------------------------------------------------
    // Diagnostics
    // -----------------------------------------------------------------------

    /// Compare the accumulated state with a state built straight from the
    /// last loaded snapshot. Every discrepancy is logged and returned.
    ///
    /// # Errors
    ///
    /// Returns [`TimelineError::State`] if the snapshot cannot be modelled.
    pub fn check_consistency(&self) -> Result<Vec<StateDiscrepancy>, TimelineError> {
        let inner = self.read();
        let Some(snapshot) = inner.ultimate.as_ref() else {
            return Ok(Vec::new());
        };
        let truth = GridState::from_snapshot(snapshot, &self.topology, "snapshot")?;
        let found = inner.load_state.diff_against(&truth);
        log_discrepancies(&found);
        Ok(found)
    }

    /// Dump the event log at debug level, one line per event.
    pub fn log_event_map(&self) {
        let inner = self.read();
        debug!(events = inner.events.values().map(Vec::len).sum::<usize>(), "Current timeline");
        for (offset, events) in &inner.events {
            for event in events {
                match event.as_job() {
                    Some(job) => debug!("{offset:<10} {}", job.cache_key()),
                    None => debug!("{offset:<10} ---SNAPSHOT---"),
                }
            }
        }
    }
}

/// Record `key` as derived. Returns `false` if it already was.
fn remember(dedup: &mut LruCache<EventKey, ()>, key: EventKey) -> bool {
    if dedup.contains(&key) {
        return false;
    }
    dedup.put(key, ());
    true
}

fn push_marker(events: &mut EventMap, offset: Offset) {
    let slot = events.entry(offset).or_default();
    let has_marker = slot
        .iter()
        .any(|e| matches!(**e, TimelineEvent::SnapshotMarker { .. }));
    if !has_marker {
        slot.push(Arc::new(TimelineEvent::SnapshotMarker { offset }));
    }
}

fn log_discrepancies(found: &[StateDiscrepancy]) {
    for discrepancy in found {
        error!(%discrepancy, "Accumulated state differs from snapshot");
    }
}
