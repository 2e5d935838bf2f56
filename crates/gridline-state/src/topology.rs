//! Node topology: how many job slots each node has.
//!
//! The topology is an explicit value built once at startup and passed by
//! reference into every [`GridState`](crate::GridState) constructor. It can
//! be assembled in code or from a [`TopologyConfig`] section, which lists
//! nodes individually or as numbered sets (`f00u01`..`f00u32`).

use std::collections::BTreeMap;

use serde::Deserialize;

/// Most slots a configured node may have.
pub const MAX_NODE_SLOTS: u32 = 4096;

/// Most nodes a single node set may expand to.
pub const MAX_NODE_SET_LEN: u32 = 65_536;

/// Short node name to slot capacity.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NodeTopology {
    capacities: BTreeMap<String, u32>,
}

impl NodeTopology {
    /// Create an empty topology.
    pub const fn new() -> Self {
        Self {
            capacities: BTreeMap::new(),
        }
    }

    /// Build a topology from `(short_name, slots)` pairs.
    pub fn from_entries<I, S>(entries: I) -> Self
    where
        I: IntoIterator<Item = (S, u32)>,
        S: Into<String>,
    {
        Self {
            capacities: entries.into_iter().map(|(n, s)| (n.into(), s)).collect(),
        }
    }

    /// Set the capacity of one node. Returns the previous capacity, if any.
    pub fn insert(&mut self, short_name: &str, slots: u32) -> Option<u32> {
        self.capacities.insert(short_name.to_owned(), slots)
    }

    /// Slot capacity of a node, if it is mapped.
    pub fn capacity(&self, short_name: &str) -> Option<u32> {
        self.capacities.get(short_name).copied()
    }

    /// Number of mapped nodes.
    pub fn len(&self) -> usize {
        self.capacities.len()
    }

    /// Whether no nodes are mapped.
    pub fn is_empty(&self) -> bool {
        self.capacities.is_empty()
    }

    /// Total slots across all mapped nodes.
    pub fn total_slots(&self) -> u64 {
        self.capacities
            .values()
            .fold(0_u64, |acc, s| acc.saturating_add(u64::from(*s)))
    }
}

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

/// A numbered run of identically-sized nodes.
///
/// `{prefix: "f00u", first: 1, last: 3, width: 2, slots: 8}` expands to
/// `f00u01`, `f00u02`, `f00u03`, each with 8 slots.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct NodeSetConfig {
    /// Name prefix shared by every node in the set.
    pub prefix: String,
    /// First number in the run (inclusive).
    pub first: u32,
    /// Last number in the run (inclusive).
    pub last: u32,
    /// Zero-padded width of the number.
    #[serde(default)]
    pub width: usize,
    /// Slots per node.
    pub slots: u32,
}

impl NodeSetConfig {
    /// The short names this set expands to.
    pub fn names(&self) -> Vec<String> {
        let width = self.width;
        (self.first..=self.last)
            .map(|n| format!("{}{n:0width$}", self.prefix))
            .collect()
    }
}

/// The `topology` section of the configuration file.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct TopologyConfig {
    /// Individually listed nodes, short name to slots.
    #[serde(default)]
    pub nodes: BTreeMap<String, u32>,
    /// Numbered node sets.
    #[serde(default)]
    pub node_sets: Vec<NodeSetConfig>,
}

impl TopologyConfig {
    /// Build the topology. Explicit `nodes` entries win over node sets.
    pub fn build(&self) -> NodeTopology {
        let mut topology = NodeTopology::new();
        for set in &self.node_sets {
            for name in set.names() {
                topology.insert(&name, set.slots);
            }
        }
        for (name, slots) in &self.nodes {
            topology.insert(name, *slots);
        }
        topology
    }

    /// Describe the first invalid entry, if any.
    pub fn validate(&self) -> Result<(), String> {
        for (name, slots) in &self.nodes {
            if !(1..=MAX_NODE_SLOTS).contains(slots) {
                return Err(format!(
                    "node {name} has {slots} slots, expected 1 to {MAX_NODE_SLOTS}"
                ));
            }
        }
        for set in &self.node_sets {
            if !(1..=MAX_NODE_SLOTS).contains(&set.slots) {
                return Err(format!(
                    "node set {} has {} slots, expected 1 to {MAX_NODE_SLOTS}",
                    set.prefix, set.slots
                ));
            }
            if set.first > set.last {
                return Err(format!(
                    "node set {} has first {} after last {}",
                    set.prefix, set.first, set.last
                ));
            }
            if set.last.saturating_sub(set.first) >= MAX_NODE_SET_LEN {
                return Err(format!(
                    "node set {} spans more than {MAX_NODE_SET_LEN} nodes",
                    set.prefix
                ));
            }
        }
        Ok(())
    }
}
