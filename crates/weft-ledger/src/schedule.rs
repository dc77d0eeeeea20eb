//! Leader schedule.
//!
//! The leader for a given wall-clock slot and chain height is a pure
//! function of the whitelist in insertion order, so every node that agrees
//! on the whitelist and the height converges on the same leader without
//! any election traffic.

use crate::ROTATION_INTERVAL_MS;
use indexmap::IndexSet;
use weft_proto::NodeId;

/// The set of nodes authorized to lead and vote, in insertion order.
///
/// Mutation is local and administrative; changes take effect immediately
/// for scheduling decisions.
#[derive(Debug, Default, Clone)]
pub struct Whitelist {
    members: IndexSet<NodeId>,
}

impl Whitelist {
    /// Create an empty whitelist
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create from members in order
    #[must_use]
    pub fn from_members(members: impl IntoIterator<Item = NodeId>) -> Self {
        Self {
            members: members.into_iter().collect(),
        }
    }

    /// Add a member; returns `false` if already present
    pub fn add(&mut self, node: NodeId) -> bool {
        self.members.insert(node)
    }

    /// Remove a member; returns `false` if absent.
    ///
    /// Removal preserves the insertion order of the remaining members so
    /// the schedule stays deterministic.
    pub fn remove(&mut self, node: &NodeId) -> bool {
        self.members.shift_remove(node)
    }

    /// Membership test
    #[must_use]
    pub fn contains(&self, node: &NodeId) -> bool {
        self.members.contains(node)
    }

    /// Number of members
    #[must_use]
    pub fn len(&self) -> usize {
        self.members.len()
    }

    /// Whether the whitelist is empty
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    /// Members in insertion order
    pub fn iter(&self) -> impl Iterator<Item = &NodeId> {
        self.members.iter()
    }

    /// Member at a schedule index
    #[must_use]
    pub fn get_index(&self, index: usize) -> Option<&NodeId> {
        self.members.get_index(index)
    }
}

/// The leader for chain height `height` at wall-clock time `now_ms`.
///
/// `slot_ms` is the rotation interval ([`ROTATION_INTERVAL_MS`] in
/// production; tests compress it). An empty whitelist has no leader.
#[must_use]
pub fn leader_at(
    whitelist: &Whitelist,
    height: u64,
    now_ms: i64,
    slot_ms: i64,
) -> Option<NodeId> {
    if whitelist.is_empty() {
        return None;
    }
    let slot_ms = slot_ms.max(1);
    let slot = (now_ms / slot_ms) as u64;
    let index = ((height as u128 + slot as u128) % whitelist.len() as u128) as usize;
    whitelist.get_index(index).cloned()
}

/// [`leader_at`] with the production rotation interval
#[must_use]
pub fn current_leader(whitelist: &Whitelist, height: u64, now_ms: i64) -> Option<NodeId> {
    leader_at(whitelist, height, now_ms, ROTATION_INTERVAL_MS)
}
