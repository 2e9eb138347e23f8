//! Memory-kill tracking over the fixed control skeleton.
//!
//! Aliasing is expressed without points-to analysis: every memory location
//! belongs to a named equivalence class, a [`LocationIdentity`]. Control
//! nodes that invalidate memory declare which classes they kill; a memory
//! read may be reordered across a stretch of the control skeleton only if
//! no kill with a matching (or universally aliasing [`LocationIdentity::ANY`])
//! identity lies in between.
//!
//! Kills appear on killing begins (single or multi location), on invokes
//! (which conservatively kill everything), and on the start node.

use smallvec::SmallVec;

use crate::graph::Graph;
use crate::node::{NodeId, NodeOp};

// =============================================================================
// Location Identity
// =============================================================================

/// An abstract name for a class of memory locations.
///
/// Named identities are interned symbols handed out by the external
/// metadata provider (field ids, array element kinds). `Any` aliases every
/// location and is the conservative default for calls.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum LocationIdentity {
    /// Aliases all locations.
    Any,
    /// A single named aliasing class.
    Named(u32),
}

impl LocationIdentity {
    /// The universally aliasing identity.
    pub const ANY: LocationIdentity = LocationIdentity::Any;

    /// Whether a kill of `self` invalidates a location of identity `other`.
    #[inline]
    pub fn overlaps(&self, other: &LocationIdentity) -> bool {
        match (self, other) {
            (LocationIdentity::Any, _) | (_, LocationIdentity::Any) => true,
            (LocationIdentity::Named(a), LocationIdentity::Named(b)) => a == b,
        }
    }
}

impl std::fmt::Display for LocationIdentity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LocationIdentity::Any => write!(f, "ANY"),
            LocationIdentity::Named(symbol) => write!(f, "loc{}", symbol),
        }
    }
}

/// The location set of a multi-kill. Two inline slots cover the common
/// "field plus array" case.
pub type KillSet = SmallVec<[LocationIdentity; 2]>;

// =============================================================================
// Kill Queries
// =============================================================================

/// What a control node declares killed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Kills<'a> {
    /// Kills nothing.
    None,
    /// Kills one identity.
    Single(LocationIdentity),
    /// Kills a set of identities.
    Multi(&'a [LocationIdentity]),
    /// Kills every location.
    Any,
}

impl Kills<'_> {
    /// Whether the declared kill invalidates `location`.
    pub fn covers(&self, location: &LocationIdentity) -> bool {
        match self {
            Kills::None => false,
            Kills::Single(killed) => killed.overlaps(location),
            Kills::Multi(killed) => killed.iter().any(|k| k.overlaps(location)),
            Kills::Any => true,
        }
    }

    /// Whether anything at all is killed.
    pub fn is_kill(&self) -> bool {
        !matches!(self, Kills::None)
    }
}

/// The kill declaration of an operation.
pub fn kill_set(op: &NodeOp) -> Kills<'_> {
    match op {
        NodeOp::KillingBegin(location) => Kills::Single(*location),
        NodeOp::MultiKillingBegin(locations) => Kills::Multi(locations),
        // A call may write anything; the start node is the initial kill of
        // every location.
        NodeOp::Invoke(_) | NodeOp::InvokeWithException(_) | NodeOp::Start => Kills::Any,
        _ => Kills::None,
    }
}

/// Whether two operations declare the identical kill set.
pub fn same_kill_set(a: &NodeOp, b: &NodeOp) -> bool {
    match (kill_set(a), kill_set(b)) {
        (Kills::None, Kills::None) | (Kills::Any, Kills::Any) => true,
        (Kills::Single(x), Kills::Single(y)) => x == y,
        (Kills::Multi(x), Kills::Multi(y)) => {
            x.len() == y.len() && x.iter().all(|loc| y.contains(loc))
        }
        (Kills::Single(x), Kills::Multi(y)) | (Kills::Multi(y), Kills::Single(x)) => {
            y.len() == 1 && y[0] == x
        }
        _ => false,
    }
}

impl Graph {
    /// Whether `node` kills `location`.
    pub fn kills_location(&self, node: NodeId, location: &LocationIdentity) -> bool {
        kill_set(&self.node(node).op).covers(location)
    }

    /// Whether no kill of `location` lies strictly between `earlier` and
    /// `later` on the fixed skeleton.
    ///
    /// Walks the predecessor chain from `later` back to `earlier`; the walk
    /// is conservative and reports `false` when it leaves a straight-line
    /// stretch (a merge or the start node) before reaching `earlier`.
    pub fn no_kill_between(
        &self,
        earlier: NodeId,
        later: NodeId,
        location: &LocationIdentity,
    ) -> bool {
        debug_assert!(self.node(earlier).op.is_fixed());
        debug_assert!(self.node(later).op.is_fixed());

        let mut cursor = self.pred(later);
        while let Some(current) = cursor {
            if current == earlier {
                return true;
            }
            if self.kills_location(current, location) {
                return false;
            }
            let op = &self.node(current).op;
            if op.is_merge() || matches!(op, NodeOp::Start) {
                // Multiple incoming paths (or chain start): give up.
                return false;
            }
            cursor = self.pred(current);
        }
        false
    }

    /// Whether a kill begin is redundant: its predecessor already kills the
    /// identical location set, so the later kill adds no ordering.
    pub fn is_redundant_kill_begin(&self, begin: NodeId) -> bool {
        let op = &self.node(begin).op;
        if !matches!(op, NodeOp::KillingBegin(_) | NodeOp::MultiKillingBegin(_)) {
            return false;
        }
        match self.pred(begin) {
            Some(pred) => same_kill_set(op, &self.node(pred).op),
            None => false,
        }
    }

    /// The kill declaration of a node, for scheduling queries.
    pub fn kills(&self, node: NodeId) -> Kills<'_> {
        kill_set(&self.node(node).op)
    }
}

impl Graph {
    /// Fixed node walk: the predecessor of a fixed node, if it has one.
    ///
    /// Merges have no successor-edge predecessor; their incoming paths are
    /// the end nodes held as association inputs.
    pub fn pred(&self, node: NodeId) -> Option<NodeId> {
        let pred = self.pred_raw(node);
        if pred.is_valid() {
            Some(pred)
        } else {
            None
        }
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_any_overlaps_everything() {
        let field = LocationIdentity::Named(7);
        assert!(LocationIdentity::ANY.overlaps(&field));
        assert!(field.overlaps(&LocationIdentity::ANY));
        assert!(field.overlaps(&field));
        assert!(!field.overlaps(&LocationIdentity::Named(8)));
    }

    #[test]
    fn test_kill_declarations_by_op() {
        let single = NodeOp::KillingBegin(LocationIdentity::Named(1));
        assert!(kill_set(&single).covers(&LocationIdentity::Named(1)));
        assert!(!kill_set(&single).covers(&LocationIdentity::Named(2)));
        assert!(kill_set(&single).covers(&LocationIdentity::ANY));

        assert!(matches!(kill_set(&NodeOp::Begin), Kills::None));
        assert!(matches!(kill_set(&NodeOp::Start), Kills::Any));
    }

    #[test]
    fn test_kill_set_equality_ignores_order_and_shape() {
        let a = NodeOp::MultiKillingBegin(KillSet::from_slice(&[
            LocationIdentity::Named(1),
            LocationIdentity::Named(2),
        ]));
        let b = NodeOp::MultiKillingBegin(KillSet::from_slice(&[
            LocationIdentity::Named(2),
            LocationIdentity::Named(1),
        ]));
        assert!(same_kill_set(&a, &b));

        let single = NodeOp::KillingBegin(LocationIdentity::Named(3));
        let multi_one = NodeOp::MultiKillingBegin(KillSet::from_slice(&[LocationIdentity::Named(3)]));
        assert!(same_kill_set(&single, &multi_one));
        assert!(!same_kill_set(&single, &a));
    }
}
