//! The fixed-node control skeleton: begins, ends, merges, splits.
//!
//! Begins are the attachment points of the graph: everything that is
//! control-dependent on reaching a block — guards, anchored values — hangs
//! off the block's begin through `Guard`/`Anchor` edges. Deleting a begin
//! therefore requires evacuating its attachments to the nearest surviving
//! begin first; the edge protocol makes it impossible to forget the
//! evacuation without tripping verification.
//!
//! Control splits carry per-successor branch probabilities tagged with a
//! trust level ([`ProfileSource`]). Probabilities of runtime-determined
//! edges (exception paths) are pinned and refuse updates.

use crate::graph::Graph;
use crate::memory::LocationIdentity;
use crate::node::{Input, InputType, NodeCategory, NodeId, NodeOp};
use crate::stamp::Stamp;

/// Probability reported for exception edges. Exceptional control flow is
/// modeled as effectively-never-taken and is not user-settable.
pub const EXCEPTION_PROBABILITY: f64 = 1e-5;

// =============================================================================
// Branch Probability
// =============================================================================

/// A branch probability as a numerator over 2^32.
///
/// Fixed-point keeps probability arithmetic exact, hashable, and cheap on
/// the rewrite path.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BranchProbability {
    numer: u32,
}

impl BranchProbability {
    const DENOM: u64 = 1u64 << 32;

    /// Always taken.
    pub const ALWAYS: Self = Self { numer: u32::MAX };
    /// Never taken.
    pub const NEVER: Self = Self { numer: 0 };
    /// Even odds.
    pub const EVEN: Self = Self { numer: u32::MAX / 2 };

    /// From a floating-point probability, clamped to [0, 1].
    pub fn from_f64(p: f64) -> Self {
        let p = p.clamp(0.0, 1.0);
        Self {
            numer: (p * Self::DENOM as f64).min(u32::MAX as f64) as u32,
        }
    }

    /// As a floating-point probability in [0, 1].
    pub fn as_f64(self) -> f64 {
        self.numer as f64 / Self::DENOM as f64
    }

    /// The complement `1 - p`.
    pub fn complement(self) -> Self {
        Self {
            numer: u32::MAX - self.numer,
        }
    }

    /// The raw fixed-point numerator (wire representation).
    pub(crate) const fn raw(self) -> u32 {
        self.numer
    }

    /// Rebuild from the raw fixed-point numerator.
    pub(crate) const fn from_raw(numer: u32) -> Self {
        Self { numer }
    }
}

// =============================================================================
// Profile Trust
// =============================================================================

/// Where a branch probability came from, ordered by trust.
///
/// Lower ordinal = more trusted. Combining two sources keeps the more
/// trusted one, so an injected probability dominates profile data, which
/// dominates a guess.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[repr(u8)]
pub enum ProfileSource {
    /// Asserted by the compiler or an annotation.
    Injected = 0,
    /// Measured by the profiler.
    Profiled = 1,
    /// Nothing is known.
    Unknown = 2,
}

impl ProfileSource {
    /// Decode from the wire representation.
    pub const fn from_u8(raw: u8) -> Option<Self> {
        match raw {
            0 => Some(Self::Injected),
            1 => Some(Self::Profiled),
            2 => Some(Self::Unknown),
            _ => None,
        }
    }

    /// Combine two trust levels: the lower ordinal wins.
    pub fn combine(self, other: Self) -> Self {
        if (self as u8) <= (other as u8) {
            self
        } else {
            other
        }
    }
}

/// A probability plus the trust in it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ProfileData {
    pub probability: BranchProbability,
    pub source: ProfileSource,
}

impl ProfileData {
    /// An untrusted even split.
    pub const UNKNOWN: ProfileData = ProfileData {
        probability: BranchProbability::EVEN,
        source: ProfileSource::Unknown,
    };

    pub fn new(probability: BranchProbability, source: ProfileSource) -> Self {
        ProfileData {
            probability,
            source,
        }
    }

    /// Derive a new probability from two contributing profiles; the result
    /// carries the dominant (more trusted) source.
    pub fn derived(probability: BranchProbability, a: ProfileSource, b: ProfileSource) -> Self {
        ProfileData {
            probability,
            source: a.combine(b),
        }
    }
}

/// Payload of a two-way control split: the probability of the true
/// successor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct IfData {
    pub profile: ProfileData,
}

impl IfData {
    pub fn new(profile: ProfileData) -> Self {
        IfData { profile }
    }
}

// =============================================================================
// Skeleton Construction
// =============================================================================

impl Graph {
    /// Append a plain begin after a fixed-with-next node.
    pub fn append_begin(&mut self, pred: NodeId) -> NodeId {
        self.splice_after(pred, NodeOp::Begin, Stamp::Void)
    }

    /// Append a begin killing one location class.
    pub fn append_killing_begin(&mut self, pred: NodeId, location: LocationIdentity) -> NodeId {
        self.splice_after(pred, NodeOp::KillingBegin(location), Stamp::Memory)
    }

    /// Terminate a chain with a forward end, to be fed into a merge.
    pub fn append_end(&mut self, pred: NodeId) -> NodeId {
        let end = self.add(NodeOp::End, Stamp::Void, &[]);
        self.set_successor(pred, 0, end);
        end
    }

    /// Create a merge joining the given forward ends, in order.
    pub fn add_merge(&mut self, ends: &[NodeId]) -> NodeId {
        debug_assert!(!ends.is_empty());
        debug_assert!(ends
            .iter()
            .all(|&e| matches!(self.node(e).op, NodeOp::End)));
        let inputs: Vec<Input> = ends.iter().map(|&e| Input::association(e)).collect();
        self.add(NodeOp::Merge, Stamp::Void, &inputs)
    }

    /// Append a two-way split after `pred`, returning
    /// `(if, true_begin, false_begin)`. Both successors get fresh begins.
    pub fn append_if(
        &mut self,
        pred: NodeId,
        condition: NodeId,
        profile: ProfileData,
    ) -> (NodeId, NodeId, NodeId) {
        let if_node = self.add(
            NodeOp::If(IfData::new(profile)),
            Stamp::Void,
            &[Input::condition(condition)],
        );
        self.set_successor(pred, 0, if_node);
        let true_begin = self.add(NodeOp::Begin, Stamp::Void, &[]);
        let false_begin = self.add(NodeOp::Begin, Stamp::Void, &[]);
        self.set_successor(if_node, 0, true_begin);
        self.set_successor(if_node, 1, false_begin);
        (if_node, true_begin, false_begin)
    }

    /// Terminate a chain with a return.
    pub fn append_return(&mut self, pred: NodeId, value: Option<NodeId>) -> NodeId {
        let inputs: Vec<Input> = value.into_iter().map(Input::value).collect();
        let ret = self.add(NodeOp::Return, Stamp::Void, &inputs);
        self.set_successor(pred, 0, ret);
        ret
    }

    /// Terminate a chain with an unconditional deoptimization.
    pub fn append_deoptimize(
        &mut self,
        pred: NodeId,
        descriptor: crate::deopt::DeoptDescriptor,
    ) -> NodeId {
        let deopt = self.add(NodeOp::Deoptimize(descriptor), Stamp::Void, &[]);
        self.set_successor(pred, 0, deopt);
        deopt
    }
}

// =============================================================================
// Probabilities
// =============================================================================

impl Graph {
    /// The probability of reaching successor `index` of a control split,
    /// in [0, 1].
    pub fn probability(&self, split: NodeId, index: usize) -> f64 {
        match &self.node(split).op {
            NodeOp::If(data) => {
                let p = data.profile.probability.as_f64();
                if index == 0 {
                    p
                } else {
                    1.0 - p
                }
            }
            NodeOp::InvokeWithException(_) => {
                if index == 0 {
                    1.0 - EXCEPTION_PROBABILITY
                } else {
                    EXCEPTION_PROBABILITY
                }
            }
            op => unreachable!("{} is not a control split", op.name()),
        }
    }

    /// Update the probability of reaching successor `index`.
    ///
    /// Returns `false` for splits whose likelihood is runtime-determined
    /// (exception edges), which keep their fixed probability.
    pub fn set_probability(&mut self, split: NodeId, index: usize, profile: ProfileData) -> bool {
        match &mut self.node_mut(split).op {
            NodeOp::If(data) => {
                data.profile = if index == 0 {
                    profile
                } else {
                    ProfileData::new(profile.probability.complement(), profile.source)
                };
                true
            }
            NodeOp::InvokeWithException(_) => false,
            op => unreachable!("{} is not a control split", op.name()),
        }
    }

    /// The trust level of a split's probability.
    pub fn profile_source(&self, split: NodeId) -> ProfileSource {
        match &self.node(split).op {
            NodeOp::If(data) => data.profile.source,
            NodeOp::InvokeWithException(_) => ProfileSource::Injected,
            op => unreachable!("{} is not a control split", op.name()),
        }
    }
}

// =============================================================================
// Begin Deletion
// =============================================================================

impl Graph {
    /// The nearest begin at or above `node` on the fixed skeleton,
    /// following predecessor links. The start node terminates every walk.
    pub fn prev_begin(&self, node: NodeId) -> NodeId {
        let mut cursor = self.pred(node);
        while let Some(current) = cursor {
            if self.node(current).op.is_begin() {
                return current;
            }
            cursor = self.pred(current);
        }
        self.start
    }

    /// Evacuate everything attached to `begin` to the nearest surviving
    /// begin above it. Must run before the begin is unlinked; the walk
    /// starts at the begin's predecessor so the begin itself is skipped.
    pub fn prepare_delete(&mut self, begin: NodeId) {
        debug_assert!(self.node(begin).op.is_begin());
        let survivor = self.prev_begin(begin);
        debug_assert_ne!(survivor, begin);
        self.replace_at_usages(begin, survivor, Some(InputType::Guard));
        self.replace_at_usages(begin, survivor, Some(InputType::Anchor));
    }

    /// Delete a begin node, relocating its attachments.
    ///
    /// When the begin hangs off a fixed-with-next predecessor it is spliced
    /// out of the chain. When it is a control-split successor the slot must
    /// keep a begin, so a fresh plain begin takes its place.
    pub fn delete_begin(&mut self, begin: NodeId) {
        debug_assert!(matches!(
            self.node(begin).op,
            NodeOp::Begin | NodeOp::KillingBegin(_) | NodeOp::MultiKillingBegin(_)
        ));
        self.prepare_delete(begin);

        let pred = self.pred(begin).expect("begin without predecessor");
        let slot = self
            .successor_index_of(pred, begin)
            .expect("predecessor link out of sync");
        let next = self.node(begin).next();

        if next.is_some() {
            self.clear_successor(begin, 0);
        }
        self.clear_successor(pred, slot);

        match self.node(pred).op.category() {
            NodeCategory::ControlSplit => {
                let replacement = self.add(NodeOp::Begin, Stamp::Void, &[]);
                self.set_successor(pred, slot, replacement);
                if let Some(next) = next {
                    self.set_successor(replacement, 0, next);
                }
            }
            _ => {
                if let Some(next) = next {
                    self.set_successor(pred, slot, next);
                }
            }
        }

        self.kill(begin);
        self.maybe_verify();
    }

    /// Remove a killing begin, re-wiring its memory dependents to the
    /// predecessor.
    ///
    /// Rejected (returning `false`, with no partial mutation) unless the
    /// predecessor kills the identical location set — removing the kill
    /// otherwise would hide a real memory dependency.
    pub fn try_remove_kill_begin(&mut self, begin: NodeId) -> bool {
        if !self.is_redundant_kill_begin(begin) {
            return false;
        }
        let pred = self.pred(begin).expect("redundant kill begin has a predecessor");
        self.replace_at_usages(begin, pred, Some(InputType::Memory));
        self.delete_begin(begin);
        self.stats.kills_merged += 1;
        log::trace!("merged redundant kill begin into {:?}", pred);
        true
    }
}

// =============================================================================
// Unreachable Control Removal
// =============================================================================

impl Graph {
    /// Detach one forward end from a merge, dropping the corresponding phi
    /// operand. Returns `true` if the merge has no ends left afterwards
    /// (and must itself be removed by the caller).
    pub fn remove_merge_end(&mut self, merge: NodeId, end: NodeId) -> bool {
        debug_assert!(self.node(merge).op.is_merge());
        let index = self
            .node(merge)
            .inputs()
            .iter()
            .position(|input| input.ty == InputType::Association && input.node == end)
            .expect("end is not attached to this merge");

        // Phi operand `index` corresponds to association input `index`.
        let phis: Vec<NodeId> = self
            .usages(merge)
            .iter()
            .copied()
            .filter(|&u| matches!(self.node(u).op, NodeOp::Phi))
            .collect();
        for phi in phis {
            self.remove_input(phi, index + 1);
        }
        self.remove_input(merge, index);
        self.node(merge).inputs_of_type(InputType::Association).count() == 0
    }

    /// Detach one back edge from its loop, dropping the corresponding phi
    /// operand on every phi of the loop begin.
    pub fn remove_loop_end(&mut self, loop_begin: NodeId, end: NodeId) {
        let ends = self.loop_ends(loop_begin);
        let rank = ends
            .iter()
            .position(|&e| e == end)
            .expect("end does not belong to this loop");
        let forward = self
            .node(loop_begin)
            .inputs_of_type(InputType::Association)
            .count();
        let phis: Vec<NodeId> = self
            .usages(loop_begin)
            .iter()
            .copied()
            .filter(|&u| matches!(self.node(u).op, NodeOp::Phi))
            .collect();
        for phi in phis {
            self.remove_input(phi, 1 + forward + rank);
        }
    }

    /// Kill the control subtree rooted at `root` and every node that was
    /// control-dependent on it.
    ///
    /// Ends feeding still-reachable merges are detached from them (with
    /// their phi operands), loop ends are detached from their loops, and
    /// floating nodes hanging off killed control (guards, phis, anchored
    /// values) die with it. The caller must already have unlinked `root`
    /// from its predecessor.
    pub fn kill_control_subtree(&mut self, root: NodeId) {
        let mut worklist = vec![root];
        while let Some(id) = worklist.pop() {
            if !self.is_alive(id) {
                continue;
            }

            // Detached ends pull their merge's phi operand; a merge losing
            // its last end dies too.
            match self.node(id).op.clone() {
                NodeOp::End => {
                    let merge = self.usages(id).first().copied();
                    if let Some(merge) = merge {
                        if self.remove_merge_end(merge, id) {
                            worklist.push(merge);
                        }
                    }
                }
                NodeOp::LoopEnd(_) => {
                    if let Some(loop_begin) = self.node(id).find_input(InputType::Association) {
                        if self.is_alive(loop_begin) {
                            self.remove_loop_end(loop_begin, id);
                        }
                    }
                }
                _ => {}
            }

            for slot in 0..self.node(id).successors().len() {
                let succ = self.node(id).successors()[slot];
                if succ.is_valid() {
                    self.clear_successor(id, slot);
                    worklist.push(succ);
                }
            }

            if let Some(pred) = self.pred(id) {
                if let Some(slot) = self.successor_index_of(pred, id) {
                    self.clear_successor(pred, slot);
                }
            }

            self.kill_with_dependents(id);
        }
    }

    /// Kill `id` together with every node that transitively uses it.
    ///
    /// Only meaningful for unreachable subgraphs, where every remaining
    /// user is itself dead by construction. Handles usage cycles (loop
    /// phis, mutually dependent floating nodes) by severing all edges
    /// inside the doomed set before killing its members.
    pub(crate) fn kill_with_dependents(&mut self, root: NodeId) {
        if !self.is_alive(root) {
            return;
        }
        let mut members = vec![root];
        let mut seen = crate::arena::IdSet::new();
        seen.insert(root);
        let mut cursor = 0;
        while cursor < members.len() {
            let id = members[cursor];
            cursor += 1;
            let users: Vec<NodeId> = self.usages(id).to_vec();
            for user in users {
                if self.is_alive(user) && seen.insert(user) {
                    members.push(user);
                }
            }
        }
        for &id in &members {
            self.strip_inputs(id);
        }
        for &id in &members {
            if self.is_alive(id) {
                self.kill(id);
            }
        }
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::deopt::{DeoptAction, DeoptDescriptor, DeoptReason};

    fn diamond(g: &mut Graph) -> (NodeId, NodeId, NodeId, NodeId) {
        // start -> entry begin -> if -> (t, f) -> ends -> merge
        let entry = g.append_begin(g.start);
        let cond = {
            let a = g.parameter(0, Stamp::INT);
            let b = g.const_int(0);
            g.int_cmp(crate::node::CmpOp::Eq, a, b)
        };
        let (if_node, t, f) = g.append_if(entry, cond, ProfileData::UNKNOWN);
        let te = g.append_end(t);
        let fe = g.append_end(f);
        let merge = g.add_merge(&[te, fe]);
        g.append_return(merge, None);
        (entry, if_node, t, merge)
    }

    #[test]
    fn test_probability_sums_to_one() {
        let mut g = Graph::new();
        let entry = g.append_begin(g.start);
        let c = g.const_bool(true);
        let (if_node, _, _) = g.append_if(
            entry,
            c,
            ProfileData::new(BranchProbability::from_f64(0.3), ProfileSource::Profiled),
        );
        let p0 = g.probability(if_node, 0);
        let p1 = g.probability(if_node, 1);
        assert!((p0 - 0.3).abs() < 1e-6);
        assert!((p0 + p1 - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_injected_trust_dominates() {
        assert_eq!(
            ProfileSource::Profiled.combine(ProfileSource::Injected),
            ProfileSource::Injected
        );
        assert_eq!(
            ProfileSource::Injected.combine(ProfileSource::Unknown),
            ProfileSource::Injected
        );
        assert_eq!(
            ProfileSource::Unknown.combine(ProfileSource::Profiled),
            ProfileSource::Profiled
        );
    }

    #[test]
    fn test_derived_profiles_keep_dominant_source() {
        let d = ProfileData::derived(
            BranchProbability::from_f64(0.21),
            ProfileSource::Profiled,
            ProfileSource::Injected,
        );
        assert_eq!(d.source, ProfileSource::Injected);
    }

    #[test]
    fn test_prev_begin_walks_past_splits() {
        let mut g = Graph::new();
        let (entry, if_node, t, _merge) = diamond(&mut g);
        assert_eq!(g.prev_begin(t), entry);
        assert_eq!(g.prev_begin(if_node), entry);
    }

    #[test]
    fn test_delete_begin_relocates_anchors_to_split_begin() {
        let mut g = Graph::new();
        let (entry, if_node, t, _merge) = diamond(&mut g);

        let cond = g.const_bool(true);
        let descriptor = DeoptDescriptor::new(DeoptReason::NullCheck, DeoptAction::InvalidateReprofile);
        let guard = g.add_guard(cond, t, crate::guard::GuardData::new(false, descriptor));

        g.delete_begin(t);

        // Anchor moved to the begin above the split; condition and
        // descriptor untouched.
        let anchor = g.node(guard).find_input(InputType::Guard).unwrap();
        assert_eq!(anchor, entry);
        assert_eq!(g.node(guard).find_input(InputType::Condition), Some(cond));
        match &g.node(guard).op {
            NodeOp::Guard(data) => assert_eq!(data.deopt, descriptor),
            _ => unreachable!(),
        }

        // The split slot still holds a begin.
        let slot0 = g.node(if_node).successor(0).unwrap();
        assert!(matches!(g.node(slot0).op, NodeOp::Begin));
        assert!(g.verify().is_ok());
    }

    #[test]
    fn test_kill_begin_removal_requires_matching_predecessor() {
        let mut g = Graph::new();
        let loc_a = LocationIdentity::Named(1);
        let loc_b = LocationIdentity::Named(2);

        let k1 = g.append_killing_begin(g.start, loc_a);
        let k2 = g.append_killing_begin(k1, loc_a);
        let k3 = g.append_killing_begin(k2, loc_b);
        g.append_return(k3, None);

        // Mismatched predecessor kill: rejected untouched.
        assert!(!g.try_remove_kill_begin(k3));
        assert!(g.is_alive(k3));

        // Identical predecessor kill: merged.
        assert!(g.try_remove_kill_begin(k2));
        assert!(!g.is_alive(k2));
        assert_eq!(g.node(k1).next(), Some(k3));
        assert!(g.verify().is_ok());
    }

    #[test]
    fn test_exception_edges_reject_probability_updates() {
        let mut g = Graph::new();
        let entry = g.append_begin(g.start);
        let target = crate::invoke::CallTarget::new(11, crate::invoke::InvokeKind::Virtual);
        let invoke = g.append_invoke_with_exception(entry, target, &[], Stamp::OBJECT);
        assert!(!g.set_probability(invoke.node, 0, ProfileData::UNKNOWN));
        assert!((g.probability(invoke.node, 1) - EXCEPTION_PROBABILITY).abs() < 1e-12);
    }
}
