//! Floating guard nodes.
//!
//! A guard checks a condition and deoptimizes when the check fails:
//! it fires iff `evaluate(condition) == negated`. Guards float — the
//! scheduler may place them anywhere that preserves their edges — but each
//! carries a `Guard`-typed edge to an *anchor*: the nearest begin that is
//! always reached before the guarded computation. That edge is what keeps a
//! hoisted guard from firing on paths where the guarded code would never
//! have executed.
//!
//! For code generation a live guard is lowered to an explicit `If` whose
//! off path is an unconditional deoptimize ([`Graph::lower_guard_to_if`]).

use crate::control::{BranchProbability, IfData, ProfileData, ProfileSource};
use crate::deopt::DeoptDescriptor;
use crate::graph::{Graph, GraphStage};
use crate::node::{Input, InputType, NodeId, NodeOp};
use crate::stamp::Stamp;

// =============================================================================
// Guard Data
// =============================================================================

/// Payload of a guard node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct GuardData {
    /// The check fires when the condition evaluates to this value.
    pub negated: bool,
    /// What to do when it fires.
    pub deopt: DeoptDescriptor,
}

impl GuardData {
    pub fn new(negated: bool, deopt: DeoptDescriptor) -> Self {
        GuardData { negated, deopt }
    }

    /// Whether the guard fires (deoptimizes) for a condition value.
    #[inline]
    pub fn fires(&self, condition: bool) -> bool {
        condition == self.negated
    }

    /// The same guard on the logically negated condition.
    pub fn negate(&self) -> Self {
        GuardData {
            negated: !self.negated,
            deopt: self.deopt,
        }
    }
}

/// Nodes materialized by guard lowering.
#[derive(Debug, Clone, Copy)]
pub struct LoweredGuard {
    /// The explicit branch.
    pub if_node: NodeId,
    /// Begin of the continue (non-deoptimizing) path. Nodes that hung off
    /// the guard are re-anchored here.
    pub continue_begin: NodeId,
    /// The unconditional deoptimize on the failing path.
    pub deopt: NodeId,
}

// =============================================================================
// Graph Operations
// =============================================================================

impl Graph {
    /// Add a floating guard on `condition`, anchored at `anchor`.
    pub fn add_guard(&mut self, condition: NodeId, anchor: NodeId, data: GuardData) -> NodeId {
        debug_assert!(
            self.node(anchor).op.is_begin() || matches!(self.node(anchor).op, NodeOp::Guard(_)),
            "guard anchor must be a begin or another guard"
        );
        self.add(
            NodeOp::Guard(data),
            Stamp::Void,
            &[Input::condition(condition), Input::guard(anchor)],
        )
    }

    /// Lower a guard to an explicit `If` plus deoptimize, inserted after
    /// the guard's anchor.
    ///
    /// A fresh begin is placed between the branch and whatever followed the
    /// anchor, so nodes still anchored at the old position keep a distinct
    /// attachment point that is independent of the new branch. `state` is
    /// the frame state for the deoptimize; it is mandatory once frame
    /// states have been assigned.
    pub fn lower_guard_to_if(&mut self, guard: NodeId, state: Option<NodeId>) -> LoweredGuard {
        let (data, condition, anchor) = match &self.node(guard).op {
            NodeOp::Guard(data) => (
                *data,
                self.node(guard)
                    .find_input(InputType::Condition)
                    .expect("guard without condition"),
                self.node(guard)
                    .find_input(InputType::Guard)
                    .expect("guard without anchor"),
            ),
            op => unreachable!("lowering non-guard {}", op.name()),
        };
        debug_assert!(
            self.node(anchor).op.is_begin(),
            "guards anchored to guards must be lowered innermost-first"
        );
        debug_assert!(
            state.is_some() || self.stage() < GraphStage::FrameStatesAssigned,
            "lowering a guard without a frame state after state assignment"
        );

        let old_next = self.node(anchor).next();
        if old_next.is_some() {
            self.clear_successor(anchor, 0);
        }

        // The continue path keeps virtually all the probability mass; the
        // deopt path is injected as effectively never taken.
        let continue_probability = BranchProbability::from_f64(1.0 - 1e-6);
        let p_true = if data.negated {
            continue_probability.complement()
        } else {
            continue_probability
        };
        let if_node = self.add(
            NodeOp::If(IfData::new(ProfileData::new(p_true, ProfileSource::Injected))),
            Stamp::Void,
            &[Input::condition(condition)],
        );
        self.set_successor(anchor, 0, if_node);

        let continue_begin = self.add(NodeOp::Begin, Stamp::Void, &[]);
        let deopt_begin = self.add(NodeOp::Begin, Stamp::Void, &[]);
        // Guard fires when condition == negated: that side deoptimizes.
        let (true_succ, false_succ) = if data.negated {
            (deopt_begin, continue_begin)
        } else {
            (continue_begin, deopt_begin)
        };
        self.set_successor(if_node, 0, true_succ);
        self.set_successor(if_node, 1, false_succ);

        if let Some(next) = old_next {
            self.set_successor(continue_begin, 0, next);
        }

        let deopt_inputs: Vec<Input> = state.into_iter().map(Input::state).collect();
        let deopt = self.add(NodeOp::Deoptimize(data.deopt), Stamp::Void, &deopt_inputs);
        self.set_successor(deopt_begin, 0, deopt);

        // Everything guarded by the guard is now guarded by reaching the
        // continue path.
        self.replace_at_usages(guard, continue_begin, Some(InputType::Guard));
        self.replace_at_usages(guard, continue_begin, Some(InputType::Anchor));
        self.kill(guard);

        self.stats.guards_lowered += 1;
        log::debug!(
            "lowered guard to if {:?} / deopt {:?} ({})",
            if_node,
            deopt,
            data.deopt
        );
        self.maybe_verify();

        LoweredGuard {
            if_node,
            continue_begin,
            deopt,
        }
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::deopt::{DeoptAction, DeoptReason};

    fn descriptor() -> DeoptDescriptor {
        DeoptDescriptor::new(DeoptReason::BoundsCheck, DeoptAction::InvalidateReprofile)
    }

    #[test]
    fn test_guard_fires_iff_condition_equals_negated() {
        let plain = GuardData::new(false, descriptor());
        assert!(plain.fires(false));
        assert!(!plain.fires(true));

        let negated = GuardData::new(true, descriptor());
        assert!(negated.fires(true));
        assert!(!negated.fires(false));
    }

    #[test]
    fn test_double_negation_is_logically_equivalent() {
        let original = GuardData::new(false, descriptor());
        let round_tripped = original.negate().negate();
        for condition in [false, true] {
            assert_eq!(original.fires(condition), round_tripped.fires(condition));
        }
    }

    #[test]
    fn test_lowering_builds_if_plus_deopt() {
        let mut g = Graph::new();
        let entry = g.append_begin(g.start);
        g.append_return(entry, None);

        let param = g.parameter(0, Stamp::INT);
        let zero = g.const_int(0);
        let cond = g.int_cmp(crate::node::CmpOp::Ne, param, zero);
        let guard = g.add_guard(cond, entry, GuardData::new(false, descriptor()));

        let lowered = g.lower_guard_to_if(guard, None);

        assert!(!g.is_alive(guard));
        // Continue path on the true side for a non-negated guard.
        assert_eq!(g.node(lowered.if_node).successor(0), Some(lowered.continue_begin));
        // The old next (the return) now follows the continue begin.
        assert!(matches!(
            g.node(g.node(lowered.continue_begin).next().unwrap()).op,
            NodeOp::Return
        ));
        match &g.node(lowered.deopt).op {
            NodeOp::Deoptimize(d) => assert_eq!(*d, descriptor()),
            _ => unreachable!(),
        }
        assert!(g.verify().is_ok());
    }

    #[test]
    fn test_lowering_negated_guard_swaps_sides() {
        let mut g = Graph::new();
        let entry = g.append_begin(g.start);
        let cond = g.const_bool(false);
        let guard = g.add_guard(cond, entry, GuardData::new(true, descriptor()));

        let lowered = g.lower_guard_to_if(guard, None);
        // Guard fires when the condition is true: true side deoptimizes.
        let true_side = g.node(lowered.if_node).successor(0).unwrap();
        assert_eq!(g.node(true_side).next(), Some(lowered.deopt));
    }

    #[test]
    fn test_lowering_reanchors_dependents_to_continue_begin() {
        let mut g = Graph::new();
        let entry = g.append_begin(g.start);
        let c1 = g.const_bool(true);
        let c2 = g.const_bool(false);
        let outer = g.add_guard(c1, entry, GuardData::new(false, descriptor()));
        let dependent = g.add_guard(c2, outer, GuardData::new(false, descriptor()));

        let lowered = g.lower_guard_to_if(outer, None);
        assert_eq!(
            g.node(dependent).find_input(InputType::Guard),
            Some(lowered.continue_begin)
        );
    }
}
