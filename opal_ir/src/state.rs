//! Frame states: resumable interpreter snapshots.
//!
//! A frame state captures what the interpreter needs to resume a method —
//! the method, a bytecode index, and the values of locals and operand-stack
//! slots. Deoptimization replays execution from the state attached to the
//! failing node.
//!
//! Any node whose execution has an externally visible effect is a
//! *state-split*: once the graph reaches
//! [`GraphStage::FrameStatesAssigned`](crate::graph::GraphStage), it must
//! own a frame state, and verification enforces that. Begin nodes carry the
//! may-attach capability for control-dependent nodes but declare no side
//! effect of their own, so they never require a state.

use smallvec::SmallVec;

use crate::graph::Graph;
use crate::node::{Input, InputType, MethodRef, NodeId, NodeOp, UNKNOWN_BCI};
use crate::stamp::Stamp;

// =============================================================================
// Frame State Data
// =============================================================================

/// Layout of a frame state: where execution resumes and how many slots the
/// snapshot holds. Slot values are the node's `Value` inputs, locals first,
/// then operand stack.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FrameStateData {
    /// The method to resume in.
    pub method: MethodRef,
    /// The bytecode index to resume at.
    pub bci: u32,
    /// Number of local-variable slots.
    pub locals: u16,
    /// Number of operand-stack slots.
    pub stack: u16,
}

impl FrameStateData {
    pub fn new(method: MethodRef, bci: u32, locals: u16, stack: u16) -> Self {
        FrameStateData {
            method,
            bci,
            locals,
            stack,
        }
    }

    /// An empty snapshot at an unknown position, for tests and synthetic
    /// deopt points.
    pub fn empty(method: MethodRef) -> Self {
        FrameStateData::new(method, UNKNOWN_BCI, 0, 0)
    }

    /// Total captured slots.
    pub fn slot_count(&self) -> usize {
        self.locals as usize + self.stack as usize
    }
}

// =============================================================================
// Graph Operations
// =============================================================================

impl Graph {
    /// Add a frame state capturing `slots` (locals first, then stack).
    ///
    /// `outer` links the state of the inlined caller scope, if this state
    /// describes an inlined frame.
    pub fn add_frame_state(
        &mut self,
        data: FrameStateData,
        slots: &[NodeId],
        outer: Option<NodeId>,
    ) -> NodeId {
        debug_assert_eq!(data.slot_count(), slots.len());
        let mut inputs: SmallVec<[Input; 8]> = slots.iter().map(|&v| Input::value(v)).collect();
        if let Some(outer) = outer {
            debug_assert!(matches!(self.node(outer).op, NodeOp::FrameState(_)));
            inputs.push(Input::state(outer));
        }
        self.add(NodeOp::FrameState(data), Stamp::Void, &inputs)
    }

    /// The frame state attached to `node`, if any.
    pub fn state_input(&self, node: NodeId) -> Option<NodeId> {
        self.node(node)
            .find_input(InputType::State)
            .filter(|&s| matches!(self.node(s).op, NodeOp::FrameState(_)))
    }

    /// Attach (or retarget) the frame state of a state-split.
    pub fn set_state_input(&mut self, node: NodeId, state: NodeId) {
        debug_assert!(matches!(self.node(state).op, NodeOp::FrameState(_)));
        let existing = self
            .node(node)
            .inputs()
            .iter()
            .position(|input| input.ty == InputType::State);
        match existing {
            Some(index) => self.replace_input(node, index, state),
            None => self.add_input(node, Input::state(state)),
        }
    }

    /// The outer (inlined-caller) state of a frame state, if present.
    pub fn outer_state(&self, state: NodeId) -> Option<NodeId> {
        debug_assert!(matches!(self.node(state).op, NodeOp::FrameState(_)));
        self.node(state).find_input(InputType::State)
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::GraphStage;

    #[test]
    fn test_slot_inputs_follow_the_layout() {
        let mut g = Graph::new();
        let a = g.const_int(1);
        let b = g.const_int(2);
        let c = g.const_int(3);
        let state = g.add_frame_state(FrameStateData::new(9, 14, 2, 1), &[a, b, c], None);

        match &g.node(state).op {
            NodeOp::FrameState(data) => {
                assert_eq!(data.slot_count(), 3);
                assert_eq!(data.bci, 14);
            }
            _ => unreachable!(),
        }
        assert!(g.verify().is_ok());
    }

    #[test]
    fn test_outer_state_links_inlined_scopes() {
        let mut g = Graph::new();
        let caller = g.add_frame_state(FrameStateData::empty(1), &[], None);
        let inlined = g.add_frame_state(FrameStateData::empty(2), &[], Some(caller));
        assert_eq!(g.outer_state(inlined), Some(caller));
        assert_eq!(g.outer_state(caller), None);
    }

    #[test]
    fn test_state_split_verification_tightens_with_stage() {
        let mut g = Graph::new();
        let entry = g.append_begin(g.start);
        let target = crate::invoke::CallTarget::new(5, crate::invoke::InvokeKind::Static);
        let invoke = g.append_invoke(entry, target, &[], Stamp::INT);
        g.append_return(invoke, Some(invoke));

        // While building, a stateless invoke is legal.
        assert!(g.verify().is_ok());

        g.advance_stage(GraphStage::FrameStatesAssigned);
        assert!(g.verify().is_err());

        let state = g.add_frame_state(FrameStateData::empty(5), &[], None);
        g.set_state_input(invoke, state);
        assert!(g.verify().is_ok());
    }

    #[test]
    fn test_set_state_input_retargets_existing_edge() {
        let mut g = Graph::new();
        let entry = g.append_begin(g.start);
        let target = crate::invoke::CallTarget::new(5, crate::invoke::InvokeKind::Static);
        let invoke = g.append_invoke(entry, target, &[], Stamp::INT);

        let s1 = g.add_frame_state(FrameStateData::empty(5), &[], None);
        let s2 = g.add_frame_state(FrameStateData::new(5, 7, 0, 0), &[], None);
        g.set_state_input(invoke, s1);
        g.set_state_input(invoke, s2);

        assert_eq!(g.state_input(invoke), Some(s2));
        assert!(g.usages(s1).is_empty());
    }
}
