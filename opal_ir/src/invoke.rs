//! Call nodes.
//!
//! An invoke is both a state-split (a call may deoptimize at any internal
//! point, so it needs a frame state) and, in the exception-supporting
//! variant, a control split with a normal continuation and an exception
//! edge. Calls conservatively kill all memory locations
//! (see [`crate::memory::kill_set`]).
//!
//! The exception edge's probability is runtime-determined and pinned at
//! [`EXCEPTION_PROBABILITY`](crate::control::EXCEPTION_PROBABILITY);
//! `set_probability` refuses to touch it.

use crate::graph::Graph;
use crate::node::{Input, MethodRef, NodeId, NodeOp};
use crate::stamp::Stamp;

// =============================================================================
// Call Target
// =============================================================================

/// Dispatch kind of a call site.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum InvokeKind {
    /// Virtual dispatch through the receiver's type.
    Virtual = 0,
    /// Interface dispatch.
    Interface = 1,
    /// Non-virtual dispatch to a known method (constructors, private).
    Special = 2,
    /// Static method call.
    Static = 3,
}

impl InvokeKind {
    /// Decode from the wire representation.
    pub const fn from_u8(raw: u8) -> Option<Self> {
        match raw {
            0 => Some(Self::Virtual),
            1 => Some(Self::Interface),
            2 => Some(Self::Special),
            3 => Some(Self::Static),
            _ => None,
        }
    }

    /// Whether the callee is known statically.
    pub const fn is_direct(self) -> bool {
        matches!(self, Self::Special | Self::Static)
    }
}

/// What a call site invokes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CallTarget {
    /// The resolved method, interpreted by the external metadata provider.
    pub method: MethodRef,
    pub kind: InvokeKind,
}

impl CallTarget {
    pub fn new(method: MethodRef, kind: InvokeKind) -> Self {
        CallTarget { method, kind }
    }
}

/// Payload of invoke nodes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct InvokeData {
    pub target: CallTarget,
}

/// The nodes materialized for an exception-supporting call site.
#[derive(Debug, Clone, Copy)]
pub struct InvokeWithExceptionShape {
    /// The invoke itself.
    pub node: NodeId,
    /// Begin of the normal continuation.
    pub next_begin: NodeId,
    /// Begin of the exception path.
    pub exception_begin: NodeId,
}

// =============================================================================
// Graph Operations
// =============================================================================

impl Graph {
    /// Append a call without an exception edge. The invoke's value is its
    /// return value.
    pub fn append_invoke(
        &mut self,
        pred: NodeId,
        target: CallTarget,
        args: &[NodeId],
        return_stamp: Stamp,
    ) -> NodeId {
        let inputs: Vec<Input> = args.iter().map(|&a| Input::value(a)).collect();
        let old_next = self.node(pred).next();
        if old_next.is_some() {
            self.clear_successor(pred, 0);
        }
        let invoke = self.add(
            NodeOp::Invoke(InvokeData { target }),
            return_stamp,
            &inputs,
        );
        self.set_successor(pred, 0, invoke);
        if let Some(next) = old_next {
            self.set_successor(invoke, 0, next);
        }
        invoke
    }

    /// Append a call with normal and exception successors, each rooted by a
    /// fresh begin.
    pub fn append_invoke_with_exception(
        &mut self,
        pred: NodeId,
        target: CallTarget,
        args: &[NodeId],
        return_stamp: Stamp,
    ) -> InvokeWithExceptionShape {
        let inputs: Vec<Input> = args.iter().map(|&a| Input::value(a)).collect();
        let invoke = self.add(
            NodeOp::InvokeWithException(InvokeData { target }),
            return_stamp,
            &inputs,
        );
        self.set_successor(pred, 0, invoke);
        let next_begin = self.add(NodeOp::Begin, Stamp::Void, &[]);
        let exception_begin = self.add(NodeOp::Begin, Stamp::Void, &[]);
        self.set_successor(invoke, 0, next_begin);
        self.set_successor(invoke, 1, exception_begin);
        InvokeWithExceptionShape {
            node: invoke,
            next_begin,
            exception_begin,
        }
    }

    /// The exception-path begin of an exception-supporting invoke.
    pub fn exception_edge(&self, invoke: NodeId) -> Option<NodeId> {
        match self.node(invoke).op {
            NodeOp::InvokeWithException(_) => self.node(invoke).successor(1),
            _ => None,
        }
    }

    /// The during-state of an invoke: the frame state describing execution
    /// inside the callee, used when the call itself deoptimizes. Stored as
    /// the second `State` input (the first is the after-state); the
    /// before-state is reachable as the after-state's outer scope.
    pub fn state_during(&self, invoke: NodeId) -> Option<NodeId> {
        debug_assert!(self.node(invoke).op.has_side_effect());
        self.node(invoke)
            .inputs_of_type(crate::node::InputType::State)
            .nth(1)
    }

    /// Attach (or retarget) an invoke's during-state. The after-state must
    /// already be present.
    pub fn set_state_during(&mut self, invoke: NodeId, state: NodeId) {
        debug_assert!(matches!(self.node(state).op, NodeOp::FrameState(_)));
        let state_edges: Vec<usize> = self
            .node(invoke)
            .inputs()
            .iter()
            .enumerate()
            .filter(|(_, input)| input.ty == crate::node::InputType::State)
            .map(|(index, _)| index)
            .collect();
        match state_edges.len() {
            0 => unreachable!("during-state attached before the after-state"),
            1 => self.add_input(invoke, Input::state(state)),
            _ => self.replace_input(invoke, state_edges[1], state),
        }
    }
}

// =============================================================================
// Tests
// =============================================================================
