//! Whole-graph structural verification.
//!
//! Every invariant here is load-bearing: a violation means a transformation
//! has a bug, and compiled code built from the graph would be silently
//! wrong. Violations are therefore fatal internal errors — callers either
//! propagate them as compiler bugs or panic — never user-visible input
//! errors.
//!
//! Checked invariants:
//!
//! - edges target live nodes, and both sides of the adjacency agree
//! - usage types are permitted by the target's declaration
//! - fixed nodes have exactly one predecessor XOR are the start node
//!   (merges take their predecessors through end associations instead)
//! - control splits have all successor slots wired to distinct begins
//! - state-splits own a frame state once the graph stage requires one
//! - loop ends reference a live loop begin, carry unique indices, and
//!   respect the loop's safepoint policy
//! - proxies reference a live, matching loop exit
//! - phis match their merge's predecessor count and carry kind-compatible
//!   value stamps

use crate::graph::{Graph, GraphStage};
use crate::node::{InputType, NodeCategory, NodeId, NodeOp};
use crate::stamp::Stamp;
use rustc_hash::FxHashSet;

// =============================================================================
// Violations
// =============================================================================

/// A structural invariant violation: a compiler bug, never recoverable.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VerifyError {
    /// An edge targets a deleted or unallocated node.
    DeadEdge { node: NodeId, target: NodeId },
    /// An edge's type is not permitted by its target.
    UsageNotPermitted {
        node: NodeId,
        target: NodeId,
        ty: InputType,
    },
    /// Forward and reverse adjacency disagree.
    AdjacencyMismatch { node: NodeId, target: NodeId },
    /// A fixed node's predecessor count is wrong.
    PredecessorViolation { node: NodeId },
    /// A floating node has control wiring.
    FloatingWithControl { node: NodeId },
    /// A fixed node's successor slot is unwired.
    UnwiredSuccessor { node: NodeId, slot: usize },
    /// A control-split successor is not a begin (or not distinct).
    BadSplitSuccessor { split: NodeId, succ: NodeId },
    /// A merge has no incoming ends.
    MergeWithoutEnds { merge: NodeId },
    /// A state-split lacks its frame state after assignment.
    MissingFrameState { node: NodeId },
    /// A phi's value count does not match its merge.
    PhiShape {
        phi: NodeId,
        expected: usize,
        found: usize,
    },
    /// A phi mixes value kinds.
    PhiStampMismatch { phi: NodeId, input: NodeId },
    /// A loop end does not reference a live loop begin.
    LoopEndOrphan { end: NodeId },
    /// Two loop ends of one loop share an index.
    DuplicateEndIndex { loop_begin: NodeId, index: u32 },
    /// A loop end allows safepoints its loop begin forbids.
    SafepointViolation { end: NodeId },
    /// A proxy does not reference a live loop exit.
    ProxyOrphan { proxy: NodeId },
    /// A guard's condition or anchor edge is malformed.
    GuardShape { guard: NodeId },
    /// A frame state's slot inputs do not match its layout.
    FrameStateShape { state: NodeId },
}

impl std::fmt::Display for VerifyError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            VerifyError::DeadEdge { node, target } => {
                write!(f, "{:?} has an edge to dead node {:?}", node, target)
            }
            VerifyError::UsageNotPermitted { node, target, ty } => {
                write!(f, "{:?} attaches to {:?} via disallowed {:?} edge", node, target, ty)
            }
            VerifyError::AdjacencyMismatch { node, target } => {
                write!(f, "adjacency mismatch between {:?} and {:?}", node, target)
            }
            VerifyError::PredecessorViolation { node } => {
                write!(f, "{:?} violates the single-predecessor invariant", node)
            }
            VerifyError::FloatingWithControl { node } => {
                write!(f, "floating node {:?} has control wiring", node)
            }
            VerifyError::UnwiredSuccessor { node, slot } => {
                write!(f, "{:?} successor slot {} is unwired", node, slot)
            }
            VerifyError::BadSplitSuccessor { split, succ } => {
                write!(f, "split {:?} successor {:?} is not a distinct begin", split, succ)
            }
            VerifyError::MergeWithoutEnds { merge } => {
                write!(f, "merge {:?} has no incoming ends", merge)
            }
            VerifyError::MissingFrameState { node } => {
                write!(f, "state-split {:?} has no frame state", node)
            }
            VerifyError::PhiShape { phi, expected, found } => {
                write!(f, "phi {:?} has {} values, merge expects {}", phi, found, expected)
            }
            VerifyError::PhiStampMismatch { phi, input } => {
                write!(f, "phi {:?} input {:?} has a mismatched value kind", phi, input)
            }
            VerifyError::LoopEndOrphan { end } => {
                write!(f, "loop end {:?} references no live loop begin", end)
            }
            VerifyError::DuplicateEndIndex { loop_begin, index } => {
                write!(f, "loop {:?} has two ends with index {}", loop_begin, index)
            }
            VerifyError::SafepointViolation { end } => {
                write!(f, "loop end {:?} allows safepoints its loop forbids", end)
            }
            VerifyError::ProxyOrphan { proxy } => {
                write!(f, "proxy {:?} references no live, matching loop exit", proxy)
            }
            VerifyError::GuardShape { guard } => {
                write!(f, "guard {:?} has malformed condition/anchor edges", guard)
            }
            VerifyError::FrameStateShape { state } => {
                write!(f, "frame state {:?} slot inputs do not match its layout", state)
            }
        }
    }
}

// =============================================================================
// Verification
// =============================================================================

/// Verify every structural invariant of `graph`.
pub fn verify_graph(graph: &Graph) -> Result<(), VerifyError> {
    for (id, node) in graph.live_nodes() {
        verify_edges(graph, id)?;
        verify_control_shape(graph, id)?;
        verify_state_protocol(graph, id)?;
        match &node.op {
            NodeOp::Phi => verify_phi(graph, id)?,
            NodeOp::LoopEnd(_) => verify_loop_end(graph, id)?,
            NodeOp::LoopBegin(_) => verify_loop_begin(graph, id)?,
            NodeOp::ValueProxy | NodeOp::GuardProxy | NodeOp::MemoryProxy(_) => {
                verify_proxy(graph, id)?
            }
            NodeOp::Guard(_) => verify_guard(graph, id)?,
            NodeOp::FrameState(_) => verify_frame_state(graph, id)?,
            _ => {}
        }
    }
    Ok(())
}

fn verify_edges(graph: &Graph, id: NodeId) -> Result<(), VerifyError> {
    let node = graph.node(id);
    for input in node.inputs() {
        if !graph.is_alive(input.node) {
            return Err(VerifyError::DeadEdge {
                node: id,
                target: input.node,
            });
        }
        if !graph.node(input.node).op.allowed_usage_types().contains(&input.ty) {
            return Err(VerifyError::UsageNotPermitted {
                node: id,
                target: input.node,
                ty: input.ty,
            });
        }
        // Reverse side: one usage entry per edge.
        let edges = node.inputs().iter().filter(|i| i.node == input.node).count();
        let usages = graph
            .usages(input.node)
            .iter()
            .filter(|&&u| u == id)
            .count();
        if edges != usages {
            return Err(VerifyError::AdjacencyMismatch {
                node: id,
                target: input.node,
            });
        }
    }
    for succ in node.successors() {
        if succ.is_valid() && !graph.is_alive(*succ) {
            return Err(VerifyError::DeadEdge { node: id, target: *succ });
        }
    }
    Ok(())
}

fn verify_control_shape(graph: &Graph, id: NodeId) -> Result<(), VerifyError> {
    let node = graph.node(id);
    let has_pred = graph.pred(id).is_some();

    match node.op.category() {
        NodeCategory::Floating => {
            if has_pred || !node.successors().is_empty() {
                return Err(VerifyError::FloatingWithControl { node: id });
            }
        }
        NodeCategory::FixedWithNext | NodeCategory::ControlSplit | NodeCategory::ControlSink => {
            if node.op.is_merge() {
                // Merge predecessors arrive through end associations.
                if has_pred {
                    return Err(VerifyError::PredecessorViolation { node: id });
                }
                if forward_end_count(graph, id) == 0 {
                    return Err(VerifyError::MergeWithoutEnds { merge: id });
                }
            } else {
                let is_start = id == graph.start;
                if has_pred == is_start {
                    return Err(VerifyError::PredecessorViolation { node: id });
                }
            }

            // Each wired successor must point back through the pred link.
            // An unwired next on a fixed-with-next node is a chain still
            // under construction; splits must be fully wired.
            for (slot, succ) in node.successors().iter().enumerate() {
                if !succ.is_valid() {
                    if node.op.is_control_split() {
                        return Err(VerifyError::UnwiredSuccessor { node: id, slot });
                    }
                    continue;
                }
                if graph.pred(*succ) != Some(id) {
                    return Err(VerifyError::AdjacencyMismatch {
                        node: id,
                        target: *succ,
                    });
                }
            }

            if node.op.is_control_split() {
                let succs = node.successors();
                for (slot, succ) in succs.iter().enumerate() {
                    if !graph.node(*succ).op.is_begin()
                        || succs[..slot].contains(succ)
                    {
                        return Err(VerifyError::BadSplitSuccessor {
                            split: id,
                            succ: *succ,
                        });
                    }
                }
            }
        }
    }
    Ok(())
}

fn verify_state_protocol(graph: &Graph, id: NodeId) -> Result<(), VerifyError> {
    if graph.stage() < GraphStage::FrameStatesAssigned {
        return Ok(());
    }
    let node = graph.node(id);
    if node.op.needs_frame_state() {
        let state = node.find_input(InputType::State);
        let ok = state
            .map(|s| matches!(graph.node(s).op, NodeOp::FrameState(_)))
            .unwrap_or(false);
        if !ok {
            return Err(VerifyError::MissingFrameState { node: id });
        }
    }
    Ok(())
}

fn verify_phi(graph: &Graph, id: NodeId) -> Result<(), VerifyError> {
    let node = graph.node(id);
    let merge = match node.input(0) {
        Some(input) if input.ty == InputType::Association => input.node,
        _ => return Err(VerifyError::PhiShape { phi: id, expected: 0, found: 0 }),
    };
    let expected = merge_pred_count(graph, merge);
    let values: Vec<NodeId> = node.inputs_of_type(InputType::Value).collect();
    if values.len() != expected {
        return Err(VerifyError::PhiShape {
            phi: id,
            expected,
            found: values.len(),
        });
    }
    // Value-kind compatibility: mixing int with object in one phi is the
    // classic type-mismatched-phi bug.
    for value in values {
        if !stamps_kind_compatible(graph.node(value).stamp(), node.stamp()) {
            return Err(VerifyError::PhiStampMismatch { phi: id, input: value });
        }
    }
    Ok(())
}

fn verify_loop_end(graph: &Graph, id: NodeId) -> Result<(), VerifyError> {
    let node = graph.node(id);
    let loop_begin = node.find_input(InputType::Association);
    let loop_begin = match loop_begin {
        Some(lb)
            if graph.is_alive(lb) && matches!(graph.node(lb).op, NodeOp::LoopBegin(_)) =>
        {
            lb
        }
        _ => return Err(VerifyError::LoopEndOrphan { end: id }),
    };
    let (end_safepoint, loop_allows) = match (&node.op, &graph.node(loop_begin).op) {
        (NodeOp::LoopEnd(end), NodeOp::LoopBegin(lb)) => {
            (end.can_safepoint, lb.can_ends_safepoint)
        }
        _ => unreachable!("checked above"),
    };
    if end_safepoint && !loop_allows {
        return Err(VerifyError::SafepointViolation { end: id });
    }
    Ok(())
}

fn verify_loop_begin(graph: &Graph, id: NodeId) -> Result<(), VerifyError> {
    let mut seen = FxHashSet::default();
    for user in graph.usages(id) {
        if let NodeOp::LoopEnd(end) = &graph.node(*user).op {
            if !seen.insert(end.end_index) {
                return Err(VerifyError::DuplicateEndIndex {
                    loop_begin: id,
                    index: end.end_index,
                });
            }
        }
    }
    Ok(())
}

fn verify_proxy(graph: &Graph, id: NodeId) -> Result<(), VerifyError> {
    let node = graph.node(id);
    let exit = node.find_input(InputType::Association);
    let ok = exit
        .map(|e| graph.is_alive(e) && matches!(graph.node(e).op, NodeOp::LoopExit))
        .unwrap_or(false);
    if !ok || node.inputs().len() != 2 {
        return Err(VerifyError::ProxyOrphan { proxy: id });
    }
    Ok(())
}

fn verify_guard(graph: &Graph, id: NodeId) -> Result<(), VerifyError> {
    let node = graph.node(id);
    let condition = node.find_input(InputType::Condition);
    let anchor = node.find_input(InputType::Guard);
    let anchor_ok = anchor
        .map(|a| graph.node(a).op.is_begin() || matches!(graph.node(a).op, NodeOp::Guard(_)))
        .unwrap_or(false);
    if condition.is_none() || !anchor_ok {
        return Err(VerifyError::GuardShape { guard: id });
    }
    Ok(())
}

fn verify_frame_state(graph: &Graph, id: NodeId) -> Result<(), VerifyError> {
    let node = graph.node(id);
    if let NodeOp::FrameState(data) = &node.op {
        let slots = node.inputs_of_type(InputType::Value).count();
        if slots != data.slot_count() {
            return Err(VerifyError::FrameStateShape { state: id });
        }
    }
    Ok(())
}

// =============================================================================
// Helpers
// =============================================================================

/// Number of forward ends feeding a merge.
pub fn forward_end_count(graph: &Graph, merge: NodeId) -> usize {
    graph.node(merge).inputs_of_type(InputType::Association).count()
}

/// Total predecessor count of a merge: forward ends, plus loop ends for a
/// loop begin.
pub fn merge_pred_count(graph: &Graph, merge: NodeId) -> usize {
    let forward = forward_end_count(graph, merge);
    if matches!(graph.node(merge).op, NodeOp::LoopBegin(_)) {
        let backward = graph
            .usages(merge)
            .iter()
            .filter(|&&u| matches!(graph.node(u).op, NodeOp::LoopEnd(_)))
            .count();
        forward + backward
    } else {
        forward
    }
}

fn stamps_kind_compatible(a: &Stamp, b: &Stamp) -> bool {
    matches!(
        (a, b),
        (Stamp::Int(_), Stamp::Int(_))
            | (Stamp::Float(_), Stamp::Float(_))
            | (Stamp::Boolean, Stamp::Boolean)
            | (Stamp::Object(_), Stamp::Object(_))
            | (Stamp::Condition, Stamp::Condition)
            | (Stamp::Memory, Stamp::Memory)
            | (Stamp::Empty, _)
            | (_, Stamp::Empty)
    )
}
