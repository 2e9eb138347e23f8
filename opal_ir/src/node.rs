//! IR node definitions for the Opal Sea-of-Nodes graph.
//!
//! Every program point and every computed value is a node. Data flow,
//! control flow, memory ordering, and guard dependencies are all edges, so
//! optimization passes manipulate one uniform structure:
//!
//! - **Fixed nodes** form the control skeleton and execute in a definite
//!   order (begins, merges, splits, sinks).
//! - **Floating nodes** compute values and are placed late by the scheduler,
//!   constrained only by their edges (arithmetic, phis, guards, proxies).
//!
//! # Edges
//!
//! Input edges are typed: a guard consumes its condition through a
//! `Condition` edge and hangs off its anchor through a `Guard` edge. Each
//! operation declares which usage types consumers may attach with
//! ([`NodeOp::allowed_usage_types`]); violations are graph-integrity bugs
//! caught by verification, not recoverable errors.
//!
//! Edge lists live on the node, but both sides of the adjacency (inputs and
//! reverse usages) are mutated only through the [`Graph`](crate::graph::Graph)
//! entry points — the fields are crate-private for that reason.

use smallvec::SmallVec;

use crate::arena::Id;
use crate::control::IfData;
use crate::deopt::DeoptDescriptor;
use crate::guard::GuardData;
use crate::invoke::InvokeData;
use crate::loops::{LoopBeginData, LoopEndData};
use crate::memory::{KillSet, LocationIdentity};
use crate::stamp::Stamp;
use crate::state::FrameStateData;

/// Unique identity of a node within its graph.
pub type NodeId = Id<Node>;

/// Opaque reference to a runtime type, resolved by the external metadata
/// provider.
pub type TypeRef = u32;

/// Opaque reference to a runtime method, resolved by the external metadata
/// provider.
pub type MethodRef = u32;

// =============================================================================
// Input Edges
// =============================================================================

/// The tag vocabulary for input edges.
///
/// The tag states what the consumer reads through the edge, which in turn
/// determines how transformations may rewrite it (e.g. anchor evacuation
/// moves `Guard`/`Anchor` edges but never `Value` edges).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum InputType {
    /// An ordinary data value.
    Value = 0,
    /// A boolean condition (branch or guard test).
    Condition = 1,
    /// A frame state for deoptimization.
    State = 2,
    /// A guard dependency: the consumer only executes under this guard.
    Guard = 3,
    /// An anchor: the consumer may not float above this control point.
    Anchor = 4,
    /// A memory token ordering the consumer after a kill point.
    Memory = 5,
    /// Structural association (merge↔end, loop↔end/exit, proxy↔exit).
    Association = 6,
    /// Extension point for node types outside the core vocabulary.
    Extension = 7,
}

impl InputType {
    /// Decode from the wire representation.
    pub const fn from_u8(raw: u8) -> Option<Self> {
        match raw {
            0 => Some(InputType::Value),
            1 => Some(InputType::Condition),
            2 => Some(InputType::State),
            3 => Some(InputType::Guard),
            4 => Some(InputType::Anchor),
            5 => Some(InputType::Memory),
            6 => Some(InputType::Association),
            7 => Some(InputType::Extension),
            _ => None,
        }
    }
}

/// A typed input edge.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Input {
    pub ty: InputType,
    pub node: NodeId,
}

impl Input {
    #[inline]
    pub const fn new(ty: InputType, node: NodeId) -> Self {
        Input { ty, node }
    }

    #[inline]
    pub const fn value(node: NodeId) -> Self {
        Input::new(InputType::Value, node)
    }

    #[inline]
    pub const fn condition(node: NodeId) -> Self {
        Input::new(InputType::Condition, node)
    }

    #[inline]
    pub const fn state(node: NodeId) -> Self {
        Input::new(InputType::State, node)
    }

    #[inline]
    pub const fn guard(node: NodeId) -> Self {
        Input::new(InputType::Guard, node)
    }

    #[inline]
    pub const fn anchor(node: NodeId) -> Self {
        Input::new(InputType::Anchor, node)
    }

    #[inline]
    pub const fn memory(node: NodeId) -> Self {
        Input::new(InputType::Memory, node)
    }

    #[inline]
    pub const fn association(node: NodeId) -> Self {
        Input::new(InputType::Association, node)
    }
}

/// Inline-small input edge list. Most nodes have at most four inputs.
pub type InputList = SmallVec<[Input; 4]>;

/// Inline-small successor list. Splits have two, chains have one.
pub type SuccessorList = SmallVec<[NodeId; 2]>;

// =============================================================================
// Constants and Scalar Ops
// =============================================================================

/// A compile-time constant value.
///
/// Floats are stored as raw bits so the type stays `Eq + Hash` for value
/// numbering.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConstValue {
    Int(i64),
    Float(u64),
    Bool(bool),
    Null,
}

impl ConstValue {
    /// Create a float constant from its numeric value.
    pub fn float(value: f64) -> Self {
        ConstValue::Float(value.to_bits())
    }

    /// The float value, if this is a float constant.
    pub fn as_float(&self) -> Option<f64> {
        match self {
            ConstValue::Float(bits) => Some(f64::from_bits(*bits)),
            _ => None,
        }
    }

    /// The integer value, if this is an integer constant.
    pub fn as_int(&self) -> Option<i64> {
        match self {
            ConstValue::Int(v) => Some(*v),
            _ => None,
        }
    }

    /// The boolean value, if this is a boolean constant.
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            ConstValue::Bool(v) => Some(*v),
            _ => None,
        }
    }

    /// The natural stamp of this constant.
    pub fn stamp(&self) -> Stamp {
        match self {
            ConstValue::Int(v) => Stamp::int_constant(*v),
            ConstValue::Float(_) => Stamp::FLOAT,
            ConstValue::Bool(_) => Stamp::Boolean,
            ConstValue::Null => Stamp::OBJECT,
        }
    }
}

/// Integer arithmetic operation kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum ArithOp {
    /// a + b
    Add = 0,
    /// a - b
    Sub = 1,
    /// a * b
    Mul = 2,
    /// -a
    Neg = 16,
}

impl ArithOp {
    /// Decode from the wire representation.
    pub const fn from_u8(raw: u8) -> Option<Self> {
        match raw {
            0 => Some(ArithOp::Add),
            1 => Some(ArithOp::Sub),
            2 => Some(ArithOp::Mul),
            16 => Some(ArithOp::Neg),
            _ => None,
        }
    }

    /// Whether operand order is irrelevant.
    #[inline]
    pub const fn is_commutative(self) -> bool {
        matches!(self, ArithOp::Add | ArithOp::Mul)
    }

    /// Whether this is a unary operation.
    #[inline]
    pub const fn is_unary(self) -> bool {
        (self as u8) >= 16
    }

    /// The right-operand identity element, if any (`x op e == x`).
    pub const fn identity(self) -> Option<i64> {
        match self {
            ArithOp::Add | ArithOp::Sub => Some(0),
            ArithOp::Mul => Some(1),
            ArithOp::Neg => None,
        }
    }

    /// The absorbing element, if any (`x op a == a`).
    pub const fn absorbing(self) -> Option<i64> {
        match self {
            ArithOp::Mul => Some(0),
            _ => None,
        }
    }

    /// Constant-fold with wrapping semantics.
    pub const fn fold(self, lhs: i64, rhs: i64) -> i64 {
        match self {
            ArithOp::Add => lhs.wrapping_add(rhs),
            ArithOp::Sub => lhs.wrapping_sub(rhs),
            ArithOp::Mul => lhs.wrapping_mul(rhs),
            ArithOp::Neg => lhs.wrapping_neg(),
        }
    }
}

/// Integer comparison kind, producing a condition value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum CmpOp {
    /// a == b
    Eq = 0,
    /// a != b
    Ne = 1,
    /// a < b
    Lt = 2,
    /// a <= b
    Le = 3,
}

impl CmpOp {
    /// Decode from the wire representation.
    pub const fn from_u8(raw: u8) -> Option<Self> {
        match raw {
            0 => Some(CmpOp::Eq),
            1 => Some(CmpOp::Ne),
            2 => Some(CmpOp::Lt),
            3 => Some(CmpOp::Le),
            _ => None,
        }
    }

    /// The logically negated comparison.
    #[inline]
    pub const fn negate(self) -> Self {
        match self {
            CmpOp::Eq => CmpOp::Ne,
            CmpOp::Ne => CmpOp::Eq,
            CmpOp::Lt => CmpOp::Le, // negation of a < b is b <= a (swapped)
            CmpOp::Le => CmpOp::Lt,
        }
    }

    /// Whether operand order is irrelevant.
    #[inline]
    pub const fn is_commutative(self) -> bool {
        matches!(self, CmpOp::Eq | CmpOp::Ne)
    }

    /// Evaluate on constants.
    pub const fn fold(self, lhs: i64, rhs: i64) -> bool {
        match self {
            CmpOp::Eq => lhs == rhs,
            CmpOp::Ne => lhs != rhs,
            CmpOp::Lt => lhs < rhs,
            CmpOp::Le => lhs <= rhs,
        }
    }
}

/// Which kind of loop-carried entity a proxy re-materializes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProxyKind {
    Value,
    Guard,
    Memory(LocationIdentity),
}

// =============================================================================
// Node Operations
// =============================================================================

/// The operation a node performs, with the per-category payload.
///
/// Edges never live in the payload: node ids referenced by an operation are
/// always stored in the input/successor lists so the generic edge protocol
/// (usage maintenance, replacement, encoding) sees every reference.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum NodeOp {
    // ---- floating value nodes --------------------------------------------
    /// Incoming argument `index`.
    Parameter(u16),
    /// Compile-time constant.
    Constant(ConstValue),
    /// Integer arithmetic. Inputs: `[Value, Value]` (`[Value]` if unary).
    IntOp(ArithOp),
    /// Integer comparison. Inputs: `[Value, Value]`. Produces a condition.
    IntCmp(CmpOp),
    /// Logic negation. Inputs: `[Condition]`. Produces a condition.
    Not,
    /// SSA merge of per-predecessor values.
    /// Inputs: `[Association(merge), Value × predecessor]`.
    Phi,
    /// Loop-carried value re-exposed at a loop exit.
    /// Inputs: `[Value, Association(exit)]`.
    ValueProxy,
    /// Loop-carried guard dependency re-exposed at a loop exit.
    /// Inputs: `[Guard, Association(exit)]`.
    GuardProxy,
    /// Loop-carried memory token re-exposed at a loop exit.
    /// Inputs: `[Memory, Association(exit)]`.
    MemoryProxy(LocationIdentity),
    /// Floating guard. Inputs: `[Condition, Guard(anchor)]`.
    Guard(GuardData),
    /// Interpreter-visible state snapshot.
    /// Inputs: `[Value × (locals+stack), State(outer)?]`.
    FrameState(FrameStateData),

    // ---- fixed control nodes ---------------------------------------------
    /// The unique graph entry.
    Start,
    /// Basic-block entry; anchor/attachment point.
    Begin,
    /// Begin that invalidates one memory location class.
    KillingBegin(LocationIdentity),
    /// Begin that invalidates several memory location classes.
    MultiKillingBegin(KillSet),
    /// Begin on a distinct loop exit edge.
    /// Inputs: `[Association(loop begin)]`.
    LoopExit,
    /// Forward predecessor terminator feeding a merge.
    End,
    /// Back-edge terminator. Inputs: `[Association(loop begin)]`.
    LoopEnd(LoopEndData),
    /// Control merge. Inputs: `[Association(End) × predecessor]`.
    Merge,
    /// Loop header: a merge with forward ends as inputs and loop ends
    /// attached through their association edges.
    LoopBegin(LoopBeginData),
    /// Two-way control split. Inputs: `[Condition]`.
    /// Successors: `[true begin, false begin]`.
    If(IfData),
    /// Call without exception edge. Inputs: `[Value × args, State(after)]`.
    Invoke(InvokeData),
    /// Call with exception edge. Successors: `[next, exception begin]`.
    InvokeWithException(InvokeData),
    /// Return to the caller. Inputs: `[Value]` or none.
    Return,
    /// Unconditional transfer to the interpreter. Inputs: `[State]` once
    /// frame states are assigned.
    Deoptimize(DeoptDescriptor),
}

/// Structural category of an operation, driving the control-skeleton
/// invariants.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeCategory {
    /// Schedulable value node; no successors, no predecessor.
    Floating,
    /// Fixed node with exactly one successor.
    FixedWithNext,
    /// Fixed node with two or more successors, each a begin.
    ControlSplit,
    /// Fixed node terminating a control path; no successors.
    ControlSink,
}

impl NodeOp {
    /// Short mnemonic for listings and logs.
    pub fn name(&self) -> &'static str {
        match self {
            NodeOp::Parameter(_) => "Parameter",
            NodeOp::Constant(_) => "Constant",
            NodeOp::IntOp(ArithOp::Add) => "IntAdd",
            NodeOp::IntOp(ArithOp::Sub) => "IntSub",
            NodeOp::IntOp(ArithOp::Mul) => "IntMul",
            NodeOp::IntOp(ArithOp::Neg) => "IntNeg",
            NodeOp::IntCmp(_) => "IntCmp",
            NodeOp::Not => "Not",
            NodeOp::Phi => "Phi",
            NodeOp::ValueProxy => "ValueProxy",
            NodeOp::GuardProxy => "GuardProxy",
            NodeOp::MemoryProxy(_) => "MemoryProxy",
            NodeOp::Guard(_) => "Guard",
            NodeOp::FrameState(_) => "FrameState",
            NodeOp::Start => "Start",
            NodeOp::Begin => "Begin",
            NodeOp::KillingBegin(_) => "KillingBegin",
            NodeOp::MultiKillingBegin(_) => "MultiKillingBegin",
            NodeOp::LoopExit => "LoopExit",
            NodeOp::End => "End",
            NodeOp::LoopEnd(_) => "LoopEnd",
            NodeOp::Merge => "Merge",
            NodeOp::LoopBegin(_) => "LoopBegin",
            NodeOp::If(_) => "If",
            NodeOp::Invoke(_) => "Invoke",
            NodeOp::InvokeWithException(_) => "InvokeWithException",
            NodeOp::Return => "Return",
            NodeOp::Deoptimize(_) => "Deoptimize",
        }
    }

    /// The structural category.
    pub fn category(&self) -> NodeCategory {
        match self {
            NodeOp::Parameter(_)
            | NodeOp::Constant(_)
            | NodeOp::IntOp(_)
            | NodeOp::IntCmp(_)
            | NodeOp::Not
            | NodeOp::Phi
            | NodeOp::ValueProxy
            | NodeOp::GuardProxy
            | NodeOp::MemoryProxy(_)
            | NodeOp::Guard(_)
            | NodeOp::FrameState(_) => NodeCategory::Floating,

            NodeOp::Start
            | NodeOp::Begin
            | NodeOp::KillingBegin(_)
            | NodeOp::MultiKillingBegin(_)
            | NodeOp::LoopExit
            | NodeOp::Merge
            | NodeOp::LoopBegin(_)
            | NodeOp::Invoke(_) => NodeCategory::FixedWithNext,

            NodeOp::If(_) | NodeOp::InvokeWithException(_) => NodeCategory::ControlSplit,

            NodeOp::End | NodeOp::LoopEnd(_) | NodeOp::Return | NodeOp::Deoptimize(_) => {
                NodeCategory::ControlSink
            }
        }
    }

    /// Whether this node is part of the fixed control skeleton.
    #[inline]
    pub fn is_fixed(&self) -> bool {
        !matches!(self.category(), NodeCategory::Floating)
    }

    /// Whether this node is a begin: an attachment point for guards and
    /// anchored values. Merges and loop headers are begins too.
    pub fn is_begin(&self) -> bool {
        matches!(
            self,
            NodeOp::Start
                | NodeOp::Begin
                | NodeOp::KillingBegin(_)
                | NodeOp::MultiKillingBegin(_)
                | NodeOp::LoopExit
                | NodeOp::Merge
                | NodeOp::LoopBegin(_)
        )
    }

    /// Whether this node merges several forward control predecessors.
    #[inline]
    pub fn is_merge(&self) -> bool {
        matches!(self, NodeOp::Merge | NodeOp::LoopBegin(_))
    }

    /// Whether this node is a control split (2+ successors).
    #[inline]
    pub fn is_control_split(&self) -> bool {
        matches!(self.category(), NodeCategory::ControlSplit)
    }

    /// Whether this node is a proxy at a loop exit.
    #[inline]
    pub fn is_proxy(&self) -> bool {
        matches!(
            self,
            NodeOp::ValueProxy | NodeOp::GuardProxy | NodeOp::MemoryProxy(_)
        )
    }

    /// Whether this node's execution has an externally visible effect.
    ///
    /// Such nodes are state-splits: they must own a frame state once the
    /// graph reaches the state-assignment stage, and optimizations may not
    /// duplicate or reorder across them.
    pub fn has_side_effect(&self) -> bool {
        matches!(self, NodeOp::Invoke(_) | NodeOp::InvokeWithException(_))
    }

    /// Whether verification demands a `State` input once the graph stage
    /// reaches frame-state assignment.
    pub fn needs_frame_state(&self) -> bool {
        self.has_side_effect() || matches!(self, NodeOp::Deoptimize(_))
    }

    /// Whether structurally identical instances are interchangeable, making
    /// the node eligible for value-numbering deduplication.
    pub fn is_value_numberable(&self) -> bool {
        matches!(
            self,
            NodeOp::Constant(_)
                | NodeOp::Parameter(_)
                | NodeOp::IntOp(_)
                | NodeOp::IntCmp(_)
                | NodeOp::Not
        )
    }

    /// Whether this node is a graph-level leaf: valid at every program
    /// point, so loop exits never need to proxy it.
    pub fn is_leaf(&self) -> bool {
        matches!(self, NodeOp::Constant(_) | NodeOp::Parameter(_))
    }

    /// The usage types consumers may attach to this node with.
    pub fn allowed_usage_types(&self) -> &'static [InputType] {
        use InputType::*;
        match self {
            NodeOp::Parameter(_) | NodeOp::Constant(_) => &[Value, Condition],
            NodeOp::IntOp(_) | NodeOp::Phi | NodeOp::ValueProxy => &[Value],
            NodeOp::IntCmp(_) | NodeOp::Not => &[Condition],
            NodeOp::Guard(_) | NodeOp::GuardProxy => &[Guard, Anchor],
            NodeOp::MemoryProxy(_) => &[Memory],
            NodeOp::FrameState(_) => &[State],

            NodeOp::Start => &[Guard, Anchor, Memory],
            NodeOp::Begin => &[Guard, Anchor],
            NodeOp::KillingBegin(_) | NodeOp::MultiKillingBegin(_) => &[Guard, Anchor, Memory],
            NodeOp::LoopExit => &[Guard, Anchor, Association],
            NodeOp::Merge => &[Guard, Anchor, Association],
            NodeOp::LoopBegin(_) => &[Guard, Anchor, Association],
            NodeOp::End => &[Association],
            NodeOp::LoopEnd(_) => &[],

            // Invoke results are ordinary values; the exception variant
            // additionally kills all memory.
            NodeOp::Invoke(_) => &[Value, Memory],
            NodeOp::InvokeWithException(_) => &[Value, Memory],

            NodeOp::If(_) | NodeOp::Return | NodeOp::Deoptimize(_) => &[],
        }
    }

    /// The number of successor slots this operation owns.
    pub fn successor_count(&self) -> usize {
        match self.category() {
            NodeCategory::Floating | NodeCategory::ControlSink => 0,
            NodeCategory::FixedWithNext => 1,
            NodeCategory::ControlSplit => 2,
        }
    }
}

// =============================================================================
// Node
// =============================================================================

bitflags::bitflags! {
    /// Cross-cutting node state.
    #[derive(Clone, Copy, Debug, PartialEq, Eq)]
    pub struct NodeFlags: u8 {
        /// The node has been removed from the graph; its slot is a tombstone.
        const DELETED = 0b0000_0001;
        /// Scratch bit for traversals.
        const VISITED = 0b0000_0010;
        /// The scheduler may not move this node.
        const PINNED = 0b0000_0100;
    }
}

impl Default for NodeFlags {
    fn default() -> Self {
        NodeFlags::empty()
    }
}

/// A node in the graph.
///
/// Edge lists are crate-private: all mutation goes through the graph's edge
/// protocol so the dual adjacency never desynchronizes.
#[derive(Debug, Clone)]
pub struct Node {
    /// The operation, with per-category payload.
    pub op: NodeOp,
    /// Typed input edges.
    pub(crate) inputs: InputList,
    /// Ordered control successors (fixed nodes only).
    pub(crate) successors: SuccessorList,
    /// Abstract description of the produced value.
    pub(crate) stamp: Stamp,
    /// Cross-cutting state bits.
    pub flags: NodeFlags,
    /// Bytecode position, for deoptimization metadata and listings.
    pub bci: u32,
}

/// Bytecode index used when no position is known.
pub const UNKNOWN_BCI: u32 = u32::MAX;

impl Node {
    /// Create a detached node. Only the graph calls this; nodes become
    /// alive when added to a graph.
    pub(crate) fn new(op: NodeOp, stamp: Stamp) -> Self {
        Node {
            op,
            inputs: InputList::new(),
            successors: SuccessorList::new(),
            stamp,
            flags: NodeFlags::empty(),
            bci: UNKNOWN_BCI,
        }
    }

    /// The node's stamp.
    #[inline]
    pub fn stamp(&self) -> &Stamp {
        &self.stamp
    }

    /// The typed input edges.
    #[inline]
    pub fn inputs(&self) -> &[Input] {
        &self.inputs
    }

    /// The input edge at `index`, if present.
    #[inline]
    pub fn input(&self, index: usize) -> Option<Input> {
        self.inputs.get(index).copied()
    }

    /// The first input with the given edge type.
    pub fn find_input(&self, ty: InputType) -> Option<NodeId> {
        self.inputs
            .iter()
            .find(|input| input.ty == ty)
            .map(|input| input.node)
    }

    /// All inputs with the given edge type.
    pub fn inputs_of_type(&self, ty: InputType) -> impl Iterator<Item = NodeId> + '_ {
        self.inputs
            .iter()
            .filter(move |input| input.ty == ty)
            .map(|input| input.node)
    }

    /// The ordered control successors.
    #[inline]
    pub fn successors(&self) -> &[NodeId] {
        &self.successors
    }

    /// The successor at `index`, if present and valid.
    pub fn successor(&self, index: usize) -> Option<NodeId> {
        self.successors.get(index).copied().filter(|id| id.is_valid())
    }

    /// The unique next node of a fixed-with-next node.
    #[inline]
    pub fn next(&self) -> Option<NodeId> {
        match self.op.category() {
            NodeCategory::FixedWithNext => self.successor(0),
            _ => None,
        }
    }

    /// Whether the node has been deleted from its graph.
    #[inline]
    pub fn is_deleted(&self) -> bool {
        self.flags.contains(NodeFlags::DELETED)
    }

    /// The constant payload, if this is a constant node.
    pub fn as_constant(&self) -> Option<ConstValue> {
        match self.op {
            NodeOp::Constant(value) => Some(value),
            _ => None,
        }
    }
}

impl std::fmt::Display for Node {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.op.name())?;
        match &self.op {
            NodeOp::Constant(ConstValue::Int(v)) => write!(f, "({})", v)?,
            NodeOp::Constant(ConstValue::Bool(v)) => write!(f, "({})", v)?,
            NodeOp::Constant(ConstValue::Null) => write!(f, "(null)")?,
            NodeOp::Constant(ConstValue::Float(bits)) => {
                write!(f, "({})", f64::from_bits(*bits))?
            }
            NodeOp::Parameter(index) => write!(f, "({})", index)?,
            _ => {}
        }
        Ok(())
    }
}

// =============================================================================
// Tests
// =============================================================================
