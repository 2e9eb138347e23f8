//! The Sea-of-Nodes graph.
//!
//! The graph owns every node and both sides of the adjacency:
//!
//! - the forward side — each node's typed input edges and ordered control
//!   successors — lives on the node itself;
//! - the reverse side — usage lists and the single-predecessor link — lives
//!   in secondary maps owned by the graph.
//!
//! Both sides are mutated **only** through the edge protocol in this module
//! (`add_input`, `remove_input`, `replace_input`, `set_successor`,
//! `replace_at_usages`, `kill`). No caller ever observes the two sides out
//! of sync.
//!
//! Side-effect-free nodes are deduplicated by value numbering when added
//! through [`Graph::add_unique`], which is how the front-end is expected to
//! build expressions.
//!
//! A graph is single-owner and single-threaded; concurrent compilations
//! each get their own graph and share nothing except the speculation log
//! (see [`crate::speculation`]).

use rustc_hash::FxHashMap;
use smallvec::SmallVec;

use crate::arena::{Arena, SecondaryMap};
use crate::node::{
    ArithOp, CmpOp, ConstValue, Input, InputList, InputType, Node, NodeCategory, NodeFlags,
    NodeId, NodeOp,
};
use crate::stamp::Stamp;
use crate::stats::GraphStats;
use crate::verify::{self, VerifyError};

// =============================================================================
// Configuration
// =============================================================================

/// Graph construction and debugging knobs.
#[derive(Debug, Clone)]
pub struct GraphConfig {
    /// Node capacity reserved up front.
    pub initial_capacity: usize,
    /// Re-verify the whole graph after each compound mutation
    /// (debug builds only). Expensive; off by default.
    pub verify_after_mutation: bool,
}

impl Default for GraphConfig {
    fn default() -> Self {
        GraphConfig {
            initial_capacity: 256,
            verify_after_mutation: false,
        }
    }
}

/// How far the graph has progressed through the compilation pipeline.
///
/// Verification requirements tighten as the stage advances: frame states
/// become mandatory on state-splits only once they have been assigned.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
#[repr(u8)]
pub enum GraphStage {
    /// Under construction / being optimized.
    Building = 0,
    /// Every state-split owns a frame state.
    FrameStatesAssigned = 1,
    /// Floating guards have been lowered to explicit control flow.
    GuardsLowered = 2,
}

// =============================================================================
// Graph
// =============================================================================

/// Usage list: one entry per consuming edge (a user appears once per edge).
pub type UsageList = SmallVec<[NodeId; 4]>;

/// The code-generation seam: control nodes are walked in skeleton order and
/// handed to the (external) generator one at a time.
pub trait LirGenerator {
    fn emit(&mut self, graph: &Graph, node: NodeId);
}

/// A mutable Sea-of-Nodes graph.
pub struct Graph {
    pub(crate) nodes: Arena<Node>,
    usages: SecondaryMap<Node, UsageList>,
    preds: SecondaryMap<Node, NodeId>,
    /// The unique graph entry.
    pub start: NodeId,
    stage: GraphStage,
    config: GraphConfig,
    /// Value-numbering table for side-effect-free nodes.
    dedup: FxHashMap<(NodeOp, InputList), NodeId>,
    /// Best-effort rewrite telemetry.
    pub stats: GraphStats,
}

impl Graph {
    /// Create a graph containing only the start node.
    pub fn new() -> Self {
        Self::with_config(GraphConfig::default())
    }

    /// Create a graph with explicit configuration.
    pub fn with_config(config: GraphConfig) -> Self {
        let mut nodes = Arena::with_capacity(config.initial_capacity);
        let start = nodes.alloc(Node::new(NodeOp::Start, Stamp::Void));
        nodes[start].successors.push(NodeId::INVALID);
        Graph {
            nodes,
            usages: SecondaryMap::new(),
            preds: SecondaryMap::new(),
            start,
            stage: GraphStage::Building,
            config,
            dedup: FxHashMap::default(),
            stats: GraphStats::default(),
        }
    }

    // =========================================================================
    // Access
    // =========================================================================

    /// Borrow a node. Panics on an unallocated id.
    #[inline]
    pub fn node(&self, id: NodeId) -> &Node {
        &self.nodes[id]
    }

    /// Mutably borrow a node. Crate-private: edge lists must only be
    /// touched through the protocol below.
    #[inline]
    pub(crate) fn node_mut(&mut self, id: NodeId) -> &mut Node {
        &mut self.nodes[id]
    }

    /// Whether `id` addresses a live (allocated, not deleted) node.
    pub fn is_alive(&self, id: NodeId) -> bool {
        self.nodes
            .get(id)
            .map(|node| !node.is_deleted())
            .unwrap_or(false)
    }

    /// Total allocated slots, tombstones included.
    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    /// Number of live nodes.
    pub fn live_count(&self) -> usize {
        self.live_ids().count()
    }

    /// Iterate over live node ids.
    pub fn live_ids(&self) -> impl Iterator<Item = NodeId> + '_ {
        self.nodes
            .iter()
            .filter(|(_, node)| !node.is_deleted())
            .map(|(id, _)| id)
    }

    /// Iterate over live `(id, node)` pairs.
    pub fn live_nodes(&self) -> impl Iterator<Item = (NodeId, &Node)> {
        self.nodes.iter().filter(|(_, node)| !node.is_deleted())
    }

    /// The consumers of `id`, one entry per consuming edge.
    pub fn usages(&self, id: NodeId) -> &[NodeId] {
        self.usages.get(id).map(|list| list.as_slice()).unwrap_or(&[])
    }

    /// Whether any consumer remains.
    pub fn has_usages(&self, id: NodeId) -> bool {
        !self.usages(id).is_empty()
    }

    /// Raw predecessor link; `INVALID` when none.
    #[inline]
    pub(crate) fn pred_raw(&self, id: NodeId) -> NodeId {
        self.preds.get(id).copied().unwrap_or(NodeId::INVALID)
    }

    /// The current pipeline stage.
    pub fn stage(&self) -> GraphStage {
        self.stage
    }

    /// Advance the pipeline stage. Stages only move forward.
    pub fn advance_stage(&mut self, stage: GraphStage) {
        debug_assert!(stage >= self.stage, "graph stage may not regress");
        self.stage = stage;
    }

    // =========================================================================
    // Node Creation
    // =========================================================================

    /// Add a node with the given operation, stamp, and typed inputs.
    ///
    /// Fixed nodes get their successor slots allocated (initially unwired).
    /// The node is alive as soon as this returns.
    pub fn add(&mut self, op: NodeOp, stamp: Stamp, inputs: &[Input]) -> NodeId {
        let successor_slots = op.successor_count();
        let mut node = Node::new(op, stamp);
        node.inputs = InputList::from_slice(inputs);
        for _ in 0..successor_slots {
            node.successors.push(NodeId::INVALID);
        }
        let id = self.nodes.alloc(node);
        for input in inputs {
            self.register_usage(*input, id);
        }
        id
    }

    /// Add a node, deduplicating structurally identical side-effect-free
    /// nodes (value numbering).
    pub fn add_unique(&mut self, op: NodeOp, stamp: Stamp, inputs: &[Input]) -> NodeId {
        if !op.is_value_numberable() {
            return self.add(op, stamp, inputs);
        }
        let key = (op.clone(), InputList::from_slice(inputs));
        if let Some(&existing) = self.dedup.get(&key) {
            if self.is_alive(existing) {
                self.stats.value_numbered += 1;
                return existing;
            }
        }
        let id = self.add(op, stamp, inputs);
        self.dedup.insert(key, id);
        id
    }

    // =========================================================================
    // Edge Protocol
    // =========================================================================

    /// Append an input edge.
    pub fn add_input(&mut self, user: NodeId, input: Input) {
        self.node_mut(user).inputs.push(input);
        self.register_usage(input, user);
    }

    /// Remove the input edge at `index`.
    pub fn remove_input(&mut self, user: NodeId, index: usize) {
        let input = self.node(user).inputs[index];
        self.node_mut(user).inputs.remove(index);
        self.unregister_usage(input.node, user);
    }

    /// Retarget the input edge at `index`, keeping its type tag.
    pub fn replace_input(&mut self, user: NodeId, index: usize, new_target: NodeId) {
        let old = self.node(user).inputs[index];
        if old.node == new_target {
            return;
        }
        self.assert_usage_allowed(new_target, old.ty);
        self.forget_dedup_entry(user);
        self.node_mut(user).inputs[index].node = new_target;
        self.unregister_usage(old.node, user);
        self.register_usage(Input::new(old.ty, new_target), user);
    }

    /// Rewrite every consumer edge of `old` to point at `new` instead.
    ///
    /// With `filter` set, only edges of that type are rewritten; the rest
    /// stay on `old`. Each rewritten edge's type must be permitted by
    /// `new`.
    pub fn replace_at_usages(&mut self, old: NodeId, new: NodeId, filter: Option<InputType>) {
        if old == new {
            return;
        }
        let users: UsageList = SmallVec::from_slice(self.usages(old));
        for user in users {
            // A user appears once per edge; rewrite one matching edge per
            // usage entry.
            let position = self.node(user).inputs.iter().position(|input| {
                input.node == old && filter.map_or(true, |ty| input.ty == ty)
            });
            if let Some(index) = position {
                self.replace_input(user, index, new);
            }
        }
    }

    /// Replace `old` with `new` at every usage and delete `old`.
    pub fn replace_and_delete(&mut self, old: NodeId, new: NodeId) {
        debug_assert_ne!(old, new);
        self.replace_at_usages(old, new, None);
        self.kill(old);
    }

    /// Wire the successor slot `index` of `node` to `succ`.
    ///
    /// Maintains the single-predecessor link: `succ` must not already have
    /// a predecessor.
    pub fn set_successor(&mut self, node: NodeId, index: usize, succ: NodeId) {
        let old = self.node(node).successors[index];
        if old == succ {
            return;
        }
        if old.is_valid() {
            self.preds.set(old, NodeId::INVALID);
        }
        if succ.is_valid() {
            debug_assert!(
                !self.pred_raw(succ).is_valid(),
                "successor {:?} already has a predecessor",
                succ
            );
            debug_assert!(
                self.node(succ).op.is_fixed(),
                "successor {:?} is not a fixed node",
                succ
            );
            self.preds.set(succ, node);
        }
        self.node_mut(node).successors[index] = succ;
    }

    /// Unwire the successor slot `index` of `node`.
    pub fn clear_successor(&mut self, node: NodeId, index: usize) {
        self.set_successor(node, index, NodeId::INVALID);
    }

    /// The slot index through which `node` reaches `succ`.
    pub fn successor_index_of(&self, node: NodeId, succ: NodeId) -> Option<usize> {
        self.node(node).successors.iter().position(|&s| s == succ)
    }

    /// Delete a node.
    ///
    /// The node's usages must already be evacuated — deleting a node that
    /// still has consumers would leave dangling edges, which is the classic
    /// structural bug this protocol exists to prevent.
    pub fn kill(&mut self, id: NodeId) {
        debug_assert!(
            !self.has_usages(id),
            "killing {:?} with live usages: {:?}",
            id,
            self.usages(id)
        );
        self.forget_dedup_entry(id);

        let inputs: InputList = self.node(id).inputs.clone();
        for input in inputs {
            self.unregister_usage(input.node, id);
        }
        self.node_mut(id).inputs.clear();

        let successors: SmallVec<[NodeId; 2]> = SmallVec::from_slice(self.node(id).successors());
        for (index, succ) in successors.iter().enumerate() {
            if succ.is_valid() {
                self.clear_successor(id, index);
            }
        }

        if self.pred_raw(id).is_valid() {
            // Unlink from the incoming successor edge as well.
            let pred = self.pred_raw(id);
            if let Some(index) = self.successor_index_of(pred, id) {
                self.node_mut(pred).successors[index] = NodeId::INVALID;
            }
            self.preds.set(id, NodeId::INVALID);
        }

        self.node_mut(id).flags.insert(NodeFlags::DELETED);
    }

    fn register_usage(&mut self, input: Input, user: NodeId) {
        debug_assert!(input.node.is_valid(), "edge to invalid node");
        self.assert_usage_allowed(input.node, input.ty);
        self.usages.entry(input.node).push(user);
    }

    fn unregister_usage(&mut self, def: NodeId, user: NodeId) {
        let list = self.usages.entry(def);
        if let Some(position) = list.iter().position(|&u| u == user) {
            list.swap_remove(position);
        }
    }

    fn assert_usage_allowed(&self, target: NodeId, ty: InputType) {
        debug_assert!(
            self.node(target).op.allowed_usage_types().contains(&ty),
            "{:?} ({}) does not permit {:?} usages",
            target,
            self.node(target).op.name(),
            ty
        );
    }

    /// Drop every input edge of `id`, releasing the reverse usages. Used
    /// when dismantling unreachable subgraphs before the member nodes are
    /// killed.
    pub(crate) fn strip_inputs(&mut self, id: NodeId) {
        let inputs: InputList = self.node(id).inputs.clone();
        self.node_mut(id).inputs.clear();
        for input in inputs {
            self.unregister_usage(input.node, id);
        }
    }

    fn forget_dedup_entry(&mut self, id: NodeId) {
        if self.node(id).op.is_value_numberable() {
            let key = (self.node(id).op.clone(), self.node(id).inputs.clone());
            if self.dedup.get(&key) == Some(&id) {
                self.dedup.remove(&key);
            }
        }
    }

    // =========================================================================
    // Stamps
    // =========================================================================

    /// Refine a node's stamp. Refinement is monotonic: the new stamp must
    /// admit no value the old one excluded. Returns whether the stamp
    /// changed.
    pub fn refine_stamp(&mut self, id: NodeId, stamp: Stamp) -> bool {
        let old = self.node(id).stamp;
        debug_assert!(
            stamp.refines(&old),
            "stamp widening on {:?}: {} -> {}",
            id,
            old,
            stamp
        );
        if stamp == old {
            return false;
        }
        self.node_mut(id).stamp = stamp;
        true
    }

    // =========================================================================
    // Value Factories
    // =========================================================================

    /// Integer constant (value-numbered).
    pub fn const_int(&mut self, value: i64) -> NodeId {
        self.add_unique(
            NodeOp::Constant(ConstValue::Int(value)),
            Stamp::int_constant(value),
            &[],
        )
    }

    /// Float constant (value-numbered).
    pub fn const_float(&mut self, value: f64) -> NodeId {
        self.add_unique(
            NodeOp::Constant(ConstValue::float(value)),
            Stamp::FLOAT,
            &[],
        )
    }

    /// Boolean constant (value-numbered).
    pub fn const_bool(&mut self, value: bool) -> NodeId {
        self.add_unique(
            NodeOp::Constant(ConstValue::Bool(value)),
            Stamp::Boolean,
            &[],
        )
    }

    /// Null constant (value-numbered).
    pub fn const_null(&mut self) -> NodeId {
        self.add_unique(NodeOp::Constant(ConstValue::Null), Stamp::OBJECT, &[])
    }

    /// Incoming argument.
    pub fn parameter(&mut self, index: u16, stamp: Stamp) -> NodeId {
        self.add_unique(NodeOp::Parameter(index), stamp, &[])
    }

    /// Binary integer arithmetic (value-numbered).
    pub fn int_op(&mut self, op: ArithOp, lhs: NodeId, rhs: NodeId) -> NodeId {
        debug_assert!(!op.is_unary());
        self.add_unique(
            NodeOp::IntOp(op),
            Stamp::INT,
            &[Input::value(lhs), Input::value(rhs)],
        )
    }

    /// Integer addition.
    pub fn int_add(&mut self, lhs: NodeId, rhs: NodeId) -> NodeId {
        self.int_op(ArithOp::Add, lhs, rhs)
    }

    /// Integer comparison, producing a condition (value-numbered).
    pub fn int_cmp(&mut self, op: CmpOp, lhs: NodeId, rhs: NodeId) -> NodeId {
        self.add_unique(
            NodeOp::IntCmp(op),
            Stamp::Condition,
            &[Input::value(lhs), Input::value(rhs)],
        )
    }

    /// Logic negation of a condition (value-numbered).
    pub fn not(&mut self, condition: NodeId) -> NodeId {
        self.add_unique(NodeOp::Not, Stamp::Condition, &[Input::condition(condition)])
    }

    /// Value phi at a merge. `values` follow the merge's predecessor order.
    pub fn phi(&mut self, merge: NodeId, values: &[NodeId]) -> NodeId {
        debug_assert!(self.node(merge).op.is_merge());
        let stamp = values
            .iter()
            .map(|&v| self.node(v).stamp)
            .reduce(|a, b| a.meet(&b))
            .unwrap_or(Stamp::Empty);
        let mut inputs: SmallVec<[Input; 8]> = SmallVec::new();
        inputs.push(Input::association(merge));
        inputs.extend(values.iter().map(|&v| Input::value(v)));
        self.add(NodeOp::Phi, stamp, &inputs)
    }

    // =========================================================================
    // Verification & Codegen Seam
    // =========================================================================

    /// Check every structural invariant. Returns the first violation.
    pub fn verify(&self) -> Result<(), VerifyError> {
        verify::verify_graph(self)
    }

    /// Re-verify after a compound mutation when configured to. Panics on a
    /// violation: a broken invariant here is a compiler bug, not an input
    /// error.
    pub(crate) fn maybe_verify(&self) {
        if cfg!(debug_assertions) && self.config.verify_after_mutation {
            if let Err(violation) = self.verify() {
                panic!("graph verification failed: {}", violation);
            }
        }
    }

    /// Walk the fixed skeleton in control order and hand each node to the
    /// generator. The generator is the opaque backend seam.
    pub fn generate(&self, generator: &mut dyn LirGenerator) {
        let mut worklist = vec![self.start];
        let mut seen = crate::arena::IdSet::new();
        seen.insert(self.start);
        while let Some(id) = worklist.pop() {
            generator.emit(self, id);
            for succ in self.node(id).successors() {
                if succ.is_valid() && seen.insert(*succ) {
                    worklist.push(*succ);
                }
            }
            // Merges are reached through end associations, not successors.
            for user in self.usages(id) {
                let user_op = &self.node(*user).op;
                if user_op.is_merge() && seen.insert(*user) {
                    worklist.push(*user);
                }
            }
        }
    }

    // =========================================================================
    // Internal Helpers for Sibling Modules
    // =========================================================================

    /// Append a fixed-with-next node after `pred` (slot 0), preserving the
    /// old next as the new node's successor.
    pub(crate) fn splice_after(&mut self, pred: NodeId, op: NodeOp, stamp: Stamp) -> NodeId {
        debug_assert_eq!(self.node(pred).op.category(), NodeCategory::FixedWithNext);
        let old_next = self.node(pred).successors[0];
        if old_next.is_valid() {
            self.clear_successor(pred, 0);
        }
        let id = self.add(op, stamp, &[]);
        self.set_successor(pred, 0, id);
        if old_next.is_valid() {
            self.set_successor(id, 0, old_next);
        }
        id
    }
}

impl Default for Graph {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for Graph {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "Graph ({} live / {} slots)", self.live_count(), self.node_count())?;
        for (id, node) in self.live_nodes() {
            writeln!(f, "  {:?}: {}", id, node)?;
        }
        Ok(())
    }
}

// =============================================================================
// Tests
// =============================================================================
