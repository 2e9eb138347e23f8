//! The canonicalization / simplification protocol.
//!
//! [`canonical`] is the pure half of the contract: given a node, its
//! inputs' stamps and constant-ness, and read-only access to the global
//! analysis facilities behind [`CanonicalizerTool`], it reports a local
//! rewrite — keep, replace with an existing node, build a replacement, or
//! delete — and has no side effects of its own. The driver applies results
//! transactionally, which makes the function safe to invoke on nodes whose
//! inputs have not stabilized yet.
//!
//! [`simplify`] is the mutating half for structural rewrites that cannot be
//! expressed as "replace one node": collapsing degenerate merges, merging
//! redundant kill begins, folding constant-condition branches, and
//! converting always-firing guards into unconditional deopts.
//!
//! [`Canonicalizer`] is the worklist fixed-point driver. Rewrites must
//! converge; the driver's budget is a backstop that turns a divergent
//! rewrite into a loud compiler bug instead of a hang.

use std::collections::VecDeque;

use crate::arena::IdSet;
use crate::graph::Graph;
use crate::node::{
    ArithOp, ConstValue, Input, InputList, InputType, Node, NodeId, NodeOp, TypeRef,
};
use crate::stamp::Stamp;

// =============================================================================
// Tool
// =============================================================================

/// Read-only access to global analysis facilities during canonicalization.
///
/// The real implementations (type hierarchy, assumption log) live outside
/// this crate; rewrites must treat every query as fallible.
pub trait CanonicalizerTool {
    /// Whether speculative rewrites may be applied at all.
    fn allow_speculation(&self) -> bool {
        true
    }

    /// Whether `a` is a subtype of `b`; `None` when the hierarchy cannot
    /// answer.
    fn is_subtype(&self, a: TypeRef, b: TypeRef) -> Option<bool> {
        let _ = (a, b);
        None
    }
}

/// Tool with no external facilities attached.
#[derive(Debug, Default, Clone, Copy)]
pub struct DefaultCanonicalizerTool;

impl CanonicalizerTool for DefaultCanonicalizerTool {}

// =============================================================================
// Canonical Result
// =============================================================================

/// Blueprint for a replacement node the driver will materialize (and
/// value-number) on application.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeTemplate {
    pub op: NodeOp,
    pub stamp: Stamp,
    pub inputs: InputList,
}

impl NodeTemplate {
    pub fn constant(value: ConstValue) -> Self {
        NodeTemplate {
            stamp: value.stamp(),
            op: NodeOp::Constant(value),
            inputs: InputList::new(),
        }
    }
}

/// Result of the pure canonicalization function.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Canonical {
    /// No local rewrite applies.
    Unchanged,
    /// Replace with an existing node.
    Replace(NodeId),
    /// Replace with a node built from this template.
    Create(NodeTemplate),
    /// The node is unnecessary; delete it. Guards vanishing this way have
    /// their dependents re-anchored to the guard's anchor by the driver.
    Delete,
}

// =============================================================================
// Pure Canonicalization
// =============================================================================

/// Compute the canonical local rewrite for `id`. Pure: mutates nothing.
pub fn canonical(graph: &Graph, id: NodeId, tool: &dyn CanonicalizerTool) -> Canonical {
    let node = graph.node(id);
    match &node.op {
        NodeOp::IntOp(op) => canonical_int_op(graph, node, *op),
        NodeOp::IntCmp(op) => canonical_int_cmp(graph, node, *op),
        NodeOp::Not => canonical_not(graph, node),
        NodeOp::Phi => canonical_phi(graph, id, node),
        NodeOp::ValueProxy | NodeOp::GuardProxy | NodeOp::MemoryProxy(_) => {
            canonical_proxy(graph, node)
        }
        NodeOp::Guard(_) => canonical_guard(graph, node, tool),
        _ => Canonical::Unchanged,
    }
}

fn const_int_input(graph: &Graph, node: &Node, index: usize) -> Option<i64> {
    node.input(index)
        .and_then(|input| graph.node(input.node).as_constant())
        .and_then(|c| c.as_int())
}

fn canonical_int_op(graph: &Graph, node: &Node, op: ArithOp) -> Canonical {
    if op.is_unary() {
        if let Some(value) = const_int_input(graph, node, 0) {
            return Canonical::Create(NodeTemplate::constant(ConstValue::Int(op.fold(value, 0))));
        }
        return Canonical::Unchanged;
    }

    let lhs = node.input(0).expect("binary op without lhs").node;
    let rhs = node.input(1).expect("binary op without rhs").node;
    let lhs_const = const_int_input(graph, node, 0);
    let rhs_const = const_int_input(graph, node, 1);

    if let (Some(a), Some(b)) = (lhs_const, rhs_const) {
        return Canonical::Create(NodeTemplate::constant(ConstValue::Int(op.fold(a, b))));
    }
    if let Some(b) = rhs_const {
        if op.identity() == Some(b) {
            return Canonical::Replace(lhs);
        }
        if op.absorbing() == Some(b) {
            return Canonical::Create(NodeTemplate::constant(ConstValue::Int(b)));
        }
    }
    if let Some(a) = lhs_const {
        if op.is_commutative() {
            if op.identity() == Some(a) {
                return Canonical::Replace(rhs);
            }
            if op.absorbing() == Some(a) {
                return Canonical::Create(NodeTemplate::constant(ConstValue::Int(a)));
            }
        }
    }
    if matches!(op, ArithOp::Sub) && lhs == rhs {
        return Canonical::Create(NodeTemplate::constant(ConstValue::Int(0)));
    }
    Canonical::Unchanged
}

fn canonical_int_cmp(graph: &Graph, node: &Node, op: crate::node::CmpOp) -> Canonical {
    let lhs = node.input(0).expect("cmp without lhs").node;
    let rhs = node.input(1).expect("cmp without rhs").node;

    if let (Some(a), Some(b)) = (
        const_int_input(graph, node, 0),
        const_int_input(graph, node, 1),
    ) {
        return Canonical::Create(NodeTemplate::constant(ConstValue::Bool(op.fold(a, b))));
    }
    if lhs == rhs {
        // x ? x is decidable for every comparison kind we carry.
        let result = op.fold(0, 0);
        return Canonical::Create(NodeTemplate::constant(ConstValue::Bool(result)));
    }
    // Stamp-based decision: disjoint ranges decide Eq/Ne without constants.
    if let (Stamp::Int(a), Stamp::Int(b)) = (graph.node(lhs).stamp(), graph.node(rhs).stamp()) {
        if a.max < b.min || b.max < a.min {
            match op {
                crate::node::CmpOp::Eq => {
                    return Canonical::Create(NodeTemplate::constant(ConstValue::Bool(false)))
                }
                crate::node::CmpOp::Ne => {
                    return Canonical::Create(NodeTemplate::constant(ConstValue::Bool(true)))
                }
                _ => {}
            }
        }
    }
    Canonical::Unchanged
}

fn canonical_not(graph: &Graph, node: &Node) -> Canonical {
    let operand = node.input(0).expect("negation without operand").node;
    match &graph.node(operand).op {
        // Double negation.
        NodeOp::Not => {
            let inner = graph
                .node(operand)
                .input(0)
                .expect("negation without operand")
                .node;
            Canonical::Replace(inner)
        }
        NodeOp::Constant(ConstValue::Bool(b)) => {
            Canonical::Create(NodeTemplate::constant(ConstValue::Bool(!b)))
        }
        // Push the negation into the comparison.
        NodeOp::IntCmp(op) => {
            let cmp = graph.node(operand);
            let lhs = cmp.input(0).expect("cmp without lhs").node;
            let rhs = cmp.input(1).expect("cmp without rhs").node;
            // not(a < b) is b <= a: negating Lt/Le swaps operands.
            let (new_lhs, new_rhs) = match op {
                crate::node::CmpOp::Lt | crate::node::CmpOp::Le => (rhs, lhs),
                _ => (lhs, rhs),
            };
            Canonical::Create(NodeTemplate {
                op: NodeOp::IntCmp(op.negate()),
                stamp: Stamp::Condition,
                inputs: InputList::from_slice(&[Input::value(new_lhs), Input::value(new_rhs)]),
            })
        }
        _ => Canonical::Unchanged,
    }
}

fn canonical_phi(_graph: &Graph, id: NodeId, node: &Node) -> Canonical {
    // A phi whose operands are all the same value (or itself, through a
    // back edge) is that value.
    let mut unique: Option<NodeId> = None;
    for value in node.inputs_of_type(InputType::Value) {
        if value == id {
            continue;
        }
        match unique {
            None => unique = Some(value),
            Some(seen) if seen == value => {}
            Some(_) => return Canonical::Unchanged,
        }
    }
    match unique {
        Some(value) => Canonical::Replace(value),
        None => Canonical::Unchanged,
    }
}

fn canonical_proxy(graph: &Graph, node: &Node) -> Canonical {
    let value = node.input(0).expect("proxy without value").node;
    // Leaves are valid at every program point; the proxy adds nothing.
    if graph.node(value).op.is_leaf() {
        return Canonical::Replace(value);
    }
    Canonical::Unchanged
}

fn canonical_guard(graph: &Graph, node: &Node, _tool: &dyn CanonicalizerTool) -> Canonical {
    let condition = node
        .find_input(InputType::Condition)
        .expect("guard without condition");
    let anchor = node
        .find_input(InputType::Guard)
        .expect("guard without anchor");
    let data = match &node.op {
        NodeOp::Guard(data) => *data,
        _ => unreachable!(),
    };

    match &graph.node(condition).op {
        // Push logical negation down into the guard's flag.
        NodeOp::Not => {
            let inner = graph
                .node(condition)
                .input(0)
                .expect("negation without operand")
                .node;
            Canonical::Create(NodeTemplate {
                op: NodeOp::Guard(data.negate()),
                stamp: Stamp::Void,
                inputs: InputList::from_slice(&[
                    Input::condition(inner),
                    Input::guard(anchor),
                ]),
            })
        }
        NodeOp::Constant(ConstValue::Bool(b)) => {
            if data.fires(*b) {
                // Always fires: structural rewrite, handled by simplify.
                Canonical::Unchanged
            } else {
                // Never fires: the guard vanishes.
                Canonical::Delete
            }
        }
        _ => Canonical::Unchanged,
    }
}

// =============================================================================
// Structural Simplification
// =============================================================================

/// Apply the structural simplification for `id`, if one matches. Returns
/// whether the graph changed.
pub fn simplify(graph: &mut Graph, id: NodeId) -> bool {
    if !graph.is_alive(id) {
        return false;
    }
    match graph.node(id).op.clone() {
        NodeOp::Merge => simplify_merge(graph, id),
        NodeOp::KillingBegin(_) | NodeOp::MultiKillingBegin(_) => {
            graph.try_remove_kill_begin(id)
        }
        NodeOp::If(_) => simplify_if(graph, id),
        NodeOp::Guard(data) => simplify_always_firing_guard(graph, id, data),
        _ => false,
    }
}

/// A merge with a single forward end is a straight line: phis become their
/// only operand, attachments move to the dominating begin, and the merge
/// and end vanish from the chain.
fn simplify_merge(graph: &mut Graph, merge: NodeId) -> bool {
    let ends: Vec<NodeId> = graph
        .node(merge)
        .inputs_of_type(InputType::Association)
        .collect();
    if ends.len() != 1 {
        return false;
    }
    let end = ends[0];
    let end_pred = match graph.pred(end) {
        Some(pred) => pred,
        None => return false,
    };

    let phis: Vec<NodeId> = graph
        .usages(merge)
        .iter()
        .copied()
        .filter(|&u| matches!(graph.node(u).op, NodeOp::Phi))
        .collect();
    for phi in phis {
        let value = graph
            .node(phi)
            .inputs_of_type(InputType::Value)
            .next()
            .expect("phi without operands");
        graph.replace_and_delete(phi, value);
    }

    let survivor = graph.prev_begin(end);
    graph.replace_at_usages(merge, survivor, Some(InputType::Guard));
    graph.replace_at_usages(merge, survivor, Some(InputType::Anchor));

    graph.remove_input(merge, 0);
    let next = graph.node(merge).next();
    if next.is_some() {
        graph.clear_successor(merge, 0);
    }
    let slot = graph
        .successor_index_of(end_pred, end)
        .expect("predecessor link out of sync");
    graph.clear_successor(end_pred, slot);
    graph.kill(end);
    graph.kill(merge);
    if let Some(next) = next {
        graph.set_successor(end_pred, slot, next);
    }

    graph.stats.simplified += 1;
    log::trace!("collapsed single-end merge {:?}", merge);
    true
}

/// A branch on a constant condition keeps only the taken side.
fn simplify_if(graph: &mut Graph, if_node: NodeId) -> bool {
    let condition = match graph.node(if_node).find_input(InputType::Condition) {
        Some(c) => c,
        None => return false,
    };
    let value = match graph.node(condition).as_constant().and_then(|c| c.as_bool()) {
        Some(b) => b,
        None => return false,
    };

    let taken = graph
        .node(if_node)
        .successor(if value { 0 } else { 1 })
        .expect("split with unwired successor");
    let dead = graph
        .node(if_node)
        .successor(if value { 1 } else { 0 })
        .expect("split with unwired successor");

    let pred = graph.pred(if_node).expect("split without predecessor");
    let slot = graph
        .successor_index_of(pred, if_node)
        .expect("predecessor link out of sync");

    graph.clear_successor(if_node, 0);
    graph.clear_successor(if_node, 1);
    graph.clear_successor(pred, slot);
    graph.kill_control_subtree(dead);
    graph.kill(if_node);
    graph.set_successor(pred, slot, taken);

    graph.stats.simplified += 1;
    log::debug!("folded constant branch {:?}, kept {:?}", if_node, taken);
    true
}

/// A guard that provably always fires turns the continuation after its
/// anchor into an unconditional deoptimization.
fn simplify_always_firing_guard(
    graph: &mut Graph,
    guard: NodeId,
    data: crate::guard::GuardData,
) -> bool {
    let condition = match graph.node(guard).find_input(InputType::Condition) {
        Some(c) => c,
        None => return false,
    };
    let fires = match graph.node(condition).as_constant().and_then(|c| c.as_bool()) {
        Some(b) => data.fires(b),
        None => return false,
    };
    if !fires {
        return false;
    }
    let anchor = graph
        .node(guard)
        .find_input(InputType::Guard)
        .expect("guard without anchor");
    if !graph.node(anchor).op.is_begin() {
        return false;
    }

    // Execution never passes the guard: everything after its anchor is
    // unreachable and the anchor now ends in an unconditional deopt.
    if let Some(next) = graph.node(anchor).next() {
        graph.clear_successor(anchor, 0);
        graph.kill_control_subtree(next);
    }
    graph.replace_at_usages(guard, anchor, Some(InputType::Guard));
    graph.replace_at_usages(guard, anchor, Some(InputType::Anchor));
    graph.kill(guard);
    graph.append_deoptimize(anchor, data.deopt);

    graph.stats.guards_folded += 1;
    log::debug!("guard {:?} always fires; deoptimizing at {:?}", guard, anchor);
    true
}

// =============================================================================
// Fixed-Point Driver
// =============================================================================

/// Worklist driver applying [`canonical`] and [`simplify`] to a fixed
/// point.
#[derive(Debug, Clone)]
pub struct Canonicalizer {
    /// Rewrite budget per live node; exceeding the total budget means a
    /// rewrite cycle and is a fatal compiler bug.
    budget_per_node: usize,
}

impl Default for Canonicalizer {
    fn default() -> Self {
        Canonicalizer {
            budget_per_node: 16,
        }
    }
}

impl Canonicalizer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Run to a fixed point over the whole graph. Returns the number of
    /// applied rewrites.
    pub fn run(&self, graph: &mut Graph, tool: &dyn CanonicalizerTool) -> usize {
        let mut worklist: VecDeque<NodeId> = graph.live_ids().collect();
        let mut queued: IdSet<Node> = IdSet::new();
        for &id in &worklist {
            queued.insert(id);
        }

        let mut budget = graph.live_count().saturating_mul(self.budget_per_node) + 64;
        let mut applied = 0;

        while let Some(id) = worklist.pop_front() {
            queued.remove(id);
            if !graph.is_alive(id) {
                continue;
            }
            if budget == 0 {
                panic!("canonicalization did not converge (rewrite cycle)");
            }
            budget -= 1;

            if self.apply_one(graph, id, tool, &mut worklist, &mut queued) {
                applied += 1;
            }
        }

        if applied > 0 {
            log::debug!("canonicalizer applied {} rewrites", applied);
        }
        applied
    }

    /// Canonicalize and simplify a single node, enqueueing its neighborhood
    /// on change.
    fn apply_one(
        &self,
        graph: &mut Graph,
        id: NodeId,
        tool: &dyn CanonicalizerTool,
        worklist: &mut VecDeque<NodeId>,
        queued: &mut IdSet<Node>,
    ) -> bool {
        let neighborhood = |graph: &Graph, id: NodeId| -> Vec<NodeId> {
            let mut around: Vec<NodeId> = graph.usages(id).to_vec();
            around.extend(graph.node(id).inputs().iter().map(|input| input.node));
            around
        };

        match canonical(graph, id, tool) {
            Canonical::Unchanged => {
                let around = neighborhood(graph, id);
                if simplify(graph, id) {
                    self.enqueue(graph, around, worklist, queued);
                    true
                } else {
                    false
                }
            }
            Canonical::Replace(replacement) => {
                debug_assert_ne!(replacement, id);
                let around = neighborhood(graph, id);
                graph.replace_and_delete(id, replacement);
                graph.stats.canonicalized += 1;
                self.enqueue(graph, around, worklist, queued);
                self.enqueue(graph, vec![replacement], worklist, queued);
                true
            }
            Canonical::Create(template) => {
                let around = neighborhood(graph, id);
                let replacement =
                    graph.add_unique(template.op, template.stamp, &template.inputs);
                if replacement == id {
                    return false;
                }
                graph.replace_and_delete(id, replacement);
                graph.stats.canonicalized += 1;
                self.enqueue(graph, around, worklist, queued);
                self.enqueue(graph, vec![replacement], worklist, queued);
                true
            }
            Canonical::Delete => {
                let around = neighborhood(graph, id);
                if let NodeOp::Guard(_) = graph.node(id).op {
                    // A vanishing guard leaves its dependents anchored at
                    // its own anchor.
                    let anchor = graph
                        .node(id)
                        .find_input(InputType::Guard)
                        .expect("guard without anchor");
                    graph.replace_at_usages(id, anchor, Some(InputType::Guard));
                    graph.replace_at_usages(id, anchor, Some(InputType::Anchor));
                } else if graph.has_usages(id) {
                    // Deleting a used node would dangle its consumers.
                    return false;
                }
                graph.kill(id);
                graph.stats.canonicalized += 1;
                self.enqueue(graph, around, worklist, queued);
                true
            }
        }
    }

    fn enqueue(
        &self,
        graph: &Graph,
        ids: Vec<NodeId>,
        worklist: &mut VecDeque<NodeId>,
        queued: &mut IdSet<Node>,
    ) {
        for id in ids {
            if graph.is_alive(id) && queued.insert(id) {
                worklist.push_back(id);
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
    use crate::control::ProfileData;
    use crate::deopt::{DeoptAction, DeoptDescriptor, DeoptReason};
    use crate::guard::GuardData;
    use crate::node::CmpOp;

    fn run(graph: &mut Graph) -> usize {
        Canonicalizer::new().run(graph, &DefaultCanonicalizerTool)
    }

    #[test]
    fn test_constants_fold_through_arithmetic() {
        let mut g = Graph::new();
        let a = g.const_int(6);
        let b = g.const_int(7);
        let product = g.int_op(ArithOp::Mul, a, b);
        let entry = g.append_begin(g.start);
        g.append_return(entry, Some(product));

        run(&mut g);

        let ret = g.node(g.node(entry).next().unwrap()).clone();
        let result = ret.inputs()[0].node;
        assert_eq!(g.node(result).as_constant(), Some(ConstValue::Int(42)));
        assert!(g.verify().is_ok());
    }

    #[test]
    fn test_identity_and_absorbing_elements_apply() {
        let mut g = Graph::new();
        let x = g.parameter(0, Stamp::INT);
        let zero = g.const_int(0);
        let one = g.const_int(1);

        let add = g.int_add(x, zero);
        assert_eq!(canonical(&g, add, &DefaultCanonicalizerTool), Canonical::Replace(x));

        let mul_one = g.int_op(ArithOp::Mul, x, one);
        assert_eq!(
            canonical(&g, mul_one, &DefaultCanonicalizerTool),
            Canonical::Replace(x)
        );

        let mul_zero = g.int_op(ArithOp::Mul, x, zero);
        assert!(matches!(
            canonical(&g, mul_zero, &DefaultCanonicalizerTool),
            Canonical::Create(_)
        ));
    }

    #[test]
    fn test_double_negation_cancels() {
        let mut g = Graph::new();
        let x = g.parameter(0, Stamp::INT);
        let y = g.parameter(1, Stamp::INT);
        let cmp = g.int_cmp(CmpOp::Lt, x, y);
        let once = g.not(cmp);
        let twice = g.not(once);
        assert_eq!(
            canonical(&g, twice, &DefaultCanonicalizerTool),
            Canonical::Replace(cmp)
        );
    }

    #[test]
    fn test_guard_on_negated_condition_flips_flag() {
        let mut g = Graph::new();
        let entry = g.append_begin(g.start);
        let x = g.parameter(0, Stamp::INT);
        let zero = g.const_int(0);
        let cmp = g.int_cmp(CmpOp::Eq, x, zero);
        let negated = g.not(cmp);
        let guard = g.add_guard(
            negated,
            entry,
            GuardData::new(false, DeoptDescriptor::new(DeoptReason::NullCheck, DeoptAction::None)),
        );

        match canonical(&g, guard, &DefaultCanonicalizerTool) {
            Canonical::Create(template) => {
                match template.op {
                    NodeOp::Guard(data) => assert!(data.negated),
                    _ => panic!("expected a guard template"),
                }
                assert_eq!(template.inputs[0], Input::condition(cmp));
            }
            other => panic!("expected Create, got {:?}", other),
        }
    }

    #[test]
    fn test_never_firing_guard_vanishes_and_reanchors() {
        let mut g = Graph::new();
        let entry = g.append_begin(g.start);
        g.append_return(entry, None);
        let always_true = g.const_bool(true);
        let guard = g.add_guard(
            always_true,
            entry,
            GuardData::new(false, DeoptDescriptor::new(DeoptReason::NullCheck, DeoptAction::None)),
        );
        let c2 = g.parameter(0, Stamp::Condition);
        let dependent = g.add_guard(
            c2,
            guard,
            GuardData::new(false, DeoptDescriptor::new(DeoptReason::BoundsCheck, DeoptAction::None)),
        );

        run(&mut g);

        assert!(!g.is_alive(guard));
        assert!(g.is_alive(dependent));
        assert_eq!(g.node(dependent).find_input(InputType::Guard), Some(entry));
        assert!(g.verify().is_ok());
    }

    #[test]
    fn test_always_firing_guard_becomes_deopt() {
        let mut g = Graph::new();
        let entry = g.append_begin(g.start);
        g.append_return(entry, None);
        let always_false = g.const_bool(false);
        let descriptor = DeoptDescriptor::new(DeoptReason::TypeGuard, DeoptAction::InvalidateReprofile);
        let guard = g.add_guard(always_false, entry, GuardData::new(false, descriptor));

        run(&mut g);

        assert!(!g.is_alive(guard));
        let next = g.node(entry).next().unwrap();
        match &g.node(next).op {
            NodeOp::Deoptimize(d) => assert_eq!(*d, descriptor),
            op => panic!("expected deoptimize after anchor, found {}", op.name()),
        }
        assert!(g.verify().is_ok());
    }

    #[test]
    fn test_constant_branches_fold_and_merges_collapse() {
        let mut g = Graph::new();
        let entry = g.append_begin(g.start);
        let cond = g.const_bool(true);
        let (_if_node, t, f) = g.append_if(entry, cond, ProfileData::UNKNOWN);
        let te = g.append_end(t);
        let fe = g.append_end(f);
        let merge = g.add_merge(&[te, fe]);
        let v1 = g.const_int(1);
        let v2 = g.const_int(2);
        let phi = g.phi(merge, &[v1, v2]);
        g.append_return(merge, Some(phi));

        run(&mut g);

        // The false side died, the merge collapsed, and the phi became the
        // taken side's value.
        assert!(!g.is_alive(f));
        assert!(!g.is_alive(merge));
        assert!(!g.is_alive(phi));
        assert!(g.verify().is_ok());

        // The return survived and now returns the constant 1.
        let mut ret = None;
        for (id, node) in g.live_nodes() {
            if matches!(node.op, NodeOp::Return) {
                ret = Some(id);
            }
        }
        let ret = ret.expect("return survived");
        assert_eq!(
            g.node(g.node(ret).inputs()[0].node).as_constant(),
            Some(ConstValue::Int(1))
        );
    }

    #[test]
    fn test_phi_of_identical_values_collapses() {
        let mut g = Graph::new();
        let entry = g.append_begin(g.start);
        let c = g.parameter(0, Stamp::Boolean);
        let (_if_node, t, f) = g.append_if(entry, c, ProfileData::UNKNOWN);
        let te = g.append_end(t);
        let fe = g.append_end(f);
        let merge = g.add_merge(&[te, fe]);
        let x = g.parameter(1, Stamp::INT);
        let phi = g.phi(merge, &[x, x]);
        g.append_return(merge, Some(phi));

        run(&mut g);

        assert!(!g.is_alive(phi));
        assert!(g.verify().is_ok());
    }

    #[test]
    fn test_canonicalization_converges_on_chained_rewrites() {
        let mut g = Graph::new();
        let entry = g.append_begin(g.start);
        // ((2 + 3) * 1 - 0) == 5  --> true
        let two = g.const_int(2);
        let three = g.const_int(3);
        let one = g.const_int(1);
        let zero = g.const_int(0);
        let five = g.const_int(5);
        let sum = g.int_add(two, three);
        let product = g.int_op(ArithOp::Mul, sum, one);
        let difference = g.int_op(ArithOp::Sub, product, zero);
        let cmp = g.int_cmp(CmpOp::Eq, difference, five);
        let not_cmp = g.not(cmp);
        let not_not = g.not(not_cmp);
        g.append_return(entry, Some(not_not));

        let applied = run(&mut g);
        assert!(applied >= 4);

        let ret = g.node(entry).next().unwrap();
        let result = g.node(ret).inputs()[0].node;
        assert_eq!(g.node(result).as_constant(), Some(ConstValue::Bool(true)));
        assert!(g.verify().is_ok());
    }
}
