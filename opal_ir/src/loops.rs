//! Loop structure: loop begins, loop ends, loop exits, and proxies.
//!
//! A loop is a [`NodeOp::LoopBegin`] — a merge whose forward ends enter the
//! loop and whose back edges arrive as [`NodeOp::LoopEnd`] sinks referencing
//! it — plus one [`NodeOp::LoopExit`] per distinct exit edge.
//!
//! Loop ends get monotonically increasing indices (phi operands for the
//! back edges are ordered by them) and inherit the loop's safepoint policy
//! at construction: a long-running loop must poll for collection at its
//! back edges unless the loop begin explicitly forbids it, and an end
//! claiming to safepoint inside a non-safepointing loop fails verification.
//!
//! Any value, guard, or memory kill defined inside the loop and live after
//! it must pass through a proxy attached to the exit it leaves through.
//! Proxies separate "the value inside the loop" from "the value after the
//! loop" until phi construction at downstream merges takes over. There is
//! exactly one proxy per `(value, exit)` pair; graph-level leaves
//! (constants, parameters) are valid everywhere and are never proxied.

use smallvec::SmallVec;

use crate::graph::Graph;
use crate::node::{Input, InputType, NodeId, NodeOp, ProxyKind};
use crate::stamp::Stamp;

// =============================================================================
// Loop Payloads
// =============================================================================

/// Payload of a loop begin.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct LoopBeginData {
    /// Whether this loop's back edges may poll for safepoints.
    pub can_ends_safepoint: bool,
    /// Next index to hand to a new loop end.
    pub next_end_index: u32,
}

impl LoopBeginData {
    pub fn new() -> Self {
        LoopBeginData {
            can_ends_safepoint: true,
            next_end_index: 0,
        }
    }
}

impl Default for LoopBeginData {
    fn default() -> Self {
        Self::new()
    }
}

/// Payload of a loop end (back edge).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct LoopEndData {
    /// Position among this loop's back edges; assigned monotonically.
    pub end_index: u32,
    /// Whether this back edge polls for safepoints.
    pub can_safepoint: bool,
}

// =============================================================================
// Loop Construction
// =============================================================================

impl Graph {
    /// Create a loop begin joining the given forward entry ends.
    pub fn add_loop_begin(&mut self, forward_ends: &[NodeId]) -> NodeId {
        debug_assert!(!forward_ends.is_empty());
        let inputs: Vec<Input> = forward_ends.iter().map(|&e| Input::association(e)).collect();
        self.add(NodeOp::LoopBegin(LoopBeginData::new()), Stamp::Void, &inputs)
    }

    /// Terminate a chain with a back edge to `loop_begin`.
    ///
    /// The end's index is assigned monotonically, and its safepoint flag is
    /// inherited from the loop begin's current policy.
    pub fn append_loop_end(&mut self, pred: NodeId, loop_begin: NodeId) -> NodeId {
        let data = match &mut self.node_mut(loop_begin).op {
            NodeOp::LoopBegin(data) => {
                let end = LoopEndData {
                    end_index: data.next_end_index,
                    can_safepoint: data.can_ends_safepoint,
                };
                data.next_end_index += 1;
                end
            }
            op => unreachable!("loop end attached to {}", op.name()),
        };
        let end = self.add(
            NodeOp::LoopEnd(data),
            Stamp::Void,
            &[Input::association(loop_begin)],
        );
        self.set_successor(pred, 0, end);
        end
    }

    /// Append a loop exit for `loop_begin` after `pred` (which sits inside
    /// the loop).
    pub fn append_loop_exit(&mut self, pred: NodeId, loop_begin: NodeId) -> NodeId {
        debug_assert!(matches!(self.node(loop_begin).op, NodeOp::LoopBegin(_)));
        let old_next = self.node(pred).next();
        if old_next.is_some() {
            self.clear_successor(pred, 0);
        }
        let exit = self.add(
            NodeOp::LoopExit,
            Stamp::Void,
            &[Input::association(loop_begin)],
        );
        self.set_successor(pred, 0, exit);
        if let Some(next) = old_next {
            self.set_successor(exit, 0, next);
        }
        exit
    }

    /// This loop's back edges, ordered by end index.
    pub fn loop_ends(&self, loop_begin: NodeId) -> Vec<NodeId> {
        let mut ends: Vec<(u32, NodeId)> = self
            .usages(loop_begin)
            .iter()
            .filter_map(|&user| match &self.node(user).op {
                NodeOp::LoopEnd(data) => Some((data.end_index, user)),
                _ => None,
            })
            .collect();
        ends.sort_by_key(|(index, _)| *index);
        ends.into_iter().map(|(_, end)| end).collect()
    }

    /// This loop's exits, in usage order.
    pub fn loop_exits(&self, loop_begin: NodeId) -> Vec<NodeId> {
        self.usages(loop_begin)
            .iter()
            .copied()
            .filter(|&user| matches!(self.node(user).op, NodeOp::LoopExit))
            .collect()
    }

    /// Forbid safepoints on this loop's back edges, clearing the flag on
    /// every existing end. New ends inherit the disabled policy.
    pub fn disable_loop_safepoints(&mut self, loop_begin: NodeId) {
        match &mut self.node_mut(loop_begin).op {
            NodeOp::LoopBegin(data) => data.can_ends_safepoint = false,
            op => unreachable!("disabling safepoints on {}", op.name()),
        }
        for end in self.loop_ends(loop_begin) {
            if let NodeOp::LoopEnd(data) = &mut self.node_mut(end).op {
                data.can_safepoint = false;
            }
        }
    }

    /// Overwrite a loop end's safepoint flag. Setting it to `true` under a
    /// loop that forbids end safepoints is a structural violation caught by
    /// verification.
    pub fn set_loop_end_safepoint(&mut self, end: NodeId, can_safepoint: bool) {
        match &mut self.node_mut(end).op {
            NodeOp::LoopEnd(data) => data.can_safepoint = can_safepoint,
            op => unreachable!("setting safepoint flag on {}", op.name()),
        }
    }
}

// =============================================================================
// Proxies
// =============================================================================

impl Graph {
    /// The unique proxy re-exposing `value` at `exit`, creating it on first
    /// request. Graph-level leaves need no proxy and are returned as-is.
    pub fn proxy_for(&mut self, value: NodeId, exit: NodeId, kind: ProxyKind) -> NodeId {
        debug_assert!(matches!(self.node(exit).op, NodeOp::LoopExit));
        if self.node(value).op.is_leaf() {
            return value;
        }
        if let Some(existing) = self.find_proxy(value, exit, kind) {
            return existing;
        }

        let (op, carrier, stamp) = match kind {
            ProxyKind::Value => (
                NodeOp::ValueProxy,
                Input::value(value),
                self.node(value).stamp,
            ),
            ProxyKind::Guard => (NodeOp::GuardProxy, Input::guard(value), Stamp::Void),
            ProxyKind::Memory(location) => (
                NodeOp::MemoryProxy(location),
                Input::memory(value),
                Stamp::Memory,
            ),
        };
        self.add(op, stamp, &[carrier, Input::association(exit)])
    }

    /// The existing proxy for `(value, exit)` of the given kind, if any.
    pub fn find_proxy(&self, value: NodeId, exit: NodeId, kind: ProxyKind) -> Option<NodeId> {
        self.usages(exit).iter().copied().find(|&user| {
            let node = self.node(user);
            let matches_kind = match (&node.op, kind) {
                (NodeOp::ValueProxy, ProxyKind::Value) => true,
                (NodeOp::GuardProxy, ProxyKind::Guard) => true,
                (NodeOp::MemoryProxy(loc), ProxyKind::Memory(want)) => *loc == want,
                _ => false,
            };
            matches_kind
                && node.input(0).map(|i| i.node) == Some(value)
                && node.find_input(InputType::Association) == Some(exit)
        })
    }

    /// All proxies attached to `exit`.
    pub fn proxies_of_exit(&self, exit: NodeId) -> Vec<NodeId> {
        self.usages(exit)
            .iter()
            .copied()
            .filter(|&user| {
                self.node(user).op.is_proxy()
                    && self.node(user).find_input(InputType::Association) == Some(exit)
            })
            .collect()
    }

    /// Remove a loop exit, dismantling its proxies first and then replacing
    /// the exit with a plain begin.
    ///
    /// Proxy removal runs to a fixed point: replacing a guard proxy exposes
    /// its guard value, which may be the exit itself, creating fresh exit
    /// usages that a single pass would miss.
    pub fn remove_exit(&mut self, exit: NodeId) {
        debug_assert!(matches!(self.node(exit).op, NodeOp::LoopExit));

        loop {
            let proxies = self.proxies_of_exit(exit);
            if proxies.is_empty() {
                break;
            }
            for proxy in proxies {
                let value = self.node(proxy).input(0).expect("proxy without value").node;
                self.replace_at_usages(proxy, value, None);
                self.kill(proxy);
                self.stats.proxies_removed += 1;
            }
        }

        let pred = self.pred(exit).expect("loop exit without predecessor");
        let slot = self
            .successor_index_of(pred, exit)
            .expect("predecessor link out of sync");
        let next = self.node(exit).next();

        if next.is_some() {
            self.clear_successor(exit, 0);
        }
        self.clear_successor(pred, slot);

        let begin = self.add(NodeOp::Begin, Stamp::Void, &[]);
        self.set_successor(pred, slot, begin);
        if let Some(next) = next {
            self.set_successor(begin, 0, next);
        }

        // Whatever still hangs off the exit (guards re-exposed by removed
        // guard proxies, anchored values) moves to the replacement begin.
        self.replace_at_usages(exit, begin, Some(InputType::Guard));
        self.replace_at_usages(exit, begin, Some(InputType::Anchor));
        self.kill(exit);

        log::debug!("removed loop exit {:?}, replaced by begin {:?}", exit, begin);
        self.maybe_verify();
    }
}

// =============================================================================
// Loop Phis
// =============================================================================

impl Graph {
    /// A phi at a loop begin: `forward` values for the entry ends, then
    /// back-edge values in loop-end index order.
    pub fn loop_phi(&mut self, loop_begin: NodeId, forward: &[NodeId], back: &[NodeId]) -> NodeId {
        debug_assert!(matches!(self.node(loop_begin).op, NodeOp::LoopBegin(_)));
        let mut values: SmallVec<[NodeId; 4]> = SmallVec::from_slice(forward);
        values.extend_from_slice(back);
        self.phi(loop_begin, &values)
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    /// A loop with one back edge and one exit:
    /// `start -> entry -> end -> loop_begin -> body -> if`, where the true
    /// side loops back and the false side exits.
    fn simple_loop(g: &mut Graph) -> (NodeId, NodeId, NodeId) {
        let entry = g.append_begin(g.start);
        let fwd = g.append_end(entry);
        let loop_begin = g.add_loop_begin(&[fwd]);
        let body = g.append_begin(loop_begin);
        let cond = g.const_bool(true);
        let (_if_node, stay, leave) =
            g.append_if(body, cond, crate::control::ProfileData::UNKNOWN);
        let _loop_end = g.append_loop_end(stay, loop_begin);
        let exit = g.append_loop_exit(leave, loop_begin);
        let tail = g.append_begin(exit);
        g.append_return(tail, None);
        (loop_begin, body, exit)
    }

    #[test]
    fn test_loop_ends_get_monotonic_indices() {
        let mut g = Graph::new();
        let entry = g.append_begin(g.start);
        let fwd = g.append_end(entry);
        let loop_begin = g.add_loop_begin(&[fwd]);
        let b1 = g.append_begin(loop_begin);
        let e1 = g.append_loop_end(b1, loop_begin);
        let b2 = g.add(NodeOp::Begin, Stamp::Void, &[]);
        let e2 = g.append_loop_end(b2, loop_begin);

        match (&g.node(e1).op, &g.node(e2).op) {
            (NodeOp::LoopEnd(d1), NodeOp::LoopEnd(d2)) => {
                assert_eq!(d1.end_index, 0);
                assert_eq!(d2.end_index, 1);
            }
            _ => unreachable!(),
        }
        assert_eq!(g.loop_ends(loop_begin), vec![e1, e2]);
    }

    #[test]
    fn test_new_ends_inherit_disabled_safepoints() {
        let mut g = Graph::new();
        let entry = g.append_begin(g.start);
        let fwd = g.append_end(entry);
        let loop_begin = g.add_loop_begin(&[fwd]);
        g.disable_loop_safepoints(loop_begin);

        let b1 = g.append_begin(loop_begin);
        let end = g.append_loop_end(b1, loop_begin);
        match &g.node(end).op {
            NodeOp::LoopEnd(data) => assert!(!data.can_safepoint),
            _ => unreachable!(),
        }
    }

    #[test]
    fn test_asserting_safepoint_under_disabled_loop_fails_verification() {
        let mut g = Graph::new();
        let (loop_begin, _body, _exit) = simple_loop(&mut g);
        g.disable_loop_safepoints(loop_begin);
        assert!(g.verify().is_ok());

        let end = g.loop_ends(loop_begin)[0];
        g.set_loop_end_safepoint(end, true);
        assert!(g.verify().is_err());
    }

    #[test]
    fn test_proxy_is_unique_per_value_exit_pair() {
        let mut g = Graph::new();
        let (loop_begin, _body, exit) = simple_loop(&mut g);
        let inner = {
            let x = g.parameter(0, Stamp::INT);
            g.loop_phi(loop_begin, &[x], &[x])
        };

        let p1 = g.proxy_for(inner, exit, ProxyKind::Value);
        let p2 = g.proxy_for(inner, exit, ProxyKind::Value);
        assert_eq!(p1, p2);
        assert_eq!(g.proxies_of_exit(exit).len(), 1);
        assert!(g.verify().is_ok());
    }

    #[test]
    fn test_leaves_are_never_proxied() {
        let mut g = Graph::new();
        let (_loop_begin, _body, exit) = simple_loop(&mut g);
        let constant = g.const_int(7);
        assert_eq!(g.proxy_for(constant, exit, ProxyKind::Value), constant);
        assert!(g.proxies_of_exit(exit).is_empty());
    }

    #[test]
    fn test_remove_exit_replaces_proxies_with_their_values() {
        let mut g = Graph::new();
        let (loop_begin, _body, exit) = simple_loop(&mut g);
        let x = g.parameter(0, Stamp::INT);
        let phi = g.loop_phi(loop_begin, &[x], &[x]);
        let proxy = g.proxy_for(phi, exit, ProxyKind::Value);
        let user = g.int_add(proxy, x);

        g.remove_exit(exit);

        assert!(!g.is_alive(exit));
        assert!(!g.is_alive(proxy));
        assert_eq!(g.node(user).inputs()[0].node, phi);
        assert!(g.verify().is_ok());
    }

    #[test]
    fn test_remove_exit_rescans_for_guards_exposed_by_guard_proxies() {
        let mut g = Graph::new();
        let (_loop_begin, _body, exit) = simple_loop(&mut g);

        // A guard proxy whose guard value is the exit itself: removing the
        // proxy re-exposes the exit and requires the second scan.
        let cond = g.const_bool(true);
        let inner_guard = g.add_guard(
            cond,
            exit,
            crate::guard::GuardData::new(
                false,
                crate::deopt::DeoptDescriptor::new(
                    crate::deopt::DeoptReason::NullCheck,
                    crate::deopt::DeoptAction::None,
                ),
            ),
        );
        let proxy = g.proxy_for(inner_guard, exit, ProxyKind::Guard);
        // Another guard hangs off the proxy from outside the loop.
        let outer_cond = g.const_bool(false);
        let outer = g.add_guard(
            outer_cond,
            proxy,
            crate::guard::GuardData::new(
                false,
                crate::deopt::DeoptDescriptor::new(
                    crate::deopt::DeoptReason::NullCheck,
                    crate::deopt::DeoptAction::None,
                ),
            ),
        );

        g.remove_exit(exit);

        assert!(!g.is_alive(proxy));
        // The outer guard now hangs off the inner guard directly, and the
        // inner guard's anchor was moved off the dead exit.
        assert_eq!(g.node(outer).find_input(InputType::Guard), Some(inner_guard));
        let inner_anchor = g.node(inner_guard).find_input(InputType::Guard).unwrap();
        assert!(g.is_alive(inner_anchor));
        assert!(g.verify().is_ok());
    }
}
