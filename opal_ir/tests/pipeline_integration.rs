//! End-to-end pipeline tests: build, canonicalize, assign states, lower
//! guards, encode, decode.
//!
//! Coverage:
//! - Memory-kill ordering queries across the fixed skeleton
//! - Redundant kill-begin elimination through the simplification driver
//! - Full guard lifecycle: float, canonicalize, lower, verify
//! - Encode/decode round-trip law (verification equivalence)
//! - Speculation log caching law under concurrent contention

use std::thread;

use opal_ir::speculation::{GraphSpeculationLog, SharedSpeculationLog, SpeculationReason};
use opal_ir::*;

fn descriptor() -> DeoptDescriptor {
    DeoptDescriptor::new(DeoptReason::NullCheck, DeoptAction::InvalidateRecompile)
}

// =============================================================================
// Memory Ordering
// =============================================================================

#[test]
fn test_kills_constrain_reordering_across_the_skeleton() {
    let mut g = Graph::new();
    let field = LocationIdentity::Named(4);
    let other = LocationIdentity::Named(5);

    let entry = g.append_begin(g.start);
    let kill_field = g.append_killing_begin(entry, field);
    let tail = g.append_begin(kill_field);
    g.append_return(tail, None);

    // A read of `other` may cross the kill of `field`; a read of `field`
    // may not.
    assert!(g.no_kill_between(entry, tail, &other));
    assert!(!g.no_kill_between(entry, tail, &field));
    // ANY aliases everything, so it is blocked by any kill in between.
    assert!(!g.no_kill_between(entry, tail, &LocationIdentity::ANY));
}

#[test]
fn test_redundant_kills_merge_and_rewire_memory_usages() {
    // A loop whose body kills the same location twice; the loop-exit
    // memory proxy hangs off the second kill.
    let mut g = Graph::new();
    let field = LocationIdentity::Named(4);

    let entry = g.append_begin(g.start);
    let fwd = g.append_end(entry);
    let loop_begin = g.add_loop_begin(&[fwd]);
    let body = g.append_begin(loop_begin);
    let first = g.append_killing_begin(body, field);
    let second = g.append_killing_begin(first, field);
    let cond = g.parameter(0, Stamp::Boolean);
    let (_if_node, stay, leave) = g.append_if(second, cond, ProfileData::UNKNOWN);
    let _back = g.append_loop_end(stay, loop_begin);
    let exit = g.append_loop_exit(leave, loop_begin);
    let tail = g.append_begin(exit);
    g.append_return(tail, None);

    let dependent = g.proxy_for(second, exit, ProxyKind::Memory(field));
    assert!(g.verify().is_ok());

    let rewrites = Canonicalizer::new().run(&mut g, &DefaultCanonicalizerTool);
    assert!(rewrites >= 1);

    assert!(!g.is_alive(second));
    assert!(g.is_alive(first));
    // The memory-typed usage re-wired to the earlier, surviving kill.
    assert_eq!(g.node(dependent).find_input(InputType::Memory), Some(first));
    assert!(g.verify().is_ok());
}

// =============================================================================
// Guard Lifecycle
// =============================================================================

#[test]
fn test_guard_lifecycle_to_lowered_branch() {
    let mut g = Graph::new();
    let entry = g.append_begin(g.start);
    let x = g.parameter(0, Stamp::INT);
    // An opaque condition the comparison folder cannot absorb, so the
    // negation has to land in the guard's flag.
    let cond = g.parameter(1, Stamp::Condition);
    let negated_cond = g.not(cond);
    let guard = g.add_guard(negated_cond, entry, GuardData::new(true, descriptor()));
    g.append_return(entry, Some(x));

    // Canonicalization pushes the negation into the guard flag.
    Canonicalizer::new().run(&mut g, &DefaultCanonicalizerTool);
    let (guard, data) = g
        .live_nodes()
        .find_map(|(id, node)| match &node.op {
            NodeOp::Guard(data) => Some((id, *data)),
            _ => None,
        })
        .expect("guard survives canonicalization");
    assert_eq!(g.node(guard).find_input(InputType::Condition), Some(cond));
    assert!(!data.negated, "one negation flips the negated flag once");

    // Assign states, then lower.
    let state = g.add_frame_state(FrameStateData::new(8, 0, 1, 0), &[x], None);
    g.advance_stage(GraphStage::FrameStatesAssigned);
    let lowered = g.lower_guard_to_if(guard, Some(state));
    g.advance_stage(GraphStage::GuardsLowered);

    assert!(g.verify().is_ok());
    assert_eq!(g.state_input(lowered.deopt), Some(state));
    // The continue path leads to the original return.
    let next = g.node(lowered.continue_begin).next().unwrap();
    assert!(matches!(g.node(next).op, NodeOp::Return));
}

// =============================================================================
// Encode / Decode
// =============================================================================

fn build_rich_graph() -> Graph {
    let mut g = Graph::new();
    let entry = g.append_begin(g.start);
    let x = g.parameter(0, Stamp::INT);
    let limit = g.const_int(10);

    // Loop: phi counts up, exits when phi == limit.
    let fwd = g.append_end(entry);
    let loop_begin = g.add_loop_begin(&[fwd]);
    let body = g.append_begin(loop_begin);
    let one = g.const_int(1);
    let phi = g.loop_phi(loop_begin, &[x], &[x]);
    let cond = g.int_cmp(CmpOp::Ne, phi, limit);
    let (_if_node, stay, leave) = g.append_if(
        body,
        cond,
        ProfileData::new(BranchProbability::from_f64(0.9), ProfileSource::Profiled),
    );
    let bump = g.int_add(phi, one);
    let back = g.append_loop_end(stay, loop_begin);
    // Replace the placeholder back-edge value with the incremented one.
    let back_index = g.node(phi).inputs().len() - 1;
    g.replace_input(phi, back_index, bump);
    let _ = back;

    let exit = g.append_loop_exit(leave, loop_begin);
    let escaped = g.proxy_for(phi, exit, ProxyKind::Value);
    let tail = g.append_begin(exit);

    // A guarded call after the loop.
    let zero = g.const_int(0);
    let nonzero = g.int_cmp(CmpOp::Ne, escaped, zero);
    let _guard = g.add_guard(nonzero, tail, GuardData::new(false, descriptor()));
    let invoke = g.append_invoke(
        tail,
        CallTarget::new(33, InvokeKind::Static),
        &[escaped],
        Stamp::INT,
    );
    let state = g.add_frame_state(FrameStateData::new(33, 5, 1, 1), &[x, escaped], None);
    g.set_state_input(invoke, state);
    g.append_return(invoke, Some(invoke));
    g
}

#[test]
fn test_encode_decode_is_verification_equivalent() {
    let g = build_rich_graph();
    assert!(g.verify().is_ok());

    let mut pool = ObjectPool::new();
    let encoded = encode(&g, &mut pool);
    let decoded = decode(&encoded, &pool).expect("decode succeeds");

    // Round-trip law: same live shape, all invariants hold.
    assert!(decoded.verify().is_ok());
    assert_eq!(decoded.live_count(), g.live_count());

    // Node-kind census matches exactly.
    let census = |graph: &Graph| {
        let mut names: Vec<&'static str> =
            graph.live_nodes().map(|(_, node)| node.op.name()).collect();
        names.sort_unstable();
        names
    };
    assert_eq!(census(&g), census(&decoded));

    // Encoding the decoded graph reproduces the same stream.
    let mut pool2 = ObjectPool::new();
    let re_encoded = encode(&decoded, &mut pool2);
    assert_eq!(encoded, re_encoded);
}

#[test]
fn test_decoded_graph_canonicalizes_like_the_original() {
    let mut original = build_rich_graph();
    let mut pool = ObjectPool::new();
    let encoded = encode(&original, &mut pool);
    let mut decoded = decode(&encoded, &pool).expect("decode succeeds");

    let canonicalizer = Canonicalizer::new();
    let a = canonicalizer.run(&mut original, &DefaultCanonicalizerTool);
    let b = canonicalizer.run(&mut decoded, &DefaultCanonicalizerTool);
    assert_eq!(a, b);
    assert_eq!(original.live_count(), decoded.live_count());
    assert!(original.verify().is_ok());
    assert!(decoded.verify().is_ok());
}

// =============================================================================
// Speculation
// =============================================================================

#[test]
fn test_speculation_promise_survives_concurrent_failures() {
    let shared = SharedSpeculationLog::new();

    let hammer: Vec<_> = (0..8)
        .map(|t| {
            let shared = shared.clone();
            thread::spawn(move || {
                for i in 0..500u32 {
                    shared.record_failure(&SpeculationReason::new(
                        DeoptReason::TypeGuard,
                        7,
                        (t * 31 + i) % 128,
                    ));
                }
            })
        })
        .collect();

    let mut log = GraphSpeculationLog::new(shared.clone());
    let mut granted = Vec::new();
    for bci in 0..128u32 {
        let reason = SpeculationReason::new(DeoptReason::TypeGuard, 7, bci);
        if log.may_speculate(&reason) {
            granted.push(reason);
        }
    }
    // The caching law: every positive answer stays redeemable, no matter
    // what the writers did meanwhile.
    for reason in &granted {
        assert!(log.speculate(reason).is_some());
        assert!(log.may_speculate(reason));
    }

    for handle in hammer {
        handle.join().unwrap();
    }
}

#[test]
fn test_speculative_guard_carries_its_token() {
    let shared = SharedSpeculationLog::new();
    let mut log = GraphSpeculationLog::new(shared);
    let reason = SpeculationReason::new(DeoptReason::TypeGuard, 11, 2);

    let mut g = Graph::new();
    let entry = g.append_begin(g.start);
    g.append_return(entry, None);
    let cond = g.parameter(0, Stamp::Boolean);

    assert!(log.may_speculate(&reason));
    let token = log.speculate(&reason).unwrap();
    let guard = g.add_guard(
        cond,
        entry,
        GuardData::new(
            false,
            DeoptDescriptor::with_speculation(
                DeoptReason::TypeGuard,
                DeoptAction::InvalidateReprofile,
                token,
            ),
        ),
    );
    match &g.node(guard).op {
        NodeOp::Guard(data) => assert_eq!(data.deopt.speculation, token),
        _ => unreachable!(),
    }
    assert!(g.verify().is_ok());
}
