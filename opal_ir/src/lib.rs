//! Sea-of-Nodes intermediate representation for the Opal JIT compiler.
//!
//! This crate is the graph substrate every optimization phase operates on:
//!
//! - **Nodes and edges** (`node`, `graph`): arena-allocated nodes with
//!   typed input edges, incrementally maintained reverse usages, and a
//!   single edge-mutation protocol.
//! - **Control skeleton** (`control`, `loops`): begins, merges, splits
//!   with trusted branch probabilities, loop begin/end/exit structure, and
//!   loop-exit proxies.
//! - **Speculation** (`guard`, `deopt`, `state`, `speculation`): floating
//!   guards with deoptimization descriptors, frame states for resuming the
//!   interpreter, and the race-tolerant speculation log.
//! - **Memory ordering** (`memory`): location-identity-keyed kill
//!   declarations on control nodes.
//! - **Rewriting** (`canon`, `verify`): the convergent local
//!   canonicalization/simplification contract and the structural
//!   verification that every transformation must preserve.
//! - **Persistence** (`encode`): the byte-oriented encoded graph format
//!   used for caching and cross-unit inlining.
//!
//! Graphs are single-owner and single-threaded; independent compilations
//! share nothing except the speculation log.
#![deny(unsafe_op_in_unsafe_fn)]

pub mod arena;
pub mod canon;
pub mod control;
pub mod deopt;
pub mod encode;
pub mod graph;
pub mod guard;
pub mod invoke;
pub mod loops;
pub mod memory;
pub mod node;
pub mod print;
pub mod speculation;
pub mod stamp;
pub mod state;
pub mod stats;
pub mod verify;

// Re-export the working set most callers need.
pub use arena::{Arena, Id, IdSet, SecondaryMap};
pub use canon::{Canonical, Canonicalizer, CanonicalizerTool, DefaultCanonicalizerTool};
pub use control::{BranchProbability, IfData, ProfileData, ProfileSource, EXCEPTION_PROBABILITY};
pub use deopt::{DeoptAction, DeoptDescriptor, DeoptReason, SpeculationToken};
pub use encode::{decode, decode_into, encode, DecodeError, EncodedGraph, ObjectPool};
pub use graph::{Graph, GraphConfig, GraphStage, LirGenerator};
pub use guard::{GuardData, LoweredGuard};
pub use invoke::{CallTarget, InvokeData, InvokeKind};
pub use loops::{LoopBeginData, LoopEndData};
pub use memory::{Kills, KillSet, LocationIdentity};
pub use node::{
    ArithOp, CmpOp, ConstValue, Input, InputType, MethodRef, Node, NodeCategory, NodeFlags,
    NodeId, NodeOp, ProxyKind, TypeRef,
};
pub use stamp::{IntStamp, ObjectStamp, Stamp};
pub use state::FrameStateData;
pub use stats::GraphStats;
pub use verify::VerifyError;
