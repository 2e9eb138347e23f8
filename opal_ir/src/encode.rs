//! The encoded graph format.
//!
//! Graphs cross compilation-unit boundaries (persistence, inlining of
//! already-parsed callees) as a byte-oriented encoding:
//!
//! - a binary **instruction stream**: one record per live node, written in
//!   id order, holding the node's class index, payload, stamp, typed input
//!   edges, and successors, all referencing other nodes by *order id*
//!   (position in the stream);
//! - a side-table **object pool** for non-primitive operands — constants,
//!   method and type references, location identities;
//! - an integer-indexed **node-class table** mapping class indices to
//!   operation codes, so the stream stays compact.
//!
//! Decoding replays the records against the original (or an equivalent)
//! object pool, remapping order ids to live nodes through an injected
//! substitution function — that is how an inliner maps encoded parameters
//! onto the caller's argument nodes. The round-trip law: decoding an
//! encoded graph yields a graph that passes verification with the same
//! structural invariants; node identities need not match numerically.

use rustc_hash::FxHashMap;
use smallvec::SmallVec;

use crate::control::{BranchProbability, IfData, ProfileData, ProfileSource};
use crate::deopt::{DeoptAction, DeoptDescriptor, DeoptReason, SpeculationToken};
use crate::graph::Graph;
use crate::guard::GuardData;
use crate::invoke::{CallTarget, InvokeData, InvokeKind};
use crate::loops::{LoopBeginData, LoopEndData};
use crate::memory::{KillSet, LocationIdentity};
use crate::node::{ConstValue, InputType, NodeId, NodeOp, ArithOp, CmpOp};
use crate::stamp::{FloatStamp, IntStamp, ObjectStamp, Stamp};
use crate::state::FrameStateData;

const MAGIC: &[u8; 4] = b"OPIR";
const VERSION: u8 = 1;

// =============================================================================
// Object Pool
// =============================================================================

/// A non-primitive operand hoisted out of the instruction stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PoolEntry {
    Int(i64),
    Float(u64),
    Bool(bool),
    Null,
    Method(u32),
    Type(u32),
    LocationAny,
    LocationNamed(u32),
}

/// Deduplicating side table of pool entries.
#[derive(Debug, Default, Clone)]
pub struct ObjectPool {
    entries: Vec<PoolEntry>,
    index: FxHashMap<PoolEntry, u32>,
}

impl ObjectPool {
    pub fn new() -> Self {
        Self::default()
    }

    /// Intern an entry, returning its pool index.
    pub fn intern(&mut self, entry: PoolEntry) -> u32 {
        if let Some(&existing) = self.index.get(&entry) {
            return existing;
        }
        let index = self.entries.len() as u32;
        self.entries.push(entry);
        self.index.insert(entry, index);
        index
    }

    /// Look up an entry by pool index.
    pub fn get(&self, index: u32) -> Option<PoolEntry> {
        self.entries.get(index as usize).copied()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

// =============================================================================
// Errors
// =============================================================================

/// A malformed encoded graph.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DecodeError {
    /// The stream ended mid-record.
    Truncated,
    /// Wrong magic bytes.
    BadMagic,
    /// Unsupported format version.
    BadVersion(u8),
    /// An unknown tag or operation code.
    BadTag(u8),
    /// A pool index without a matching entry (or with the wrong entry
    /// kind).
    BadPoolIndex(u32),
    /// An order id outside the stream.
    BadNodeRef(u32),
    /// The decoded graph failed structural verification.
    Verify(String),
}

impl std::fmt::Display for DecodeError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DecodeError::Truncated => write!(f, "encoded graph is truncated"),
            DecodeError::BadMagic => write!(f, "not an encoded graph (bad magic)"),
            DecodeError::BadVersion(v) => write!(f, "unsupported format version {}", v),
            DecodeError::BadTag(t) => write!(f, "unknown tag {}", t),
            DecodeError::BadPoolIndex(i) => write!(f, "invalid object pool index {}", i),
            DecodeError::BadNodeRef(i) => write!(f, "invalid node reference {}", i),
            DecodeError::Verify(msg) => write!(f, "decoded graph fails verification: {}", msg),
        }
    }
}

// =============================================================================
// Byte Stream Helpers
// =============================================================================

struct Writer {
    bytes: Vec<u8>,
}

impl Writer {
    fn new() -> Self {
        Writer { bytes: Vec::new() }
    }

    fn u8(&mut self, value: u8) {
        self.bytes.push(value);
    }

    /// LEB128 unsigned varint.
    fn varint(&mut self, mut value: u64) {
        loop {
            let byte = (value & 0x7f) as u8;
            value >>= 7;
            if value == 0 {
                self.bytes.push(byte);
                return;
            }
            self.bytes.push(byte | 0x80);
        }
    }

    /// Zigzag-encoded signed varint.
    fn zigzag(&mut self, value: i64) {
        self.varint(((value << 1) ^ (value >> 63)) as u64);
    }
}

struct Reader<'a> {
    bytes: &'a [u8],
    position: usize,
}

impl<'a> Reader<'a> {
    fn new(bytes: &'a [u8]) -> Self {
        Reader { bytes, position: 0 }
    }

    fn u8(&mut self) -> Result<u8, DecodeError> {
        let byte = *self.bytes.get(self.position).ok_or(DecodeError::Truncated)?;
        self.position += 1;
        Ok(byte)
    }

    fn varint(&mut self) -> Result<u64, DecodeError> {
        let mut value = 0u64;
        let mut shift = 0;
        loop {
            let byte = self.u8()?;
            value |= ((byte & 0x7f) as u64) << shift;
            if byte & 0x80 == 0 {
                return Ok(value);
            }
            shift += 7;
            if shift >= 64 {
                return Err(DecodeError::BadTag(byte));
            }
        }
    }

    fn varint_u32(&mut self) -> Result<u32, DecodeError> {
        let value = self.varint()?;
        u32::try_from(value).map_err(|_| DecodeError::BadNodeRef(u32::MAX))
    }

    fn zigzag(&mut self) -> Result<i64, DecodeError> {
        let raw = self.varint()?;
        Ok(((raw >> 1) as i64) ^ -((raw & 1) as i64))
    }
}

// =============================================================================
// Operation Codes
// =============================================================================

mod opcode {
    pub const PARAMETER: u8 = 0;
    pub const CONSTANT: u8 = 1;
    pub const INT_OP: u8 = 2;
    pub const INT_CMP: u8 = 3;
    pub const NOT: u8 = 4;
    pub const PHI: u8 = 5;
    pub const VALUE_PROXY: u8 = 6;
    pub const GUARD_PROXY: u8 = 7;
    pub const MEMORY_PROXY: u8 = 8;
    pub const GUARD: u8 = 9;
    pub const FRAME_STATE: u8 = 10;
    pub const START: u8 = 11;
    pub const BEGIN: u8 = 12;
    pub const KILLING_BEGIN: u8 = 13;
    pub const MULTI_KILLING_BEGIN: u8 = 14;
    pub const LOOP_EXIT: u8 = 15;
    pub const END: u8 = 16;
    pub const LOOP_END: u8 = 17;
    pub const MERGE: u8 = 18;
    pub const LOOP_BEGIN: u8 = 19;
    pub const IF: u8 = 20;
    pub const INVOKE: u8 = 21;
    pub const INVOKE_WITH_EXCEPTION: u8 = 22;
    pub const RETURN: u8 = 23;
    pub const DEOPTIMIZE: u8 = 24;
}

fn op_code(op: &NodeOp) -> u8 {
    match op {
        NodeOp::Parameter(_) => opcode::PARAMETER,
        NodeOp::Constant(_) => opcode::CONSTANT,
        NodeOp::IntOp(_) => opcode::INT_OP,
        NodeOp::IntCmp(_) => opcode::INT_CMP,
        NodeOp::Not => opcode::NOT,
        NodeOp::Phi => opcode::PHI,
        NodeOp::ValueProxy => opcode::VALUE_PROXY,
        NodeOp::GuardProxy => opcode::GUARD_PROXY,
        NodeOp::MemoryProxy(_) => opcode::MEMORY_PROXY,
        NodeOp::Guard(_) => opcode::GUARD,
        NodeOp::FrameState(_) => opcode::FRAME_STATE,
        NodeOp::Start => opcode::START,
        NodeOp::Begin => opcode::BEGIN,
        NodeOp::KillingBegin(_) => opcode::KILLING_BEGIN,
        NodeOp::MultiKillingBegin(_) => opcode::MULTI_KILLING_BEGIN,
        NodeOp::LoopExit => opcode::LOOP_EXIT,
        NodeOp::End => opcode::END,
        NodeOp::LoopEnd(_) => opcode::LOOP_END,
        NodeOp::Merge => opcode::MERGE,
        NodeOp::LoopBegin(_) => opcode::LOOP_BEGIN,
        NodeOp::If(_) => opcode::IF,
        NodeOp::Invoke(_) => opcode::INVOKE,
        NodeOp::InvokeWithException(_) => opcode::INVOKE_WITH_EXCEPTION,
        NodeOp::Return => opcode::RETURN,
        NodeOp::Deoptimize(_) => opcode::DEOPTIMIZE,
    }
}

// =============================================================================
// Encoding
// =============================================================================

/// An encoded graph: the instruction stream. The object pool travels
/// separately (it is shared across many encoded graphs in practice).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncodedGraph {
    pub bytes: Vec<u8>,
}

/// Encode `graph`, interning non-primitive operands into `pool`.
pub fn encode(graph: &Graph, pool: &mut ObjectPool) -> EncodedGraph {
    let mut writer = Writer::new();
    writer.bytes.extend_from_slice(MAGIC);
    writer.u8(VERSION);

    // Order ids: live nodes in id order.
    let live: Vec<NodeId> = graph.live_ids().collect();
    let mut order: FxHashMap<NodeId, u32> = FxHashMap::default();
    for (position, &id) in live.iter().enumerate() {
        order.insert(id, position as u32);
    }

    // Node-class table: distinct op codes in order of first appearance.
    let mut class_table: Vec<u8> = Vec::new();
    let mut class_of: FxHashMap<u8, u32> = FxHashMap::default();
    for &id in &live {
        let code = op_code(&graph.node(id).op);
        class_of.entry(code).or_insert_with(|| {
            class_table.push(code);
            (class_table.len() - 1) as u32
        });
    }
    writer.varint(class_table.len() as u64);
    for &code in &class_table {
        writer.u8(code);
    }

    writer.varint(live.len() as u64);
    for &id in &live {
        let node = graph.node(id);
        writer.varint(class_of[&op_code(&node.op)] as u64);
        encode_payload(&mut writer, pool, &node.op);
        encode_stamp(&mut writer, pool, node.stamp());
        writer.varint(node.bci as u64);

        writer.varint(node.inputs().len() as u64);
        for input in node.inputs() {
            writer.u8(input.ty as u8);
            writer.varint(order[&input.node] as u64 + 1);
        }
        writer.varint(node.successors().len() as u64);
        for succ in node.successors() {
            if succ.is_valid() {
                writer.varint(order[succ] as u64 + 1);
            } else {
                writer.varint(0);
            }
        }
    }

    writer.varint(order[&graph.start] as u64);
    log::trace!(
        "encoded {} nodes / {} classes / {} pool entries",
        live.len(),
        class_table.len(),
        pool.len()
    );
    EncodedGraph {
        bytes: writer.bytes,
    }
}

fn encode_location(writer: &mut Writer, pool: &mut ObjectPool, location: &LocationIdentity) {
    let entry = match location {
        LocationIdentity::Any => PoolEntry::LocationAny,
        LocationIdentity::Named(symbol) => PoolEntry::LocationNamed(*symbol),
    };
    writer.varint(pool.intern(entry) as u64);
}

fn encode_deopt(writer: &mut Writer, descriptor: &DeoptDescriptor) {
    writer.u8(descriptor.reason as u8);
    writer.u8(descriptor.action as u8);
    writer.varint(descriptor.speculation.raw());
}

fn encode_payload(writer: &mut Writer, pool: &mut ObjectPool, op: &NodeOp) {
    match op {
        NodeOp::Parameter(index) => writer.varint(*index as u64),
        NodeOp::Constant(value) => {
            let entry = match value {
                ConstValue::Int(v) => PoolEntry::Int(*v),
                ConstValue::Float(bits) => PoolEntry::Float(*bits),
                ConstValue::Bool(b) => PoolEntry::Bool(*b),
                ConstValue::Null => PoolEntry::Null,
            };
            writer.varint(pool.intern(entry) as u64);
        }
        NodeOp::IntOp(arith) => writer.u8(*arith as u8),
        NodeOp::IntCmp(cmp) => writer.u8(*cmp as u8),
        NodeOp::MemoryProxy(location) => encode_location(writer, pool, location),
        NodeOp::Guard(data) => {
            writer.u8(data.negated as u8);
            encode_deopt(writer, &data.deopt);
        }
        NodeOp::FrameState(data) => {
            writer.varint(pool.intern(PoolEntry::Method(data.method)) as u64);
            writer.varint(data.bci as u64);
            writer.varint(data.locals as u64);
            writer.varint(data.stack as u64);
        }
        NodeOp::KillingBegin(location) => encode_location(writer, pool, location),
        NodeOp::MultiKillingBegin(locations) => {
            writer.varint(locations.len() as u64);
            for location in locations {
                encode_location(writer, pool, location);
            }
        }
        NodeOp::LoopEnd(data) => {
            writer.varint(data.end_index as u64);
            writer.u8(data.can_safepoint as u8);
        }
        NodeOp::LoopBegin(data) => {
            writer.u8(data.can_ends_safepoint as u8);
            writer.varint(data.next_end_index as u64);
        }
        NodeOp::If(data) => {
            writer.varint(data.profile.probability.raw() as u64);
            writer.u8(data.profile.source as u8);
        }
        NodeOp::Invoke(data) | NodeOp::InvokeWithException(data) => {
            writer.varint(pool.intern(PoolEntry::Method(data.target.method)) as u64);
            writer.u8(data.target.kind as u8);
        }
        NodeOp::Deoptimize(descriptor) => encode_deopt(writer, descriptor),
        NodeOp::Not
        | NodeOp::Phi
        | NodeOp::ValueProxy
        | NodeOp::GuardProxy
        | NodeOp::Start
        | NodeOp::Begin
        | NodeOp::LoopExit
        | NodeOp::End
        | NodeOp::Merge
        | NodeOp::Return => {}
    }
}

fn encode_stamp(writer: &mut Writer, pool: &mut ObjectPool, stamp: &Stamp) {
    match stamp {
        Stamp::Void => writer.u8(0),
        Stamp::Int(s) => {
            writer.u8(1);
            writer.zigzag(s.min);
            writer.zigzag(s.max);
        }
        Stamp::Float(s) => {
            writer.u8(2);
            writer.u8(s.non_nan as u8);
        }
        Stamp::Boolean => writer.u8(3),
        Stamp::Object(s) => {
            writer.u8(4);
            writer.u8(s.non_null as u8);
            writer.u8(s.exact as u8);
            match s.ty {
                Some(ty) => writer.varint(pool.intern(PoolEntry::Type(ty)) as u64 + 1),
                None => writer.varint(0),
            }
        }
        Stamp::Condition => writer.u8(5),
        Stamp::Memory => writer.u8(6),
        Stamp::Empty => writer.u8(7),
    }
}

// =============================================================================
// Decoding
// =============================================================================

struct NodeRecord {
    op: NodeOp,
    stamp: Stamp,
    bci: u32,
    inputs: SmallVec<[(InputType, u32); 4]>,
    successors: SmallVec<[u32; 2]>,
}

/// Decode an encoded graph against `pool` into a fresh graph and verify
/// it. The round-trip entry point.
pub fn decode(encoded: &EncodedGraph, pool: &ObjectPool) -> Result<Graph, DecodeError> {
    let mut graph = Graph::new();
    decode_into(&mut graph, encoded, pool, &mut |_| None)?;
    graph
        .verify()
        .map_err(|violation| DecodeError::Verify(violation.to_string()))?;
    Ok(graph)
}

/// Replay an encoded graph into `graph`, returning the order-id → node
/// mapping.
///
/// `substitute` maps order ids to pre-existing nodes of the target graph;
/// records it claims are not materialized and their encoded edges are not
/// replayed — that is how an inliner plants caller argument nodes under the
/// encoded callee's parameters. The encoded start record is identified with
/// the target graph's start node unless substituted.
pub fn decode_into(
    graph: &mut Graph,
    encoded: &EncodedGraph,
    pool: &ObjectPool,
    substitute: &mut dyn FnMut(u32) -> Option<NodeId>,
) -> Result<Vec<NodeId>, DecodeError> {
    let mut reader = Reader::new(&encoded.bytes);

    let mut magic = [0u8; 4];
    for byte in &mut magic {
        *byte = reader.u8()?;
    }
    if &magic != MAGIC {
        return Err(DecodeError::BadMagic);
    }
    let version = reader.u8()?;
    if version != VERSION {
        return Err(DecodeError::BadVersion(version));
    }

    let class_count = reader.varint_u32()?;
    let mut class_table = Vec::with_capacity(class_count as usize);
    for _ in 0..class_count {
        class_table.push(reader.u8()?);
    }

    let node_count = reader.varint_u32()?;
    let mut records = Vec::with_capacity(node_count as usize);
    for _ in 0..node_count {
        let class_index = reader.varint_u32()?;
        let code = *class_table
            .get(class_index as usize)
            .ok_or(DecodeError::BadTag(class_index as u8))?;
        let op = decode_payload(&mut reader, pool, code)?;
        let stamp = decode_stamp(&mut reader, pool)?;
        let bci = reader.varint_u32()?;

        let input_count = reader.varint_u32()?;
        let mut inputs = SmallVec::new();
        for _ in 0..input_count {
            let ty = InputType::from_u8(reader.u8()?).ok_or(DecodeError::Truncated)?;
            let target = reader.varint_u32()?;
            if target == 0 || target > node_count {
                return Err(DecodeError::BadNodeRef(target));
            }
            inputs.push((ty, target - 1));
        }
        let successor_count = reader.varint_u32()?;
        let mut successors = SmallVec::new();
        for _ in 0..successor_count {
            let target = reader.varint_u32()?;
            if target > node_count {
                return Err(DecodeError::BadNodeRef(target));
            }
            successors.push(target);
        }
        records.push(NodeRecord {
            op,
            stamp,
            bci,
            inputs,
            successors,
        });
    }
    let start_order = reader.varint_u32()?;
    if start_order >= node_count {
        return Err(DecodeError::BadNodeRef(start_order));
    }

    // Pass 1: materialize nodes (or take substitutions), edges unwired.
    let mut live: Vec<NodeId> = Vec::with_capacity(records.len());
    let mut substituted = vec![false; records.len()];
    for (position, record) in records.iter().enumerate() {
        let id = if let Some(existing) = substitute(position as u32) {
            substituted[position] = true;
            existing
        } else if position as u32 == start_order {
            graph.node_mut(graph.start).bci = record.bci;
            graph.start
        } else {
            let id = graph.add(record.op.clone(), record.stamp, &[]);
            graph.node_mut(id).bci = record.bci;
            id
        };
        live.push(id);
    }

    // Pass 2: replay edges.
    for (position, record) in records.iter().enumerate() {
        if substituted[position] {
            continue;
        }
        let id = live[position];
        for &(ty, target) in &record.inputs {
            let target = live[target as usize];
            graph.add_input(id, crate::node::Input::new(ty, target));
        }
        for (slot, &target) in record.successors.iter().enumerate() {
            if target != 0 {
                graph.set_successor(id, slot, live[target as usize - 1]);
            }
        }
    }

    log::trace!("decoded {} nodes", records.len());
    Ok(live)
}

fn decode_location(reader: &mut Reader, pool: &ObjectPool) -> Result<LocationIdentity, DecodeError> {
    let index = reader.varint_u32()?;
    match pool.get(index) {
        Some(PoolEntry::LocationAny) => Ok(LocationIdentity::Any),
        Some(PoolEntry::LocationNamed(symbol)) => Ok(LocationIdentity::Named(symbol)),
        _ => Err(DecodeError::BadPoolIndex(index)),
    }
}

fn decode_deopt(reader: &mut Reader) -> Result<DeoptDescriptor, DecodeError> {
    let reason_raw = reader.u8()?;
    let reason = DeoptReason::from_u8(reason_raw).ok_or(DecodeError::BadTag(reason_raw))?;
    let action_raw = reader.u8()?;
    let action = DeoptAction::from_u8(action_raw).ok_or(DecodeError::BadTag(action_raw))?;
    let speculation = SpeculationToken::from_raw(reader.varint()?);
    Ok(DeoptDescriptor {
        reason,
        action,
        speculation,
    })
}

fn decode_payload(reader: &mut Reader, pool: &ObjectPool, code: u8) -> Result<NodeOp, DecodeError> {
    Ok(match code {
        opcode::PARAMETER => NodeOp::Parameter(reader.varint_u32()? as u16),
        opcode::CONSTANT => {
            let index = reader.varint_u32()?;
            let value = match pool.get(index) {
                Some(PoolEntry::Int(v)) => ConstValue::Int(v),
                Some(PoolEntry::Float(bits)) => ConstValue::Float(bits),
                Some(PoolEntry::Bool(b)) => ConstValue::Bool(b),
                Some(PoolEntry::Null) => ConstValue::Null,
                _ => return Err(DecodeError::BadPoolIndex(index)),
            };
            NodeOp::Constant(value)
        }
        opcode::INT_OP => {
            let raw = reader.u8()?;
            NodeOp::IntOp(ArithOp::from_u8(raw).ok_or(DecodeError::BadTag(raw))?)
        }
        opcode::INT_CMP => {
            let raw = reader.u8()?;
            NodeOp::IntCmp(CmpOp::from_u8(raw).ok_or(DecodeError::BadTag(raw))?)
        }
        opcode::NOT => NodeOp::Not,
        opcode::PHI => NodeOp::Phi,
        opcode::VALUE_PROXY => NodeOp::ValueProxy,
        opcode::GUARD_PROXY => NodeOp::GuardProxy,
        opcode::MEMORY_PROXY => NodeOp::MemoryProxy(decode_location(reader, pool)?),
        opcode::GUARD => {
            let negated = reader.u8()? != 0;
            let deopt = decode_deopt(reader)?;
            NodeOp::Guard(GuardData { negated, deopt })
        }
        opcode::FRAME_STATE => {
            let method_index = reader.varint_u32()?;
            let method = match pool.get(method_index) {
                Some(PoolEntry::Method(m)) => m,
                _ => return Err(DecodeError::BadPoolIndex(method_index)),
            };
            NodeOp::FrameState(FrameStateData {
                method,
                bci: reader.varint_u32()?,
                locals: reader.varint_u32()? as u16,
                stack: reader.varint_u32()? as u16,
            })
        }
        opcode::START => NodeOp::Start,
        opcode::BEGIN => NodeOp::Begin,
        opcode::KILLING_BEGIN => NodeOp::KillingBegin(decode_location(reader, pool)?),
        opcode::MULTI_KILLING_BEGIN => {
            let count = reader.varint_u32()?;
            let mut locations = KillSet::new();
            for _ in 0..count {
                locations.push(decode_location(reader, pool)?);
            }
            NodeOp::MultiKillingBegin(locations)
        }
        opcode::LOOP_EXIT => NodeOp::LoopExit,
        opcode::END => NodeOp::End,
        opcode::LOOP_END => NodeOp::LoopEnd(LoopEndData {
            end_index: reader.varint_u32()?,
            can_safepoint: reader.u8()? != 0,
        }),
        opcode::MERGE => NodeOp::Merge,
        opcode::LOOP_BEGIN => NodeOp::LoopBegin(LoopBeginData {
            can_ends_safepoint: reader.u8()? != 0,
            next_end_index: reader.varint_u32()?,
        }),
        opcode::IF => {
            let probability = BranchProbability::from_raw(reader.varint_u32()?);
            let source_raw = reader.u8()?;
            let source =
                ProfileSource::from_u8(source_raw).ok_or(DecodeError::BadTag(source_raw))?;
            NodeOp::If(IfData::new(ProfileData::new(probability, source)))
        }
        opcode::INVOKE | opcode::INVOKE_WITH_EXCEPTION => {
            let method_index = reader.varint_u32()?;
            let method = match pool.get(method_index) {
                Some(PoolEntry::Method(m)) => m,
                _ => return Err(DecodeError::BadPoolIndex(method_index)),
            };
            let kind_raw = reader.u8()?;
            let kind = InvokeKind::from_u8(kind_raw).ok_or(DecodeError::BadTag(kind_raw))?;
            let data = InvokeData {
                target: CallTarget::new(method, kind),
            };
            if code == opcode::INVOKE {
                NodeOp::Invoke(data)
            } else {
                NodeOp::InvokeWithException(data)
            }
        }
        opcode::RETURN => NodeOp::Return,
        opcode::DEOPTIMIZE => NodeOp::Deoptimize(decode_deopt(reader)?),
        other => return Err(DecodeError::BadTag(other)),
    })
}

fn decode_stamp(reader: &mut Reader, pool: &ObjectPool) -> Result<Stamp, DecodeError> {
    Ok(match reader.u8()? {
        0 => Stamp::Void,
        1 => Stamp::Int(IntStamp {
            min: reader.zigzag()?,
            max: reader.zigzag()?,
        }),
        2 => Stamp::Float(FloatStamp {
            non_nan: reader.u8()? != 0,
        }),
        3 => Stamp::Boolean,
        4 => {
            let non_null = reader.u8()? != 0;
            let exact = reader.u8()? != 0;
            let ty_index = reader.varint_u32()?;
            let ty = if ty_index == 0 {
                None
            } else {
                match pool.get(ty_index - 1) {
                    Some(PoolEntry::Type(ty)) => Some(ty),
                    _ => return Err(DecodeError::BadPoolIndex(ty_index - 1)),
                }
            };
            Stamp::Object(ObjectStamp { non_null, ty, exact })
        }
        5 => Stamp::Condition,
        6 => Stamp::Memory,
        7 => Stamp::Empty,
        other => return Err(DecodeError::BadTag(other)),
    })
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::control::ProfileData;
    use crate::guard::GuardData;
    use crate::node::{CmpOp, ProxyKind};
    use crate::stamp::Stamp;

    fn round_trip(graph: &Graph) -> Graph {
        let mut pool = ObjectPool::new();
        let encoded = encode(graph, &mut pool);
        decode(&encoded, &pool).expect("round trip decodes")
    }

    #[test]
    fn test_empty_graph_round_trips() {
        let g = Graph::new();
        let decoded = round_trip(&g);
        assert_eq!(decoded.live_count(), 1);
        assert!(decoded.verify().is_ok());
    }

    #[test]
    fn test_diamond_with_guard_round_trips() {
        let mut g = Graph::new();
        let entry = g.append_begin(g.start);
        let x = g.parameter(0, Stamp::INT);
        let zero = g.const_int(0);
        let cond = g.int_cmp(CmpOp::Lt, x, zero);
        let (_if_node, t, f) = g.append_if(entry, cond, ProfileData::UNKNOWN);
        let guard = g.add_guard(
            cond,
            t,
            GuardData::new(
                true,
                crate::deopt::DeoptDescriptor::new(
                    crate::deopt::DeoptReason::BoundsCheck,
                    crate::deopt::DeoptAction::InvalidateRecompile,
                ),
            ),
        );
        let te = g.append_end(t);
        let fe = g.append_end(f);
        let merge = g.add_merge(&[te, fe]);
        let one = g.const_int(1);
        let phi = g.phi(merge, &[x, one]);
        g.append_return(merge, Some(phi));
        assert!(g.verify().is_ok());

        let decoded = round_trip(&g);
        assert!(decoded.verify().is_ok());
        assert_eq!(decoded.live_count(), g.live_count());

        // The guard survived with payload intact.
        let decoded_guard = decoded
            .live_nodes()
            .find_map(|(id, node)| match &node.op {
                NodeOp::Guard(data) => Some((id, *data)),
                _ => None,
            })
            .expect("guard survived the round trip");
        assert!(decoded_guard.1.negated);
        assert_eq!(
            decoded_guard.1.deopt.reason,
            crate::deopt::DeoptReason::BoundsCheck
        );
        let _ = guard;
    }

    #[test]
    fn test_loop_with_proxies_round_trips() {
        let mut g = Graph::new();
        let entry = g.append_begin(g.start);
        let fwd = g.append_end(entry);
        let loop_begin = g.add_loop_begin(&[fwd]);
        let body = g.append_begin(loop_begin);
        let cond = g.parameter(0, Stamp::Boolean);
        let (_if_node, stay, leave) = g.append_if(body, cond, ProfileData::UNKNOWN);
        let _loop_end = g.append_loop_end(stay, loop_begin);
        let exit = g.append_loop_exit(leave, loop_begin);
        let x = g.parameter(1, Stamp::INT);
        let one = g.const_int(1);
        let phi = g.loop_phi(loop_begin, &[x], &[one]);
        let proxy = g.proxy_for(phi, exit, ProxyKind::Value);
        let tail = g.append_begin(exit);
        g.append_return(tail, Some(proxy));
        assert!(g.verify().is_ok());

        let decoded = round_trip(&g);
        assert!(decoded.verify().is_ok());
        assert_eq!(decoded.live_count(), g.live_count());

        // Loop payloads survived.
        let (_, loop_node) = decoded
            .live_nodes()
            .find(|(_, node)| matches!(node.op, NodeOp::LoopBegin(_)))
            .unwrap();
        match &loop_node.op {
            NodeOp::LoopBegin(data) => assert_eq!(data.next_end_index, 1),
            _ => unreachable!(),
        }
    }

    #[test]
    fn test_pool_deduplicates_entries() {
        let mut g = Graph::new();
        let entry = g.append_begin(g.start);
        let a = g.const_int(5);
        let b = g.const_int(5); // value-numbered to the same node
        let sum = g.int_add(a, b);
        g.append_return(entry, Some(sum));

        let mut pool = ObjectPool::new();
        let _ = encode(&g, &mut pool);
        let ints = (0..pool.len() as u32)
            .filter(|&i| matches!(pool.get(i), Some(PoolEntry::Int(5))))
            .count();
        assert_eq!(ints, 1);
    }

    #[test]
    fn test_truncated_stream_is_rejected() {
        let mut g = Graph::new();
        let entry = g.append_begin(g.start);
        g.append_return(entry, None);
        let mut pool = ObjectPool::new();
        let encoded = encode(&g, &mut pool);

        let truncated = EncodedGraph {
            bytes: encoded.bytes[..encoded.bytes.len() - 2].to_vec(),
        };
        assert!(decode(&truncated, &pool).is_err());
    }

    #[test]
    fn test_bad_magic_is_rejected() {
        let encoded = EncodedGraph {
            bytes: b"NOPE\x01\x00\x00".to_vec(),
        };
        let pool = ObjectPool::new();
        assert!(matches!(
            decode(&encoded, &pool),
            Err(DecodeError::BadMagic)
        ));
    }

    #[test]
    fn test_substitution_remaps_encoded_nodes_onto_live_ones() {
        // Encode a fragment computing param0 + 1.
        let mut g = Graph::new();
        let entry = g.append_begin(g.start);
        let x = g.parameter(0, Stamp::INT);
        let one = g.const_int(1);
        let sum = g.int_add(x, one);
        g.append_return(entry, Some(sum));

        let mut pool = ObjectPool::new();
        let encoded = encode(&g, &mut pool);

        let live: Vec<NodeId> = g.live_ids().collect();
        let param_order = live.iter().position(|&id| id == x).unwrap() as u32;
        let sum_order = live.iter().position(|&id| id == sum).unwrap() as usize;

        // Replay into a target graph, planting a constant under the
        // parameter record.
        let mut target = Graph::new();
        let seven = target.const_int(7);
        let mapping = decode_into(&mut target, &encoded, &pool, &mut |order| {
            (order == param_order).then_some(seven)
        })
        .unwrap();

        assert_eq!(mapping[param_order as usize], seven);
        let decoded_sum = mapping[sum_order];
        assert_eq!(target.node(decoded_sum).inputs()[0].node, seven);
        assert!(target.verify().is_ok());
    }
}
