//! Primitive instructions. A primitive is an immutable descriptor: a kind,
//! one parameters variant per opcode, and the ordered input/output block
//! identities it reads and writes. Dispatch is a match on the opcode; every
//! opcode is pure with respect to its parameters. Routers are the
//! exception: the context hands them to the NoC instead.

pub mod axon;
pub mod router;
pub mod soma;

use crate::block::DataBlock;
use crate::identity::Id;
use crate::{SimError, SimResult};
use router::RouterParams;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PiKind {
    Axon,
    Soma,
    Router,
}

/// Element precision of a tensor operand. A 4-byte word packs 1, 4, 4 or
/// 16 elements respectively.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Precision {
    Int32 = 0,
    Int8 = 1,
    UInt8 = 2,
    Ternary = 3,
}

impl Precision {
    pub fn from_code(code: u32) -> SimResult<Self> {
        Ok(match code {
            0 => Precision::Int32,
            1 => Precision::Int8,
            2 => Precision::UInt8,
            3 => Precision::Ternary,
            other => {
                return Err(SimError::Parse(format!("unknown precision code {other}")));
            }
        })
    }

    /// Elements per 32-bit word.
    pub fn lanes(self) -> usize {
        match self {
            Precision::Int32 => 1,
            Precision::Int8 | Precision::UInt8 => 4,
            Precision::Ternary => 16,
        }
    }
}

/// Element `lane` of a packed word. Ternary uses the encoding
/// `{0 -> 0, 1 -> 1, 3 -> -1}`.
pub(crate) fn lane_value(word: u32, precision: Precision, lane: usize) -> i32 {
    match precision {
        Precision::Int32 => word as i32,
        Precision::Int8 => ((word >> (8 * lane)) & 0xff) as u8 as i8 as i32,
        Precision::UInt8 => ((word >> (8 * lane)) & 0xff) as i32,
        Precision::Ternary => match (word >> (2 * lane)) & 0x3 {
            1 => 1,
            3 => -1,
            _ => 0,
        },
    }
}

/// Unpacks `count` elements from little-endian words, padding with zeros
/// past the end of the buffer.
pub(crate) fn unpack_lanes(bytes: &[u8], precision: Precision, count: usize) -> Vec<i32> {
    let lanes = precision.lanes();
    let mut out = Vec::with_capacity(count);
    for i in 0..count {
        let word_idx = i / lanes;
        let word = bytes
            .get(word_idx * 4..word_idx * 4 + 4)
            .map(|c| u32::from_le_bytes(c.try_into().expect("4-byte chunk")))
            .unwrap_or(0);
        out.push(lane_value(word, precision, i % lanes));
    }
    out
}

pub(crate) fn align_up(x: usize, n: usize) -> usize {
    x.div_ceil(n) * n
}

#[derive(Debug, Clone)]
pub enum PiParams {
    /// 0x02: windowed accumulate / average pooling.
    Pool(axon::PoolParams),
    /// 0x03: element-wise multiply-accumulate plus bias.
    ElemMac(axon::ElemMacParams),
    /// 0x04: fully-connected MAC.
    Mac(axon::MacParams),
    /// 0x41: 2-D convolution.
    Conv(axon::ConvParams),
    /// 0x05: max pooling with compare floor.
    MaxPool(soma::MaxPoolParams),
    /// 0x06: block mover with precision repack and shift.
    Move(soma::MoveParams),
    /// 0x07: LUT activation.
    Lut(soma::LutParams),
    /// 0x08: LIF neuron update.
    Lif(soma::LifParams),
    /// 0x09: NoC send/receive/relay.
    Router(RouterParams),
}

#[derive(Debug, Clone)]
pub struct Primitive {
    kind: PiKind,
    params: PiParams,
    inputs: Vec<Id>,
    outputs: Vec<Id>,
}

impl Primitive {
    pub fn new(kind: PiKind, params: PiParams) -> Self {
        Primitive {
            kind,
            params,
            inputs: Vec::new(),
            outputs: Vec::new(),
        }
    }

    pub fn kind(&self) -> PiKind {
        self.kind
    }

    pub fn params(&self) -> &PiParams {
        &self.params
    }

    pub fn router_params(&self) -> Option<&RouterParams> {
        match &self.params {
            PiParams::Router(p) => Some(p),
            _ => None,
        }
    }

    pub fn add_input(&mut self, id: Id) {
        self.inputs.push(id);
    }

    pub fn add_output(&mut self, id: Id) {
        self.outputs.push(id);
    }

    pub fn inputs(&self) -> &[Id] {
        &self.inputs
    }

    pub fn outputs(&self) -> &[Id] {
        &self.outputs
    }

    /// Byte length of each output this opcode produces, in declaration
    /// order. The builder compares these against declared block lengths to
    /// spot pipelined outputs.
    pub fn output_lens(&self) -> Vec<usize> {
        match &self.params {
            PiParams::Pool(p) => vec![p.output_len()],
            PiParams::ElemMac(p) => vec![p.output_len()],
            PiParams::Mac(p) => vec![p.output_len()],
            PiParams::Conv(p) => vec![p.output_len()],
            PiParams::MaxPool(p) => vec![p.output_len()],
            PiParams::Move(p) => vec![p.output_len()],
            PiParams::Lut(p) => vec![p.output_len()],
            PiParams::Lif(p) => p.output_lens(),
            PiParams::Router(_) => Vec::new(),
        }
    }

    /// Runs the opcode's arithmetic: inputs in declaration order, fresh
    /// outputs written back by the caller.
    pub fn execute(&self, inputs: &[DataBlock], outputs: &mut [DataBlock]) -> SimResult<()> {
        match &self.params {
            PiParams::Pool(p) => axon::pool(p, inputs, outputs),
            PiParams::ElemMac(p) => axon::elem_mac(p, inputs, outputs),
            PiParams::Mac(p) => axon::mac(p, inputs, outputs),
            PiParams::Conv(p) => axon::conv(p, inputs, outputs),
            PiParams::MaxPool(p) => soma::max_pool(p, inputs, outputs),
            PiParams::Move(p) => soma::move_block(p, inputs, outputs),
            PiParams::Lut(p) => soma::lut(p, inputs, outputs),
            PiParams::Lif(p) => soma::lif(p, inputs, outputs),
            PiParams::Router(_) => Err(SimError::Invariant(
                "router primitives are dispatched through the NoC".to_string(),
            )),
        }
    }
}

/// Fetches input `idx` or fails with a descriptor-shaped invariant.
pub(crate) fn input<'a>(inputs: &'a [DataBlock], idx: usize) -> SimResult<&'a DataBlock> {
    inputs
        .get(idx)
        .ok_or_else(|| SimError::Invariant(format!("primitive expects input #{idx}")))
}

/// Single-output helper shared by most opcodes.
pub(crate) fn store_output(outputs: &mut [DataBlock], idx: usize, words: &[i32]) -> SimResult<()> {
    let out = outputs
        .get_mut(idx)
        .ok_or_else(|| SimError::Invariant(format!("primitive expects output #{idx}")))?;
    out.set_data(crate::block::bytes_of_words(words));
    Ok(())
}

/// Per-channel bias: a bias block when `bias_type` selects one, otherwise
/// the constant replicated.
pub(crate) fn bias_vector(
    bias_type: u32,
    constant_b: i32,
    bias_input: Option<&DataBlock>,
    len: usize,
) -> SimResult<Vec<i32>> {
    if bias_type == 2 || bias_type == 3 {
        let block = bias_input.ok_or_else(|| {
            SimError::Invariant("bias_type selects a vector but no bias block is wired".to_string())
        })?;
        Ok(unpack_lanes(block.bytes(), Precision::Int32, len))
    } else {
        Ok(vec![constant_b; len])
    }
}
