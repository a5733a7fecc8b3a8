use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Where per-phase results go: hex dumps on disk or the external streamer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum TestMode {
    /// One `.hex` file per output segment, named after the block.
    #[default]
    Normal,
    /// One consolidated comparison file per phase, with segment preambles.
    PrimOutput,
    /// No files; outputs are streamed to the IO server.
    CaseOutput,
}

/// Run-wide toggles, resolved once by the CLI and passed into the context.
/// Worker threads never consult process-wide state.
#[derive(Debug, Clone)]
pub struct RunOptions {
    pub test_mode: TestMode,
    pub output_dir: PathBuf,
    pub readable: bool,
    pub case_name: String,
    pub streamer_port: u16,
}

impl Default for RunOptions {
    fn default() -> Self {
        Self {
            test_mode: TestMode::Normal,
            output_dir: PathBuf::from("."),
            readable: true,
            case_name: String::new(),
            streamer_port: 7000,
        }
    }
}

/// Top-level instruction descriptor, parsed once at start-up.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Descriptor {
    #[serde(default)]
    pub test_mode: TestMode,
    #[serde(default)]
    pub seed: i32,
    #[serde(default = "default_n_step")]
    pub n_step: u32,
    pub chips: Vec<ChipConfig>,
    #[serde(default)]
    pub static_blocks: Vec<IoBlockConfig>,
    #[serde(default)]
    pub dynamic_blocks: Vec<IoBlockConfig>,
}

fn default_n_step() -> u32 {
    1
}

impl Descriptor {
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let f = std::fs::File::open(path)?;
        serde_json::from_reader(f).context("Failed to parse instruction descriptor")
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChipConfig {
    pub x: u32,
    pub y: u32,
    #[serde(default)]
    pub step_group_id: u32,
    pub cores: Vec<CoreConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CoreConfig {
    pub x: u32,
    pub y: u32,
    #[serde(default)]
    pub phase_group_id: u32,
    pub pi_groups: Vec<PiGroupConfig>,
}

/// Up to four primitives, executed in axon, soma1, router, soma2 order.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PiGroupConfig {
    pub axon: Option<PiConfig>,
    pub soma1: Option<PiConfig>,
    pub router: Option<PiConfig>,
    pub soma2: Option<PiConfig>,
}

/// One primitive instruction. `pic` selects the opcode; the remaining
/// fields form the union of every opcode's parameter set, so unused ones
/// simply stay at their defaults.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PiConfig {
    pub pic: u32,

    #[serde(default)]
    pub x1_precision: u32,
    #[serde(default)]
    pub x2_precision: u32,
    #[serde(default)]
    pub out_precision: u32,
    #[serde(default)]
    pub bias_type: u32,
    #[serde(default)]
    pub bias_length: u32,
    #[serde(default)]
    pub constant_a: i32,
    #[serde(default)]
    pub constant_b: i32,

    // Tensor geometry.
    #[serde(default)]
    pub niy: u32,
    #[serde(default)]
    pub nix: u32,
    #[serde(default)]
    pub nif: u32,
    #[serde(default)]
    pub nof: u32,
    #[serde(default)]
    pub nkx: u32,
    #[serde(default)]
    pub nky: u32,
    #[serde(default)]
    pub ny: u32,
    #[serde(default)]
    pub nx: u32,
    #[serde(default)]
    pub n_branch: u32,
    #[serde(default = "default_one")]
    pub stride_x: u32,
    #[serde(default = "default_one")]
    pub stride_y: u32,
    #[serde(default)]
    pub pad_top: u32,
    #[serde(default)]
    pub pad_down: u32,
    #[serde(default)]
    pub pad_left: u32,
    #[serde(default)]
    pub pad_right: u32,
    #[serde(default = "default_one")]
    pub dilate_x: u32,
    #[serde(default = "default_one")]
    pub dilate_y: u32,
    #[serde(default)]
    pub avg_pooling_en: bool,
    #[serde(default)]
    pub tensor_en: bool,
    #[serde(default)]
    pub compare_init: i64,
    #[serde(default)]
    pub bit_shift_num: u32,

    // Block-mover geometry (opcode 0x06).
    #[serde(default)]
    pub length_in: u32,
    #[serde(default)]
    pub length_out: u32,
    #[serde(default)]
    pub length_ciso: u32,
    #[serde(default)]
    pub num_in: u32,
    #[serde(default)]
    pub num_out: u32,
    #[serde(default)]
    pub num_ciso: u32,
    #[serde(default)]
    pub real_length_in_en: bool,
    #[serde(default)]
    pub real_num_in: u32,

    // LUT (opcode 0x07).
    #[serde(default)]
    pub group_num: u32,
    #[serde(default)]
    pub neuron_real_num: u32,
    #[serde(default)]
    pub lut_data_width: u32,

    // Neuron (opcode 0x08).
    #[serde(default)]
    pub neuron_num: u32,
    #[serde(default)]
    pub seed: i32,
    #[serde(default)]
    pub vth0: i32,
    #[serde(default)]
    pub vr: i32,
    #[serde(default)]
    pub vl: i32,
    #[serde(default)]
    pub dv: i32,
    #[serde(default)]
    pub vinit: i32,
    #[serde(default)]
    pub reset_mode: u32,
    #[serde(default)]
    pub fire_type: u32,

    // Router (opcode 0x09). Counts follow the hardware encoding where
    // zero means one; the builder applies the +1.
    #[serde(default)]
    pub multicast_relay_or_not: u32,
    #[serde(default)]
    pub dx: i32,
    #[serde(default)]
    pub dy: i32,
    #[serde(default)]
    pub relay_packets_num: u32,
    #[serde(default)]
    pub received_stop_num: u32,
    #[serde(default)]
    pub header_multipack: u32,
    #[serde(default)]
    pub send_en: bool,
    #[serde(default)]
    pub recv_en: bool,
    #[serde(default)]
    pub recv_address: u32,
    #[serde(default)]
    pub din_length: u32,
    #[serde(default)]
    pub recv_end_phase: u32,
    pub output_seg: Option<SegConfig>,

    #[serde(default)]
    pub data_blocks: Vec<BlockConfig>,
}

fn default_one() -> u32 {
    1
}

/// A `(start, length)` pair in 32-bit words.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct SegConfig {
    pub start: u32,
    pub length: u32,
}

/// One data block declaration inside a primitive. All addresses and
/// lengths are in 32-bit words. Blocks carrying the capitalised header
/// fields are packet headers; `EN` selects the 8-byte advanced shape.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BlockConfig {
    #[serde(default)]
    pub id: Option<String>,
    pub start: u32,
    #[serde(default)]
    pub length: Option<u32>,
    #[serde(default)]
    pub size: Option<u32>,
    #[serde(default)]
    pub print_length: Option<u32>,
    #[serde(default)]
    pub data: Option<Vec<i32>>,
    #[serde(default)]
    pub init: bool,
    #[serde(default)]
    pub direction_out: bool,
    #[serde(default)]
    pub input_source_id: Option<String>,

    #[serde(default, rename = "A")]
    pub a: Option<u32>,
    #[serde(default, rename = "X")]
    pub x: Option<i32>,
    #[serde(default, rename = "Y")]
    pub y: Option<i32>,
    #[serde(default, rename = "S")]
    pub s: Option<u32>,
    #[serde(default, rename = "T")]
    pub t: Option<u32>,
    #[serde(default, rename = "P")]
    pub p: Option<u32>,
    #[serde(default, rename = "Q")]
    pub q: Option<u32>,
    #[serde(default, rename = "EN")]
    pub en: Option<u32>,
    #[serde(default, rename = "pack_per_Rhead")]
    pub pack_per_rhead: Option<u32>,
    #[serde(default, rename = "A_offset")]
    pub a_offset: Option<u32>,
    #[serde(default, rename = "Const")]
    pub const_num: Option<u32>,
}

impl BlockConfig {
    pub fn is_header(&self) -> bool {
        self.a.is_some()
    }
}

/// Kind of traffic a dynamic/static IO block carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IoKind {
    StaticData,
    DynamicInput,
    OutputData,
}

/// An IO block streamed in or out through the external streamer,
/// addressed by `(chip, core)` coordinates.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IoBlockConfig {
    pub id: String,
    pub chip_x: u32,
    pub chip_y: u32,
    pub core_x: u32,
    pub core_y: u32,
    pub io_type: IoKind,
    pub start_addr: u32,
    pub length: u32,
    #[serde(default)]
    pub phases: Vec<u32>,
    #[serde(default)]
    pub precision: u32,
    #[serde(default)]
    pub shape: Vec<i32>,
    #[serde(default)]
    pub begin_position: Vec<i32>,
    #[serde(default = "default_one")]
    pub socket_count: u32,
}
