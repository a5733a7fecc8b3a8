pub mod block;
pub mod builder;
pub mod chip;
pub mod context;
pub mod core;
pub mod identity;
pub mod io;
pub mod memory;
pub mod noc;
pub mod packet;
pub mod primitive;
pub mod visitor;


use identity::Id;

/// Bytes of scratchpad memory per core: 0x9000 32-bit words.
pub const MEM_SIZE: usize = 0x9000 * 4;

/// Core grid dimensions of one chip.
pub const CORES_PER_CHIP_X: i32 = 16;
pub const CORES_PER_CHIP_Y: i32 = 10;

#[derive(Debug, thiserror::Error)]
pub enum SimError {
    #[error("descriptor error: {0}")]
    Parse(String),
    #[error("data block not found: {0}")]
    NotFound(Id),
    #[error("memory access out of range: start {start:#x} length {length:#x} exceeds {limit:#x}")]
    OutOfRange {
        start: usize,
        length: usize,
        limit: usize,
    },
    #[error("invariant violated: {0}")]
    Invariant(String),
    #[error("packet count mismatch: expected {expected}, extracted {actual}")]
    CountMismatch { expected: usize, actual: usize },
    #[error("streamer unavailable: {0}")]
    IoUnavailable(String),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

pub type SimResult<T> = Result<T, SimError>;

/// Sign-saturated narrowing used at every accumulation site, matching the
/// hardware's 64-to-32-bit overflow behavior.
#[inline]
pub fn saturate(x: i64) -> i32 {
    x.clamp(i32::MIN as i64, i32::MAX as i64) as i32
}
