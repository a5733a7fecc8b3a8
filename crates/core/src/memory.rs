//! Per-core scratchpad memory and the fabric-wide virtual memory: a
//! registry of every data block ever declared plus the physical byte
//! arrays the blocks land in.

use crate::block::DataBlock;
use crate::identity::Id;
use crate::{SimError, SimResult, MEM_SIZE};
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, RwLock};

/// One core's scratchpad: `MEM_SIZE` bytes, zero-initialised.
pub struct Memory {
    mem: Box<[u8]>,
}

impl Default for Memory {
    fn default() -> Self {
        Self::new()
    }
}

impl Memory {
    pub fn new() -> Self {
        Memory {
            mem: vec![0u8; MEM_SIZE].into_boxed_slice(),
        }
    }

    /// Copies `data` in when present; a `None` write only reserves the
    /// range.
    pub fn write(&mut self, address: usize, length: usize, data: Option<&[u8]>) -> SimResult<()> {
        if address + length > MEM_SIZE {
            return Err(SimError::OutOfRange {
                start: address,
                length,
                limit: MEM_SIZE,
            });
        }
        if let Some(data) = data {
            let n = length.min(data.len());
            self.mem[address..address + n].copy_from_slice(&data[..n]);
        }
        Ok(())
    }

    /// Returns a fresh owned copy of the range.
    pub fn read(&self, address: usize, length: usize) -> SimResult<Vec<u8>> {
        if address + length > MEM_SIZE {
            return Err(SimError::OutOfRange {
                start: address,
                length,
                limit: MEM_SIZE,
            });
        }
        Ok(self.mem[address..address + length].to_vec())
    }
}

/// Shared mappings from core identity to `Memory` and from block identity
/// to the latest `DataBlock` written under that name. Each map sits behind
/// its own read/write lock; the two are never held together.
#[derive(Default)]
pub struct VirtualMemory {
    memories: RwLock<HashMap<Id, Memory>>,
    blocks: RwLock<BTreeMap<Id, DataBlock>>,
}

impl VirtualMemory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Raw read of a core's memory; the visitor's dump path.
    pub fn read(&self, core_id: &Id, address: usize, length: usize) -> SimResult<Vec<u8>> {
        let memories = self.memories.read().expect("memory lock poisoned");
        let memory = memories
            .get(core_id)
            .ok_or_else(|| SimError::NotFound(core_id.clone()))?;
        memory.read(address, length)
    }

    /// Latest registry entry for `block_id`, by value.
    pub fn block(&self, block_id: &Id) -> SimResult<DataBlock> {
        let blocks = self.blocks.read().expect("block lock poisoned");
        blocks
            .get(block_id)
            .cloned()
            .ok_or_else(|| SimError::NotFound(block_id.clone()))
    }

    /// Reads a block's current contents. Views resolve through their
    /// upstream block's latest bytes; meta-region blocks (`start` at
    /// `MEM_SIZE`) pass through untouched; everything else reads the
    /// owning core's memory.
    pub fn read_memory_block(&self, block_id: &Id) -> SimResult<DataBlock> {
        let block = self.block(block_id)?;
        if block.start() == MEM_SIZE {
            return Ok(block);
        }
        let core_id = block.id().core_id();
        if let Some(source_id) = block.input_source() {
            let source = self.block(source_id)?;
            let src = source.bytes();
            let mut data = vec![0u8; block.size()];
            let from = block.start().min(src.len());
            let to = (block.start() + block.size()).min(src.len());
            data[..to - from].copy_from_slice(&src[from..to]);
            let mut fresh = DataBlock::view(
                &core_id,
                block.id().module_str(),
                block.start(),
                block.length(),
                block.size(),
                source_id.clone(),
            );
            fresh.set_data(data.into());
            Ok(fresh)
        } else {
            let data = {
                let memories = self.memories.read().expect("memory lock poisoned");
                let memory = memories
                    .get(&core_id)
                    .ok_or_else(|| SimError::NotFound(core_id.clone()))?;
                memory.read(block.start(), block.length())?
            };
            let mut fresh = DataBlock::with_size(
                &core_id,
                block.id().module_str(),
                None,
                block.start(),
                block.length(),
                block.size(),
            );
            fresh.set_data(data.into());
            Ok(fresh)
        }
    }

    /// Updates the registry and stores the block's bytes into core memory.
    /// Meta-region blocks skip the physical write. A pipelined block
    /// (`size > length`) is realigned first: the stored row is the last
    /// complete row's remainder followed by the running tail, so a plain
    /// read at `start` observes the most recently produced row.
    pub fn write_memory_block(&self, block: &DataBlock) -> SimResult<()> {
        self.insert_block(block.clone());
        if block.start() >= MEM_SIZE {
            return Ok(());
        }
        let Some(data) = block.data() else {
            return Ok(());
        };
        let payload: Arc<[u8]> = if block.size() > block.length() && block.length() > 0 {
            realign_rows(data, block.size(), block.length()).into()
        } else {
            data.clone()
        };

        let mut memories = self.memories.write().expect("memory lock poisoned");
        let memory = memories.entry(block.id().core_id()).or_default();
        memory.write(block.start(), block.length(), Some(&payload[..]))
    }

    /// Registers and writes a block; creates the core's memory on first
    /// use. Build-time only.
    pub fn init_memory_block(&self, block: &DataBlock) -> SimResult<()> {
        let core_id = block.id().core_id();
        {
            let mut memories = self.memories.write().expect("memory lock poisoned");
            memories.entry(core_id).or_default();
        }
        self.write_memory_block(block)
    }

    /// Replaces a registered block's bytes in place and returns the
    /// updated entry. The IO client stitches streamed responses in through
    /// this.
    pub fn update_block_data(&self, block_id: &Id, data: Arc<[u8]>) -> SimResult<DataBlock> {
        let mut blocks = self.blocks.write().expect("block lock poisoned");
        let block = blocks
            .get_mut(block_id)
            .ok_or_else(|| SimError::NotFound(block_id.clone()))?;
        block.set_data(data);
        Ok(block.clone())
    }

    /// Bytes of the block parked at word address 0x9000 (the meta region)
    /// for `core_id`.
    pub fn mem3_data(&self, core_id: &Id) -> SimResult<Arc<[u8]>> {
        let blocks = self.blocks.read().expect("block lock poisoned");
        for (id, block) in blocks.iter() {
            if block.start() / 4 == 0x9000 && id.core_id() == *core_id {
                if let Some(data) = block.data() {
                    return Ok(data.clone());
                }
            }
        }
        Err(SimError::NotFound(core_id.clone()))
    }

    fn insert_block(&self, block: DataBlock) {
        let mut blocks = self.blocks.write().expect("block lock poisoned");
        blocks.insert(block.id().clone(), block);
    }
}

/// Folds a `size`-byte multi-row buffer into a single `length`-byte row:
/// the tail of the last complete row, then the running remainder.
fn realign_rows(data: &[u8], size: usize, length: usize) -> Vec<u8> {
    let mut row = vec![0u8; length];
    let at = |range: std::ops::Range<usize>| -> &[u8] {
        let from = range.start.min(data.len());
        let to = range.end.min(data.len());
        &data[from..to]
    };

    let tail_len = size % length;
    let tail_off = size / length * length;
    let head_len = length - tail_len;
    let head_off = tail_off - head_len;

    let tail = at(tail_off..tail_off + tail_len);
    row[..tail.len()].copy_from_slice(tail);
    let head = at(head_off..head_off + head_len);
    row[tail_len..tail_len + head.len()].copy_from_slice(head);
    row
}
