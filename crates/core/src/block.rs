//! A contiguous region of one core's scratchpad, plus the payload bytes
//! travelling through it. Payloads are refcounted so a packet pool and an
//! unpacked block can share them without copying.

use crate::identity::Id;
use std::sync::Arc;

#[derive(Clone, Debug)]
pub struct DataBlock {
    id: Id,
    data: Option<Arc<[u8]>>,
    /// Byte offset in the owning core's memory.
    start: usize,
    /// Bytes of the live slice (one row for pipelined blocks).
    length: usize,
    /// Bytes of the backing buffer; `size > length` marks a pipelined
    /// producer that emits `size / length` rows.
    size: usize,
    /// When set, reads resolve through the named upstream block instead of
    /// core memory.
    input_source: Option<Id>,
}

impl DataBlock {
    pub fn new(core_id: &Id, name: &str, data: Option<Arc<[u8]>>, start: usize, length: usize) -> Self {
        Self::with_size(core_id, name, data, start, length, length)
    }

    pub fn with_size(
        core_id: &Id,
        name: &str,
        data: Option<Arc<[u8]>>,
        start: usize,
        length: usize,
        size: usize,
    ) -> Self {
        DataBlock {
            id: Id::data_block(core_id, name),
            data,
            start,
            length,
            size,
            input_source: None,
        }
    }

    /// A view over `source`: `start` is the byte offset into the source
    /// buffer, `size` the bytes materialised per read.
    pub fn view(
        core_id: &Id,
        name: &str,
        start: usize,
        length: usize,
        size: usize,
        source: Id,
    ) -> Self {
        DataBlock {
            id: Id::data_block(core_id, name),
            data: None,
            start,
            length,
            size,
            input_source: Some(source),
        }
    }

    /// A received copy of `payload` landing at `start` on `core_id`,
    /// keeping the payload's geometry. Used by the NoC unpack stage.
    pub fn landed(core_id: &Id, name: &str, payload: &DataBlock, start: usize) -> Self {
        DataBlock {
            id: Id::data_block(core_id, name),
            data: payload.data.clone(),
            start,
            length: payload.length,
            size: payload.size,
            input_source: payload.input_source.clone(),
        }
    }

    pub fn id(&self) -> &Id {
        &self.id
    }

    pub fn data(&self) -> Option<&Arc<[u8]>> {
        self.data.as_ref()
    }

    pub fn set_data(&mut self, data: Arc<[u8]>) {
        self.data = Some(data);
    }

    pub fn start(&self) -> usize {
        self.start
    }

    pub fn length(&self) -> usize {
        self.length
    }

    pub fn size(&self) -> usize {
        self.size
    }

    pub fn input_source(&self) -> Option<&Id> {
        self.input_source.as_ref()
    }

    /// The live bytes, or an empty slice for an unwritten placeholder.
    pub fn bytes(&self) -> &[u8] {
        self.data.as_deref().unwrap_or(&[])
    }

    /// The live bytes as little-endian 32-bit words.
    pub fn words(&self) -> Vec<u32> {
        words_of(self.bytes())
    }
}

pub fn words_of(bytes: &[u8]) -> Vec<u32> {
    bytes
        .chunks(4)
        .map(|c| {
            let mut w = [0u8; 4];
            w[..c.len()].copy_from_slice(c);
            u32::from_le_bytes(w)
        })
        .collect()
}

pub fn bytes_of_words(words: &[i32]) -> Arc<[u8]> {
    let mut out = Vec::with_capacity(words.len() * 4);
    for w in words {
        out.extend_from_slice(&w.to_le_bytes());
    }
    out.into()
}
