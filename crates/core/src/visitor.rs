//! Serialises configured output segments after each phase: either one
//! consolidated comparison file per phase or one file per segment.

use crate::context::Context;
use crate::identity::Id;
use crate::{SimResult, MEM_SIZE};
use std::collections::HashMap;
use std::io::Write;
use tilesim_config::TestMode;

/// Word-addressed dumps split at this bank boundary.
const BANK_WORDS: usize = 0x4000;

#[derive(Debug, Clone, Default)]
pub struct MemoryVisitor {
    /// `(start, length)` in bytes, sorted at serialise time.
    segments: Vec<(usize, usize)>,
    names: HashMap<(usize, usize), String>,
}

impl MemoryVisitor {
    /// Registers a segment for dumping. Meta-region segments never reach
    /// the files.
    pub fn add_segment(&mut self, start: usize, length: usize) {
        if start < MEM_SIZE {
            self.segments.push((start, length));
        }
    }

    pub fn add_named_segment(&mut self, start: usize, length: usize, name: &str) {
        if start < MEM_SIZE {
            self.segments.push((start, length));
            self.names.insert((start, length), name.to_string());
        }
    }

    pub fn is_empty(&self) -> bool {
        self.segments.is_empty()
    }

    #[allow(clippy::too_many_arguments)]
    pub fn serialize(
        &self,
        core_id: &Id,
        chip_x: u32,
        chip_y: u32,
        group_id: u32,
        x: u32,
        y: u32,
        step: u32,
        phase: u32,
        ctx: &Context,
    ) -> SimResult<()> {
        let mut segments = self.segments.clone();
        segments.sort_by_key(|seg| seg.0);
        let options = ctx.options();

        if options.test_mode == TestMode::PrimOutput {
            let path = options.output_dir.join(format!(
                "cmp_out_{chip_x}_{chip_y}_{group_id}_{x}_{y}@{step}_{phase}.txt"
            ));
            let mut file = std::io::BufWriter::new(std::fs::File::create(path)?);
            for (start, length) in segments {
                if length == 0 {
                    writeln!(file, "{:08x}", start / 4)?;
                    writeln!(file, "{:08x}", 0)?;
                    continue;
                }
                let bytes = ctx.read(core_id, start, length)?;
                segment_output(
                    start / 4,
                    length / 4,
                    &crate::block::words_of(&bytes),
                    true,
                    options.readable,
                    &mut file,
                )?;
            }
            file.flush()?;
        } else {
            for (start, length) in segments {
                if length == 0 {
                    continue;
                }
                let name = self
                    .names
                    .get(&(start, length))
                    .cloned()
                    .unwrap_or_else(|| format!("seg_{:06x}", start / 4));
                let path = options.output_dir.join(format!("{name}.hex"));
                let mut file = std::io::BufWriter::new(std::fs::File::create(path)?);
                let bytes = ctx.read(core_id, start, length)?;
                segment_output(
                    start / 4,
                    length / 4,
                    &crate::block::words_of(&bytes),
                    false,
                    options.readable,
                    &mut file,
                )?;
                file.flush()?;
            }
        }
        Ok(())
    }
}

/// Writes one segment, splitting at the 0x4000-word bank boundary. The
/// comparison format prefixes each split with its word start and length;
/// non-readable output dumps raw little-endian words instead of hex text.
fn segment_output(
    mut start: usize,
    mut length: usize,
    words: &[u32],
    with_preamble: bool,
    readable: bool,
    out: &mut impl Write,
) -> SimResult<()> {
    let mut cursor = 0usize;
    while length > 0 {
        let remain = (BANK_WORDS - start % BANK_WORDS).min(length);
        if with_preamble {
            writeln!(out, "{start:08x}")?;
            writeln!(out, "{remain:08x}")?;
        }
        for n in 0..remain {
            let word = words.get(cursor + n).copied().unwrap_or(0);
            if readable {
                writeln!(out, "{word:08x}")?;
            } else {
                out.write_all(&word.to_le_bytes())?;
            }
        }
        start += remain;
        length -= remain;
        cursor += remain;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn segment_output_writes_hex_words() {
        let mut buf = Vec::new();
        segment_output(0, 4, &[2, 3, 4, 5], false, true, &mut buf).unwrap();
        assert_eq!(
            String::from_utf8(buf).unwrap(),
            "00000002\n00000003\n00000004\n00000005\n"
        );
    }

    #[test]
    fn segment_output_splits_at_bank_boundary() {
        let mut buf = Vec::new();
        // two words, one on each side of the 0x4000-word boundary
        segment_output(BANK_WORDS - 1, 2, &[0xaa, 0xbb], true, true, &mut buf).unwrap();
        let text = String::from_utf8(buf).unwrap();
        assert_eq!(
            text,
            format!(
                "{:08x}\n{:08x}\n000000aa\n{:08x}\n{:08x}\n000000bb\n",
                BANK_WORDS - 1,
                1,
                BANK_WORDS,
                1
            )
        );
    }

    #[test]
    fn meta_region_segments_are_dropped() {
        let mut visitor = MemoryVisitor::default();
        visitor.add_segment(MEM_SIZE, 16);
        assert!(visitor.is_empty());
        visitor.add_segment(0, 16);
        assert!(!visitor.is_empty());
    }
}
