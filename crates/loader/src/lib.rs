//! Loads and sanity-checks an instruction descriptor from disk. Parsing
//! happens exactly once, before any worker thread exists.

use anyhow::{bail, Context, Result};
use std::path::Path;
use tilesim_config::Descriptor;
use tracing::{debug, info, warn};

pub fn load_descriptor(path: &Path) -> Result<Descriptor> {
    let raw = std::fs::read(path)
        .with_context(|| format!("Failed to read descriptor file: {:?}", path))?;
    let desc: Descriptor =
        serde_json::from_slice(&raw).context("Failed to parse instruction descriptor")?;

    validate(&desc)?;

    info!(
        chips = desc.chips.len(),
        n_step = desc.n_step,
        static_blocks = desc.static_blocks.len(),
        dynamic_blocks = desc.dynamic_blocks.len(),
        "descriptor loaded"
    );
    Ok(desc)
}

fn validate(desc: &Descriptor) -> Result<()> {
    if desc.chips.is_empty() {
        bail!("descriptor declares no chips");
    }
    for chip in &desc.chips {
        if chip.cores.is_empty() {
            bail!("chip ({}, {}) declares no cores", chip.x, chip.y);
        }
        for core in &chip.cores {
            if core.pi_groups.is_empty() {
                warn!(
                    "core ({}, {}) on chip ({}, {}) has no phase groups",
                    core.x, core.y, chip.x, chip.y
                );
            }
            debug!(
                core_x = core.x,
                core_y = core.y,
                groups = core.pi_groups.len(),
                "core descriptor"
            );
        }
    }
    Ok(())
}
