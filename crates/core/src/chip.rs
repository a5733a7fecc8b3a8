//! The parallel fan-out tree: a chip spawns one thread per core, the chip
//! array one thread per chip, each level joining its children before
//! returning. A single child runs inline on the calling thread.

use crate::context::Context;
use crate::core::Core;
use crate::identity::Id;
use crate::{SimError, SimResult};
use std::collections::BTreeMap;
use std::thread::ScopedJoinHandle;
use tracing::debug;

pub struct Chip {
    id: Id,
    step_group_id: u32,
    cores: BTreeMap<Id, Core>,
}

impl Chip {
    pub fn new(chip_array_id: &Id, x: u32, y: u32, step_group_id: u32) -> Self {
        Chip {
            id: Id::chip(chip_array_id, x, y),
            step_group_id,
            cores: BTreeMap::new(),
        }
    }

    pub fn id(&self) -> &Id {
        &self.id
    }

    pub fn step_group_id(&self) -> u32 {
        self.step_group_id
    }

    pub fn add_core(&mut self, core: Core) {
        self.cores.insert(core.id().clone(), core);
    }

    pub fn core_mut(&mut self, id: &Id) -> Option<&mut Core> {
        self.cores.get_mut(id)
    }

    pub fn cores(&self) -> impl Iterator<Item = &Core> {
        self.cores.values()
    }

    pub fn execute(&self, ctx: &Context) -> SimResult<()> {
        debug!(chip = %self.id, "execute in chip");
        if self.cores.len() > 1 {
            std::thread::scope(|scope| {
                let handles: Vec<_> = self
                    .cores
                    .values()
                    .map(|core| scope.spawn(move || core.execute(ctx)))
                    .collect();
                join_first_failure(handles)
            })
        } else if let Some(core) = self.cores.values().next() {
            core.execute(ctx)
        } else {
            Ok(())
        }
    }
}

pub struct ChipArray {
    id: Id,
    chips: BTreeMap<Id, Chip>,
}

impl ChipArray {
    pub fn new(name: &str) -> Self {
        ChipArray {
            id: Id::chip_array(name),
            chips: BTreeMap::new(),
        }
    }

    pub fn id(&self) -> &Id {
        &self.id
    }

    pub fn add_chip(&mut self, chip: Chip) {
        self.chips.insert(chip.id().clone(), chip);
    }

    pub fn chip_mut(&mut self, id: &Id) -> Option<&mut Chip> {
        self.chips.get_mut(id)
    }

    pub fn chips(&self) -> impl Iterator<Item = &Chip> {
        self.chips.values()
    }

    /// Runs the whole fabric to completion: the natural join barrier at
    /// each tree level is the program's only global synchronisation.
    pub fn execute(&self, ctx: &Context) -> SimResult<()> {
        debug!(array = %self.id, "execute in chip array");
        if self.chips.len() > 1 {
            std::thread::scope(|scope| {
                let handles: Vec<_> = self
                    .chips
                    .values()
                    .map(|chip| scope.spawn(move || chip.execute(ctx)))
                    .collect();
                join_first_failure(handles)
            })
        } else if let Some(chip) = self.chips.values().next() {
            chip.execute(ctx)
        } else {
            Ok(())
        }
    }
}

/// Joins every handle; the first failure wins, and a panicked child
/// surfaces as an invariant violation.
fn join_first_failure(handles: Vec<ScopedJoinHandle<'_, SimResult<()>>>) -> SimResult<()> {
    let mut first_err = None;
    for handle in handles {
        match handle.join() {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                if first_err.is_none() {
                    first_err = Some(e);
                }
            }
            Err(_) => {
                if first_err.is_none() {
                    first_err = Some(SimError::Invariant("worker thread panicked".to_string()));
                }
            }
        }
    }
    match first_err {
        None => Ok(()),
        Some(e) => Err(e),
    }
}
