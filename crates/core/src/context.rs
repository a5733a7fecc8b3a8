//! Per-fabric shared state and the single primitive dispatch path.

use crate::block::DataBlock;
use crate::identity::Id;
use crate::memory::VirtualMemory;
use crate::noc::Noc;
use crate::primitive::Primitive;
use crate::SimResult;
use tilesim_config::RunOptions;

pub struct Context {
    memory: VirtualMemory,
    network: Noc,
    /// Steps the whole program runs for. Read-only after build.
    pub n_step: u32,
    seed: i32,
    options: RunOptions,
}

impl Context {
    pub fn new(n_step: u32, seed: i32, options: RunOptions) -> Self {
        Context {
            memory: VirtualMemory::new(),
            network: Noc::new(),
            n_step,
            seed,
            options,
        }
    }

    pub fn vmem(&self) -> &VirtualMemory {
        &self.memory
    }

    pub fn noc(&self) -> &Noc {
        &self.network
    }

    pub fn seed(&self) -> i32 {
        self.seed
    }

    pub fn options(&self) -> &RunOptions {
        &self.options
    }

    pub fn read(&self, core_id: &Id, address: usize, length: usize) -> SimResult<Vec<u8>> {
        self.memory.read(core_id, address, length)
    }

    pub fn init_data_block(&self, block: &DataBlock) -> SimResult<()> {
        self.memory.init_memory_block(block)
    }

    pub fn read_memory_block(&self, block_id: &Id) -> SimResult<DataBlock> {
        self.memory.read_memory_block(block_id)
    }

    pub fn write_memory_block(&self, block: &DataBlock) -> SimResult<()> {
        self.memory.write_memory_block(block)
    }

    /// Dispatches one primitive: read its inputs and current outputs from
    /// virtual memory, run the opcode (routers spin on the NoC until
    /// `Success`, yielding the thread between attempts), then write every
    /// output block back.
    pub fn execute(&self, core_id: &Id, pi: Option<&Primitive>, phase: u32) -> SimResult<()> {
        let Some(pi) = pi else {
            return Ok(());
        };

        let mut inputs = Vec::with_capacity(pi.inputs().len());
        for id in pi.inputs() {
            inputs.push(self.memory.read_memory_block(id)?);
        }
        let mut outputs = Vec::with_capacity(pi.outputs().len());
        for id in pi.outputs() {
            outputs.push(self.memory.read_memory_block(id)?);
        }

        if let Some(para) = pi.router_params() {
            loop {
                let state = self
                    .network
                    .route(core_id, &inputs, &mut outputs, para, phase)?;
                if state.is_success() {
                    break;
                }
                std::thread::yield_now();
            }
        } else {
            pi.execute(&inputs, &mut outputs)?;
        }

        for block in &outputs {
            self.memory.write_memory_block(block)?;
        }
        Ok(())
    }
}
