//! One tile of the accelerator: a sequencer driving its phase groups for
//! `n_step` steps, with per-phase output serialisation or streaming.

use crate::context::Context;
use crate::identity::Id;
use crate::io::StreamerClient;
use crate::primitive::{PiKind, Primitive};
use crate::visitor::MemoryVisitor;
use crate::SimResult;
use std::collections::HashMap;
use tilesim_config::TestMode;
use tracing::debug;

/// Up to four primitives scheduled in fixed order within one phase.
/// Missing slots are skipped silently.
#[derive(Debug, Clone, Default)]
pub struct PiGroup {
    axon: Option<Primitive>,
    soma1: Option<Primitive>,
    router: Option<Primitive>,
    soma2: Option<Primitive>,
}

impl PiGroup {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_axon(&mut self, pi: Option<Primitive>) {
        if let Some(pi) = &pi {
            assert_eq!(pi.kind(), PiKind::Axon);
        }
        self.axon = pi;
    }

    pub fn set_soma1(&mut self, pi: Option<Primitive>) {
        if let Some(pi) = &pi {
            assert_eq!(pi.kind(), PiKind::Soma);
        }
        self.soma1 = pi;
    }

    pub fn set_router(&mut self, pi: Option<Primitive>) {
        if let Some(pi) = &pi {
            assert_eq!(pi.kind(), PiKind::Router);
        }
        self.router = pi;
    }

    pub fn set_soma2(&mut self, pi: Option<Primitive>) {
        if let Some(pi) = &pi {
            assert_eq!(pi.kind(), PiKind::Soma);
        }
        self.soma2 = pi;
    }

    pub fn axon(&self) -> Option<&Primitive> {
        self.axon.as_ref()
    }

    pub fn soma1(&self) -> Option<&Primitive> {
        self.soma1.as_ref()
    }

    pub fn router(&self) -> Option<&Primitive> {
        self.router.as_ref()
    }

    pub fn soma2(&self) -> Option<&Primitive> {
        self.soma2.as_ref()
    }

    /// The slots in dispatch order.
    pub fn in_order(&self) -> [Option<&Primitive>; 4] {
        [
            self.axon.as_ref(),
            self.soma1.as_ref(),
            self.router.as_ref(),
            self.soma2.as_ref(),
        ]
    }
}

pub struct Core {
    id: Id,
    x: u32,
    y: u32,
    phase_group_id: u32,
    pi_groups: Vec<PiGroup>,
    visitors: HashMap<u32, MemoryVisitor>,
    client: StreamerClient,
}

impl Core {
    pub fn new(chip_id: &Id, x: u32, y: u32, phase_group_id: u32, streamer_port: u16) -> Self {
        let id = Id::core(chip_id, x, y);
        let client = StreamerClient::new(id.clone(), streamer_port);
        Core {
            id,
            x,
            y,
            phase_group_id,
            pi_groups: Vec::new(),
            visitors: HashMap::new(),
            client,
        }
    }

    pub fn id(&self) -> &Id {
        &self.id
    }

    pub fn add_pi_group(&mut self, group: PiGroup) {
        self.pi_groups.push(group);
    }

    pub fn pi_groups(&self) -> &[PiGroup] {
        &self.pi_groups
    }

    /// The visitor collecting output segments for `phase`, created on
    /// first touch. Build-time only.
    pub fn visitor_mut(&mut self, phase: u32) -> &mut MemoryVisitor {
        self.visitors.entry(phase).or_default()
    }

    pub fn client_mut(&mut self) -> &mut StreamerClient {
        &mut self.client
    }

    /// Runs the whole program on this core: `n_step` sweeps over the phase
    /// groups, dispatching axon, soma1, router, soma2 in order. The first
    /// step starts by pulling declared input data in; each phase ends by
    /// either streaming outputs out or dumping the visitor's segments.
    pub fn execute(&self, ctx: &Context) -> SimResult<()> {
        debug!(core = %self.id, "execute in core");
        let (chip_x, chip_y) = self.id.chip_xy();

        for step in 0..ctx.n_step {
            let mut phase: u32 = 0;
            if step == 0 {
                self.client.do_irequest(ctx, 0)?;
            }
            for group in &self.pi_groups {
                for pi in group.in_order() {
                    ctx.execute(&self.id, pi, phase)?;
                }

                if ctx.options().test_mode == TestMode::CaseOutput {
                    self.client.do_orequest(ctx, phase)?;
                } else if let Some(visitor) = self.visitors.get(&phase) {
                    // phases with no registered visitor emit nothing
                    visitor.serialize(
                        &self.id,
                        chip_x,
                        chip_y,
                        self.phase_group_id,
                        self.x,
                        self.y,
                        step,
                        phase,
                        ctx,
                    )?;
                }

                phase += 1;
            }
        }
        Ok(())
    }
}
