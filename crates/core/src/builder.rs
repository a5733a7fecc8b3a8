//! Builds the `ChipArray -> Chip -> Core -> PiGroup` tree from a parsed
//! instruction descriptor. Everything is constructed once here; the
//! topology never changes afterwards.

use crate::block::{bytes_of_words, DataBlock};
use crate::chip::{Chip, ChipArray};
use crate::context::Context;
use crate::core::{Core, PiGroup};
use crate::identity::Id;
use crate::io::{Request, RequestKind};
use crate::packet::{HeadAdvanced, HeadBase, HeadFlags, PacketKind};
use crate::primitive::router::{BroadcastKind, RouterParams};
use crate::primitive::{axon, soma, PiKind, PiParams, Precision, Primitive};
use crate::{SimError, SimResult};
use tilesim_config::{
    BlockConfig, CoreConfig, Descriptor, IoBlockConfig, IoKind, PiConfig, RunOptions,
};
use tracing::{debug, info};

pub struct Simulator {
    context: Context,
    chip_array: ChipArray,
}

impl Simulator {
    /// Constructs the full component tree. Fails with `Parse` on any
    /// semantic hole in the descriptor; nothing runs until `simulate`.
    pub fn build(desc: &Descriptor, options: RunOptions) -> SimResult<Self> {
        let context = Context::new(desc.n_step.max(1), desc.seed, options.clone());
        let mut chip_array = ChipArray::new("ChipArray1");

        for chip_cfg in &desc.chips {
            let mut chip = Chip::new(chip_array.id(), chip_cfg.x, chip_cfg.y, chip_cfg.step_group_id);
            for core_cfg in &chip_cfg.cores {
                let core = build_core(&context, chip.id(), core_cfg, &options)?;
                chip.add_core(core);
            }
            chip_array.add_chip(chip);
        }

        let mut sim = Simulator {
            context,
            chip_array,
        };
        for blk in &desc.static_blocks {
            sim.attach_input_block(blk)?;
        }
        for blk in &desc.dynamic_blocks {
            if blk.io_type == IoKind::OutputData {
                sim.attach_output_block(blk)?;
            } else {
                sim.attach_input_block(blk)?;
            }
        }
        info!(
            chips = desc.chips.len(),
            n_step = sim.context.n_step,
            "simulator tree built"
        );
        Ok(sim)
    }

    /// Runs the program to completion.
    pub fn simulate(&self) -> SimResult<()> {
        self.chip_array.execute(&self.context)
    }

    pub fn context(&self) -> &Context {
        &self.context
    }

    pub fn chip_array(&self) -> &ChipArray {
        &self.chip_array
    }

    fn locate_core(&mut self, blk: &IoBlockConfig) -> SimResult<&mut Core> {
        let chip_id = Id::chip(
            &Id::chip_array("ChipArray1"),
            blk.chip_x,
            blk.chip_y,
        );
        let core_id = Id::core(&chip_id, blk.core_x, blk.core_y);
        self.chip_array
            .chip_mut(&chip_id)
            .and_then(|chip| chip.core_mut(&core_id))
            .ok_or_else(|| {
                SimError::Parse(format!("IO block '{}' names unknown core {core_id}", blk.id))
            })
    }

    fn attach_input_block(&mut self, blk: &IoBlockConfig) -> SimResult<()> {
        let seed = self.context.seed();
        let case_name = self.context.options().case_name.clone();
        let core = self.locate_core(blk)?;
        let core_id = core.id().clone();
        let block_id = Id::data_block(&core_id, &blk.id);
        let request = Request {
            request_type: match blk.io_type {
                IoKind::StaticData => RequestKind::StaticData,
                _ => RequestKind::DynamicInput,
            },
            id: block_id.text().to_string(),
            block_id: blk.start_addr,
            phase_id: 0,
            seed,
            precision: blk.precision,
            shape: blk.shape.clone(),
            block_size: blk.length as usize,
            begin_position: blk.begin_position.clone(),
            socket_id: 0,
            nth: -1,
            total_blocks: blk.socket_count as i32,
            case_name,
            storage_path: "behavior_out".to_string(),
            data: Vec::new(),
        };
        // input data always lands before the first phase runs
        core.client_mut().add_input_request(0, block_id.clone(), request);

        if self.context.vmem().block(&block_id).is_err() {
            let placeholder = DataBlock::new(
                &core_id,
                &blk.id,
                None,
                blk.start_addr as usize * 4,
                blk.length as usize * 4,
            );
            self.context.init_data_block(&placeholder)?;
        }
        Ok(())
    }

    fn attach_output_block(&mut self, blk: &IoBlockConfig) -> SimResult<()> {
        let seed = self.context.seed();
        let case_name = self.context.options().case_name.clone();
        let core = self.locate_core(blk)?;
        // outputs declared for phase N are collected after phase N-1 fires
        let phase = blk.phases.first().copied().unwrap_or(1).saturating_sub(1);
        core.visitor_mut(phase).add_named_segment(
            blk.start_addr as usize * 4,
            blk.length as usize * 4,
            &blk.id,
        );
        let request = Request {
            request_type: RequestKind::OutputData,
            id: blk.id.clone(),
            block_id: blk.start_addr,
            phase_id: phase,
            seed,
            precision: blk.precision,
            shape: blk.shape.clone(),
            block_size: blk.length as usize,
            begin_position: blk.begin_position.clone(),
            socket_id: 0,
            nth: -1,
            total_blocks: blk.socket_count as i32,
            case_name,
            storage_path: "behavior_out".to_string(),
            data: Vec::new(),
        };
        core.client_mut().add_output_request(phase, request);
        Ok(())
    }
}

fn build_core(
    ctx: &Context,
    chip_id: &Id,
    cfg: &CoreConfig,
    options: &RunOptions,
) -> SimResult<Core> {
    let mut core = Core::new(chip_id, cfg.x, cfg.y, cfg.phase_group_id, options.streamer_port);
    for (phase, group_cfg) in cfg.pi_groups.iter().enumerate() {
        let phase = phase as u32;
        let mut group = PiGroup::new();
        group.set_axon(build_pi(ctx, &mut core, group_cfg.axon.as_ref(), phase)?);
        group.set_soma1(build_pi(ctx, &mut core, group_cfg.soma1.as_ref(), phase)?);
        group.set_router(build_pi(ctx, &mut core, group_cfg.router.as_ref(), phase)?);
        group.set_soma2(build_pi(ctx, &mut core, group_cfg.soma2.as_ref(), phase)?);
        core.add_pi_group(group);
    }
    debug!(core = %core.id(), groups = core.pi_groups().len(), "core configured");
    Ok(core)
}

fn build_pi(
    ctx: &Context,
    core: &mut Core,
    cfg: Option<&PiConfig>,
    phase: u32,
) -> SimResult<Option<Primitive>> {
    let Some(cfg) = cfg else {
        return Ok(None);
    };

    if cfg.pic == 0x09 {
        return build_router_pi(ctx, core, cfg, phase).map(Some);
    }

    let (kind, params) = match cfg.pic {
        0x02 => (
            PiKind::Axon,
            PiParams::Pool(axon::PoolParams {
                precision: Precision::from_code(cfg.x1_precision)?,
                bias_type: cfg.bias_type,
                constant_b: cfg.constant_b,
                niy: cfg.niy as usize,
                nix: cfg.nix as usize,
                nif: cfg.nif as usize,
                nky: cfg.nky as usize,
                nkx: cfg.nkx as usize,
                stride_y: cfg.stride_y as usize,
                stride_x: cfg.stride_x as usize,
                pad_top: cfg.pad_top as usize,
                pad_down: cfg.pad_down as usize,
                pad_left: cfg.pad_left as usize,
                pad_right: cfg.pad_right as usize,
                avg_pooling_en: cfg.avg_pooling_en,
            }),
        ),
        0x03 => (
            PiKind::Axon,
            PiParams::ElemMac(axon::ElemMacParams {
                tensor_en: cfg.tensor_en,
                precision: Precision::from_code(cfg.x1_precision)?,
                bias_type: cfg.bias_type,
                constant_b: cfg.constant_b,
                ny: cfg.ny as usize,
                nx: cfg.nx as usize,
                stride_y: cfg.stride_y as usize,
                stride_x: cfg.stride_x as usize,
                n_branch: cfg.n_branch as usize,
                nif: cfg.nif as usize,
            }),
        ),
        0x04 => (
            PiKind::Axon,
            PiParams::Mac(axon::MacParams {
                x1_precision: Precision::from_code(cfg.x1_precision)?,
                x2_precision: Precision::from_code(cfg.x2_precision)?,
                bias_type: cfg.bias_type,
                constant_b: cfg.constant_b,
                nif: cfg.nif as usize,
                nof: cfg.nof as usize,
            }),
        ),
        0x41 => (
            PiKind::Axon,
            PiParams::Conv(axon::ConvParams {
                x1_precision: Precision::from_code(cfg.x1_precision)?,
                x2_precision: Precision::from_code(cfg.x2_precision)?,
                bias_type: cfg.bias_type,
                constant_b: cfg.constant_b,
                niy: cfg.niy as usize,
                nix: cfg.nix as usize,
                nif: cfg.nif as usize,
                nof: cfg.nof as usize,
                nky: cfg.nky as usize,
                nkx: cfg.nkx as usize,
                stride_y: cfg.stride_y as usize,
                stride_x: cfg.stride_x as usize,
                pad_top: cfg.pad_top as usize,
                pad_down: cfg.pad_down as usize,
                pad_left: cfg.pad_left as usize,
                pad_right: cfg.pad_right as usize,
                dilate_y: cfg.dilate_y as usize,
                dilate_x: cfg.dilate_x as usize,
            }),
        ),
        0x05 => (
            PiKind::Soma,
            PiParams::MaxPool(soma::MaxPoolParams {
                precision: Precision::from_code(cfg.x1_precision)?,
                out_precision: Precision::from_code(cfg.out_precision)?,
                niy: cfg.niy as usize,
                nix: cfg.nix as usize,
                nif: cfg.nif as usize,
                nky: cfg.nky as usize,
                nkx: cfg.nkx as usize,
                stride_y: cfg.stride_y as usize,
                stride_x: cfg.stride_x as usize,
                pad_top: cfg.pad_top as usize,
                pad_down: cfg.pad_down as usize,
                pad_left: cfg.pad_left as usize,
                pad_right: cfg.pad_right as usize,
                compare_init: (cfg.compare_init & 0xffff_ffff) as u32 as i32,
                bit_shift_num: cfg.bit_shift_num,
            }),
        ),
        0x06 => (
            PiKind::Soma,
            PiParams::Move(soma::MoveParams {
                precision: Precision::from_code(cfg.x1_precision)?,
                out_precision: Precision::from_code(cfg.out_precision)?,
                length_in: cfg.length_in as usize,
                length_out: cfg.length_out as usize,
                num_in: cfg.num_in as usize,
                num_out: cfg.num_out as usize,
                bit_shift_num: cfg.bit_shift_num,
                real_num_in: if cfg.real_length_in_en {
                    cfg.real_num_in as usize
                } else {
                    0
                },
            }),
        ),
        0x07 => (
            PiKind::Soma,
            PiParams::Lut(soma::LutParams {
                precision: Precision::from_code(cfg.x1_precision)?,
                group_num: cfg.group_num as usize,
                neuron_real_num: cfg.neuron_real_num as usize,
                lut_data_width: cfg.lut_data_width as usize,
                bit_shift_num: cfg.bit_shift_num,
            }),
        ),
        0x08 => (
            PiKind::Soma,
            PiParams::Lif(soma::LifParams {
                neuron_num: cfg.neuron_num as usize,
                group_num: cfg.group_num as usize,
                vth0: cfg.vth0,
                vr: cfg.vr,
                vl: cfg.vl,
                dv: cfg.dv,
                vinit: cfg.vinit,
                reset_mode: cfg.reset_mode,
                fire_type: cfg.fire_type,
            }),
        ),
        other => {
            return Err(SimError::Parse(format!("unknown primitive opcode {other:#x}")));
        }
    };

    let mut prim = Primitive::new(kind, params);
    config_data_blocks(ctx, core, &mut prim, &cfg.data_blocks, phase)?;
    Ok(Some(prim))
}

fn build_router_pi(
    ctx: &Context,
    core: &mut Core,
    cfg: &PiConfig,
    phase: u32,
) -> SimResult<Primitive> {
    let broadcast = match cfg.multicast_relay_or_not {
        0 => BroadcastKind::Normal,
        1 => BroadcastKind::Multicast,
        2 => BroadcastKind::Relay,
        other => {
            return Err(SimError::Parse(format!(
                "unknown multicast_relay_or_not value {other}"
            )));
        }
    };
    let para = RouterParams {
        broadcast,
        dx: cfg.dx,
        dy: cfg.dy,
        multicast_relay_num: if broadcast == BroadcastKind::Normal {
            0
        } else {
            cfg.relay_packets_num as usize + 1
        },
        received_stop_num: cfg.received_stop_num as usize + 1,
        packet_kind: if cfg.header_multipack == 1 {
            PacketKind::Multi
        } else {
            PacketKind::Single
        },
        send_en: cfg.send_en,
        recv_en: cfg.recv_en,
        recv_address: cfg.recv_address as usize * 4,
        din_length: cfg.din_length as usize * 4,
        recv_end_phase: cfg.recv_end_phase,
    };

    let mut prim = Primitive::new(PiKind::Router, PiParams::Router(para));
    config_router_blocks(ctx, core, &mut prim, &cfg.data_blocks)?;
    if cfg.recv_en {
        if let Some(seg) = &cfg.output_seg {
            core.visitor_mut(phase)
                .add_segment(seg.start as usize * 4, seg.length as usize * 4);
        }
    }
    Ok(prim)
}

/// Declares a router PI's blocks: baked-in packet headers (4 or 8 bytes on
/// the wire), payload slots, and plain init data.
fn config_router_blocks(
    ctx: &Context,
    core: &mut Core,
    prim: &mut Primitive,
    blocks: &[BlockConfig],
) -> SimResult<()> {
    let core_id = core.id().clone();
    for block in blocks {
        let start = block.start as usize * 4;
        if block.init {
            let words = block.data.clone().unwrap_or_default();
            let data = bytes_of_words(&words);
            let name = block.id.clone().unwrap_or_else(|| format!("init_{}", block.start));
            let declared = DataBlock::new(&core_id, &name, Some(data), start, words.len() * 4);
            ctx.init_data_block(&declared)?;
            continue;
        }
        if block.is_header() {
            let base = HeadBase {
                flags: head_flags(block),
                x: block.x.unwrap_or(0) as i8,
                y: block.y.unwrap_or(0) as i8,
                a: block.a.unwrap_or(0) as u16,
            };
            let (bytes, length): (Vec<u8>, usize) = if let Some(en) = block.en {
                let adv = HeadAdvanced {
                    base,
                    pack_per_rhead: block.pack_per_rhead.unwrap_or(0) as u16,
                    a_offset: block.a_offset.unwrap_or(0) as u16,
                    const_num: block.const_num.unwrap_or(0) as u8,
                    en: en != 0,
                };
                let [lo, hi] = adv.encode();
                let mut b = lo.to_le_bytes().to_vec();
                b.extend_from_slice(&hi.to_le_bytes());
                (b, 8)
            } else {
                (base.encode().to_le_bytes().to_vec(), 4)
            };
            let name = format!("packet_header_{}", block.start);
            let declared = DataBlock::new(&core_id, &name, Some(bytes.into()), start, length);
            ctx.init_data_block(&declared)?;
            prim.add_input(declared.id().clone());
            continue;
        }

        let length = block.length.unwrap_or(0) as usize * 4;
        let name = block
            .id
            .clone()
            .unwrap_or_else(|| format!("data_packet_{}", block.start));
        let declared = if let Some(source) = &block.input_source_id {
            let size = block.size.map(|s| s as usize * 4).unwrap_or(length);
            DataBlock::view(
                &core_id,
                &name,
                start,
                length,
                size,
                Id::data_block(&core_id, source),
            )
        } else if let Some(words) = &block.data {
            DataBlock::new(&core_id, &name, Some(bytes_of_words(words)), start, length)
        } else {
            DataBlock::new(&core_id, &name, None, start, length)
        };
        ctx.init_data_block(&declared)?;
        prim.add_input(declared.id().clone());
    }
    Ok(())
}

/// Declares a compute PI's blocks. Output blocks whose declared length is
/// shorter than what the opcode produces become pipelined
/// (`size > length`); inputs may be baked data, placeholders, or views
/// onto an upstream producer.
fn config_data_blocks(
    ctx: &Context,
    core: &mut Core,
    prim: &mut Primitive,
    blocks: &[BlockConfig],
    phase: u32,
) -> SimResult<()> {
    let core_id = core.id().clone();
    let out_lens = prim.output_lens();
    let mut output_cnt = 0usize;

    for block in blocks {
        let start = block.start as usize * 4;
        let name = block
            .id
            .clone()
            .unwrap_or_else(|| format!("blk_{}_{}", phase, block.start));

        if block.direction_out {
            let produced = out_lens.get(output_cnt).copied().unwrap_or(0);
            let declared_len = block.length.map(|l| l as usize * 4).unwrap_or(produced);
            let out = if produced > declared_len {
                DataBlock::with_size(&core_id, &name, None, start, declared_len, produced)
            } else {
                DataBlock::new(&core_id, &name, None, start, declared_len)
            };
            let print_len = block
                .print_length
                .map(|l| l as usize * 4)
                .unwrap_or(declared_len);
            core.visitor_mut(phase).add_named_segment(start, print_len, &name);
            ctx.init_data_block(&out)?;
            prim.add_output(out.id().clone());
            output_cnt += 1;
            continue;
        }

        if let Some(source) = &block.input_source_id {
            let length = block
                .length
                .ok_or_else(|| {
                    SimError::Parse(format!("view block '{name}' needs an explicit length"))
                })? as usize
                * 4;
            let size = block.size.map(|s| s as usize * 4).unwrap_or(length);
            let view = DataBlock::view(
                &core_id,
                &name,
                start,
                length,
                size,
                Id::data_block(&core_id, source),
            );
            ctx.init_data_block(&view)?;
            prim.add_input(view.id().clone());
            continue;
        }

        match &block.data {
            Some(words) => {
                let length = block
                    .length
                    .map(|l| l as usize * 4)
                    .unwrap_or(words.len() * 4);
                let declared =
                    DataBlock::new(&core_id, &name, Some(bytes_of_words(words)), start, length);
                ctx.init_data_block(&declared)?;
                if !block.init {
                    prim.add_input(declared.id().clone());
                }
            }
            None => {
                let length = block.length.unwrap_or(0) as usize * 4;
                let declared = DataBlock::new(&core_id, &name, None, start, length);
                ctx.init_data_block(&declared)?;
                prim.add_input(declared.id().clone());
            }
        }
    }
    Ok(())
}

fn head_flags(block: &BlockConfig) -> HeadFlags {
    let mut flags = HeadFlags::empty();
    if block.s.unwrap_or(0) != 0 {
        flags |= HeadFlags::INSTANT;
    }
    if block.t.unwrap_or(0) != 0 {
        flags |= HeadFlags::MULTI;
    }
    if block.p.unwrap_or(0) != 0 {
        flags |= HeadFlags::STOP;
    }
    if block.q.unwrap_or(0) != 0 {
        flags |= HeadFlags::RELAY;
    }
    flags
}
