//! Soma opcodes: the cell-body side of a phase. Same layout and
//! saturation conventions as the axon opcodes.

use super::{align_up, input, store_output, unpack_lanes, Precision};
use crate::block::DataBlock;
use crate::{saturate, SimResult};

/// 0x05: max pooling. Every window starts from `compare_init` and the
/// winner is arithmetic-shifted right before storing.
#[derive(Debug, Clone)]
pub struct MaxPoolParams {
    pub precision: Precision,
    pub out_precision: Precision,
    pub niy: usize,
    pub nix: usize,
    pub nif: usize,
    pub nky: usize,
    pub nkx: usize,
    pub stride_y: usize,
    pub stride_x: usize,
    pub pad_top: usize,
    pub pad_down: usize,
    pub pad_left: usize,
    pub pad_right: usize,
    pub compare_init: i32,
    pub bit_shift_num: u32,
}

impl MaxPoolParams {
    pub fn nf_pad(&self) -> usize {
        align_up(self.nif.max(1), self.precision.lanes())
    }

    pub fn out_dims(&self) -> (usize, usize) {
        let noy = (self.niy + self.pad_top + self.pad_down).saturating_sub(self.nky)
            / self.stride_y.max(1)
            + 1;
        let nox = (self.nix + self.pad_left + self.pad_right).saturating_sub(self.nkx)
            / self.stride_x.max(1)
            + 1;
        (noy, nox)
    }

    pub fn output_len(&self) -> usize {
        let (noy, nox) = self.out_dims();
        noy * nox * self.nf_pad() * 4
    }
}

pub fn max_pool(p: &MaxPoolParams, inputs: &[DataBlock], outputs: &mut [DataBlock]) -> SimResult<()> {
    let nf = p.nf_pad();
    let x = unpack_lanes(input(inputs, 0)?.bytes(), p.precision, p.niy * p.nix * nf);
    let (noy, nox) = p.out_dims();
    let shift = p.bit_shift_num.min(31);

    let mut out = vec![0i32; noy * nox * nf];
    for oy in 0..noy {
        for ox in 0..nox {
            for f in 0..nf {
                let mut best = p.compare_init;
                for ky in 0..p.nky {
                    for kx in 0..p.nkx {
                        let iy = (oy * p.stride_y.max(1) + ky) as isize - p.pad_top as isize;
                        let ix = (ox * p.stride_x.max(1) + kx) as isize - p.pad_left as isize;
                        if iy < 0 || ix < 0 || iy >= p.niy as isize || ix >= p.nix as isize {
                            continue;
                        }
                        best = best.max(x[(iy as usize * p.nix + ix as usize) * nf + f]);
                    }
                }
                out[(oy * nox + ox) * nf + f] = best >> shift;
            }
        }
    }
    store_output(outputs, 0, &out)
}

/// 0x06: block mover: unpacks `num_in` rows of `length_in` words,
/// arithmetic-shifts every element, re-emits `num_out` rows of
/// `length_out` words (truncating or zero-padding).
#[derive(Debug, Clone)]
pub struct MoveParams {
    pub precision: Precision,
    pub out_precision: Precision,
    pub length_in: usize,
    pub length_out: usize,
    pub num_in: usize,
    pub num_out: usize,
    pub bit_shift_num: u32,
    pub real_num_in: usize,
}

impl MoveParams {
    fn rows_in(&self) -> usize {
        if self.real_num_in > 0 {
            self.real_num_in
        } else {
            self.num_in.max(1)
        }
    }

    pub fn output_len(&self) -> usize {
        self.num_out.max(1) * self.length_out.max(1) * 4
    }
}

pub fn move_block(p: &MoveParams, inputs: &[DataBlock], outputs: &mut [DataBlock]) -> SimResult<()> {
    let in_elems = p.rows_in() * p.length_in.max(1) * p.precision.lanes();
    let x = unpack_lanes(input(inputs, 0)?.bytes(), p.precision, in_elems);
    let shift = p.bit_shift_num.min(31);

    let out_words = p.num_out.max(1) * p.length_out.max(1);
    let mut out = vec![0i32; out_words];
    for (slot, value) in out.iter_mut().zip(x.iter()) {
        *slot = value >> shift;
    }
    store_output(outputs, 0, &out)
}

/// 0x07: LUT activation: each element indexes the table after a shift;
/// indexes clamp into the table.
#[derive(Debug, Clone)]
pub struct LutParams {
    pub precision: Precision,
    pub group_num: usize,
    pub neuron_real_num: usize,
    pub lut_data_width: usize,
    pub bit_shift_num: u32,
}

impl LutParams {
    pub fn elements(&self) -> usize {
        self.group_num.max(1) * self.neuron_real_num.max(1)
    }

    pub fn output_len(&self) -> usize {
        self.elements() * 4
    }
}

pub fn lut(p: &LutParams, inputs: &[DataBlock], outputs: &mut [DataBlock]) -> SimResult<()> {
    let x = unpack_lanes(input(inputs, 0)?.bytes(), p.precision, p.elements());
    let table = input(inputs, 1)?.words();
    let shift = p.bit_shift_num.min(31);

    let mut out = vec![0i32; p.elements()];
    for (slot, value) in out.iter_mut().zip(x.iter()) {
        let idx = (value >> shift).clamp(0, table.len().saturating_sub(1) as i32) as usize;
        *slot = *table.get(idx).unwrap_or(&0) as i32;
    }
    store_output(outputs, 0, &out)
}

/// 0x08: LIF neuron: integrate the input current, fire on threshold,
/// reset per `reset_mode`, floor at the leak potential.
#[derive(Debug, Clone)]
pub struct LifParams {
    pub neuron_num: usize,
    pub group_num: usize,
    pub vth0: i32,
    /// Reset potential (reset_mode 0).
    pub vr: i32,
    /// Lower clamp of the membrane potential.
    pub vl: i32,
    /// Constant leak added every update.
    pub dv: i32,
    pub vinit: i32,
    /// 0: jump to `vr`; 1: subtract `vth0`; 2: hold.
    pub reset_mode: u32,
    /// 0: binary spikes; otherwise the pre-reset potential is emitted.
    pub fire_type: u32,
}

impl LifParams {
    pub fn neurons(&self) -> usize {
        self.neuron_num.max(1) * self.group_num.max(1)
    }

    /// Two outputs: the spike vector and the updated membrane vector.
    pub fn output_lens(&self) -> Vec<usize> {
        vec![self.neurons() * 4, self.neurons() * 4]
    }
}

pub fn lif(p: &LifParams, inputs: &[DataBlock], outputs: &mut [DataBlock]) -> SimResult<()> {
    let n = p.neurons();
    let u = unpack_lanes(input(inputs, 0)?.bytes(), Precision::Int32, n);
    let v_block = inputs.get(1);
    let v_prev: Vec<i32> = match v_block {
        Some(block) if !block.bytes().is_empty() => unpack_lanes(block.bytes(), Precision::Int32, n),
        _ => vec![p.vinit; n],
    };

    let mut spikes = vec![0i32; n];
    let mut v_next = vec![0i32; n];
    for i in 0..n {
        let mut v = saturate(v_prev[i] as i64 + u[i] as i64 + p.dv as i64);
        let fired = v >= p.vth0;
        if fired {
            spikes[i] = if p.fire_type == 0 { 1 } else { v };
            v = match p.reset_mode {
                0 => p.vr,
                1 => saturate(v as i64 - p.vth0 as i64),
                _ => v,
            };
        }
        if v < p.vl {
            v = p.vl;
        }
        v_next[i] = v;
    }
    store_output(outputs, 0, &spikes)?;
    store_output(outputs, 1, &v_next)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::block::bytes_of_words;
    use crate::identity::Id;

    fn core() -> Id {
        Id::core(&Id::chip(&Id::chip_array("t"), 0, 0), 0, 0)
    }

    fn block(name: &str, words: &[i32]) -> DataBlock {
        DataBlock::new(&core(), name, Some(bytes_of_words(words)), 0, words.len() * 4)
    }

    fn out_block(name: &str, len: usize) -> DataBlock {
        DataBlock::new(&core(), name, None, 0x2000, len)
    }

    #[test]
    fn max_pool_takes_window_max_with_floor() {
        let p = MaxPoolParams {
            precision: Precision::Int32,
            out_precision: Precision::Int32,
            niy: 2,
            nix: 2,
            nif: 1,
            nky: 2,
            nkx: 2,
            stride_y: 1,
            stride_x: 1,
            pad_top: 0,
            pad_down: 0,
            pad_left: 0,
            pad_right: 0,
            compare_init: -100,
            bit_shift_num: 0,
        };
        let x = block("x", &[-5, -2, -9, -1]);
        let mut outs = vec![out_block("o", p.output_len())];
        max_pool(&p, &[x], &mut outs).unwrap();
        assert_eq!(outs[0].words(), vec![-1i32 as u32]);

        let floored = MaxPoolParams {
            compare_init: 3,
            ..p
        };
        let x = block("x", &[-5, -2, -9, -1]);
        let mut outs = vec![out_block("o", floored.output_len())];
        max_pool(&floored, &[x], &mut outs).unwrap();
        assert_eq!(outs[0].words(), vec![3]);
    }

    #[test]
    fn move_block_shifts_and_pads() {
        let p = MoveParams {
            precision: Precision::Int32,
            out_precision: Precision::Int32,
            length_in: 2,
            length_out: 3,
            num_in: 1,
            num_out: 1,
            bit_shift_num: 1,
            real_num_in: 0,
        };
        let x = block("x", &[8, -8]);
        let mut outs = vec![out_block("o", p.output_len())];
        move_block(&p, &[x], &mut outs).unwrap();
        assert_eq!(outs[0].words(), vec![4, -4i32 as u32, 0]);
    }

    #[test]
    fn lut_indexes_after_shift() {
        let p = LutParams {
            precision: Precision::Int32,
            group_num: 1,
            neuron_real_num: 4,
            lut_data_width: 32,
            bit_shift_num: 1,
        };
        let x = block("x", &[0, 2, 4, 100]);
        let table = block("lut", &[10, 20, 30]);
        let mut outs = vec![out_block("o", p.output_len())];
        lut(&p, &[x, table], &mut outs).unwrap();
        // indexes 0, 1, 2, clamp(50) = 2
        assert_eq!(outs[0].words(), vec![10, 20, 30, 30]);
    }

    #[test]
    fn lif_fires_and_resets() {
        let p = LifParams {
            neuron_num: 3,
            group_num: 1,
            vth0: 10,
            vr: 0,
            vl: -5,
            dv: -1,
            vinit: 0,
            reset_mode: 0,
            fire_type: 0,
        };
        let u = block("u", &[12, 5, -100]);
        let v = block("v", &[0, 0, 0]);
        let mut outs = vec![out_block("s", 12), out_block("v", 12)];
        lif(&p, &[u, v], &mut outs).unwrap();
        // n0: 0+12-1=11 >= 10 -> spike, reset to vr=0
        // n1: 0+5-1=4 -> no spike
        // n2: clamped at vl=-5
        assert_eq!(outs[0].words(), vec![1, 0, 0]);
        assert_eq!(
            outs[1].words(),
            vec![0, 4, -5i32 as u32]
        );
    }

    #[test]
    fn lif_subtract_reset_keeps_excess() {
        let p = LifParams {
            neuron_num: 1,
            group_num: 1,
            vth0: 10,
            vr: 0,
            vl: i32::MIN,
            dv: 0,
            vinit: 0,
            reset_mode: 1,
            fire_type: 0,
        };
        let u = block("u", &[14]);
        let mut outs = vec![out_block("s", 4), out_block("v", 4)];
        lif(&p, &[u], &mut outs).unwrap();
        assert_eq!(outs[0].words(), vec![1]);
        assert_eq!(outs[1].words(), vec![4]);
    }
}
