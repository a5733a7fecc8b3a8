//! Axon opcodes: the dendrite-side arithmetic that feeds a phase. All
//! tensors are height-major then channel, channels padded to the word
//! boundary of their precision; every accumulation narrows through
//! `saturate`.

use super::{align_up, bias_vector, input, store_output, unpack_lanes, Precision};
use crate::block::DataBlock;
use crate::{saturate, SimResult};

/// 0x02: windowed accumulate over an input map; `avg_pooling_en` divides
/// by the window population.
#[derive(Debug, Clone)]
pub struct PoolParams {
    pub precision: Precision,
    pub bias_type: u32,
    pub constant_b: i32,
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
    pub avg_pooling_en: bool,
}

impl PoolParams {
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

pub fn pool(p: &PoolParams, inputs: &[DataBlock], outputs: &mut [DataBlock]) -> SimResult<()> {
    let nf = p.nf_pad();
    let x = unpack_lanes(input(inputs, 0)?.bytes(), p.precision, p.niy * p.nix * nf);
    let bias = bias_vector(p.bias_type, p.constant_b, inputs.get(1), nf)?;

    let (noy, nox) = p.out_dims();
    let mut out = vec![0i32; noy * nox * nf];
    let window = (p.nky * p.nkx).max(1) as i64;
    for oy in 0..noy {
        for ox in 0..nox {
            for f in 0..nf {
                let mut acc = bias[f] as i64;
                for ky in 0..p.nky {
                    for kx in 0..p.nkx {
                        let iy = (oy * p.stride_y + ky) as isize - p.pad_top as isize;
                        let ix = (ox * p.stride_x + kx) as isize - p.pad_left as isize;
                        if iy < 0 || ix < 0 || iy >= p.niy as isize || ix >= p.nix as isize {
                            continue;
                        }
                        let idx = (iy as usize * p.nix + ix as usize) * nf + f;
                        acc = saturate(acc + x[idx] as i64) as i64;
                    }
                }
                if p.avg_pooling_en {
                    acc /= window;
                }
                out[(oy * nox + ox) * nf + f] = saturate(acc);
            }
        }
    }
    store_output(outputs, 0, &out)
}

/// 0x03: element-wise multiply-accumulate of two operands plus bias,
/// either over `n_branch` flat rows or a strided 2-D map.
#[derive(Debug, Clone)]
pub struct ElemMacParams {
    pub tensor_en: bool,
    pub precision: Precision,
    pub bias_type: u32,
    pub constant_b: i32,
    pub ny: usize,
    pub nx: usize,
    pub stride_y: usize,
    pub stride_x: usize,
    pub n_branch: usize,
    pub nif: usize,
}

impl ElemMacParams {
    pub fn nf_pad(&self) -> usize {
        align_up(self.nif.max(1), self.precision.lanes())
    }

    fn out_points(&self) -> usize {
        if self.tensor_en {
            let oy = (self.ny.saturating_sub(1)) / self.stride_y.max(1) + 1;
            let ox = (self.nx.saturating_sub(1)) / self.stride_x.max(1) + 1;
            oy * ox
        } else {
            self.n_branch.max(1)
        }
    }

    pub fn output_len(&self) -> usize {
        self.out_points() * self.nf_pad() * 4
    }
}

pub fn elem_mac(p: &ElemMacParams, inputs: &[DataBlock], outputs: &mut [DataBlock]) -> SimResult<()> {
    let nf = p.nf_pad();
    let (points, sy, sx) = if p.tensor_en {
        (p.ny * p.nx, p.stride_y.max(1), p.stride_x.max(1))
    } else {
        (p.n_branch.max(1), 1, 1)
    };
    let x1 = unpack_lanes(input(inputs, 0)?.bytes(), p.precision, points * nf);
    let x2 = unpack_lanes(input(inputs, 1)?.bytes(), p.precision, points * nf);
    let bias = bias_vector(p.bias_type, p.constant_b, inputs.get(2), nf)?;

    let mut out = Vec::with_capacity(p.out_points() * nf);
    if p.tensor_en {
        let oy = (p.ny.saturating_sub(1)) / sy + 1;
        let ox = (p.nx.saturating_sub(1)) / sx + 1;
        for y in 0..oy {
            for x in 0..ox {
                let at = (y * sy * p.nx + x * sx) * nf;
                for f in 0..nf {
                    out.push(saturate(
                        bias[f] as i64 + x1[at + f] as i64 * x2[at + f] as i64,
                    ));
                }
            }
        }
    } else {
        for branch in 0..p.n_branch.max(1) {
            let at = branch * nf;
            for f in 0..nf {
                out.push(saturate(
                    bias[f] as i64 + x1[at + f] as i64 * x2[at + f] as i64,
                ));
            }
        }
    }
    store_output(outputs, 0, &out)
}

/// 0x04: fully-connected MAC: `o[f] = sat(Σ_r w[r][f] · x[r] + b[f])`.
#[derive(Debug, Clone)]
pub struct MacParams {
    pub x1_precision: Precision,
    pub x2_precision: Precision,
    pub bias_type: u32,
    pub constant_b: i32,
    pub nif: usize,
    pub nof: usize,
}

impl MacParams {
    pub fn nif_pad(&self) -> usize {
        align_up(self.nif.max(1), self.x1_precision.lanes())
    }

    pub fn nof_pad(&self) -> usize {
        align_up(self.nof.max(1), self.x2_precision.lanes())
    }

    pub fn output_len(&self) -> usize {
        self.nof_pad() * 4
    }
}

pub fn mac(p: &MacParams, inputs: &[DataBlock], outputs: &mut [DataBlock]) -> SimResult<()> {
    let nr = p.nif_pad();
    let nf = p.nof_pad();
    let x = unpack_lanes(input(inputs, 0)?.bytes(), p.x1_precision, nr);
    // weights are row-major: all outputs for input row 0, then row 1, ...
    let w = unpack_lanes(input(inputs, 1)?.bytes(), p.x2_precision, nr * nf);
    let bias = bias_vector(p.bias_type, p.constant_b, inputs.get(2), nf)?;

    let mut out = vec![0i32; nf];
    for f in 0..nf {
        let mut acc = bias[f];
        for r in 0..nr {
            acc = saturate(acc as i64 + w[r * nf + f] as i64 * x[r] as i64);
        }
        out[f] = acc;
    }
    store_output(outputs, 0, &out)
}

/// 0x41: 2-D convolution with stride, padding and dilation. Weights are
/// `[f][ky][kx][r]`, the input map `[y][x][r]`.
#[derive(Debug, Clone)]
pub struct ConvParams {
    pub x1_precision: Precision,
    pub x2_precision: Precision,
    pub bias_type: u32,
    pub constant_b: i32,
    pub niy: usize,
    pub nix: usize,
    pub nif: usize,
    pub nof: usize,
    pub nky: usize,
    pub nkx: usize,
    pub stride_y: usize,
    pub stride_x: usize,
    pub pad_top: usize,
    pub pad_down: usize,
    pub pad_left: usize,
    pub pad_right: usize,
    pub dilate_y: usize,
    pub dilate_x: usize,
}

impl ConvParams {
    pub fn nr_pad(&self) -> usize {
        align_up(self.nif.max(1), self.x1_precision.lanes())
    }

    pub fn out_dims(&self) -> (usize, usize) {
        let ky_span = (self.nky.saturating_sub(1)) * self.dilate_y.max(1) + 1;
        let kx_span = (self.nkx.saturating_sub(1)) * self.dilate_x.max(1) + 1;
        let noy =
            (self.niy + self.pad_top + self.pad_down).saturating_sub(ky_span) / self.stride_y.max(1) + 1;
        let nox = (self.nix + self.pad_left + self.pad_right).saturating_sub(kx_span)
            / self.stride_x.max(1)
            + 1;
        (noy, nox)
    }

    pub fn output_len(&self) -> usize {
        let (noy, nox) = self.out_dims();
        noy * nox * self.nof.max(1) * 4
    }
}

pub fn conv(p: &ConvParams, inputs: &[DataBlock], outputs: &mut [DataBlock]) -> SimResult<()> {
    let nr = p.nr_pad();
    let nof = p.nof.max(1);
    let x = unpack_lanes(input(inputs, 0)?.bytes(), p.x1_precision, p.niy * p.nix * nr);
    let w = unpack_lanes(
        input(inputs, 1)?.bytes(),
        p.x2_precision,
        nof * p.nky * p.nkx * nr,
    );
    let bias = bias_vector(p.bias_type, p.constant_b, inputs.get(2), nof)?;

    let dy = p.dilate_y.max(1);
    let dx = p.dilate_x.max(1);
    let (noy, nox) = p.out_dims();
    let mut out = vec![0i32; noy * nox * nof];
    for oy in 0..noy {
        for ox in 0..nox {
            for f in 0..nof {
                let mut acc = bias[f];
                for ky in 0..p.nky {
                    for kx in 0..p.nkx {
                        let iy = (oy * p.stride_y.max(1) + ky * dy) as isize - p.pad_top as isize;
                        let ix = (ox * p.stride_x.max(1) + kx * dx) as isize - p.pad_left as isize;
                        if iy < 0 || ix < 0 || iy >= p.niy as isize || ix >= p.nix as isize {
                            continue;
                        }
                        for r in 0..nr {
                            let xi = x[(iy as usize * p.nix + ix as usize) * nr + r];
                            let wi = w[((f * p.nky + ky) * p.nkx + kx) * nr + r];
                            acc = saturate(acc as i64 + xi as i64 * wi as i64);
                        }
                    }
                }
                out[(oy * nox + ox) * nof + f] = acc;
            }
        }
    }
    store_output(outputs, 0, &out)
}
