//! Software lock-in amplifier and per-block decimation.
//!
//! One block in, one row out: DC channel means, common-noise rejection on the
//! AC channels, then multiply-and-accumulate against the recovered reference
//! pair. Accumulation runs in f64 in ascending sample order so results are
//! bit-reproducible.

use crate::reference::{self, Reference};
use crate::types::{DecimatedRow, PipelineOptions, RawBlock, Result, DETECTORS};

/// Fixed hardware amplification divided out of the lock-in components.
pub const GAIN: f64 = 1000.0;

/// Arithmetic mean of each DC channel over the block.
pub fn dc_means(block: &RawBlock) -> [f64; DETECTORS] {
    let samples = block.samples() as f64;
    let mut means = [0.0; DETECTORS];
    for (mean, channel) in means.iter_mut().zip(block.dc_channels()) {
        *mean = channel.iter().sum::<f64>() / samples;
    }
    means
}

/// Subtract each channel's DC-weighted share of the summed AC noise.
///
/// After rejection the three AC channels sum to zero at every sample, so any
/// intensity fluctuation common to all detectors cancels out of the lock-in.
/// Must run before the lock-in accumulation.
pub fn common_noise_rejection(block: &mut RawBlock, dc: &[f64; DETECTORS]) {
    let total_dc = dc[0] + dc[1] + dc[2];
    for s in 0..block.samples() {
        let noise = block.ac1[s] + block.ac2[s] + block.ac3[s];
        block.ac1[s] -= dc[0] / total_dc * noise;
        block.ac2[s] -= dc[1] / total_dc * noise;
        block.ac3[s] -= dc[2] / total_dc * noise;
    }
}

/// In-phase and quadrature components per detector, in physical units.
pub fn lock_in_filter(block: &RawBlock, reference: &Reference) -> ([f64; DETECTORS], [f64; DETECTORS]) {
    let mut x = [0.0; DETECTORS];
    let mut y = [0.0; DETECTORS];
    for (d, channel) in block.ac_channels().into_iter().enumerate() {
        for s in 0..channel.len() {
            x[d] += channel[s] * reference.in_phase[s];
            y[d] += channel[s] * reference.quadrature[s];
        }
    }
    let norm = block.samples() as f64 * GAIN;
    for d in 0..DETECTORS {
        x[d] /= norm;
        y[d] /= norm;
    }
    (x, y)
}

/// Full per-block decimation: DC means, optional common-noise rejection,
/// reference recovery, lock-in.
pub fn decimate_block(block: &mut RawBlock, options: PipelineOptions) -> Result<DecimatedRow> {
    let dc = dc_means(block);
    if options.common_noise_rejection {
        common_noise_rejection(block, &dc);
    }
    let reference = reference::generate(&block.reference)?;
    let (x, y) = lock_in_filter(block, &reference);
    Ok(DecimatedRow { dc, x, y })
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
