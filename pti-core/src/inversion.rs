//! PTI inversion: decimated rows plus calibration constants to the
//! interferometric phase and the weighted PTI signal.
//!
//! Each scaled DC sample pins the sweep phase only up to an arccos branch, so
//! every detector contributes two candidate (x, y) roots. Three detectors
//! give six candidates per axis; the triple with the smallest mutual
//! disagreement is the physical one, and its mean feeds atan2.

use tracing::warn;

use crate::phase_scan::scale;
use crate::types::{Calibration, DecimatedRow, PipelineOptions, Result, Tallies, DETECTORS};

/// Per-channel demodulation intermediates of one row.
#[derive(Debug, Clone, Copy, Default)]
pub struct ChannelDemod {
    /// AC phasor magnitude √(X² + Y²).
    pub root_mean_square: f64,
    /// AC phasor angle atan2(Y, X).
    pub response_phase: f64,
    /// Magnitude projected onto the system phase.
    pub demodulated: f64,
}

/// One inverted row.
#[derive(Debug, Clone, Copy)]
pub struct InvertedRow {
    pub interferometric_phase: f64,
    pub pti_signal: f64,
    pub channels: [ChannelDemod; DETECTORS],
}

/// Full inversion run output.
#[derive(Debug, Clone, Default)]
pub struct InversionOutput {
    pub interferometric_phase: Vec<f64>,
    pub pti_signal: Vec<f64>,
    /// Per-channel series, populated in verbose mode.
    pub channels: Option<[Vec<ChannelDemod>; DETECTORS]>,
    pub tallies: Tallies,
}

/// Inversion engine: calibration constants plus run tallies.
pub struct Inversion {
    calibration: Calibration,
    verbose: bool,
    tallies: Tallies,
}

impl Inversion {
    pub fn new(calibration: Calibration, options: PipelineOptions) -> Result<Self> {
        calibration.validate()?;
        Ok(Inversion {
            calibration,
            verbose: options.verbose,
            tallies: Tallies::default(),
        })
    }

    /// Map a physical row into logical detector order.
    ///
    /// A swapped calibration feeds physical channel 3 to logical detector 2
    /// and vice versa; output and system phases are already logical.
    fn logical_row(&self, row: &DecimatedRow) -> ([f64; DETECTORS], [[f64; 2]; DETECTORS]) {
        let mut dc = row.dc;
        let mut ac = [[row.x[0], row.y[0]], [row.x[1], row.y[1]], [row.x[2], row.y[2]]];
        if self.calibration.swapped {
            dc.swap(1, 2);
            ac.swap(1, 2);
        }
        (dc, ac)
    }

    /// Intensity bounds in logical detector order.
    fn logical_bounds(&self) -> ([f64; DETECTORS], [f64; DETECTORS]) {
        let mut min = self.calibration.min_intensity;
        let mut max = self.calibration.max_intensity;
        if self.calibration.swapped {
            min.swap(1, 2);
            max.swap(1, 2);
        }
        (min, max)
    }

    /// Invert one decimated row.
    pub fn invert_row(&mut self, row: &DecimatedRow) -> InvertedRow {
        let (dc, ac) = self.logical_row(row);
        let (min, max) = self.logical_bounds();

        let mut scaled = [0.0; DETECTORS];
        for d in 0..DETECTORS {
            let value = scale(dc[d], min[d], max[d]);
            if value.abs() > 1.0 {
                // Calibration drift pushed the intensity outside the scan
                // bounds; clamp and account for it.
                self.tallies.clamped_samples += 1;
                scaled[d] = value.clamp(-1.0, 1.0);
            } else {
                scaled[d] = value;
            }
        }

        let phase = interferometric_phase(&scaled, &self.calibration.output_phase);

        let mut channels = [ChannelDemod::default(); DETECTORS];
        let mut signal = 0.0;
        let mut weight = 0.0;
        for d in 0..DETECTORS {
            let root_mean_square = ac[d][0].hypot(ac[d][1]);
            let response_phase = ac[d][1].atan2(ac[d][0]);
            let demodulated =
                root_mean_square * (response_phase - self.calibration.system_phase[d]).cos();
            channels[d] = ChannelDemod {
                root_mean_square,
                response_phase,
                demodulated,
            };

            let swing = (phase - self.calibration.output_phase[d]).sin();
            let sign = if swing < 0.0 { -1.0 } else { 1.0 };
            signal += demodulated * sign;
            weight += (max[d] - min[d]) / 2.0 * swing.abs();
        }

        let pti_signal = if weight == 0.0 {
            // Stationary at a phase extremum: no detector has sensitivity.
            self.tallies.degenerate_rows += 1;
            f64::NAN
        } else {
            -signal / weight
        };

        InvertedRow {
            interferometric_phase: phase,
            pti_signal,
            channels,
        }
    }

    /// Invert a whole run of rows and collect the output series.
    pub fn invert(&mut self, rows: &[DecimatedRow]) -> InversionOutput {
        let mut output = InversionOutput {
            interferometric_phase: Vec::with_capacity(rows.len()),
            pti_signal: Vec::with_capacity(rows.len()),
            channels: self.verbose.then(Default::default),
            tallies: Tallies::default(),
        };
        for row in rows {
            let inverted = self.invert_row(row);
            output.interferometric_phase.push(inverted.interferometric_phase);
            output.pti_signal.push(inverted.pti_signal);
            if let Some(series) = output.channels.as_mut() {
                for d in 0..DETECTORS {
                    series[d].push(inverted.channels[d]);
                }
            }
        }
        output.tallies = self.tallies;
        if !self.tallies.is_clean() {
            warn!(
                degenerate_rows = self.tallies.degenerate_rows,
                clamped_samples = self.tallies.clamped_samples,
                "inversion finished with recoverable row conditions"
            );
        }
        output
    }

    pub fn tallies(&self) -> Tallies {
        self.tallies
    }
}

/// Both arccos branch roots of one detector's scaled DC sample.
fn candidate_roots(dc: f64, output_phase: f64) -> [[f64; 2]; 2] {
    let (sin, cos) = output_phase.sin_cos();
    let residue = (1.0 - dc * dc).max(0.0).sqrt();
    [
        [dc * cos + residue * sin, dc * sin - residue * cos],
        [dc * cos - residue * sin, dc * sin + residue * cos],
    ]
}

/// Reconstruct the interferometric phase from the three scaled DC samples.
///
/// Picks, independently for x and y, the branch triple with the smallest
/// total pairwise disagreement out of the 2³ combinations, then takes
/// atan2 of the triple means.
pub fn interferometric_phase(scaled_dc: &[f64; DETECTORS], output_phases: &[f64; DETECTORS]) -> f64 {
    let roots: [[[f64; 2]; 2]; DETECTORS] =
        std::array::from_fn(|d| candidate_roots(scaled_dc[d], output_phases[d]));

    let mut best_x = f64::INFINITY;
    let mut best_y = f64::INFINITY;
    let mut mean_x = 0.0;
    let mut mean_y = 0.0;
    for i in 0..2 {
        for j in 0..2 {
            for k in 0..2 {
                // Detector 2's branch varies fastest; on exact disagreement
                // ties the first triple visited wins, so this visitation
                // order is part of the algorithm.
                let picks = [roots[0][i], roots[1][k], roots[2][j]];
                let error_x = disagreement(picks[0][0], picks[1][0], picks[2][0]);
                let error_y = disagreement(picks[0][1], picks[1][1], picks[2][1]);
                if error_x < best_x {
                    best_x = error_x;
                    mean_x = (picks[0][0] + picks[1][0] + picks[2][0]) / DETECTORS as f64;
                }
                if error_y < best_y {
                    best_y = error_y;
                    mean_y = (picks[0][1] + picks[1][1] + picks[2][1]) / DETECTORS as f64;
                }
            }
        }
    }
    mean_y.atan2(mean_x)
}

fn disagreement(a: f64, b: f64, c: f64) -> f64 {
    (a - b).abs() + (b - c).abs() + (a - c).abs()
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
