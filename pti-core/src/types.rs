//! Shared types, error enum, and record types for pti-core.

use serde::Serialize;
use thiserror::Error;

/// Number of photodetector channels.
pub const DETECTORS: usize = 3;

/// All errors produced by pti-core.
#[derive(Debug, Error)]
pub enum PtiError {
    #[error("missing or mistyped config entry: {path}")]
    ConfigMissing { path: String },
    #[error("truncated block: expected {expected} bytes, got {actual}")]
    TruncatedBlock { expected: usize, actual: usize },
    #[error("reference channel carries no modulation")]
    NoModulation,
    #[error("phase-scan sweep never crosses zero; cannot resolve channel order")]
    UnresolvableSwap,
    #[error("phase-scan sweep too short: {got} samples")]
    InsufficientData { got: usize },
    #[error("calibration rejected: {reason}")]
    InvalidCalibration { reason: String },
    #[error("column {0} not found in CSV header")]
    MissingColumn(String),
    #[error("malformed CSV record on line {line}: {reason}")]
    MalformedRecord { line: usize, reason: String },
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, PtiError>;

// ---------------------------------------------------------------------------
// Acquisition records
// ---------------------------------------------------------------------------

/// One acquisition block: seven equal-length sample arrays at the raw rate.
///
/// Channel order matches the wire layout: three DC-coupled intensities, the
/// modulation reference, three AC-coupled signals.
#[derive(Debug, Clone, PartialEq)]
pub struct RawBlock {
    pub dc1: Vec<f64>,
    pub dc2: Vec<f64>,
    pub dc3: Vec<f64>,
    pub reference: Vec<f64>,
    pub ac1: Vec<f64>,
    pub ac2: Vec<f64>,
    pub ac3: Vec<f64>,
}

impl RawBlock {
    /// Block with all channels zeroed, ready to be filled.
    pub fn zeroed(samples: usize) -> Self {
        RawBlock {
            dc1: vec![0.0; samples],
            dc2: vec![0.0; samples],
            dc3: vec![0.0; samples],
            reference: vec![0.0; samples],
            ac1: vec![0.0; samples],
            ac2: vec![0.0; samples],
            ac3: vec![0.0; samples],
        }
    }

    /// Samples per channel.
    pub fn samples(&self) -> usize {
        self.dc1.len()
    }

    pub fn dc_channels(&self) -> [&[f64]; DETECTORS] {
        [&self.dc1, &self.dc2, &self.dc3]
    }

    pub fn ac_channels(&self) -> [&[f64]; DETECTORS] {
        [&self.ac1, &self.ac2, &self.ac3]
    }
}

/// One decimated row: per-block DC means and lock-in phasors, in physical
/// channel order. This is the decimation CSV wire record.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct DecimatedRow {
    pub dc: [f64; DETECTORS],
    pub x: [f64; DETECTORS],
    pub y: [f64; DETECTORS],
}

// ---------------------------------------------------------------------------
// Calibration
// ---------------------------------------------------------------------------

/// Calibration constants produced by a phase-scan run and consumed by the
/// inversion engine.
///
/// Intensity bounds are stored per physical channel; output and system phases
/// are logical (detector 1 is the reference arm, so both phase arrays carry 0
/// in slot 0). `swapped` records whether physical channels 2 and 3 serve the
/// opposite logical roles.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Calibration {
    pub min_intensity: [f64; DETECTORS],
    pub max_intensity: [f64; DETECTORS],
    pub output_phase: [f64; DETECTORS],
    pub system_phase: [f64; DETECTORS],
    pub swapped: bool,
}

impl Calibration {
    /// Check the structural invariants: bounds ordered, phases in [0, 2π).
    pub fn validate(&self) -> Result<()> {
        for d in 0..DETECTORS {
            if !(self.min_intensity[d] < self.max_intensity[d]) {
                return Err(PtiError::InvalidCalibration {
                    reason: format!(
                        "detector {} intensity bounds are not ordered: min {} >= max {}",
                        d + 1,
                        self.min_intensity[d],
                        self.max_intensity[d]
                    ),
                });
            }
            let out = self.output_phase[d];
            let sys = self.system_phase[d];
            if !(0.0..std::f64::consts::TAU).contains(&out)
                || !(0.0..std::f64::consts::TAU).contains(&sys)
            {
                return Err(PtiError::InvalidCalibration {
                    reason: format!("detector {} phase outside [0, 2pi)", d + 1),
                });
            }
        }
        Ok(())
    }
}

/// Mode flags, passed by value into every stage that needs them.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PipelineOptions {
    pub online: bool,
    pub offline: bool,
    pub verbose: bool,
    /// Subtract the DC-weighted common noise share before the lock-in.
    pub common_noise_rejection: bool,
}

impl Default for PipelineOptions {
    fn default() -> Self {
        PipelineOptions {
            online: false,
            offline: true,
            verbose: false,
            common_noise_rejection: true,
        }
    }
}

// ---------------------------------------------------------------------------
// Tallies
// ---------------------------------------------------------------------------

/// Recoverable per-row conditions accounted during an inversion run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Tallies {
    /// Rows whose sensitivity weight summed to zero (PTI emitted as NaN).
    pub degenerate_rows: usize,
    /// Scaled DC samples clamped back into [-1, 1] after calibration drift.
    pub clamped_samples: usize,
}

impl Tallies {
    pub fn is_clean(&self) -> bool {
        self.degenerate_rows == 0 && self.clamped_samples == 0
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn sane_calibration() -> Calibration {
        Calibration {
            min_intensity: [-1.0; 3],
            max_intensity: [1.0; 3],
            output_phase: [0.0, 2.0, 4.0],
            system_phase: [0.0; 3],
            swapped: false,
        }
    }

    #[test]
    fn test_calibration_validate_ok() {
        assert!(sane_calibration().validate().is_ok());
    }

    #[test]
    fn test_calibration_rejects_unordered_bounds() {
        let mut cal = sane_calibration();
        cal.max_intensity[1] = cal.min_intensity[1];
        assert!(cal.validate().is_err());
    }

    #[test]
    fn test_calibration_rejects_phase_out_of_range() {
        let mut cal = sane_calibration();
        cal.output_phase[2] = 7.0; // > 2π
        assert!(cal.validate().is_err());
    }

    #[test]
    fn test_zeroed_block_shape() {
        let block = RawBlock::zeroed(128);
        assert_eq!(block.samples(), 128);
        assert!(block.ac_channels().iter().all(|c| c.len() == 128));
    }

    #[test]
    fn test_tallies_clean() {
        assert!(Tallies::default().is_clean());
        let t = Tallies {
            degenerate_rows: 1,
            clamped_samples: 0,
        };
        assert!(!t.is_clean());
    }
}
