//! Output-phase calibration from a long interferometric sweep.
//!
//! The three DC channels trace cosines of the same sweep phase, offset by the
//! fixed output phase of each detector arm. Inverse-cosine branch pairs of
//! detector 1 against detectors 2 and 3 produce candidate phase bands whose
//! modal value is the output phase; the zero-crossing order of the scaled
//! sweeps resolves which physical channel is the short arm.

use crate::types::{PtiError, Result, DETECTORS};
use std::f64::consts::{PI, TAU};

/// Samples of the sweep enumerated into the candidate bands.
pub const BAND_SAMPLES: usize = 2000;

/// Trailing samples excluded from the extremum search. The sweep tail records
/// the sensor settling after the scan drive stops and would otherwise skew
/// the intensity bounds.
pub const SETTLE_TAIL: usize = 75_000;

/// Minimum sweep length the estimator accepts.
pub const MIN_SWEEP_SAMPLES: usize = 100;

/// Affine rescale of `value` from `[min, max]` onto `[-1, 1]`.
pub fn scale(value: f64, min: f64, max: f64) -> f64 {
    2.0 * (value - min) / (max - min) - 1.0
}

/// Inverse of [`scale`].
pub fn unscale(value: f64, min: f64, max: f64) -> f64 {
    (value + 1.0) / 2.0 * (max - min) + min
}

/// Result of the output-phase estimation over one sweep.
#[derive(Debug, Clone)]
pub struct SweepCalibration {
    pub min_intensity: [f64; DETECTORS],
    pub max_intensity: [f64; DETECTORS],
    /// Logical output phases; slot 0 is the reference arm and stays 0.
    pub output_phase: [f64; DETECTORS],
    pub swapped: bool,
    /// Scaled sweeps in logical detector order (channels 2/3 exchanged when
    /// `swapped`), ready for the system-phase optimizer.
    pub scaled: [Vec<f64>; DETECTORS],
}

/// Estimate intensity bounds, output phases, and the swap flag from three DC
/// sweeps of equal length.
pub fn estimate(sweeps: &[Vec<f64>; DETECTORS]) -> Result<SweepCalibration> {
    let len = sweeps[0].len();
    if len < MIN_SWEEP_SAMPLES {
        return Err(PtiError::InsufficientData { got: len });
    }
    if sweeps.iter().any(|sweep| sweep.len() != len) {
        return Err(PtiError::MalformedRecord {
            line: 0,
            reason: "sweep channels differ in length".into(),
        });
    }

    let mut min_intensity = [0.0; DETECTORS];
    let mut max_intensity = [0.0; DETECTORS];
    let mut scaled: [Vec<f64>; DETECTORS] = Default::default();
    for d in 0..DETECTORS {
        let (min, max) = intensity_bounds(&sweeps[d])?;
        min_intensity[d] = min;
        max_intensity[d] = max;
        // Settle-tail samples can overshoot the searched extrema; clamping
        // keeps arccos and the downstream variance objective in domain.
        scaled[d] = sweeps[d]
            .iter()
            .map(|&v| scale(v, min, max).clamp(-1.0, 1.0))
            .collect();
    }

    let band2 = candidate_band(&scaled[0], &scaled[1], |phase| phase <= PI);
    let band3 = candidate_band(&scaled[0], &scaled[2], |phase| phase > PI);
    let swapped = resolve_swap(&scaled[1], &scaled[2])?;

    let output_phase = [0.0, modal_phase(&band2)?, modal_phase(&band3)?];

    if swapped {
        scaled.swap(1, 2);
    }
    Ok(SweepCalibration {
        min_intensity,
        max_intensity,
        output_phase,
        swapped,
        scaled,
    })
}

/// Min/max over the sweep, excluding the settle tail when there is one.
fn intensity_bounds(sweep: &[f64]) -> Result<(f64, f64)> {
    let search = if sweep.len() > SETTLE_TAIL {
        &sweep[..sweep.len() - SETTLE_TAIL]
    } else {
        sweep
    };
    let mut min = f64::INFINITY;
    let mut max = f64::NEG_INFINITY;
    for &v in search {
        min = min.min(v);
        max = max.max(v);
    }
    if !(min < max) {
        return Err(PtiError::InsufficientData { got: search.len() });
    }
    Ok((min, max))
}

/// Enumerate the four arccos branch combinations of detector 1 against one
/// other detector, folded into [0, 2π), keeping the selected half-range.
fn candidate_band(dc1: &[f64], dcd: &[f64], keep: impl Fn(f64) -> bool) -> Vec<f64> {
    let take = dc1.len().min(BAND_SAMPLES);
    let mut band = Vec::with_capacity(4 * take);
    for s in 0..take {
        let a = dc1[s].acos();
        let b = dcd[s].acos();
        for phase in [a + b, a - b, -a + b, -a - b] {
            let folded = if phase < 0.0 { phase + TAU } else { phase };
            if keep(folded) {
                band.push(folded);
            }
        }
    }
    band
}

/// First zero-crossing order of the scaled detector-2/3 sweeps.
///
/// For an increasing sweep the shorter arm crosses zero first, so detector 3
/// crossing before detector 2 means the physical channels serve swapped
/// roles.
fn resolve_swap(dc2: &[f64], dc3: &[f64]) -> Result<bool> {
    let cross2 = first_zero_crossing(dc2);
    let cross3 = first_zero_crossing(dc3);
    match (cross2, cross3) {
        (Some(c2), Some(c3)) => Ok(c3 < c2),
        (Some(_), None) => Ok(false),
        (None, Some(_)) => Ok(true),
        (None, None) => Err(PtiError::UnresolvableSwap),
    }
}

fn first_zero_crossing(sweep: &[f64]) -> Option<usize> {
    sweep
        .windows(2)
        .position(|pair| (pair[0] > 0.0 && pair[1] < 0.0) || (pair[0] < 0.0 && pair[1] > 0.0))
}

/// Centre of the fullest bucket of a ⌈√N⌉-bin histogram over the band.
fn modal_phase(band: &[f64]) -> Result<f64> {
    if band.is_empty() {
        return Err(PtiError::InsufficientData { got: 0 });
    }
    let mut min = f64::INFINITY;
    let mut max = f64::NEG_INFINITY;
    for &phase in band {
        min = min.min(phase);
        max = max.max(phase);
    }
    if min == max {
        return Ok(min);
    }

    let bins = (band.len() as f64).sqrt().ceil() as usize;
    let width = (max - min) / bins as f64;
    let mut counts = vec![0usize; bins];
    for &phase in band {
        let bucket = (((phase - min) / width) as usize).min(bins - 1);
        counts[bucket] += 1;
    }
    let fullest = counts
        .iter()
        .enumerate()
        .max_by_key(|(_, &count)| count)
        .map(|(bucket, _)| bucket)
        .unwrap_or(0);
    Ok(min + (fullest as f64 + 0.5) * width)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    /// Synthetic sweep: phase rises linearly over [0, 2π), each channel a
    /// cosine offset by its output phase.
    fn synthetic_sweep(len: usize, output_phases: [f64; 3]) -> [Vec<f64>; 3] {
        std::array::from_fn(|d| {
            (0..len)
                .map(|n| (TAU * n as f64 / len as f64 - output_phases[d]).cos())
                .collect()
        })
    }

    const PHASE_2: f64 = 2.0 * PI / 3.0;
    const PHASE_3: f64 = 4.0 * PI / 3.0;

    #[test]
    fn test_scale_unscale_involutive() {
        let (min, max) = (0.73, 4.19);
        for i in 0..=100 {
            let v = min + (max - min) * i as f64 / 100.0;
            let roundtrip = unscale(scale(v, min, max), min, max);
            assert!(
                (roundtrip - v).abs() <= 4.0 * f64::EPSILON * max,
                "{roundtrip} != {v}"
            );
        }
        assert_eq!(scale(min, min, max), -1.0);
        assert_eq!(scale(max, min, max), 1.0);
    }

    #[test]
    fn test_estimate_recovers_output_phases() {
        let n = 5000;
        let sweeps = synthetic_sweep(n, [0.0, PHASE_2, PHASE_3]);
        let cal = estimate(&sweeps).unwrap();
        let tolerance = 2.0 * PI / (n as f64).sqrt();
        assert_eq!(cal.output_phase[0], 0.0);
        assert!(
            (cal.output_phase[1] - PHASE_2).abs() < tolerance,
            "phase 2: {} vs {PHASE_2}",
            cal.output_phase[1]
        );
        assert!(
            (cal.output_phase[2] - PHASE_3).abs() < tolerance,
            "phase 3: {} vs {PHASE_3}",
            cal.output_phase[2]
        );
        assert!(!cal.swapped);
        for d in 0..3 {
            assert!((cal.min_intensity[d] + 1.0).abs() < 1e-3);
            assert!((cal.max_intensity[d] - 1.0).abs() < 1e-3);
        }
    }

    #[test]
    fn test_estimate_swap_idempotence() {
        // Swapping the physical channels flips the flag but leaves the
        // estimated phases untouched: each band carries both the φ and the
        // 2π-φ mode, and the half-range filter picks the same one.
        let n = 5000;
        let straight = synthetic_sweep(n, [0.0, PHASE_2, PHASE_3]);
        let swapped_input = [
            straight[0].clone(),
            straight[2].clone(),
            straight[1].clone(),
        ];
        let cal_straight = estimate(&straight).unwrap();
        let cal_swapped = estimate(&swapped_input).unwrap();
        assert!(!cal_straight.swapped);
        assert!(cal_swapped.swapped);
        // Each band carries the modal spike at the true phase; the histogram
        // bin layout differs between the runs, so agreement is to bin width.
        for d in 0..3 {
            assert!(
                (cal_straight.output_phase[d] - cal_swapped.output_phase[d]).abs() < 0.1,
                "output phase {d} moved under swap"
            );
        }
        // Logical ordering of the scaled sweeps undoes the swap.
        assert_eq!(cal_straight.scaled[1], cal_swapped.scaled[1]);
        assert_eq!(cal_straight.scaled[2], cal_swapped.scaled[2]);
    }

    #[test]
    fn test_estimate_rejects_short_sweep() {
        let sweeps = synthetic_sweep(MIN_SWEEP_SAMPLES - 1, [0.0, PHASE_2, PHASE_3]);
        assert!(matches!(
            estimate(&sweeps),
            Err(PtiError::InsufficientData { .. })
        ));
    }

    #[test]
    fn test_estimate_no_sign_change_unresolvable() {
        // A ramp through exactly zero never shows a strict sign change
        // between adjacent scaled samples, so the channel order cannot be
        // resolved.
        let ramp: Vec<f64> = (0..=1000).map(|i| 1.0 - i as f64 / 500.0).collect();
        let sweeps = [ramp.clone(), ramp.clone(), ramp];
        match estimate(&sweeps) {
            Err(PtiError::UnresolvableSwap) => {}
            other => panic!("expected UnresolvableSwap, got {other:?}"),
        }
    }

    #[test]
    fn test_settle_tail_excluded_from_bounds() {
        // A huge settle excursion in the tail must not widen the bounds.
        let mut sweep = vec![0.0; SETTLE_TAIL + 1000];
        for (i, v) in sweep.iter_mut().enumerate().take(1000) {
            *v = (TAU * i as f64 / 1000.0).cos();
        }
        for v in sweep.iter_mut().skip(1000) {
            *v = 50.0;
        }
        let (min, max) = intensity_bounds(&sweep).unwrap();
        assert!(min >= -1.0 && max <= 1.0, "tail leaked into bounds");
    }

    #[test]
    fn test_modal_phase_picks_the_mode() {
        let mut band = vec![1.0; 50];
        band.extend(vec![2.5; 200]);
        band.extend(vec![0.3; 30]);
        let mode = modal_phase(&band).unwrap();
        assert!((mode - 2.5).abs() < 0.2, "mode {mode}");
    }

    #[test]
    fn test_modal_phase_empty_band() {
        assert!(modal_phase(&[]).is_err());
    }

    #[test]
    fn test_first_zero_crossing() {
        assert_eq!(first_zero_crossing(&[1.0, 0.5, -0.5, -1.0]), Some(1));
        assert_eq!(first_zero_crossing(&[-1.0, 1.0]), Some(0));
        assert_eq!(first_zero_crossing(&[1.0, 2.0, 3.0]), None);
    }
}
