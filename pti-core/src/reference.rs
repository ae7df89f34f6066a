//! Demodulation reference recovery from the modulation channel.
//!
//! The acquisition clock jitters by fractions of a sample per cycle, so the
//! reference period is estimated as the mean over every rising/falling edge
//! pair in the block, and the first rising edge anchors the phase. Anchoring
//! on the first rising edge fixes the sign of X and Y across blocks.

use crate::types::{PtiError, Result};

/// Level below which the reference counts as low.
const LOW_LEVEL: f64 = 0.1;
/// Level above which the reference counts as high.
const HIGH_LEVEL: f64 = 0.9;

/// Sine/cosine reference arrays locked to the modulation channel.
#[derive(Debug, Clone)]
pub struct Reference {
    pub in_phase: Vec<f64>,
    pub quadrature: Vec<f64>,
    /// Mean period in samples.
    pub period: f64,
    /// Index of the first rising edge (first sample on the high level).
    pub phase_shift: usize,
}

impl Reference {
    /// Empty reference pair ready for [`Reference::update`].
    pub fn with_capacity(samples: usize) -> Self {
        Reference {
            in_phase: Vec::with_capacity(samples),
            quadrature: Vec::with_capacity(samples),
            period: 0.0,
            phase_shift: 0,
        }
    }

    /// Recompute the reference pair in place, reusing the arrays.
    ///
    /// Edges are detected between adjacent samples and recorded at the index
    /// of the first sample on the new level. Each rising edge that follows a
    /// falling edge contributes twice the half-period `rise - fall`; the mean
    /// over all contributions suppresses sub-sample jitter.
    pub fn update(&mut self, reference: &[f64]) -> Result<()> {
        let samples = reference.len();
        let mut last_fall: Option<usize> = None;
        let mut first_rise: Option<usize> = None;
        let mut period_sum = 0.0;
        let mut period_count = 0u32;

        for s in 0..samples.saturating_sub(1) {
            if reference[s] > HIGH_LEVEL && reference[s + 1] < LOW_LEVEL {
                last_fall = Some(s + 1);
            } else if reference[s] < LOW_LEVEL && reference[s + 1] > HIGH_LEVEL {
                if first_rise.is_none() {
                    first_rise = Some(s + 1);
                } else if let Some(fall) = last_fall {
                    period_sum += 2.0 * (s + 1 - fall) as f64;
                    period_count += 1;
                }
            }
        }

        if period_count == 0 {
            return Err(PtiError::NoModulation);
        }
        self.period = period_sum / f64::from(period_count);
        self.phase_shift = first_rise.expect("a period contribution implies a first rising edge");

        self.in_phase.clear();
        self.quadrature.clear();
        for s in 0..samples {
            let angle =
                std::f64::consts::TAU * (s as f64 - self.phase_shift as f64) / self.period;
            self.in_phase.push(angle.sin());
            self.quadrature.push(angle.cos());
        }
        Ok(())
    }
}

/// Recover the lock-in reference pair from a block's modulation channel.
pub fn generate(reference: &[f64]) -> Result<Reference> {
    let mut pair = Reference::with_capacity(reference.len());
    pair.update(reference)?;
    Ok(pair)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    /// Square wave that goes high at `phase` and toggles every `period / 2`.
    fn square_wave(len: usize, period: usize, phase: usize) -> Vec<f64> {
        (0..len)
            .map(|s| {
                let cycle = (s as i64 - phase as i64).rem_euclid(period as i64) as usize;
                if cycle < period / 2 {
                    1.0
                } else {
                    0.0
                }
            })
            .collect()
    }

    #[test]
    fn test_recovers_period_and_phase() {
        let reference = square_wave(1000, 50, 3);
        let result = generate(&reference).unwrap();
        assert!(
            (result.period - 50.0).abs() <= 1.0,
            "period {} not within one sample of 50",
            result.period
        );
        assert_eq!(result.phase_shift, 3);
    }

    #[test]
    fn test_references_are_orthogonal() {
        let reference = square_wave(1000, 50, 3);
        let result = generate(&reference).unwrap();
        let cross: f64 = result
            .in_phase
            .iter()
            .zip(&result.quadrature)
            .map(|(s, c)| s * c)
            .sum();
        assert!(
            (cross / 1000.0).abs() < 1e-10,
            "references not orthogonal: {cross}"
        );
    }

    #[test]
    fn test_reference_values_match_definition() {
        let reference = square_wave(500, 50, 7);
        let result = generate(&reference).unwrap();
        for s in [0usize, 7, 130, 499] {
            let angle = std::f64::consts::TAU * (s as f64 - 7.0) / result.period;
            assert!((result.in_phase[s] - angle.sin()).abs() < 1e-12);
            assert!((result.quadrature[s] - angle.cos()).abs() < 1e-12);
        }
    }

    #[test]
    fn test_flat_reference_has_no_modulation() {
        let reference = vec![0.5; 2000];
        match generate(&reference) {
            Err(PtiError::NoModulation) => {}
            other => panic!("expected NoModulation, got {other:?}"),
        }
    }

    #[test]
    fn test_all_zero_reference_has_no_modulation() {
        assert!(matches!(
            generate(&vec![0.0; 1000]),
            Err(PtiError::NoModulation)
        ));
    }

    #[test]
    fn test_single_rising_edge_is_not_enough() {
        // One rising edge fixes the anchor but contributes no period.
        let mut reference = vec![0.0; 100];
        for sample in reference.iter_mut().skip(50) {
            *sample = 1.0;
        }
        assert!(matches!(generate(&reference), Err(PtiError::NoModulation)));
    }

    #[test]
    fn test_jittered_wave_averages_period() {
        // Alternate 49- and 51-sample cycles: the mean must stay at 50.
        let mut reference = Vec::new();
        let mut level = 1.0;
        for width in [25usize, 24, 25, 26, 25, 24, 25, 26, 25, 24, 25, 26] {
            reference.extend(vec![level; width]);
            level = 1.0 - level;
        }
        // Lead-in so the first edge is a clean rising one.
        let mut padded = vec![0.0; 5];
        padded.extend(reference);
        let result = generate(&padded).unwrap();
        assert!(
            (result.period - 50.0).abs() <= 1.0,
            "jittered period {} drifted",
            result.period
        );
    }
}
