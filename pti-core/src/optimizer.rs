//! System-phase calibration by variance minimization.
//!
//! Reconstructing the Lissajous sample from the three scaled intensities,
//!
//! ```text
//! x_n(α,β) = I₁(n) + I₂(n)·cos α + I₃(n)·cos β
//! y_n(α,β) = I₂(n)·sin α + I₃(n)·sin β
//! ```
//!
//! traces a circle exactly when (α, β) match the true inter-arm phases, so
//! the radius-squared variance over the sweep is the objective. The surface
//! is non-convex with mirror minima away from the standard three-detector
//! geometry; the fixed initial guess (2π/3, 4π/3) lands the descent in the
//! physical basin.

use tracing::warn;

use crate::types::DETECTORS;

/// Standard initial guess for the two free phases.
pub const INITIAL_GUESS: [f64; 2] = [
    2.0 * std::f64::consts::FRAC_PI_3,
    4.0 * std::f64::consts::FRAC_PI_3,
];

/// First trial step of each line search, in parameter units.
pub const INITIAL_STEP: f64 = 8e-4;

/// Absolute width at which the line search stops refining.
pub const LINE_TOLERANCE: f64 = 1e-9;

/// Gradient norm below which the descent counts as converged.
pub const GRADIENT_TOLERANCE: f64 = 1e-4;

/// Iteration cap for the outer descent.
pub const MAX_ITERATIONS: usize = 1000;

/// Result of a variance-minimization run.
#[derive(Debug, Clone, Copy)]
pub struct Minimum {
    /// Estimated (α, β), the system phases of detectors 2 and 3.
    pub phases: [f64; 2],
    /// Objective value at the estimate.
    pub value: f64,
    /// Gradient norm at the estimate.
    pub gradient_norm: f64,
    pub iterations: usize,
    /// False when the iteration cap was hit or every line search stalled.
    pub converged: bool,
}

/// Scaled sweep intensities in logical detector order.
pub struct Intensities<'a> {
    channels: [&'a [f64]; DETECTORS],
}

impl<'a> Intensities<'a> {
    pub fn new(i1: &'a [f64], i2: &'a [f64], i3: &'a [f64]) -> Self {
        debug_assert!(i1.len() == i2.len() && i2.len() == i3.len());
        Intensities {
            channels: [i1, i2, i3],
        }
    }

    fn len(&self) -> usize {
        self.channels[0].len()
    }

    /// Radius-squared of the reconstructed Lissajous sample `n`.
    fn circle(&self, n: usize, sin_cos: &SinCos) -> f64 {
        let [i1, i2, i3] = self.channels;
        let x = i1[n] + i2[n] * sin_cos.cos_a + i3[n] * sin_cos.cos_b;
        let y = i2[n] * sin_cos.sin_a + i3[n] * sin_cos.sin_b;
        x * x + y * y
    }

    /// Partial derivatives of the radius-squared at sample `n`.
    fn circle_gradient(&self, n: usize, sin_cos: &SinCos) -> (f64, f64) {
        let [i1, i2, i3] = self.channels;
        let x = i1[n] + i2[n] * sin_cos.cos_a + i3[n] * sin_cos.cos_b;
        let y = i2[n] * sin_cos.sin_a + i3[n] * sin_cos.sin_b;
        let d_alpha = 2.0 * i2[n] * y * sin_cos.cos_a - 2.0 * i2[n] * x * sin_cos.sin_a;
        let d_beta = 2.0 * i3[n] * y * sin_cos.cos_b - 2.0 * i3[n] * x * sin_cos.sin_b;
        (d_alpha, d_beta)
    }
}

struct SinCos {
    sin_a: f64,
    cos_a: f64,
    sin_b: f64,
    cos_b: f64,
}

impl SinCos {
    fn at(phases: [f64; 2]) -> Self {
        let (sin_a, cos_a) = phases[0].sin_cos();
        let (sin_b, cos_b) = phases[1].sin_cos();
        SinCos {
            sin_a,
            cos_a,
            sin_b,
            cos_b,
        }
    }
}

/// Population variance of the circle radius over the sweep.
pub fn objective(intensities: &Intensities, phases: [f64; 2]) -> f64 {
    let n = intensities.len();
    let sin_cos = SinCos::at(phases);
    let mut mean = 0.0;
    for i in 0..n {
        mean += intensities.circle(i, &sin_cos);
    }
    mean /= n as f64;
    let mut variance = 0.0;
    for i in 0..n {
        let deviation = intensities.circle(i, &sin_cos) - mean;
        variance += deviation * deviation;
    }
    variance / n as f64
}

/// Analytic gradient of [`objective`].
pub fn gradient(intensities: &Intensities, phases: [f64; 2]) -> [f64; 2] {
    let n = intensities.len();
    let scale = n as f64;
    let sin_cos = SinCos::at(phases);

    let mut mean = 0.0;
    let mut mean_da = 0.0;
    let mut mean_db = 0.0;
    for i in 0..n {
        mean += intensities.circle(i, &sin_cos);
        let (da, db) = intensities.circle_gradient(i, &sin_cos);
        mean_da += da;
        mean_db += db;
    }
    mean /= scale;
    mean_da /= scale;
    mean_db /= scale;

    let mut grad_a = 0.0;
    let mut grad_b = 0.0;
    for i in 0..n {
        let deviation = intensities.circle(i, &sin_cos) - mean;
        let (da, db) = intensities.circle_gradient(i, &sin_cos);
        grad_a += deviation * (da - mean_da);
        grad_b += deviation * (db - mean_db);
    }
    [2.0 * grad_a / scale, 2.0 * grad_b / scale]
}

/// Run the descent from the standard initial guess and return the system
/// phases of detectors 2 and 3.
pub fn system_phases(intensities: &Intensities) -> Minimum {
    let minimum = minimize(intensities, INITIAL_GUESS);
    if !minimum.converged {
        warn!(
            iterations = minimum.iterations,
            gradient_norm = minimum.gradient_norm,
            "system-phase optimizer did not converge; keeping best-so-far"
        );
    }
    minimum
}

/// Fletcher–Reeves conjugate-gradient descent on the variance surface.
pub fn minimize(intensities: &Intensities, guess: [f64; 2]) -> Minimum {
    let mut position = guess;
    let mut grad = gradient(intensities, position);
    let mut direction = [-grad[0], -grad[1]];
    let mut value = objective(intensities, position);
    let mut best = Minimum {
        phases: position,
        value,
        gradient_norm: norm(grad),
        iterations: 0,
        converged: false,
    };

    for iteration in 0..MAX_ITERATIONS {
        let gradient_norm = norm(grad);
        if gradient_norm < GRADIENT_TOLERANCE {
            return Minimum {
                phases: position,
                value,
                gradient_norm,
                iterations: iteration,
                converged: true,
            };
        }

        // A conjugate direction can stop pointing downhill on a non-convex
        // surface; restart with steepest descent when it does.
        if direction[0] * grad[0] + direction[1] * grad[1] >= 0.0 {
            direction = [-grad[0], -grad[1]];
        }

        let step = match line_minimize(intensities, position, direction, value) {
            Some(step) => step,
            None => break, // stalled
        };
        position[0] += step * direction[0];
        position[1] += step * direction[1];
        value = objective(intensities, position);

        let next_grad = gradient(intensities, position);
        let beta = (next_grad[0] * next_grad[0] + next_grad[1] * next_grad[1])
            / (grad[0] * grad[0] + grad[1] * grad[1]);
        direction = [
            -next_grad[0] + beta * direction[0],
            -next_grad[1] + beta * direction[1],
        ];
        grad = next_grad;

        if value < best.value {
            best = Minimum {
                phases: position,
                value,
                gradient_norm: norm(grad),
                iterations: iteration + 1,
                converged: false,
            };
        }
    }

    // Cap reached or line search stalled: report the best visited point.
    let gradient_norm = norm(gradient(intensities, best.phases));
    Minimum {
        gradient_norm,
        converged: gradient_norm < GRADIENT_TOLERANCE,
        ..best
    }
}

fn norm(v: [f64; 2]) -> f64 {
    v[0].hypot(v[1])
}

/// Bracket a descent step along `direction`, then refine by golden-section.
///
/// Returns `None` when no trial step reduces the objective (stalled line
/// search).
fn line_minimize(
    intensities: &Intensities,
    origin: [f64; 2],
    direction: [f64; 2],
    f_origin: f64,
) -> Option<f64> {
    let length = norm(direction);
    if length == 0.0 {
        return None;
    }
    let eval = |t: f64| {
        objective(
            intensities,
            [origin[0] + t * direction[0], origin[1] + t * direction[1]],
        )
    };

    // Work in normalized arc length so the first trial is INITIAL_STEP.
    let mut step = INITIAL_STEP / length;

    // Shrink until the first step descends at all.
    let mut f_step = eval(step);
    let mut shrink = 0;
    while f_step >= f_origin {
        step /= 2.0;
        shrink += 1;
        if shrink > 50 {
            return None;
        }
        f_step = eval(step);
    }

    // Expand until the objective turns back up.
    let mut lower = 0.0;
    let mut middle = step;
    let mut f_middle = f_step;
    let mut upper = step * 2.0;
    let mut f_upper = eval(upper);
    while f_upper < f_middle {
        lower = middle;
        middle = upper;
        f_middle = f_upper;
        upper *= 2.0;
        f_upper = eval(upper);
        if upper > 1e12 {
            break;
        }
    }

    // Golden-section refinement on [lower, upper].
    const INVPHI: f64 = 0.618_033_988_749_894_8;
    let mut a = lower;
    let mut b = upper;
    let mut c = b - INVPHI * (b - a);
    let mut d = a + INVPHI * (b - a);
    let mut f_c = eval(c);
    let mut f_d = eval(d);
    while (b - a) * length > LINE_TOLERANCE {
        if f_c < f_d {
            b = d;
            d = c;
            f_d = f_c;
            c = b - INVPHI * (b - a);
            f_c = eval(c);
        } else {
            a = c;
            c = d;
            f_c = f_d;
            d = a + INVPHI * (b - a);
            f_d = eval(d);
        }
    }
    let t = 0.5 * (a + b);
    if eval(t) < f_origin {
        Some(t)
    } else {
        // Refinement collapsed back onto the origin.
        if f_middle < f_origin {
            Some(middle)
        } else {
            None
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
