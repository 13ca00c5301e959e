//! Platt scaling for ensemble probabilities.
//!
//! A fitted [`PlattCalibrator`] maps a raw probability `p` to
//! `1 / (1 + exp(-(a * p + b)))`. The combiner applies it to the up and down
//! probabilities before picking a direction.

use serde::Serialize;

use super::error::EnsembleError;
use super::ohlcv::BarSeries;

/// Fewer labelled samples than this are refused by [`PlattCalibrator::fit`].
pub const MIN_CALIBRATION_SAMPLES: usize = 100;

const MAX_ITERATIONS: usize = 100;
const MAX_STEP_HALVINGS: usize = 30;
const CONVERGENCE: f64 = 1e-10;
const RIDGE: f64 = 1e-12;

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct PlattCalibrator {
    pub a: f64,
    pub b: f64,
}

impl PlattCalibrator {
    pub fn new(a: f64, b: f64) -> Result<Self, EnsembleError> {
        if !a.is_finite() || !b.is_finite() {
            return Err(EnsembleError::Calibration {
                reason: format!("parameters must be finite, got a={a} b={b}"),
            });
        }
        Ok(PlattCalibrator { a, b })
    }

    pub fn calibrate(&self, p: f64) -> f64 {
        sigmoid(self.a * p + self.b)
    }

    /// Fits `a` and `b` to raw probabilities and their observed outcomes.
    ///
    /// Minimizes log loss by Newton steps with step halving, against Platt's
    /// smoothed targets `(n+ + 1) / (n+ + 2)` and `1 / (n- + 2)` so a
    /// perfectly separable sample still has a finite fit.
    pub fn fit(probs: &[f64], labels: &[bool]) -> Result<Self, EnsembleError> {
        if probs.len() != labels.len() {
            return Err(EnsembleError::Calibration {
                reason: format!("{} probabilities for {} labels", probs.len(), labels.len()),
            });
        }
        if probs.len() < MIN_CALIBRATION_SAMPLES {
            return Err(EnsembleError::Calibration {
                reason: format!(
                    "{} samples, need at least {}",
                    probs.len(),
                    MIN_CALIBRATION_SAMPLES
                ),
            });
        }
        if let Some(p) = probs.iter().find(|p| !(0.0..=1.0).contains(*p)) {
            return Err(EnsembleError::Calibration {
                reason: format!("probability {p} outside [0, 1]"),
            });
        }

        let positives = labels.iter().filter(|&&l| l).count() as f64;
        let negatives = labels.len() as f64 - positives;
        let hi = (positives + 1.0) / (positives + 2.0);
        let lo = 1.0 / (negatives + 2.0);
        let targets: Vec<f64> = labels.iter().map(|&l| if l { hi } else { lo }).collect();

        let mut a = 0.0;
        let mut b = ((positives + 1.0) / (negatives + 1.0)).ln();
        let mut loss = log_loss(probs, &targets, a, b);

        for iteration in 0..MAX_ITERATIONS {
            let (mut g_a, mut g_b) = (0.0, 0.0);
            let (mut h_aa, mut h_ab, mut h_bb) = (RIDGE, 0.0, RIDGE);
            for (&x, &t) in probs.iter().zip(&targets) {
                let q = sigmoid(a * x + b);
                let d = q - t;
                let w = q * (1.0 - q);
                g_a += d * x;
                g_b += d;
                h_aa += w * x * x;
                h_ab += w * x;
                h_bb += w;
            }

            let det = h_aa * h_bb - h_ab * h_ab;
            if !det.is_finite() || det <= 0.0 {
                break;
            }
            let step_a = (h_bb * g_a - h_ab * g_b) / det;
            let step_b = (h_aa * g_b - h_ab * g_a) / det;

            let mut scale = 1.0;
            let mut accepted = None;
            for _ in 0..MAX_STEP_HALVINGS {
                let (na, nb) = (a - scale * step_a, b - scale * step_b);
                let candidate = log_loss(probs, &targets, na, nb);
                if candidate <= loss {
                    accepted = Some((na, nb, candidate));
                    break;
                }
                scale /= 2.0;
            }
            let Some((na, nb, candidate)) = accepted else {
                break;
            };

            let moved = (na - a).abs().max((nb - b).abs());
            a = na;
            b = nb;
            loss = candidate;
            if moved < CONVERGENCE {
                tracing::debug!(iteration, a, b, loss, "platt fit converged");
                break;
            }
        }

        Self::new(a, b)
    }
}

/// Pairs each bar's raw up probability with whether the next close rose.
///
/// Bars without a probability and the final bar are left out.
pub fn next_bar_samples(bars: &BarSeries, up_probabilities: &[Option<f64>]) -> (Vec<f64>, Vec<bool>) {
    let closes: Vec<f64> = bars.closes().collect();
    up_probabilities
        .iter()
        .zip(closes.windows(2))
        .filter_map(|(p, pair)| p.map(|p| (p, pair[1] > pair[0])))
        .unzip()
}

fn sigmoid(z: f64) -> f64 {
    if z >= 0.0 {
        1.0 / (1.0 + (-z).exp())
    } else {
        let e = z.exp();
        e / (1.0 + e)
    }
}

/// `ln(1 + e^z)` without overflow.
fn softplus(z: f64) -> f64 {
    if z > 0.0 {
        z + (-z).exp().ln_1p()
    } else {
        z.exp().ln_1p()
    }
}

fn log_loss(probs: &[f64], targets: &[f64], a: f64, b: f64) -> f64 {
    probs
        .iter()
        .zip(targets)
        .map(|(&x, &t)| {
            let z = a * x + b;
            softplus(z) - t * z
        })
        .sum()
}
