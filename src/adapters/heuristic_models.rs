//! Simple price-action prediction models.
//!
//! Stand-ins for the external model collaborators, used by the demo command
//! and tests. Both map a bounded strength `s` in `[-1, 1]` to probabilities
//! `up = 0.45 + 0.4 s`, `down = 0.45 - 0.4 s`, leaving 0.1 neutral mass.

use crate::domain::ohlcv::Bar;
use crate::domain::prediction::{Direction, ModelPrediction};
use crate::ports::model_port::PredictionModel;

/// |strength| below this is reported as a flat call.
const FLAT_BAND: f64 = 0.1;

fn prediction_from_strength(name: &str, strength: f64) -> ModelPrediction {
    let s = strength.clamp(-1.0, 1.0);
    let direction = if s > FLAT_BAND {
        Direction::Up
    } else if s < -FLAT_BAND {
        Direction::Down
    } else {
        Direction::Flat
    };
    ModelPrediction::new(name, "1d", 0.45 + 0.4 * s, 0.45 - 0.4 * s, direction, s.abs())
}

/// Follows the trend: rate of change over `lookback` bars, saturating at
/// `saturation` (e.g. 0.05 for a 5% move).
pub struct MomentumModel {
    pub lookback: usize,
    pub saturation: f64,
}

impl PredictionModel for MomentumModel {
    fn name(&self) -> &str {
        "momentum"
    }

    fn warmup(&self) -> usize {
        self.lookback + 1
    }

    fn predict(&self, history: &[Bar]) -> Result<ModelPrediction, String> {
        let n = history.len();
        if n < self.warmup() {
            return Err(format!("need {} bars, have {}", self.warmup(), n));
        }
        let past = history[n - 1 - self.lookback].close;
        let now = history[n - 1].close;
        if past <= 0.0 || self.saturation <= 0.0 {
            return Err("non-positive reference price or saturation".into());
        }
        let roc = now / past - 1.0;
        Ok(prediction_from_strength(self.name(), roc / self.saturation))
    }
}

/// Fades stretched prices: z-score of the last close against the trailing
/// `lookback`-bar mean.
pub struct MeanReversionModel {
    pub lookback: usize,
}

impl PredictionModel for MeanReversionModel {
    fn name(&self) -> &str {
        "mean_reversion"
    }

    fn warmup(&self) -> usize {
        self.lookback.max(2)
    }

    fn predict(&self, history: &[Bar]) -> Result<ModelPrediction, String> {
        let n = history.len();
        if n < self.warmup() {
            return Err(format!("need {} bars, have {}", self.warmup(), n));
        }
        let window = &history[n - self.warmup()..];
        let len = window.len() as f64;
        let mean = window.iter().map(|b| b.close).sum::<f64>() / len;
        let variance = window.iter().map(|b| (b.close - mean).powi(2)).sum::<f64>() / len;
        let stddev = variance.sqrt();

        let z = if stddev > 0.0 {
            (history[n - 1].close - mean) / stddev
        } else {
            0.0
        };
        Ok(prediction_from_strength(self.name(), -z / 2.0))
    }
}
