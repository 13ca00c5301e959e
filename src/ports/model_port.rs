//! Prediction model port trait.

use crate::domain::ohlcv::Bar;
use crate::domain::prediction::ModelPrediction;

/// An external model that emits one prediction from the bars seen so far.
///
/// `history` always ends at the bar being decided; implementations never see
/// later bars.
pub trait PredictionModel: Send + Sync {
    fn name(&self) -> &str;

    /// Bars needed before the model can predict.
    fn warmup(&self) -> usize {
        1
    }

    fn predict(&self, history: &[Bar]) -> Result<ModelPrediction, String>;
}
