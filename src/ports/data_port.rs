//! Data access port trait.
//!
//! Bars, signals and prediction sets are read whole before any run starts.

use crate::domain::error::QuantsimError;
use crate::domain::ohlcv::BarSeries;
use crate::domain::prediction::ModelPrediction;
use crate::domain::signal::SignalOutcome;

pub trait DataPort {
    /// Validated bar series.
    fn load_bars(&self) -> Result<BarSeries, QuantsimError>;

    /// One outcome per bar of `bars`, aligned by timestamp from the first bar.
    ///
    /// Bars with no record before the last supplied signal are `Unavailable`.
    fn load_signals(&self, bars: &BarSeries) -> Result<Vec<SignalOutcome>, QuantsimError>;

    /// One (possibly empty) prediction set per bar of `bars`.
    fn load_predictions(&self, bars: &BarSeries)
    -> Result<Vec<Vec<ModelPrediction>>, QuantsimError>;
}
