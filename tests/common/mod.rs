#![allow(dead_code)]

use chrono::{NaiveDate, NaiveDateTime};
use quantsim::domain::error::QuantsimError;
pub use quantsim::domain::ohlcv::{Bar, BarSeries};
use quantsim::domain::prediction::{Direction, ModelPrediction};
use quantsim::domain::signal::{Action, Signal, SignalOutcome};
use quantsim::ports::data_port::DataPort;

pub struct MockDataPort {
    pub bars: Vec<Bar>,
    pub signals: Vec<SignalOutcome>,
    pub predictions: Vec<Vec<ModelPrediction>>,
    pub error: Option<String>,
}

impl MockDataPort {
    pub fn new(bars: Vec<Bar>) -> Self {
        Self {
            bars,
            signals: Vec::new(),
            predictions: Vec::new(),
            error: None,
        }
    }

    pub fn with_signals(mut self, signals: Vec<SignalOutcome>) -> Self {
        self.signals = signals;
        self
    }

    pub fn with_predictions(mut self, predictions: Vec<Vec<ModelPrediction>>) -> Self {
        self.predictions = predictions;
        self
    }

    pub fn with_error(mut self, reason: &str) -> Self {
        self.error = Some(reason.to_string());
        self
    }

    fn check(&self) -> Result<(), QuantsimError> {
        match &self.error {
            Some(reason) => Err(QuantsimError::Data {
                reason: reason.clone(),
            }),
            None => Ok(()),
        }
    }
}

impl DataPort for MockDataPort {
    fn load_bars(&self) -> Result<BarSeries, QuantsimError> {
        self.check()?;
        BarSeries::new(self.bars.clone())
    }

    fn load_signals(&self, _bars: &BarSeries) -> Result<Vec<SignalOutcome>, QuantsimError> {
        self.check()?;
        Ok(self.signals.clone())
    }

    fn load_predictions(
        &self,
        _bars: &BarSeries,
    ) -> Result<Vec<Vec<ModelPrediction>>, QuantsimError> {
        self.check()?;
        Ok(self.predictions.clone())
    }
}

pub fn date(y: i32, m: u32, d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, d).unwrap()
}

/// Midnight of the `day`-th day after 2024-01-01.
pub fn at(day: usize) -> NaiveDateTime {
    date(2024, 1, 1).and_hms_opt(0, 0, 0).unwrap() + chrono::Duration::days(day as i64)
}

pub fn make_bar(day: usize, close: f64) -> Bar {
    Bar {
        timestamp: at(day),
        open: close,
        high: close,
        low: close,
        close,
        volume: 1_000.0,
    }
}

pub fn make_range_bar(day: usize, open: f64, high: f64, low: f64, close: f64) -> Bar {
    Bar {
        timestamp: at(day),
        open,
        high,
        low,
        close,
        volume: 1_000.0,
    }
}

pub fn bars_from_closes(closes: &[f64]) -> Vec<Bar> {
    closes
        .iter()
        .enumerate()
        .map(|(i, &c)| make_bar(i, c))
        .collect()
}

pub fn series_from_closes(closes: &[f64]) -> BarSeries {
    BarSeries::new(bars_from_closes(closes)).unwrap()
}

pub fn signals(actions: &[Action]) -> Vec<SignalOutcome> {
    actions
        .iter()
        .map(|&a| SignalOutcome::Ready(Signal::new(a, 1.0)))
        .collect()
}

pub fn prediction(name: &str, up: f64, down: f64, direction: Direction) -> ModelPrediction {
    ModelPrediction::new(name, "1d", up, down, direction, up.max(down))
}

/// Five bars, buy on the first and sell on the fourth: one long trade, +500.
pub fn reference_scenario() -> (BarSeries, Vec<SignalOutcome>) {
    let bars = series_from_closes(&[100.0, 102.0, 101.0, 105.0, 104.0]);
    let sigs = signals(&[
        Action::Buy,
        Action::Hold,
        Action::Hold,
        Action::Sell,
        Action::Hold,
    ]);
    (bars, sigs)
}
