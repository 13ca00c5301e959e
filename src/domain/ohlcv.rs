//! OHLCV bars and the validated bar series the engine replays.

use chrono::NaiveDateTime;
use serde::Serialize;

use super::error::QuantsimError;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Bar {
    pub timestamp: NaiveDateTime,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
}

impl Bar {
    /// Checks `low <= min(open, close) <= max(open, close) <= high` and `volume >= 0`.
    pub fn validate(&self) -> Result<(), String> {
        let fields = [
            ("open", self.open),
            ("high", self.high),
            ("low", self.low),
            ("close", self.close),
            ("volume", self.volume),
        ];
        for (name, value) in fields {
            if !value.is_finite() {
                return Err(format!("{name} is not finite"));
            }
        }
        if self.low > self.open.min(self.close) {
            return Err(format!(
                "low {} above body {}",
                self.low,
                self.open.min(self.close)
            ));
        }
        if self.high < self.open.max(self.close) {
            return Err(format!(
                "high {} below body {}",
                self.high,
                self.open.max(self.close)
            ));
        }
        if self.volume < 0.0 {
            return Err(format!("negative volume {}", self.volume));
        }
        Ok(())
    }
}

/// Immutable, strictly time-ordered sequence of bars.
///
/// The only way to build one is through [`BarSeries::new`], so every series a
/// backtest sees has already passed validation.
#[derive(Debug, Clone, PartialEq)]
pub struct BarSeries {
    bars: Vec<Bar>,
}

impl BarSeries {
    pub fn new(bars: Vec<Bar>) -> Result<Self, QuantsimError> {
        for (index, bar) in bars.iter().enumerate() {
            bar.validate()
                .map_err(|reason| QuantsimError::InvalidBar { index, reason })?;
        }
        for (i, pair) in bars.windows(2).enumerate() {
            if pair[1].timestamp <= pair[0].timestamp {
                return Err(QuantsimError::UnorderedTimestamps { index: i + 1 });
            }
        }
        Ok(Self { bars })
    }

    pub fn len(&self) -> usize {
        self.bars.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bars.is_empty()
    }

    pub fn bars(&self) -> &[Bar] {
        &self.bars
    }

    pub fn get(&self, index: usize) -> Option<&Bar> {
        self.bars.get(index)
    }

    pub fn first(&self) -> Option<&Bar> {
        self.bars.first()
    }

    pub fn last(&self) -> Option<&Bar> {
        self.bars.last()
    }

    /// Index of the bar stamped exactly `timestamp`.
    pub fn position_of(&self, timestamp: NaiveDateTime) -> Option<usize> {
        self.bars
            .binary_search_by(|bar| bar.timestamp.cmp(&timestamp))
            .ok()
    }

    pub fn closes(&self) -> impl Iterator<Item = f64> + '_ {
        self.bars.iter().map(|b| b.close)
    }
}
