//! CSV file data adapter.
//!
//! Expected headers:
//! - bars: `timestamp,open,high,low,close,volume`
//! - signals: `timestamp,action,confidence[,target_price,stop_loss,reason]`
//! - predictions: `timestamp,model_name,timeframe,up_probability,down_probability,direction,confidence[,weight]`

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use chrono::{NaiveDate, NaiveDateTime};
use serde::Deserialize;
use serde::de::DeserializeOwned;

use crate::domain::error::{EnsembleError, QuantsimError};
use crate::domain::ohlcv::{Bar, BarSeries};
use crate::domain::prediction::{Direction, ModelPrediction};
use crate::domain::signal::{Action, Signal, SignalOutcome};
use crate::ports::data_port::DataPort;

const DATETIME_FORMATS: [&str; 2] = ["%Y-%m-%d %H:%M:%S", "%Y-%m-%dT%H:%M:%S"];

/// Accepts `YYYY-MM-DD`, `YYYY-MM-DD HH:MM:SS` and `YYYY-MM-DDTHH:MM:SS`.
pub fn parse_timestamp(value: &str) -> Result<NaiveDateTime, String> {
    let value = value.trim();
    for format in DATETIME_FORMATS {
        if let Ok(ts) = NaiveDateTime::parse_from_str(value, format) {
            return Ok(ts);
        }
    }
    NaiveDate::parse_from_str(value, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .ok_or_else(|| format!("invalid timestamp '{value}'"))
}

#[derive(Debug, Deserialize)]
struct BarRow {
    timestamp: String,
    open: f64,
    high: f64,
    low: f64,
    close: f64,
    volume: f64,
}

#[derive(Debug, Deserialize)]
struct SignalRow {
    timestamp: String,
    action: String,
    confidence: f64,
    #[serde(default)]
    target_price: Option<f64>,
    #[serde(default)]
    stop_loss: Option<f64>,
    #[serde(default)]
    reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct PredictionRow {
    timestamp: String,
    model_name: String,
    timeframe: String,
    up_probability: f64,
    down_probability: f64,
    direction: String,
    confidence: f64,
    #[serde(default)]
    weight: Option<f64>,
}

/// Bars with no signal after the first signalled bar and before the last.
fn interior_gaps(slots: &[Option<Signal>]) -> usize {
    let Some(first) = slots.iter().position(Option::is_some) else {
        return 0;
    };
    slots[first..].iter().filter(|slot| slot.is_none()).count()
}

fn data_error(path: &Path, reason: impl std::fmt::Display) -> QuantsimError {
    QuantsimError::Data {
        reason: format!("{}: {}", path.display(), reason),
    }
}

fn read_rows<T: DeserializeOwned>(path: &Path) -> Result<Vec<T>, QuantsimError> {
    let mut rdr = csv::ReaderBuilder::new()
        .trim(csv::Trim::All)
        .from_path(path)
        .map_err(|e| data_error(path, e))?;
    rdr.deserialize()
        .enumerate()
        .map(|(line, row)| row.map_err(|e| data_error(path, format!("row {}: {}", line + 1, e))))
        .collect()
}

pub struct CsvAdapter {
    bars_path: PathBuf,
    signals_path: Option<PathBuf>,
    predictions_path: Option<PathBuf>,
}

impl CsvAdapter {
    pub fn new(bars_path: PathBuf) -> Self {
        Self {
            bars_path,
            signals_path: None,
            predictions_path: None,
        }
    }

    pub fn with_signals(mut self, path: PathBuf) -> Self {
        self.signals_path = Some(path);
        self
    }

    pub fn with_predictions(mut self, path: PathBuf) -> Self {
        self.predictions_path = Some(path);
        self
    }

    fn bar_index(
        bars: &BarSeries,
        path: &Path,
        raw: &str,
    ) -> Result<(usize, NaiveDateTime), QuantsimError> {
        let ts = parse_timestamp(raw).map_err(|e| data_error(path, e))?;
        let index = bars
            .position_of(ts)
            .ok_or_else(|| data_error(path, format!("no bar at {ts}")))?;
        Ok((index, ts))
    }
}

impl DataPort for CsvAdapter {
    fn load_bars(&self) -> Result<BarSeries, QuantsimError> {
        let path = &self.bars_path;
        let rows: Vec<BarRow> = read_rows(path)?;
        let mut bars = Vec::with_capacity(rows.len());
        for row in rows {
            bars.push(Bar {
                timestamp: parse_timestamp(&row.timestamp).map_err(|e| data_error(path, e))?,
                open: row.open,
                high: row.high,
                low: row.low,
                close: row.close,
                volume: row.volume,
            });
        }
        tracing::debug!(path = %path.display(), bars = bars.len(), "loaded bars");
        BarSeries::new(bars)
    }

    fn load_signals(&self, bars: &BarSeries) -> Result<Vec<SignalOutcome>, QuantsimError> {
        let path = self
            .signals_path
            .as_deref()
            .ok_or_else(|| QuantsimError::Data {
                reason: "no signals file configured".into(),
            })?;
        let rows: Vec<SignalRow> = read_rows(path)?;

        let mut slots: Vec<Option<Signal>> = Vec::new();
        for row in rows {
            let (index, ts) = Self::bar_index(bars, path, &row.timestamp)?;
            let action: Action = row
                .action
                .parse()
                .map_err(|reason| QuantsimError::InvalidSignal { index, reason })?;
            if slots.len() <= index {
                slots.resize(index + 1, None);
            }
            if slots[index].is_some() {
                return Err(data_error(path, format!("duplicate signal at {ts}")));
            }
            slots[index] = Some(Signal {
                action,
                confidence: row.confidence,
                target_price: row.target_price,
                stop_loss: row.stop_loss,
                reason: row.reason.unwrap_or_default(),
            });
        }

        let gaps = interior_gaps(&slots);
        if gaps > 0 {
            tracing::warn!(
                path = %path.display(),
                gaps,
                "signals file skips bars inside its range; those bars hold"
            );
        }

        Ok(slots
            .into_iter()
            .map(|slot| match slot {
                Some(signal) => SignalOutcome::Ready(signal),
                None => SignalOutcome::Unavailable("no signal for bar".into()),
            })
            .collect())
    }

    fn load_predictions(
        &self,
        bars: &BarSeries,
    ) -> Result<Vec<Vec<ModelPrediction>>, QuantsimError> {
        let path = self
            .predictions_path
            .as_deref()
            .ok_or_else(|| QuantsimError::Data {
                reason: "no predictions file configured".into(),
            })?;
        let rows: Vec<PredictionRow> = read_rows(path)?;

        let mut sets: Vec<Vec<ModelPrediction>> = vec![Vec::new(); bars.len()];
        let mut seen = HashSet::new();
        for row in rows {
            let (index, ts) = Self::bar_index(bars, path, &row.timestamp)?;
            if !seen.insert((index, row.model_name.to_lowercase(), row.timeframe.clone())) {
                return Err(data_error(
                    path,
                    format!("duplicate prediction from {} at {ts}", row.model_name),
                ));
            }
            let direction: Direction = row.direction.parse().map_err(|reason| {
                EnsembleError::InvalidPrediction {
                    model: row.model_name.clone(),
                    reason,
                }
            })?;
            let mut prediction = ModelPrediction::new(
                row.model_name,
                row.timeframe,
                row.up_probability,
                row.down_probability,
                direction,
                row.confidence,
            );
            if let Some(weight) = row.weight {
                prediction = prediction.with_weight(weight);
            }
            sets[index].push(prediction);
        }
        Ok(sets)
    }
}
