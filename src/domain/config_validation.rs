//! Configuration validation and typed config construction.
//!
//! Every field is checked before any run starts. Numeric values are parsed
//! from the raw string so a typo is reported instead of silently falling back
//! to a default.

use std::collections::HashMap;
use std::str::FromStr;

use crate::domain::backtest::{BacktestConfig, ReversalPolicy};
use crate::domain::calibration::PlattCalibrator;
use crate::domain::ensemble::{CombineMethod, EnsembleConfig, RecommendationBands};
use crate::domain::error::QuantsimError;
use crate::domain::execution::{ExecutionConfig, StopSource};
use crate::domain::metrics::DEFAULT_PERIODS_PER_YEAR;
use crate::domain::sweep::SweepGrid;
use crate::ports::config_port::ConfigPort;

fn invalid(section: &str, key: &str, reason: impl Into<String>) -> QuantsimError {
    QuantsimError::ConfigInvalid {
        section: section.to_string(),
        key: key.to_string(),
        reason: reason.into(),
    }
}

fn missing(section: &str, key: &str) -> QuantsimError {
    QuantsimError::ConfigMissing {
        section: section.to_string(),
        key: key.to_string(),
    }
}

/// Optional float; present but unparsable is an error.
pub fn read_double(
    config: &dyn ConfigPort,
    section: &str,
    key: &str,
) -> Result<Option<f64>, QuantsimError> {
    match config.get_string(section, key) {
        None => Ok(None),
        Some(raw) => {
            let value: f64 = raw
                .trim()
                .parse()
                .map_err(|_| invalid(section, key, format!("'{raw}' is not a number")))?;
            if !value.is_finite() {
                return Err(invalid(section, key, "must be finite"));
            }
            Ok(Some(value))
        }
    }
}

fn double_or(
    config: &dyn ConfigPort,
    section: &str,
    key: &str,
    default: f64,
) -> Result<f64, QuantsimError> {
    Ok(read_double(config, section, key)?.unwrap_or(default))
}

/// Comma-separated list of floats; absent or blank is empty.
pub fn read_list(
    config: &dyn ConfigPort,
    section: &str,
    key: &str,
) -> Result<Vec<f64>, QuantsimError> {
    let Some(raw) = config.get_string(section, key) else {
        return Ok(Vec::new());
    };
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|s| {
            s.parse::<f64>()
                .ok()
                .filter(|v| v.is_finite())
                .ok_or_else(|| invalid(section, key, format!("'{s}' is not a number")))
        })
        .collect()
}

fn read_parsed<T: FromStr<Err = String>>(
    config: &dyn ConfigPort,
    section: &str,
    key: &str,
) -> Result<Option<T>, QuantsimError> {
    config
        .get_string(section, key)
        .map(|raw| raw.parse::<T>().map_err(|reason| invalid(section, key, reason)))
        .transpose()
}

fn check_range(
    section: &str,
    key: &str,
    value: f64,
    ok: bool,
    expected: &str,
) -> Result<(), QuantsimError> {
    if ok {
        Ok(())
    } else {
        Err(invalid(section, key, format!("{value} {expected}")))
    }
}

pub fn validate_backtest_config(config: &dyn ConfigPort) -> Result<(), QuantsimError> {
    validate_initial_capital(config)?;
    validate_position_fraction(config)?;
    validate_commission(config)?;
    validate_slippage(config)?;
    validate_min_confidence(config)?;
    validate_periods_per_year(config)?;
    validate_stops(config)?;
    read_parsed::<ReversalPolicy>(config, "backtest", "reversal")?;
    Ok(())
}

pub fn validate_ensemble_config(config: &dyn ConfigPort) -> Result<(), QuantsimError> {
    build_ensemble_config(config).map(|_| ())
}

pub fn validate_sweep_config(config: &dyn ConfigPort) -> Result<(), QuantsimError> {
    build_sweep_grid(config)?;
    sweep_threads(config)?;
    Ok(())
}

/// `[data] bars` plus at least one of `signals` / `predictions`.
pub fn validate_data_config(config: &dyn ConfigPort) -> Result<(), QuantsimError> {
    let has = |key: &str| {
        config
            .get_string("data", key)
            .is_some_and(|s| !s.trim().is_empty())
    };
    if !has("bars") {
        return Err(missing("data", "bars"));
    }
    if !has("signals") && !has("predictions") {
        return Err(missing("data", "signals"));
    }
    Ok(())
}

fn validate_initial_capital(config: &dyn ConfigPort) -> Result<(), QuantsimError> {
    let value = read_double(config, "backtest", "initial_capital")?
        .ok_or_else(|| missing("backtest", "initial_capital"))?;
    check_range(
        "backtest",
        "initial_capital",
        value,
        value > 0.0,
        "must be positive",
    )
}

fn validate_position_fraction(config: &dyn ConfigPort) -> Result<(), QuantsimError> {
    let value = double_or(config, "backtest", "position_fraction", 1.0)?;
    check_range(
        "backtest",
        "position_fraction",
        value,
        value > 0.0 && value <= 1.0,
        "must be in (0, 1]",
    )
}

fn validate_commission(config: &dyn ConfigPort) -> Result<(), QuantsimError> {
    let value = double_or(config, "backtest", "commission_rate", 0.0)?;
    check_range(
        "backtest",
        "commission_rate",
        value,
        (0.0..1.0).contains(&value),
        "must be in [0, 1)",
    )
}

fn validate_slippage(config: &dyn ConfigPort) -> Result<(), QuantsimError> {
    let value = double_or(config, "backtest", "slippage", 0.0)?;
    check_range(
        "backtest",
        "slippage",
        value,
        value >= 0.0,
        "must be non-negative",
    )
}

fn validate_min_confidence(config: &dyn ConfigPort) -> Result<(), QuantsimError> {
    let value = double_or(config, "backtest", "min_confidence", 0.0)?;
    check_range(
        "backtest",
        "min_confidence",
        value,
        (0.0..=1.0).contains(&value),
        "must be in [0, 1]",
    )
}

fn validate_periods_per_year(config: &dyn ConfigPort) -> Result<(), QuantsimError> {
    let value = double_or(config, "backtest", "periods_per_year", DEFAULT_PERIODS_PER_YEAR)?;
    check_range(
        "backtest",
        "periods_per_year",
        value,
        value > 0.0,
        "must be positive",
    )
}

fn validate_stops(config: &dyn ConfigPort) -> Result<(), QuantsimError> {
    let stop = double_or(config, "backtest", "stop_loss_pct", 0.0)?;
    check_range(
        "backtest",
        "stop_loss_pct",
        stop,
        (0.0..1.0).contains(&stop),
        "must be in [0, 1)",
    )?;
    let target = double_or(config, "backtest", "take_profit_pct", 0.0)?;
    check_range(
        "backtest",
        "take_profit_pct",
        target,
        target >= 0.0,
        "must be non-negative",
    )?;
    stop_source(config, stop, target)?;
    Ok(())
}

fn stop_source(
    config: &dyn ConfigPort,
    stop_loss_pct: f64,
    take_profit_pct: f64,
) -> Result<StopSource, QuantsimError> {
    let raw = config
        .get_string("backtest", "stop_source")
        .unwrap_or_else(|| "none".to_string());
    match raw.trim().to_lowercase().as_str() {
        "none" => Ok(StopSource::None),
        "signal" => Ok(StopSource::FromSignal),
        "fixed" => Ok(StopSource::Fixed {
            stop_loss_pct,
            take_profit_pct,
        }),
        other => Err(invalid(
            "backtest",
            "stop_source",
            format!("'{other}' is not one of none, signal, fixed"),
        )),
    }
}

/// Typed backtest config from `[backtest]`, after validation.
pub fn build_backtest_config(config: &dyn ConfigPort) -> Result<BacktestConfig, QuantsimError> {
    validate_backtest_config(config)?;

    let initial_capital = read_double(config, "backtest", "initial_capital")?
        .ok_or_else(|| missing("backtest", "initial_capital"))?;
    let stop_loss_pct = double_or(config, "backtest", "stop_loss_pct", 0.0)?;
    let take_profit_pct = double_or(config, "backtest", "take_profit_pct", 0.0)?;

    Ok(BacktestConfig {
        initial_capital,
        execution: ExecutionConfig {
            position_fraction: double_or(config, "backtest", "position_fraction", 1.0)?,
            commission_rate: double_or(config, "backtest", "commission_rate", 0.0)?,
            slippage: double_or(config, "backtest", "slippage", 0.0)?,
        },
        stop_source: stop_source(config, stop_loss_pct, take_profit_pct)?,
        reversal: read_parsed(config, "backtest", "reversal")?.unwrap_or_default(),
        min_confidence: double_or(config, "backtest", "min_confidence", 0.0)?,
        periods_per_year: double_or(
            config,
            "backtest",
            "periods_per_year",
            DEFAULT_PERIODS_PER_YEAR,
        )?,
    })
}

/// Typed ensemble config from `[ensemble]` and `[weights]`.
pub fn build_ensemble_config(config: &dyn ConfigPort) -> Result<EnsembleConfig, QuantsimError> {
    let method: CombineMethod = read_parsed(config, "ensemble", "method")?.unwrap_or_default();

    let defaults = RecommendationBands::default();
    let bands = RecommendationBands {
        strong_confidence: double_or(
            config,
            "ensemble",
            "strong_confidence",
            defaults.strong_confidence,
        )?,
        strong_consensus: double_or(
            config,
            "ensemble",
            "strong_consensus",
            defaults.strong_consensus,
        )?,
        hold_confidence: double_or(config, "ensemble", "hold_confidence", defaults.hold_confidence)?,
        hold_consensus: double_or(config, "ensemble", "hold_consensus", defaults.hold_consensus)?,
    };
    bands
        .validate()
        .map_err(|reason| invalid("ensemble", "bands", reason))?;

    let mut model_weights = HashMap::new();
    for key in config.keys("weights") {
        let weight =
            read_double(config, "weights", &key)?.ok_or_else(|| missing("weights", &key))?;
        if weight < 0.0 {
            return Err(invalid("weights", &key, format!("{weight} must be non-negative")));
        }
        model_weights.insert(key.to_lowercase(), weight);
    }

    let calibration = match (
        read_double(config, "ensemble", "calibration_a")?,
        read_double(config, "ensemble", "calibration_b")?,
    ) {
        (Some(a), Some(b)) => Some(
            PlattCalibrator::new(a, b)
                .map_err(|e| invalid("ensemble", "calibration_a", e.to_string()))?,
        ),
        (None, None) => None,
        (Some(_), None) => return Err(missing("ensemble", "calibration_b")),
        (None, Some(_)) => return Err(missing("ensemble", "calibration_a")),
    };

    Ok(EnsembleConfig {
        method,
        bands,
        model_weights,
        calibration,
    })
}

/// Grid axes from `[sweep]`.
pub fn build_sweep_grid(config: &dyn ConfigPort) -> Result<SweepGrid, QuantsimError> {
    Ok(SweepGrid {
        position_fraction: read_list(config, "sweep", "position_fraction")?,
        commission_rate: read_list(config, "sweep", "commission_rate")?,
        slippage: read_list(config, "sweep", "slippage")?,
        stop_loss_pct: read_list(config, "sweep", "stop_loss_pct")?,
        take_profit_pct: read_list(config, "sweep", "take_profit_pct")?,
    })
}

/// `[sweep] threads`; 0 or absent lets the pool size itself.
pub fn sweep_threads(config: &dyn ConfigPort) -> Result<usize, QuantsimError> {
    match read_double(config, "sweep", "threads")? {
        None => Ok(0),
        Some(v) if v >= 0.0 && v.fract() == 0.0 => Ok(v as usize),
        Some(v) => Err(invalid("sweep", "threads", format!("{v} is not a thread count"))),
    }
}
