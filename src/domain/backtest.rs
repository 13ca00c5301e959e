//! Backtest engine: a single ordered pass over a bar series and its signals.
//!
//! Per bar, in order:
//! 1. an open position from an earlier bar has its stop/target checked
//!    against the bar's high/low range;
//! 2. the bar's signal is applied (open, close or reverse, or keep);
//! 3. equity is marked at the bar's close.
//!
//! Any position still open after the last bar is closed at that bar's close.

use std::collections::BTreeMap;

use super::error::QuantsimError;
use super::execution::{
    self, EntryResult, ExecutionConfig, Fill, StopSource, check_triggers, enter_position,
};
use super::metrics::{DEFAULT_PERIODS_PER_YEAR, Metrics};
use super::ohlcv::{Bar, BarSeries};
use super::portfolio::{EquityPoint, Portfolio};
use super::position::{ExitReason, Side, Trade};
use super::signal::{Action, Signal, SignalOutcome};

/// What an opposite-direction signal does to an open position.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ReversalPolicy {
    /// Close at the bar's close and stay flat.
    #[default]
    CloseOnly,
    /// Close at the bar's close and open the opposite side on the same bar.
    CloseAndReverse,
}

impl std::str::FromStr for ReversalPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "close" | "close_only" => Ok(ReversalPolicy::CloseOnly),
            "reverse" | "close_and_reverse" => Ok(ReversalPolicy::CloseAndReverse),
            other => Err(format!("unknown reversal policy '{other}'")),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct BacktestConfig {
    pub initial_capital: f64,
    pub execution: ExecutionConfig,
    pub stop_source: StopSource,
    pub reversal: ReversalPolicy,
    /// Ready signals below this confidence are replayed as `hold`.
    pub min_confidence: f64,
    /// Sampling frequency used to annualize the Sharpe and Sortino ratios.
    pub periods_per_year: f64,
}

impl BacktestConfig {
    pub fn new(initial_capital: f64) -> Self {
        BacktestConfig {
            initial_capital,
            execution: ExecutionConfig::default(),
            stop_source: StopSource::None,
            reversal: ReversalPolicy::default(),
            min_confidence: 0.0,
            periods_per_year: DEFAULT_PERIODS_PER_YEAR,
        }
    }

    pub fn validate(&self) -> Result<(), QuantsimError> {
        if !self.initial_capital.is_finite() || self.initial_capital <= 0.0 {
            return Err(QuantsimError::InvalidCapital {
                value: self.initial_capital,
            });
        }
        self.execution
            .validate()
            .map_err(|(name, reason)| invalid_parameter(name, reason))?;
        if !self.min_confidence.is_finite() || !(0.0..=1.0).contains(&self.min_confidence) {
            return Err(invalid_parameter(
                "min_confidence",
                format!("{} outside [0, 1]", self.min_confidence),
            ));
        }
        if !self.periods_per_year.is_finite() || self.periods_per_year <= 0.0 {
            return Err(invalid_parameter(
                "periods_per_year",
                format!("{} must be positive", self.periods_per_year),
            ));
        }
        if let StopSource::Fixed {
            stop_loss_pct,
            take_profit_pct,
        } = self.stop_source
        {
            if !stop_loss_pct.is_finite() || !(0.0..1.0).contains(&stop_loss_pct) {
                return Err(invalid_parameter(
                    "stop_loss_pct",
                    format!("{stop_loss_pct} outside [0, 1)"),
                ));
            }
            if !take_profit_pct.is_finite() || take_profit_pct < 0.0 {
                return Err(invalid_parameter(
                    "take_profit_pct",
                    format!("{take_profit_pct} must be non-negative"),
                ));
            }
        }
        Ok(())
    }
}

impl Default for BacktestConfig {
    fn default() -> Self {
        BacktestConfig::new(10_000.0)
    }
}

fn invalid_parameter(name: &str, reason: String) -> QuantsimError {
    QuantsimError::InvalidParameter {
        name: name.to_string(),
        reason,
    }
}

/// Complete output of one run. Either fully built or not returned at all.
#[derive(Debug, Clone, PartialEq)]
pub struct BacktestResult {
    pub initial_capital: f64,
    pub trades: Vec<Trade>,
    pub equity_curve: Vec<EquityPoint>,
    pub metrics: Metrics,
    pub bars: usize,
    pub unavailable_signals: usize,
}

impl BacktestResult {
    /// Flat `key -> value` view for report files.
    ///
    /// Floats use Rust's shortest round-trip formatting, so parsing a value
    /// back yields the identical `f64`; the profit-factor sentinel prints as
    /// `inf`.
    pub fn to_flat_map(&self) -> BTreeMap<String, String> {
        let m = &self.metrics;
        let mut map = BTreeMap::new();
        let mut put = |key: &str, value: String| {
            map.insert(key.to_string(), value);
        };

        put("initial_capital", self.initial_capital.to_string());
        put("bars", self.bars.to_string());
        put("unavailable_signals", self.unavailable_signals.to_string());
        put("total_trades", m.total_trades.to_string());
        put("winning_trades", m.winning_trades.to_string());
        put("losing_trades", m.losing_trades.to_string());
        put("breakeven_trades", m.breakeven_trades.to_string());
        put("win_rate", m.win_rate.to_string());
        put("profit_factor", m.profit_factor.to_string());
        put("total_return", m.total_return.to_string());
        put("total_return_pct", m.total_return_pct.to_string());
        put("final_equity", m.final_equity.to_string());
        put("max_drawdown", m.max_drawdown.to_string());
        put("max_drawdown_pct", m.max_drawdown_pct.to_string());
        put("sharpe_ratio", m.sharpe_ratio.to_string());
        put("sortino_ratio", m.sortino_ratio.to_string());
        put("avg_win", m.avg_win.to_string());
        put("avg_loss", m.avg_loss.to_string());
        put("largest_win", m.largest_win.to_string());
        put("largest_loss", m.largest_loss.to_string());
        map
    }
}

/// Check every input before the first bar is replayed.
fn validate_inputs(
    bars: &BarSeries,
    signals: &[SignalOutcome],
    config: &BacktestConfig,
) -> Result<(), QuantsimError> {
    if bars.is_empty() {
        return Err(QuantsimError::EmptySeries);
    }
    if signals.len() > bars.len() {
        return Err(QuantsimError::SignalLengthMismatch {
            signals: signals.len(),
            bars: bars.len(),
        });
    }
    config.validate()?;
    for (index, outcome) in signals.iter().enumerate() {
        if let SignalOutcome::Ready(signal) = outcome {
            signal
                .validate()
                .map_err(|reason| QuantsimError::InvalidSignal { index, reason })?;
        }
    }
    Ok(())
}

/// Signal the engine acts on at one bar, if any.
fn actionable<'a>(outcome: Option<&'a SignalOutcome>, min_confidence: f64) -> Option<&'a Signal> {
    outcome
        .and_then(SignalOutcome::signal)
        .filter(|s| s.action != Action::Hold && s.confidence >= min_confidence)
}

fn side_for(action: Action) -> Option<Side> {
    match action {
        Action::Buy => Some(Side::Long),
        Action::Sell => Some(Side::Short),
        Action::Hold => None,
    }
}

/// Replay `bars` against `signals` (one per bar from the first bar; a shorter
/// stream leaves the remaining bars as `hold`).
pub fn run_backtest(
    bars: &BarSeries,
    signals: &[SignalOutcome],
    config: &BacktestConfig,
) -> Result<BacktestResult, QuantsimError> {
    validate_inputs(bars, signals, config)?;

    let series = bars.bars();
    let (Some(first), Some(last)) = (series.first(), series.last()) else {
        return Err(QuantsimError::EmptySeries);
    };

    tracing::info!(
        bars = series.len(),
        signals = signals.len(),
        initial_capital = config.initial_capital,
        "backtest start"
    );

    let mut portfolio = Portfolio::new(config.initial_capital);
    portfolio.record_equity(first.timestamp, config.initial_capital);

    let mut unavailable_signals = 0usize;
    for (index, bar) in series.iter().enumerate() {
        step(
            &mut portfolio,
            bar,
            index,
            signals.get(index),
            config,
            &mut unavailable_signals,
        );
    }

    if portfolio.position.is_some() {
        execution::exit_position(
            &mut portfolio,
            last.close,
            Fill::Market,
            last.timestamp,
            ExitReason::EndOfData,
            &config.execution,
        );
        // replace the final mark with the realized value so the curve ends on
        // initial_capital + sum(trade pnl)
        if let Some(point) = portfolio.equity_curve.last_mut() {
            point.equity = portfolio.cash;
        }
    }

    let metrics = Metrics::summarize(
        &portfolio.trades,
        &portfolio.equity_curve,
        config.initial_capital,
        config.periods_per_year,
    );

    tracing::info!(
        trades = metrics.total_trades,
        realized_pnl = portfolio.realized_pnl(),
        final_equity = metrics.final_equity,
        total_return_pct = metrics.total_return_pct,
        "backtest finished"
    );

    Ok(BacktestResult {
        initial_capital: config.initial_capital,
        trades: portfolio.trades,
        equity_curve: portfolio.equity_curve,
        metrics,
        bars: series.len(),
        unavailable_signals,
    })
}

/// Plain-signal entry point with default execution settings.
pub fn run(
    bars: &BarSeries,
    signals: &[Signal],
    initial_capital: f64,
) -> Result<BacktestResult, QuantsimError> {
    let outcomes: Vec<SignalOutcome> = signals.iter().cloned().map(SignalOutcome::Ready).collect();
    run_backtest(bars, &outcomes, &BacktestConfig::new(initial_capital))
}

fn step(
    portfolio: &mut Portfolio,
    bar: &Bar,
    index: usize,
    outcome: Option<&SignalOutcome>,
    config: &BacktestConfig,
    unavailable_signals: &mut usize,
) {
    let opened_earlier = portfolio
        .position
        .as_ref()
        .is_some_and(|p| p.entry_index < index);
    if opened_earlier {
        check_triggers(portfolio, bar, &config.execution);
    }

    if let Some(SignalOutcome::Unavailable(reason)) = outcome {
        *unavailable_signals += 1;
        tracing::debug!(index, %reason, "signal unavailable, holding");
    }

    if let Some(signal) = actionable(outcome, config.min_confidence) {
        if let Some(target) = side_for(signal.action) {
            apply_signal(portfolio, bar, index, signal, target, config);
        }
    }

    let equity = portfolio.equity_at(bar.close);
    portfolio.record_equity(bar.timestamp, equity);
}

fn apply_signal(
    portfolio: &mut Portfolio,
    bar: &Bar,
    index: usize,
    signal: &Signal,
    target: Side,
    config: &BacktestConfig,
) {
    match portfolio.position.as_ref().map(|p| p.side) {
        Some(current) if current == target => return,
        Some(_) => {
            execution::exit_position(
                portfolio,
                bar.close,
                Fill::Market,
                bar.timestamp,
                ExitReason::SignalReversal,
                &config.execution,
            );
            if config.reversal == ReversalPolicy::CloseOnly {
                return;
            }
        }
        None => {}
    }

    let entry = enter_position(
        portfolio,
        target,
        bar,
        index,
        Some(signal),
        &config.stop_source,
        &config.execution,
    );
    if let EntryResult::Skipped(reason) = entry {
        tracing::debug!(index, side = %target, %reason, "entry skipped");
    }
}
