//! Trade execution and fill simulation.
//!
//! Entry/exit fills with slippage, fractional-capital sizing, commissions,
//! and intrabar stop-loss/take-profit checks.

use chrono::NaiveDateTime;

use super::ohlcv::Bar;
use super::portfolio::Portfolio;
use super::position::{ExitReason, Position, Side, Trade};
use super::signal::Signal;

/// Cost and sizing parameters for fills.
#[derive(Debug, Clone, PartialEq)]
pub struct ExecutionConfig {
    /// Fraction of current cash committed to each new position, in (0, 1].
    pub position_fraction: f64,
    /// Commission as a fraction of traded notional, charged on entry and exit.
    pub commission_rate: f64,
    /// Fixed adverse price offset applied to market fills, in price units.
    pub slippage: f64,
}

impl Default for ExecutionConfig {
    fn default() -> Self {
        ExecutionConfig {
            position_fraction: 1.0,
            commission_rate: 0.0,
            slippage: 0.0,
        }
    }
}

impl ExecutionConfig {
    pub fn validate(&self) -> Result<(), (&'static str, String)> {
        if !self.position_fraction.is_finite()
            || self.position_fraction <= 0.0
            || self.position_fraction > 1.0
        {
            return Err((
                "position_fraction",
                format!("{} must be in (0, 1]", self.position_fraction),
            ));
        }
        if !self.commission_rate.is_finite()
            || self.commission_rate < 0.0
            || self.commission_rate >= 1.0
        {
            return Err((
                "commission_rate",
                format!("{} must be in [0, 1)", self.commission_rate),
            ));
        }
        if !self.slippage.is_finite() || self.slippage < 0.0 {
            return Err((
                "slippage",
                format!("{} must be non-negative", self.slippage),
            ));
        }
        Ok(())
    }
}

/// Where protective stop and target levels come from.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum StopSource {
    /// No stops; positions exit only on reversal or end of data.
    #[default]
    None,
    /// Absolute `stop_loss` / `target_price` carried on the entry signal.
    FromSignal,
    /// Fractions of the entry fill price; 0 disables that side.
    Fixed {
        stop_loss_pct: f64,
        take_profit_pct: f64,
    },
}

pub fn calculate_commission(notional: f64, config: &ExecutionConfig) -> f64 {
    notional * config.commission_rate
}

/// Buying pays `market + slippage`.
pub fn apply_slippage_buy(market_price: f64, slippage: f64) -> f64 {
    market_price + slippage
}

/// Selling receives `market - slippage`.
pub fn apply_slippage_sell(market_price: f64, slippage: f64) -> f64 {
    market_price - slippage
}

fn entry_fill(side: Side, market_price: f64, slippage: f64) -> f64 {
    match side {
        Side::Long => apply_slippage_buy(market_price, slippage),
        Side::Short => apply_slippage_sell(market_price, slippage),
    }
}

fn exit_fill(side: Side, market_price: f64, slippage: f64) -> f64 {
    match side {
        Side::Long => apply_slippage_sell(market_price, slippage),
        Side::Short => apply_slippage_buy(market_price, slippage),
    }
}

/// Stop and target levels for a new position filled at `entry_price`.
///
/// Levels on the wrong side of the entry (a long stop above the fill, say)
/// would trigger on the next bar regardless of price action, so they are
/// dropped.
pub fn resolve_stops(
    side: Side,
    entry_price: f64,
    signal: Option<&Signal>,
    source: &StopSource,
) -> (Option<f64>, Option<f64>) {
    let (stop, target) = match source {
        StopSource::None => (None, None),
        StopSource::FromSignal => match signal {
            Some(s) => (s.stop_loss, s.target_price),
            None => (None, None),
        },
        StopSource::Fixed {
            stop_loss_pct,
            take_profit_pct,
        } => {
            let stop = (*stop_loss_pct > 0.0)
                .then(|| entry_price * (1.0 - side.sign() * stop_loss_pct));
            let target = (*take_profit_pct > 0.0)
                .then(|| entry_price * (1.0 + side.sign() * take_profit_pct));
            (stop, target)
        }
    };

    let stop = stop.filter(|&level| match side {
        Side::Long => level < entry_price,
        Side::Short => level > entry_price,
    });
    let target = target.filter(|&level| match side {
        Side::Long => level > entry_price,
        Side::Short => level < entry_price,
    });
    (stop, target)
}

#[derive(Debug, Clone, PartialEq)]
pub enum EntryResult {
    Entered {
        size: f64,
        execution_price: f64,
        commission: f64,
    },
    Skipped(String),
}

/// Open a position at the bar's close, adjusted for slippage.
///
/// Size is `cash * position_fraction / fill`. Cash is not moved on entry; the
/// entry commission is carried on the position and realized with the trade.
pub fn enter_position(
    portfolio: &mut Portfolio,
    side: Side,
    bar: &Bar,
    index: usize,
    signal: Option<&Signal>,
    stop_source: &StopSource,
    config: &ExecutionConfig,
) -> EntryResult {
    if !portfolio.is_flat() {
        return EntryResult::Skipped("position already open".into());
    }
    if portfolio.cash <= 0.0 {
        return EntryResult::Skipped(format!("no capital (cash {})", portfolio.cash));
    }

    let execution_price = entry_fill(side, bar.close, config.slippage);
    if execution_price <= 0.0 {
        return EntryResult::Skipped(format!(
            "slippage {} leaves no positive fill at close {}",
            config.slippage, bar.close
        ));
    }

    let capital = portfolio.cash * config.position_fraction;
    let size = capital / execution_price;
    let commission = calculate_commission(capital, config);
    let (stop_loss, take_profit) = resolve_stops(side, execution_price, signal, stop_source);

    tracing::debug!(
        %side,
        time = %bar.timestamp,
        price = execution_price,
        size,
        ?stop_loss,
        ?take_profit,
        "open position"
    );

    portfolio.open(Position {
        side,
        entry_price: execution_price,
        entry_time: bar.timestamp,
        entry_index: index,
        size,
        entry_commission: commission,
        stop_loss,
        take_profit,
    });

    EntryResult::Entered {
        size,
        execution_price,
        commission,
    }
}

/// How an exit price is filled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Fill {
    /// Market order: slippage applies.
    Market,
    /// Resting stop/limit order: fills at exactly the given level.
    AtLevel,
}

/// Close the open position and append the trade to the ledger.
pub fn exit_position(
    portfolio: &mut Portfolio,
    price: f64,
    fill: Fill,
    exit_time: NaiveDateTime,
    reason: ExitReason,
    config: &ExecutionConfig,
) -> Option<Trade> {
    let position = portfolio.take_position()?;

    let exit_price = match fill {
        Fill::Market => exit_fill(position.side, price, config.slippage),
        Fill::AtLevel => price,
    };

    let exit_commission = calculate_commission(position.size * exit_price, config);
    let commission = position.entry_commission + exit_commission;
    let pnl = position.gross_pnl(exit_price) - commission;
    let notional = position.notional();
    let pnl_pct = if notional > 0.0 { pnl / notional } else { 0.0 };

    let trade = Trade {
        entry_time: position.entry_time,
        exit_time,
        direction: position.side,
        entry_price: position.entry_price,
        exit_price,
        size: position.size,
        pnl,
        pnl_pct,
        commission,
        exit_reason: reason,
    };

    tracing::debug!(
        side = %trade.direction,
        time = %exit_time,
        price = exit_price,
        pnl,
        reason = %reason,
        "close position"
    );

    portfolio.record_trade(trade.clone());
    Some(trade)
}

/// Check the open position's stop and target against the bar's range.
///
/// When both levels fall inside one bar the order of touches is unknown; the
/// stop is assumed to fill first.
pub fn check_triggers(
    portfolio: &mut Portfolio,
    bar: &Bar,
    config: &ExecutionConfig,
) -> Option<Trade> {
    let position = portfolio.position.as_ref()?;

    let (adverse, favorable) = match position.side {
        Side::Long => (bar.low, bar.high),
        Side::Short => (bar.high, bar.low),
    };

    let hit = if position.should_stop_loss(adverse) {
        position.stop_loss.map(|level| (level, ExitReason::StopLoss))
    } else if position.should_take_profit(favorable) {
        position.take_profit.map(|level| (level, ExitReason::TakeProfit))
    } else {
        None
    };

    let (level, reason) = hit?;
    exit_position(portfolio, level, Fill::AtLevel, bar.timestamp, reason, config)
}
