//! Open positions and closed trades.

use std::fmt;

use chrono::NaiveDateTime;
use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Side {
    Long,
    Short,
}

impl Side {
    /// +1 for long, -1 for short.
    pub fn sign(&self) -> f64 {
        match self {
            Side::Long => 1.0,
            Side::Short => -1.0,
        }
    }
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Side::Long => write!(f, "long"),
            Side::Short => write!(f, "short"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ExitReason {
    SignalReversal,
    StopLoss,
    TakeProfit,
    EndOfData,
}

impl fmt::Display for ExitReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ExitReason::SignalReversal => "signal_reversal",
            ExitReason::StopLoss => "stop_loss",
            ExitReason::TakeProfit => "take_profit",
            ExitReason::EndOfData => "end_of_data",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Position {
    pub side: Side,
    pub entry_price: f64,
    pub entry_time: NaiveDateTime,
    /// Bar index the position was opened on.
    pub entry_index: usize,
    pub size: f64,
    pub entry_commission: f64,
    pub stop_loss: Option<f64>,
    pub take_profit: Option<f64>,
}

impl Position {
    pub fn notional(&self) -> f64 {
        self.size * self.entry_price
    }

    /// Price PnL at `price`, before commissions.
    pub fn gross_pnl(&self, price: f64) -> f64 {
        self.side.sign() * (price - self.entry_price) * self.size
    }

    /// Mark-to-market PnL at `price`, net of the commission already paid to enter.
    pub fn unrealized_pnl(&self, price: f64) -> f64 {
        self.gross_pnl(price) - self.entry_commission
    }

    /// True when `price` reaches the stop (at or beyond, on the losing side).
    pub fn should_stop_loss(&self, price: f64) -> bool {
        match (self.stop_loss, self.side) {
            (None, _) => false,
            (Some(stop), Side::Long) => price <= stop,
            (Some(stop), Side::Short) => price >= stop,
        }
    }

    pub fn should_take_profit(&self, price: f64) -> bool {
        match (self.take_profit, self.side) {
            (None, _) => false,
            (Some(target), Side::Long) => price >= target,
            (Some(target), Side::Short) => price <= target,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Trade {
    pub entry_time: NaiveDateTime,
    pub exit_time: NaiveDateTime,
    pub direction: Side,
    pub entry_price: f64,
    pub exit_price: f64,
    pub size: f64,
    pub pnl: f64,
    pub pnl_pct: f64,
    pub commission: f64,
    pub exit_reason: ExitReason,
}
