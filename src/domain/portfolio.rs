//! Single-stream account state: cash, the open position, ledger and equity curve.

use chrono::NaiveDateTime;
use serde::Serialize;

use super::position::{Position, Trade};

/// Account value at one point of a run.
///
/// A backtest over `n` bars records `n + 1` points: the opening capital,
/// stamped with the first bar's timestamp, then one point per bar at its
/// close. The first two points therefore share a timestamp.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EquityPoint {
    pub timestamp: NaiveDateTime,
    pub equity: f64,
}

/// Account state owned by exactly one backtest run.
///
/// `cash` changes only when a trade closes, by that trade's net PnL, so at any
/// point `cash == initial_capital + sum(closed pnl)`.
#[derive(Debug, Clone, PartialEq)]
pub struct Portfolio {
    pub cash: f64,
    pub initial_capital: f64,
    pub position: Option<Position>,
    pub trades: Vec<Trade>,
    pub equity_curve: Vec<EquityPoint>,
}

impl Portfolio {
    pub fn new(initial_capital: f64) -> Self {
        Portfolio {
            cash: initial_capital,
            initial_capital,
            position: None,
            trades: Vec::new(),
            equity_curve: Vec::new(),
        }
    }

    pub fn is_flat(&self) -> bool {
        self.position.is_none()
    }

    pub fn open(&mut self, position: Position) {
        self.position = Some(position);
    }

    pub fn take_position(&mut self) -> Option<Position> {
        self.position.take()
    }

    pub fn record_trade(&mut self, trade: Trade) {
        self.cash += trade.pnl;
        self.trades.push(trade);
    }

    pub fn record_equity(&mut self, timestamp: NaiveDateTime, equity: f64) {
        self.equity_curve.push(EquityPoint { timestamp, equity });
    }

    /// Cash plus mark-to-market PnL of the open position at `price`.
    pub fn equity_at(&self, price: f64) -> f64 {
        match &self.position {
            Some(pos) => self.cash + pos.unrealized_pnl(price),
            None => self.cash,
        }
    }

    pub fn realized_pnl(&self) -> f64 {
        self.trades.iter().map(|t| t.pnl).sum()
    }
}
