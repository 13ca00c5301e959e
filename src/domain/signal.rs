//! Trading signals and the explicit per-bar signal outcome.

use std::fmt;
use std::str::FromStr;

use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Action {
    Buy,
    Sell,
    Hold,
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Action::Buy => write!(f, "buy"),
            Action::Sell => write!(f, "sell"),
            Action::Hold => write!(f, "hold"),
        }
    }
}

impl FromStr for Action {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "buy" => Ok(Action::Buy),
            "sell" => Ok(Action::Sell),
            "hold" => Ok(Action::Hold),
            other => Err(format!("unknown action '{other}'")),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Signal {
    pub action: Action,
    pub confidence: f64,
    pub target_price: Option<f64>,
    pub stop_loss: Option<f64>,
    pub reason: String,
}

impl Signal {
    pub fn new(action: Action, confidence: f64) -> Self {
        Signal {
            action,
            confidence,
            target_price: None,
            stop_loss: None,
            reason: String::new(),
        }
    }

    pub fn hold() -> Self {
        Signal::new(Action::Hold, 0.0)
    }

    pub fn with_reason(mut self, reason: impl Into<String>) -> Self {
        self.reason = reason.into();
        self
    }

    pub fn with_stops(mut self, stop_loss: Option<f64>, target_price: Option<f64>) -> Self {
        self.stop_loss = stop_loss;
        self.target_price = target_price;
        self
    }

    pub fn validate(&self) -> Result<(), String> {
        if !self.confidence.is_finite() || !(0.0..=1.0).contains(&self.confidence) {
            return Err(format!("confidence {} outside [0, 1]", self.confidence));
        }
        for (name, price) in [
            ("target_price", self.target_price),
            ("stop_loss", self.stop_loss),
        ] {
            if let Some(p) = price {
                if !p.is_finite() || p <= 0.0 {
                    return Err(format!("{name} {p} must be positive"));
                }
            }
        }
        Ok(())
    }
}

/// What a signal producer yielded for one bar.
///
/// Producers never hide a failed prediction behind a default `hold`; they
/// return `Unavailable` with the cause. The backtest engine replays an
/// unavailable bar as `hold`: open positions stay open (their stops are still
/// checked) and no new position is entered.
#[derive(Debug, Clone, PartialEq)]
pub enum SignalOutcome {
    Ready(Signal),
    Unavailable(String),
}

impl SignalOutcome {
    pub fn signal(&self) -> Option<&Signal> {
        match self {
            SignalOutcome::Ready(s) => Some(s),
            SignalOutcome::Unavailable(_) => None,
        }
    }

    pub fn is_available(&self) -> bool {
        matches!(self, SignalOutcome::Ready(_))
    }

    /// Action the engine acts on, with unavailable bars resolving to `Hold`.
    pub fn effective_action(&self) -> Action {
        self.signal().map(|s| s.action).unwrap_or(Action::Hold)
    }
}

impl From<Signal> for SignalOutcome {
    fn from(signal: Signal) -> Self {
        SignalOutcome::Ready(signal)
    }
}

/// Wraps plain signals as ready outcomes.
pub fn ready_all(signals: Vec<Signal>) -> Vec<SignalOutcome> {
    signals.into_iter().map(SignalOutcome::Ready).collect()
}
