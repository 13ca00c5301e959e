//! The prediction contract every external model emits.

use std::fmt;
use std::str::FromStr;

use serde::Serialize;

/// Tolerance for `up + down <= 1` after floating-point arithmetic upstream.
const PROBABILITY_SLACK: f64 = 1e-9;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Up,
    Down,
    Flat,
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Direction::Up => write!(f, "up"),
            Direction::Down => write!(f, "down"),
            Direction::Flat => write!(f, "flat"),
        }
    }
}

impl FromStr for Direction {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "up" => Ok(Direction::Up),
            "down" => Ok(Direction::Down),
            // "hold" is what the upstream price-action models call a flat call
            "flat" | "hold" => Ok(Direction::Flat),
            other => Err(format!("unknown direction '{other}'")),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ModelPrediction {
    pub model_name: String,
    pub timeframe: String,
    pub down_probability: f64,
    pub up_probability: f64,
    pub direction: Direction,
    pub confidence: f64,
    pub weight: f64,
}

impl ModelPrediction {
    /// A prediction with the default weight of 1.
    pub fn new(
        model_name: impl Into<String>,
        timeframe: impl Into<String>,
        up_probability: f64,
        down_probability: f64,
        direction: Direction,
        confidence: f64,
    ) -> Self {
        ModelPrediction {
            model_name: model_name.into(),
            timeframe: timeframe.into(),
            down_probability,
            up_probability,
            direction,
            confidence,
            weight: 1.0,
        }
    }

    pub fn with_weight(mut self, weight: f64) -> Self {
        self.weight = weight;
        self
    }

    /// Probability mass assigned to neither direction.
    pub fn neutral_probability(&self) -> f64 {
        (1.0 - self.up_probability - self.down_probability).max(0.0)
    }

    /// Probability the model puts on its own call; neutral mass for `Flat`.
    pub fn own_direction_probability(&self) -> f64 {
        match self.direction {
            Direction::Up => self.up_probability,
            Direction::Down => self.down_probability,
            Direction::Flat => self.neutral_probability(),
        }
    }

    pub fn validate(&self) -> Result<(), String> {
        for (name, p) in [
            ("up_probability", self.up_probability),
            ("down_probability", self.down_probability),
            ("confidence", self.confidence),
        ] {
            if !p.is_finite() || !(0.0..=1.0).contains(&p) {
                return Err(format!("{name} {p} outside [0, 1]"));
            }
        }
        if self.up_probability + self.down_probability > 1.0 + PROBABILITY_SLACK {
            return Err(format!(
                "up + down probability {} exceeds 1",
                self.up_probability + self.down_probability
            ));
        }
        if !self.weight.is_finite() || self.weight < 0.0 {
            return Err(format!("weight {} must be non-negative", self.weight));
        }
        Ok(())
    }
}
