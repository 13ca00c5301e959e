//! Ensemble combiner: reduces one set of model predictions for the same point
//! in time to a single consensus call.
//!
//! [`EnsembleCombiner::combine`] is a pure function of its inputs and the
//! combiner's configuration, so one combiner may be shared across threads.

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::fmt;

use serde::Serialize;

use super::calibration::PlattCalibrator;
use super::error::EnsembleError;
use super::prediction::{Direction, ModelPrediction};
use super::signal::{Action, Signal, SignalOutcome};

/// Up/down probabilities closer than this are a tie and resolve to `Flat`.
const TIE_TOLERANCE: f64 = 1e-12;

/// Number of most recent outcomes [`PerformanceTracker`] keeps per model.
pub const PERFORMANCE_WINDOW: usize = 30;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CombineMethod {
    /// Weighted mean of member probabilities.
    #[default]
    Weighted,
    /// Weighted majority vote on member directions.
    Voting,
}

impl std::str::FromStr for CombineMethod {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "weighted" => Ok(CombineMethod::Weighted),
            "voting" => Ok(CombineMethod::Voting),
            other => Err(format!("unknown combine method '{other}'")),
        }
    }
}

/// Threshold bands turning `(confidence, consensus)` into a recommendation.
#[derive(Debug, Clone, PartialEq)]
pub struct RecommendationBands {
    pub strong_confidence: f64,
    pub strong_consensus: f64,
    pub hold_confidence: f64,
    pub hold_consensus: f64,
}

impl Default for RecommendationBands {
    fn default() -> Self {
        RecommendationBands {
            strong_confidence: 0.6,
            strong_consensus: 0.6,
            hold_confidence: 0.5,
            hold_consensus: 0.4,
        }
    }
}

impl RecommendationBands {
    pub fn validate(&self) -> Result<(), String> {
        for (name, v) in [
            ("strong_confidence", self.strong_confidence),
            ("strong_consensus", self.strong_consensus),
            ("hold_confidence", self.hold_confidence),
            ("hold_consensus", self.hold_consensus),
        ] {
            if !v.is_finite() || !(0.0..=1.0).contains(&v) {
                return Err(format!("{name} {v} outside [0, 1]"));
            }
        }
        if self.hold_confidence > self.strong_confidence {
            return Err("hold_confidence must not exceed strong_confidence".into());
        }
        if self.hold_consensus > self.strong_consensus {
            return Err("hold_consensus must not exceed strong_consensus".into());
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Recommendation {
    StrongBuy,
    Buy,
    Hold,
    Sell,
    StrongSell,
}

impl Recommendation {
    pub fn action(&self) -> Action {
        match self {
            Recommendation::StrongBuy | Recommendation::Buy => Action::Buy,
            Recommendation::StrongSell | Recommendation::Sell => Action::Sell,
            Recommendation::Hold => Action::Hold,
        }
    }
}

impl fmt::Display for Recommendation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Recommendation::StrongBuy => "strong buy",
            Recommendation::Buy => "buy",
            Recommendation::Hold => "hold",
            Recommendation::Sell => "sell",
            Recommendation::StrongSell => "strong sell",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EnsembleResult {
    pub prediction: Direction,
    pub up_probability: f64,
    pub down_probability: f64,
    pub confidence: f64,
    pub consensus_level: f64,
    pub members: usize,
    /// Probability each member put on its own call, keyed `model@timeframe`
    /// so one model on several timeframes keeps one entry per timeframe.
    pub contributions: BTreeMap<String, f64>,
}

impl EnsembleResult {
    pub fn recommendation(&self, bands: &RecommendationBands) -> Recommendation {
        if self.prediction == Direction::Flat
            || self.confidence < bands.hold_confidence
            || self.consensus_level < bands.hold_consensus
        {
            return Recommendation::Hold;
        }
        let strong = self.confidence > bands.strong_confidence
            && self.consensus_level > bands.strong_consensus;
        match (self.prediction, strong) {
            (Direction::Up, true) => Recommendation::StrongBuy,
            (Direction::Up, false) => Recommendation::Buy,
            (Direction::Down, true) => Recommendation::StrongSell,
            (Direction::Down, false) => Recommendation::Sell,
            (Direction::Flat, _) => Recommendation::Hold,
        }
    }

    pub fn to_signal(&self, bands: &RecommendationBands) -> Signal {
        let rec = self.recommendation(bands);
        Signal::new(rec.action(), self.confidence.clamp(0.0, 1.0)).with_reason(format!(
            "ensemble {} ({} models, consensus {:.2})",
            rec, self.members, self.consensus_level
        ))
    }
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct EnsembleConfig {
    pub method: CombineMethod,
    pub bands: RecommendationBands,
    /// Per-model weight overrides keyed by lowercase model name.
    pub model_weights: HashMap<String, f64>,
    /// Applied to the combined up and down probabilities before a direction
    /// is picked.
    pub calibration: Option<PlattCalibrator>,
}

#[derive(Debug, Clone, Default)]
pub struct EnsembleCombiner {
    config: EnsembleConfig,
}

impl EnsembleCombiner {
    pub fn new(config: EnsembleConfig) -> Self {
        EnsembleCombiner { config }
    }

    pub fn config(&self) -> &EnsembleConfig {
        &self.config
    }

    pub fn bands(&self) -> &RecommendationBands {
        &self.config.bands
    }

    fn weight_of(&self, prediction: &ModelPrediction) -> f64 {
        self.config
            .model_weights
            .get(&prediction.model_name.to_lowercase())
            .copied()
            .unwrap_or(prediction.weight)
    }

    pub fn combine(&self, predictions: &[ModelPrediction]) -> Result<EnsembleResult, EnsembleError> {
        if predictions.is_empty() {
            return Err(EnsembleError::Empty);
        }

        let mut weighted = Vec::with_capacity(predictions.len());
        for p in predictions {
            p.validate().map_err(|reason| EnsembleError::InvalidPrediction {
                model: p.model_name.clone(),
                reason,
            })?;
            let w = self.weight_of(p);
            if !w.is_finite() || w < 0.0 {
                return Err(EnsembleError::InvalidPrediction {
                    model: p.model_name.clone(),
                    reason: format!("weight {w} must be non-negative"),
                });
            }
            weighted.push((p, w));
        }

        let total_weight: f64 = weighted.iter().map(|(_, w)| w).sum();
        if total_weight <= 0.0 {
            return Err(EnsembleError::NoConsensus { total_weight });
        }

        let (up, down) = match self.config.method {
            CombineMethod::Weighted => weighted_probabilities(&weighted, total_weight),
            CombineMethod::Voting => vote_shares(&weighted, total_weight),
        };
        let (up, down) = match &self.config.calibration {
            Some(cal) => clamp_pair(cal.calibrate(up), cal.calibrate(down)),
            None => (up, down),
        };

        let prediction = match self.config.method {
            CombineMethod::Weighted => pick_direction(up, down),
            CombineMethod::Voting => {
                let flat = (1.0 - up - down).max(0.0);
                if up > down + TIE_TOLERANCE && up > flat + TIE_TOLERANCE {
                    Direction::Up
                } else if down > up + TIE_TOLERANCE && down > flat + TIE_TOLERANCE {
                    Direction::Down
                } else {
                    Direction::Flat
                }
            }
        };

        let agreeing: f64 = weighted
            .iter()
            .filter(|(p, _)| p.direction == prediction)
            .map(|(_, w)| w)
            .sum();
        let consensus_level = (agreeing / total_weight).clamp(0.0, 1.0);

        let contributions = predictions
            .iter()
            .map(|p| {
                (
                    format!("{}@{}", p.model_name, p.timeframe),
                    p.own_direction_probability(),
                )
            })
            .collect();

        Ok(EnsembleResult {
            prediction,
            up_probability: up,
            down_probability: down,
            confidence: up.max(down),
            consensus_level,
            members: predictions.len(),
            contributions,
        })
    }

    /// Combines one prediction set per bar into per-bar signal outcomes.
    ///
    /// Sets that cannot be combined become `Unavailable` with the cause.
    pub fn combine_series(&self, sets: &[Vec<ModelPrediction>]) -> Vec<SignalOutcome> {
        sets.iter()
            .map(|set| match self.combine(set) {
                Ok(result) => SignalOutcome::Ready(result.to_signal(&self.config.bands)),
                Err(e) => SignalOutcome::Unavailable(e.to_string()),
            })
            .collect()
    }
}

fn weighted_probabilities(weighted: &[(&ModelPrediction, f64)], total_weight: f64) -> (f64, f64) {
    let up: f64 = weighted.iter().map(|(p, w)| w * p.up_probability).sum();
    let down: f64 = weighted.iter().map(|(p, w)| w * p.down_probability).sum();
    clamp_pair(up / total_weight, down / total_weight)
}

fn vote_shares(weighted: &[(&ModelPrediction, f64)], total_weight: f64) -> (f64, f64) {
    let share = |dir: Direction| -> f64 {
        weighted
            .iter()
            .filter(|(p, _)| p.direction == dir)
            .map(|(_, w)| w)
            .sum::<f64>()
            / total_weight
    };
    clamp_pair(share(Direction::Up), share(Direction::Down))
}

/// Keeps both probabilities in `[0, 1]` with `up + down <= 1` after rounding.
fn clamp_pair(up: f64, down: f64) -> (f64, f64) {
    let up = up.clamp(0.0, 1.0);
    let down = down.clamp(0.0, 1.0);
    let sum = up + down;
    if sum > 1.0 {
        (up / sum, down / sum)
    } else {
        (up, down)
    }
}

fn pick_direction(up: f64, down: f64) -> Direction {
    if (up - down).abs() <= TIE_TOLERANCE {
        Direction::Flat
    } else if up > down {
        Direction::Up
    } else {
        Direction::Down
    }
}

/// Rolling per-model hit record used to derive accuracy-based weights.
#[derive(Debug, Clone, Default)]
pub struct PerformanceTracker {
    history: BTreeMap<String, VecDeque<bool>>,
}

impl PerformanceTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&mut self, model_name: &str, was_correct: bool) {
        let window = self.history.entry(model_name.to_lowercase()).or_default();
        window.push_back(was_correct);
        while window.len() > PERFORMANCE_WINDOW {
            window.pop_front();
        }
    }

    /// Hit rate over the window; `None` for a model with no record.
    pub fn recent_accuracy(&self, model_name: &str) -> Option<f64> {
        let window = self.history.get(&model_name.to_lowercase())?;
        if window.is_empty() {
            return None;
        }
        let hits = window.iter().filter(|&&c| c).count();
        Some(hits as f64 / window.len() as f64)
    }

    /// Weights proportional to recent accuracy, normalized to sum to 1.
    ///
    /// Empty when no tracked model has a single hit, so callers keep their
    /// existing weights instead of zeroing every member.
    pub fn weights(&self) -> HashMap<String, f64> {
        let accuracies: Vec<(String, f64)> = self
            .history
            .keys()
            .filter_map(|name| self.recent_accuracy(name).map(|a| (name.clone(), a)))
            .collect();
        let total: f64 = accuracies.iter().map(|(_, a)| a).sum();
        if total <= 0.0 {
            return HashMap::new();
        }
        accuracies
            .into_iter()
            .map(|(name, a)| (name, a / total))
            .collect()
    }

    /// Replaces the combiner's weight overrides with tracked weights.
    pub fn apply_to(&self, config: &mut EnsembleConfig) {
        let weights = self.weights();
        if weights.is_empty() {
            return;
        }
        tracing::debug!(?weights, "re-weighting ensemble members");
        config.model_weights.extend(weights);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn pred(name: &str, up: f64, down: f64, dir: Direction, w: f64) -> ModelPrediction {
        ModelPrediction::new(name, "1d", up, down, dir, up.max(down)).with_weight(w)
    }

    #[test]
    fn opposing_members_tie_to_flat() {
        let combiner = EnsembleCombiner::default();
        let result = combiner
            .combine(&[
                pred("a", 0.6, 0.3, Direction::Up, 1.0),
                pred("b", 0.3, 0.6, Direction::Down, 1.0),
            ])
            .unwrap();

        assert_relative_eq!(result.up_probability, 0.45, epsilon = 1e-12);
        assert_relative_eq!(result.down_probability, 0.45, epsilon = 1e-12);
        assert_eq!(result.prediction, Direction::Flat);
        assert_eq!(result.consensus_level, 0.0);
        assert_eq!(result.recommendation(combiner.bands()), Recommendation::Hold);
    }

    #[test]
    fn weighted_mean_follows_weights() {
        let combiner = EnsembleCombiner::default();
        let result = combiner
            .combine(&[
                pred("a", 0.8, 0.1, Direction::Up, 3.0),
                pred("b", 0.2, 0.7, Direction::Down, 1.0),
            ])
            .unwrap();

        // up = (2.4 + 0.2) / 4, down = (0.3 + 0.7) / 4
        assert_relative_eq!(result.up_probability, 0.65, epsilon = 1e-12);
        assert_relative_eq!(result.down_probability, 0.25, epsilon = 1e-12);
        assert_eq!(result.prediction, Direction::Up);
        assert_relative_eq!(result.confidence, 0.65, epsilon = 1e-12);
        assert_relative_eq!(result.consensus_level, 0.75, epsilon = 1e-12);
        assert_eq!(result.members, 2);
    }

    #[test]
    fn unanimous_strong_call() {
        let combiner = EnsembleCombiner::default();
        let result = combiner
            .combine(&[
                pred("a", 0.7, 0.2, Direction::Up, 1.0),
                pred("b", 0.8, 0.1, Direction::Up, 1.0),
                pred("c", 0.75, 0.2, Direction::Up, 1.0),
            ])
            .unwrap();
        assert_eq!(result.consensus_level, 1.0);
        assert_eq!(
            result.recommendation(combiner.bands()),
            Recommendation::StrongBuy
        );
        assert_eq!(result.to_signal(combiner.bands()).action, Action::Buy);
    }

    #[test]
    fn weak_consensus_holds() {
        let combiner = EnsembleCombiner::default();
        let result = combiner
            .combine(&[
                pred("a", 0.9, 0.05, Direction::Up, 1.0),
                pred("b", 0.5, 0.4, Direction::Flat, 1.0),
                pred("c", 0.45, 0.4, Direction::Flat, 1.0),
            ])
            .unwrap();
        assert_eq!(result.prediction, Direction::Up);
        assert!(result.consensus_level < 0.4);
        assert_eq!(result.recommendation(combiner.bands()), Recommendation::Hold);
    }

    #[test]
    fn moderate_down_is_plain_sell() {
        let combiner = EnsembleCombiner::default();
        let result = combiner
            .combine(&[
                pred("a", 0.3, 0.55, Direction::Down, 1.0),
                pred("b", 0.35, 0.6, Direction::Down, 1.0),
            ])
            .unwrap();
        assert_eq!(result.prediction, Direction::Down);
        assert_eq!(result.recommendation(combiner.bands()), Recommendation::Sell);
    }

    #[test]
    fn empty_set_is_reported() {
        let combiner = EnsembleCombiner::default();
        assert_eq!(combiner.combine(&[]), Err(EnsembleError::Empty));
    }

    #[test]
    fn zero_total_weight_is_no_consensus() {
        let combiner = EnsembleCombiner::default();
        let err = combiner
            .combine(&[
                pred("a", 0.6, 0.3, Direction::Up, 0.0),
                pred("b", 0.3, 0.6, Direction::Down, 0.0),
            ])
            .unwrap_err();
        assert!(matches!(err, EnsembleError::NoConsensus { .. }));
    }

    #[test]
    fn invalid_member_is_reported_by_name() {
        let combiner = EnsembleCombiner::default();
        let err = combiner
            .combine(&[pred("broken", 0.8, 0.4, Direction::Up, 1.0)])
            .unwrap_err();
        assert!(matches!(err, EnsembleError::InvalidPrediction { ref model, .. } if model == "broken"));
    }

    #[test]
    fn config_weights_override_case_insensitive() {
        let mut config = EnsembleConfig::default();
        config.model_weights.insert("xgboost".into(), 0.0);
        let combiner = EnsembleCombiner::new(config);
        let result = combiner
            .combine(&[
                pred("XGBoost", 0.9, 0.05, Direction::Up, 1.0),
                pred("lstm", 0.2, 0.7, Direction::Down, 1.0),
            ])
            .unwrap();
        assert_eq!(result.prediction, Direction::Down);
        assert_eq!(result.consensus_level, 1.0);
    }

    #[test]
    fn voting_uses_vote_shares() {
        let combiner = EnsembleCombiner::new(EnsembleConfig {
            method: CombineMethod::Voting,
            ..Default::default()
        });
        let result = combiner
            .combine(&[
                pred("a", 0.55, 0.4, Direction::Up, 1.0),
                pred("b", 0.6, 0.3, Direction::Up, 1.0),
                pred("c", 0.1, 0.9, Direction::Down, 1.0),
                pred("d", 0.4, 0.4, Direction::Flat, 1.0),
            ])
            .unwrap();
        assert_relative_eq!(result.up_probability, 0.5);
        assert_relative_eq!(result.down_probability, 0.25);
        assert_eq!(result.prediction, Direction::Up);
        assert_relative_eq!(result.consensus_level, 0.5);
    }

    #[test]
    fn voting_without_plurality_is_flat() {
        let combiner = EnsembleCombiner::new(EnsembleConfig {
            method: CombineMethod::Voting,
            ..Default::default()
        });
        let result = combiner
            .combine(&[
                pred("a", 0.6, 0.3, Direction::Up, 1.0),
                pred("b", 0.3, 0.6, Direction::Down, 1.0),
            ])
            .unwrap();
        assert_eq!(result.prediction, Direction::Flat);
        assert_eq!(result.consensus_level, 0.0);
    }

    #[test]
    fn contributions_record_own_call() {
        let combiner = EnsembleCombiner::default();
        let result = combiner
            .combine(&[
                pred("a", 0.7, 0.2, Direction::Up, 1.0),
                pred("b", 0.3, 0.6, Direction::Down, 1.0),
            ])
            .unwrap();
        assert_eq!(result.contributions["a@1d"], 0.7);
        assert_eq!(result.contributions["b@1d"], 0.6);
    }

    #[test]
    fn contributions_keep_every_timeframe_of_a_model() {
        let combiner = EnsembleCombiner::default();
        let hourly = ModelPrediction::new("xgb", "1h", 0.7, 0.2, Direction::Up, 0.7);
        let daily = ModelPrediction::new("xgb", "1d", 0.2, 0.7, Direction::Down, 0.7);
        let lstm = ModelPrediction::new("lstm", "1d", 0.6, 0.3, Direction::Up, 0.6);
        let result = combiner.combine(&[hourly, daily, lstm]).unwrap();

        assert_eq!(result.members, 3);
        assert_eq!(result.contributions.len(), result.members);
        assert_eq!(result.contributions["xgb@1h"], 0.7);
        assert_eq!(result.contributions["xgb@1d"], 0.7);
        assert_eq!(result.contributions["lstm@1d"], 0.6);
    }

    #[test]
    fn calibration_applies_before_direction_is_picked() {
        let members = [
            pred("a", 0.9, 0.05, Direction::Up, 1.0),
            pred("b", 0.8, 0.15, Direction::Up, 1.0),
        ];
        let raw = EnsembleCombiner::default().combine(&members).unwrap();
        assert_eq!(
            raw.recommendation(&RecommendationBands::default()),
            Recommendation::StrongBuy
        );

        // shrinks everything toward 0.5: 0.85 up becomes about 0.59
        let cal = PlattCalibrator::new(1.0, -0.5).unwrap();
        let combiner = EnsembleCombiner::new(EnsembleConfig {
            calibration: Some(cal),
            ..Default::default()
        });
        let result = combiner.combine(&members).unwrap();

        assert_relative_eq!(result.up_probability, cal.calibrate(0.85), epsilon = 1e-12);
        assert!(result.up_probability < raw.up_probability);
        assert!(result.up_probability + result.down_probability <= 1.0 + 1e-12);
        assert_eq!(result.prediction, Direction::Up);
        assert_relative_eq!(result.confidence, result.up_probability);
        assert_eq!(result.recommendation(combiner.bands()), Recommendation::Buy);
    }

    #[test]
    fn inverted_calibration_can_flip_direction() {
        let cal = PlattCalibrator::new(-4.0, 2.0).unwrap();
        let combiner = EnsembleCombiner::new(EnsembleConfig {
            calibration: Some(cal),
            ..Default::default()
        });
        let result = combiner
            .combine(&[pred("a", 0.7, 0.2, Direction::Up, 1.0)])
            .unwrap();
        assert_eq!(result.prediction, Direction::Down);
    }

    #[test]
    fn combine_series_marks_failures_unavailable() {
        let combiner = EnsembleCombiner::default();
        let sets = vec![
            vec![
                pred("a", 0.8, 0.1, Direction::Up, 1.0),
                pred("b", 0.7, 0.2, Direction::Up, 1.0),
            ],
            vec![],
        ];
        let outcomes = combiner.combine_series(&sets);
        assert_eq!(outcomes[0].effective_action(), Action::Buy);
        assert!(matches!(outcomes[1], SignalOutcome::Unavailable(_)));
        assert_eq!(outcomes[1].effective_action(), Action::Hold);
    }

    #[test]
    fn bands_validation() {
        assert!(RecommendationBands::default().validate().is_ok());
        let bands = RecommendationBands {
            hold_confidence: 0.7,
            ..Default::default()
        };
        assert!(bands.validate().is_err());
    }

    #[test]
    fn tracker_keeps_rolling_window() {
        let mut tracker = PerformanceTracker::new();
        for _ in 0..PERFORMANCE_WINDOW {
            tracker.record("lstm", false);
        }
        for _ in 0..PERFORMANCE_WINDOW {
            tracker.record("LSTM", true);
        }
        assert_eq!(tracker.recent_accuracy("lstm"), Some(1.0));
        assert_eq!(tracker.recent_accuracy("transformer"), None);
    }

    #[test]
    fn tracker_weights_normalize() {
        let mut tracker = PerformanceTracker::new();
        tracker.record("a", true);
        tracker.record("a", true);
        tracker.record("b", true);
        tracker.record("b", false);
        let weights = tracker.weights();
        assert_relative_eq!(weights["a"], 2.0 / 3.0, epsilon = 1e-12);
        assert_relative_eq!(weights["b"], 1.0 / 3.0, epsilon = 1e-12);

        let mut config = EnsembleConfig::default();
        tracker.apply_to(&mut config);
        assert_eq!(config.model_weights.len(), 2);
    }

    #[test]
    fn tracker_all_wrong_keeps_existing_weights() {
        let mut tracker = PerformanceTracker::new();
        tracker.record("a", false);
        let mut config = EnsembleConfig::default();
        config.model_weights.insert("a".into(), 0.4);
        tracker.apply_to(&mut config);
        assert_eq!(config.model_weights["a"], 0.4);
    }
}
