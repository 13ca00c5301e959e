//! Builds per-bar signals by running prediction models over a bar series.

use super::ensemble::{EnsembleCombiner, PerformanceTracker};
use super::ohlcv::BarSeries;
use super::prediction::{Direction, ModelPrediction};
use super::signal::SignalOutcome;
use crate::ports::model_port::PredictionModel;

/// One outcome per bar.
///
/// At bar `i` every model sees only `bars[..=i]`. Models still warming up or
/// failing are left out of that bar's set; a bar with no usable prediction,
/// or whose set cannot be combined, is `Unavailable`.
pub fn build_signal_feed(
    bars: &BarSeries,
    models: &[Box<dyn PredictionModel>],
    combiner: &EnsembleCombiner,
) -> Vec<SignalOutcome> {
    feed(bars, models, combiner, None)
}

/// Same as [`build_signal_feed`], with members re-weighted by recent hit rate.
///
/// Before bar `i` is combined, each model's call at bar `i - 1` is scored
/// against the close move into bar `i`, so weights only use closed bars.
/// Flat calls are not scored. Returns the tracker as it stood after the last
/// bar.
pub fn build_adaptive_signal_feed(
    bars: &BarSeries,
    models: &[Box<dyn PredictionModel>],
    combiner: &EnsembleCombiner,
) -> (Vec<SignalOutcome>, PerformanceTracker) {
    let mut tracker = PerformanceTracker::new();
    let outcomes = feed(bars, models, combiner, Some(&mut tracker));
    (outcomes, tracker)
}

fn feed(
    bars: &BarSeries,
    models: &[Box<dyn PredictionModel>],
    combiner: &EnsembleCombiner,
    mut tracker: Option<&mut PerformanceTracker>,
) -> Vec<SignalOutcome> {
    let series = bars.bars();
    let mut outcomes = Vec::with_capacity(series.len());
    let mut previous: Vec<ModelPrediction> = Vec::new();

    for i in 0..series.len() {
        if let (Some(tracker), Some(prior)) = (tracker.as_deref_mut(), i.checked_sub(1)) {
            let moved = series[i].close - series[prior].close;
            for p in previous.drain(..) {
                match p.direction {
                    Direction::Up => tracker.record(&p.model_name, moved > 0.0),
                    Direction::Down => tracker.record(&p.model_name, moved < 0.0),
                    Direction::Flat => {}
                }
            }
        }

        let history = &series[..=i];
        let mut predictions = Vec::with_capacity(models.len());
        let mut failures = Vec::new();

        for model in models {
            if history.len() < model.warmup() {
                continue;
            }
            match model.predict(history) {
                Ok(prediction) => predictions.push(prediction),
                Err(reason) => {
                    tracing::debug!(index = i, model = model.name(), %reason, "prediction failed");
                    failures.push(format!("{}: {}", model.name(), reason));
                }
            }
        }

        let outcome = if predictions.is_empty() {
            let reason = if failures.is_empty() {
                "models warming up".to_string()
            } else {
                failures.join("; ")
            };
            SignalOutcome::Unavailable(reason)
        } else {
            let combined = match tracker.as_deref() {
                Some(tracker) => {
                    let mut config = combiner.config().clone();
                    tracker.apply_to(&mut config);
                    EnsembleCombiner::new(config).combine(&predictions)
                }
                None => combiner.combine(&predictions),
            };
            match combined {
                Ok(result) => SignalOutcome::Ready(result.to_signal(combiner.bands())),
                Err(e) => SignalOutcome::Unavailable(e.to_string()),
            }
        };
        outcomes.push(outcome);
        previous = predictions;
    }

    outcomes
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::ohlcv::Bar;
    use crate::domain::prediction::{Direction, ModelPrediction};
    use crate::domain::signal::Action;
    use chrono::NaiveDate;
    use std::sync::{Arc, Mutex};

    fn series(closes: &[f64]) -> BarSeries {
        let start = NaiveDate::from_ymd_opt(2024, 1, 1)
            .unwrap()
            .and_hms_opt(0, 0, 0)
            .unwrap();
        BarSeries::new(
            closes
                .iter()
                .enumerate()
                .map(|(i, &c)| Bar {
                    timestamp: start + chrono::Duration::days(i as i64),
                    open: c,
                    high: c,
                    low: c,
                    close: c,
                    volume: 0.0,
                })
                .collect(),
        )
        .unwrap()
    }

    /// Calls up when the last close rose; records every history length seen.
    struct Recorder {
        seen: Arc<Mutex<Vec<usize>>>,
        warmup: usize,
    }

    impl PredictionModel for Recorder {
        fn name(&self) -> &str {
            "recorder"
        }

        fn warmup(&self) -> usize {
            self.warmup
        }

        fn predict(&self, history: &[Bar]) -> Result<ModelPrediction, String> {
            self.seen.lock().unwrap().push(history.len());
            let n = history.len();
            let rising = history[n - 1].close > history[n - 2].close;
            let (up, down, dir) = if rising {
                (0.8, 0.1, Direction::Up)
            } else {
                (0.1, 0.8, Direction::Down)
            };
            Ok(ModelPrediction::new("recorder", "1d", up, down, dir, 0.8))
        }
    }

    struct AlwaysFails;

    impl PredictionModel for AlwaysFails {
        fn name(&self) -> &str {
            "broken"
        }

        fn predict(&self, _history: &[Bar]) -> Result<ModelPrediction, String> {
            Err("feature missing".into())
        }
    }

    #[test]
    fn models_only_see_history_up_to_current_bar() {
        let bars = series(&[100.0, 101.0, 100.5, 102.0]);
        let seen = Arc::new(Mutex::new(Vec::new()));
        let models: Vec<Box<dyn PredictionModel>> = vec![Box::new(Recorder {
            seen: Arc::clone(&seen),
            warmup: 2,
        })];
        let feed = build_signal_feed(&bars, &models, &EnsembleCombiner::default());

        assert_eq!(*seen.lock().unwrap(), vec![2, 3, 4]);

        assert_eq!(feed.len(), 4);
        assert!(!feed[0].is_available());
        assert_eq!(feed[1].effective_action(), Action::Buy);
        assert_eq!(feed[2].effective_action(), Action::Sell);
        assert_eq!(feed[3].effective_action(), Action::Buy);
    }

    #[test]
    fn failing_model_is_reported_as_unavailable() {
        let bars = series(&[100.0, 101.0]);
        let models: Vec<Box<dyn PredictionModel>> = vec![Box::new(AlwaysFails)];
        let feed = build_signal_feed(&bars, &models, &EnsembleCombiner::default());
        match &feed[1] {
            SignalOutcome::Unavailable(reason) => assert!(reason.contains("feature missing")),
            other => panic!("expected unavailable, got {other:?}"),
        }
    }

    #[test]
    fn failing_model_does_not_block_others() {
        let bars = series(&[100.0, 101.0]);
        let models: Vec<Box<dyn PredictionModel>> = vec![
            Box::new(AlwaysFails),
            Box::new(Recorder {
                seen: Arc::new(Mutex::new(Vec::new())),
                warmup: 2,
            }),
        ];
        let feed = build_signal_feed(&bars, &models, &EnsembleCombiner::default());
        assert_eq!(feed[1].effective_action(), Action::Buy);
    }

    /// Always makes the same call, whatever the history.
    struct Fixed {
        name: &'static str,
        direction: Direction,
    }

    impl PredictionModel for Fixed {
        fn name(&self) -> &str {
            self.name
        }

        fn predict(&self, _history: &[Bar]) -> Result<ModelPrediction, String> {
            let (up, down) = match self.direction {
                Direction::Up => (0.7, 0.2),
                _ => (0.2, 0.7),
            };
            Ok(ModelPrediction::new(self.name, "1d", up, down, self.direction, 0.7))
        }
    }

    fn trend_and_contrarian() -> Vec<Box<dyn PredictionModel>> {
        vec![
            Box::new(Fixed {
                name: "trend",
                direction: Direction::Up,
            }),
            Box::new(Fixed {
                name: "contrarian",
                direction: Direction::Down,
            }),
        ]
    }

    #[test]
    fn adaptive_feed_shifts_weight_to_the_model_that_was_right() {
        let bars = series(&[100.0, 101.0, 102.0, 103.0]);
        let models = trend_and_contrarian();
        let combiner = EnsembleCombiner::default();

        let plain = build_signal_feed(&bars, &models, &combiner);
        assert!(plain.iter().all(|o| o.effective_action() == Action::Hold));

        let (adaptive, tracker) = build_adaptive_signal_feed(&bars, &models, &combiner);
        // nothing has been scored yet at the first bar
        assert_eq!(adaptive[0].effective_action(), Action::Hold);
        for outcome in &adaptive[1..] {
            assert_eq!(outcome.effective_action(), Action::Buy);
        }

        assert_eq!(tracker.recent_accuracy("trend"), Some(1.0));
        assert_eq!(tracker.recent_accuracy("contrarian"), Some(0.0));
        let weights = tracker.weights();
        assert_eq!(weights["trend"], 1.0);
        assert_eq!(weights["contrarian"], 0.0);
    }

    #[test]
    fn adaptive_feed_is_unchanged_by_later_bars() {
        let models = trend_and_contrarian();
        let combiner = EnsembleCombiner::default();
        let (full, _) =
            build_adaptive_signal_feed(&series(&[100.0, 101.0, 102.0, 90.0, 80.0]), &models, &combiner);
        let (prefix, tracker) =
            build_adaptive_signal_feed(&series(&[100.0, 101.0, 102.0]), &models, &combiner);

        assert_eq!(&full[..3], &prefix[..]);
        // the falls at bars 3 and 4 are not visible to the shorter run
        assert_eq!(tracker.recent_accuracy("trend"), Some(1.0));
    }

    #[test]
    fn no_models_means_every_bar_unavailable() {
        let bars = series(&[100.0, 101.0]);
        let feed = build_signal_feed(&bars, &[], &EnsembleCombiner::default());
        assert!(feed.iter().all(|o| !o.is_available()));
    }
}
