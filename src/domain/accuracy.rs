//! Forward-horizon direction accuracy.
//!
//! A looser evaluation than the backtest: each directional signal is scored
//! against the close `horizon` bars later, with no positions, costs or
//! capital involved. Kept apart from [`Metrics`](super::metrics::Metrics) so
//! the two are never mixed in one report.

use super::error::QuantsimError;
use super::ohlcv::BarSeries;
use super::signal::{Action, SignalOutcome};

#[derive(Debug, Clone, PartialEq)]
pub struct DirectionAccuracy {
    pub horizon: usize,
    /// Buy/sell signals with a full horizon ahead of them.
    pub evaluated: usize,
    pub correct: usize,
    /// Directional signals too close to the end of the series.
    pub skipped: usize,
    /// Hold and unavailable bars; never scored.
    pub non_directional: usize,
}

impl DirectionAccuracy {
    /// `correct / evaluated`, 0 with nothing evaluated.
    pub fn accuracy(&self) -> f64 {
        if self.evaluated > 0 {
            self.correct as f64 / self.evaluated as f64
        } else {
            0.0
        }
    }
}

pub fn direction_accuracy(
    bars: &BarSeries,
    signals: &[SignalOutcome],
    horizon: usize,
) -> Result<DirectionAccuracy, QuantsimError> {
    if horizon == 0 {
        return Err(QuantsimError::InvalidParameter {
            name: "horizon".into(),
            reason: "must be at least 1 bar".into(),
        });
    }
    if signals.len() > bars.len() {
        return Err(QuantsimError::SignalLengthMismatch {
            signals: signals.len(),
            bars: bars.len(),
        });
    }

    let closes: Vec<f64> = bars.closes().collect();
    let mut report = DirectionAccuracy {
        horizon,
        evaluated: 0,
        correct: 0,
        skipped: 0,
        non_directional: 0,
    };

    for (i, outcome) in signals.iter().enumerate() {
        let action = outcome.effective_action();
        if action == Action::Hold {
            report.non_directional += 1;
            continue;
        }
        let Some(&future) = i.checked_add(horizon).and_then(|j| closes.get(j)) else {
            report.skipped += 1;
            continue;
        };

        report.evaluated += 1;
        let now = closes[i];
        let hit = match action {
            Action::Buy => future > now,
            Action::Sell => future < now,
            Action::Hold => false,
        };
        if hit {
            report.correct += 1;
        }
    }

    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::ohlcv::Bar;
    use crate::domain::signal::{Signal, ready_all};
    use chrono::NaiveDate;

    fn series(closes: &[f64]) -> BarSeries {
        let start = NaiveDate::from_ymd_opt(2024, 3, 1)
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

    fn signals(actions: &[Action]) -> Vec<SignalOutcome> {
        ready_all(actions.iter().map(|&a| Signal::new(a, 0.7)).collect())
    }

    #[test]
    fn scores_against_close_horizon_bars_later() {
        let bars = series(&[100.0, 101.0, 99.0, 103.0, 98.0]);
        let report = direction_accuracy(
            &bars,
            &signals(&[Action::Buy, Action::Sell, Action::Buy]),
            2,
        )
        .unwrap();
        // 100 -> 99 miss, 101 -> 103 miss, 99 -> 98 miss
        assert_eq!(report.evaluated, 3);
        assert_eq!(report.correct, 0);

        let report = direction_accuracy(
            &bars,
            &signals(&[Action::Sell, Action::Buy, Action::Sell]),
            2,
        )
        .unwrap();
        assert_eq!(report.correct, 3);
        assert!((report.accuracy() - 1.0).abs() < f64::EPSILON);
    }

    #[test]
    fn signals_without_full_horizon_are_skipped() {
        let bars = series(&[100.0, 101.0, 102.0]);
        let report =
            direction_accuracy(&bars, &signals(&[Action::Buy, Action::Buy, Action::Buy]), 2)
                .unwrap();
        assert_eq!(report.evaluated, 1);
        assert_eq!(report.skipped, 2);
    }

    #[test]
    fn horizon_beyond_usize_range_skips_every_signal() {
        let bars = series(&[100.0, 101.0, 102.0]);
        let report = direction_accuracy(
            &bars,
            &signals(&[Action::Sell, Action::Sell, Action::Sell]),
            usize::MAX,
        )
        .unwrap();
        assert_eq!(report.evaluated, 0);
        assert_eq!(report.correct, 0);
        assert_eq!(report.skipped, 3);
    }

    #[test]
    fn hold_and_unavailable_are_not_scored() {
        let bars = series(&[100.0, 101.0, 102.0]);
        let outcomes = vec![
            SignalOutcome::Ready(Signal::hold()),
            SignalOutcome::Unavailable("no data".into()),
        ];
        let report = direction_accuracy(&bars, &outcomes, 1).unwrap();
        assert_eq!(report.non_directional, 2);
        assert_eq!(report.evaluated, 0);
        assert_eq!(report.accuracy(), 0.0);
    }

    #[test]
    fn zero_horizon_rejected() {
        let bars = series(&[100.0]);
        assert!(direction_accuracy(&bars, &[], 0).is_err());
    }
}
