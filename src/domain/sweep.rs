//! Parameter sweeps: many independent backtests over one bar/signal set.

use rayon::prelude::*;

use super::backtest::{BacktestConfig, BacktestResult, run_backtest};
use super::error::QuantsimError;
use super::execution::StopSource;
use super::ohlcv::BarSeries;
use super::signal::SignalOutcome;

/// Values to try per parameter. An empty axis keeps the base config's value.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SweepGrid {
    pub position_fraction: Vec<f64>,
    pub commission_rate: Vec<f64>,
    pub slippage: Vec<f64>,
    pub stop_loss_pct: Vec<f64>,
    pub take_profit_pct: Vec<f64>,
}

fn axis(values: &[f64], base: f64) -> Vec<f64> {
    if values.is_empty() {
        vec![base]
    } else {
        values.to_vec()
    }
}

impl SweepGrid {
    /// Cartesian product of all axes applied to `base`, in a fixed order.
    ///
    /// Stop axes only apply when at least one of them is non-empty; the
    /// resulting configs then use [`StopSource::Fixed`].
    pub fn expand(&self, base: &BacktestConfig) -> Vec<BacktestConfig> {
        let (base_stop, base_target) = match base.stop_source {
            StopSource::Fixed {
                stop_loss_pct,
                take_profit_pct,
            } => (stop_loss_pct, take_profit_pct),
            _ => (0.0, 0.0),
        };
        let sweeps_stops = !self.stop_loss_pct.is_empty() || !self.take_profit_pct.is_empty();

        let mut configs = Vec::new();
        for &fraction in &axis(&self.position_fraction, base.execution.position_fraction) {
            for &commission in &axis(&self.commission_rate, base.execution.commission_rate) {
                for &slippage in &axis(&self.slippage, base.execution.slippage) {
                    for &stop in &axis(&self.stop_loss_pct, base_stop) {
                        for &target in &axis(&self.take_profit_pct, base_target) {
                            let mut config = base.clone();
                            config.execution.position_fraction = fraction;
                            config.execution.commission_rate = commission;
                            config.execution.slippage = slippage;
                            if sweeps_stops {
                                config.stop_source = StopSource::Fixed {
                                    stop_loss_pct: stop,
                                    take_profit_pct: target,
                                };
                            }
                            configs.push(config);
                        }
                    }
                }
            }
        }
        configs
    }

    pub fn is_empty(&self) -> bool {
        self.position_fraction.is_empty()
            && self.commission_rate.is_empty()
            && self.slippage.is_empty()
            && self.stop_loss_pct.is_empty()
            && self.take_profit_pct.is_empty()
    }
}

#[derive(Debug)]
pub struct SweepRun {
    pub config: BacktestConfig,
    pub result: Result<BacktestResult, QuantsimError>,
}

/// Worker pool for independent backtest runs, owned by the caller.
///
/// Runs share only the read-only bars and signals; each owns its portfolio,
/// ledger and equity curve.
pub struct SweepPool {
    pool: rayon::ThreadPool,
}

impl SweepPool {
    /// `threads == 0` lets rayon pick from the available cores.
    pub fn new(threads: usize) -> Result<Self, QuantsimError> {
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(threads)
            .thread_name(|i| format!("sweep-{i}"))
            .build()
            .map_err(|e| QuantsimError::InvalidParameter {
                name: "threads".into(),
                reason: e.to_string(),
            })?;
        Ok(SweepPool { pool })
    }

    pub fn threads(&self) -> usize {
        self.pool.current_num_threads()
    }

    /// Run every config; results come back in `configs` order.
    pub fn run(
        &self,
        bars: &BarSeries,
        signals: &[SignalOutcome],
        configs: Vec<BacktestConfig>,
    ) -> Vec<SweepRun> {
        tracing::info!(runs = configs.len(), threads = self.threads(), "sweep start");
        self.pool.install(|| {
            configs
                .into_par_iter()
                .map(|config| {
                    let result = run_backtest(bars, signals, &config);
                    SweepRun { config, result }
                })
                .collect()
        })
    }
}

/// Completed run with the highest total return; ties keep the earliest run.
pub fn best_run(runs: &[SweepRun]) -> Option<&SweepRun> {
    runs.iter()
        .filter_map(|run| run.result.as_ref().ok().map(|r| (run, r.metrics.total_return_pct)))
        .fold(None, |best: Option<(&SweepRun, f64)>, (run, ret)| match best {
            Some((_, best_ret)) if best_ret >= ret => best,
            _ => Some((run, ret)),
        })
        .map(|(run, _)| run)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::ohlcv::Bar;
    use crate::domain::signal::{Action, Signal, ready_all};
    use chrono::NaiveDate;

    fn series(closes: &[f64]) -> BarSeries {
        let start = NaiveDate::from_ymd_opt(2024, 1, 1)
            .unwrap()
            .and_hms_opt(0, 0, 0)
            .unwrap();
        let bars = closes
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
            .collect();
        BarSeries::new(bars).unwrap()
    }

    #[test]
    fn empty_grid_expands_to_base() {
        let base = BacktestConfig::default();
        let configs = SweepGrid::default().expand(&base);
        assert_eq!(configs, vec![base]);
    }

    #[test]
    fn grid_is_cartesian_in_fixed_order() {
        let grid = SweepGrid {
            position_fraction: vec![0.5, 1.0],
            commission_rate: vec![0.0, 0.001, 0.002],
            ..Default::default()
        };
        let configs = grid.expand(&BacktestConfig::default());
        assert_eq!(configs.len(), 6);
        assert_eq!(configs[0].execution.position_fraction, 0.5);
        assert_eq!(configs[0].execution.commission_rate, 0.0);
        assert_eq!(configs[2].execution.commission_rate, 0.002);
        assert_eq!(configs[3].execution.position_fraction, 1.0);
    }

    #[test]
    fn stop_axis_switches_to_fixed_stops() {
        let grid = SweepGrid {
            stop_loss_pct: vec![0.01, 0.02],
            ..Default::default()
        };
        let configs = grid.expand(&BacktestConfig::default());
        assert_eq!(
            configs[1].stop_source,
            StopSource::Fixed {
                stop_loss_pct: 0.02,
                take_profit_pct: 0.0
            }
        );
    }

    #[test]
    fn parallel_results_match_sequential() {
        let bars = series(&[100.0, 103.0, 99.0, 104.0, 108.0, 101.0]);
        let signals = ready_all(
            [Action::Buy, Action::Hold, Action::Sell, Action::Buy, Action::Hold, Action::Sell]
                .into_iter()
                .map(|a| Signal::new(a, 0.9))
                .collect(),
        );
        let grid = SweepGrid {
            position_fraction: vec![0.25, 0.5, 1.0],
            slippage: vec![0.0, 0.1],
            ..Default::default()
        };
        let configs = grid.expand(&BacktestConfig::default());

        let pool = SweepPool::new(3).unwrap();
        let runs = pool.run(&bars, &signals, configs.clone());
        assert_eq!(runs.len(), configs.len());

        for (run, config) in runs.iter().zip(&configs) {
            assert_eq!(&run.config, config);
            let sequential = run_backtest(&bars, &signals, config).unwrap();
            assert_eq!(run.result.as_ref().unwrap(), &sequential);
        }
    }

    #[test]
    fn failed_runs_are_reported_not_dropped() {
        let bars = series(&[100.0, 101.0]);
        let grid = SweepGrid {
            position_fraction: vec![0.5, 2.0],
            ..Default::default()
        };
        let pool = SweepPool::new(2).unwrap();
        let runs = pool.run(&bars, &[], grid.expand(&BacktestConfig::default()));
        assert!(runs[0].result.is_ok());
        assert!(runs[1].result.is_err());
        assert!(best_run(&runs).is_some());
    }

    #[test]
    fn best_run_prefers_highest_return() {
        let bars = series(&[100.0, 110.0]);
        let signals = ready_all(vec![Signal::new(Action::Buy, 1.0)]);
        let grid = SweepGrid {
            position_fraction: vec![0.1, 1.0, 0.5],
            ..Default::default()
        };
        let pool = SweepPool::new(1).unwrap();
        let runs = pool.run(&bars, &signals, grid.expand(&BacktestConfig::default()));
        let best = best_run(&runs).unwrap();
        assert_eq!(best.config.execution.position_fraction, 1.0);
    }
}
