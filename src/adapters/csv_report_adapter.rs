//! CSV report adapter: summary, trade ledger and equity curve files.

use std::fs;
use std::path::Path;

use serde::Serialize;

use crate::domain::backtest::BacktestResult;
use crate::domain::error::QuantsimError;
use crate::domain::execution::StopSource;
use crate::domain::sweep::SweepRun;
use crate::ports::report_port::ReportPort;

pub const SUMMARY_FILE: &str = "summary.csv";
pub const TRADES_FILE: &str = "trades.csv";
pub const EQUITY_FILE: &str = "equity.csv";
pub const SWEEP_FILE: &str = "sweep.csv";

pub struct CsvReportAdapter {
    include_equity: bool,
}

impl CsvReportAdapter {
    pub fn new() -> Self {
        Self {
            include_equity: true,
        }
    }

    /// Skip `equity.csv`, which has one row per bar.
    pub fn without_equity(mut self) -> Self {
        self.include_equity = false;
        self
    }
}

#[derive(Serialize)]
struct SweepRow {
    position_fraction: f64,
    commission_rate: f64,
    slippage: f64,
    stop_loss_pct: Option<f64>,
    take_profit_pct: Option<f64>,
    total_trades: Option<usize>,
    total_return_pct: Option<f64>,
    max_drawdown_pct: Option<f64>,
    sharpe_ratio: Option<f64>,
    error: Option<String>,
}

impl From<&SweepRun> for SweepRow {
    fn from(run: &SweepRun) -> Self {
        let e = &run.config.execution;
        let (stop_loss_pct, take_profit_pct) = match run.config.stop_source {
            StopSource::Fixed {
                stop_loss_pct,
                take_profit_pct,
            } => (Some(stop_loss_pct), Some(take_profit_pct)),
            _ => (None, None),
        };
        let metrics = run.result.as_ref().ok().map(|r| &r.metrics);
        SweepRow {
            position_fraction: e.position_fraction,
            commission_rate: e.commission_rate,
            slippage: e.slippage,
            stop_loss_pct,
            take_profit_pct,
            total_trades: metrics.map(|m| m.total_trades),
            total_return_pct: metrics.map(|m| m.total_return_pct),
            max_drawdown_pct: metrics.map(|m| m.max_drawdown_pct),
            sharpe_ratio: metrics.map(|m| m.sharpe_ratio),
            error: run.result.as_ref().err().map(|e| e.to_string()),
        }
    }
}

impl CsvReportAdapter {
    /// One row per sweep configuration, in grid order.
    pub fn write_sweep(&self, runs: &[SweepRun], output_dir: &Path) -> Result<(), QuantsimError> {
        fs::create_dir_all(output_dir)?;
        let rows: Vec<SweepRow> = runs.iter().map(SweepRow::from).collect();
        write_rows(&output_dir.join(SWEEP_FILE), &rows)
    }
}

impl Default for CsvReportAdapter {
    fn default() -> Self {
        Self::new()
    }
}

fn report_error(path: &Path, e: impl std::fmt::Display) -> QuantsimError {
    QuantsimError::Report {
        reason: format!("{}: {}", path.display(), e),
    }
}

fn write_rows<T: Serialize>(path: &Path, rows: &[T]) -> Result<(), QuantsimError> {
    let mut wtr = csv::Writer::from_path(path).map_err(|e| report_error(path, e))?;
    for row in rows {
        wtr.serialize(row).map_err(|e| report_error(path, e))?;
    }
    wtr.flush().map_err(|e| report_error(path, e))
}

impl ReportPort for CsvReportAdapter {
    fn write(&self, result: &BacktestResult, output_dir: &Path) -> Result<(), QuantsimError> {
        fs::create_dir_all(output_dir)?;

        let summary: Vec<(String, String)> = result.to_flat_map().into_iter().collect();
        let summary_path = output_dir.join(SUMMARY_FILE);
        let mut wtr = csv::Writer::from_path(&summary_path)
            .map_err(|e| report_error(&summary_path, e))?;
        wtr.write_record(["key", "value"])
            .map_err(|e| report_error(&summary_path, e))?;
        for (key, value) in &summary {
            wtr.write_record([key, value])
                .map_err(|e| report_error(&summary_path, e))?;
        }
        wtr.flush().map_err(|e| report_error(&summary_path, e))?;

        write_rows(&output_dir.join(TRADES_FILE), &result.trades)?;
        if self.include_equity {
            write_rows(&output_dir.join(EQUITY_FILE), &result.equity_curve)?;
        }

        tracing::info!(dir = %output_dir.display(), trades = result.trades.len(), "report written");
        Ok(())
    }
}
