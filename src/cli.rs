//! CLI definition and dispatch.

use clap::{Parser, Subcommand};
use rand::SeedableRng;
use rand::rngs::StdRng;
use std::path::{Path, PathBuf};
use std::process::ExitCode;

use crate::adapters::csv_adapter::{CsvAdapter, parse_timestamp};
use crate::adapters::csv_report_adapter::CsvReportAdapter;
use crate::adapters::file_config_adapter::FileConfigAdapter;
use crate::adapters::heuristic_models::{MeanReversionModel, MomentumModel};
use crate::domain::accuracy::{DirectionAccuracy, direction_accuracy};
use crate::domain::backtest::{BacktestConfig, BacktestResult, run_backtest};
use crate::domain::calibration::{PlattCalibrator, next_bar_samples};
use crate::domain::config_validation::{
    build_sweep_grid, sweep_threads, validate_backtest_config, validate_data_config,
    validate_ensemble_config, validate_sweep_config,
};
use crate::domain::ensemble::{EnsembleCombiner, EnsembleConfig};
use crate::domain::error::QuantsimError;
use crate::domain::execution::StopSource;
use crate::domain::ohlcv::BarSeries;
use crate::domain::prediction::ModelPrediction;
use crate::domain::signal::SignalOutcome;
use crate::domain::signal_feed::{build_adaptive_signal_feed, build_signal_feed};
use crate::domain::sweep::{SweepPool, best_run};
use crate::domain::synthetic::random_walk;
use crate::ports::config_port::ConfigPort;
use crate::ports::data_port::DataPort;
use crate::ports::model_port::PredictionModel;
use crate::ports::report_port::ReportPort;

pub use crate::domain::config_validation::{build_backtest_config, build_ensemble_config};

const DEFAULT_OUTPUT_DIR: &str = "report";
const DEFAULT_HORIZON: i64 = 5;

#[derive(Parser, Debug)]
#[command(name = "quantsim", about = "Signal backtester and model ensemble evaluator")]
pub struct Cli {
    /// Increase log verbosity (-v info, -vv debug); RUST_LOG overrides
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Run a backtest over [data] bars and signals or predictions
    Backtest {
        #[arg(short, long)]
        config: PathBuf,
        #[arg(short, long)]
        output: Option<PathBuf>,
        #[arg(long)]
        dry_run: bool,
    },
    /// Print the per-bar ensemble consensus for [data] predictions
    Ensemble {
        #[arg(short, long)]
        config: PathBuf,
    },
    /// Fit Platt calibration for [data] predictions against next-bar moves
    Calibrate {
        #[arg(short, long)]
        config: PathBuf,
    },
    /// Run the [sweep] parameter grid in parallel
    Sweep {
        #[arg(short, long)]
        config: PathBuf,
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// Forward-horizon direction accuracy of the signals
    Accuracy {
        #[arg(short, long)]
        config: PathBuf,
        #[arg(long)]
        horizon: Option<usize>,
    },
    /// Validate a configuration file
    Validate {
        #[arg(short, long)]
        config: PathBuf,
    },
    /// Backtest built-in models on a seeded synthetic series
    Demo {
        #[arg(long, default_value_t = 42)]
        seed: u64,
        #[arg(long, default_value_t = 250)]
        bars: usize,
        #[arg(short, long)]
        output: Option<PathBuf>,
        /// Keep equal model weights instead of re-weighting by hit rate
        #[arg(long)]
        fixed_weights: bool,
    },
}

/// Install the global tracing subscriber, writing to stderr.
pub fn init_tracing(verbose: u8) {
    let level = match verbose {
        0 => "warn",
        1 => "info",
        _ => "debug",
    };
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(level));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .try_init();
}

pub fn run(cli: Cli) -> ExitCode {
    let outcome = match cli.command {
        Command::Backtest {
            config,
            output,
            dry_run,
        } => run_backtest_command(&config, output.as_deref(), dry_run),
        Command::Ensemble { config } => run_ensemble(&config),
        Command::Calibrate { config } => run_calibrate(&config),
        Command::Sweep { config, output } => run_sweep(&config, output.as_deref()),
        Command::Accuracy { config, horizon } => run_accuracy(&config, horizon),
        Command::Validate { config } => run_validate(&config),
        Command::Demo {
            seed,
            bars,
            output,
            fixed_weights,
        } => run_demo(seed, bars, output.as_deref(), !fixed_weights),
    };

    match outcome {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("error: {e}");
            (&e).into()
        }
    }
}

pub fn load_config(path: &Path) -> Result<FileConfigAdapter, QuantsimError> {
    eprintln!("Loading config from {}", path.display());
    FileConfigAdapter::from_file(path)
}

/// Where per-bar signals come from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignalSource {
    /// Precomputed signal records.
    Signals,
    /// Prediction sets reduced by the ensemble combiner.
    Predictions,
}

/// CSV adapter and signal source from `[data]`; `signals` wins when both are set.
pub fn data_adapter(config: &dyn ConfigPort) -> Result<(CsvAdapter, SignalSource), QuantsimError> {
    validate_data_config(config)?;
    let path = |key: &str| {
        config
            .get_string("data", key)
            .map(|s| PathBuf::from(s.trim()))
            .filter(|p| !p.as_os_str().is_empty())
    };

    let bars = path("bars").ok_or_else(|| QuantsimError::ConfigMissing {
        section: "data".into(),
        key: "bars".into(),
    })?;
    let mut adapter = CsvAdapter::new(bars);
    let source = if let Some(signals) = path("signals") {
        adapter = adapter.with_signals(signals);
        SignalSource::Signals
    } else {
        if let Some(predictions) = path("predictions") {
            adapter = adapter.with_predictions(predictions);
        }
        SignalSource::Predictions
    };
    Ok((adapter, source))
}

/// Bars plus one outcome per bar (or fewer, for a shorter signal file).
pub fn load_inputs(
    data_port: &dyn DataPort,
    source: SignalSource,
    ensemble_config: &EnsembleConfig,
) -> Result<(BarSeries, Vec<SignalOutcome>), QuantsimError> {
    let bars = data_port.load_bars()?;
    let signals = match source {
        SignalSource::Signals => data_port.load_signals(&bars)?,
        SignalSource::Predictions => {
            let sets = data_port.load_predictions(&bars)?;
            EnsembleCombiner::new(ensemble_config.clone()).combine_series(&sets)
        }
    };
    Ok((bars, signals))
}

pub fn run_backtest_pipeline(
    data_port: &dyn DataPort,
    source: SignalSource,
    bt_config: &BacktestConfig,
    ensemble_config: &EnsembleConfig,
) -> Result<BacktestResult, QuantsimError> {
    let (bars, signals) = load_inputs(data_port, source, ensemble_config)?;
    eprintln!(
        "Running backtest: {} bars, {} signals ({:?})",
        bars.len(),
        signals.len(),
        source
    );
    run_backtest(&bars, &signals, bt_config)
}

fn output_dir(override_dir: Option<&Path>, config: &dyn ConfigPort) -> PathBuf {
    override_dir
        .map(Path::to_path_buf)
        .or_else(|| config.get_string("report", "output_dir").map(PathBuf::from))
        .unwrap_or_else(|| PathBuf::from(DEFAULT_OUTPUT_DIR))
}

fn report_adapter(config: &dyn ConfigPort) -> CsvReportAdapter {
    if config.get_bool("report", "include_equity", true) {
        CsvReportAdapter::new()
    } else {
        CsvReportAdapter::new().without_equity()
    }
}

pub fn print_summary(result: &BacktestResult) {
    let m = &result.metrics;
    eprintln!("\n=== Backtest Results ===");
    eprintln!("Bars:             {}", result.bars);
    eprintln!("Unavailable:      {}", result.unavailable_signals);
    eprintln!("Initial Capital:  {:.2}", result.initial_capital);
    eprintln!("Final Equity:     {:.2}", m.final_equity);
    eprintln!("Total Return:     {:.2}%", m.total_return_pct * 100.0);
    eprintln!("Sharpe Ratio:     {:.2}", m.sharpe_ratio);
    eprintln!("Sortino Ratio:    {:.2}", m.sortino_ratio);
    eprintln!("Max Drawdown:     -{:.1}%", m.max_drawdown_pct * 100.0);
    eprintln!("Total Trades:     {}", m.total_trades);
    eprintln!("Win Rate:         {:.1}%", m.win_rate * 100.0);
    eprintln!("Profit Factor:    {:.2}", m.profit_factor);
}

fn print_accuracy(report: &DirectionAccuracy) {
    eprintln!("\n=== Direction Accuracy ({} bars ahead) ===", report.horizon);
    eprintln!("Evaluated:        {}", report.evaluated);
    eprintln!("Correct:          {}", report.correct);
    eprintln!("Skipped:          {}", report.skipped);
    eprintln!("Non-directional:  {}", report.non_directional);
    eprintln!("Accuracy:         {:.1}%", report.accuracy() * 100.0);
}

fn run_backtest_command(
    config_path: &Path,
    output: Option<&Path>,
    dry_run: bool,
) -> Result<(), QuantsimError> {
    let adapter = load_config(config_path)?;
    validate_backtest_config(&adapter)?;
    let bt_config = build_backtest_config(&adapter)?;
    let ensemble_config = build_ensemble_config(&adapter)?;
    let (data_port, source) = data_adapter(&adapter)?;

    if dry_run {
        eprintln!("Dry run: configuration valid, signal source {source:?}");
        return Ok(());
    }

    let result = run_backtest_pipeline(&data_port, source, &bt_config, &ensemble_config)?;
    print_summary(&result);

    let dir = output_dir(output, &adapter);
    report_adapter(&adapter).write(&result, &dir)?;
    eprintln!("\nReport written to: {}", dir.display());
    Ok(())
}

/// Bars and per-bar prediction sets from `[data] predictions`, even when a
/// signals file is configured too.
fn load_prediction_sets(
    adapter: &FileConfigAdapter,
) -> Result<(BarSeries, Vec<Vec<ModelPrediction>>), QuantsimError> {
    let (data_port, _) = data_adapter(adapter)?;
    let predictions_path = adapter
        .get_string("data", "predictions")
        .ok_or_else(|| QuantsimError::ConfigMissing {
            section: "data".into(),
            key: "predictions".into(),
        })?;
    let data_port = data_port.with_predictions(PathBuf::from(predictions_path.trim()));

    let bars = data_port.load_bars()?;
    let sets = data_port.load_predictions(&bars)?;
    Ok((bars, sets))
}

fn run_ensemble(config_path: &Path) -> Result<(), QuantsimError> {
    let adapter = load_config(config_path)?;
    let ensemble_config = build_ensemble_config(&adapter)?;
    let (bars, sets) = load_prediction_sets(&adapter)?;
    let combiner = EnsembleCombiner::new(ensemble_config);

    println!("timestamp,members,prediction,up_probability,down_probability,confidence,consensus_level,recommendation");
    for (bar, set) in bars.bars().iter().zip(&sets) {
        match combiner.combine(set) {
            Ok(result) => println!(
                "{},{},{},{},{},{},{},{}",
                bar.timestamp,
                result.members,
                result.prediction,
                result.up_probability,
                result.down_probability,
                result.confidence,
                result.consensus_level,
                result.recommendation(combiner.bands())
            ),
            Err(e) => println!("{},{},,,,,,unavailable: {}", bar.timestamp, set.len(), e),
        }
    }
    Ok(())
}

/// Fits a calibrator to the uncalibrated ensemble up probability at each bar
/// and whether the following close rose. Bars that cannot be combined are
/// left out.
pub fn calibration_from_predictions(
    bars: &BarSeries,
    sets: &[Vec<ModelPrediction>],
    ensemble_config: &EnsembleConfig,
) -> Result<PlattCalibrator, QuantsimError> {
    let combiner = EnsembleCombiner::new(EnsembleConfig {
        calibration: None,
        ..ensemble_config.clone()
    });
    let raw: Vec<Option<f64>> = sets
        .iter()
        .map(|set| combiner.combine(set).ok().map(|r| r.up_probability))
        .collect();
    let (probs, labels) = next_bar_samples(bars, &raw);
    tracing::info!(samples = probs.len(), "fitting calibration");
    Ok(PlattCalibrator::fit(&probs, &labels)?)
}

fn run_calibrate(config_path: &Path) -> Result<(), QuantsimError> {
    let adapter = load_config(config_path)?;
    let ensemble_config = build_ensemble_config(&adapter)?;
    if ensemble_config.calibration.is_some() {
        eprintln!("Fitting on raw probabilities; configured calibration is ignored");
    }
    let (bars, sets) = load_prediction_sets(&adapter)?;
    let cal = calibration_from_predictions(&bars, &sets, &ensemble_config)?;

    println!("[ensemble]");
    println!("calibration_a = {}", cal.a);
    println!("calibration_b = {}", cal.b);
    Ok(())
}

fn run_sweep(config_path: &Path, output: Option<&Path>) -> Result<(), QuantsimError> {
    let adapter = load_config(config_path)?;
    validate_sweep_config(&adapter)?;
    let base = build_backtest_config(&adapter)?;
    let ensemble_config = build_ensemble_config(&adapter)?;
    let grid = build_sweep_grid(&adapter)?;
    let (data_port, source) = data_adapter(&adapter)?;

    let (bars, signals) = load_inputs(&data_port, source, &ensemble_config)?;
    let configs = grid.expand(&base);
    let pool = SweepPool::new(sweep_threads(&adapter)?)?;
    eprintln!(
        "Sweeping {} configurations on {} threads",
        configs.len(),
        pool.threads()
    );
    let runs = pool.run(&bars, &signals, configs);

    eprintln!("\n=== Sweep Results ===");
    for (i, run) in runs.iter().enumerate() {
        let e = &run.config.execution;
        match &run.result {
            Ok(r) => eprintln!(
                "  #{i:<3} fraction {:.2} commission {:.4} slippage {:.4}: return {:.2}%, sharpe {:.2}, trades {}",
                e.position_fraction,
                e.commission_rate,
                e.slippage,
                r.metrics.total_return_pct * 100.0,
                r.metrics.sharpe_ratio,
                r.metrics.total_trades
            ),
            Err(err) => eprintln!("  #{i:<3} failed: {err}"),
        }
    }

    if let Some(best) = best_run(&runs) {
        let e = &best.config.execution;
        eprintln!(
            "\nBest: fraction {:.2} commission {:.4} slippage {:.4} stops {:?}",
            e.position_fraction, e.commission_rate, e.slippage, best.config.stop_source
        );
    }

    let dir = output_dir(output, &adapter);
    report_adapter(&adapter).write_sweep(&runs, &dir)?;
    eprintln!("Sweep summary written to: {}", dir.display());
    Ok(())
}

fn run_accuracy(config_path: &Path, horizon: Option<usize>) -> Result<(), QuantsimError> {
    let adapter = load_config(config_path)?;
    let ensemble_config = build_ensemble_config(&adapter)?;
    let (data_port, source) = data_adapter(&adapter)?;
    let horizon = match horizon {
        Some(h) => h,
        None => {
            let h = adapter.get_int("accuracy", "horizon", DEFAULT_HORIZON);
            usize::try_from(h).map_err(|_| QuantsimError::ConfigInvalid {
                section: "accuracy".into(),
                key: "horizon".into(),
                reason: format!("{h} is not a bar count"),
            })?
        }
    };

    let (bars, signals) = load_inputs(&data_port, source, &ensemble_config)?;
    let report = direction_accuracy(&bars, &signals, horizon)?;
    print_accuracy(&report);
    Ok(())
}

fn run_validate(config_path: &Path) -> Result<(), QuantsimError> {
    let adapter = load_config(config_path)?;
    validate_backtest_config(&adapter)?;
    validate_ensemble_config(&adapter)?;
    validate_sweep_config(&adapter)?;
    validate_data_config(&adapter)?;
    eprintln!("Configuration OK");
    Ok(())
}

/// Built-in models used by the demo command.
pub fn demo_models() -> Vec<Box<dyn PredictionModel>> {
    vec![
        Box::new(MomentumModel {
            lookback: 10,
            saturation: 0.05,
        }),
        Box::new(MeanReversionModel { lookback: 20 }),
    ]
}

/// Seeded synthetic series, built-in models, default ensemble, fixed stops.
///
/// With `adaptive` the models are re-weighted by their recent hit rate.
pub fn run_demo_backtest(
    seed: u64,
    bars: usize,
    adaptive: bool,
) -> Result<(BarSeries, Vec<SignalOutcome>, BacktestResult), QuantsimError> {
    let mut rng = StdRng::seed_from_u64(seed);
    let start = parse_timestamp("2024-01-01").map_err(|reason| QuantsimError::Data { reason })?;
    let series = random_walk(&mut rng, start, bars, 100.0, 0.02)?;

    let combiner = EnsembleCombiner::default();
    let signals = if adaptive {
        let (signals, tracker) = build_adaptive_signal_feed(&series, &demo_models(), &combiner);
        tracing::info!(weights = ?tracker.weights(), "demo model weights after last bar");
        signals
    } else {
        build_signal_feed(&series, &demo_models(), &combiner)
    };

    let config = BacktestConfig {
        stop_source: StopSource::Fixed {
            stop_loss_pct: 0.05,
            take_profit_pct: 0.10,
        },
        ..BacktestConfig::new(10_000.0)
    };
    let result = run_backtest(&series, &signals, &config)?;
    Ok((series, signals, result))
}

fn run_demo(
    seed: u64,
    bars: usize,
    output: Option<&Path>,
    adaptive: bool,
) -> Result<(), QuantsimError> {
    eprintln!("Demo: seed {seed}, {bars} synthetic bars");
    let (series, signals, result) = run_demo_backtest(seed, bars, adaptive)?;
    print_summary(&result);

    let report = direction_accuracy(&series, &signals, DEFAULT_HORIZON as usize)?;
    print_accuracy(&report);

    if let Some(dir) = output {
        CsvReportAdapter::new().write(&result, dir)?;
        eprintln!("\nReport written to: {}", dir.display());
    }
    Ok(())
}
