//! Core domain types and logic.

pub mod accuracy;
pub mod backtest;
pub mod calibration;
pub mod config_validation;
pub mod ensemble;
pub mod error;
pub mod execution;
pub mod metrics;
pub mod ohlcv;
pub mod portfolio;
pub mod position;
pub mod prediction;
pub mod signal;
pub mod signal_feed;
pub mod sweep;
pub mod synthetic;
