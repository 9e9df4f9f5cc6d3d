//! Param Sweep Engine - brute-force parameter optimization for backtests
//!
//! Provides:
//! - Decimal parameter spaces and a lazy combination enumerator
//! - A cancellable sweep runner with iteration ceiling, min-trades filter and ranking
//! - Built-in indicator strategies and a bar-by-bar backtest engine
//! - Historical data from CSV files, Binance, or a seeded random walk

pub mod api;
pub mod data;
pub mod engine;
pub mod enumerator;
pub mod error;
pub mod indicators;
pub mod params;
pub mod progress;
pub mod ranking;
pub mod request;
pub mod runner;
pub mod strategy;
pub mod types;

// Re-exports for convenience
pub use api::{BinanceClient, KlineWindow};
pub use data::{load_klines_csv, read_klines_csv, synthetic_klines, DataSource};
pub use engine::BacktestEngine;
pub use enumerator::{Assignment, CombinationEnumerator};
pub use error::{ConfigError, StrategyError, SweepError};
pub use indicators::SignalGenerator;
pub use params::{parse_param_spec, CombinationCount, Parameter, ParameterSpace};
pub use progress::{iteration_limit_message, ProgressSnapshot, SweepProgress, SweepStatus};
pub use ranking::{passes_min_trades, rank_results, RankedResult, SortCriterion, SweepResult};
pub use request::{ParameterOverride, SweepRequest};
pub use runner::{
    BacktestInvoker, SweepCanceller, SweepConfig, SweepEvent, SweepHandle, SweepReport,
    SweepRunner, SweepState, DEFAULT_MAX_ITERATIONS, DEFAULT_MIN_TRADES, MIN_TRADES_FLOOR,
};
pub use strategy::{Signal, StrategyEntry, StrategyInfo, StrategyInvoker, StrategyRegistry};
pub use types::*;
