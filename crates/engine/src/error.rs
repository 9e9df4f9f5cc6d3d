//! Error types for sweep configuration, strategy construction and runs

use rust_decimal::Decimal;
use thiserror::Error;

/// A sweep configuration that cannot be run. Always reported before any
/// backtest executes.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ConfigError {
    #[error("parameter space is empty")]
    EmptySpace,

    #[error("parameter name must not be empty")]
    EmptyName,

    #[error("parameter \"{0}\" is declared more than once")]
    DuplicateParameter(String),

    #[error("parameter \"{name}\": step must be greater than zero (got {step})")]
    NonPositiveStep { name: String, step: Decimal },

    #[error("parameter \"{name}\": min {min} is greater than max {max}")]
    InvalidRange {
        name: String,
        min: Decimal,
        max: Decimal,
    },

    #[error("\"Minimum trades\" must be greater or equal to {floor} (got {value})")]
    MinTradesTooLow { value: u32, floor: u32 },

    #[error("iteration limit must be greater than zero")]
    ZeroIterationLimit,

    #[error("unknown strategy \"{0}\"")]
    UnknownStrategy(String),

    #[error("unknown parameter \"{0}\"")]
    UnknownParameter(String),

    #[error("historical file \"{0}\" does not exist")]
    MissingDataFile(String),

    #[error("no historical data available: {0}")]
    NoData(String),

    #[error("invalid parameter spec \"{0}\", expected name=min:max:step")]
    InvalidParamSpec(String),

    #[error("unknown sort criterion \"{0}\"")]
    UnknownSortCriterion(String),
}

/// Failure to build a strategy from one assignment.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum StrategyError {
    #[error("missing parameter \"{0}\"")]
    MissingParameter(String),

    #[error("parameter \"{name}\" has invalid value {value}")]
    InvalidParameter { name: String, value: Decimal },

    #[error("invalid strategy configuration: {0}")]
    InvalidConfiguration(String),
}

/// Failure to start or finish a sweep.
#[derive(Error, Debug)]
pub enum SweepError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("sweep worker failed: {0}")]
    Worker(String),
}
