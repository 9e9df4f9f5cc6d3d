//! Strategy registry: maps a strategy id to its signal-generator factory
//! and the parameter space swept when the caller supplies none.

use std::fmt;
use std::sync::Arc;

use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};

use crate::engine::BacktestEngine;
use crate::enumerator::Assignment;
use crate::error::{ConfigError, StrategyError};
use crate::indicators::{
    BollingerSignalGenerator, EmaCrossoverSignalGenerator, MacdSignalGenerator,
    RsiSignalGenerator, SignalGenerator,
};
use crate::params::{Parameter, ParameterSpace};
use crate::runner::BacktestInvoker;
use crate::types::{BacktestConfig, BacktestMetrics, Kline};

/// Trading signal emitted by a generator on each bar
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Signal {
    Buy,
    Sell,
    Hold,
}

impl fmt::Display for Signal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Signal::Buy => write!(f, "BUY"),
            Signal::Sell => write!(f, "SELL"),
            Signal::Hold => write!(f, "HOLD"),
        }
    }
}

pub type StrategyFactory = fn(&Assignment) -> Result<Box<dyn SignalGenerator>, StrategyError>;

/// (name, min, max, step)
type DefaultRange = (&'static str, Decimal, Decimal, Decimal);

/// One registered strategy
#[derive(Clone)]
pub struct StrategyEntry {
    pub id: &'static str,
    pub name: &'static str,
    pub description: &'static str,
    defaults: &'static [DefaultRange],
    factory: StrategyFactory,
}

impl StrategyEntry {
    /// Parameter space swept when a request does not provide one.
    pub fn default_space(&self) -> Result<ParameterSpace, ConfigError> {
        let params = self
            .defaults
            .iter()
            .map(|(name, min, max, step)| Parameter::new(*name, *min, *max, *step))
            .collect::<Result<Vec<_>, _>>()?;
        ParameterSpace::new(params)
    }

    /// Build a fresh generator for one assignment.
    pub fn build(&self, assignment: &Assignment) -> Result<Box<dyn SignalGenerator>, StrategyError> {
        (self.factory)(assignment)
    }
}

impl fmt::Debug for StrategyEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StrategyEntry")
            .field("id", &self.id)
            .field("name", &self.name)
            .finish()
    }
}

/// Serializable view of an entry for listings and the HTTP API
#[derive(Debug, Clone, Serialize)]
pub struct StrategyInfo {
    pub id: String,
    pub name: String,
    pub description: String,
    pub parameters: Vec<Parameter>,
    pub combinations: String,
}

/// Lookup table of every strategy the sweep can instantiate
#[derive(Debug, Clone)]
pub struct StrategyRegistry {
    entries: Vec<StrategyEntry>,
}

impl StrategyRegistry {
    pub fn builtin() -> Self {
        Self {
            entries: vec![
                StrategyEntry {
                    id: "rsi",
                    name: "RSI Reversal",
                    description: "Buy when RSI drops below oversold, sell above overbought",
                    defaults: &RSI_DEFAULTS,
                    factory: build_rsi,
                },
                StrategyEntry {
                    id: "ema_crossover",
                    name: "EMA Crossover",
                    description: "Buy on golden cross, sell on death cross",
                    defaults: &EMA_DEFAULTS,
                    factory: build_ema_crossover,
                },
                StrategyEntry {
                    id: "bollinger",
                    name: "Bollinger Bands",
                    description: "Mean reversion on band touches",
                    defaults: &BOLLINGER_DEFAULTS,
                    factory: build_bollinger,
                },
                StrategyEntry {
                    id: "macd",
                    name: "MACD Histogram",
                    description: "Trade MACD histogram zero-line crosses",
                    defaults: &MACD_DEFAULTS,
                    factory: build_macd,
                },
            ],
        }
    }

    pub fn get(&self, id: &str) -> Result<&StrategyEntry, ConfigError> {
        let wanted = id.trim().to_lowercase();
        self.entries
            .iter()
            .find(|e| e.id == wanted)
            .ok_or_else(|| ConfigError::UnknownStrategy(id.to_string()))
    }

    pub fn entries(&self) -> &[StrategyEntry] {
        &self.entries
    }

    pub fn ids(&self) -> Vec<&'static str> {
        self.entries.iter().map(|e| e.id).collect()
    }

    pub fn list(&self) -> Result<Vec<StrategyInfo>, ConfigError> {
        self.entries
            .iter()
            .map(|e| {
                let space = e.default_space()?;
                Ok(StrategyInfo {
                    id: e.id.to_string(),
                    name: e.name.to_string(),
                    description: e.description.to_string(),
                    combinations: space.combination_count().to_string(),
                    parameters: space.parameters().to_vec(),
                })
            })
            .collect()
    }
}

// ============================================================================
// Built-in strategies
// ============================================================================

static RSI_DEFAULTS: [DefaultRange; 3] = [
    ("period", dec!(7), dec!(28), dec!(7)),
    ("overbought", dec!(65), dec!(80), dec!(5)),
    ("oversold", dec!(20), dec!(35), dec!(5)),
];

static EMA_DEFAULTS: [DefaultRange; 2] = [
    ("fast", dec!(5), dec!(15), dec!(5)),
    ("slow", dec!(20), dec!(50), dec!(10)),
];

static BOLLINGER_DEFAULTS: [DefaultRange; 2] = [
    ("period", dec!(10), dec!(30), dec!(5)),
    ("multiplier", dec!(1.5), dec!(3.0), dec!(0.5)),
];

static MACD_DEFAULTS: [DefaultRange; 3] = [
    ("fast", dec!(8), dec!(12), dec!(2)),
    ("slow", dec!(20), dec!(30), dec!(5)),
    ("signal", dec!(5), dec!(9), dec!(2)),
];

fn build_rsi(a: &Assignment) -> Result<Box<dyn SignalGenerator>, StrategyError> {
    Ok(Box::new(RsiSignalGenerator::new(
        a.usize_value("period")?,
        a.f64_value("overbought")?,
        a.f64_value("oversold")?,
    )?))
}

fn build_ema_crossover(a: &Assignment) -> Result<Box<dyn SignalGenerator>, StrategyError> {
    Ok(Box::new(EmaCrossoverSignalGenerator::new(
        a.usize_value("fast")?,
        a.usize_value("slow")?,
    )?))
}

fn build_bollinger(a: &Assignment) -> Result<Box<dyn SignalGenerator>, StrategyError> {
    Ok(Box::new(BollingerSignalGenerator::new(
        a.usize_value("period")?,
        a.f64_value("multiplier")?,
    )?))
}

fn build_macd(a: &Assignment) -> Result<Box<dyn SignalGenerator>, StrategyError> {
    Ok(Box::new(MacdSignalGenerator::new(
        a.usize_value("fast")?,
        a.usize_value("slow")?,
        a.usize_value("signal")?,
    )?))
}

// ============================================================================
// Invoker
// ============================================================================

/// Backtest invoker that runs a registered strategy over a shared data set.
pub struct StrategyInvoker {
    entry: StrategyEntry,
    klines: Arc<Vec<Kline>>,
    config: BacktestConfig,
}

impl StrategyInvoker {
    pub fn new(entry: StrategyEntry, klines: Arc<Vec<Kline>>, config: BacktestConfig) -> Self {
        Self {
            entry,
            klines,
            config,
        }
    }
}

impl BacktestInvoker for StrategyInvoker {
    fn invoke(&mut self, assignment: &Assignment) -> anyhow::Result<BacktestMetrics> {
        let mut generator = self.entry.build(assignment)?;
        let result = BacktestEngine::run(&self.config, generator.as_mut(), &self.klines);
        Ok(result.metrics)
    }
}
