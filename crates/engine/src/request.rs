//! JSON sweep request shared by the CLI (`--request`) and the HTTP API

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::data::DataSource;
use crate::error::ConfigError;
use crate::params::Parameter;
use crate::ranking::SortCriterion;
use crate::runner::{SweepConfig, DEFAULT_MAX_ITERATIONS, DEFAULT_MIN_TRADES};
use crate::strategy::{StrategyEntry, StrategyRegistry};

/// One parameter range supplied by the caller
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParameterOverride {
    pub name: String,
    pub min: Decimal,
    pub max: Decimal,
    pub step: Decimal,
}

impl ParameterOverride {
    fn to_parameter(&self) -> Result<Parameter, ConfigError> {
        Parameter::new(self.name.as_str(), self.min, self.max, self.step)
    }
}

/// Request body for a sweep
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SweepRequest {
    pub strategy: String,
    pub data: DataSource,
    /// Overrides for the strategy's default ranges, matched by name
    #[serde(default)]
    pub parameters: Vec<ParameterOverride>,
    #[serde(default = "default_min_trades")]
    pub min_trades: u32,
    #[serde(default)]
    pub sort_by: SortCriterion,
    #[serde(default = "default_max_iterations")]
    pub max_iterations: u64,
}

fn default_min_trades() -> u32 {
    DEFAULT_MIN_TRADES
}

fn default_max_iterations() -> u64 {
    DEFAULT_MAX_ITERATIONS
}

impl SweepRequest {
    /// Resolve the strategy and build a validated sweep configuration.
    pub fn into_config<'r>(
        &self,
        registry: &'r StrategyRegistry,
    ) -> Result<(SweepConfig, &'r StrategyEntry), ConfigError> {
        let entry = registry.get(&self.strategy)?;

        let mut space = entry.default_space()?;
        for param in &self.parameters {
            space = space.with_override(param.to_parameter()?)?;
        }

        let config = SweepConfig::new(space)
            .with_min_trades(self.min_trades)
            .with_sort_by(self.sort_by)
            .with_max_iterations(self.max_iterations);
        config.validate()?;

        Ok((config, entry))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn parse(json: &str) -> SweepRequest {
        serde_json::from_str(json).unwrap()
    }

    #[test]
    fn test_minimal_request_uses_defaults() {
        let req = parse(r#"{"strategy":"rsi","data":{"type":"synthetic"}}"#);
        assert_eq!(req.min_trades, DEFAULT_MIN_TRADES);
        assert_eq!(req.max_iterations, DEFAULT_MAX_ITERATIONS);
        assert_eq!(req.sort_by, SortCriterion::ProfitFactor);

        let registry = StrategyRegistry::builtin();
        let (config, entry) = req.into_config(&registry).unwrap();
        assert_eq!(entry.id, "rsi");
        assert_eq!(config.space, entry.default_space().unwrap());
    }

    #[test]
    fn test_override_replaces_matching_range() {
        let req = parse(
            r#"{
                "strategy": "ema_crossover",
                "data": {"type": "file", "path": "btc.csv"},
                "parameters": [{"name": "slow", "min": 30, "max": 40, "step": 10}],
                "min_trades": 5,
                "sort_by": "max_drawdown",
                "max_iterations": 100
            }"#,
        );
        let (config, _) = req.into_config(&StrategyRegistry::builtin()).unwrap();
        let slow = config.space.get("slow").unwrap();
        assert_eq!((slow.min, slow.max, slow.step), (dec!(30), dec!(40), dec!(10)));
        // fast keeps its default 5..15 step 5
        assert_eq!(config.space.combination_count().get(), 3 * 2);
        assert_eq!(config.min_trades, 5);
        assert_eq!(config.sort_by, SortCriterion::MaxDrawdown);
        assert_eq!(config.max_iterations, 100);
    }

    #[test]
    fn test_unknown_parameter_and_strategy() {
        let registry = StrategyRegistry::builtin();
        let req = parse(
            r#"{"strategy":"rsi","data":{"type":"synthetic"},
                "parameters":[{"name":"lookback","min":1,"max":2,"step":1}]}"#,
        );
        assert_eq!(
            req.into_config(&registry).unwrap_err(),
            ConfigError::UnknownParameter("lookback".to_string())
        );

        let req = parse(r#"{"strategy":"nope","data":{"type":"synthetic"}}"#);
        assert_eq!(
            req.into_config(&registry).unwrap_err(),
            ConfigError::UnknownStrategy("nope".to_string())
        );
    }

    #[test]
    fn test_min_trades_floor_enforced() {
        let req = parse(r#"{"strategy":"macd","data":{"type":"synthetic"},"min_trades":1}"#);
        assert_eq!(
            req.into_config(&StrategyRegistry::builtin()).unwrap_err(),
            ConfigError::MinTradesTooLow { value: 1, floor: 2 }
        );
    }

    #[test]
    fn test_invalid_override_range() {
        let req = parse(
            r#"{"strategy":"rsi","data":{"type":"synthetic"},
                "parameters":[{"name":"period","min":14,"max":7,"step":1}]}"#,
        );
        assert!(matches!(
            req.into_config(&StrategyRegistry::builtin()),
            Err(ConfigError::InvalidRange { .. })
        ));
    }
}
