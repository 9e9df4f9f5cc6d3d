//! Types shared by the backtest engine and the sweep

use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};

/// A single candlestick (OHLCV)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Kline {
    pub open_time: i64,
    pub open: Decimal,
    pub high: Decimal,
    pub low: Decimal,
    pub close: Decimal,
    pub volume: Decimal,
    pub close_time: i64,
}

/// Account settings for one backtest run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BacktestConfig {
    pub initial_capital: Decimal,
    /// Position size as percentage of equity (e.g., 10.0 = 10%)
    pub position_size_pct: Decimal,
}

impl Default for BacktestConfig {
    fn default() -> Self {
        Self {
            initial_capital: dec!(10000),
            position_size_pct: dec!(10),
        }
    }
}

/// A single round-trip long trade
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BacktestTrade {
    pub entry_time: i64,
    pub exit_time: i64,
    pub entry_price: Decimal,
    pub exit_price: Decimal,
    pub size: Decimal,
    pub pnl: Decimal,
}

/// Full outcome of one backtest run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BacktestResult {
    pub initial_capital: Decimal,
    pub final_equity: Decimal,
    pub trades: Vec<BacktestTrade>,
    pub metrics: BacktestMetrics,
}

/// Metrics record produced by one backtest; what the sweep ranks on.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BacktestMetrics {
    pub total_trades: u32,
    pub profit_factor: Decimal,
    pub net_profit: Decimal,
    /// Largest peak-to-trough equity drop, in account currency
    pub max_drawdown: Decimal,
    /// Kelly fraction as a percentage
    pub true_kelly: Decimal,
}

impl Default for BacktestMetrics {
    fn default() -> Self {
        Self {
            total_trades: 0,
            profit_factor: Decimal::ZERO,
            net_profit: Decimal::ZERO,
            max_drawdown: Decimal::ZERO,
            true_kelly: Decimal::ZERO,
        }
    }
}
