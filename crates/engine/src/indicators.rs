//! Signal generators used by the built-in strategies
//!
//! Each generator consumes klines bar-by-bar and emits Buy/Sell/Hold.
//! Constructors validate their parameters because they are built from
//! swept values, where a bad combination must fail cleanly instead of panicking.

use ta::indicators::{
    BollingerBands, ExponentialMovingAverage, MovingAverageConvergenceDivergence,
    RelativeStrengthIndex,
};
use ta::Next;

use crate::error::StrategyError;
use crate::strategy::Signal;
use crate::types::Kline;

/// Trait for bar-by-bar signal generation
pub trait SignalGenerator: Send {
    fn name(&self) -> &str;
    fn on_bar(&mut self, kline: &Kline) -> Signal;
}

fn close_f64(kline: &Kline) -> f64 {
    kline.close.to_string().parse::<f64>().unwrap_or(0.0)
}

fn ta_error<E: std::fmt::Debug>(indicator: &str, err: E) -> StrategyError {
    StrategyError::InvalidConfiguration(format!("{}: {:?}", indicator, err))
}

// ============================================================================
// RSI
// ============================================================================

pub struct RsiSignalGenerator {
    rsi: RelativeStrengthIndex,
    overbought: f64,
    oversold: f64,
}

impl RsiSignalGenerator {
    pub fn new(period: usize, overbought: f64, oversold: f64) -> Result<Self, StrategyError> {
        if oversold >= overbought {
            return Err(StrategyError::InvalidConfiguration(format!(
                "RSI oversold {} must be below overbought {}",
                oversold, overbought
            )));
        }
        Ok(Self {
            rsi: RelativeStrengthIndex::new(period).map_err(|e| ta_error("RSI", e))?,
            overbought,
            oversold,
        })
    }
}

impl SignalGenerator for RsiSignalGenerator {
    fn name(&self) -> &str {
        "RSI"
    }

    fn on_bar(&mut self, kline: &Kline) -> Signal {
        let val = self.rsi.next(close_f64(kline));
        if val < self.oversold {
            Signal::Buy
        } else if val > self.overbought {
            Signal::Sell
        } else {
            Signal::Hold
        }
    }
}

// ============================================================================
// Bollinger Bands
// ============================================================================

/// Mean reversion: buy below the lower band, sell above the upper band.
pub struct BollingerSignalGenerator {
    bb: BollingerBands,
}

impl BollingerSignalGenerator {
    pub fn new(period: usize, multiplier: f64) -> Result<Self, StrategyError> {
        Ok(Self {
            bb: BollingerBands::new(period, multiplier).map_err(|e| ta_error("Bollinger", e))?,
        })
    }
}

impl SignalGenerator for BollingerSignalGenerator {
    fn name(&self) -> &str {
        "BollingerBands"
    }

    fn on_bar(&mut self, kline: &Kline) -> Signal {
        let close = close_f64(kline);
        let out = self.bb.next(close);
        if out.upper - out.lower <= 0.0 {
            return Signal::Hold;
        }

        if close < out.lower {
            Signal::Buy
        } else if close > out.upper {
            Signal::Sell
        } else {
            Signal::Hold
        }
    }
}

// ============================================================================
// MACD
// ============================================================================

/// Histogram zero-line crosses.
pub struct MacdSignalGenerator {
    macd: MovingAverageConvergenceDivergence,
    slow: usize,
    prev_histogram: f64,
    bars_seen: usize,
}

impl MacdSignalGenerator {
    pub fn new(fast: usize, slow: usize, signal_period: usize) -> Result<Self, StrategyError> {
        if fast >= slow {
            return Err(StrategyError::InvalidConfiguration(format!(
                "MACD fast period {} must be below slow period {}",
                fast, slow
            )));
        }
        Ok(Self {
            macd: MovingAverageConvergenceDivergence::new(fast, slow, signal_period)
                .map_err(|e| ta_error("MACD", e))?,
            slow,
            prev_histogram: 0.0,
            bars_seen: 0,
        })
    }
}

impl SignalGenerator for MacdSignalGenerator {
    fn name(&self) -> &str {
        "MACD"
    }

    fn on_bar(&mut self, kline: &Kline) -> Signal {
        let histogram = self.macd.next(close_f64(kline)).histogram;
        self.bars_seen += 1;

        let warmed_up = self.bars_seen > self.slow;
        let signal = if warmed_up && self.prev_histogram <= 0.0 && histogram > 0.0 {
            Signal::Buy
        } else if warmed_up && self.prev_histogram >= 0.0 && histogram < 0.0 {
            Signal::Sell
        } else {
            Signal::Hold
        };

        self.prev_histogram = histogram;
        signal
    }
}

// ============================================================================
// EMA Crossover
// ============================================================================

pub struct EmaCrossoverSignalGenerator {
    ema_fast: ExponentialMovingAverage,
    ema_slow: ExponentialMovingAverage,
    slow_period: usize,
    prev_fast: f64,
    prev_slow: f64,
    bars_seen: usize,
}

impl EmaCrossoverSignalGenerator {
    pub fn new(fast_period: usize, slow_period: usize) -> Result<Self, StrategyError> {
        if fast_period >= slow_period {
            return Err(StrategyError::InvalidConfiguration(format!(
                "fast EMA period {} must be below slow period {}",
                fast_period, slow_period
            )));
        }
        Ok(Self {
            ema_fast: ExponentialMovingAverage::new(fast_period)
                .map_err(|e| ta_error("EMA", e))?,
            ema_slow: ExponentialMovingAverage::new(slow_period)
                .map_err(|e| ta_error("EMA", e))?,
            slow_period,
            prev_fast: 0.0,
            prev_slow: 0.0,
            bars_seen: 0,
        })
    }
}

impl SignalGenerator for EmaCrossoverSignalGenerator {
    fn name(&self) -> &str {
        "EMACrossover"
    }

    fn on_bar(&mut self, kline: &Kline) -> Signal {
        let close = close_f64(kline);
        let fast_val = self.ema_fast.next(close);
        let slow_val = self.ema_slow.next(close);
        self.bars_seen += 1;

        let signal = if self.bars_seen <= self.slow_period {
            Signal::Hold
        } else if self.prev_fast <= self.prev_slow && fast_val > slow_val {
            // Golden cross
            Signal::Buy
        } else if self.prev_fast >= self.prev_slow && fast_val < slow_val {
            // Death cross
            Signal::Sell
        } else {
            Signal::Hold
        };

        self.prev_fast = fast_val;
        self.prev_slow = slow_val;
        signal
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use rust_decimal::Decimal;
    use rust_decimal_macros::dec;

    pub(crate) fn make_klines(prices: &[f64]) -> Vec<Kline> {
        prices
            .iter()
            .enumerate()
            .map(|(i, &p)| {
                let price = Decimal::from_str_exact(&format!("{:.2}", p)).unwrap();
                Kline {
                    open_time: (i as i64) * 60000,
                    open: price,
                    high: price + dec!(1),
                    low: price - dec!(1),
                    close: price,
                    volume: dec!(100),
                    close_time: ((i + 1) as i64) * 60000 - 1,
                }
            })
            .collect()
    }

    /// Falls, rallies, then falls again: enough swings for every generator.
    pub(crate) fn swing_prices() -> Vec<f64> {
        let mut prices = Vec::new();
        for i in 0..40 {
            prices.push(100.0 - (i as f64) * 1.5);
        }
        for i in 0..40 {
            prices.push(40.0 + (i as f64) * 2.0);
        }
        for i in 0..40 {
            prices.push(120.0 - (i as f64) * 1.8);
        }
        prices
    }

    fn signals(gen: &mut dyn SignalGenerator, prices: &[f64]) -> (bool, bool) {
        let mut had_buy = false;
        let mut had_sell = false;
        for kline in &make_klines(prices) {
            match gen.on_bar(kline) {
                Signal::Buy => had_buy = true,
                Signal::Sell => had_sell = true,
                Signal::Hold => {}
            }
        }
        (had_buy, had_sell)
    }

    #[test]
    fn test_rsi_generator_produces_signals() {
        let mut gen = RsiSignalGenerator::new(14, 70.0, 30.0).unwrap();
        assert_eq!(gen.name(), "RSI");
        assert_eq!(signals(&mut gen, &swing_prices()), (true, true));
    }

    #[test]
    fn test_ema_crossover_produces_signals() {
        let mut gen = EmaCrossoverSignalGenerator::new(5, 20).unwrap();
        assert_eq!(signals(&mut gen, &swing_prices()), (true, true));
    }

    #[test]
    fn test_macd_produces_signals() {
        let mut gen = MacdSignalGenerator::new(8, 21, 5).unwrap();
        assert_eq!(signals(&mut gen, &swing_prices()), (true, true));
    }

    #[test]
    fn test_bollinger_generator_produces_signals() {
        let mut gen = BollingerSignalGenerator::new(20, 2.0).unwrap();
        assert_eq!(gen.name(), "BollingerBands");

        let mut prices: Vec<f64> = (0..30).map(|_| 100.0).collect();
        prices.extend((0..10).map(|i| 100.0 + (i as f64) * 5.0));
        prices.extend((0..10).map(|i| 150.0 - (i as f64) * 8.0));

        let (buy, sell) = signals(&mut gen, &prices);
        assert!(buy || sell, "BB should have produced at least one signal");
    }

    #[test]
    fn test_invalid_parameters_are_errors() {
        assert!(RsiSignalGenerator::new(0, 70.0, 30.0).is_err());
        assert!(RsiSignalGenerator::new(14, 30.0, 70.0).is_err());
        assert!(EmaCrossoverSignalGenerator::new(20, 10).is_err());
        assert!(MacdSignalGenerator::new(26, 12, 9).is_err());
        assert!(BollingerSignalGenerator::new(0, 2.0).is_err());
    }

    #[test]
    fn test_flat_prices_hold() {
        let mut gen = EmaCrossoverSignalGenerator::new(3, 8).unwrap();
        assert_eq!(signals(&mut gen, &[100.0; 30]), (false, false));
    }
}
