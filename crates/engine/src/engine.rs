//! Bar-by-bar backtesting engine

use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use tracing::debug;

use crate::indicators::SignalGenerator;
use crate::strategy::Signal;
use crate::types::*;

/// Position state during simulation
struct OpenPosition {
    entry_time: i64,
    entry_price: Decimal,
    size: Decimal,
}

impl OpenPosition {
    fn close(self, kline: &Kline) -> BacktestTrade {
        BacktestTrade {
            entry_time: self.entry_time,
            exit_time: kline.open_time,
            entry_price: self.entry_price,
            exit_price: kline.close,
            size: self.size,
            pnl: (kline.close - self.entry_price) * self.size,
        }
    }

    fn unrealized(&self, kline: &Kline) -> Decimal {
        (kline.close - self.entry_price) * self.size
    }
}

/// Backtesting engine that simulates bar-by-bar execution
pub struct BacktestEngine;

impl BacktestEngine {
    /// Run `generator` over `klines`: long-only, one position at a time,
    /// anything still open is closed on the last bar.
    pub fn run(
        config: &BacktestConfig,
        generator: &mut dyn SignalGenerator,
        klines: &[Kline],
    ) -> BacktestResult {
        let mut equity = config.initial_capital;
        let mut peak_equity = equity;
        let mut max_drawdown = Decimal::ZERO;

        let mut trades: Vec<BacktestTrade> = Vec::new();
        let mut position: Option<OpenPosition> = None;

        let hundred = dec!(100);

        for kline in klines {
            match generator.on_bar(kline) {
                Signal::Buy => {
                    if position.is_none() && kline.close > Decimal::ZERO {
                        let position_value = equity * config.position_size_pct / hundred;
                        let size = position_value / kline.close;

                        position = Some(OpenPosition {
                            entry_time: kline.open_time,
                            entry_price: kline.close,
                            size,
                        });

                        debug!(
                            price = %kline.close,
                            size = %size,
                            time = kline.open_time,
                            "Opened LONG position"
                        );
                    }
                }
                Signal::Sell => {
                    if let Some(pos) = position.take() {
                        let trade = pos.close(kline);
                        equity += trade.pnl;

                        debug!(
                            entry = %trade.entry_price,
                            exit = %trade.exit_price,
                            pnl = %trade.pnl,
                            "Closed position"
                        );
                        trades.push(trade);
                    }
                }
                Signal::Hold => {}
            }

            let unrealized = position
                .as_ref()
                .map(|pos| pos.unrealized(kline))
                .unwrap_or(Decimal::ZERO);
            let current_equity = equity + unrealized;

            if current_equity > peak_equity {
                peak_equity = current_equity;
            }
            let drawdown = peak_equity - current_equity;
            if drawdown > max_drawdown {
                max_drawdown = drawdown;
            }
        }

        // Close any remaining open position at last bar
        if let (Some(pos), Some(last_kline)) = (position.take(), klines.last()) {
            let trade = pos.close(last_kline);
            equity += trade.pnl;
            trades.push(trade);
        }

        let metrics = Self::compute_metrics(config, equity, max_drawdown, &trades);

        debug!(
            strategy = generator.name(),
            bars = klines.len(),
            total_trades = metrics.total_trades,
            net_profit = %metrics.net_profit,
            profit_factor = %metrics.profit_factor,
            "Backtest complete"
        );

        BacktestResult {
            initial_capital: config.initial_capital,
            final_equity: equity,
            trades,
            metrics,
        }
    }

    fn compute_metrics(
        config: &BacktestConfig,
        final_equity: Decimal,
        max_drawdown: Decimal,
        trades: &[BacktestTrade],
    ) -> BacktestMetrics {
        // Profit factor = gross profits / gross losses
        let gross_profits: Decimal = trades
            .iter()
            .filter(|t| t.pnl > Decimal::ZERO)
            .map(|t| t.pnl)
            .sum();
        let gross_losses: Decimal = trades
            .iter()
            .filter(|t| t.pnl < Decimal::ZERO)
            .map(|t| t.pnl.abs())
            .sum();
        let profit_factor = if gross_losses > Decimal::ZERO {
            gross_profits / gross_losses
        } else if gross_profits > Decimal::ZERO {
            dec!(999.99) // Infinite profit factor capped
        } else {
            Decimal::ZERO
        };

        BacktestMetrics {
            total_trades: trades.len() as u32,
            profit_factor,
            net_profit: final_equity - config.initial_capital,
            max_drawdown,
            true_kelly: Self::true_kelly(trades),
        }
    }

    /// Kelly fraction `W - (1 - W) / R` as a percentage, where W is the
    /// win probability and R the average win over the average loss.
    pub fn true_kelly(trades: &[BacktestTrade]) -> Decimal {
        let total = trades.len();
        let wins: Vec<Decimal> = trades
            .iter()
            .filter(|t| t.pnl > Decimal::ZERO)
            .map(|t| t.pnl)
            .collect();
        let losses: Vec<Decimal> = trades
            .iter()
            .filter(|t| t.pnl < Decimal::ZERO)
            .map(|t| t.pnl.abs())
            .collect();

        if total == 0 || wins.is_empty() {
            return Decimal::ZERO;
        }
        if losses.is_empty() {
            return dec!(100);
        }

        let avg_win = wins.iter().sum::<Decimal>() / Decimal::from(wins.len());
        let avg_loss = losses.iter().sum::<Decimal>() / Decimal::from(losses.len());
        let win_prob = Decimal::from(wins.len()) / Decimal::from(total);
        let ratio = avg_win / avg_loss;

        ((win_prob - (Decimal::ONE - win_prob) / ratio) * dec!(100)).round_dp(2)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::indicators::tests::make_klines;
    use crate::indicators::RsiSignalGenerator;

    /// Replays a fixed signal script, one entry per bar.
    struct Scripted {
        signals: Vec<Signal>,
        bar: usize,
    }

    impl Scripted {
        fn new(signals: Vec<Signal>) -> Self {
            Self { signals, bar: 0 }
        }
    }

    impl SignalGenerator for Scripted {
        fn name(&self) -> &str {
            "Scripted"
        }

        fn on_bar(&mut self, _kline: &Kline) -> Signal {
            let signal = self.signals.get(self.bar).copied().unwrap_or(Signal::Hold);
            self.bar += 1;
            signal
        }
    }

    fn trade(pnl: Decimal) -> BacktestTrade {
        BacktestTrade {
            entry_time: 0,
            exit_time: 1,
            entry_price: dec!(100),
            exit_price: dec!(100),
            size: dec!(1),
            pnl,
        }
    }

    #[test]
    fn test_empty_klines() {
        let config = BacktestConfig::default();
        let mut gen = Scripted::new(vec![]);
        let result = BacktestEngine::run(&config, &mut gen, &[]);
        assert_eq!(result.metrics, BacktestMetrics::default());
        assert_eq!(result.final_equity, dec!(10000));
    }

    #[test]
    fn test_round_trip_trade_pnl() {
        use Signal::*;
        let klines = make_klines(&[100.0, 110.0, 120.0, 90.0]);
        let mut gen = Scripted::new(vec![Buy, Hold, Sell, Hold]);
        let result = BacktestEngine::run(&BacktestConfig::default(), &mut gen, &klines);

        // 10% of 10000 at 100 = 10 units, sold at 120
        assert_eq!(result.trades.len(), 1);
        assert_eq!(result.trades[0].size, dec!(10));
        assert_eq!(result.metrics.net_profit, dec!(200));
        assert_eq!(result.metrics.profit_factor, dec!(999.99));
        assert_eq!(result.metrics.true_kelly, dec!(100));
        assert_eq!(result.metrics.max_drawdown, Decimal::ZERO);
    }

    #[test]
    fn test_open_position_closed_on_last_bar() {
        use Signal::*;
        let klines = make_klines(&[100.0, 95.0, 90.0]);
        let mut gen = Scripted::new(vec![Buy, Buy, Hold]);
        let result = BacktestEngine::run(&BacktestConfig::default(), &mut gen, &klines);

        assert_eq!(result.metrics.total_trades, 1);
        assert_eq!(result.trades[0].exit_price, dec!(90));
        assert_eq!(result.metrics.net_profit, dec!(-100));
        assert_eq!(result.metrics.profit_factor, Decimal::ZERO);
        assert_eq!(result.metrics.true_kelly, Decimal::ZERO);
        // Equity fell from 10000 to 9900 while the position was open
        assert_eq!(result.metrics.max_drawdown, dec!(100));
    }

    #[test]
    fn test_trades_are_long_round_trips() {
        use Signal::*;
        // Falling then rising prices: a long must lose on the way down
        let klines = make_klines(&[120.0, 100.0, 100.0, 110.0, 130.0]);
        let mut gen = Scripted::new(vec![Buy, Sell, Buy, Hold, Sell]);
        let result = BacktestEngine::run(&BacktestConfig::default(), &mut gen, &klines);

        assert_eq!(result.trades.len(), 2);
        for t in &result.trades {
            assert!(t.exit_time > t.entry_time);
            assert!(t.size > Decimal::ZERO);
            assert_eq!(t.pnl, (t.exit_price - t.entry_price) * t.size);
        }
        assert!(result.trades[0].pnl < Decimal::ZERO);
        assert!(result.trades[1].pnl > Decimal::ZERO);
    }

    #[test]
    fn test_sell_without_position_is_ignored() {
        use Signal::*;
        let klines = make_klines(&[100.0, 101.0]);
        let mut gen = Scripted::new(vec![Sell, Sell]);
        let result = BacktestEngine::run(&BacktestConfig::default(), &mut gen, &klines);
        assert_eq!(result.metrics.total_trades, 0);
    }

    #[test]
    fn test_profit_factor_with_losses() {
        use Signal::*;
        // Win 10 units * 20, then lose roughly half that
        let klines = make_klines(&[100.0, 120.0, 100.0, 90.0]);
        let mut gen = Scripted::new(vec![Buy, Sell, Buy, Sell]);
        let result = BacktestEngine::run(&BacktestConfig::default(), &mut gen, &klines);

        assert_eq!(result.metrics.total_trades, 2);
        let gross_win = result.trades[0].pnl;
        let gross_loss = result.trades[1].pnl.abs();
        assert_eq!(gross_win, dec!(200));
        assert_eq!(result.metrics.profit_factor, gross_win / gross_loss);
        assert!(result.metrics.profit_factor > Decimal::ONE);
    }

    #[test]
    fn test_true_kelly_formula() {
        // W = 0.5, R = 200 / 100 = 2 -> 0.5 - 0.5 / 2 = 0.25
        let trades = vec![trade(dec!(200)), trade(dec!(-100))];
        assert_eq!(BacktestEngine::true_kelly(&trades), dec!(25));

        // W = 0.25, R = 1 -> 0.25 - 0.75 = -0.5
        let trades = vec![
            trade(dec!(50)),
            trade(dec!(-50)),
            trade(dec!(-50)),
            trade(dec!(-50)),
        ];
        assert_eq!(BacktestEngine::true_kelly(&trades), dec!(-50));
    }

    #[test]
    fn test_true_kelly_edge_cases() {
        assert_eq!(BacktestEngine::true_kelly(&[]), Decimal::ZERO);
        assert_eq!(
            BacktestEngine::true_kelly(&[trade(dec!(-10)), trade(dec!(-5))]),
            Decimal::ZERO
        );
        assert_eq!(
            BacktestEngine::true_kelly(&[trade(dec!(10)), trade(dec!(0))]),
            dec!(100)
        );
    }

    #[test]
    fn test_backtest_with_rsi_runs() {
        let mut prices = Vec::new();
        for i in 0..20 {
            prices.push(100.0 - (i as f64) * 2.0);
        }
        for i in 0..20 {
            prices.push(60.0 + (i as f64) * 3.0);
        }

        let klines = make_klines(&prices);
        let mut gen = RsiSignalGenerator::new(14, 70.0, 30.0).unwrap();
        let result = BacktestEngine::run(&BacktestConfig::default(), &mut gen, &klines);
        assert_eq!(result.initial_capital, dec!(10000));
        assert!(result.metrics.total_trades >= 1);
        assert_eq!(
            result.final_equity - result.initial_capital,
            result.metrics.net_profit
        );
    }
}
