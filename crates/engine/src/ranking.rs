//! Result filtering and ranking

use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::enumerator::Assignment;
use crate::error::ConfigError;
use crate::types::BacktestMetrics;

/// Outcome of one successful backtest in a sweep
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SweepResult {
    pub assignment: Assignment,
    pub metrics: BacktestMetrics,
}

/// A result with its 1-based position in the final ordering
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RankedResult {
    pub rank: usize,
    #[serde(flatten)]
    pub result: SweepResult,
}

/// Which metric orders the final result list
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SortCriterion {
    #[default]
    ProfitFactor,
    TotalProfit,
    MaxDrawdown,
    TrueKelly,
}

impl SortCriterion {
    pub fn all() -> &'static [SortCriterion] {
        &[
            Self::ProfitFactor,
            Self::TotalProfit,
            Self::MaxDrawdown,
            Self::TrueKelly,
        ]
    }

    pub fn key(&self) -> &'static str {
        match self {
            Self::ProfitFactor => "profit_factor",
            Self::TotalProfit => "total_profit",
            Self::MaxDrawdown => "max_drawdown",
            Self::TrueKelly => "true_kelly",
        }
    }

    /// True when a smaller value ranks first.
    pub fn lower_is_better(&self) -> bool {
        matches!(self, Self::MaxDrawdown)
    }

    fn metric(&self, metrics: &BacktestMetrics) -> Decimal {
        match self {
            Self::ProfitFactor => metrics.profit_factor,
            Self::TotalProfit => metrics.net_profit,
            Self::MaxDrawdown => metrics.max_drawdown.abs(),
            Self::TrueKelly => metrics.true_kelly,
        }
    }

    /// Ordering that puts the better result first.
    pub fn compare(&self, a: &BacktestMetrics, b: &BacktestMetrics) -> Ordering {
        let (a, b) = (self.metric(a), self.metric(b));
        if self.lower_is_better() {
            a.cmp(&b)
        } else {
            b.cmp(&a)
        }
    }
}

impl fmt::Display for SortCriterion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SortCriterion::ProfitFactor => write!(f, "Highest profit factor"),
            SortCriterion::TotalProfit => write!(f, "Highest P&L"),
            SortCriterion::MaxDrawdown => write!(f, "Lowest max drawdown"),
            SortCriterion::TrueKelly => write!(f, "Highest True Kelly"),
        }
    }
}

impl FromStr for SortCriterion {
    type Err = ConfigError;

    /// Accepts the snake_case key, a short alias, or the display label.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_lowercase();
        match normalized.as_str() {
            "profit_factor" | "pf" | "highest profit factor" => Ok(Self::ProfitFactor),
            "total_profit" | "pnl" | "profit" | "highest p&l" => Ok(Self::TotalProfit),
            "max_drawdown" | "drawdown" | "dd" | "lowest max drawdown" => Ok(Self::MaxDrawdown),
            "true_kelly" | "kelly" | "highest true kelly" => Ok(Self::TrueKelly),
            _ => Err(ConfigError::UnknownSortCriterion(s.to_string())),
        }
    }
}

/// Filter predicate applied before a result is accumulated.
pub fn passes_min_trades(metrics: &BacktestMetrics, min_trades: u32) -> bool {
    metrics.total_trades >= min_trades
}

/// Order results best-first by `criterion` and assign ranks.
///
/// The sort is stable: ties keep their enumeration order.
pub fn rank_results(mut results: Vec<SweepResult>, criterion: SortCriterion) -> Vec<RankedResult> {
    results.sort_by(|a, b| criterion.compare(&a.metrics, &b.metrics));
    results
        .into_iter()
        .enumerate()
        .map(|(i, result)| RankedResult { rank: i + 1, result })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn result(index: u64, metrics: BacktestMetrics) -> SweepResult {
        SweepResult {
            assignment: Assignment::new(index, vec![("p".to_string(), Decimal::from(index))]),
            metrics,
        }
    }

    fn with_pf(index: u64, pf: Decimal) -> SweepResult {
        result(
            index,
            BacktestMetrics {
                total_trades: 10,
                profit_factor: pf,
                ..Default::default()
            },
        )
    }

    fn indices(ranked: &[RankedResult]) -> Vec<u64> {
        ranked.iter().map(|r| r.result.assignment.index).collect()
    }

    #[test]
    fn test_profit_factor_sorts_descending() {
        let ranked = rank_results(
            vec![
                with_pf(0, dec!(1.2)),
                with_pf(1, dec!(0.8)),
                with_pf(2, dec!(2.0)),
            ],
            SortCriterion::ProfitFactor,
        );
        let pfs: Vec<Decimal> = ranked.iter().map(|r| r.result.metrics.profit_factor).collect();
        assert_eq!(pfs, vec![dec!(2.0), dec!(1.2), dec!(0.8)]);
        let ranks: Vec<usize> = ranked.iter().map(|r| r.rank).collect();
        assert_eq!(ranks, vec![1, 2, 3]);
    }

    #[test]
    fn test_drawdown_sorts_ascending() {
        let dd = |i: u64, d: Decimal| {
            result(
                i,
                BacktestMetrics {
                    max_drawdown: d,
                    ..Default::default()
                },
            )
        };
        let ranked = rank_results(
            vec![dd(0, dec!(500)), dd(1, dec!(100)), dd(2, dec!(300))],
            SortCriterion::MaxDrawdown,
        );
        let dds: Vec<Decimal> = ranked.iter().map(|r| r.result.metrics.max_drawdown).collect();
        assert_eq!(dds, vec![dec!(100), dec!(300), dec!(500)]);
    }

    #[test]
    fn test_total_profit_and_kelly_sort_descending() {
        let m = |i: u64, pnl: Decimal, kelly: Decimal| {
            result(
                i,
                BacktestMetrics {
                    net_profit: pnl,
                    true_kelly: kelly,
                    ..Default::default()
                },
            )
        };
        let input = vec![
            m(0, dec!(-50), dec!(30)),
            m(1, dec!(250), dec!(-10)),
            m(2, dec!(100), dec!(55)),
        ];
        let by_pnl = rank_results(input.clone(), SortCriterion::TotalProfit);
        assert_eq!(indices(&by_pnl), vec![1, 2, 0]);
        let by_kelly = rank_results(input, SortCriterion::TrueKelly);
        assert_eq!(indices(&by_kelly), vec![2, 0, 1]);
    }

    #[test]
    fn test_ties_keep_enumeration_order() {
        let ranked = rank_results(
            vec![
                with_pf(0, dec!(1.5)),
                with_pf(1, dec!(2.0)),
                with_pf(2, dec!(1.5)),
                with_pf(3, dec!(2.0)),
                with_pf(4, dec!(1.5)),
            ],
            SortCriterion::ProfitFactor,
        );
        assert_eq!(indices(&ranked), vec![1, 3, 0, 2, 4]);
    }

    #[test]
    fn test_empty_input_ranks_to_empty() {
        assert!(rank_results(vec![], SortCriterion::TrueKelly).is_empty());
    }

    #[test]
    fn test_min_trades_predicate() {
        let m = BacktestMetrics {
            total_trades: 49,
            profit_factor: dec!(999.99),
            ..Default::default()
        };
        assert!(!passes_min_trades(&m, 50));
        assert!(passes_min_trades(&m, 49));
    }

    #[test]
    fn test_sort_criterion_parsing() {
        assert_eq!("profit_factor".parse::<SortCriterion>(), Ok(SortCriterion::ProfitFactor));
        assert_eq!("Highest P&L".parse::<SortCriterion>(), Ok(SortCriterion::TotalProfit));
        assert_eq!("drawdown".parse::<SortCriterion>(), Ok(SortCriterion::MaxDrawdown));
        assert_eq!("Highest True Kelly".parse::<SortCriterion>(), Ok(SortCriterion::TrueKelly));
        assert!("sharpe".parse::<SortCriterion>().is_err());

        for c in SortCriterion::all() {
            assert_eq!(c.key().parse::<SortCriterion>(), Ok(*c));
            assert_eq!(c.to_string().parse::<SortCriterion>(), Ok(*c));
        }
    }
}
