//! Historical data sources for a sweep
//!
//! Every combination in a sweep is backtested against the same bars, so the
//! data is loaded once up front and shared.

use std::io::Read;
use std::path::Path;
use std::str::FromStr;

use anyhow::{Context, Result};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rust_decimal::prelude::FromPrimitive;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::api::BinanceClient;
use crate::error::ConfigError;
use crate::types::Kline;

const CSV_COLUMNS: [&str; 7] = [
    "open_time",
    "open",
    "high",
    "low",
    "close",
    "volume",
    "close_time",
];

/// Where the bars for a sweep come from
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum DataSource {
    /// CSV file with an `open_time,open,high,low,close,volume,close_time` header
    File { path: String },
    Binance {
        symbol: String,
        #[serde(default = "default_interval")]
        interval: String,
        #[serde(default = "default_days")]
        days: u32,
    },
    /// Seeded random walk, reproducible for a given seed
    Synthetic {
        #[serde(default = "default_bars")]
        bars: usize,
        #[serde(default)]
        seed: u64,
        #[serde(default = "default_start_price")]
        start_price: Decimal,
    },
}

fn default_interval() -> String {
    "1h".to_string()
}

fn default_days() -> u32 {
    30
}

fn default_bars() -> usize {
    2000
}

fn default_start_price() -> Decimal {
    dec!(100)
}

impl DataSource {
    /// Short description for logs.
    pub fn describe(&self) -> String {
        match self {
            DataSource::File { path } => format!("file {}", path),
            DataSource::Binance {
                symbol,
                interval,
                days,
            } => format!("binance {} {} ({}d)", symbol, interval, days),
            DataSource::Synthetic { bars, seed, .. } => {
                format!("synthetic {} bars (seed {})", bars, seed)
            }
        }
    }

    pub async fn load(&self) -> Result<Vec<Kline>> {
        let klines = match self {
            DataSource::File { path } => load_klines_csv(Path::new(path))?,
            DataSource::Binance {
                symbol,
                interval,
                days,
            } => {
                BinanceClient::new()?
                    .get_recent_klines(symbol, interval, *days)
                    .await?
            }
            DataSource::Synthetic {
                bars,
                seed,
                start_price,
            } => synthetic_klines(*bars, *seed, *start_price),
        };

        if klines.is_empty() {
            return Err(ConfigError::NoData(self.describe()).into());
        }

        info!(source = %self.describe(), bars = klines.len(), "Loaded historical data");
        Ok(klines)
    }
}

/// Load bars from a CSV file on disk.
pub fn load_klines_csv(path: &Path) -> Result<Vec<Kline>> {
    if !path.is_file() {
        return Err(ConfigError::MissingDataFile(path.display().to_string()).into());
    }
    let file = std::fs::File::open(path)
        .with_context(|| format!("failed to open csv: {}", path.display()))?;
    read_klines_csv(file).with_context(|| format!("failed to read csv: {}", path.display()))
}

/// Parse bars from any CSV reader. Columns are located by header name.
pub fn read_klines_csv<R: Read>(reader: R) -> Result<Vec<Kline>> {
    let mut rdr = csv::ReaderBuilder::new()
        .has_headers(true)
        .trim(csv::Trim::All)
        .from_reader(reader);

    let headers = rdr.headers()?.clone();
    let mut columns = [0usize; 7];
    for (slot, name) in columns.iter_mut().zip(CSV_COLUMNS) {
        *slot = headers
            .iter()
            .position(|h| h.eq_ignore_ascii_case(name))
            .with_context(|| format!("missing column '{}'", name))?;
    }

    let mut klines = Vec::new();
    for (row, record) in rdr.records().enumerate() {
        let record = record?;
        let field = |i: usize| record.get(columns[i]).unwrap_or("");
        let decimal = |i: usize| {
            Decimal::from_str(field(i))
                .with_context(|| format!("row {}: bad {} '{}'", row + 1, CSV_COLUMNS[i], field(i)))
        };
        let timestamp = |i: usize| {
            field(i)
                .parse::<i64>()
                .with_context(|| format!("row {}: bad {} '{}'", row + 1, CSV_COLUMNS[i], field(i)))
        };

        klines.push(Kline {
            open_time: timestamp(0)?,
            open: decimal(1)?,
            high: decimal(2)?,
            low: decimal(3)?,
            close: decimal(4)?,
            volume: decimal(5)?,
            close_time: timestamp(6)?,
        });
    }

    Ok(klines)
}

/// Deterministic random-walk bars on a one-hour grid.
///
/// Drift flips sign every few hundred bars so trend and mean-reversion
/// strategies both get something to trade.
pub fn synthetic_klines(bars: usize, seed: u64, start_price: Decimal) -> Vec<Kline> {
    const BAR_MS: i64 = 3_600_000;

    let mut rng = StdRng::seed_from_u64(seed);
    let mut price = start_price.max(dec!(0.01));
    let mut drift = 0.0005_f64;
    let mut klines = Vec::with_capacity(bars);

    for i in 0..bars {
        if i > 0 && i % 250 == 0 {
            drift = -drift;
        }
        let ret = drift + rng.gen_range(-0.015..0.015);
        let open = price;
        let close = (open * Decimal::from_f64(1.0 + ret).unwrap_or(Decimal::ONE))
            .round_dp(4)
            .max(dec!(0.01));
        let wick_up = Decimal::from_f64(rng.gen_range(0.0..0.005)).unwrap_or(Decimal::ZERO);
        let wick_down = Decimal::from_f64(rng.gen_range(0.0..0.005)).unwrap_or(Decimal::ZERO);
        let high = (open.max(close) * (Decimal::ONE + wick_up)).round_dp(4);
        let low = (open.min(close) * (Decimal::ONE - wick_down)).round_dp(4);
        let volume = Decimal::from(rng.gen_range(100u32..10_000));

        let open_time = i as i64 * BAR_MS;
        klines.push(Kline {
            open_time,
            open,
            high,
            low,
            close,
            volume,
            close_time: open_time + BAR_MS - 1,
        });
        price = close;
    }

    klines
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = "open_time,open,high,low,close,volume,close_time
0,100.0,101.5,99.0,100.5,10,59999
60000,100.5,102.0,100.1,101.75,12.5,119999
";

    #[test]
    fn test_read_csv() {
        let klines = read_klines_csv(SAMPLE.as_bytes()).unwrap();
        assert_eq!(klines.len(), 2);
        assert_eq!(klines[1].close, dec!(101.75));
        assert_eq!(klines[1].volume, dec!(12.5));
        assert_eq!(klines[1].open_time, 60000);
    }

    #[test]
    fn test_read_csv_columns_by_name() {
        let reordered = "close,open_time,open,high,low,volume,close_time
100.5,0,100,101,99,10,59999
";
        let klines = read_klines_csv(reordered.as_bytes()).unwrap();
        assert_eq!(klines[0].close, dec!(100.5));
        assert_eq!(klines[0].open, dec!(100));
    }

    #[test]
    fn test_read_csv_errors() {
        assert!(read_klines_csv("open_time,open\n0,1\n".as_bytes()).is_err());
        let bad = "open_time,open,high,low,close,volume,close_time\n0,x,1,1,1,1,1\n";
        let err = read_klines_csv(bad.as_bytes()).unwrap_err();
        assert!(err.to_string().contains("bad open"));
    }

    #[test]
    fn test_missing_file_is_config_error() {
        let err = load_klines_csv(Path::new("/definitely/not/here.csv")).unwrap_err();
        assert_eq!(
            err.downcast_ref::<ConfigError>(),
            Some(&ConfigError::MissingDataFile("/definitely/not/here.csv".to_string()))
        );
    }

    #[test]
    fn test_synthetic_is_deterministic() {
        let a = synthetic_klines(300, 7, dec!(100));
        let b = synthetic_klines(300, 7, dec!(100));
        let c = synthetic_klines(300, 8, dec!(100));
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_eq!(a.len(), 300);
        assert_eq!(a[0].open, dec!(100));
        for pair in a.windows(2) {
            assert_eq!(pair[0].close, pair[1].open);
        }
        for k in &a {
            assert!(k.high >= k.open.max(k.close));
            assert!(k.low <= k.open.min(k.close));
        }
    }

    #[tokio::test]
    async fn test_empty_source_is_no_data() {
        let source = DataSource::Synthetic {
            bars: 0,
            seed: 1,
            start_price: dec!(100),
        };
        let err = source.load().await.unwrap_err();
        assert!(matches!(
            err.downcast_ref::<ConfigError>(),
            Some(ConfigError::NoData(_))
        ));
    }

    #[test]
    fn test_data_source_json() {
        let source: DataSource =
            serde_json::from_str(r#"{"type":"binance","symbol":"BTCUSDT"}"#).unwrap();
        assert_eq!(
            source,
            DataSource::Binance {
                symbol: "BTCUSDT".to_string(),
                interval: "1h".to_string(),
                days: 30,
            }
        );
        let source: DataSource = serde_json::from_str(r#"{"type":"synthetic","seed":3}"#).unwrap();
        assert!(matches!(source, DataSource::Synthetic { bars: 2000, seed: 3, .. }));
    }
}
