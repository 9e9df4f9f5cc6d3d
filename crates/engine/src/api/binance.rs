//! Binance public API client for historical klines (no authentication required)

use anyhow::{Context, Result};
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use reqwest::Client;
use rust_decimal::Decimal;
use serde::Deserialize;
use std::str::FromStr;
use std::time::Duration;
use tracing::{debug, info};

use crate::types::Kline;

const DEFAULT_BASE_URL: &str = "https://api.binance.com";
const MAX_KLINES_PER_REQUEST: usize = 1000;
const PAGE_DELAY: Duration = Duration::from_millis(100);

/// Binance public market data client
#[derive(Clone)]
pub struct BinanceClient {
    client: Client,
    base_url: String,
}

/// Raw kline row: open time, OHLCV as strings, close time, then quote
/// volume and taker fields we don't use.
#[derive(Debug, Deserialize)]
struct RawKline(
    i64,
    String,
    String,
    String,
    String,
    String,
    i64,
    serde::de::IgnoredAny,
    serde::de::IgnoredAny,
    serde::de::IgnoredAny,
    serde::de::IgnoredAny,
    serde::de::IgnoredAny,
);

impl RawKline {
    fn into_kline(self) -> Option<Kline> {
        Some(Kline {
            open_time: self.0,
            open: Decimal::from_str(&self.1).ok()?,
            high: Decimal::from_str(&self.2).ok()?,
            low: Decimal::from_str(&self.3).ok()?,
            close: Decimal::from_str(&self.4).ok()?,
            volume: Decimal::from_str(&self.5).ok()?,
            close_time: self.6,
        })
    }
}

/// Decode a `/api/v3/klines` body, skipping rows with unparsable prices.
fn parse_klines(body: &str) -> Result<Vec<Kline>> {
    let raw: Vec<RawKline> = serde_json::from_str(body).context("Malformed klines response")?;
    Ok(raw.into_iter().filter_map(RawKline::into_kline).collect())
}

/// Millisecond range `[start, end)` of bars to download
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KlineWindow {
    pub start: i64,
    pub end: i64,
}

impl KlineWindow {
    /// The `days` leading up to `now`.
    pub fn trailing_days(days: u32, now: DateTime<Utc>) -> Self {
        let start = now - ChronoDuration::days(i64::from(days));
        Self {
            start: start.timestamp_millis(),
            end: now.timestamp_millis(),
        }
    }
}

/// Walks a window page by page. Bars are kept only if they open inside the
/// window and after the last bar already kept, so overlapping pages never
/// produce duplicates.
#[derive(Debug)]
struct PageCursor {
    window: KlineWindow,
    next_start: i64,
    last_open: Option<i64>,
    done: bool,
}

impl PageCursor {
    fn new(window: KlineWindow) -> Self {
        Self {
            window,
            next_start: window.start,
            last_open: None,
            done: window.start >= window.end,
        }
    }

    /// Fold one page in and return the bars to keep.
    fn accept(&mut self, page: Vec<Kline>) -> Vec<Kline> {
        let full_page = page.len() >= MAX_KLINES_PER_REQUEST;

        let fresh: Vec<Kline> = page
            .into_iter()
            .filter(|k| k.open_time < self.window.end)
            .filter(|k| self.last_open.map_or(true, |last| k.open_time > last))
            .collect();

        match fresh.last() {
            Some(last) => {
                self.last_open = Some(last.open_time);
                self.next_start = last.close_time + 1;
            }
            // Nothing new: the exchange has no more bars for this window
            None => self.done = true,
        }
        if !full_page || self.next_start >= self.window.end {
            self.done = true;
        }
        fresh
    }
}

impl BinanceClient {
    pub fn new() -> Result<Self> {
        Self::with_base_url(DEFAULT_BASE_URL)
    }

    pub fn with_base_url(base_url: impl Into<String>) -> Result<Self> {
        Ok(Self {
            client: Client::builder()
                .timeout(Duration::from_secs(30))
                .build()
                .context("Failed to build HTTP client")?,
            base_url: base_url.into(),
        })
    }

    /// One request of at most 1000 bars starting at `start`.
    async fn fetch_page(
        &self,
        symbol: &str,
        interval: &str,
        start: i64,
        end: i64,
    ) -> Result<Vec<Kline>> {
        let url = format!("{}/api/v3/klines", self.base_url);
        let response = self
            .client
            .get(&url)
            .query(&[("symbol", symbol), ("interval", interval)])
            .query(&[("startTime", start), ("endTime", end - 1)])
            .query(&[("limit", MAX_KLINES_PER_REQUEST)])
            .send()
            .await
            .with_context(|| format!("Binance request for {} failed", symbol))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            anyhow::bail!("Binance API error {}: {}", status, body);
        }

        parse_klines(&response.text().await?)
    }

    /// Download every bar of `symbol` that opens inside `window`.
    pub async fn fetch_window(
        &self,
        symbol: &str,
        interval: &str,
        window: KlineWindow,
    ) -> Result<Vec<Kline>> {
        let mut cursor = PageCursor::new(window);
        let mut klines = Vec::new();
        let mut pages = 0u32;

        info!(
            symbol,
            interval,
            start = window.start,
            end = window.end,
            "Downloading klines from Binance"
        );

        while !cursor.done {
            if pages > 0 {
                tokio::time::sleep(PAGE_DELAY).await;
            }
            let page = self
                .fetch_page(symbol, interval, cursor.next_start, window.end)
                .await?;
            pages += 1;
            let kept = cursor.accept(page);
            debug!(page = pages, kept = kept.len(), "Fetched kline page");
            klines.extend(kept);
        }

        info!(symbol, total = klines.len(), pages, "Kline download complete");
        Ok(klines)
    }

    /// Fetch the trailing `days` of history up to now.
    pub async fn get_recent_klines(
        &self,
        symbol: &str,
        interval: &str,
        days: u32,
    ) -> Result<Vec<Kline>> {
        self.fetch_window(symbol, interval, KlineWindow::trailing_days(days, Utc::now()))
            .await
    }
}
