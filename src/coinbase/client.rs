// =============================================================================
// Coinbase Exchange REST client — public market data endpoints
// =============================================================================
//
// Only unauthenticated endpoints are used: hourly candles and the product
// ticker. Candle rows arrive newest-first as
// `[time, low, high, open, close, volume]` arrays, at most 300 per request.

use anyhow::{Context, Result};
use chrono::{TimeZone, Utc};
use tracing::{debug, instrument, warn};

use crate::market_data::{Candle, CANDLE_STEP_SECS};

/// Upstream per-request candle limit.
const CANDLE_PAGE_LIMIT: usize = 300;

/// Consecutive mid-pagination failures tolerated before giving up on a
/// historical fetch.
const MAX_PAGE_RETRIES: u32 = 5;

/// Pause between retried pagination requests.
const PAGE_RETRY_DELAY: std::time::Duration = std::time::Duration::from_secs(1);

/// REST client for the Coinbase Exchange public market-data API.
#[derive(Clone)]
pub struct CoinbaseClient {
    base_url: String,
    client: reqwest::Client,
}

impl Default for CoinbaseClient {
    fn default() -> Self {
        Self::new()
    }
}

impl CoinbaseClient {
    pub fn new() -> Self {
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(10))
            .build()
            .expect("failed to build reqwest client");

        Self {
            base_url: "https://api.pro.coinbase.com".to_string(),
            client,
        }
    }

    // ── Candle pages ────────────────────────────────────────────────────

    /// Fetch up to `limit` hourly candles, newest-first.
    ///
    /// With `end = None` the window finishes at the current time (upstream
    /// default, includes the open hour). Otherwise the window is
    /// `[end - limit*3600, end]` in ISO form, matching upstream semantics.
    async fn fetch_candles_page(
        &self,
        product: &str,
        end: Option<i64>,
        limit: usize,
    ) -> Result<Vec<Candle>> {
        let url = format!("{}/products/{}/candles", self.base_url, product);
        let mut req = self
            .client
            .get(&url)
            .query(&[("granularity", CANDLE_STEP_SECS.to_string())]);

        if let Some(end_ts) = end {
            let start_ts = end_ts - limit as i64 * CANDLE_STEP_SECS;
            let end_dt = Utc
                .timestamp_opt(end_ts, 0)
                .single()
                .context("candle window end out of range")?;
            let start_dt = Utc
                .timestamp_opt(start_ts, 0)
                .single()
                .context("candle window start out of range")?;
            req = req.query(&[
                ("start", start_dt.to_rfc3339()),
                ("end", end_dt.to_rfc3339()),
            ]);
        }

        let rows: Vec<(i64, f64, f64, f64, f64, f64)> = req
            .send()
            .await
            .context("candle request failed")?
            .error_for_status()
            .context("candle request rejected")?
            .json()
            .await
            .context("candle response is not a candle list")?;

        debug!(product, rows = rows.len(), "candle page fetched");

        Ok(rows
            .into_iter()
            .map(|(time, low, high, open, close, volume)| Candle {
                time,
                low,
                high,
                open,
                close,
                volume,
            })
            .collect())
    }

    /// Fetch `count` hourly candles ending now, newest-first, paginating
    /// backwards over the upstream per-request limit.
    ///
    /// The first page failing is an error (there is nothing to seed from).
    /// Later pages are retried up to [`MAX_PAGE_RETRIES`] consecutive times;
    /// an empty page means upstream history is exhausted and the shorter
    /// result is returned as-is.
    #[instrument(skip(self), name = "coinbase::fetch_historical")]
    pub async fn fetch_historical(&self, product: &str, count: usize) -> Result<Vec<Candle>> {
        let mut full = self
            .fetch_candles_page(product, None, CANDLE_PAGE_LIMIT)
            .await
            .context("historical seed fetch failed on the first page")?;

        let mut failures: u32 = 0;
        while full.len() < count {
            let oldest = match full.last() {
                Some(c) => c.time,
                None => break,
            };

            match self
                .fetch_candles_page(product, Some(oldest), CANDLE_PAGE_LIMIT)
                .await
            {
                Ok(page) => {
                    failures = 0;
                    let before = full.len();
                    // The window boundary candle comes back again; drop it
                    // and anything newer.
                    full.extend(page.into_iter().filter(|c| c.time < oldest));
                    if full.len() == before {
                        warn!(product, have = full.len(), "upstream history exhausted");
                        break;
                    }
                }
                Err(e) => {
                    failures += 1;
                    if failures >= MAX_PAGE_RETRIES {
                        return Err(e).context("historical pagination failed repeatedly");
                    }
                    warn!(error = %e, attempt = failures, "candle page failed, retrying");
                    tokio::time::sleep(PAGE_RETRY_DELAY).await;
                }
            }
        }

        full.truncate(count);
        Ok(full)
    }

    /// Fetch the single most recent candle, including the still-open hour.
    /// `None` on any failure or malformed response.
    pub async fn fetch_latest_candle(&self, product: &str) -> Option<Candle> {
        let now = Utc::now().timestamp();
        match self.fetch_candles_page(product, Some(now), 1).await {
            Ok(rows) => rows.into_iter().next(),
            Err(e) => {
                warn!(product, error = %e, "latest candle fetch failed");
                None
            }
        }
    }

    /// Fetch the single historical candle for `bucket` (a backfill target).
    /// `None` on failure or when upstream has no data for that hour.
    pub async fn fetch_candle_at(&self, product: &str, bucket: i64) -> Option<Candle> {
        // Window end just past the bucket start so exactly this hour is
        // covered by a limit-1 request.
        match self.fetch_candles_page(product, Some(bucket + 60), 1).await {
            Ok(rows) => rows.into_iter().find(|c| c.time == bucket),
            Err(e) => {
                warn!(product, bucket, error = %e, "backfill candle fetch failed");
                None
            }
        }
    }

    // ── Ticker ──────────────────────────────────────────────────────────

    /// Fetch the last-traded price. `None` on transient failure.
    pub async fn fetch_last_price(&self, product: &str) -> Option<f64> {
        let url = format!("{}/products/{}/ticker", self.base_url, product);

        let body: serde_json::Value = match self.client.get(&url).send().await {
            Ok(resp) => match resp.json().await {
                Ok(v) => v,
                Err(e) => {
                    warn!(product, error = %e, "ticker response is not JSON");
                    return None;
                }
            },
            Err(e) => {
                warn!(product, error = %e, "ticker request failed");
                return None;
            }
        };

        match body["price"].as_str().and_then(|s| s.parse::<f64>().ok()) {
            Some(price) => Some(price),
            None => {
                warn!(product, "ticker response missing a parseable price");
                None
            }
        }
    }
}
