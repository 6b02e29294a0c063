//! Polygon.io equities snapshots.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use market_monitor::{FetchError, PriceSnapshot, PriceSource};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};
use std::time::Duration;

use crate::http::{build_client, fetch_chunked, positive, read_json, send_request};
use crate::rate_limiter::RateLimiter;

const BASE_URL: &str = "https://api.polygon.io";
/// Tickers per multi-ticker snapshot request.
const BATCH_CHUNK: usize = 100;

#[derive(Clone)]
pub struct PolygonSource {
    api_key: String,
    base_url: String,
    client: Client,
    rate_limiter: RateLimiter,
    concurrency: usize,
    retry_wait: Duration,
}

impl PolygonSource {
    pub fn new(api_key: String) -> Self {
        // Default 500 req/min for Starter plan. Free tier users should set
        // POLYGON_RATE_LIMIT=5.
        let rate_limit: usize = std::env::var("POLYGON_RATE_LIMIT")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(500);

        Self {
            api_key,
            base_url: BASE_URL.to_string(),
            client: build_client(Duration::from_secs(30)),
            rate_limiter: RateLimiter::per_minute("Polygon", rate_limit),
            concurrency: 8,
            retry_wait: Duration::from_secs(15),
        }
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    pub fn with_concurrency(mut self, limit: usize) -> Self {
        self.concurrency = limit.max(1);
        self
    }

    async fn get_snapshot(&self, symbol: &str) -> Result<SnapshotTicker, FetchError> {
        let url = format!(
            "{}/v2/snapshot/locale/us/markets/stocks/tickers/{}",
            self.base_url, symbol
        );
        let response = send_request(
            &self.client,
            &self.rate_limiter,
            self.client.get(&url).query(&[("apiKey", &self.api_key)]),
            "Polygon",
            self.retry_wait,
        )
        .await?;

        if response.status().as_u16() == 404 {
            return Err(FetchError::UnknownSymbol(symbol.to_string()));
        }

        let snap: SnapshotResponse = read_json(response).await?;
        snap.ticker
            .ok_or_else(|| FetchError::UnknownSymbol(symbol.to_string()))
    }

    async fn get_snapshots(&self, symbols: &[String]) -> Result<Vec<SnapshotTicker>, FetchError> {
        let url = format!(
            "{}/v2/snapshot/locale/us/markets/stocks/tickers",
            self.base_url
        );
        let tickers = symbols.join(",");
        let response = send_request(
            &self.client,
            &self.rate_limiter,
            self.client
                .get(&url)
                .query(&[("tickers", tickers.as_str()), ("apiKey", self.api_key.as_str())]),
            "Polygon",
            self.retry_wait,
        )
        .await?;

        let snaps: SnapshotsResponse = read_json(response).await?;
        Ok(snaps.tickers.unwrap_or_default())
    }
}

#[async_trait]
impl PriceSource for PolygonSource {
    async fn fetch(&self, symbol: &str) -> Result<PriceSnapshot, FetchError> {
        let ticker = self.get_snapshot(symbol).await?;
        to_price_snapshot(symbol, &ticker)
    }

    /// Multi-ticker snapshot endpoint, one request per chunk of symbols with
    /// at most `concurrency` chunks in flight.
    async fn batch_fetch(
        &self,
        symbols: &BTreeSet<String>,
    ) -> Result<HashMap<String, PriceSnapshot>, FetchError> {
        if symbols.is_empty() {
            return Ok(HashMap::new());
        }

        let list: Vec<String> = symbols.iter().cloned().collect();
        let mut prices = HashMap::with_capacity(list.len());
        let mut last_err = None;

        let results = fetch_chunked(&list, BATCH_CHUNK, self.concurrency, |chunk| {
            self.get_snapshots(chunk)
        })
        .await;

        for (chunk_len, result) in results {
            match result {
                Ok(tickers) => {
                    for ticker in tickers {
                        let Some(symbol) = ticker.ticker.clone() else {
                            continue;
                        };
                        if !symbols.contains(&symbol) {
                            continue;
                        }
                        match to_price_snapshot(&symbol, &ticker) {
                            Ok(snapshot) => {
                                prices.insert(symbol, snapshot);
                            }
                            Err(e) => tracing::debug!("Polygon snapshot for {} unusable: {}", symbol, e),
                        }
                    }
                }
                Err(e) => {
                    tracing::warn!("Polygon batch snapshot of {} tickers failed: {}", chunk_len, e);
                    last_err = Some(e);
                }
            }
        }

        match last_err {
            Some(e) if prices.is_empty() => Err(e),
            _ => Ok(prices),
        }
    }

    fn concurrency_limit(&self) -> usize {
        self.concurrency
    }

    fn name(&self) -> &str {
        "polygon"
    }
}

/// Last trade, falling back to today's close and then the previous close
/// (pre-market and weekends have no trade yet).
pub fn snapshot_price(ticker: &SnapshotTicker) -> Option<f64> {
    ticker
        .last_trade
        .as_ref()
        .and_then(|t| t.p)
        .and_then(positive)
        .or_else(|| ticker.day.as_ref().and_then(|d| d.c).and_then(positive))
        .or_else(|| ticker.prev_day.as_ref().and_then(|d| d.c).and_then(positive))
}

fn to_price_snapshot(symbol: &str, ticker: &SnapshotTicker) -> Result<PriceSnapshot, FetchError> {
    let price = snapshot_price(ticker).ok_or_else(|| {
        FetchError::InvalidResponse(format!("no price in Polygon snapshot for {}", symbol))
    })?;

    // Trade timestamps are nanoseconds since the epoch.
    let timestamp = ticker
        .last_trade
        .as_ref()
        .and_then(|t| t.t)
        .and_then(|ns| DateTime::from_timestamp_millis(ns / 1_000_000))
        .unwrap_or_else(Utc::now);

    let mut snapshot = PriceSnapshot::new(symbol.to_uppercase(), price, timestamp);
    snapshot.change_24h = ticker.todays_change_perc.filter(|v| v.is_finite());
    Ok(snapshot)
}

#[derive(Debug, Deserialize)]
struct SnapshotResponse {
    ticker: Option<SnapshotTicker>,
}

#[derive(Debug, Deserialize)]
struct SnapshotsResponse {
    tickers: Option<Vec<SnapshotTicker>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SnapshotTicker {
    pub ticker: Option<String>,
    pub day: Option<SnapshotDay>,
    #[serde(rename = "lastTrade")]
    pub last_trade: Option<SnapshotLastTrade>,
    #[serde(rename = "prevDay")]
    pub prev_day: Option<SnapshotDay>,
    #[serde(rename = "todaysChangePerc")]
    pub todays_change_perc: Option<f64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SnapshotDay {
    pub o: Option<f64>,
    pub h: Option<f64>,
    pub l: Option<f64>,
    pub c: Option<f64>,
    pub v: Option<f64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SnapshotLastTrade {
    pub p: Option<f64>,
    pub s: Option<f64>,
    pub t: Option<i64>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(json: &str) -> SnapshotTicker {
        serde_json::from_str::<SnapshotResponse>(json)
            .unwrap()
            .ticker
            .unwrap()
    }

    #[test]
    fn test_price_prefers_last_trade() {
        let ticker = parse(
            r#"{"status":"OK","ticker":{"ticker":"AAPL","todaysChangePerc":1.25,
                "day":{"o":240.1,"h":245.0,"l":239.5,"c":244.0,"v":1000000},
                "lastTrade":{"p":244.76,"s":100,"t":1740759600000000000},
                "prevDay":{"c":241.7}}}"#,
        );
        assert_eq!(snapshot_price(&ticker), Some(244.76));

        let snap = to_price_snapshot("aapl", &ticker).unwrap();
        assert_eq!(snap.symbol, "AAPL");
        assert_eq!(snap.change_24h, Some(1.25));
        assert_eq!(snap.timestamp.timestamp(), 1_740_759_600);
    }

    #[test]
    fn test_price_falls_back_to_closes() {
        let ticker = parse(r#"{"ticker":{"day":{"c":0.0},"prevDay":{"c":131.5}}}"#);
        assert_eq!(snapshot_price(&ticker), Some(131.5));

        let ticker = parse(r#"{"ticker":{"day":{"c":133.0},"lastTrade":{"p":0.0}}}"#);
        assert_eq!(snapshot_price(&ticker), Some(133.0));
    }

    #[test]
    fn test_missing_price_is_invalid() {
        let ticker = parse(r#"{"ticker":{"ticker":"ZZZZ"}}"#);
        assert!(matches!(
            to_price_snapshot("ZZZZ", &ticker),
            Err(FetchError::InvalidResponse(_))
        ));
    }

    #[test]
    fn test_parses_multi_ticker_response() {
        let body = r#"{"status":"OK","count":2,"tickers":[
            {"ticker":"AAPL","lastTrade":{"p":244.76}},
            {"ticker":"MSFT","day":{"c":410.2}}]}"#;
        let snaps: SnapshotsResponse = serde_json::from_str(body).unwrap();
        let tickers = snaps.tickers.unwrap();
        assert_eq!(tickers.len(), 2);
        assert_eq!(tickers[1].ticker.as_deref(), Some("MSFT"));
        assert_eq!(snapshot_price(&tickers[1]), Some(410.2));
    }
}
