//! KuCoin public market data for crypto pairs (`BASE-QUOTE`).

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use market_monitor::{FetchError, PriceSnapshot, PriceSource};
use reqwest::Client;
use serde::Deserialize;
use std::collections::{BTreeSet, HashMap};
use std::time::Duration;

use crate::http::{build_client, parse_decimal, positive, read_json, send_request};
use crate::rate_limiter::RateLimiter;

pub const BASE_URL: &str = "https://api.kucoin.com";
const SUCCESS_CODE: &str = "200000";

#[derive(Clone)]
pub struct KucoinSource {
    base_url: String,
    client: Client,
    rate_limiter: RateLimiter,
    retry_wait: Duration,
}

impl KucoinSource {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            client: build_client(Duration::from_secs(15)),
            // Public endpoints allow well above this; stay polite.
            rate_limiter: RateLimiter::per_minute("KuCoin", 600),
            retry_wait: Duration::from_secs(5),
        }
    }

    async fn get<T: for<'de> Deserialize<'de>>(
        &self,
        path: &str,
        query: &[(&str, &str)],
    ) -> Result<Option<T>, FetchError> {
        let url = format!("{}{}", self.base_url, path);
        let response = send_request(
            &self.client,
            &self.rate_limiter,
            self.client.get(&url).query(query),
            "KuCoin",
            self.retry_wait,
        )
        .await?;

        let envelope: Envelope<T> = read_json(response).await?;
        envelope.into_data()
    }
}

impl Default for KucoinSource {
    fn default() -> Self {
        Self::new(BASE_URL)
    }
}

#[async_trait]
impl PriceSource for KucoinSource {
    async fn fetch(&self, symbol: &str) -> Result<PriceSnapshot, FetchError> {
        let symbol = symbol.to_uppercase();
        let level1: Level1 = self
            .get("/api/v1/market/orderbook/level1", &[("symbol", symbol.as_str())])
            .await?
            .ok_or_else(|| FetchError::UnknownSymbol(symbol.clone()))?;
        level1.into_snapshot(&symbol)
    }

    /// A single symbol uses the level1 endpoint; anything larger pulls
    /// `allTickers` once and filters it locally.
    async fn batch_fetch(
        &self,
        symbols: &BTreeSet<String>,
    ) -> Result<HashMap<String, PriceSnapshot>, FetchError> {
        if symbols.is_empty() {
            return Ok(HashMap::new());
        }
        if symbols.len() == 1 {
            let mut prices = HashMap::new();
            for symbol in symbols {
                prices.insert(symbol.clone(), self.fetch(symbol).await?);
            }
            return Ok(prices);
        }

        let all: AllTickers = self
            .get("/api/v1/market/allTickers", &[])
            .await?
            .ok_or_else(|| FetchError::InvalidResponse("empty allTickers payload".to_string()))?;

        let prices = all.select(symbols);
        if prices.is_empty() {
            return Err(FetchError::UnknownSymbol(
                symbols.iter().cloned().collect::<Vec<_>>().join(","),
            ));
        }
        Ok(prices)
    }

    fn name(&self) -> &str {
        "kucoin"
    }
}

#[derive(Debug, Deserialize)]
struct Envelope<T> {
    code: String,
    #[serde(default)]
    msg: Option<String>,
    data: Option<T>,
}

impl<T> Envelope<T> {
    fn into_data(self) -> Result<Option<T>, FetchError> {
        if self.code != SUCCESS_CODE {
            return Err(FetchError::InvalidResponse(format!(
                "KuCoin error {}: {}",
                self.code,
                self.msg.unwrap_or_default()
            )));
        }
        Ok(self.data)
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Level1 {
    time: Option<i64>,
    price: Option<String>,
    best_bid: Option<String>,
    best_ask: Option<String>,
}

impl Level1 {
    fn into_snapshot(self, symbol: &str) -> Result<PriceSnapshot, FetchError> {
        let price = parse_decimal(self.price.as_deref())
            .and_then(positive)
            .ok_or_else(|| FetchError::InvalidResponse(format!("no price for {}", symbol)))?;
        let mut snapshot = PriceSnapshot::new(symbol, price, timestamp_ms(self.time));
        snapshot.best_bid = parse_decimal(self.best_bid.as_deref());
        snapshot.best_ask = parse_decimal(self.best_ask.as_deref());
        Ok(snapshot)
    }
}

#[derive(Debug, Deserialize)]
struct AllTickers {
    time: Option<i64>,
    #[serde(default)]
    ticker: Vec<KucoinTicker>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct KucoinTicker {
    symbol: String,
    last: Option<String>,
    buy: Option<String>,
    sell: Option<String>,
    change_rate: Option<String>,
}

impl AllTickers {
    fn select(self, symbols: &BTreeSet<String>) -> HashMap<String, PriceSnapshot> {
        let timestamp = timestamp_ms(self.time);
        self.ticker
            .into_iter()
            .filter(|t| symbols.contains(&t.symbol))
            .filter_map(|t| {
                let price = parse_decimal(t.last.as_deref()).and_then(positive)?;
                let mut snapshot = PriceSnapshot::new(t.symbol.clone(), price, timestamp);
                snapshot.best_bid = parse_decimal(t.buy.as_deref());
                snapshot.best_ask = parse_decimal(t.sell.as_deref());
                snapshot.change_24h = parse_decimal(t.change_rate.as_deref()).map(|r| r * 100.0);
                Some((t.symbol, snapshot))
            })
            .collect()
    }
}

fn timestamp_ms(ms: Option<i64>) -> DateTime<Utc> {
    ms.and_then(DateTime::from_timestamp_millis)
        .unwrap_or_else(Utc::now)
}
