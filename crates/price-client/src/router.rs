use async_trait::async_trait;
use market_monitor::{FetchError, PriceSnapshot, PriceSource};
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

/// Crypto pairs are written `BASE-QUOTE`; everything else is an equity.
pub fn is_crypto_pair(symbol: &str) -> bool {
    symbol.contains('-')
}

/// Sends each symbol to the provider for its asset class.
pub struct RoutingSource {
    equities: Arc<dyn PriceSource>,
    crypto: Arc<dyn PriceSource>,
}

impl RoutingSource {
    pub fn new(equities: Arc<dyn PriceSource>, crypto: Arc<dyn PriceSource>) -> Self {
        Self { equities, crypto }
    }

    fn route(&self, symbol: &str) -> &Arc<dyn PriceSource> {
        if is_crypto_pair(symbol) {
            &self.crypto
        } else {
            &self.equities
        }
    }
}

#[async_trait]
impl PriceSource for RoutingSource {
    async fn fetch(&self, symbol: &str) -> Result<PriceSnapshot, FetchError> {
        self.route(symbol).fetch(symbol).await
    }

    /// Both sub-batches run concurrently. Fails only when every provider
    /// that had work failed.
    async fn batch_fetch(
        &self,
        symbols: &BTreeSet<String>,
    ) -> Result<HashMap<String, PriceSnapshot>, FetchError> {
        let (crypto, equities): (BTreeSet<String>, BTreeSet<String>) =
            symbols.iter().cloned().partition(|s| is_crypto_pair(s));

        let (equity_result, crypto_result) = tokio::join!(
            self.equities.batch_fetch(&equities),
            self.crypto.batch_fetch(&crypto)
        );

        let mut prices = HashMap::with_capacity(symbols.len());
        let mut last_err = None;
        for (provider, result) in [
            (self.equities.name(), equity_result),
            (self.crypto.name(), crypto_result),
        ] {
            match result {
                Ok(part) => prices.extend(part),
                Err(e) => {
                    tracing::warn!("{} batch failed: {}", provider, e);
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
        self.equities
            .concurrency_limit()
            .max(self.crypto.concurrency_limit())
    }

    fn name(&self) -> &str {
        "router"
    }
}
