use futures::stream::{FuturesUnordered, StreamExt};
use market_monitor::FetchError;
use reqwest::{Client, RequestBuilder, Response};
use serde::de::DeserializeOwned;
use std::future::Future;
use std::time::Duration;

use crate::rate_limiter::RateLimiter;

const MAX_ATTEMPTS: u32 = 3;

pub(crate) fn build_client(timeout: Duration) -> Client {
    Client::builder()
        .timeout(timeout)
        .build()
        .unwrap_or_else(|_| Client::new())
}

/// Run `request` once per chunk of `symbols`, at most `limit` in flight.
/// Each result is paired with the size of its chunk.
pub(crate) async fn fetch_chunked<'a, T, F, Fut>(
    symbols: &'a [String],
    chunk_size: usize,
    limit: usize,
    request: F,
) -> Vec<(usize, Result<T, FetchError>)>
where
    F: Fn(&'a [String]) -> Fut,
    Fut: Future<Output = Result<T, FetchError>>,
{
    let mut chunks = symbols.chunks(chunk_size.max(1));
    let mut in_flight = FuturesUnordered::new();
    for chunk in chunks.by_ref().take(limit.max(1)) {
        in_flight.push(with_len(chunk.len(), request(chunk)));
    }

    let mut results = Vec::new();
    while let Some(result) = in_flight.next().await {
        results.push(result);
        if let Some(chunk) = chunks.next() {
            in_flight.push(with_len(chunk.len(), request(chunk)));
        }
    }
    results
}

async fn with_len<T, Fut>(len: usize, fut: Fut) -> (usize, T)
where
    Fut: Future<Output = T>,
{
    (len, fut.await)
}

/// Send a request with rate limiting and automatic 429 retry.
pub(crate) async fn send_request(
    client: &Client,
    limiter: &RateLimiter,
    builder: RequestBuilder,
    provider: &str,
    retry_wait: Duration,
) -> Result<Response, FetchError> {
    let request = builder
        .build()
        .map_err(|e| FetchError::Http(e.to_string()))?;

    for attempt in 0..MAX_ATTEMPTS {
        limiter.acquire().await;
        let req_clone = request
            .try_clone()
            .ok_or_else(|| FetchError::Http("Cannot clone request".to_string()))?;
        let response = client.execute(req_clone).await.map_err(map_reqwest_error)?;

        if response.status().as_u16() != 429 {
            return Ok(response);
        }

        tracing::warn!(
            "{} 429 rate limited, waiting {}s before retry {}/{}",
            provider,
            retry_wait.as_secs(),
            attempt + 1,
            MAX_ATTEMPTS
        );
        tokio::time::sleep(retry_wait).await;
    }

    Err(FetchError::Unavailable(format!(
        "Rate limited by {} after {} retries",
        provider, MAX_ATTEMPTS
    )))
}

/// Decode a successful JSON body, mapping HTTP errors onto `FetchError`.
pub(crate) async fn read_json<T: DeserializeOwned>(response: Response) -> Result<T, FetchError> {
    let status = response.status();
    if !status.is_success() {
        return Err(FetchError::Status {
            status: status.as_u16(),
            body: response.text().await.unwrap_or_default(),
        });
    }

    response
        .json()
        .await
        .map_err(|e| FetchError::InvalidResponse(e.to_string()))
}

pub(crate) fn map_reqwest_error(e: reqwest::Error) -> FetchError {
    if e.is_timeout() {
        FetchError::Timeout
    } else {
        FetchError::Http(e.to_string())
    }
}

/// Parse a positive, finite price.
pub(crate) fn positive(value: f64) -> Option<f64> {
    (value.is_finite() && value > 0.0).then_some(value)
}

/// Parse a numeric string field (KuCoin reports numbers as strings).
pub(crate) fn parse_decimal(raw: Option<&str>) -> Option<f64> {
    raw.and_then(|s| s.trim().parse::<f64>().ok())
        .filter(|v| v.is_finite())
}
