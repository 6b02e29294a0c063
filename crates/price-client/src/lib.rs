//! HTTP price sources for the market monitor.

mod http;
pub mod kucoin;
pub mod polygon;
pub mod rate_limiter;
pub mod router;

pub use kucoin::KucoinSource;
pub use polygon::PolygonSource;
pub use rate_limiter::RateLimiter;
pub use router::{is_crypto_pair, RoutingSource};
