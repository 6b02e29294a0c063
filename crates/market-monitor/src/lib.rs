//! Market monitoring engine: price alerts and live trackers driven by a
//! single scheduled loop over a batched, failure-tolerant price source.

pub mod backoff;
pub mod config;
pub mod error;
pub mod evaluator;
pub mod metrics;
pub mod registry;
pub mod scheduler;
pub mod service;
pub mod stats;
pub mod store;
pub mod traits;
pub mod types;
pub mod watchlist;

#[cfg(test)]
pub(crate) mod testing;

pub use config::MonitorConfig;
pub use error::{DispatchError, FetchError, MonitorError, MonitorResult, PersistenceError};
pub use evaluator::{evaluate, Direction, Trigger};
pub use registry::{DueSymbols, Registry};
pub use scheduler::{control_channel, ControlAction, ControlEvent, Scheduler, TickReport};
pub use service::MonitorService;
pub use stats::{StatsSummary, TrackerDetails, TrackerStats};
pub use store::JsonAlertStore;
pub use traits::{AlertStore, Dispatcher, PriceSource};
pub use types::{Alert, AlertKind, ChannelId, MessageRef, PricePoint, PriceSnapshot, Tracker};
pub use watchlist::{parse_watchlist, Breach, Side, WatchEntry, WatchState};
