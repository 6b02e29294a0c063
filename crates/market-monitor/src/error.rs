use thiserror::Error;

/// Transient upstream failure while fetching a price. The scheduler skips the
/// affected subscriptions for the current tick and retries later.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum FetchError {
    #[error("HTTP request failed: {0}")]
    Http(String),

    #[error("Provider returned HTTP {status}: {body}")]
    Status { status: u16, body: String },

    #[error("Unknown symbol: {0}")]
    UnknownSymbol(String),

    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    #[error("Timeout")]
    Timeout,

    #[error("Provider unavailable: {0}")]
    Unavailable(String),
}

/// Failure reported by the display surface.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum DispatchError {
    /// The message or channel behind a display handle no longer exists.
    #[error("Display target is gone")]
    Gone,

    #[error("Dispatch failed: {0}")]
    Failed(String),
}

#[derive(Error, Debug)]
pub enum PersistenceError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Errors surfaced to the command layer.
#[derive(Error, Debug)]
pub enum MonitorError {
    #[error("Invalid input: {0}")]
    Validation(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Price fetch failed: {0}")]
    Fetch(#[from] FetchError),

    #[error("Persistence error: {0}")]
    Persistence(#[from] PersistenceError),

    #[error("Dispatch error: {0}")]
    Dispatch(#[from] DispatchError),
}

pub type MonitorResult<T> = Result<T, MonitorError>;
