use std::time::Duration;

use thiserror::Error;

use crate::Symbol;

#[derive(Debug, Error)]
pub enum Error {
    #[error("Ticker {0} is not a valid symbol")]
    InvalidSymbol(String),

    #[error("Ticker {0} already present in the existing list")]
    AlreadyPresent(Symbol),

    #[error("Ticker {0} not present in the existing list")]
    NotPresent(Symbol),

    #[error("Failed to fetch history for {symbol}: {reason}")]
    Fetch { symbol: Symbol, reason: String },

    #[error("Fetching history for {symbol} timed out after {after:?}")]
    FetchTimeout { symbol: Symbol, after: Duration },

    #[error("Indicator '{indicator}' failed on {symbol}: {reason}")]
    Compute {
        indicator: String,
        symbol: Symbol,
        reason: String,
    },

    #[error("Persisted state '{key}' is unreadable: {reason}")]
    StateCorrupt { key: String, reason: String },

    #[error("Publish failed: {0}")]
    Publish(String),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("HTTP error: {0}")]
    Http(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("{0}")]
    Other(String),
}

impl Error {
    /// True for errors that are answers to a user command rather than faults.
    pub fn is_user_facing(&self) -> bool {
        matches!(
            self,
            Error::InvalidSymbol(_) | Error::AlreadyPresent(_) | Error::NotPresent(_)
        )
    }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
