pub mod client;
pub mod config;
pub mod driver;
pub mod events;
pub mod gateway;

pub use client::Client;
pub use client::RetryPolicy;
pub use config::{Config, ConfigError, RetryConfig, ValidatedConfig};
pub use events::Stream;
pub use gateway::Authority;
use thiserror::Error;

/// Error type for client operations.
#[derive(Error, Debug)]
pub enum Error {
    #[error("reqwest error: {0}")]
    Reqwest(#[from] reqwest::Error),
    #[error("tungstenite error: {0}")]
    Tungstenite(#[from] tokio_tungstenite::tungstenite::Error),
    #[error("failed: {0}")]
    Failed(reqwest::StatusCode),
    #[error("invalid data: {0}")]
    InvalidData(#[from] commonware_codec::Error),
    #[error("connection closed")]
    ConnectionClosed,
    #[error("URL parse error: {0}")]
    Url(#[from] url::ParseError),
    #[error("dial timeout")]
    DialTimeout,
    #[error("invalid URL scheme: {0} (expected http or https)")]
    InvalidScheme(String),
    #[error("driver error: {0}")]
    Driver(#[from] driver::MailboxError),
}

/// Result type for client operations.
pub type Result<T> = std::result::Result<T, Error>;
