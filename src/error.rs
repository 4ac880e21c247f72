//! Error types for the notification service.

use thiserror::Error;

/// Environment/configuration loading failures. Fatal at startup.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("missing required environment variable {0}")]
    MissingValue(String),

    #[error("invalid value for {key}: {message}")]
    InvalidValue { key: String, message: String },
}

#[derive(Debug, Error)]
pub enum DatabaseError {
    #[error("connection pool error: {0}")]
    Pool(String),

    #[error("query failed: {0}")]
    Query(#[from] tokio_postgres::Error),

    #[error("row conversion failed: {0}")]
    Serialization(String),
}

/// Outbound mail failures. Converted into `SendOutcome` at the `Notifier`
/// boundary; callers never see these directly.
#[derive(Debug, Error)]
pub enum EmailError {
    #[error("email provider is not configured")]
    NotConfigured,

    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("provider rejected message ({status}): {body}")]
    Rejected { status: u16, body: String },
}

/// Inbound webhook processing failures, mapped to HTTP statuses by the
/// server layer.
#[derive(Debug, Error)]
pub enum InboundError {
    #[error("Invalid reply context")]
    InvalidReplyContext,

    #[error("matter {0} not found")]
    MatterNotFound(i64),

    #[error(transparent)]
    Database(#[from] DatabaseError),
}
