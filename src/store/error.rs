//! Store error types.

use thiserror::Error;

/// Errors that can occur talking to the remote store.
///
/// This is the only failure kind the sync layer handles explicitly; it is
/// surfaced to consumers as a human-readable message in the unit's error
/// slot, never thrown through the public mutator operations.
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Store not configured. Add server_url and api_key to config.")]
    NotConfigured,

    #[error("Connection error: {0}")]
    Connection(String),

    #[error("HTTP error: {0}")]
    Http(String),

    #[error("WebSocket error: {0}")]
    WebSocket(String),

    #[error("Subscribe failed: {0}")]
    Subscribe(String),

    #[error("Subscribe timed out")]
    SubscribeTimeout,

    #[error("Failed to decode row: {0}")]
    Decode(String),
}
