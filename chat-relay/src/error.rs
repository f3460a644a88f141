//! Relay error types.

/// Errors surfaced by the relay library.
#[derive(Debug, thiserror::Error)]
pub enum RelayError {
    #[error("hub is no longer accepting events")]
    HubClosed,

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
