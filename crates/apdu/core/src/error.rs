//! Core error type for APDU exchanges
//!
//! Every failure the executor can surface is collected here so callers can
//! propagate a single type with `?`.

use std::time::Duration;

use crate::command::CommandError;
use crate::response::error::ResponseError;
use crate::transport::TransportError;

/// Result type for APDU exchanges
pub type Result<T> = std::result::Result<T, Error>;

/// Core error type that encompasses all possible errors in the crate
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The transport failed to deliver the exchange
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// No response arrived within the per-exchange window
    #[error("No response within {0:?}")]
    Timeout(Duration),

    /// The exchange was aborted by a cancellation request
    #[error("Operation cancelled")]
    Cancelled,

    /// The response bytes could not be parsed
    #[error(transparent)]
    Response(#[from] ResponseError),

    /// The command could not be built or parsed
    #[error(transparent)]
    Command(#[from] CommandError),
}

impl Error {
    /// Whether the error stems from the channel rather than the tag's answer
    pub const fn is_channel_failure(&self) -> bool {
        matches!(self, Self::Transport(_) | Self::Timeout(_) | Self::Cancelled)
    }
}
