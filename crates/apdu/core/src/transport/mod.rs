//! Transport traits for APDU communication with tags
//!
//! A transport is the host platform's byte-transceive primitive. It has no
//! knowledge of command structure, sessions or timeouts; those live in the
//! executor and above.

pub mod error;

use std::fmt;

use async_trait::async_trait;
use bytes::Bytes;
pub use error::TransportError;
use tracing::{debug, trace};

/// Trait for basic card transports
///
/// Every call suspends until the tag answers. Implementations must be
/// cancel-safe: the executor drops the returned future when an exchange
/// times out or is cancelled.
#[async_trait]
pub trait CardTransport: Send + fmt::Debug {
    /// Error type returned by the transport
    type Error: Into<crate::Error> + fmt::Debug + Send;

    /// Wait for a tag and open the exchange channel
    async fn connect(&mut self) -> Result<(), Self::Error>;

    /// Send raw APDU bytes to the tag and return response bytes
    ///
    /// Only lengths are logged here; payload bytes may be protected by a
    /// secure session and the executor decides whether to trace them.
    async fn transmit_raw(&mut self, command: &[u8]) -> Result<Bytes, Self::Error> {
        trace!(len = command.len(), "Transmitting raw command");
        let result = self.do_transmit_raw(command).await;
        match &result {
            Ok(response) => {
                trace!(len = response.len(), "Received raw response");
            }
            Err(e) => {
                debug!(error = ?e, "Transport error during transmission");
            }
        }
        result
    }

    /// Internal implementation of transmit_raw
    /// This is the method that concrete implementations should override
    async fn do_transmit_raw(&mut self, command: &[u8]) -> Result<Bytes, Self::Error>;

    /// Check if the transport is connected to a physical tag
    fn is_connected(&self) -> bool;

    /// Reset the transport connection
    async fn reset(&mut self) -> Result<(), Self::Error>;
}

#[cfg(test)]
pub(crate) use mock::MockTransport;
