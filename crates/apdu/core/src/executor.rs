//! Executor for APDU exchanges
//!
//! [`CardExecutor`] owns the transport and is the only path to it, so a
//! `&mut` borrow per exchange keeps exactly one APDU in flight. Each exchange
//! is bounded by its own timeout and races a cancellation token.

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use tokio::sync::watch;
use tracing::{debug, instrument, trace, warn};

use crate::command::ApduCommand;
use crate::response::Response;
use crate::transport::CardTransport;
use crate::{Error, Result};

/// Default per-exchange timeout
pub const DEFAULT_APDU_TIMEOUT: Duration = Duration::from_millis(1000);

/// Requests cancellation of in-flight and future exchanges
#[derive(Debug, Clone)]
pub struct CancelHandle {
    tx: Arc<watch::Sender<bool>>,
}

impl CancelHandle {
    /// Abort the in-flight exchange and refuse new ones until reset
    pub fn cancel(&self) {
        self.tx.send_replace(true);
    }

    /// Whether cancellation has been requested
    pub fn is_cancelled(&self) -> bool {
        *self.tx.borrow()
    }

    /// Clear a previous cancellation request
    pub fn reset(&self) {
        self.tx.send_replace(false);
    }
}

/// Observes cancellation requests made through a [`CancelHandle`]
#[derive(Debug, Clone)]
pub struct CancelToken {
    rx: watch::Receiver<bool>,
}

impl CancelToken {
    /// Whether cancellation has been requested
    pub fn is_cancelled(&self) -> bool {
        *self.rx.borrow()
    }

    /// Resolve once cancellation is requested
    pub async fn cancelled(&mut self) {
        if self.rx.wait_for(|cancelled| *cancelled).await.is_err() {
            // Every handle is gone, so nobody can cancel any more.
            std::future::pending::<()>().await;
        }
    }
}

/// Create a connected cancellation pair
pub fn cancel_pair() -> (CancelHandle, CancelToken) {
    let (tx, rx) = watch::channel(false);
    (CancelHandle { tx: Arc::new(tx) }, CancelToken { rx })
}

/// Card executor: single-outstanding APDU exchange over a transport
#[derive(Debug)]
pub struct CardExecutor<T: CardTransport> {
    /// The transport used for communication
    transport: T,
    /// Per-exchange timeout
    timeout: Duration,
    cancel_handle: CancelHandle,
    cancel_token: CancelToken,
    /// Number of command APDUs handed to the transport
    exchanged: u64,
    /// Suppress payload hex in traces
    redact: bool,
}

impl<T: CardTransport> CardExecutor<T> {
    /// Create a new card executor with the given transport
    pub fn new(transport: T) -> Self {
        let (cancel_handle, cancel_token) = cancel_pair();
        Self {
            transport,
            timeout: DEFAULT_APDU_TIMEOUT,
            cancel_handle,
            cancel_token,
            exchanged: 0,
            redact: false,
        }
    }

    /// Set the per-exchange timeout
    pub const fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Get the per-exchange timeout
    pub const fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Change the per-exchange timeout
    pub const fn set_timeout(&mut self, timeout: Duration) {
        self.timeout = timeout;
    }

    /// Get a reference to the underlying transport
    pub const fn transport(&self) -> &T {
        &self.transport
    }

    /// Get a mutable reference to the underlying transport
    pub const fn transport_mut(&mut self) -> &mut T {
        &mut self.transport
    }

    /// Take ownership of the transport and return it
    pub fn into_transport(self) -> T {
        self.transport
    }

    /// Handle that aborts exchanges from another task
    pub fn cancel_handle(&self) -> CancelHandle {
        self.cancel_handle.clone()
    }

    /// Whether a cancellation request is pending
    pub fn is_cancelled(&self) -> bool {
        self.cancel_token.is_cancelled()
    }

    /// Accept exchanges again after a cancellation
    pub fn reset_cancellation(&self) {
        self.cancel_handle.reset();
    }

    /// Number of command APDUs handed to the transport so far
    pub const fn exchanged(&self) -> u64 {
        self.exchanged
    }

    /// Log only lengths instead of payload bytes
    pub const fn set_redacted(&mut self, redact: bool) {
        self.redact = redact;
    }

    /// Whether the underlying transport reports a connected tag
    pub fn is_connected(&self) -> bool {
        self.transport.is_connected()
    }

    /// Wait for a tag, aborting on cancellation
    #[instrument(level = "debug", skip(self))]
    pub async fn connect(&mut self) -> Result<()> {
        if self.is_cancelled() {
            return Err(Error::Cancelled);
        }
        let mut token = self.cancel_token.clone();
        tokio::select! {
            biased;
            _ = token.cancelled() => Err(Error::Cancelled),
            result = self.transport.connect() => result.map_err(Into::into),
        }
    }

    /// Reset the transport connection
    pub async fn reset(&mut self) -> Result<()> {
        self.transport.reset().await.map_err(Into::into)
    }

    /// Exchange one command APDU and parse the response
    #[instrument(
        level = "trace",
        skip_all,
        fields(ins = format_args!("{:#04x}", command.instruction()))
    )]
    pub async fn transmit<C: ApduCommand + ?Sized>(&mut self, command: &C) -> Result<Response> {
        let raw = self.transmit_raw(&command.to_bytes()).await?;
        let response = Response::from_bytes(&raw)?;
        let status = response.status();
        if status.tracing_level() == tracing::Level::WARN {
            warn!(%status, description = status.description(), "Tag reported error");
        } else {
            debug!(%status, "Tag response");
        }
        Ok(response)
    }

    /// Exchange raw bytes, bounded by the timeout and the cancellation token
    pub async fn transmit_raw(&mut self, command: &[u8]) -> Result<Bytes> {
        if self.is_cancelled() {
            return Err(Error::Cancelled);
        }

        if self.redact {
            trace!(len = command.len(), "Sending protected command");
        } else {
            trace!(command = %hex::encode(command), "Sending command");
        }

        self.exchanged += 1;
        let timeout = self.timeout;
        let mut token = self.cancel_token.clone();
        let exchange = tokio::time::timeout(timeout, self.transport.transmit_raw(command));

        let result = tokio::select! {
            biased;
            _ = token.cancelled() => Err(Error::Cancelled),
            result = exchange => match result {
                Ok(Ok(response)) => Ok(response),
                Ok(Err(e)) => Err(e.into()),
                Err(_) => Err(Error::Timeout(timeout)),
            },
        };

        match &result {
            Ok(response) if self.redact => {
                trace!(len = response.len(), "Received protected response");
            }
            Ok(response) => trace!(response = %hex::encode(response), "Received response"),
            Err(e) => debug!(error = %e, "Exchange failed"),
        }

        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Command;
    use crate::transport::{MockTransport, TransportError};

    fn get_version() -> Command {
        Command::new(0x90, 0x60, 0x00, 0x00).with_le(0x00)
    }

    #[tokio::test]
    async fn test_transmit_parses_response() {
        let transport = MockTransport::new(vec![Bytes::from_static(&[0x04, 0x91, 0xAF])]);
        let mut executor = CardExecutor::new(transport);

        let response = executor.transmit(&get_version()).await.unwrap();
        assert!(response.status().is_additional_frame());
        assert_eq!(response.payload().as_ref(), &[0x04]);
        assert_eq!(executor.exchanged(), 1);
        assert_eq!(
            executor.transport().commands[0].as_ref(),
            &[0x90, 0x60, 0x00, 0x00, 0x00]
        );
    }

    #[tokio::test]
    async fn test_transport_error_propagates() {
        let mut executor = CardExecutor::new(MockTransport::new(Vec::new()));
        let err = executor.transmit(&get_version()).await.unwrap_err();
        assert!(matches!(err, Error::Transport(TransportError::NoTag)));
        assert!(err.is_channel_failure());
    }

    #[tokio::test(start_paused = true)]
    async fn test_exchange_times_out() {
        let transport = MockTransport::new(vec![Bytes::from_static(&[0x91, 0x00])])
            .with_delay(Duration::from_secs(5));
        let mut executor = CardExecutor::new(transport);

        let err = executor.transmit(&get_version()).await.unwrap_err();
        assert!(matches!(err, Error::Timeout(t) if t == DEFAULT_APDU_TIMEOUT));
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_aborts_in_flight_exchange() {
        let transport = MockTransport::new(vec![Bytes::from_static(&[0x91, 0x00])])
            .with_delay(Duration::from_millis(500));
        let mut executor = CardExecutor::new(transport);
        let handle = executor.cancel_handle();

        let canceller = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(100)).await;
            handle.cancel();
        });

        let err = executor.transmit(&get_version()).await.unwrap_err();
        assert!(matches!(err, Error::Cancelled));
        canceller.await.unwrap();

        // Refused until reset
        assert!(matches!(
            executor.transmit(&get_version()).await.unwrap_err(),
            Error::Cancelled
        ));
        assert_eq!(executor.exchanged(), 1);

        executor.reset_cancellation();
        executor.transport_mut().responses.push_back(Bytes::from_static(&[0x91, 0x00]));
        executor.transport_mut().delay = None;
        assert!(executor.transmit(&get_version()).await.unwrap().is_success());
    }
}
