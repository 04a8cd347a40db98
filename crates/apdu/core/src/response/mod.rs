//! APDU response definitions
//!
//! This module provides types for working with APDU responses
//! according to ISO/IEC 7816-4.

pub mod error;
pub mod status;

use bytes::{BufMut, Bytes, BytesMut};
use tracing::trace;

use error::{ResponseError, StatusError};
use status::StatusWord;

/// Basic APDU response structure
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response {
    /// Response payload data, empty when the tag only returned a status word
    payload: Bytes,
    /// Status word
    status: StatusWord,
}

impl Response {
    /// Create a new response with payload and status
    pub fn new(payload: impl Into<Bytes>, status: impl Into<StatusWord>) -> Self {
        Self {
            payload: payload.into(),
            status: status.into(),
        }
    }

    /// Create a success response
    pub fn success(payload: impl Into<Bytes>) -> Self {
        Self::new(payload, status::common::SUCCESS)
    }

    /// Create an error response from a status word
    pub fn error(status: impl Into<StatusWord>) -> Self {
        Self::new(Bytes::new(), status)
    }

    /// Parse response from raw bytes (including status word)
    pub fn from_bytes(data: &[u8]) -> Result<Self, ResponseError> {
        let [payload @ .., sw1, sw2] = data else {
            return Err(ResponseError::Incomplete(data.len()));
        };
        let status = StatusWord::new(*sw1, *sw2);

        trace!(
            sw1 = format_args!("{:#04x}", status.sw1),
            sw2 = format_args!("{:#04x}", status.sw2),
            payload_len = payload.len(),
            "Parsed APDU response"
        );

        Ok(Self {
            payload: Bytes::copy_from_slice(payload),
            status,
        })
    }

    /// Get the response payload data
    pub const fn payload(&self) -> &Bytes {
        &self.payload
    }

    /// Get the status word
    pub const fn status(&self) -> StatusWord {
        self.status
    }

    /// Check if the response indicates success
    pub const fn is_success(&self) -> bool {
        self.status.is_success()
    }

    /// Consume the response, returning the payload on success
    pub fn into_result(self) -> Result<Bytes, StatusError> {
        if self.is_success() {
            Ok(self.payload)
        } else {
            Err(StatusError::from(self.status))
        }
    }

    /// Split into payload and status
    pub fn into_parts(self) -> (Bytes, StatusWord) {
        (self.payload, self.status)
    }
}

impl TryFrom<&[u8]> for Response {
    type Error = ResponseError;

    fn try_from(data: &[u8]) -> Result<Self, ResponseError> {
        Self::from_bytes(data)
    }
}

impl From<Response> for Bytes {
    fn from(response: Response) -> Self {
        let mut buf = BytesMut::with_capacity(response.payload.len() + 2);
        buf.put_slice(&response.payload);
        buf.put_u8(response.status.sw1);
        buf.put_u8(response.status.sw2);
        buf.freeze()
    }
}
