//! Core traits and types for APDU (Application Protocol Data Unit) exchanges
//!
//! This crate provides the foundational types for talking to NFC tags that speak
//! ISO/IEC 7816-4 command/response APDUs.
//!
//! ## Overview
//!
//! - Creating and parsing APDU commands and responses
//! - Interpreting ISO and native (`91 XX`) status words
//! - An async [`CardTransport`] trait for the host's byte-transceive primitive
//! - A [`CardExecutor`] that keeps exactly one APDU in flight, bounds every
//!   exchange with a timeout and aborts on cancellation
#![cfg_attr(not(test), warn(unused_crate_dependencies))]
#![forbid(unsafe_code)]
#![warn(missing_docs, rustdoc::missing_crate_level_docs)]

// Re-export bytes for convenience
pub use bytes::{Bytes, BytesMut};

// Main modules
pub mod command;
pub mod executor;
pub mod response;
pub mod transport;

// Core error types
mod error;
pub use error::{Error, Result};

// Re-exports for common types
pub use command::{ApduCommand, Command};
pub use executor::{CancelHandle, CancelToken, CardExecutor};
pub use response::Response;
pub use response::status::StatusWord;
pub use transport::{CardTransport, TransportError};

/// Prelude module containing commonly used traits and types
pub mod prelude {
    pub use crate::{
        Bytes, BytesMut, Command, Error, Response, Result,
        command::{ApduCommand, CommandError},
        executor::{CancelHandle, CancelToken, CardExecutor},
        response::error::{ResponseError, StatusError},
        response::status::{StatusWord, common as status},
        transport::{CardTransport, TransportError},
    };
}
