//! NTAG 424 DNA command set
//!
//! Builders return a [`NativeCommand`]: instruction, header and data before
//! secure messaging. [`crate::secure_messaging::SecureSession::wrap`] turns
//! one into an APDU for the authenticated state, [`NativeCommand::to_plain`]
//! for the unauthenticated one.

use std::fmt;

use ntagkit_apdu_core::command::CommandError;
use ntagkit_apdu_core::{Bytes, Command};
use zeroize::Zeroizing;

use crate::constants::CLA_NATIVE;
use crate::types::CommMode;

mod authenticate;
pub use authenticate::*;
mod change_file_settings;
pub use change_file_settings::*;
mod change_key;
pub use change_key::*;
mod get_file_settings;
pub use get_file_settings::*;
mod get_version;
pub use get_version::*;
mod select;
pub use select::*;
mod write_data;
pub use write_data::*;

/// A native command before secure messaging is applied
///
/// The data field may carry key material and is wiped on drop.
#[derive(Clone)]
pub struct NativeCommand {
    ins: u8,
    mode: CommMode,
    header: Vec<u8>,
    data: Zeroizing<Vec<u8>>,
}

impl NativeCommand {
    /// Create a command without header or data
    pub fn new(ins: u8, mode: CommMode) -> Self {
        Self {
            ins,
            mode,
            header: Vec::new(),
            data: Zeroizing::new(Vec::new()),
        }
    }

    /// Set the command header (sent in the clear, covered by the MAC)
    pub fn with_header(mut self, header: impl Into<Vec<u8>>) -> Self {
        self.header = header.into();
        self
    }

    /// Set the command data (encrypted in full mode)
    pub fn with_data(mut self, data: impl Into<Vec<u8>>) -> Self {
        self.data = Zeroizing::new(data.into());
        self
    }

    /// Instruction byte
    pub const fn ins(&self) -> u8 {
        self.ins
    }

    /// Communication mode the command has to be sent with
    pub const fn mode(&self) -> CommMode {
        self.mode
    }

    /// Command header
    pub fn header(&self) -> &[u8] {
        &self.header
    }

    /// Command data
    pub fn data(&self) -> &[u8] {
        &self.data
    }

    /// ISO-wrapped APDU carrying `header || data || trailer`
    pub(crate) fn to_apdu(&self, body: &[u8], trailer: &[u8]) -> Result<Command, CommandError> {
        let mut field = Vec::with_capacity(self.header.len() + body.len() + trailer.len());
        field.extend_from_slice(&self.header);
        field.extend_from_slice(body);
        field.extend_from_slice(trailer);
        Ok(Command::new(CLA_NATIVE, self.ins, 0x00, 0x00)
            .with_data(Bytes::from(field))?
            .with_le(0x00))
    }

    /// APDU for the unauthenticated state, without any protection
    pub fn to_plain(&self) -> Result<Command, CommandError> {
        self.to_apdu(&self.data, &[])
    }
}

impl fmt::Debug for NativeCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NativeCommand")
            .field("ins", &format_args!("{:02X}", self.ins))
            .field("mode", &self.mode)
            .field("header", &hex::encode_upper(&self.header))
            .field("data_len", &self.data.len())
            .finish()
    }
}
