//! APDU command definitions and traits
//!
//! This module provides types and traits for working with APDU commands
//! according to ISO/IEC 7816-4. Only short-length APDUs are supported, which
//! covers every frame an NTAG424 DNA accepts.

use bytes::{BufMut, Bytes, BytesMut};

/// Largest data field a short APDU can carry
pub const MAX_SHORT_DATA: usize = 255;

/// Error for APDU command processing
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CommandError {
    /// Invalid command length
    #[error("Invalid command length: {0}")]
    InvalidLength(usize),

    /// Data too long
    #[error("Data too long: {0} bytes (max {1})")]
    DataTooLong(usize, usize),
}

/// Core trait for APDU commands
pub trait ApduCommand {
    /// Command class (CLA)
    fn class(&self) -> u8;

    /// Instruction code (INS)
    fn instruction(&self) -> u8;

    /// First parameter (P1)
    fn p1(&self) -> u8;

    /// Second parameter (P2)
    fn p2(&self) -> u8;

    /// Command payload data (optional)
    fn data(&self) -> Option<&[u8]>;

    /// Expected response length (optional)
    fn expected_length(&self) -> Option<u8>;

    /// Convert to raw APDU bytes
    fn to_bytes(&self) -> Bytes {
        let mut buffer = BytesMut::with_capacity(self.command_length());

        // Header: CLA, INS, P1, P2
        buffer.put_u8(self.class());
        buffer.put_u8(self.instruction());
        buffer.put_u8(self.p1());
        buffer.put_u8(self.p2());

        if let Some(data) = self.data() {
            buffer.put_u8(data.len() as u8);
            buffer.put_slice(data);
        }

        if let Some(le) = self.expected_length() {
            buffer.put_u8(le);
        }

        buffer.freeze()
    }

    /// Calculate length of serialized command
    fn command_length(&self) -> usize {
        4 + self.data().map_or(0, |data| 1 + data.len())
            + usize::from(self.expected_length().is_some())
    }

    /// Convert to a generic Command
    fn to_command(&self) -> Command {
        Command {
            cla: self.class(),
            ins: self.instruction(),
            p1: self.p1(),
            p2: self.p2(),
            data: self.data().map(Bytes::copy_from_slice),
            le: self.expected_length(),
        }
    }
}

/// Generic APDU command structure
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Command {
    /// Command class byte
    pub cla: u8,
    /// Instruction byte
    pub ins: u8,
    /// Parameter 1
    pub p1: u8,
    /// Parameter 2
    pub p2: u8,
    /// Command data (optional)
    pub data: Option<Bytes>,
    /// Expected length (optional)
    pub le: Option<u8>,
}

impl Command {
    /// Create a new command with just the header bytes
    pub const fn new(cla: u8, ins: u8, p1: u8, p2: u8) -> Self {
        Self {
            cla,
            ins,
            p1,
            p2,
            data: None,
            le: None,
        }
    }

    /// Create a new command with data payload
    ///
    /// Fails when the payload does not fit a short APDU.
    pub fn new_with_data<T: Into<Bytes>>(
        cla: u8,
        ins: u8,
        p1: u8,
        p2: u8,
        data: T,
    ) -> Result<Self, CommandError> {
        Self::new(cla, ins, p1, p2).with_data(data)
    }

    /// Set the data field
    ///
    /// An empty payload leaves the Lc field out entirely.
    pub fn with_data<T: Into<Bytes>>(mut self, data: T) -> Result<Self, CommandError> {
        let data = data.into();
        if data.len() > MAX_SHORT_DATA {
            return Err(CommandError::DataTooLong(data.len(), MAX_SHORT_DATA));
        }
        self.data = (!data.is_empty()).then_some(data);
        Ok(self)
    }

    /// Set the expected length field
    pub const fn with_le(mut self, le: u8) -> Self {
        self.le = Some(le);
        self
    }

    /// Parse a command from raw bytes
    pub fn from_bytes(data: &[u8]) -> Result<Self, CommandError> {
        let [cla, ins, p1, p2, body @ ..] = data else {
            return Err(CommandError::InvalidLength(data.len()));
        };

        let mut command = Self::new(*cla, *ins, *p1, *p2);

        match body {
            [] => {}
            [le] => command.le = Some(*le),
            [lc, rest @ ..] => {
                let lc = *lc as usize;
                if rest.len() < lc || rest.len() > lc + 1 {
                    return Err(CommandError::InvalidLength(data.len()));
                }
                if lc > 0 {
                    command.data = Some(Bytes::copy_from_slice(&rest[..lc]));
                }
                if rest.len() == lc + 1 {
                    command.le = Some(rest[lc]);
                }
            }
        }

        Ok(command)
    }
}

impl ApduCommand for Command {
    fn class(&self) -> u8 {
        self.cla
    }

    fn instruction(&self) -> u8 {
        self.ins
    }

    fn p1(&self) -> u8 {
        self.p1
    }

    fn p2(&self) -> u8 {
        self.p2
    }

    fn data(&self) -> Option<&[u8]> {
        self.data.as_deref()
    }

    fn expected_length(&self) -> Option<u8> {
        self.le
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hex_literal::hex;

    #[test]
    fn test_command_serialization() {
        let cmd = Command::new_with_data(0x00, 0xA4, 0x04, 0x0C, hex!("D2760000850101").to_vec())
            .unwrap()
            .with_le(0x00);
        assert_eq!(
            cmd.to_bytes().as_ref(),
            &hex!("00A4040C07D276000085010100")
        );
    }

    #[test]
    fn test_command_length() {
        let cmd1 = Command::new(0x90, 0x60, 0x00, 0x00);
        assert_eq!(cmd1.command_length(), 4);

        let cmd2 = cmd1.clone().with_le(0x00);
        assert_eq!(cmd2.command_length(), 5);

        let cmd3 = Command::new_with_data(0x90, 0x71, 0x00, 0x00, vec![0x00, 0x00]).unwrap();
        assert_eq!(cmd3.command_length(), 7);

        let cmd4 = cmd3.with_le(0x00);
        assert_eq!(cmd4.command_length(), 8);
        assert_eq!(cmd4.to_bytes().len(), 8);
    }

    #[test]
    fn test_empty_data_omits_lc() {
        let cmd = Command::new_with_data(0x90, 0xAF, 0x00, 0x00, Vec::new())
            .unwrap()
            .with_le(0x00);
        assert!(cmd.data.is_none());
        assert_eq!(cmd.to_bytes().as_ref(), &[0x90, 0xAF, 0x00, 0x00, 0x00]);
    }

    #[test]
    fn test_data_too_long() {
        let err = Command::new_with_data(0x90, 0x8D, 0x00, 0x00, vec![0u8; 256]).unwrap_err();
        assert_eq!(err, CommandError::DataTooLong(256, MAX_SHORT_DATA));
    }

    #[test]
    fn test_command_from_bytes() {
        let cmd = Command::from_bytes(&[0x00, 0xA4, 0x04, 0x00]).unwrap();
        assert_eq!((cmd.cla, cmd.ins, cmd.p1, cmd.p2), (0x00, 0xA4, 0x04, 0x00));
        assert!(cmd.data.is_none());
        assert!(cmd.le.is_none());

        let cmd = Command::from_bytes(&[0x00, 0xA4, 0x04, 0x00, 0x03, 0x01, 0x02, 0x03]).unwrap();
        assert_eq!(cmd.data.as_deref(), Some(&[0x01, 0x02, 0x03][..]));
        assert!(cmd.le.is_none());

        let cmd =
            Command::from_bytes(&[0x90, 0x5F, 0x00, 0x00, 0x03, 0x01, 0x02, 0x03, 0x00]).unwrap();
        assert_eq!(cmd.data.as_deref(), Some(&[0x01, 0x02, 0x03][..]));
        assert_eq!(cmd.le, Some(0x00));

        let cmd = Command::from_bytes(&[0x90, 0x60, 0x00, 0x00, 0x00]).unwrap();
        assert!(cmd.data.is_none());
        assert_eq!(cmd.le, Some(0));

        assert!(Command::from_bytes(&[0x90, 0x60]).is_err());
        assert!(Command::from_bytes(&[0x90, 0x5F, 0x00, 0x00, 0x05, 0x01]).is_err());
    }
}
