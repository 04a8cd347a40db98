//! Status word definitions for APDU responses
//!
//! NTAG424 DNA answers ISO commands with the usual `90 00` family and wrapped
//! native commands with `91 XX`, where `XX` is the native status code.

use std::fmt;

use tracing::Level;

/// SW1 used by ISO-wrapped native commands
pub const NATIVE_SW1: u8 = 0x91;

/// Status Word (SW1-SW2) from an APDU response
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct StatusWord {
    /// First status byte (SW1)
    pub sw1: u8,
    /// Second status byte (SW2)
    pub sw2: u8,
}

impl StatusWord {
    /// Create a new status word
    pub const fn new(sw1: u8, sw2: u8) -> Self {
        Self { sw1, sw2 }
    }

    /// Create from a u16 value (SW1 | SW2)
    pub const fn from_u16(status: u16) -> Self {
        Self {
            sw1: (status >> 8) as u8,
            sw2: status as u8,
        }
    }

    /// Convert to a u16 value (SW1 | SW2)
    pub const fn to_u16(&self) -> u16 {
        ((self.sw1 as u16) << 8) | (self.sw2 as u16)
    }

    /// Check if this status word indicates success (90 00 or 91 00)
    pub const fn is_success(&self) -> bool {
        matches!((self.sw1, self.sw2), (0x90, 0x00) | (NATIVE_SW1, 0x00))
    }

    /// Check if this status word is a wrapped native status (91 XX)
    pub const fn is_native(&self) -> bool {
        self.sw1 == NATIVE_SW1
    }

    /// Check if the tag expects or delivers an additional frame (91 AF)
    pub const fn is_additional_frame(&self) -> bool {
        self.sw1 == NATIVE_SW1 && self.sw2 == 0xAF
    }

    /// Check if the tag rejected an authentication attempt (91 AE)
    pub const fn is_authentication_error(&self) -> bool {
        self.sw1 == NATIVE_SW1 && self.sw2 == 0xAE
    }

    /// Check if this status word indicates a warning (62 XX)
    pub const fn is_warning(&self) -> bool {
        self.sw1 == 0x62
    }

    /// Check if this status word indicates a file not found (6A 82 or 91 F0)
    pub const fn is_file_not_found(&self) -> bool {
        matches!((self.sw1, self.sw2), (0x6A, 0x82) | (NATIVE_SW1, 0xF0))
    }

    /// Get the appropriate tracing level for this status word
    pub const fn tracing_level(&self) -> Level {
        if self.is_success() || self.is_additional_frame() {
            Level::DEBUG
        } else if self.sw1 == 0x62 || self.sw1 == 0x63 {
            // Warnings
            Level::INFO
        } else {
            // Errors
            Level::WARN
        }
    }

    /// Get a description of this status word
    pub const fn description(&self) -> &'static str {
        match (self.sw1, self.sw2) {
            (0x90, 0x00) => "Success",
            (0x61, _) => "More data available",
            (0x62, 0x82) => "End of file reached before reading Le bytes",
            (0x67, 0x00) => "Wrong length",
            (0x69, 0x82) => "Security status not satisfied",
            (0x69, 0x85) => "Conditions of use not satisfied",
            (0x6A, 0x80) => "Incorrect parameters in the data field",
            (0x6A, 0x82) => "File not found",
            (0x6A, 0x86) => "Incorrect parameters P1-P2",
            (0x6C, _) => "Wrong Le field",
            (0x6D, 0x00) => "Instruction code not supported or invalid",
            (0x6E, 0x00) => "Class not supported",
            (NATIVE_SW1, 0x00) => "Operation ok",
            (NATIVE_SW1, 0x0C) => "No changes",
            (NATIVE_SW1, 0x0E) => "Out of EEPROM",
            (NATIVE_SW1, 0x1C) => "Illegal command code",
            (NATIVE_SW1, 0x1E) => "Integrity error",
            (NATIVE_SW1, 0x40) => "No such key",
            (NATIVE_SW1, 0x7E) => "Length error",
            (NATIVE_SW1, 0x9D) => "Permission denied",
            (NATIVE_SW1, 0x9E) => "Parameter error",
            (NATIVE_SW1, 0xAD) => "Authentication delay",
            (NATIVE_SW1, 0xAE) => "Authentication error",
            (NATIVE_SW1, 0xAF) => "Additional frame",
            (NATIVE_SW1, 0xBE) => "Boundary error",
            (NATIVE_SW1, 0xCA) => "Command aborted",
            (NATIVE_SW1, 0xEE) => "Memory error",
            (NATIVE_SW1, 0xF0) => "File not found",
            _ => "Unknown status word",
        }
    }
}

impl From<(u8, u8)> for StatusWord {
    fn from(tuple: (u8, u8)) -> Self {
        Self::new(tuple.0, tuple.1)
    }
}

impl From<u16> for StatusWord {
    fn from(status: u16) -> Self {
        Self::from_u16(status)
    }
}

impl From<StatusWord> for u16 {
    fn from(status: StatusWord) -> Self {
        status.to_u16()
    }
}

impl fmt::Display for StatusWord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:02X} {:02X}", self.sw1, self.sw2)
    }
}

/// Common status words
pub mod common {
    use super::{NATIVE_SW1, StatusWord};

    /// Success (90 00)
    pub const SUCCESS: StatusWord = StatusWord::new(0x90, 0x00);

    /// Wrong length (67 00)
    pub const WRONG_LENGTH: StatusWord = StatusWord::new(0x67, 0x00);

    /// Security condition not satisfied (69 82)
    pub const SECURITY_CONDITION_NOT_SATISFIED: StatusWord = StatusWord::new(0x69, 0x82);

    /// File not found (6A 82)
    pub const FILE_NOT_FOUND: StatusWord = StatusWord::new(0x6A, 0x82);

    /// Incorrect parameters P1-P2 (6A 86)
    pub const INCORRECT_P1P2: StatusWord = StatusWord::new(0x6A, 0x86);

    /// Invalid instruction (6D 00)
    pub const INVALID_INSTRUCTION: StatusWord = StatusWord::new(0x6D, 0x00);

    /// Native operation ok (91 00)
    pub const OPERATION_OK: StatusWord = StatusWord::new(NATIVE_SW1, 0x00);

    /// Native additional frame (91 AF)
    pub const ADDITIONAL_FRAME: StatusWord = StatusWord::new(NATIVE_SW1, 0xAF);

    /// Native authentication error (91 AE)
    pub const AUTHENTICATION_ERROR: StatusWord = StatusWord::new(NATIVE_SW1, 0xAE);

    /// Native length error (91 7E)
    pub const LENGTH_ERROR: StatusWord = StatusWord::new(NATIVE_SW1, 0x7E);

    /// Native permission denied (91 9D)
    pub const PERMISSION_DENIED: StatusWord = StatusWord::new(NATIVE_SW1, 0x9D);

    /// Native parameter error (91 9E)
    pub const PARAMETER_ERROR: StatusWord = StatusWord::new(NATIVE_SW1, 0x9E);

    /// Native no such key (91 40)
    pub const NO_SUCH_KEY: StatusWord = StatusWord::new(NATIVE_SW1, 0x40);

    /// Native boundary error (91 BE)
    pub const BOUNDARY_ERROR: StatusWord = StatusWord::new(NATIVE_SW1, 0xBE);

    /// Native integrity error (91 1E)
    pub const INTEGRITY_ERROR: StatusWord = StatusWord::new(NATIVE_SW1, 0x1E);

    /// Native memory error (91 EE)
    pub const MEMORY_ERROR: StatusWord = StatusWord::new(NATIVE_SW1, 0xEE);

    /// Native file not found (91 F0)
    pub const NATIVE_FILE_NOT_FOUND: StatusWord = StatusWord::new(NATIVE_SW1, 0xF0);

    /// Native command aborted (91 CA)
    pub const COMMAND_ABORTED: StatusWord = StatusWord::new(NATIVE_SW1, 0xCA);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_word_from_to_u16() {
        let sw = StatusWord::from_u16(0x91AF);
        assert_eq!(sw.sw1, 0x91);
        assert_eq!(sw.sw2, 0xAF);
        assert_eq!(sw.to_u16(), 0x91AF);
    }

    #[test]
    fn test_status_word_is_methods() {
        assert!(StatusWord::new(0x90, 0x00).is_success());
        assert!(StatusWord::new(0x91, 0x00).is_success());
        assert!(!StatusWord::new(0x91, 0xAF).is_success());
        assert!(StatusWord::new(0x91, 0xAF).is_additional_frame());
        assert!(StatusWord::new(0x91, 0xAE).is_authentication_error());
        assert!(StatusWord::new(0x91, 0x9D).is_native());
        assert!(StatusWord::new(0x6A, 0x82).is_file_not_found());
        assert!(StatusWord::new(0x91, 0xF0).is_file_not_found());
        assert!(StatusWord::new(0x62, 0x82).is_warning());
    }

    #[test]
    fn test_status_word_tracing_level() {
        assert_eq!(common::OPERATION_OK.tracing_level(), Level::DEBUG);
        assert_eq!(common::ADDITIONAL_FRAME.tracing_level(), Level::DEBUG);
        assert_eq!(common::PERMISSION_DENIED.tracing_level(), Level::WARN);
    }

    #[test]
    fn test_status_word_description() {
        assert_eq!(StatusWord::new(0x90, 0x00).description(), "Success");
        assert_eq!(common::AUTHENTICATION_ERROR.description(), "Authentication error");
        assert_eq!(common::BOUNDARY_ERROR.description(), "Boundary error");
        assert_eq!(StatusWord::new(0x91, 0x55).description(), "Unknown status word");
        assert_eq!(common::PERMISSION_DENIED.to_string(), "91 9D");
    }
}
