//! Protocol constants for NTAG 424 DNA

/// CLA byte for ISO/IEC 7816-4 commands
pub const CLA_ISO: u8 = 0x00;
/// CLA byte for ISO-wrapped native commands
pub const CLA_NATIVE: u8 = 0x90;

/// Instruction bytes
pub mod ins {
    /// ISO SELECT FILE
    pub const SELECT: u8 = 0xA4;
    /// GetVersion
    pub const GET_VERSION: u8 = 0x60;
    /// AuthenticateEV2First
    pub const AUTHENTICATE_EV2_FIRST: u8 = 0x71;
    /// Additional frame, continues a multi-frame exchange
    pub const ADDITIONAL_FRAME: u8 = 0xAF;
    /// ChangeFileSettings
    pub const CHANGE_FILE_SETTINGS: u8 = 0x5F;
    /// GetFileSettings
    pub const GET_FILE_SETTINGS: u8 = 0xF5;
    /// WriteData
    pub const WRITE_DATA: u8 = 0x8D;
    /// ChangeKey
    pub const CHANGE_KEY: u8 = 0xC4;
}

/// DF name of the NDEF application
pub const NDEF_APP_DF_NAME: [u8; 7] = [0xD2, 0x76, 0x00, 0x00, 0x85, 0x01, 0x01];
/// ISO file identifier of the NDEF application
pub const NDEF_APP_FILE_ID: [u8; 2] = [0xE1, 0x10];

/// Capability container file
pub const CC_FILE_NO: u8 = 0x01;
/// NDEF file, the only file with SDM support in practice
pub const NDEF_FILE_NO: u8 = 0x02;
/// Proprietary file
pub const PROPRIETARY_FILE_NO: u8 = 0x03;

/// Size of the NDEF file
pub const NDEF_FILE_SIZE: usize = 256;
/// Largest WriteData chunk sent in a single APDU
pub const WRITE_CHUNK_SIZE: usize = 128;

/// UID length of an NTAG 424 DNA
pub const UID_LEN: usize = 7;

/// Number of application keys
pub const KEY_COUNT: usize = 5;
/// AES block and key length
pub const BLOCK_SIZE: usize = 16;
/// Length of a truncated MAC
pub const MAC_T_LEN: usize = 8;
/// Length of the transaction identifier
pub const TI_LEN: usize = 4;

/// Largest value of the 24-bit SDM read counter
pub const SDM_COUNTER_MAX: u32 = 0x00FF_FFFF;

/// Session vector prefix for the encryption key
pub(crate) const SV1_PREFIX: [u8; 2] = [0xA5, 0x5A];
/// Session vector prefix for the MAC key
pub(crate) const SV2_PREFIX: [u8; 2] = [0x5A, 0xA5];
/// Shared tail of the session vector label
pub(crate) const SV_LABEL: [u8; 4] = [0x00, 0x01, 0x00, 0x80];

/// SDM session vector prefix for the file read MAC key
pub(crate) const SDM_MAC_PREFIX: [u8; 2] = [0x3C, 0xC3];
