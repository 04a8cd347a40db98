use std::fmt;

use serde::{Deserialize, Serialize};

use crate::constants::{MAC_T_LEN, SDM_COUNTER_MAX};
use crate::error::FormatError;
use crate::keys::KeyNo;

/// File communication mode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, derive_more::Display)]
#[serde(rename_all = "lowercase")]
pub enum CommMode {
    /// No protection
    #[display("plain")]
    Plain,
    /// Truncated CMAC on command and response
    #[display("mac")]
    Mac,
    /// Encrypted and MACed
    #[default]
    #[serde(rename = "encrypt", alias = "full")]
    #[display("encrypt")]
    Full,
}

impl CommMode {
    /// Bits 1..0 of the FileOption byte
    pub const fn bits(self) -> u8 {
        match self {
            Self::Plain => 0b00,
            Self::Mac => 0b01,
            Self::Full => 0b11,
        }
    }

    /// Decode bits 1..0 of the FileOption byte
    pub const fn from_bits(bits: u8) -> Self {
        match bits & 0b11 {
            0b01 => Self::Mac,
            0b11 => Self::Full,
            _ => Self::Plain,
        }
    }
}

/// One access condition: a key slot, free access or no access
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AccessCondition {
    /// Requires authentication with the key
    Key(KeyNo),
    /// Granted without authentication (`E`)
    Free,
    /// Never granted (`F`)
    Never,
}

impl AccessCondition {
    /// 4-bit encoding
    pub const fn nibble(self) -> u8 {
        match self {
            Self::Key(no) => no.value(),
            Self::Free => 0xE,
            Self::Never => 0xF,
        }
    }

    /// Decode a 4-bit access condition
    pub fn from_nibble(nibble: u8) -> Result<Self, FormatError> {
        match nibble & 0x0F {
            0xE => Ok(Self::Free),
            0xF => Ok(Self::Never),
            n => KeyNo::new(n)
                .map(Self::Key)
                .map_err(|_| FormatError::InvalidAccessRight(hex_char(n))),
        }
    }

    /// Parse the single-character code used by the configuration payload
    pub fn from_code(code: &str) -> Result<Self, FormatError> {
        let mut chars = code.trim().chars();
        let (Some(c), None) = (chars.next(), chars.next()) else {
            return Err(FormatError::InvalidAccessRight(code.chars().next().unwrap_or(' ')));
        };
        let nibble = c
            .to_digit(16)
            .ok_or(FormatError::InvalidAccessRight(c))? as u8;
        Self::from_nibble(nibble).map_err(|_| FormatError::InvalidAccessRight(c))
    }

    /// Single-character code
    pub const fn code(self) -> char {
        hex_char(self.nibble())
    }

    /// Whether a session authenticated with `key` (or no session) satisfies the condition
    pub fn grants(self, key: Option<KeyNo>) -> bool {
        match self {
            Self::Free => true,
            Self::Never => false,
            Self::Key(required) => key == Some(required),
        }
    }
}

impl fmt::Display for AccessCondition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.code())
    }
}

const fn hex_char(nibble: u8) -> char {
    match nibble {
        0..=9 => (b'0' + nibble) as char,
        _ => (b'A' + nibble - 10) as char,
    }
}

/// Access-rights quad of a file
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AccessRights {
    /// ReadData
    pub read: AccessCondition,
    /// WriteData
    pub write: AccessCondition,
    /// Read and write
    pub read_write: AccessCondition,
    /// ChangeFileSettings
    pub change: AccessCondition,
}

impl AccessRights {
    /// Encode as `RW<<4 | Change, Read<<4 | Write`
    pub const fn to_bytes(self) -> [u8; 2] {
        [
            (self.read_write.nibble() << 4) | self.change.nibble(),
            (self.read.nibble() << 4) | self.write.nibble(),
        ]
    }

    /// Decode the two-byte encoding
    pub fn from_bytes(bytes: [u8; 2]) -> Result<Self, FormatError> {
        Ok(Self {
            read_write: AccessCondition::from_nibble(bytes[0] >> 4)?,
            change: AccessCondition::from_nibble(bytes[0])?,
            read: AccessCondition::from_nibble(bytes[1] >> 4)?,
            write: AccessCondition::from_nibble(bytes[1])?,
        })
    }

    /// Whether the write or read-write right admits `key`
    pub fn can_write(&self, key: Option<KeyNo>) -> bool {
        self.write.grants(key) || self.read_write.grants(key)
    }
}

impl Default for AccessRights {
    /// Read free, everything else behind the master key
    fn default() -> Self {
        Self {
            read: AccessCondition::Free,
            write: AccessCondition::Key(KeyNo::MASTER),
            read_write: AccessCondition::Key(KeyNo::MASTER),
            change: AccessCondition::Key(KeyNo::MASTER),
        }
    }
}

/// SDMOptions byte
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SdmOptions {
    /// Mirror the UID
    pub uid_mirror: bool,
    /// Mirror the SDM read counter
    pub read_counter_mirror: bool,
    /// Enforce a read counter limit
    pub read_counter_limit: bool,
    /// Encrypt a part of the file data
    pub enc_file_data: bool,
}

impl SdmOptions {
    const UID: u8 = 0x80;
    const READ_CTR: u8 = 0x40;
    const READ_CTR_LIMIT: u8 = 0x20;
    const ENC_FILE_DATA: u8 = 0x10;
    const ASCII: u8 = 0x01;

    /// Encode, always selecting ASCII encoding
    pub const fn to_byte(self) -> u8 {
        let mut byte = Self::ASCII;
        if self.uid_mirror {
            byte |= Self::UID;
        }
        if self.read_counter_mirror {
            byte |= Self::READ_CTR;
        }
        if self.read_counter_limit {
            byte |= Self::READ_CTR_LIMIT;
        }
        if self.enc_file_data {
            byte |= Self::ENC_FILE_DATA;
        }
        byte
    }

    /// Decode; ASCII encoding is the only one the tag supports
    pub fn from_byte(byte: u8) -> Result<Self, FormatError> {
        if byte & Self::ASCII == 0 {
            return Err(FormatError::InvalidTemplate("SDM mirroring must use ASCII encoding"));
        }
        Ok(Self {
            uid_mirror: byte & Self::UID != 0,
            read_counter_mirror: byte & Self::READ_CTR != 0,
            read_counter_limit: byte & Self::READ_CTR_LIMIT != 0,
            enc_file_data: byte & Self::ENC_FILE_DATA != 0,
        })
    }
}

/// SDM access rights
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SdmAccessRights {
    /// Access to GetFileCounters
    pub ctr_ret: AccessCondition,
    /// Key encrypting PICC data, or `Free` for plaintext mirrors
    pub meta_read: AccessCondition,
    /// Key for the SDM MAC and file data encryption, or `Never` for no MAC
    pub file_read: AccessCondition,
}

impl SdmAccessRights {
    /// Encode as `F<<4 | CtrRet, MetaRead<<4 | FileRead`
    pub const fn to_bytes(self) -> [u8; 2] {
        [
            0xF0 | self.ctr_ret.nibble(),
            (self.meta_read.nibble() << 4) | self.file_read.nibble(),
        ]
    }

    /// Decode the two-byte encoding
    pub fn from_bytes(bytes: [u8; 2]) -> Result<Self, FormatError> {
        Ok(Self {
            ctr_ret: AccessCondition::from_nibble(bytes[0])?,
            meta_read: AccessCondition::from_nibble(bytes[1] >> 4)?,
            file_read: AccessCondition::from_nibble(bytes[1])?,
        })
    }
}

/// Length of the ASCII UID mirror for a 7-byte UID
pub(crate) const UID_MIRROR_LEN: usize = 14;
/// Length of the ASCII read counter mirror
pub(crate) const COUNTER_MIRROR_LEN: usize = 6;
/// Length of the ASCII PICC data mirror
pub(crate) const PICC_MIRROR_LEN: usize = 32;
/// Length of the ASCII SDM MAC mirror
pub(crate) const MAC_MIRROR_LEN: usize = 2 * MAC_T_LEN;

/// Secure Dynamic Messaging part of the file settings
///
/// Offsets are file offsets. Which offsets are present on the wire follows
/// from the options and access rights; [`SdmSettings::validate`] checks that
/// the set is consistent and that every window fits the file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SdmSettings {
    /// SDMOptions
    pub options: SdmOptions,
    /// SDM access rights
    pub access: SdmAccessRights,
    /// UIDOffset (plaintext mirror)
    pub uid_offset: Option<u32>,
    /// SDMReadCtrOffset (plaintext mirror)
    pub read_ctr_offset: Option<u32>,
    /// PICCDataOffset (encrypted mirror)
    pub picc_data_offset: Option<u32>,
    /// SDMMACInputOffset
    pub mac_input_offset: Option<u32>,
    /// SDMENCOffset
    pub enc_offset: Option<u32>,
    /// SDMENCLength
    pub enc_length: Option<u32>,
    /// SDMMACOffset
    pub mac_offset: Option<u32>,
    /// SDMReadCtrLimit
    pub read_ctr_limit: Option<u32>,
}

impl SdmSettings {
    const fn plain_meta(&self) -> bool {
        matches!(self.access.meta_read, AccessCondition::Free)
    }

    const fn has_picc(&self) -> bool {
        matches!(self.access.meta_read, AccessCondition::Key(_))
    }

    const fn has_mac(&self) -> bool {
        !matches!(self.access.file_read, AccessCondition::Never)
    }

    /// Substitution windows as `(name, offset, length)` in file order of the encoding
    pub fn windows(&self) -> Vec<(&'static str, usize, usize)> {
        let mut windows = Vec::new();
        let mut push = |name, offset: Option<u32>, len| {
            if let Some(offset) = offset {
                windows.push((name, offset as usize, len));
            }
        };
        push("UID", self.uid_offset, UID_MIRROR_LEN);
        push("read counter", self.read_ctr_offset, COUNTER_MIRROR_LEN);
        push("PICC data", self.picc_data_offset, PICC_MIRROR_LEN);
        push(
            "encrypted file data",
            self.enc_offset,
            self.enc_length.unwrap_or(0) as usize,
        );
        push("MAC", self.mac_offset, MAC_MIRROR_LEN);
        windows
    }

    /// Check offset presence rules and window placement against the file size
    pub fn validate(&self, file_size: usize) -> Result<(), FormatError> {
        let need = |present: bool, value: Option<u32>, field: &'static str| {
            if present == value.is_some() {
                Ok(())
            } else {
                Err(FormatError::InvalidTemplate(field))
            }
        };
        need(
            self.options.uid_mirror && self.plain_meta(),
            self.uid_offset,
            "UID offset does not match the UID mirror setting",
        )?;
        need(
            self.options.read_counter_mirror && self.plain_meta(),
            self.read_ctr_offset,
            "read counter offset does not match the counter mirror setting",
        )?;
        need(self.has_picc(), self.picc_data_offset, "PICC data offset requires a meta read key")?;
        need(self.has_mac(), self.mac_input_offset, "MAC input offset requires a file read key")?;
        need(self.has_mac(), self.mac_offset, "MAC offset requires a file read key")?;
        need(
            self.options.enc_file_data && self.has_mac(),
            self.enc_offset,
            "encrypted file data requires a file read key",
        )?;
        need(
            self.options.enc_file_data && self.has_mac(),
            self.enc_length,
            "encrypted file data requires a length",
        )?;
        need(
            self.options.read_counter_limit,
            self.read_ctr_limit,
            "read counter limit does not match the limit setting",
        )?;
        if self.has_picc() && !(self.options.uid_mirror || self.options.read_counter_mirror) {
            return Err(FormatError::MissingMirror);
        }
        if let Some(limit) = self.read_ctr_limit {
            if limit > SDM_COUNTER_MAX {
                return Err(FormatError::CounterOutOfRange(limit.into()));
            }
        }

        check_windows(&self.windows(), file_size)?;

        if let (Some(input), Some(mac)) = (self.mac_input_offset, self.mac_offset) {
            if input > mac {
                return Err(FormatError::MacInputAfterMac {
                    input: input as usize,
                    mac: mac as usize,
                });
            }
        }
        Ok(())
    }

    fn encode(&self, out: &mut Vec<u8>) {
        out.push(self.options.to_byte());
        out.extend_from_slice(&self.access.to_bytes());
        let offsets = [
            self.uid_offset,
            self.read_ctr_offset,
            self.picc_data_offset,
            self.mac_input_offset,
            self.enc_offset,
            self.enc_length,
            self.mac_offset,
            self.read_ctr_limit,
        ];
        for offset in offsets.into_iter().flatten() {
            out.extend_from_slice(&offset.to_le_bytes()[..3]);
        }
    }

    fn decode(data: &[u8]) -> Result<Self, FormatError> {
        let [options, ar0, ar1, rest @ ..] = data else {
            return Err(FormatError::InvalidTemplate("truncated SDM settings"));
        };
        let mut settings = Self {
            options: SdmOptions::from_byte(*options)?,
            access: SdmAccessRights::from_bytes([*ar0, *ar1])?,
            uid_offset: None,
            read_ctr_offset: None,
            picc_data_offset: None,
            mac_input_offset: None,
            enc_offset: None,
            enc_length: None,
            mac_offset: None,
            read_ctr_limit: None,
        };

        let mut chunks = rest.chunks_exact(3);
        let mut next = |present: bool| -> Result<Option<u32>, FormatError> {
            if !present {
                return Ok(None);
            }
            chunks
                .next()
                .map(|c| Some(u32::from_le_bytes([c[0], c[1], c[2], 0])))
                .ok_or(FormatError::InvalidTemplate("truncated SDM offsets"))
        };

        let plain = settings.plain_meta();
        let mac = settings.has_mac();
        let enc = settings.options.enc_file_data && mac;
        settings.uid_offset = next(settings.options.uid_mirror && plain)?;
        settings.read_ctr_offset = next(settings.options.read_counter_mirror && plain)?;
        settings.picc_data_offset = next(settings.has_picc())?;
        settings.mac_input_offset = next(mac)?;
        settings.enc_offset = next(enc)?;
        settings.enc_length = next(enc)?;
        settings.mac_offset = next(mac)?;
        settings.read_ctr_limit = next(settings.options.read_counter_limit)?;
        Ok(settings)
    }
}

/// Check that windows fit `size` and do not share bytes
pub(crate) fn check_windows(
    windows: &[(&'static str, usize, usize)],
    size: usize,
) -> Result<(), FormatError> {
    for &(field, offset, len) in windows {
        if offset.checked_add(len).is_none_or(|end| end > size) {
            return Err(FormatError::OutOfBounds { field, offset, len, size });
        }
    }
    for (i, &(first, a, a_len)) in windows.iter().enumerate() {
        for &(second, b, b_len) in &windows[i + 1..] {
            if a < b + b_len && b < a + a_len {
                return Err(FormatError::Overlap { first, second });
            }
        }
    }
    Ok(())
}

/// Settings of one file, as sent by ChangeFileSettings and returned by GetFileSettings
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileSettings {
    /// File type (0x00 standard data file); only reported by the tag
    pub file_type: u8,
    /// Communication mode
    pub comm_mode: CommMode,
    /// Access rights
    pub access: AccessRights,
    /// File size; only reported by the tag
    pub file_size: u32,
    /// SDM settings when SDM is enabled
    pub sdm: Option<SdmSettings>,
}

impl FileSettings {
    const SDM_ENABLED: u8 = 0x40;

    /// Settings for a standard data file without SDM
    pub fn new(comm_mode: CommMode, access: AccessRights, file_size: u32) -> Self {
        Self {
            file_type: 0x00,
            comm_mode,
            access,
            file_size,
            sdm: None,
        }
    }

    /// FileOption byte
    pub const fn file_option(&self) -> u8 {
        let sdm = if self.sdm.is_some() { Self::SDM_ENABLED } else { 0 };
        sdm | self.comm_mode.bits()
    }

    /// Communication mode a WriteData under `key` has to use, or `None` if denied
    ///
    /// Access through the authenticated key uses the file's mode; free access is plain.
    pub fn write_comm_mode(&self, key: Option<KeyNo>) -> Option<CommMode> {
        let via_key = |cond: AccessCondition| {
            key.is_some() && cond.grants(key) && cond != AccessCondition::Free
        };
        if via_key(self.access.write) || via_key(self.access.read_write) {
            Some(self.comm_mode)
        } else if self.access.can_write(None) {
            Some(CommMode::Plain)
        } else {
            None
        }
    }

    /// ChangeFileSettings data (without the file number)
    pub fn encode_change(&self) -> Result<Vec<u8>, FormatError> {
        let mut out = Vec::with_capacity(32);
        out.push(self.file_option());
        out.extend_from_slice(&self.access.to_bytes());
        if let Some(sdm) = &self.sdm {
            sdm.validate(self.file_size as usize)?;
            sdm.encode(&mut out);
        }
        Ok(out)
    }

    /// Decode a GetFileSettings response
    pub fn decode(data: &[u8]) -> Result<Self, FormatError> {
        let [file_type, option, ar0, ar1, s0, s1, s2, rest @ ..] = data else {
            return Err(FormatError::InvalidTemplate("truncated file settings"));
        };
        let sdm = if option & Self::SDM_ENABLED != 0 {
            Some(SdmSettings::decode(rest)?)
        } else {
            None
        };
        Ok(Self {
            file_type: *file_type,
            comm_mode: CommMode::from_bits(*option),
            access: AccessRights::from_bytes([*ar0, *ar1])?,
            file_size: u32::from_le_bytes([*s0, *s1, *s2, 0]),
            sdm,
        })
    }

    /// GetFileSettings response data
    pub fn encode_get(&self) -> Vec<u8> {
        let mut out = vec![self.file_type, self.file_option()];
        out.extend_from_slice(&self.access.to_bytes());
        out.extend_from_slice(&self.file_size.to_le_bytes()[..3]);
        if let Some(sdm) = &self.sdm {
            sdm.encode(&mut out);
        }
        out
    }

    /// Decode ChangeFileSettings data, keeping the file type and size of `current`
    pub fn decode_change(data: &[u8], current: &Self) -> Result<Self, FormatError> {
        let [option, ar0, ar1, rest @ ..] = data else {
            return Err(FormatError::InvalidTemplate("truncated file settings"));
        };
        let sdm = if option & Self::SDM_ENABLED != 0 {
            let sdm = SdmSettings::decode(rest)?;
            sdm.validate(current.file_size as usize)?;
            Some(sdm)
        } else {
            None
        };
        Ok(Self {
            file_type: current.file_type,
            comm_mode: CommMode::from_bits(*option),
            access: AccessRights::from_bytes([*ar0, *ar1])?,
            file_size: current.file_size,
            sdm,
        })
    }
}
