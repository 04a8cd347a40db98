use std::fmt;
use std::str::FromStr;

use serde::Serialize;

use crate::error::FormatError;

const MAX_UID_LEN: usize = 10;

/// Tag UID (7 bytes on NTAG 424 DNA, 4 and 10 accepted for other tags)
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct Uid {
    bytes: [u8; MAX_UID_LEN],
    len: u8,
}

impl Uid {
    /// Wrap raw UID bytes
    pub fn new(bytes: &[u8]) -> Result<Self, FormatError> {
        if !(4..=MAX_UID_LEN).contains(&bytes.len()) {
            return Err(FormatError::InvalidUid);
        }
        let mut buf = [0u8; MAX_UID_LEN];
        buf[..bytes.len()].copy_from_slice(bytes);
        Ok(Self {
            bytes: buf,
            len: bytes.len() as u8,
        })
    }

    /// Seven-byte NTAG 424 DNA UID
    pub const fn from_array(bytes: [u8; 7]) -> Self {
        let mut buf = [0u8; MAX_UID_LEN];
        let mut i = 0;
        while i < bytes.len() {
            buf[i] = bytes[i];
            i += 1;
        }
        Self { bytes: buf, len: 7 }
    }

    /// Parse hex, with or without `:`/space separators
    pub fn from_hex(input: &str) -> Result<Self, FormatError> {
        let compact: String = input
            .chars()
            .filter(|c| !matches!(c, ':' | ' ' | '-'))
            .collect();
        let bytes = hex::decode(compact).map_err(|_| FormatError::InvalidUid)?;
        Self::new(&bytes)
    }

    /// UID bytes
    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes[..self.len as usize]
    }

    /// UID length in bytes
    pub const fn len(&self) -> usize {
        self.len as usize
    }

    /// Always false; a UID has at least four bytes
    pub const fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Upper-case hex without separators, as mirrored by SDM
    pub fn to_hex(&self) -> String {
        hex::encode_upper(self.as_bytes())
    }
}

impl fmt::Display for Uid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, byte) in self.as_bytes().iter().enumerate() {
            if i > 0 {
                f.write_str(":")?;
            }
            write!(f, "{byte:02X}")?;
        }
        Ok(())
    }
}

impl fmt::Debug for Uid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Uid({self})")
    }
}

impl FromStr for Uid {
    type Err = FormatError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_hex(s)
    }
}

impl Serialize for Uid {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

/// Hardware or software part of the GetVersion answer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ComponentVersion {
    /// Vendor ID (0x04 for NXP)
    pub vendor: u8,
    /// Type
    pub kind: u8,
    /// Subtype; 0x08 on the tamper-tag variant's hardware part
    pub subtype: u8,
    /// Major version
    pub major: u8,
    /// Minor version
    pub minor: u8,
    /// Storage size code
    pub storage: u8,
    /// Protocol type
    pub protocol: u8,
}

impl ComponentVersion {
    fn parse(frame: &[u8]) -> Option<Self> {
        let [vendor, kind, subtype, major, minor, storage, protocol, ..] = *frame else {
            return None;
        };
        Some(Self {
            vendor,
            kind,
            subtype,
            major,
            minor,
            storage,
            protocol,
        })
    }

    fn to_bytes(self) -> [u8; 7] {
        [
            self.vendor,
            self.kind,
            self.subtype,
            self.major,
            self.minor,
            self.storage,
            self.protocol,
        ]
    }
}

/// Parsed GetVersion answer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VersionInfo {
    /// Hardware information
    pub hardware: ComponentVersion,
    /// Software information
    pub software: ComponentVersion,
    /// UID from the production frame
    pub uid: Uid,
    /// Production batch number
    #[serde(with = "hex_bytes")]
    pub batch: [u8; 5],
    /// Calendar week of production (BCD)
    pub fab_week: u8,
    /// Year of production (BCD)
    pub fab_year: u8,
}

mod hex_bytes {
    pub(super) fn serialize<S: serde::Serializer>(
        bytes: &[u8; 5],
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&hex::encode_upper(bytes))
    }
}

impl VersionInfo {
    const TAMPER_SUBTYPE: u8 = 0x08;
    const STORAGE_416: u8 = 0x11;

    /// Parse the three GetVersion frames
    pub fn parse(hardware: &[u8], software: &[u8], production: &[u8]) -> Option<Self> {
        let hardware = ComponentVersion::parse(hardware)?;
        let software = ComponentVersion::parse(software)?;
        if production.len() < 14 {
            return None;
        }
        let uid = Uid::new(&production[..7]).ok()?;
        let mut batch = [0u8; 5];
        batch.copy_from_slice(&production[7..12]);
        Some(Self {
            hardware,
            software,
            uid,
            batch,
            fab_week: production[12],
            fab_year: production[13],
        })
    }

    /// Encode the three frames, as the tag sends them
    pub fn to_frames(&self) -> [Vec<u8>; 3] {
        let mut production = self.uid.as_bytes().to_vec();
        production.extend_from_slice(&self.batch);
        production.extend_from_slice(&[self.fab_week, self.fab_year]);
        [
            self.hardware.to_bytes().to_vec(),
            self.software.to_bytes().to_vec(),
            production,
        ]
    }

    /// User memory in bytes
    pub const fn memory_size(&self) -> usize {
        match self.hardware.storage {
            Self::STORAGE_416 => 416,
            code => match 1usize.checked_shl((code >> 1) as u32) {
                Some(size) => size,
                None => 0,
            },
        }
    }

    /// Whether this is the tamper-tag variant
    pub const fn is_tamper_variant(&self) -> bool {
        self.hardware.subtype == Self::TAMPER_SUBTYPE
    }

    /// Firmware version as `major.minor`
    pub fn firmware(&self) -> String {
        format!("{}.{}", self.software.major, self.software.minor)
    }
}

/// What is known about the connected tag
///
/// Refreshed on every connect; never mutated in between.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TagIdentity {
    /// UID
    pub uid: Uid,
    /// Full version answer
    pub version: VersionInfo,
}

impl TagIdentity {
    /// Build from a GetVersion answer
    pub const fn new(version: VersionInfo) -> Self {
        Self {
            uid: version.uid,
            version,
        }
    }

    /// User memory in bytes
    pub const fn memory_size(&self) -> usize {
        self.version.memory_size()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hex_literal::hex;

    #[test]
    fn test_uid_parsing() {
        let uid: Uid = "E2:80:69:02:01:23:45:67".parse().unwrap();
        assert_eq!(uid.len(), 8);
        assert_eq!(uid.to_string(), "E2:80:69:02:01:23:45:67");

        let uid = Uid::from_hex("048d58d2142290").unwrap();
        assert_eq!(uid.as_bytes(), &hex!("048D58D2142290"));
        assert_eq!(uid.to_hex(), "048D58D2142290");

        assert_eq!(Uid::from_hex("0102").unwrap_err(), FormatError::InvalidUid);
        assert!(Uid::from_hex("zz:01:02:03").is_err());
        assert!(Uid::new(&[0u8; 11]).is_err());
    }

    #[test]
    fn test_version_parsing() {
        let info = VersionInfo::parse(
            &hex!("04 04 02 30 00 11 05"),
            &hex!("04 04 02 01 02 11 05"),
            &hex!("048D58D2142290 CF39355140 23 21"),
        )
        .unwrap();
        assert_eq!(info.uid.to_hex(), "048D58D2142290");
        assert_eq!(info.memory_size(), 416);
        assert_eq!(info.firmware(), "1.2");
        assert!(!info.is_tamper_variant());
        assert_eq!(info.fab_week, 0x23);

        let frames = info.to_frames();
        assert_eq!(frames[2], hex!("048D58D2142290 CF39355140 23 21").to_vec());
        assert!(VersionInfo::parse(&frames[0], &frames[1], &frames[2][..10]).is_none());
    }

    #[test]
    fn test_memory_size_codes() {
        let mut info = VersionInfo::parse(
            &hex!("04 04 08 30 00 0F 05"),
            &hex!("04 04 02 01 02 11 05"),
            &hex!("048D58D2142290 0000000000 01 22"),
        )
        .unwrap();
        assert_eq!(info.memory_size(), 128);
        assert!(info.is_tamper_variant());
        info.hardware.storage = 0x13;
        assert_eq!(info.memory_size(), 512);
    }
}
