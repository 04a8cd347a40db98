//! SUN/SDM codec
//!
//! Secure Dynamic Messaging mirrors the UID, the 24-bit read counter and a
//! truncated CMAC into the NDEF file as upper-case ASCII hex every time the
//! file is read. SUN is the special case of a URL suffix `UID || Ctr || MAC`
//! with the MAC computed over `UID || Ctr`.
//!
//! [`encode`] produces what the tag would mirror for a given counter, and
//! [`verify`] checks such a mirror and recovers the UID and counter. Both are
//! pure; no session with the tag is involved.

mod codec;
mod template;

pub use codec::{encode, verify};
pub use template::{SdmLayout, SdmTemplate};

use crate::keys::AesKey;
use crate::types::Uid;

/// Keys an SDM layout may need
#[derive(Debug, Clone, Default)]
pub struct SdmKeys {
    /// SDM meta read key, decrypts PICC data
    pub meta_read: Option<AesKey>,
    /// SDM file read key, derives the MAC session key
    pub file_read: Option<AesKey>,
}

impl SdmKeys {
    /// No keys
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the meta read key
    pub fn with_meta_read(mut self, key: AesKey) -> Self {
        self.meta_read = Some(key);
        self
    }

    /// Set the file read key
    pub fn with_file_read(mut self, key: AesKey) -> Self {
        self.file_read = Some(key);
        self
    }
}

/// What a verified mirror says about the tap
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SdmReading {
    /// Tag UID
    pub uid: Uid,
    /// SDM read counter
    pub counter: u32,
    /// Whether a MAC was present and verified
    pub authenticated: bool,
}
