//! Key Store: application keys and the derived session keys
//!
//! Raw key bytes stay inside this module and [`crate::crypto`]. Everything
//! observable from outside (`Debug`, logs, serialized state) carries only the
//! slot index, the key version and whether a key is present.

use std::fmt;
use std::str::FromStr;

use subtle::ConstantTimeEq;
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::constants::{BLOCK_SIZE, KEY_COUNT};
use crate::crypto::{self, Block};
use crate::error::FormatError;

/// AES-128 key, wiped from memory on drop
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct AesKey([u8; BLOCK_SIZE]);

impl AesKey {
    /// Wrap raw key bytes
    pub const fn new(bytes: [u8; BLOCK_SIZE]) -> Self {
        Self(bytes)
    }

    /// The all-zero factory default key
    pub const fn zero() -> Self {
        Self([0u8; BLOCK_SIZE])
    }

    /// Generate a random key
    pub fn generate() -> Self {
        Self(crypto::random_bytes())
    }

    /// Parse a key from 32 hex characters
    pub fn from_hex(input: &str) -> Result<Self, FormatError> {
        let mut bytes = [0u8; BLOCK_SIZE];
        hex::decode_to_slice(input.trim(), &mut bytes)
            .map_err(|_| FormatError::InvalidKey("key"))?;
        Ok(Self(bytes))
    }

    /// Parse an optional key where an empty string means "not set"
    pub(crate) fn from_optional_hex(
        input: &str,
        field: &'static str,
    ) -> Result<Option<Self>, FormatError> {
        if input.trim().is_empty() {
            return Ok(None);
        }
        Self::from_hex(input)
            .map(Some)
            .map_err(|_| FormatError::InvalidKey(field))
    }

    /// Upper-case hex, only for filling in freshly generated config keys
    pub(crate) fn to_hex(&self) -> String {
        hex::encode_upper(self.0)
    }

    pub(crate) const fn as_bytes(&self) -> &[u8; BLOCK_SIZE] {
        &self.0
    }
}

impl fmt::Debug for AesKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("AesKey(..)")
    }
}

impl PartialEq for AesKey {
    fn eq(&self, other: &Self) -> bool {
        self.0[..].ct_eq(&other.0[..]).into()
    }
}

impl Eq for AesKey {}

impl FromStr for AesKey {
    type Err = FormatError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_hex(s)
    }
}

/// Application key number (0-4)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, derive_more::Display)]
#[display("key {_0}")]
pub struct KeyNo(u8);

impl KeyNo {
    /// Application master key, the only key allowed to change other keys
    pub const MASTER: Self = Self(0);
    /// Key used for SDM meta data (PICC data) encryption
    pub const SDM_META_READ: Self = Self(1);
    /// Key used for SDM file read MAC and encryption
    pub const SDM_FILE_READ: Self = Self(2);

    /// Validate a key number
    pub const fn new(no: u8) -> Result<Self, FormatError> {
        if (no as usize) < KEY_COUNT {
            Ok(Self(no))
        } else {
            Err(FormatError::InvalidKeyNo(no))
        }
    }

    /// Raw key number
    pub const fn value(self) -> u8 {
        self.0
    }

    const fn index(self) -> usize {
        self.0 as usize
    }
}

impl TryFrom<u8> for KeyNo {
    type Error = FormatError;

    fn try_from(no: u8) -> Result<Self, Self::Error> {
        Self::new(no)
    }
}

/// One application key with its version
#[derive(Clone)]
pub struct KeySlot {
    no: KeyNo,
    key: AesKey,
    version: u8,
}

impl KeySlot {
    /// Create a slot entry
    pub const fn new(no: KeyNo, key: AesKey, version: u8) -> Self {
        Self { no, key, version }
    }

    /// Slot index
    pub const fn no(&self) -> KeyNo {
        self.no
    }

    /// Key version
    pub const fn version(&self) -> u8 {
        self.version
    }
}

impl fmt::Debug for KeySlot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeySlot")
            .field("no", &self.no.value())
            .field("version", &self.version)
            .finish_non_exhaustive()
    }
}

/// Session encryption and MAC keys derived by the EV2 handshake
///
/// Both halves are [`AesKey`]s and wipe themselves when the session drops.
#[derive(Clone, PartialEq, Eq)]
pub(crate) struct SessionKeys {
    enc: AesKey,
    mac: AesKey,
}

impl SessionKeys {
    pub(crate) const fn new(enc: AesKey, mac: AesKey) -> Self {
        Self { enc, mac }
    }

    /// `KSesAuthENC = CMAC(K, SV1)`, `KSesAuthMAC = CMAC(K, SV2)`
    pub(crate) fn derive(key: &AesKey, rnd_a: &Block, rnd_b: &Block) -> Self {
        use crate::constants::{SV1_PREFIX, SV2_PREFIX};

        let sv1 = crypto::session_vector(SV1_PREFIX, rnd_a, rnd_b);
        let sv2 = crypto::session_vector(SV2_PREFIX, rnd_a, rnd_b);
        Self {
            enc: AesKey::new(crypto::cmac(key, &sv1)),
            mac: AesKey::new(crypto::cmac(key, &sv2)),
        }
    }

    pub(crate) const fn enc(&self) -> &AesKey {
        &self.enc
    }

    pub(crate) const fn mac(&self) -> &AesKey {
        &self.mac
    }
}

impl fmt::Debug for SessionKeys {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("SessionKeys(..)")
    }
}

/// Holds the application keys for one tag interaction and the active session keys
///
/// Slots that were never loaded are assumed to hold the factory key (all
/// zeros, version 0).
#[derive(Default)]
pub struct KeyStore {
    slots: [Option<KeySlot>; KEY_COUNT],
    session: Option<SessionKeys>,
}

impl KeyStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Load or replace a slot key
    pub fn load(&mut self, no: KeyNo, key: AesKey, version: u8) {
        self.slots[no.index()] = Some(KeySlot::new(no, key, version));
    }

    /// Whether a key was explicitly loaded into the slot
    pub fn contains(&self, no: KeyNo) -> bool {
        self.slots[no.index()].is_some()
    }

    /// Known version of the slot key
    pub fn version(&self, no: KeyNo) -> u8 {
        self.slots[no.index()].as_ref().map_or(0, KeySlot::version)
    }

    /// Slot metadata for every loaded key
    pub fn slots(&self) -> impl Iterator<Item = &KeySlot> {
        self.slots.iter().flatten()
    }

    /// Current key of the slot, falling back to the factory key
    pub(crate) fn key(&self, no: KeyNo) -> AesKey {
        self.slots[no.index()]
            .as_ref()
            .map_or_else(AesKey::zero, |slot| slot.key.clone())
    }

    pub(crate) fn install_session(&mut self, keys: SessionKeys) {
        self.session = Some(keys);
    }

    pub(crate) const fn session(&self) -> Option<&SessionKeys> {
        self.session.as_ref()
    }

    /// Drop the session keys, zeroizing them
    pub fn clear_session(&mut self) {
        self.session = None;
    }

    /// Drop everything, zeroizing slot and session keys
    pub fn clear(&mut self) {
        self.session = None;
        self.slots = Default::default();
    }

    /// Whether session key material is resident
    pub const fn has_session_keys(&self) -> bool {
        self.session.is_some()
    }
}

impl fmt::Debug for KeyStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeyStore")
            .field("slots", &self.slots().collect::<Vec<_>>())
            .field("session", &self.session.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hex_literal::hex;

    #[test]
    fn test_key_from_hex() {
        let key = AesKey::from_hex("00112233445566778899AABBCCDDEEFF").unwrap();
        assert_eq!(key.as_bytes(), &hex!("00112233445566778899aabbccddeeff"));
        assert_eq!(key, "00112233445566778899aabbccddeeff".parse().unwrap());
        assert_eq!(key.to_hex(), "00112233445566778899AABBCCDDEEFF");

        assert!(AesKey::from_hex("0011").is_err());
        assert!(AesKey::from_hex("zz112233445566778899aabbccddeeff").is_err());
    }

    #[test]
    fn test_optional_key() {
        assert!(AesKey::from_optional_hex("", "sdmMacKey").unwrap().is_none());
        assert_eq!(
            AesKey::from_optional_hex("12", "sdmMacKey").unwrap_err(),
            FormatError::InvalidKey("sdmMacKey")
        );
    }

    #[test]
    fn test_debug_never_prints_key_material() {
        let key = AesKey::new([0xAB; 16]);
        assert_eq!(format!("{key:?}"), "AesKey(..)");

        let mut store = KeyStore::new();
        store.load(KeyNo::MASTER, key.clone(), 3);
        store.install_session(SessionKeys::new(key.clone(), key));
        let debug = format!("{store:?}");
        assert!(!debug.to_lowercase().contains("abab"));
        assert!(debug.contains("version: 3"));
    }

    #[test]
    fn test_key_no_range() {
        assert_eq!(KeyNo::new(4).unwrap().value(), 4);
        assert_eq!(KeyNo::new(5).unwrap_err(), FormatError::InvalidKeyNo(5));
        assert_eq!(KeyNo::SDM_FILE_READ.to_string(), "key 2");
    }

    #[test]
    fn test_unloaded_slot_is_factory_key() {
        let store = KeyStore::new();
        assert_eq!(store.key(KeyNo::MASTER), AesKey::zero());
        assert_eq!(store.version(KeyNo::MASTER), 0);
        assert!(!store.contains(KeyNo::MASTER));
    }

    #[test]
    fn test_clear_session() {
        let mut store = KeyStore::new();
        store.load(KeyNo::MASTER, AesKey::generate(), 1);
        store.install_session(SessionKeys::new(AesKey::generate(), AesKey::generate()));
        assert!(store.has_session_keys());

        store.clear_session();
        assert!(!store.has_session_keys());
        assert!(store.contains(KeyNo::MASTER));

        store.clear();
        assert!(!store.contains(KeyNo::MASTER));
    }
}
