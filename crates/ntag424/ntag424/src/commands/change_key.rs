use super::NativeCommand;
use crate::constants::ins;
use crate::crypto;
use crate::keys::{AesKey, KeyNo};
use crate::types::CommMode;

/// ChangeKey, always sent in full mode
///
/// For the key the session is authenticated with, the data is `NewKey || KeyVer`
/// (`old` is `None`). For any other key it is
/// `(NewKey ^ OldKey) || KeyVer || CRC32NK(NewKey)`.
pub fn change_key(key_no: KeyNo, new: &AesKey, version: u8, old: Option<&AesKey>) -> NativeCommand {
    let mut data = Vec::with_capacity(21);
    match old {
        None => {
            data.extend_from_slice(new.as_bytes());
            data.push(version);
        }
        Some(old) => {
            data.extend_from_slice(&crypto::xor(new.as_bytes(), old.as_bytes()));
            data.push(version);
            data.extend_from_slice(&crypto::crc32nk(new.as_bytes()).to_le_bytes());
        }
    }
    NativeCommand::new(ins::CHANGE_KEY, CommMode::Full)
        .with_header([key_no.value()])
        .with_data(data)
}
