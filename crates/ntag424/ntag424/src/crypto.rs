//! AES-128 primitives used by authentication, secure messaging and SDM
//!
//! Every function takes keys as [`AesKey`] so raw key bytes never leave the
//! crate.

use aes::Aes128;
use cipher::{
    BlockDecrypt, BlockDecryptMut, BlockEncrypt, BlockEncryptMut, KeyInit, KeyIvInit,
    block_padding::{Iso7816, NoPadding},
    generic_array::GenericArray,
};
use cmac::{Cmac, Mac};
use crc::{CRC_32_JAMCRC, Crc};
use rand::RngCore;

use crate::constants::{BLOCK_SIZE, MAC_T_LEN, SV_LABEL};
use crate::keys::AesKey;
use crate::{Error, Result};

type Encryptor = cbc::Encryptor<Aes128>;
type Decryptor = cbc::Decryptor<Aes128>;

/// A single AES block
pub(crate) type Block = [u8; BLOCK_SIZE];

const ZERO_IV: Block = [0u8; BLOCK_SIZE];

/// CRC32 as used by ChangeKey: reflected, init `FFFFFFFF`, no final XOR
const CRC32NK: Crc<u32> = Crc::<u32>::new(&CRC_32_JAMCRC);

fn cipher(key: &AesKey) -> Aes128 {
    Aes128::new(GenericArray::from_slice(key.as_bytes()))
}

/// Encrypt one block in ECB mode
pub(crate) fn encrypt_block(key: &AesKey, block: &Block) -> Block {
    let mut buf = GenericArray::clone_from_slice(block);
    cipher(key).encrypt_block(&mut buf);
    let mut out = [0u8; BLOCK_SIZE];
    out.copy_from_slice(&buf);
    out
}

/// Decrypt one block in ECB mode
pub(crate) fn decrypt_block(key: &AesKey, block: &Block) -> Block {
    let mut buf = GenericArray::clone_from_slice(block);
    cipher(key).decrypt_block(&mut buf);
    let mut out = [0u8; BLOCK_SIZE];
    out.copy_from_slice(&buf);
    out
}

/// AES-CBC encrypt block-aligned data without padding
pub(crate) fn cbc_encrypt(key: &AesKey, iv: &Block, data: &[u8]) -> Result<Vec<u8>> {
    if data.len() % BLOCK_SIZE != 0 {
        return Err(Error::Protocol("plaintext is not block aligned"));
    }
    let mut buf = data.to_vec();
    let len = buf.len();
    Encryptor::new(GenericArray::from_slice(key.as_bytes()), GenericArray::from_slice(iv))
        .encrypt_padded_mut::<NoPadding>(&mut buf, len)
        .map_err(|_| Error::Protocol("plaintext is not block aligned"))?;
    Ok(buf)
}

/// AES-CBC decrypt block-aligned data without padding
pub(crate) fn cbc_decrypt(key: &AesKey, iv: &Block, data: &[u8]) -> Result<Vec<u8>> {
    if data.len() % BLOCK_SIZE != 0 {
        return Err(Error::Protocol("ciphertext is not block aligned"));
    }
    let mut buf = data.to_vec();
    let len = Decryptor::new(GenericArray::from_slice(key.as_bytes()), GenericArray::from_slice(iv))
        .decrypt_padded_mut::<NoPadding>(&mut buf)
        .map_err(|_| Error::Protocol("ciphertext is not block aligned"))?
        .len();
    buf.truncate(len);
    Ok(buf)
}

/// AES-CBC with a zero IV, as used by the authentication handshake
pub(crate) fn cbc_encrypt_zero_iv(key: &AesKey, data: &[u8]) -> Result<Vec<u8>> {
    cbc_encrypt(key, &ZERO_IV, data)
}

/// AES-CBC decrypt with a zero IV
pub(crate) fn cbc_decrypt_zero_iv(key: &AesKey, data: &[u8]) -> Result<Vec<u8>> {
    cbc_decrypt(key, &ZERO_IV, data)
}

/// AES-CBC encrypt with ISO/IEC 9797-1 method 2 padding
///
/// Padding is always added, so block-aligned input grows by a full block.
pub(crate) fn cbc_encrypt_padded(key: &AesKey, iv: &Block, data: &[u8]) -> Vec<u8> {
    Encryptor::new(GenericArray::from_slice(key.as_bytes()), GenericArray::from_slice(iv))
        .encrypt_padded_vec_mut::<Iso7816>(data)
}

/// AES-CBC decrypt and strip ISO/IEC 9797-1 method 2 padding
pub(crate) fn cbc_decrypt_padded(key: &AesKey, iv: &Block, data: &[u8]) -> Result<Vec<u8>> {
    if data.is_empty() || data.len() % BLOCK_SIZE != 0 {
        return Err(Error::Integrity("ciphertext is not block aligned"));
    }
    Decryptor::new(GenericArray::from_slice(key.as_bytes()), GenericArray::from_slice(iv))
        .decrypt_padded_vec_mut::<Iso7816>(data)
        .map_err(|_| Error::Integrity("invalid padding"))
}

/// Full AES-CMAC
pub(crate) fn cmac(key: &AesKey, data: &[u8]) -> Block {
    let mut mac = <Cmac<Aes128> as KeyInit>::new(GenericArray::from_slice(key.as_bytes()));
    mac.update(data);
    let tag = mac.finalize().into_bytes();
    let mut out = [0u8; BLOCK_SIZE];
    out.copy_from_slice(&tag);
    out
}

/// Truncate a CMAC to the odd-indexed bytes `1, 3, ..., 15`
pub(crate) fn truncate_mac(full: &Block) -> [u8; MAC_T_LEN] {
    let mut out = [0u8; MAC_T_LEN];
    for (i, byte) in out.iter_mut().enumerate() {
        *byte = full[2 * i + 1];
    }
    out
}

/// Truncated AES-CMAC
pub(crate) fn mac_t(key: &AesKey, data: &[u8]) -> [u8; MAC_T_LEN] {
    truncate_mac(&cmac(key, data))
}

/// Rotate a block left by one byte
pub(crate) fn rotate_left(block: &Block) -> Block {
    let mut out = *block;
    out.rotate_left(1);
    out
}

/// Session vector for EV2 key derivation
///
/// `prefix || 00 01 00 80 || RndA[0..2] || (RndA[2..8] ^ RndB[0..6]) || RndB[6..16] || RndA[8..16]`
pub(crate) fn session_vector(prefix: [u8; 2], rnd_a: &Block, rnd_b: &Block) -> [u8; 32] {
    let mut sv = [0u8; 32];
    sv[0..2].copy_from_slice(&prefix);
    sv[2..6].copy_from_slice(&SV_LABEL);
    sv[6..8].copy_from_slice(&rnd_a[0..2]);
    for i in 0..6 {
        sv[8 + i] = rnd_a[2 + i] ^ rnd_b[i];
    }
    sv[14..24].copy_from_slice(&rnd_b[6..16]);
    sv[24..32].copy_from_slice(&rnd_a[8..16]);
    sv
}

/// Zero-pad to a 16-byte multiple and CMAC, as the SDM session key derivation does
pub(crate) fn cmac_zero_padded(key: &AesKey, data: &[u8]) -> Block {
    let mut padded = data.to_vec();
    let rem = padded.len() % BLOCK_SIZE;
    if rem != 0 {
        padded.resize(padded.len() + BLOCK_SIZE - rem, 0);
    }
    cmac(key, &padded)
}

/// CRC32NK over the new key material sent by ChangeKey
pub(crate) fn crc32nk(data: &[u8]) -> u32 {
    CRC32NK.checksum(data)
}

/// Fresh random bytes from the thread RNG
pub(crate) fn random_bytes<const N: usize>() -> [u8; N] {
    let mut out = [0u8; N];
    rand::rng().fill_bytes(&mut out);
    out
}

/// XOR two blocks
pub(crate) fn xor(a: &Block, b: &Block) -> Block {
    let mut out = [0u8; BLOCK_SIZE];
    for (o, (x, y)) in out.iter_mut().zip(a.iter().zip(b)) {
        *o = x ^ y;
    }
    out
}
