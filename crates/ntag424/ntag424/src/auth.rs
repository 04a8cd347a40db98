//! AuthenticateEV2First mutual authentication

use ntagkit_apdu_core::{CardExecutor, CardTransport, Response, StatusWord};
use subtle::ConstantTimeEq;
use tracing::{debug, instrument, warn};

use crate::commands::{authenticate_ev2_first, authenticate_part2};
use crate::constants::{BLOCK_SIZE, TI_LEN};
use crate::crypto::{self, Block};
use crate::error::AuthError;
use crate::keys::{AesKey, KeyNo, SessionKeys};
use crate::secure_messaging::{SecureSession, TransactionId};

async fn exchange<T: CardTransport>(
    executor: &mut CardExecutor<T>,
    command: &crate::commands::NativeCommand,
) -> Result<Response, AuthError> {
    let apdu = command
        .to_plain()
        .map_err(|_| AuthError::Protocol("authentication frame does not fit a short APDU"))?;
    Ok(executor.transmit(&apdu).await?)
}

fn rejected(slot: KeyNo, status: StatusWord) -> AuthError {
    match status.to_u16() {
        0x91AE => AuthError::BadKey,
        0x9140 => AuthError::NoSuchKey(slot),
        _ => AuthError::Rejected(status),
    }
}

fn block(bytes: &[u8]) -> Result<Block, AuthError> {
    bytes
        .try_into()
        .map_err(|_| AuthError::Protocol("unexpected challenge length"))
}

/// Run the two-pass EV2 handshake with `key` against `slot`
///
/// Returns the fresh session (TI, `CmdCtr = 0`) and the derived session keys.
/// Never retries: a wrong key surfaces as [`AuthError::BadKey`].
#[instrument(skip(executor, key), fields(slot = slot.value()))]
pub(crate) async fn authenticate<T: CardTransport>(
    executor: &mut CardExecutor<T>,
    slot: KeyNo,
    key: &AesKey,
) -> Result<(SecureSession, SessionKeys), AuthError> {
    // Part 1: the tag answers with E(K, RndB)
    let response = exchange(executor, &authenticate_ev2_first(slot)).await?;
    if !response.status().is_additional_frame() {
        warn!(status = %response.status(), "first authentication pass refused");
        return Err(rejected(slot, response.status()));
    }
    if response.payload().len() != BLOCK_SIZE {
        return Err(AuthError::Protocol("encrypted RndB must be one block"));
    }
    let rnd_b = block(
        &crypto::cbc_decrypt_zero_iv(key, response.payload())
            .map_err(|_| AuthError::Protocol("encrypted RndB must be one block"))?,
    )?;

    // Part 2: send E(K, RndA || RndB'), receive E(K, TI || RndA' || PDcap2 || PCDcap2)
    let rnd_a: Block = crypto::random_bytes();
    let mut token = [0u8; 2 * BLOCK_SIZE];
    token[..BLOCK_SIZE].copy_from_slice(&rnd_a);
    token[BLOCK_SIZE..].copy_from_slice(&crypto::rotate_left(&rnd_b));
    let encrypted = crypto::cbc_encrypt_zero_iv(key, &token)
        .map_err(|_| AuthError::Protocol("challenge response is not block aligned"))?;
    let encrypted: [u8; 2 * BLOCK_SIZE] = encrypted
        .try_into()
        .map_err(|_| AuthError::Protocol("challenge response is not block aligned"))?;

    let response = exchange(executor, &authenticate_part2(&encrypted)).await?;
    if !response.status().is_success() {
        warn!(status = %response.status(), "second authentication pass refused");
        return Err(rejected(slot, response.status()));
    }
    if response.payload().len() != 2 * BLOCK_SIZE {
        return Err(AuthError::Protocol("unexpected final authentication frame length"));
    }
    let answer = crypto::cbc_decrypt_zero_iv(key, response.payload())
        .map_err(|_| AuthError::Protocol("unexpected final authentication frame length"))?;

    let mut ti: TransactionId = [0u8; TI_LEN];
    ti.copy_from_slice(&answer[..TI_LEN]);
    let rnd_a_rotated = &answer[TI_LEN..TI_LEN + BLOCK_SIZE];
    if !bool::from(rnd_a_rotated.ct_eq(&crypto::rotate_left(&rnd_a))) {
        warn!("tag failed to prove knowledge of the key");
        return Err(AuthError::BadKey);
    }

    let keys = SessionKeys::derive(key, &rnd_a, &rnd_b);
    debug!(ti = %hex::encode_upper(ti), "authenticated");
    Ok((SecureSession::new(ti, slot), keys))
}

/// Tag-side half of the handshake, used by the simulator
#[cfg(any(test, feature = "simulator"))]
pub(crate) mod picc {
    use super::*;

    /// Encrypted RndB for part 1
    pub(crate) fn challenge(key: &AesKey, rnd_b: &Block) -> Option<Vec<u8>> {
        crypto::cbc_encrypt_zero_iv(key, rnd_b).ok()
    }

    /// Check part 2 and build the final frame; `None` means the reader used another key
    pub(crate) fn respond(
        key: &AesKey,
        rnd_b: &Block,
        frame: &[u8],
        ti: &TransactionId,
    ) -> Option<(Vec<u8>, SessionKeys)> {
        if frame.len() != 2 * BLOCK_SIZE {
            return None;
        }
        let token = crypto::cbc_decrypt_zero_iv(key, frame).ok()?;
        let rnd_a: Block = token[..BLOCK_SIZE].try_into().ok()?;
        if !bool::from(token[BLOCK_SIZE..].ct_eq(&crypto::rotate_left(rnd_b))) {
            return None;
        }
        let mut answer = [0u8; 2 * BLOCK_SIZE];
        answer[..TI_LEN].copy_from_slice(ti);
        answer[TI_LEN..TI_LEN + BLOCK_SIZE].copy_from_slice(&crypto::rotate_left(&rnd_a));
        let encrypted = crypto::cbc_encrypt_zero_iv(key, &answer).ok()?;
        Some((encrypted, SessionKeys::derive(key, &rnd_a, rnd_b)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::simulator::SimulatedTag;

    #[tokio::test]
    async fn test_authenticate_with_factory_key() {
        let tag = SimulatedTag::new();
        let mut executor = CardExecutor::new(tag.transport());
        executor.connect().await.unwrap();

        let (session, keys) = authenticate(&mut executor, KeyNo::MASTER, &AesKey::zero())
            .await
            .unwrap();
        assert_eq!(session.counter(), 0);
        assert_eq!(session.slot(), KeyNo::MASTER);
        assert_eq!(tag.session_keys(), Some(keys));
        assert_eq!(executor.exchanged(), 2);
    }

    #[tokio::test]
    async fn test_wrong_key_is_bad_key() {
        let tag = SimulatedTag::new();
        let mut executor = CardExecutor::new(tag.transport());
        executor.connect().await.unwrap();

        let err = authenticate(&mut executor, KeyNo::MASTER, &AesKey::new([0x01; 16]))
            .await
            .unwrap_err();
        assert!(matches!(err, AuthError::BadKey));
        assert!(!tag.is_authenticated());
    }

    #[tokio::test]
    async fn test_transport_drop_is_transport_error() {
        let tag = SimulatedTag::new();
        tag.drop_after(1);
        let mut executor = CardExecutor::new(tag.transport());
        executor.connect().await.unwrap();

        let err = authenticate(&mut executor, KeyNo::MASTER, &AesKey::zero())
            .await
            .unwrap_err();
        assert!(matches!(err, AuthError::Transport(_)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_silent_tag_times_out() {
        let tag = SimulatedTag::new();
        tag.set_delay(std::time::Duration::from_secs(5));
        let mut executor = CardExecutor::new(tag.transport());
        executor.connect().await.unwrap();

        let err = authenticate(&mut executor, KeyNo::MASTER, &AesKey::zero())
            .await
            .unwrap_err();
        assert!(matches!(err, AuthError::Timeout(d) if d.as_millis() == 1000));
    }
}
