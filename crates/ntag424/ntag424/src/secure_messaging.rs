//! EV2 secure messaging for the authenticated state
//!
//! Command MAC: `MACt(KSesAuthMAC, Cmd || CmdCtr || TI || Header || Data)`.
//! Response MAC: `MACt(KSesAuthMAC, RC || CmdCtr + 1 || TI || RespData)`.
//! Full mode additionally encrypts `Data` / `RespData` with AES-CBC under
//! `KSesAuthENC`, with IVs derived from TI and the counter.

use ntagkit_apdu_core::{CardExecutor, CardTransport, Command, Response};
use subtle::ConstantTimeEq;
use tracing::trace;

use crate::commands::NativeCommand;
use crate::constants::{MAC_T_LEN, TI_LEN};
use crate::crypto::{self, Block};
use crate::keys::{KeyNo, SessionKeys};
use crate::types::CommMode;
use crate::{Error, Result};

const IV_CMD_LABEL: [u8; 2] = [0xA5, 0x5A];
const IV_RESP_LABEL: [u8; 2] = [0x5A, 0xA5];

/// Transaction identifier assigned by the tag
pub type TransactionId = [u8; TI_LEN];

/// State of an authenticated session: TI, command counter and the authenticated slot
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SecureSession {
    ti: TransactionId,
    counter: u16,
    slot: KeyNo,
}

impl SecureSession {
    /// Fresh session with `CmdCtr = 0`
    pub const fn new(ti: TransactionId, slot: KeyNo) -> Self {
        Self { ti, counter: 0, slot }
    }

    /// Transaction identifier
    pub const fn ti(&self) -> &TransactionId {
        &self.ti
    }

    /// Command counter of the next command
    pub const fn counter(&self) -> u16 {
        self.counter
    }

    /// Key slot the session is authenticated with
    pub const fn slot(&self) -> KeyNo {
        self.slot
    }

    /// Commands left before the counter is exhausted
    pub const fn remaining(&self) -> u16 {
        u16::MAX - self.counter
    }

    /// Apply secure messaging for the command's mode
    ///
    /// Fails before anything is sent once the counter cannot advance any more.
    pub(crate) fn wrap(&self, keys: &SessionKeys, command: &NativeCommand) -> Result<Command> {
        if self.counter == u16::MAX {
            return Err(Error::SessionExpired);
        }

        let apdu = match command.mode() {
            CommMode::Plain => command.to_apdu(command.data(), &[]),
            CommMode::Mac => {
                let mac = command_mac(
                    keys,
                    command.ins(),
                    self.counter,
                    &self.ti,
                    command.header(),
                    command.data(),
                );
                command.to_apdu(command.data(), &mac)
            }
            CommMode::Full => {
                let body = if command.data().is_empty() {
                    Vec::new()
                } else {
                    let iv = command_iv(keys, &self.ti, self.counter);
                    crypto::cbc_encrypt_padded(keys.enc(), &iv, command.data())
                };
                let mac = command_mac(
                    keys,
                    command.ins(),
                    self.counter,
                    &self.ti,
                    command.header(),
                    &body,
                );
                command.to_apdu(&body, &mac)
            }
        };

        trace!(
            counter = self.counter,
            ins = command.ins(),
            mode = %command.mode(),
            "wrapped command"
        );
        apdu.map_err(|_| Error::Protocol("secured command does not fit a short APDU"))
    }

    /// Check and strip secure messaging from a response, advancing the counter
    ///
    /// Error statuses are returned as [`Error::Tag`]; the tag drops the
    /// authenticated state on any of them.
    pub(crate) fn unwrap(
        &mut self,
        keys: &SessionKeys,
        mode: CommMode,
        response: Response,
    ) -> Result<Vec<u8>> {
        let (payload, status) = response.into_parts();
        if status.to_u16() != 0x9100 {
            return Err(Error::Tag(status.into()));
        }
        let next = self.counter.checked_add(1).ok_or(Error::SessionExpired)?;

        let data = match mode {
            CommMode::Plain => payload.to_vec(),
            CommMode::Mac | CommMode::Full => {
                if payload.len() < MAC_T_LEN {
                    return Err(Error::Integrity("response MAC missing"));
                }
                let (body, mac) = payload.split_at(payload.len() - MAC_T_LEN);
                let expected = response_mac(keys, 0x00, next, &self.ti, body);
                if !bool::from(expected[..].ct_eq(mac)) {
                    return Err(Error::Integrity("response MAC mismatch"));
                }
                if mode == CommMode::Full && !body.is_empty() {
                    let iv = response_iv(keys, &self.ti, next);
                    crypto::cbc_decrypt_padded(keys.enc(), &iv, body)?
                } else {
                    body.to_vec()
                }
            }
        };

        self.counter = next;
        Ok(data)
    }
}

/// One authenticated exchange path: executor, session state and session keys
#[derive(Debug)]
pub(crate) struct SecureLink<'a, T: CardTransport> {
    executor: &'a mut CardExecutor<T>,
    session: &'a mut SecureSession,
    keys: &'a SessionKeys,
}

impl<'a, T: CardTransport> SecureLink<'a, T> {
    pub(crate) const fn new(
        executor: &'a mut CardExecutor<T>,
        session: &'a mut SecureSession,
        keys: &'a SessionKeys,
    ) -> Self {
        Self { executor, session, keys }
    }

    pub(crate) const fn session(&self) -> &SecureSession {
        &*self.session
    }

    /// Wrap, send, verify
    pub(crate) async fn exchange(&mut self, command: &NativeCommand) -> Result<Vec<u8>> {
        let apdu = self.session.wrap(self.keys, command)?;
        let response = self.executor.transmit(&apdu).await?;
        self.session.unwrap(self.keys, command.mode(), response)
    }

    /// Send a command after which the tag drops the session
    ///
    /// Used for ChangeKey on the authenticated slot: the tag answers a bare
    /// `91 00` without a response MAC.
    pub(crate) async fn exchange_closing(&mut self, command: &NativeCommand) -> Result<()> {
        let apdu = self.session.wrap(self.keys, command)?;
        let (_, status) = self.executor.transmit(&apdu).await?.into_parts();
        if status.to_u16() != 0x9100 {
            return Err(Error::Tag(status.into()));
        }
        self.session.counter = self.session.counter.saturating_add(1);
        Ok(())
    }
}

/// `MACt(KSesAuthMAC, Cmd || CmdCtr || TI || Header || Data)`
pub(crate) fn command_mac(
    keys: &SessionKeys,
    ins: u8,
    counter: u16,
    ti: &TransactionId,
    header: &[u8],
    data: &[u8],
) -> [u8; MAC_T_LEN] {
    let mut input = Vec::with_capacity(7 + header.len() + data.len());
    input.push(ins);
    input.extend_from_slice(&counter.to_le_bytes());
    input.extend_from_slice(ti);
    input.extend_from_slice(header);
    input.extend_from_slice(data);
    crypto::mac_t(keys.mac(), &input)
}

/// `MACt(KSesAuthMAC, RC || CmdCtr || TI || RespData)`, `counter` already advanced
pub(crate) fn response_mac(
    keys: &SessionKeys,
    rc: u8,
    counter: u16,
    ti: &TransactionId,
    data: &[u8],
) -> [u8; MAC_T_LEN] {
    let mut input = Vec::with_capacity(7 + data.len());
    input.push(rc);
    input.extend_from_slice(&counter.to_le_bytes());
    input.extend_from_slice(ti);
    input.extend_from_slice(data);
    crypto::mac_t(keys.mac(), &input)
}

fn iv(keys: &SessionKeys, label: [u8; 2], ti: &TransactionId, counter: u16) -> Block {
    let mut block = [0u8; 16];
    block[0..2].copy_from_slice(&label);
    block[2..6].copy_from_slice(ti);
    block[6..8].copy_from_slice(&counter.to_le_bytes());
    crypto::encrypt_block(keys.enc(), &block)
}

/// `IVc = E(KSesAuthENC, A5 5A || TI || CmdCtr || 0^8)`
pub(crate) fn command_iv(keys: &SessionKeys, ti: &TransactionId, counter: u16) -> Block {
    iv(keys, IV_CMD_LABEL, ti, counter)
}

/// `IVr = E(KSesAuthENC, 5A A5 || TI || CmdCtr + 1 || 0^8)`
pub(crate) fn response_iv(keys: &SessionKeys, ti: &TransactionId, counter: u16) -> Block {
    iv(keys, IV_RESP_LABEL, ti, counter)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::keys::AesKey;
    use hex_literal::hex;
    use ntagkit_apdu_core::StatusWord;

    fn keys() -> SessionKeys {
        SessionKeys::new(
            AesKey::new(hex!("1309C877509E5A215007FF0ED19CA564")),
            AesKey::new(hex!("4C6626F5E72EA694202139295C7A7FC7")),
        )
    }

    const TI: TransactionId = hex!("9D00C4DF");

    fn ok(payload: Vec<u8>) -> Response {
        Response::new(payload, StatusWord::new(0x91, 0x00))
    }

    #[test]
    fn test_mac_mode_layout() {
        let session = SecureSession::new(TI, KeyNo::MASTER);
        let cmd = NativeCommand::new(0xF5, CommMode::Mac).with_header([0x02]);
        let apdu = session.wrap(&keys(), &cmd).unwrap();
        let data = apdu.data.unwrap();
        assert_eq!(data.len(), 1 + MAC_T_LEN);
        assert_eq!(&data[1..], &command_mac(&keys(), 0xF5, 0, &TI, &[0x02], &[]));
    }

    #[test]
    fn test_full_mode_encrypts_with_padding() {
        let session = SecureSession::new(TI, KeyNo::MASTER);
        let cmd = NativeCommand::new(0x8D, CommMode::Full)
            .with_header(hex!("02 000000 100000"))
            .with_data([0x42u8; 16]);
        let apdu = session.wrap(&keys(), &cmd).unwrap();
        let data = apdu.data.unwrap();
        // header, two encrypted blocks (padding always added), MAC
        assert_eq!(data.len(), 7 + 32 + MAC_T_LEN);

        let iv = command_iv(&keys(), &TI, 0);
        let plain = crypto::cbc_decrypt_padded(keys().enc(), &iv, &data[7..39]).unwrap();
        assert_eq!(plain, [0x42u8; 16]);
    }

    #[test]
    fn test_response_verification_advances_counter() {
        let keys = keys();
        let mut session = SecureSession::new(TI, KeyNo::MASTER);

        let body = hex!("00400EE0000100").to_vec();
        let mut payload = body.clone();
        payload.extend_from_slice(&response_mac(&keys, 0x00, 1, &TI, &body));
        assert_eq!(session.unwrap(&keys, CommMode::Mac, ok(payload)).unwrap(), body);
        assert_eq!(session.counter(), 1);

        // Same MAC is stale once the counter moved
        let mut stale = body.clone();
        stale.extend_from_slice(&response_mac(&keys, 0x00, 1, &TI, &body));
        assert!(matches!(
            session.unwrap(&keys, CommMode::Mac, ok(stale)),
            Err(Error::Integrity(_))
        ));
        assert_eq!(session.counter(), 1);
    }

    #[test]
    fn test_full_response_decrypts() {
        let keys = keys();
        let mut session = SecureSession::new(TI, KeyNo::MASTER);
        let iv = response_iv(&keys, &TI, 1);
        let ct = crypto::cbc_encrypt_padded(keys.enc(), &iv, b"settings");
        let mut payload = ct.clone();
        payload.extend_from_slice(&response_mac(&keys, 0x00, 1, &TI, &ct));
        assert_eq!(session.unwrap(&keys, CommMode::Full, ok(payload)).unwrap(), b"settings");
    }

    #[test]
    fn test_error_status_is_surfaced() {
        let mut session = SecureSession::new(TI, KeyNo::MASTER);
        let err = session
            .unwrap(&keys(), CommMode::Mac, Response::error(StatusWord::new(0x91, 0x9D)))
            .unwrap_err();
        assert!(matches!(err, Error::Tag(_)));
        assert_eq!(session.counter(), 0);
    }

    #[test]
    fn test_counter_exhaustion() {
        let mut session = SecureSession::new(TI, KeyNo::MASTER);
        session.counter = u16::MAX;
        let cmd = NativeCommand::new(0xF5, CommMode::Mac).with_header([0x02]);
        assert!(matches!(session.wrap(&keys(), &cmd), Err(Error::SessionExpired)));
        assert_eq!(session.remaining(), 0);
    }
}
