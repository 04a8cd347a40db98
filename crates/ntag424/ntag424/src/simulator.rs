//! In-memory NTAG 424 DNA
//!
//! [`SimulatedTag`] runs the PICC side of the protocol: application select,
//! GetVersion, AuthenticateEV2First, secure messaging for ChangeFileSettings,
//! GetFileSettings, WriteData and ChangeKey, and SDM mirroring on [`SimulatedTag::tap`].
//! Faults can be injected to exercise the error paths.
//!
//! Clones share state, so a test keeps one handle for introspection while the
//! [`SimulatorTransport`] drives the other.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use ntagkit_apdu_core::{Bytes, CardTransport, Command, TransportError};
use parking_lot::Mutex;
use subtle::ConstantTimeEq;
use tracing::{debug, trace};

use crate::auth::picc;
use crate::constants::{
    CC_FILE_NO, CLA_ISO, CLA_NATIVE, KEY_COUNT, MAC_T_LEN, NDEF_APP_DF_NAME, NDEF_APP_FILE_ID,
    NDEF_FILE_NO, NDEF_FILE_SIZE, PROPRIETARY_FILE_NO, SDM_COUNTER_MAX, UID_LEN, ins,
};
use crate::crypto::{self, Block};
use crate::error::SdmError;
use crate::keys::{AesKey, KeyNo, SessionKeys};
use crate::sdm::{self, SdmKeys, SdmLayout, SdmTemplate};
use crate::secure_messaging::{TransactionId, command_iv, command_mac, response_iv, response_mac};
use crate::types::{
    AccessCondition, AccessRights, CommMode, ComponentVersion, FileSettings, Uid, VersionInfo,
};

/// Native status codes (`91 xx`)
mod status {
    pub(super) const OK: u8 = 0x00;
    pub(super) const ADDITIONAL_FRAME: u8 = 0xAF;
    pub(super) const AUTHENTICATION_ERROR: u8 = 0xAE;
    pub(super) const LENGTH_ERROR: u8 = 0x7E;
    pub(super) const PERMISSION_DENIED: u8 = 0x9D;
    pub(super) const PARAMETER_ERROR: u8 = 0x9E;
    pub(super) const NO_SUCH_KEY: u8 = 0x40;
    pub(super) const BOUNDARY_ERROR: u8 = 0xBE;
    pub(super) const INTEGRITY_ERROR: u8 = 0x1E;
    pub(super) const FILE_NOT_FOUND: u8 = 0xF0;
    pub(super) const ILLEGAL_COMMAND: u8 = 0x1C;
}

#[derive(Debug, Clone)]
struct SimFile {
    settings: FileSettings,
    data: Vec<u8>,
}

impl SimFile {
    fn new(comm_mode: CommMode, access: AccessRights, size: usize) -> Self {
        Self {
            settings: FileSettings::new(comm_mode, access, size as u32),
            data: vec![0u8; size],
        }
    }
}

#[derive(Debug)]
struct PiccSession {
    slot: KeyNo,
    ti: TransactionId,
    counter: u16,
    keys: SessionKeys,
}

#[derive(Debug)]
struct TagState {
    version: VersionInfo,
    keys: [AesKey; KEY_COUNT],
    key_versions: [u8; KEY_COUNT],
    files: BTreeMap<u8, SimFile>,
    read_counter: u32,

    selected: bool,
    pending_auth: Option<(KeyNo, Block)>,
    pending_version: Option<usize>,
    session: Option<PiccSession>,

    received: u64,
    drop_after: Option<usize>,
    skew_after: Option<(usize, u16)>,
    skew: u16,
    delay: Option<Duration>,
}

fn factory_version(uid: Uid) -> VersionInfo {
    VersionInfo {
        hardware: ComponentVersion {
            vendor: 0x04,
            kind: 0x04,
            subtype: 0x02,
            major: 0x30,
            minor: 0x00,
            storage: 0x11,
            protocol: 0x05,
        },
        software: ComponentVersion {
            vendor: 0x04,
            kind: 0x04,
            subtype: 0x02,
            major: 0x01,
            minor: 0x02,
            storage: 0x11,
            protocol: 0x05,
        },
        uid,
        batch: [0xCF, 0x39, 0x41, 0xB2, 0x80],
        fab_week: 0x14,
        fab_year: 0x21,
    }
}

impl TagState {
    fn new(uid: Uid) -> Self {
        let key = |no| AccessCondition::Key(KeyNo::new(no).unwrap_or(KeyNo::MASTER));
        let mut files = BTreeMap::new();
        files.insert(
            CC_FILE_NO,
            SimFile::new(
                CommMode::Plain,
                AccessRights {
                    read: AccessCondition::Free,
                    write: key(0),
                    read_write: key(0),
                    change: key(0),
                },
                32,
            ),
        );
        files.insert(
            NDEF_FILE_NO,
            SimFile::new(
                CommMode::Plain,
                AccessRights {
                    read: AccessCondition::Free,
                    write: AccessCondition::Free,
                    read_write: AccessCondition::Free,
                    change: key(0),
                },
                NDEF_FILE_SIZE,
            ),
        );
        files.insert(
            PROPRIETARY_FILE_NO,
            SimFile::new(
                CommMode::Full,
                AccessRights {
                    read: key(2),
                    write: key(3),
                    read_write: key(3),
                    change: key(0),
                },
                128,
            ),
        );

        Self {
            version: factory_version(uid),
            keys: std::array::from_fn(|_| AesKey::zero()),
            key_versions: [0; KEY_COUNT],
            files,
            read_counter: 0,
            selected: false,
            pending_auth: None,
            pending_version: None,
            session: None,
            received: 0,
            drop_after: None,
            skew_after: None,
            skew: 0,
            delay: None,
        }
    }

    fn leave_field(&mut self) {
        self.selected = false;
        self.pending_auth = None;
        self.pending_version = None;
        self.session = None;
    }

    fn process(&mut self, raw: &[u8]) -> Result<Bytes, TransportError> {
        self.received += 1;
        if let Some(left) = self.drop_after.as_mut() {
            if *left == 0 {
                debug!("simulated tag left the field");
                self.leave_field();
                return Err(TransportError::NoTag);
            }
            *left -= 1;
        }
        if let Some((left, by)) = self.skew_after.as_mut() {
            if *left == 0 {
                self.skew = *by;
                self.skew_after = None;
            } else {
                *left -= 1;
            }
        }

        let Ok(command) = Command::from_bytes(raw) else {
            return Ok(iso(0x67, 0x00));
        };
        let data = command.data.as_deref().unwrap_or_default();
        trace!(ins = command.ins, len = data.len(), "simulated tag received");

        let response = match (command.cla, command.ins) {
            (CLA_ISO, ins::SELECT) => self.select(command.p1, data),
            (CLA_NATIVE, ins::GET_VERSION) => {
                self.pending_auth = None;
                self.pending_version = Some(1);
                native(status::ADDITIONAL_FRAME, &self.version.to_frames()[0])
            }
            (CLA_NATIVE, ins::AUTHENTICATE_EV2_FIRST) => self.authenticate_first(data),
            (CLA_NATIVE, ins::ADDITIONAL_FRAME) => self.additional_frame(data),
            (
                CLA_NATIVE,
                cmd @ (ins::CHANGE_FILE_SETTINGS
                | ins::GET_FILE_SETTINGS
                | ins::WRITE_DATA
                | ins::CHANGE_KEY),
            ) => {
                self.pending_auth = None;
                self.pending_version = None;
                self.secured(cmd, data)
            }
            (CLA_NATIVE, _) => native(status::ILLEGAL_COMMAND, &[]),
            _ => iso(0x6E, 0x00),
        };
        Ok(response)
    }

    fn select(&mut self, p1: u8, data: &[u8]) -> Bytes {
        let found = match p1 {
            0x04 => data == NDEF_APP_DF_NAME,
            0x00 => data == NDEF_APP_FILE_ID,
            _ => false,
        };
        self.session = None;
        self.pending_auth = None;
        self.pending_version = None;
        if found {
            self.selected = true;
            iso(0x90, 0x00)
        } else {
            iso(0x6A, 0x82)
        }
    }

    fn authenticate_first(&mut self, data: &[u8]) -> Bytes {
        self.session = None;
        self.pending_version = None;
        let [no, _cap, ..] = *data else {
            return native(status::LENGTH_ERROR, &[]);
        };
        let Ok(slot) = KeyNo::new(no) else {
            return native(status::NO_SUCH_KEY, &[]);
        };
        let rnd_b: Block = crypto::random_bytes();
        match picc::challenge(&self.keys[usize::from(slot.value())], &rnd_b) {
            Some(challenge) => {
                self.pending_auth = Some((slot, rnd_b));
                native(status::ADDITIONAL_FRAME, &challenge)
            }
            None => native(status::INTEGRITY_ERROR, &[]),
        }
    }

    fn additional_frame(&mut self, data: &[u8]) -> Bytes {
        if let Some((slot, rnd_b)) = self.pending_auth.take() {
            let ti: TransactionId = crypto::random_bytes();
            return match picc::respond(&self.keys[usize::from(slot.value())], &rnd_b, data, &ti) {
                Some((frame, keys)) => {
                    debug!(slot = slot.value(), "simulated tag authenticated");
                    self.session = Some(PiccSession { slot, ti, counter: 0, keys });
                    native(status::OK, &frame)
                }
                None => native(status::AUTHENTICATION_ERROR, &[]),
            };
        }
        if let Some(frame) = self.pending_version.take() {
            let frames = self.version.to_frames();
            return if frame + 1 < frames.len() {
                self.pending_version = Some(frame + 1);
                native(status::ADDITIONAL_FRAME, &frames[frame])
            } else {
                native(status::OK, &frames[frame])
            };
        }
        native(status::ILLEGAL_COMMAND, &[])
    }

    fn header_len(cmd: u8) -> usize {
        if cmd == ins::WRITE_DATA { 7 } else { 1 }
    }

    fn command_mode(&self, cmd: u8, header: &[u8], slot: Option<KeyNo>) -> Result<CommMode, u8> {
        match cmd {
            ins::CHANGE_FILE_SETTINGS | ins::CHANGE_KEY => Ok(CommMode::Full),
            ins::GET_FILE_SETTINGS => Ok(if slot.is_some() {
                CommMode::Mac
            } else {
                CommMode::Plain
            }),
            _ => {
                let file = self.files.get(&header[0]).ok_or(status::FILE_NOT_FOUND)?;
                file.settings.write_comm_mode(slot).ok_or(status::PERMISSION_DENIED)
            }
        }
    }

    fn secured(&mut self, cmd: u8, data: &[u8]) -> Bytes {
        let header_len = Self::header_len(cmd);
        if data.len() < header_len {
            self.session = None;
            return native(status::LENGTH_ERROR, &[]);
        }
        let (header, rest) = data.split_at(header_len);
        let slot = self.session.as_ref().map(|session| session.slot);

        let mode = match self.command_mode(cmd, header, slot) {
            Ok(mode) => mode,
            Err(code) => return self.fail(code),
        };
        if mode != CommMode::Plain && slot.is_none() {
            return native(status::AUTHENTICATION_ERROR, &[]);
        }

        let body = match &self.session {
            Some(session) if mode != CommMode::Plain => unprotect(session, cmd, mode, header, rest),
            _ => Ok(rest.to_vec()),
        };
        let body = match body {
            Ok(body) => body,
            Err(code) => return self.fail(code),
        };

        let result = match cmd {
            ins::CHANGE_FILE_SETTINGS => self.change_file_settings(header[0], &body, slot),
            ins::GET_FILE_SETTINGS => self.get_file_settings(header[0]),
            ins::WRITE_DATA => self.write_data(header, &body),
            _ => self.change_key(header[0], &body, slot),
        };
        let answer = match result {
            Ok(answer) => answer,
            Err(code) => return self.fail(code),
        };

        let closing =
            cmd == ins::CHANGE_KEY && slot.is_some_and(|slot| slot.value() == header[0] & 0x0F);
        let Some(session) = self.session.as_mut() else {
            return native(status::OK, &answer);
        };
        session.counter = session.counter.wrapping_add(1);
        if closing {
            self.session = None;
            return native(status::OK, &[]);
        }
        if mode == CommMode::Plain {
            return native(status::OK, &answer);
        }

        let counter = session.counter.wrapping_add(self.skew);
        let mut payload = if mode == CommMode::Full && !answer.is_empty() {
            let iv = response_iv(&session.keys, &session.ti, counter);
            crypto::cbc_encrypt_padded(session.keys.enc(), &iv, &answer)
        } else {
            answer
        };
        let mac = response_mac(&session.keys, status::OK, counter, &session.ti, &payload);
        payload.extend_from_slice(&mac);
        native(status::OK, &payload)
    }

    /// Error status; the tag drops the authenticated state on every one
    fn fail(&mut self, code: u8) -> Bytes {
        debug!(status = format_args!("91{code:02X}"), "simulated tag rejected command");
        self.session = None;
        native(code, &[])
    }

    fn change_file_settings(
        &mut self,
        file_no: u8,
        data: &[u8],
        slot: Option<KeyNo>,
    ) -> Result<Vec<u8>, u8> {
        let file = self.files.get_mut(&file_no).ok_or(status::FILE_NOT_FOUND)?;
        if !file.settings.access.change.grants(slot) {
            return Err(status::PERMISSION_DENIED);
        }
        file.settings = FileSettings::decode_change(data, &file.settings)
            .map_err(|_| status::PARAMETER_ERROR)?;
        Ok(Vec::new())
    }

    fn get_file_settings(&self, file_no: u8) -> Result<Vec<u8>, u8> {
        let file = self.files.get(&file_no).ok_or(status::FILE_NOT_FOUND)?;
        Ok(file.settings.encode_get())
    }

    fn write_data(&mut self, header: &[u8], data: &[u8]) -> Result<Vec<u8>, u8> {
        let offset = u32::from_le_bytes([header[1], header[2], header[3], 0]) as usize;
        let len = u32::from_le_bytes([header[4], header[5], header[6], 0]) as usize;
        if len != data.len() {
            return Err(status::LENGTH_ERROR);
        }
        let file = self.files.get_mut(&header[0]).ok_or(status::FILE_NOT_FOUND)?;
        let target = file.data.get_mut(offset..offset + len).ok_or(status::BOUNDARY_ERROR)?;
        target.copy_from_slice(data);
        Ok(Vec::new())
    }

    fn change_key(&mut self, header: u8, data: &[u8], slot: Option<KeyNo>) -> Result<Vec<u8>, u8> {
        let no = KeyNo::new(header & 0x0F).map_err(|_| status::NO_SUCH_KEY)?;
        if slot != Some(KeyNo::MASTER) {
            return Err(status::PERMISSION_DENIED);
        }
        let index = usize::from(no.value());
        let new: Block = if slot == Some(no) {
            let [key @ .., version] = data else {
                return Err(status::LENGTH_ERROR);
            };
            let key: Block = key.try_into().map_err(|_| status::LENGTH_ERROR)?;
            self.key_versions[index] = *version;
            key
        } else {
            if data.len() != 21 {
                return Err(status::LENGTH_ERROR);
            }
            let diff: Block = data[..16].try_into().map_err(|_| status::LENGTH_ERROR)?;
            let new = crypto::xor(&diff, self.keys[index].as_bytes());
            let crc = u32::from_le_bytes([data[17], data[18], data[19], data[20]]);
            if crc != crypto::crc32nk(&new) {
                return Err(status::INTEGRITY_ERROR);
            }
            self.key_versions[index] = data[16];
            new
        };
        self.keys[index] = AesKey::new(new);
        Ok(Vec::new())
    }

    fn tap(&mut self) -> Result<Vec<u8>, SdmError> {
        let file = self
            .files
            .get(&NDEF_FILE_NO)
            .ok_or(SdmError::Malformed("no NDEF file"))?;
        let Some(sdm_settings) = &file.settings.sdm else {
            return Ok(file.data.clone());
        };
        if self.read_counter >= SDM_COUNTER_MAX {
            return Err(SdmError::Malformed("read counter exhausted"));
        }
        self.read_counter += 1;

        let key = |condition: AccessCondition| match condition {
            AccessCondition::Key(no) => Some(self.keys[usize::from(no.value())].clone()),
            _ => None,
        };
        let keys = SdmKeys {
            meta_read: key(sdm_settings.access.meta_read),
            file_read: key(sdm_settings.access.file_read),
        };
        let layout = SdmLayout::from_settings(sdm_settings, UID_LEN);
        let template = SdmTemplate::new(file.data.clone(), layout)?;
        sdm::encode(&template, self.read_counter, &self.version.uid, &keys)
    }
}

/// Check the command MAC and decrypt full-mode data
fn unprotect(
    session: &PiccSession,
    cmd: u8,
    mode: CommMode,
    header: &[u8],
    rest: &[u8],
) -> Result<Vec<u8>, u8> {
    if rest.len() < MAC_T_LEN {
        return Err(status::LENGTH_ERROR);
    }
    let (body, mac) = rest.split_at(rest.len() - MAC_T_LEN);
    let expected = command_mac(&session.keys, cmd, session.counter, &session.ti, header, body);
    if !bool::from(expected[..].ct_eq(mac)) {
        return Err(status::INTEGRITY_ERROR);
    }
    if mode == CommMode::Full && !body.is_empty() {
        let iv = command_iv(&session.keys, &session.ti, session.counter);
        crypto::cbc_decrypt_padded(session.keys.enc(), &iv, body)
            .map_err(|_| status::INTEGRITY_ERROR)
    } else {
        Ok(body.to_vec())
    }
}

fn native(code: u8, payload: &[u8]) -> Bytes {
    let mut out = Vec::with_capacity(payload.len() + 2);
    out.extend_from_slice(payload);
    out.extend_from_slice(&[0x91, code]);
    Bytes::from(out)
}

fn iso(sw1: u8, sw2: u8) -> Bytes {
    Bytes::copy_from_slice(&[sw1, sw2])
}

/// A simulated tag with factory keys and file layout
#[derive(Debug, Clone)]
pub struct SimulatedTag {
    state: Arc<Mutex<TagState>>,
}

impl Default for SimulatedTag {
    fn default() -> Self {
        Self::new()
    }
}

impl SimulatedTag {
    /// Factory-fresh tag with UID `04 8D 58 D2 14 22 90`
    pub fn new() -> Self {
        Self::with_uid(Uid::from_array([0x04, 0x8D, 0x58, 0xD2, 0x14, 0x22, 0x90]))
    }

    /// Factory-fresh tag with the given 7-byte UID
    pub fn with_uid(uid: Uid) -> Self {
        Self {
            state: Arc::new(Mutex::new(TagState::new(uid))),
        }
    }

    /// Set a key as if it had been provisioned earlier
    pub fn set_key(&self, no: KeyNo, key: AesKey, version: u8) {
        let mut state = self.state.lock();
        state.keys[usize::from(no.value())] = key;
        state.key_versions[usize::from(no.value())] = version;
    }

    /// Transport bound to this tag
    pub fn transport(&self) -> SimulatorTransport {
        SimulatorTransport {
            tag: self.clone(),
            connected: false,
        }
    }

    /// Answer `n` more commands, then leave the field
    pub fn drop_after(&self, n: usize) {
        self.state.lock().drop_after = Some(n);
    }

    /// Stay in the field
    pub fn keep_in_field(&self) {
        self.state.lock().drop_after = None;
    }

    /// Delay every answer
    pub fn set_delay(&self, delay: Duration) {
        self.state.lock().delay = Some(delay);
    }

    /// After `n` more commands, MAC responses with the counter shifted by `by`
    pub fn skew_counter_after(&self, n: usize, by: u16) {
        self.state.lock().skew_after = Some((n, by));
    }

    /// Commands received so far, including dropped ones
    pub fn apdu_count(&self) -> u64 {
        self.state.lock().received
    }

    /// Whether the NDEF application is selected
    pub fn is_selected(&self) -> bool {
        self.state.lock().selected
    }

    /// Whether the tag holds an authenticated session
    pub fn is_authenticated(&self) -> bool {
        self.state.lock().session.is_some()
    }

    /// Current settings of a file
    pub fn file_settings(&self, file_no: u8) -> Option<FileSettings> {
        self.state.lock().files.get(&file_no).map(|file| file.settings.clone())
    }

    /// Current contents of a file
    pub fn file_data(&self, file_no: u8) -> Vec<u8> {
        self.state
            .lock()
            .files
            .get(&file_no)
            .map(|file| file.data.clone())
            .unwrap_or_default()
    }

    /// Version of a stored key
    pub fn key_version(&self, no: KeyNo) -> u8 {
        self.state.lock().key_versions[usize::from(no.value())]
    }

    /// SDM read counter
    pub fn read_counter(&self) -> u32 {
        self.state.lock().read_counter
    }

    /// Read the NDEF file as a phone would, with SDM mirrors applied
    pub fn tap(&self) -> Result<Vec<u8>, SdmError> {
        self.state.lock().tap()
    }

    /// Key stored in slot `no`
    pub fn key(&self, no: KeyNo) -> AesKey {
        self.state.lock().keys[usize::from(no.value())].clone()
    }

    #[cfg(test)]
    pub(crate) fn session_keys(&self) -> Option<SessionKeys> {
        self.state.lock().session.as_ref().map(|session| session.keys.clone())
    }
}

/// [`CardTransport`] over a [`SimulatedTag`]
#[derive(Debug, Clone)]
pub struct SimulatorTransport {
    tag: SimulatedTag,
    connected: bool,
}

#[async_trait]
impl CardTransport for SimulatorTransport {
    type Error = TransportError;

    async fn connect(&mut self) -> Result<(), Self::Error> {
        self.connected = true;
        Ok(())
    }

    async fn do_transmit_raw(&mut self, command: &[u8]) -> Result<Bytes, Self::Error> {
        if !self.connected {
            return Err(TransportError::Connection);
        }
        // The lock is never held across the sleep
        let delay = self.tag.state.lock().delay;
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        self.tag.state.lock().process(command)
    }

    fn is_connected(&self) -> bool {
        self.connected
    }

    async fn reset(&mut self) -> Result<(), Self::Error> {
        self.tag.state.lock().leave_field();
        self.connected = false;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::authenticate;
    use crate::commands::{get_file_settings, get_version};
    use hex_literal::hex;
    use ntagkit_apdu_core::{ApduCommand, CardExecutor};

    #[tokio::test]
    async fn test_select_and_version() {
        let tag = SimulatedTag::new();
        let mut transport = tag.transport();
        transport.connect().await.unwrap();

        assert_eq!(
            transport
                .transmit_raw(&hex!("00 A4 04 0C 07 D2760000850101 00"))
                .await
                .unwrap()
                .as_ref(),
            &hex!("9000")
        );
        let version = get_version().to_plain().unwrap().to_bytes();
        let first = transport.transmit_raw(&version).await.unwrap();
        assert_eq!(&first[first.len() - 2..], &hex!("91AF"));
        let second = transport.transmit_raw(&hex!("90 AF 00 00 00")).await.unwrap();
        assert_eq!(&second[second.len() - 2..], &hex!("91AF"));
        let third = transport.transmit_raw(&hex!("90 AF 00 00 00")).await.unwrap();
        assert_eq!(&third[..7], &hex!("048D58D2142290"));
        assert_eq!(&third[third.len() - 2..], &hex!("9100"));
        assert!(tag.is_selected());
    }

    #[tokio::test]
    async fn test_unknown_application() {
        let tag = SimulatedTag::new();
        let mut transport = tag.transport();
        assert!(matches!(
            transport.transmit_raw(&hex!("90 60 00 00 00")).await,
            Err(TransportError::Connection)
        ));
        transport.connect().await.unwrap();
        let answer = transport.transmit_raw(&hex!("00 A4 00 0C 02 E111 00")).await.unwrap();
        assert_eq!(answer.as_ref(), &hex!("6A82"));
    }

    #[tokio::test]
    async fn test_unauthenticated_file_settings_are_plain() {
        let tag = SimulatedTag::new();
        let mut executor = CardExecutor::new(tag.transport());
        executor.connect().await.unwrap();
        executor.transmit_raw(&hex!("00 A4 00 0C 02 E110 00")).await.unwrap();

        let command = get_file_settings(NDEF_FILE_NO, CommMode::Plain).to_plain().unwrap();
        let response = executor.transmit(&command).await.unwrap();
        let settings = FileSettings::decode(response.payload()).unwrap();
        assert_eq!(settings.file_size, 256);
        assert_eq!(settings.access.write, AccessCondition::Free);
    }

    #[tokio::test]
    async fn test_mac_failure_drops_session() {
        let tag = SimulatedTag::new();
        let mut executor = CardExecutor::new(tag.transport());
        executor.connect().await.unwrap();
        executor.transmit_raw(&hex!("00 A4 00 0C 02 E110 00")).await.unwrap();
        authenticate(&mut executor, KeyNo::MASTER, &AesKey::zero()).await.unwrap();
        assert!(tag.is_authenticated());

        // GetFileSettings with a garbage MAC
        let answer = executor
            .transmit_raw(&hex!("90 F5 00 00 09 02 0001020304050607 00"))
            .await
            .unwrap();
        assert_eq!(answer.as_ref(), &hex!("911E"));
        assert!(!tag.is_authenticated());
    }

    #[test]
    fn test_tap_without_sdm_returns_file() {
        let tag = SimulatedTag::new();
        assert_eq!(tag.tap().unwrap(), vec![0u8; 256]);
        assert_eq!(tag.read_counter(), 0);
    }
}
