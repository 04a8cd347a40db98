//! Session Manager
//!
//! Owns the executor and the authenticated session for one tag handle:
//!
//! ```text
//! Disconnected -> Authenticating -> Authenticated(Idle | Writing) -> Disconnected
//! ```
//!
//! Any failure, [`SessionManager::disconnect`] and idle expiry go back to
//! `Disconnected` and wipe the session keys. Renewal before a write is the
//! only local recovery.

use std::time::Duration;

use ntagkit_apdu_core::executor::DEFAULT_APDU_TIMEOUT;
use ntagkit_apdu_core::{CancelHandle, CardExecutor, CardTransport};
use serde::{Deserialize, Serialize};
use tokio::time::Instant;
use tracing::{debug, info, instrument, warn};

use crate::auth;
use crate::commands::{
    NativeCommand, SelectMode, additional_frame, get_file_settings, get_version,
    select_application,
};
use crate::config::WritePlan;
use crate::constants::NDEF_FILE_NO;
use crate::error::WriteError;
use crate::keys::{AesKey, KeyNo, KeyStore};
use crate::secure_messaging::{SecureLink, SecureSession};
use crate::types::{CommMode, FileSettings, TagIdentity, VersionInfo};
use crate::writer::{self, Ack, WriteStep};
use crate::{Error, Result};

/// Default idle timeout of an authenticated session
pub const DEFAULT_IDLE_TIMEOUT: Duration = Duration::from_secs(30);
/// Default number of commands kept in reserve below the counter ceiling
pub const DEFAULT_COUNTER_HEADROOM: u16 = 16;

mod millis {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub(super) fn serialize<S: Serializer>(
        duration: &Duration,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(duration.as_millis().try_into().unwrap_or(u64::MAX))
    }

    pub(super) fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}

/// Session Manager configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SessionConfig {
    /// Per-APDU timeout, in milliseconds when serialized
    #[serde(with = "millis")]
    pub apdu_timeout: Duration,
    /// Idle time after which an authenticated session expires
    #[serde(with = "millis")]
    pub idle_timeout: Duration,
    /// Commands kept in reserve below the 16-bit counter ceiling
    pub counter_headroom: u16,
    /// How the NDEF application is selected
    pub select_mode: SelectMode,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            apdu_timeout: DEFAULT_APDU_TIMEOUT,
            idle_timeout: DEFAULT_IDLE_TIMEOUT,
            counter_headroom: DEFAULT_COUNTER_HEADROOM,
            select_mode: SelectMode::default(),
        }
    }
}

impl SessionConfig {
    /// Set the per-APDU timeout
    pub const fn with_apdu_timeout(mut self, timeout: Duration) -> Self {
        self.apdu_timeout = timeout;
        self
    }

    /// Set the idle timeout
    pub const fn with_idle_timeout(mut self, timeout: Duration) -> Self {
        self.idle_timeout = timeout;
        self
    }

    /// Set the counter headroom
    pub const fn with_counter_headroom(mut self, headroom: u16) -> Self {
        self.counter_headroom = headroom;
        self
    }

    /// Set the application select mode
    pub const fn with_select_mode(mut self, mode: SelectMode) -> Self {
        self.select_mode = mode;
        self
    }
}

/// What an authenticated session is doing
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Activity {
    /// Waiting for the next operation
    Idle,
    /// A write sequence is in progress
    Writing,
}

/// Session Manager state
#[derive(Debug, Clone, Copy, PartialEq, Eq, derive_more::Display)]
pub enum SessionState {
    /// No authenticated session
    #[display("disconnected")]
    Disconnected,
    /// Handshake in progress
    #[display("authenticating")]
    Authenticating,
    /// Authenticated session established
    #[display("authenticated ({_0:?})")]
    Authenticated(Activity),
}

impl SessionState {
    /// Whether a session is established
    pub const fn is_authenticated(self) -> bool {
        matches!(self, Self::Authenticated(_))
    }
}

/// Session lifecycle for one tag handle
#[derive(Debug)]
pub struct SessionManager<T: CardTransport> {
    executor: CardExecutor<T>,
    config: SessionConfig,
    state: SessionState,
    keys: KeyStore,
    session: Option<SecureSession>,
    identity: Option<TagIdentity>,
    last_activity: Option<Instant>,
}

impl<T: CardTransport> SessionManager<T> {
    /// Manager over `transport`
    pub fn new(transport: T, config: SessionConfig) -> Self {
        let executor = CardExecutor::new(transport).with_timeout(config.apdu_timeout);
        Self {
            executor,
            config,
            state: SessionState::Disconnected,
            keys: KeyStore::new(),
            session: None,
            identity: None,
            last_activity: None,
        }
    }

    /// Current state
    pub const fn state(&self) -> SessionState {
        self.state
    }

    /// Configuration
    pub const fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// Change how the next connect selects the application
    pub const fn set_select_mode(&mut self, mode: SelectMode) {
        self.config.select_mode = mode;
    }

    /// Identity read on the last connect
    pub const fn identity(&self) -> Option<&TagIdentity> {
        self.identity.as_ref()
    }

    /// Active session
    pub const fn session(&self) -> Option<&SecureSession> {
        self.session.as_ref()
    }

    /// Key Store introspection
    pub const fn keys(&self) -> &KeyStore {
        &self.keys
    }

    /// Tell the store what a slot currently holds on the tag
    pub fn load_key(&mut self, no: KeyNo, key: AesKey, version: u8) {
        self.keys.load(no, key, version);
    }

    /// Executor introspection
    pub const fn executor(&self) -> &CardExecutor<T> {
        &self.executor
    }

    /// Handle aborting the in-flight exchange from another task
    pub fn cancel_handle(&self) -> CancelHandle {
        self.executor.cancel_handle()
    }

    /// Select, read the version and authenticate with `key` on `slot`
    ///
    /// Fails fast with [`Error::AlreadyConnected`] while a session exists.
    #[instrument(skip(self, key), fields(slot = slot.value()))]
    pub async fn connect(&mut self, slot: KeyNo, key: AesKey) -> Result<()> {
        if self.state != SessionState::Disconnected {
            return Err(Error::AlreadyConnected);
        }
        self.executor.reset_cancellation();
        self.state = SessionState::Authenticating;

        match self.establish(slot, key).await {
            Ok(()) => {
                let uid = self.identity.as_ref().map(|identity| identity.uid);
                info!(uid = ?uid, "session established");
                Ok(())
            }
            Err(e) => {
                self.teardown();
                Err(e)
            }
        }
    }

    async fn establish(&mut self, slot: KeyNo, key: AesKey) -> Result<()> {
        self.executor.connect().await?;
        self.select().await?;
        let version = self.read_version().await?;
        self.identity = Some(TagIdentity::new(version));
        self.authenticate(slot, key).await
    }

    async fn authenticate(&mut self, slot: KeyNo, key: AesKey) -> Result<()> {
        let (session, session_keys) = auth::authenticate(&mut self.executor, slot, &key).await?;
        let version = self.keys.version(slot);
        self.keys.load(slot, key, version);
        self.keys.install_session(session_keys);
        self.session = Some(session);
        self.executor.set_redacted(true);
        self.state = SessionState::Authenticated(Activity::Idle);
        self.touch();
        Ok(())
    }

    async fn select(&mut self) -> Result<()> {
        let response = self.executor.transmit(&select_application(self.config.select_mode)).await?;
        if response.status().to_u16() != 0x9000 {
            return Err(Error::Tag(response.status().into()));
        }
        Ok(())
    }

    async fn plain(&mut self, command: &NativeCommand) -> Result<ntagkit_apdu_core::Response> {
        let apdu = command
            .to_plain()
            .map_err(|_| Error::Protocol("command does not fit a short APDU"))?;
        Ok(self.executor.transmit(&apdu).await?)
    }

    async fn read_version(&mut self) -> Result<VersionInfo> {
        let mut frames = Vec::with_capacity(3);
        let mut response = self.plain(&get_version()).await?;
        while response.status().is_additional_frame() {
            if frames.len() == 2 {
                return Err(Error::Protocol("GetVersion sent more than three frames"));
            }
            frames.push(response.payload().clone());
            response = self.plain(&additional_frame()).await?;
        }
        if response.status().to_u16() != 0x9100 {
            return Err(Error::Tag(response.status().into()));
        }
        frames.push(response.payload().clone());
        let [hardware, software, production] = frames.as_slice() else {
            return Err(Error::Protocol("GetVersion sent fewer than three frames"));
        };
        VersionInfo::parse(hardware, software, production)
            .ok_or(Error::Protocol("malformed GetVersion answer"))
    }

    /// Version and NDEF file settings
    ///
    /// Served from the session when authenticated, without authenticating
    /// otherwise.
    #[instrument(skip(self))]
    pub async fn identify(&mut self) -> Result<(TagIdentity, FileSettings)> {
        if self.state.is_authenticated() {
            let settings = self.read_file_settings(NDEF_FILE_NO).await?;
            let identity = self.identity.clone().ok_or(Error::NotAuthenticated)?;
            return Ok((identity, settings));
        }
        if self.state != SessionState::Disconnected {
            return Err(Error::Busy);
        }

        self.executor.reset_cancellation();
        let (identity, settings) = self.read_identity().await?;
        debug!(uid = %identity.uid, "tag identified");
        self.identity = Some(identity.clone());
        Ok((identity, settings))
    }

    async fn read_identity(&mut self) -> Result<(TagIdentity, FileSettings)> {
        self.executor.connect().await?;
        self.select().await?;
        let identity = TagIdentity::new(self.read_version().await?);
        let response = self.plain(&get_file_settings(NDEF_FILE_NO, CommMode::Plain)).await?;
        if response.status().to_u16() != 0x9100 {
            return Err(Error::Tag(response.status().into()));
        }
        Ok((identity, FileSettings::decode(response.payload())?))
    }

    /// Read back file settings over the session, e.g. after a partial write
    #[instrument(skip(self))]
    pub async fn read_file_settings(&mut self, file_no: u8) -> Result<FileSettings> {
        let data = self.secured(&get_file_settings(file_no, CommMode::Mac)).await?;
        Ok(FileSettings::decode(&data)?)
    }

    async fn secured(&mut self, command: &NativeCommand) -> Result<Vec<u8>> {
        self.renew_if_due(1).await?;
        let (Some(session), Some(keys)) = (self.session.as_mut(), self.keys.session()) else {
            return Err(Error::NotAuthenticated);
        };
        let result = SecureLink::new(&mut self.executor, session, keys).exchange(command).await;
        match result {
            Ok(data) => {
                self.touch();
                Ok(data)
            }
            Err(e) => {
                self.teardown();
                Err(e)
            }
        }
    }

    /// Apply `plan` in one session
    ///
    /// Renews the session first when it idled out or the counter has too
    /// little room left for the plan. Any failure ends the session.
    #[instrument(skip_all, fields(file = plan.file_no))]
    pub async fn write(&mut self, plan: &WritePlan) -> Result<Ack> {
        self.renew_if_due(plan.command_count()).await?;
        let (Some(session), Some(keys)) = (self.session.as_mut(), self.keys.session()) else {
            return Err(Error::NotAuthenticated);
        };
        self.state = SessionState::Authenticated(Activity::Writing);

        let mut link = SecureLink::new(&mut self.executor, session, keys);
        let result = writer::write(&mut link, &self.keys, plan).await;
        match result {
            Ok(ack) => {
                self.record_key_changes(plan, &ack.steps);
                if ack.session_ended {
                    info!("authenticated key changed, session closed by the tag");
                    self.teardown();
                } else {
                    self.state = SessionState::Authenticated(Activity::Idle);
                    self.touch();
                }
                Ok(ack)
            }
            Err(e) => {
                if let Error::Write(WriteError::PartialApply { completed, .. }) = &e {
                    self.record_key_changes(plan, completed);
                }
                self.teardown();
                Err(e)
            }
        }
    }

    /// Track every key change the tag acknowledged, bumping the slot version
    fn record_key_changes(&mut self, plan: &WritePlan, acknowledged: &[WriteStep]) {
        for change in &plan.key_changes {
            if acknowledged.contains(&WriteStep::ChangeKey(change.no)) {
                let version = self.keys.version(change.no).wrapping_add(1);
                debug!(key = change.no.value(), version, "key change applied");
                self.keys.load(change.no, change.key.clone(), version);
            }
        }
    }

    /// Whether the session idled out
    fn idle_expired(&self) -> bool {
        self.last_activity
            .is_some_and(|last| last.elapsed() >= self.config.idle_timeout)
    }

    /// Re-authenticate with the retained key when the session cannot carry `needed` more commands
    async fn renew_if_due(&mut self, needed: usize) -> Result<()> {
        let Some(session) = &self.session else {
            return Err(Error::NotAuthenticated);
        };
        let reserve = usize::from(self.config.counter_headroom) + needed;
        let exhausted = usize::from(session.remaining()) < reserve;
        if !exhausted && !self.idle_expired() {
            return Ok(());
        }

        let slot = session.slot();
        info!(counter = session.counter(), exhausted, "renewing session");
        let key = self.keys.key(slot);
        self.keys.clear_session();
        self.session = None;
        self.state = SessionState::Authenticating;
        if let Err(e) = self.authenticate(slot, key).await {
            self.teardown();
            return Err(e);
        }
        let remaining = self.session.as_ref().map_or(0, SecureSession::remaining);
        if usize::from(remaining) < needed {
            warn!(needed, remaining, "sequence does not fit one session");
            self.teardown();
            return Err(Error::SessionExpired);
        }
        Ok(())
    }

    /// Drop the session if it idled out; returns whether it did
    pub fn expire_if_due(&mut self) -> bool {
        if self.state.is_authenticated() && self.idle_expired() {
            info!("session idle timeout");
            self.teardown();
            true
        } else {
            false
        }
    }

    /// End the session, wipe all keys and release the transport
    #[instrument(skip(self))]
    pub async fn disconnect(&mut self) -> Result<()> {
        self.teardown();
        self.keys.clear();
        self.identity = None;
        if let Err(e) = self.executor.reset().await {
            warn!(error = %e, "transport reset failed");
            return Err(e.into());
        }
        debug!("disconnected");
        Ok(())
    }

    fn touch(&mut self) {
        self.last_activity = Some(Instant::now());
    }

    /// Back to `Disconnected`, wiping the session keys
    fn teardown(&mut self) {
        self.keys.clear_session();
        self.session = None;
        self.last_activity = None;
        self.executor.set_redacted(false);
        self.state = SessionState::Disconnected;
    }
}
