//! Service facade for the UI layer
//!
//! [`Ntag424Service`] wraps one [`SessionManager`] behind an async mutex.
//! Calls never queue: a call arriving while another owns the tag handle fails
//! with [`Error::Busy`].

use ntagkit_apdu_core::{CancelHandle, CardTransport};
use serde::Serialize;
use tokio::sync::{Mutex, MutexGuard};
use tracing::{info, instrument};

use crate::config::Ntag424Config;
use crate::keys::{AesKey, KeyNo};
use crate::session::{SessionConfig, SessionManager, SessionState};
use crate::types::{AccessCondition, CommMode, FileSettings, TagIdentity};
use crate::writer::Ack;
use crate::{Error, Result};

/// Feature flags shown next to a scanned tag
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Capabilities {
    /// Secure Unique NFC
    pub sun: bool,
    /// Secure Dynamic Messaging
    pub sdm: bool,
    /// AES-128 mutual authentication
    pub aes: bool,
    /// Application select by DF name
    pub virtual_card: bool,
}

impl Capabilities {
    /// Everything an NTAG 424 DNA supports
    pub const NTAG424_DNA: Self = Self {
        sun: true,
        sdm: true,
        aes: true,
        virtual_card: true,
    };
}

/// Plain data object handed to the UI per scanned tag
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TagInfo {
    /// UID, colon separated
    pub uid: String,
    /// Product name
    #[serde(rename = "type")]
    pub tag_type: String,
    /// User memory in bytes
    pub memory_size: usize,
    /// Firmware version
    pub version: String,
    /// Feature flags
    pub capabilities: Capabilities,
    /// NDEF file settings can no longer be changed
    pub locked: bool,
    /// NDEF file is read with full encryption
    pub encrypted: bool,
    /// SDM is enabled on the NDEF file
    pub sdm_enabled: bool,
    /// Tag has the tamper loop (NTAG 424 DNA TT)
    pub tamper_supported: bool,
}

impl TagInfo {
    /// Summarise an identity and the NDEF file settings
    pub fn new(identity: &TagIdentity, settings: &FileSettings) -> Self {
        let tamper = identity.version.is_tamper_variant();
        Self {
            uid: identity.uid.to_string(),
            tag_type: if tamper { "NTAG424 DNA TT" } else { "NTAG424 DNA" }.into(),
            memory_size: identity.memory_size(),
            version: identity.version.firmware(),
            capabilities: Capabilities::NTAG424_DNA,
            locked: settings.access.change == AccessCondition::Never,
            encrypted: settings.comm_mode == CommMode::Full,
            sdm_enabled: settings.sdm.is_some(),
            tamper_supported: tamper,
        }
    }
}

/// Async operations exposed to the UI
#[derive(Debug)]
pub struct Ntag424Service<T: CardTransport> {
    manager: Mutex<SessionManager<T>>,
    cancel: CancelHandle,
}

impl<T: CardTransport> Ntag424Service<T> {
    /// Service over `transport`
    pub fn new(transport: T, config: SessionConfig) -> Self {
        let manager = SessionManager::new(transport, config);
        let cancel = manager.cancel_handle();
        Self {
            manager: Mutex::new(manager),
            cancel,
        }
    }

    /// Take the tag handle, expiring a session that idled out
    fn claim(&self) -> Result<MutexGuard<'_, SessionManager<T>>> {
        let mut manager = self.manager.try_lock().map_err(|_| Error::Busy)?;
        manager.expire_if_due();
        Ok(manager)
    }

    async fn wait(&self) -> MutexGuard<'_, SessionManager<T>> {
        let mut manager = self.manager.lock().await;
        manager.expire_if_due();
        manager
    }

    /// Identify the tag in the field
    #[instrument(skip(self))]
    pub async fn scan(&self) -> Result<TagInfo> {
        let mut manager = self.claim()?;
        let (identity, settings) = manager.identify().await?;
        let info = TagInfo::new(&identity, &settings);
        info!(uid = %info.uid, tag_type = %info.tag_type, "tag scanned");
        Ok(info)
    }

    /// Validate `config` and write it to the tag
    ///
    /// The configuration is planned before the tag handle is touched, so an
    /// invalid configuration sends no APDU at all.
    #[instrument(skip_all)]
    pub async fn write_configuration(&self, config: &Ntag424Config) -> Result<Ack> {
        let plan = config.plan()?;
        let mut manager = self.claim()?;

        if manager
            .session()
            .is_some_and(|session| session.slot() != plan.auth_slot)
        {
            manager.disconnect().await?;
        }
        if manager.state() == SessionState::Disconnected {
            manager.set_select_mode(plan.select_mode);
            manager.connect(plan.auth_slot, plan.auth_key.clone()).await?;
        }
        manager.write(&plan).await
    }

    /// End any session and wipe all keys
    pub async fn disconnect(&self) -> Result<()> {
        self.claim()?.disconnect().await
    }

    /// Handle that aborts the in-flight exchange
    ///
    /// A cancelled operation leaves the service disconnected.
    pub fn cancel_handle(&self) -> CancelHandle {
        self.cancel.clone()
    }

    /// Tell the Key Store what a slot holds on the tag
    pub fn load_key(&self, no: KeyNo, key: AesKey, version: u8) -> Result<()> {
        self.claim()?.load_key(no, key, version);
        Ok(())
    }

    /// Session state, waiting for a running operation to finish
    pub async fn state(&self) -> SessionState {
        self.wait().await.state()
    }

    /// Whether session keys are resident, waiting for a running operation to finish
    pub async fn has_session_keys(&self) -> bool {
        self.wait().await.keys().has_session_keys()
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::error::FormatError;
    use crate::simulator::{SimulatedTag, SimulatorTransport};

    fn service(tag: &SimulatedTag) -> Ntag424Service<SimulatorTransport> {
        Ntag424Service::new(tag.transport(), SessionConfig::default())
    }

    fn sun_config() -> Ntag424Config {
        Ntag424Config {
            sun_enabled: true,
            sun_key: "00112233445566778899AABBCCDDEEFF".into(),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_scan() {
        let tag = SimulatedTag::new();
        let info = service(&tag).scan().await.unwrap();
        assert_eq!(info.uid, "04:8D:58:D2:14:22:90");
        assert_eq!(info.tag_type, "NTAG424 DNA");
        assert_eq!(info.memory_size, 416);
        assert!(!info.locked);
        assert!(!info.sdm_enabled);

        let json = serde_json::to_value(&info).unwrap();
        assert_eq!(json["type"], "NTAG424 DNA");
        assert_eq!(json["memorySize"], 416);
        assert_eq!(json["capabilities"]["virtualCard"], true);
        assert_eq!(json["tamperSupported"], false);
    }

    #[tokio::test]
    async fn test_write_then_scan() {
        let tag = SimulatedTag::new();
        let service = service(&tag);
        let ack = service.write_configuration(&sun_config()).await.unwrap();
        assert_eq!(ack.steps.len(), 3);
        assert_eq!(
            service.state().await,
            SessionState::Authenticated(crate::session::Activity::Idle)
        );

        let info = service.scan().await.unwrap();
        assert!(info.sdm_enabled);
        assert!(info.encrypted);

        service.disconnect().await.unwrap();
        assert!(!service.has_session_keys().await);
    }

    #[tokio::test(start_paused = true)]
    async fn test_idle_session_expires() {
        let tag = SimulatedTag::new();
        let service = service(&tag);
        service.write_configuration(&sun_config()).await.unwrap();

        tokio::time::advance(Duration::from_secs(29)).await;
        assert!(service.state().await.is_authenticated());

        tokio::time::advance(Duration::from_secs(2)).await;
        assert_eq!(service.state().await, SessionState::Disconnected);
        assert!(!service.has_session_keys().await);

        // The next write opens a fresh session
        let ack = service.write_configuration(&sun_config()).await.unwrap();
        assert_eq!(ack.final_counter, ack.steps.len() as u16);
        assert!(service.has_session_keys().await);
    }

    #[tokio::test]
    async fn test_invalid_configuration_sends_nothing() {
        let tag = SimulatedTag::new();
        let service = service(&tag);
        let overlapping = Ntag424Config {
            sdm_enabled: true,
            sdm_file_data: "0".repeat(64),
            ..Default::default()
        };
        let err = service.write_configuration(&overlapping).await.unwrap_err();
        assert!(matches!(err, Error::Format(FormatError::Overlap { .. })));
        assert_eq!(tag.apdu_count(), 0);
        assert_eq!(service.state().await, SessionState::Disconnected);
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrent_call_is_busy() {
        let tag = SimulatedTag::new();
        tag.set_delay(Duration::from_millis(100));
        let service = service(&tag);

        let (first, second) = tokio::join!(service.scan(), async {
            tokio::time::sleep(Duration::from_millis(10)).await;
            service.scan().await
        });
        assert!(first.is_ok());
        assert!(matches!(second, Err(Error::Busy)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_leaves_no_keys() {
        let tag = SimulatedTag::new();
        let service = service(&tag);
        service.write_configuration(&sun_config()).await.unwrap();
        assert!(service.has_session_keys().await);

        tag.set_delay(Duration::from_millis(500));
        let cancel = service.cancel_handle();
        let config = sun_config();
        let (result, ()) = tokio::join!(service.write_configuration(&config), async {
            tokio::time::sleep(Duration::from_millis(100)).await;
            cancel.cancel();
        });
        assert!(matches!(result, Err(Error::Cancelled)));
        assert_eq!(service.state().await, SessionState::Disconnected);
        assert!(!service.has_session_keys().await);
    }
}
