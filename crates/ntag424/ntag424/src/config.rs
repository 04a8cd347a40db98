//! Configuration payload and the write plan derived from it
//!
//! [`Ntag424Config`] mirrors the front end's `NTAG424Config` field for field
//! (camelCase JSON, same defaults). [`Ntag424Config::plan`] validates it and
//! turns it into a [`WritePlan`] without touching the tag, so every
//! [`FormatError`] surfaces before the first APDU.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::commands::SelectMode;
use crate::constants::{NDEF_FILE_NO, NDEF_FILE_SIZE, SDM_COUNTER_MAX, UID_LEN};
use crate::error::{FormatError, SdmError};
use crate::keys::{AesKey, KeyNo};
use crate::ndef::NdefImage;
use crate::sdm::{self, SdmKeys, SdmLayout, SdmTemplate};
use crate::types::{
    AccessCondition, AccessRights, CommMode, FileSettings, SdmAccessRights, SdmOptions,
    SdmSettings, Uid,
};

/// Access-rights quad as single-character slot codes (`0`-`4`, `E`, `F`)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct AccessRightCodes {
    /// ReadData
    pub read: String,
    /// WriteData
    pub write: String,
    /// Read and write
    pub read_write: String,
    /// ChangeFileSettings
    pub change_access_rights: String,
}

impl Default for AccessRightCodes {
    fn default() -> Self {
        Self {
            read: "E".into(),
            write: "0".into(),
            read_write: "0".into(),
            change_access_rights: "0".into(),
        }
    }
}

impl AccessRightCodes {
    /// Parse into typed access rights
    pub fn parse(&self) -> Result<AccessRights, FormatError> {
        Ok(AccessRights {
            read: AccessCondition::from_code(&self.read)?,
            write: AccessCondition::from_code(&self.write)?,
            read_write: AccessCondition::from_code(&self.read_write)?,
            change: AccessCondition::from_code(&self.change_access_rights)?,
        })
    }
}

/// Tag configuration as edited in the front end
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Ntag424Config {
    /// Enable the SUN URL suffix
    pub sun_enabled: bool,
    /// SUN MAC key (hex), installed as the SDM file read key
    pub sun_key: String,
    /// Counter used to render previews
    pub sun_counter: u64,
    /// URL the SUN suffix is appended to
    #[serde(rename = "sunURL")]
    pub sun_url: String,

    /// Enable SDM mirroring into `sdm_file_data`
    pub sdm_enabled: bool,
    /// Application master key (hex) used to authenticate; empty means factory key
    pub sdm_key: String,
    /// SDM file read key (hex); empty disables the MAC
    pub sdm_mac_key: String,
    /// SDM meta read key (hex); empty keeps UID and counter in plaintext
    pub sdm_enc_key: String,
    /// URL template holding the mirror windows
    pub sdm_file_data: String,
    /// MAC window offset in `sdm_file_data`
    pub sdm_mac_offset: usize,
    /// PICC data window offset in `sdm_file_data`
    pub sdm_enc_offset: usize,
    /// Plaintext UID window offset in `sdm_file_data`
    pub sdm_uid_offset: usize,
    /// Plaintext counter window offset in `sdm_file_data`
    pub sdm_counter_offset: usize,

    /// Authenticate before writing; writes are refused without it
    pub authenticate_first: bool,
    /// Select the application by DF name instead of the ISO file ID
    pub virtual_card_select: bool,
    /// Communication mode of the NDEF file
    pub file_comm_mode: CommMode,
    /// Access rights of the NDEF file
    pub access_rights: AccessRightCodes,
}

impl Default for Ntag424Config {
    fn default() -> Self {
        Self {
            sun_enabled: false,
            sun_key: String::new(),
            sun_counter: 0,
            sun_url: "https://example.com/verify?sun=".into(),
            sdm_enabled: false,
            sdm_key: String::new(),
            sdm_mac_key: String::new(),
            sdm_enc_key: String::new(),
            sdm_file_data: String::new(),
            sdm_mac_offset: 0,
            sdm_enc_offset: 16,
            sdm_uid_offset: 32,
            sdm_counter_offset: 39,
            authenticate_first: true,
            virtual_card_select: false,
            file_comm_mode: CommMode::Full,
            access_rights: AccessRightCodes::default(),
        }
    }
}

impl fmt::Debug for Ntag424Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let key = |value: &str| if value.is_empty() { "<empty>" } else { "<set>" };
        f.debug_struct("Ntag424Config")
            .field("sun_enabled", &self.sun_enabled)
            .field("sun_key", &key(&self.sun_key))
            .field("sun_counter", &self.sun_counter)
            .field("sun_url", &self.sun_url)
            .field("sdm_enabled", &self.sdm_enabled)
            .field("sdm_key", &key(&self.sdm_key))
            .field("sdm_mac_key", &key(&self.sdm_mac_key))
            .field("sdm_enc_key", &key(&self.sdm_enc_key))
            .field("sdm_file_data", &self.sdm_file_data)
            .field("sdm_mac_offset", &self.sdm_mac_offset)
            .field("sdm_enc_offset", &self.sdm_enc_offset)
            .field("sdm_uid_offset", &self.sdm_uid_offset)
            .field("sdm_counter_offset", &self.sdm_counter_offset)
            .field("authenticate_first", &self.authenticate_first)
            .field("virtual_card_select", &self.virtual_card_select)
            .field("file_comm_mode", &self.file_comm_mode)
            .field("access_rights", &self.access_rights)
            .finish()
    }
}

/// A key to install in a slot
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyChange {
    /// Target slot
    pub no: KeyNo,
    /// New key
    pub key: AesKey,
}

/// Validated sequence of what a configuration write does to the tag
#[derive(Debug, Clone)]
pub struct WritePlan {
    /// How to select the NDEF application
    pub select_mode: SelectMode,
    /// Slot to authenticate with
    pub auth_slot: KeyNo,
    /// Key to authenticate with
    pub auth_key: AesKey,
    /// Target file
    pub file_no: u8,
    /// New file settings
    pub settings: FileSettings,
    /// File contents to write, if SUN or SDM is enabled
    pub ndef: Option<NdefImage>,
    /// Mirror template, if SUN or SDM is enabled
    pub template: Option<SdmTemplate>,
    /// Keys the template needs for previews
    pub sdm_keys: SdmKeys,
    /// Keys to install after the file is configured
    pub key_changes: Vec<KeyChange>,
    /// Counter used for previews
    pub preview_counter: u32,
}

impl WritePlan {
    /// Number of commands the plan sends at most
    pub fn command_count(&self) -> usize {
        let chunks = self
            .ndef
            .as_ref()
            .map_or(0, |ndef| ndef.len().div_ceil(crate::constants::WRITE_CHUNK_SIZE));
        1 + chunks + self.key_changes.len()
    }

    /// What a tap would mirror at the preview counter
    pub fn preview(&self, uid: &Uid) -> Result<Option<String>, SdmError> {
        let Some(template) = &self.template else {
            return Ok(None);
        };
        let bytes = sdm::encode(template, self.preview_counter, uid, &self.sdm_keys)?;
        Ok(Some(String::from_utf8_lossy(&bytes).into_owned()))
    }
}

impl SdmTemplate {
    /// SDM template from the four front-end offsets
    ///
    /// With an encryption key UID and counter travel in PICC data at
    /// `sdmEncOffset`, otherwise they are mirrored in plaintext at
    /// `sdmUidOffset` / `sdmCounterOffset`. With a MAC key the MAC lands at
    /// `sdmMacOffset` over an empty input.
    pub fn from_config(config: &Ntag424Config) -> Result<Self, FormatError> {
        let enc = AesKey::from_optional_hex(&config.sdm_enc_key, "sdmEncKey")?;
        let mac = AesKey::from_optional_hex(&config.sdm_mac_key, "sdmMacKey")?;
        if config.sdm_file_data.is_empty() {
            return Err(FormatError::InvalidTemplate("sdmFileData is empty"));
        }

        let mut layout = if enc.is_some() {
            SdmLayout::encrypted(UID_LEN, config.sdm_enc_offset)
        } else {
            SdmLayout::plain(UID_LEN, config.sdm_uid_offset, config.sdm_counter_offset)
        };
        if mac.is_some() {
            layout = layout.with_mac(config.sdm_mac_offset, config.sdm_mac_offset);
        }
        Self::new(config.sdm_file_data.as_bytes(), layout)
    }
}

impl Ntag424Config {
    /// Parse the front-end JSON payload
    pub fn from_json(json: &str) -> crate::Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    /// Fill every empty key field the enabled mode needs with a random key
    ///
    /// Returns the camelCase names of the fields that were filled.
    pub fn generate_missing_keys(&mut self) -> Vec<&'static str> {
        let mut fields: Vec<(&'static str, &mut String)> = Vec::new();
        if self.sun_enabled {
            fields.push(("sunKey", &mut self.sun_key));
        }
        if self.sdm_enabled {
            fields.push(("sdmMacKey", &mut self.sdm_mac_key));
            fields.push(("sdmEncKey", &mut self.sdm_enc_key));
        }

        let mut filled = Vec::new();
        for (name, field) in fields {
            if field.trim().is_empty() {
                *field = AesKey::generate().to_hex();
                filled.push(name);
            }
        }
        filled
    }

    /// Validate and derive the write plan; nothing here talks to the tag
    pub fn plan(&self) -> Result<WritePlan, FormatError> {
        if self.sun_enabled && self.sdm_enabled {
            return Err(FormatError::ConflictingModes);
        }
        if !self.authenticate_first {
            return Err(FormatError::AuthenticationRequired);
        }

        let auth_key =
            AesKey::from_optional_hex(&self.sdm_key, "sdmKey")?.unwrap_or_else(AesKey::zero);
        let preview_counter = u32::try_from(self.sun_counter)
            .ok()
            .filter(|counter| *counter <= SDM_COUNTER_MAX)
            .ok_or(FormatError::CounterOutOfRange(self.sun_counter))?;
        let mut settings = FileSettings::new(
            self.file_comm_mode,
            self.access_rights.parse()?,
            NDEF_FILE_SIZE as u32,
        );

        let mut sdm_keys = SdmKeys::new();
        let mut key_changes = Vec::new();
        let template = if self.sun_enabled {
            let key = AesKey::from_optional_hex(&self.sun_key, "sunKey")?
                .ok_or(FormatError::MissingKey("sunKey"))?;
            key_changes.push(KeyChange { no: KeyNo::SDM_FILE_READ, key: key.clone() });
            sdm_keys.file_read = Some(key);
            Some(SdmTemplate::sun(&self.sun_url, UID_LEN)?)
        } else if self.sdm_enabled {
            let template = SdmTemplate::from_config(self)?;
            if let Some(key) = AesKey::from_optional_hex(&self.sdm_enc_key, "sdmEncKey")? {
                key_changes.push(KeyChange { no: KeyNo::SDM_META_READ, key: key.clone() });
                sdm_keys.meta_read = Some(key);
            }
            if let Some(key) = AesKey::from_optional_hex(&self.sdm_mac_key, "sdmMacKey")? {
                key_changes.push(KeyChange { no: KeyNo::SDM_FILE_READ, key: key.clone() });
                sdm_keys.file_read = Some(key);
            }
            Some(template)
        } else {
            None
        };

        let ndef = match &template {
            Some(template) => {
                let uri = std::str::from_utf8(template.bytes())
                    .map_err(|_| FormatError::InvalidTemplate("template is not UTF-8"))?;
                let ndef = NdefImage::uri(uri)?;
                settings.sdm = Some(sdm_settings(template.layout(), &ndef)?);
                Some(ndef)
            }
            None => None,
        };

        // Validates offsets against the file size
        settings.encode_change()?;
        if ndef.is_some() && settings.write_comm_mode(Some(KeyNo::MASTER)).is_none() {
            return Err(FormatError::WriteDenied(KeyNo::MASTER));
        }

        Ok(WritePlan {
            select_mode: if self.virtual_card_select {
                SelectMode::DfName
            } else {
                SelectMode::FileId
            },
            auth_slot: KeyNo::MASTER,
            auth_key,
            file_no: NDEF_FILE_NO,
            settings,
            ndef,
            template,
            sdm_keys,
            key_changes,
            preview_counter,
        })
    }
}

/// File-level SDM settings for a template laid into `ndef`
fn sdm_settings(layout: &SdmLayout, ndef: &NdefImage) -> Result<SdmSettings, FormatError> {
    let shift = |offset: Option<usize>| offset.map(|offset| ndef.file_offset(offset)).transpose();
    Ok(SdmSettings {
        options: SdmOptions {
            uid_mirror: true,
            read_counter_mirror: true,
            ..SdmOptions::default()
        },
        access: SdmAccessRights {
            ctr_ret: AccessCondition::Never,
            meta_read: if layout.picc_offset.is_some() {
                AccessCondition::Key(KeyNo::SDM_META_READ)
            } else {
                AccessCondition::Free
            },
            file_read: if layout.mac_offset.is_some() {
                AccessCondition::Key(KeyNo::SDM_FILE_READ)
            } else {
                AccessCondition::Never
            },
        },
        uid_offset: shift(layout.uid_offset)?,
        read_ctr_offset: shift(layout.counter_offset)?,
        picc_data_offset: shift(layout.picc_offset)?,
        mac_input_offset: shift(layout.mac_input_offset)?,
        enc_offset: None,
        enc_length: None,
        mac_offset: shift(layout.mac_offset)?,
        read_ctr_limit: None,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    const ENC_KEY: &str = "1B53525189F66E2E88A3996AE5A87CF3";
    const MAC_KEY: &str = "E4DAE5DB65C91EFDF74EF3EBA21B36C3";

    fn sdm_config() -> Ntag424Config {
        let mut config = Ntag424Config {
            sdm_enabled: true,
            sdm_enc_key: ENC_KEY.into(),
            sdm_mac_key: MAC_KEY.into(),
            sdm_file_data: format!(
                "https://sdm.example.com/t?p={}&m={}",
                "0".repeat(32),
                "0".repeat(16)
            ),
            sdm_enc_offset: 28,
            sdm_mac_offset: 63,
            ..Default::default()
        };
        config.access_rights.read_write = "E".into();
        config
    }

    #[test]
    fn test_generate_missing_keys() {
        let mut sun = Ntag424Config { sun_enabled: true, ..Default::default() };
        assert_eq!(sun.generate_missing_keys(), vec!["sunKey"]);
        assert_eq!(sun.sun_key.len(), 32);
        assert!(sun.plan().is_ok());
        let first = sun.sun_key.clone();
        assert!(sun.generate_missing_keys().is_empty());
        assert_eq!(sun.sun_key, first);

        let mut sdm = sdm_config();
        sdm.sdm_enc_key.clear();
        assert_eq!(sdm.generate_missing_keys(), vec!["sdmEncKey"]);
        assert_eq!(sdm.sdm_mac_key, MAC_KEY);
        assert_ne!(sdm.sdm_enc_key, ENC_KEY);

        let mut plain = Ntag424Config::default();
        assert!(plain.generate_missing_keys().is_empty());
        assert!(plain.sun_key.is_empty());
    }

    #[test]
    fn test_defaults_match_front_end() {
        let config = Ntag424Config::from_json("{}").unwrap();
        assert_eq!(config, Ntag424Config::default());
        assert_eq!(config.sun_url, "https://example.com/verify?sun=");
        assert_eq!(
            (
                config.sdm_mac_offset,
                config.sdm_enc_offset,
                config.sdm_uid_offset,
                config.sdm_counter_offset
            ),
            (0, 16, 32, 39)
        );
        assert!(config.authenticate_first);
        assert_eq!(config.file_comm_mode, CommMode::Full);
        assert_eq!(config.access_rights.read, "E");
    }

    #[test]
    fn test_front_end_payload() {
        let json = r#"{
            "sunEnabled": true,
            "sunKey": "00112233445566778899AABBCCDDEEFF",
            "sunCounter": 5,
            "sunURL": "https://example.com/verify?sun=",
            "fileCommMode": "mac",
            "accessRights": {
                "read": "E",
                "write": "0",
                "readWrite": "0",
                "changeAccessRights": "0"
            }
        }"#;
        let config = Ntag424Config::from_json(json).unwrap();
        assert!(config.sun_enabled);
        assert_eq!(config.sun_counter, 5);
        assert_eq!(config.file_comm_mode, CommMode::Mac);

        assert!(matches!(
            Ntag424Config::from_json(r#"{"fileCommMode": "secret"}"#),
            Err(crate::Error::Config(_))
        ));
    }

    #[test]
    fn test_sun_plan() {
        let config = Ntag424Config {
            sun_enabled: true,
            sun_key: "00112233445566778899AABBCCDDEEFF".into(),
            ..Default::default()
        };
        let plan = config.plan().unwrap();
        assert_eq!(plan.file_no, NDEF_FILE_NO);
        assert_eq!(plan.select_mode, SelectMode::FileId);
        assert_eq!(plan.auth_key, AesKey::zero());
        assert_eq!(plan.key_changes.len(), 1);
        assert_eq!(plan.key_changes[0].no, KeyNo::SDM_FILE_READ);

        let sdm = plan.settings.sdm.as_ref().unwrap();
        // "https://" is abbreviated in the record, shifting file offsets by one
        assert_eq!(sdm.uid_offset, Some(30));
        assert_eq!(sdm.read_ctr_offset, Some(44));
        assert_eq!(sdm.mac_input_offset, Some(30));
        assert_eq!(sdm.mac_offset, Some(50));
        assert_eq!(sdm.access.meta_read, AccessCondition::Free);
        assert_eq!(sdm.access.file_read, AccessCondition::Key(KeyNo::SDM_FILE_READ));
        assert_eq!(plan.command_count(), 3);

        let uid = Uid::from_hex("048D58D2142290").unwrap();
        let preview = plan.preview(&uid).unwrap().unwrap();
        assert!(preview.starts_with("https://example.com/verify?sun=048D58D2142290000000"));
    }

    #[test]
    fn test_sdm_plan_with_picc_data() {
        let plan = sdm_config().plan().unwrap();
        let sdm = plan.settings.sdm.as_ref().unwrap();
        assert_eq!(sdm.picc_data_offset, Some(27));
        assert_eq!(sdm.mac_offset, Some(62));
        assert_eq!(sdm.mac_input_offset, Some(62));
        assert_eq!(sdm.uid_offset, None);
        assert_eq!(plan.key_changes.iter().map(|c| c.no.value()).collect::<Vec<_>>(), vec![1, 2]);

        let uid = Uid::from_hex("048D58D2142290").unwrap();
        let mirror = plan.preview(&uid).unwrap().unwrap();
        let template = plan.template.as_ref().unwrap();
        let reading = sdm::verify(template, mirror.as_bytes(), &plan.sdm_keys).unwrap();
        assert_eq!(reading.uid, uid);
        assert_eq!(reading.counter, 0);
    }

    #[test]
    fn test_rejections_before_io() {
        let both = Ntag424Config { sun_enabled: true, sdm_enabled: true, ..Default::default() };
        assert_eq!(both.plan().unwrap_err(), FormatError::ConflictingModes);

        let no_auth = Ntag424Config { authenticate_first: false, ..Default::default() };
        assert_eq!(no_auth.plan().unwrap_err(), FormatError::AuthenticationRequired);

        let sun = Ntag424Config { sun_enabled: true, ..Default::default() };
        assert_eq!(sun.plan().unwrap_err(), FormatError::MissingKey("sunKey"));

        let mut locked = sdm_config();
        locked.access_rights.write = "F".into();
        locked.access_rights.read_write = "3".into();
        assert_eq!(locked.plan().unwrap_err(), FormatError::WriteDenied(KeyNo::MASTER));

        let mut bad_code = sdm_config();
        bad_code.access_rights.read = "X".into();
        assert_eq!(bad_code.plan().unwrap_err(), FormatError::InvalidAccessRight('X'));

        let mut counter = sdm_config();
        counter.sun_counter = 1 << 24;
        assert_eq!(counter.plan().unwrap_err(), FormatError::CounterOutOfRange(1 << 24));
    }

    #[test]
    fn test_default_offsets_overlap_in_plaintext() {
        let config = Ntag424Config {
            sdm_enabled: true,
            sdm_file_data: "0".repeat(64),
            ..Default::default()
        };
        assert_eq!(
            config.plan().unwrap_err(),
            FormatError::Overlap { first: "UID", second: "read counter" }
        );
    }

    #[test]
    fn test_window_inside_uri_prefix() {
        let mut config = sdm_config();
        config.sdm_mac_offset = 3;
        assert_eq!(config.plan().unwrap_err(), FormatError::InsidePrefix(3));
    }

    #[test]
    fn test_virtual_card_select() {
        let config = Ntag424Config { virtual_card_select: true, ..Default::default() };
        let plan = config.plan().unwrap();
        assert_eq!(plan.select_mode, SelectMode::DfName);
        assert!(plan.ndef.is_none());
        assert!(plan.settings.sdm.is_none());
        assert_eq!(plan.command_count(), 1);
    }

    #[test]
    fn test_debug_redacts_keys() {
        let debug = format!("{:?}", sdm_config());
        assert!(!debug.contains(ENC_KEY));
        assert!(!debug.contains(MAC_KEY));
        assert!(debug.contains("<set>"));
    }
}
