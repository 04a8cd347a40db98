//! Data model shared by the command set, the codec and the writer

pub(crate) mod file_settings;
mod version;

pub use file_settings::{
    AccessCondition, AccessRights, CommMode, FileSettings, SdmAccessRights, SdmOptions,
    SdmSettings,
};
pub use version::{ComponentVersion, TagIdentity, Uid, VersionInfo};
