use super::NativeCommand;
use crate::constants::ins;
use crate::error::FormatError;
use crate::types::{CommMode, FileSettings};

/// ChangeFileSettings, always sent in full mode
///
/// The settings are validated against the file size before anything is encoded.
pub fn change_file_settings(
    file_no: u8,
    settings: &FileSettings,
) -> Result<NativeCommand, FormatError> {
    Ok(NativeCommand::new(ins::CHANGE_FILE_SETTINGS, CommMode::Full)
        .with_header([file_no])
        .with_data(settings.encode_change()?))
}
