use super::NativeCommand;
use crate::constants::ins;
use crate::types::CommMode;

/// GetFileSettings; MAC mode when authenticated, plain otherwise
pub fn get_file_settings(file_no: u8, mode: CommMode) -> NativeCommand {
    NativeCommand::new(ins::GET_FILE_SETTINGS, mode).with_header([file_no])
}
