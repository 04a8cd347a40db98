use super::NativeCommand;
use crate::constants::ins;
use crate::types::CommMode;

/// GetVersion, first frame
pub fn get_version() -> NativeCommand {
    NativeCommand::new(ins::GET_VERSION, CommMode::Plain)
}

/// Request the next frame of a multi-frame answer
pub fn additional_frame() -> NativeCommand {
    NativeCommand::new(ins::ADDITIONAL_FRAME, CommMode::Plain)
}
