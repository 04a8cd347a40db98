use super::NativeCommand;
use crate::constants::ins;
use crate::keys::KeyNo;
use crate::types::CommMode;

/// AuthenticateEV2First, first pass: `KeyNo || LenCap = 0`
pub fn authenticate_ev2_first(key_no: KeyNo) -> NativeCommand {
    NativeCommand::new(ins::AUTHENTICATE_EV2_FIRST, CommMode::Plain)
        .with_data([key_no.value(), 0x00])
}

/// AuthenticateEV2First, second pass: `E(K, RndA || RndB')`
pub fn authenticate_part2(token: &[u8; 32]) -> NativeCommand {
    NativeCommand::new(ins::ADDITIONAL_FRAME, CommMode::Plain).with_data(token.to_vec())
}
