use ntagkit_apdu_core::{Bytes, Command};
use serde::{Deserialize, Serialize};

use crate::constants::{CLA_ISO, NDEF_APP_DF_NAME, NDEF_APP_FILE_ID, ins};

/// How the NDEF application is selected
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum SelectMode {
    /// ISO SELECT by DF name `D2760000850101`
    DfName,
    /// ISO SELECT by file identifier `E110`
    #[default]
    FileId,
}

/// ISO SELECT of the NDEF application, no FCI requested
pub fn select_application(mode: SelectMode) -> Command {
    let (p1, data) = match mode {
        SelectMode::DfName => (0x04, Bytes::from_static(&NDEF_APP_DF_NAME)),
        SelectMode::FileId => (0x00, Bytes::from_static(&NDEF_APP_FILE_ID)),
    };
    Command {
        cla: CLA_ISO,
        ins: ins::SELECT,
        p1,
        p2: 0x0C,
        data: Some(data),
        le: Some(0x00),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hex_literal::hex;
    use ntagkit_apdu_core::ApduCommand;

    #[test]
    fn test_select_encoding() {
        assert_eq!(
            select_application(SelectMode::DfName).to_bytes().as_ref(),
            &hex!("00 A4 04 0C 07 D2760000850101 00")
        );
        assert_eq!(
            select_application(SelectMode::FileId).to_bytes().as_ref(),
            &hex!("00 A4 00 0C 02 E110 00")
        );
    }
}
