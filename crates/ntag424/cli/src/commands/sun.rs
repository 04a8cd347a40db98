//! Offline SUN encode and verify

use std::error::Error;

use ntagkit_ntag424::{AesKey, SdmKeys, SdmTemplate, Uid, sdm};
use tracing::debug;

use crate::utils::display::{self, Tone};

/// Print the SUN URL for `uid` at `counter`
pub fn sun_encode_command(
    uid: &str,
    counter: u32,
    key: &str,
    url: &str,
) -> Result<(), Box<dyn Error>> {
    let uid = Uid::from_hex(uid)?;
    let keys = SdmKeys::new().with_file_read(AesKey::from_hex(key)?);
    let template = SdmTemplate::sun(url, uid.len())?;

    let mirrored = String::from_utf8(sdm::encode(&template, counter, &uid, &keys)?)?;
    debug!(uid = %uid, counter, "SUN mirror rendered");
    println!("{mirrored}");
    Ok(())
}

/// Check the MAC of a SUN URL and print what it carries
pub fn sun_verify_command(
    mirrored: &str,
    key: &str,
    url: &str,
    uid_len: usize,
) -> Result<(), Box<dyn Error>> {
    let keys = SdmKeys::new().with_file_read(AesKey::from_hex(key)?);
    let template = SdmTemplate::sun(url, uid_len)?;

    let reading = sdm::verify(&template, mirrored.as_bytes(), &keys)?;
    println!("{}", display::line(Tone::Done, "MAC verified"));
    println!(
        "{}",
        display::fields(
            "SUN reading",
            &[
                ("UID", reading.uid.to_string()),
                ("Counter", reading.counter.to_string()),
            ],
        )
    );
    Ok(())
}
