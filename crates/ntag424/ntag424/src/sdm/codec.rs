use subtle::ConstantTimeEq;
use tracing::trace;

use super::{SdmKeys, SdmReading, SdmTemplate};
use crate::constants::{BLOCK_SIZE, SDM_COUNTER_MAX, SDM_MAC_PREFIX, SV_LABEL};
use crate::crypto::{self, Block};
use crate::error::{FormatError, SdmError};
use crate::keys::AesKey;
use crate::types::Uid;

/// PICC data tag: UID mirrored, counter mirrored, UID length in the low nibble
const PICC_UID_AND_COUNTER: u8 = 0xC0;

fn counter_le(counter: u32) -> [u8; 3] {
    let bytes = counter.to_le_bytes();
    [bytes[0], bytes[1], bytes[2]]
}

/// `CMAC(KFileRead, prefix || 00 01 00 80 || UID || Ctr)`, zero padded
fn file_read_session_key(key: &AesKey, prefix: [u8; 2], uid: &Uid, counter: u32) -> AesKey {
    let mut sv = Vec::with_capacity(6 + uid.len() + 3);
    sv.extend_from_slice(&prefix);
    sv.extend_from_slice(&SV_LABEL);
    sv.extend_from_slice(uid.as_bytes());
    sv.extend_from_slice(&counter_le(counter));
    AesKey::new(crypto::cmac_zero_padded(key, &sv))
}

/// SDMMAC over `input` for the given tap
pub(crate) fn sdm_mac(file_read: &AesKey, uid: &Uid, counter: u32, input: &[u8]) -> [u8; 8] {
    let session = file_read_session_key(file_read, SDM_MAC_PREFIX, uid, counter);
    crypto::mac_t(&session, input)
}

fn picc_plaintext(uid: &Uid, counter: u32) -> Block {
    let mut block = [0u8; BLOCK_SIZE];
    block[0] = PICC_UID_AND_COUNTER | uid.len() as u8;
    block[1..1 + uid.len()].copy_from_slice(uid.as_bytes());
    block[1 + uid.len()..4 + uid.len()].copy_from_slice(&counter_le(counter));
    block
}

fn put_hex(out: &mut [u8], offset: usize, bytes: &[u8]) {
    let text = hex::encode_upper(bytes);
    out[offset..offset + text.len()].copy_from_slice(text.as_bytes());
}

fn read_hex<const N: usize>(
    bytes: &[u8],
    offset: usize,
    field: &'static str,
) -> Result<[u8; N], SdmError> {
    let mut out = [0u8; N];
    hex::decode_to_slice(&bytes[offset..offset + 2 * N], &mut out)
        .map_err(|_| SdmError::Malformed(field))?;
    Ok(out)
}

/// Render the bytes the tag would mirror for `counter`
///
/// Deterministic: PICC data is padded with zeros, so the same inputs always
/// give the same output.
pub fn encode(
    template: &SdmTemplate,
    counter: u32,
    uid: &Uid,
    keys: &SdmKeys,
) -> Result<Vec<u8>, SdmError> {
    let layout = template.layout();
    if uid.len() != layout.uid_len {
        return Err(FormatError::InvalidUid.into());
    }
    if counter > SDM_COUNTER_MAX {
        return Err(FormatError::CounterOutOfRange(counter.into()).into());
    }

    let mut out = template.bytes().to_vec();
    if let Some(offset) = layout.uid_offset {
        put_hex(&mut out, offset, uid.as_bytes());
    }
    if let Some(offset) = layout.counter_offset {
        put_hex(&mut out, offset, &counter.to_be_bytes()[1..]);
    }
    if let Some(offset) = layout.picc_offset {
        let key = keys.meta_read.as_ref().ok_or(SdmError::MissingKey("meta read"))?;
        put_hex(&mut out, offset, &crypto::encrypt_block(key, &picc_plaintext(uid, counter)));
    }
    if let (Some(input), Some(offset)) = (layout.mac_input_offset, layout.mac_offset) {
        let key = keys.file_read.as_ref().ok_or(SdmError::MissingKey("file read"))?;
        let mac = sdm_mac(key, uid, counter, &out[input..offset]);
        put_hex(&mut out, offset, &mac);
    }

    trace!(counter, len = out.len(), "encoded SDM mirror");
    Ok(out)
}

/// Check a mirrored buffer and recover UID and counter
///
/// Hex is accepted in either case. PICC padding is ignored and the MAC is
/// compared in constant time.
pub fn verify(
    template: &SdmTemplate,
    bytes: &[u8],
    keys: &SdmKeys,
) -> Result<SdmReading, SdmError> {
    let layout = template.layout();
    if bytes.len() != template.len() {
        return Err(SdmError::Malformed("length differs from the template"));
    }

    let (uid, counter) = if let Some(offset) = layout.picc_offset {
        let key = keys.meta_read.as_ref().ok_or(SdmError::MissingKey("meta read"))?;
        let block: Block = read_hex(bytes, offset, "PICC data")?;
        let plain = crypto::decrypt_block(key, &block);
        let tag = plain[0];
        let len = usize::from(tag & 0x0F);
        if tag & PICC_UID_AND_COUNTER != PICC_UID_AND_COUNTER || len != layout.uid_len {
            return Err(SdmError::Malformed("PICC data"));
        }
        let uid = Uid::new(&plain[1..1 + len]).map_err(|_| SdmError::Malformed("PICC data"))?;
        let ctr = &plain[1 + len..4 + len];
        (uid, u32::from_le_bytes([ctr[0], ctr[1], ctr[2], 0]))
    } else {
        let (Some(uid_offset), Some(counter_offset)) = (layout.uid_offset, layout.counter_offset)
        else {
            return Err(FormatError::MissingMirror.into());
        };
        let mut uid = vec![0u8; layout.uid_len];
        hex::decode_to_slice(&bytes[uid_offset..uid_offset + layout.uid_window()], &mut uid)
            .map_err(|_| SdmError::Malformed("UID"))?;
        let uid = Uid::new(&uid).map_err(|_| SdmError::Malformed("UID"))?;
        let ctr: [u8; 3] = read_hex(bytes, counter_offset, "read counter")?;
        (uid, u32::from_be_bytes([0, ctr[0], ctr[1], ctr[2]]))
    };

    let mut authenticated = false;
    if let (Some(input), Some(offset)) = (layout.mac_input_offset, layout.mac_offset) {
        let key = keys.file_read.as_ref().ok_or(SdmError::MissingKey("file read"))?;
        let received: [u8; 8] = read_hex(bytes, offset, "MAC")?;

        // The tag MACs its own upper-case mirrors
        let mut normalized = bytes.to_vec();
        for (_, start, len) in layout.windows() {
            normalized[start..start + len].make_ascii_uppercase();
        }
        let expected = sdm_mac(key, &uid, counter, &normalized[input..offset]);
        if !bool::from(expected[..].ct_eq(&received[..])) {
            return Err(SdmError::MacMismatch);
        }
        authenticated = true;
    }

    Ok(SdmReading {
        uid,
        counter,
        authenticated,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sdm::SdmLayout;
    use hex_literal::hex;

    const UID: &str = "04:8D:58:D2:14:22:90";

    fn keys() -> SdmKeys {
        SdmKeys::new()
            .with_meta_read(AesKey::new(hex!("1b53525189f66e2e88a3996ae5a87cf3")))
            .with_file_read(AesKey::new(hex!("e4dae5db65c91efdf74ef3eba21b36c3")))
    }

    fn picc_template() -> SdmTemplate {
        SdmTemplate::new(vec![b'0'; 48], SdmLayout::encrypted(7, 0).with_mac(32, 32)).unwrap()
    }

    #[test]
    fn test_verify_tag_vectors() {
        let vectors = [
            ("7A4D60F5098CDC5EC25D19592DD90F61", "82E278C1118CEE2F", 10),
            ("3B721FF6E84B8BAB149395CEFDBD465F", "B5939AF5E1DFD702", 11),
            ("79831D41FEAB2E7F54C26FBBB8C72126", "53A929063D0ACD94", 12),
        ];
        for (picc, mac, counter) in vectors {
            let mirror = format!("{picc}{mac}");
            let reading = verify(&picc_template(), mirror.as_bytes(), &keys()).unwrap();
            assert_eq!(reading.uid, UID.parse::<Uid>().unwrap());
            assert_eq!(reading.counter, counter);
            assert!(reading.authenticated);

            let lower = mirror.to_lowercase();
            let reading = verify(&picc_template(), lower.as_bytes(), &keys()).unwrap();
            assert_eq!(reading.counter, counter);
        }
    }

    #[test]
    fn test_encode_is_deterministic() {
        let uid: Uid = UID.parse().unwrap();
        let first = encode(&picc_template(), 10, &uid, &keys()).unwrap();
        let second = encode(&picc_template(), 10, &uid, &keys()).unwrap();
        assert_eq!(first, second);
        assert_eq!(&first[..32], b"78AE517D7A3EC0D17330E8113B220E43");
        // MAC over an empty input depends on UID and counter only
        assert_eq!(&first[32..], b"82E278C1118CEE2F");
    }

    #[test]
    fn test_round_trip() {
        let uid: Uid = UID.parse().unwrap();
        for counter in [0, 1, 0x1234, SDM_COUNTER_MAX] {
            let mirror = encode(&picc_template(), counter, &uid, &keys()).unwrap();
            let reading = verify(&picc_template(), &mirror, &keys()).unwrap();
            assert_eq!((reading.uid, reading.counter), (uid, counter));
        }
    }

    #[test]
    fn test_sun_url_vectors() {
        let template = SdmTemplate::sun("https://example.com/verify?sun=", 8).unwrap();
        let uid: Uid = "E2:80:69:02:01:23:45:67".parse().unwrap();
        let keys = SdmKeys::new().with_file_read(AesKey::zero());

        let first = encode(&template, 0, &uid, &keys).unwrap();
        let second = encode(&template, 1, &uid, &keys).unwrap();
        assert_eq!(
            first,
            b"https://example.com/verify?sun=E280690201234567000000FF34EE8FB5AF8050".to_vec()
        );
        assert_eq!(
            second,
            b"https://example.com/verify?sun=E2806902012345670000018702DA1C6E483499".to_vec()
        );
        // Only the counter and MAC windows differ
        let counter = template.layout().counter_offset.unwrap();
        let mac = template.layout().mac_offset.unwrap();
        assert_eq!((counter, mac), (47, 53));
        assert_eq!(first[..counter], second[..counter]);
        assert_eq!(&first[counter..mac], b"000000");
        assert_eq!(&second[counter..mac], b"000001");
        assert_ne!(first[mac..], second[mac..]);

        let reading = verify(&template, &second, &keys).unwrap();
        assert_eq!(reading.counter, 1);
    }

    #[test]
    fn test_tampering_detected() {
        let uid: Uid = UID.parse().unwrap();
        let template = SdmTemplate::sun("https://example.com/?s=", 7).unwrap();
        let keys = keys();
        let mut mirror = encode(&template, 42, &uid, &keys).unwrap();

        // Bump the counter digit
        let counter_digit = template.layout().counter_offset.unwrap() + 5;
        mirror[counter_digit] = b'B';
        assert_eq!(verify(&template, &mirror, &keys).unwrap_err(), SdmError::MacMismatch);

        let mut mirror = encode(&template, 42, &uid, &keys).unwrap();
        let last = mirror.len() - 1;
        mirror[last] = b'G';
        assert_eq!(verify(&template, &mirror, &keys).unwrap_err(), SdmError::Malformed("MAC"));
    }

    #[test]
    fn test_input_errors() {
        let uid: Uid = UID.parse().unwrap();
        assert_eq!(
            encode(&picc_template(), SDM_COUNTER_MAX + 1, &uid, &keys()).unwrap_err(),
            SdmError::Format(FormatError::CounterOutOfRange(0x0100_0000))
        );
        assert_eq!(
            encode(&picc_template(), 1, &uid, &SdmKeys::new()).unwrap_err(),
            SdmError::MissingKey("meta read")
        );
        let short: Uid = "01:02:03:04".parse().unwrap();
        assert_eq!(
            encode(&picc_template(), 1, &short, &keys()).unwrap_err(),
            SdmError::Format(FormatError::InvalidUid)
        );
        assert!(matches!(
            verify(&picc_template(), b"too short", &keys()).unwrap_err(),
            SdmError::Malformed(_)
        ));
    }
}
