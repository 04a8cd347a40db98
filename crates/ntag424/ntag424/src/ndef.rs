//! NDEF file image for a single URI record
//!
//! File layout: `NLEN (2, BE) || D1 || 01 || payload length || 'U' || code || URI`.
//! A 256-byte file only ever holds a short record.

use crate::constants::NDEF_FILE_SIZE;
use crate::error::FormatError;

const NLEN_LEN: usize = 2;
const TNF_WELL_KNOWN: u8 = 0x01;
const MB_ME: u8 = 0xC0;
const SHORT_RECORD: u8 = 0x10;
const URI_TYPE: u8 = b'U';

/// URI identifier codes, NFC Forum URI record type definition
const URI_PREFIXES: &[(u8, &str)] = &[
    (0x01, "http://www."),
    (0x02, "https://www."),
    (0x03, "http://"),
    (0x04, "https://"),
    (0x05, "tel:"),
    (0x06, "mailto:"),
    (0x0D, "ftp://"),
    (0x1D, "file://"),
];

/// A URI record laid out as the NDEF file contents
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NdefImage {
    bytes: Vec<u8>,
    prefix_len: usize,
    uri_start: usize,
}

impl NdefImage {
    /// Wrap `uri` into an NDEF file image, abbreviating a known prefix
    pub fn uri(uri: &str) -> Result<Self, FormatError> {
        let (code, prefix) = URI_PREFIXES
            .iter()
            .filter(|(_, prefix)| uri.starts_with(prefix))
            .max_by_key(|(_, prefix)| prefix.len())
            .map_or((0x00, ""), |&(code, prefix)| (code, prefix));
        let rest = &uri.as_bytes()[prefix.len()..];
        let payload_len = 1 + rest.len();

        let total = NLEN_LEN + 4 + payload_len;
        if total > NDEF_FILE_SIZE {
            return Err(FormatError::TooLarge {
                len: total,
                max: NDEF_FILE_SIZE,
            });
        }

        let mut record = Vec::with_capacity(4 + payload_len);
        record.extend_from_slice(&[
            MB_ME | SHORT_RECORD | TNF_WELL_KNOWN,
            0x01,
            payload_len as u8,
            URI_TYPE,
            code,
        ]);
        let uri_start = NLEN_LEN + record.len();
        record.extend_from_slice(rest);

        let mut bytes = Vec::with_capacity(total);
        bytes.extend_from_slice(&(record.len() as u16).to_be_bytes());
        bytes.extend_from_slice(&record);
        Ok(Self {
            bytes,
            prefix_len: prefix.len(),
            uri_start,
        })
    }

    /// File contents
    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// Length of the file contents
    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    /// Whether the image is empty (never, an image holds at least the headers)
    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    /// File offset of byte `offset` of the original URI
    pub fn file_offset(&self, offset: usize) -> Result<u32, FormatError> {
        if offset < self.prefix_len {
            return Err(FormatError::InsidePrefix(offset));
        }
        Ok((self.uri_start + offset - self.prefix_len) as u32)
    }

    /// Read the URI back from NDEF file contents
    pub fn parse_uri(file: &[u8]) -> Option<String> {
        let nlen = usize::from(u16::from_be_bytes([*file.first()?, *file.get(1)?]));
        let record = file.get(NLEN_LEN..NLEN_LEN + nlen)?;
        let [header, type_len, payload_len, kind, ..] = *record else {
            return None;
        };
        if header & (SHORT_RECORD | 0x07) != SHORT_RECORD | TNF_WELL_KNOWN
            || type_len != 0x01
            || kind != URI_TYPE
        {
            return None;
        }
        let payload = record.get(4..4 + usize::from(payload_len))?;
        let (&code, rest) = payload.split_first()?;
        let prefix = URI_PREFIXES
            .iter()
            .find(|(c, _)| *c == code)
            .map_or("", |(_, prefix)| prefix);
        Some(format!("{prefix}{}", String::from_utf8_lossy(rest)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hex_literal::hex;

    #[test]
    fn test_short_record() {
        let image = NdefImage::uri("https://example.com/a").unwrap();
        assert_eq!(image.bytes()[..7], hex!("0012 D1 01 0E 55 04"));
        assert_eq!(&image.bytes()[7..], b"example.com/a");
        assert_eq!(NdefImage::parse_uri(image.bytes()).unwrap(), "https://example.com/a");
    }

    #[test]
    fn test_longest_prefix_wins() {
        let image = NdefImage::uri("https://www.nxp.com").unwrap();
        assert_eq!(image.bytes()[6], 0x02);
        assert_eq!(&image.bytes()[7..], b"nxp.com");
    }

    #[test]
    fn test_offset_translation() {
        let url = "https://example.com/verify?sun=";
        let image = NdefImage::uri(url).unwrap();
        // "https://" is abbreviated, so URI offset 8 is the first stored byte
        assert_eq!(image.file_offset(8).unwrap(), 7);
        assert_eq!(image.file_offset(31).unwrap(), 30);
        assert_eq!(image.file_offset(3).unwrap_err(), FormatError::InsidePrefix(3));
    }

    #[test]
    fn test_too_large() {
        let url = format!("https://example.com/{}", "a".repeat(260));
        assert_eq!(
            NdefImage::uri(&url).unwrap_err(),
            FormatError::TooLarge { len: 279, max: 256 }
        );

        let url = format!("https://example.com/{}", "a".repeat(237));
        let image = NdefImage::uri(&url).unwrap();
        assert_eq!(image.len(), 256);
        assert_eq!(NdefImage::parse_uri(image.bytes()).unwrap(), url);
    }

    #[test]
    fn test_unknown_scheme_keeps_everything() {
        let image = NdefImage::uri("urn:nfc:x").unwrap();
        assert_eq!(image.bytes()[6], 0x00);
        assert_eq!(image.file_offset(0).unwrap(), 7);
    }
}
