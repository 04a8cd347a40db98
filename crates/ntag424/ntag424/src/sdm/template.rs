use crate::error::FormatError;
use crate::types::SdmSettings;
use crate::types::file_settings::{
    COUNTER_MIRROR_LEN, MAC_MIRROR_LEN, PICC_MIRROR_LEN, check_windows,
};

/// Where the mirrors sit inside a template
///
/// UID and counter come either from plaintext mirrors (both offsets set) or
/// from one encrypted PICC data block. The MAC covers `MACInput..MAC`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SdmLayout {
    /// UID length in bytes
    pub uid_len: usize,
    /// Plaintext UID mirror
    pub uid_offset: Option<usize>,
    /// Plaintext read counter mirror
    pub counter_offset: Option<usize>,
    /// Encrypted PICC data mirror
    pub picc_offset: Option<usize>,
    /// Start of the MAC input
    pub mac_input_offset: Option<usize>,
    /// MAC mirror
    pub mac_offset: Option<usize>,
}

impl SdmLayout {
    /// Layout with plaintext UID and counter mirrors and no MAC
    pub const fn plain(uid_len: usize, uid_offset: usize, counter_offset: usize) -> Self {
        Self {
            uid_len,
            uid_offset: Some(uid_offset),
            counter_offset: Some(counter_offset),
            picc_offset: None,
            mac_input_offset: None,
            mac_offset: None,
        }
    }

    /// Layout with encrypted PICC data and no MAC
    pub const fn encrypted(uid_len: usize, picc_offset: usize) -> Self {
        Self {
            uid_len,
            uid_offset: None,
            counter_offset: None,
            picc_offset: Some(picc_offset),
            mac_input_offset: None,
            mac_offset: None,
        }
    }

    /// Add a MAC mirror at `mac_offset` covering bytes from `input_offset`
    pub const fn with_mac(mut self, input_offset: usize, mac_offset: usize) -> Self {
        self.mac_input_offset = Some(input_offset);
        self.mac_offset = Some(mac_offset);
        self
    }

    /// Length of the ASCII UID mirror
    pub const fn uid_window(&self) -> usize {
        2 * self.uid_len
    }

    /// Substitution windows as `(name, offset, length)`
    pub fn windows(&self) -> Vec<(&'static str, usize, usize)> {
        [
            ("UID", self.uid_offset, self.uid_window()),
            ("read counter", self.counter_offset, COUNTER_MIRROR_LEN),
            ("PICC data", self.picc_offset, PICC_MIRROR_LEN),
            ("MAC", self.mac_offset, MAC_MIRROR_LEN),
        ]
        .into_iter()
        .filter_map(|(name, offset, len)| offset.map(|offset| (name, offset, len)))
        .collect()
    }

    /// Check the layout against a buffer of `size` bytes
    pub fn validate(&self, size: usize) -> Result<(), FormatError> {
        if !(4..=10).contains(&self.uid_len) {
            return Err(FormatError::InvalidUid);
        }
        let plaintext = self.uid_offset.is_some() || self.counter_offset.is_some();
        match (self.picc_offset, plaintext) {
            (Some(_), true) => return Err(FormatError::ConflictingMirrors),
            (None, _) if self.uid_offset.is_none() || self.counter_offset.is_none() => {
                return Err(FormatError::MissingMirror);
            }
            _ => {}
        }
        if self.mac_offset.is_some() != self.mac_input_offset.is_some() {
            return Err(FormatError::InvalidTemplate("MAC and MAC input offsets go together"));
        }

        check_windows(&self.windows(), size)?;

        if let (Some(input), Some(mac)) = (self.mac_input_offset, self.mac_offset) {
            if input > mac {
                return Err(FormatError::MacInputAfterMac { input, mac });
            }
        }
        Ok(())
    }

    /// Layout the tag applies for the given file settings
    ///
    /// Encrypted file data is not part of the layout and is left untouched.
    pub fn from_settings(settings: &SdmSettings, uid_len: usize) -> Self {
        let offset = |value: Option<u32>| value.map(|v| v as usize);
        Self {
            uid_len,
            uid_offset: offset(settings.uid_offset),
            counter_offset: offset(settings.read_ctr_offset),
            picc_offset: offset(settings.picc_data_offset),
            mac_input_offset: offset(settings.mac_input_offset),
            mac_offset: offset(settings.mac_offset),
        }
    }
}

/// A template buffer with a validated layout
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SdmTemplate {
    bytes: Vec<u8>,
    layout: SdmLayout,
}

impl SdmTemplate {
    /// Validate `layout` against `bytes`
    pub fn new(bytes: impl Into<Vec<u8>>, layout: SdmLayout) -> Result<Self, FormatError> {
        let bytes = bytes.into();
        layout.validate(bytes.len())?;
        Ok(Self { bytes, layout })
    }

    /// SUN URL: `url` followed by `UID || Ctr || MAC`, MAC over `UID || Ctr`
    pub fn sun(url: &str, uid_len: usize) -> Result<Self, FormatError> {
        let uid_offset = url.len();
        let counter_offset = uid_offset + 2 * uid_len;
        let mac_offset = counter_offset + COUNTER_MIRROR_LEN;

        let mut bytes = url.as_bytes().to_vec();
        bytes.resize(mac_offset + MAC_MIRROR_LEN, b'0');
        let layout = SdmLayout::plain(uid_len, uid_offset, counter_offset)
            .with_mac(uid_offset, mac_offset);
        Self::new(bytes, layout)
    }

    /// Template bytes with placeholder windows
    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// Layout
    pub const fn layout(&self) -> &SdmLayout {
        &self.layout
    }

    /// Template length
    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    /// Whether the template is empty
    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sun_layout() {
        let template = SdmTemplate::sun("https://example.com/verify?sun=", 7).unwrap();
        let layout = template.layout();
        assert_eq!(layout.uid_offset, Some(31));
        assert_eq!(layout.counter_offset, Some(45));
        assert_eq!(layout.mac_input_offset, Some(31));
        assert_eq!(layout.mac_offset, Some(51));
        assert_eq!(template.len(), 67);
    }

    #[test]
    fn test_overlap_rejected() {
        let layout = SdmLayout::plain(7, 0, 10);
        assert_eq!(
            SdmTemplate::new(vec![b'0'; 64], layout).unwrap_err(),
            FormatError::Overlap { first: "UID", second: "read counter" }
        );
    }

    #[test]
    fn test_window_out_of_bounds() {
        let layout = SdmLayout::encrypted(7, 20);
        assert_eq!(
            SdmTemplate::new(vec![b'0'; 48], layout).unwrap_err(),
            FormatError::OutOfBounds { field: "PICC data", offset: 20, len: 32, size: 48 }
        );
    }

    #[test]
    fn test_mirror_rules() {
        let mut layout = SdmLayout::encrypted(7, 0);
        layout.uid_offset = Some(40);
        assert_eq!(layout.validate(128), Err(FormatError::ConflictingMirrors));

        let mut layout = SdmLayout::plain(7, 0, 14);
        layout.counter_offset = None;
        assert_eq!(layout.validate(128), Err(FormatError::MissingMirror));

        let layout = SdmLayout::encrypted(7, 0).with_mac(40, 32);
        assert_eq!(
            layout.validate(128),
            Err(FormatError::MacInputAfterMac { input: 40, mac: 32 })
        );
    }
}
