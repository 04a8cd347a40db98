//! Failures found while reading a tag's answer

use super::status::StatusWord;

/// A well-formed answer whose status word is not a success
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("Tag answered {status} ({})", status.description())]
pub struct StatusError {
    /// The offending status word
    pub status: StatusWord,
}

impl From<StatusWord> for StatusError {
    fn from(status: StatusWord) -> Self {
        Self { status }
    }
}

/// The received bytes do not form a response APDU
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ResponseError {
    /// Fewer than the two status bytes arrived
    #[error("Truncated response: {0} bytes, expected at least 2")]
    Incomplete(usize),

    /// The tag answered with an error status
    #[error(transparent)]
    Status(#[from] StatusError),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_error_names_the_status() {
        let error = StatusError::from(StatusWord::new(0x91, 0xAE));
        assert_eq!(error.status.to_u16(), 0x91AE);
        assert!(error.to_string().starts_with("Tag answered 91 AE"));
    }
}
