//! Failures of the host's transceive primitive

/// Why the reader could not complete an exchange with the tag
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransportError {
    /// The reader could not open a channel to the tag
    #[error("Could not connect to the tag")]
    Connection,

    /// The tag left the field or was never presented
    #[error("No tag present")]
    NoTag,

    /// The reader reported a failure of its own
    #[error("Reader error: {0}")]
    Reader(String),
}
