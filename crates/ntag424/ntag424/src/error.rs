use std::time::Duration;

use ntagkit_apdu_core::response::error::StatusError;
use ntagkit_apdu_core::{StatusWord, TransportError};

use crate::keys::KeyNo;
use crate::writer::WriteStep;

/// Result type for NTAG 424 operations
pub type Result<T> = std::result::Result<T, Error>;

/// Error type for NTAG 424 operations
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Channel or hardware failure
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// No response within the per-exchange window
    #[error("No response within {0:?}")]
    Timeout(Duration),

    /// The operation was cancelled by the caller
    #[error("Operation cancelled")]
    Cancelled,

    /// Mutual authentication failed
    #[error(transparent)]
    Auth(#[from] AuthError),

    /// Template, offset or key configuration rejected before any tag write
    #[error(transparent)]
    Format(#[from] FormatError),

    /// SUN/SDM encoding or verification failed
    #[error(transparent)]
    Sdm(#[from] SdmError),

    /// A write sequence failed
    #[error(transparent)]
    Write(#[from] WriteError),

    /// The configuration payload is not valid JSON for [`crate::Ntag424Config`]
    #[error("Invalid configuration: {0}")]
    Config(#[from] serde_json::Error),

    /// The tag answered with an error status
    #[error("Tag rejected command: {0}")]
    Tag(StatusError),

    /// A response MAC did not verify
    #[error("Integrity check failed: {0}")]
    Integrity(&'static str),

    /// The tag answered with something the protocol does not allow
    #[error("Protocol error: {0}")]
    Protocol(&'static str),

    /// A session already exists for this tag handle
    #[error("A session is already established")]
    AlreadyConnected,

    /// The operation needs an authenticated session
    #[error("Not authenticated")]
    NotAuthenticated,

    /// The session ran into its idle timeout or counter ceiling
    #[error("Session expired")]
    SessionExpired,

    /// Another operation currently owns the tag handle
    #[error("Tag handle is busy")]
    Busy,
}

impl Error {
    /// Whether the error is transient and the caller may simply retry
    pub const fn is_transient(&self) -> bool {
        matches!(self, Self::Timeout(_) | Self::Auth(AuthError::Timeout(_)))
    }

    /// Whether the tag answered the exchange instead of the channel failing
    pub const fn is_channel_failure(&self) -> bool {
        matches!(self, Self::Transport(_) | Self::Timeout(_) | Self::Cancelled)
    }
}

impl From<ntagkit_apdu_core::Error> for Error {
    fn from(error: ntagkit_apdu_core::Error) -> Self {
        use ntagkit_apdu_core::Error as Apdu;
        match error {
            Apdu::Transport(e) => Self::Transport(e),
            Apdu::Timeout(after) => Self::Timeout(after),
            Apdu::Cancelled => Self::Cancelled,
            Apdu::Response(_) => Self::Protocol("malformed response"),
            Apdu::Command(_) => Self::Protocol("command does not fit a short APDU"),
        }
    }
}

impl From<StatusError> for Error {
    fn from(error: StatusError) -> Self {
        Self::Tag(error)
    }
}

/// Mutual authentication errors
#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    /// The candidate key does not match the key stored in the slot
    #[error("Authentication failed: wrong key")]
    BadKey,

    /// The slot does not exist on the tag
    #[error("No such key: {0}")]
    NoSuchKey(KeyNo),

    /// The tag refused the handshake with another status
    #[error("Authentication rejected: {0}")]
    Rejected(StatusWord),

    /// The handshake frames were malformed
    #[error("Authentication protocol error: {0}")]
    Protocol(&'static str),

    /// Channel failure during the handshake
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// No response within the per-exchange window
    #[error("Authentication timed out after {0:?}")]
    Timeout(Duration),

    /// The handshake was cancelled
    #[error("Authentication cancelled")]
    Cancelled,
}

impl From<ntagkit_apdu_core::Error> for AuthError {
    fn from(error: ntagkit_apdu_core::Error) -> Self {
        use ntagkit_apdu_core::Error as Apdu;
        match error {
            Apdu::Transport(e) => Self::Transport(e),
            Apdu::Timeout(after) => Self::Timeout(after),
            Apdu::Cancelled => Self::Cancelled,
            Apdu::Response(_) => Self::Protocol("malformed response"),
            Apdu::Command(_) => Self::Protocol("command does not fit a short APDU"),
        }
    }
}

/// Rejected template, offset, key or access configuration
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FormatError {
    /// Two substitution windows share bytes
    #[error("{first} window overlaps {second} window")]
    Overlap {
        /// Earlier window
        first: &'static str,
        /// Later window
        second: &'static str,
    },

    /// A window does not fit the buffer
    #[error("{field} window {offset}..{end} exceeds size {size}", end = .offset + .len)]
    OutOfBounds {
        /// Window name
        field: &'static str,
        /// Window start
        offset: usize,
        /// Window length
        len: usize,
        /// Buffer or file size
        size: usize,
    },

    /// MAC input must start at or before the MAC window
    #[error("MAC input offset {input} is past MAC offset {mac}")]
    MacInputAfterMac {
        /// MAC input offset
        input: usize,
        /// MAC offset
        mac: usize,
    },

    /// Plaintext mirrors cannot be combined with encrypted PICC data
    #[error("plaintext UID/counter mirrors cannot be combined with PICC data")]
    ConflictingMirrors,

    /// The template carries no UID or counter source
    #[error("template mirrors neither UID nor read counter")]
    MissingMirror,

    /// The payload does not fit the target file
    #[error("payload of {len} bytes exceeds the {max} byte file")]
    TooLarge {
        /// Payload length
        len: usize,
        /// File capacity
        max: usize,
    },

    /// A window lies inside the abbreviated URI prefix
    #[error("offset {0} lies inside the abbreviated URI prefix")]
    InsidePrefix(usize),

    /// A key string is not 32 hex characters
    #[error("invalid AES-128 key for {0}")]
    InvalidKey(&'static str),

    /// A required key is missing
    #[error("missing key: {0}")]
    MissingKey(&'static str),

    /// Key slot out of range
    #[error("key number {0} out of range 0-4")]
    InvalidKeyNo(u8),

    /// An access-right code is not one of 0-4, E or F
    #[error("invalid access right code {0:?}")]
    InvalidAccessRight(char),

    /// UID of unsupported length or bad encoding
    #[error("invalid UID")]
    InvalidUid,

    /// Read counter beyond 24 bits
    #[error("counter {0} exceeds 24 bits")]
    CounterOutOfRange(u64),

    /// SUN and SDM requested at once
    #[error("SUN and SDM cannot both be enabled")]
    ConflictingModes,

    /// Configuration writes require the authenticated state
    #[error("configuration writes require authentication first")]
    AuthenticationRequired,

    /// The access rights would lock the authenticated key out of the write
    #[error("access rights deny {0} the template write")]
    WriteDenied(KeyNo),

    /// The template is not usable
    #[error("invalid template: {0}")]
    InvalidTemplate(&'static str),
}

/// SUN/SDM codec errors
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SdmError {
    /// The mirrored MAC does not match
    #[error("SDM MAC mismatch")]
    MacMismatch,

    /// A mirrored field could not be decoded
    #[error("malformed SDM data: {0}")]
    Malformed(&'static str),

    /// A key needed by the layout was not supplied
    #[error("missing SDM key: {0}")]
    MissingKey(&'static str),

    /// The template or inputs are invalid
    #[error(transparent)]
    Format(#[from] FormatError),
}

/// Configuration write failures
#[derive(Debug, thiserror::Error)]
pub enum WriteError {
    /// The sequence stopped after some steps were acknowledged by the tag
    ///
    /// The tag may now hold a mix of old and new settings. Re-authenticate and
    /// read back the file settings before writing again.
    #[error(
        "write interrupted at {failed} after {} acknowledged step(s): {source}",
        .completed.len()
    )]
    PartialApply {
        /// Steps the tag acknowledged
        completed: Vec<WriteStep>,
        /// Step that failed
        failed: WriteStep,
        /// Underlying failure
        source: Box<Error>,
    },
}
