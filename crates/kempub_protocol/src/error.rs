use thiserror::Error;

/// Errors produced while framing, parsing or protecting wire messages.
#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("{field} too long ({len} > {max})")]
    FieldTooLong {
        field: &'static str,
        len: usize,
        max: usize,
    },
    #[error("encrypted frame too large ({len} > {max})")]
    FrameTooLarge { len: usize, max: usize },
    #[error("unknown message kind {0}")]
    UnknownKind(u8),
    #[error("invalid utf-8 in {0}")]
    InvalidUtf8(&'static str),
    #[error("truncated frame")]
    Truncated,
    #[error("connection closed")]
    Closed,
    #[error("encryption failed")]
    EncryptionFailed,
    #[error("decryption failed")]
    DecryptionFailed,
    #[error("invalid key material: {0}")]
    InvalidKey(String),
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
}
