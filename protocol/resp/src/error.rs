use thiserror::Error;

/// Errors produced while decoding RESP frames.
///
/// Incomplete input is not an error: the incremental decoder signals it
/// out-of-band (`Ok(None)`) and the parser simply waits for more bytes.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ParseError {
    /// The byte at the cursor is not a valid RESP type tag.
    ///
    /// The parser recovers from this by skipping the offending byte.
    #[error("unexpected type tag 0x{0:02x}")]
    BadTypeTag(u8),

    /// A length prefix could not be parsed (non-digit, overflow, or out of
    /// the allowed range). The parser resets and the caller replies with a
    /// protocol error.
    #[error("invalid length prefix")]
    InvalidLength,

    /// Structurally invalid input (missing CRLF, bad framing).
    #[error("protocol error: {0}")]
    Protocol(&'static str),

    /// The accumulation buffer would exceed the configured maximum.
    #[error("read buffer limit exceeded")]
    BufferOverflow,
}
