/// Errors that can occur while decoding a lib0-encoded binary stream.
///
/// All of these indicate that the input buffer was truncated, corrupted or
/// produced by an incompatible encoder. None of them are recoverable for the
/// struct currently being decoded - the caller should abort decoding the
/// surrounding message entirely.
#[derive(Debug, Clone, Eq, PartialEq, thiserror::Error)]
pub enum Error {
    /// Reached the end of the input buffer before a value was fully read.
    #[error("unexpected end of buffer")]
    EndOfBuffer,

    /// A length prefix (for a string, byte array or varint) claimed more bytes
    /// than remain in the buffer.
    #[error("length prefix {len} exceeds remaining buffer of {remaining} bytes")]
    LengthExceeded { len: usize, remaining: usize },

    /// A varint used more continuation bytes than are valid for its target
    /// integer width.
    #[error("variable-length integer is too long")]
    VarIntTooLong,

    /// A UTF-8 string payload contained invalid bytes.
    #[error("invalid UTF-8 sequence")]
    InvalidUtf8,

    /// The tag byte prefixing an [crate::any::Any] value did not match any
    /// known content kind.
    #[error("unknown `Any` tag: {0}")]
    UnexpectedValue(u8),
}

pub type Result<T> = std::result::Result<T, Error>;
