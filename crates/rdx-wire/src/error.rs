use thiserror::Error;

/// A framing or payload decode failure.
///
/// Every variant here is the spec's "Protocol violation" taxonomy made
/// concrete: these are always fatal to the Port that produced them, never
/// retried.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FrameError {
    #[error("frame length {0} is below the minimum of 4")]
    LengthBelowMinimum(u32),

    #[error("unknown message tag {0:#04x}")]
    UnknownType(u8),

    #[error("truncated payload: needed {needed} more bytes, had {available}")]
    TruncatedPayload { needed: usize, available: usize },

    #[error("missing null terminator in string field")]
    UnterminatedString,

    #[error("unexpected message type for this context: {0:?}")]
    UnexpectedMessage(crate::message::MessageType),

    #[error("trailing bytes after parsing a complete frame payload")]
    TrailingBytes,
}
