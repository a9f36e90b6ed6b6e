//! Wire format for the reduce-exchange mesh: a growable byte buffer, the
//! `T | L | payload` framing codec, and the message types carried inside
//! it. Deliberately free of any I/O — everything here operates on bytes
//! already in memory so it can be unit tested without a socket.

pub mod buffer;
pub mod codec;
pub mod error;
pub mod message;

pub use buffer::ByteBuffer;
pub use codec::{decode_frame, encode_frame, decode_message, encode_message, DecodeOutcome, EofDirection, PayloadReader};
pub use error::FrameError;
pub use message::{EofBody, Message, MessageType, PortId, PortKind};
