//! Length-prefixed framing: `T | L | payload`.
//!
//! `T` is a one-byte type tag, `L` is a 4-byte big-endian length *including*
//! the four bytes of `L` itself, and `payload` is `L - 4` bytes. All
//! multi-byte integers in payloads are fixed-width big-endian; strings are
//! null-terminated; a `PortId` is 8 bytes.
//!
//! This module only ever touches the generic frame envelope. Payload
//! interpretation is role-specific and lives in `plan`, `reducer`, and
//! `handshake`.

use crate::{
    buffer::ByteBuffer,
    error::FrameError,
    message::{EofBody, Message, MessageType, PortId, PortKind},
};

/// Minimum legal value of the length field (covers just itself, zero
/// payload bytes).
pub const MIN_FRAME_LEN: u32 = 4;
const HEADER_LEN: usize = 1 + 4;

/// Result of attempting to decode one frame from a [`ByteBuffer`].
pub enum DecodeOutcome {
    /// A whole frame was present and consumed. The cursor now sits just
    /// past its payload.
    Complete { tag: MessageType, payload: Vec<u8> },
    /// Not enough bytes buffered yet; the cursor is unchanged.
    Partial,
    /// The bytes at the cursor don't form a legal frame. The cursor is
    /// unchanged; the caller should treat the Port as fatally broken.
    Invalid(FrameError),
}

/// Attempt to decode exactly one frame from the unread portion of `buf`.
///
/// On anything other than [`DecodeOutcome::Complete`] the cursor is left
/// exactly where it started — callers never need to snapshot/restore
/// themselves, that bookkeeping lives here.
pub fn decode_frame(buf: &mut ByteBuffer) -> DecodeOutcome {
    let start = buf.cursor();
    let bytes = buf.unread();

    if bytes.len() < HEADER_LEN {
        return DecodeOutcome::Partial;
    }

    let tag_byte = bytes[0];
    let len = u32::from_be_bytes([bytes[1], bytes[2], bytes[3], bytes[4]]);

    if len < MIN_FRAME_LEN {
        return DecodeOutcome::Invalid(FrameError::LengthBelowMinimum(len));
    }

    let tag = match MessageType::try_from(tag_byte) {
        Ok(tag) => tag,
        Err(bad) => return DecodeOutcome::Invalid(FrameError::UnknownType(bad)),
    };

    let payload_len = (len - 4) as usize;
    let total_len = HEADER_LEN + payload_len;

    if bytes.len() < total_len {
        return DecodeOutcome::Partial;
    }

    let payload = bytes[HEADER_LEN..total_len].to_vec();
    buf.consume(total_len);
    debug_assert_eq!(buf.cursor().saturating_sub(start) + start, buf.cursor());
    DecodeOutcome::Complete { tag, payload }
}

/// Encode a frame with the given tag and payload bytes into `buf`,
/// computing and writing the length prefix.
pub fn encode_frame(buf: &mut ByteBuffer, tag: MessageType, payload: &[u8]) {
    let len = 4 + payload.len() as u32;
    buf.append(&[tag.tag()]);
    buf.append(&len.to_be_bytes());
    buf.append(payload);
}

/// A cursor over an owned/borrowed payload slice, used by the role-specific
/// parsers below. Every read can fail with [`FrameError::TruncatedPayload`];
/// nothing here ever panics on malformed input.
pub struct PayloadReader<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> PayloadReader<'a> {
    pub fn new(bytes: &'a [u8]) -> Self {
        Self { bytes, pos: 0 }
    }

    fn need(&self, n: usize) -> Result<(), FrameError> {
        if self.pos + n > self.bytes.len() {
            Err(FrameError::TruncatedPayload { needed: n, available: self.bytes.len() - self.pos })
        } else {
            Ok(())
        }
    }

    pub fn read_u32(&mut self) -> Result<u32, FrameError> {
        self.need(4)?;
        let v = u32::from_be_bytes(self.bytes[self.pos..self.pos + 4].try_into().unwrap());
        self.pos += 4;
        Ok(v)
    }

    pub fn read_u64(&mut self) -> Result<u64, FrameError> {
        self.need(8)?;
        let v = u64::from_be_bytes(self.bytes[self.pos..self.pos + 8].try_into().unwrap());
        self.pos += 8;
        Ok(v)
    }

    pub fn read_port_id(&mut self) -> Result<PortId, FrameError> {
        self.read_u64()
    }

    pub fn read_port_kind(&mut self) -> Result<PortKind, FrameError> {
        Ok(PortKind::from_u32(self.read_u32()?))
    }

    pub fn read_bytes(&mut self, n: usize) -> Result<&'a [u8], FrameError> {
        self.need(n)?;
        let out = &self.bytes[self.pos..self.pos + n];
        self.pos += n;
        Ok(out)
    }

    pub fn read_cstring(&mut self) -> Result<&'a str, FrameError> {
        let nul = self.bytes[self.pos..]
            .iter()
            .position(|&b| b == 0)
            .ok_or(FrameError::UnterminatedString)?;
        let s = std::str::from_utf8(&self.bytes[self.pos..self.pos + nul])
            .map_err(|_| FrameError::UnterminatedString)?;
        self.pos += nul + 1;
        Ok(s)
    }

    pub fn remaining(&self) -> usize {
        self.bytes.len() - self.pos
    }

    /// Assert the payload is fully consumed; a protocol violation
    /// (`TrailingBytes`) otherwise.
    pub fn finish(self) -> Result<(), FrameError> {
        if self.remaining() == 0 { Ok(()) } else { Err(FrameError::TrailingBytes) }
    }
}

/// Which side of a Port is decoding an `EOF`/`CLOSE` frame.
///
/// The wire tag is shared across three structurally different payloads;
/// the reader always knows which one it expects from the kind of Port it
/// owns, so this is supplied by the caller rather than sniffed from the
/// bytes.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EofDirection {
    /// Read on a plan-facing Port: carries the broadcast target set.
    FromPlan,
    /// Read on a reducer-facing Port: carries the originating plan id.
    FromReducer,
    /// Read off a local plan's queue: carries only the sending reducer id.
    FromQueue,
}

fn decode_eof_body(direction: EofDirection, r: &mut PayloadReader<'_>) -> Result<EofBody, FrameError> {
    match direction {
        EofDirection::FromPlan => {
            let count = r.read_u32()? as usize;
            let mut targets = Vec::with_capacity(count);
            for _ in 0..count {
                targets.push(r.read_port_id()?);
            }
            Ok(EofBody::ToTargets { targets })
        }
        EofDirection::FromReducer => Ok(EofBody::ForPlan { plan_id: r.read_port_id()? }),
        EofDirection::FromQueue => Ok(EofBody::FromReducer { rdc_id: r.read_port_id()? }),
    }
}

fn encode_eof_body(out: &mut Vec<u8>, body: &EofBody) {
    match body {
        EofBody::ToTargets { targets } => {
            put_u32(out, targets.len() as u32);
            for t in targets {
                put_port_id(out, *t);
            }
        }
        EofBody::ForPlan { plan_id } => put_port_id(out, *plan_id),
        EofBody::FromReducer { rdc_id } => put_port_id(out, *rdc_id),
    }
}

/// Decode a frame's payload into a [`Message`], given the tag already
/// extracted by [`decode_frame`] and the direction to use for `EOF`/`CLOSE`
/// bodies (ignored for every other tag).
pub fn decode_message(
    tag: MessageType,
    payload: &[u8],
    eof_direction: EofDirection,
) -> Result<Message, FrameError> {
    let mut r = PayloadReader::new(payload);
    let msg = match tag {
        MessageType::StartupRequest => {
            let version = r.read_u32()?;
            let self_kind = r.read_port_kind()?;
            let self_id = r.read_port_id()?;
            Message::StartupRequest { version, self_kind, self_id }
        }
        MessageType::StartupResponse => {
            let version = r.read_u32()?;
            let peer_kind = r.read_port_kind()?;
            let peer_id = r.read_port_id()?;
            Message::StartupResponse { version, peer_kind, peer_id }
        }
        MessageType::Error => {
            let message = r.read_cstring()?.to_owned();
            Message::Error { message }
        }
        MessageType::PlanToReducerData => {
            let count = r.read_u32()? as usize;
            let mut targets = Vec::with_capacity(count);
            for _ in 0..count {
                targets.push(r.read_port_id()?);
            }
            let data = r.read_bytes(r.remaining())?.to_vec();
            Message::PlanToReducerData { data, targets }
        }
        MessageType::ReducerToReducerData => {
            let plan_id = r.read_port_id()?;
            let data = r.read_bytes(r.remaining())?.to_vec();
            Message::ReducerToReducerData { plan_id, data }
        }
        MessageType::ReducerToPlanData => {
            let from_rdc_id = r.read_port_id()?;
            let data = r.read_bytes(r.remaining())?.to_vec();
            Message::ReducerToPlanData { from_rdc_id, data }
        }
        MessageType::Eof => Message::Eof(decode_eof_body(eof_direction, &mut r)?),
        MessageType::PlanClose => Message::PlanClose(decode_eof_body(eof_direction, &mut r)?),
    };
    r.finish()?;
    Ok(msg)
}

/// Encode a [`Message`] as a whole frame into `buf`.
pub fn encode_message(buf: &mut ByteBuffer, msg: &Message) {
    let mut payload = Vec::new();
    let tag = match msg {
        Message::StartupRequest { version, self_kind, self_id } => {
            put_u32(&mut payload, *version);
            put_port_kind(&mut payload, *self_kind);
            put_port_id(&mut payload, *self_id);
            MessageType::StartupRequest
        }
        Message::StartupResponse { version, peer_kind, peer_id } => {
            put_u32(&mut payload, *version);
            put_port_kind(&mut payload, *peer_kind);
            put_port_id(&mut payload, *peer_id);
            MessageType::StartupResponse
        }
        Message::Error { message } => {
            put_cstring(&mut payload, message);
            MessageType::Error
        }
        Message::PlanToReducerData { data, targets } => {
            put_u32(&mut payload, targets.len() as u32);
            for t in targets {
                put_port_id(&mut payload, *t);
            }
            payload.extend_from_slice(data);
            MessageType::PlanToReducerData
        }
        Message::ReducerToReducerData { plan_id, data } => {
            put_port_id(&mut payload, *plan_id);
            payload.extend_from_slice(data);
            MessageType::ReducerToReducerData
        }
        Message::ReducerToPlanData { from_rdc_id, data } => {
            put_port_id(&mut payload, *from_rdc_id);
            payload.extend_from_slice(data);
            MessageType::ReducerToPlanData
        }
        Message::Eof(body) => {
            encode_eof_body(&mut payload, body);
            MessageType::Eof
        }
        Message::PlanClose(body) => {
            encode_eof_body(&mut payload, body);
            MessageType::PlanClose
        }
    };
    encode_frame(buf, tag, &payload);
}

/// Append helpers matching [`PayloadReader`]'s read shapes, used when
/// composing outgoing payloads.
pub fn put_u32(out: &mut Vec<u8>, v: u32) {
    out.extend_from_slice(&v.to_be_bytes());
}

pub fn put_u64(out: &mut Vec<u8>, v: u64) {
    out.extend_from_slice(&v.to_be_bytes());
}

pub fn put_port_id(out: &mut Vec<u8>, v: PortId) {
    put_u64(out, v);
}

pub fn put_port_kind(out: &mut Vec<u8>, v: PortKind) {
    put_u32(out, v.as_u32());
}

pub fn put_cstring(out: &mut Vec<u8>, s: &str) {
    out.extend_from_slice(s.as_bytes());
    out.push(0);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encode_decode_round_trip() {
        let mut buf = ByteBuffer::new();
        let mut payload = Vec::new();
        put_u32(&mut payload, 7);
        put_port_kind(&mut payload, PortKind::Reduce);
        put_port_id(&mut payload, 42);
        encode_frame(&mut buf, MessageType::StartupRequest, &payload);

        match decode_frame(&mut buf) {
            DecodeOutcome::Complete { tag, payload: got } => {
                assert_eq!(tag, MessageType::StartupRequest);
                let mut r = PayloadReader::new(&got);
                assert_eq!(r.read_u32().unwrap(), 7);
                assert_eq!(r.read_port_kind().unwrap(), PortKind::Reduce);
                assert_eq!(r.read_port_id().unwrap(), 42);
                r.finish().unwrap();
            }
            _ => panic!("expected Complete"),
        }
    }

    #[test]
    fn partial_frame_does_not_advance_cursor() {
        let mut buf = ByteBuffer::new();
        // header says 10 payload bytes follow, but we only provide 2.
        buf.append(&[MessageType::Eof.tag()]);
        buf.append(&14u32.to_be_bytes());
        buf.append(&[1, 2]);

        let before = buf.cursor();
        assert!(matches!(decode_frame(&mut buf), DecodeOutcome::Partial));
        assert_eq!(buf.cursor(), before);
        assert_eq!(buf.remaining(), 7);
    }

    #[test]
    fn length_below_minimum_is_invalid() {
        let mut buf = ByteBuffer::new();
        buf.append(&[MessageType::Eof.tag()]);
        buf.append(&3u32.to_be_bytes());
        match decode_frame(&mut buf) {
            DecodeOutcome::Invalid(FrameError::LengthBelowMinimum(3)) => {}
            other => panic!("expected LengthBelowMinimum, got {other:?}"),
        }
    }

    #[test]
    fn unknown_tag_is_invalid() {
        let mut buf = ByteBuffer::new();
        buf.append(&[0xFF]);
        buf.append(&4u32.to_be_bytes());
        match decode_frame(&mut buf) {
            DecodeOutcome::Invalid(FrameError::UnknownType(0xFF)) => {}
            other => panic!("expected UnknownType, got {other:?}"),
        }
    }

    #[test]
    fn truncation_never_advances_cursor_past_last_whole_frame() {
        let mut buf = ByteBuffer::new();
        let mut payload = Vec::new();
        put_port_id(&mut payload, 1);
        encode_frame(&mut buf, MessageType::Eof, &payload);
        let full_len = buf.len();

        // Append a second, truncated frame after the first whole one.
        buf.append(&[MessageType::Eof.tag()]);
        buf.append(&20u32.to_be_bytes());
        buf.append(&[9, 9, 9]);

        // First frame decodes fine.
        assert!(matches!(decode_frame(&mut buf), DecodeOutcome::Complete { .. }));
        assert_eq!(buf.cursor(), full_len);

        // Second (truncated) frame must not advance further.
        let before = buf.cursor();
        assert!(matches!(decode_frame(&mut buf), DecodeOutcome::Partial));
        assert_eq!(buf.cursor(), before);
    }

    #[test]
    fn cstring_round_trip() {
        let mut payload = Vec::new();
        put_cstring(&mut payload, "boom");
        let mut r = PayloadReader::new(&payload);
        assert_eq!(r.read_cstring().unwrap(), "boom");
        r.finish().unwrap();
    }

    #[test]
    fn missing_terminator_is_protocol_violation() {
        let payload = vec![b'x', b'y'];
        let mut r = PayloadReader::new(&payload);
        assert_eq!(r.read_cstring().unwrap_err(), FrameError::UnterminatedString);
    }

    #[test]
    fn eof_to_targets_round_trip() {
        let mut buf = ByteBuffer::new();
        let msg = Message::Eof(EofBody::ToTargets { targets: vec![1, 2, 3] });
        encode_message(&mut buf, &msg);
        let DecodeOutcome::Complete { tag, payload } = decode_frame(&mut buf) else {
            panic!("expected Complete")
        };
        assert_eq!(decode_message(tag, &payload, EofDirection::FromPlan).unwrap(), msg);
    }

    #[test]
    fn eof_for_plan_round_trip() {
        let mut buf = ByteBuffer::new();
        let msg = Message::PlanClose(EofBody::ForPlan { plan_id: 99 });
        encode_message(&mut buf, &msg);
        let DecodeOutcome::Complete { tag, payload } = decode_frame(&mut buf) else {
            panic!("expected Complete")
        };
        assert_eq!(decode_message(tag, &payload, EofDirection::FromReducer).unwrap(), msg);
    }

    #[test]
    fn eof_from_queue_round_trip() {
        let mut buf = ByteBuffer::new();
        let msg = Message::Eof(EofBody::FromReducer { rdc_id: 7 });
        encode_message(&mut buf, &msg);
        let DecodeOutcome::Complete { tag, payload } = decode_frame(&mut buf) else {
            panic!("expected Complete")
        };
        assert_eq!(decode_message(tag, &payload, EofDirection::FromQueue).unwrap(), msg);
    }

    #[test]
    fn data_message_round_trip() {
        let mut buf = ByteBuffer::new();
        let msg = Message::PlanToReducerData { data: vec![9, 9, 9], targets: vec![10, 20] };
        encode_message(&mut buf, &msg);
        let DecodeOutcome::Complete { tag, payload } = decode_frame(&mut buf) else {
            panic!("expected Complete")
        };
        assert_eq!(decode_message(tag, &payload, EofDirection::FromPlan).unwrap(), msg);
    }
}

impl std::fmt::Debug for DecodeOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Complete { tag, payload } => {
                f.debug_struct("Complete").field("tag", tag).field("len", &payload.len()).finish()
            }
            Self::Partial => write!(f, "Partial"),
            Self::Invalid(e) => write!(f, "Invalid({e})"),
        }
    }
}
