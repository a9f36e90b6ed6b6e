//! `Port`: one mesh-side or plan-side TCP connection, wrapping a
//! nonblocking stream with its framing buffers and handshake state.

use std::collections::VecDeque;
use std::io::{self, Read, Write};
use std::net::SocketAddr;

use mio::net::TcpStream;
use rdx_wire::{decode_frame, encode_frame, ByteBuffer, DecodeOutcome, Message, MessageType, PortId, PortKind};
use tracing::{debug, trace, warn};

use crate::connect::ConnectState;
use crate::error::MeshError;
use crate::sockopt;

const READ_CHUNK: usize = 16 * 1024;

/// Why a read or write attempt on a Port didn't produce a usable outcome.
pub enum IoOutcome {
    /// One or more complete frames were decoded; see the caller's buffer.
    Progressed,
    /// The kernel has nothing more to give right now (`WouldBlock`).
    WouldBlock,
    /// The peer closed the connection (`read()` returned 0, or a fatal
    /// error occurred). The Port must be torn down.
    Disconnected,
}

/// One TCP connection in the mesh, whatever role it plays (plan-facing
/// backend, peer reducer, listener-spawned inbound).
pub struct Port {
    pub stream: TcpStream,
    pub peer_addr: SocketAddr,
    pub kind: PortKind,
    pub peer_id: Option<PortId>,
    pub state: ConnectState,

    in_buf: ByteBuffer,
    out_buf: ByteBuffer,
    /// Frames that couldn't be appended to `out_buf` yet because a prior
    /// write was still in flight; drained in FIFO order once the socket
    /// is writable again. This is the backpressure point named in the
    /// concurrency model: a full backlog means the writer side must stop
    /// pulling more work for this Port.
    backlog: VecDeque<Vec<u8>>,
    writable_armed: bool,
}

impl Port {
    pub fn new(stream: TcpStream, peer_addr: SocketAddr, kind: PortKind) -> Self {
        sockopt::configure(&stream);
        Self {
            stream,
            peer_addr,
            kind,
            peer_id: None,
            state: ConnectState::Needed,
            in_buf: ByteBuffer::new(),
            out_buf: ByteBuffer::new(),
            backlog: VecDeque::new(),
            writable_armed: false,
        }
    }

    /// Number of frames queued behind the in-flight write. A nonzero
    /// backlog is this Port's backpressure signal.
    pub fn backlog_len(&self) -> usize {
        self.backlog.len()
    }

    pub fn is_backlogged(&self) -> bool {
        !self.backlog.is_empty()
    }

    /// Queue a fully-framed message for sending, or append straight to the
    /// live write buffer if nothing is currently in flight.
    pub fn enqueue(&mut self, msg: &Message) {
        let mut scratch = ByteBuffer::new();
        let tag_payload = encode_one(&mut scratch, msg);
        if self.out_buf.is_empty() && self.backlog.is_empty() {
            self.out_buf.append(&tag_payload);
        } else {
            self.backlog.push_back(tag_payload);
        }
    }

    /// Pull buffered socket bytes into `in_buf`. Returns `WouldBlock` once
    /// the kernel has nothing more, `Disconnected` on EOF/fatal error.
    pub fn fill_read_buf(&mut self) -> IoOutcome {
        loop {
            let tail = self.in_buf.reserve_tail(READ_CHUNK);
            match self.stream.read(tail) {
                Ok(0) => {
                    self.in_buf.truncate_tail(READ_CHUNK, 0);
                    return IoOutcome::Disconnected;
                }
                Ok(n) => {
                    self.in_buf.truncate_tail(READ_CHUNK, n);
                    if n < READ_CHUNK {
                        return IoOutcome::Progressed;
                    }
                }
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => {
                    self.in_buf.truncate_tail(READ_CHUNK, 0);
                    return IoOutcome::WouldBlock;
                }
                Err(e) if e.kind() == io::ErrorKind::Interrupted => {
                    self.in_buf.truncate_tail(READ_CHUNK, 0);
                }
                Err(e) => {
                    self.in_buf.truncate_tail(READ_CHUNK, 0);
                    warn!(peer = ?self.peer_addr, error = %e, "read failed");
                    return IoOutcome::Disconnected;
                }
            }
        }
    }

    /// Decode one frame from the bytes already buffered by
    /// [`Self::fill_read_buf`]. Cursor-restore-on-partial-frame is handled
    /// inside `decode_frame` itself.
    pub fn try_decode_frame(&mut self) -> DecodeOutcome {
        let outcome = decode_frame(&mut self.in_buf);
        if matches!(outcome, DecodeOutcome::Complete { .. }) {
            trace!(peer = ?self.peer_addr, "decoded frame");
        }
        outcome
    }

    /// Flush as much of the pending write as the socket will currently
    /// accept, then top `out_buf` back up from `backlog`.
    pub fn flush(&mut self) -> IoOutcome {
        loop {
            if self.out_buf.is_empty() {
                match self.backlog.pop_front() {
                    Some(next) => self.out_buf.append(&next),
                    None => {
                        self.writable_armed = false;
                        return IoOutcome::WouldBlock;
                    }
                }
            }
            match self.stream.write(self.out_buf.unread()) {
                Ok(0) => return IoOutcome::WouldBlock,
                Ok(n) => self.out_buf.consume(n),
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => {
                    self.writable_armed = true;
                    return IoOutcome::WouldBlock;
                }
                Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
                Err(e) => {
                    warn!(peer = ?self.peer_addr, error = %e, "write failed");
                    return IoOutcome::Disconnected;
                }
            }
        }
    }

    pub fn has_pending_writes(&self) -> bool {
        !self.out_buf.is_empty() || !self.backlog.is_empty()
    }

    pub fn close(&mut self) {
        debug!(peer = ?self.peer_addr, "closing port");
        let _ = self.stream.shutdown(std::net::Shutdown::Both);
        self.state = ConnectState::Bad;
    }
}

fn encode_one(scratch: &mut ByteBuffer, msg: &Message) -> Vec<u8> {
    rdx_wire::encode_message(scratch, msg);
    scratch.unread().to_vec()
}

/// Build a raw frame header+payload without going through a `Message`, for
/// callers that already have an encoded payload (the dispatcher forwards
/// `rdcstore`-sourced bytes verbatim rather than re-parsing them).
pub fn encode_raw(tag: MessageType, payload: &[u8]) -> Vec<u8> {
    let mut buf = ByteBuffer::new();
    encode_frame(&mut buf, tag, payload);
    buf.unread().to_vec()
}

pub fn connect_failed(addr: SocketAddr, source: io::Error) -> MeshError {
    MeshError::Connect { addr, source }
}
