use std::io;

use rdx_wire::FrameError;
use thiserror::Error;

/// Failures that can arise while building or driving the mesh.
///
/// Mirrors the taxonomy in the wire crate: framing failures are always
/// fatal to a single Port, everything else here is either transient (and
/// handled by the caller without reaching this type) or fatal to the whole
/// connection attempt.
#[derive(Error, Debug)]
pub enum MeshError {
    #[error("couldn't resolve reducer address {0}")]
    Resolve(String),

    #[error("connect to {addr} failed: {source}")]
    Connect { addr: std::net::SocketAddr, #[source] source: io::Error },

    #[error("peer advertised protocol version {peer}, we speak {ours}")]
    HandshakeVersion { ours: u32, peer: u32 },

    #[error("peer identified itself as {peer_id} but the group lists {expected} at that slot")]
    HandshakeIdentity { peer_id: u64, expected: u64 },

    #[error("protocol violation on the wire: {0}")]
    Protocol(#[from] FrameError),

    #[error("local resource failure: {0}")]
    LocalResource(#[source] io::Error),

    #[error("port entered an unknown/invalid state: {0}")]
    InvalidState(String),
}
