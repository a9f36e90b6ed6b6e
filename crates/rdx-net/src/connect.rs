//! The nonblocking connect/accept handshake state machine.
//!
//! Outbound: `Needed -> Started -> Made -> AwaitingResponse -> AuthOk -> Ok`.
//! Inbound: `Accept -> SendingResponse -> AuthOk -> Ok`.
//! `Bad` is terminal from any state and means the Port must be torn down;
//! nothing ever transitions out of it.

use rdx_wire::{Message, PortId, PortKind};

use crate::error::MeshError;

/// Protocol version this build speaks. A peer advertising a different
/// version fails the handshake rather than attempting compatibility.
pub const PROTOCOL_VERSION: u32 = 1;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ConnectState {
    /// Outbound: socket not yet created.
    Needed,
    /// Outbound: `connect(2)` issued, socket not yet writable.
    Started,
    /// Outbound: socket became writable, connect() completed.
    Made,
    /// Outbound: startup request sent, waiting on the peer's response.
    AwaitingResponse,
    /// Inbound: accepted, waiting to read the peer's startup request.
    Accept,
    /// Inbound: startup response queued, waiting for it to flush.
    SendingResponse,
    /// Both directions: handshake payload validated, one flush/drain away
    /// from steady state.
    AuthOk,
    /// Steady state: ordinary framed traffic flows.
    Ok,
    /// Terminal failure. The owning Port is torn down on the next tick.
    Bad,
}

impl ConnectState {
    pub const fn is_terminal_failure(self) -> bool {
        matches!(self, Self::Bad)
    }

    pub const fn is_ready(self) -> bool {
        matches!(self, Self::Ok)
    }
}

/// Build the startup request an outbound Port sends once its socket
/// becomes writable.
pub fn startup_request(self_kind: PortKind, self_id: PortId) -> Message {
    Message::StartupRequest { version: PROTOCOL_VERSION, self_kind, self_id }
}

/// Build the startup response an inbound Port sends after validating the
/// peer's request.
pub fn startup_response(peer_kind: PortKind, peer_id: PortId) -> Message {
    Message::StartupResponse { version: PROTOCOL_VERSION, peer_kind, peer_id }
}

/// Validate an inbound startup request against the expected peer identity
/// (looked up by whoever owns the group membership table), advancing
/// `Accept -> SendingResponse` or failing into `Bad`.
pub fn validate_request(msg: &Message, expected_id: Option<PortId>) -> Result<(PortKind, PortId), MeshError> {
    let Message::StartupRequest { version, self_kind, self_id } = msg else {
        return Err(MeshError::InvalidState(format!("expected StartupRequest, got {msg:?}")));
    };
    if *version != PROTOCOL_VERSION {
        return Err(MeshError::HandshakeVersion { ours: PROTOCOL_VERSION, peer: *version });
    }
    if let Some(expected) = expected_id {
        if *self_id != expected {
            return Err(MeshError::HandshakeIdentity { peer_id: *self_id, expected });
        }
    }
    Ok((*self_kind, *self_id))
}

/// Validate an outbound Port's peer response, advancing
/// `AwaitingResponse -> AuthOk` or failing into `Bad`.
pub fn validate_response(msg: &Message, expected_id: PortId) -> Result<(PortKind, PortId), MeshError> {
    let Message::StartupResponse { version, peer_kind, peer_id } = msg else {
        return Err(MeshError::InvalidState(format!("expected StartupResponse, got {msg:?}")));
    };
    if *version != PROTOCOL_VERSION {
        return Err(MeshError::HandshakeVersion { ours: PROTOCOL_VERSION, peer: *version });
    }
    if *peer_id != expected_id {
        return Err(MeshError::HandshakeIdentity { peer_id: *peer_id, expected: expected_id });
    }
    Ok((*peer_kind, *peer_id))
}
