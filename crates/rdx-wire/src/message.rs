/// 64-bit opaque identity for a `Port`'s peer.
///
/// Used both as a reducer id and, on plan-facing ports, as the plan id.
pub type PortId = u64;

/// What kind of endpoint a `Port` (or its peer) is.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum PortKind {
    Local = 0,
    Backend = 1,
    Plan = 2,
    Reduce = 3,
    Invalid = 255,
}

impl PortKind {
    pub const fn as_u32(self) -> u32 {
        self as u8 as u32
    }

    pub fn from_u32(v: u32) -> Self {
        match v {
            0 => Self::Local,
            1 => Self::Backend,
            2 => Self::Plan,
            3 => Self::Reduce,
            _ => Self::Invalid,
        }
    }
}

/// One-byte wire tags, per the framing contract: `T | L | payload`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u8)]
pub enum MessageType {
    StartupRequest = b'Q',
    StartupResponse = b'S',
    Error = b'E',
    PlanToReducerData = b'D',
    ReducerToReducerData = b'R',
    ReducerToPlanData = b'P',
    Eof = b'F',
    PlanClose = b'C',
}

impl MessageType {
    pub const fn tag(self) -> u8 {
        self as u8
    }
}

impl TryFrom<u8> for MessageType {
    type Error = u8;

    fn try_from(tag: u8) -> Result<Self, u8> {
        match tag {
            b'Q' => Ok(Self::StartupRequest),
            b'S' => Ok(Self::StartupResponse),
            b'E' => Ok(Self::Error),
            b'D' => Ok(Self::PlanToReducerData),
            b'R' => Ok(Self::ReducerToReducerData),
            b'P' => Ok(Self::ReducerToPlanData),
            b'F' => Ok(Self::Eof),
            b'C' => Ok(Self::PlanClose),
            other => Err(other),
        }
    }
}

/// Decoded payload of one complete frame.
///
/// Mirrors the message table in the wire protocol spec exactly; each
/// variant carries only what that message type puts on the wire.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Message {
    StartupRequest { version: u32, self_kind: PortKind, self_id: PortId },
    StartupResponse { version: u32, peer_kind: PortKind, peer_id: PortId },
    Error { message: String },
    /// `plan -> reducer`: broadcast data to a set of target reducers.
    PlanToReducerData { data: Vec<u8>, targets: Vec<PortId> },
    /// `reducer -> reducer`: data destined for one plan.
    ReducerToReducerData { plan_id: PortId, data: Vec<u8> },
    /// `reducer -> plan queue`: data tagged with the originating reducer.
    ReducerToPlanData { from_rdc_id: PortId, data: Vec<u8> },
    /// End-of-stream. Carries a target set when sent `plan -> reducer`,
    /// otherwise just the plan/reducer id implied by context (carried
    /// separately, not in this variant, to keep the wire payload minimal:
    /// see `EofBody`).
    Eof(EofBody),
    PlanClose(EofBody),
}

/// Body shared by `EOF` and `CLOSE`, whose payload shape depends on
/// direction (spec: "plan->reducer: target set; reducer->reducer: plan_id;
/// reducer->plan queue: rdc_id only").
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum EofBody {
    /// Sent by a plan worker: broadcast to this set of peer reducers.
    ToTargets { targets: Vec<PortId> },
    /// Sent reducer-to-reducer: which plan this EOF concerns.
    ForPlan { plan_id: PortId },
    /// Pushed into a local plan's queue on behalf of a peer reducer; the
    /// queue already knows which plan it belongs to, so only the
    /// originating reducer id travels with it.
    FromReducer { rdc_id: PortId },
}
