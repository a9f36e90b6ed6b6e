use thiserror::Error;

/// Failures that can arise while routing frames between plan workers and
/// peer reducers. Distinct from `rdx_net::MeshError` and `rdx_wire::FrameError`:
/// those are about a single connection, this is about dispatcher-level
/// bookkeeping invariants.
#[derive(Error, Debug)]
pub enum DispatchError {
    #[error("duplicate EOF for plan {plan_id} from reducer {rdc_id}")]
    DuplicateEof { plan_id: u64, rdc_id: u64 },

    #[error("message type {0:?} is not valid in this direction")]
    UnexpectedMessage(rdx_wire::MessageType),

    #[error("port {0:?} reached an unknown/invalid state")]
    UnknownPortState(rdx_net::ConnectState),

    #[error("spill queue I/O failure: {0}")]
    SpillIo(#[from] std::io::Error),
}
