//! Nonblocking TCP mesh plumbing: the connect/accept handshake state
//! machine, group membership parsing and full-mesh dial planning, raw
//! socket option setup, and the mio event loop driving it all.

pub mod connect;
pub mod error;
pub mod eventloop;
pub mod mesh;
pub mod port;
pub mod sockopt;

pub use connect::{startup_request, startup_response, validate_request, validate_response, ConnectState, PROTOCOL_VERSION};
pub use error::MeshError;
pub use eventloop::{EventLoop, LoopEvent, PortToken};
pub use mesh::{build_mesh, parse_group, should_dial, DialIntent, GroupMembership, ReducerNode};
pub use port::{IoOutcome, Port};
