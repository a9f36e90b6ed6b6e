//! The reduce-exchange dispatcher: plan/reducer message routing, per-plan
//! spill queues, and the tick-driven event loop that ties them to the mesh
//! built by `rdx_net`.

pub mod context;
pub mod dispatch;
pub mod error;
pub mod planport;
pub mod queue;

pub use context::ReducerContext;
pub use dispatch::{drain_plan_work, handle_plan_message, handle_reducer_message, RouteAction};
pub use error::DispatchError;
pub use planport::{DuplicateEof, PlanArena, PlanPort, PlanToken, TOMBSTONE};
pub use queue::{MemoryQueue, PlanQueue, SpillQueue};
