// Request lifecycle module.
// State machine for single AI requests and a coordinator for many of them.

pub mod coordinator;
pub mod state;

pub use coordinator::{
    CoordinatorError, DEFAULT_MAX_CONCURRENT, DEFAULT_MAX_QUEUED, Execute, QueuedRequest,
    RequestCoordinator, RequestFuture, Ticket,
};
pub use state::{
    DEFAULT_MAX_RETRIES, Priority, RequestMetadata, RequestState, RequestStatus, TransitionError,
};
