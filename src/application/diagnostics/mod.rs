//! Failure attribution.
//!
//! Every request runs inside an [`ErrorScope`]; failures that surface later
//! in detached work are recorded in [`ControllerState`] under the owning
//! request's path and pushed to developer clients.

mod hook;
mod scope;
mod state;

pub use hook::{Attribution, DetachedTasks, FailureHook};
pub use scope::ErrorScope;
pub use state::{ControllerState, RecordedFailure};
