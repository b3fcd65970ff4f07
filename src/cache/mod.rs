//! Route cache.
//!
//! Keeps the manifest snapshot current as the project changes:
//!
//! - **Rebuild**: `added`/`removed` files regenerate the route table and
//!   swap in a new snapshot
//! - **Clear**: `changed` files only drop memoized pathname matches

mod events;
mod lock;
mod matcher;
mod route_cache;

pub(crate) use lock::mutex_lock;

pub use events::{FsEvent, FsEventKind, RebuildAction};
pub use matcher::{RouteMatch, RouteMatcher, find_route};
pub use route_cache::{RebuildError, RebuildOutcome, RouteCache};
