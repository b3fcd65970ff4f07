//! Infrastructure adapters and runtime bootstrap.

pub mod error;
pub mod http;
pub mod layout;
pub mod runtime;
pub mod server;
pub mod telemetry;
pub mod watch;
