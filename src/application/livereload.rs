//! One-way push channel to connected developer clients.

use serde::Serialize;
use tokio::sync::broadcast;

use crate::application::bridge::RenderFailure;

/// Reserved path prefix for developer endpoints; never routed to pages.
pub const DEV_PREFIX: &str = "/__vellum";
pub const EVENTS_PATH: &str = "/__vellum/events";
pub const ERRORS_PATH: &str = "/__vellum/errors";

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum DevPayload {
    /// `path` is `None` for failures not attributable to any request.
    Error {
        path: Option<String>,
        err: RenderFailure,
    },
    ErrorResolved {
        path: String,
    },
    FullReload {
        path: String,
    },
}

impl DevPayload {
    pub fn event_name(&self) -> &'static str {
        match self {
            DevPayload::Error { .. } => "error",
            DevPayload::ErrorResolved { .. } => "error-resolved",
            DevPayload::FullReload { .. } => "full-reload",
        }
    }
}

#[derive(Clone)]
pub struct LiveReload {
    tx: broadcast::Sender<DevPayload>,
}

impl LiveReload {
    pub fn new(capacity: usize) -> Self {
        let (tx, _rx) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    /// Fire-and-forget. Returns the number of clients reached; having no
    /// clients connected is not an error.
    pub fn send(&self, payload: DevPayload) -> usize {
        self.tx.send(payload).unwrap_or(0)
    }

    pub fn subscribe(&self) -> broadcast::Receiver<DevPayload> {
        self.tx.subscribe()
    }
}
