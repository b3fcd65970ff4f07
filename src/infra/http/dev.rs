//! Developer endpoints under the reserved prefix.

use std::convert::Infallible;

use async_stream::stream;
use axum::{
    Json,
    extract::{Query, State},
    response::{
        IntoResponse, Response,
        sse::{Event, KeepAlive, Sse},
    },
};
use serde::Deserialize;
use serde_json::json;
use tokio::sync::broadcast::error::RecvError;
use tracing::{debug, warn};

use crate::application::livereload::DevPayload;

use super::DevState;

/// Live-reload stream. Errors already recorded are replayed first so a
/// freshly opened overlay is current.
pub async fn events(State(state): State<DevState>) -> Response {
    let hook = state.dispatcher.hook().clone();
    let mut rx = hook.livereload().subscribe();
    let recorded = hook.state().path_errors();

    let stream = stream! {
        for entry in recorded {
            let payload = DevPayload::Error { path: entry.path, err: entry.failure };
            if let Some(event) = to_event(&payload) {
                yield Ok::<Event, Infallible>(event);
            }
        }
        loop {
            match rx.recv().await {
                Ok(payload) => {
                    if let Some(event) = to_event(&payload) {
                        yield Ok::<Event, Infallible>(event);
                    }
                }
                Err(RecvError::Lagged(skipped)) => {
                    warn!(target = "vellum::http::dev", skipped, "Live-reload client lagged");
                }
                Err(RecvError::Closed) => break,
            }
        }
    };

    Sse::new(stream)
        .keep_alive(KeepAlive::default())
        .into_response()
}

fn to_event(payload: &DevPayload) -> Option<Event> {
    match Event::default().event(payload.event_name()).json_data(payload) {
        Ok(event) => Some(event),
        Err(err) => {
            warn!(target = "vellum::http::dev", error = %err, "Failed to encode live-reload event");
            None
        }
    }
}

pub async fn list_errors(State(state): State<DevState>) -> Response {
    let controller = state.dispatcher.hook().state();
    Json(json!({
        "paths": controller.path_errors(),
        "server": controller.server_errors(),
    }))
    .into_response()
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct ClearQuery {
    path: Option<String>,
}

/// Clear one path's error, or everything when no path is given.
pub async fn clear_errors(
    State(state): State<DevState>,
    Query(query): Query<ClearQuery>,
) -> Response {
    let hook = state.dispatcher.hook();
    let cleared_paths: Vec<String> = match query.path {
        Some(path) => {
            if hook.state().clear_path(&path) {
                vec![path]
            } else {
                Vec::new()
            }
        }
        None => {
            let paths = hook
                .state()
                .path_errors()
                .into_iter()
                .filter_map(|entry| entry.path)
                .collect();
            hook.state().clear_all();
            paths
        }
    };

    for path in &cleared_paths {
        hook.livereload()
            .send(DevPayload::ErrorResolved { path: path.clone() });
    }
    debug!(
        target = "vellum::http::dev",
        cleared = cleared_paths.len(),
        "Recorded errors cleared"
    );

    Json(json!({ "cleared": cleared_paths })).into_response()
}
