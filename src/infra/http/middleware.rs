use std::time::Instant;

use axum::{
    body::Body,
    extract::State,
    http::{Request, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
};
use tracing::{error, warn};
use uuid::Uuid;

use crate::application::{
    dispatch::strip_base,
    error::{ErrorReport, HttpError},
    livereload::DEV_PREFIX,
};

use super::DevState;

/// Request id shared by the logging middleware and the dispatcher.
#[derive(Clone)]
pub struct RequestId(pub String);

pub async fn set_request_context(mut request: Request<Body>, next: Next) -> Response {
    let id = RequestId(Uuid::new_v4().to_string());
    request.extensions_mut().insert(id.clone());

    let mut response = next.run(request).await;
    response.extensions_mut().insert(id);
    response
}

pub async fn log_responses(request: Request<Body>, next: Next) -> Response {
    let method = request.method().clone();
    let uri = request.uri().clone();
    let start = Instant::now();

    let request_id = request
        .extensions()
        .get::<RequestId>()
        .map(|id| id.0.clone())
        .unwrap_or_default();

    let mut response = next.run(request).await;
    let status = response.status();

    if status.is_client_error() || status.is_server_error() {
        let elapsed_ms = start.elapsed().as_millis();
        let report = response.extensions_mut().remove::<ErrorReport>();
        let (source, messages) = match report {
            Some(report) => (report.source, report.messages),
            None => ("unknown", Vec::new()),
        };
        let detail = messages
            .first()
            .cloned()
            .unwrap_or_else(|| "no diagnostic available".to_string());

        if status.is_server_error() {
            error!(
                target = "vellum::http::response",
                status = status.as_u16(),
                method = %method,
                path = %uri.path(),
                query = uri.query().unwrap_or(""),
                elapsed_ms = elapsed_ms,
                source = source,
                detail = %detail,
                chain = ?messages,
                request_id = request_id,
                "request failed",
            );
        } else {
            warn!(
                target = "vellum::http::response",
                status = status.as_u16(),
                method = %method,
                path = %uri.path(),
                elapsed_ms = elapsed_ms,
                source = source,
                detail = %detail,
                request_id = request_id,
                "client request error",
            );
        }
    }

    response
}

/// Reject requests outside the configured base with a hint pointing at it.
/// Developer endpoints are always reachable.
pub async fn base_guard(State(state): State<DevState>, request: Request<Body>, next: Next) -> Response {
    let base = state.routes.snapshot().base.clone();
    let path = request.uri().path().to_string();

    let inside = base.is_empty()
        || is_dev_path(&path)
        || strip_base(&path, &base).len() < path.len();
    if inside {
        return next.run(request).await;
    }

    let hint = format!(
        "This server is mounted at {base}/ - did you mean to visit {base}{path} instead?"
    );
    HttpError::new(
        "infra::http::middleware::base_guard",
        StatusCode::NOT_FOUND,
        hint,
        format!("`{path}` is outside base `{base}`"),
    )
    .into_response()
}

/// `/__vellum` itself or anything below it.
fn is_dev_path(path: &str) -> bool {
    path.strip_prefix(DEV_PREFIX)
        .is_some_and(|rest| rest.is_empty() || rest.starts_with('/'))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dev_prefix_matches_whole_segments_only() {
        assert!(is_dev_path("/__vellum"));
        assert!(is_dev_path("/__vellum/errors"));
        assert!(!is_dev_path("/__vellumfoo"));
        assert!(!is_dev_path("/docs/__vellum/errors"));
    }
}
