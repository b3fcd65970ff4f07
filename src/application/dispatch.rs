//! Per-request entry point.
//!
//! Builds a [`RequestContext`] from the raw request, renders it through the
//! [`ExecutionBridge`] inside the request's [`ErrorScope`], and turns the
//! outcome into exactly one response.

use std::net::SocketAddr;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Instant;

use axum::{
    Json,
    body::Body,
    extract::ConnectInfo,
    http::{HeaderMap, Method, Request, StatusCode, header},
    response::{IntoResponse, Response},
};
use bytes::{Bytes, BytesMut};
use futures::FutureExt;
use http_body_util::BodyExt;
use metrics::{counter, histogram};
use serde_json::json;
use thiserror::Error;
use tracing::{debug, warn};
use url::Url;
use uuid::Uuid;

use crate::application::bridge::{ExecutionBridge, RenderFailure, ResponseSink};
use crate::application::diagnostics::{DetachedTasks, ErrorScope, FailureHook};
use crate::application::error::ErrorReport;
use crate::application::livereload::{DevPayload, EVENTS_PATH};
use crate::application::request::RequestContext;
use crate::cache::RouteCache;
use crate::domain::manifest::{ManifestSnapshot, TrailingSlash};
use crate::presentation::views::render_failure_overlay;

const SOURCE: &str = "application::dispatch";
const METRIC_REQUESTS_TOTAL: &str = "vellum_requests_total";
const METRIC_RENDER_MS: &str = "vellum_render_ms";

#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("Incomplete request")]
    IncompleteRequest,
    #[error("failed to read request body: {0}")]
    Body(String),
    #[error("invalid request url: {0}")]
    Url(#[from] url::ParseError),
    #[error(transparent)]
    Render(#[from] RenderFailure),
}

/// Request as handed over by the transport. Method and URL are optional so
/// that malformed input can be rejected here rather than by the transport.
#[derive(Debug)]
pub struct RawRequest {
    pub method: Option<Method>,
    /// Request target: origin-form (`/path?query`) or absolute-form.
    pub url: Option<String>,
    pub headers: HeaderMap,
    pub body: Body,
    pub client_address: Option<SocketAddr>,
    pub request_id: Option<String>,
}

impl RawRequest {
    pub fn from_http(request: Request<Body>) -> Self {
        let (parts, body) = request.into_parts();
        let client_address = parts
            .extensions
            .get::<ConnectInfo<SocketAddr>>()
            .map(|ConnectInfo(addr)| *addr);
        Self {
            method: Some(parts.method),
            url: Some(parts.uri.to_string()),
            headers: parts.headers,
            body,
            client_address,
            request_id: None,
        }
    }

    pub fn with_request_id(mut self, request_id: impl Into<String>) -> Self {
        self.request_id = Some(request_id.into());
        self
    }
}

pub struct Dispatcher {
    routes: Arc<RouteCache>,
    bridge: Arc<ExecutionBridge>,
    hook: FailureHook,
}

impl Dispatcher {
    pub fn new(routes: Arc<RouteCache>, bridge: Arc<ExecutionBridge>, hook: FailureHook) -> Self {
        Self {
            routes,
            bridge,
            hook,
        }
    }

    pub fn hook(&self) -> &FailureHook {
        &self.hook
    }

    /// Handle one request. Always produces a response; no failure escapes.
    pub async fn handle(&self, raw: RawRequest) -> Response {
        let started = Instant::now();
        let wants_json = accepts_json(&raw.headers);

        let request = match self.build_context(raw).await {
            Ok(request) => request,
            Err(DispatchError::IncompleteRequest) => {
                counter!(METRIC_REQUESTS_TOTAL, "outcome" => "incomplete").increment(1);
                return incomplete_response();
            }
            Err(err) => {
                counter!(METRIC_REQUESTS_TOTAL, "outcome" => "failed").increment(1);
                let failure = RenderFailure::from_error(&err);
                self.hook.report_in(None, failure.clone());
                return failure_response("", &failure, wants_json);
            }
        };

        let path = request.pathname.clone();
        let seeded_error = request.seeded_error.clone();
        let scope = ErrorScope::new(path.as_str(), request.request_id.as_str());
        let tasks = DetachedTasks::new(self.hook.clone(), Some(scope.clone()));
        let bridge = self.bridge.clone();

        let (rendered, mut sink) = scope
            .clone()
            .run(async move {
                let mut sink = ResponseSink::new();
                let rendered = AssertUnwindSafe(bridge.render(request, &mut sink, tasks))
                    .catch_unwind()
                    .await;
                (rendered, sink)
            })
            .await;
        let rendered = rendered.unwrap_or_else(|panic| Err(RenderFailure::from_panic(panic.as_ref())));
        histogram!(METRIC_RENDER_MS).record(started.elapsed().as_secs_f64() * 1000.0);

        match (rendered, sink.take()) {
            (Ok(()), Some(response)) => {
                counter!(METRIC_REQUESTS_TOTAL, "outcome" => "rendered").increment(1);
                let resolved = seeded_error.as_ref().is_some_and(|seeded| {
                    self.hook
                        .state()
                        .resolve_seeded(&path, seeded, scope.request_id())
                });
                if resolved {
                    debug!(target = "vellum::errors", path = %path, "Recorded error resolved");
                    self.hook
                        .livereload()
                        .send(DevPayload::ErrorResolved { path: path.clone() });
                }
                response
            }
            (Ok(()), None) => {
                counter!(METRIC_REQUESTS_TOTAL, "outcome" => "failed").increment(1);
                let failure = RenderFailure::named(
                    "EmptyResponseError",
                    "render completed without sending a response",
                )
                .with_hint("the rendering handler must send exactly one response");
                self.hook.report_in(Some(&scope), failure.clone());
                failure_response(&path, &failure, wants_json)
            }
            (Err(failure), Some(response)) => {
                counter!(METRIC_REQUESTS_TOTAL, "outcome" => "failed").increment(1);
                warn!(
                    target = "vellum::errors",
                    path = %path,
                    status = response.status().as_u16(),
                    "Render failed after its response was sent"
                );
                self.hook.report_in(Some(&scope), failure);
                response
            }
            (Err(failure), None) => {
                counter!(METRIC_REQUESTS_TOTAL, "outcome" => "failed").increment(1);
                self.hook.report_in(Some(&scope), failure.clone());
                failure_response(&path, &failure, wants_json)
            }
        }
    }

    async fn build_context(&self, raw: RawRequest) -> Result<RequestContext, DispatchError> {
        let (Some(method), Some(target)) = (raw.method, raw.url) else {
            return Err(DispatchError::IncompleteRequest);
        };

        let manifest = self.routes.snapshot();
        let (raw_path, query) = split_target(&target);
        let pathname = compute_pathname(raw_path, &manifest.base, manifest.trailing_slash);
        let url = request_url(&raw.headers, &manifest, &pathname, query)?;

        let body = if method == Method::GET || method == Method::HEAD {
            None
        } else {
            Some(read_body(raw.body).await?)
        };

        let seeded_error = self.hook.state().error_for(&pathname);
        let request_id = raw
            .request_id
            .unwrap_or_else(|| Uuid::new_v4().to_string());

        Ok(RequestContext {
            request_id,
            method,
            url,
            pathname,
            headers: raw.headers,
            body,
            client_address: raw.client_address,
            manifest,
            static_like: None,
            matched: None,
            seeded_error,
        })
    }
}

/// Buffer the whole body. Chunks are concatenated in arrival order; the
/// read ends at end-of-stream.
pub async fn read_body(body: Body) -> Result<Bytes, DispatchError> {
    let mut body = body;
    let mut buffer = BytesMut::new();
    while let Some(frame) = body.frame().await {
        let frame = frame.map_err(|err| DispatchError::Body(err.to_string()))?;
        if let Ok(data) = frame.into_data() {
            buffer.extend_from_slice(&data);
        }
    }
    Ok(buffer.freeze())
}

/// Split a request target into its path and query. Absolute-form targets
/// drop their scheme and authority; the query is never inspected for them.
fn split_target(target: &str) -> (&str, Option<&str>) {
    let target = target.split_once('#').map_or(target, |(head, _)| head);
    let (head, query) = match target.split_once('?') {
        Some((head, query)) => (head, Some(query)),
        None => (target, None),
    };
    let path = match head.split_once("://") {
        Some((_, rest)) if !head.starts_with('/') => {
            rest.find('/').map_or("", |index| &rest[index..])
        }
        _ => head,
    };
    (path, query)
}

/// Base-relative pathname used for route matching.
pub fn compute_pathname(raw_path: &str, base: &str, trailing_slash: TrailingSlash) -> String {
    if raw_path.is_empty() {
        return match trailing_slash {
            TrailingSlash::Never => String::new(),
            _ => "/".to_string(),
        };
    }
    strip_base(raw_path, base).to_string()
}

/// Remove a normalized `base` (no trailing slash) from `path`. Paths outside
/// the base are returned unchanged.
pub fn strip_base<'a>(path: &'a str, base: &str) -> &'a str {
    let base = base.trim_end_matches('/');
    if base.is_empty() {
        return path;
    }
    match path.strip_prefix(base) {
        Some("") => "/",
        Some(rest) if rest.starts_with('/') => rest,
        _ => path,
    }
}

/// Absolute request URL with the mount base re-applied.
fn request_url(
    headers: &HeaderMap,
    manifest: &ManifestSnapshot,
    pathname: &str,
    query: Option<&str>,
) -> Result<Url, DispatchError> {
    let (scheme, authority) = request_origin(headers);
    let mut url = Url::parse(&format!("{scheme}://{authority}"))?;
    url.set_path(&format!("{}{}", manifest.base.trim_end_matches('/'), pathname));
    url.set_query(query);
    Ok(url)
}

/// Scheme and authority, preferring proxy-forwarded headers.
pub fn request_origin(headers: &HeaderMap) -> (String, String) {
    let first = |name: &str| {
        headers
            .get(name)
            .and_then(|value| value.to_str().ok())
            .and_then(|value| value.split(',').next())
            .map(str::trim)
            .filter(|value| !value.is_empty())
            .map(str::to_string)
    };

    let authority = first("x-forwarded-host")
        .or_else(|| first(header::HOST.as_str()))
        .unwrap_or_else(|| "localhost".to_string());
    let scheme = first("x-forwarded-proto").unwrap_or_else(|| "http".to_string());
    (scheme, authority)
}

fn accepts_json(headers: &HeaderMap) -> bool {
    headers
        .get(header::ACCEPT)
        .and_then(|value| value.to_str().ok())
        .is_some_and(|accept| {
            accept.contains("application/json") && !accept.contains("text/html")
        })
}

fn incomplete_response() -> Response {
    let mut response = (StatusCode::INTERNAL_SERVER_ERROR, "Incomplete request").into_response();
    ErrorReport::from_message(
        SOURCE,
        StatusCode::INTERNAL_SERVER_ERROR,
        "request is missing its method or url",
    )
    .attach(&mut response);
    response
}

/// Status 500 carrying the developer-formatted failure.
pub fn failure_response(path: &str, failure: &RenderFailure, wants_json: bool) -> Response {
    let status = StatusCode::INTERNAL_SERVER_ERROR;
    if !wants_json {
        return render_failure_overlay(path, failure, EVENTS_PATH, status);
    }

    let mut response = (status, Json(json!({ "path": path, "error": failure }))).into_response();
    ErrorReport::from_message(SOURCE, status, failure.to_string()).attach(&mut response);
    response
}
