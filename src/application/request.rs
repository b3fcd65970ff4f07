use std::net::SocketAddr;
use std::sync::Arc;

use axum::http::{HeaderMap, Method};
use bytes::Bytes;
use url::Url;

use crate::application::diagnostics::RecordedFailure;
use crate::cache::RouteMatch;
use crate::domain::manifest::ManifestSnapshot;

/// Normalized view of one inbound request, owned by its in-flight handling.
#[derive(Debug, Clone)]
pub struct RequestContext {
    pub request_id: String,
    pub method: Method,
    /// Absolute URL with the mount base re-applied.
    pub url: Url,
    /// Base-relative pathname used for route matching.
    pub pathname: String,
    pub headers: HeaderMap,
    /// Buffered body; `None` for GET and HEAD.
    pub body: Option<Bytes>,
    pub client_address: Option<SocketAddr>,
    /// Snapshot the request was built against. A rebuild mid-flight does
    /// not affect it.
    pub manifest: Arc<ManifestSnapshot>,
    /// Unresolved until the matched route is known.
    pub static_like: Option<bool>,
    pub matched: Option<RouteMatch>,
    /// Failure previously recorded for this pathname, if any.
    pub seeded_error: Option<RecordedFailure>,
}

impl RequestContext {
    /// Attach the matched route and resolve `static_like` from its
    /// prerender flag.
    pub fn resolve_route(&mut self, matched: Option<RouteMatch>) {
        self.static_like = Some(
            matched
                .as_ref()
                .is_some_and(|route_match| route_match.route.prerender),
        );
        self.matched = matched;
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|value| value.to_str().ok())
    }
}
