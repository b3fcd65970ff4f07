mod dev;
mod middleware;

pub use middleware::RequestId;

use std::sync::Arc;

use axum::{
    Router,
    body::Body,
    extract::State,
    http::Request,
    middleware as axum_middleware,
    response::Response,
    routing::get,
};

use crate::{
    application::{
        dispatch::{Dispatcher, RawRequest},
        livereload::{ERRORS_PATH, EVENTS_PATH},
    },
    cache::RouteCache,
};

use middleware::{base_guard, log_responses, set_request_context};

#[derive(Clone)]
pub struct DevState {
    pub dispatcher: Arc<Dispatcher>,
    pub routes: Arc<RouteCache>,
}

/// Developer endpoints first; every other request goes to the dispatcher.
pub fn build_router(state: DevState) -> Router {
    Router::new()
        .route(EVENTS_PATH, get(dev::events))
        .route(ERRORS_PATH, get(dev::list_errors).delete(dev::clear_errors))
        .fallback(dispatch)
        .with_state(state.clone())
        .layer(axum_middleware::from_fn_with_state(state, base_guard))
        .layer(axum_middleware::from_fn(log_responses))
        .layer(axum_middleware::from_fn(set_request_context))
}

async fn dispatch(State(state): State<DevState>, request: Request<Body>) -> Response {
    let request_id = request
        .extensions()
        .get::<RequestId>()
        .map(|id| id.0.clone());

    let raw = RawRequest::from_http(request);
    let raw = match request_id {
        Some(id) => raw.with_request_id(id),
        None => raw,
    };
    state.dispatcher.handle(raw).await
}
