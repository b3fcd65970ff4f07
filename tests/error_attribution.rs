use std::num::NonZeroUsize;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use axum::{
    Router,
    body::Body,
    http::{HeaderMap, Method, Request, StatusCode, header},
    response::{IntoResponse, Response},
};
use http_body_util::BodyExt;
use serde_json::Value;
use tempfile::TempDir;
use tokio::sync::broadcast;
use tokio::time::{sleep, timeout};
use tower::ServiceExt;

use vellum::{
    application::{
        bridge::{
            ENV_CONTEXT_MODULE, EnvironmentOptions, ExecutionContext, HANDLER_EXPORT,
            IsolatedRuntime, ModuleExports, ModuleLoader, RENDER_ENTRYPOINT, RenderFailure,
            RenderHandler, ResponseSink, RuntimeError, exported_json,
        },
        diagnostics::DetachedTasks,
        dispatch::RawRequest,
        livereload::DevPayload,
        request::RequestContext,
    },
    config::{DevSettings, ProjectSettings},
    domain::manifest::SiteConfig,
    infra::{
        http::build_router,
        server::{self, DevServer},
    },
};

/// Handler whose behavior is picked by the request pathname.
struct ScriptedHandler {
    flaky: Arc<AtomicBool>,
    loader: Arc<dyn ModuleLoader>,
}

#[async_trait]
impl RenderHandler for ScriptedHandler {
    async fn handle(
        &self,
        request: RequestContext,
        sink: &mut ResponseSink,
        tasks: DetachedTasks,
    ) -> Result<(), RenderFailure> {
        match request.pathname.as_str() {
            "/slow" => {
                sink.send("slow page".into_response())?;
                tasks.spawn(async {
                    sleep(Duration::from_millis(40)).await;
                    Err(RenderFailure::named("LateError", "background work failed"))
                });
                Ok(())
            }
            "/fast" => sink.send("fast page".into_response()),
            "/echo" => {
                let body = request.body.unwrap_or_default();
                sink.send((StatusCode::OK, body).into_response())
            }
            "/base" => {
                let id = self
                    .loader
                    .resolve_id(ENV_CONTEXT_MODULE)
                    .ok_or_else(|| RenderFailure::new("env context unresolved"))?;
                let source = self
                    .loader
                    .load(&id)
                    .ok_or_else(|| RenderFailure::new("env context not loadable"))?;
                let manifest = exported_json(&source, "manifest")
                    .ok_or_else(|| RenderFailure::new("manifest export missing"))?;
                let base = manifest["base"].as_str().unwrap_or_default().to_string();
                sink.send(base.into_response())
            }
            "/flaky" if self.flaky.load(Ordering::SeqCst) => {
                Err(RenderFailure::named("FlakyError", "not ready yet"))
            }
            "/flaky" => sink.send("recovered".into_response()),
            "/quick" if self.flaky.load(Ordering::SeqCst) => {
                Err(RenderFailure::named("QuickError", "first attempt failed"))
            }
            "/quick" => {
                tasks
                    .spawn(async {
                        Err(RenderFailure::named("DetachedError", "warmup failed"))
                    })
                    .await
                    .map_err(|err| RenderFailure::new(err.to_string()))?;
                sink.send("quick page".into_response())
            }
            "/twice" => {
                sink.send("first".into_response())?;
                sink.send("second".into_response())
            }
            "/panic" => panic!("renderer exploded"),
            "/empty" => Ok(()),
            _ => sink.send(StatusCode::NOT_FOUND.into_response()),
        }
    }
}

struct ScriptedRuntime {
    flaky: Arc<AtomicBool>,
}

struct ScriptedContext {
    name: String,
    handler: Arc<dyn RenderHandler>,
}

#[async_trait]
impl ExecutionContext for ScriptedContext {
    fn name(&self) -> &str {
        &self.name
    }

    async fn import(&self, specifier: &str) -> Result<ModuleExports, RuntimeError> {
        if specifier != RENDER_ENTRYPOINT {
            return Err(RuntimeError::ModuleNotFound {
                specifier: specifier.to_string(),
            });
        }
        Ok(ModuleExports::default().with_handler(HANDLER_EXPORT, self.handler.clone()))
    }
}

#[async_trait]
impl IsolatedRuntime for ScriptedRuntime {
    async fn create_context(
        &self,
        options: EnvironmentOptions,
        loader: Arc<dyn ModuleLoader>,
    ) -> Result<Box<dyn ExecutionContext>, RuntimeError> {
        Ok(Box::new(ScriptedContext {
            name: options.name,
            handler: Arc::new(ScriptedHandler {
                flaky: self.flaky.clone(),
                loader,
            }),
        }))
    }
}

struct Harness {
    router: Router,
    server: DevServer,
    flaky: Arc<AtomicBool>,
    _dir: TempDir,
}

async fn harness(site: SiteConfig) -> Harness {
    let dir = tempfile::tempdir().expect("tempdir");
    let project = ProjectSettings {
        root: dir.path().to_path_buf(),
        pages_dir: "src/pages".into(),
    };
    let dev = DevSettings {
        watch_interval: Duration::from_millis(10),
        error_notify_delay: Duration::from_millis(5),
        route_cache_capacity: NonZeroUsize::new(16).expect("non-zero"),
        livereload_capacity: 32,
    };
    let flaky = Arc::new(AtomicBool::new(false));
    let runtime = ScriptedRuntime {
        flaky: flaky.clone(),
    };
    let server = server::assemble(&project, site, &dev, &runtime)
        .await
        .expect("assemble dev server");
    Harness {
        router: build_router(server.state.clone()),
        server,
        flaky,
        _dir: dir,
    }
}

fn get(uri: &str) -> Request<Body> {
    Request::builder()
        .uri(uri)
        .header(header::HOST, "localhost:4321")
        .header(header::ACCEPT, "application/json")
        .body(Body::empty())
        .expect("request")
}

async fn body_text(response: Response) -> String {
    let bytes = response
        .into_body()
        .collect()
        .await
        .expect("collect body")
        .to_bytes();
    String::from_utf8(bytes.to_vec()).expect("utf-8 body")
}

async fn recorded(router: &Router) -> Value {
    let response = router
        .clone()
        .oneshot(get("/__vellum/errors"))
        .await
        .expect("response");
    serde_json::from_str(&body_text(response).await).expect("json body")
}

async fn next_error(rx: &mut broadcast::Receiver<DevPayload>) -> (Option<String>, RenderFailure) {
    loop {
        let payload = timeout(Duration::from_secs(1), rx.recv())
            .await
            .expect("payload before timeout")
            .expect("channel open");
        if let DevPayload::Error { path, err } = payload {
            return (path, err);
        }
    }
}

#[tokio::test]
async fn late_failure_is_attributed_to_the_request_that_spawned_it() {
    let h = harness(SiteConfig::default()).await;
    let mut rx = h.server.livereload.subscribe();

    let (slow, fast) = tokio::join!(
        h.router.clone().oneshot(get("/slow")),
        h.router.clone().oneshot(get("/fast")),
    );
    assert_eq!(slow.expect("response").status(), StatusCode::OK);
    assert_eq!(fast.expect("response").status(), StatusCode::OK);

    let (path, err) = next_error(&mut rx).await;
    assert_eq!(path.as_deref(), Some("/slow"));
    assert_eq!(err.name, "LateError");

    let listed = recorded(&h.router).await;
    let paths = listed["paths"].as_array().expect("paths");
    assert_eq!(paths.len(), 1);
    assert_eq!(paths[0]["path"], "/slow");
    assert!(paths[0]["requestId"].is_string());
    assert!(listed["server"].as_array().expect("server").is_empty());
}

#[tokio::test]
async fn concurrent_late_failures_do_not_cross_paths() {
    let h = harness(SiteConfig::default()).await;

    let requests = ["/slow", "/fast", "/slow", "/slow", "/fast", "/slow"];
    let responses = futures::future::join_all(
        requests
            .iter()
            .map(|path| h.router.clone().oneshot(get(path))),
    )
    .await;
    for response in responses {
        assert_eq!(response.expect("response").status(), StatusCode::OK);
    }

    sleep(Duration::from_millis(150)).await;
    let state = h.server.state.dispatcher.hook().state();
    assert!(state.error_for("/slow").is_some());
    assert!(state.error_for("/fast").is_none());
    assert!(state.server_errors().is_empty());
}

#[tokio::test]
async fn successful_render_clears_seeded_error() {
    let h = harness(SiteConfig::default()).await;
    let mut rx = h.server.livereload.subscribe();

    h.flaky.store(true, Ordering::SeqCst);
    let failed = h.router.clone().oneshot(get("/flaky")).await.expect("response");
    assert_eq!(failed.status(), StatusCode::INTERNAL_SERVER_ERROR);
    let payload: Value = serde_json::from_str(&body_text(failed).await).expect("json body");
    assert_eq!(payload["error"]["name"], "FlakyError");
    let (path, _) = next_error(&mut rx).await;
    assert_eq!(path.as_deref(), Some("/flaky"));

    h.flaky.store(false, Ordering::SeqCst);
    let recovered = h.router.clone().oneshot(get("/flaky")).await.expect("response");
    assert_eq!(recovered.status(), StatusCode::OK);
    assert_eq!(body_text(recovered).await, "recovered");

    let resolved = timeout(Duration::from_secs(1), async {
        loop {
            if let Ok(DevPayload::ErrorResolved { path }) = rx.recv().await {
                return path;
            }
        }
    })
    .await
    .expect("resolution pushed");
    assert_eq!(resolved, "/flaky");
    assert!(h.server.state.dispatcher.hook().state().error_for("/flaky").is_none());
}

#[tokio::test]
async fn failure_raised_during_a_successful_render_is_kept() {
    let h = harness(SiteConfig::default()).await;
    let mut rx = h.server.livereload.subscribe();
    let state = h.server.state.dispatcher.hook().state().clone();

    h.flaky.store(true, Ordering::SeqCst);
    let failed = h.router.clone().oneshot(get("/quick")).await.expect("response");
    assert_eq!(failed.status(), StatusCode::INTERNAL_SERVER_ERROR);
    let seeded = state.error_for("/quick").expect("seeded");
    assert_eq!(seeded.failure.name, "QuickError");

    h.flaky.store(false, Ordering::SeqCst);
    let ok = h.router.clone().oneshot(get("/quick")).await.expect("response");
    assert_eq!(ok.status(), StatusCode::OK);

    let current = state.error_for("/quick").expect("detached failure kept");
    assert_eq!(current.failure.name, "DetachedError");
    assert_ne!(current.request_id, seeded.request_id);

    sleep(Duration::from_millis(50)).await;
    while let Ok(payload) = rx.try_recv() {
        assert!(
            !matches!(payload, DevPayload::ErrorResolved { .. }),
            "unexpected resolution: {payload:?}"
        );
    }
}

#[tokio::test]
async fn incomplete_requests_are_rejected_without_recording() {
    let h = harness(SiteConfig::default()).await;
    let dispatcher = &h.server.state.dispatcher;

    let requests = [
        RawRequest {
            method: None,
            url: Some("/fast".to_string()),
            headers: HeaderMap::new(),
            body: Body::empty(),
            client_address: None,
            request_id: None,
        },
        RawRequest {
            method: Some(Method::GET),
            url: None,
            headers: HeaderMap::new(),
            body: Body::empty(),
            client_address: None,
            request_id: None,
        },
    ];
    for raw in requests {
        let response = dispatcher.handle(raw).await;
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(body_text(response).await, "Incomplete request");
    }

    let state = dispatcher.hook().state();
    assert!(state.path_errors().is_empty());
    assert!(state.server_errors().is_empty());
}

#[tokio::test]
async fn url_valued_query_keeps_the_request_path() {
    let h = harness(SiteConfig::default()).await;

    let response = h
        .router
        .clone()
        .oneshot(get("/fast?next=https://example.com/slow"))
        .await
        .expect("response");

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_text(response).await, "fast page");
}

#[tokio::test]
async fn panics_become_recorded_failures() {
    let h = harness(SiteConfig::default()).await;

    let response = h.router.clone().oneshot(get("/panic")).await.expect("response");
    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    let payload: Value = serde_json::from_str(&body_text(response).await).expect("json body");
    assert_eq!(payload["error"]["name"], "Panic");
    assert!(
        payload["error"]["message"]
            .as_str()
            .is_some_and(|message| message.contains("renderer exploded"))
    );

    let failure = h
        .server
        .state
        .dispatcher
        .hook()
        .state()
        .error_for("/panic")
        .expect("recorded");
    assert_eq!(failure.failure.name, "Panic");

    let after = h.router.clone().oneshot(get("/fast")).await.expect("response");
    assert_eq!(after.status(), StatusCode::OK);
}

#[tokio::test]
async fn render_without_response_is_an_error() {
    let h = harness(SiteConfig::default()).await;

    let response = h.router.clone().oneshot(get("/empty")).await.expect("response");
    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    let payload: Value = serde_json::from_str(&body_text(response).await).expect("json body");
    assert_eq!(payload["error"]["name"], "EmptyResponseError");
}

#[tokio::test]
async fn failure_after_commit_keeps_the_sent_response() {
    let h = harness(SiteConfig::default()).await;

    let response = h.router.clone().oneshot(get("/twice")).await.expect("response");
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_text(response).await, "first");

    let failure = h
        .server
        .state
        .dispatcher
        .hook()
        .state()
        .error_for("/twice")
        .expect("recorded");
    assert_eq!(failure.failure.name, "ResponseSentError");
}

#[tokio::test]
async fn request_body_reaches_the_handler() {
    let h = harness(SiteConfig::default()).await;

    let request = Request::builder()
        .method(Method::POST)
        .uri("/echo")
        .header(header::HOST, "localhost:4321")
        .body(Body::from("name=vellum&kind=site"))
        .expect("request");
    let response = h.router.clone().oneshot(request).await.expect("response");

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_text(response).await, "name=vellum&kind=site");
}

#[tokio::test]
async fn handler_reads_manifest_through_virtual_modules() {
    let site = SiteConfig {
        base: "/app".to_string(),
        ..SiteConfig::default()
    };
    let h = harness(site).await;

    let response = h.router.clone().oneshot(get("/app/base")).await.expect("response");

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_text(response).await, "/app");
}

#[tokio::test]
async fn events_stream_is_served_as_sse() {
    let h = harness(SiteConfig::default()).await;

    let response = h
        .router
        .clone()
        .oneshot(get("/__vellum/events"))
        .await
        .expect("response");

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        response
            .headers()
            .get(header::CONTENT_TYPE)
            .and_then(|value| value.to_str().ok()),
        Some("text/event-stream")
    );
}
