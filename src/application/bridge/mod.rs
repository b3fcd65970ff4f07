//! Execution bridge.
//!
//! Owns the link between the host process and the isolated module runtime:
//! the runtime sees host state only through [`VirtualModules`], and the
//! rendering handler is extracted from it once at startup.

mod modules;

use std::any::Any;
use std::collections::HashMap;
use std::error::Error as StdError;
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use axum::response::Response;
use serde::Serialize;
use thiserror::Error;
use tracing::{debug, info};

use crate::application::diagnostics::DetachedTasks;
use crate::application::request::RequestContext;
use crate::cache::RouteCache;

pub use modules::{
    ENV_CONTEXT_MODULE, ModuleLoader, ROUTES_MODULE, VIRTUAL_PREFIX, VirtualModules,
    escape_for_module, exported_json,
};

/// Module the bridge imports once at startup to obtain the request handler.
pub const RENDER_ENTRYPOINT: &str = "vellum/entrypoints/dev";
/// Export name of the request handler inside [`RENDER_ENTRYPOINT`].
pub const HANDLER_EXPORT: &str = "handle";

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SourceLocation {
    pub file: String,
    pub line: u32,
    pub column: u32,
}

/// Failure raised by rendering code, formatted for developers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Error)]
#[serde(rename_all = "camelCase")]
#[error("{name}: {message}")]
pub struct RenderFailure {
    pub name: String,
    pub message: String,
    pub stack: Option<String>,
    pub loc: Option<SourceLocation>,
    pub hint: Option<String>,
}

impl RenderFailure {
    pub fn new(message: impl Into<String>) -> Self {
        Self::named("RenderError", message)
    }

    pub fn named(name: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            message: message.into(),
            stack: None,
            loc: None,
            hint: None,
        }
    }

    pub fn with_stack(mut self, stack: impl Into<String>) -> Self {
        self.stack = Some(stack.into());
        self
    }

    pub fn with_location(mut self, file: impl Into<String>, line: u32, column: u32) -> Self {
        self.loc = Some(SourceLocation {
            file: file.into(),
            line,
            column,
        });
        self
    }

    pub fn with_hint(mut self, hint: impl Into<String>) -> Self {
        self.hint = Some(hint.into());
        self
    }

    /// Flatten an error and its source chain; the chain becomes the stack.
    pub fn from_error(error: &dyn StdError) -> Self {
        let mut chain = Vec::new();
        let mut current = error.source();
        while let Some(inner) = current {
            chain.push(format!("    caused by: {inner}"));
            current = inner.source();
        }

        let failure = Self::new(error.to_string());
        if chain.is_empty() {
            failure
        } else {
            failure.with_stack(chain.join("\n"))
        }
    }

    /// Describe a panic payload caught while driving rendering code.
    pub fn from_panic(payload: &(dyn Any + Send)) -> Self {
        let message = payload
            .downcast_ref::<&str>()
            .map(|message| (*message).to_string())
            .or_else(|| payload.downcast_ref::<String>().cloned())
            .unwrap_or_else(|| "rendering task panicked".to_string());
        Self::named("Panic", message)
    }
}

/// The live transport response slot handed to the rendering handler.
///
/// A handler commits exactly one response; the dispatcher writes whatever
/// was committed.
#[derive(Default)]
pub struct ResponseSink {
    response: Option<Response>,
}

impl ResponseSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn send(&mut self, response: Response) -> Result<(), RenderFailure> {
        if self.response.is_some() {
            return Err(RenderFailure::named(
                "ResponseSentError",
                "a response was already sent for this request",
            ));
        }
        self.response = Some(response);
        Ok(())
    }

    pub fn is_committed(&self) -> bool {
        self.response.is_some()
    }

    pub fn take(&mut self) -> Option<Response> {
        self.response.take()
    }
}

impl fmt::Debug for ResponseSink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResponseSink")
            .field("status", &self.response.as_ref().map(Response::status))
            .finish()
    }
}

/// Startup configuration for a runtime environment.
#[derive(Debug, Clone)]
pub struct EnvironmentOptions {
    pub name: String,
    pub root: PathBuf,
}

#[derive(Debug, Error)]
pub enum RuntimeError {
    #[error("module `{specifier}` could not be resolved")]
    ModuleNotFound { specifier: String },
    #[error("module `{specifier}` failed to evaluate: {message}")]
    Evaluation { specifier: String, message: String },
    #[error("execution context `{name}` could not be created: {message}")]
    Context { name: String, message: String },
}

#[derive(Debug, Error)]
pub enum BridgeError {
    #[error(transparent)]
    Runtime(#[from] RuntimeError),
    #[error("module `{module}` does not export `{export}`")]
    MissingExport { module: String, export: String },
}

#[async_trait]
pub trait RenderHandler: Send + Sync {
    /// Render one request. The handler commits its response into `sink`;
    /// background work that may fail later goes through `tasks`.
    async fn handle(
        &self,
        request: RequestContext,
        sink: &mut ResponseSink,
        tasks: DetachedTasks,
    ) -> Result<(), RenderFailure>;
}

/// Exports of an imported module.
#[derive(Default, Clone)]
pub struct ModuleExports {
    handlers: HashMap<String, Arc<dyn RenderHandler>>,
}

impl ModuleExports {
    pub fn with_handler(mut self, name: impl Into<String>, handler: Arc<dyn RenderHandler>) -> Self {
        self.handlers.insert(name.into(), handler);
        self
    }

    pub fn handler(&self, name: &str) -> Option<Arc<dyn RenderHandler>> {
        self.handlers.get(name).cloned()
    }
}

#[async_trait]
pub trait ExecutionContext: Send + Sync {
    fn name(&self) -> &str;

    async fn import(&self, specifier: &str) -> Result<ModuleExports, RuntimeError>;
}

#[async_trait]
pub trait IsolatedRuntime: Send + Sync {
    async fn create_context(
        &self,
        options: EnvironmentOptions,
        loader: Arc<dyn ModuleLoader>,
    ) -> Result<Box<dyn ExecutionContext>, RuntimeError>;
}

pub struct ExecutionBridge {
    routes: Arc<RouteCache>,
    context: Box<dyn ExecutionContext>,
    handler: Arc<dyn RenderHandler>,
}

impl ExecutionBridge {
    /// Create the execution context and extract the request handler.
    /// Called once per server startup.
    pub async fn start(
        runtime: &dyn IsolatedRuntime,
        options: EnvironmentOptions,
        routes: Arc<RouteCache>,
    ) -> Result<Self, BridgeError> {
        let loader: Arc<dyn ModuleLoader> = Arc::new(VirtualModules::new(routes.clone()));
        let context = runtime.create_context(options, loader).await?;

        let exports = context.import(RENDER_ENTRYPOINT).await?;
        let handler = exports
            .handler(HANDLER_EXPORT)
            .ok_or_else(|| BridgeError::MissingExport {
                module: RENDER_ENTRYPOINT.to_string(),
                export: HANDLER_EXPORT.to_string(),
            })?;

        info!(
            target = "vellum::bridge",
            environment = context.name(),
            entrypoint = RENDER_ENTRYPOINT,
            "Rendering entrypoint loaded"
        );

        Ok(Self {
            routes,
            context,
            handler,
        })
    }

    /// Resolve the matched route if still unknown, then call the handler.
    /// Its outcome is returned unchanged.
    pub async fn render(
        &self,
        mut request: RequestContext,
        sink: &mut ResponseSink,
        tasks: DetachedTasks,
    ) -> Result<(), RenderFailure> {
        if request.static_like.is_none() {
            let matched = self
                .routes
                .match_route(&request.manifest, &request.pathname);
            request.resolve_route(matched);
        }
        debug!(
            target = "vellum::bridge",
            environment = self.context.name(),
            path = %request.pathname,
            static_like = request.static_like.unwrap_or(false),
            "Dispatching to rendering handler"
        );
        self.handler.handle(request, sink, tasks).await
    }
}
