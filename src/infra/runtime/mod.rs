//! Built-in module runtime.
//!
//! Each execution context keeps its own module registry and observes host
//! state only through the [`ModuleLoader`] it was created with.

mod entrypoint;

use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use tracing::debug;

use crate::application::bridge::{
    ENV_CONTEXT_MODULE, EnvironmentOptions, ExecutionContext, HANDLER_EXPORT, IsolatedRuntime,
    ModuleExports, ModuleLoader, RENDER_ENTRYPOINT, RuntimeError,
};

pub use entrypoint::{DevEntrypoint, ROUTE_HEADER, markdown_options};

#[derive(Debug, Default, Clone, Copy)]
pub struct NativeRuntime;

impl NativeRuntime {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl IsolatedRuntime for NativeRuntime {
    async fn create_context(
        &self,
        options: EnvironmentOptions,
        loader: Arc<dyn ModuleLoader>,
    ) -> Result<Box<dyn ExecutionContext>, RuntimeError> {
        if !options.root.is_dir() {
            return Err(RuntimeError::Context {
                name: options.name,
                message: format!("project root `{}` is not a directory", options.root.display()),
            });
        }

        debug!(
            target = "vellum::runtime",
            environment = %options.name,
            root = %options.root.display(),
            "Execution context created"
        );
        Ok(Box::new(NativeContext {
            name: options.name,
            root: options.root,
            loader,
            registry: DashMap::new(),
        }))
    }
}

pub struct NativeContext {
    name: String,
    root: PathBuf,
    loader: Arc<dyn ModuleLoader>,
    registry: DashMap<String, ModuleExports>,
}

impl NativeContext {
    fn evaluate(&self, specifier: &str) -> Result<ModuleExports, RuntimeError> {
        match specifier {
            RENDER_ENTRYPOINT => {
                // The entrypoint depends on the environment context; fail the
                // import if it cannot be loaded.
                let id = self.loader.resolve_id(ENV_CONTEXT_MODULE).ok_or_else(|| {
                    RuntimeError::ModuleNotFound {
                        specifier: ENV_CONTEXT_MODULE.to_string(),
                    }
                })?;
                self.loader
                    .load(&id)
                    .ok_or_else(|| RuntimeError::Evaluation {
                        specifier: specifier.to_string(),
                        message: format!("`{ENV_CONTEXT_MODULE}` produced no source"),
                    })?;

                let handler = DevEntrypoint::new(self.root.clone(), self.loader.clone());
                Ok(ModuleExports::default().with_handler(HANDLER_EXPORT, Arc::new(handler)))
            }
            other => Err(RuntimeError::ModuleNotFound {
                specifier: other.to_string(),
            }),
        }
    }
}

#[async_trait]
impl ExecutionContext for NativeContext {
    fn name(&self) -> &str {
        &self.name
    }

    async fn import(&self, specifier: &str) -> Result<ModuleExports, RuntimeError> {
        if let Some(exports) = self.registry.get(specifier) {
            return Ok(exports.value().clone());
        }
        let exports = self.evaluate(specifier)?;
        self.registry
            .insert(specifier.to_string(), exports.clone());
        Ok(exports)
    }
}
