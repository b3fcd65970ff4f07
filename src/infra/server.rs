//! Wiring of the development server's components.

use std::sync::Arc;

use tracing::info;

use crate::{
    application::{
        bridge::{EnvironmentOptions, ExecutionBridge, IsolatedRuntime},
        diagnostics::{ControllerState, FailureHook},
        dispatch::Dispatcher,
        error::AppError,
        livereload::LiveReload,
    },
    cache::RouteCache,
    config::{DevSettings, ProjectSettings},
    domain::manifest::SiteConfig,
};

use super::{http::DevState, layout::PagesDirectory};

const ENVIRONMENT_NAME: &str = "ssr";

/// Everything a running dev server owns. Dropped on shutdown.
pub struct DevServer {
    pub state: DevState,
    pub routes: Arc<RouteCache>,
    pub livereload: LiveReload,
    pub pages: PagesDirectory,
}

/// Build the route table, start the execution bridge and connect the
/// dispatcher to the failure hook.
pub async fn assemble(
    project: &ProjectSettings,
    site: SiteConfig,
    dev: &DevSettings,
    runtime: &dyn IsolatedRuntime,
) -> Result<DevServer, AppError> {
    let pages = PagesDirectory::new(&project.root, &project.pages_dir);
    let routes = Arc::new(RouteCache::new(
        site,
        Arc::new(pages.clone()),
        dev.route_cache_capacity,
    )?);

    let options = EnvironmentOptions {
        name: ENVIRONMENT_NAME.to_string(),
        root: project.root.clone(),
    };
    let bridge = Arc::new(ExecutionBridge::start(runtime, options, routes.clone()).await?);

    let livereload = LiveReload::new(dev.livereload_capacity);
    let hook = FailureHook::new(
        Arc::new(ControllerState::new()),
        livereload.clone(),
        dev.error_notify_delay,
    );
    let dispatcher = Arc::new(Dispatcher::new(routes.clone(), bridge, hook));

    info!(
        target = "vellum::server",
        root = %project.root.display(),
        pages = %pages.pages_path().display(),
        "Development server assembled"
    );

    Ok(DevServer {
        state: DevState {
            dispatcher,
            routes: routes.clone(),
        },
        routes,
        livereload,
        pages,
    })
}
