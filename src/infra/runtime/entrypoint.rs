use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use axum::{
    http::{HeaderValue, Method, StatusCode, header},
    response::{Html, IntoResponse, Response},
};
use comrak::{Options, markdown_to_html};
use serde_json::Value;

use crate::application::bridge::{
    ENV_CONTEXT_MODULE, ModuleLoader, ROUTES_MODULE, RenderFailure, RenderHandler, ResponseSink,
    exported_json,
};
use crate::application::diagnostics::DetachedTasks;
use crate::application::request::RequestContext;
use crate::application::routing::{DEFAULT_404_COMPONENT, IMAGE_ENDPOINT_COMPONENT};
use crate::domain::routes::{RouteDescriptor, RouteOrigin, RouteType};
use crate::presentation::views::{MarkdownPageTemplate, NotFoundTemplate, render_template};

/// Response header naming the route that rendered a page.
pub const ROUTE_HEADER: &str = "x-vellum-route";
const NOT_FOUND_PATTERN: &str = "/404";

pub fn markdown_options() -> Options<'static> {
    let mut options = Options::default();
    let ext = &mut options.extension;
    ext.strikethrough = true;
    ext.table = true;
    ext.autolink = true;
    ext.tasklist = true;
    ext.footnotes = true;
    ext.front_matter_delimiter = Some("---".to_string());
    options.render.github_pre_lang = true;
    options
}

/// Request handler exported by the dev entrypoint module.
///
/// Reads the manifest and route table through the module loader, never from
/// host memory.
pub struct DevEntrypoint {
    root: PathBuf,
    loader: Arc<dyn ModuleLoader>,
    markdown: Options<'static>,
}

impl DevEntrypoint {
    pub fn new(root: PathBuf, loader: Arc<dyn ModuleLoader>) -> Self {
        Self {
            root,
            loader,
            markdown: markdown_options(),
        }
    }

    fn load_export(&self, specifier: &str, name: &str) -> Result<Value, RenderFailure> {
        self.loader
            .resolve_id(specifier)
            .and_then(|id| self.loader.load(&id))
            .and_then(|source| exported_json(&source, name))
            .ok_or_else(|| {
                RenderFailure::named(
                    "ModuleLoadError",
                    format!("`{specifier}` did not export `{name}`"),
                )
            })
    }

    fn route_table(&self) -> Result<Vec<RouteDescriptor>, RenderFailure> {
        let routes = self.load_export(ROUTES_MODULE, "routes")?;
        serde_json::from_value(routes).map_err(|err| {
            RenderFailure::named("ModuleLoadError", format!("invalid route table: {err}"))
        })
    }

    async fn render_route(
        &self,
        request: &RequestContext,
        route: &RouteDescriptor,
        base: &str,
    ) -> Result<Response, RenderFailure> {
        match route.route_type {
            RouteType::Redirect => Ok(redirect_response(request, route, base)),
            RouteType::Endpoint if route.component == IMAGE_ENDPOINT_COMPONENT => {
                Err(RenderFailure::named(
                    "ImageServiceError",
                    "the image endpoint is not available in development",
                )
                .with_hint("reference images by their public URL instead"))
            }
            RouteType::Endpoint => Err(RenderFailure::named(
                "EndpointError",
                format!("endpoint `{}` cannot run in the built-in runtime", route.component),
            )
            .with_location(route.component.clone(), 1, 1)
            .with_hint("configure a script runtime to serve endpoint files")),
            RouteType::Page if route.component == DEFAULT_404_COMPONENT => {
                default_not_found(&request.pathname)
            }
            RouteType::Page => {
                let html = self.render_page(&route.component).await?;
                Ok(Html(html).into_response())
            }
        }
    }

    async fn render_page(&self, component: &str) -> Result<String, RenderFailure> {
        let path = self.root.join(component);
        let source = tokio::fs::read_to_string(&path).await.map_err(|err| {
            RenderFailure::named("FileReadError", format!("failed to read `{component}`: {err}"))
                .with_location(component, 1, 1)
        })?;

        match extension(&path) {
            Some("md" | "markdown") => {
                let body = markdown_to_html(&source, &self.markdown);
                render_template(MarkdownPageTemplate::new(&source, &body))
                    .map(|Html(html)| html)
                    .map_err(|err| template_failure(component, &err))
            }
            _ => Ok(source),
        }
    }

    async fn not_found(
        &self,
        request: &RequestContext,
        routes: &[RouteDescriptor],
    ) -> Result<Response, RenderFailure> {
        let project_page = routes.iter().find(|route| {
            route.pattern == NOT_FOUND_PATTERN
                && route.origin == RouteOrigin::Project
                && route.route_type == RouteType::Page
        });
        let mut response = match project_page {
            Some(route) => Html(self.render_page(&route.component).await?).into_response(),
            None => default_not_found(&request.pathname)?,
        };
        *response.status_mut() = StatusCode::NOT_FOUND;
        Ok(response)
    }
}

#[async_trait]
impl RenderHandler for DevEntrypoint {
    async fn handle(
        &self,
        request: RequestContext,
        sink: &mut ResponseSink,
        _tasks: DetachedTasks,
    ) -> Result<(), RenderFailure> {
        let manifest = self.load_export(ENV_CONTEXT_MODULE, "manifest")?;
        let base = manifest["base"].as_str().unwrap_or("").to_string();

        let routes = self.route_table()?;
        let route = match &request.matched {
            Some(matched) => Some(matched.route.clone()),
            None => routes
                .iter()
                .find(|route| route.match_path(&request.pathname).is_some())
                .cloned(),
        };

        let mut response = match route {
            Some(route) => {
                let mut response = self.render_route(&request, &route, &base).await?;
                if let Ok(value) = HeaderValue::from_str(&route.pattern) {
                    response.headers_mut().insert(ROUTE_HEADER, value);
                }
                response
            }
            None => self.not_found(&request, &routes).await?,
        };
        if request.method == Method::HEAD {
            *response.body_mut() = axum::body::Body::empty();
        }
        sink.send(response)
    }
}

fn redirect_response(request: &RequestContext, route: &RouteDescriptor, base: &str) -> Response {
    let target = route.redirect.as_deref().unwrap_or("/");
    let location = if target.starts_with('/') {
        format!("{base}{target}")
    } else {
        target.to_string()
    };
    let status = if request.method == Method::GET || request.method == Method::HEAD {
        StatusCode::MOVED_PERMANENTLY
    } else {
        StatusCode::PERMANENT_REDIRECT
    };

    let mut response = status.into_response();
    if let Ok(value) = HeaderValue::from_str(&location) {
        response.headers_mut().insert(header::LOCATION, value);
    }
    response
}

fn default_not_found(pathname: &str) -> Result<Response, RenderFailure> {
    let html = render_template(NotFoundTemplate { path: pathname })
        .map_err(|err| template_failure(DEFAULT_404_COMPONENT, &err))?;
    Ok((StatusCode::NOT_FOUND, html).into_response())
}

fn template_failure(component: &str, err: &askama::Error) -> RenderFailure {
    RenderFailure::named("TemplateError", format!("failed to render `{component}`: {err}"))
}

fn extension(path: &Path) -> Option<&str> {
    path.extension().and_then(|ext| ext.to_str())
}
