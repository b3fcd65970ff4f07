//! Project layout model and the route table builder.

mod builder;

use thiserror::Error;

pub use builder::{
    DEFAULT_404_COMPONENT, IMAGE_ENDPOINT_COMPONENT, REDIRECT_COMPONENT, RouteTableBuilder,
    compare_priority, default_routes, inject_default_routes,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PageKind {
    Page,
    Endpoint,
}

/// One routable source file under the pages directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageFile {
    /// Identifier handed to the module runtime, e.g. `src/pages/blog/[slug].md`.
    pub component: String,
    /// Path relative to the pages directory without extension, e.g. `blog/[slug]`.
    pub route_path: String,
    pub kind: PageKind,
}

impl PageFile {
    pub fn new(
        component: impl Into<String>,
        route_path: impl Into<String>,
        kind: PageKind,
    ) -> Self {
        Self {
            component: component.into(),
            route_path: route_path.into(),
            kind,
        }
    }
}

/// Routable files of a project, sorted by component path.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProjectLayout {
    pub files: Vec<PageFile>,
}

impl ProjectLayout {
    pub fn new(mut files: Vec<PageFile>) -> Self {
        files.sort_by(|a, b| a.component.cmp(&b.component));
        Self { files }
    }
}

#[derive(Debug, Error)]
pub enum LayoutError {
    #[error("failed to read project layout at `{path}`: {message}")]
    Read { path: String, message: String },
}

/// Source of the current project layout.
pub trait LayoutSource: Send + Sync {
    fn scan(&self) -> Result<ProjectLayout, LayoutError>;
}
