use std::cmp::Ordering;
use std::collections::HashMap;

use crate::domain::{
    error::DomainError,
    manifest::SiteConfig,
    routes::{RouteDescriptor, RouteOrigin, RouteType, parse_route_path, segment_rank},
};

use super::{PageKind, PageFile, ProjectLayout};

pub const DEFAULT_404_COMPONENT: &str = "vellum/components/default-404";
pub const IMAGE_ENDPOINT_COMPONENT: &str = "vellum/endpoints/image";
pub const REDIRECT_COMPONENT: &str = "vellum/components/redirect";

/// Turns a project layout into an ordered route table.
pub struct RouteTableBuilder<'a> {
    site: &'a SiteConfig,
}

impl<'a> RouteTableBuilder<'a> {
    pub fn new(site: &'a SiteConfig) -> Self {
        Self { site }
    }

    /// Build the route table: project routes and redirects in priority
    /// order, followed by any default route the project does not claim.
    pub fn build(&self, layout: &ProjectLayout) -> Result<Vec<RouteDescriptor>, DomainError> {
        let mut claimed: HashMap<String, String> = HashMap::new();
        let mut routes = Vec::with_capacity(layout.files.len() + self.site.redirects.len());

        for file in &layout.files {
            let route = self.route_for_file(file)?;
            claim(&mut claimed, &route)?;
            routes.push(route);
        }

        for (from, to) in &self.site.redirects {
            let segments = parse_route_path(from).map_err(|err| {
                DomainError::validation(format!("redirect source `{from}`: {err}"))
            })?;
            let route = RouteDescriptor::new(
                segments,
                REDIRECT_COMPONENT,
                RouteType::Redirect,
                RouteOrigin::Project,
            )
            .with_redirect(to.clone());
            claim(&mut claimed, &route)?;
            routes.push(route);
        }

        routes.sort_by(compare_priority);
        Ok(inject_default_routes(routes))
    }

    fn route_for_file(&self, file: &PageFile) -> Result<RouteDescriptor, DomainError> {
        let mut raw_segments: Vec<&str> = file
            .route_path
            .split('/')
            .filter(|segment| !segment.is_empty())
            .collect();
        let is_index = raw_segments.last() == Some(&"index");
        if is_index {
            raw_segments.pop();
        }

        let segments = parse_route_path(&raw_segments.join("/"))
            .map_err(|err| DomainError::validation(format!("`{}`: {err}", file.component)))?;
        let route_type = match file.kind {
            PageKind::Page => RouteType::Page,
            PageKind::Endpoint => RouteType::Endpoint,
        };

        Ok(
            RouteDescriptor::new(segments, file.component.clone(), route_type, RouteOrigin::Project)
                .with_prerender(self.site.prerender_default)
                .with_index(is_index),
        )
    }
}

fn claim(claimed: &mut HashMap<String, String>, route: &RouteDescriptor) -> Result<(), DomainError> {
    let key = route.normalized_pattern();
    if let Some(existing) = claimed.get(&key) {
        return Err(DomainError::collision(
            route.pattern.clone(),
            existing.clone(),
            route.component.clone(),
        ));
    }
    claimed.insert(key, route.component.clone());
    Ok(())
}

/// Routes the server provides when the project does not declare them.
pub fn default_routes() -> Vec<RouteDescriptor> {
    let not_found = parse_route_path("404").unwrap_or_default();
    let image = parse_route_path("_image").unwrap_or_default();
    vec![
        RouteDescriptor::new(
            not_found,
            DEFAULT_404_COMPONENT,
            RouteType::Page,
            RouteOrigin::Internal,
        ),
        RouteDescriptor::new(
            image,
            IMAGE_ENDPOINT_COMPONENT,
            RouteType::Endpoint,
            RouteOrigin::Internal,
        ),
    ]
}

/// Append default routes whose pattern is not already claimed.
///
/// Existing routes are never reordered or removed.
pub fn inject_default_routes(mut routes: Vec<RouteDescriptor>) -> Vec<RouteDescriptor> {
    for default in default_routes() {
        let key = default.normalized_pattern();
        if !routes.iter().any(|route| route.normalized_pattern() == key) {
            routes.push(default);
        }
    }
    routes
}

/// Total priority order: first match wins, so more specific routes sort first.
pub fn compare_priority(a: &RouteDescriptor, b: &RouteDescriptor) -> Ordering {
    a.has_spread()
        .cmp(&b.has_spread())
        .then_with(|| b.segments.len().cmp(&a.segments.len()))
        .then_with(|| {
            a.segments
                .iter()
                .zip(&b.segments)
                .map(|(left, right)| segment_rank(left).cmp(&segment_rank(right)))
                .find(|ordering| ordering.is_ne())
                .unwrap_or(Ordering::Equal)
        })
        .then_with(|| type_rank(a.route_type).cmp(&type_rank(b.route_type)))
        .then_with(|| a.pattern.cmp(&b.pattern))
        .then_with(|| a.component.cmp(&b.component))
}

fn type_rank(route_type: RouteType) -> u8 {
    match route_type {
        RouteType::Endpoint => 0,
        RouteType::Page => 1,
        RouteType::Redirect => 2,
    }
}
