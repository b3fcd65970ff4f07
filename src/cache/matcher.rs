//! Memoized pathname → route matching.

use std::num::NonZeroUsize;
use std::sync::Mutex;

use lru::LruCache;
use serde::Serialize;

use crate::domain::{
    manifest::{ManifestSnapshot, TrailingSlash},
    routes::{Params, RouteDescriptor, RouteType},
};

use super::lock::mutex_lock;

const SOURCE: &str = "cache::matcher";

/// A route selected for a pathname, with its extracted parameters.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RouteMatch {
    pub route: RouteDescriptor,
    pub params: Params,
}

#[derive(Debug, Clone)]
struct CachedMatch {
    version: u64,
    hit: Option<(usize, Params)>,
}

/// Derived matching state. Cheap to throw away: every entry can be
/// recomputed from the snapshot it was derived from.
pub struct RouteMatcher {
    entries: Mutex<LruCache<String, CachedMatch>>,
}

impl RouteMatcher {
    pub fn new(capacity: NonZeroUsize) -> Self {
        Self {
            entries: Mutex::new(LruCache::new(capacity)),
        }
    }

    /// First route in priority order that accepts `pathname`.
    ///
    /// Entries computed against an older snapshot version are ignored.
    pub fn match_route(&self, snapshot: &ManifestSnapshot, pathname: &str) -> Option<RouteMatch> {
        let cached = mutex_lock(&self.entries, SOURCE, "get")
            .get(pathname)
            .filter(|entry| entry.version == snapshot.version)
            .cloned();

        let hit = match cached {
            Some(entry) => entry.hit,
            None => {
                let hit = find_route(snapshot, pathname);
                mutex_lock(&self.entries, SOURCE, "put").put(
                    pathname.to_string(),
                    CachedMatch {
                        version: snapshot.version,
                        hit: hit.clone(),
                    },
                );
                hit
            }
        };

        let (index, params) = hit?;
        snapshot.routes.get(index).map(|route| RouteMatch {
            route: route.clone(),
            params,
        })
    }

    pub fn clear(&self) {
        mutex_lock(&self.entries, SOURCE, "clear").clear();
    }

    pub fn len(&self) -> usize {
        mutex_lock(&self.entries, SOURCE, "len").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Uncached lookup over the snapshot's route list.
pub fn find_route(snapshot: &ManifestSnapshot, pathname: &str) -> Option<(usize, Params)> {
    snapshot
        .routes
        .iter()
        .enumerate()
        .filter(|(_, route)| honours_trailing_slash(snapshot.trailing_slash, route, pathname))
        .find_map(|(index, route)| route.match_path(pathname).map(|params| (index, params)))
}

fn honours_trailing_slash(policy: TrailingSlash, route: &RouteDescriptor, pathname: &str) -> bool {
    route.route_type == RouteType::Endpoint || policy.accepts(pathname)
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::domain::manifest::SiteConfig;
    use crate::domain::routes::{RouteOrigin, parse_route_path};

    fn snapshot(policy: TrailingSlash, version: u64, paths: &[&str]) -> ManifestSnapshot {
        let routes: Vec<RouteDescriptor> = paths
            .iter()
            .map(|path| {
                RouteDescriptor::new(
                    parse_route_path(path).expect("valid"),
                    format!("src/pages/{path}.md"),
                    RouteType::Page,
                    RouteOrigin::Project,
                )
            })
            .collect();
        let site = SiteConfig {
            trailing_slash: policy,
            ..SiteConfig::default()
        };
        ManifestSnapshot::new(&site, Arc::from(routes), version)
    }

    fn matcher() -> RouteMatcher {
        RouteMatcher::new(NonZeroUsize::new(8).expect("non-zero"))
    }

    #[test]
    fn first_match_wins() {
        let snapshot = snapshot(TrailingSlash::Ignore, 1, &["blog/new", "blog/[slug]"]);
        let hit = matcher().match_route(&snapshot, "/blog/new").expect("match");
        assert_eq!(hit.route.pattern, "/blog/new");
        assert!(hit.params.is_empty());
    }

    #[test]
    fn trailing_slash_never_rejects_slashed_paths() {
        let snapshot = snapshot(TrailingSlash::Never, 1, &["about"]);
        let matcher = matcher();
        assert!(matcher.match_route(&snapshot, "/about").is_some());
        assert!(matcher.match_route(&snapshot, "/about/").is_none());
    }

    #[test]
    fn memoizes_until_cleared() {
        let snapshot = snapshot(TrailingSlash::Ignore, 1, &["about"]);
        let matcher = matcher();
        matcher.match_route(&snapshot, "/about");
        matcher.match_route(&snapshot, "/missing");
        assert_eq!(matcher.len(), 2);

        matcher.clear();
        assert!(matcher.is_empty());
    }

    #[test]
    fn stale_versions_are_recomputed() {
        let matcher = matcher();
        let old = snapshot(TrailingSlash::Ignore, 1, &["about"]);
        assert!(matcher.match_route(&old, "/contact").is_none());

        let new = snapshot(TrailingSlash::Ignore, 2, &["about", "contact"]);
        let hit = matcher.match_route(&new, "/contact").expect("match");
        assert_eq!(hit.route.pattern, "/contact");
    }
}
