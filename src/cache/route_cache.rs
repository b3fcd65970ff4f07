//! Route cache and rebuild controller.
//!
//! Holds the current manifest snapshot and reacts to filesystem events by
//! either regenerating the route table or dropping derived matching state.

use std::num::NonZeroUsize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};

use metrics::counter;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::application::routing::{LayoutError, LayoutSource, RouteTableBuilder};
use crate::domain::{
    error::DomainError,
    manifest::{ManifestSnapshot, SiteConfig},
    routes::RouteDescriptor,
};

use super::events::{FsEvent, RebuildAction};
use super::lock::{rw_read, rw_write};
use super::matcher::{RouteMatch, RouteMatcher};

const SOURCE: &str = "cache::route_cache";
const METRIC_REBUILD_TOTAL: &str = "vellum_route_rebuild_total";
const METRIC_CACHE_CLEAR_TOTAL: &str = "vellum_route_cache_clear_total";

#[derive(Debug, Error)]
pub enum RebuildError {
    #[error(transparent)]
    Layout(#[from] LayoutError),
    #[error(transparent)]
    Routes(#[from] DomainError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RebuildOutcome {
    Rebuilt { version: u64, routes: usize },
    /// A newer rebuild finished first; this one was discarded.
    Superseded { version: u64 },
    CacheCleared,
}

/// Owner of the current [`ManifestSnapshot`].
///
/// Readers clone the `Arc` and keep working against it; a rebuild swaps in
/// a new `Arc` under a short write lock, so a reader sees either the old or
/// the new snapshot and never a mix.
pub struct RouteCache {
    site: SiteConfig,
    layout: Arc<dyn LayoutSource>,
    snapshot: RwLock<Arc<ManifestSnapshot>>,
    matcher: RouteMatcher,
    versions: AtomicU64,
}

impl RouteCache {
    /// Build the initial snapshot. A route collision here fails startup.
    pub fn new(
        site: SiteConfig,
        layout: Arc<dyn LayoutSource>,
        match_capacity: NonZeroUsize,
    ) -> Result<Self, RebuildError> {
        let routes = build_routes(&site, layout.as_ref())?;
        let snapshot = ManifestSnapshot::new(&site, routes, 0);

        info!(
            target = "vellum::routes",
            routes = snapshot.routes.len(),
            base = %snapshot.base,
            trailing_slash = %snapshot.trailing_slash,
            "Route table built"
        );

        Ok(Self {
            site,
            layout,
            snapshot: RwLock::new(Arc::new(snapshot)),
            matcher: RouteMatcher::new(match_capacity),
            versions: AtomicU64::new(0),
        })
    }

    pub fn site(&self) -> &SiteConfig {
        &self.site
    }

    /// The current snapshot.
    pub fn snapshot(&self) -> Arc<ManifestSnapshot> {
        rw_read(&self.snapshot, SOURCE, "snapshot").clone()
    }

    /// Handle one filesystem event.
    pub fn apply(&self, event: &FsEvent) -> Result<RebuildOutcome, RebuildError> {
        debug!(
            target = "vellum::routes",
            event_id = %event.id,
            event_kind = %event.kind,
            path = %event.path.display(),
            "Applying filesystem event"
        );

        match event.kind.action() {
            RebuildAction::Rebuild => self.rebuild(),
            RebuildAction::ClearCache => {
                self.clear_cache();
                Ok(RebuildOutcome::CacheCleared)
            }
        }
    }

    /// Regenerate the route table and replace the snapshot.
    ///
    /// Always installs a fresh route list, even when it is value-equal to
    /// the previous one. On failure the previous snapshot stays in place.
    pub fn rebuild(&self) -> Result<RebuildOutcome, RebuildError> {
        let version = self.versions.fetch_add(1, Ordering::SeqCst) + 1;
        let routes = match build_routes(&self.site, self.layout.as_ref()) {
            Ok(routes) => routes,
            Err(err) => {
                warn!(
                    target = "vellum::routes",
                    version,
                    error = %err,
                    "Route rebuild failed; keeping previous route table"
                );
                return Err(err);
            }
        };
        let count = routes.len();

        {
            let mut current = rw_write(&self.snapshot, SOURCE, "rebuild");
            if current.version > version {
                debug!(
                    target = "vellum::routes",
                    version,
                    current = current.version,
                    "Discarding superseded rebuild"
                );
                return Ok(RebuildOutcome::Superseded { version });
            }
            *current = Arc::new(current.with_routes(routes, version));
        }

        self.matcher.clear();
        counter!(METRIC_REBUILD_TOTAL).increment(1);
        info!(
            target = "vellum::routes",
            version,
            routes = count,
            "Route table rebuilt"
        );

        Ok(RebuildOutcome::Rebuilt {
            version,
            routes: count,
        })
    }

    /// Drop derived matching state; the route list is untouched.
    pub fn clear_cache(&self) {
        self.matcher.clear();
        counter!(METRIC_CACHE_CLEAR_TOTAL).increment(1);
        debug!(target = "vellum::routes", "Route match cache cleared");
    }

    pub fn match_route(&self, snapshot: &ManifestSnapshot, pathname: &str) -> Option<RouteMatch> {
        self.matcher.match_route(snapshot, pathname)
    }

    pub fn matcher(&self) -> &RouteMatcher {
        &self.matcher
    }
}

fn build_routes(
    site: &SiteConfig,
    layout: &dyn LayoutSource,
) -> Result<Arc<[RouteDescriptor]>, RebuildError> {
    let layout = layout.scan()?;
    let routes = RouteTableBuilder::new(site).build(&layout)?;
    Ok(Arc::from(routes))
}
