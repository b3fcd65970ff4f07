//! Polling filesystem watcher feeding the route cache.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, warn};

use crate::application::bridge::RenderFailure;
use crate::application::livereload::{DevPayload, LiveReload};
use crate::application::routing::LayoutError;
use crate::cache::{FsEvent, RebuildOutcome, RouteCache};

use super::layout::{Fingerprint, PagesDirectory};

/// Events turning `old` into `new`: removals, then additions, then changes,
/// each in path order.
pub fn diff_fingerprints(old: &Fingerprint, new: &Fingerprint) -> Vec<FsEvent> {
    let removed = old
        .keys()
        .filter(|path| !new.contains_key(*path))
        .map(FsEvent::removed);
    let added = new
        .keys()
        .filter(|path| !old.contains_key(*path))
        .map(FsEvent::added);
    let changed = new
        .iter()
        .filter(|(path, modified)| old.get(*path).is_some_and(|before| before != *modified))
        .map(|(path, _)| FsEvent::changed(path));

    removed.chain(added).chain(changed).collect()
}

pub struct PollingWatcher {
    pages: PagesDirectory,
    interval: Duration,
    last: Fingerprint,
}

impl PollingWatcher {
    /// Takes the initial fingerprint; files present now produce no events.
    pub fn new(pages: PagesDirectory, interval: Duration) -> Result<Self, LayoutError> {
        let last = pages.fingerprint()?;
        Ok(Self {
            pages,
            interval,
            last,
        })
    }

    /// Events since the previous poll.
    pub fn poll(&mut self) -> Result<Vec<FsEvent>, LayoutError> {
        let current = self.pages.fingerprint()?;
        let events = diff_fingerprints(&self.last, &current);
        self.last = current;
        Ok(events)
    }

    /// Poll once and apply the burst to `routes`. Returns what should be
    /// pushed to developer clients.
    pub fn tick(&mut self, routes: &RouteCache) -> Vec<DevPayload> {
        let events = match self.poll() {
            Ok(events) => events,
            Err(err) => {
                warn!(target = "vellum::watch", error = %err, "Polling pages directory failed");
                return Vec::new();
            }
        };

        let mut payloads = Vec::new();
        let mut reload = None;
        for event in &events {
            match routes.apply(event) {
                Ok(RebuildOutcome::Superseded { .. }) => {}
                Ok(_) => reload = Some(self.display_path(&event.path)),
                Err(err) => {
                    let failure = RenderFailure::from_error(&err)
                        .with_hint("the previous route table is still being served");
                    payloads.push(DevPayload::Error {
                        path: None,
                        err: RenderFailure {
                            name: "RouteTableError".to_string(),
                            ..failure
                        },
                    });
                }
            }
        }

        if !events.is_empty() {
            debug!(
                target = "vellum::watch",
                events = events.len(),
                "Applied filesystem events"
            );
        }
        if let Some(path) = reload {
            payloads.push(DevPayload::FullReload { path });
        }
        payloads
    }

    /// Poll every interval until the runtime shuts down.
    pub fn spawn(self, routes: Arc<RouteCache>, livereload: LiveReload) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(self.interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            ticker.tick().await;

            let mut watcher = self;
            loop {
                ticker.tick().await;
                let routes = routes.clone();
                let polled = tokio::task::spawn_blocking(move || {
                    let payloads = watcher.tick(&routes);
                    (watcher, payloads)
                })
                .await;

                let (next, payloads) = match polled {
                    Ok(result) => result,
                    Err(err) => {
                        error!(target = "vellum::watch", error = %err, "Watcher task failed");
                        return;
                    }
                };
                watcher = next;
                for payload in payloads {
                    livereload.send(payload);
                }
            }
        })
    }

    fn display_path(&self, path: &Path) -> String {
        path.strip_prefix(self.pages.root())
            .unwrap_or(path)
            .display()
            .to_string()
    }
}

#[cfg(test)]
mod tests {
    use std::fs;
    use std::num::NonZeroUsize;
    use std::path::PathBuf;
    use std::time::SystemTime;

    use super::*;
    use crate::cache::FsEventKind;
    use crate::domain::manifest::SiteConfig;

    fn at(secs: u64) -> SystemTime {
        SystemTime::UNIX_EPOCH + Duration::from_secs(secs)
    }

    #[test]
    fn diff_reports_each_kind() {
        let old = Fingerprint::from([
            (PathBuf::from("a.md"), at(1)),
            (PathBuf::from("b.md"), at(1)),
            (PathBuf::from("c.md"), at(1)),
        ]);
        let new = Fingerprint::from([
            (PathBuf::from("b.md"), at(2)),
            (PathBuf::from("c.md"), at(1)),
            (PathBuf::from("d.md"), at(1)),
        ]);

        let events: Vec<(FsEventKind, PathBuf)> = diff_fingerprints(&old, &new)
            .into_iter()
            .map(|event| (event.kind, event.path))
            .collect();
        assert_eq!(
            events,
            vec![
                (FsEventKind::Removed, PathBuf::from("a.md")),
                (FsEventKind::Added, PathBuf::from("d.md")),
                (FsEventKind::Changed, PathBuf::from("b.md")),
            ]
        );
    }

    #[test]
    fn tick_rebuilds_routes_for_new_pages() {
        let dir = tempfile::tempdir().expect("tempdir");
        let pages_dir = dir.path().join("src/pages");
        fs::create_dir_all(&pages_dir).expect("mkdir");
        fs::write(pages_dir.join("index.md"), "# home").expect("write");

        let pages = PagesDirectory::new(dir.path(), "src/pages");
        let routes = RouteCache::new(
            SiteConfig::default(),
            Arc::new(pages.clone()),
            NonZeroUsize::new(8).expect("cap"),
        )
        .expect("routes");
        let mut watcher = PollingWatcher::new(pages, Duration::from_millis(10)).expect("watcher");

        assert!(watcher.tick(&routes).is_empty());

        fs::write(pages_dir.join("about.md"), "# about").expect("write");
        let payloads = watcher.tick(&routes);

        assert_eq!(
            payloads,
            vec![DevPayload::FullReload {
                path: "src/pages/about.md".to_string()
            }]
        );
        assert!(
            routes
                .snapshot()
                .routes
                .iter()
                .any(|route| route.pattern == "/about")
        );
    }

    #[test]
    fn tick_reports_collisions_without_replacing_routes() {
        let dir = tempfile::tempdir().expect("tempdir");
        let pages_dir = dir.path().join("src/pages/blog");
        fs::create_dir_all(&pages_dir).expect("mkdir");
        fs::write(pages_dir.join("[slug].md"), "post").expect("write");

        let pages = PagesDirectory::new(dir.path(), "src/pages");
        let routes = RouteCache::new(
            SiteConfig::default(),
            Arc::new(pages.clone()),
            NonZeroUsize::new(8).expect("cap"),
        )
        .expect("routes");
        let before = routes.snapshot();
        let mut watcher = PollingWatcher::new(pages, Duration::from_millis(10)).expect("watcher");

        fs::write(pages_dir.join("[id].md"), "post").expect("write");
        let payloads = watcher.tick(&routes);

        assert!(matches!(
            payloads.as_slice(),
            [DevPayload::Error { path: None, err }] if err.name == "RouteTableError"
        ));
        assert!(Arc::ptr_eq(&before, &routes.snapshot()));
    }
}
