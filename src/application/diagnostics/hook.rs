use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use futures::FutureExt;
use metrics::counter;
use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tracing::error;

use crate::application::bridge::RenderFailure;
use crate::application::livereload::{DevPayload, LiveReload};

use super::scope::ErrorScope;
use super::state::ControllerState;

const METRIC_RENDER_FAILURES_TOTAL: &str = "vellum_render_failures_total";
const METRIC_UNATTRIBUTED_FAILURES_TOTAL: &str = "vellum_unattributed_failures_total";

/// Where a reported failure was recorded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Attribution {
    Path(String),
    Unattributed,
}

/// Catches failures from rendering work and records them against the
/// owning request's path.
#[derive(Clone)]
pub struct FailureHook {
    state: Arc<ControllerState>,
    livereload: LiveReload,
    notify_delay: Duration,
}

impl FailureHook {
    pub fn new(state: Arc<ControllerState>, livereload: LiveReload, notify_delay: Duration) -> Self {
        Self {
            state,
            livereload,
            notify_delay,
        }
    }

    pub fn state(&self) -> &Arc<ControllerState> {
        &self.state
    }

    pub fn livereload(&self) -> &LiveReload {
        &self.livereload
    }

    /// Report against the scope bound to the running task.
    pub fn report(&self, failure: RenderFailure) -> Attribution {
        self.report_in(ErrorScope::current().as_ref(), failure)
    }

    /// Record `failure` and schedule a push to developer clients.
    pub fn report_in(&self, scope: Option<&ErrorScope>, failure: RenderFailure) -> Attribution {
        let attribution = match scope {
            Some(scope) => {
                counter!(METRIC_RENDER_FAILURES_TOTAL).increment(1);
                error!(
                    target = "vellum::errors",
                    path = scope.path(),
                    request_id = scope.request_id(),
                    name = %failure.name,
                    message = %failure.message,
                    "Render failure"
                );
                self.state.record_for_path(
                    scope.path(),
                    Some(scope.request_id().to_string()),
                    failure.clone(),
                );
                Attribution::Path(scope.path().to_string())
            }
            None => {
                counter!(METRIC_UNATTRIBUTED_FAILURES_TOTAL).increment(1);
                error!(
                    target = "vellum::errors",
                    name = %failure.name,
                    message = %failure.message,
                    "Unattributed failure"
                );
                self.state.record_unattributed(failure.clone());
                Attribution::Unattributed
            }
        };

        let path = match &attribution {
            Attribution::Path(path) => Some(path.clone()),
            Attribution::Unattributed => None,
        };
        self.notify(DevPayload::Error { path, err: failure });
        attribution
    }

    /// Spawn background work owned by the request bound to the current task.
    pub fn spawn_detached<F>(&self, fut: F) -> JoinHandle<()>
    where
        F: Future<Output = Result<(), RenderFailure>> + Send + 'static,
    {
        self.spawn_in(ErrorScope::current(), fut)
    }

    /// Spawn background work owned by `scope`. The scope is re-bound inside
    /// the new task, so errors and panics surfacing there are attributed to
    /// it even after the owning request has finished.
    pub fn spawn_in<F>(&self, scope: Option<ErrorScope>, fut: F) -> JoinHandle<()>
    where
        F: Future<Output = Result<(), RenderFailure>> + Send + 'static,
    {
        let hook = self.clone();
        let guarded = async move {
            let failure = match AssertUnwindSafe(fut).catch_unwind().await {
                Ok(Ok(())) => None,
                Ok(Err(failure)) => Some(failure),
                Err(panic) => Some(RenderFailure::from_panic(panic.as_ref())),
            };
            if let Some(failure) = failure {
                hook.report(failure);
            }
        };

        tokio::spawn(async move {
            match scope {
                Some(scope) => scope.run(guarded).await,
                None => guarded.await,
            }
        })
    }

    /// Handle for spawning work owned by the request bound to the current
    /// task.
    pub fn tasks(&self) -> DetachedTasks {
        DetachedTasks::new(self.clone(), ErrorScope::current())
    }

    /// Push after a short delay so the in-flight response finishes first.
    fn notify(&self, payload: DevPayload) {
        let livereload = self.livereload.clone();
        let delay = self.notify_delay;
        match Handle::try_current() {
            Ok(handle) => {
                handle.spawn(async move {
                    tokio::time::sleep(delay).await;
                    livereload.send(payload);
                });
            }
            Err(_) => {
                livereload.send(payload);
            }
        }
    }
}

/// Spawner handed to rendering code, carrying the owning request's scope.
#[derive(Clone)]
pub struct DetachedTasks {
    hook: FailureHook,
    scope: Option<ErrorScope>,
}

impl DetachedTasks {
    pub fn new(hook: FailureHook, scope: Option<ErrorScope>) -> Self {
        Self { hook, scope }
    }

    pub fn scope(&self) -> Option<&ErrorScope> {
        self.scope.as_ref()
    }

    pub fn spawn<F>(&self, fut: F) -> JoinHandle<()>
    where
        F: Future<Output = Result<(), RenderFailure>> + Send + 'static,
    {
        self.hook.spawn_in(self.scope.clone(), fut)
    }
}

#[cfg(test)]
mod tests {
    use tokio::time::{sleep, timeout};

    use super::*;

    fn hook() -> FailureHook {
        FailureHook::new(
            Arc::new(ControllerState::new()),
            LiveReload::new(8),
            Duration::from_millis(5),
        )
    }

    #[tokio::test]
    async fn late_failure_is_attributed_to_its_own_request() {
        let hook = hook();

        let r = ErrorScope::new("/r", "req-r").run({
            let hook = hook.clone();
            async move {
                let tasks = hook.tasks();
                tasks.spawn(async {
                    sleep(Duration::from_millis(30)).await;
                    Err(RenderFailure::new("late failure"))
                })
            }
        });
        let r2 = ErrorScope::new("/r2", "req-r2").run(async {
            sleep(Duration::from_millis(60)).await;
        });

        let (detached, ()) = tokio::join!(r, r2);
        detached.await.expect("detached task");

        let recorded = hook.state().error_for("/r").expect("recorded under /r");
        assert_eq!(recorded.failure.message, "late failure");
        assert_eq!(recorded.request_id.as_deref(), Some("req-r"));
        assert!(hook.state().error_for("/r2").is_none());
    }

    #[tokio::test]
    async fn failing_one_path_leaves_the_other_clean() {
        let hook = hook();
        let a = ErrorScope::new("/a", "1").run({
            let hook = hook.clone();
            async move {
                tokio::task::yield_now().await;
                hook.report(RenderFailure::new("a broke"))
            }
        });
        let b = ErrorScope::new("/b", "2").run(async {
            tokio::task::yield_now().await;
        });

        let (attribution, ()) = tokio::join!(a, b);
        assert_eq!(attribution, Attribution::Path("/a".into()));
        assert!(hook.state().error_for("/b").is_none());
    }

    #[tokio::test]
    async fn failures_outside_any_request_are_unattributed() {
        let hook = hook();
        hook.spawn_detached(async { Err(RenderFailure::new("orphan")) })
            .await
            .expect("task");

        assert!(hook.state().path_errors().is_empty());
        let server = hook.state().server_errors();
        assert_eq!(server.len(), 1);
        assert_eq!(server[0].failure.message, "orphan");
    }

    #[tokio::test]
    async fn panics_in_detached_work_are_reported() {
        let hook = hook();
        hook.spawn_in(Some(ErrorScope::new("/p", "req-p")), async {
            if true {
                panic!("render exploded");
            }
            Ok(())
        })
        .await
        .expect("panic is caught inside the task");

        let recorded = hook.state().error_for("/p").expect("recorded");
        assert_eq!(recorded.failure.name, "Panic");
        assert_eq!(recorded.failure.message, "render exploded");
    }

    #[tokio::test]
    async fn notification_is_pushed_after_delay() {
        let hook = hook();
        let mut rx = hook.livereload().subscribe();

        hook.report_in(
            Some(&ErrorScope::new("/n", "req-n")),
            RenderFailure::new("pushed"),
        );

        let payload = timeout(Duration::from_secs(1), rx.recv())
            .await
            .expect("within timeout")
            .expect("payload");
        match payload {
            DevPayload::Error { path, err } => {
                assert_eq!(path.as_deref(), Some("/n"));
                assert_eq!(err.message, "pushed");
            }
            other => panic!("unexpected payload {other:?}"),
        }
    }
}
