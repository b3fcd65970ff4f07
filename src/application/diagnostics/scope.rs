//! Per-request error scope.
//!
//! The scope is an explicit value: the dispatcher creates it, binds it for
//! the request's own future, and hands a copy to every detached task through
//! [`DetachedTasks`](super::DetachedTasks). Nothing relies on implicit
//! propagation across `tokio::spawn`.

use std::future::Future;
use std::sync::Arc;

tokio::task_local! {
    static CURRENT_SCOPE: ErrorScope;
}

/// Identity of the request that owns a piece of work.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ErrorScope {
    path: Arc<str>,
    request_id: Arc<str>,
}

impl ErrorScope {
    pub fn new(path: impl Into<Arc<str>>, request_id: impl Into<Arc<str>>) -> Self {
        Self {
            path: path.into(),
            request_id: request_id.into(),
        }
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn request_id(&self) -> &str {
        &self.request_id
    }

    /// Scope bound to the running task, if any.
    pub fn current() -> Option<ErrorScope> {
        CURRENT_SCOPE.try_with(Clone::clone).ok()
    }

    /// Run `fut` with this scope bound. The binding ends when `fut` does.
    pub fn run<F>(self, fut: F) -> impl Future<Output = F::Output>
    where
        F: Future,
    {
        CURRENT_SCOPE.scope(self, fut)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn scope_is_bound_only_inside_run() {
        assert!(ErrorScope::current().is_none());

        let seen = ErrorScope::new("/a", "req-1")
            .run(async {
                tokio::task::yield_now().await;
                ErrorScope::current()
            })
            .await;

        assert_eq!(seen.map(|scope| scope.path().to_string()), Some("/a".into()));
        assert!(ErrorScope::current().is_none());
    }

    #[tokio::test]
    async fn interleaved_scopes_do_not_cross() {
        let a = ErrorScope::new("/a", "req-a").run(async {
            tokio::task::yield_now().await;
            ErrorScope::current().map(|scope| scope.path().to_string())
        });
        let b = ErrorScope::new("/b", "req-b").run(async {
            tokio::task::yield_now().await;
            ErrorScope::current().map(|scope| scope.path().to_string())
        });

        let (a, b) = tokio::join!(a, b);
        assert_eq!(a.as_deref(), Some("/a"));
        assert_eq!(b.as_deref(), Some("/b"));
    }
}
