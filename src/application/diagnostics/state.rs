use std::collections::VecDeque;
use std::sync::Mutex;

use dashmap::DashMap;
use serde::Serialize;
use time::OffsetDateTime;

use crate::application::bridge::RenderFailure;
use crate::cache::mutex_lock;

const SOURCE: &str = "application::diagnostics::state";
const UNATTRIBUTED_HISTORY: usize = 32;

/// A failure recorded against a request path, or against the server when
/// no request owned it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RecordedFailure {
    pub path: Option<String>,
    pub request_id: Option<String>,
    pub failure: RenderFailure,
    #[serde(with = "time::serde::rfc3339")]
    pub recorded_at: OffsetDateTime,
}

impl RecordedFailure {
    pub fn new(path: Option<String>, request_id: Option<String>, failure: RenderFailure) -> Self {
        Self {
            path,
            request_id,
            failure,
            recorded_at: OffsetDateTime::now_utc(),
        }
    }
}

/// Error state owned by one server instance: path → last failure, plus a
/// short history of failures with no owning request.
pub struct ControllerState {
    paths: DashMap<String, RecordedFailure>,
    unattributed: Mutex<VecDeque<RecordedFailure>>,
}

impl Default for ControllerState {
    fn default() -> Self {
        Self::new()
    }
}

impl ControllerState {
    pub fn new() -> Self {
        Self {
            paths: DashMap::new(),
            unattributed: Mutex::new(VecDeque::with_capacity(UNATTRIBUTED_HISTORY)),
        }
    }

    pub fn record_for_path(&self, path: &str, request_id: Option<String>, failure: RenderFailure) {
        let entry = RecordedFailure::new(Some(path.to_string()), request_id, failure);
        self.paths.insert(path.to_string(), entry);
    }

    pub fn record_unattributed(&self, failure: RenderFailure) {
        let mut history = mutex_lock(&self.unattributed, SOURCE, "record_unattributed");
        if history.len() == UNATTRIBUTED_HISTORY {
            history.pop_front();
        }
        history.push_back(RecordedFailure::new(None, None, failure));
    }

    pub fn error_for(&self, path: &str) -> Option<RecordedFailure> {
        self.paths.get(path).map(|entry| entry.value().clone())
    }

    /// Returns whether an entry was removed.
    pub fn clear_path(&self, path: &str) -> bool {
        self.paths.remove(path).is_some()
    }

    /// Clear `path` only while it still holds `seeded`, the failure seen when
    /// request `request_id` started. Anything recorded since is kept.
    pub fn resolve_seeded(&self, path: &str, seeded: &RecordedFailure, request_id: &str) -> bool {
        self.paths
            .remove_if(path, |_, current| {
                current == seeded && current.request_id.as_deref() != Some(request_id)
            })
            .is_some()
    }

    pub fn clear_all(&self) -> usize {
        let cleared = self.paths.len();
        self.paths.clear();
        mutex_lock(&self.unattributed, SOURCE, "clear_all").clear();
        cleared
    }

    /// Recorded path errors, ordered by path.
    pub fn path_errors(&self) -> Vec<RecordedFailure> {
        let mut errors: Vec<RecordedFailure> =
            self.paths.iter().map(|entry| entry.value().clone()).collect();
        errors.sort_by(|a, b| a.path.cmp(&b.path));
        errors
    }

    /// Unattributed failures, oldest first.
    pub fn server_errors(&self) -> Vec<RecordedFailure> {
        mutex_lock(&self.unattributed, SOURCE, "server_errors")
            .iter()
            .cloned()
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn records_are_keyed_by_path() {
        let state = ControllerState::new();
        state.record_for_path("/a", Some("req-1".into()), RenderFailure::new("broken"));

        assert_eq!(
            state.error_for("/a").map(|entry| entry.failure.message),
            Some("broken".to_string())
        );
        assert!(state.error_for("/b").is_none());
        assert!(state.clear_path("/a"));
        assert!(!state.clear_path("/a"));
    }

    #[test]
    fn resolving_keeps_failures_recorded_after_the_seed() {
        let state = ControllerState::new();
        state.record_for_path("/a", Some("req-1".into()), RenderFailure::new("first"));
        let seeded = state.error_for("/a").expect("seeded");

        state.record_for_path("/a", Some("req-2".into()), RenderFailure::new("second"));
        assert!(!state.resolve_seeded("/a", &seeded, "req-2"));
        assert_eq!(
            state.error_for("/a").map(|entry| entry.failure.message),
            Some("second".to_string())
        );

        let current = state.error_for("/a").expect("current");
        assert!(!state.resolve_seeded("/a", &current, "req-2"));
        assert!(state.resolve_seeded("/a", &current, "req-3"));
        assert!(state.error_for("/a").is_none());
    }

    #[test]
    fn unattributed_history_is_bounded() {
        let state = ControllerState::new();
        for n in 0..(UNATTRIBUTED_HISTORY + 3) {
            state.record_unattributed(RenderFailure::new(format!("failure {n}")));
        }
        let errors = state.server_errors();
        assert_eq!(errors.len(), UNATTRIBUTED_HISTORY);
        assert_eq!(errors[0].failure.message, "failure 3");
        assert!(state.path_errors().is_empty());
    }

    #[test]
    fn recorded_failure_serializes_timestamp() {
        let entry = RecordedFailure::new(Some("/a".into()), None, RenderFailure::new("x"));
        let value = serde_json::to_value(&entry).expect("serialize");
        assert_eq!(value["path"], "/a");
        assert!(value["recordedAt"].as_str().is_some_and(|ts| ts.contains('T')));
    }
}
