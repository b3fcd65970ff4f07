//! Filesystem change events.
//!
//! Defines the change notifications consumed by the route cache and the
//! action each one maps to.

use std::fmt;
use std::path::PathBuf;

use time::OffsetDateTime;
use uuid::Uuid;

/// Kind of change reported for a project file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FsEventKind {
    Added,
    Removed,
    /// Content-only change; the set of files is unchanged.
    Changed,
}

impl FsEventKind {
    pub fn as_str(self) -> &'static str {
        match self {
            FsEventKind::Added => "added",
            FsEventKind::Removed => "removed",
            FsEventKind::Changed => "changed",
        }
    }

    /// Map the change to the route cache action it requires.
    pub fn action(self) -> RebuildAction {
        match self {
            FsEventKind::Added | FsEventKind::Removed => RebuildAction::Rebuild,
            FsEventKind::Changed => RebuildAction::ClearCache,
        }
    }
}

impl fmt::Display for FsEventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What the route cache does in response to an event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RebuildAction {
    /// Regenerate the route table and replace the manifest snapshot.
    Rebuild,
    /// Drop derived matching caches, keep the route table.
    ClearCache,
}

/// A single filesystem change notification.
#[derive(Debug, Clone)]
pub struct FsEvent {
    /// Unique identifier, used only for log correlation.
    pub id: Uuid,
    pub kind: FsEventKind,
    pub path: PathBuf,
    pub timestamp: OffsetDateTime,
}

impl FsEvent {
    pub fn new(kind: FsEventKind, path: impl Into<PathBuf>) -> Self {
        Self {
            id: Uuid::new_v4(),
            kind,
            path: path.into(),
            timestamp: OffsetDateTime::now_utc(),
        }
    }

    pub fn added(path: impl Into<PathBuf>) -> Self {
        Self::new(FsEventKind::Added, path)
    }

    pub fn removed(path: impl Into<PathBuf>) -> Self {
        Self::new(FsEventKind::Removed, path)
    }

    pub fn changed(path: impl Into<PathBuf>) -> Self {
        Self::new(FsEventKind::Changed, path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn structural_changes_rebuild() {
        assert_eq!(FsEventKind::Added.action(), RebuildAction::Rebuild);
        assert_eq!(FsEventKind::Removed.action(), RebuildAction::Rebuild);
    }

    #[test]
    fn content_changes_only_clear_cache() {
        assert_eq!(FsEventKind::Changed.action(), RebuildAction::ClearCache);
    }

    #[test]
    fn events_get_unique_ids() {
        let first = FsEvent::added("src/pages/a.md");
        let second = FsEvent::added("src/pages/a.md");
        assert_ne!(first.id, second.id);
        assert_eq!(first.kind, FsEventKind::Added);
    }
}
