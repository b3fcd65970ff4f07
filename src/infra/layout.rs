//! Project layout read from the pages directory on disk.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use walkdir::{DirEntry, WalkDir};

use crate::application::routing::{LayoutError, LayoutSource, PageFile, PageKind, ProjectLayout};

const PAGE_EXTENSIONS: &[&str] = &["html", "md", "markdown"];
const ENDPOINT_EXTENSIONS: &[&str] = &["js", "ts"];

/// Modification times of every watched file under the pages directory.
pub type Fingerprint = BTreeMap<PathBuf, SystemTime>;

#[derive(Debug, Clone)]
pub struct PagesDirectory {
    root: PathBuf,
    pages_dir: PathBuf,
}

impl PagesDirectory {
    /// `pages_dir` is relative to `root`.
    pub fn new(root: impl Into<PathBuf>, pages_dir: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            pages_dir: pages_dir.into(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn pages_path(&self) -> PathBuf {
        self.root.join(&self.pages_dir)
    }

    /// Snapshot of file modification times, used to detect changes.
    pub fn fingerprint(&self) -> Result<Fingerprint, LayoutError> {
        let mut fingerprint = Fingerprint::new();
        for entry in self.entries()? {
            let modified = entry
                .metadata()
                .ok()
                .and_then(|metadata| metadata.modified().ok())
                .unwrap_or(SystemTime::UNIX_EPOCH);
            fingerprint.insert(entry.into_path(), modified);
        }
        Ok(fingerprint)
    }

    /// Regular files under the pages directory, skipping hidden entries.
    /// A missing directory has no entries.
    fn entries(&self) -> Result<Vec<DirEntry>, LayoutError> {
        let pages = self.pages_path();
        if !pages.is_dir() {
            return Ok(Vec::new());
        }

        let mut entries = Vec::new();
        let walker = WalkDir::new(&pages)
            .sort_by_file_name()
            .into_iter()
            .filter_entry(|entry| entry.depth() == 0 || !is_hidden(entry));
        for entry in walker {
            let entry = entry.map_err(|err| LayoutError::Read {
                path: err
                    .path()
                    .map(|path| path.display().to_string())
                    .unwrap_or_else(|| pages.display().to_string()),
                message: err.to_string(),
            })?;
            if entry.file_type().is_file() {
                entries.push(entry);
            }
        }
        Ok(entries)
    }

    fn page_file(&self, pages: &Path, path: &Path) -> Option<PageFile> {
        let relative = path.strip_prefix(pages).ok()?;
        if relative
            .components()
            .any(|component| component.as_os_str().to_string_lossy().starts_with('_'))
        {
            return None;
        }

        let extension = path.extension()?.to_str()?;
        let kind = if PAGE_EXTENSIONS.contains(&extension) {
            PageKind::Page
        } else if ENDPOINT_EXTENSIONS.contains(&extension) {
            PageKind::Endpoint
        } else {
            return None;
        };

        let route_path = slash_path(&relative.with_extension(""));
        let component = slash_path(&self.pages_dir.join(relative));
        Some(PageFile::new(component, route_path, kind))
    }
}

impl LayoutSource for PagesDirectory {
    fn scan(&self) -> Result<ProjectLayout, LayoutError> {
        let pages = self.pages_path();
        let files = self
            .entries()?
            .iter()
            .filter_map(|entry| self.page_file(&pages, entry.path()))
            .collect();
        Ok(ProjectLayout::new(files))
    }
}

fn is_hidden(entry: &DirEntry) -> bool {
    entry.file_name().to_string_lossy().starts_with('.')
}

fn slash_path(path: &Path) -> String {
    path.components()
        .map(|component| component.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("/")
}
