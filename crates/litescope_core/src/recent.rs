use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

const MAX_RECENT_FILES: usize = 30;

/// One recently opened database file.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecentFile {
    pub path: PathBuf,
    pub last_opened: i64,
}

/// Bounded most-recent-first list of opened databases. The host
/// persists the serialized entries; the core only updates them.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RecentFiles {
    entries: Vec<RecentFile>,
}

impl RecentFiles {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records an open. An existing entry moves to the top.
    pub fn record_open(&mut self, path: impl Into<PathBuf>) {
        let path = path.into();
        self.entries.retain(|e| e.path != path);
        self.entries.insert(
            0,
            RecentFile { path, last_opened: chrono::Utc::now().timestamp() },
        );
        if self.entries.len() > MAX_RECENT_FILES {
            self.entries.truncate(MAX_RECENT_FILES);
        }
    }

    pub fn remove(&mut self, path: &Path) {
        self.entries.retain(|e| e.path != path);
    }

    pub fn entries(&self) -> &[RecentFile] {
        &self.entries
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reopening_moves_to_top() {
        let mut recent = RecentFiles::new();
        recent.record_open("/tmp/a.db");
        recent.record_open("/tmp/b.db");
        recent.record_open("/tmp/a.db");
        let paths: Vec<_> = recent.entries().iter().map(|e| e.path.clone()).collect();
        assert_eq!(paths, vec![PathBuf::from("/tmp/a.db"), PathBuf::from("/tmp/b.db")]);
    }

    #[test]
    fn list_is_bounded() {
        let mut recent = RecentFiles::new();
        for i in 0..40 {
            recent.record_open(format!("/tmp/{i}.db"));
        }
        assert_eq!(recent.entries().len(), MAX_RECENT_FILES);
        assert_eq!(recent.entries()[0].path, PathBuf::from("/tmp/39.db"));
    }
}
