use std::path::{Path, PathBuf};

/// Shared state handed to every handler. Grounded on
/// `fspulse/src/web/server.rs`'s `AppState`, trimmed to what the HTTP
/// surface actually needs: where user catalogue files live and which
/// exclusion patterns new scanners should start with.
pub struct AppState {
    pub base_dir: PathBuf,
    pub excluded_patterns: Vec<String>,
}

impl AppState {
    pub fn new(base_dir: impl Into<PathBuf>, excluded_patterns: Vec<String>) -> Self {
        AppState {
            base_dir: base_dir.into(),
            excluded_patterns,
        }
    }

    /// Per-user catalogue file path, per spec.md §6's storage layout.
    pub fn db_path(&self, uid: &str) -> PathBuf {
        self.base_dir.join(uid).join("catalogue.db")
    }

    pub fn user_dir(&self, uid: &str) -> PathBuf {
        self.base_dir.join(uid)
    }
}

impl AsRef<Path> for AppState {
    fn as_ref(&self) -> &Path {
        &self.base_dir
    }
}
