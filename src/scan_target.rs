//! Scan-Target Store (spec.md §4.2). Persists the roots a user has asked
//! to index. Grounded on `original_source/ScanObject.{h,cpp}`'s
//! `ScanObject` class, renamed to the spec's vocabulary.

use std::path::Path;

use rusqlite::{params, OptionalExtension};
use serde::Serialize;

use crate::error::IndexError;
use crate::pool::{self, ConnectionHandle};

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct ScanTarget {
    pub id: i64,
    pub directory_path: String,
    pub display_name: String,
    pub description: String,
    pub is_active: bool,
    pub is_recursive: bool,
    pub last_successful_scan_time: Option<String>,
}

fn row_to_target(row: &rusqlite::Row) -> rusqlite::Result<ScanTarget> {
    Ok(ScanTarget {
        id: row.get(0)?,
        directory_path: row.get(1)?,
        display_name: row.get(2)?,
        description: row.get(3)?,
        is_active: row.get::<_, i64>(4)? != 0,
        is_recursive: row.get::<_, i64>(5)? != 0,
        last_successful_scan_time: row.get(6)?,
    })
}

const SELECT_COLUMNS: &str = "id, directory_path, display_name, description, is_active, is_recursive, last_successful_scan_time";

/// Owns a connection to one catalogue file and exposes CRUD over its
/// `scan_targets` table. Each write commits immediately — the store
/// never participates in a `FileCatalogue`'s scan transaction, per
/// spec.md §4.2.
pub struct ScanTargetStore {
    conn: ConnectionHandle,
}

impl ScanTargetStore {
    pub fn open(db_path: impl AsRef<Path>) -> Result<Self, IndexError> {
        let conn = pool::acquire(&db_path).ok_or_else(|| {
            IndexError::Persistence(rusqlite::Error::InvalidPath(db_path.as_ref().to_path_buf()))
        })?;
        conn.with_conn(crate::schema::ensure)?;
        Ok(ScanTargetStore { conn })
    }

    /// Adds a new scan target. Fails if `path` doesn't exist, isn't a
    /// directory, or duplicates an existing row's `directory_path`. The
    /// path is canonicalised before storage; `name` defaults to the
    /// path's basename.
    pub fn add(
        &self,
        path: impl AsRef<Path>,
        name: Option<&str>,
        description: Option<&str>,
        recursive: bool,
    ) -> Result<ScanTarget, IndexError> {
        let path = path.as_ref();
        if !path.is_dir() {
            return Err(IndexError::validation(format!(
                "'{}' does not exist or is not a directory",
                path.display()
            )));
        }
        let canonical = path
            .canonicalize()
            .map_err(IndexError::FileSystem)?;
        let canonical_str = canonical.to_string_lossy().into_owned();

        if self.exists(&canonical_str)? {
            return Err(IndexError::validation(format!(
                "scan target '{canonical_str}' already exists"
            )));
        }

        let display_name = name.map(str::to_string).unwrap_or_else(|| {
            canonical
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_else(|| canonical_str.clone())
        });
        let description = description.unwrap_or("");

        self.conn.with_conn(|c| {
            c.execute(
                "INSERT INTO scan_targets (directory_path, display_name, description, is_active, is_recursive)
                 VALUES (?1, ?2, ?3, 1, ?4)",
                params![canonical_str, display_name, description, recursive as i64],
            )
        })?;

        self.get(&canonical_str)?
            .ok_or_else(|| IndexError::validation("scan target vanished immediately after insert"))
    }

    pub fn delete(&self, id: i64) -> Result<(), IndexError> {
        self.conn
            .with_conn(|c| c.execute("DELETE FROM scan_targets WHERE id = ?1", params![id]))?;
        Ok(())
    }

    /// Sets `last_successful_scan_time` to the current local time.
    pub fn update_last_scan_time(&self, path: &str) -> Result<(), IndexError> {
        let now = chrono::Local::now().format("%Y-%m-%dT%H:%M:%S").to_string();
        self.conn.with_conn(|c| {
            c.execute(
                "UPDATE scan_targets SET last_successful_scan_time = ?1 WHERE directory_path = ?2",
                params![now, path],
            )
        })?;
        Ok(())
    }

    pub fn get(&self, path: &str) -> Result<Option<ScanTarget>, IndexError> {
        let target = self.conn.with_conn(|c| {
            c.query_row(
                &format!("SELECT {SELECT_COLUMNS} FROM scan_targets WHERE directory_path = ?1"),
                params![path],
                row_to_target,
            )
            .optional()
        })?;
        Ok(target)
    }

    pub fn get_by_id(&self, id: i64) -> Result<Option<ScanTarget>, IndexError> {
        let target = self.conn.with_conn(|c| {
            c.query_row(
                &format!("SELECT {SELECT_COLUMNS} FROM scan_targets WHERE id = ?1"),
                params![id],
                row_to_target,
            )
            .optional()
        })?;
        Ok(target)
    }

    pub fn exists(&self, path: &str) -> Result<bool, IndexError> {
        Ok(self.get(path)?.is_some())
    }

    /// Lists targets ordered by `directory_path`, optionally restricted
    /// to active ones.
    pub fn list(&self, active_only: bool) -> Result<Vec<ScanTarget>, IndexError> {
        let sql = if active_only {
            format!("SELECT {SELECT_COLUMNS} FROM scan_targets WHERE is_active = 1 ORDER BY directory_path")
        } else {
            format!("SELECT {SELECT_COLUMNS} FROM scan_targets ORDER BY directory_path")
        };

        let targets = self.conn.with_conn(|c| {
            let mut stmt = c.prepare_cached(&sql)?;
            let rows = stmt.query_map([], row_to_target)?;
            rows.collect::<rusqlite::Result<Vec<_>>>()
        })?;
        Ok(targets)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use tempfile::tempdir;

    fn store(dir: &std::path::Path) -> ScanTargetStore {
        ScanTargetStore::open(dir.join("catalogue.db")).unwrap()
    }

    #[test]
    fn add_requires_existing_directory() {
        let dir = tempdir().unwrap();
        let store = store(dir.path());
        let missing = dir.path().join("does-not-exist");
        let result = store.add(&missing, None, None, true);
        assert!(result.is_err());
    }

    #[test]
    fn add_rejects_duplicate_path() {
        let dir = tempdir().unwrap();
        let root = dir.path().join("root");
        std::fs::create_dir(&root).unwrap();
        let store = store(dir.path());

        store.add(&root, None, None, true).unwrap();
        let second = store.add(&root, None, None, true);
        assert!(second.is_err());
    }

    #[test]
    fn add_defaults_name_to_basename() {
        let dir = tempdir().unwrap();
        let root = dir.path().join("my-root");
        std::fs::create_dir(&root).unwrap();
        let store = store(dir.path());

        let target = store.add(&root, None, None, true).unwrap();
        assert_eq!(target.display_name, "my-root");
        assert!(target.is_active);
        assert!(target.last_successful_scan_time.is_none());
    }

    #[test]
    fn list_orders_by_path_and_respects_active_filter() {
        let dir = tempdir().unwrap();
        let a = dir.path().join("a");
        let b = dir.path().join("b");
        std::fs::create_dir(&a).unwrap();
        std::fs::create_dir(&b).unwrap();
        let store = store(dir.path());

        let target_b = store.add(&b, None, None, true).unwrap();
        store.add(&a, None, None, true).unwrap();

        let listed = store.list(true).unwrap();
        assert_eq!(listed.len(), 2);
        assert!(listed[0].directory_path < listed[1].directory_path);

        store
            .conn
            .with_conn(|c| {
                c.execute(
                    "UPDATE scan_targets SET is_active = 0 WHERE id = ?1",
                    params![target_b.id],
                )
            })
            .unwrap();
        let active = store.list(true).unwrap();
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].directory_path, a.canonicalize().unwrap().to_string_lossy());
    }

    #[test]
    fn delete_removes_row_by_id() {
        let dir = tempdir().unwrap();
        let root = dir.path().join("root");
        std::fs::create_dir(&root).unwrap();
        let store = store(dir.path());

        let target = store.add(&root, None, None, true).unwrap();
        store.delete(target.id).unwrap();
        assert!(store.get(&target.directory_path).unwrap().is_none());
    }
}
