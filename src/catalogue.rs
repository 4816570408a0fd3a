//! File Catalogue (spec.md §4.3) — the heart of the system. Persists
//! `FileEntry` rows keyed by absolute path and supports the transactional,
//! substring-searchable operations the scanner and HTTP surface both
//! drive. Grounded on `original_source/server/FileDB.{h,cpp}`'s `FileDB`
//! class at the operation level, with the prepared-statement cache
//! delegated to `rusqlite::Connection::prepare_cached` rather than
//! hand-rolled, since that's exactly what it already provides.

use std::cell::Cell;
use std::path::Path;

use rusqlite::{params, OptionalExtension};
use serde::Serialize;

use crate::error::IndexError;
use crate::pool::{self, ConnectionHandle};

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct FileEntry {
    pub id: i64,
    pub file_path: String,
    pub file_name: String,
    pub modified_time: String,
    pub created_time: String,
    pub file_extension: String,
    pub mime_type: String,
    pub is_directory: bool,
    pub parent_directory: String,
    pub last_scanned_time: String,
    pub scan_count: i64,
}

/// Fields `search` is allowed to match against. Anything else is a
/// `ValidationError`, per spec.md §4.3.
pub const SEARCHABLE_FIELDS: &[&str] = &[
    "file_name",
    "file_path",
    "file_extension",
    "mime_type",
    "parent_directory",
];

#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
pub struct CatalogueStats {
    pub total: i64,
    pub directories: i64,
    pub files: i64,
}

const SELECT_COLUMNS: &str = "id, file_path, file_name, modified_time, created_time, \
    file_extension, mime_type, is_directory, parent_directory, last_scanned_time, scan_count";

fn row_to_entry(row: &rusqlite::Row) -> rusqlite::Result<FileEntry> {
    Ok(FileEntry {
        id: row.get(0)?,
        file_path: row.get(1)?,
        file_name: row.get(2)?,
        modified_time: row.get(3)?,
        created_time: row.get(4)?,
        file_extension: row.get(5)?,
        mime_type: row.get(6)?,
        is_directory: row.get::<_, i64>(7)? != 0,
        parent_directory: row.get(8)?,
        last_scanned_time: row.get(9)?,
        scan_count: row.get(10)?,
    })
}

/// Owns a connection to one catalogue file. Not `Sync` by convention
/// (spec.md §5: "callers must not share one catalogue object across
/// threads without external synchronisation") — transaction depth is
/// tracked with a plain `Cell`, not a `Mutex`.
pub struct FileCatalogue {
    conn: ConnectionHandle,
    tx_depth: Cell<u32>,
}

impl FileCatalogue {
    pub fn open(db_path: impl AsRef<Path>) -> Result<Self, IndexError> {
        let conn = pool::acquire(&db_path).ok_or_else(|| {
            IndexError::Persistence(rusqlite::Error::InvalidPath(db_path.as_ref().to_path_buf()))
        })?;
        conn.with_conn(crate::schema::ensure)?;
        Ok(FileCatalogue {
            conn,
            tx_depth: Cell::new(0),
        })
    }

    pub fn db_path(&self) -> &Path {
        self.conn.path()
    }

    // --- Nested transactions (spec.md §4.3, §9) ---------------------

    /// Increments the transaction depth; starts a real SQL transaction
    /// only when moving from depth 0 to 1.
    pub fn begin(&self) -> Result<(), IndexError> {
        let depth = self.tx_depth.get() + 1;
        self.tx_depth.set(depth);
        if depth == 1 {
            self.conn.with_conn(|c| c.execute_batch("BEGIN"))?;
        }
        Ok(())
    }

    /// Decrements the transaction depth; commits only when reaching 0.
    pub fn commit(&self) -> Result<(), IndexError> {
        let depth = self.tx_depth.get().saturating_sub(1);
        self.tx_depth.set(depth);
        if depth == 0 {
            self.conn.with_conn(|c| c.execute_batch("COMMIT"))?;
        }
        Ok(())
    }

    /// Unconditionally rolls back and resets depth to 0, regardless of
    /// nesting.
    pub fn rollback(&self) -> Result<(), IndexError> {
        self.tx_depth.set(0);
        self.conn.with_conn(|c| c.execute_batch("ROLLBACK"))?;
        Ok(())
    }

    // --- Mutation -----------------------------------------------------

    /// Inserts `entry` if `entry.file_path` is new. Otherwise, updates
    /// every field when `modified_time` differs from the stored value
    /// (bumping `scan_count` and `last_scanned_time`); a no-op,
    /// successful call when `modified_time` is unchanged. See spec.md
    /// §4.3 and Testable Properties #2/#3.
    pub fn insert_or_update(&self, entry: &FileEntry) -> Result<(), IndexError> {
        let existing_modified: Option<String> = self.conn.with_conn(|c| {
            c.query_row(
                "SELECT modified_time FROM file_entries WHERE file_path = ?1",
                params![entry.file_path],
                |row| row.get(0),
            )
            .optional()
        })?;

        match existing_modified {
            None => {
                let now = now_local();
                self.conn.with_conn(|c| {
                    c.execute(
                        "INSERT INTO file_entries
                            (file_path, file_name, modified_time, created_time, file_extension,
                             mime_type, is_directory, parent_directory, last_scanned_time, scan_count)
                         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, 1)",
                        params![
                            entry.file_path,
                            entry.file_name,
                            entry.modified_time,
                            entry.created_time,
                            entry.file_extension,
                            entry.mime_type,
                            entry.is_directory as i64,
                            entry.parent_directory,
                            now,
                        ],
                    )
                })?;
            }
            Some(stored) if stored == entry.modified_time => {
                // No-op: metadata hasn't changed since the last scan.
            }
            Some(_) => {
                // Only non-empty incoming fields overwrite the stored row
                // (original_source/server/FileDB.cpp's update_file builds its
                // SET list the same way); is_directory, last_scanned_time and
                // scan_count always advance.
                let now = now_local();
                self.conn.with_conn(|c| {
                    c.execute(
                        "UPDATE file_entries SET
                            file_name = COALESCE(NULLIF(?1, ''), file_name),
                            modified_time = COALESCE(NULLIF(?2, ''), modified_time),
                            created_time = COALESCE(NULLIF(?3, ''), created_time),
                            file_extension = COALESCE(NULLIF(?4, ''), file_extension),
                            mime_type = COALESCE(NULLIF(?5, ''), mime_type),
                            is_directory = ?6,
                            parent_directory = COALESCE(NULLIF(?7, ''), parent_directory),
                            last_scanned_time = ?8,
                            scan_count = scan_count + 1
                         WHERE file_path = ?9",
                        params![
                            entry.file_name,
                            entry.modified_time,
                            entry.created_time,
                            entry.file_extension,
                            entry.mime_type,
                            entry.is_directory as i64,
                            entry.parent_directory,
                            now,
                            entry.file_path,
                        ],
                    )
                })?;
            }
        }

        Ok(())
    }

    /// Removes exactly the row at `path`. Missing row is not an error.
    pub fn delete(&self, path: &str) -> Result<(), IndexError> {
        self.conn
            .with_conn(|c| c.execute("DELETE FROM file_entries WHERE file_path = ?1", params![path]))?;
        Ok(())
    }

    /// Removes every row whose `parent_directory` equals `path`, plus the
    /// row at `path` itself.
    pub fn delete_by_parent(&self, path: &str) -> Result<(), IndexError> {
        self.conn.with_conn(|c| {
            c.execute(
                "DELETE FROM file_entries WHERE parent_directory = ?1 OR file_path = ?1",
                params![path],
            )
        })?;
        Ok(())
    }

    /// Removes every row whose `file_path` is `path`, or starts with
    /// `path` followed by `/`. Used to prune an entire subtree (spec.md
    /// Testable Property #4).
    pub fn delete_by_prefix(&self, path: &str) -> Result<(), IndexError> {
        let prefix = format!("{path}/");
        let prefix_len = prefix.len() as i64;
        self.conn.with_conn(|c| {
            c.execute(
                "DELETE FROM file_entries
                 WHERE file_path = ?1 OR substr(file_path, 1, ?2) = ?3",
                params![path, prefix_len, prefix],
            )
        })?;
        Ok(())
    }

    pub fn batch_delete(&self, paths: &[String]) -> Result<(), IndexError> {
        if paths.is_empty() {
            return Ok(());
        }
        let placeholders = paths.iter().map(|_| "?").collect::<Vec<_>>().join(", ");
        let sql = format!("DELETE FROM file_entries WHERE file_path IN ({placeholders})");
        self.conn.with_conn(|c| {
            c.execute(&sql, rusqlite::params_from_iter(paths.iter()))
        })?;
        Ok(())
    }

    pub fn clear(&self) -> Result<(), IndexError> {
        self.conn.with_conn(|c| c.execute("DELETE FROM file_entries", []))?;
        Ok(())
    }

    // --- Queries --------------------------------------------------------

    pub fn get(&self, path: &str) -> Result<Option<FileEntry>, IndexError> {
        let entry = self.conn.with_conn(|c| {
            c.query_row(
                &format!("SELECT {SELECT_COLUMNS} FROM file_entries WHERE file_path = ?1"),
                params![path],
                row_to_entry,
            )
            .optional()
        })?;
        Ok(entry)
    }

    pub fn exists(&self, path: &str) -> Result<bool, IndexError> {
        Ok(self.get(path)?.is_some())
    }

    pub fn children(&self, path: &str) -> Result<Vec<FileEntry>, IndexError> {
        let entries = self.conn.with_conn(|c| {
            let mut stmt = c.prepare_cached(&format!(
                "SELECT {SELECT_COLUMNS} FROM file_entries WHERE parent_directory = ?1"
            ))?;
            let rows = stmt.query_map(params![path], row_to_entry)?;
            rows.collect::<rusqlite::Result<Vec<_>>>()
        })?;
        Ok(entries)
    }

    /// Substring search against one of [`SEARCHABLE_FIELDS`], ordered by
    /// `file_path`, case-sensitive (SQL `LIKE` default collation).
    /// `limit <= 0` means unbounded.
    pub fn search(&self, term: &str, field: &str, limit: i64) -> Result<Vec<FileEntry>, IndexError> {
        if !SEARCHABLE_FIELDS.contains(&field) {
            return Err(IndexError::validation(format!(
                "'{field}' is not a searchable field; expected one of {SEARCHABLE_FIELDS:?}"
            )));
        }

        let pattern = format!("%{term}%");
        let sql = if limit > 0 {
            format!("SELECT {SELECT_COLUMNS} FROM file_entries WHERE {field} LIKE ?1 ORDER BY file_path LIMIT ?2")
        } else {
            format!("SELECT {SELECT_COLUMNS} FROM file_entries WHERE {field} LIKE ?1 ORDER BY file_path")
        };

        let entries = self.conn.with_conn(|c| {
            let mut stmt = c.prepare_cached(&sql)?;
            let rows = if limit > 0 {
                stmt.query_map(params![pattern, limit], row_to_entry)?
            } else {
                stmt.query_map(params![pattern], row_to_entry)?
            };
            rows.collect::<rusqlite::Result<Vec<_>>>()
        })?;
        Ok(entries)
    }

    pub fn stats(&self) -> Result<CatalogueStats, IndexError> {
        let (total, directories) = self.conn.with_conn(|c| {
            c.query_row(
                "SELECT COUNT(*), COALESCE(SUM(is_directory), 0) FROM file_entries",
                [],
                |row| Ok((row.get::<_, i64>(0)?, row.get::<_, i64>(1)?)),
            )
        })?;
        Ok(CatalogueStats {
            total,
            directories,
            files: total - directories,
        })
    }
}

fn now_local() -> String {
    chrono::Local::now().format("%Y-%m-%dT%H:%M:%S").to_string()
}
