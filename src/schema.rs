//! Catalogue-file schema. `scan_targets` and `file_entries` live in the
//! same SQLite file (spec.md §6: one `catalogue.db` per user), so both
//! tables are created together the first time either store opens the
//! file. Column layout for `scan_targets` mirrors
//! `original_source/ScanObject.h`'s `scan_objects` table; `file_entries`
//! mirrors `original_source/server/FileDB.h`'s `FileInfo`.

pub const CREATE_SCHEMA_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS scan_targets (
    id                      INTEGER PRIMARY KEY AUTOINCREMENT,
    directory_path          TEXT NOT NULL UNIQUE,
    display_name            TEXT NOT NULL DEFAULT '',
    description             TEXT NOT NULL DEFAULT '',
    is_active               INTEGER NOT NULL DEFAULT 1,
    is_recursive            INTEGER NOT NULL DEFAULT 1,
    last_successful_scan_time TEXT
);

CREATE INDEX IF NOT EXISTS idx_scan_targets_active ON scan_targets (is_active);

CREATE TABLE IF NOT EXISTS file_entries (
    id                  INTEGER PRIMARY KEY AUTOINCREMENT,
    file_path           TEXT NOT NULL UNIQUE,
    file_name           TEXT NOT NULL,
    modified_time       TEXT NOT NULL,
    created_time        TEXT NOT NULL,
    file_extension      TEXT NOT NULL DEFAULT '',
    mime_type           TEXT NOT NULL,
    is_directory        INTEGER NOT NULL,
    parent_directory    TEXT NOT NULL,
    last_scanned_time   TEXT NOT NULL,
    scan_count          INTEGER NOT NULL DEFAULT 1
);

CREATE INDEX IF NOT EXISTS idx_file_entries_parent ON file_entries (parent_directory);
CREATE INDEX IF NOT EXISTS idx_file_entries_name ON file_entries (file_name);
CREATE INDEX IF NOT EXISTS idx_file_entries_extension ON file_entries (file_extension);
CREATE INDEX IF NOT EXISTS idx_file_entries_mime ON file_entries (mime_type);
"#;

pub fn ensure(conn: &rusqlite::Connection) -> rusqlite::Result<()> {
    conn.execute_batch(CREATE_SCHEMA_SQL)
}
