//! Fixed extension-to-MIME-type table (spec.md §4.4). Built with `phf`, the
//! same static-map idiom `fspulse/src/query/filter.rs` uses for its own
//! lookup tables (`ENUM_PARSERS`, `BOOL_VALUES`).

use phf_macros::phf_map;

pub const DIRECTORY_MIME: &str = "inode/directory";
const DEFAULT_MIME: &str = "application/octet-stream";

static EXTENSION_MIME: phf::Map<&'static str, &'static str> = phf_map! {
    ".txt" => "text/plain",
    ".md" => "text/plain",
    ".html" => "text/html",
    ".htm" => "text/html",
    ".css" => "text/css",
    ".js" => "application/javascript",
    ".json" => "application/json",
    ".xml" => "application/xml",
    ".pdf" => "application/pdf",
    ".zip" => "application/zip",
    ".jpg" => "image/jpeg",
    ".jpeg" => "image/jpeg",
    ".png" => "image/png",
    ".gif" => "image/gif",
};

/// Looks up the MIME type for a file extension (leading `.` included,
/// e.g. `.txt`). Unknown extensions fall back to
/// `application/octet-stream`.
pub fn lookup(extension: &str) -> &'static str {
    EXTENSION_MIME
        .get(extension.to_ascii_lowercase().as_str())
        .copied()
        .unwrap_or(DEFAULT_MIME)
}
