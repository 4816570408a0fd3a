//! Route handlers (spec.md §6). JSON envelopes follow the
//! `{result: "ok" | "error", ...}` shape throughout, mapped from
//! `IndexError` the way `fspulse/src/api/routes/roots.rs` maps
//! `FsPulseError` to `(StatusCode, Json<ErrorResponse>)`.

use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::{Deserialize, Serialize};

use crate::catalogue::FileCatalogue;
use crate::error::IndexError;
use crate::registry;
use crate::scan_target::{ScanTarget, ScanTargetStore};
use crate::scanner::ChangeKind;

use super::state::AppState;

#[derive(Serialize)]
struct ErrorResponse {
    result: &'static str,
    message: String,
}

fn error_response(err: IndexError) -> Response {
    let status = match &err {
        IndexError::Validation(_) => StatusCode::BAD_REQUEST,
        IndexError::FileSystem(_) | IndexError::Persistence(_) | IndexError::Config(_) => {
            StatusCode::INTERNAL_SERVER_ERROR
        }
    };
    (
        status,
        Json(ErrorResponse {
            result: "error",
            message: err.to_string(),
        }),
    )
        .into_response()
}

#[derive(Serialize)]
struct ScanObjListResponse {
    result: &'static str,
    count: usize,
    scan_objs: Vec<ScanTarget>,
}

#[derive(Serialize)]
struct ScanObjResponse {
    result: &'static str,
    scan_obj: ScanTarget,
}

#[derive(Deserialize)]
pub struct CreateScanObjRequest {
    directory_path: String,
    description: Option<String>,
}

#[derive(Serialize)]
struct OkResponse {
    result: &'static str,
}

#[derive(Serialize)]
struct FileDbEntry {
    id: i64,
    file_name: String,
    file_path: String,
    file_extension: String,
    mime_type: String,
    is_directory: bool,
}

#[derive(Serialize)]
struct FileDbListResponse {
    result: &'static str,
    count: usize,
    filedb_objs: Vec<FileDbEntry>,
}

#[derive(Deserialize)]
pub struct AuditEventRequest {
    path: String,
    #[serde(rename = "type")]
    kind: String,
}

pub async fn health() -> impl IntoResponse {
    (StatusCode::OK, Json(OkResponse { result: "ok" }))
}

pub async fn list_scan_objs(State(state): State<Arc<AppState>>, Path(uid): Path<String>) -> Response {
    let db_path = state.db_path(&uid);
    let result = ScanTargetStore::open(&db_path).and_then(|store| store.list(true));
    match result {
        Ok(scan_objs) => Json(ScanObjListResponse {
            result: "ok",
            count: scan_objs.len(),
            scan_objs,
        })
        .into_response(),
        Err(e) => error_response(e),
    }
}

pub async fn create_scan_obj(
    State(state): State<Arc<AppState>>,
    Path(uid): Path<String>,
    Json(body): Json<CreateScanObjRequest>,
) -> Response {
    let db_path = state.db_path(&uid);
    let added = ScanTargetStore::open(&db_path).and_then(|store| {
        store.add(&body.directory_path, None, body.description.as_deref(), true)
    });

    let scan_obj = match added {
        Ok(t) => t,
        Err(e) => return error_response(e),
    };

    if let Err(e) = registry::add(&db_path, &scan_obj.directory_path, &state.excluded_patterns) {
        return error_response(e);
    }
    if let Err(e) = registry::start(&db_path, &scan_obj.directory_path) {
        return error_response(e);
    }

    Json(ScanObjResponse {
        result: "ok",
        scan_obj,
    })
    .into_response()
}

pub async fn delete_scan_obj(
    State(state): State<Arc<AppState>>,
    Path((uid, id)): Path<(String, i64)>,
) -> Response {
    let db_path = state.db_path(&uid);
    let store = match ScanTargetStore::open(&db_path) {
        Ok(s) => s,
        Err(e) => return error_response(e),
    };

    let target = match store.get_by_id(id) {
        Ok(Some(t)) => t,
        Ok(None) => {
            return error_response(IndexError::validation(format!("no scan target with id {id}")))
        }
        Err(e) => return error_response(e),
    };

    if let Err(e) = registry::remove(&db_path, &target.directory_path) {
        return error_response(e);
    }
    if let Err(e) = store.delete(id) {
        return error_response(e);
    }

    Json(OkResponse { result: "ok" }).into_response()
}

pub async fn search_filedb(
    State(state): State<Arc<AppState>>,
    Path((uid, search_text)): Path<(String, String)>,
) -> Response {
    let decoded = match urlencoding::decode(&search_text) {
        Ok(d) => d.into_owned(),
        Err(e) => return error_response(IndexError::validation(format!("bad search text: {e}"))),
    };

    let db_path = state.db_path(&uid);
    let result = FileCatalogue::open(&db_path).and_then(|cat| cat.search(&decoded, "file_name", 0));

    match result {
        Ok(entries) => {
            let filedb_objs = entries
                .into_iter()
                .map(|e| FileDbEntry {
                    id: e.id,
                    file_name: e.file_name,
                    file_path: e.file_path,
                    file_extension: e.file_extension,
                    mime_type: e.mime_type,
                    is_directory: e.is_directory,
                })
                .collect::<Vec<_>>();
            Json(FileDbListResponse {
                result: "ok",
                count: filedb_objs.len(),
                filedb_objs,
            })
            .into_response()
        }
        Err(e) => error_response(e),
    }
}

pub async fn audit_event(Json(body): Json<AuditEventRequest>) -> Response {
    let kind = match ChangeKind::parse(&body.kind) {
        Some(k) => k,
        None => {
            return error_response(IndexError::validation(format!(
                "unknown audit event type '{}'",
                body.kind
            )))
        }
    };

    registry::on_file_change(std::path::Path::new(&body.path), kind);
    Json(OkResponse { result: "ok" }).into_response()
}
