use std::collections::HashMap;
use std::path::Path as FsPath;

use axum::extract::{Json, Multipart, Path, Query, State};
use chrono::{NaiveDateTime, Utc};
use diesel::prelude::*;
use diesel::sqlite::SqliteConnection;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tokio::task;
use tracing::{error, info, warn};

use crate::error::{AppError, AppResult};
use crate::extract;
use crate::models::{Document, NewDocument, NewDocumentTag};
use crate::schema::{document_tags, documents};
use crate::state::AppState;

use super::analysis::start_analysis;

#[derive(Serialize)]
pub struct DocumentResponse {
    pub id: i32,
    pub filename: String,
    pub format: String,
    pub uploaded_at: NaiveDateTime,
    pub tags: Vec<String>,
}

#[derive(Serialize)]
pub struct DocumentDetailResponse {
    #[serde(flatten)]
    pub document: DocumentResponse,
    pub content: String,
}

#[derive(Deserialize)]
pub struct SearchQuery {
    pub query: String,
}

pub async fn upload_document(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> AppResult<Json<DocumentDetailResponse>> {
    let mut file_bytes: Option<Vec<u8>> = None;
    let mut original_name: Option<String> = None;

    while let Some(field) = multipart.next_field().await.map_err(|err| {
        error!(error = %err, "invalid multipart data");
        AppError::bad_request(format!("invalid multipart data: {err}"))
    })? {
        if field.name() == Some("file") {
            original_name = field.file_name().map(|name| name.to_string());
            let data = field.bytes().await.map_err(|err| {
                error!(error = %err, "failed to read file bytes");
                AppError::bad_request(format!("failed to read file bytes: {err}"))
            })?;
            file_bytes = Some(data.to_vec());
        }
    }

    let file_bytes = file_bytes.ok_or_else(|| AppError::bad_request("file field is required"))?;
    let filename = original_name
        .filter(|name| !name.trim().is_empty())
        .ok_or_else(|| AppError::bad_request("filename is required"))?;

    if file_bytes.len() > state.config.max_upload_size {
        return Err(AppError::payload_too_large("File too large"));
    }

    let format = extract::format_from_filename(&filename)?;

    let storage_path = state
        .files
        .save(format.as_str(), &file_bytes)
        .await
        .map_err(|err| {
            error!(error = %err, "failed to store upload");
            AppError::internal(format!("failed to store upload: {err}"))
        })?;

    let extracted = task::spawn_blocking(move || extract::extract(&file_bytes, format))
        .await
        .map_err(|err| AppError::internal(format!("extraction task panicked: {err}")))?;

    let content = match extracted {
        Ok(content) if !content.trim().is_empty() => content,
        Ok(_) => {
            discard_stored_file(&state, &storage_path).await;
            return Err(AppError::bad_request("document contains no extractable text"));
        }
        Err(err) => {
            discard_stored_file(&state, &storage_path).await;
            return Err(err.into());
        }
    };

    let document: Document = {
        let mut conn = state.db()?;
        diesel::insert_into(documents::table)
            .values(&NewDocument {
                filename: filename.clone(),
                storage_path: storage_path.to_string_lossy().into_owned(),
                format: format.as_str().to_string(),
                content,
                uploaded_at: Utc::now().naive_utc(),
            })
            .get_result(&mut conn)?
    };

    info!(
        document_id = document.id,
        filename = %document.filename,
        format = %document.format,
        "document uploaded"
    );

    // Analysis starts automatically; losing it here is recoverable through
    // the analyze endpoint, so it never fails the upload.
    if let Err(err) = start_analysis(&state, document.id).await {
        warn!(
            document_id = document.id,
            error = ?err,
            "failed to start analysis after upload"
        );
    }

    Ok(Json(to_detail_response(document, Vec::new())))
}

pub async fn list_documents(
    State(state): State<AppState>,
) -> AppResult<Json<Vec<DocumentResponse>>> {
    let mut conn = state.db()?;

    let docs: Vec<Document> = documents::table
        .order((documents::uploaded_at.desc(), documents::id.desc()))
        .load(&mut conn)?;

    let doc_ids: Vec<i32> = docs.iter().map(|doc| doc.id).collect();
    let mut tags_map = load_tags_for_documents(&mut conn, &doc_ids)?;

    let response = docs
        .into_iter()
        .map(|doc| {
            let tags = tags_map.remove(&doc.id).unwrap_or_default();
            to_document_response(doc, tags)
        })
        .collect();

    Ok(Json(response))
}

pub async fn get_document(
    State(state): State<AppState>,
    Path(document_id): Path<i32>,
) -> AppResult<Json<DocumentDetailResponse>> {
    let mut conn = state.db()?;

    let document: Option<Document> = documents::table
        .find(document_id)
        .first(&mut conn)
        .optional()?;
    let Some(document) = document else {
        return Err(AppError::not_found("Document not found"));
    };

    let mut tags_map = load_tags_for_documents(&mut conn, &[document_id])?;
    let tags = tags_map.remove(&document_id).unwrap_or_default();

    Ok(Json(to_detail_response(document, tags)))
}

pub async fn delete_document(
    State(state): State<AppState>,
    Path(document_id): Path<i32>,
) -> AppResult<Json<Value>> {
    let document: Document = {
        let mut conn = state.db()?;
        let document: Option<Document> = documents::table
            .find(document_id)
            .first(&mut conn)
            .optional()?;
        let Some(document) = document else {
            return Err(AppError::not_found("Document not found"));
        };

        // Cascades take the analysis, its topics and the tag rows with it.
        diesel::delete(documents::table.find(document_id)).execute(&mut conn)?;
        document
    };

    // Best effort only; a missing or locked file never blocks the delete.
    if let Err(err) = state.files.remove(&document.storage_path).await {
        warn!(
            document_id,
            error = %err,
            "failed to delete stored file"
        );
    }

    info!(document_id, "document deleted");

    Ok(Json(json!({ "message": "Document deleted successfully" })))
}

pub async fn update_document_tags(
    State(state): State<AppState>,
    Path(document_id): Path<i32>,
    Json(tags): Json<Vec<String>>,
) -> AppResult<Json<Value>> {
    let mut conn = state.db()?;

    let exists: Option<i32> = documents::table
        .find(document_id)
        .select(documents::id)
        .first(&mut conn)
        .optional()?;
    if exists.is_none() {
        return Err(AppError::not_found("Document not found"));
    }

    let mut cleaned: Vec<String> = Vec::new();
    for tag in &tags {
        let tag = tag.trim();
        if !tag.is_empty() && !cleaned.iter().any(|existing| existing == tag) {
            cleaned.push(tag.to_string());
        }
    }

    conn.transaction(|conn| {
        diesel::delete(document_tags::table.filter(document_tags::document_id.eq(document_id)))
            .execute(conn)?;

        let rows: Vec<NewDocumentTag> = cleaned
            .iter()
            .map(|tag| NewDocumentTag {
                document_id,
                tag: tag.clone(),
            })
            .collect();
        diesel::insert_into(document_tags::table)
            .values(&rows)
            .execute(conn)?;

        Ok::<_, diesel::result::Error>(())
    })?;

    Ok(Json(json!({ "message": "Tags updated successfully" })))
}

pub async fn search_documents(
    State(state): State<AppState>,
    Query(params): Query<SearchQuery>,
) -> AppResult<Json<Vec<DocumentResponse>>> {
    let mut conn = state.db()?;

    // SQLite LIKE is case-insensitive for ASCII, matching the original
    // ilike/lower() search semantics.
    let pattern = format!("%{}%", params.query);

    let tag_matches: Vec<i32> = document_tags::table
        .filter(document_tags::tag.like(&pattern))
        .select(document_tags::document_id)
        .distinct()
        .load(&mut conn)?;

    let docs: Vec<Document> = documents::table
        .filter(
            documents::content
                .like(&pattern)
                .or(documents::id.eq_any(tag_matches)),
        )
        .order((documents::uploaded_at.desc(), documents::id.desc()))
        .load(&mut conn)?;

    let doc_ids: Vec<i32> = docs.iter().map(|doc| doc.id).collect();
    let mut tags_map = load_tags_for_documents(&mut conn, &doc_ids)?;

    let response = docs
        .into_iter()
        .map(|doc| {
            let tags = tags_map.remove(&doc.id).unwrap_or_default();
            to_document_response(doc, tags)
        })
        .collect();

    Ok(Json(response))
}

async fn discard_stored_file(state: &AppState, path: &FsPath) {
    if let Err(err) = state.files.remove(&path.to_string_lossy()).await {
        warn!(path = %path.display(), error = %err, "failed to remove rejected upload");
    }
}

pub(crate) fn load_tags_for_documents(
    conn: &mut SqliteConnection,
    document_ids: &[i32],
) -> AppResult<HashMap<i32, Vec<String>>> {
    if document_ids.is_empty() {
        return Ok(HashMap::new());
    }

    let rows: Vec<(i32, String)> = document_tags::table
        .filter(document_tags::document_id.eq_any(document_ids))
        .order((document_tags::document_id.asc(), document_tags::tag.asc()))
        .select((document_tags::document_id, document_tags::tag))
        .load(conn)?;

    let mut map: HashMap<i32, Vec<String>> = HashMap::new();
    for (doc_id, tag) in rows {
        map.entry(doc_id).or_default().push(tag);
    }
    Ok(map)
}

pub(crate) fn to_document_response(document: Document, tags: Vec<String>) -> DocumentResponse {
    DocumentResponse {
        id: document.id,
        filename: document.filename,
        format: document.format,
        uploaded_at: document.uploaded_at,
        tags,
    }
}

fn to_detail_response(document: Document, tags: Vec<String>) -> DocumentDetailResponse {
    let content = document.content.clone();
    DocumentDetailResponse {
        document: to_document_response(document, tags),
        content,
    }
}
