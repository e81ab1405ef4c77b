use std::collections::HashMap;

use axum::extract::{Json, Path, State};
use axum::http::header;
use axum::response::IntoResponse;
use chrono::{NaiveDateTime, Utc};
use diesel::prelude::*;
use diesel::result::DatabaseErrorKind;
use diesel::sqlite::SqliteConnection;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::error;

use crate::analysis::{combine_documents, summarize_text, ANALYSIS_IN_PROGRESS, RESPONSE_FAILED_PREFIX};
use crate::error::{AppError, AppResult};
use crate::jobs::AnalysisJob;
use crate::models::{Analysis, Document, Message, NewAnalysis, NewMessage, AUTHOR_ASSISTANT};
use crate::schema::{analyses, analysis_topics, documents, messages};
use crate::state::AppState;

use super::conversations::{to_message_response, MessageResponse};
use super::documents::{load_tags_for_documents, to_document_response, DocumentResponse};

const SUMMARY_FAILED_PREFIX: &str = "Error generating summary: ";

#[derive(Serialize)]
pub struct AnalysisResponse {
    pub id: i32,
    pub document_id: i32,
    pub summary: String,
    pub key_topics: Vec<String>,
    pub created_at: NaiveDateTime,
}

#[derive(Serialize)]
pub struct HistoryEntry {
    pub analysis: AnalysisResponse,
    pub document: DocumentResponse,
}

#[derive(Deserialize)]
pub struct MultiDocumentQaRequest {
    pub question: String,
    pub document_ids: Vec<i32>,
}

#[derive(Deserialize)]
pub struct MultiDocumentSummaryRequest {
    pub document_ids: Vec<i32>,
}

pub async fn analyze_document(
    State(state): State<AppState>,
    Path(document_id): Path<i32>,
) -> AppResult<Json<AnalysisResponse>> {
    {
        let mut conn = state.db()?;
        let exists: Option<i32> = documents::table
            .find(document_id)
            .select(documents::id)
            .first(&mut conn)
            .optional()?;
        if exists.is_none() {
            return Err(AppError::not_found("Document not found"));
        }
    }

    let (analysis, _created) = start_analysis(&state, document_id).await?;

    let topics = {
        let mut conn = state.db()?;
        load_topics(&mut conn, analysis.id)?
    };

    Ok(Json(to_analysis_response(analysis, topics)))
}

/// Return the document's analysis, creating the placeholder row and queueing
/// the background job if none exists yet. Requesting analysis for a document
/// that already has one returns the existing row unchanged; a Failed analysis
/// is never retried.
pub(crate) async fn start_analysis(
    state: &AppState,
    document_id: i32,
) -> AppResult<(Analysis, bool)> {
    let (analysis, created) = {
        let mut conn = state.db()?;
        create_placeholder(&mut conn, document_id)?
    };

    if created {
        state
            .jobs
            .enqueue(AnalysisJob {
                analysis_id: analysis.id,
                document_id,
            })
            .await
            .map_err(|err| AppError::internal(format!("failed to enqueue analysis job: {err}")))?;
    }

    Ok((analysis, created))
}

fn create_placeholder(
    conn: &mut SqliteConnection,
    document_id: i32,
) -> AppResult<(Analysis, bool)> {
    if let Some(existing) = analyses::table
        .filter(analyses::document_id.eq(document_id))
        .first::<Analysis>(conn)
        .optional()?
    {
        return Ok((existing, false));
    }

    let new_analysis = NewAnalysis {
        document_id,
        summary: ANALYSIS_IN_PROGRESS.to_string(),
        created_at: Utc::now().naive_utc(),
    };

    match diesel::insert_into(analyses::table)
        .values(&new_analysis)
        .get_result::<Analysis>(conn)
    {
        Ok(analysis) => Ok((analysis, true)),
        // Lost the single-flight race; the unique index on document_id names
        // the winner.
        Err(diesel::result::Error::DatabaseError(DatabaseErrorKind::UniqueViolation, _)) => {
            let existing = analyses::table
                .filter(analyses::document_id.eq(document_id))
                .first(conn)?;
            Ok((existing, false))
        }
        Err(err) => Err(err.into()),
    }
}

pub async fn history(State(state): State<AppState>) -> AppResult<Json<Vec<HistoryEntry>>> {
    let mut conn = state.db()?;

    // The inner join skips analyses whose document is gone instead of
    // erroring on them.
    let rows: Vec<(Analysis, Document)> = analyses::table
        .inner_join(documents::table)
        .order((analyses::created_at.desc(), analyses::id.desc()))
        .load(&mut conn)?;

    let analysis_ids: Vec<i32> = rows.iter().map(|(analysis, _)| analysis.id).collect();
    let mut topics_map = load_topics_for_analyses(&mut conn, &analysis_ids)?;

    let doc_ids: Vec<i32> = rows.iter().map(|(_, document)| document.id).collect();
    let mut tags_map = load_tags_for_documents(&mut conn, &doc_ids)?;

    let entries = rows
        .into_iter()
        .map(|(analysis, document)| {
            let topics = topics_map.remove(&analysis.id).unwrap_or_default();
            let tags = tags_map.remove(&document.id).unwrap_or_default();
            HistoryEntry {
                analysis: to_analysis_response(analysis, topics),
                document: to_document_response(document, tags),
            }
        })
        .collect();

    Ok(Json(entries))
}

pub async fn multi_document_qa(
    State(state): State<AppState>,
    Json(payload): Json<MultiDocumentQaRequest>,
) -> AppResult<Json<MessageResponse>> {
    let docs = load_documents_by_ids(&state, &payload.document_ids)?;
    if docs.is_empty() {
        return Err(AppError::not_found("No documents found"));
    }

    let context = combine_documents(&docs);
    let content = match state.llm.answer(&payload.question, &context).await {
        Ok(answer) => answer,
        Err(err) => {
            error!(error = %err, "multi-document answer failed");
            format!("{RESPONSE_FAILED_PREFIX}{err}")
        }
    };

    // Standalone answer: persisted without a conversation thread.
    let message: Message = {
        let mut conn = state.db()?;
        diesel::insert_into(messages::table)
            .values(&NewMessage {
                conversation_id: None,
                content,
                author: AUTHOR_ASSISTANT.to_string(),
                created_at: Utc::now().naive_utc(),
            })
            .get_result(&mut conn)?
    };

    Ok(Json(to_message_response(message)))
}

pub async fn multi_document_summary(
    State(state): State<AppState>,
    Json(payload): Json<MultiDocumentSummaryRequest>,
) -> AppResult<Json<Value>> {
    let docs = load_documents_by_ids(&state, &payload.document_ids)?;
    if docs.is_empty() {
        return Err(AppError::not_found("No documents found"));
    }

    let combined = combine_documents(&docs);
    let summary = match summarize_text(state.llm.as_ref(), &combined).await {
        Ok(summary) => summary,
        Err(err) => {
            error!(error = %err, "multi-document summary failed");
            format!("{SUMMARY_FAILED_PREFIX}{err}")
        }
    };

    Ok(Json(json!({ "summary": summary })))
}

pub async fn download_summary(
    State(state): State<AppState>,
    Path(document_id): Path<i32>,
) -> AppResult<impl IntoResponse> {
    let mut conn = state.db()?;

    let analysis: Option<Analysis> = analyses::table
        .filter(analyses::document_id.eq(document_id))
        .first(&mut conn)
        .optional()?;
    let Some(analysis) = analysis else {
        return Err(AppError::not_found("Analysis not found for this document"));
    };

    let document: Option<Document> = documents::table
        .find(document_id)
        .first(&mut conn)
        .optional()?;
    let Some(document) = document else {
        return Err(AppError::not_found("Document not found"));
    };

    let topics = load_topics(&mut conn, analysis.id)?;

    let mut body = analysis.summary;
    if !topics.is_empty() {
        body.push_str("\n\nKEY TOPICS:\n");
        body.push_str(
            &topics
                .iter()
                .map(|topic| format!("- {topic}"))
                .collect::<Vec<_>>()
                .join("\n"),
        );
    }

    let stem = document
        .filename
        .rsplit_once('.')
        .map(|(stem, _)| stem)
        .unwrap_or(document.filename.as_str());
    let disposition = attachment_content_disposition(&format!("{stem}_summary.txt"));

    Ok((
        [
            (header::CONTENT_TYPE, "text/plain; charset=utf-8".to_string()),
            (header::CONTENT_DISPOSITION, disposition),
        ],
        body,
    ))
}

fn attachment_content_disposition(filename: &str) -> String {
    let sanitized: String = filename
        .chars()
        .map(|ch| match ch {
            '"' | '\\' => '_',
            _ => ch,
        })
        .collect();

    let encoded =
        percent_encoding::utf8_percent_encode(&sanitized, percent_encoding::NON_ALPHANUMERIC);
    format!(
        "attachment; filename=\"{}\"; filename*=UTF-8''{}",
        sanitized, encoded
    )
}

fn load_documents_by_ids(state: &AppState, document_ids: &[i32]) -> AppResult<Vec<Document>> {
    let mut conn = state.db()?;
    let docs = documents::table
        .filter(documents::id.eq_any(document_ids))
        .order(documents::id.asc())
        .load(&mut conn)?;
    Ok(docs)
}

pub(crate) fn load_topics(
    conn: &mut SqliteConnection,
    analysis_id: i32,
) -> AppResult<Vec<String>> {
    let topics = analysis_topics::table
        .filter(analysis_topics::analysis_id.eq(analysis_id))
        .order(analysis_topics::position.asc())
        .select(analysis_topics::topic)
        .load(conn)?;
    Ok(topics)
}

fn load_topics_for_analyses(
    conn: &mut SqliteConnection,
    analysis_ids: &[i32],
) -> AppResult<HashMap<i32, Vec<String>>> {
    if analysis_ids.is_empty() {
        return Ok(HashMap::new());
    }

    let rows: Vec<(i32, String)> = analysis_topics::table
        .filter(analysis_topics::analysis_id.eq_any(analysis_ids))
        .order((
            analysis_topics::analysis_id.asc(),
            analysis_topics::position.asc(),
        ))
        .select((analysis_topics::analysis_id, analysis_topics::topic))
        .load(conn)?;

    let mut map: HashMap<i32, Vec<String>> = HashMap::new();
    for (analysis_id, topic) in rows {
        map.entry(analysis_id).or_default().push(topic);
    }
    Ok(map)
}

fn to_analysis_response(analysis: Analysis, key_topics: Vec<String>) -> AnalysisResponse {
    AnalysisResponse {
        id: analysis.id,
        document_id: analysis.document_id,
        summary: analysis.summary,
        key_topics,
        created_at: analysis.created_at,
    }
}
