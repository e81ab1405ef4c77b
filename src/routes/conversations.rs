use axum::extract::{Json, Path, State};
use chrono::{NaiveDateTime, Utc};
use diesel::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::error;

use crate::analysis::RESPONSE_FAILED_PREFIX;
use crate::error::{AppError, AppResult};
use crate::models::{
    Conversation, Document, Message, NewConversation, NewMessage, AUTHOR_ASSISTANT, AUTHOR_USER,
};
use crate::schema::{conversations, documents, messages};
use crate::state::AppState;

#[derive(Serialize)]
pub struct MessageResponse {
    pub id: i32,
    pub conversation_id: Option<i32>,
    pub content: String,
    pub author: String,
    pub created_at: NaiveDateTime,
}

#[derive(Serialize)]
pub struct ConversationResponse {
    pub id: i32,
    pub document_id: Option<i32>,
    pub created_at: NaiveDateTime,
    pub messages: Vec<MessageResponse>,
}

#[derive(Deserialize)]
pub struct CreateMessageRequest {
    pub content: String,
}

pub async fn create_conversation(
    State(state): State<AppState>,
    Path(document_id): Path<i32>,
) -> AppResult<Json<ConversationResponse>> {
    let mut conn = state.db()?;

    let exists: Option<i32> = documents::table
        .find(document_id)
        .select(documents::id)
        .first(&mut conn)
        .optional()?;
    if exists.is_none() {
        return Err(AppError::not_found("Document not found"));
    }

    let conversation: Conversation = diesel::insert_into(conversations::table)
        .values(&NewConversation {
            document_id: Some(document_id),
            created_at: Utc::now().naive_utc(),
        })
        .get_result(&mut conn)?;

    Ok(Json(to_conversation_response(conversation, Vec::new())))
}

pub async fn post_message(
    State(state): State<AppState>,
    Path(conversation_id): Path<i32>,
    Json(payload): Json<CreateMessageRequest>,
) -> AppResult<Json<MessageResponse>> {
    if payload.content.trim().is_empty() {
        return Err(AppError::bad_request("content must not be empty"));
    }

    let document: Document = {
        let mut conn = state.db()?;

        let conversation: Option<Conversation> = conversations::table
            .find(conversation_id)
            .first(&mut conn)
            .optional()?;
        let Some(conversation) = conversation else {
            return Err(AppError::not_found("Conversation not found"));
        };

        let document_id = conversation
            .document_id
            .ok_or_else(|| AppError::not_found("Document not found"))?;
        let document: Option<Document> = documents::table
            .find(document_id)
            .first(&mut conn)
            .optional()?;
        let Some(document) = document else {
            return Err(AppError::not_found("Document not found"));
        };

        // The user turn is committed before any model call.
        diesel::insert_into(messages::table)
            .values(&NewMessage {
                conversation_id: Some(conversation_id),
                content: payload.content.clone(),
                author: AUTHOR_USER.to_string(),
                created_at: Utc::now().naive_utc(),
            })
            .execute(&mut conn)?;

        document
    };

    // Failures become the paired assistant message; a user turn is never
    // left hanging.
    let content = match state.llm.answer(&payload.content, &document.content).await {
        Ok(answer) => answer,
        Err(err) => {
            error!(
                conversation_id,
                error = %err,
                "failed to generate assistant response"
            );
            format!("{RESPONSE_FAILED_PREFIX}{err}")
        }
    };

    let assistant: Message = {
        let mut conn = state.db()?;
        diesel::insert_into(messages::table)
            .values(&NewMessage {
                conversation_id: Some(conversation_id),
                content,
                author: AUTHOR_ASSISTANT.to_string(),
                created_at: Utc::now().naive_utc(),
            })
            .get_result(&mut conn)?
    };

    Ok(Json(to_message_response(assistant)))
}

pub async fn get_conversation(
    State(state): State<AppState>,
    Path(conversation_id): Path<i32>,
) -> AppResult<Json<ConversationResponse>> {
    let mut conn = state.db()?;

    let conversation: Option<Conversation> = conversations::table
        .find(conversation_id)
        .first(&mut conn)
        .optional()?;
    let Some(conversation) = conversation else {
        return Err(AppError::not_found("Conversation not found"));
    };

    let thread: Vec<Message> = messages::table
        .filter(messages::conversation_id.eq(conversation_id))
        .order(messages::id.asc())
        .load(&mut conn)?;

    let messages = thread.into_iter().map(to_message_response).collect();

    Ok(Json(to_conversation_response(conversation, messages)))
}

pub(crate) fn to_message_response(message: Message) -> MessageResponse {
    MessageResponse {
        id: message.id,
        conversation_id: message.conversation_id,
        content: message.content,
        author: message.author,
        created_at: message.created_at,
    }
}

fn to_conversation_response(
    conversation: Conversation,
    messages: Vec<MessageResponse>,
) -> ConversationResponse {
    ConversationResponse {
        id: conversation.id,
        document_id: conversation.document_id,
        created_at: conversation.created_at,
        messages,
    }
}
