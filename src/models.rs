use chrono::NaiveDateTime;
use diesel::prelude::*;

use crate::schema::*;

pub const AUTHOR_USER: &str = "user";
pub const AUTHOR_ASSISTANT: &str = "assistant";

#[derive(Debug, Clone, Queryable, Identifiable)]
#[diesel(table_name = documents)]
pub struct Document {
    pub id: i32,
    pub filename: String,
    pub storage_path: String,
    pub format: String,
    pub content: String,
    pub uploaded_at: NaiveDateTime,
}

#[derive(Debug, Insertable)]
#[diesel(table_name = documents)]
pub struct NewDocument {
    pub filename: String,
    pub storage_path: String,
    pub format: String,
    pub content: String,
    pub uploaded_at: NaiveDateTime,
}

#[allow(dead_code)]
#[derive(Debug, Clone, Queryable, Associations)]
#[diesel(table_name = document_tags)]
#[diesel(belongs_to(Document))]
#[diesel(primary_key(document_id, tag))]
pub struct DocumentTag {
    pub document_id: i32,
    pub tag: String,
}

#[derive(Debug, Insertable)]
#[diesel(table_name = document_tags)]
pub struct NewDocumentTag {
    pub document_id: i32,
    pub tag: String,
}

#[derive(Debug, Clone, Queryable, Identifiable, Associations)]
#[diesel(table_name = analyses)]
#[diesel(belongs_to(Document))]
pub struct Analysis {
    pub id: i32,
    pub document_id: i32,
    pub summary: String,
    pub created_at: NaiveDateTime,
}

#[derive(Debug, Insertable)]
#[diesel(table_name = analyses)]
pub struct NewAnalysis {
    pub document_id: i32,
    pub summary: String,
    pub created_at: NaiveDateTime,
}

#[allow(dead_code)]
#[derive(Debug, Clone, Queryable, Associations)]
#[diesel(table_name = analysis_topics)]
#[diesel(belongs_to(Analysis))]
#[diesel(primary_key(analysis_id, position))]
pub struct AnalysisTopic {
    pub analysis_id: i32,
    pub position: i32,
    pub topic: String,
}

#[derive(Debug, Insertable)]
#[diesel(table_name = analysis_topics)]
pub struct NewAnalysisTopic {
    pub analysis_id: i32,
    pub position: i32,
    pub topic: String,
}

#[derive(Debug, Clone, Queryable, Identifiable)]
#[diesel(table_name = conversations)]
pub struct Conversation {
    pub id: i32,
    pub document_id: Option<i32>,
    pub created_at: NaiveDateTime,
}

#[derive(Debug, Insertable)]
#[diesel(table_name = conversations)]
pub struct NewConversation {
    pub document_id: Option<i32>,
    pub created_at: NaiveDateTime,
}

#[derive(Debug, Clone, Queryable, Identifiable, Associations)]
#[diesel(table_name = messages)]
#[diesel(belongs_to(Conversation))]
pub struct Message {
    pub id: i32,
    pub conversation_id: Option<i32>,
    pub content: String,
    pub author: String,
    pub created_at: NaiveDateTime,
}

#[derive(Debug, Insertable)]
#[diesel(table_name = messages)]
pub struct NewMessage {
    pub conversation_id: Option<i32>,
    pub content: String,
    pub author: String,
    pub created_at: NaiveDateTime,
}
