use diesel::prelude::*;
use tracing::{error, info, warn};

use crate::db::DbPool;
use crate::jobs::AnalysisJob;
use crate::llm::{LlmError, LlmGateway};
use crate::models::{Analysis, Document, NewAnalysisTopic};
use crate::schema::{analyses, analysis_topics, documents};

/// Sentinel summary written when the placeholder analysis row is created.
pub const ANALYSIS_IN_PROGRESS: &str = "Analysis in progress...";
/// Prefix of the terminal summary written when the gateway call fails.
pub const ANALYSIS_FAILED_PREFIX: &str = "Analysis failed: ";
/// Prefix of the assistant message persisted when answering fails.
pub const RESPONSE_FAILED_PREFIX: &str = "Error generating response: ";
/// Single fallback topic written when the model output cannot be parsed.
pub const TOPIC_FALLBACK: &str = "Topic extraction failed";

pub const CHUNK_SIZE: usize = 2000;
pub const CHUNK_OVERLAP: usize = 200;
/// Topic extraction only sees the opening portion of the document; a
/// deliberate cost/quality tradeoff, not a bug.
pub const TOPIC_PREFIX_CHARS: usize = 5000;

pub const DOCUMENT_SEPARATOR: &str = "\n\n---\n\n";

#[derive(Debug)]
pub struct AnalysisOutcome {
    pub summary: String,
    pub key_topics: Vec<String>,
}

/// Split text into overlapping character windows to respect model context
/// limits.
pub fn chunk_text(text: &str, chunk_size: usize, overlap: usize) -> Vec<String> {
    let text = text.trim();
    if text.is_empty() {
        return vec![];
    }
    if text.chars().count() <= chunk_size {
        return vec![text.to_string()];
    }

    let mut chunks = Vec::new();
    let chars: Vec<char> = text.chars().collect();
    let mut start = 0;

    while start < chars.len() {
        let end = (start + chunk_size).min(chars.len());
        let chunk: String = chars[start..end].iter().collect();
        let chunk = chunk.trim().to_string();
        if !chunk.is_empty() {
            chunks.push(chunk);
        }
        if end >= chars.len() {
            break;
        }
        start += chunk_size - overlap;
    }

    chunks
}

fn truncate_chars(text: &str, max_chars: usize) -> &str {
    match text.char_indices().nth(max_chars) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}

/// Coerce raw model output into a topic list by trimming to the outermost
/// JSON array brackets; falls back to a single sentinel topic when parsing
/// still fails. Preserved lossy for compatibility with stored topic lists.
pub fn coerce_topics(raw: &str) -> Vec<String> {
    let trimmed = raw.trim();
    let candidate = match (trimmed.find('['), trimmed.rfind(']')) {
        (Some(start), Some(end)) if start < end => &trimmed[start..=end],
        _ => trimmed,
    };

    serde_json::from_str::<Vec<String>>(candidate)
        .unwrap_or_else(|_| vec![TOPIC_FALLBACK.to_string()])
}

/// Map-reduce summarization: summarize each chunk, then summarize the joined
/// chunk summaries. A single chunk skips the reduce step.
pub async fn summarize_text(llm: &dyn LlmGateway, text: &str) -> Result<String, LlmError> {
    let chunks = chunk_text(text, CHUNK_SIZE, CHUNK_OVERLAP);
    match chunks.as_slice() {
        [] => llm.summarize(text).await,
        [only] => llm.summarize(only).await,
        chunks => {
            let mut partials = Vec::with_capacity(chunks.len());
            for chunk in chunks {
                partials.push(llm.summarize(chunk).await?);
            }
            llm.summarize(&partials.join("\n\n")).await
        }
    }
}

pub async fn analyze_text(
    llm: &dyn LlmGateway,
    text: &str,
) -> Result<AnalysisOutcome, LlmError> {
    let summary = summarize_text(llm, text).await?;
    let raw_topics = llm
        .extract_topics(truncate_chars(text, TOPIC_PREFIX_CHARS))
        .await?;

    Ok(AnalysisOutcome {
        summary,
        key_topics: coerce_topics(&raw_topics),
    })
}

/// Label and concatenate documents for cross-document prompts.
pub fn combine_documents(documents: &[Document]) -> String {
    documents
        .iter()
        .map(|doc| format!("Document: {}\n{}", doc.filename, doc.content))
        .collect::<Vec<_>>()
        .join(DOCUMENT_SEPARATOR)
}

/// Background completion of a placeholder analysis. Gateway failures become
/// the terminal Failed summary; they are never surfaced to the worker loop.
pub async fn run_analysis(
    pool: &DbPool,
    llm: &dyn LlmGateway,
    job: &AnalysisJob,
) -> Result<(), String> {
    let (analysis, document) = {
        let mut conn = pool
            .get()
            .map_err(|err| format!("database pool error: {err}"))?;

        let analysis: Option<Analysis> = analyses::table
            .find(job.analysis_id)
            .first(&mut conn)
            .optional()
            .map_err(|err| err.to_string())?;
        let Some(analysis) = analysis else {
            warn!(
                analysis_id = job.analysis_id,
                "analysis row no longer exists, skipping"
            );
            return Ok(());
        };

        let document: Option<Document> = documents::table
            .find(analysis.document_id)
            .first(&mut conn)
            .optional()
            .map_err(|err| err.to_string())?;
        let Some(document) = document else {
            warn!(
                analysis_id = analysis.id,
                document_id = analysis.document_id,
                "document no longer exists, skipping analysis"
            );
            return Ok(());
        };

        (analysis, document)
    };

    match analyze_text(llm, &document.content).await {
        Ok(outcome) => {
            let mut conn = pool
                .get()
                .map_err(|err| format!("database pool error: {err}"))?;
            conn.transaction(|conn| {
                diesel::update(analyses::table.find(analysis.id))
                    .set(analyses::summary.eq(&outcome.summary))
                    .execute(conn)?;

                diesel::delete(
                    analysis_topics::table
                        .filter(analysis_topics::analysis_id.eq(analysis.id)),
                )
                .execute(conn)?;

                let topic_rows: Vec<NewAnalysisTopic> = outcome
                    .key_topics
                    .iter()
                    .enumerate()
                    .map(|(position, topic)| NewAnalysisTopic {
                        analysis_id: analysis.id,
                        position: position as i32,
                        topic: topic.clone(),
                    })
                    .collect();
                diesel::insert_into(analysis_topics::table)
                    .values(&topic_rows)
                    .execute(conn)?;

                Ok::<_, diesel::result::Error>(())
            })
            .map_err(|err| err.to_string())?;

            info!(
                analysis_id = analysis.id,
                document_id = document.id,
                "analysis completed"
            );
            Ok(())
        }
        Err(err) => {
            error!(
                analysis_id = analysis.id,
                document_id = document.id,
                error = %err,
                "analysis failed"
            );
            let mut conn = pool
                .get()
                .map_err(|err| format!("database pool error: {err}"))?;
            diesel::update(analyses::table.find(analysis.id))
                .set(analyses::summary.eq(format!("{ANALYSIS_FAILED_PREFIX}{err}")))
                .execute(&mut conn)
                .map_err(|err| err.to_string())?;
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use async_trait::async_trait;

    use super::*;

    struct CountingLlm {
        summarize_calls: AtomicUsize,
    }

    impl CountingLlm {
        fn new() -> Self {
            Self {
                summarize_calls: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl LlmGateway for CountingLlm {
        async fn summarize(&self, text: &str) -> Result<String, LlmError> {
            let call = self.summarize_calls.fetch_add(1, Ordering::SeqCst);
            Ok(format!("summary-{call}-of-{}-chars", text.chars().count()))
        }

        async fn extract_topics(&self, _text: &str) -> Result<String, LlmError> {
            Ok(r#"["alpha", "beta"]"#.to_string())
        }

        async fn answer(&self, _question: &str, _context: &str) -> Result<String, LlmError> {
            Ok("answer".to_string())
        }
    }

    #[test]
    fn chunk_text_keeps_short_text_whole() {
        assert_eq!(chunk_text("Hello world", 100, 20), vec!["Hello world"]);
    }

    #[test]
    fn chunk_text_windows_overlap() {
        // 5000 chars at window 2000 / step 1800 -> starts at 0, 1800, 3600
        let text = "a".repeat(5000);
        let chunks = chunk_text(&text, CHUNK_SIZE, CHUNK_OVERLAP);
        assert_eq!(chunks.len(), 3);
        assert_eq!(chunks[0].chars().count(), CHUNK_SIZE);
        assert_eq!(chunks[1].chars().count(), CHUNK_SIZE);
        assert_eq!(chunks[2].chars().count(), 1400);
    }

    #[test]
    fn chunk_text_handles_empty_input() {
        assert!(chunk_text("   ", 100, 20).is_empty());
    }

    #[test]
    fn coerce_topics_strips_surrounding_prose() {
        let raw = "Here are the topics:\n[\"budget\", \"hiring\"]\nLet me know!";
        assert_eq!(coerce_topics(raw), vec!["budget", "hiring"]);
    }

    #[test]
    fn coerce_topics_accepts_clean_array() {
        assert_eq!(coerce_topics(r#"["one"]"#), vec!["one"]);
    }

    #[test]
    fn coerce_topics_falls_back_on_garbage() {
        assert_eq!(coerce_topics("no brackets here"), vec![TOPIC_FALLBACK]);
        assert_eq!(coerce_topics("[1, 2, 3"), vec![TOPIC_FALLBACK]);
    }

    #[tokio::test]
    async fn short_text_is_summarized_in_one_call() {
        let llm = CountingLlm::new();
        summarize_text(&llm, "short document").await.unwrap();
        assert_eq!(llm.summarize_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn long_text_is_map_reduced() {
        let llm = CountingLlm::new();
        let text = "word ".repeat(2000);
        summarize_text(&llm, &text).await.unwrap();
        let calls = llm.summarize_calls.load(Ordering::SeqCst);
        let chunk_count = chunk_text(&text, CHUNK_SIZE, CHUNK_OVERLAP).len();
        assert!(chunk_count > 1);
        assert_eq!(calls, chunk_count + 1);
    }

    #[test]
    fn combine_documents_labels_each_entry() {
        let docs = vec![
            Document {
                id: 1,
                filename: "a.txt".into(),
                storage_path: "/tmp/a".into(),
                format: "txt".into(),
                content: "alpha".into(),
                uploaded_at: chrono::Utc::now().naive_utc(),
            },
            Document {
                id: 2,
                filename: "b.txt".into(),
                storage_path: "/tmp/b".into(),
                format: "txt".into(),
                content: "beta".into(),
                uploaded_at: chrono::Utc::now().naive_utc(),
            },
        ];
        let combined = combine_documents(&docs);
        assert_eq!(
            combined,
            "Document: a.txt\nalpha\n\n---\n\nDocument: b.txt\nbeta"
        );
    }
}
