use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum LlmError {
    #[error("model request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("model API error: {status} - {message}")]
    Api { status: u16, message: String },
    #[error("model returned an empty response")]
    Empty,
}

/// Opaque text-generation capability backing summarization, topic extraction
/// and question answering. Production uses [`ChatGateway`]; tests substitute a
/// scripted fake.
#[async_trait]
pub trait LlmGateway: Send + Sync + 'static {
    async fn summarize(&self, text: &str) -> Result<String, LlmError>;

    /// Raw model output for a topic-listing prompt. Callers coerce it into a
    /// JSON array; see the analysis module.
    async fn extract_topics(&self, text: &str) -> Result<String, LlmError>;

    async fn answer(&self, question: &str, context: &str) -> Result<String, LlmError>;
}

/// OpenAI-compatible chat completions client.
pub struct ChatGateway {
    client: Client,
    base_url: String,
    api_key: Option<String>,
    model: String,
}

impl ChatGateway {
    pub fn new(
        base_url: impl Into<String>,
        api_key: Option<String>,
        model: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .context("failed to build LLM HTTP client")?;
        Ok(Self {
            client,
            base_url: base_url.into(),
            api_key,
            model: model.into(),
        })
    }

    async fn complete(&self, prompt: &str) -> Result<String, LlmError> {
        let body = ChatRequest {
            model: &self.model,
            messages: vec![ChatRequestMessage {
                role: "user",
                content: prompt,
            }],
            temperature: 0.1,
        };

        let mut request = self
            .client
            .post(format!("{}/chat/completions", self.base_url))
            .json(&body);

        if let Some(api_key) = self.api_key.as_deref().filter(|key| !key.is_empty()) {
            request = request.header("Authorization", format!("Bearer {api_key}"));
        }

        let response = request.send().await?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let message = response.text().await.unwrap_or_default();
            return Err(LlmError::Api { status, message });
        }

        let data: ChatResponse = response.json().await?;
        let content = data
            .choices
            .into_iter()
            .next()
            .map(|choice| choice.message.content)
            .unwrap_or_default();

        if content.trim().is_empty() {
            return Err(LlmError::Empty);
        }

        Ok(content)
    }
}

#[async_trait]
impl LlmGateway for ChatGateway {
    async fn summarize(&self, text: &str) -> Result<String, LlmError> {
        let prompt =
            format!("Write a concise summary of the following text.\n\n{text}\n\nSummary:");
        self.complete(&prompt).await
    }

    async fn extract_topics(&self, text: &str) -> Result<String, LlmError> {
        let prompt = format!(
            "Based on the following document, identify and list the 5-7 most important \
             topics or key points. Format the output as a JSON array of strings.\n\n\
             Document: {text}\n\nKey Topics:"
        );
        self.complete(&prompt).await
    }

    async fn answer(&self, question: &str, context: &str) -> Result<String, LlmError> {
        let prompt = format!(
            "Answer the question using only the provided document content.\n\n\
             Document content:\n{context}\n\nQuestion: {question}\n\nAnswer:"
        );
        self.complete(&prompt).await
    }
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatRequestMessage<'a>>,
    temperature: f32,
}

#[derive(Serialize)]
struct ChatRequestMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatResponseMessage,
}

#[derive(Deserialize)]
struct ChatResponseMessage {
    content: String,
}
