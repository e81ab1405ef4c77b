#![allow(dead_code)]

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use axum::body::Body;
use axum::http::{Method, Request};
use axum::Router;
use doclens::config::AppConfig;
use doclens::db;
use doclens::jobs::{self, JobRunner};
use doclens::llm::{LlmError, LlmGateway};
use doclens::routes;
use doclens::state::AppState;
use doclens::storage::FileStore;
use http_body_util::BodyExt;
use serde::Serialize;
use tempfile::TempDir;
use tower::util::ServiceExt;
use uuid::Uuid;

pub const FAKE_SUMMARY: &str = "A concise summary of the document.";
pub const FAKE_TOPICS_JSON: &str = r#"["budget", "forecast"]"#;
pub const FAKE_ANSWER: &str = "The revenue grew in the fourth quarter.";

/// Scripted gateway standing in for the model API. Flip `fail` to make every
/// call error; captured prompts let tests assert on the composed context.
#[derive(Default)]
pub struct FakeLlm {
    pub fail: AtomicBool,
    pub answer_calls: AtomicUsize,
    pub last_context: Mutex<String>,
    pub topics_output: Mutex<Option<String>>,
}

impl FakeLlm {
    pub fn set_fail(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }

    pub fn set_topics_output(&self, raw: &str) {
        *self.topics_output.lock().unwrap() = Some(raw.to_string());
    }

    fn check_fail(&self) -> Result<(), LlmError> {
        if self.fail.load(Ordering::SeqCst) {
            Err(LlmError::Api {
                status: 503,
                message: "model unavailable".to_string(),
            })
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl LlmGateway for FakeLlm {
    async fn summarize(&self, _text: &str) -> Result<String, LlmError> {
        self.check_fail()?;
        Ok(FAKE_SUMMARY.to_string())
    }

    async fn extract_topics(&self, _text: &str) -> Result<String, LlmError> {
        self.check_fail()?;
        let scripted = self.topics_output.lock().unwrap().clone();
        Ok(scripted.unwrap_or_else(|| FAKE_TOPICS_JSON.to_string()))
    }

    async fn answer(&self, _question: &str, context: &str) -> Result<String, LlmError> {
        self.answer_calls.fetch_add(1, Ordering::SeqCst);
        *self.last_context.lock().unwrap() = context.to_string();
        self.check_fail()?;
        Ok(FAKE_ANSWER.to_string())
    }
}

pub struct TestApp {
    pub state: AppState,
    pub llm: Arc<FakeLlm>,
    router: Router,
    runner: JobRunner,
    _upload_dir: TempDir,
    _db_dir: TempDir,
}

impl TestApp {
    pub async fn new() -> Result<Self> {
        let db_dir = TempDir::new()?;
        let upload_dir = TempDir::new()?;

        let config = AppConfig {
            database_url: db_dir
                .path()
                .join("doclens-test.db")
                .to_string_lossy()
                .into_owned(),
            database_max_pool_size: db::DEFAULT_MAX_POOL_SIZE,
            server_host: "127.0.0.1".to_string(),
            server_port: 0,
            upload_dir: upload_dir.path().to_path_buf(),
            max_upload_size: 1024 * 1024,
            job_queue_depth: 16,
            llm_base_url: "http://127.0.0.1:0".to_string(),
            llm_api_key: None,
            llm_model: "test-model".to_string(),
            llm_timeout_secs: 5,
        };

        let pool = db::init_pool_with_size(&config.database_url, config.database_max_pool_size)?;
        db::run_migrations(&pool)?;

        let files = FileStore::new(&config.upload_dir);
        files.ensure_root().await?;

        let llm = Arc::new(FakeLlm::default());
        let gateway: Arc<dyn LlmGateway> = llm.clone();
        let (queue, runner) =
            jobs::analysis_queue(config.job_queue_depth, pool.clone(), gateway.clone());

        let state = AppState::new(pool, config, gateway, files, queue);
        let router = routes::create_router(state.clone());

        Ok(Self {
            state,
            llm,
            router,
            runner,
            _upload_dir: upload_dir,
            _db_dir: db_dir,
        })
    }

    /// Run queued analysis jobs until the queue is empty.
    pub async fn drain_jobs(&mut self) {
        while self.runner.tick().await {}
    }

    pub fn upload_dir_file_count(&self) -> Result<usize> {
        let entries = std::fs::read_dir(self.state.files.root())?;
        Ok(entries.count())
    }

    pub async fn get(&self, path: &str) -> Result<hyper::Response<Body>> {
        let request = Request::builder()
            .method(Method::GET)
            .uri(path)
            .body(Body::empty())?;
        Ok(self
            .router
            .clone()
            .oneshot(request)
            .await
            .expect("infallible response"))
    }

    pub async fn delete(&self, path: &str) -> Result<hyper::Response<Body>> {
        let request = Request::builder()
            .method(Method::DELETE)
            .uri(path)
            .body(Body::empty())?;
        Ok(self
            .router
            .clone()
            .oneshot(request)
            .await
            .expect("infallible response"))
    }

    pub async fn post_json<T: Serialize + ?Sized>(
        &self,
        path: &str,
        payload: &T,
    ) -> Result<hyper::Response<Body>> {
        self.send_json(Method::POST, path, payload).await
    }

    pub async fn put_json<T: Serialize + ?Sized>(
        &self,
        path: &str,
        payload: &T,
    ) -> Result<hyper::Response<Body>> {
        self.send_json(Method::PUT, path, payload).await
    }

    async fn send_json<T: Serialize + ?Sized>(
        &self,
        method: Method,
        path: &str,
        payload: &T,
    ) -> Result<hyper::Response<Body>> {
        let body = serde_json::to_vec(payload)?;
        let request = Request::builder()
            .method(method)
            .uri(path)
            .header("content-type", "application/json")
            .body(Body::from(body))?;
        Ok(self
            .router
            .clone()
            .oneshot(request)
            .await
            .expect("infallible response"))
    }

    pub async fn upload_document(
        &self,
        filename: &str,
        content_type: &str,
        data: &[u8],
    ) -> Result<hyper::Response<Body>> {
        let boundary = format!("boundary-{}", Uuid::new_v4());
        let mut body = Vec::new();
        body.extend(format!("--{boundary}\r\n").as_bytes());
        body.extend(
            format!(
                "Content-Disposition: form-data; name=\"file\"; filename=\"{}\"\r\n",
                filename
            )
            .as_bytes(),
        );
        body.extend(format!("Content-Type: {}\r\n\r\n", content_type).as_bytes());
        body.extend(data);
        body.extend(b"\r\n");
        body.extend(format!("--{boundary}--\r\n").as_bytes());

        let request = Request::builder()
            .method(Method::POST)
            .uri("/api/documents")
            .header(
                "content-type",
                format!("multipart/form-data; boundary={boundary}"),
            )
            .body(Body::from(body))?;
        Ok(self
            .router
            .clone()
            .oneshot(request)
            .await
            .expect("infallible response"))
    }
}

pub async fn body_to_vec(body: Body) -> Result<Vec<u8>> {
    let collected = body
        .collect()
        .await
        .map_err(|err| anyhow!("failed to read response body: {err}"))?;
    Ok(collected.to_bytes().to_vec())
}
