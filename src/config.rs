use std::env;
use std::path::PathBuf;

use anyhow::{Context, Result};

use crate::db::DEFAULT_MAX_POOL_SIZE;

pub const DEFAULT_MAX_UPLOAD_SIZE: usize = 10 * 1024 * 1024;
pub const DEFAULT_JOB_QUEUE_DEPTH: usize = 64;
pub const DEFAULT_LLM_TIMEOUT_SECS: u64 = 60;

#[derive(Clone, Debug)]
pub struct AppConfig {
    pub database_url: String,
    pub database_max_pool_size: u32,
    pub server_host: String,
    pub server_port: u16,
    pub upload_dir: PathBuf,
    pub max_upload_size: usize,
    pub job_queue_depth: usize,
    pub llm_base_url: String,
    pub llm_api_key: Option<String>,
    pub llm_model: String,
    pub llm_timeout_secs: u64,
}

impl AppConfig {
    pub fn from_env() -> Result<Self> {
        let database_url = env::var("DATABASE_URL").context("DATABASE_URL must be set")?;
        let database_max_pool_size = env::var("DATABASE_MAX_POOL_SIZE")
            .ok()
            .and_then(|value| value.parse().ok())
            .unwrap_or(DEFAULT_MAX_POOL_SIZE);
        let server_host = env::var("SERVER_HOST").unwrap_or_else(|_| "127.0.0.1".to_string());
        let server_port = env::var("SERVER_PORT")
            .unwrap_or_else(|_| "8000".to_string())
            .parse()
            .context("SERVER_PORT must be a valid u16")?;
        let upload_dir = env::var("UPLOAD_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("./uploads"));
        let max_upload_size = env::var("MAX_UPLOAD_SIZE")
            .ok()
            .and_then(|value| value.parse().ok())
            .unwrap_or(DEFAULT_MAX_UPLOAD_SIZE);
        let job_queue_depth = env::var("JOB_QUEUE_DEPTH")
            .ok()
            .and_then(|value| value.parse().ok())
            .unwrap_or(DEFAULT_JOB_QUEUE_DEPTH);
        let llm_base_url = env::var("LLM_BASE_URL")
            .unwrap_or_else(|_| "https://api.openai.com/v1".to_string());
        let llm_api_key = env::var("LLM_API_KEY").ok();
        let llm_model = env::var("LLM_MODEL").unwrap_or_else(|_| "gpt-4o-mini".to_string());
        let llm_timeout_secs = env::var("LLM_TIMEOUT_SECS")
            .ok()
            .and_then(|value| value.parse().ok())
            .unwrap_or(DEFAULT_LLM_TIMEOUT_SECS);

        Ok(Self {
            database_url,
            database_max_pool_size,
            server_host,
            server_port,
            upload_dir,
            max_upload_size,
            job_queue_depth,
            llm_base_url,
            llm_api_key,
            llm_model,
            llm_timeout_secs,
        })
    }
}
