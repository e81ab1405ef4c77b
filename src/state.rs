use std::sync::Arc;

use diesel::{
    r2d2::{ConnectionManager, PooledConnection},
    sqlite::SqliteConnection,
};

use crate::{
    config::AppConfig,
    db::DbPool,
    error::{AppError, AppResult},
    jobs::JobQueue,
    llm::LlmGateway,
    storage::FileStore,
};

pub type PooledDbConnection = PooledConnection<ConnectionManager<SqliteConnection>>;

#[derive(Clone)]
pub struct AppState {
    pub pool: DbPool,
    pub config: Arc<AppConfig>,
    pub llm: Arc<dyn LlmGateway>,
    pub files: FileStore,
    pub jobs: JobQueue,
}

impl AppState {
    pub fn new(
        pool: DbPool,
        config: AppConfig,
        llm: Arc<dyn LlmGateway>,
        files: FileStore,
        jobs: JobQueue,
    ) -> Self {
        Self {
            pool,
            config: Arc::new(config),
            llm,
            files,
            jobs,
        }
    }

    pub fn db(&self) -> AppResult<PooledDbConnection> {
        self.pool
            .get()
            .map_err(|err| AppError::internal(format!("database pool error: {err}")))
    }
}
