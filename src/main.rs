use std::sync::Arc;
use std::time::Duration;

use tokio::net::TcpListener;
use tokio::signal;
use tracing::info;
use tracing_subscriber::EnvFilter;

use doclens::{
    config::AppConfig,
    db, jobs,
    llm::{ChatGateway, LlmGateway},
    routes,
    state::AppState,
    storage::FileStore,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv::dotenv().ok();
    init_tracing();

    let config = AppConfig::from_env()?;
    info!(
        database_url = %config.database_url,
        upload_dir = %config.upload_dir.display(),
        llm_base_url = %config.llm_base_url,
        llm_model = %config.llm_model,
        "loaded configuration"
    );

    let pool = db::init_pool_with_size(&config.database_url, config.database_max_pool_size)?;
    db::run_migrations(&pool)?;

    let files = FileStore::new(&config.upload_dir);
    files.ensure_root().await?;

    let llm: Arc<dyn LlmGateway> = Arc::new(ChatGateway::new(
        config.llm_base_url.clone(),
        config.llm_api_key.clone(),
        config.llm_model.clone(),
        Duration::from_secs(config.llm_timeout_secs),
    )?);

    let (queue, runner) = jobs::analysis_queue(config.job_queue_depth, pool.clone(), llm.clone());
    let worker = tokio::spawn(runner.run());

    let addr = format!("{}:{}", config.server_host, config.server_port);
    let state = AppState::new(pool, config, llm, files, queue);
    let router = routes::create_router(state.clone());

    let listener = TcpListener::bind(&addr).await?;
    info!(%addr, "listening");

    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    // Dropping the last queue sender lets the worker drain and stop.
    drop(state);
    worker.await?;

    Ok(())
}

async fn shutdown_signal() {
    if signal::ctrl_c().await.is_ok() {
        info!("received shutdown signal");
    }
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .compact()
        .init();
}
