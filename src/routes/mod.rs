use axum::{
    extract::DefaultBodyLimit,
    routing::{get, post, put},
    Router,
};
use tower_http::trace::TraceLayer;

use crate::state::AppState;

pub mod analysis;
pub mod conversations;
pub mod documents;
pub mod health;

pub fn create_router(state: AppState) -> Router<()> {
    // Multipart framing adds overhead on top of the file itself, so the body
    // limit sits above max_upload_size and the handler enforces the 413.
    let body_limit = state.config.max_upload_size + 1024 * 1024;

    let documents_routes = Router::new()
        .route(
            "/",
            get(documents::list_documents).post(documents::upload_document),
        )
        .route("/search", get(documents::search_documents))
        .route(
            "/:id",
            get(documents::get_document).delete(documents::delete_document),
        )
        .route("/:id/tags", put(documents::update_document_tags))
        .route("/:id/analyze", post(analysis::analyze_document))
        .route(
            "/:id/conversations",
            post(conversations::create_conversation),
        )
        .route("/:id/summary/download", get(analysis::download_summary));

    let conversations_routes = Router::new()
        .route("/:id", get(conversations::get_conversation))
        .route("/:id/messages", post(conversations::post_message));

    Router::new()
        .nest("/api/documents", documents_routes)
        .nest("/api/conversations", conversations_routes)
        .route("/api/multi-document-qa", post(analysis::multi_document_qa))
        .route(
            "/api/multi-document-summary",
            post(analysis::multi_document_summary),
        )
        .route("/api/history", get(analysis::history))
        .route("/api/health", get(health::health_check))
        .with_state(state)
        .layer(TraceLayer::new_for_http())
        .layer(DefaultBodyLimit::max(body_limit))
}
