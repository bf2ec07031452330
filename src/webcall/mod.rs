use crate::{provision::ApplicationCache, secrets::Secrets};
use axum::{
    http::StatusCode,
    routing::{get, post},
    Extension, Json, Router,
};
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};

mod token;
mod voice;

/// Builds the webserver. None of the routes authenticate their callers.
pub fn app(secrets: Secrets, applications: Arc<ApplicationCache>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any)
        .allow_credentials(false);

    Router::new()
        .route("/", get(health_check))
        .route("/token", post(token::generate_token))
        .route("/voice", post(voice::voice_handler))
        .fallback(not_found)
        .layer(cors)
        .layer(Extension(secrets))
        .layer(Extension(applications))
}

async fn health_check() -> &'static str {
    "Token server is running"
}

async fn not_found() -> (StatusCode, Json<serde_json::Value>) {
    (
        StatusCode::NOT_FOUND,
        Json(serde_json::json!({ "error": "Not found" })),
    )
}
