//! HTTP surface: the vendor webhook plus the meeting/speaker query API.

pub mod api;
pub mod webhook;

use crate::service::AppService;
use axum::routing::{get, post};
use axum::Router;
use std::sync::Arc;
use tower_http::cors::CorsLayer;

/// Builds the service router
pub fn build_router(service: Arc<AppService>) -> Router {
    Router::new()
        .route("/webhook", post(webhook::handle_webhook))
        .route("/health", get(api::health))
        .route("/api/meeting/:meeting_id/speakers", get(api::meeting_speakers))
        .route("/api/speaker/:speaker_id/context", get(api::speaker_context))
        .route("/api/chat/:speaker_id", post(api::speaker_chat))
        .route("/api/semantic-search", post(api::semantic_search))
        .route("/api/chunks/:meeting_id", get(api::meeting_chunks))
        .layer(CorsLayer::permissive())
        .with_state(service)
}
