pub mod classifier;
pub mod config;
pub mod db;
pub mod decision;
pub mod download;
pub mod error;
pub mod models;
pub mod worker;

use std::any::Any;

use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use serde_json::{Value, json};
use tower_http::catch_panic::CatchPanicLayer;
use tower_http::trace::TraceLayer;

use crate::error::AppError;

/// Liveness router. It shares no state with the worker.
pub fn build_app() -> Router {
    Router::new()
        .route("/status", get(status))
        .fallback(not_found)
        .layer(CatchPanicLayer::custom(panic_response))
        .layer(TraceLayer::new_for_http())
}

async fn status() -> Json<Value> {
    Json(json!({ "status": "running" }))
}

async fn not_found() -> AppError {
    AppError::NotFound("Not found".to_string())
}

fn panic_response(err: Box<dyn Any + Send + 'static>) -> Response {
    let message = if let Some(s) = err.downcast_ref::<String>() {
        s.clone()
    } else if let Some(s) = err.downcast_ref::<&str>() {
        s.to_string()
    } else {
        "Unknown panic".to_string()
    };

    AppError::Internal(message).into_response()
}
