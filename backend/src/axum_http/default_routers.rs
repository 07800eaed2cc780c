use axum::{http::StatusCode, response::IntoResponse};
use tracing::info;

use super::error_responses::ApiResponse;

pub async fn not_found() -> impl IntoResponse {
    info!("backend router: not_found handler invoked");
    ApiResponse::failure("NOT_FOUND").into_response_with(StatusCode::NOT_FOUND)
}

pub async fn health_check() -> impl IntoResponse {
    (StatusCode::OK, "OK").into_response()
}
