pub mod bookings;
pub mod seats;

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json, Router,
};
use serde_json::json;
use std::sync::Arc;
use tracing::{error, warn};

use crate::error::BookingError;
use crate::AppState;

pub fn routes() -> Router<Arc<AppState>> {
    Router::new()
        .merge(seats::routes())
        .merge(bookings::routes())
}

/// Ошибка HTTP-слоя. Тело всегда `{"error": ..., "retriable": ...}`.
#[derive(Debug)]
pub enum ApiError {
    Booking(BookingError),
    /// Запрос не удалось даже разобрать
    BadRequest(String),
}

impl From<BookingError> for ApiError {
    fn from(e: BookingError) -> Self {
        ApiError::Booking(e)
    }
}

impl ApiError {
    fn status(&self) -> StatusCode {
        match self {
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::Booking(BookingError::Validation(_)) => StatusCode::BAD_REQUEST,
            ApiError::Booking(BookingError::Conflict(_)) => StatusCode::CONFLICT,
            ApiError::Booking(BookingError::Transport(_)) => StatusCode::SERVICE_UNAVAILABLE,
            ApiError::Booking(BookingError::Invariant(_)) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let (message, retriable) = match &self {
            ApiError::BadRequest(msg) => (msg.clone(), false),
            ApiError::Booking(e) => {
                if status.is_server_error() {
                    error!("Booking request failed: {:?}", e);
                } else {
                    warn!("Booking request rejected: {}", e);
                }
                (e.user_message(), e.is_retriable())
            }
        };
        (status, Json(json!({ "error": message, "retriable": retriable }))).into_response()
    }
}
