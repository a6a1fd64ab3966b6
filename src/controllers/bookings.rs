use axum::{
    extract::{DefaultBodyLimit, Multipart, State},
    http::StatusCode,
    response::IntoResponse,
    routing::post,
    Json, Router,
};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;
use tracing::info;

use super::ApiError;
use crate::models::{BookingStatus, PayerDetails, SeatLabel};
use crate::services::upload::{Receipt, MAX_RECEIPT_BYTES};
use crate::AppState;

// Чек плюс текстовые поля формы
const MULTIPART_LIMIT: usize = MAX_RECEIPT_BYTES + 1024 * 1024;

pub fn routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/seats/confirm", post(confirm_seats))
        .layer(DefaultBodyLimit::max(MULTIPART_LIMIT))
}

/* ---------- helpers ---------- */

#[derive(Debug, Default)]
struct ConfirmForm {
    seats: Vec<String>,
    payer: PayerDetails,
    receipt: Option<Receipt>,
}

/// `seats` приходит либо JSON-массивом, либо через запятую.
fn parse_seats(raw: &str) -> Vec<String> {
    match serde_json::from_str::<Vec<String>>(raw) {
        Ok(seats) => seats,
        Err(_) => raw
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(String::from)
            .collect(),
    }
}

async fn read_form(mut multipart: Multipart) -> Result<ConfirmForm, ApiError> {
    let bad = |e: axum::extract::multipart::MultipartError| ApiError::BadRequest(e.body_text());
    let mut form = ConfirmForm::default();

    while let Some(field) = multipart.next_field().await.map_err(bad)? {
        let name = field.name().unwrap_or_default().to_string();
        match name.as_str() {
            "receipt" => {
                let file_name = field.file_name().unwrap_or("receipt").to_string();
                let content_type = field
                    .content_type()
                    .unwrap_or("application/octet-stream")
                    .to_string();
                let bytes = field.bytes().await.map_err(bad)?;
                form.receipt = Some(Receipt {
                    file_name,
                    content_type,
                    bytes: bytes.to_vec(),
                });
            }
            "seats" => form.seats = parse_seats(&field.text().await.map_err(bad)?),
            "studentNumber" => form.payer.student_number = field.text().await.map_err(bad)?,
            "name" => form.payer.name = Some(field.text().await.map_err(bad)?),
            "email" => form.payer.email = Some(field.text().await.map_err(bad)?),
            // paymentStatus и прочее: статус назначает сервер
            _ => {}
        }
    }
    Ok(form)
}

/* ---------- CONFIRM ---------- */

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ConfirmResponse {
    id: String,
    seats: Vec<SeatLabel>,
    total_price: u32,
    receipt_url: String,
    status: BookingStatus,
    created_at: DateTime<Utc>,
    version: u64,
}

// POST /api/seats/confirm (multipart)
async fn confirm_seats(
    State(state): State<Arc<AppState>>,
    multipart: Multipart,
) -> Result<impl IntoResponse, ApiError> {
    let form = read_form(multipart).await?;
    let receipt = form.receipt.unwrap_or(Receipt {
        file_name: String::new(),
        content_type: String::new(),
        bytes: Vec::new(),
    });

    let committed = state.payments.submit(form.seats, form.payer, receipt).await?;
    info!(
        "Booking {} confirmed for seats {:?}",
        committed.id, committed.record.seats
    );

    let record = committed.record;
    Ok((
        StatusCode::CREATED,
        Json(ConfirmResponse {
            id: committed.id.0,
            seats: record.seats,
            total_price: record.total_price,
            receipt_url: record.receipt_url,
            status: record.status,
            created_at: record.created_at,
            version: committed.version,
        }),
    ))
}
