//! payment.rs
//!
//! Приём подтверждения оплаты. Деньги система не проверяет: она только
//! сохраняет заявленный платёж и ссылку на фото чека.
//!
//! Порядок: данные плательщика -> локальная проверка чека -> загрузка чека ->
//! протокол фиксации брони. Всё, что можно отклонить локально, отклоняется
//! до первого сетевого вызова.

use std::sync::Arc;
use tracing::info;

use crate::error::BookingError;
use crate::models::{PayerDetails, PayerRules};
use crate::services::reservation::{CommitReceipt, CommitRequest, ReservationService};
use crate::services::upload::{Receipt, ReceiptUploader};

/// Проверенная заявка, готовая к отправке.
#[derive(Debug, Clone)]
pub struct PreparedPayment {
    pub seats: Vec<String>,
    pub payer: PayerDetails,
    pub receipt: Receipt,
}

#[derive(Clone)]
pub struct PaymentSubmission {
    reservations: ReservationService,
    uploader: Arc<dyn ReceiptUploader>,
    rules: PayerRules,
}

impl PaymentSubmission {
    pub fn new(
        reservations: ReservationService,
        uploader: Arc<dyn ReceiptUploader>,
        rules: PayerRules,
    ) -> Self {
        Self {
            reservations,
            uploader,
            rules,
        }
    }

    pub fn reservations(&self) -> &ReservationService {
        &self.reservations
    }

    /// Только локальные проверки, без сети.
    pub fn prepare(
        &self,
        seats: Vec<String>,
        payer: PayerDetails,
        receipt: Receipt,
    ) -> Result<PreparedPayment, BookingError> {
        self.reservations.check_request(&seats)?;
        let payer = payer.normalized(&self.rules)?;
        receipt.validate()?;
        Ok(PreparedPayment {
            seats,
            payer,
            receipt,
        })
    }

    /// Загрузка чека и фиксация брони.
    pub async fn send(&self, prepared: PreparedPayment) -> Result<CommitReceipt, BookingError> {
        let receipt_url = self.uploader.upload(&prepared.receipt).await?;
        info!("Receipt stored at {}", receipt_url);

        self.reservations
            .commit(CommitRequest {
                seats: prepared.seats,
                payer: prepared.payer,
                receipt_url,
            })
            .await
    }

    pub async fn submit(
        &self,
        seats: Vec<String>,
        payer: PayerDetails,
        receipt: Receipt,
    ) -> Result<CommitReceipt, BookingError> {
        let prepared = self.prepare(seats, payer, receipt)?;
        self.send(prepared).await
    }
}
