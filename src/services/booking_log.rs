use chrono::{DateTime, Duration, Utc};
use std::sync::{Arc, Mutex};
use tracing::{error, info};

use crate::error::BookingError;
use crate::models::{BookingRecord, BookingStatus, PayerDetails, RecordId, SeatLabel};
use crate::store::BookingStore;

/// Журнал заявок: только `create`. Смена статуса - дело внешнего бэк-офиса.
#[derive(Clone)]
pub struct BookingLog {
    store: Arc<dyn BookingStore>,
    collection: String,
    last_created_at: Arc<Mutex<Option<DateTime<Utc>>>>,
}

impl BookingLog {
    pub fn new(store: Arc<dyn BookingStore>, collection: impl Into<String>) -> Self {
        Self {
            store,
            collection: collection.into(),
            last_created_at: Arc::new(Mutex::new(None)),
        }
    }

    /// Собирает новую заявку в статусе `pending` с монотонной меткой времени.
    pub fn draft(
        &self,
        seats: Vec<SeatLabel>,
        payer: PayerDetails,
        receipt_url: String,
        total_price: u32,
    ) -> BookingRecord {
        BookingRecord {
            seats,
            payer,
            receipt_url,
            total_price,
            created_at: self.next_timestamp(),
            status: BookingStatus::Pending,
        }
    }

    /// Новый ключ + запись. Существующий ключ никогда не перезаписывается.
    pub async fn create(&self, record: &BookingRecord) -> Result<RecordId, BookingError> {
        let id = self.store.push(&self.collection).await.map_err(|e| {
            error!("Failed to allocate booking key: {:?}", e);
            BookingError::from(e)
        })?;

        self.store
            .set(&self.collection, &id, record)
            .await
            .map_err(|e| {
                error!("Failed to write booking {}: {:?}", id, e);
                BookingError::from(e)
            })?;

        info!("Booking {} recorded for seats {:?}", id, record.seats);
        Ok(id)
    }

    // Часы могут идти назад или совпадать: сдвигаем на микросекунду
    fn next_timestamp(&self) -> DateTime<Utc> {
        let mut last = self
            .last_created_at
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        let now = Utc::now();
        let ts = match *last {
            Some(prev) if now <= prev => prev + Duration::microseconds(1),
            _ => now,
        };
        *last = Some(ts);
        ts
    }
}
