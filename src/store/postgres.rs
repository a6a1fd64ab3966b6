use futures::future::{BoxFuture, FutureExt};
use sqlx::{postgres::PgPoolOptions, types::Json, PgPool};
use std::time::Duration;
use tracing::info;
use uuid::Uuid;

use super::BookingStore;
use crate::error::StoreError;
use crate::models::{BookingRecord, RecordId};

/// Журнал бронирований в Postgres. Ключи - UUIDv4, запись без перезаписи.
#[derive(Clone)]
pub struct PgBookingStore {
    pool: PgPool,
}

impl PgBookingStore {
    pub async fn connect(database_url: &str, pool_size: u32) -> Result<Self, StoreError> {
        let pool = PgPoolOptions::new()
            .max_connections(pool_size)
            .acquire_timeout(Duration::from_secs(5))
            .connect(database_url)
            .await?;

        info!("Running booking store migrations...");
        sqlx::migrate!("./src/migrations")
            .run(&pool)
            .await
            .map_err(sqlx::Error::from)?;
        info!("Booking store ready");

        Ok(Self { pool })
    }
}

impl BookingStore for PgBookingStore {
    fn push<'a>(&'a self, _collection: &'a str) -> BoxFuture<'a, Result<RecordId, StoreError>> {
        // Ключ резервируется на клиенте: UUIDv4 не требует обращения к БД
        futures::future::ready(Ok(RecordId(Uuid::new_v4().to_string()))).boxed()
    }

    fn set<'a>(
        &'a self,
        collection: &'a str,
        id: &'a RecordId,
        record: &'a BookingRecord,
    ) -> BoxFuture<'a, Result<(), StoreError>> {
        async move {
            let inserted = sqlx::query(
                r#"
                INSERT INTO bookings
                    (id, collection, seats, payer_name, student_number, email,
                     receipt_url, total_price, status, created_at)
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
                ON CONFLICT (id) DO NOTHING
                "#,
            )
            .bind(&id.0)
            .bind(collection)
            .bind(Json(&record.seats))
            .bind(record.payer.name.as_deref())
            .bind(&record.payer.student_number)
            .bind(record.payer.email.as_deref())
            .bind(&record.receipt_url)
            .bind(i32::try_from(record.total_price).unwrap_or(i32::MAX))
            .bind(record.status.as_str())
            .bind(record.created_at)
            .execute(&self.pool)
            .await?
            .rows_affected();

            if inserted == 0 {
                return Err(StoreError::KeyExists(id.0.clone()));
            }
            Ok(())
        }
        .boxed()
    }
}
