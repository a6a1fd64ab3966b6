pub mod config;
pub mod controllers;
pub mod error;
pub mod models;
pub mod redis_client;
pub mod services;
pub mod session;
pub mod store;

use axum::{routing::get, Router};
use std::sync::Arc;
use std::time::Duration;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use config::{Config, StoreBackend};
use services::booking_log::BookingLog;
use services::payment::PaymentSubmission;
use services::reservation::ReservationService;
use services::sync::GridSynchronizer;
use services::upload::{HttpReceiptUploader, MemoryReceiptUploader, ReceiptUploader};
use session::{BookingSession, Navigator};
use store::{BookingStore, MemoryStore, PgBookingStore, RedisSeatStore, SeatStore};

// Shared state для всего приложения
#[derive(Clone)]
pub struct AppState {
    pub config: Config,
    pub sync: GridSynchronizer,
    pub payments: PaymentSubmission,
}

impl AppState {
    pub async fn new(config: Config) -> Result<Arc<Self>, Box<dyn std::error::Error + Send + Sync>> {
        let memory = Arc::new(MemoryStore::new());

        let seats: Arc<dyn SeatStore> = match config.store.backend()? {
            StoreBackend::Redis => {
                let redis = redis_client::RedisClient::new(&config.store.endpoint).await?;
                info!("Redis connected");
                Arc::new(RedisSeatStore::new(redis))
            }
            StoreBackend::Memory => {
                warn!("Seat grid lives in process memory, clients of other instances will not see it");
                memory.clone()
            }
        };

        let bookings: Arc<dyn BookingStore> = match &config.database {
            Some(db) => {
                let store = PgBookingStore::connect(&db.url, db.pool_size).await?;
                info!("Database connected");
                Arc::new(store)
            }
            None => memory.clone(),
        };

        let uploader: Arc<dyn ReceiptUploader> = if config.upload.is_memory() {
            Arc::new(MemoryReceiptUploader::new())
        } else {
            Arc::new(HttpReceiptUploader::from_config(
                &config.upload,
                config.circuit_breaker.failure_threshold,
                config.circuit_breaker.timeout_seconds,
            )?)
        };

        let state = Self::with_stores(config, seats, bookings, uploader);

        // Прогрев: создаём сетку, если её ещё нет
        let loaded = state.sync.load().await;
        match loaded.warning() {
            None => info!("Seat grid ready at v{}", loaded.version),
            Some(w) => warn!("Seat grid loaded with warning: {}", w),
        }

        Ok(Arc::new(state))
    }

    pub fn with_stores(
        config: Config,
        seats: Arc<dyn SeatStore>,
        bookings: Arc<dyn BookingStore>,
        uploader: Arc<dyn ReceiptUploader>,
    ) -> Self {
        let sync = GridSynchronizer::new(seats.clone(), config.store.grid_key.clone());
        let log = BookingLog::new(bookings, config.store.bookings_collection.clone());
        let reservations = ReservationService::new(
            seats,
            config.store.grid_key.clone(),
            log,
            config.booking.commit_settings(),
        );
        let payments = PaymentSubmission::new(reservations, uploader, config.booking.payer_rules());

        Self {
            config,
            sync,
            payments,
        }
    }

    /// Новая клиентская сессия поверх текущей сетки.
    pub async fn open_session(&self, navigator: Arc<dyn Navigator>) -> BookingSession {
        BookingSession::new(
            self.sync.load().await,
            self.payments.clone(),
            navigator,
            Duration::from_secs(self.config.booking.hold_timeout_seconds),
        )
    }
}

pub fn app(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/", get(|| async { "Seat Booking API v1.0" }))
        .route("/health", get(|| async { "OK" }))
        .nest("/api", controllers::routes())
        .with_state(state)
        .layer(TraceLayer::new_for_http())
}
