//! reservation.rs
//!
//! Протокол фиксации брони: свежее чтение, проверка, запись целиком или никак.
//!
//! 1.  Читаем сетку заново (кешу клиента верить нельзя) и проверяем её форму.
//! 2.  Переводим метки в координаты; любая ошибка - `InvalidSeat`, без записей.
//! 3.  Все места должны быть `available`/`selected`. Хотя бы одно занято:
//!     отказ по всей пачке (`ConflictError`).
//! 4.  Строим новую сетку и заявку `pending`.
//! 5.  Пишем сетку через compare-and-set по версии из шага 1, затем заявку.
//!     Проиграли гонку по версии - повторяем шаги 1-4 (ограниченное число раз).
//!     Заявка не записалась - откатываем свои места обратно в `available`;
//!     если и откат не удался, это `InvariantViolation::OrphanedSeats`.
//!
//! Удержаний мест до коммита нет: выигрывает тот, кто первым зафиксировал.

use std::collections::HashSet;
use std::sync::Arc;
use tracing::{error, info, warn};

use crate::error::{BookingError, ConflictError, InvariantViolation, TransportError, ValidationError};
use crate::models::{BookingRecord, PayerDetails, RecordId, SeatCoord, SeatGrid, SeatLabel, SeatStatus};
use crate::services::booking_log::BookingLog;
use crate::services::sync::GridSynchronizer;
use crate::store::{SeatStore, Versioned};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CommitSettings {
    pub max_seats: usize,
    pub seat_price: u32,
    pub max_attempts: u32,
}

impl Default for CommitSettings {
    fn default() -> Self {
        Self {
            max_seats: 5,
            seat_price: 50,
            max_attempts: 3,
        }
    }
}

/// Запрос на фиксацию. Метки - сырые строки: могут прийти из поддельного запроса.
#[derive(Debug, Clone)]
pub struct CommitRequest {
    pub seats: Vec<String>,
    pub payer: PayerDetails,
    pub receipt_url: String,
}

#[derive(Debug, Clone)]
pub struct CommitReceipt {
    pub id: RecordId,
    pub record: BookingRecord,
    pub grid: SeatGrid,
    pub version: u64,
}

#[derive(Clone)]
pub struct ReservationService {
    seats: Arc<dyn SeatStore>,
    grid_key: String,
    sync: GridSynchronizer,
    bookings: BookingLog,
    settings: CommitSettings,
}

impl ReservationService {
    pub fn new(
        seats: Arc<dyn SeatStore>,
        grid_key: impl Into<String>,
        bookings: BookingLog,
        settings: CommitSettings,
    ) -> Self {
        let grid_key = grid_key.into();
        Self {
            sync: GridSynchronizer::new(seats.clone(), grid_key.clone()),
            seats,
            grid_key,
            bookings,
            settings,
        }
    }

    pub fn settings(&self) -> CommitSettings {
        self.settings
    }

    pub fn total_price(&self, seats: usize) -> u32 {
        u32::try_from(seats)
            .unwrap_or(u32::MAX)
            .saturating_mul(self.settings.seat_price)
    }

    /// Проверки без обращения к хранилищу: размер пачки, синтаксис меток,
    /// границы и разметка по раскладке зала, дубли.
    pub fn check_request(&self, seats: &[String]) -> Result<(), ValidationError> {
        if seats.is_empty() {
            return Err(ValidationError::EmptySelection);
        }
        if seats.len() > self.settings.max_seats {
            return Err(ValidationError::TooManySeats {
                requested: seats.len(),
                max: self.settings.max_seats,
            });
        }
        resolve(self.sync.layout(), seats).map(|_| ())
    }

    pub async fn commit(&self, request: CommitRequest) -> Result<CommitReceipt, BookingError> {
        self.check_request(&request.seats)?;

        for attempt in 1..=self.settings.max_attempts {
            // 1. Свежее чтение
            let (version, grid) = self.read_fresh().await?;

            // 2. Метки -> координаты
            let seats = resolve(&grid, &request.seats)?;

            // 3. Проверка по свежему состоянию, отказ по всей пачке
            let taken: Vec<SeatLabel> = seats
                .iter()
                .filter(|(_, at)| {
                    !matches!(grid.status(*at), Some(SeatStatus::Available | SeatStatus::Selected))
                })
                .map(|(label, _)| label.clone())
                .collect();
            if !taken.is_empty() {
                warn!("Commit rejected, seats already taken: {:?}", taken);
                return Err(ConflictError { seats: taken }.into());
            }

            // 4. Новая сетка и заявка
            let mut updated = grid;
            for (_, at) in &seats {
                updated.set_status(*at, SeatStatus::Booked);
            }
            let labels: Vec<SeatLabel> = seats.iter().map(|(l, _)| l.clone()).collect();
            let record = self.bookings.draft(
                labels.clone(),
                request.payer.clone(),
                request.receipt_url.clone(),
                self.total_price(labels.len()),
            );

            // 5. Сетка, затем заявка
            let new_version = match self
                .seats
                .compare_and_set(&self.grid_key, version, updated.to_value())
                .await
            {
                Ok(Some(v)) => v,
                Ok(None) => {
                    warn!("Seat grid moved past v{} during commit (attempt {})", version, attempt);
                    continue;
                }
                Err(e) => {
                    error!("Seat grid write failed: {:?}", e);
                    return Err(TransportError::from(e).into());
                }
            };

            return match self.bookings.create(&record).await {
                Ok(id) => {
                    info!("Seats {:?} booked under {} (grid v{})", labels, id, new_version);
                    Ok(CommitReceipt {
                        id,
                        record,
                        grid: updated,
                        version: new_version,
                    })
                }
                Err(e) => {
                    let coords: Vec<SeatCoord> = seats.iter().map(|(_, at)| *at).collect();
                    self.roll_back(&coords, &labels).await?;
                    Err(e)
                }
            };
        }

        Err(TransportError::Contention {
            attempts: self.settings.max_attempts,
        }
        .into())
    }

    async fn read_fresh(&self) -> Result<(u64, SeatGrid), BookingError> {
        let Versioned { version, value } = self
            .seats
            .get(&self.grid_key)
            .await
            .map_err(|e| {
                error!("Fresh seat grid read failed: {:?}", e);
                TransportError::from(e)
            })?
            .ok_or_else(|| InvariantViolation::GridShape("seat grid is missing".into()))?;

        let grid = self.sync.validate(&value)?;
        Ok((version, grid))
    }

    /// Компенсация: возвращает свои места из `booked` в `available`.
    async fn roll_back(&self, coords: &[SeatCoord], labels: &[SeatLabel]) -> Result<(), BookingError> {
        for attempt in 1..=self.settings.max_attempts {
            let (version, mut grid) = match self.read_fresh().await {
                Ok(current) => current,
                Err(e) => {
                    error!("Rollback read failed (attempt {}): {}", attempt, e);
                    continue;
                }
            };

            let mut changed = false;
            for at in coords {
                if grid.status(*at) == Some(SeatStatus::Booked) {
                    changed |= grid.set_status(*at, SeatStatus::Available);
                }
            }
            if !changed {
                return Ok(());
            }

            match self
                .seats
                .compare_and_set(&self.grid_key, version, grid.to_value())
                .await
            {
                Ok(Some(_)) => {
                    warn!("Rolled back seats {:?} after booking write failure", labels);
                    return Ok(());
                }
                Ok(None) => continue,
                Err(e) => error!("Rollback write failed (attempt {}): {:?}", attempt, e),
            }
        }

        error!("Seats {:?} left booked without a booking record", labels);
        Err(InvariantViolation::OrphanedSeats {
            seats: labels.to_vec(),
        }
        .into())
    }
}

/// Метки -> координаты с проверкой границ, разметки и дублей.
fn resolve(grid: &SeatGrid, raw: &[String]) -> Result<Vec<(SeatLabel, SeatCoord)>, ValidationError> {
    let mut seen = HashSet::with_capacity(raw.len());
    raw.iter()
        .map(|label| {
            let invalid = || ValidationError::InvalidSeat(label.clone());
            let at = grid.locate(label).map_err(|_| invalid())?;
            if !grid.status(at).is_some_and(SeatStatus::is_sellable) {
                return Err(invalid());
            }
            if !seen.insert(at) {
                return Err(ValidationError::DuplicateSeat(label.clone()));
            }
            let label = grid.label_of(at).map_err(|_| invalid())?;
            Ok((label, at))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::StoreError;
    use crate::store::{MemoryStore, Subscription};
    use futures::future::{BoxFuture, FutureExt};
    use serde_json::Value;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn payer() -> PayerDetails {
        PayerDetails {
            name: Some("Ana".into()),
            student_number: "02212345678".into(),
            email: None,
        }
    }

    fn request(seats: &[&str]) -> CommitRequest {
        CommitRequest {
            seats: seats.iter().map(|s| s.to_string()).collect(),
            payer: payer(),
            receipt_url: "memory://receipt".into(),
        }
    }

    async fn service(store: Arc<MemoryStore>) -> ReservationService {
        store.set("seats", SeatGrid::canonical().to_value()).await.unwrap();
        ReservationService::new(
            store.clone(),
            "seats",
            BookingLog::new(store, "bookings"),
            CommitSettings::default(),
        )
    }

    fn stored_grid(store: &MemoryStore) -> SeatGrid {
        SeatGrid::from_value(&store.snapshot("seats").unwrap().value).unwrap()
    }

    #[tokio::test]
    async fn books_seats_and_records_booking() {
        let store = Arc::new(MemoryStore::new());
        let svc = service(store.clone()).await;

        let receipt = svc.commit(request(&["B3", "B4"])).await.unwrap();
        assert_eq!(receipt.record.total_price, 100);
        assert_eq!(receipt.record.seats.len(), 2);

        let grid = stored_grid(&store);
        assert_eq!(grid.status(SeatCoord::new(2, 2)), Some(SeatStatus::Booked));
        assert_eq!(grid.status(SeatCoord::new(2, 3)), Some(SeatStatus::Booked));
        assert_eq!(grid.count(SeatStatus::Booked), 2);

        let records = store.records("bookings");
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].0, receipt.id);
    }

    #[tokio::test]
    async fn rebooking_own_seats_is_a_whole_batch_conflict() {
        let store = Arc::new(MemoryStore::new());
        let svc = service(store.clone()).await;
        svc.commit(request(&["C1", "C2", "C3"])).await.unwrap();
        let before = store.snapshot("seats").unwrap();

        let err = svc.commit(request(&["C2", "C4"])).await.unwrap_err();
        assert_eq!(
            err,
            BookingError::Conflict(ConflictError {
                seats: vec![SeatLabel::new_unchecked("C2")]
            })
        );
        assert_eq!(store.snapshot("seats").unwrap(), before);
        assert_eq!(store.records("bookings").len(), 1);
    }

    #[tokio::test]
    async fn rejects_invalid_requests_before_any_write() {
        let store = Arc::new(MemoryStore::new());
        let svc = service(store.clone()).await;
        let before = store.snapshot("seats").unwrap();

        let cases = [
            (vec![], ValidationError::EmptySelection),
            (vec!["B3", "Z99"], ValidationError::InvalidSeat("Z99".into())),
            (vec!["B9"], ValidationError::InvalidSeat("B9".into())),
            (vec!["B3", "B3"], ValidationError::DuplicateSeat("B3".into())),
            (
                vec!["A1", "A2", "A3", "A4", "A5", "A6"],
                ValidationError::TooManySeats { requested: 6, max: 5 },
            ),
        ];
        for (seats, want) in cases {
            assert_eq!(svc.commit(request(&seats)).await.unwrap_err(), BookingError::Validation(want));
        }
        assert_eq!(store.snapshot("seats").unwrap(), before);
        assert!(store.records("bookings").is_empty());
    }

    #[tokio::test]
    async fn misshapen_grid_is_an_invariant_violation() {
        let store = Arc::new(MemoryStore::new());
        let svc = service(store.clone()).await;
        store.set("seats", serde_json::json!([["available"]])).await.unwrap();

        assert!(matches!(
            svc.commit(request(&["01"])).await,
            Err(BookingError::Invariant(InvariantViolation::GridShape(_)))
        ));
    }

    #[tokio::test]
    async fn failed_booking_write_rolls_back_grid() {
        let store = Arc::new(MemoryStore::new());
        let svc = service(store.clone()).await;
        store.fail_next_booking_write();

        let err = svc.commit(request(&["D5", "D6"])).await.unwrap_err();
        assert!(matches!(err, BookingError::Transport(_)));
        assert!(store.records("bookings").is_empty());
        assert_eq!(stored_grid(&store).count(SeatStatus::Booked), 0);
    }

    #[tokio::test]
    async fn failed_rollback_is_flagged_as_orphaned_seats() {
        let store = Arc::new(MemoryStore::new());
        let svc = service(store.clone()).await;
        store.fail_next_booking_write();
        store.fail_grid_writes_after(1);

        let err = svc.commit(request(&["D5"])).await.unwrap_err();
        assert_eq!(
            err,
            BookingError::Invariant(InvariantViolation::OrphanedSeats {
                seats: vec![SeatLabel::new_unchecked("D5")]
            })
        );
    }

    /// Перед каждой записью сетки "соседний" клиент успевает забронировать другое место.
    struct RacingStore {
        inner: Arc<MemoryStore>,
        races: AtomicU32,
        next_col: AtomicU32,
    }

    impl SeatStore for RacingStore {
        fn get<'a>(&'a self, key: &'a str) -> BoxFuture<'a, Result<Option<Versioned<Value>>, StoreError>> {
            self.inner.get(key)
        }

        fn set<'a>(&'a self, key: &'a str, value: Value) -> BoxFuture<'a, Result<u64, StoreError>> {
            self.inner.set(key, value)
        }

        fn compare_and_set<'a>(
            &'a self,
            key: &'a str,
            expected: u64,
            value: Value,
        ) -> BoxFuture<'a, Result<Option<u64>, StoreError>> {
            async move {
                if self.races.load(Ordering::SeqCst) > 0 {
                    self.races.fetch_sub(1, Ordering::SeqCst);
                    let mut grid = stored_grid(&self.inner);
                    let col = self.next_col.fetch_add(1, Ordering::SeqCst) as usize;
                    grid.set_status(SeatCoord::new(10, col), SeatStatus::Booked);
                    self.inner.set(key, grid.to_value()).await?;
                }
                self.inner.compare_and_set(key, expected, value).await
            }
            .boxed()
        }

        fn subscribe<'a>(&'a self, key: &'a str) -> BoxFuture<'a, Result<Subscription, StoreError>> {
            self.inner.subscribe(key)
        }
    }

    async fn racing_service(races: u32) -> (Arc<MemoryStore>, ReservationService) {
        let inner = Arc::new(MemoryStore::new());
        inner.set("seats", SeatGrid::canonical().to_value()).await.unwrap();
        let racing = Arc::new(RacingStore {
            inner: inner.clone(),
            races: AtomicU32::new(races),
            next_col: AtomicU32::new(0),
        });
        let svc = ReservationService::new(
            racing,
            "seats",
            BookingLog::new(inner.clone(), "bookings"),
            CommitSettings::default(),
        );
        (inner, svc)
    }

    #[tokio::test]
    async fn lost_version_race_on_unrelated_seats_is_retried() {
        let (store, svc) = racing_service(1).await;

        svc.commit(request(&["B3"])).await.unwrap();
        let grid = stored_grid(&store);
        assert_eq!(grid.status(SeatCoord::new(2, 2)), Some(SeatStatus::Booked));
        // Чужая запись не потеряна
        assert_eq!(grid.status(SeatCoord::new(10, 0)), Some(SeatStatus::Booked));
    }

    #[tokio::test]
    async fn endless_contention_gives_up_without_writing() {
        let (store, svc) = racing_service(10).await;

        assert_eq!(
            svc.commit(request(&["B3"])).await.unwrap_err(),
            BookingError::Transport(TransportError::Contention { attempts: 3 })
        );
        assert_eq!(stored_grid(&store).status(SeatCoord::new(2, 2)), Some(SeatStatus::Available));
        assert!(store.records("bookings").is_empty());
    }
}
