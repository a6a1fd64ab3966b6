//! store
//!
//! Точки подключения общего состояния. Хранилище передаётся в сервисы явно
//! (`Arc<dyn SeatStore>`, `Arc<dyn BookingStore>`), поэтому в тестах его
//! подменяет `MemoryStore`.
//!
//! Методы возвращают `BoxFuture`, чтобы трейты оставались object-safe.

pub mod memory;
pub mod postgres;
pub mod redis;

use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::{sync::watch, task::JoinHandle};

use crate::error::StoreError;
use crate::models::{BookingRecord, RecordId};

pub use memory::MemoryStore;
pub use postgres::PgBookingStore;
pub use self::redis::RedisSeatStore;

/// Значение вместе с номером записи. У отсутствующего ключа версия 0.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Versioned<T> {
    pub version: u64,
    pub value: T,
}

/// Хранилище сетки мест. Данные "сырые": проверяет их вызывающий.
pub trait SeatStore: Send + Sync {
    fn get<'a>(&'a self, key: &'a str)
        -> BoxFuture<'a, Result<Option<Versioned<Value>>, StoreError>>;

    /// Безусловная запись. Возвращает новую версию.
    fn set<'a>(&'a self, key: &'a str, value: Value) -> BoxFuture<'a, Result<u64, StoreError>>;

    /// Запись только если с `expected` никто не писал. `None` - гонка проиграна.
    fn compare_and_set<'a>(
        &'a self,
        key: &'a str,
        expected: u64,
        value: Value,
    ) -> BoxFuture<'a, Result<Option<u64>, StoreError>>;

    fn subscribe<'a>(&'a self, key: &'a str) -> BoxFuture<'a, Result<Subscription, StoreError>>;
}

/// Журнал бронирований: только добавление.
pub trait BookingStore: Send + Sync {
    /// Резервирует свежий уникальный ключ в коллекции.
    fn push<'a>(&'a self, collection: &'a str) -> BoxFuture<'a, Result<RecordId, StoreError>>;

    /// Пишет запись под ключом. Существующую запись не перезаписывает (`KeyExists`).
    fn set<'a>(
        &'a self,
        collection: &'a str,
        id: &'a RecordId,
        record: &'a BookingRecord,
    ) -> BoxFuture<'a, Result<(), StoreError>>;
}

/// Подписка на изменения ключа. Доставляется последнее значение, промежуточные
/// могут быть пропущены. Отписка - `unsubscribe()` или drop.
pub struct Subscription {
    rx: watch::Receiver<Option<Versioned<Value>>>,
    forwarder: Option<JoinHandle<()>>,
}

impl Subscription {
    pub fn new(rx: watch::Receiver<Option<Versioned<Value>>>) -> Self {
        Self { rx, forwarder: None }
    }

    /// Подписка, которую питает фоновая задача (например, redis pub/sub).
    pub fn with_forwarder(
        rx: watch::Receiver<Option<Versioned<Value>>>,
        forwarder: JoinHandle<()>,
    ) -> Self {
        Self {
            rx,
            forwarder: Some(forwarder),
        }
    }

    /// Ждёт следующего изменения. `None`, когда источник закрыт.
    pub async fn next(&mut self) -> Option<Versioned<Value>> {
        loop {
            self.rx.changed().await.ok()?;
            if let Some(value) = self.rx.borrow_and_update().clone() {
                return Some(value);
            }
        }
    }

    pub fn unsubscribe(self) {}
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(task) = self.forwarder.take() {
            task.abort();
        }
    }
}
