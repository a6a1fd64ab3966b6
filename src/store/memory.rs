use futures::future::{self, BoxFuture, FutureExt};
use serde_json::Value;
use std::collections::btree_map::Entry;
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;
use tokio::sync::watch;
use uuid::Uuid;

use super::{BookingStore, SeatStore, Subscription, Versioned};
use crate::error::StoreError;
use crate::models::{BookingRecord, RecordId};

type Slot = watch::Sender<Option<Versioned<Value>>>;

/// Хранилище в памяти процесса: локальная разработка (`memory://`) и тесты.
///
/// Умеет имитировать сбои: следующее чтение, следующую запись бронирования,
/// записи сетки после N успешных.
#[derive(Default)]
pub struct MemoryStore {
    grids: Mutex<HashMap<String, Slot>>,
    bookings: Mutex<HashMap<String, BTreeMap<String, BookingRecord>>>,
    faults: Faults,
}

#[derive(Default)]
struct Faults {
    next_read: AtomicBool,
    next_booking_write: AtomicBool,
    // None - без ограничений, Some(n) - ещё n успешных записей сетки
    grid_writes_left: Mutex<Option<u32>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_next_read(&self) {
        self.faults.next_read.store(true, Ordering::SeqCst);
    }

    pub fn fail_next_booking_write(&self) {
        self.faults.next_booking_write.store(true, Ordering::SeqCst);
    }

    /// После `successes` удачных записей сетки все следующие падают до `heal()`.
    pub fn fail_grid_writes_after(&self, successes: u32) {
        *lock(&self.faults.grid_writes_left) = Some(successes);
    }

    pub fn heal(&self) {
        self.faults.next_read.store(false, Ordering::SeqCst);
        self.faults.next_booking_write.store(false, Ordering::SeqCst);
        *lock(&self.faults.grid_writes_left) = None;
    }

    /// Текущее значение ключа без учёта имитации сбоев.
    pub fn snapshot(&self, key: &str) -> Option<Versioned<Value>> {
        lock(&self.grids)
            .get(key)
            .and_then(|slot| slot.borrow().clone())
    }

    /// Все записанные бронирования коллекции в порядке ключей.
    pub fn records(&self, collection: &str) -> Vec<(RecordId, BookingRecord)> {
        lock(&self.bookings)
            .get(collection)
            .map(|records| {
                records
                    .iter()
                    .map(|(id, r)| (RecordId(id.clone()), r.clone()))
                    .collect()
            })
            .unwrap_or_default()
    }

    fn check_read(&self) -> Result<(), StoreError> {
        if self.faults.next_read.swap(false, Ordering::SeqCst) {
            return Err(StoreError::Unavailable("injected read failure".into()));
        }
        Ok(())
    }

    fn check_grid_write(&self) -> Result<(), StoreError> {
        let mut left = lock(&self.faults.grid_writes_left);
        match left.as_mut() {
            None => Ok(()),
            Some(0) => Err(StoreError::Unavailable("injected grid write failure".into())),
            Some(n) => {
                *n -= 1;
                Ok(())
            }
        }
    }

    fn write(&self, key: &str, expected: Option<u64>, value: Value) -> Result<Option<u64>, StoreError> {
        let mut grids = lock(&self.grids);
        let slot = grids
            .entry(key.to_string())
            .or_insert_with(|| watch::channel(None).0);

        let current = slot.borrow().as_ref().map_or(0, |v| v.version);
        if expected.is_some_and(|e| e != current) {
            return Ok(None);
        }

        self.check_grid_write()?;
        let version = current + 1;
        slot.send_replace(Some(Versioned { version, value }));
        Ok(Some(version))
    }
}

impl SeatStore for MemoryStore {
    fn get<'a>(&'a self, key: &'a str)
        -> BoxFuture<'a, Result<Option<Versioned<Value>>, StoreError>> {
        let result = self.check_read().map(|_| self.snapshot(key));
        future::ready(result).boxed()
    }

    fn set<'a>(&'a self, key: &'a str, value: Value) -> BoxFuture<'a, Result<u64, StoreError>> {
        let result = self
            .write(key, None, value)
            .map(|v| v.unwrap_or_default());
        future::ready(result).boxed()
    }

    fn compare_and_set<'a>(
        &'a self,
        key: &'a str,
        expected: u64,
        value: Value,
    ) -> BoxFuture<'a, Result<Option<u64>, StoreError>> {
        future::ready(self.write(key, Some(expected), value)).boxed()
    }

    fn subscribe<'a>(&'a self, key: &'a str) -> BoxFuture<'a, Result<Subscription, StoreError>> {
        let rx = lock(&self.grids)
            .entry(key.to_string())
            .or_insert_with(|| watch::channel(None).0)
            .subscribe();
        future::ready(Ok(Subscription::new(rx))).boxed()
    }
}

impl BookingStore for MemoryStore {
    fn push<'a>(&'a self, collection: &'a str) -> BoxFuture<'a, Result<RecordId, StoreError>> {
        let mut bookings = lock(&self.bookings);
        let records = bookings.entry(collection.to_string()).or_default();
        // Ключ не резервируется: запись появится только после удачного `set`
        let id = loop {
            let candidate = Uuid::new_v4().to_string();
            if !records.contains_key(&candidate) {
                break candidate;
            }
        };
        future::ready(Ok(RecordId(id))).boxed()
    }

    fn set<'a>(
        &'a self,
        collection: &'a str,
        id: &'a RecordId,
        record: &'a BookingRecord,
    ) -> BoxFuture<'a, Result<(), StoreError>> {
        let result = if self.faults.next_booking_write.swap(false, Ordering::SeqCst) {
            Err(StoreError::Unavailable("injected booking write failure".into()))
        } else {
            let mut bookings = lock(&self.bookings);
            match bookings.entry(collection.to_string()).or_default().entry(id.0.clone()) {
                Entry::Occupied(_) => Err(StoreError::KeyExists(id.0.clone())),
                Entry::Vacant(slot) => {
                    slot.insert(record.clone());
                    Ok(())
                }
            }
        };
        future::ready(result).boxed()
    }
}

// Паника под мьютексом оставляет данные согласованными: все изменения одношаговые
fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}
