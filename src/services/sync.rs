//! sync.rs
//!
//! Синхронизация локальной копии сетки с общим хранилищем.
//!
//! 1.  **Загрузка**: читаем сетку; если её нет или она не проходит проверку,
//!     записываем каноническую раскладку. Если хранилище недоступно, отдаём
//!     каноническую раскладку только для показа, с видимой ошибкой и без
//!     автоматических повторов.
//! 2.  **Подписка**: каждое изменение заново проверяется; невалидные данные
//!     заменяются канонической раскладкой с предупреждением.

use serde_json::Value;
use std::sync::Arc;
use tracing::{error, info, warn};

use crate::error::{BookingError, TransportError};
use crate::models::SeatGrid;
use crate::store::{SeatStore, Subscription, Versioned};

const INIT_ATTEMPTS: u32 = 3;

/// Откуда взялась локальная копия.
#[derive(Debug, Clone, PartialEq)]
pub enum GridSource {
    /// Прочитана из хранилища и прошла проверку
    Authoritative,
    /// Сетки не было - записали каноническую
    Initialized,
    /// Сетка была повреждена - перезаписали канонической
    Reinitialized(BookingError),
    /// Хранилище недоступно - каноническая сетка только для показа
    LocalFallback(BookingError),
}

#[derive(Debug, Clone)]
pub struct LoadedGrid {
    pub grid: SeatGrid,
    pub version: u64,
    pub source: GridSource,
}

impl LoadedGrid {
    /// Можно ли считать копию авторитетной (на ней разрешено бронировать).
    pub fn is_authoritative(&self) -> bool {
        !matches!(self.source, GridSource::LocalFallback(_))
    }

    /// Предупреждение, которое надо показать пользователю.
    pub fn warning(&self) -> Option<&BookingError> {
        match &self.source {
            GridSource::Reinitialized(e) | GridSource::LocalFallback(e) => Some(e),
            _ => None,
        }
    }
}

#[derive(Clone)]
pub struct GridSynchronizer {
    store: Arc<dyn SeatStore>,
    key: String,
    layout: SeatGrid,
}

impl GridSynchronizer {
    pub fn new(store: Arc<dyn SeatStore>, key: impl Into<String>) -> Self {
        Self {
            store,
            key: key.into(),
            layout: SeatGrid::canonical(),
        }
    }

    pub fn layout(&self) -> &SeatGrid {
        &self.layout
    }

    /// Проверка на границе доверия: формат, затем форма зала.
    pub fn validate(&self, value: &Value) -> Result<SeatGrid, BookingError> {
        let grid = SeatGrid::from_value(value)?;
        grid.conforms_to(&self.layout)?;
        Ok(grid)
    }

    pub async fn load(&self) -> LoadedGrid {
        for _ in 0..INIT_ATTEMPTS {
            let stored = match self.store.get(&self.key).await {
                Ok(stored) => stored,
                Err(e) => {
                    error!("Failed to load seat grid `{}`: {:?}", self.key, e);
                    return self.fallback(TransportError::from(e).into());
                }
            };

            let (expected, source) = match stored {
                None => {
                    info!("Seat grid `{}` is absent, initializing default layout", self.key);
                    (0, GridSource::Initialized)
                }
                Some(Versioned { version, value }) => match self.validate(&value) {
                    Ok(grid) => {
                        return LoadedGrid {
                            grid,
                            version,
                            source: GridSource::Authoritative,
                        }
                    }
                    Err(problem) => {
                        warn!("Seat grid `{}` rejected ({}), reinitializing", self.key, problem);
                        (version, GridSource::Reinitialized(problem))
                    }
                },
            };

            let grid = self.layout.clone();
            match self
                .store
                .compare_and_set(&self.key, expected, grid.to_value())
                .await
            {
                Ok(Some(version)) => return LoadedGrid { grid, version, source },
                // Кто-то записал раньше нас: перечитываем
                Ok(None) => continue,
                Err(e) => {
                    error!("Failed to initialize seat grid `{}`: {:?}", self.key, e);
                    return self.fallback(TransportError::from(e).into());
                }
            }
        }

        self.fallback(
            TransportError::Contention {
                attempts: INIT_ATTEMPTS,
            }
            .into(),
        )
    }

    fn fallback(&self, error: BookingError) -> LoadedGrid {
        LoadedGrid {
            grid: self.layout.clone(),
            version: 0,
            source: GridSource::LocalFallback(error),
        }
    }

    pub async fn watch(&self) -> Result<GridFeed, BookingError> {
        let subscription = self
            .store
            .subscribe(&self.key)
            .await
            .map_err(TransportError::from)?;
        Ok(GridFeed {
            subscription,
            sync: self.clone(),
            last_version: 0,
        })
    }
}

/// Проверенное изменение сетки из подписки.
#[derive(Debug, Clone)]
pub struct GridUpdate {
    pub grid: SeatGrid,
    pub version: u64,
    /// Данные не прошли проверку, вместо них каноническая раскладка
    pub warning: Option<BookingError>,
}

/// Поток изменений сетки. Drop - отписка.
pub struct GridFeed {
    subscription: Subscription,
    sync: GridSynchronizer,
    last_version: u64,
}

impl GridFeed {
    /// Следующее изменение; устаревшие версии пропускаются. `None` - источник закрыт.
    pub async fn next(&mut self) -> Option<GridUpdate> {
        loop {
            let Versioned { version, value } = self.subscription.next().await?;
            if version <= self.last_version {
                continue;
            }
            self.last_version = version;

            return Some(match self.sync.validate(&value) {
                Ok(grid) => GridUpdate {
                    grid,
                    version,
                    warning: None,
                },
                Err(problem) => {
                    warn!("Rejected remote seat grid v{}: {}", version, problem);
                    GridUpdate {
                        grid: self.sync.layout.clone(),
                        version,
                        warning: Some(problem),
                    }
                }
            });
        }
    }

    pub fn unsubscribe(self) {
        self.subscription.unsubscribe();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{InvariantViolation, ValidationError};
    use crate::models::{SeatCoord, SeatStatus};
    use crate::store::MemoryStore;
    use serde_json::json;

    fn sync(store: &Arc<MemoryStore>) -> GridSynchronizer {
        GridSynchronizer::new(store.clone(), "seats")
    }

    #[tokio::test]
    async fn initializes_absent_grid() {
        let store = Arc::new(MemoryStore::new());
        let loaded = sync(&store).load().await;

        assert_eq!(loaded.source, GridSource::Initialized);
        assert_eq!(loaded.grid, SeatGrid::canonical());
        assert_eq!(store.snapshot("seats").unwrap().value, SeatGrid::canonical().to_value());
    }

    #[tokio::test]
    async fn adopts_valid_stored_grid() {
        let store = Arc::new(MemoryStore::new());
        let mut grid = SeatGrid::canonical();
        grid.set_status(SeatCoord::new(2, 2), SeatStatus::Booked);
        store.set("seats", grid.to_value()).await.unwrap();

        let loaded = sync(&store).load().await;
        assert_eq!(loaded.source, GridSource::Authoritative);
        assert_eq!(loaded.grid, grid);
        assert_eq!(loaded.version, 1);
    }

    #[tokio::test]
    async fn reinitializes_malformed_or_misshapen_grid() {
        let store = Arc::new(MemoryStore::new());
        store.set("seats", json!({"not": "a grid"})).await.unwrap();
        let loaded = sync(&store).load().await;
        assert!(matches!(
            loaded.source,
            GridSource::Reinitialized(BookingError::Validation(ValidationError::MalformedGrid(_)))
        ));

        store.set("seats", json!([["available"]])).await.unwrap();
        let loaded = sync(&store).load().await;
        assert!(matches!(
            loaded.source,
            GridSource::Reinitialized(BookingError::Invariant(InvariantViolation::GridShape(_)))
        ));
        assert!(loaded.warning().is_some());
        assert_eq!(store.snapshot("seats").unwrap().value, SeatGrid::canonical().to_value());
    }

    #[tokio::test]
    async fn unreachable_store_falls_back_for_display_only() {
        let store = Arc::new(MemoryStore::new());
        store.fail_next_read();
        let loaded = sync(&store).load().await;

        assert!(!loaded.is_authoritative());
        assert!(matches!(loaded.warning(), Some(BookingError::Transport(_))));
        assert_eq!(loaded.grid, SeatGrid::canonical());
        // Ничего не записали и не повторяли
        assert!(store.snapshot("seats").is_none());
    }

    #[tokio::test]
    async fn feed_validates_every_update() {
        let store = Arc::new(MemoryStore::new());
        let sync = sync(&store);
        sync.load().await;
        let mut feed = sync.watch().await.unwrap();

        let mut grid = SeatGrid::canonical();
        grid.set_status(SeatCoord::new(1, 1), SeatStatus::Booked);
        store.set("seats", grid.to_value()).await.unwrap();
        let update = feed.next().await.unwrap();
        assert_eq!(update.grid, grid);
        assert!(update.warning.is_none());

        store.set("seats", json!([["available", "sold"]])).await.unwrap();
        let update = feed.next().await.unwrap();
        assert_eq!(update.grid, SeatGrid::canonical());
        assert!(update.warning.is_some());
    }
}
