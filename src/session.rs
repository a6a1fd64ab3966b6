//! session.rs
//!
//! Состояние одной клиентской сессии: локальная копия сетки, свой выбор мест,
//! переход к оплате и подтверждение.
//!
//! Сессия однопоточная: один клик или один коммит за раз. Подтверждение
//! разбито на `begin_confirm` / `finish_confirm`, чтобы во время коммита
//! сессия оставалась доступной (кнопка подтверждения при этом выключена).

use serde::Serialize;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

use crate::error::{BookingError, ValidationError};
use crate::models::{PayerDetails, SeatCoord, SeatGrid, SeatLabel, SelectionSet};
use crate::services::payment::{PaymentSubmission, PreparedPayment};
use crate::services::reservation::CommitReceipt;
use crate::services::selection::{toggle_seat, ToggleOutcome};
use crate::services::sync::{GridUpdate, LoadedGrid};
use crate::services::upload::Receipt;

/// Состояние, которое передаётся с экрана выбора на экран оплаты.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Checkout {
    pub selected_seats: Vec<SeatLabel>,
    pub total_price: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReturnReason {
    /// Истекло время на оплату
    HoldExpired,
    /// Сетка изменилась под ногами
    GridChanged,
    /// Места заняли раньше нас
    SeatsTaken,
}

/// Переходы между экранами. Как они рисуются - не наше дело.
pub trait Navigator: Send + Sync {
    fn to_payment(&self, checkout: &Checkout);
    fn show_confirmation(&self, receipt: &CommitReceipt);
    fn back_to_selection(&self, reason: ReturnReason);
}

/// Коммит, запущенный из сессии. Сессию не держит.
pub struct PendingCommit {
    payments: PaymentSubmission,
    prepared: PreparedPayment,
}

impl PendingCommit {
    pub async fn run(self) -> Result<CommitReceipt, BookingError> {
        self.payments.send(self.prepared).await
    }
}

pub struct BookingSession {
    grid: SeatGrid,
    version: u64,
    authoritative: bool,
    warning: Option<BookingError>,
    selection: SelectionSet,
    commit_in_flight: bool,
    checkout_started: Option<Instant>,
    hold_timeout: Duration,
    payments: PaymentSubmission,
    navigator: Arc<dyn Navigator>,
}

impl BookingSession {
    pub fn new(
        loaded: LoadedGrid,
        payments: PaymentSubmission,
        navigator: Arc<dyn Navigator>,
        hold_timeout: Duration,
    ) -> Self {
        let max_seats = payments.reservations().settings().max_seats;
        Self {
            authoritative: loaded.is_authoritative(),
            warning: loaded.warning().cloned(),
            grid: loaded.grid,
            version: loaded.version,
            selection: SelectionSet::new(max_seats),
            commit_in_flight: false,
            checkout_started: None,
            hold_timeout,
            payments,
            navigator,
        }
    }

    pub fn grid(&self) -> &SeatGrid {
        &self.grid
    }

    pub fn selection(&self) -> &SelectionSet {
        &self.selection
    }

    /// Ошибка загрузки или предупреждение о повреждённых данных.
    pub fn warning(&self) -> Option<&BookingError> {
        self.warning.as_ref()
    }

    pub fn total_price(&self) -> u32 {
        self.payments.reservations().total_price(self.selection.len())
    }

    pub fn is_confirm_enabled(&self) -> bool {
        !self.commit_in_flight && !self.selection.is_empty()
    }

    pub fn click(&mut self, at: SeatCoord) -> ToggleOutcome {
        if self.commit_in_flight {
            return ToggleOutcome::Ignored;
        }
        let toggled = toggle_seat(&self.grid, &self.selection, at);
        self.grid = toggled.grid;
        self.selection = toggled.selection;
        toggled.outcome
    }

    /// Новое состояние из подписки. Выбор сбрасывается: он строился на старой сетке.
    /// `true`, если что-то было сброшено.
    pub fn apply_remote(&mut self, update: GridUpdate) -> bool {
        if self.authoritative && update.warning.is_none() && update.version <= self.version {
            debug!("Ignoring stale seat grid v{}", update.version);
            return false;
        }

        self.grid = update.grid;
        self.version = update.version;
        self.authoritative = update.warning.is_none();
        self.warning = update.warning;

        let had_selection = !self.selection.is_empty();
        self.selection.clear();

        if self.checkout_started.take().is_some() && !self.commit_in_flight {
            info!("Seat grid changed during checkout, returning to selection");
            self.navigator.back_to_selection(ReturnReason::GridChanged);
        }
        had_selection
    }

    /// Переход к оплате; запускает таймер удержания.
    pub fn checkout(&mut self, now: Instant) -> Result<Checkout, BookingError> {
        if self.selection.is_empty() {
            return Err(ValidationError::EmptySelection.into());
        }
        let checkout = Checkout {
            selected_seats: self.selection.seats().to_vec(),
            total_price: self.total_price(),
        };
        self.checkout_started = Some(now);
        self.navigator.to_payment(&checkout);
        Ok(checkout)
    }

    /// Локальные проверки и запуск коммита. При ошибке валидации выбор сохраняется.
    pub fn begin_confirm(
        &mut self,
        payer: PayerDetails,
        receipt: Receipt,
    ) -> Result<PendingCommit, BookingError> {
        if self.commit_in_flight {
            return Err(ValidationError::CommitInProgress.into());
        }
        if self.selection.is_empty() {
            return Err(ValidationError::EmptySelection.into());
        }

        let seats = self
            .selection
            .seats()
            .iter()
            .map(|s| s.as_str().to_string())
            .collect();
        let prepared = self.payments.prepare(seats, payer, receipt)?;

        self.commit_in_flight = true;
        Ok(PendingCommit {
            payments: self.payments.clone(),
            prepared,
        })
    }

    /// Итог коммита: выбор сбрасывается в любом случае.
    pub fn finish_confirm(
        &mut self,
        result: Result<CommitReceipt, BookingError>,
    ) -> Result<CommitReceipt, BookingError> {
        self.commit_in_flight = false;
        self.checkout_started = None;
        self.selection.clear();
        self.grid.clear_selected();

        match &result {
            Ok(receipt) => {
                if receipt.version > self.version {
                    self.grid = receipt.grid.clone();
                    self.version = receipt.version;
                }
                self.navigator.show_confirmation(receipt);
            }
            Err(BookingError::Conflict(e)) => {
                warn!("Commit conflict: {}", e);
                self.navigator.back_to_selection(ReturnReason::SeatsTaken);
            }
            Err(e) => warn!("Commit failed: {}", e),
        }
        result
    }

    pub async fn confirm(
        &mut self,
        payer: PayerDetails,
        receipt: Receipt,
    ) -> Result<CommitReceipt, BookingError> {
        let pending = self.begin_confirm(payer, receipt)?;
        let result = pending.run().await;
        self.finish_confirm(result)
    }

    /// Удержание носит рекомендательный характер: на сервере места не держатся.
    pub fn expire_if_idle(&mut self, now: Instant) -> bool {
        let Some(started) = self.checkout_started else {
            return false;
        };
        if self.commit_in_flight || now.saturating_duration_since(started) < self.hold_timeout {
            return false;
        }

        info!("Checkout hold expired, discarding selection {:?}", self.selection.seats());
        self.checkout_started = None;
        self.selection.clear();
        self.grid.clear_selected();
        self.navigator.back_to_selection(ReturnReason::HoldExpired);
        true
    }
}
