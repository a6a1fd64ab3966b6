//! error.rs
//!
//! Таксономия ошибок бронирования. Все ошибки хранилищ и сети перехватываются
//! на границе компонента и превращаются в один из четырёх видов:
//!
//! 1.  **Validation**: некорректная сетка, метка места, данные плательщика или чек.
//!     Исправляется пользователем на месте.
//! 2.  **Conflict**: место уже занято к моменту коммита. Нужно сбросить выбор
//!     и выбрать заново.
//! 3.  **Transport**: хранилище или загрузка чека недоступны. Повтор только по
//!     инициативе пользователя.
//! 4.  **Invariant**: повреждена форма сетки или нарушена связка "места + запись".

use thiserror::Error;

use crate::models::SeatLabel;

/// Ошибки валидации: локально исправимы, пользователю показываем причину.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("seat grid payload is malformed: {0}")]
    MalformedGrid(String),
    #[error("`{0}` is not a valid seat label")]
    InvalidSeatLabel(String),
    #[error("seat `{0}` does not exist in this venue")]
    InvalidSeat(String),
    #[error("seat `{0}` is listed more than once")]
    DuplicateSeat(String),
    #[error("no seats selected")]
    EmptySelection,
    #[error("a booking is already being confirmed")]
    CommitInProgress,
    #[error("at most {max} seats can be booked at once, got {requested}")]
    TooManySeats { requested: usize, max: usize },
    #[error("invalid payer details: {0}")]
    InvalidPayer(String),
    #[error("receipt is missing")]
    MissingReceipt,
    #[error("receipt is {size} bytes, the limit is {limit} bytes")]
    ReceiptTooLarge { size: usize, limit: usize },
    #[error("receipt must be an image, got `{0}`")]
    UnsupportedReceiptType(String),
}

/// Конфликт: кто-то успел забронировать места раньше.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("seats are no longer available: {}", join_labels(.seats))]
pub struct ConflictError {
    pub seats: Vec<SeatLabel>,
}

/// Сбой доставки: хранилище или хостинг чеков недоступны.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    #[error("seat store unavailable: {0}")]
    Store(String),
    #[error("receipt upload failed: {0}")]
    UploadFailed(String),
    #[error("receipt upload temporarily disabled after repeated failures")]
    CircuitOpen,
    #[error("seat grid kept changing during commit after {attempts} attempts")]
    Contention { attempts: u32 },
}

/// Нарушение инварианта: локально не исправляется.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum InvariantViolation {
    #[error("seat grid shape does not match the venue layout: {0}")]
    GridShape(String),
    #[error("seats {} are booked without a booking record", join_labels(.seats))]
    OrphanedSeats { seats: Vec<SeatLabel> },
    #[error("booking record key `{0}` already exists")]
    DuplicateRecordKey(String),
}

/// Общая ошибка ядра бронирования, которую видит слой представления.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BookingError {
    #[error(transparent)]
    Validation(#[from] ValidationError),
    #[error(transparent)]
    Conflict(#[from] ConflictError),
    #[error(transparent)]
    Transport(#[from] TransportError),
    #[error(transparent)]
    Invariant(#[from] InvariantViolation),
}

impl BookingError {
    /// Может ли пользователь повторить действие вручную без изменения ввода.
    pub fn is_retriable(&self) -> bool {
        matches!(self, BookingError::Transport(_))
    }

    /// Текст для пользователя. Для transport/invariant без подробностей.
    pub fn user_message(&self) -> String {
        match self {
            BookingError::Validation(e) => e.to_string(),
            BookingError::Conflict(e) => format!(
                "{}. Your selection was cleared, please pick your seats again.",
                e
            ),
            BookingError::Transport(_) | BookingError::Invariant(_) => {
                "Something went wrong while booking. Please reload the page and try again."
                    .to_string()
            }
        }
    }
}

/// Ошибки бэкендов хранилища. Наружу компонентов не выходят.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("redis error: {0}")]
    Redis(#[from] redis::RedisError),
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("record `{0}` already exists")]
    KeyExists(String),
    #[error("store unavailable: {0}")]
    Unavailable(String),
}

impl From<StoreError> for TransportError {
    fn from(e: StoreError) -> Self {
        TransportError::Store(e.to_string())
    }
}

impl From<StoreError> for BookingError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::KeyExists(id) => InvariantViolation::DuplicateRecordKey(id).into(),
            other => TransportError::from(other).into(),
        }
    }
}

fn join_labels(seats: &[SeatLabel]) -> String {
    seats
        .iter()
        .map(SeatLabel::as_str)
        .collect::<Vec<_>>()
        .join(", ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn conflict_message_lists_seats() {
        let err = BookingError::from(ConflictError {
            seats: vec![SeatLabel::new_unchecked("B3"), SeatLabel::new_unchecked("B5")],
        });
        assert_eq!(err.to_string(), "seats are no longer available: B3, B5");
        assert!(err.user_message().contains("pick your seats again"));
        assert!(!err.is_retriable());
    }

    #[test]
    fn transport_and_invariant_hide_details_from_users() {
        let transport = BookingError::from(TransportError::Store("connection refused".into()));
        let invariant = BookingError::from(InvariantViolation::GridShape("row 3".into()));
        assert!(transport.is_retriable());
        assert!(!transport.user_message().contains("refused"));
        assert_eq!(transport.user_message(), invariant.user_message());
    }

    #[test]
    fn existing_key_maps_to_invariant_violation() {
        let err = BookingError::from(StoreError::KeyExists("abc".into()));
        assert_eq!(
            err,
            BookingError::Invariant(InvariantViolation::DuplicateRecordKey("abc".into()))
        );
    }
}
