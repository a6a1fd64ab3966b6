pub mod seat;
pub mod selection;
pub mod booking;

pub use seat::{SeatCoord, SeatGrid, SeatLabel, SeatStatus, ROW_LABELS};
pub use selection::SelectionSet;
pub use booking::{BookingRecord, BookingStatus, PayerDetails, PayerRules, RecordId};
