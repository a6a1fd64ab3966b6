pub mod booking_log;
pub mod payment;
pub mod reservation;
pub mod selection;
pub mod sync;
pub mod upload;
