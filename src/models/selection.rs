use serde::Serialize;

use super::SeatLabel;

/// Локальный выбор одной сессии: уникальные метки, не больше `max_seats`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SelectionSet {
    seats: Vec<SeatLabel>,
    #[serde(skip)]
    max_seats: usize,
}

impl SelectionSet {
    pub fn new(max_seats: usize) -> Self {
        Self {
            seats: Vec::with_capacity(max_seats),
            max_seats,
        }
    }

    pub fn max_seats(&self) -> usize {
        self.max_seats
    }

    pub fn len(&self) -> usize {
        self.seats.len()
    }

    pub fn is_empty(&self) -> bool {
        self.seats.is_empty()
    }

    pub fn is_full(&self) -> bool {
        self.seats.len() >= self.max_seats
    }

    pub fn contains(&self, label: &SeatLabel) -> bool {
        self.seats.contains(label)
    }

    /// Метки в порядке выбора.
    pub fn seats(&self) -> &[SeatLabel] {
        &self.seats
    }

    /// `false`, если место уже выбрано или лимит исчерпан.
    pub(crate) fn insert(&mut self, label: SeatLabel) -> bool {
        if self.is_full() || self.contains(&label) {
            return false;
        }
        self.seats.push(label);
        true
    }

    pub(crate) fn remove(&mut self, label: &SeatLabel) -> bool {
        let before = self.seats.len();
        self.seats.retain(|s| s != label);
        before != self.seats.len()
    }

    pub fn clear(&mut self) {
        self.seats.clear();
    }
}
