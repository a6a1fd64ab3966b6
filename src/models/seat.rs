use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

use crate::error::{InvariantViolation, ValidationError};

/// Метки рядов: ряд 0 - передний, дальше A..Z.
pub const ROW_LABELS: [&str; 27] = [
    "0", "A", "B", "C", "D", "E", "F", "G", "H", "I", "J", "K", "L", "M", "N", "O", "P", "Q",
    "R", "S", "T", "U", "V", "W", "X", "Y", "Z",
];

/// Размеры зала по умолчанию: передний ряд + 20 обычных, по 17 ячеек.
pub const DEFAULT_ROWS: usize = 21;
pub const DEFAULT_ROW_LENGTH: usize = 17;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SeatStatus {
    Available,
    Selected,
    Booked,
    Gap,
    Walkway,
}

impl SeatStatus {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "available" => Some(Self::Available),
            "selected" => Some(Self::Selected),
            "booked" => Some(Self::Booked),
            "gap" => Some(Self::Gap),
            "walkway" => Some(Self::Walkway),
            _ => None,
        }
    }

    /// Места, которые вообще можно продать (gap/walkway - только разметка).
    pub fn is_sellable(self) -> bool {
        !matches!(self, Self::Gap | Self::Walkway)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SeatCoord {
    pub row: usize,
    pub col: usize,
}

impl SeatCoord {
    pub fn new(row: usize, col: usize) -> Self {
        Self { row, col }
    }

    /// Метка без проверки границ конкретного зала. `None` только если у ряда нет буквы.
    pub fn label(self) -> Option<SeatLabel> {
        ROW_LABELS
            .get(self.row)
            .map(|row| SeatLabel(format!("{}{}", row, self.col + 1)))
    }
}

/// Человекочитаемая метка места: буква ряда + номер колонки с единицы (`B3`).
///
/// Приходит по сети как произвольная строка, поэтому десериализация проверяет синтаксис.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct SeatLabel(String);

impl SeatLabel {
    /// Разбирает метку и возвращает координаты без привязки к размерам зала.
    pub fn parse(raw: &str) -> Result<(Self, SeatCoord), ValidationError> {
        let invalid = || ValidationError::InvalidSeatLabel(raw.to_string());

        let mut chars = raw.chars();
        let row_char = chars.next().ok_or_else(invalid)?;
        let number = chars.as_str();

        let row = ROW_LABELS
            .iter()
            .position(|label| label.chars().eq(std::iter::once(row_char)))
            .ok_or_else(invalid)?;

        // Только цифры, без ведущих нулей: иначе "B03" и "B3" были бы одним местом
        if number.is_empty()
            || number.starts_with('0')
            || !number.bytes().all(|b| b.is_ascii_digit())
        {
            return Err(invalid());
        }
        let col: u16 = number.parse().map_err(|_| invalid())?;

        let coord = SeatCoord::new(row, usize::from(col) - 1);
        Ok((Self(raw.to_string()), coord))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    #[cfg(test)]
    pub(crate) fn new_unchecked(raw: &str) -> Self {
        Self(raw.to_string())
    }
}

impl TryFrom<String> for SeatLabel {
    type Error = ValidationError;

    fn try_from(raw: String) -> Result<Self, Self::Error> {
        SeatLabel::parse(&raw).map(|(label, _)| label)
    }
}

impl From<SeatLabel> for String {
    fn from(label: SeatLabel) -> Self {
        label.0
    }
}

impl fmt::Display for SeatLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Сетка статусов мест. Форма сетки неизменна на всё время события,
/// меняются только статусы продаваемых ячеек.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SeatGrid {
    rows: Vec<Vec<SeatStatus>>,
}

impl SeatGrid {
    pub fn from_rows(rows: Vec<Vec<SeatStatus>>) -> Self {
        Self { rows }
    }

    /// Каноническая раскладка зала.
    pub fn canonical() -> Self {
        use SeatStatus::{Available as A, Gap as G};

        let mut front = vec![A; DEFAULT_ROW_LENGTH];
        front[4..13].fill(G);

        let mut standard = vec![A; DEFAULT_ROW_LENGTH];
        standard[8] = G;

        let mut rows = Vec::with_capacity(DEFAULT_ROWS);
        rows.push(front);
        rows.extend(std::iter::repeat(standard).take(DEFAULT_ROWS - 1));
        Self { rows }
    }

    /// Проверка "сырых" данных из хранилища: массив массивов строк из закрытого набора.
    pub fn is_valid(value: &Value) -> bool {
        Self::from_value(value).is_ok()
    }

    pub fn from_value(value: &Value) -> Result<Self, ValidationError> {
        let malformed = |msg: String| ValidationError::MalformedGrid(msg);

        let rows = value
            .as_array()
            .ok_or_else(|| malformed("expected an array of rows".into()))?;

        let rows = rows
            .iter()
            .enumerate()
            .map(|(r, row)| {
                let cells = row
                    .as_array()
                    .ok_or_else(|| malformed(format!("row {} is not an array", r)))?;
                cells
                    .iter()
                    .enumerate()
                    .map(|(c, cell)| {
                        cell.as_str()
                            .and_then(SeatStatus::parse)
                            .ok_or_else(|| malformed(format!("cell ({}, {}) has unknown status", r, c)))
                    })
                    .collect::<Result<Vec<_>, _>>()
            })
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self { rows })
    }

    pub fn to_value(&self) -> Value {
        serde_json::to_value(self).unwrap_or(Value::Null)
    }

    pub fn rows(&self) -> &[Vec<SeatStatus>] {
        &self.rows
    }

    pub fn row_count(&self) -> usize {
        self.rows.len()
    }

    pub fn status(&self, at: SeatCoord) -> Option<SeatStatus> {
        self.rows.get(at.row).and_then(|row| row.get(at.col)).copied()
    }

    /// Меняет статус продаваемой ячейки. Разметку (gap/walkway) не трогает.
    pub(crate) fn set_status(&mut self, at: SeatCoord, status: SeatStatus) -> bool {
        match self.rows.get_mut(at.row).and_then(|row| row.get_mut(at.col)) {
            Some(cell) if cell.is_sellable() && status.is_sellable() => {
                *cell = status;
                true
            }
            _ => false,
        }
    }

    pub fn label_of(&self, at: SeatCoord) -> Result<SeatLabel, ValidationError> {
        self.status(at)
            .and_then(|_| at.label())
            .ok_or_else(|| ValidationError::InvalidSeat(format!("({}, {})", at.row, at.col)))
    }

    /// Обратное к `label_of`. Метка приходит по сети, поэтому границы проверяем явно.
    pub fn locate(&self, label: &str) -> Result<SeatCoord, ValidationError> {
        let (_, coord) = SeatLabel::parse(label)?;
        match self.rows.get(coord.row) {
            Some(row) if coord.col < row.len() => Ok(coord),
            _ => Err(ValidationError::InvalidSeatLabel(label.to_string())),
        }
    }

    /// Сравнивает форму с раскладкой зала: число рядов, их длины и позиции разметки.
    pub fn conforms_to(&self, layout: &SeatGrid) -> Result<(), InvariantViolation> {
        if self.rows.len() != layout.rows.len() {
            return Err(InvariantViolation::GridShape(format!(
                "expected {} rows, found {}",
                layout.rows.len(),
                self.rows.len()
            )));
        }

        for (r, (row, expected)) in self.rows.iter().zip(&layout.rows).enumerate() {
            if row.len() != expected.len() {
                return Err(InvariantViolation::GridShape(format!(
                    "row {} has {} cells, expected {}",
                    r,
                    row.len(),
                    expected.len()
                )));
            }
            for (c, (cell, want)) in row.iter().zip(expected).enumerate() {
                if cell.is_sellable() != want.is_sellable()
                    || (!cell.is_sellable() && cell != want)
                {
                    return Err(InvariantViolation::GridShape(format!(
                        "cell ({}, {}) is {:?}, layout has {:?}",
                        r, c, cell, want
                    )));
                }
            }
        }
        Ok(())
    }

    /// Снимает все локальные отметки `selected`.
    pub fn clear_selected(&mut self) {
        for cell in self.rows.iter_mut().flatten() {
            if *cell == SeatStatus::Selected {
                *cell = SeatStatus::Available;
            }
        }
    }

    pub fn count(&self, status: SeatStatus) -> usize {
        self.rows.iter().flatten().filter(|c| **c == status).count()
    }

    pub fn row_labels(&self) -> Vec<&'static str> {
        ROW_LABELS.iter().take(self.rows.len()).copied().collect()
    }
}

impl Default for SeatGrid {
    fn default() -> Self {
        Self::canonical()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use serde_json::json;

    #[test]
    fn canonical_layout_matches_venue() {
        let grid = SeatGrid::canonical();
        assert_eq!(grid.row_count(), 21);
        assert!(grid.rows().iter().all(|row| row.len() == 17));

        let front = &grid.rows()[0];
        assert!(front[..4].iter().all(|c| *c == SeatStatus::Available));
        assert!(front[4..13].iter().all(|c| *c == SeatStatus::Gap));
        assert!(front[13..].iter().all(|c| *c == SeatStatus::Available));

        for row in &grid.rows()[1..] {
            for (c, cell) in row.iter().enumerate() {
                let want = if c == 8 { SeatStatus::Gap } else { SeatStatus::Available };
                assert_eq!(*cell, want);
            }
        }
    }

    #[test]
    fn is_valid_rejects_foreign_payloads() {
        assert!(SeatGrid::is_valid(&json!([["available", "gap"], ["booked"]])));
        assert!(SeatGrid::is_valid(&SeatGrid::canonical().to_value()));
        assert!(!SeatGrid::is_valid(&json!({"seats": []})));
        assert!(!SeatGrid::is_valid(&json!([["available", "sold"]])));
        assert!(!SeatGrid::is_valid(&json!([["available"], "gap"])));
        assert!(!SeatGrid::is_valid(&json!([[1, 2]])));
    }

    #[test]
    fn labels_follow_row_sequence() {
        let grid = SeatGrid::canonical();
        assert_eq!(grid.label_of(SeatCoord::new(0, 0)).unwrap().as_str(), "01");
        assert_eq!(grid.label_of(SeatCoord::new(2, 2)).unwrap().as_str(), "B3");
        assert_eq!(grid.label_of(SeatCoord::new(20, 16)).unwrap().as_str(), "T17");
        assert!(grid.label_of(SeatCoord::new(21, 0)).is_err());
    }

    #[test]
    fn locate_guards_against_out_of_range_labels() {
        let grid = SeatGrid::canonical();
        assert_eq!(grid.locate("B3").unwrap(), SeatCoord::new(2, 2));
        for bad in ["Z99", "U1", "B18", "B0", "B03", "b3", "", "B", "B-1", "B3x", "AA1", "B99999"] {
            assert_eq!(
                grid.locate(bad),
                Err(ValidationError::InvalidSeatLabel(bad.to_string())),
                "label {:?}",
                bad
            );
        }
    }

    #[test]
    fn labels_deserialize_only_when_well_formed() {
        let ok: Vec<SeatLabel> = serde_json::from_value(json!(["B3", "01"])).unwrap();
        assert_eq!(ok.len(), 2);
        assert!(serde_json::from_value::<Vec<SeatLabel>>(json!(["B3", "3B"])).is_err());
    }

    #[test]
    fn conforms_to_detects_shape_changes() {
        let layout = SeatGrid::canonical();

        let mut booked = layout.clone();
        assert!(booked.set_status(SeatCoord::new(3, 3), SeatStatus::Booked));
        assert!(booked.conforms_to(&layout).is_ok());

        let mut short = layout.rows().to_vec();
        short.pop();
        assert!(SeatGrid::from_rows(short).conforms_to(&layout).is_err());

        let mut moved_gap = layout.rows().to_vec();
        moved_gap[5][8] = SeatStatus::Available;
        moved_gap[5][9] = SeatStatus::Gap;
        assert!(SeatGrid::from_rows(moved_gap).conforms_to(&layout).is_err());

        let mut walkway = layout.rows().to_vec();
        walkway[5][8] = SeatStatus::Walkway;
        assert!(SeatGrid::from_rows(walkway).conforms_to(&layout).is_err());
    }

    #[test]
    fn set_status_never_touches_markup_cells() {
        let mut grid = SeatGrid::canonical();
        assert!(!grid.set_status(SeatCoord::new(1, 8), SeatStatus::Booked));
        assert!(!grid.set_status(SeatCoord::new(1, 0), SeatStatus::Gap));
        assert!(!grid.set_status(SeatCoord::new(40, 0), SeatStatus::Booked));
        assert_eq!(grid, SeatGrid::canonical());
    }

    proptest! {
        #[test]
        fn label_round_trip(row in 0usize..21, col in 0usize..17) {
            let grid = SeatGrid::canonical();
            let at = SeatCoord::new(row, col);
            let label = grid.label_of(at).unwrap();
            prop_assert_eq!(grid.locate(label.as_str()).unwrap(), at);
        }

        #[test]
        fn locate_never_panics(raw in "\\PC{0,8}") {
            let _ = SeatGrid::canonical().locate(&raw);
        }
    }
}
