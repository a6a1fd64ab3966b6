//! Выбор мест одной сессией. Чистая функция: только локальное состояние,
//! общее хранилище не затрагивается.

use crate::models::{SeatCoord, SeatGrid, SeatLabel, SeatStatus, SelectionSet};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ToggleOutcome {
    Selected(SeatLabel),
    Released(SeatLabel),
    /// Разметка, занятое место или координаты вне сетки
    Ignored,
    /// Лимит выбора исчерпан - показать пользователю
    CapacityReached { max_seats: usize },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Toggled {
    pub grid: SeatGrid,
    pub selection: SelectionSet,
    pub outcome: ToggleOutcome,
}

/// Клик по ячейке `(row, col)`: `(grid, selection, at) -> (grid', selection')`.
pub fn toggle_seat(grid: &SeatGrid, selection: &SelectionSet, at: SeatCoord) -> Toggled {
    let mut next_grid = grid.clone();
    let mut next_selection = selection.clone();

    let outcome = match (grid.status(at), at.label()) {
        (Some(SeatStatus::Available), Some(label)) => {
            if next_selection.insert(label.clone()) {
                next_grid.set_status(at, SeatStatus::Selected);
                ToggleOutcome::Selected(label)
            } else if next_selection.is_full() {
                ToggleOutcome::CapacityReached {
                    max_seats: next_selection.max_seats(),
                }
            } else {
                ToggleOutcome::Ignored
            }
        }
        (Some(SeatStatus::Selected), Some(label)) => {
            next_grid.set_status(at, SeatStatus::Available);
            next_selection.remove(&label);
            ToggleOutcome::Released(label)
        }
        _ => ToggleOutcome::Ignored,
    };

    Toggled {
        grid: next_grid,
        selection: next_selection,
        outcome,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn click(grid: &mut SeatGrid, sel: &mut SelectionSet, row: usize, col: usize) -> ToggleOutcome {
        let t = toggle_seat(grid, sel, SeatCoord::new(row, col));
        *grid = t.grid;
        *sel = t.selection;
        t.outcome
    }

    #[test]
    fn select_then_release() {
        let mut grid = SeatGrid::canonical();
        let mut sel = SelectionSet::new(5);

        assert!(matches!(click(&mut grid, &mut sel, 2, 2), ToggleOutcome::Selected(l) if l.as_str() == "B3"));
        assert_eq!(grid.status(SeatCoord::new(2, 2)), Some(SeatStatus::Selected));
        assert_eq!(sel.len(), 1);

        assert!(matches!(click(&mut grid, &mut sel, 2, 2), ToggleOutcome::Released(_)));
        assert_eq!(grid, SeatGrid::canonical());
        assert!(sel.is_empty());
    }

    #[test]
    fn inert_cells_are_ignored() {
        let mut grid = SeatGrid::canonical();
        grid.set_status(SeatCoord::new(3, 0), SeatStatus::Booked);
        let mut rows = grid.rows().to_vec();
        rows[4][8] = SeatStatus::Walkway;
        let grid = SeatGrid::from_rows(rows);
        let sel = SelectionSet::new(5);

        for at in [SeatCoord::new(3, 0), SeatCoord::new(4, 8), SeatCoord::new(0, 6), SeatCoord::new(99, 0)] {
            let t = toggle_seat(&grid, &sel, at);
            assert_eq!(t.outcome, ToggleOutcome::Ignored);
            assert_eq!(t.grid, grid);
            assert_eq!(t.selection, sel);
        }
    }

    #[test]
    fn capacity_is_a_no_op_with_notice() {
        let mut grid = SeatGrid::canonical();
        let mut sel = SelectionSet::new(2);
        click(&mut grid, &mut sel, 1, 0);
        click(&mut grid, &mut sel, 1, 1);

        let t = toggle_seat(&grid, &sel, SeatCoord::new(1, 2));
        assert_eq!(t.outcome, ToggleOutcome::CapacityReached { max_seats: 2 });
        assert_eq!(t.grid, grid);
        assert_eq!(t.selection, sel);
    }

    proptest! {
        #[test]
        fn selection_never_exceeds_cap(
            max in 1usize..8,
            clicks in proptest::collection::vec((0usize..21, 0usize..17), 0..60),
        ) {
            let mut grid = SeatGrid::canonical();
            let mut sel = SelectionSet::new(max);
            for (row, col) in clicks {
                let before = (grid.clone(), sel.clone());
                let at = SeatCoord::new(row, col);
                let was = grid.status(at);
                let outcome = click(&mut grid, &mut sel, row, col);

                prop_assert!(sel.len() <= max);
                prop_assert_eq!(grid.count(SeatStatus::Selected), sel.len());
                match outcome {
                    ToggleOutcome::CapacityReached { .. } | ToggleOutcome::Ignored => {
                        prop_assert_eq!(&(grid.clone(), sel.clone()), &before);
                    }
                    ToggleOutcome::Released(_) => {
                        prop_assert_eq!(was, Some(SeatStatus::Selected));
                        prop_assert_eq!(grid.status(at), Some(SeatStatus::Available));
                        prop_assert_eq!(sel.len() + 1, before.1.len());
                    }
                    ToggleOutcome::Selected(_) => {
                        prop_assert_eq!(sel.len(), before.1.len() + 1);
                    }
                }
            }
        }
    }
}
