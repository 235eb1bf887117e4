//! Exact backtracking solver for the 9×9 Sudoku constraint puzzle.

mod board;

pub use board::Board;

use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum SolveError {
    #[error("board has no valid completion")]
    Unsolvable,
}

/// Solve a board by backtracking over its empty cells.
///
/// A board whose pre-filled digits already conflict in a row, column, or
/// 3×3 box is rejected as unsolvable rather than "solved" incorrectly.
/// An already-complete valid board is returned unchanged.
pub fn solve(board: &Board) -> Result<Board, SolveError> {
    if board.has_conflict() {
        return Err(SolveError::Unsolvable);
    }
    let mut work = *board;
    if solve_from(&mut work) {
        Ok(work)
    } else {
        Err(SolveError::Unsolvable)
    }
}

fn solve_from(board: &mut Board) -> bool {
    let (row, col) = match board.find_empty() {
        Some(pos) => pos,
        None => return true,
    };

    for digit in 1..=9 {
        if board.placement_valid(digit, row, col) {
            board.set(row, col, digit);
            if solve_from(board) {
                return true;
            }
            board.set(row, col, 0);
        }
    }
    false
}

/// Cells that were empty in `original` and are filled in `solved`.
///
/// Everything else is 0, so the result can be rendered as an overlay that
/// is visually distinct from the digits that were recognized in the frame.
pub fn diff_new_digits(original: &Board, solved: &Board) -> Board {
    let mut diff = Board::new();
    for row in 0..9 {
        for col in 0..9 {
            if original.get(row, col) == 0 && solved.get(row, col) != 0 {
                diff.set(row, col, solved.get(row, col));
            }
        }
    }
    diff
}

#[cfg(test)]
mod tests {
    use super::*;

    const PUZZLE: &str =
        "530070000600195000098000060800060003400803001700020006060000280000419005000080079";
    const SOLUTION: &str =
        "534678912672195348198342567859761423426853791713924856961537284287419635345286179";

    fn assert_fully_valid(board: &Board) {
        for row in 0..9 {
            let mut seen = [false; 10];
            for col in 0..9 {
                let d = board.get(row, col) as usize;
                assert!((1..=9).contains(&d), "cell ({row},{col}) out of range");
                assert!(!seen[d], "digit {d} repeated in row {row}");
                seen[d] = true;
            }
        }
        for col in 0..9 {
            let mut seen = [false; 10];
            for row in 0..9 {
                let d = board.get(row, col) as usize;
                assert!(!seen[d], "digit {d} repeated in column {col}");
                seen[d] = true;
            }
        }
        for box_row in (0..9).step_by(3) {
            for box_col in (0..9).step_by(3) {
                let mut seen = [false; 10];
                for r in box_row..box_row + 3 {
                    for c in box_col..box_col + 3 {
                        let d = board.get(r, c) as usize;
                        assert!(!seen[d], "digit {d} repeated in box ({box_row},{box_col})");
                        seen[d] = true;
                    }
                }
            }
        }
    }

    #[test]
    fn test_empty_board_solves_to_valid_grid() {
        let solved = solve(&Board::new()).expect("empty board is solvable");
        assert!(solved.is_full());
        assert_fully_valid(&solved);
    }

    #[test]
    fn test_canonical_puzzle_has_known_solution() {
        let puzzle = Board::from_string(PUZZLE).unwrap();
        let expected = Board::from_string(SOLUTION).unwrap();
        assert_eq!(solve(&puzzle).unwrap(), expected);
    }

    #[test]
    fn test_solved_board_returned_unchanged() {
        let solved = Board::from_string(SOLUTION).unwrap();
        assert_eq!(solve(&solved).unwrap(), solved);
    }

    #[test]
    fn test_duplicate_givens_rejected() {
        let mut board = Board::new();
        board.set(3, 2, 7);
        board.set(3, 6, 7);
        assert_eq!(solve(&board), Err(SolveError::Unsolvable));
    }

    #[test]
    fn test_contradiction_without_duplicates_rejected() {
        // Row 0 holds 1..8 in columns 0..8; the 9 needed at (0,8) is blocked
        // by the 9 already sitting in its column. No pair of givens conflicts.
        let mut board = Board::new();
        for col in 0..8 {
            board.set(0, col, col as u8 + 1);
        }
        board.set(1, 8, 9);
        assert!(!board.has_conflict());
        assert_eq!(solve(&board), Err(SolveError::Unsolvable));
    }

    #[test]
    fn test_diff_new_digits_laws() {
        let puzzle = Board::from_string(PUZZLE).unwrap();
        let solved = solve(&puzzle).unwrap();
        let diff = diff_new_digits(&puzzle, &solved);

        for row in 0..9 {
            for col in 0..9 {
                if puzzle.get(row, col) != 0 {
                    assert_eq!(diff.get(row, col), 0);
                } else {
                    assert_eq!(diff.get(row, col), solved.get(row, col));
                }
            }
        }
    }

    #[test]
    fn test_diff_of_board_with_itself_is_empty() {
        let solved = Board::from_string(SOLUTION).unwrap();
        assert_eq!(diff_new_digits(&solved, &solved), Board::new());
    }
}
