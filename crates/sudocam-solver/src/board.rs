use serde::{Deserialize, Serialize};
use std::fmt;

/// A 9×9 puzzle state. 0 means empty/unrecognized, 1..=9 is a placed digit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Board {
    cells: [[u8; 9]; 9],
}

impl Board {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_rows(cells: [[u8; 9]; 9]) -> Self {
        Self { cells }
    }

    /// Parse an 81-character board string, row-major. '0' and '.' are empty.
    /// Returns `None` on wrong length or characters outside '0'..='9' / '.'.
    pub fn from_string(s: &str) -> Option<Self> {
        let chars: Vec<char> = s.chars().collect();
        if chars.len() != 81 {
            return None;
        }
        let mut board = Self::default();
        for (i, c) in chars.iter().enumerate() {
            let digit = match c {
                '.' => 0,
                '0'..='9' => *c as u8 - b'0',
                _ => return None,
            };
            board.cells[i / 9][i % 9] = digit;
        }
        Some(board)
    }

    #[inline]
    pub fn get(&self, row: usize, col: usize) -> u8 {
        self.cells[row][col]
    }

    #[inline]
    pub fn set(&mut self, row: usize, col: usize, digit: u8) {
        self.cells[row][col] = digit;
    }

    pub fn rows(&self) -> &[[u8; 9]; 9] {
        &self.cells
    }

    pub fn empty_count(&self) -> usize {
        self.cells
            .iter()
            .flatten()
            .filter(|&&d| d == 0)
            .count()
    }

    pub fn is_full(&self) -> bool {
        self.empty_count() == 0
    }

    /// First empty cell in row-major order.
    pub(crate) fn find_empty(&self) -> Option<(usize, usize)> {
        for row in 0..9 {
            for col in 0..9 {
                if self.cells[row][col] == 0 {
                    return Some((row, col));
                }
            }
        }
        None
    }

    /// Whether `digit` can be placed at `(row, col)` without violating the
    /// row, column, or 3×3 box constraint. The cell itself is ignored so the
    /// check also works for already-placed digits.
    pub(crate) fn placement_valid(&self, digit: u8, row: usize, col: usize) -> bool {
        for i in 0..9 {
            if i != col && self.cells[row][i] == digit {
                return false;
            }
            if i != row && self.cells[i][col] == digit {
                return false;
            }
        }
        let box_row = row / 3 * 3;
        let box_col = col / 3 * 3;
        for r in box_row..box_row + 3 {
            for c in box_col..box_col + 3 {
                if (r, c) != (row, col) && self.cells[r][c] == digit {
                    return false;
                }
            }
        }
        true
    }

    /// Whether any pre-filled digit violates a row, column, or box constraint.
    pub fn has_conflict(&self) -> bool {
        for row in 0..9 {
            for col in 0..9 {
                let digit = self.cells[row][col];
                if digit != 0 && !self.placement_valid(digit, row, col) {
                    return true;
                }
            }
        }
        false
    }
}

impl fmt::Display for Board {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for row in &self.cells {
            for (i, digit) in row.iter().enumerate() {
                if i > 0 {
                    write!(f, " ")?;
                }
                if *digit == 0 {
                    write!(f, ".")?;
                } else {
                    write!(f, "{}", digit)?;
                }
            }
            writeln!(f)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_string_round_trip() {
        let s = "530070000600195000098000060800060003400803001700020006060000280000419005000080079";
        let board = Board::from_string(s).expect("valid board string");
        assert_eq!(board.get(0, 0), 5);
        assert_eq!(board.get(0, 1), 3);
        assert_eq!(board.get(8, 8), 9);
        assert_eq!(board.empty_count(), 51);
    }

    #[test]
    fn test_from_string_rejects_bad_input() {
        assert!(Board::from_string("123").is_none());
        assert!(Board::from_string(&"x".repeat(81)).is_none());
    }

    #[test]
    fn test_conflict_detection() {
        let mut board = Board::new();
        board.set(0, 0, 5);
        board.set(0, 8, 5);
        assert!(board.has_conflict());

        let mut board = Board::new();
        board.set(0, 0, 5);
        board.set(8, 0, 5);
        assert!(board.has_conflict());

        let mut board = Board::new();
        board.set(0, 0, 5);
        board.set(2, 2, 5);
        assert!(board.has_conflict());

        let mut board = Board::new();
        board.set(0, 0, 5);
        board.set(4, 4, 5);
        assert!(!board.has_conflict());
    }
}
