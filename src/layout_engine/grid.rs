//! Grid placement spec, `rows:cols:x:y:w:h`.

use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::sys::geometry::Rect;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Grid {
    pub rows: u32,
    pub cols: u32,
    pub x: u32,
    pub y: u32,
    pub w: u32,
    pub h: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum GridParseError {
    #[error("expected rows:cols:x:y:w:h, got {0} parts")]
    WrongArity(usize),
    #[error("invalid number: {0}")]
    BadNumber(String),
    #[error("rows, cols, w, and h must be nonzero")]
    ZeroExtent,
}

impl FromStr for Grid {
    type Err = GridParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let parts: Vec<&str> = s.split(':').collect();
        if parts.len() != 6 {
            return Err(GridParseError::WrongArity(parts.len()));
        }
        let mut nums = [0u32; 6];
        for (slot, part) in nums.iter_mut().zip(&parts) {
            *slot = part
                .parse()
                .map_err(|_| GridParseError::BadNumber((*part).to_string()))?;
        }
        let [rows, cols, x, y, w, h] = nums;
        if rows == 0 || cols == 0 || w == 0 || h == 0 {
            return Err(GridParseError::ZeroExtent);
        }
        Ok(Grid { rows, cols, x, y, w, h })
    }
}

impl Grid {
    /// The rectangle spanning `w × h` cells starting at `(x, y)` of a
    /// `rows × cols` subdivision of `bounds`. Out-of-range starts are
    /// clamped into the grid; extents are clamped to the remaining cells.
    pub fn apply(&self, bounds: Rect) -> Rect {
        let cell_w = bounds.size.width / f64::from(self.cols);
        let cell_h = bounds.size.height / f64::from(self.rows);

        let x = self.x.min(self.cols - 1);
        let y = self.y.min(self.rows - 1);
        let w = self.w.min(self.cols - x);
        let h = self.h.min(self.rows - y);

        Rect::new(
            bounds.origin.x + f64::from(x) * cell_w,
            bounds.origin.y + f64::from(y) * cell_h,
            f64::from(w) * cell_w,
            f64::from(h) * cell_h,
        )
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn parses_full_spec() {
        let grid: Grid = "2:3:0:0:1:1".parse().unwrap();
        assert_eq!(grid, Grid { rows: 2, cols: 3, x: 0, y: 0, w: 1, h: 1 });
    }

    #[test]
    fn rejects_too_few_parts() {
        assert_eq!(
            "2:3:0:0:1".parse::<Grid>(),
            Err(GridParseError::WrongArity(5))
        );
    }

    #[test]
    fn rejects_zero_rows() {
        assert_eq!("0:3:0:0:1:1".parse::<Grid>(), Err(GridParseError::ZeroExtent));
    }

    #[test]
    fn rejects_zero_cols() {
        assert_eq!("2:0:0:0:1:1".parse::<Grid>(), Err(GridParseError::ZeroExtent));
    }

    #[test]
    fn rejects_zero_width() {
        assert_eq!("2:3:0:0:0:1".parse::<Grid>(), Err(GridParseError::ZeroExtent));
    }

    #[test]
    fn rejects_zero_height() {
        assert_eq!("2:3:0:0:1:0".parse::<Grid>(), Err(GridParseError::ZeroExtent));
    }

    #[test]
    fn rejects_garbage() {
        assert!(matches!(
            "a:3:0:0:1:1".parse::<Grid>(),
            Err(GridParseError::BadNumber(_))
        ));
    }

    #[test]
    fn applies_cell_selection() {
        let grid: Grid = "2:2:1:0:1:2".parse().unwrap();
        let frame = grid.apply(Rect::new(0.0, 0.0, 1000.0, 800.0));
        // right half, full height
        assert_eq!(frame, Rect::new(500.0, 0.0, 500.0, 800.0));
    }

    #[test]
    fn clamps_out_of_range_extents() {
        let grid: Grid = "2:2:1:1:4:4".parse().unwrap();
        let frame = grid.apply(Rect::new(0.0, 0.0, 1000.0, 800.0));
        assert_eq!(frame, Rect::new(500.0, 400.0, 500.0, 400.0));
    }
}
