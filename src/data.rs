//! Contiguous dataset helpers.
//!
//! Samples arrive as one wide row per terrain patch: terrain heights, then the
//! convex-hull edge-point indicators, then the contact-point indicators. This
//! module splits those rows into train/test partitions and per-role matrices,
//! all stored row-major so the training loop can slice batches without copying.

use std::ops::Range;

use crate::{Error, Result};

/// Terrain patch width in cells.
pub const PATCH_WIDTH: usize = 10;
/// Terrain patch height in cells.
pub const PATCH_HEIGHT: usize = 10;
/// Scalars per terrain patch and per indicator vector.
pub const PATCH_LEN: usize = PATCH_WIDTH * PATCH_HEIGHT;

/// Zero moment point, fixed at the centre cell `(x, y)` of every patch.
pub const ZMP: (usize, usize) = (PATCH_WIDTH / 2, PATCH_HEIGHT / 2);

/// A row-major matrix with shape `(len, row_len)`.
#[derive(Debug, Clone, PartialEq)]
pub struct Rows {
    values: Vec<f32>,
    len: usize,
    row_len: usize,
}

impl Rows {
    /// Build rows from a flat buffer with shape `(len, row_len)`.
    pub fn from_flat(values: Vec<f32>, row_len: usize) -> Result<Self> {
        if row_len == 0 {
            return Err(Error::InvalidData("row_len must be > 0".to_owned()));
        }
        if !values.len().is_multiple_of(row_len) {
            return Err(Error::InvalidData(format!(
                "buffer length {} is not divisible by row_len {row_len}",
                values.len()
            )));
        }

        let len = values.len() / row_len;
        Ok(Self {
            values,
            len,
            row_len,
        })
    }

    /// Build rows from per-sample vectors (copied into contiguous storage).
    pub fn from_rows(rows: &[Vec<f32>]) -> Result<Self> {
        let row_len = rows.first().map(Vec::len).unwrap_or(0);
        if row_len == 0 {
            return Err(Error::InvalidData(
                "rows must be non-empty with row_len > 0".to_owned(),
            ));
        }

        let mut values = Vec::with_capacity(rows.len() * row_len);
        for (i, row) in rows.iter().enumerate() {
            if row.len() != row_len {
                return Err(Error::InvalidData(format!(
                    "row {i} has len {}, expected {row_len}",
                    row.len()
                )));
            }
            values.extend_from_slice(row);
        }

        Ok(Self {
            values,
            len: rows.len(),
            row_len,
        })
    }

    #[inline]
    /// Returns the number of rows.
    pub fn len(&self) -> usize {
        self.len
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    #[inline]
    /// Returns the number of columns.
    pub fn row_len(&self) -> usize {
        self.row_len
    }

    #[inline]
    pub fn as_slice(&self) -> &[f32] {
        &self.values
    }

    #[inline]
    /// Returns the `idx`-th row.
    ///
    /// Panics if `idx >= len`.
    pub fn row(&self, idx: usize) -> &[f32] {
        let start = idx * self.row_len;
        &self.values[start..start + self.row_len]
    }

    #[inline]
    /// Contiguous view of rows `range.start..range.end`.
    ///
    /// Panics if the range is out of bounds.
    pub fn window(&self, range: Range<usize>) -> &[f32] {
        &self.values[range.start * self.row_len..range.end * self.row_len]
    }

    /// Copy of columns `range` of every row.
    pub fn columns(&self, range: Range<usize>) -> Result<Rows> {
        if range.start >= range.end || range.end > self.row_len {
            return Err(Error::InvalidShape(format!(
                "column range {}..{} is invalid for row_len {}",
                range.start, range.end, self.row_len
            )));
        }
        let width = range.end - range.start;
        let mut values = Vec::with_capacity(self.len * width);
        for i in 0..self.len {
            values.extend_from_slice(&self.row(i)[range.clone()]);
        }
        Ok(Rows {
            values,
            len: self.len,
            row_len: width,
        })
    }

    /// View the rows as `(len, row_len)`, which must already be the row width.
    ///
    /// Sub-arrays are never re-strided: a matrix whose width is not exactly
    /// `row_len` is rejected instead of being reinterpreted.
    pub fn reshape(self, row_len: usize) -> Result<Rows> {
        if self.row_len != row_len {
            return Err(Error::InvalidShape(format!(
                "cannot reshape rows of width {} to (-1, {row_len})",
                self.row_len
            )));
        }
        Ok(self)
    }

    /// Element-wise [`threshold`].
    pub fn thresholded(&self) -> Rows {
        Rows {
            values: self.values.iter().copied().map(threshold).collect(),
            len: self.len,
            row_len: self.row_len,
        }
    }

    fn split_at(&self, mid: usize) -> (Rows, Rows) {
        let (head, tail) = self.values.split_at(mid * self.row_len);
        (
            Rows {
                values: head.to_vec(),
                len: mid,
                row_len: self.row_len,
            },
            Rows {
                values: tail.to_vec(),
                len: self.len - mid,
                row_len: self.row_len,
            },
        )
    }
}

/// Binarize an indicator value: `v > 0` maps to 1, everything else to 0.
#[inline]
pub fn threshold(v: f32) -> f32 {
    if v > 0.0 { 1.0 } else { 0.0 }
}

/// Split rows into `(train, test)`: the first `floor(len * percent / 100)` rows
/// train, the rest test. Order is preserved.
pub fn split_train_test(rows: &Rows, percent: u32) -> Result<(Rows, Rows)> {
    if percent > 100 {
        return Err(Error::InvalidConfig(format!(
            "train/test split must be in 0..=100 percent, got {percent}"
        )));
    }
    let n_train = rows.len() * percent as usize / 100;
    Ok(rows.split_at(n_train))
}

/// Split every row at the given column boundaries.
///
/// `[100, 200]` on a 300-wide matrix yields columns `0..100`, `100..200` and
/// `200..300`.
pub fn split_by_idxs(rows: &Rows, idxs: &[usize]) -> Result<Vec<Rows>> {
    let mut bounds = Vec::with_capacity(idxs.len() + 2);
    bounds.push(0);
    bounds.extend_from_slice(idxs);
    bounds.push(rows.row_len());

    if bounds.windows(2).any(|w| w[0] >= w[1]) {
        return Err(Error::InvalidShape(format!(
            "class boundaries {idxs:?} must be strictly increasing inside row_len {}",
            rows.row_len()
        )));
    }

    bounds.windows(2).map(|w| rows.columns(w[0]..w[1])).collect()
}

/// Consecutive, non-overlapping batch windows over `len` rows.
///
/// Windows are `[start, start + batch_size)` for every start whose end is
/// strictly below `len`, so a trailing window ending exactly at `len` is never
/// produced, nor is a partial one. Order is fixed; there is no shuffling.
pub fn batch_windows(len: usize, batch_size: usize) -> impl Iterator<Item = Range<usize>> {
    let step = batch_size.max(1);
    (0..len)
        .step_by(step)
        .map(move |start| start..start + step)
        .take_while(move |w| w.end < len)
}

/// One partition (train or test) split into per-role matrices.
#[derive(Debug, Clone)]
pub struct Partition {
    pub terrain: Rows,
    pub edge_pts: Rows,
    pub edge_pts_ones: Rows,
    pub ct_pts: Rows,
    pub ct_pts_ones: Rows,
}

impl Partition {
    /// Split wide sample rows at `class_idxs` into terrain / edge / contact.
    pub fn from_rows(rows: &Rows, class_idxs: &[usize]) -> Result<Self> {
        let parts = split_by_idxs(rows, class_idxs)?;
        let [terrain, edge_pts, ct_pts]: [Rows; 3] = parts.try_into().map_err(|p: Vec<Rows>| {
            Error::InvalidConfig(format!(
                "expected 2 class boundaries producing 3 column groups, got {}",
                p.len()
            ))
        })?;

        let terrain = terrain.reshape(PATCH_LEN)?;
        let edge_pts = edge_pts.reshape(PATCH_LEN)?;
        let ct_pts = ct_pts.reshape(PATCH_LEN)?;

        Ok(Self {
            edge_pts_ones: edge_pts.thresholded(),
            ct_pts_ones: ct_pts.thresholded(),
            terrain,
            edge_pts,
            ct_pts,
        })
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.terrain.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.terrain.is_empty()
    }
}

/// Train and test partitions of a dataset.
#[derive(Debug, Clone)]
pub struct StageData {
    pub train: Partition,
    pub test: Partition,
}

impl StageData {
    pub fn from_rows(rows: &Rows, split_percent: u32, class_idxs: &[usize]) -> Result<Self> {
        let (train, test) = split_train_test(rows, split_percent)?;
        Ok(Self {
            train: Partition::from_rows(&train, class_idxs)?,
            test: Partition::from_rows(&test, class_idxs)?,
        })
    }
}
