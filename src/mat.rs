//! MAT-file input.
//!
//! MATLAB stores matrices column-major; samples come back as row-major [`Rows`]
//! with one sample per row.

use std::fs::File;
use std::io::BufReader;
use std::path::Path;

use matfile::{MatFile, NumericData};
use tracing::{debug, info};

use crate::data::PATCH_LEN;
use crate::{Error, Result, Rows};

/// Read the 2-D numeric array `name` from the MAT file at `path`.
pub fn load_rows<P: AsRef<Path>>(path: P, name: &str) -> Result<Rows> {
    let p = path.as_ref();
    let file = File::open(p).map_err(|e| Error::io(p, e))?;
    let mat = MatFile::parse(BufReader::new(file))
        .map_err(|e| Error::Mat(format!("failed to parse {}: {e:?}", p.display())))?;

    let array = mat
        .find_by_name(name)
        .ok_or_else(|| Error::Mat(format!("array `{name}` not found in {}", p.display())))?;

    let size = array.size();
    if size.len() != 2 {
        return Err(Error::Mat(format!(
            "array `{name}` must be 2-D, got dimensions {size:?}"
        )));
    }
    let (n_rows, n_cols) = (size[0], size[1]);
    let column_major = real_values_f32(array.data())
        .ok_or_else(|| Error::Mat(format!("array `{name}` holds complex values")))?;
    debug!(rows = n_rows, cols = n_cols, "read mat array");

    let rows = rows_from_column_major(&column_major, n_rows, n_cols)?;
    info!(path = %p.display(), samples = rows.len(), width = rows.row_len(), "loaded dataset");
    Ok(rows)
}

/// Check the sample width before any split: each class boundary must leave a
/// full patch behind it.
pub fn check_sample_width(rows: &Rows, class_idxs: &[usize]) -> Result<()> {
    let expected = class_idxs.last().copied().unwrap_or(0) + PATCH_LEN;
    if rows.row_len() != expected {
        return Err(Error::InvalidShape(format!(
            "samples have {} columns, expected {expected} for class boundaries {class_idxs:?}",
            rows.row_len()
        )));
    }
    Ok(())
}

fn real_values_f32(data: &NumericData) -> Option<Vec<f32>> {
    fn conv<T: Copy>(
        real: &[T],
        imag: &Option<Vec<T>>,
        f: impl Fn(T) -> f32,
    ) -> Option<Vec<f32>> {
        if imag.is_some() {
            return None;
        }
        Some(real.iter().map(|&v| f(v)).collect())
    }

    match data {
        NumericData::Double { real, imag } => conv(real, imag, |v| v as f32),
        NumericData::Single { real, imag } => conv(real, imag, |v| v),
        NumericData::Int8 { real, imag } => conv(real, imag, f32::from),
        NumericData::UInt8 { real, imag } => conv(real, imag, f32::from),
        NumericData::Int16 { real, imag } => conv(real, imag, f32::from),
        NumericData::UInt16 { real, imag } => conv(real, imag, f32::from),
        NumericData::Int32 { real, imag } => conv(real, imag, |v| v as f32),
        NumericData::UInt32 { real, imag } => conv(real, imag, |v| v as f32),
        NumericData::Int64 { real, imag } => conv(real, imag, |v| v as f32),
        NumericData::UInt64 { real, imag } => conv(real, imag, |v| v as f32),
    }
}

/// Transpose MATLAB's column-major storage into row-major rows.
pub(crate) fn rows_from_column_major(
    values: &[f32],
    n_rows: usize,
    n_cols: usize,
) -> Result<Rows> {
    if values.len() != n_rows * n_cols {
        return Err(Error::Mat(format!(
            "array holds {} values, expected {n_rows} * {n_cols}",
            values.len()
        )));
    }
    let mut row_major = vec![0.0_f32; values.len()];
    for c in 0..n_cols {
        for r in 0..n_rows {
            row_major[r * n_cols + c] = values[c * n_rows + r];
        }
    }
    Rows::from_flat(row_major, n_cols)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transposes_column_major_storage() {
        // [[1, 2, 3], [4, 5, 6]] in column-major order.
        let rows = rows_from_column_major(&[1.0, 4.0, 2.0, 5.0, 3.0, 6.0], 2, 3).unwrap();
        assert_eq!(rows.row(0), &[1.0, 2.0, 3.0]);
        assert_eq!(rows.row(1), &[4.0, 5.0, 6.0]);
    }

    #[test]
    fn rejects_wrong_value_count() {
        assert!(rows_from_column_major(&[1.0, 2.0], 2, 3).is_err());
    }

    #[test]
    fn sample_width_must_cover_all_classes() {
        let ok = Rows::from_flat(vec![0.0; 300], 300).unwrap();
        assert!(check_sample_width(&ok, &[100, 200]).is_ok());

        let short = Rows::from_flat(vec![0.0; 250], 250).unwrap();
        assert!(matches!(
            check_sample_width(&short, &[100, 200]),
            Err(Error::InvalidShape(_))
        ));
    }

    #[test]
    fn missing_file_is_an_io_error() {
        let err = load_rows("does/not/exist.mat", "data").unwrap_err();
        assert!(matches!(err, Error::Io { .. }));
    }
}
