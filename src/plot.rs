//! PNG overlays comparing predictions with ground truth.
//!
//! Each sample is drawn as a 10×10 patch: the background matrix as grayscale,
//! ground-truth points outlined in green, predictions as red squares whose
//! intensity follows the predicted value, and the ZMP cell marked in blue.

use std::path::Path;

use image::{Rgb, RgbImage};

use crate::data::{PATCH_HEIGHT, PATCH_LEN, PATCH_WIDTH};
use crate::{Error, Result, Rows};

/// Pixels per patch cell.
pub const CELL_PX: u32 = 12;
/// Samples drawn side by side in one image.
pub const MAX_SAMPLES: usize = 8;

const GAP_PX: u32 = CELL_PX;
const TRUTH: Rgb<u8> = Rgb([40, 200, 60]);
const ZMP_MARK: Rgb<u8> = Rgb([50, 90, 230]);

/// Render up to [`MAX_SAMPLES`] rows starting at `first`.
pub fn render_overlay(
    background: &Rows,
    truth: &Rows,
    pred: &Rows,
    zmp: (usize, usize),
    first: usize,
) -> Result<RgbImage> {
    for (name, rows) in [("background", background), ("truth", truth), ("pred", pred)] {
        if rows.row_len() != PATCH_LEN {
            return Err(Error::InvalidShape(format!(
                "{name} rows have width {}, expected {PATCH_LEN}",
                rows.row_len()
            )));
        }
    }
    if truth.len() != background.len() || pred.len() != background.len() {
        return Err(Error::InvalidData(format!(
            "plot inputs disagree on sample count: {} / {} / {}",
            background.len(),
            truth.len(),
            pred.len()
        )));
    }
    if first >= background.len() {
        return Err(Error::InvalidData(format!(
            "first sample {first} out of range for {} samples",
            background.len()
        )));
    }

    let count = (background.len() - first).min(MAX_SAMPLES);
    let patch_w = PATCH_WIDTH as u32 * CELL_PX;
    let patch_h = PATCH_HEIGHT as u32 * CELL_PX;
    let mut img = RgbImage::from_pixel(
        count as u32 * (patch_w + GAP_PX) - GAP_PX,
        patch_h,
        Rgb([255, 255, 255]),
    );

    for s in 0..count {
        let idx = first + s;
        let x0 = s as u32 * (patch_w + GAP_PX);
        draw_patch(
            &mut img,
            x0,
            background.row(idx),
            truth.row(idx),
            pred.row(idx),
            zmp,
        );
    }
    Ok(img)
}

/// Render and write a PNG, creating parent directories.
pub fn save_overlay<P: AsRef<Path>>(
    path: P,
    background: &Rows,
    truth: &Rows,
    pred: &Rows,
    zmp: (usize, usize),
    first: usize,
) -> Result<()> {
    let img = render_overlay(background, truth, pred, zmp, first)?;
    let p = path.as_ref();
    if let Some(parent) = p.parent().filter(|d| !d.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent).map_err(|e| Error::io(parent, e))?;
    }
    img.save(p)?;
    Ok(())
}

fn draw_patch(
    img: &mut RgbImage,
    x0: u32,
    background: &[f32],
    truth: &[f32],
    pred: &[f32],
    zmp: (usize, usize),
) {
    let (lo, hi) = background
        .iter()
        .fold((f32::INFINITY, f32::NEG_INFINITY), |(lo, hi), &v| {
            (lo.min(v), hi.max(v))
        });
    let span = if hi > lo { hi - lo } else { 1.0 };

    for cy in 0..PATCH_HEIGHT {
        for cx in 0..PATCH_WIDTH {
            let i = cy * PATCH_WIDTH + cx;
            let cell_x = x0 + cx as u32 * CELL_PX;
            let cell_y = cy as u32 * CELL_PX;

            let g = (40.0 + 180.0 * (background[i] - lo) / span) as u8;
            fill(img, cell_x, cell_y, CELL_PX, Rgb([g, g, g]));

            let p = pred[i].clamp(0.0, 1.0);
            if p > 0.05 {
                let r = (80.0 + 175.0 * p) as u8;
                fill(img, cell_x + 3, cell_y + 3, CELL_PX - 6, Rgb([r, 30, 30]));
            }
            if truth[i] > 0.0 {
                outline(img, cell_x, cell_y, CELL_PX, TRUTH);
            }
            if (cx, cy) == zmp {
                fill(img, cell_x + 4, cell_y + 4, CELL_PX - 8, ZMP_MARK);
            }
        }
    }
}

fn fill(img: &mut RgbImage, x: u32, y: u32, size: u32, color: Rgb<u8>) {
    for yy in y..y + size {
        for xx in x..x + size {
            if xx < img.width() && yy < img.height() {
                img.put_pixel(xx, yy, color);
            }
        }
    }
}

fn outline(img: &mut RgbImage, x: u32, y: u32, size: u32, color: Rgb<u8>) {
    let last = size - 1;
    for t in 0..size {
        for (xx, yy) in [(x + t, y), (x + t, y + last), (x, y + t), (x + last, y + t)] {
            if xx < img.width() && yy < img.height() {
                img.put_pixel(xx, yy, color);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::ZMP;

    fn rows(n: usize, v: f32) -> Rows {
        Rows::from_flat(vec![v; n * PATCH_LEN], PATCH_LEN).unwrap()
    }

    #[test]
    fn overlay_has_one_patch_per_sample() {
        let img = render_overlay(&rows(3, 0.0), &rows(3, 1.0), &rows(3, 0.9), ZMP, 0).unwrap();
        let patch = PATCH_WIDTH as u32 * CELL_PX;
        assert_eq!(img.width(), 3 * patch + 2 * GAP_PX);
        assert_eq!(img.height(), PATCH_HEIGHT as u32 * CELL_PX);

        // Cell (0, 0): green truth outline at its corner.
        assert_eq!(*img.get_pixel(0, 0), TRUTH);
        // ZMP marker at the centre of cell (5, 5).
        let c = 5 * CELL_PX + CELL_PX / 2;
        assert_eq!(*img.get_pixel(c, c), ZMP_MARK);
    }

    #[test]
    fn overlay_caps_sample_count() {
        let img = render_overlay(&rows(20, 0.0), &rows(20, 0.0), &rows(20, 0.0), ZMP, 4).unwrap();
        let patch = PATCH_WIDTH as u32 * CELL_PX;
        assert_eq!(img.width(), MAX_SAMPLES as u32 * (patch + GAP_PX) - GAP_PX);
    }

    #[test]
    fn overlay_rejects_mismatched_inputs() {
        assert!(render_overlay(&rows(2, 0.0), &rows(3, 0.0), &rows(2, 0.0), ZMP, 0).is_err());
        assert!(render_overlay(&rows(2, 0.0), &rows(2, 0.0), &rows(2, 0.0), ZMP, 2).is_err());
    }

    #[test]
    fn save_writes_a_png() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("plots/overlay.png");
        save_overlay(&path, &rows(1, 0.2), &rows(1, 0.0), &rows(1, 0.7), ZMP, 0).unwrap();
        assert!(path.exists());
    }
}
