//! Accumulation of pairwise homographies into one mosaic frame.

use opencv::core::Size;

use crate::config::CanvasSize;
use crate::error::{Degenerate, Result, StitchError};
use crate::homography::Homography;

/// Slack absorbed before rounding extents up, so that an estimate of
/// `240.0000001` still yields a 240px canvas.
const EXTENT_EPSILON: f64 = 1e-6;

/// Turns pairwise transforms into global ones.
///
/// `pairwise[k]` maps image `k + 1` into the frame of image `k`. The result
/// has one entry per image; entry 0 is the identity and entry `i` is
/// "apply `pairwise[i - 1]`, then `global[i - 1]`".
pub fn accumulate(pairwise: &[Homography]) -> Result<Vec<Homography>> {
    let mut global = Vec::with_capacity(pairwise.len() + 1);
    let mut current = Homography::identity();
    global.push(current);

    for (k, step) in pairwise.iter().enumerate() {
        current = step.then(&current).ok_or(StitchError::DegenerateHomography {
            pair: (k, k + 1),
            reason: Degenerate::Singular,
        })?;
        global.push(current);
    }
    Ok(global)
}

/// Axis-aligned extent of an image of `size` after `transform`, as
/// `(min_x, min_y, max_x, max_y)` in canvas pixels.
pub fn projected_extent(size: Size, transform: &Homography) -> Option<(f64, f64, f64, f64)> {
    let (w, h) = (size.width as f64, size.height as f64);
    let corners = [(0.0, 0.0), (w, 0.0), (0.0, h), (w, h)];

    let mut extent = (f64::INFINITY, f64::INFINITY, f64::NEG_INFINITY, f64::NEG_INFINITY);
    for (x, y) in corners {
        let (px, py) = transform.transform_point(x, y)?;
        extent.0 = extent.0.min(px);
        extent.1 = extent.1.min(py);
        extent.2 = extent.2.max(px);
        extent.3 = extent.3.max(py);
    }
    Some(extent)
}

/// Smallest origin-anchored canvas holding every warped image, clamped to
/// `max_side` on each axis. Content at negative coordinates is not covered.
pub fn canvas_bounds(sizes: &[Size], transforms: &[Homography], max_side: i32) -> CanvasSize {
    let mut rows = 1i32;
    let mut cols = 1i32;

    for (size, transform) in sizes.iter().zip(transforms) {
        match projected_extent(*size, transform) {
            Some((_, _, max_x, max_y)) => {
                cols = cols.max(clamp_side((max_x - EXTENT_EPSILON).ceil(), max_side));
                rows = rows.max(clamp_side((max_y - EXTENT_EPSILON).ceil(), max_side));
            }
            None => {
                log::warn!("Image corner maps to infinity, canvas clamped to {}px", max_side);
                cols = max_side;
                rows = max_side;
            }
        }
    }

    if rows == max_side || cols == max_side {
        log::warn!("Canvas size clamped to {}x{}", rows, cols);
    }
    CanvasSize::new(rows, cols)
}

/// Pixel offset `(left, top)` that moves every projected corner to
/// non-negative coordinates. `(0, 0)` when nothing lands left of or above
/// the origin; each side is clamped to `max_side`.
pub fn origin_offset(sizes: &[Size], transforms: &[Homography], max_side: i32) -> (i32, i32) {
    let mut min_x = 0.0f64;
    let mut min_y = 0.0f64;
    for (size, transform) in sizes.iter().zip(transforms) {
        if let Some((x, y, _, _)) = projected_extent(*size, transform) {
            min_x = min_x.min(x);
            min_y = min_y.min(y);
        }
    }
    let left = clamp_offset((-min_x - EXTENT_EPSILON).ceil(), max_side);
    let top = clamp_offset((-min_y - EXTENT_EPSILON).ceil(), max_side);
    if left > 0 || top > 0 {
        log::info!(
            "Content extends to ({:.1}, {:.1}), shifting origin by ({}, {})",
            min_x,
            min_y,
            left,
            top
        );
    }
    (left, top)
}

/// Append the `(left, top)` origin shift to every transform.
pub fn shift_all(transforms: &[Homography], left: i32, top: i32) -> Result<Vec<Homography>> {
    let shift = Homography::translation(left as f64, top as f64);
    transforms
        .iter()
        .enumerate()
        .map(|(i, h)| {
            h.then(&shift).ok_or(StitchError::DegenerateHomography {
                pair: (i.saturating_sub(1), i),
                reason: Degenerate::Singular,
            })
        })
        .collect()
}

fn clamp_offset(value: f64, max_side: i32) -> i32 {
    if !value.is_finite() || value >= max_side as f64 {
        max_side
    } else {
        (value as i32).max(0)
    }
}

fn clamp_side(value: f64, max_side: i32) -> i32 {
    if !value.is_finite() || value >= max_side as f64 {
        max_side
    } else {
        (value as i32).max(1)
    }
}
