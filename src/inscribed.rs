use opencv::core::Rect;
use opencv::prelude::*;

use crate::error::Result;

/// Finds the largest axis-aligned rectangle made only of non-zero pixels
/// of a single-channel `CV_8U` mask.
pub trait LargestInscribedRectangle {
    /// `None` when the mask has no non-zero pixel.
    fn find(&self, mask: &Mat) -> Result<Option<Rect>>;
}

/// Row-by-row histogram sweep, O(rows * cols).
///
/// Ties are broken toward the rectangle found first: topmost bottom edge,
/// then leftmost.
#[derive(Debug, Clone, Copy, Default)]
pub struct MaximalRectangle;

impl LargestInscribedRectangle for MaximalRectangle {
    fn find(&self, mask: &Mat) -> Result<Option<Rect>> {
        let rows = mask.rows();
        let cols = mask.cols() as usize;
        let mut heights = vec![0i32; cols];
        let mut best: Option<(i64, Rect)> = None;

        for row in 0..rows {
            let line = mask.at_row::<u8>(row)?;
            for (h, &v) in heights.iter_mut().zip(line) {
                *h = if v != 0 { *h + 1 } else { 0 };
            }
            if let Some((area, rect)) = largest_in_histogram(&heights, row) {
                if best.map_or(true, |(best_area, _)| area > best_area) {
                    best = Some((area, rect));
                }
            }
        }
        Ok(best.map(|(_, rect)| rect))
    }
}

/// Largest rectangle under `heights`, whose bars end on `bottom_row`.
fn largest_in_histogram(heights: &[i32], bottom_row: i32) -> Option<(i64, Rect)> {
    let mut stack: Vec<usize> = Vec::with_capacity(heights.len());
    let mut best: Option<(i64, Rect)> = None;

    for i in 0..=heights.len() {
        let current = if i < heights.len() { heights[i] } else { 0 };
        while let Some(&top) = stack.last() {
            if heights[top] <= current {
                break;
            }
            stack.pop();
            let height = heights[top];
            let left = stack.last().map_or(0, |&s| s + 1);
            let width = (i - left) as i32;
            let area = height as i64 * width as i64;
            if area > 0 && best.map_or(true, |(a, _)| area > a) {
                best = Some((area, Rect::new(left as i32, bottom_row - height + 1, width, height)));
            }
        }
        stack.push(i);
    }
    best
}
