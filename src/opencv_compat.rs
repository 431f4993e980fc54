//! OpenCV compatibility wrappers for cross-version support.
//!
//! OpenCV 4.11+ added `AlgorithmHint` to `cvt_color` and friends, and the
//! opencv crate generates different signatures depending on the installed
//! headers. The `_def` variants use OpenCV's defaults for the extra
//! parameters and exist on every supported version.

use opencv::core::{self, ToInputArray, ToOutputArray};
use opencv::prelude::*;
use opencv::{imgproc, Result};

/// Wrapper for `imgproc::cvt_color` with the default `dst_cn` and hint.
pub fn cvt_color(src: &impl ToInputArray, dst: &mut impl ToOutputArray, code: i32) -> Result<()> {
    imgproc::cvt_color_def(src, dst, code)
}

/// Grayscale view of an 8-bit image with 1, 3 (BGR) or 4 (BGRA) channels.
pub fn to_gray(img: &Mat) -> Result<Mat> {
    let mut gray = Mat::default();
    match img.channels() {
        3 => cvt_color(img, &mut gray, imgproc::COLOR_BGR2GRAY)?,
        4 => cvt_color(img, &mut gray, imgproc::COLOR_BGRA2GRAY)?,
        _ => gray = img.clone(),
    }
    Ok(gray)
}

/// Binary `CV_8U` mask (0 / 255) of pixels where any channel exceeds `thresh`.
///
/// Thresholding each channel separately keeps dark but non-black colours
/// (e.g. pure blue at low intensity) that a grayscale conversion would round
/// down to zero.
pub fn foreground_mask(img: &Mat, thresh: f64) -> Result<Mat> {
    let mut channels = core::Vector::<Mat>::new();
    core::split(img, &mut channels)?;

    let mut mask = Mat::zeros(img.rows(), img.cols(), core::CV_8U)?.to_mat()?;
    for channel in channels.iter() {
        let mut binary = Mat::default();
        imgproc::threshold(&channel, &mut binary, thresh, 255.0, imgproc::THRESH_BINARY)?;
        let mut merged = Mat::default();
        core::bitwise_or(&mask, &binary, &mut merged, &core::no_array())?;
        mask = merged;
    }
    Ok(mask)
}

#[cfg(test)]
mod tests {
    use super::*;
    use opencv::core::{Rect, Scalar};

    #[test]
    fn test_foreground_mask_keeps_dark_colors() -> Result<()> {
        let mut img = Mat::new_rows_cols_with_default(10, 10, core::CV_8UC3, Scalar::all(0.0))?;
        imgproc::rectangle(
            &mut img,
            Rect::new(0, 0, 5, 10),
            Scalar::new(2.0, 0.0, 0.0, 0.0),
            imgproc::FILLED,
            imgproc::LINE_8,
            0,
        )?;

        let mask = foreground_mask(&img, 0.0)?;
        assert_eq!(*mask.at_2d::<u8>(5, 2)?, 255);
        assert_eq!(*mask.at_2d::<u8>(5, 7)?, 0);
        assert_eq!(core::count_non_zero(&mask)?, 50);

        // The same pixels vanish in a grayscale conversion.
        let gray = to_gray(&img)?;
        assert_eq!(*gray.at_2d::<u8>(5, 2)?, 0);
        Ok(())
    }
}
