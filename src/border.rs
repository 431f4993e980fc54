use opencv::prelude::*;
use opencv::{core, imgproc};

use crate::config::CropMode;
use crate::error::{Result, StitchError};
use crate::inscribed::{LargestInscribedRectangle, MaximalRectangle};
use crate::opencv_compat::foreground_mask;

/// Zero padding added before contour detection.
const PAD: i32 = 2;

/// Crops a mosaic to the largest rectangle free of unpainted pixels.
pub struct BorderCleaner<R = MaximalRectangle> {
    mode: CropMode,
    inscribed: R,
}

impl BorderCleaner<MaximalRectangle> {
    pub fn new(mode: CropMode) -> Self {
        Self {
            mode,
            inscribed: MaximalRectangle,
        }
    }
}

impl Default for BorderCleaner<MaximalRectangle> {
    fn default() -> Self {
        Self::new(CropMode::ShrinkToFit)
    }
}

impl<R: LargestInscribedRectangle> BorderCleaner<R> {
    pub fn with_finder(mode: CropMode, inscribed: R) -> Self {
        Self { mode, inscribed }
    }

    /// Crop rectangle in unpadded mosaic coordinates.
    pub fn crop_rect(&self, mosaic: &Mat) -> Result<core::Rect> {
        let mut padded = Mat::default();
        core::copy_make_border(
            mosaic,
            &mut padded,
            PAD,
            PAD,
            PAD,
            PAD,
            core::BORDER_CONSTANT,
            core::Scalar::all(0.0),
        )?;
        let thresholded = foreground_mask(&padded, 0.0)?;

        let mut contours = core::Vector::<core::Vector<core::Point>>::new();
        imgproc::find_contours(
            &thresholded,
            &mut contours,
            imgproc::RETR_EXTERNAL,
            imgproc::CHAIN_APPROX_SIMPLE,
            core::Point::new(0, 0),
        )?;

        let mut largest: Option<(usize, f64)> = None;
        for (idx, contour) in contours.iter().enumerate() {
            let area = imgproc::contour_area(&contour, false)?;
            if largest.map_or(true, |(_, best)| area > best) {
                largest = Some((idx, area));
            }
        }
        let (largest_idx, _) = largest.ok_or(StitchError::EmptyMosaic)?;
        let contour = contours.get(largest_idx)?;

        let search_mask = match self.mode {
            CropMode::ShrinkToFit => {
                let bounds = imgproc::bounding_rect(&contour)?;
                shrink_to_fit(&thresholded, bounds)?
            }
            CropMode::Interior => {
                // Fill the region, then drop its holes
                let mut region =
                    Mat::zeros(thresholded.rows(), thresholded.cols(), core::CV_8U)?.to_mat()?;
                imgproc::draw_contours(
                    &mut region,
                    &contours,
                    largest_idx as i32,
                    core::Scalar::all(255.0),
                    imgproc::FILLED,
                    imgproc::LINE_8,
                    &core::no_array(),
                    i32::MAX,
                    core::Point::new(0, 0),
                )?;
                let mut solid = Mat::default();
                core::bitwise_and(&region, &thresholded, &mut solid, &core::no_array())?;
                solid
            }
        };

        let rect = self.inscribed.find(&search_mask)?.ok_or(StitchError::EmptyMosaic)?;
        // Back to mosaic coordinates, clipped to the unpadded area
        let x0 = (rect.x - PAD).max(0);
        let y0 = (rect.y - PAD).max(0);
        let x1 = (rect.x + rect.width - PAD).min(mosaic.cols());
        let y1 = (rect.y + rect.height - PAD).min(mosaic.rows());
        if x1 <= x0 || y1 <= y0 {
            return Err(StitchError::EmptyMosaic);
        }
        let rect = core::Rect::new(x0, y0, x1 - x0, y1 - y0);

        log::debug!(
            "Crop rectangle: {}x{} at ({}, {}) of {}x{} mosaic",
            rect.width,
            rect.height,
            rect.x,
            rect.y,
            mosaic.cols(),
            mosaic.rows()
        );
        Ok(rect)
    }

    pub fn crop(&self, mosaic: &Mat) -> Result<Mat> {
        let rect = self.crop_rect(mosaic)?;
        let roi = Mat::roi(mosaic, rect)?;
        let mut cropped = Mat::default();
        roi.copy_to(&mut cropped)?;
        Ok(cropped)
    }
}

/// Erode a filled `bounds` rectangle until none of it lies outside
/// `foreground`. A rectangle that already fits is returned untouched.
fn shrink_to_fit(foreground: &Mat, bounds: core::Rect) -> Result<Mat> {
    let mut rect_mask = Mat::zeros(foreground.rows(), foreground.cols(), core::CV_8U)?.to_mat()?;
    imgproc::rectangle(
        &mut rect_mask,
        bounds,
        core::Scalar::all(255.0),
        imgproc::FILLED,
        imgproc::LINE_8,
        0,
    )?;

    let kernel = Mat::default();
    let mut iterations = 0;
    loop {
        let mut outside = Mat::default();
        core::subtract(&rect_mask, foreground, &mut outside, &core::no_array(), -1)?;
        if core::count_non_zero(&outside)? == 0 || core::count_non_zero(&rect_mask)? == 0 {
            break;
        }
        let mut eroded = Mat::default();
        imgproc::erode_def(&rect_mask, &mut eroded, &kernel)?;
        rect_mask = eroded;
        iterations += 1;
    }

    log::debug!("Bounding box shrunk with {} erosions", iterations);
    Ok(rect_mask)
}
