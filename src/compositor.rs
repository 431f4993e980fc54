use opencv::prelude::*;
use opencv::{core, imgproc};

use crate::config::CanvasSize;
use crate::error::Result;
use crate::homography::Homography;
use crate::opencv_compat::foreground_mask;

/// Output buffer shared by all images of one pipeline run.
///
/// The first image composited becomes the base: its footprint is recorded
/// and later images never overwrite it.
pub struct Canvas {
    pixels: Mat,
    base: Option<Mat>,
}

impl Canvas {
    /// All-zero (unpainted) canvas of the given OpenCV type, e.g. `CV_8UC3`.
    pub fn new(size: CanvasSize, typ: i32) -> Result<Self> {
        let pixels =
            Mat::new_rows_cols_with_default(size.rows, size.cols, typ, core::Scalar::all(0.0))?;
        Ok(Self { pixels, base: None })
    }

    pub fn size(&self) -> CanvasSize {
        CanvasSize::new(self.pixels.rows(), self.pixels.cols())
    }

    pub fn pixels(&self) -> &Mat {
        &self.pixels
    }

    /// `CV_8U` footprint of the base image, if one has been painted.
    pub fn base_mask(&self) -> Option<&Mat> {
        self.base.as_ref()
    }

    pub fn into_mosaic(self) -> Mat {
        self.pixels
    }

    /// Extend the canvas right and down with unpainted pixels. Never shrinks.
    pub fn grow_to(self, size: CanvasSize) -> Result<Self> {
        let current = self.size();
        let bottom = (size.rows - current.rows).max(0);
        let right = (size.cols - current.cols).max(0);
        self.pad(0, 0, bottom, right)
    }

    /// Insert `left` columns and `top` rows of unpainted pixels before the
    /// current content. Painted pixels move by `(left, top)`.
    pub fn shift_origin(self, left: i32, top: i32) -> Result<Self> {
        self.pad(top.max(0), left.max(0), 0, 0)
    }

    fn pad(self, top: i32, left: i32, bottom: i32, right: i32) -> Result<Self> {
        if top == 0 && left == 0 && bottom == 0 && right == 0 {
            return Ok(self);
        }

        let current = self.size();
        log::debug!(
            "Growing canvas {}x{} -> {}x{}",
            current.rows,
            current.cols,
            current.rows + top + bottom,
            current.cols + left + right
        );
        let pixels = pad_zero(&self.pixels, top, left, bottom, right)?;
        let base = match self.base {
            Some(mask) => Some(pad_zero(&mask, top, left, bottom, right)?),
            None => None,
        };
        Ok(Self { pixels, base })
    }
}

fn pad_zero(src: &Mat, top: i32, left: i32, bottom: i32, right: i32) -> opencv::Result<Mat> {
    let mut dst = Mat::default();
    core::copy_make_border(
        src,
        &mut dst,
        top,
        bottom,
        left,
        right,
        core::BORDER_CONSTANT,
        core::Scalar::all(0.0),
    )?;
    Ok(dst)
}

/// Warps images onto a [`Canvas`] and merges them by precedence, never by
/// blending.
#[derive(Debug, Clone, Copy)]
pub struct CanvasCompositor {
    mask_threshold: f64,
}

impl CanvasCompositor {
    pub fn new(mask_threshold: f64) -> Self {
        Self { mask_threshold }
    }

    /// Warp `image` through `transform` into canvas coordinates.
    /// Pixels whose source falls outside `image` stay zero.
    pub fn warp(&self, image: &Mat, transform: &Homography, size: CanvasSize) -> Result<Mat> {
        let mut warped = Mat::default();
        imgproc::warp_perspective(
            image,
            &mut warped,
            &transform.to_mat()?,
            size.to_cv(),
            imgproc::INTER_LINEAR,
            core::BORDER_CONSTANT,
            core::Scalar::all(0.0),
        )?;
        Ok(warped)
    }

    /// `CV_8U` mask of canvas pixels whose every interpolation tap lies
    /// inside `image`. Edge pixels mixed with the zero border are excluded.
    pub fn coverage(&self, image: &Mat, transform: &Homography, size: CanvasSize) -> Result<Mat> {
        let full = Mat::new_rows_cols_with_default(
            image.rows(),
            image.cols(),
            core::CV_8U,
            core::Scalar::all(255.0),
        )?;
        let warped = self.warp(&full, transform, size)?;
        let mut inside = Mat::default();
        imgproc::threshold(&warped, &mut inside, 254.0, 255.0, imgproc::THRESH_BINARY)?;
        Ok(inside)
    }

    /// Paint `image` onto `canvas`.
    ///
    /// The first image paints its whole footprint and becomes the base,
    /// whatever its colours. A later image paints where it fully covers the
    /// destination, its sample is foreground, and the pixel lies outside the
    /// base footprint; elsewhere the canvas keeps what it had.
    pub fn composite(&self, canvas: Canvas, image: &Mat, transform: &Homography) -> Result<Canvas> {
        let Canvas { mut pixels, base } = canvas;
        let size = CanvasSize::new(pixels.rows(), pixels.cols());

        let warped = self.warp(image, transform, size)?;
        let covered = self.coverage(image, transform, size)?;

        let (paint, base) = match base {
            Some(base_mask) => {
                let foreground = foreground_mask(&warped, self.mask_threshold)?;
                let mut incoming = Mat::default();
                core::bitwise_and(&covered, &foreground, &mut incoming, &core::no_array())?;
                let mut outside_base = Mat::default();
                core::bitwise_not(&base_mask, &mut outside_base, &core::no_array())?;
                let mut paint = Mat::default();
                core::bitwise_and(&incoming, &outside_base, &mut paint, &core::no_array())?;
                (paint, base_mask)
            }
            None => (covered.clone(), covered),
        };

        warped.copy_to_masked(&mut pixels, &paint)?;
        log::debug!(
            "Composited {} pixels onto {}x{} canvas",
            core::count_non_zero(&paint)?,
            size.rows,
            size.cols
        );

        Ok(Canvas { pixels, base: Some(base) })
    }
}

impl Default for CanvasCompositor {
    fn default() -> Self {
        Self::new(1.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use opencv::core::{Rect, Scalar, Vec3b};

    fn solid(rows: i32, cols: i32, bgr: [f64; 3]) -> opencv::Result<Mat> {
        let color = Scalar::new(bgr[0], bgr[1], bgr[2], 0.0);
        Mat::new_rows_cols_with_default(rows, cols, core::CV_8UC3, color)
    }

    fn px(m: &Mat, row: i32, col: i32) -> opencv::Result<[u8; 3]> {
        let p = m.at_2d::<Vec3b>(row, col)?;
        Ok([p[0], p[1], p[2]])
    }

    #[test]
    fn test_first_image_paints_and_becomes_base() -> Result<()> {
        let compositor = CanvasCompositor::default();
        let canvas = Canvas::new(CanvasSize::new(50, 120), core::CV_8UC3)?;
        assert!(canvas.base_mask().is_none());

        let img = solid(50, 50, [200.0, 10.0, 10.0])?;
        let canvas = compositor.composite(canvas, &img, &Homography::identity())?;

        assert_eq!(px(canvas.pixels(), 25, 25)?, [200, 10, 10]);
        assert_eq!(px(canvas.pixels(), 25, 80)?, [0, 0, 0]);
        let base = canvas.base_mask().unwrap();
        assert_eq!(core::count_non_zero(base)?, 50 * 50);
        Ok(())
    }

    #[test]
    fn test_base_image_wins_inside_its_footprint() -> Result<()> {
        let compositor = CanvasCompositor::default();
        let canvas = Canvas::new(CanvasSize::new(60, 150), core::CV_8UC3)?;

        let base = solid(60, 100, [255.0, 0.0, 0.0])?;
        let second = solid(60, 100, [0.0, 0.0, 255.0])?;

        let canvas = compositor.composite(canvas, &base, &Homography::identity())?;
        let shifted = Homography::translation(40.0, 0.0);
        let canvas = compositor.composite(canvas, &second, &shifted)?;
        let mosaic = canvas.into_mosaic();

        // Every pixel of the base footprint is still the base colour
        let base_region = Mat::roi(&mosaic, Rect::new(0, 0, 100, 60))?;
        for row in 0..60 {
            for col in 0..100 {
                assert_eq!(*base_region.at_2d::<Vec3b>(row, col)?, Vec3b::from([255, 0, 0]));
            }
        }
        // The second image only fills what the base left unpainted
        assert_eq!(px(&mosaic, 30, 120)?, [0, 0, 255]);
        assert_eq!(px(&mosaic, 30, 135)?, [0, 0, 255]);
        Ok(())
    }

    #[test]
    fn test_dark_base_pixels_are_kept() -> Result<()> {
        let compositor = CanvasCompositor::default();
        let canvas = Canvas::new(CanvasSize::new(60, 150), core::CV_8UC3)?;

        // Near-black base with a pure black block in the overlap
        let mut base = solid(60, 100, [1.0, 1.0, 1.0])?;
        imgproc::rectangle(
            &mut base,
            Rect::new(50, 10, 30, 20),
            Scalar::all(0.0),
            imgproc::FILLED,
            imgproc::LINE_8,
            0,
        )?;
        let second = solid(60, 100, [0.0, 180.0, 0.0])?;

        let canvas = compositor.composite(canvas, &base, &Homography::identity())?;
        assert_eq!(core::count_non_zero(canvas.base_mask().unwrap())?, 60 * 100);
        let shifted = Homography::translation(40.0, 0.0);
        let canvas = compositor.composite(canvas, &second, &shifted)?;
        let mosaic = canvas.into_mosaic();

        for row in 0..60 {
            for col in 0..100 {
                let expected = *base.at_2d::<Vec3b>(row, col)?;
                assert_eq!(*mosaic.at_2d::<Vec3b>(row, col)?, expected, "({}, {})", row, col);
            }
        }
        assert_eq!(px(&mosaic, 30, 120)?, [0, 180, 0]);
        Ok(())
    }

    #[test]
    fn test_subpixel_edges_leave_no_dark_seam() -> Result<()> {
        let compositor = CanvasCompositor::default();
        let canvas = Canvas::new(CanvasSize::new(40, 200), core::CV_8UC3)?;
        let (left, right) = ([10u8, 200, 10], [200u8, 10, 200]);

        let base = solid(40, 40, [90.0, 90.0, 90.0])?;
        let canvas = compositor.composite(canvas, &base, &Homography::identity())?;
        let first = solid(40, 60, [10.0, 200.0, 10.0])?;
        let canvas = compositor.composite(canvas, &first, &Homography::translation(50.0, 0.0))?;
        let second = solid(40, 60, [200.0, 10.0, 200.0])?;
        let canvas = compositor.composite(canvas, &second, &Homography::translation(89.5, 0.0))?;
        let mosaic = canvas.into_mosaic();

        // Column 89 is only half covered by the second image
        assert_eq!(px(&mosaic, 20, 89)?, left);
        assert_eq!(px(&mosaic, 20, 90)?, right);
        for col in 50..=147 {
            let p = px(&mosaic, 20, col)?;
            assert!(p == left || p == right, "column {} is {:?}", col, p);
        }
        // Last column of the second image straddles its edge
        assert_eq!(px(&mosaic, 20, 149)?, [0, 0, 0]);
        Ok(())
    }

    #[test]
    fn test_later_images_overwrite_non_base_pixels() -> Result<()> {
        let compositor = CanvasCompositor::default();
        let canvas = Canvas::new(CanvasSize::new(40, 200), core::CV_8UC3)?;
        let images = [
            (solid(40, 60, [10.0, 200.0, 10.0])?, 0.0),
            (solid(40, 60, [0.0, 0.0, 200.0])?, 50.0),
            (solid(40, 60, [200.0, 0.0, 200.0])?, 90.0),
        ];

        let mut canvas = canvas;
        for (img, dx) in &images {
            canvas = compositor.composite(canvas, img, &Homography::translation(*dx, 0.0))?;
        }
        let mosaic = canvas.into_mosaic();

        assert_eq!(px(&mosaic, 20, 55)?, [10, 200, 10]);
        assert_eq!(px(&mosaic, 20, 70)?, [0, 0, 200]);
        // Overlap of the second and third image goes to the newcomer
        assert_eq!(px(&mosaic, 20, 100)?, [200, 0, 200]);
        assert_eq!(px(&mosaic, 20, 160)?, [0, 0, 0]);
        Ok(())
    }

    #[test]
    fn test_grow_keeps_pixels_and_base() -> Result<()> {
        let compositor = CanvasCompositor::default();
        let canvas = Canvas::new(CanvasSize::new(30, 30), core::CV_8UC3)?;
        let img = solid(30, 30, [50.0, 60.0, 70.0])?;
        let canvas = compositor.composite(canvas, &img, &Homography::identity())?;

        let canvas = canvas.grow_to(CanvasSize::new(40, 80))?;
        assert_eq!(canvas.size(), CanvasSize::new(40, 80));
        assert_eq!(px(canvas.pixels(), 10, 10)?, [50, 60, 70]);
        assert_eq!(px(canvas.pixels(), 35, 60)?, [0, 0, 0]);
        assert_eq!(core::count_non_zero(canvas.base_mask().unwrap())?, 900);

        // Smaller request is a no-op
        let canvas = canvas.grow_to(CanvasSize::new(10, 10))?;
        assert_eq!(canvas.size(), CanvasSize::new(40, 80));
        Ok(())
    }

    #[test]
    fn test_shift_origin_moves_content_and_base() -> Result<()> {
        let compositor = CanvasCompositor::default();
        let canvas = Canvas::new(CanvasSize::new(30, 30), core::CV_8UC3)?;
        let img = solid(30, 30, [50.0, 60.0, 70.0])?;
        let canvas = compositor.composite(canvas, &img, &Homography::identity())?;

        let canvas = canvas.shift_origin(20, 5)?;
        assert_eq!(canvas.size(), CanvasSize::new(35, 50));
        assert_eq!(px(canvas.pixels(), 2, 10)?, [0, 0, 0]);
        assert_eq!(px(canvas.pixels(), 5, 20)?, [50, 60, 70]);
        let base = canvas.base_mask().unwrap();
        assert_eq!(*base.at_2d::<u8>(5, 20)?, 255);
        assert_eq!(*base.at_2d::<u8>(4, 20)?, 0);
        Ok(())
    }
}
