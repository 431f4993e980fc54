use nalgebra::{Matrix3, Vector3};
use opencv::prelude::*;
use opencv::{calib3d, core};

use crate::error::{Degenerate, Result};
use crate::features::Correspondence;

const SINGULAR_EPS: f64 = 1e-12;

/// Inlier reprojection distance, in source pixels, used unless configured.
pub const DEFAULT_REPROJ_THRESHOLD: f64 = 5.0;

/// Projective 3x3 transform, normalised so that `h[(2, 2)] == 1`.
///
/// Singular or non-finite matrices are never represented by this type.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Homography(Matrix3<f64>);

impl Homography {
    pub fn identity() -> Self {
        Self(Matrix3::identity())
    }

    pub fn translation(tx: f64, ty: f64) -> Self {
        Self(Matrix3::new(1.0, 0.0, tx, 0.0, 1.0, ty, 0.0, 0.0, 1.0))
    }

    pub fn from_matrix(m: Matrix3<f64>) -> Option<Self> {
        if m.iter().any(|v| !v.is_finite()) {
            return None;
        }
        let scale = m[(2, 2)];
        if scale.abs() < SINGULAR_EPS {
            return None;
        }
        let normalized = m / scale;
        if normalized.determinant().abs() < SINGULAR_EPS {
            return None;
        }
        Some(Self(normalized))
    }

    pub fn matrix(&self) -> &Matrix3<f64> {
        &self.0
    }

    /// "Apply `self`, then `next`", i.e. `next · self`.
    pub fn then(&self, next: &Homography) -> Option<Homography> {
        Self::from_matrix(next.0 * self.0)
    }

    pub fn inverse(&self) -> Option<Homography> {
        self.0.try_inverse().and_then(Self::from_matrix)
    }

    pub fn transform_point(&self, x: f64, y: f64) -> Option<(f64, f64)> {
        let p = self.0 * Vector3::new(x, y, 1.0);
        if p[2].abs() < SINGULAR_EPS {
            return None;
        }
        Some((p[0] / p[2], p[1] / p[2]))
    }

    /// Reads a 3x3 `CV_64F` matrix as returned by `find_homography`.
    /// An empty `Mat` yields `None`.
    pub fn from_mat(mat: &Mat) -> opencv::Result<Option<Self>> {
        if mat.empty() || mat.rows() != 3 || mat.cols() != 3 {
            return Ok(None);
        }
        let mut m = Matrix3::zeros();
        for r in 0..3 {
            for c in 0..3 {
                m[(r, c)] = *mat.at_2d::<f64>(r as i32, c as i32)?;
            }
        }
        Ok(Self::from_matrix(m))
    }

    pub fn to_mat(&self) -> opencv::Result<Mat> {
        let m = &self.0;
        let rows = [
            [m[(0, 0)], m[(0, 1)], m[(0, 2)]],
            [m[(1, 0)], m[(1, 1)], m[(1, 2)]],
            [m[(2, 0)], m[(2, 1)], m[(2, 2)]],
        ];
        Mat::from_slice_2d(&rows[..])
    }
}

impl Default for Homography {
    fn default() -> Self {
        Self::identity()
    }
}

/// Outcome of a single robust fit. Callers must handle `Err` before using
/// the transform.
pub type Fit = std::result::Result<Homography, Degenerate>;

/// Fits a projective transform mapping `query` points onto `reference` points.
pub trait HomographyEstimator {
    fn estimate(&self, correspondences: &[Correspondence]) -> Result<Fit>;
}

/// RANSAC homography via `calib3d::find_homography`.
#[derive(Debug, Clone, Copy)]
pub struct RansacEstimator {
    reproj_threshold: f64,
}

impl RansacEstimator {
    pub fn new(reproj_threshold: f64) -> Self {
        Self { reproj_threshold }
    }

    pub fn threshold(&self) -> f64 {
        self.reproj_threshold
    }
}

impl Default for RansacEstimator {
    fn default() -> Self {
        Self::new(DEFAULT_REPROJ_THRESHOLD)
    }
}

impl HomographyEstimator for RansacEstimator {
    fn estimate(&self, correspondences: &[Correspondence]) -> Result<Fit> {
        if correspondences.len() < 4 {
            return Ok(Err(Degenerate::TooFewCorrespondences {
                found: correspondences.len(),
            }));
        }

        let mut src_pts = core::Vector::<core::Point2f>::new();
        let mut dst_pts = core::Vector::<core::Point2f>::new();
        for c in correspondences {
            src_pts.push(c.query);
            dst_pts.push(c.reference);
        }

        let mut inliers = Mat::default();
        let h = calib3d::find_homography(
            &src_pts,
            &dst_pts,
            &mut inliers,
            calib3d::RANSAC,
            self.reproj_threshold,
        )?;

        if h.empty() {
            return Ok(Err(Degenerate::NoConsensus));
        }
        let inlier_count = if inliers.empty() { 0 } else { core::count_non_zero(&inliers)? };
        log::debug!(
            "RANSAC homography: {}/{} inliers (threshold {:.1}px)",
            inlier_count,
            correspondences.len(),
            self.reproj_threshold
        );

        Ok(Homography::from_mat(&h)?.ok_or(Degenerate::Singular))
    }
}
