use serde::{Deserialize, Serialize};

use crate::error::{Result, StitchError};
use crate::homography::DEFAULT_REPROJ_THRESHOLD;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FeatureDetector {
    Sift,
    Orb,
    Brisk,
}

impl std::fmt::Display for FeatureDetector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FeatureDetector::Sift => write!(f, "SIFT"),
            FeatureDetector::Orb => write!(f, "ORB"),
            FeatureDetector::Brisk => write!(f, "BRISK"),
        }
    }
}

impl FeatureDetector {
    /// SIFT produces float descriptors, ORB and BRISK binary ones.
    pub fn is_binary(self) -> bool {
        !matches!(self, FeatureDetector::Sift)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MatcherKind {
    BruteForce,
    Flann,
}

impl std::fmt::Display for MatcherKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MatcherKind::BruteForce => write!(f, "BF"),
            MatcherKind::Flann => write!(f, "FLANN"),
        }
    }
}

/// How per-image transforms are tied to the mosaic frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StitchPolicy {
    /// Register every new image against the mosaic built so far.
    ///
    /// Registration errors compound across images because each step matches
    /// against already-warped content.
    Cascaded,
    /// Register each image against its predecessor and compose the transforms.
    Chained,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CropMode {
    /// Erode the bounding box of the largest region until it fits, then take
    /// the largest inscribed rectangle.
    ShrinkToFit,
    /// Largest inscribed rectangle of the largest region, no erosion.
    Interior,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CanvasSize {
    pub rows: i32,
    pub cols: i32,
}

impl CanvasSize {
    pub fn new(rows: i32, cols: i32) -> Self {
        Self { rows, cols }
    }

    pub fn to_cv(self) -> opencv::core::Size {
        opencv::core::Size::new(self.cols, self.rows)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StitchConfig {
    pub detector: FeatureDetector,
    pub matcher: MatcherKind,
    pub feature_budget: usize,
    /// RANSAC inlier distance in source pixels. The default keeps the
    /// standard 5px; other values are a deliberate override.
    pub ransac_threshold: f64,
    pub policy: StitchPolicy,
    pub output_size: Option<CanvasSize>,
    pub max_canvas_side: i32,
    pub mask_threshold: f64,
    pub crop_to_content: bool,
    pub crop_mode: CropMode,
    // Chained-policy pairwise estimation
    pub parallel: bool,
    pub max_workers: Option<usize>,
}

impl Default for StitchConfig {
    fn default() -> Self {
        Self {
            detector: FeatureDetector::Sift,
            matcher: MatcherKind::BruteForce,
            feature_budget: 500,
            ransac_threshold: DEFAULT_REPROJ_THRESHOLD,
            policy: StitchPolicy::Chained,
            output_size: None,
            max_canvas_side: 16384,
            mask_threshold: 1.0,
            crop_to_content: true,
            crop_mode: CropMode::ShrinkToFit,
            parallel: true,
            max_workers: None,
        }
    }
}

impl StitchConfig {
    pub fn with_policy(mut self, policy: StitchPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn with_output_size(mut self, rows: i32, cols: i32) -> Self {
        self.output_size = Some(CanvasSize::new(rows, cols));
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.feature_budget < 4 {
            return Err(StitchError::InvalidConfig(format!(
                "feature_budget must be at least 4, got {}",
                self.feature_budget
            )));
        }
        if !self.ransac_threshold.is_finite() || self.ransac_threshold <= 0.0 {
            return Err(StitchError::InvalidConfig(format!(
                "ransac_threshold must be a positive number, got {}",
                self.ransac_threshold
            )));
        }
        if let Some(size) = self.output_size {
            if size.rows <= 0 || size.cols <= 0 {
                return Err(StitchError::InvalidConfig(format!(
                    "output_size must be positive, got {}x{}",
                    size.rows, size.cols
                )));
            }
        }
        if self.max_canvas_side <= 0 {
            return Err(StitchError::InvalidConfig(format!(
                "max_canvas_side must be positive, got {}",
                self.max_canvas_side
            )));
        }
        if !(0.0..255.0).contains(&self.mask_threshold) {
            return Err(StitchError::InvalidConfig(format!(
                "mask_threshold must lie in [0, 255), got {}",
                self.mask_threshold
            )));
        }
        if self.max_workers == Some(0) {
            return Err(StitchError::InvalidConfig(
                "max_workers must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}
