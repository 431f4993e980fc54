use opencv::prelude::*;
use opencv::{core, features2d};

use crate::config::{FeatureDetector, MatcherKind, StitchConfig};
use crate::error::Result;
use crate::opencv_compat::to_gray;

/// A point in the query image and the point in the reference image believed
/// to show the same scene location.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Correspondence {
    pub query: core::Point2f,
    pub reference: core::Point2f,
}

impl Correspondence {
    pub fn new(qx: f32, qy: f32, rx: f32, ry: f32) -> Self {
        Self {
            query: core::Point2f::new(qx, qy),
            reference: core::Point2f::new(rx, ry),
        }
    }
}

/// Keypoints and their descriptors for a single image.
pub struct FeatureSet {
    pub keypoints: core::Vector<core::KeyPoint>,
    pub descriptors: Mat,
}

impl FeatureSet {
    pub fn is_empty(&self) -> bool {
        self.keypoints.is_empty() || self.descriptors.empty()
    }
}

/// Produces correspondences between a query image and a reference image.
///
/// An empty result is valid and means nothing matched.
pub trait FeatureMatcher {
    fn match_images(&self, query: &Mat, reference: &Mat) -> Result<Vec<Correspondence>>;
}

/// Descriptor distance for brute-force matching, fixed by the detector.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NormKind {
    L2,
    Hamming,
}

impl NormKind {
    fn cv_norm(self) -> i32 {
        match self {
            NormKind::L2 => core::NORM_L2,
            NormKind::Hamming => core::NORM_HAMMING,
        }
    }
}

/// `features2d` detectors and matchers, selected once from the config.
///
/// OpenCV algorithm objects are created per call, so one `OpenCvMatcher`
/// can be shared across rayon workers.
#[derive(Debug, Clone, Copy)]
pub struct OpenCvMatcher {
    detector: FeatureDetector,
    matcher: MatcherKind,
    norm: NormKind,
    feature_budget: i32,
}

impl OpenCvMatcher {
    pub fn new(detector: FeatureDetector, matcher: MatcherKind, feature_budget: usize) -> Self {
        let norm = if detector.is_binary() {
            NormKind::Hamming
        } else {
            NormKind::L2
        };
        Self {
            detector,
            matcher,
            norm,
            feature_budget: i32::try_from(feature_budget).unwrap_or(i32::MAX),
        }
    }

    pub fn from_config(config: &StitchConfig) -> Self {
        Self::new(config.detector, config.matcher, config.feature_budget)
    }

    pub fn norm(&self) -> NormKind {
        self.norm
    }

    /// Detect keypoints and compute descriptors on the grayscale image.
    pub fn detect_and_describe(&self, img: &Mat) -> Result<FeatureSet> {
        let gray = to_gray(img)?;
        let mut keypoints = core::Vector::new();
        let mut descriptors = Mat::default();

        match self.detector {
            FeatureDetector::Sift => {
                let mut sift = features2d::SIFT::create(
                    self.feature_budget,
                    3,     // nOctaveLayers
                    0.01,  // contrastThreshold
                    7.0,   // edgeThreshold
                    0.8,   // sigma
                    false, // enable_precise_upscale
                )?;
                sift.detect_and_compute(
                    &gray,
                    &Mat::default(),
                    &mut keypoints,
                    &mut descriptors,
                    false,
                )?;
            }
            FeatureDetector::Orb => {
                let mut orb = features2d::ORB::create(
                    self.feature_budget,
                    1.2, // scaleFactor
                    8,   // nlevels
                    7,   // edgeThreshold
                    0,   // firstLevel
                    2,   // WTA_K
                    features2d::ORB_ScoreType::HARRIS_SCORE,
                    31, // patchSize
                    20, // fastThreshold
                )?;
                orb.detect_and_compute(
                    &gray,
                    &Mat::default(),
                    &mut keypoints,
                    &mut descriptors,
                    false,
                )?;
            }
            FeatureDetector::Brisk => {
                // BRISK has no feature cap of its own
                let mut brisk = features2d::BRISK::create(30, 3, 1.0)?;
                brisk.detect(&gray, &mut keypoints, &Mat::default())?;
                features2d::KeyPointsFilter::retain_best(&mut keypoints, self.feature_budget)?;
                brisk.compute(&gray, &mut keypoints, &mut descriptors)?;
            }
        }

        log::debug!(
            "{}: {} keypoints on {}x{} image",
            self.detector,
            keypoints.len(),
            img.cols(),
            img.rows()
        );
        Ok(FeatureSet { keypoints, descriptors })
    }

    /// Match query descriptors against reference descriptors.
    pub fn match_descriptors(
        &self,
        query: &FeatureSet,
        reference: &FeatureSet,
    ) -> Result<Vec<Correspondence>> {
        if query.is_empty() || reference.is_empty() {
            return Ok(Vec::new());
        }

        let mut matches = core::Vector::<core::DMatch>::new();
        match self.matcher {
            MatcherKind::BruteForce => {
                let matcher = features2d::BFMatcher::create(self.norm.cv_norm(), true)?;
                matcher.train_match(
                    &query.descriptors,
                    &reference.descriptors,
                    &mut matches,
                    &Mat::default(),
                )?;
            }
            MatcherKind::Flann => {
                // KD-tree index needs float descriptors
                let query_desc = as_f32(&query.descriptors)?;
                let reference_desc = as_f32(&reference.descriptors)?;
                let matcher = features2d::FlannBasedMatcher::create()?;
                matcher.train_match(&query_desc, &reference_desc, &mut matches, &Mat::default())?;
            }
        }

        let mut matches_vec = matches.to_vec();
        matches_vec.sort_by(|a, b| a.distance.total_cmp(&b.distance));

        let mut correspondences = Vec::with_capacity(matches_vec.len());
        for m in &matches_vec {
            let q = query.keypoints.get(m.query_idx as usize)?.pt();
            let r = reference.keypoints.get(m.train_idx as usize)?.pt();
            correspondences.push(Correspondence { query: q, reference: r });
        }
        Ok(correspondences)
    }
}

impl FeatureMatcher for OpenCvMatcher {
    fn match_images(&self, query: &Mat, reference: &Mat) -> Result<Vec<Correspondence>> {
        let query_features = self.detect_and_describe(query)?;
        let reference_features = self.detect_and_describe(reference)?;
        let correspondences = self.match_descriptors(&query_features, &reference_features)?;
        log::debug!(
            "{} matcher: {} correspondences ({} vs {} keypoints)",
            self.matcher,
            correspondences.len(),
            query_features.keypoints.len(),
            reference_features.keypoints.len()
        );
        Ok(correspondences)
    }
}

fn as_f32(descriptors: &Mat) -> opencv::Result<Mat> {
    if descriptors.depth() == core::CV_32F {
        return Ok(descriptors.clone());
    }
    let mut converted = Mat::default();
    descriptors.convert_to(&mut converted, core::CV_32F, 1.0, 0.0)?;
    Ok(converted)
}
