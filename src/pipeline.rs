use opencv::core;
use opencv::prelude::*;
use rayon::prelude::*;
use std::sync::{Arc, Mutex};

use crate::border::BorderCleaner;
use crate::chain;
use crate::compositor::{Canvas, CanvasCompositor};
use crate::config::{CanvasSize, StitchConfig, StitchPolicy};
use crate::error::{Degenerate, Result, StitchError};
use crate::features::{FeatureMatcher, OpenCvMatcher};
use crate::homography::{Homography, HomographyEstimator, RansacEstimator};

/// Progress callback: (message, percentage)
pub type ProgressCallback = Arc<Mutex<dyn FnMut(String, f32) + Send>>;

/// How a run that reached `Done` ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Stitched,
    /// One image in, the same image out. No matching took place.
    SingleImage,
    /// Nothing to stitch; the caller receives `StitchError::EmptyInput`.
    EmptyInput,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineState {
    Idle,
    Loaded { images: usize },
    Cascading { step: usize },
    Chaining { step: usize },
    Cropped,
    Done(Outcome),
    Failed,
}

/// Registers, composites and crops a set of overlapping images.
pub struct StitchPipeline<M = OpenCvMatcher, E = RansacEstimator> {
    config: StitchConfig,
    matcher: M,
    estimator: E,
    compositor: CanvasCompositor,
    cleaner: BorderCleaner,
    state: PipelineState,
    progress_cb: Option<ProgressCallback>,
}

impl StitchPipeline {
    pub fn new(config: StitchConfig) -> Result<Self> {
        let matcher = OpenCvMatcher::from_config(&config);
        let estimator = RansacEstimator::new(config.ransac_threshold);
        Self::with_collaborators(config, matcher, estimator)
    }
}

impl<M, E> StitchPipeline<M, E>
where
    M: FeatureMatcher + Sync,
    E: HomographyEstimator + Sync,
{
    pub fn with_collaborators(config: StitchConfig, matcher: M, estimator: E) -> Result<Self> {
        config.validate()?;
        log::info!(
            "Stitch pipeline: {:?} policy, {} detector, {} matcher, budget {}",
            config.policy,
            config.detector,
            config.matcher,
            config.feature_budget
        );
        Ok(Self {
            compositor: CanvasCompositor::new(config.mask_threshold),
            cleaner: BorderCleaner::new(config.crop_mode),
            config,
            matcher,
            estimator,
            state: PipelineState::Idle,
            progress_cb: None,
        })
    }

    pub fn with_progress(mut self, progress_cb: ProgressCallback) -> Self {
        self.progress_cb = Some(progress_cb);
        self
    }

    pub fn config(&self) -> &StitchConfig {
        &self.config
    }

    pub fn state(&self) -> PipelineState {
        self.state
    }

    /// Stitch `images` (in order) into one mosaic.
    ///
    /// Zero images is `EmptyInput`; one image is returned unchanged. Any
    /// failing pair aborts the run, no partial mosaic is returned.
    pub fn stitch(&mut self, images: &[Mat]) -> Result<Mat> {
        self.state = PipelineState::Idle;
        let start = std::time::Instant::now();

        let result = self.run(images);
        match &result {
            Ok(_) => log::info!("Stitching completed in {:?}", start.elapsed()),
            Err(e) => {
                if !matches!(self.state, PipelineState::Done(_)) {
                    log::error!("Stitching failed: {}", e);
                    self.transition(PipelineState::Failed);
                }
            }
        }
        result
    }

    fn run(&mut self, images: &[Mat]) -> Result<Mat> {
        self.report_progress("Starting stitching...", 0.0);

        if images.is_empty() {
            log::warn!("No images to stitch.");
            self.transition(PipelineState::Done(Outcome::EmptyInput));
            return Err(StitchError::EmptyInput);
        }
        validate_images(images)?;
        self.transition(PipelineState::Loaded { images: images.len() });

        if images.len() == 1 {
            log::warn!("Only one image given, returning it unchanged.");
            self.transition(PipelineState::Done(Outcome::SingleImage));
            self.report_progress("Stitching completed!", 100.0);
            return Ok(images[0].clone());
        }

        let mosaic = match self.config.policy {
            StitchPolicy::Cascaded => self.cascade(images)?,
            StitchPolicy::Chained => self.chain(images)?,
        };

        let result = if self.config.crop_to_content {
            self.report_progress("Removing black borders...", 90.0);
            let cropped = self.cleaner.crop(&mosaic)?;
            self.transition(PipelineState::Cropped);
            log::info!(
                "Cropped mosaic {}x{} -> {}x{}",
                mosaic.cols(),
                mosaic.rows(),
                cropped.cols(),
                cropped.rows()
            );
            cropped
        } else {
            mosaic
        };

        self.transition(PipelineState::Done(Outcome::Stitched));
        self.report_progress("Stitching completed!", 100.0);
        Ok(result)
    }

    /// Register each image against the mosaic built so far and paint it
    /// immediately.
    fn cascade(&mut self, images: &[Mat]) -> Result<Mat> {
        let first = &images[0];
        let initial = self
            .config
            .output_size
            .unwrap_or_else(|| CanvasSize::new(first.rows(), first.cols()));

        self.transition(PipelineState::Cascading { step: 0 });
        let canvas = Canvas::new(initial, first.typ())?;
        let mut canvas = self.compositor.composite(canvas, first, &Homography::identity())?;

        for i in 1..images.len() {
            self.transition(PipelineState::Cascading { step: i });
            let pct = 5.0 + 85.0 * i as f32 / images.len() as f32;
            self.report_progress(
                &format!("Registering image {}/{} against mosaic", i + 1, images.len()),
                pct,
            );

            let mut h = self.estimate_pair(i, &images[i], canvas.pixels())?;
            let size = images[i].size()?;

            if self.config.output_size.is_none() {
                let max_side = self.config.max_canvas_side;
                let (left, top) = chain::origin_offset(&[size], &[h], max_side);
                if left > 0 || top > 0 {
                    canvas = canvas.shift_origin(left, top)?;
                    let shift = Homography::translation(left as f64, top as f64);
                    h = h.then(&shift).ok_or(StitchError::DegenerateHomography {
                        pair: (i - 1, i),
                        reason: Degenerate::Singular,
                    })?;
                }
                let needed = chain::canvas_bounds(&[size], &[h], max_side);
                canvas = canvas.grow_to(needed)?;
            } else {
                warn_if_clipped(i, size, &h, canvas.size());
            }
            canvas = self.compositor.composite(canvas, &images[i], &h)?;
        }

        Ok(canvas.into_mosaic())
    }

    /// Register neighbours, compose the transforms, then paint in index order.
    fn chain(&mut self, images: &[Mat]) -> Result<Mat> {
        self.transition(PipelineState::Chaining { step: 0 });
        self.report_progress("Estimating pairwise homographies...", 5.0);

        let start_matching = std::time::Instant::now();
        let pairwise = self.pairwise_homographies(images)?;
        log::info!(
            "Estimated {} pairwise homographies in {:?}",
            pairwise.len(),
            start_matching.elapsed()
        );

        let global = chain::accumulate(&pairwise)?;
        for (i, h) in global.iter().enumerate() {
            log::debug!("Global transform {}: {:?}", i, h.matrix());
        }

        let sizes = images.iter().map(|img| img.size()).collect::<opencv::Result<Vec<_>>>()?;
        let (global, size) = match self.config.output_size {
            Some(size) => {
                for (i, (img_size, h)) in sizes.iter().zip(&global).enumerate() {
                    warn_if_clipped(i, *img_size, h, size);
                }
                (global, size)
            }
            None => {
                let max_side = self.config.max_canvas_side;
                let (left, top) = chain::origin_offset(&sizes, &global, max_side);
                let global = chain::shift_all(&global, left, top)?;
                let size = chain::canvas_bounds(&sizes, &global, max_side);
                (global, size)
            }
        };
        log::info!(
            "Compositing {} images onto {}x{} canvas",
            images.len(),
            size.cols,
            size.rows
        );

        let mut canvas = Canvas::new(size, images[0].typ())?;
        for (i, (img, h)) in images.iter().zip(&global).enumerate() {
            self.transition(PipelineState::Chaining { step: i });
            let pct = 50.0 + 40.0 * i as f32 / images.len() as f32;
            self.report_progress(&format!("Compositing image {}/{}", i + 1, images.len()), pct);
            canvas = self.compositor.composite(canvas, img, h)?;
        }

        Ok(canvas.into_mosaic())
    }

    /// `result[k]` maps image `k + 1` into the frame of image `k`.
    ///
    /// Pairs are independent and run on the rayon pool when enabled; the
    /// first failing pair (by index) is reported.
    pub fn pairwise_homographies(&self, images: &[Mat]) -> Result<Vec<Homography>> {
        let estimate = |i: usize| self.estimate_pair(i, &images[i], &images[i - 1]);

        let results: Vec<Result<Homography>> = if !self.config.parallel {
            (1..images.len()).map(estimate).collect()
        } else if let Some(workers) = self.config.max_workers {
            let pool = rayon::ThreadPoolBuilder::new()
                .num_threads(workers)
                .build()
                .map_err(|e| {
                    StitchError::InvalidConfig(format!("cannot build worker pool: {}", e))
                })?;
            pool.install(|| (1..images.len()).into_par_iter().map(&estimate).collect())
        } else {
            (1..images.len()).into_par_iter().map(&estimate).collect()
        };

        results.into_iter().collect()
    }

    /// Homography mapping `query` (image `index`) onto `reference`.
    fn estimate_pair(&self, index: usize, query: &Mat, reference: &Mat) -> Result<Homography> {
        let correspondences = self.matcher.match_images(query, reference)?;
        log::debug!("Pair ({}, {}): {} correspondences", index - 1, index, correspondences.len());

        match self.estimator.estimate(&correspondences)? {
            Ok(h) => Ok(h),
            Err(reason) => {
                log::error!("Pair ({}, {}) is degenerate: {}", index - 1, index, reason);
                Err(StitchError::DegenerateHomography {
                    pair: (index - 1, index),
                    reason,
                })
            }
        }
    }

    fn transition(&mut self, next: PipelineState) {
        log::debug!("Pipeline state: {:?} -> {:?}", self.state, next);
        self.state = next;
    }

    fn report_progress(&self, msg: &str, pct: f32) {
        if let Some(ref cb) = self.progress_cb {
            if let Ok(mut cb_lock) = cb.lock() {
                cb_lock(msg.to_string(), pct);
            }
        }
    }
}

/// Every image must be non-empty, 8-bit, with 1, 3 or 4 channels, and all
/// must share the first image's type.
fn validate_images(images: &[Mat]) -> Result<()> {
    let expected = images[0].typ();
    for (index, img) in images.iter().enumerate() {
        let reason = if img.empty() {
            Some("image is empty".to_string())
        } else if img.depth() != core::CV_8U {
            Some(format!("expected 8-bit samples, got depth {}", img.depth()))
        } else if !matches!(img.channels(), 1 | 3 | 4) {
            Some(format!("unsupported channel count {}", img.channels()))
        } else if img.typ() != expected {
            Some(format!("type {} differs from first image type {}", img.typ(), expected))
        } else {
            None
        };
        if let Some(reason) = reason {
            return Err(StitchError::InvalidImage { index, reason });
        }
    }
    Ok(())
}

/// Warn when image `index` lands partly outside a fixed-size canvas.
fn warn_if_clipped(index: usize, size: core::Size, transform: &Homography, canvas: CanvasSize) {
    let clipped = match chain::projected_extent(size, transform) {
        Some((min_x, min_y, max_x, max_y)) => {
            min_x < -0.5
                || min_y < -0.5
                || max_x > canvas.cols as f64 + 0.5
                || max_y > canvas.rows as f64 + 0.5
        }
        None => true,
    };
    if clipped {
        log::warn!(
            "Image {} extends beyond the {}x{} output canvas and will be clipped",
            index,
            canvas.rows,
            canvas.cols
        );
    }
}

/// Stitch with the default configuration for `policy`.
pub fn stitch(
    images: &[Mat],
    policy: StitchPolicy,
    output_size: Option<CanvasSize>,
) -> Result<Mat> {
    let mut config = StitchConfig::default().with_policy(policy);
    config.output_size = output_size;
    StitchPipeline::new(config)?.stitch(images)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::features::Correspondence;
    use opencv::core::{Scalar, Vec3b};
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Counts calls and never finds anything.
    #[derive(Default)]
    struct CountingMatcher {
        calls: AtomicUsize,
    }

    impl FeatureMatcher for CountingMatcher {
        fn match_images(&self, _query: &Mat, _reference: &Mat) -> Result<Vec<Correspondence>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(Vec::new())
        }
    }

    /// Identifies single-colour images by their top-left pixel and reports
    /// the known mosaic-frame offsets between them.
    struct OffsetMatcher {
        offsets: Vec<([u8; 3], (f32, f32))>,
    }

    impl OffsetMatcher {
        fn offset_of(&self, img: &Mat) -> Result<Option<(f32, f32)>> {
            let p = img.at_2d::<Vec3b>(0, 0)?;
            let color = [p[0], p[1], p[2]];
            Ok(self.offsets.iter().find(|(c, _)| *c == color).map(|(_, o)| *o))
        }
    }

    impl FeatureMatcher for OffsetMatcher {
        fn match_images(&self, query: &Mat, reference: &Mat) -> Result<Vec<Correspondence>> {
            let (Some(q), Some(r)) = (self.offset_of(query)?, self.offset_of(reference)?) else {
                return Ok(Vec::new());
            };
            let (dx, dy) = (q.0 - r.0, q.1 - r.1);
            let mut out = Vec::new();
            for y in [10.0f32, 45.0, 80.0] {
                for x in [10.0f32, 30.0, 50.0, 70.0, 90.0] {
                    out.push(Correspondence::new(x, y, x + dx, y + dy));
                }
            }
            Ok(out)
        }
    }

    const COLORS: [[u8; 3]; 4] = [[200, 40, 40], [40, 200, 40], [40, 40, 200], [180, 180, 30]];

    fn strip(count: usize, step: f32) -> opencv::Result<(Vec<Mat>, OffsetMatcher)> {
        let mut images = Vec::new();
        let mut offsets = Vec::new();
        for (i, c) in COLORS.iter().take(count).enumerate() {
            let scalar = Scalar::new(c[0] as f64, c[1] as f64, c[2] as f64, 0.0);
            images.push(Mat::new_rows_cols_with_default(100, 100, core::CV_8UC3, scalar)?);
            offsets.push((*c, (step * i as f32, 0.0)));
        }
        Ok((images, OffsetMatcher { offsets }))
    }

    fn pipeline_with<M>(config: StitchConfig, matcher: M) -> Result<StitchPipeline<M>>
    where
        M: FeatureMatcher + Sync,
    {
        StitchPipeline::with_collaborators(config, matcher, RansacEstimator::default())
    }

    #[test]
    fn test_empty_input_invokes_no_matcher() {
        let mut pipeline =
            pipeline_with(StitchConfig::default(), CountingMatcher::default()).unwrap();
        let err = pipeline.stitch(&[]).unwrap_err();
        assert!(matches!(err, StitchError::EmptyInput));
        assert!(!err.is_fatal());
        assert_eq!(pipeline.state(), PipelineState::Done(Outcome::EmptyInput));
        assert_eq!(pipeline.matcher.calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_single_image_returned_unchanged() -> Result<()> {
        let mut pipeline = pipeline_with(StitchConfig::default(), CountingMatcher::default())?;
        let color = Scalar::new(1.0, 2.0, 3.0, 0.0);
        let img = Mat::new_rows_cols_with_default(30, 40, core::CV_8UC3, color)?;

        let out = pipeline.stitch(std::slice::from_ref(&img))?;
        assert_eq!(out.size()?, img.size()?);
        assert_eq!(*out.at_2d::<Vec3b>(10, 10)?, Vec3b::from([1, 2, 3]));
        assert_eq!(pipeline.state(), PipelineState::Done(Outcome::SingleImage));
        assert_eq!(pipeline.matcher.calls.load(Ordering::SeqCst), 0);
        Ok(())
    }

    #[test]
    fn test_no_correspondences_fails_with_pair() -> Result<()> {
        for policy in [StitchPolicy::Chained, StitchPolicy::Cascaded] {
            let (images, _) = strip(2, 70.0)?;
            let config = StitchConfig::default().with_policy(policy);
            let mut pipeline = pipeline_with(config, CountingMatcher::default())?;

            match pipeline.stitch(&images) {
                Err(StitchError::DegenerateHomography { pair, reason }) => {
                    assert_eq!(pair, (0, 1));
                    assert_eq!(reason, Degenerate::TooFewCorrespondences { found: 0 });
                }
                other => panic!(
                    "{:?}: expected degenerate homography, got {:?}",
                    policy,
                    other.map(|m| m.size())
                ),
            }
            assert_eq!(pipeline.state(), PipelineState::Failed);
        }
        Ok(())
    }

    #[test]
    fn test_failing_pair_is_identified_in_parallel() -> Result<()> {
        let (images, mut matcher) = strip(4, 70.0)?;
        // Image 2 becomes unmatched
        matcher.offsets.retain(|(c, _)| *c != COLORS[2]);

        let mut config = StitchConfig::default();
        config.max_workers = Some(2);
        let pipeline = pipeline_with(config, matcher)?;

        match pipeline.pairwise_homographies(&images) {
            Err(StitchError::DegenerateHomography { pair, .. }) => assert_eq!(pair, (1, 2)),
            other => panic!("expected degenerate pair (1, 2), got {:?}", other.map(|v| v.len())),
        }
        Ok(())
    }

    #[test]
    fn test_chained_pairwise_are_neighbour_relative() -> Result<()> {
        let (images, matcher) = strip(3, 70.0)?;
        let pipeline = pipeline_with(StitchConfig::default(), matcher)?;

        let pairwise = pipeline.pairwise_homographies(&images)?;
        assert_eq!(pairwise.len(), 2);
        for h in &pairwise {
            let (x, y) = h.transform_point(0.0, 0.0).unwrap();
            assert!((x - 70.0).abs() < 1e-3 && y.abs() < 1e-3, "got ({}, {})", x, y);
        }
        Ok(())
    }

    #[test]
    fn test_leftward_strip_keeps_every_image() -> Result<()> {
        for policy in [StitchPolicy::Chained, StitchPolicy::Cascaded] {
            let (images, matcher) = strip(3, -70.0)?;
            let mut config = StitchConfig::default().with_policy(policy);
            config.crop_to_content = false;
            let mut pipeline = pipeline_with(config, matcher)?;

            let mosaic = pipeline.stitch(&images)?;
            assert_eq!(mosaic.size()?, core::Size::new(240, 100), "{:?}", policy);
            assert_eq!(*mosaic.at_2d::<Vec3b>(50, 20)?, Vec3b::from(COLORS[2]));
            assert_eq!(*mosaic.at_2d::<Vec3b>(50, 120)?, Vec3b::from(COLORS[1]));
            // Base keeps its whole footprint
            assert_eq!(*mosaic.at_2d::<Vec3b>(50, 145)?, Vec3b::from(COLORS[0]));
            assert_eq!(*mosaic.at_2d::<Vec3b>(50, 239)?, Vec3b::from(COLORS[0]));
        }
        Ok(())
    }

    #[test]
    fn test_invalid_images_are_rejected() -> Result<()> {
        let (mut images, matcher) = strip(2, 70.0)?;
        let gray = Mat::new_rows_cols_with_default(100, 100, core::CV_8UC1, Scalar::all(9.0))?;
        images.push(gray);
        let mut pipeline = pipeline_with(StitchConfig::default(), matcher)?;

        match pipeline.stitch(&images) {
            Err(StitchError::InvalidImage { index, .. }) => assert_eq!(index, 2),
            other => panic!("expected invalid image, got {:?}", other.map(|m| m.size())),
        }
        assert_eq!(pipeline.state(), PipelineState::Failed);
        Ok(())
    }

    #[test]
    fn test_progress_reaches_completion() -> Result<()> {
        let (images, matcher) = strip(3, 70.0)?;
        let seen: Arc<Mutex<Vec<f32>>> = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        let cb: ProgressCallback = Arc::new(Mutex::new(move |_msg: String, pct: f32| {
            sink.lock().unwrap().push(pct);
        }));

        let mut pipeline = pipeline_with(StitchConfig::default(), matcher)?.with_progress(cb);
        pipeline.stitch(&images)?;

        let seen = seen.lock().unwrap();
        assert_eq!(seen.first(), Some(&0.0));
        assert_eq!(seen.last(), Some(&100.0));
        assert!(seen.windows(2).all(|w| w[0] <= w[1]));
        assert_eq!(pipeline.state(), PipelineState::Done(Outcome::Stitched));
        Ok(())
    }

    #[test]
    fn test_default_pipeline_uses_five_pixel_inlier_threshold() -> Result<()> {
        let pipeline = StitchPipeline::new(StitchConfig::default())?;
        assert_eq!(pipeline.estimator.threshold(), 5.0);

        let mut config = StitchConfig::default();
        config.ransac_threshold = 3.0;
        assert_eq!(StitchPipeline::new(config)?.estimator.threshold(), 3.0);
        Ok(())
    }

    #[test]
    fn test_invalid_config_is_rejected_at_construction() {
        let mut config = StitchConfig::default();
        config.ransac_threshold = -1.0;
        assert!(matches!(StitchPipeline::new(config), Err(StitchError::InvalidConfig(_))));
    }
}
