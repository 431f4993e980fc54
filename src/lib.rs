//! Multi-image panorama stitching.
//!
//! Pairwise homographies are estimated from feature correspondences, tied
//! into one mosaic frame (cascaded or chained), painted onto a canvas where
//! the first image always keeps its pixels, and finally cropped to the
//! largest rectangle without black borders.
//!
//! ```no_run
//! use panorama_stitcher::{ImageLoader, StitchConfig, StitchPipeline, StitchPolicy};
//!
//! # fn main() -> anyhow::Result<()> {
//! let images = ImageLoader::new("photos/mountain").load_images()?;
//! let config = StitchConfig::default().with_policy(StitchPolicy::Chained);
//! let mosaic = StitchPipeline::new(config)?.stitch(&images)?;
//! panorama_stitcher::save_result(&mosaic, "mountain.png".as_ref(), false)?;
//! # Ok(())
//! # }
//! ```

pub mod border;
pub mod chain;
pub mod compositor;
pub mod config;
pub mod error;
pub mod features;
pub mod homography;
pub mod image_io;
pub mod inscribed;
pub mod logger;
pub mod opencv_compat;
pub mod pipeline;
pub mod settings;

pub use border::BorderCleaner;
pub use compositor::{Canvas, CanvasCompositor};
pub use config::{CanvasSize, CropMode, FeatureDetector, MatcherKind, StitchConfig, StitchPolicy};
pub use error::{Degenerate, Result, StitchError};
pub use features::{Correspondence, FeatureMatcher, OpenCvMatcher};
pub use homography::{Homography, HomographyEstimator, RansacEstimator};
pub use image_io::{save_result, ImageLoader};
pub use pipeline::{stitch, Outcome, PipelineState, ProgressCallback, StitchPipeline};
