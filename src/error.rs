use std::fmt;

pub type Result<T> = std::result::Result<T, StitchError>;

/// Why a homography fit could not be used.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Degenerate {
    /// Fewer than four correspondences reached the estimator.
    TooFewCorrespondences { found: usize },
    /// The robust fit returned no model.
    NoConsensus,
    /// The fitted matrix is singular, non-finite, or maps the origin to infinity.
    Singular,
}

impl fmt::Display for Degenerate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Degenerate::TooFewCorrespondences { found } => {
                write!(f, "only {} correspondences (need at least 4)", found)
            }
            Degenerate::NoConsensus => write!(f, "robust fit found no consensus"),
            Degenerate::Singular => write!(f, "fitted matrix is singular"),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum StitchError {
    #[error("no images to stitch")]
    EmptyInput,

    /// `pair` is `(reference, query)`: under the cascaded policy the
    /// reference side is the mosaic built from images `0..=reference`.
    #[error("degenerate homography between image {} and image {}: {reason}", pair.0, pair.1)]
    DegenerateHomography {
        pair: (usize, usize),
        reason: Degenerate,
    },

    #[error("mosaic contains no painted pixels")]
    EmptyMosaic,

    #[error("image {index} is not usable: {reason}")]
    InvalidImage { index: usize, reason: String },

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("OpenCV error: {0}")]
    OpenCv(#[from] opencv::Error),
}

impl StitchError {
    /// `EmptyInput` is reported to the caller but does not signal a broken run.
    pub fn is_fatal(&self) -> bool {
        !matches!(self, StitchError::EmptyInput)
    }
}
