use thiserror::Error;

/// Broad category of an [`SbiError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// No usable data remained after filtering.
    Data,
    /// Computed statistics or a constructed transform failed a check.
    Validation,
    /// Batch shapes did not line up.
    Shape,
    /// An unrecognized configuration value was supplied.
    Configuration,
    /// The potential function failed in a way that can not be recovered from.
    Potential,
}

#[non_exhaustive]
#[derive(Error, Debug)]
pub enum SbiError {
    #[error(
        "No valid data entries left after excluding {num_nans} NaN and {num_infs} Inf rows. \
         If missing trials are encoded as NaN, disable z-scoring with `none`."
    )]
    NoValidRows { num_nans: usize, num_infs: usize },

    #[error(
        "Mean or std for standardization must not contain NaNs. If missing trials are \
         encoded as NaN, disable z-scoring with `none`."
    )]
    NanStatistics,

    #[error(
        "Unconstrained round-trip mismatch: transformed shape {found:?} differs from \
         original shape {expected:?}. Transforms are not supported for priors with \
         simplex components."
    )]
    RoundTripShape {
        expected: Vec<usize>,
        found: Vec<usize>,
    },

    #[error(
        "Unconstrained round-trip mismatch: original and re-transformed parameters differ \
         by {max_abs_diff}"
    )]
    RoundTripMismatch { max_abs_diff: f64 },

    #[error("Shape mismatch for {what}: expected {expected:?}, found {found:?}")]
    ShapeMismatch {
        what: &'static str,
        expected: Vec<usize>,
        found: Vec<usize>,
    },

    #[error("Invalid value `{value}` for option `{option}`, expected one of {expected}")]
    UnknownOption {
        option: &'static str,
        value: String,
        expected: &'static str,
    },

    #[error("Logp function returned unrecoverable error")]
    LogpFailure(#[source] Box<dyn std::error::Error + Send + Sync>),
}

impl SbiError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            SbiError::NoValidRows { .. } => ErrorKind::Data,
            SbiError::NanStatistics
            | SbiError::RoundTripShape { .. }
            | SbiError::RoundTripMismatch { .. } => ErrorKind::Validation,
            SbiError::ShapeMismatch { .. } => ErrorKind::Shape,
            SbiError::UnknownOption { .. } => ErrorKind::Configuration,
            SbiError::LogpFailure(_) => ErrorKind::Potential,
        }
    }
}

pub type Result<T> = std::result::Result<T, SbiError>;

/// Errors that happen when we evaluate the potential and its gradient
pub trait LogpError: std::error::Error + Send + Sync {
    /// Unrecoverable errors stop the optimization, recoverable
    /// errors mark the candidate as having a potential of `-inf`.
    fn is_recoverable(&self) -> bool;
}
