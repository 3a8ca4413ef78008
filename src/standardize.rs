//! Mean/std statistics for z-scoring batches of samples.

use std::{cmp::Ordering, str::FromStr};

use ndarray::{Array, Array1, Array2, ArrayView, ArrayView2, Axis, Dimension, RemoveAxis};

use crate::{
    error::{Result, SbiError},
    transform::AffineTransform,
};

/// Floor for standard deviations, avoids division by zero for constant dimensions.
pub const DEFAULT_MIN_STD: f64 = 1e-14;

/// How statistics are pooled over the entries of a sample.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StandardizationMode {
    /// Every dimension gets its own mean and standard deviation.
    #[default]
    Independent,
    /// A sample is one structured block (a time series or an image). A single
    /// mean is taken over all entries. The standard deviation is computed
    /// along the second axis of the batch for every sample (and every
    /// remaining trailing index), floored, and then averaged.
    Structured,
}

/// User facing z-scoring option.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ZScore {
    None,
    #[default]
    Independent,
    Structured,
    /// The prior support decides the transform, no statistics are estimated.
    TransformToUnconstrained,
}

impl ZScore {
    /// The standardization mode, or `None` if no statistics should be fitted.
    pub fn mode(&self) -> Option<StandardizationMode> {
        match self {
            ZScore::Independent => Some(StandardizationMode::Independent),
            ZScore::Structured => Some(StandardizationMode::Structured),
            ZScore::None | ZScore::TransformToUnconstrained => None,
        }
    }
}

impl FromStr for ZScore {
    type Err = SbiError;

    fn from_str(value: &str) -> Result<Self> {
        match value {
            "none" => Ok(ZScore::None),
            "independent" => Ok(ZScore::Independent),
            "structured" => Ok(ZScore::Structured),
            "transform_to_unconstrained" => Ok(ZScore::TransformToUnconstrained),
            _ => Err(SbiError::UnknownOption {
                option: "z_score",
                value: value.to_string(),
                expected: "'none', 'independent', 'structured' or 'transform_to_unconstrained'",
            }),
        }
    }
}

/// Rows that contain NaN or Inf entries.
#[derive(Debug, Clone)]
pub struct InvalidRows {
    pub is_valid: Array1<bool>,
    pub num_nans: usize,
    pub num_infs: usize,
}

impl InvalidRows {
    pub fn num_valid(&self) -> usize {
        self.is_valid.iter().filter(|&&valid| valid).count()
    }

    pub fn valid_indices(&self) -> Vec<usize> {
        self.is_valid
            .iter()
            .enumerate()
            .filter_map(|(i, &valid)| valid.then_some(i))
            .collect()
    }
}

pub fn invalid_rows(batch: ArrayView2<f64>) -> InvalidRows {
    let mut num_nans = 0;
    let mut num_infs = 0;
    let is_valid = batch
        .axis_iter(Axis(0))
        .map(|row| {
            let has_nan = row.iter().any(|x| x.is_nan());
            let has_inf = row.iter().any(|x| x.is_infinite());
            num_nans += has_nan as usize;
            num_infs += has_inf as usize;
            !(has_nan | has_inf)
        })
        .collect();
    InvalidRows {
        is_valid,
        num_nans,
        num_infs,
    }
}

/// Collapse all but the leading axis, so that each sample is one row.
pub(crate) fn as_rows<D: Dimension>(batch: ArrayView<f64, D>) -> Result<Array2<f64>> {
    let shape = batch.shape().to_vec();
    let Some(&num_rows) = shape.first() else {
        return Err(SbiError::ShapeMismatch {
            what: "sample batch",
            expected: vec![0, 0],
            found: shape,
        });
    };
    let row_len = shape[1..].iter().product();
    Array2::from_shape_vec((num_rows, row_len), batch.iter().copied().collect()).map_err(|_| {
        SbiError::ShapeMismatch {
            what: "sample batch",
            expected: vec![num_rows, row_len],
            found: shape,
        }
    })
}

pub(crate) fn apply_floor<D: Dimension>(std: &mut Array<f64, D>, min_std: f64) {
    // NaN stays NaN and is caught by the validation afterwards
    std.mapv_inplace(|s| if s < min_std { min_std } else { s });
}

/// Mean and standard deviation used to z-score a batch.
#[derive(Debug, Clone, PartialEq)]
pub struct Standardization {
    mean: Array1<f64>,
    std: Array1<f64>,
    mode: StandardizationMode,
}

impl Standardization {
    /// Estimate statistics from the valid rows of `batch`.
    ///
    /// The leading axis enumerates samples. Samples containing NaN or Inf
    /// entries are ignored.
    /// Standard deviations below `min_std` are replaced by `min_std`.
    ///
    /// With at most one valid row in independent mode the standard deviation
    /// defaults to one. This allows restoring statistics of a pre-trained
    /// network from a tiny batch.
    pub fn fit<D: Dimension + RemoveAxis>(
        batch: ArrayView<f64, D>,
        mode: StandardizationMode,
        min_std: f64,
    ) -> Result<Self> {
        let rows = as_rows(batch.view())?;
        if rows.ncols() == 0 {
            return Err(SbiError::ShapeMismatch {
                what: "sample batch",
                expected: vec![rows.nrows(), 1],
                found: vec![rows.nrows(), 0],
            });
        }
        let invalid = invalid_rows(rows.view());
        if invalid.num_valid() == 0 {
            return Err(SbiError::NoValidRows {
                num_nans: invalid.num_nans,
                num_infs: invalid.num_infs,
            });
        }
        if invalid.num_nans + invalid.num_infs > 0 {
            tracing::warn!(
                num_nans = invalid.num_nans,
                num_infs = invalid.num_infs,
                "Found invalid samples, they are excluded from the standardization statistics"
            );
        }
        let valid_indices = invalid.valid_indices();
        let valid = rows.select(Axis(0), &valid_indices);

        let (mean, std) = match mode {
            StandardizationMode::Independent => {
                let mean = valid
                    .mean_axis(Axis(0))
                    .unwrap_or_else(|| Array1::from_elem(valid.ncols(), f64::NAN));
                let std = if valid.nrows() > 1 {
                    let mut std = valid.std_axis(Axis(0), 1.);
                    apply_floor(&mut std, min_std);
                    std
                } else {
                    tracing::warn!(
                        "Using a batch with a single sample instantiates a standardization with \
                         a standard deviation of one, which is not representative of the data. \
                         This is expected when loading a pre-trained network, otherwise use a \
                         larger batch."
                    );
                    Array1::ones(valid.ncols())
                };
                (mean, std)
            }
            StandardizationMode::Structured => {
                let mean = valid.mean().unwrap_or(f64::NAN);
                let mut sample_std = if batch.ndim() > 1 {
                    batch
                        .select(Axis(0), &valid_indices)
                        .std_axis(Axis(1), 1.)
                        .into_dyn()
                } else {
                    valid.std_axis(Axis(1), 1.).into_dyn()
                };
                apply_floor(&mut sample_std, min_std);
                let std = sample_std.mean().unwrap_or(f64::NAN);
                (Array1::from_elem(1, mean), Array1::from_elem(1, std))
            }
        };

        Self::from_moments(mean, std, mode)
    }

    /// Fit statistics if `z_score` asks for them.
    pub fn fit_option<D: Dimension + RemoveAxis>(
        batch: ArrayView<f64, D>,
        z_score: ZScore,
        min_std: f64,
    ) -> Result<Option<Self>> {
        z_score
            .mode()
            .map(|mode| Self::fit(batch, mode, min_std))
            .transpose()
    }

    /// Use known moments, for example declared by a prior.
    pub fn from_moments(
        mean: Array1<f64>,
        std: Array1<f64>,
        mode: StandardizationMode,
    ) -> Result<Self> {
        if mean.len() != std.len() {
            return Err(SbiError::ShapeMismatch {
                what: "standardization std",
                expected: vec![mean.len()],
                found: vec![std.len()],
            });
        }
        if mean.iter().chain(std.iter()).any(|x| x.is_nan()) {
            return Err(SbiError::NanStatistics);
        }
        Ok(Self { mean, std, mode })
    }

    pub fn mean(&self) -> &Array1<f64> {
        &self.mean
    }

    pub fn std(&self) -> &Array1<f64> {
        &self.std
    }

    pub fn mode(&self) -> StandardizationMode {
        self.mode
    }

    /// `x -> (x - mean) / std`
    pub fn transform(&self) -> AffineTransform {
        let scale = self.std.mapv(f64::recip);
        let loc = -&self.mean * &scale;
        AffineTransform::new(loc, scale)
    }

    /// `z -> mean + std * z`, the inverse of [`Standardization::transform`].
    pub fn unstandardize(&self) -> AffineTransform {
        AffineTransform::new(self.mean.clone(), self.std.clone())
    }
}

fn cmp_rows(a: &[f64], b: &[f64]) -> Ordering {
    a.iter()
        .zip(b)
        .map(|(x, y)| x.total_cmp(y))
        .find(|ord| ord.is_ne())
        .unwrap_or(Ordering::Equal)
}

fn count_unique_rows(batch: ArrayView2<f64>) -> usize {
    let mut rows: Vec<Vec<f64>> = batch.axis_iter(Axis(0)).map(|row| row.to_vec()).collect();
    rows.sort_by(|a, b| cmp_rows(a, b));
    rows.dedup_by(|a, b| cmp_rows(a, b).is_eq());
    rows.len()
}

/// Warn if z-scoring `batch` would merge distinct samples.
///
/// Returns `true` if a warning was emitted. This happens if the batch only
/// contains a single unique sample, or if the number of unique samples drops
/// by more than `duplicate_tolerance` (a fraction) after z-scoring.
pub fn warn_if_zscoring_changes_data(batch: ArrayView2<f64>, duplicate_tolerance: f64) -> bool {
    let num_unique = count_unique_rows(batch);
    if num_unique == 1 {
        tracing::warn!(
            "There is only a single unique sample in the data. Z-scoring would produce NaNs, \
             disable it with `none` if this is intended."
        );
        return true;
    }
    let (Some(mean), std) = (batch.mean_axis(Axis(0)), batch.std_axis(Axis(0), 1.)) else {
        return false;
    };
    let z_scored = (&batch - &mean) / &std;
    let num_unique_z = count_unique_rows(z_scored.view());
    if (num_unique_z as f64) < (num_unique as f64) * (1. - duplicate_tolerance) {
        tracing::warn!(
            num_unique,
            num_unique_z,
            "Z-scoring merged distinct samples. This can be caused by numerical inaccuracies \
             when the data covers a large range of values. Consider excluding outliers or \
             disabling z-scoring."
        );
        return true;
    }
    false
}
