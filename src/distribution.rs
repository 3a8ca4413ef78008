//! Capability-query interface for priors.
//!
//! A prior always knows how to sample and how to evaluate its log density.
//! Everything else (support, mean, standard deviation) is optional and is
//! reported as present or absent instead of being probed for.

use ndarray::{Array1, Array2, ArrayView1, ArrayView2, Axis};
use rand::Rng;
use rand_distr::StandardNormal;

/// Admissible domain of a distribution.
#[derive(Debug, Clone, PartialEq)]
pub enum Support {
    /// The full real line in every dimension.
    Real,
    /// `(lower, inf)` per dimension.
    GreaterThan { lower: Array1<f64> },
    /// `(-inf, upper)` per dimension.
    LessThan { upper: Array1<f64> },
    /// `(lower, upper)` per dimension.
    Interval {
        lower: Array1<f64>,
        upper: Array1<f64>,
    },
    /// Non-negative vectors summing to one.
    Simplex,
    /// Integers in `[lower, upper]` per dimension.
    IntegerInterval {
        lower: Array1<f64>,
        upper: Array1<f64>,
    },
    NonNegativeInteger,
    Boolean,
    /// Reinterprets the last axis of the inner support as an event dimension.
    Independent(Box<Support>),
}

impl Support {
    /// The constraint underneath any `Independent` wrappers.
    pub fn base_constraint(&self) -> &Support {
        match self {
            Support::Independent(inner) => inner.base_constraint(),
            other => other,
        }
    }

    pub fn is_discrete(&self) -> bool {
        match self.base_constraint() {
            Support::IntegerInterval { .. } | Support::NonNegativeInteger | Support::Boolean => {
                true
            }
            _ => false,
        }
    }

    /// Whether the support is anything other than the full real line.
    pub fn is_bounded(&self) -> bool {
        !matches!(self.base_constraint(), Support::Real)
    }

    /// Check whether a single parameter vector lies within the support.
    pub fn check(&self, row: ArrayView1<f64>) -> bool {
        let is_int = |x: f64| x.fract() == 0.;
        match self {
            Support::Real => row.iter().all(|x| !x.is_nan()),
            Support::GreaterThan { lower } => row.iter().zip(lower).all(|(&x, &l)| x > l),
            Support::LessThan { upper } => row.iter().zip(upper).all(|(&x, &u)| x < u),
            Support::Interval { lower, upper } => row
                .iter()
                .zip(lower)
                .zip(upper)
                .all(|((&x, &l), &u)| (l <= x) & (x <= u)),
            Support::Simplex => {
                row.iter().all(|&x| x >= 0.) & ((row.sum() - 1.).abs() < 1e-6)
            }
            Support::IntegerInterval { lower, upper } => row
                .iter()
                .zip(lower)
                .zip(upper)
                .all(|((&x, &l), &u)| is_int(x) & (l <= x) & (x <= u)),
            Support::NonNegativeInteger => row.iter().all(|&x| is_int(x) & (x >= 0.)),
            Support::Boolean => row.iter().all(|&x| (x == 0.) | (x == 1.)),
            Support::Independent(inner) => inner.check(row),
        }
    }
}

/// A prior over parameter vectors of length [`Prior::dim`].
///
/// Implementors must provide sampling and log densities. The optional
/// capabilities default to absent.
pub trait Prior {
    fn dim(&self) -> usize;

    /// Draw `n` samples, one per row.
    fn sample<R: Rng + ?Sized>(&self, rng: &mut R, n: usize) -> Array2<f64>;

    /// Log density of every row of `batch`.
    fn log_prob(&self, batch: ArrayView2<f64>) -> Array1<f64>;

    fn support(&self) -> Option<Support> {
        None
    }

    fn mean(&self) -> Option<Array1<f64>> {
        None
    }

    fn stddev(&self) -> Option<Array1<f64>> {
        None
    }
}

/// Optional capabilities of a prior, resolved once.
#[derive(Debug, Clone)]
pub struct PriorCapabilities {
    pub support: Option<Support>,
    pub mean: Option<Array1<f64>>,
    pub stddev: Option<Array1<f64>>,
}

impl PriorCapabilities {
    pub fn query<P: Prior + ?Sized>(prior: &P) -> Self {
        Self {
            support: prior.support(),
            mean: prior.mean(),
            stddev: prior.stddev(),
        }
    }

    /// Declared mean and standard deviation, if both are available.
    pub fn moments(&self) -> Option<(&Array1<f64>, &Array1<f64>)> {
        Some((self.mean.as_ref()?, self.stddev.as_ref()?))
    }
}

/// Whether each row of `samples` lies within the support of `prior`.
///
/// Priors without a declared support are checked by requiring a finite
/// log density instead.
pub fn within_support<P: Prior + ?Sized>(prior: &P, samples: ArrayView2<f64>) -> Array1<bool> {
    match prior.support() {
        Some(support) => samples
            .axis_iter(Axis(0))
            .map(|row| support.check(row))
            .collect(),
        None => prior.log_prob(samples).mapv(f64::is_finite),
    }
}

/// Independent uniform distribution on a box.
#[derive(Debug, Clone)]
pub struct BoxUniform {
    low: Array1<f64>,
    high: Array1<f64>,
}

impl BoxUniform {
    /// # Panics
    /// If `low` and `high` differ in length or any `low >= high`.
    pub fn new(low: Array1<f64>, high: Array1<f64>) -> Self {
        assert_eq!(low.len(), high.len(), "Bounds must have the same length");
        assert!(
            low.iter().zip(&high).all(|(l, h)| l < h),
            "Lower bounds must be smaller than upper bounds"
        );
        Self { low, high }
    }

    fn interval(&self) -> Support {
        Support::Interval {
            lower: self.low.clone(),
            upper: self.high.clone(),
        }
    }
}

impl Prior for BoxUniform {
    fn dim(&self) -> usize {
        self.low.len()
    }

    fn sample<R: Rng + ?Sized>(&self, rng: &mut R, n: usize) -> Array2<f64> {
        Array2::from_shape_fn((n, self.dim()), |(_, j)| {
            self.low[j] + (self.high[j] - self.low[j]) * rng.random::<f64>()
        })
    }

    fn log_prob(&self, batch: ArrayView2<f64>) -> Array1<f64> {
        let log_volume: f64 = self
            .low
            .iter()
            .zip(&self.high)
            .map(|(l, h)| (h - l).ln())
            .sum();
        let support = self.interval();
        batch
            .axis_iter(Axis(0))
            .map(|row| {
                if support.check(row) {
                    -log_volume
                } else {
                    f64::NEG_INFINITY
                }
            })
            .collect()
    }

    fn support(&self) -> Option<Support> {
        Some(Support::Independent(Box::new(self.interval())))
    }

    fn mean(&self) -> Option<Array1<f64>> {
        Some((&self.low + &self.high) / 2.)
    }

    fn stddev(&self) -> Option<Array1<f64>> {
        Some((&self.high - &self.low) / 12f64.sqrt())
    }
}

/// Product of independent normal distributions.
#[derive(Debug, Clone)]
pub struct IndependentNormal {
    loc: Array1<f64>,
    scale: Array1<f64>,
}

impl IndependentNormal {
    /// # Panics
    /// If `loc` and `scale` differ in length or any scale is not positive.
    pub fn new(loc: Array1<f64>, scale: Array1<f64>) -> Self {
        assert_eq!(loc.len(), scale.len(), "loc and scale must have the same length");
        assert!(scale.iter().all(|&s| s > 0.), "scale must be positive");
        Self { loc, scale }
    }

    pub fn standard(dim: usize) -> Self {
        Self::new(Array1::zeros(dim), Array1::ones(dim))
    }
}

impl Prior for IndependentNormal {
    fn dim(&self) -> usize {
        self.loc.len()
    }

    fn sample<R: Rng + ?Sized>(&self, rng: &mut R, n: usize) -> Array2<f64> {
        Array2::from_shape_fn((n, self.dim()), |(_, j)| {
            let z: f64 = rng.sample(StandardNormal);
            self.loc[j] + self.scale[j] * z
        })
    }

    fn log_prob(&self, batch: ArrayView2<f64>) -> Array1<f64> {
        let norm: f64 = self
            .scale
            .iter()
            .map(|s| -s.ln() - 0.5 * (2. * std::f64::consts::PI).ln())
            .sum();
        let z = (&batch - &self.loc) / &self.scale;
        z.mapv(|z| -0.5 * z * z).sum_axis(Axis(1)) + norm
    }

    fn support(&self) -> Option<Support> {
        Some(Support::Independent(Box::new(Support::Real)))
    }

    fn mean(&self) -> Option<Array1<f64>> {
        Some(self.loc.clone())
    }

    fn stddev(&self) -> Option<Array1<f64>> {
        Some(self.scale.clone())
    }
}

/// Empirical distribution over a fixed set of rows with a constant log density.
///
/// Every input has log density zero, so nothing is rejected for not matching
/// one of the stored rows exactly.
#[derive(Debug, Clone)]
pub struct ImproperEmpirical {
    samples: Array2<f64>,
}

impl ImproperEmpirical {
    /// # Panics
    /// If `samples` has no rows.
    pub fn new(samples: Array2<f64>) -> Self {
        assert!(samples.nrows() > 0, "Empirical distribution needs samples");
        Self { samples }
    }
}

impl Prior for ImproperEmpirical {
    fn dim(&self) -> usize {
        self.samples.ncols()
    }

    fn sample<R: Rng + ?Sized>(&self, rng: &mut R, n: usize) -> Array2<f64> {
        let indices: Vec<usize> = (0..n)
            .map(|_| rng.random_range(0..self.samples.nrows()))
            .collect();
        self.samples.select(Axis(0), &indices)
    }

    fn log_prob(&self, batch: ArrayView2<f64>) -> Array1<f64> {
        Array1::zeros(batch.nrows())
    }

    fn mean(&self) -> Option<Array1<f64>> {
        self.samples.mean_axis(Axis(0))
    }

    fn stddev(&self) -> Option<Array1<f64>> {
        Some(self.samples.std_axis(Axis(0), 0.))
    }
}
