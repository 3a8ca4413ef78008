//! Choose a bijection from unconstrained space onto the support of a prior.

use ndarray::Array2;
use rand::Rng;

use crate::{
    distribution::{Prior, PriorCapabilities, Support},
    error::{Result, SbiError},
    standardize::{apply_floor, Standardization, StandardizationMode, DEFAULT_MIN_STD},
    transform::{
        AffineTransform, Bijection, ExpTransform, ParameterTransform, SigmoidTransform,
        StickBreakingTransform,
    },
};

/// Settings for [`mcmc_transform`].
#[derive(Debug, Clone, Copy)]
pub struct TransformSettings {
    /// If `false`, the identity transform is returned.
    pub enable_transform: bool,
    /// Number of prior draws used to estimate mean and standard deviation
    /// if the prior does not declare them.
    pub num_prior_samples_for_zscoring: usize,
    /// Absolute tolerance for the round-trip check.
    pub atol: f64,
}

impl Default for TransformSettings {
    fn default() -> Self {
        Self {
            enable_transform: true,
            num_prior_samples_for_zscoring: 1000,
            atol: 1e-3,
        }
    }
}

/// Build a transform whose forward direction maps unconstrained values onto
/// the support of `prior`.
///
/// Bounded continuous supports use their canonical bijection. Discrete and
/// unbounded supports, and priors without a declared support, are handled
/// with an affine map built from the prior mean and standard deviation.
/// The returned transform is validated with [`check_transform`].
pub fn mcmc_transform<P, R>(
    prior: &P,
    settings: &TransformSettings,
    rng: &mut R,
) -> Result<ParameterTransform>
where
    P: Prior + ?Sized,
    R: Rng + ?Sized,
{
    if !settings.enable_transform {
        return Ok(ParameterTransform::identity());
    }

    let capabilities = PriorCapabilities::query(prior);
    let bijection: Box<dyn Bijection> = match &capabilities.support {
        None => {
            tracing::warn!(
                "The prior does not declare a support, falling back to a transform based on \
                 the prior mean and standard deviation"
            );
            Box::new(moments_transform(prior, &capabilities, settings, rng)?)
        }
        Some(support) if support.is_discrete() => {
            Box::new(moments_transform(prior, &capabilities, settings, rng)?)
        }
        Some(support) => match support_bijection(support) {
            Some(bijection) => bijection,
            None => Box::new(moments_transform(prior, &capabilities, settings, rng)?),
        },
    };

    let transform = ParameterTransform::new(bijection);
    check_transform(prior, &transform, settings.atol, rng)?;
    Ok(transform)
}

/// Canonical bijection for a bounded continuous support, `None` for the real line.
fn support_bijection(support: &Support) -> Option<Box<dyn Bijection>> {
    match support.base_constraint() {
        Support::Interval { lower, upper } => {
            Some(Box::new(SigmoidTransform::new(lower.clone(), upper.clone())))
        }
        Support::GreaterThan { lower } => Some(Box::new(ExpTransform::lower(lower.clone()))),
        Support::LessThan { upper } => Some(Box::new(ExpTransform::upper(upper.clone()))),
        Support::Simplex => Some(Box::new(StickBreakingTransform)),
        Support::Real => None,
        Support::IntegerInterval { .. }
        | Support::NonNegativeInteger
        | Support::Boolean
        | Support::Independent(_) => None,
    }
}

/// `x = mean + std * z` with declared or estimated moments of `prior`.
fn moments_transform<P, R>(
    prior: &P,
    capabilities: &PriorCapabilities,
    settings: &TransformSettings,
    rng: &mut R,
) -> Result<AffineTransform>
where
    P: Prior + ?Sized,
    R: Rng + ?Sized,
{
    let stats = match capabilities.moments() {
        Some((mean, std)) => {
            let mut std = std.clone();
            apply_floor(&mut std, DEFAULT_MIN_STD);
            Standardization::from_moments(mean.clone(), std, StandardizationMode::Independent)?
        }
        None => {
            tracing::warn!(
                num_samples = settings.num_prior_samples_for_zscoring,
                "The prior does not declare a mean and standard deviation, estimating them \
                 from prior samples"
            );
            let samples = prior.sample(rng, settings.num_prior_samples_for_zscoring);
            Standardization::fit(samples.view(), StandardizationMode::Independent, DEFAULT_MIN_STD)?
        }
    };
    Ok(stats.unstandardize())
}

/// Check that `transform` reproduces prior samples after a round trip
/// through unconstrained space.
pub fn check_transform<P, R>(
    prior: &P,
    transform: &ParameterTransform,
    atol: f64,
    rng: &mut R,
) -> Result<()>
where
    P: Prior + ?Sized,
    R: Rng + ?Sized,
{
    let theta = prior.sample(rng, 2);
    let unconstrained = transform.inverse(theta.view());
    if unconstrained.shape() != theta.shape() {
        return Err(SbiError::RoundTripShape {
            expected: theta.shape().to_vec(),
            found: unconstrained.shape().to_vec(),
        });
    }
    let restored = transform.forward(unconstrained.view());
    let max_abs_diff = max_abs_diff(&restored, &theta);
    // NaN fails the comparison
    if !(max_abs_diff <= atol) {
        return Err(SbiError::RoundTripMismatch { max_abs_diff });
    }
    Ok(())
}

fn max_abs_diff(a: &Array2<f64>, b: &Array2<f64>) -> f64 {
    (a - b).iter().fold(0f64, |acc, d| {
        if acc.is_nan() || d.is_nan() {
            f64::NAN
        } else {
            acc.max(d.abs())
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        distribution::{BoxUniform, ImproperEmpirical, IndependentNormal},
        error::ErrorKind,
    };
    use approx::assert_abs_diff_eq;
    use ndarray::{array, Array1, ArrayView2, Axis};
    use pretty_assertions::assert_eq;
    use rand::SeedableRng;
    use rand_chacha::ChaCha8Rng;
    use rand_distr::Exp1;

    /// Normal prior that hides some of its capabilities.
    struct Opaque {
        inner: IndependentNormal,
        support: Option<Support>,
    }

    impl Prior for Opaque {
        fn dim(&self) -> usize {
            self.inner.dim()
        }

        fn sample<R: Rng + ?Sized>(&self, rng: &mut R, n: usize) -> Array2<f64> {
            self.inner.sample(rng, n)
        }

        fn log_prob(&self, batch: ArrayView2<f64>) -> Array1<f64> {
            self.inner.log_prob(batch)
        }

        fn support(&self) -> Option<Support> {
            self.support.clone()
        }
    }

    /// Shifted exponential distribution.
    struct Shifted {
        lower: f64,
        sign: f64,
    }

    impl Prior for Shifted {
        fn dim(&self) -> usize {
            1
        }

        fn sample<R: Rng + ?Sized>(&self, rng: &mut R, n: usize) -> Array2<f64> {
            Array2::from_shape_fn((n, 1), |_| {
                let e: f64 = rng.sample(Exp1);
                self.lower + self.sign * (e + 1e-3)
            })
        }

        fn log_prob(&self, batch: ArrayView2<f64>) -> Array1<f64> {
            batch.column(0).mapv(|x| -(self.sign * (x - self.lower)))
        }

        fn support(&self) -> Option<Support> {
            let bound = array![self.lower];
            Some(if self.sign > 0. {
                Support::GreaterThan { lower: bound }
            } else {
                Support::LessThan { upper: bound }
            })
        }
    }

    /// Uniform distribution on the simplex.
    struct FlatDirichlet {
        dim: usize,
    }

    impl Prior for FlatDirichlet {
        fn dim(&self) -> usize {
            self.dim
        }

        fn sample<R: Rng + ?Sized>(&self, rng: &mut R, n: usize) -> Array2<f64> {
            let mut draws = Array2::from_shape_fn((n, self.dim), |_| rng.sample::<f64, _>(Exp1));
            let sums = draws.sum_axis(Axis(1)).insert_axis(Axis(1));
            draws /= &sums;
            draws
        }

        fn log_prob(&self, batch: ArrayView2<f64>) -> Array1<f64> {
            Array1::zeros(batch.nrows())
        }

        fn support(&self) -> Option<Support> {
            Some(Support::Simplex)
        }
    }

    #[test]
    fn disabled_transform_is_identity() {
        let mut rng = ChaCha8Rng::seed_from_u64(0);
        let prior = BoxUniform::new(array![0.], array![1.]);
        let settings = TransformSettings {
            enable_transform: false,
            ..Default::default()
        };
        let transform = mcmc_transform(&prior, &settings, &mut rng).expect("identity");
        let z = array![[-3.], [7.]];
        assert_eq!(transform.forward(z.view()), z);
    }

    #[test]
    fn interval_support_uses_sigmoid() {
        let mut rng = ChaCha8Rng::seed_from_u64(1);
        let prior = BoxUniform::new(array![-2., 0.], array![2., 10.]);
        let transform =
            mcmc_transform(&prior, &TransformSettings::default(), &mut rng).expect("valid");
        let x = transform.forward(array![[-50., 50.], [0., 0.]].view());
        assert!(within_bounds(&x, -2., 10.));
        assert_abs_diff_eq!(x.row(1), array![0., 5.], epsilon = 1e-12);

        let theta = prior.sample(&mut rng, 20);
        let back = transform.forward(transform.inverse(theta.view()).view());
        assert_abs_diff_eq!(back, theta, epsilon = 1e-9);
    }

    fn within_bounds(x: &Array2<f64>, lower: f64, upper: f64) -> bool {
        x.iter().all(|&v| (lower..=upper).contains(&v))
    }

    #[test]
    fn half_bounded_supports() {
        let mut rng = ChaCha8Rng::seed_from_u64(2);
        for sign in [1., -1.] {
            let prior = Shifted { lower: 3., sign };
            let transform =
                mcmc_transform(&prior, &TransformSettings::default(), &mut rng).expect("valid");
            let x = transform.forward(array![[-5.], [0.], [2.]].view());
            assert!(x.iter().all(|&v| sign * (v - 3.) > 0.));
            assert_abs_diff_eq!(x[(1, 0)], 3. + sign, epsilon = 1e-12);
        }
    }

    #[test]
    fn real_support_uses_declared_moments() {
        let mut rng = ChaCha8Rng::seed_from_u64(3);
        let prior = IndependentNormal::new(array![1., -4.], array![2., 0.5]);
        let transform =
            mcmc_transform(&prior, &TransformSettings::default(), &mut rng).expect("valid");
        let x = transform.forward(array![[0., 0.], [1., 1.]].view());
        assert_abs_diff_eq!(x, array![[1., -4.], [3., -3.5]], epsilon = 1e-12);
        let log_det = transform.log_abs_det_jacobian(array![[0., 0.]].view());
        // ln(2) + ln(0.5)
        assert_abs_diff_eq!(log_det[0], 0., epsilon = 1e-12);
    }

    #[test]
    fn estimated_moments_are_deterministic() {
        let prior = Opaque {
            inner: IndependentNormal::new(array![5.], array![3.]),
            support: Some(Support::Real),
        };
        let run = |seed| {
            let mut rng = ChaCha8Rng::seed_from_u64(seed);
            let transform =
                mcmc_transform(&prior, &TransformSettings::default(), &mut rng).expect("valid");
            transform.forward(array![[0.], [1.]].view())
        };
        let first = run(7);
        assert_eq!(first, run(7));
        // the estimated mean and std are close to the true ones
        assert!((first[(0, 0)] - 5.).abs() < 0.5);
        assert!((first[(1, 0)] - first[(0, 0)] - 3.).abs() < 0.5);
    }

    #[test]
    fn missing_support_falls_back_to_moments() {
        let mut rng = ChaCha8Rng::seed_from_u64(4);
        let prior = ImproperEmpirical::new(array![[0., 10.], [2., 10.]]);
        let transform =
            mcmc_transform(&prior, &TransformSettings::default(), &mut rng).expect("valid");
        let x = transform.forward(array![[0., 0.], [1., 1.]].view());
        // the constant column has a floored std
        assert_abs_diff_eq!(x, array![[1., 10.], [2., 10.]], epsilon = 1e-9);

        let hidden = Opaque {
            inner: IndependentNormal::standard(3),
            support: None,
        };
        mcmc_transform(&hidden, &TransformSettings::default(), &mut rng).expect("valid");
    }

    #[test]
    fn discrete_support_uses_moments() {
        let mut rng = ChaCha8Rng::seed_from_u64(5);
        let prior = Opaque {
            inner: IndependentNormal::standard(2),
            support: Some(Support::Independent(Box::new(Support::NonNegativeInteger))),
        };
        let transform =
            mcmc_transform(&prior, &TransformSettings::default(), &mut rng).expect("valid");
        assert_eq!(transform.bijection().event_dim(), 1);
    }

    #[test]
    fn simplex_fails_round_trip() {
        let mut rng = ChaCha8Rng::seed_from_u64(6);
        let prior = FlatDirichlet { dim: 3 };
        let err = mcmc_transform(&prior, &TransformSettings::default(), &mut rng)
            .expect_err("shape changes");
        assert!(matches!(
            &err,
            SbiError::RoundTripShape { expected, found }
                if expected == &vec![2, 3] && found == &vec![2, 2]
        ));
        assert_eq!(err.kind(), ErrorKind::Validation);
    }

    #[test]
    fn mismatching_transform_is_rejected() {
        let mut rng = ChaCha8Rng::seed_from_u64(8);
        // the sigmoid can not reach samples outside of its bounds
        let prior = IndependentNormal::new(array![100.], array![1.]);
        let transform =
            ParameterTransform::new(Box::new(SigmoidTransform::new(array![0.], array![1.])));
        let err = check_transform(&prior, &transform, 1e-3, &mut rng).expect_err("NaN");
        assert!(matches!(err, SbiError::RoundTripMismatch { .. }));
    }
}
