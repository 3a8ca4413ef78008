//! Numerical core for simulation-based inference.
//!
//! The crate provides the building blocks that sit between a prior, a
//! trained density estimator and a sampler or optimizer:
//!
//! - Standardization of sample batches ([`Standardization`]) that skips
//!   invalid rows and pools statistics for structured data.
//! - Selection of a bijection from unconstrained space onto the support of a
//!   prior ([`mcmc_transform`]), validated by a round trip on prior samples.
//! - Log densities of Gaussian mixtures with per-row parameters
//!   ([`mog_log_prob`]), using batched contractions.
//! - Expansion of parameter and observation batches to all pairs
//!   ([`match_theta_and_x_batch_shapes`]).
//! - MAP estimation by gradient ascent ([`gradient_ascent`]) with
//!   cooperative cancellation.
//!
//! ## Example
//!
//! ```
//! use ndarray::array;
//! use rand::SeedableRng;
//! use sbi_core::{mcmc_transform, BoxUniform, TransformSettings};
//!
//! let prior = BoxUniform::new(array![0., -1.], array![1., 1.]);
//! let mut rng = rand::rngs::SmallRng::seed_from_u64(42);
//! let transform = mcmc_transform(&prior, &TransformSettings::default(), &mut rng)
//!     .expect("box priors have a valid transform");
//!
//! let constrained = transform.forward(array![[-10., 10.]].view());
//! assert!(constrained[(0, 0)] > 0. && constrained[(0, 1)] < 1.);
//! ```

mod adam;
mod batch;
mod distribution;
mod error;
mod map;
mod math;
mod mixture;
mod standardize;
mod support_transform;
mod transform;

pub use adam::{Adam, AdamOptions};
pub use batch::match_theta_and_x_batch_shapes;
pub use distribution::{
    within_support, BoxUniform, ImproperEmpirical, IndependentNormal, Prior, PriorCapabilities,
    Support,
};
pub use error::{ErrorKind, LogpError, Result, SbiError};
pub use map::{gradient_ascent, CancelToken, MapEstimate, MapOutcome, MapSettings, Potential};
pub use math::{expit, logit, logsumexp};
pub use mixture::{batched_mixture_mv, batched_mixture_vmv, mog_log_prob};
pub use standardize::{
    invalid_rows, warn_if_zscoring_changes_data, InvalidRows, Standardization,
    StandardizationMode, ZScore, DEFAULT_MIN_STD,
};
pub use support_transform::{check_transform, mcmc_transform, TransformSettings};
pub use transform::{
    AffineTransform, Bijection, ComposeTransform, ExpTransform, IdentityTransform,
    IndependentTransform, ParameterTransform, SigmoidTransform, StickBreakingTransform,
};
