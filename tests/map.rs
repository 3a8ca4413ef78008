use std::{thread, time::Duration};

use anyhow::Result;
use approx::assert_abs_diff_eq;
use ndarray::{array, Array1};
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use sbi_core::{
    gradient_ascent, mcmc_transform, BoxUniform, CancelToken, LogpError, MapOutcome,
    MapSettings, Potential, Prior, TransformSettings,
};
use thiserror::Error;

#[derive(Error, Debug)]
enum PosteriorError {}

impl LogpError for PosteriorError {
    fn is_recoverable(&self) -> bool {
        true
    }
}

/// Log density of a correlated normal, up to a constant.
struct Posterior {
    mean: Array1<f64>,
    precision: [[f64; 2]; 2],
}

impl Potential for Posterior {
    type LogpError = PosteriorError;

    fn dim(&self) -> usize {
        2
    }

    fn logp(
        &mut self,
        position: &[f64],
        gradient: &mut [f64],
    ) -> std::result::Result<f64, Self::LogpError> {
        let diff = [position[0] - self.mean[0], position[1] - self.mean[1]];
        let mut logp = 0.;
        for i in 0..2 {
            let projected: f64 = (0..2).map(|j| self.precision[i][j] * diff[j]).sum();
            logp -= 0.5 * diff[i] * projected;
            gradient[i] = -projected;
        }
        Ok(logp)
    }
}

fn posterior() -> Posterior {
    Posterior {
        mean: array![0.25, 0.6],
        precision: [[20., 5.], [5., 10.]],
    }
}

#[test]
fn map_within_prior_bounds() -> Result<()> {
    let mut rng = ChaCha8Rng::seed_from_u64(42);
    let prior = BoxUniform::new(array![0., 0.], array![1., 1.]);
    let transform = mcmc_transform(&prior, &TransformSettings::default(), &mut rng)?;
    let inits = prior.sample(&mut rng, 200);

    let settings = MapSettings {
        num_iter: 2000,
        num_to_optimize: 10,
        learning_rate: 0.02,
        ..Default::default()
    };
    let outcome = gradient_ascent(
        &mut posterior(),
        inits.view(),
        Some(&transform),
        &settings,
        &CancelToken::new(),
    )?;
    let MapOutcome::Completed(estimate) = outcome else {
        panic!("optimization was not cancelled");
    };
    assert_abs_diff_eq!(estimate.point, array![0.25, 0.6], epsilon = 1e-2);
    Ok(())
}

#[test]
fn cancel_from_another_thread() -> Result<()> {
    let mut rng = ChaCha8Rng::seed_from_u64(0);
    let prior = BoxUniform::new(array![-5., -5.], array![5., 5.]);
    let inits = prior.sample(&mut rng, 20);
    let settings = MapSettings {
        num_iter: u64::MAX,
        num_to_optimize: 5,
        interruption_note: "Returning the best point so far.".to_string(),
        ..Default::default()
    };

    let token = CancelToken::new();
    let canceller = {
        let token = token.clone();
        thread::spawn(move || {
            thread::sleep(Duration::from_millis(50));
            token.cancel();
        })
    };
    let outcome = gradient_ascent(&mut posterior(), inits.view(), None, &settings, &token)?;
    canceller.join().expect("canceller thread panicked");

    assert!(outcome.is_cancelled());
    let estimate = outcome.estimate();
    let mut potential = posterior();
    let mut grad = [0.; 2];
    let init_best = inits
        .rows()
        .into_iter()
        .map(|row| potential.logp(&row.to_vec(), &mut grad).expect("infallible"))
        .fold(f64::NEG_INFINITY, f64::max);
    assert!(estimate.score >= init_best);
    assert_eq!(
        estimate.score,
        potential.logp(estimate.point.as_slice().expect("contiguous"), &mut grad)?
    );

    // a run that stops right after the last checkpoint before the cancellation
    // has seen the same checkpoints
    if estimate.iterations > 0 {
        let last_checkpoint = (estimate.iterations - 1) / settings.save_best_every
            * settings.save_best_every;
        let reference_settings = MapSettings {
            num_iter: last_checkpoint + 1,
            ..settings.clone()
        };
        let reference = gradient_ascent(
            &mut posterior(),
            inits.view(),
            None,
            &reference_settings,
            &CancelToken::new(),
        )?
        .into_estimate();
        assert_eq!(estimate.point, reference.point);
        assert_eq!(estimate.score, reference.score);
    } else {
        assert_eq!(estimate.score, init_best);
    }
    Ok(())
}
