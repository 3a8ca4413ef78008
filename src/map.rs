//! Maximum-a-posteriori estimation by gradient ascent on a potential.

use std::{
    borrow::Cow,
    cmp::Ordering,
    sync::{
        atomic::{AtomicBool, Ordering as AtomicOrdering},
        Arc,
    },
};

use ndarray::{Array1, Array2, ArrayView1, ArrayView2, Axis};

use crate::{
    adam::{Adam, AdamOptions},
    error::{LogpError, SbiError},
    math::vector_dot,
    transform::ParameterTransform,
};

/// Unnormalized log density that is maximized.
///
/// Like the log density of a sampler, the value and the gradient with
/// respect to the constrained position are computed together.
pub trait Potential {
    type LogpError: LogpError + 'static;

    fn dim(&self) -> usize;

    fn logp(&mut self, position: &[f64], gradient: &mut [f64]) -> Result<f64, Self::LogpError>;

    /// Evaluate only the value of the potential.
    fn logp_value(&mut self, position: &[f64]) -> Result<f64, Self::LogpError> {
        let mut gradient = vec![0.; position.len()];
        self.logp(position, &mut gradient)
    }
}

/// Settings for [`gradient_ascent`].
#[derive(Debug, Clone)]
pub struct MapSettings {
    /// Number of optimization steps.
    pub num_iter: u64,
    /// Number of initial points with the highest potential that are optimized.
    pub num_to_optimize: usize,
    pub learning_rate: f64,
    /// Re-evaluate the current points every this many iterations and keep
    /// the best one seen so far.
    pub save_best_every: u64,
    /// Log the iteration and the best potential of the last checkpoint after
    /// every iteration.
    pub show_progress: bool,
    /// Appended to the warning that is logged if the optimization is cancelled.
    pub interruption_note: String,
    /// Decay rates and epsilon of the optimizer, its learning rate is
    /// replaced by [`MapSettings::learning_rate`].
    pub adam: AdamOptions,
}

impl Default for MapSettings {
    fn default() -> Self {
        Self {
            num_iter: 1000,
            num_to_optimize: 100,
            learning_rate: 0.01,
            save_best_every: 10,
            show_progress: false,
            interruption_note: String::new(),
            adam: AdamOptions::default(),
        }
    }
}

/// Shared flag to stop an optimization between iterations.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, AtomicOrdering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(AtomicOrdering::SeqCst)
    }
}

/// Best point found, in constrained space.
#[derive(Debug, Clone, PartialEq)]
pub struct MapEstimate {
    pub point: Array1<f64>,
    pub score: f64,
    /// Number of completed optimization steps.
    pub iterations: u64,
}

#[derive(Debug, Clone, PartialEq)]
pub enum MapOutcome {
    Completed(MapEstimate),
    Cancelled(MapEstimate),
}

impl MapOutcome {
    pub fn estimate(&self) -> &MapEstimate {
        match self {
            MapOutcome::Completed(estimate) | MapOutcome::Cancelled(estimate) => estimate,
        }
    }

    pub fn into_estimate(self) -> MapEstimate {
        match self {
            MapOutcome::Completed(estimate) | MapOutcome::Cancelled(estimate) => estimate,
        }
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, MapOutcome::Cancelled(_))
    }
}

/// Evaluate the potential for every row of `points`.
///
/// Recoverable errors and NaN values score `-inf`, with a zero gradient if
/// gradients are requested.
fn evaluate<P: Potential + ?Sized>(
    potential: &mut P,
    points: ArrayView2<f64>,
    mut gradients: Option<&mut Array2<f64>>,
) -> Result<Array1<f64>, SbiError> {
    let mut buffer = vec![0.; points.ncols()];
    points
        .axis_iter(Axis(0))
        .enumerate()
        .map(|(i, row)| {
            let position = row
                .as_slice()
                .map_or_else(|| Cow::Owned(row.to_vec()), Cow::Borrowed);
            let result = if gradients.is_some() {
                potential.logp(&position, &mut buffer)
            } else {
                potential.logp_value(&position)
            };
            let score = match result {
                Ok(score) if !score.is_nan() => score,
                Ok(_) => {
                    buffer.iter_mut().for_each(|g| *g = 0.);
                    f64::NEG_INFINITY
                }
                Err(err) if err.is_recoverable() => {
                    buffer.iter_mut().for_each(|g| *g = 0.);
                    f64::NEG_INFINITY
                }
                Err(err) => return Err(SbiError::LogpFailure(Box::new(err))),
            };
            if let Some(gradients) = gradients.as_deref_mut() {
                gradients.row_mut(i).assign(&ArrayView1::from(&buffer[..]));
            }
            Ok(score)
        })
        .collect()
}

fn descending(a: f64, b: f64) -> Ordering {
    b.total_cmp(&a)
}

fn argmax(scores: &Array1<f64>) -> Option<usize> {
    scores
        .iter()
        .enumerate()
        .min_by(|(_, a), (_, b)| descending(**a, **b))
        .map(|(i, _)| i)
}

fn rows_view(params: &[f64], dim: usize) -> Result<ArrayView2<f64>, SbiError> {
    let rows = params.len() / dim.max(1);
    ArrayView2::from_shape((rows, dim), params).map_err(|_| SbiError::ShapeMismatch {
        what: "optimized parameters",
        expected: vec![rows, dim],
        found: vec![params.len()],
    })
}

/// Find the point with the highest potential.
///
/// The potential is evaluated at all `inits` (one point per row, in
/// constrained space) and the `num_to_optimize` best are optimized jointly
/// with Adam in the unconstrained space of `transform`. Every
/// `save_best_every` iterations and after the last one the current points are
/// re-evaluated. The returned estimate is the best point seen at any of those
/// checkpoints or among the initial points.
///
/// `cancel` is checked before every iteration. If it is set, the best point
/// so far is returned as [`MapOutcome::Cancelled`].
pub fn gradient_ascent<P: Potential + ?Sized>(
    potential: &mut P,
    inits: ArrayView2<f64>,
    transform: Option<&ParameterTransform>,
    settings: &MapSettings,
    cancel: &CancelToken,
) -> Result<MapOutcome, SbiError> {
    let dim = potential.dim();
    if inits.ncols() != dim || inits.nrows() == 0 {
        return Err(SbiError::ShapeMismatch {
            what: "initial points",
            expected: vec![inits.nrows().max(1), dim],
            found: inits.shape().to_vec(),
        });
    }
    let identity;
    let transform = match transform {
        Some(transform) => transform,
        None => {
            identity = ParameterTransform::identity();
            &identity
        }
    };

    let init_scores = evaluate(potential, inits, None)?;
    let mut order: Vec<usize> = (0..inits.nrows()).collect();
    order.sort_by(|&a, &b| descending(init_scores[a], init_scores[b]));
    order.truncate(settings.num_to_optimize.max(1));

    let mut best_point = inits.row(order[0]).to_owned();
    let mut best_score = init_scores[order[0]];

    let selected = inits.select(Axis(0), &order);
    let mut params: Vec<f64> = transform.inverse(selected.view()).iter().copied().collect();
    let mut gradients = Array2::zeros((order.len(), dim));
    let mut adam = Adam::new(
        AdamOptions {
            learning_rate: settings.learning_rate,
            ..settings.adam
        },
        params.len(),
    );
    let save_best_every = settings.save_best_every.max(1);

    for iter in 0..settings.num_iter {
        if cancel.is_cancelled() {
            tracing::warn!(
                "Optimization was interrupted after {} iterations. {}",
                iter,
                settings.interruption_note
            );
            return Ok(MapOutcome::Cancelled(MapEstimate {
                point: best_point,
                score: best_score,
                iterations: adam.num_steps(),
            }));
        }

        let unconstrained = rows_view(&params, dim)?;
        let points = transform.forward(unconstrained);
        evaluate(potential, points.view(), Some(&mut gradients))?;
        let loss_grad: Vec<f64> = transform
            .pullback(unconstrained, gradients.view())
            .iter()
            .map(|g| -g)
            .collect();
        adam.step(&mut params, &loss_grad);

        if iter % save_best_every == 0 || iter + 1 == settings.num_iter {
            let points = transform.forward(rows_view(&params, dim)?);
            let scores = evaluate(potential, points.view(), None)?;
            if let Some(best) = argmax(&scores) {
                if scores[best] > best_score {
                    tracing::debug!(iteration = iter, score = scores[best], "New best point");
                    best_score = scores[best];
                    best_point = points.row(best).to_owned();
                }
            }
        }
        if settings.show_progress {
            tracing::info!(
                iteration = iter + 1,
                num_iter = settings.num_iter,
                best_score,
                grad_norm = vector_dot(&loss_grad, &loss_grad).sqrt(),
                "Optimizing MAP estimate"
            );
        }
    }

    Ok(MapOutcome::Completed(MapEstimate {
        point: best_point,
        score: best_score,
        iterations: adam.num_steps(),
    }))
}
