//! Adam optimizer for a flat parameter buffer.
//!
//! Keeps exponential moving averages of the gradient and its square for
//! every parameter and scales each update by their bias-corrected ratio.

use crate::math::adam_update;

/// Settings for the Adam optimizer
#[derive(Debug, Clone, Copy)]
pub struct AdamOptions {
    /// First moment decay rate (default: 0.9)
    pub beta1: f64,
    /// Second moment decay rate (default: 0.999)
    pub beta2: f64,
    /// Small constant for numerical stability (default: 1e-8)
    pub epsilon: f64,
    /// Learning rate (default: 0.01)
    pub learning_rate: f64,
}

impl Default for AdamOptions {
    fn default() -> Self {
        Self {
            beta1: 0.9,
            beta2: 0.999,
            epsilon: 1e-8,
            learning_rate: 0.01,
        }
    }
}

/// Adam state for `dim` parameters.
///
/// [`Adam::step`] minimizes, callers that maximize pass the negated gradient.
#[derive(Debug, Clone)]
pub struct Adam {
    /// First moment estimate
    m: Vec<f64>,
    /// Second moment estimate
    v: Vec<f64>,
    /// Iteration counter
    t: u64,
    settings: AdamOptions,
}

impl Adam {
    pub fn new(settings: AdamOptions, dim: usize) -> Self {
        Self {
            m: vec![0.; dim],
            v: vec![0.; dim],
            t: 0,
            settings,
        }
    }

    /// Move `params` one step against `grad`.
    pub fn step(&mut self, params: &mut [f64], grad: &[f64]) {
        self.t += 1;
        let t = i32::try_from(self.t).unwrap_or(i32::MAX);
        let bias1 = 1. - self.settings.beta1.powi(t);
        let bias2 = 1. - self.settings.beta2.powi(t);
        adam_update(
            params,
            grad,
            &mut self.m,
            &mut self.v,
            self.settings.beta1,
            self.settings.beta2,
            bias1,
            bias2,
            self.settings.learning_rate,
            self.settings.epsilon,
        );
    }

    /// Number of steps taken so far.
    pub fn num_steps(&self) -> u64 {
        self.t
    }
}
