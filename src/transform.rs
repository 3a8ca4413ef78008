//! Bijections between unconstrained space and the support of a prior.
//!
//! All transforms act on batches with one parameter vector per row. The
//! forward direction maps unconstrained values `z` to constrained values `x`.

use std::{fmt::Debug, sync::Arc};

use itertools::izip;
use ndarray::{Array1, Array2, ArrayView1, ArrayView2, ArrayViewMut1, Axis, Zip};

use crate::math::{log_sigmoid, logit, sigmoid};

pub trait Bijection: Debug + Send + Sync {
    /// Map unconstrained rows to constrained rows.
    fn forward(&self, z: ArrayView2<f64>) -> Array2<f64>;

    /// Map constrained rows to unconstrained rows.
    fn inverse(&self, x: ArrayView2<f64>) -> Array2<f64>;

    /// `log|dx/dz|` at `z`.
    ///
    /// Elementwise transforms return one value per entry of `z`, transforms
    /// with `event_dim() == 1` return a single column.
    fn log_abs_det_jacobian(&self, z: ArrayView2<f64>) -> Array2<f64>;

    /// Pull a gradient with respect to `x = forward(z)` back to `z`.
    fn pullback(&self, z: ArrayView2<f64>, grad: ArrayView2<f64>) -> Array2<f64>;

    /// Number of trailing axes that form a single event.
    fn event_dim(&self) -> usize {
        0
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct IdentityTransform;

impl Bijection for IdentityTransform {
    fn forward(&self, z: ArrayView2<f64>) -> Array2<f64> {
        z.to_owned()
    }

    fn inverse(&self, x: ArrayView2<f64>) -> Array2<f64> {
        x.to_owned()
    }

    fn log_abs_det_jacobian(&self, z: ArrayView2<f64>) -> Array2<f64> {
        Array2::zeros(z.raw_dim())
    }

    fn pullback(&self, _z: ArrayView2<f64>, grad: ArrayView2<f64>) -> Array2<f64> {
        grad.to_owned()
    }
}

/// `x = loc + scale * z`.
///
/// `loc` and `scale` either have one entry per column or a single entry
/// that is shared by all columns.
#[derive(Debug, Clone)]
pub struct AffineTransform {
    loc: Array1<f64>,
    scale: Array1<f64>,
}

impl AffineTransform {
    pub fn new(loc: Array1<f64>, scale: Array1<f64>) -> Self {
        assert_eq!(loc.len(), scale.len(), "loc and scale must have equal length");
        Self { loc, scale }
    }

    pub fn loc(&self) -> ArrayView1<f64> {
        self.loc.view()
    }

    pub fn scale(&self) -> ArrayView1<f64> {
        self.scale.view()
    }
}

impl Bijection for AffineTransform {
    fn forward(&self, z: ArrayView2<f64>) -> Array2<f64> {
        &z * &self.scale + &self.loc
    }

    fn inverse(&self, x: ArrayView2<f64>) -> Array2<f64> {
        (&x - &self.loc) / &self.scale
    }

    fn log_abs_det_jacobian(&self, z: ArrayView2<f64>) -> Array2<f64> {
        Array2::<f64>::zeros(z.raw_dim()) + &self.scale.mapv(|s| s.abs().ln())
    }

    fn pullback(&self, _z: ArrayView2<f64>, grad: ArrayView2<f64>) -> Array2<f64> {
        &grad * &self.scale
    }
}

/// `x = bound + exp(z)` for lower bounds, `x = bound - exp(z)` for upper bounds.
#[derive(Debug, Clone)]
pub struct ExpTransform {
    bound: Array1<f64>,
    sign: f64,
}

impl ExpTransform {
    pub fn lower(bound: Array1<f64>) -> Self {
        Self { bound, sign: 1. }
    }

    pub fn upper(bound: Array1<f64>) -> Self {
        Self { bound, sign: -1. }
    }
}

impl Bijection for ExpTransform {
    fn forward(&self, z: ArrayView2<f64>) -> Array2<f64> {
        z.mapv(f64::exp) * self.sign + &self.bound
    }

    fn inverse(&self, x: ArrayView2<f64>) -> Array2<f64> {
        ((&x - &self.bound) * self.sign).mapv(f64::ln)
    }

    fn log_abs_det_jacobian(&self, z: ArrayView2<f64>) -> Array2<f64> {
        z.to_owned()
    }

    fn pullback(&self, z: ArrayView2<f64>, grad: ArrayView2<f64>) -> Array2<f64> {
        &grad * &z.mapv(f64::exp) * self.sign
    }
}

/// `x = lower + (upper - lower) * sigmoid(z)`.
#[derive(Debug, Clone)]
pub struct SigmoidTransform {
    lower: Array1<f64>,
    upper: Array1<f64>,
}

impl SigmoidTransform {
    pub fn new(lower: Array1<f64>, upper: Array1<f64>) -> Self {
        assert_eq!(lower.len(), upper.len(), "Bounds must have the same length");
        Self { lower, upper }
    }
}

impl Bijection for SigmoidTransform {
    fn forward(&self, z: ArrayView2<f64>) -> Array2<f64> {
        let mut out = Array2::zeros(z.raw_dim());
        Zip::from(&mut out)
            .and(&z)
            .and_broadcast(&self.lower)
            .and_broadcast(&self.upper)
            .for_each(|out, &z, &lower, &upper| {
                *out = lower + (upper - lower) * sigmoid(z);
            });
        out
    }

    fn inverse(&self, x: ArrayView2<f64>) -> Array2<f64> {
        let mut out = Array2::zeros(x.raw_dim());
        Zip::from(&mut out)
            .and(&x)
            .and_broadcast(&self.lower)
            .and_broadcast(&self.upper)
            .for_each(|out, &x, &lower, &upper| {
                *out = logit(x, lower, upper);
            });
        out
    }

    fn log_abs_det_jacobian(&self, z: ArrayView2<f64>) -> Array2<f64> {
        let mut out = Array2::zeros(z.raw_dim());
        Zip::from(&mut out)
            .and(&z)
            .and_broadcast(&self.lower)
            .and_broadcast(&self.upper)
            .for_each(|out, &z, &lower, &upper| {
                *out = (upper - lower).ln() + log_sigmoid(z) + log_sigmoid(-z);
            });
        out
    }

    fn pullback(&self, z: ArrayView2<f64>, grad: ArrayView2<f64>) -> Array2<f64> {
        let mut out = Array2::zeros(z.raw_dim());
        Zip::from(&mut out)
            .and(&z)
            .and(&grad)
            .and_broadcast(&self.lower)
            .and_broadcast(&self.upper)
            .for_each(|out, &z, &grad, &lower, &upper| {
                let s = sigmoid(z);
                *out = grad * (upper - lower) * s * (1. - s);
            });
        out
    }
}

/// Maps `K - 1` unconstrained values to a point on the `K`-simplex.
///
/// This changes the number of columns, so a round trip through
/// `inverse` does not preserve the shape of constrained rows.
#[derive(Debug, Clone, Copy, Default)]
pub struct StickBreakingTransform;

impl StickBreakingTransform {
    /// Log of the offset that centers `z = 0` on the uniform simplex point.
    fn log_offset(i: usize, n: usize) -> f64 {
        ((n - i) as f64).ln()
    }

    fn forward_row(z: ArrayView1<f64>, mut x: ArrayViewMut1<f64>) {
        let n = z.len();
        let mut remaining = 1.;
        for (i, &z) in z.iter().enumerate() {
            let s = sigmoid(z - Self::log_offset(i, n));
            x[i] = s * remaining;
            remaining *= 1. - s;
        }
        x[n] = remaining;
    }
}

impl Bijection for StickBreakingTransform {
    fn forward(&self, z: ArrayView2<f64>) -> Array2<f64> {
        let mut out = Array2::zeros((z.nrows(), z.ncols() + 1));
        izip!(z.axis_iter(Axis(0)), out.axis_iter_mut(Axis(0)))
            .for_each(|(z, x)| Self::forward_row(z, x));
        out
    }

    fn inverse(&self, x: ArrayView2<f64>) -> Array2<f64> {
        let n = x.ncols().saturating_sub(1);
        let mut out = Array2::zeros((x.nrows(), n));
        izip!(x.axis_iter(Axis(0)), out.axis_iter_mut(Axis(0))).for_each(|(x, mut z)| {
            let mut cumsum = 0.;
            for i in 0..n {
                cumsum += x[i];
                let remaining = (1. - cumsum).max(f64::MIN_POSITIVE);
                z[i] = x[i].ln() - remaining.ln() + Self::log_offset(i, n);
            }
        });
        out
    }

    fn log_abs_det_jacobian(&self, z: ArrayView2<f64>) -> Array2<f64> {
        let n = z.ncols();
        let values = z.axis_iter(Axis(0)).map(|z| {
            let mut remaining = 1f64;
            let mut total = 0.;
            for (i, &z) in z.iter().enumerate() {
                let shifted = z - Self::log_offset(i, n);
                total += remaining.ln() + log_sigmoid(shifted) + log_sigmoid(-shifted);
                remaining *= 1. - sigmoid(shifted);
            }
            total
        });
        Array1::from_iter(values).insert_axis(Axis(1))
    }

    fn pullback(&self, z: ArrayView2<f64>, grad: ArrayView2<f64>) -> Array2<f64> {
        let n = z.ncols();
        let mut out = Array2::zeros(z.raw_dim());
        izip!(
            z.axis_iter(Axis(0)),
            grad.axis_iter(Axis(0)),
            out.axis_iter_mut(Axis(0))
        )
        .for_each(|(z, grad, mut out)| {
            let s: Vec<f64> = z
                .iter()
                .enumerate()
                .map(|(i, &z)| sigmoid(z - Self::log_offset(i, n)))
                .collect();
            let mut remaining = Vec::with_capacity(n);
            let mut r = 1.;
            for &s in s.iter() {
                remaining.push(r);
                r *= 1. - s;
            }

            // Reverse pass through `x_i = s_i r_i`, `r_{i+1} = r_i (1 - s_i)`.
            let mut grad_r = grad[n];
            for i in (0..n).rev() {
                let grad_s = (grad[i] - grad_r) * remaining[i];
                grad_r = grad[i] * s[i] + grad_r * (1. - s[i]);
                out[i] = grad_s * s[i] * (1. - s[i]);
            }
        });
        out
    }

    fn event_dim(&self) -> usize {
        1
    }
}

/// Treats the last axis of the inner transform as one event, so that
/// log-determinants are summed over parameter dimensions.
#[derive(Debug)]
pub struct IndependentTransform {
    inner: Box<dyn Bijection>,
}

impl IndependentTransform {
    pub fn new(inner: Box<dyn Bijection>) -> Self {
        Self { inner }
    }
}

impl Bijection for IndependentTransform {
    fn forward(&self, z: ArrayView2<f64>) -> Array2<f64> {
        self.inner.forward(z)
    }

    fn inverse(&self, x: ArrayView2<f64>) -> Array2<f64> {
        self.inner.inverse(x)
    }

    fn log_abs_det_jacobian(&self, z: ArrayView2<f64>) -> Array2<f64> {
        self.inner
            .log_abs_det_jacobian(z)
            .sum_axis(Axis(1))
            .insert_axis(Axis(1))
    }

    fn pullback(&self, z: ArrayView2<f64>, grad: ArrayView2<f64>) -> Array2<f64> {
        self.inner.pullback(z, grad)
    }

    fn event_dim(&self) -> usize {
        self.inner.event_dim() + 1
    }
}

/// Applies `parts` in order in the forward direction.
#[derive(Debug)]
pub struct ComposeTransform {
    parts: Vec<Box<dyn Bijection>>,
}

impl ComposeTransform {
    pub fn new(parts: Vec<Box<dyn Bijection>>) -> Self {
        Self { parts }
    }

    /// Inputs of every part when mapping `z` forward, followed by the final output.
    fn intermediates(&self, z: ArrayView2<f64>) -> Vec<Array2<f64>> {
        let mut values = Vec::with_capacity(self.parts.len() + 1);
        values.push(z.to_owned());
        for part in self.parts.iter() {
            let next = part.forward(values[values.len() - 1].view());
            values.push(next);
        }
        values
    }
}

impl Bijection for ComposeTransform {
    fn forward(&self, z: ArrayView2<f64>) -> Array2<f64> {
        self.parts
            .iter()
            .fold(z.to_owned(), |value, part| part.forward(value.view()))
    }

    fn inverse(&self, x: ArrayView2<f64>) -> Array2<f64> {
        self.parts
            .iter()
            .rev()
            .fold(x.to_owned(), |value, part| part.inverse(value.view()))
    }

    fn log_abs_det_jacobian(&self, z: ArrayView2<f64>) -> Array2<f64> {
        let event_dim = self.event_dim();
        let values = self.intermediates(z);
        let mut total: Option<Array2<f64>> = None;
        for (part, input) in self.parts.iter().zip(values.iter()) {
            let mut term = part.log_abs_det_jacobian(input.view());
            if (event_dim > 0) & (part.event_dim() == 0) {
                term = term.sum_axis(Axis(1)).insert_axis(Axis(1));
            }
            total = Some(match total {
                None => term,
                Some(total) => total + term,
            });
        }
        total.unwrap_or_else(|| {
            if event_dim > 0 {
                Array2::zeros((z.nrows(), 1))
            } else {
                Array2::zeros(z.raw_dim())
            }
        })
    }

    fn pullback(&self, z: ArrayView2<f64>, grad: ArrayView2<f64>) -> Array2<f64> {
        let values = self.intermediates(z);
        self.parts
            .iter()
            .zip(values[..self.parts.len()].iter())
            .rev()
            .fold(grad.to_owned(), |grad, (part, input)| {
                part.pullback(input.view(), grad.view())
            })
    }

    fn event_dim(&self) -> usize {
        self.parts.iter().map(|part| part.event_dim()).max().unwrap_or(0)
    }
}

/// Shared, immutable transform for parameter vectors.
///
/// The wrapped bijection always has an event dimension of at least one, so
/// [`ParameterTransform::log_abs_det_jacobian`] returns one value per row.
#[derive(Debug, Clone)]
pub struct ParameterTransform {
    inner: Arc<dyn Bijection>,
}

impl ParameterTransform {
    /// Wrap `bijection`, reinterpreting its last axis as an event if needed.
    pub fn new(bijection: Box<dyn Bijection>) -> Self {
        let inner: Arc<dyn Bijection> = if bijection.event_dim() == 0 {
            Arc::new(IndependentTransform::new(bijection))
        } else {
            Arc::from(bijection)
        };
        Self { inner }
    }

    pub fn identity() -> Self {
        Self::new(Box::new(IdentityTransform))
    }

    /// Unconstrained to constrained.
    pub fn forward(&self, z: ArrayView2<f64>) -> Array2<f64> {
        self.inner.forward(z)
    }

    /// Constrained to unconstrained.
    pub fn inverse(&self, x: ArrayView2<f64>) -> Array2<f64> {
        self.inner.inverse(x)
    }

    pub fn log_abs_det_jacobian(&self, z: ArrayView2<f64>) -> Array1<f64> {
        self.inner.log_abs_det_jacobian(z).sum_axis(Axis(1))
    }

    pub fn pullback(&self, z: ArrayView2<f64>, grad: ArrayView2<f64>) -> Array2<f64> {
        self.inner.pullback(z, grad)
    }

    pub fn bijection(&self) -> &dyn Bijection {
        self.inner.as_ref()
    }
}

impl Default for ParameterTransform {
    fn default() -> Self {
        Self::identity()
    }
}
