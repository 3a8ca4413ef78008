use itertools::izip;
use multiversion::multiversion;

/// Numerically stable `log(sum(exp(values)))`.
///
/// Returns `-inf` for an empty slice or if all values are `-inf`, and NaN
/// if any value is NaN.
pub fn logsumexp(values: &[f64]) -> f64 {
    if values.iter().any(|v| v.is_nan()) {
        return f64::NAN;
    }
    let max = values.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    if max.is_infinite() {
        return max;
    }
    let sum: f64 = values.iter().map(|&v| (v - max).exp()).sum();
    max + sum.ln()
}

#[inline]
pub(crate) fn sigmoid(x: f64) -> f64 {
    if x >= 0. {
        1. / (1. + (-x).exp())
    } else {
        let e = x.exp();
        e / (1. + e)
    }
}

/// `log(sigmoid(x))` without overflow for large `|x|`.
#[inline]
pub(crate) fn log_sigmoid(x: f64) -> f64 {
    if x >= 0. {
        -(-x).exp().ln_1p()
    } else {
        x - x.exp().ln_1p()
    }
}

/// Map `theta` from `(lower, upper)` to the real line.
#[inline]
pub fn logit(theta: f64, lower: f64, upper: f64) -> f64 {
    let p = (theta - lower) / (upper - lower);
    (p / (1. - p)).ln()
}

/// Map an unbounded value into `(lower, upper)`. Inverse of [`logit`].
#[inline]
pub fn expit(theta_t: f64, lower: f64, upper: f64) -> f64 {
    (upper - lower) * sigmoid(theta_t) + lower
}

#[multiversion(targets("x86_64+avx+avx2+fma", "arm+neon"))]
pub(crate) fn vector_dot(a: &[f64], b: &[f64]) -> f64 {
    assert!(a.len() == b.len());

    let mut result = 0.;
    for (val1, val2) in a.iter().zip(b) {
        result += *val1 * *val2;
    }
    result
}

/// One Adam update for a flat parameter buffer.
///
/// `grad` is the gradient of the loss that is minimized. `bias1` and `bias2`
/// are `1 - beta^t` for the current step.
#[allow(clippy::too_many_arguments)]
#[multiversion(targets("x86_64+avx+avx2+fma", "arm+neon"))]
pub(crate) fn adam_update(
    params: &mut [f64],
    grad: &[f64],
    m: &mut [f64],
    v: &mut [f64],
    beta1: f64,
    beta2: f64,
    bias1: f64,
    bias2: f64,
    learning_rate: f64,
    epsilon: f64,
) {
    let n = params.len();
    assert!(grad.len() == n);
    assert!(m.len() == n);
    assert!(v.len() == n);

    izip!(params, grad, m, v).for_each(|(p, &g, m, v)| {
        *m = beta1 * *m + (1. - beta1) * g;
        *v = beta2 * *v + (1. - beta2) * g * g;
        let m_hat = *m / bias1;
        let v_hat = *v / bias2;
        *p -= learning_rate * m_hat / (v_hat.sqrt() + epsilon);
    });
}
