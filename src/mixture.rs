//! Log densities of Gaussian mixtures with per-row parameters.
//!
//! Shapes use `B` for the batch, `K` for the number of components and `d`
//! for the parameter dimension.

use faer::{Mat, Side};
use ndarray::{s, Array1, Array2, Array3, ArrayView2, ArrayView3, ArrayView4, Axis};

use crate::{
    error::{Result, SbiError},
    math::logsumexp,
};

/// `out[b, c, i] = sum_j matrix[b, c, i, j] * vector[b, c, j]`.
pub fn batched_mixture_mv(matrix: ArrayView4<f64>, vector: ArrayView3<f64>) -> Array3<f64> {
    (&matrix * &vector.insert_axis(Axis(2))).sum_axis(Axis(3))
}

/// `out[b, c] = vector[b, c]ᵀ · matrix[b, c] · vector[b, c]`.
pub fn batched_mixture_vmv(matrix: ArrayView4<f64>, vector: ArrayView3<f64>) -> Array2<f64> {
    (&vector * &batched_mixture_mv(matrix, vector)).sum_axis(Axis(2))
}

/// Log determinant of a symmetric matrix from its eigenvalues.
///
/// Not positive definite matrices give NaN or `-inf`.
fn log_det(matrix: ArrayView2<f64>) -> f64 {
    let dim = matrix.nrows();
    let mat = Mat::from_fn(dim, dim, |i, j| matrix[(i, j)]);
    match mat.self_adjoint_eigen(Side::Lower) {
        Ok(eig) => eig.S().column_vector().iter().map(|val| val.ln()).sum(),
        Err(_) => f64::NAN,
    }
}

fn check_shape(what: &'static str, expected: &[usize], found: &[usize]) -> Result<()> {
    if expected != found {
        return Err(SbiError::ShapeMismatch {
            what,
            expected: expected.to_vec(),
            found: found.to_vec(),
        });
    }
    Ok(())
}

/// Log density of `theta` under a mixture of Gaussians.
///
/// Row `b` of `theta` is evaluated under the mixture with weights
/// `softmax(logits[b])`, component means `means[b]` and component precision
/// matrices `precisions[b]`. The precision matrices must be positive
/// definite. This is not checked, violations produce NaN or `-inf`.
pub fn mog_log_prob(
    theta: ArrayView2<f64>,
    logits: ArrayView2<f64>,
    means: ArrayView3<f64>,
    precisions: ArrayView4<f64>,
) -> Result<Array1<f64>> {
    let (batch, dim) = theta.dim();
    let num_components = logits.ncols();
    check_shape("mixture logits", &[batch, num_components], logits.shape())?;
    check_shape("mixture means", &[batch, num_components, dim], means.shape())?;
    check_shape(
        "mixture precisions",
        &[batch, num_components, dim, dim],
        precisions.shape(),
    )?;

    let log_norm = logits.map_axis(Axis(1), |row| logsumexp(&row.to_vec()));
    let log_weights = &logits - &log_norm.insert_axis(Axis(1));

    let diff = &theta.insert_axis(Axis(1)) - &means;
    let quad = batched_mixture_vmv(precisions, diff.view());

    let log_dets = Array2::from_shape_fn((batch, num_components), |(b, c)| {
        log_det(precisions.slice(s![b, c, .., ..]))
    });

    let constant = -0.5 * dim as f64 * (2. * std::f64::consts::PI).ln();
    let component_log_probs = log_weights + constant + 0.5 * log_dets - 0.5 * quad;

    Ok(component_log_probs.map_axis(Axis(1), |row| logsumexp(&row.to_vec())))
}
