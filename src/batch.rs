//! Align parameter and observation batches for pairwise density evaluation.

use ndarray::{Array, ArrayView, Axis, Dimension, RemoveAxis};

use crate::error::{Result, SbiError};

/// Expand `theta` (`M` rows) and `x` (`L` rows) so that row `l * M + m` of the
/// outputs holds the pair `(theta[m], x[l])`.
///
/// Every row of `x` is repeated `M` times in a row (`x0, x0, x1, x1, ...`),
/// `theta` is tiled `L` times as a whole (`t0, t1, t0, t1, ...`). A single
/// batched density call on the outputs evaluates every combination.
///
/// Fails with a shape error if either input has no batch axis, which can
/// only happen for dynamic-dimensional arrays of rank zero.
pub fn match_theta_and_x_batch_shapes<D1, D2>(
    theta: ArrayView<f64, D1>,
    x: ArrayView<f64, D2>,
) -> Result<(Array<f64, D1>, Array<f64, D2>)>
where
    D1: Dimension + RemoveAxis,
    D2: Dimension + RemoveAxis,
{
    check_batch_axis("theta", theta.shape())?;
    check_batch_axis("x", x.shape())?;
    let num_theta = theta.len_of(Axis(0));
    let num_x = x.len_of(Axis(0));
    let num_pairs = num_theta * num_x;

    let x_indices: Vec<usize> = (0..num_pairs).map(|i| i / num_theta.max(1)).collect();
    let theta_indices: Vec<usize> = (0..num_pairs).map(|i| i % num_theta.max(1)).collect();

    let x_expanded = x.select(Axis(0), &x_indices);
    let theta_expanded = theta.select(Axis(0), &theta_indices);

    Ok((theta_expanded, x_expanded))
}

fn check_batch_axis(what: &'static str, shape: &[usize]) -> Result<()> {
    if shape.is_empty() {
        return Err(SbiError::ShapeMismatch {
            what,
            expected: vec![0],
            found: Vec::new(),
        });
    }
    Ok(())
}
