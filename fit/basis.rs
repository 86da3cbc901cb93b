//! B-spline bases and roughness penalties for smooth terms.
//!
//! A smooth term is represented the P-spline way: a B-spline design matrix
//! evaluated by the Cox-de Boor recursion, a difference penalty `S = DᵀD` on
//! the coefficients, and a sum-to-zero reparameterization that removes the
//! confounding between each smooth and the model intercept.

use ndarray::{Array, Array1, Array2, ArrayView1, ArrayView2, Axis, s};
use ndarray_linalg::QR;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Strategy for placing internal knots.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum KnotPlacement {
    /// Equally spaced across the covariate range.
    Uniform,
    /// At quantiles of the training covariate (linear interpolation).
    Quantile,
}

#[derive(Error, Debug)]
pub enum BasisError {
    #[error("spline degree must be at least 1, got {0}")]
    InvalidDegree(usize),

    #[error("covariate range is empty or inverted: [{0}, {1}]")]
    InvalidRange(f64, f64),

    #[error("cannot place {knots} quantile knots with only {points} data points")]
    TooFewPointsForQuantiles { knots: usize, points: usize },

    #[error("difference-penalty order {order} is not valid for {num_basis} basis functions")]
    InvalidPenaltyOrder { order: usize, num_basis: usize },

    #[error("QR decomposition failed while building the centering constraint: {0}")]
    Linalg(#[from] ndarray_linalg::error::LinalgError),
}

/// Builds the knot vector for a basis over `range`, with `degree + 1`
/// repeated knots at each boundary.
pub fn knot_vector(
    values: ArrayView1<f64>,
    range: (f64, f64),
    num_internal_knots: usize,
    degree: usize,
    placement: KnotPlacement,
) -> Result<Array1<f64>, BasisError> {
    if degree < 1 {
        return Err(BasisError::InvalidDegree(degree));
    }
    let (lo, hi) = range;
    if !(lo < hi) {
        return Err(BasisError::InvalidRange(lo, hi));
    }

    let internal = match placement {
        KnotPlacement::Uniform => {
            let h = (hi - lo) / (num_internal_knots as f64 + 1.0);
            Array::from_iter((1..=num_internal_knots).map(|i| lo + i as f64 * h))
        }
        KnotPlacement::Quantile => {
            if values.len() < num_internal_knots.max(2) {
                return Err(BasisError::TooFewPointsForQuantiles {
                    knots: num_internal_knots,
                    points: values.len(),
                });
            }
            quantile_knots(values, num_internal_knots)
        }
    };

    let lo_rep = Array1::from_elem(degree + 1, lo);
    let hi_rep = Array1::from_elem(degree + 1, hi);
    Ok(
        ndarray::concatenate(Axis(0), &[lo_rep.view(), internal.view(), hi_rep.view()])
            .expect("1-D knot segments always concatenate"),
    )
}

/// Evaluates the B-spline design matrix for `values` against a prepared knot
/// vector. Shape: `[values.len(), knots.len() - degree - 1]`.
pub fn bspline_design(
    values: ArrayView1<f64>,
    knots: ArrayView1<f64>,
    degree: usize,
) -> Result<Array2<f64>, BasisError> {
    if degree < 1 {
        return Err(BasisError::InvalidDegree(degree));
    }
    let num_basis = knots.len() - degree - 1;
    let mut design = Array2::zeros((values.len(), num_basis));
    for (i, &x) in values.iter().enumerate() {
        design.row_mut(i).assign(&splines_at(x, degree, knots));
    }
    Ok(design)
}

/// Difference penalty `S = DᵀD` of the given order on `num_basis` coefficients.
pub fn difference_penalty(num_basis: usize, order: usize) -> Result<Array2<f64>, BasisError> {
    if order == 0 || order >= num_basis {
        return Err(BasisError::InvalidPenaltyOrder { order, num_basis });
    }
    let mut d = Array2::<f64>::eye(num_basis);
    for _ in 0..order {
        d = &d.slice(s![1.., ..]) - &d.slice(s![..-1, ..]);
    }
    Ok(d.t().dot(&d))
}

/// Reparameterizes a basis so its columns sum to zero over the training rows.
///
/// Returns the constrained basis (one column fewer) and the transform `Z`
/// with `B_c = B·Z`; the same `Z` must be applied when the basis is
/// re-evaluated on new data so predictions stay in the fitted parameter space.
pub fn center_constraint(
    basis: ArrayView2<f64>,
) -> Result<(Array2<f64>, Array2<f64>), BasisError> {
    let n_basis = basis.ncols();
    let col_sums = basis.sum_axis(Axis(0));
    let c = col_sums
        .to_shape((n_basis, 1))
        .expect("column sums reshape to a column vector");

    // QR of the constraint vector: the trailing columns of Q span its null
    // space, which is exactly the sum-to-zero subspace.
    let (q, _r) = c.to_owned().qr()?;
    let z = q.slice(s![.., 1..]).to_owned();
    Ok((basis.dot(&z), z))
}

fn quantile_knots(values: ArrayView1<f64>, num_knots: usize) -> Array1<f64> {
    let mut sorted = values.to_vec();
    sorted.sort_unstable_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
    let n = sorted.len();
    Array::from_iter((1..=num_knots).map(|k| {
        let p = k as f64 / (num_knots as f64 + 1.0);
        let idx = (n as f64 - 1.0) * p;
        let lower = idx.floor() as usize;
        let upper = idx.ceil() as usize;
        if lower == upper {
            sorted[lower]
        } else {
            let frac = idx - lower as f64;
            sorted[lower] * (1.0 - frac) + sorted[upper] * frac
        }
    }))
}

/// All basis function values at a single point, via the Cox-de Boor
/// recurrence on the active knot span. Only the `degree + 1` functions
/// supported on the span are nonzero; everything else stays zero.
fn splines_at(x: f64, degree: usize, knots: ArrayView1<f64>) -> Array1<f64> {
    let num_basis = knots.len() - degree - 1;

    // Knot span: largest valid index with knots[span] <= x, clamped so the
    // boundary point x == knots.last() lands in the final interval.
    let span = match knots.iter().rposition(|&k| k <= x) {
        Some(pos) => pos.min(num_basis - 1).max(degree),
        None => degree,
    };

    let mut b = Array1::zeros(degree + 1);
    b[0] = 1.0;
    let mut left = vec![0.0; degree + 1];
    let mut right = vec![0.0; degree + 1];
    for j in 1..=degree {
        left[j] = x - knots[span + 1 - j];
        right[j] = knots[span + j] - x;
        let mut saved = 0.0;
        for r in 0..j {
            let denom = right[r + 1] + left[j - r];
            // Zero only when duplicated internal knots collapse an interval.
            let temp = if denom.abs() > 1e-12 { b[r] / denom } else { 0.0 };
            b[r] = saved + right[r + 1] * temp;
            saved = left[j - r] * temp;
        }
        b[j] = saved;
    }

    let mut row = Array1::zeros(num_basis);
    for (i, &v) in b.iter().enumerate() {
        row[span - degree + i] = v;
    }
    row
}
