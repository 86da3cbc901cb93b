//! Generalized linear model fitting by iteratively reweighted least squares.
//!
//! The solver follows the usual structure: update the working response and
//! weights from the current linear predictor, solve the weighted normal
//! equations, and step-halve whenever a full step increases the deviance.
//! Penalized fits (for smooth terms) add `S_λ` to the normal equations; the
//! GAM layer drives that through [`fit_design`].

use crate::design::{Design, DesignError, ModelSpec};
use crate::data::{DataError, ObservationTable};
use crate::family::Family;
use ndarray::{Array1, Array2, ArrayView1, ArrayView2};
use ndarray_linalg::{Inverse, Solve};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum FitError {
    #[error(transparent)]
    Design(#[from] DesignError),

    #[error(transparent)]
    Data(#[from] DataError),

    #[error("linear algebra failure during fitting: {0}")]
    Linalg(#[from] ndarray_linalg::error::LinalgError),

    #[error("IRLS did not converge after {iterations} iterations (last relative change {last_change:.3e})")]
    DidNotConverge { iterations: usize, last_change: f64 },

    #[error("prior weights must be finite and non-negative")]
    InvalidWeights,

    #[error("fitting produced non-finite estimates; the model is likely unidentifiable")]
    NumericallyUnstable,
}

/// Iteration controls shared by the GLM and GAM fitters.
#[derive(Debug, Clone)]
pub struct FitOptions {
    pub max_iterations: usize,
    pub tolerance: f64,
}

impl Default for FitOptions {
    fn default() -> Self {
        FitOptions {
            max_iterations: 100,
            tolerance: 1e-8,
        }
    }
}

/// The opaque result of a fit: produced by a fitter, read-only afterward.
#[derive(Debug, Clone)]
pub struct FittedModel {
    pub coefficients: Array1<f64>,
    pub coef_names: Vec<String>,
    pub covariance: Array2<f64>,
    /// Fitted mean per observation (training rows).
    pub fitted: Array1<f64>,
    pub deviance: f64,
    pub dispersion: f64,
    /// Effective degrees of freedom; equals the coefficient count for an
    /// unpenalized fit.
    pub edf: f64,
    pub iterations: usize,
    pub family: Family,
    /// Smoothing parameters per smooth term (empty for a pure GLM).
    pub smoothing: Vec<f64>,
}

impl FittedModel {
    pub fn std_errors(&self) -> Array1<f64> {
        self.covariance.diag().mapv(|v| v.max(0.0).sqrt())
    }

    pub fn n_coeffs(&self) -> usize {
        self.coefficients.len()
    }
}

/// Fits an unpenalized GLM described by `spec` against `table`.
pub fn fit_glm(spec: &ModelSpec, table: &ObservationTable) -> Result<FittedModel, FitError> {
    fit_glm_weighted(spec, table, None)
}

/// As [`fit_glm`], with explicit prior weights (the point-process fitter
/// passes quadrature weights through here).
pub fn fit_glm_weighted(
    spec: &ModelSpec,
    table: &ObservationTable,
    prior_weights: Option<ArrayView1<f64>>,
) -> Result<FittedModel, FitError> {
    let (y, design) = spec.build(table)?;
    fit_design(
        &design,
        y.view(),
        spec.family,
        prior_weights,
        &[],
        &FitOptions::default(),
    )
}

/// Fits over a built design. `penalties` is a list of `(column range start,
/// λ·S)` blocks; empty for a plain GLM.
pub fn fit_design(
    design: &Design,
    y: ArrayView1<f64>,
    family: Family,
    prior_weights: Option<ArrayView1<f64>>,
    penalties: &[(usize, Array2<f64>)],
    options: &FitOptions,
) -> Result<FittedModel, FitError> {
    fit_matrix(
        design.x.view(),
        &design.names,
        y,
        family,
        prior_weights,
        penalties,
        options,
    )
}

/// Core fitting entry point over an explicit design matrix. Everything else
/// in the crate (GAM smoothing search, the MCEM M-step, SIMEX refits) funnels
/// through this function.
pub fn fit_matrix(
    x: ArrayView2<f64>,
    names: &[String],
    y: ArrayView1<f64>,
    family: Family,
    prior_weights: Option<ArrayView1<f64>>,
    penalties: &[(usize, Array2<f64>)],
    options: &FitOptions,
) -> Result<FittedModel, FitError> {
    let n = y.len();
    let p = x.ncols();
    let prior = match prior_weights {
        Some(w) => {
            if w.len() != n || w.iter().any(|&v| !v.is_finite() || v < 0.0) {
                return Err(FitError::InvalidWeights);
            }
            w.to_owned()
        }
        None => Array1::ones(n),
    };

    let s_total = assemble_penalty(p, penalties);

    let mut beta = Array1::zeros(p);
    let mut eta = x.dot(&beta);
    let (mut mu, _, _) = family.irls_vectors(y, &eta, prior.view());
    let mut deviance = family.deviance(y, &mu, prior.view());
    let mut last_change = f64::INFINITY;
    let mut iterations = 0;

    for iter in 1..=options.max_iterations {
        iterations = iter;
        let (_, w, z) = family.irls_vectors(y, &eta, prior.view());

        // Weighted normal equations, plus the penalty when present.
        let xtwx = weighted_gram(x, w.view());
        let xtwz = weighted_xtz(x, w.view(), z.view());
        let lhs = match &s_total {
            Some(s) => &xtwx + s,
            None => xtwx.clone(),
        };
        let proposal = lhs.solve(&xtwz)?;

        // Step-halving on penalized deviance increase.
        let mut accepted = false;
        let mut step = 1.0;
        for _ in 0..30 {
            let candidate: Array1<f64> = &beta + &((&proposal - &beta) * step);
            let eta_c = x.dot(&candidate);
            let (mu_c, _, _) = family.irls_vectors(y, &eta_c, prior.view());
            let dev_c = family.deviance(y, &mu_c, prior.view());
            let pen_c = penalty_value(&s_total, &candidate);
            let pen_old = penalty_value(&s_total, &beta);
            if (dev_c + pen_c).is_finite() && dev_c + pen_c <= deviance + pen_old + 1e-12 {
                last_change = relative_change(deviance, dev_c);
                beta = candidate;
                eta = eta_c;
                mu = mu_c;
                deviance = dev_c;
                accepted = true;
                break;
            }
            step *= 0.5;
        }
        if !accepted {
            // No acceptable step: treat the current estimate as converged if
            // the last full step was tiny, otherwise report the stall.
            if last_change < options.tolerance {
                break;
            }
            return Err(FitError::DidNotConverge {
                iterations: iter,
                last_change,
            });
        }

        log::debug!(
            "IRLS iter {iter}: deviance {deviance:.6}, relative change {last_change:.3e}"
        );
        if last_change < options.tolerance {
            break;
        }
        if iter == options.max_iterations {
            return Err(FitError::DidNotConverge {
                iterations: iter,
                last_change,
            });
        }
    }

    if beta.iter().any(|v| !v.is_finite()) {
        return Err(FitError::NumericallyUnstable);
    }

    // Final weights at convergence drive the covariance and the edf.
    let (_, w_final, _) = family.irls_vectors(y, &eta, prior.view());
    let xtwx = weighted_gram(x, w_final.view());
    let lhs = match &s_total {
        Some(s) => &xtwx + s,
        None => xtwx.clone(),
    };
    let lhs_inv = lhs.inv()?;

    // edf = tr((XᵀWX + S)⁻¹ XᵀWX); collapses to p without a penalty.
    let edf = if s_total.is_some() {
        lhs_inv.dot(&xtwx).diag().sum()
    } else {
        p as f64
    };

    let dispersion = if family.estimates_dispersion() {
        pearson_dispersion(y, &mu, prior.view(), family, n as f64 - edf)
    } else {
        1.0
    };

    let covariance = lhs_inv.mapv(|v| v * dispersion);

    Ok(FittedModel {
        coefficients: beta,
        coef_names: names.to_vec(),
        covariance,
        fitted: mu,
        deviance,
        dispersion,
        edf,
        iterations,
        family,
        smoothing: Vec::new(),
    })
}

fn assemble_penalty(p: usize, penalties: &[(usize, Array2<f64>)]) -> Option<Array2<f64>> {
    if penalties.is_empty() {
        return None;
    }
    let mut s = Array2::zeros((p, p));
    for (start, block) in penalties {
        let k = block.nrows();
        let mut target = s.slice_mut(ndarray::s![*start..start + k, *start..start + k]);
        target += block;
    }
    Some(s)
}

fn penalty_value(s: &Option<Array2<f64>>, beta: &Array1<f64>) -> f64 {
    match s {
        Some(s) => beta.dot(&s.dot(beta)),
        None => 0.0,
    }
}

fn relative_change(old: f64, new: f64) -> f64 {
    (old - new).abs() / (new.abs() + 0.1)
}

pub(crate) fn weighted_gram(x: ArrayView2<f64>, w: ArrayView1<f64>) -> Array2<f64> {
    // XᵀWX without materializing W.
    let mut xw = x.to_owned();
    for (mut row, &wi) in xw.rows_mut().into_iter().zip(w.iter()) {
        row.mapv_inplace(|v| v * wi);
    }
    x.t().dot(&xw)
}

fn weighted_xtz(x: ArrayView2<f64>, w: ArrayView1<f64>, z: ArrayView1<f64>) -> Array1<f64> {
    let wz: Array1<f64> = ndarray::Zip::from(w).and(z).map_collect(|&wi, &zi| wi * zi);
    x.t().dot(&wz)
}

fn pearson_dispersion(
    y: ArrayView1<f64>,
    mu: &Array1<f64>,
    prior: ArrayView1<f64>,
    family: Family,
    residual_df: f64,
) -> f64 {
    debug_assert!(matches!(family, Family::Gaussian));
    let chi2 = ndarray::Zip::from(y)
        .and(mu)
        .and(prior)
        .fold(0.0, |acc, &yi, &mui, &wi| acc + wi * (yi - mui) * (yi - mui));
    chi2 / residual_df.max(1.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use ndarray::{array, Array};

    #[test]
    fn gaussian_fit_recovers_ols() {
        // y = 2 + 3x exactly; the fit must reproduce it to machine precision.
        let x: Array1<f64> = Array::linspace(0.0, 9.0, 10);
        let y: Array1<f64> = x.mapv(|v| 2.0 + 3.0 * v);
        let table = ObservationTable::from_columns(vec![
            ("y".into(), y),
            ("x".into(), x),
        ])
        .unwrap();
        let spec = ModelSpec::new("y", Family::Gaussian).linear("x");
        let model = fit_glm(&spec, &table).unwrap();
        assert_abs_diff_eq!(model.coefficients[0], 2.0, epsilon = 1e-8);
        assert_abs_diff_eq!(model.coefficients[1], 3.0, epsilon = 1e-8);
        assert_eq!(model.coef_names, vec!["(Intercept)", "x"]);
        assert_abs_diff_eq!(model.edf, 2.0);
    }

    #[test]
    fn logistic_fit_finds_the_right_direction() {
        // Clearly separated-by-trend data with overlap; slope must be positive
        // and the fitted means must order with x.
        let x = array![-2.0, -1.5, -1.0, -0.5, 0.0, 0.0, 0.5, 1.0, 1.5, 2.0];
        let y = array![0.0, 0.0, 0.0, 1.0, 0.0, 1.0, 0.0, 1.0, 1.0, 1.0];
        let table = ObservationTable::from_columns(vec![
            ("y".into(), y),
            ("x".into(), x),
        ])
        .unwrap();
        let spec = ModelSpec::new("y", Family::Binomial).linear("x");
        let model = fit_glm(&spec, &table).unwrap();
        assert!(model.coefficients[1] > 0.0);
        assert!(model.fitted.iter().all(|&m| m > 0.0 && m < 1.0));
        assert!(model.fitted[9] > model.fitted[0]);
    }

    #[test]
    fn poisson_fit_matches_closed_form_intercept() {
        // Intercept-only Poisson: beta0 = ln(mean(y)).
        let y = array![1.0, 2.0, 3.0, 2.0, 4.0, 0.0, 2.0, 2.0];
        let dummy = array![0.0, 1.0, 0.0, 1.0, 0.0, 1.0, 0.0, 1.0];
        let table = ObservationTable::from_columns(vec![
            ("y".into(), y.clone()),
            ("d".into(), dummy),
        ])
        .unwrap();
        // Build a design, then strip to the intercept by fitting with the
        // dummy held at coefficient-irrelevant values is awkward; instead use
        // a constant-free spec with one balanced covariate and check that the
        // fitted means average to the sample mean.
        let spec = ModelSpec::new("y", Family::Poisson).linear("d");
        let model = fit_glm(&spec, &table).unwrap();
        let mean_fit = model.fitted.sum() / model.fitted.len() as f64;
        assert_abs_diff_eq!(mean_fit, y.sum() / y.len() as f64, epsilon = 1e-6);
    }

    #[test]
    fn prior_weights_change_the_fit() {
        let x = array![0.0, 1.0, 2.0, 3.0];
        let y = array![0.0, 1.0, 1.9, 10.0];
        let table = ObservationTable::from_columns(vec![
            ("y".into(), y),
            ("x".into(), x),
        ])
        .unwrap();
        let spec = ModelSpec::new("y", Family::Gaussian).linear("x");
        let plain = fit_glm(&spec, &table).unwrap();
        // Heavily downweight the outlier in the last row.
        let w = array![1.0, 1.0, 1.0, 1e-6];
        let weighted = fit_glm_weighted(&spec, &table, Some(w.view())).unwrap();
        assert!((weighted.coefficients[1] - 0.95).abs() < 0.1);
        assert!(plain.coefficients[1] > weighted.coefficients[1]);
    }

    #[test]
    fn invalid_weights_are_rejected() {
        let table = ObservationTable::from_columns(vec![
            ("y".into(), array![1.0, 2.0]),
            ("x".into(), array![0.0, 1.0]),
        ])
        .unwrap();
        let spec = ModelSpec::new("y", Family::Gaussian).linear("x");
        let w = array![1.0, -2.0];
        assert!(matches!(
            fit_glm_weighted(&spec, &table, Some(w.view())),
            Err(FitError::InvalidWeights)
        ));
    }
}
