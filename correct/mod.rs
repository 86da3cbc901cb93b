//! Measurement-error correction engines.
//!
//! Both engines take a naive fitted model (one that treated the contaminated
//! covariate as exact), the declared measurement-error magnitude, and a
//! replication count `B`, and produce a corrected model over the identical
//! coefficient layout. `mcem` is the Monte Carlo EM technique; `simex` is the
//! simulation-extrapolation comparison technique.

pub mod mcem;
pub mod simex;

use crate::glm::{FitError, FittedModel};
use ndarray::Array2;
use thiserror::Error;

/// Declared measurement-error variance of the contaminated covariate(s).
#[derive(Debug, Clone)]
pub enum ErrorVariance {
    /// One contaminated covariate with known scalar variance.
    Scalar(f64),
    /// Joint error covariance for several contaminated covariates. Accepted
    /// by the type so callers can declare it, but the correction engines
    /// currently handle a single covariate and reject this shape explicitly.
    Matrix(Array2<f64>),
}

impl ErrorVariance {
    pub(crate) fn scalar(&self) -> Result<f64, CorrectionError> {
        match self {
            ErrorVariance::Scalar(v) if *v > 0.0 => Ok(*v),
            ErrorVariance::Scalar(v) => Err(CorrectionError::NonPositiveVariance(*v)),
            ErrorVariance::Matrix(_) => Err(CorrectionError::MatrixVarianceUnsupported),
        }
    }
}

#[derive(Error, Debug)]
pub enum CorrectionError {
    #[error(transparent)]
    Fit(#[from] FitError),

    #[error(transparent)]
    Design(#[from] crate::design::DesignError),

    #[error(transparent)]
    Data(#[from] crate::data::DataError),

    #[error("linear algebra failure in the correction engine: {0}")]
    Linalg(#[from] ndarray_linalg::error::LinalgError),

    #[error("measurement-error variance must be positive, got {0}")]
    NonPositiveVariance(f64),

    #[error("matrix-valued error variance is declared but only a single contaminated covariate is supported")]
    MatrixVarianceUnsupported,

    #[error("replication count B must be at least 2")]
    TooFewReplications,

    #[error("SIMEX lambda grid must be non-empty with strictly positive values, got {0:?}")]
    InvalidLambdaGrid(Vec<f64>),

    #[error(
        "observed variance of '{column}' ({observed:.4e}) does not exceed the declared error variance ({declared:.4e})"
    )]
    VarianceExceedsSignal {
        column: String,
        observed: f64,
        declared: f64,
    },
}

/// A corrected model plus what the correction run did to produce it.
#[derive(Debug, Clone)]
pub struct CorrectedModel {
    pub model: FittedModel,
    /// Replication count used (Monte Carlo draws or SIMEX replicates).
    pub replications: usize,
    /// EM iterations to convergence (1 for SIMEX, which does not iterate).
    pub em_iterations: usize,
    /// Observed-data log-likelihood at the final EM iteration, when the
    /// technique tracks one.
    pub log_likelihood: Option<f64>,
}
