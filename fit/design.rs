//! Model specification as an explicit design matrix.
//!
//! Formula syntax from the statistical-computing world is re-expressed here
//! as a list of terms over named table columns. Building a design freezes
//! everything data-dependent about the smooth terms (ranges, knot vectors,
//! centering transforms) so the identical basis can be re-evaluated on new
//! covariate values: predictions, plotting grids, and the simulated
//! replacements the correction engines generate all go through `evaluate`.

use crate::basis::{self, BasisError, KnotPlacement};
use crate::data::{DataError, ObservationTable};
use crate::family::Family;
use ndarray::{Array1, Array2, ArrayView1, s};
use serde::{Deserialize, Serialize};
use std::ops::Range;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum DesignError {
    #[error(transparent)]
    Data(#[from] DataError),

    #[error(transparent)]
    Basis(#[from] BasisError),

    #[error("column '{0}' is constant; a smooth term needs a spread of values")]
    DegenerateColumn(String),

    #[error("model has no terms besides the intercept")]
    NoTerms,

    #[error("no smooth term labeled '{0}' in this design")]
    UnknownSmooth(String),
}

/// Spline settings for one smooth term.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BasisConfig {
    pub num_internal_knots: usize,
    pub degree: usize,
    pub penalty_order: usize,
    pub placement: KnotPlacement,
}

impl Default for BasisConfig {
    fn default() -> Self {
        BasisConfig {
            num_internal_knots: 10,
            degree: 3,
            penalty_order: 2,
            placement: KnotPlacement::Quantile,
        }
    }
}

/// One model term over a named column.
#[derive(Debug, Clone)]
pub enum Term {
    Linear { column: String, label: String },
    Smooth {
        column: String,
        label: String,
        basis: BasisConfig,
    },
}

impl Term {
    pub fn column(&self) -> &str {
        match self {
            Term::Linear { column, .. } | Term::Smooth { column, .. } => column,
        }
    }

    pub fn label(&self) -> &str {
        match self {
            Term::Linear { label, .. } | Term::Smooth { label, .. } => label,
        }
    }
}

/// What to fit: response column, family, and the term list. The intercept is
/// always present and always first.
#[derive(Debug, Clone)]
pub struct ModelSpec {
    pub response: String,
    pub family: Family,
    pub terms: Vec<Term>,
}

impl ModelSpec {
    pub fn new(response: &str, family: Family) -> Self {
        ModelSpec {
            response: response.to_string(),
            family,
            terms: Vec::new(),
        }
    }

    /// Adds a linear term whose display label is the column name.
    pub fn linear(mut self, column: &str) -> Self {
        self.terms.push(Term::Linear {
            column: column.to_string(),
            label: column.to_string(),
        });
        self
    }

    /// Adds a linear term with an explicit display label.
    pub fn linear_as(mut self, column: &str, label: &str) -> Self {
        self.terms.push(Term::Linear {
            column: column.to_string(),
            label: label.to_string(),
        });
        self
    }

    pub fn smooth(mut self, column: &str, basis: BasisConfig) -> Self {
        self.terms.push(Term::Smooth {
            column: column.to_string(),
            label: format!("s({column})"),
            basis,
        });
        self
    }

    /// Builds the response vector and the design for `table`.
    pub fn build(&self, table: &ObservationTable) -> Result<(Array1<f64>, Design), DesignError> {
        if self.terms.is_empty() {
            return Err(DesignError::NoTerms);
        }
        let y = table.column(&self.response)?.to_owned();
        let n = table.n_rows();

        let mut columns: Vec<Array1<f64>> = vec![Array1::ones(n)];
        let mut names = vec!["(Intercept)".to_string()];
        let mut smooths = Vec::new();

        for term in &self.terms {
            match term {
                Term::Linear { column, label } => {
                    columns.push(table.column(column)?.to_owned());
                    names.push(label.clone());
                }
                Term::Smooth {
                    column,
                    label,
                    basis: cfg,
                } => {
                    let values = table.column(column)?;
                    let lo = values.iter().cloned().fold(f64::INFINITY, f64::min);
                    let hi = values.iter().cloned().fold(f64::NEG_INFINITY, f64::max);
                    if !(lo < hi) {
                        return Err(DesignError::DegenerateColumn(column.clone()));
                    }
                    let knots = basis::knot_vector(
                        values,
                        (lo, hi),
                        cfg.num_internal_knots,
                        cfg.degree,
                        cfg.placement,
                    )?;
                    let raw = basis::bspline_design(values, knots.view(), cfg.degree)?;
                    let (centered, z) = basis::center_constraint(raw.view())?;
                    let raw_penalty =
                        basis::difference_penalty(raw.ncols(), cfg.penalty_order)?;
                    // Penalty in the constrained parameterization: Zᵀ S Z.
                    let penalty = z.t().dot(&raw_penalty).dot(&z);

                    let start = columns.len();
                    for k in 0..centered.ncols() {
                        columns.push(centered.column(k).to_owned());
                        names.push(format!("{label}.{}", k + 1));
                    }
                    smooths.push(SmoothLayout {
                        label: label.clone(),
                        column: column.clone(),
                        range: (lo, hi),
                        degree: cfg.degree,
                        knots,
                        z,
                        penalty,
                        cols: start..columns.len(),
                    });
                }
            }
        }

        let p = columns.len();
        let mut x = Array2::zeros((n, p));
        for (j, col) in columns.iter().enumerate() {
            x.column_mut(j).assign(col);
        }

        Ok((
            y,
            Design {
                x,
                names,
                smooths,
                terms: self.terms.clone(),
            },
        ))
    }
}

/// Frozen layout of one smooth term inside a built design.
#[derive(Debug, Clone)]
pub struct SmoothLayout {
    pub label: String,
    pub column: String,
    pub range: (f64, f64),
    pub degree: usize,
    pub knots: Array1<f64>,
    /// Centering transform from the raw basis to the constrained one.
    pub z: Array2<f64>,
    /// Penalty matrix in the constrained parameterization.
    pub penalty: Array2<f64>,
    /// Column range of this smooth inside the design matrix.
    pub cols: Range<usize>,
}

impl SmoothLayout {
    /// Evaluates the constrained basis for arbitrary covariate values,
    /// clamped to the training range so the spline stays defined.
    pub fn basis_at(&self, values: ArrayView1<f64>) -> Result<Array2<f64>, DesignError> {
        let clamped = values.mapv(|v| v.clamp(self.range.0, self.range.1));
        let raw = basis::bspline_design(clamped.view(), self.knots.view(), self.degree)?;
        Ok(raw.dot(&self.z))
    }
}

/// A built design matrix plus everything needed to rebuild it on new data.
#[derive(Debug, Clone)]
pub struct Design {
    pub x: Array2<f64>,
    pub names: Vec<String>,
    pub smooths: Vec<SmoothLayout>,
    terms: Vec<Term>,
}

impl Design {
    pub fn n_coeffs(&self) -> usize {
        self.x.ncols()
    }

    /// Re-evaluates this design's layout against another table (for example a
    /// tiled table with a simulated contaminated column). Smooth terms reuse
    /// the frozen knots and centering transforms.
    pub fn evaluate(&self, table: &ObservationTable) -> Result<Array2<f64>, DesignError> {
        let n = table.n_rows();
        let mut x = Array2::zeros((n, self.n_coeffs()));
        x.column_mut(0).fill(1.0);

        let mut next_col = 1usize;
        let mut next_smooth = 0usize;
        for term in &self.terms {
            match term {
                Term::Linear { column, .. } => {
                    x.column_mut(next_col).assign(&table.column(column)?);
                    next_col += 1;
                }
                Term::Smooth { .. } => {
                    let layout = &self.smooths[next_smooth];
                    next_smooth += 1;
                    let block = layout.basis_at(table.column(&layout.column)?)?;
                    x.slice_mut(s![.., layout.cols.clone()]).assign(&block);
                    next_col = layout.cols.end;
                }
            }
        }
        Ok(x)
    }

    /// Partial effect of a smooth term on a covariate grid, with pointwise
    /// standard errors from the coefficient covariance block.
    pub fn smooth_effect(
        &self,
        label: &str,
        grid: ArrayView1<f64>,
        coefficients: ArrayView1<f64>,
        covariance: &Array2<f64>,
    ) -> Result<(Array1<f64>, Array1<f64>), DesignError> {
        let layout = self
            .smooths
            .iter()
            .find(|sm| sm.label == label)
            .ok_or_else(|| DesignError::UnknownSmooth(label.to_string()))?;
        let block = layout.basis_at(grid)?;
        let beta = coefficients.slice(s![layout.cols.clone()]);
        let v = covariance.slice(s![layout.cols.clone(), layout.cols.clone()]);

        let fit = block.dot(&beta);
        let se = block
            .rows()
            .into_iter()
            .map(|row| row.dot(&v.dot(&row)).max(0.0).sqrt())
            .collect::<Array1<f64>>();
        Ok((fit, se))
    }
}
