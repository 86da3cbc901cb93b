//! The measurement-error correction workflow: one linear pipeline, executed
//! once per example. Naive fit, Monte Carlo EM correction, optional SIMEX
//! comparison, each timed with a wall-clock delta. No feedback loops, no
//! shared state; failures from any stage propagate unmodified.

use crate::correct::mcem::{self, McemOptions};
use crate::correct::simex::{self, SimexOptions};
use crate::correct::{CorrectedModel, CorrectionError, ErrorVariance};
use crate::design::ModelSpec;
use crate::data::{DataError, ObservationTable};
use crate::gam::{fit_gam, fit_gam_weighted};
use crate::glm::{fit_glm, fit_glm_weighted, FitError, FittedModel};
use crate::ppm::{berman_turner, PpmError};
use crate::report::TimedFit;
use std::time::Instant;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum WorkflowError {
    #[error(transparent)]
    Fit(#[from] FitError),
    #[error(transparent)]
    Ppm(#[from] PpmError),
    #[error(transparent)]
    Correction(#[from] CorrectionError),
    #[error(transparent)]
    Data(#[from] DataError),
}

/// What a workflow run needs beyond the model spec and the data.
#[derive(Debug, Clone)]
pub struct WorkflowConfig {
    pub contaminated_column: String,
    pub error_variance: ErrorVariance,
    pub mcem: McemOptions,
    /// Run the SIMEX comparison as well (the GLM example does).
    pub simex: Option<SimexOptions>,
    /// Quadrature-weight column; set only for point-process data.
    pub weight_column: Option<String>,
}

pub struct WorkflowReport {
    pub naive: FittedModel,
    pub mcem: CorrectedModel,
    pub simex: Option<CorrectedModel>,
    pub timings: Vec<TimedFit>,
}

/// Runs the full workflow: Dataset Provider output in, report out.
pub fn run_workflow(
    spec: &ModelSpec,
    table: &ObservationTable,
    config: &WorkflowConfig,
) -> Result<WorkflowReport, WorkflowError> {
    let mut timings = Vec::new();
    let uses_smooths = spec
        .terms
        .iter()
        .any(|t| matches!(t, crate::design::Term::Smooth { .. }));

    // Point-process data runs the whole pipeline in Berman-Turner form, so
    // the corrections refit exactly what the naive fitter fitted.
    let (work_spec, work_table, prior) = match &config.weight_column {
        Some(wt) => {
            let (s, t, w) = berman_turner(spec, table, wt)?;
            (s, t, Some(w))
        }
        None => (spec.clone(), table.clone(), None),
    };

    let start = Instant::now();
    let naive = match (&prior, uses_smooths) {
        (Some(w), true) => fit_gam_weighted(&work_spec, &work_table, Some(w.view()))?,
        (Some(w), false) => fit_glm_weighted(&work_spec, &work_table, Some(w.view()))?,
        (None, true) => fit_gam(&work_spec, &work_table)?,
        (None, false) => fit_glm(&work_spec, &work_table)?,
    };
    timings.push(TimedFit::new("naive", start.elapsed()));

    let start = Instant::now();
    let mcem = mcem::correct(
        &naive,
        &work_spec,
        &work_table,
        &config.contaminated_column,
        &config.error_variance,
        prior.as_ref().map(|w| w.view()),
        &config.mcem,
    )?;
    timings.push(TimedFit::new("MCEM", start.elapsed()));

    let simex = match &config.simex {
        Some(opts) => {
            let start = Instant::now();
            let corrected = simex::correct(
                &naive,
                &work_spec,
                &work_table,
                &config.contaminated_column,
                &config.error_variance,
                prior.as_ref().map(|w| w.view()),
                opts,
            )?;
            timings.push(TimedFit::new("SIMEX", start.elapsed()));
            Some(corrected)
        }
        None => None,
    };

    Ok(WorkflowReport {
        naive,
        mcem,
        simex,
        timings,
    })
}
