//! Result formatting: coefficient/standard-error tables and timing summaries.
//!
//! Everything here returns plain `String`s; the demos print them. The only
//! invariant enforced is the one the workflow promises: every model in a
//! comparison table shares one coefficient layout.

pub mod plot;

use crate::glm::FittedModel;
use std::fmt::Write as FmtWrite;
use std::time::Duration;

/// Wall-clock timing for one fit, measured by the caller.
#[derive(Debug, Clone)]
pub struct TimedFit {
    pub label: String,
    pub elapsed: Duration,
}

impl TimedFit {
    pub fn new(label: &str, elapsed: Duration) -> Self {
        TimedFit {
            label: label.to_string(),
            elapsed,
        }
    }
}

/// Side-by-side estimate/standard-error table for models sharing one
/// coefficient layout.
///
/// # Panics
///
/// Panics if the models disagree on coefficient names or ordering; the
/// workflow guarantees they cannot.
pub fn coefficient_table(models: &[(&str, &FittedModel)]) -> String {
    let (first_label, first) = models.first().expect("at least one model to tabulate");
    for (label, model) in models.iter().skip(1) {
        assert_eq!(
            model.coef_names, first.coef_names,
            "model '{label}' does not share the coefficient layout of '{first_label}'"
        );
    }

    let name_width = first
        .coef_names
        .iter()
        .map(|n| n.len())
        .max()
        .unwrap_or(0)
        .max(11);

    let mut out = String::new();
    write!(out, "{:<name_width$}", "coefficient").unwrap();
    for (label, _) in models {
        write!(out, "  {:>12}  {:>12}", format!("{label}"), "s.e.").unwrap();
    }
    out.push('\n');

    for (i, name) in first.coef_names.iter().enumerate() {
        write!(out, "{name:<name_width$}").unwrap();
        for (_, model) in models {
            let se = model.std_errors();
            write!(out, "  {:>12.6}  {:>12.6}", model.coefficients[i], se[i]).unwrap();
        }
        out.push('\n');
    }
    out
}

/// One-line-per-fit wall-clock summary.
pub fn timing_table(timings: &[TimedFit]) -> String {
    let mut out = String::from("model      elapsed\n");
    for t in timings {
        writeln!(out, "{:<9}  {:>9.3}s", t.label, t.elapsed.as_secs_f64()).unwrap();
    }
    out
}

/// Compact fit summary for one model: deviance, dispersion, edf, iterations.
pub fn fit_summary(label: &str, model: &FittedModel) -> String {
    format!(
        "{label}: deviance {:.4}, dispersion {:.4}, edf {:.2}, {} iterations ({} link)\n",
        model.deviance,
        model.dispersion,
        model.edf,
        model.iterations,
        model.family.link_name()
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::family::Family;
    use ndarray::{array, Array2};

    fn toy_model(names: &[&str], coefs: &[f64]) -> FittedModel {
        let p = coefs.len();
        FittedModel {
            coefficients: ndarray::Array1::from_vec(coefs.to_vec()),
            coef_names: names.iter().map(|s| s.to_string()).collect(),
            covariance: Array2::eye(p),
            fitted: array![0.5],
            deviance: 1.0,
            dispersion: 1.0,
            edf: p as f64,
            iterations: 3,
            family: Family::Binomial,
            smoothing: Vec::new(),
        }
    }

    #[test]
    fn table_lists_every_coefficient_for_every_model() {
        let naive = toy_model(&["(Intercept)", "SBP"], &[-2.0, 1.5]);
        let corrected = toy_model(&["(Intercept)", "SBP"], &[-2.1, 1.8]);
        let table = coefficient_table(&[("naive", &naive), ("MCEM", &corrected)]);
        assert!(table.contains("(Intercept)"));
        assert!(table.contains("SBP"));
        assert!(table.contains("1.500000"));
        assert!(table.contains("1.800000"));
        assert_eq!(table.lines().count(), 3);
    }

    #[test]
    #[should_panic(expected = "does not share the coefficient layout")]
    fn mismatched_layouts_panic() {
        let a = toy_model(&["(Intercept)", "x"], &[0.0, 1.0]);
        let b = toy_model(&["(Intercept)", "z"], &[0.0, 1.0]);
        coefficient_table(&[("a", &a), ("b", &b)]);
    }

    #[test]
    fn timing_table_prints_seconds() {
        let rows = vec![
            TimedFit::new("naive", Duration::from_millis(12)),
            TimedFit::new("MCEM", Duration::from_secs(2)),
        ];
        let out = timing_table(&rows);
        assert!(out.contains("naive"));
        assert!(out.contains("2.000s"));
    }
}
