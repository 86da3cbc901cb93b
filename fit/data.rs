//! Observation tables and the packaged example datasets.
//!
//! The table is the only data structure the workflow sees: named numeric
//! columns of equal length, immutable once loaded. CSV ingestion goes through
//! polars and validates aggressively; failures are assumed to be user-input
//! errors and the `DataError` variants are worded accordingly.

use ndarray::{Array1, ArrayView1, concatenate, Axis};
use polars::prelude::*;
use std::fs::File;
use std::io::Cursor;
use std::path::Path;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum DataError {
    #[error("error from the underlying polars DataFrame library: {0}")]
    Polars(#[from] PolarsError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("required column '{0}' was not found; check spelling and case")]
    ColumnNotFound(String),

    #[error("column '{column}' could not be read as numeric data (found type: {found_type})")]
    ColumnWrongType { column: String, found_type: String },

    #[error("missing or null values found in column '{0}'; complete data is required")]
    MissingValues(String),

    #[error("non-finite values (NaN or infinity) found in column '{0}'")]
    NonFiniteValues(String),

    #[error("columns must all have the same length: '{column}' has {found} rows, expected {expected}")]
    LengthMismatch {
        column: String,
        found: usize,
        expected: usize,
    },

    #[error("a table needs at least one column")]
    Empty,
}

/// An immutable table of named numeric columns.
#[derive(Debug, Clone)]
pub struct ObservationTable {
    names: Vec<String>,
    columns: Vec<Array1<f64>>,
    n_rows: usize,
}

impl ObservationTable {
    /// Builds a table from in-memory columns, checking length agreement.
    pub fn from_columns(
        columns: Vec<(String, Array1<f64>)>,
    ) -> Result<ObservationTable, DataError> {
        let n_rows = columns.first().ok_or(DataError::Empty)?.1.len();
        let mut names = Vec::with_capacity(columns.len());
        let mut arrays = Vec::with_capacity(columns.len());
        for (name, values) in columns {
            if values.len() != n_rows {
                return Err(DataError::LengthMismatch {
                    column: name,
                    found: values.len(),
                    expected: n_rows,
                });
            }
            if values.iter().any(|v| !v.is_finite()) {
                return Err(DataError::NonFiniteValues(name));
            }
            names.push(name);
            arrays.push(values);
        }
        Ok(ObservationTable {
            names,
            columns: arrays,
            n_rows,
        })
    }

    /// Loads a comma-separated file with a header row.
    pub fn from_csv_path(path: &Path) -> Result<ObservationTable, DataError> {
        log::info!("loading observation table from '{}'", path.display());
        let df = CsvReader::new(File::open(path)?)
            .with_options(csv_options())
            .finish()?;
        Self::from_dataframe(&df)
    }

    fn from_csv_str(text: &str) -> Result<ObservationTable, DataError> {
        let df = CsvReader::new(Cursor::new(text.as_bytes().to_vec()))
            .with_options(csv_options())
            .finish()?;
        Self::from_dataframe(&df)
    }

    fn from_dataframe(df: &DataFrame) -> Result<ObservationTable, DataError> {
        let mut columns = Vec::with_capacity(df.width());
        for name in df.get_column_names() {
            let values = extract_numeric_column(df, name.as_str())?;
            columns.push((name.to_string(), Array1::from_vec(values)));
        }
        Self::from_columns(columns)
    }

    pub fn n_rows(&self) -> usize {
        self.n_rows
    }

    pub fn column_names(&self) -> &[String] {
        &self.names
    }

    pub fn column(&self, name: &str) -> Result<ArrayView1<'_, f64>, DataError> {
        self.names
            .iter()
            .position(|n| n == name)
            .map(|i| self.columns[i].view())
            .ok_or_else(|| DataError::ColumnNotFound(name.to_string()))
    }

    /// A copy of the table with one column replaced. Used by the correction
    /// engines to substitute simulated values for the contaminated covariate;
    /// the original table is never mutated.
    pub fn with_replaced_column(
        &self,
        name: &str,
        values: Array1<f64>,
    ) -> Result<ObservationTable, DataError> {
        let idx = self
            .names
            .iter()
            .position(|n| n == name)
            .ok_or_else(|| DataError::ColumnNotFound(name.to_string()))?;
        if values.len() != self.n_rows {
            return Err(DataError::LengthMismatch {
                column: name.to_string(),
                found: values.len(),
                expected: self.n_rows,
            });
        }
        let mut copy = self.clone();
        copy.columns[idx] = values;
        Ok(copy)
    }

    /// Stacks the table `times` times (row-wise tiling). The Monte Carlo EM
    /// M-step fits one weighted model over all replicates at once.
    pub fn tiled(&self, times: usize) -> ObservationTable {
        let columns = self
            .columns
            .iter()
            .map(|col| {
                let views: Vec<ArrayView1<f64>> = (0..times).map(|_| col.view()).collect();
                concatenate(Axis(0), &views).expect("tiling equal-length 1-D arrays")
            })
            .collect();
        ObservationTable {
            names: self.names.clone(),
            columns,
            n_rows: self.n_rows * times,
        }
    }
}

fn csv_options() -> CsvReadOptions {
    CsvReadOptions::default()
        .with_has_header(true)
        .with_parse_options(CsvParseOptions::default().with_separator(b','))
}

fn extract_numeric_column(df: &DataFrame, name: &str) -> Result<Vec<f64>, DataError> {
    let series = df.column(name)?;
    if series.null_count() > 0 {
        return Err(DataError::MissingValues(name.to_string()));
    }
    let casted = series.cast(&DataType::Float64).map_err(|_| DataError::ColumnWrongType {
        column: name.to_string(),
        found_type: format!("{:?}", series.dtype()),
    })?;
    if casted.null_count() > 0 {
        return Err(DataError::ColumnWrongType {
            column: name.to_string(),
            found_type: format!("{:?}", series.dtype()),
        });
    }
    let values: Vec<f64> = casted.f64()?.rechunk().into_no_null_iter().collect();
    if values.iter().any(|v| !v.is_finite()) {
        return Err(DataError::NonFiniteValues(name.to_string()));
    }
    Ok(values)
}

/// The three packaged example datasets, embedded at compile time.
pub mod datasets {
    use super::ObservationTable;

    /// Heart-study data for the GLM example. Columns: `chd` (0/1 outcome),
    /// `sbp` (transformed systolic blood pressure, observed with measurement
    /// error of variance 0.006295), `chol`, `age`, `smoke`.
    pub fn heart() -> ObservationTable {
        ObservationTable::from_csv_str(include_str!("datasets/heart.csv"))
            .expect("packaged heart dataset is valid")
    }

    /// Daily mortality data for the GAM example. Columns: `day`, `deaths`
    /// (count outcome), `so2` (log concentration, error-contaminated),
    /// `tmean`, `humid`.
    pub fn pollution() -> ObservationTable {
        ObservationTable::from_csv_str(include_str!("datasets/pollution.csv"))
            .expect("packaged pollution dataset is valid")
    }

    /// Presence-only occurrence data for the point-process example, already in
    /// Berman-Turner form. Columns: `x`, `y` (coordinates), `presence` (1 for
    /// an occurrence point, 0 for a quadrature point), `wt` (quadrature
    /// weight), `precip` (error-contaminated), `temp`.
    pub fn eucalypt() -> ObservationTable {
        ObservationTable::from_csv_str(include_str!("datasets/eucalypt.csv"))
            .expect("packaged eucalypt dataset is valid")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use ndarray::array;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn write_csv(content: &str) -> NamedTempFile {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "{content}").unwrap();
        file.flush().unwrap();
        file
    }

    #[test]
    fn loads_a_csv_file() {
        let file = write_csv("a,b\n1.0,2.0\n3.0,4.5");
        let table = ObservationTable::from_csv_path(file.path()).unwrap();
        assert_eq!(table.n_rows(), 2);
        assert_eq!(table.column_names(), &["a", "b"]);
        assert_abs_diff_eq!(table.column("b").unwrap()[1], 4.5);
    }

    #[test]
    fn rejects_missing_values() {
        let file = write_csv("a,b\n1.0,\n3.0,4.5");
        match ObservationTable::from_csv_path(file.path()) {
            Err(DataError::MissingValues(col)) => assert_eq!(col, "b"),
            other => panic!("expected MissingValues, got {other:?}"),
        }
    }

    #[test]
    fn rejects_non_numeric_columns() {
        let file = write_csv("a,b\n1.0,yes\n3.0,no");
        match ObservationTable::from_csv_path(file.path()) {
            Err(DataError::ColumnWrongType { column, .. }) => assert_eq!(column, "b"),
            other => panic!("expected ColumnWrongType, got {other:?}"),
        }
    }

    #[test]
    fn rejects_non_finite_values() {
        let file = write_csv("a,b\n1.0,NaN\n3.0,4.5");
        match ObservationTable::from_csv_path(file.path()) {
            Err(DataError::NonFiniteValues(col)) => assert_eq!(col, "b"),
            other => panic!("expected NonFiniteValues, got {other:?}"),
        }
    }

    #[test]
    fn column_replacement_leaves_original_alone() {
        let table = ObservationTable::from_columns(vec![
            ("x".into(), array![1.0, 2.0]),
            ("y".into(), array![0.0, 1.0]),
        ])
        .unwrap();
        let replaced = table
            .with_replaced_column("x", array![5.0, 6.0])
            .unwrap();
        assert_abs_diff_eq!(replaced.column("x").unwrap()[0], 5.0);
        assert_abs_diff_eq!(table.column("x").unwrap()[0], 1.0);
    }

    #[test]
    fn tiling_repeats_rows_in_order() {
        let table =
            ObservationTable::from_columns(vec![("x".into(), array![1.0, 2.0])]).unwrap();
        let tiled = table.tiled(3);
        assert_eq!(tiled.n_rows(), 6);
        let x = tiled.column("x").unwrap();
        assert_eq!(x.to_vec(), vec![1.0, 2.0, 1.0, 2.0, 1.0, 2.0]);
    }

    #[test]
    fn packaged_datasets_parse() {
        let heart = datasets::heart();
        assert_eq!(
            heart.column_names(),
            &["chd", "sbp", "chol", "age", "smoke"]
        );
        assert!(heart.n_rows() >= 400);

        let pollution = datasets::pollution();
        assert_eq!(
            pollution.column_names(),
            &["day", "deaths", "so2", "tmean", "humid"]
        );
        assert_eq!(pollution.n_rows(), 365);

        let eucalypt = datasets::eucalypt();
        assert_eq!(
            eucalypt.column_names(),
            &["x", "y", "presence", "wt", "precip", "temp"]
        );
        // Quadrature weights are strictly positive.
        assert!(eucalypt.column("wt").unwrap().iter().all(|&w| w > 0.0));
    }
}
