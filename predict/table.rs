//! # Clinical Table
//!
//! Patients are rows; columns carry a hierarchical label such as
//! `("max_llh", "ipsi", "II")` or `("info", "tumor", "t_stage")`. Unilateral
//! cohorts use two label levels, bilateral cohorts three.
//!
//! Every cell is stored as text exactly as it was read and interpreted only
//! when a selector asks for it, so a stage column may hold any labels while a
//! level column is read as tri-state booleans.
//!
//! Loading goes through the `polars` CSV reader with header inference
//! disabled: the first `header_rows` cells of each column form its label.

use ndarray::Array1;
use polars::prelude::*;
use std::fs::File;
use std::path::Path;
use thiserror::Error;

/// One boolean per table row.
pub type RowMask = Array1<bool>;

#[derive(Error, Debug)]
pub enum TableError {
    #[error("Error from the underlying Polars DataFrame library: {0}")]
    PolarsError(#[from] PolarsError),
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
    #[error("The table needs at least one header row, but {0} were requested.")]
    NoHeaderRows(usize),
    #[error("The file has {found} lines but {header_rows} header rows were requested.")]
    TooFewLines { found: usize, header_rows: usize },
    #[error("Column {index} has an empty label at header row {row}.")]
    EmptyLabel { index: usize, row: usize },
    #[error("Column {label:?} has {found} cells, expected {expected}.")]
    RaggedColumn {
        label: Vec<String>,
        found: usize,
        expected: usize,
    },
    #[error("Column {label:?} has a label of depth {found}, expected {expected}.")]
    LabelDepth {
        label: Vec<String>,
        found: usize,
        expected: usize,
    },
    #[error("Cell '{value}' in column {label:?} is not a boolean.")]
    NotBoolean { label: Vec<String>, value: String },
}

/// A single column with its full hierarchical label.
#[derive(Debug, Clone, PartialEq)]
pub struct TableColumn {
    pub label: Vec<String>,
    pub cells: Vec<Option<String>>,
}

impl TableColumn {
    pub fn new(label: &[&str], cells: Vec<Option<String>>) -> Self {
        Self {
            label: label.iter().map(|s| s.to_string()).collect(),
            cells,
        }
    }

    /// Builds a column of tri-state booleans.
    pub fn flags(label: &[&str], cells: &[Option<bool>]) -> Self {
        Self::new(
            label,
            cells
                .iter()
                .map(|cell| cell.map(|v| if v { "True" } else { "False" }.to_string()))
                .collect(),
        )
    }

    /// Builds a column of text cells.
    pub fn text(label: &[&str], cells: &[&str]) -> Self {
        Self::new(label, cells.iter().map(|s| Some(s.to_string())).collect())
    }

    /// Reads the cells as booleans; missing cells stay `None`.
    pub fn bools(&self) -> Result<Vec<Option<bool>>, TableError> {
        self.cells
            .iter()
            .map(|cell| match cell.as_deref() {
                None => Ok(None),
                Some(text) => parse_flag(text).ok_or_else(|| TableError::NotBoolean {
                    label: self.label.clone(),
                    value: text.to_string(),
                }),
            })
            .collect()
    }

    fn has_prefix(&self, prefix: &[&str]) -> bool {
        self.label.len() >= prefix.len()
            && self.label.iter().zip(prefix).all(|(have, want)| have == want)
    }
}

fn parse_flag(text: &str) -> Option<Option<bool>> {
    match text.trim() {
        "" => Some(None),
        t if t.eq_ignore_ascii_case("nan") || t.eq_ignore_ascii_case("none") => Some(None),
        t if t.eq_ignore_ascii_case("true") || t == "1" || t == "1.0" => Some(Some(true)),
        t if t.eq_ignore_ascii_case("false") || t == "0" || t == "0.0" => Some(Some(false)),
        _ => None,
    }
}

/// Rows of patients under a hierarchical column index.
#[derive(Debug, Clone, PartialEq)]
pub struct ClinicalTable {
    depth: usize,
    num_rows: usize,
    columns: Vec<TableColumn>,
}

impl ClinicalTable {
    /// Builds a table, checking that every label has `depth` levels and every
    /// column the same number of cells.
    pub fn new(depth: usize, columns: Vec<TableColumn>) -> Result<Self, TableError> {
        let num_rows = columns.first().map_or(0, |c| c.cells.len());
        for column in &columns {
            if column.label.len() != depth {
                return Err(TableError::LabelDepth {
                    label: column.label.clone(),
                    found: column.label.len(),
                    expected: depth,
                });
            }
            if column.cells.len() != num_rows {
                return Err(TableError::RaggedColumn {
                    label: column.label.clone(),
                    found: column.cells.len(),
                    expected: num_rows,
                });
            }
        }
        Ok(Self {
            depth,
            num_rows,
            columns,
        })
    }

    /// Number of levels in the column hierarchy.
    pub fn depth(&self) -> usize {
        self.depth
    }

    pub fn num_rows(&self) -> usize {
        self.num_rows
    }

    pub fn columns(&self) -> &[TableColumn] {
        &self.columns
    }

    pub fn column(&self, label: &[&str]) -> Option<&TableColumn> {
        self.columns
            .iter()
            .find(|c| c.label.len() == label.len() && c.has_prefix(label))
    }

    /// Keeps the rows where `mask` is set.
    pub fn filter(&self, mask: &RowMask) -> Self {
        let columns = self
            .columns
            .iter()
            .map(|column| TableColumn {
                label: column.label.clone(),
                cells: column
                    .cells
                    .iter()
                    .zip(mask.iter())
                    .filter(|(_, keep)| **keep)
                    .map(|(cell, _)| cell.clone())
                    .collect(),
            })
            .collect();
        Self {
            depth: self.depth,
            num_rows: mask.iter().filter(|keep| **keep).count(),
            columns,
        }
    }

    /// The columns under `prefix`, with the prefix stripped from their labels.
    /// Returns `None` when nothing lives under the prefix.
    pub fn group(&self, prefix: &[&str]) -> Option<Self> {
        if prefix.len() >= self.depth {
            return None;
        }
        let columns: Vec<TableColumn> = self
            .columns
            .iter()
            .filter(|c| c.has_prefix(prefix))
            .map(|c| TableColumn {
                label: c.label[prefix.len()..].to_vec(),
                cells: c.cells.clone(),
            })
            .collect();
        if columns.is_empty() {
            return None;
        }
        Some(Self {
            depth: self.depth - prefix.len(),
            num_rows: self.num_rows,
            columns,
        })
    }

    /// Drops every row whose cells are all missing.
    pub fn drop_empty_rows(&self) -> Self {
        let keep: RowMask = (0..self.num_rows)
            .map(|row| self.columns.iter().any(|c| c.cells[row].is_some()))
            .collect();
        self.filter(&keep)
    }
}

/// Loads a clinical table from a CSV file whose first `header_rows` lines
/// hold the hierarchical column labels.
pub fn load_clinical_table(path: &Path, header_rows: usize) -> Result<ClinicalTable, TableError> {
    if header_rows == 0 {
        return Err(TableError::NoHeaderRows(header_rows));
    }

    // Header inference is off and every column is read as text, so the label
    // rows arrive as ordinary cells.
    let df = CsvReader::new(File::open(path)?)
        .with_options(
            CsvReadOptions::default()
                .with_has_header(false)
                .with_infer_schema_length(Some(0)),
        )
        .finish()?;

    if df.height() < header_rows {
        return Err(TableError::TooFewLines {
            found: df.height(),
            header_rows,
        });
    }

    let mut columns = Vec::with_capacity(df.width());
    for (index, column) in df.get_columns().iter().enumerate() {
        let strings = column.as_materialized_series().str()?;
        let mut cells: Vec<Option<String>> =
            strings.into_iter().map(|v| v.map(str::to_string)).collect();
        let values = cells.split_off(header_rows);

        let mut label = Vec::with_capacity(header_rows);
        for (row, cell) in cells.into_iter().enumerate() {
            match cell {
                Some(text) if !text.trim().is_empty() => label.push(text.trim().to_string()),
                _ => return Err(TableError::EmptyLabel { index, row }),
            }
        }
        columns.push(TableColumn {
            label,
            cells: values,
        });
    }

    let table = ClinicalTable::new(header_rows, columns)?;
    log::info!(
        "Loaded clinical table from '{}' with {} patients and {} columns.",
        path.display(),
        table.num_rows(),
        table.columns().len()
    );
    Ok(table)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn small_table() -> ClinicalTable {
        ClinicalTable::new(
            2,
            vec![
                TableColumn::flags(&["max_llh", "II"], &[Some(true), None, Some(false)]),
                TableColumn::flags(&["max_llh", "III"], &[Some(false), None, None]),
                TableColumn::text(&["info", "t_stage"], &["early", "late", "early"]),
            ],
        )
        .unwrap()
    }

    #[test]
    fn group_strips_prefix_and_reduces_depth() {
        let table = small_table();
        let group = table.group(&["max_llh"]).unwrap();
        assert_eq!(group.depth(), 1);
        assert_eq!(group.columns().len(), 2);
        assert!(group.column(&["II"]).is_some());
        assert!(table.group(&["CT"]).is_none());
    }

    #[test]
    fn drop_empty_rows_removes_rows_without_information() {
        let group = small_table().group(&["max_llh"]).unwrap();
        let kept = group.drop_empty_rows();
        assert_eq!(kept.num_rows(), 2);
        assert_eq!(
            kept.column(&["II"]).unwrap().bools().unwrap(),
            vec![Some(true), Some(false)]
        );
    }

    #[test]
    fn rejects_ragged_columns() {
        let err = ClinicalTable::new(
            1,
            vec![
                TableColumn::flags(&["II"], &[Some(true)]),
                TableColumn::flags(&["III"], &[Some(true), None]),
            ],
        )
        .unwrap_err();
        assert!(matches!(err, TableError::RaggedColumn { .. }));
    }

    #[test]
    fn non_boolean_cells_are_reported() {
        let column = TableColumn::text(&["II"], &["yes"]);
        match column.bools() {
            Err(TableError::NotBoolean { value, .. }) => assert_eq!(value, "yes"),
            other => panic!("Expected NotBoolean, got {:?}", other),
        }
    }

    #[test]
    fn loads_two_header_rows_from_csv() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "max_llh,max_llh,info").unwrap();
        writeln!(file, "II,III,t_stage").unwrap();
        writeln!(file, "True,False,early").unwrap();
        writeln!(file, "False,,late").unwrap();
        file.flush().unwrap();

        let table = load_clinical_table(file.path(), 2).unwrap();
        assert_eq!(table.depth(), 2);
        assert_eq!(table.num_rows(), 2);
        let third = table.column(&["max_llh", "III"]).unwrap();
        assert_eq!(third.bools().unwrap(), vec![Some(false), None]);
        let stage = table.column(&["info", "t_stage"]).unwrap();
        assert_eq!(stage.cells[1].as_deref(), Some("late"));
    }

    #[test]
    fn too_many_header_rows_is_an_error() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "max_llh,info").unwrap();
        file.flush().unwrap();
        let err = load_clinical_table(file.path(), 3).unwrap_err();
        assert!(matches!(err, TableError::TooFewLines { .. }));
    }
}
