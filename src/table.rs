use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Column-ordered in-memory table. This is the shape in which the frontend
/// ships already-parsed spreadsheet exports: an ordered list of column names
/// plus one JSON cell per column per row. Cells a source left blank arrive
/// as JSON null.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Table {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<Value>>,
}

impl Table {
    pub fn new<S: Into<String>>(columns: Vec<S>) -> Self {
        Table {
            columns: columns.into_iter().map(Into::into).collect(),
            rows: Vec::new(),
        }
    }

    pub fn push_row(&mut self, row: Vec<Value>) {
        self.rows.push(row);
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    #[allow(dead_code)]
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Position of a column by exact name.
    pub fn column(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c == name)
    }

    /// Cell at (row, col); short rows read as absent.
    pub fn cell(&self, row: usize, col: usize) -> Option<&Value> {
        self.rows.get(row).and_then(|r| r.get(col))
    }

    pub fn str_cell(&self, row: usize, col: usize) -> Option<&str> {
        self.cell(row, col).and_then(|v| v.as_str())
    }

    pub fn num_cell(&self, row: usize, col: usize) -> Option<f64> {
        self.cell(row, col).and_then(|v| v.as_f64())
    }

    pub fn int_cell(&self, row: usize, col: usize) -> Option<i64> {
        self.cell(row, col).and_then(|v| v.as_i64())
    }
}
