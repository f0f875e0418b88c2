// Tabular model produced by normalization and shared by filtering, aggregation and export

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

pub const LATITUDE_COLUMN: &str = "Latitude";
pub const LONGITUDE_COLUMN: &str = "Longitude";
pub const ALTITUDE_COLUMN: &str = "Altitude";

// One cell of the normalized table.
// `Missing` is an explicit value: every row carries every column, and failed
// coercions land here instead of aborting the pipeline.
#[derive(Debug, Clone, PartialEq, Default, Serialize)]
#[serde(untagged)]
pub enum CellValue {
    #[default]
    Missing,
    Bool(bool),
    Number(f64),
    Text(String),
}

impl CellValue {
    pub fn is_missing(&self) -> bool {
        matches!(self, CellValue::Missing)
    }

    // Display form used for categorical matching, options and CSV
    pub fn display(&self) -> String {
        match self {
            CellValue::Missing => String::new(),
            CellValue::Bool(b) => b.to_string(),
            CellValue::Number(n) => format_number(*n),
            CellValue::Text(s) => s.clone(),
        }
    }

    // Best-effort numeric view; text produced by list joins is parsed here
    pub fn as_number(&self) -> Option<f64> {
        match self {
            CellValue::Number(n) => Some(*n),
            CellValue::Text(s) => parse_number(s),
            CellValue::Bool(_) | CellValue::Missing => None,
        }
    }
}

// Parses a finite float; anything else is `None` (never an error).
pub fn parse_number(raw: &str) -> Option<f64> {
    raw.trim().parse::<f64>().ok().filter(|n| n.is_finite())
}

// Whole numbers print without a trailing ".0" (22000, not 22000.0)
pub fn format_number(n: f64) -> String {
    if n.fract() == 0.0 && n.abs() < 1e15 {
        format!("{}", n as i64)
    } else {
        n.to_string()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Location {
    pub latitude: f64,
    pub longitude: f64,
    pub altitude: Option<f64>,
}

// One survey submission after normalization
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SurveyRecord {
    pub submission_id: String,
    pub submission_time: NaiveDateTime,
    pub location: Option<Location>,
    pub cells: BTreeMap<String, CellValue>,
}

impl SurveyRecord {
    pub fn get(&self, column: &str) -> Option<&CellValue> {
        self.cells.get(column)
    }

    pub fn display(&self, column: &str) -> String {
        self.get(column).map(CellValue::display).unwrap_or_default()
    }
}

// Schema-on-read table: the column list is discovered per fetch.
// Rows are shared behind `Arc`, so a filtered view is a new table holding a
// subset of the same rows and the full column list.
#[derive(Debug, Clone, Default)]
pub struct SurveyTable {
    columns: Arc<Vec<String>>,
    derived_columns: Arc<BTreeSet<String>>,
    rows: Vec<Arc<SurveyRecord>>,
}

impl SurveyTable {
    pub fn new(
        columns: Vec<String>,
        derived_columns: BTreeSet<String>,
        rows: Vec<SurveyRecord>,
    ) -> Self {
        Self {
            columns: Arc::new(columns),
            derived_columns: Arc::new(derived_columns),
            rows: rows.into_iter().map(Arc::new).collect(),
        }
    }

    pub fn empty() -> Self {
        Self::default()
    }

    // Same schema, different rows
    pub(crate) fn with_rows(&self, rows: Vec<Arc<SurveyRecord>>) -> Self {
        Self {
            columns: Arc::clone(&self.columns),
            derived_columns: Arc::clone(&self.derived_columns),
            rows,
        }
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn has_column(&self, column: &str) -> bool {
        self.columns.iter().any(|c| c == column)
    }

    // Columns built by joining list values
    pub fn derived_columns(&self) -> impl Iterator<Item = &str> {
        self.derived_columns.iter().map(String::as_str)
    }

    pub fn rows(&self) -> &[Arc<SurveyRecord>] {
        &self.rows
    }

    pub fn iter(&self) -> impl Iterator<Item = &SurveyRecord> {
        self.rows.iter().map(|r| r.as_ref())
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn submission_ids(&self) -> Vec<&str> {
        self.iter().map(|r| r.submission_id.as_str()).collect()
    }
}
