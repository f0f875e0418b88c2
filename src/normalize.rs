// Flattens raw survey submissions into the tabular model

use std::collections::{BTreeMap, BTreeSet, HashSet};

use chrono::{DateTime, NaiveDate, NaiveDateTime};
use serde::Serialize;
use serde_json::{Map, Value};

use crate::config::FieldSettings;
use crate::models::{
    ALTITUDE_COLUMN, CellValue, LATITUDE_COLUMN, LONGITUDE_COLUMN, Location, SurveyRecord,
    SurveyTable, parse_number,
};

pub const TRANSFORMED_SUFFIX: &str = "_Transformed";
pub const LIST_SEPARATOR: &str = ", ";
const NESTED_SEPARATOR: char = '.';
const ID_COLUMNS: [&str; 2] = ["_id", "_uuid"];
const MAX_LOCATION_TOKENS: usize = 4;

// A single cell that could not be coerced; the cell became `Missing`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CoercionWarning {
    pub submission_id: String,
    pub column: String,
    pub raw: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct NormalizeReport {
    pub input_records: usize,
    pub dropped_records: usize,
    pub warnings: Vec<CoercionWarning>,
}

impl NormalizeReport {
    pub fn coercion_count(&self) -> usize {
        self.warnings.len()
    }

    pub fn coercions_in(&self, column: &str) -> usize {
        self.warnings.iter().filter(|w| w.column == column).count()
    }

    pub fn coercions_by_column(&self) -> BTreeMap<String, usize> {
        let mut counts = BTreeMap::new();
        for w in &self.warnings {
            *counts.entry(w.column.clone()).or_insert(0) += 1;
        }
        counts
    }
}

// Column names in first-seen order across submissions
#[derive(Default)]
struct ColumnOrder {
    names: Vec<String>,
    seen: HashSet<String>,
}

impl ColumnOrder {
    fn push(&mut self, name: &str) {
        if self.seen.insert(name.to_string()) {
            self.names.push(name.to_string());
        }
    }
}

// Normalizes a batch of raw submissions into a table plus diagnostics.
// Rows whose submission time is absent or unparseable are dropped and counted
// before they can shape the schema; every other failure degrades one cell.
pub fn normalize(records: &[Value], fields: &FieldSettings) -> (SurveyTable, NormalizeReport) {
    let mut report = NormalizeReport {
        input_records: records.len(),
        ..Default::default()
    };

    // Location and numeric columns keep their names even when some row holds a list
    let protected: BTreeSet<&str> = std::iter::once(fields.location.as_str())
        .chain(fields.numeric.iter().map(String::as_str))
        .collect();

    // Pass 1: flatten, drop rows without a usable time, learn which kept columns hold lists
    let mut kept = Vec::with_capacity(records.len());
    let mut list_columns = BTreeSet::new();
    for (index, record) in records.iter().enumerate() {
        let Some(object) = record.as_object() else {
            tracing::debug!(index, "Skipping submission that is not a JSON object");
            report.dropped_records += 1;
            continue;
        };
        let mut flat = Vec::new();
        flatten_into(object, None, &mut flat);

        let raw_of = |column: &str| {
            flat.iter()
                .find(|(key, _)| key == column)
                .map(|(_, value)| scalar_cell(value).display())
                .unwrap_or_default()
        };
        let submission_id = ID_COLUMNS
            .iter()
            .map(|c| raw_of(*c))
            .find(|id| !id.is_empty())
            .unwrap_or_else(|| format!("row-{}", index));
        let raw_time = raw_of(fields.submission_time.as_str());
        let Some(submission_time) = parse_submission_time(&raw_time) else {
            tracing::debug!(
                submission_id = %submission_id,
                raw = %raw_time,
                "Dropping submission with unparseable submission time"
            );
            report.dropped_records += 1;
            continue;
        };

        for (key, value) in &flat {
            if value.is_array() && !protected.contains(key.as_str()) {
                list_columns.insert(key.clone());
            }
        }
        kept.push((submission_id, submission_time, flat));
    }

    let derived: BTreeSet<String> = list_columns
        .iter()
        .map(|c| format!("{}{}", c, TRANSFORMED_SUFFIX))
        .collect();

    // Pass 2: build rows
    let mut order = ColumnOrder::default();
    let mut rows = Vec::with_capacity(kept.len());
    let mut saw_location = false;
    for (submission_id, submission_time, flat) in kept {
        let mut cells = BTreeMap::new();
        let mut location_is_list = false;
        for (key, value) in flat {
            let (column, cell) = if list_columns.contains(&key) {
                (format!("{}{}", key, TRANSFORMED_SUFFIX), join_list(&value))
            } else if value.is_array() {
                // Protected column holding a list: keep the text, coercion happens below
                location_is_list |= key == fields.location;
                (key, join_list(&value))
            } else {
                (key, scalar_cell(&value))
            };
            order.push(&column);
            cells.insert(column, cell);
        }

        // Canonical naive form so every row shares one representation
        cells.insert(
            fields.submission_time.clone(),
            CellValue::Text(format_submission_time(submission_time)),
        );

        let mut location = None;
        if let Some(raw) = cells.get(&fields.location).cloned() {
            saw_location = true;
            let decoded = if location_is_list {
                report.warnings.push(CoercionWarning {
                    submission_id: submission_id.clone(),
                    column: LATITUDE_COLUMN.to_string(),
                    raw: raw.display(),
                });
                [None; 3]
            } else {
                decode_location(&raw, &submission_id, &mut report.warnings)
            };
            cells.insert(LATITUDE_COLUMN.to_string(), opt_number(decoded[0]));
            cells.insert(LONGITUDE_COLUMN.to_string(), opt_number(decoded[1]));
            cells.insert(ALTITUDE_COLUMN.to_string(), opt_number(decoded[2]));
            if let (Some(latitude), Some(longitude)) = (decoded[0], decoded[1]) {
                location = Some(Location {
                    latitude,
                    longitude,
                    altitude: decoded[2],
                });
            }
        }

        for column in &fields.numeric {
            coerce_numeric(&mut cells, column, &submission_id, &mut report.warnings);
        }

        rows.push(SurveyRecord {
            submission_id,
            submission_time,
            location,
            cells,
        });
    }

    if saw_location {
        for column in [LATITUDE_COLUMN, LONGITUDE_COLUMN, ALTITUDE_COLUMN] {
            order.push(column);
        }
    }

    // Every row carries every column
    for row in &mut rows {
        for column in &order.names {
            row.cells.entry(column.clone()).or_insert(CellValue::Missing);
        }
    }

    if report.dropped_records > 0 || !report.warnings.is_empty() {
        tracing::warn!(
            dropped = report.dropped_records,
            coercions = report.warnings.len(),
            "Normalization degraded some submissions"
        );
    }
    tracing::info!(
        rows = rows.len(),
        columns = order.names.len(),
        derived = derived.len(),
        "Normalized survey submissions"
    );

    (SurveyTable::new(order.names, derived, rows), report)
}

// Nested objects become "parent.child" columns; keys like "Identification/Province" stay as is
fn flatten_into(object: &Map<String, Value>, prefix: Option<&str>, out: &mut Vec<(String, Value)>) {
    for (key, value) in object {
        let name = match prefix {
            Some(p) => format!("{}{}{}", p, NESTED_SEPARATOR, key),
            None => key.clone(),
        };
        match value {
            Value::Object(inner) if !inner.is_empty() => flatten_into(inner, Some(&name), out),
            Value::Object(_) => out.push((name, Value::Null)),
            other => out.push((name, other.clone())),
        }
    }
}

fn scalar_cell(value: &Value) -> CellValue {
    match value {
        Value::Null => CellValue::Missing,
        Value::Bool(b) => CellValue::Bool(*b),
        Value::Number(n) => n.as_f64().map(CellValue::Number).unwrap_or(CellValue::Missing),
        Value::String(s) => CellValue::Text(s.clone()),
        other => CellValue::Text(other.to_string()),
    }
}

// Lists become one display string; scalars in a list column pass through
fn join_list(value: &Value) -> CellValue {
    match value {
        Value::Array(items) => CellValue::Text(
            items
                .iter()
                .map(element_text)
                .collect::<Vec<_>>()
                .join(LIST_SEPARATOR),
        ),
        other => scalar_cell(other),
    }
}

fn element_text(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(s) => s.clone(),
        Value::Number(n) => n.to_string(),
        Value::Bool(b) => b.to_string(),
        other => other.to_string(),
    }
}

// Accepts RFC 3339 (offsets are converted to UTC and dropped), naive ISO
// timestamps with `T` or space, and bare dates (midnight).
pub fn parse_submission_time(raw: &str) -> Option<NaiveDateTime> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Some(dt.naive_utc());
    }
    for format in ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%dT%H:%M"] {
        if let Ok(dt) = NaiveDateTime::parse_from_str(raw, format) {
            return Some(dt);
        }
    }
    NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
}

pub fn format_submission_time(t: NaiveDateTime) -> String {
    t.format("%Y-%m-%dT%H:%M:%S%.f").to_string()
}

// Splits a "lat lon alt precision" string; each token fails soft to `None`.
// Only the first three positions are returned, the rest is ignored.
pub fn decode_location(
    raw: &CellValue,
    submission_id: &str,
    warnings: &mut Vec<CoercionWarning>,
) -> [Option<f64>; 3] {
    let mut decoded = [None; 3];
    let text = match raw {
        CellValue::Text(s) => s,
        CellValue::Missing => return decoded,
        other => {
            warnings.push(CoercionWarning {
                submission_id: submission_id.to_string(),
                column: LATITUDE_COLUMN.to_string(),
                raw: other.display(),
            });
            return decoded;
        }
    };

    let targets = [LATITUDE_COLUMN, LONGITUDE_COLUMN, ALTITUDE_COLUMN];
    for (i, token) in text.split_whitespace().take(MAX_LOCATION_TOKENS).enumerate() {
        let Some(target) = targets.get(i) else {
            break;
        };
        decoded[i] = parse_number(token);
        if decoded[i].is_none() {
            warnings.push(CoercionWarning {
                submission_id: submission_id.to_string(),
                column: target.to_string(),
                raw: token.to_string(),
            });
        }
    }
    decoded
}

fn opt_number(value: Option<f64>) -> CellValue {
    value.map(CellValue::Number).unwrap_or(CellValue::Missing)
}

fn coerce_numeric(
    cells: &mut BTreeMap<String, CellValue>,
    column: &str,
    submission_id: &str,
    warnings: &mut Vec<CoercionWarning>,
) {
    let Some(cell) = cells.get_mut(column) else {
        return;
    };
    if cell.is_missing() {
        return;
    }
    match cell.as_number() {
        Some(n) => *cell = CellValue::Number(n),
        None => {
            warnings.push(CoercionWarning {
                submission_id: submission_id.to_string(),
                column: column.to_string(),
                raw: cell.display(),
            });
            *cell = CellValue::Missing;
        }
    }
}
