// Summary metrics and chart/map series over a (filtered) survey table

use std::collections::{BTreeSet, HashMap};

use serde::Serialize;

use crate::models::SurveyTable;

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Metrics {
    pub count: usize,
    // None when the value column is not part of the schema at all
    pub total_value: Option<f64>,
    // Non-empty cells that did not coerce to a number
    pub non_numeric: usize,
}

// Row count plus the numeric sum of `value_column`.
// Missing and non-numeric cells add nothing. An absent column reports
// `total_value: None` so callers can tell "unavailable" from zero.
pub fn summarize(view: &SurveyTable, value_column: &str) -> Metrics {
    let count = view.len();
    if !view.has_column(value_column) {
        tracing::warn!(column = %value_column, "Value column not present, total unavailable");
        return Metrics { count, total_value: None, non_numeric: 0 };
    }

    let mut total = 0.0;
    let mut non_numeric = 0;
    for row in view.iter() {
        let Some(cell) = row.get(value_column) else {
            continue;
        };
        match cell.as_number() {
            Some(n) => total += n,
            None if !cell.is_missing() => non_numeric += 1,
            None => {}
        }
    }

    if non_numeric > 0 {
        tracing::debug!(column = %value_column, non_numeric, "Skipped non-numeric values in total");
    }
    Metrics { count, total_value: Some(total), non_numeric }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ValueCount {
    pub value: String,
    pub count: usize,
}

// Sorted unique non-empty values, for multiselect options
pub fn distinct_values(table: &SurveyTable, column: &str) -> Vec<String> {
    if !table.has_column(column) {
        return Vec::new();
    }
    table
        .iter()
        .map(|row| row.display(column))
        .filter(|v| !v.is_empty())
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect()
}

// Occurrences per value, most frequent first (ties by value).
pub fn value_counts(view: &SurveyTable, column: &str) -> Vec<ValueCount> {
    let mut counts: HashMap<String, usize> = HashMap::new();
    for row in view.iter() {
        let value = row.display(column);
        if !value.is_empty() {
            *counts.entry(value).or_default() += 1;
        }
    }
    let mut counts: Vec<ValueCount> = counts
        .into_iter()
        .map(|(value, count)| ValueCount { value, count })
        .collect();
    counts.sort_by(|a, b| b.count.cmp(&a.count).then_with(|| a.value.cmp(&b.value)));
    counts
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MapPoint {
    pub submission_id: String,
    pub latitude: f64,
    pub longitude: f64,
    pub label: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct GeoCenter {
    pub latitude: f64,
    pub longitude: f64,
}

// Located rows only; the label comes from e.g. the agent name column
pub fn map_points(view: &SurveyTable, label_column: &str) -> Vec<MapPoint> {
    view.iter()
        .filter_map(|row| {
            let location = row.location?;
            let label = row.display(label_column);
            Some(MapPoint {
                submission_id: row.submission_id.clone(),
                latitude: location.latitude,
                longitude: location.longitude,
                label: (!label.is_empty()).then_some(label),
            })
        })
        .collect()
}

pub fn map_center(points: &[MapPoint]) -> Option<GeoCenter> {
    if points.is_empty() {
        return None;
    }
    let n = points.len() as f64;
    Some(GeoCenter {
        latitude: points.iter().map(|p| p.latitude).sum::<f64>() / n,
        longitude: points.iter().map(|p| p.longitude).sum::<f64>() / n,
    })
}
