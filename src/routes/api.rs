// Handlers exposing the pipeline to a presentation layer

use std::collections::BTreeMap;

use axum::{
    extract::{Json as JsonExtract, Path, Query, State},
    http::header::{CONTENT_DISPOSITION, CONTENT_TYPE},
    response::{IntoResponse, Json},
};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::{
    AppState,
    aggregate::{self, GeoCenter, MapPoint, Metrics, ValueCount},
    error::AppResult,
    export::{self, CSV_MIME, XLSX_MIME},
    filter::{DateRange, FilterSpec, filter},
    models::CellValue,
};

// --- Response Wrappers ---

#[derive(Serialize)]
struct RefreshResponse {
    rows: usize,
    columns: usize,
    dropped_records: usize,
    coercions: BTreeMap<String, usize>,
}

#[derive(Serialize)]
struct ViewResponse {
    columns: Vec<String>,
    derived_columns: Vec<String>,
    rows: Vec<BTreeMap<String, CellValue>>,
    metrics: Metrics,
    warning: Option<String>,
}

#[derive(Serialize)]
struct OptionsResponse {
    column: String,
    values: Vec<String>,
    warning: Option<String>,
}

#[derive(Serialize)]
struct CountsResponse {
    column: String,
    counts: Vec<ValueCount>,
    warning: Option<String>,
}

#[derive(Serialize)]
struct MapResponse {
    points: Vec<MapPoint>,
    center: Option<GeoCenter>,
    warning: Option<String>,
}

// --- Request Structs ---

#[derive(Deserialize, Debug)]
pub struct ViewRequest {
    #[serde(default)]
    filter: FilterSpec,
    value_column: Option<String>,
}

// Options follow the selected dates; without both bounds the whole table is used
#[derive(Deserialize, Debug, Default)]
pub struct OptionsQuery {
    start: Option<NaiveDate>,
    end: Option<NaiveDate>,
}

impl OptionsQuery {
    fn filter_spec(&self) -> FilterSpec {
        match (self.start, self.end) {
            (Some(start), Some(end)) => FilterSpec::new().with_dates(DateRange { start, end }),
            _ => FilterSpec::new(),
        }
    }
}

#[derive(Deserialize, Debug, Default, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ExportFormat {
    #[default]
    Xlsx,
    Csv,
}

#[derive(Deserialize, Debug)]
pub struct ExportRequest {
    #[serde(default)]
    filter: FilterSpec,
    // Defaults to every column of the table
    columns: Option<Vec<String>>,
    #[serde(default)]
    format: ExportFormat,
    file_name: Option<String>,
}

// --- API Handlers ---

pub async fn refresh(State(app_state): State<AppState>) -> AppResult<impl IntoResponse> {
    tracing::info!("[HANDLER] /api/refresh - Request received.");
    let loaded = app_state.pipeline.load(true).await?;
    Ok(Json(RefreshResponse {
        rows: loaded.table.len(),
        columns: loaded.table.columns().len(),
        dropped_records: loaded.report.dropped_records,
        coercions: loaded.report.coercions_by_column(),
    }))
}

pub async fn view(
    State(app_state): State<AppState>,
    JsonExtract(request): JsonExtract<ViewRequest>,
) -> AppResult<impl IntoResponse> {
    tracing::debug!("[HANDLER] /api/view - {:?}", request);
    let snapshot = app_state.pipeline.snapshot().await;
    let view = filter(&snapshot.table, &request.filter)?;

    let value_column = request
        .value_column
        .unwrap_or_else(|| app_state.settings.fields.value.clone());
    let metrics = aggregate::summarize(&view, &value_column);

    Ok(Json(ViewResponse {
        columns: view.columns().to_vec(),
        derived_columns: view.derived_columns().map(String::from).collect(),
        rows: view.iter().map(|r| r.cells.clone()).collect(),
        metrics,
        warning: snapshot.warning,
    }))
}

pub async fn options(
    State(app_state): State<AppState>,
    Path(column): Path<String>,
    Query(query): Query<OptionsQuery>,
) -> AppResult<impl IntoResponse> {
    let snapshot = app_state.pipeline.snapshot().await;
    let view = filter(&snapshot.table, &query.filter_spec())?;
    let values = aggregate::distinct_values(&view, &column);
    Ok(Json(OptionsResponse {
        column,
        values,
        warning: snapshot.warning,
    }))
}

pub async fn counts(
    State(app_state): State<AppState>,
    Path(column): Path<String>,
    JsonExtract(spec): JsonExtract<FilterSpec>,
) -> AppResult<impl IntoResponse> {
    let snapshot = app_state.pipeline.snapshot().await;
    let view = filter(&snapshot.table, &spec)?;
    Ok(Json(CountsResponse {
        counts: aggregate::value_counts(&view, &column),
        column,
        warning: snapshot.warning,
    }))
}

pub async fn map(
    State(app_state): State<AppState>,
    JsonExtract(spec): JsonExtract<FilterSpec>,
) -> AppResult<impl IntoResponse> {
    let snapshot = app_state.pipeline.snapshot().await;
    let view = filter(&snapshot.table, &spec)?;
    let points = aggregate::map_points(&view, &app_state.settings.fields.agent);
    if points.is_empty() {
        tracing::debug!("[HANDLER] /api/map - No located submissions in view");
    }
    Ok(Json(MapResponse {
        center: aggregate::map_center(&points),
        points,
        warning: snapshot.warning,
    }))
}

pub async fn export(
    State(app_state): State<AppState>,
    JsonExtract(request): JsonExtract<ExportRequest>,
) -> AppResult<impl IntoResponse> {
    tracing::info!(format = ?request.format, "[HANDLER] /api/export - Request received.");
    let snapshot = app_state.pipeline.snapshot().await;
    if let Some(warning) = &snapshot.warning {
        tracing::warn!("Exporting from a stale or empty table: {}", warning);
    }
    let view = filter(&snapshot.table, &request.filter)?;
    let columns = request
        .columns
        .unwrap_or_else(|| view.columns().to_vec());

    let (bytes, mime, extension) = match request.format {
        ExportFormat::Xlsx => (export::export(&view, &columns)?, XLSX_MIME, "xlsx"),
        ExportFormat::Csv => (export::export_csv(&view, &columns)?, CSV_MIME, "csv"),
    };
    let file_name = attachment_name(request.file_name.as_deref(), extension);

    Ok((
        [
            (CONTENT_TYPE, mime.to_string()),
            (CONTENT_DISPOSITION, format!("attachment; filename=\"{}\"", file_name)),
        ],
        bytes,
    ))
}

// Caller-chosen name, restricted to characters safe inside a header
fn attachment_name(requested: Option<&str>, extension: &str) -> String {
    let cleaned: String = requested
        .unwrap_or("filtered_data")
        .chars()
        .filter(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.' | ' '))
        .collect();
    let stem = cleaned.trim();
    let stem = if stem.is_empty() { "filtered_data" } else { stem };
    let suffix = format!(".{}", extension);
    if stem.ends_with(&suffix) {
        stem.to_string()
    } else {
        format!("{}{}", stem, suffix)
    }
}
