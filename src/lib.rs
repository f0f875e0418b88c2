// Survey record pipeline: fetch paginated survey submissions, normalize them
// into a flat table, then filter, summarize and export that table.
// SurveyPipeline ties the pure steps to the fetch client and the page cache;
// routes serves them over HTTP.

use std::sync::Arc;

use axum::extract::FromRef;

pub mod aggregate;
pub mod cache;
pub mod config;
pub mod error;
pub mod export;
pub mod fetch;
pub mod filter;
pub mod models;
pub mod normalize;
pub mod pipeline;
pub mod routes;

pub use config::{Credentials, FieldSettings, Settings};
pub use error::{ExportError, FetchError, PipelineError, SchemaError, ValidationError};
pub use fetch::{FetchClient, RawPage, RetryPolicy};
pub use filter::{DateRange, FilterSpec};
pub use models::{CellValue, Location, SurveyRecord, SurveyTable};
pub use pipeline::SurveyPipeline;

// Shared state handed to every handler
#[derive(Clone, FromRef)]
pub struct AppState {
    pub settings: Arc<Settings>,
    pub pipeline: Arc<SurveyPipeline>,
}
