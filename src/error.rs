// Error types for the survey pipeline and their conversion into HTTP responses

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
};
use chrono::NaiveDate;
use thiserror::Error;

// Failures while talking to the survey API. None of these carry the token.
#[derive(Debug, Error)]
pub enum FetchError {
    #[error("invalid survey endpoint: {0}")]
    InvalidEndpoint(#[from] url::ParseError),

    #[error("failed to build HTTP client")]
    Client(#[source] reqwest::Error),

    // Network errors and timeouts, after the retry budget is spent
    #[error("request for page {page} failed after {attempts} attempts")]
    Transport {
        page: u32,
        attempts: u32,
        #[source]
        source: reqwest::Error,
    },

    // 500/502/503/504 on every attempt
    #[error("server answered {status} for page {page} after {attempts} attempts")]
    ServerUnavailable {
        page: u32,
        attempts: u32,
        status: reqwest::StatusCode,
    },

    #[error("server rejected page {page} with status {status}")]
    Status {
        page: u32,
        status: reqwest::StatusCode,
    },

    #[error("page {page} is not a valid survey response")]
    Decode {
        page: u32,
        #[source]
        source: serde_json::Error,
    },
}

impl FetchError {
    // HTTP status behind the failure, when the server answered at all
    pub fn status(&self) -> Option<reqwest::StatusCode> {
        match self {
            FetchError::ServerUnavailable { status, .. } | FetchError::Status { status, .. } => {
                Some(*status)
            }
            FetchError::Transport { source, .. } => source.status(),
            _ => None,
        }
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ValidationError {
    #[error("no API token configured (set KOBO_API_TOKEN)")]
    MissingCredential,

    #[error("API token contains characters that cannot be sent in a header")]
    MalformedCredential,

    #[error("no survey endpoint configured (set KOBO_ENDPOINT)")]
    MissingEndpoint,

    #[error("start date {start} is after end date {end}")]
    InvertedDateRange { start: NaiveDate, end: NaiveDate },
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum SchemaError {
    #[error("columns not present in the table: {}", .columns.join(", "))]
    MissingColumns { columns: Vec<String> },
}

#[derive(Debug, Error)]
pub enum ExportError {
    #[error(transparent)]
    Schema(#[from] SchemaError),

    #[error("table too large for a worksheet ({what} {index})")]
    TooLarge { what: &'static str, index: usize },

    #[error("failed to write workbook")]
    Workbook(#[from] rust_xlsxwriter::XlsxError),

    #[error("failed to write csv")]
    Csv(#[from] csv::Error),

    #[error("failed to flush csv buffer")]
    Io(#[from] std::io::Error),
}

// Everything a pipeline cycle can surface to its caller
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("could not retrieve survey data: {0}")]
    Fetch(#[from] FetchError),

    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error(transparent)]
    Schema(#[from] SchemaError),

    #[error("export failed: {0}")]
    Export(#[from] ExportError),
}

// Application error type for the HTTP surface
#[derive(Debug)]
pub enum AppError {
    Pipeline(PipelineError),
    InternalServerError(anyhow::Error),
}

impl From<anyhow::Error> for AppError {
    fn from(error: anyhow::Error) -> Self {
        AppError::InternalServerError(error)
    }
}

impl From<PipelineError> for AppError {
    fn from(error: PipelineError) -> Self {
        AppError::Pipeline(error)
    }
}

impl From<ValidationError> for AppError {
    fn from(error: ValidationError) -> Self {
        AppError::Pipeline(error.into())
    }
}

impl From<ExportError> for AppError {
    fn from(error: ExportError) -> Self {
        AppError::Pipeline(error.into())
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, error_message) = match self {
            AppError::Pipeline(PipelineError::Validation(e)) => {
                tracing::warn!("Rejected request: {}", e);
                (StatusCode::BAD_REQUEST, e.to_string())
            }
            AppError::Pipeline(PipelineError::Schema(e))
            | AppError::Pipeline(PipelineError::Export(ExportError::Schema(e))) => {
                tracing::warn!("Schema mismatch: {}", e);
                (StatusCode::UNPROCESSABLE_ENTITY, e.to_string())
            }
            AppError::Pipeline(PipelineError::Fetch(e)) => {
                tracing::error!("Survey fetch failed: {:?}", e);
                (StatusCode::BAD_GATEWAY, format!("Could not retrieve survey data: {}", e))
            }
            AppError::Pipeline(e) => {
                tracing::error!("Pipeline error: {:?}", e);
                (StatusCode::INTERNAL_SERVER_ERROR, "Internal Server Error".to_string())
            }
            AppError::InternalServerError(e) => {
                // Don't expose internal details to the client
                tracing::error!("Internal server error: {:?}", e);
                (StatusCode::INTERNAL_SERVER_ERROR, "Internal Server Error".to_string())
            }
        };

        (status, error_message).into_response()
    }
}

pub type AppResult<T> = Result<T, AppError>;
