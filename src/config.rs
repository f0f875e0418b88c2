// Settings for the pipeline and the server, plus the validated API credential
// Loaded with the 'config' crate on top of an optional .env file

use std::fmt;

use config::{Config, ConfigBuilder, Environment, File, builder::DefaultState};
use reqwest::header::HeaderValue;
use serde::Deserialize;
use sha2::{Digest, Sha256};

use crate::error::ValidationError;

pub const DEFAULT_TIME_COLUMN: &str = "_submission_time";
pub const DEFAULT_LOCATION_COLUMN: &str = "GPS";
pub const DEFAULT_VALUE_COLUMN: &str = "Sondage_Transformed";
pub const DEFAULT_AGENT_COLUMN: &str = "Name_Agent";

#[derive(Clone, Deserialize)]
pub struct Settings {
    // Left blank when unset so validate() can name it
    #[serde(default)]
    pub endpoint: String,
    pub api_token: Option<String>,
    pub server_address: String,
    pub request_timeout_secs: u64,
    pub max_attempts: u32,
    pub initial_backoff_ms: u64,
    pub cache_ttl_secs: u64,
    pub max_pages: u32,
    #[serde(default)]
    pub fields: FieldSettings,
}

// Column names are configuration: survey forms evolve between deployments
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct FieldSettings {
    pub submission_time: String,
    pub location: String,
    pub value: String,
    pub agent: String,
    // Columns coerced to numbers at normalization time (prices, quantities)
    pub numeric: Vec<String>,
}

impl Default for FieldSettings {
    fn default() -> Self {
        Self {
            submission_time: DEFAULT_TIME_COLUMN.to_string(),
            location: DEFAULT_LOCATION_COLUMN.to_string(),
            value: DEFAULT_VALUE_COLUMN.to_string(),
            agent: DEFAULT_AGENT_COLUMN.to_string(),
            numeric: Vec::new(),
        }
    }
}

impl Settings {
    pub fn new() -> anyhow::Result<Self> {
        dotenv::dotenv().ok(); // Load .env file if present

        let builder = Self::defaults()?
            // Load from a configuration file (e.g., config.toml)
            .add_source(File::with_name("config").required(false))
            // Load from environment variables (e.g., KOBO_API_TOKEN, KOBO_FIELDS__VALUE)
            .add_source(
                Environment::with_prefix("KOBO")
                    .prefix_separator("_")
                    .separator("__"),
            );

        let settings = builder.build()?.try_deserialize()?;
        Ok(settings)
    }

    // Builder preloaded with every default; the endpoint stays blank until configured
    pub fn defaults() -> Result<ConfigBuilder<DefaultState>, config::ConfigError> {
        Config::builder()
            .set_default("server_address", "127.0.0.1:3000")?
            .set_default("request_timeout_secs", 10)?
            .set_default("max_attempts", 5)?
            .set_default("initial_backoff_ms", 500)?
            .set_default("cache_ttl_secs", 300)?
            .set_default("max_pages", 50)
    }

    // Settings with defaults for the given endpoint, without touching files or env
    pub fn for_endpoint(endpoint: impl Into<String>, api_token: Option<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            api_token,
            server_address: "127.0.0.1:3000".to_string(),
            request_timeout_secs: 10,
            max_attempts: 5,
            initial_backoff_ms: 500,
            cache_ttl_secs: 300,
            max_pages: 50,
            fields: FieldSettings::default(),
        }
    }

    pub fn credentials(&self) -> Result<Credentials, ValidationError> {
        Credentials::new(self.api_token.as_deref().unwrap_or_default())
    }

    pub fn validate(&self) -> Result<Credentials, ValidationError> {
        if self.endpoint.trim().is_empty() {
            return Err(ValidationError::MissingEndpoint);
        }
        self.credentials()
    }
}

// Hand-written so the token never reaches a log line
impl fmt::Debug for Settings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Settings")
            .field("endpoint", &self.endpoint)
            .field("api_token", &self.api_token.as_ref().map(|_| "<redacted>"))
            .field("server_address", &self.server_address)
            .field("request_timeout_secs", &self.request_timeout_secs)
            .field("max_attempts", &self.max_attempts)
            .field("initial_backoff_ms", &self.initial_backoff_ms)
            .field("cache_ttl_secs", &self.cache_ttl_secs)
            .field("max_pages", &self.max_pages)
            .field("fields", &self.fields)
            .finish()
    }
}

// Opaque API token, kept only as a ready-made `Authorization` header.
// The fingerprint is a short SHA-256 prefix used to key cached pages per
// credential without holding the token itself.
#[derive(Clone)]
pub struct Credentials {
    header: HeaderValue,
    fingerprint: String,
}

impl Credentials {
    pub fn new(token: &str) -> Result<Self, ValidationError> {
        let token = token.trim();
        if token.is_empty() {
            return Err(ValidationError::MissingCredential);
        }
        if !token.chars().all(|c| c.is_ascii_graphic()) {
            return Err(ValidationError::MalformedCredential);
        }

        let mut header = HeaderValue::from_str(&format!("Token {}", token))
            .map_err(|_| ValidationError::MalformedCredential)?;
        header.set_sensitive(true);

        let digest = Sha256::digest(token.as_bytes());
        let fingerprint = digest[..8].iter().map(|b| format!("{:02x}", b)).collect();

        Ok(Self { header, fingerprint })
    }

    pub fn header(&self) -> &HeaderValue {
        &self.header
    }

    pub fn fingerprint(&self) -> &str {
        &self.fingerprint
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("fingerprint", &self.fingerprint)
            .finish_non_exhaustive()
    }
}
