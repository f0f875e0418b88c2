// One fetch -> normalize cycle at a time, keeping the last good table around

use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde_json::Value;

use crate::cache::PageCache;
use crate::config::Settings;
use crate::error::PipelineError;
use crate::fetch::{FetchClient, RetryPolicy};
use crate::models::SurveyTable;
use crate::normalize::{NormalizeReport, normalize};

#[derive(Debug)]
pub struct LoadedTable {
    pub table: SurveyTable,
    pub report: NormalizeReport,
    pub loaded_at: DateTime<Utc>,
}

// What the presentation layer gets on every interaction: always a table,
// plus a user-facing message when the latest load did not succeed.
#[derive(Debug, Clone)]
pub struct Snapshot {
    pub table: SurveyTable,
    pub warning: Option<String>,
}

pub struct SurveyPipeline {
    settings: Arc<Settings>,
    client: FetchClient,
    cache: PageCache,
    current: RwLock<Option<Arc<LoadedTable>>>,
}

impl SurveyPipeline {
    pub fn new(settings: Arc<Settings>) -> Result<Self, PipelineError> {
        let client = FetchClient::new(RetryPolicy::from_settings(&settings))?;
        Ok(Self::with_client(settings, client))
    }

    pub fn with_client(settings: Arc<Settings>, client: FetchClient) -> Self {
        let cache = PageCache::new(Duration::from_secs(settings.cache_ttl_secs));
        Self {
            settings,
            client,
            cache,
            current: RwLock::new(None),
        }
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn current(&self) -> Option<Arc<LoadedTable>> {
        self.current
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    // Runs a full fetch and normalization cycle.
    // `refresh` drops cached pages first. On failure the previously loaded
    // table stays current and the error is returned to the caller.
    pub async fn load(&self, refresh: bool) -> Result<Arc<LoadedTable>, PipelineError> {
        let credentials = self.settings.validate()?;
        if refresh {
            self.cache.invalidate_all();
        }

        tracing::info!(endpoint = %self.settings.endpoint, refresh, "Loading survey submissions");
        let pages = match self
            .client
            .fetch_all(
                &self.settings.endpoint,
                &credentials,
                self.settings.max_pages,
                Some(&self.cache),
            )
            .await
        {
            Ok(pages) => pages,
            Err(e) => {
                tracing::error!(error = %e, kept_previous = self.current().is_some(), "Survey load failed");
                return Err(e.into());
            }
        };

        let records: Vec<Value> = pages
            .iter()
            .flat_map(|p| p.results.iter().cloned())
            .collect();
        let (table, report) = normalize(&records, &self.settings.fields);

        let loaded = Arc::new(LoadedTable {
            table,
            report,
            loaded_at: Utc::now(),
        });
        *self.current.write().unwrap_or_else(PoisonError::into_inner) = Some(Arc::clone(&loaded));
        Ok(loaded)
    }

    // Current table while younger than the cache TTL, otherwise a new load
    pub async fn ensure_loaded(&self) -> Result<Arc<LoadedTable>, PipelineError> {
        if let Some(loaded) = self.current() {
            let age = Utc::now().signed_duration_since(loaded.loaded_at);
            if age.num_seconds() < self.settings.cache_ttl_secs as i64 {
                return Ok(loaded);
            }
            tracing::debug!(age_secs = age.num_seconds(), "Cached table expired");
        }
        self.load(false).await
    }

    // Never fails: degrades to the previous table, or an empty one.
    pub async fn snapshot(&self) -> Snapshot {
        match self.ensure_loaded().await {
            Ok(loaded) => Snapshot {
                table: loaded.table.clone(),
                warning: None,
            },
            Err(e) => Snapshot {
                table: self
                    .current()
                    .map(|l| l.table.clone())
                    .unwrap_or_else(SurveyTable::empty),
                warning: Some(e.to_string()),
            },
        }
    }
}
