// Authenticated retrieval of survey pages with bounded retry and backoff

use std::sync::Arc;
use std::time::Duration;

use reqwest::header::AUTHORIZATION;
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use serde_json::Value;
use tokio::time::sleep;
use url::Url;

use crate::cache::{PageCache, PageKey};
use crate::config::{Credentials, Settings};
use crate::error::FetchError;

const MAX_ATTEMPTS: u32 = 5;
const INITIAL_RETRY_DELAY_MS: u64 = 500;
const REQUEST_TIMEOUT_SECS: u64 = 10;
const USER_AGENT: &str = concat!("kobo_pipeline/", env!("CARGO_PKG_VERSION"));

// Gateway-style failures worth another attempt; every other status is final
const RETRYABLE_STATUSES: [StatusCode; 4] = [
    StatusCode::INTERNAL_SERVER_ERROR,
    StatusCode::BAD_GATEWAY,
    StatusCode::SERVICE_UNAVAILABLE,
    StatusCode::GATEWAY_TIMEOUT,
];

// One page of the survey API: `{ "results": [...], "next": ..., "count": n }`.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct RawPage {
    #[serde(default)]
    pub results: Vec<Value>,
    #[serde(default)]
    pub next: Option<String>,
    #[serde(default)]
    pub count: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub initial_backoff: Duration,
    pub request_timeout: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: MAX_ATTEMPTS,
            initial_backoff: Duration::from_millis(INITIAL_RETRY_DELAY_MS),
            request_timeout: Duration::from_secs(REQUEST_TIMEOUT_SECS),
        }
    }
}

impl RetryPolicy {
    pub fn from_settings(settings: &Settings) -> Self {
        Self {
            max_attempts: settings.max_attempts.max(1),
            initial_backoff: Duration::from_millis(settings.initial_backoff_ms),
            request_timeout: Duration::from_secs(settings.request_timeout_secs),
        }
    }

    // Delay slept after the given failed attempt (1-based): 0.5s, 1s, 2s, 4s...
    pub fn backoff_after(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(16);
        self.initial_backoff.saturating_mul(1 << exponent)
    }

    pub fn is_retryable(status: StatusCode) -> bool {
        RETRYABLE_STATUSES.contains(&status)
    }
}

// What went wrong on a single attempt that may still be retried
enum Retryable {
    Transport(reqwest::Error),
    Status(StatusCode),
}

impl Retryable {
    fn into_error(self, page: u32, attempts: u32) -> FetchError {
        match self {
            Retryable::Transport(source) => FetchError::Transport { page, attempts, source },
            Retryable::Status(status) => FetchError::ServerUnavailable { page, attempts, status },
        }
    }
}

// Stateless page fetcher; only the retry policy is shared between calls.
#[derive(Debug, Clone)]
pub struct FetchClient {
    http: Client,
    policy: RetryPolicy,
}

impl FetchClient {
    pub fn new(policy: RetryPolicy) -> Result<Self, FetchError> {
        let http = Client::builder()
            .user_agent(USER_AGENT)
            .build()
            .map_err(FetchError::Client)?;
        Ok(Self { http, policy })
    }

    pub fn with_client(http: Client, policy: RetryPolicy) -> Self {
        Self { http, policy }
    }

    // GET <endpoint>?format=json[&page=N], any existing format/page pairs replaced
    pub fn page_url(endpoint: &str, page: u32) -> Result<Url, FetchError> {
        let mut url = Url::parse(endpoint)?;
        let kept: Vec<(String, String)> = url
            .query_pairs()
            .filter(|(k, _)| k != "format" && k != "page")
            .map(|(k, v)| (k.into_owned(), v.into_owned()))
            .collect();
        {
            let mut pairs = url.query_pairs_mut();
            pairs.clear();
            for (k, v) in &kept {
                pairs.append_pair(k, v);
            }
            pairs.append_pair("format", "json");
            if page > 1 {
                pairs.append_pair("page", &page.to_string());
            }
        }
        Ok(url)
    }

    // Fetches a single page, retrying transient failures per the policy.
    pub async fn fetch(
        &self,
        endpoint: &str,
        credentials: &Credentials,
        page: u32,
    ) -> Result<RawPage, FetchError> {
        let url = Self::page_url(endpoint, page)?;
        let max_attempts = self.policy.max_attempts.max(1);
        tracing::debug!(page, url = %url, "Attempting to fetch page");

        let mut attempt = 0;
        loop {
            attempt += 1;
            tracing::debug!(page, attempt, "Fetch attempt {}/{}", attempt, max_attempts);

            let result = self
                .http
                .get(url.clone())
                .header(AUTHORIZATION, credentials.header().clone())
                .timeout(self.policy.request_timeout)
                .send()
                .await;

            let failure = match result {
                Ok(response) => {
                    let status = response.status();
                    tracing::debug!(page, attempt, status = %status, "Received response status");

                    if status.is_success() {
                        match response.bytes().await {
                            Ok(body) => {
                                let parsed = serde_json::from_slice::<RawPage>(&body)
                                    .map_err(|source| FetchError::Decode { page, source })?;
                                tracing::debug!(
                                    page,
                                    attempt,
                                    records = parsed.results.len(),
                                    has_next = parsed.next.is_some(),
                                    "Fetched page"
                                );
                                return Ok(parsed);
                            }
                            Err(e) => {
                                tracing::warn!(page, attempt, error = %e, "Failed to read response body");
                                Retryable::Transport(e)
                            }
                        }
                    } else if RetryPolicy::is_retryable(status) {
                        tracing::warn!(page, attempt, status = %status, "Server error encountered");
                        Retryable::Status(status)
                    } else {
                        tracing::warn!(page, attempt, status = %status, "Request rejected, not retrying");
                        return Err(FetchError::Status { page, status });
                    }
                }
                Err(e) => {
                    // DNS failures, refused connections and timeouts all land here
                    tracing::warn!(page, attempt, timeout = e.is_timeout(), error = %e, "Network error during request");
                    Retryable::Transport(e)
                }
            };

            if attempt >= max_attempts {
                tracing::error!(page, attempts = attempt, "Giving up on page");
                return Err(failure.into_error(page, attempt));
            }

            let delay = self.policy.backoff_after(attempt);
            tracing::debug!(page, attempt, delay_ms = delay.as_millis() as u64, "Backing off before retry");
            sleep(delay).await;
        }
    }

    // Fetches pages 1.. while the server reports a `next` page, up to `max_pages`.
    // Pages found in `cache` are reused; freshly fetched pages are stored there.
    pub async fn fetch_all(
        &self,
        endpoint: &str,
        credentials: &Credentials,
        max_pages: u32,
        cache: Option<&PageCache>,
    ) -> Result<Vec<Arc<RawPage>>, FetchError> {
        let mut pages = Vec::new();

        for page in 1..=max_pages.max(1) {
            let key = PageKey::new(endpoint, page, credentials.fingerprint());
            let raw = match cache.and_then(|c| c.get(&key)) {
                Some(hit) => {
                    tracing::debug!(page, "Page served from cache");
                    hit
                }
                None => {
                    let fetched = Arc::new(self.fetch(endpoint, credentials, page).await?);
                    if let Some(c) = cache {
                        c.insert(key, Arc::clone(&fetched));
                    }
                    fetched
                }
            };

            let more = raw.next.is_some() && !raw.results.is_empty();
            pages.push(raw);
            if !more {
                break;
            }
            if page == max_pages {
                tracing::warn!(max_pages, "Stopped paging at the configured page limit");
            }
        }

        let records: usize = pages.iter().map(|p| p.results.len()).sum();
        tracing::info!(pages = pages.len(), records, "Fetch complete");
        Ok(pages)
    }
}
