//! The upstream JSON:API client.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::future::{BoxFuture, FutureExt, Shared};
use futures::stream::Stream;
use parking_lot::Mutex;
use rand::Rng;
use reqwest::StatusCode;
use serde::Deserialize;
use tokio::time::Instant;
use tracing::{debug, warn};
use url::Url;

use pulse_core::traits::UpstreamApi;
use pulse_core::{ApiDocument, ApiParams, Error, FieldError, Result};

use crate::rate_limit::{RateLimitConfig, RateLimitManager};

/// How the upstream credential is presented. Both forms exist in the
/// wild for this platform, so it is configurable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum AuthScheme {
    /// `Authorization: Klaviyo-API-Key <key>`
    PrivateKey,
    /// `Authorization: Bearer <key>`
    Bearer,
}

impl Default for AuthScheme {
    fn default() -> Self {
        AuthScheme::PrivateKey
    }
}

#[derive(Debug, Clone)]
pub struct UpstreamConfig {
    pub base_url: String,
    pub api_key: String,
    /// Value of the `revision` header sent with every request
    pub api_revision: String,
    pub auth_scheme: AuthScheme,
    pub max_attempts: u32,
    pub backoff_base: Duration,
    pub backoff_factor: f64,
    /// Fractional jitter applied to each backoff delay (0.2 = ±20 %)
    pub backoff_jitter: f64,
    /// Per-attempt timeout
    pub request_timeout: Duration,
    /// Deadline across all attempts of one logical request
    pub total_deadline: Duration,
    pub rate_limit: RateLimitConfig,
}

impl UpstreamConfig {
    pub fn new(base_url: impl Into<String>, api_key: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            api_key: api_key.into(),
            api_revision: "2024-10-15".to_string(),
            auth_scheme: AuthScheme::default(),
            max_attempts: 5,
            backoff_base: Duration::from_secs(2),
            backoff_factor: 3.0,
            backoff_jitter: 0.2,
            request_timeout: Duration::from_secs(30),
            total_deadline: Duration::from_secs(120),
            rate_limit: RateLimitConfig::default(),
        }
    }
}

type SharedRequest = Shared<BoxFuture<'static, Result<ApiDocument>>>;

/// Authenticated, rate-limited client. Cheap to clone; clones share the
/// rate limiter and the in-flight request map.
#[derive(Clone)]
pub struct UpstreamClient {
    http: reqwest::Client,
    config: Arc<UpstreamConfig>,
    base_url: Url,
    limiter: Arc<RateLimitManager>,
    inflight: Arc<Mutex<HashMap<String, SharedRequest>>>,
}

impl UpstreamClient {
    pub fn new(config: UpstreamConfig) -> Result<Self> {
        if config.api_key.is_empty() {
            return Err(Error::Config("upstream API key is required".to_string()));
        }
        let base_url = Url::parse(&config.base_url)?;

        let http = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .build()
            .map_err(|e| Error::Config(format!("failed to build HTTP client: {}", e)))?;

        let limiter = Arc::new(RateLimitManager::new(config.rate_limit.clone()));

        Ok(Self {
            http,
            config: Arc::new(config),
            base_url,
            limiter,
            inflight: Arc::new(Mutex::new(HashMap::new())),
        })
    }

    pub fn rate_limiter(&self) -> Arc<RateLimitManager> {
        Arc::clone(&self.limiter)
    }

    /// GET a single page. Identical concurrent requests (same
    /// canonicalized URL) share one in-flight result.
    pub async fn get(&self, path: &str, params: &ApiParams) -> Result<ApiDocument> {
        let key = params.canonical_key(path);

        let shared = {
            let mut inflight = self.inflight.lock();
            if let Some(existing) = inflight.get(&key) {
                debug!(key = %key, "joining in-flight request");
                existing.clone()
            } else {
                let this = self.clone();
                let path = path.to_string();
                let params = params.clone();
                let cleanup_key = key.clone();
                let fut = async move {
                    let result = this.execute_with_retry(&path, &params).await;
                    this.inflight.lock().remove(&cleanup_key);
                    result
                }
                .boxed()
                .shared();
                inflight.insert(key, fut.clone());
                fut
            }
        };

        shared.await
    }

    /// Follow `links.next` cursors until the collection is exhausted.
    /// The stream is lazy: dropping it cancels the walk, and a caller
    /// can restart from any cursor by setting `params.page_cursor`.
    pub fn get_paginated(
        &self,
        path: &str,
        params: &ApiParams,
    ) -> impl Stream<Item = Result<ApiDocument>> + Send + 'static {
        struct PageState {
            cursor: Option<String>,
            done: bool,
        }

        let client = self.clone();
        let path = path.to_string();
        let params = params.clone();
        let initial = PageState {
            cursor: params.page_cursor.clone(),
            done: false,
        };

        futures::stream::try_unfold(initial, move |state| {
            let client = client.clone();
            let path = path.clone();
            let params = params.clone();
            async move {
                if state.done {
                    return Ok(None);
                }
                let page_params = params.with_cursor(state.cursor);
                let doc = client.get(&path, &page_params).await?;
                let next = doc.next_cursor();
                let done = next.is_none() || doc.is_empty();
                Ok(Some((doc, PageState { cursor: next, done })))
            }
        })
    }

    async fn execute_with_retry(&self, path: &str, params: &ApiParams) -> Result<ApiDocument> {
        let url = self.build_url(path, params)?;
        let started = Instant::now();
        let mut attempt = 0;

        loop {
            attempt += 1;

            let permit = self.limiter.acquire(path).await?;
            let outcome = tokio::time::timeout(self.config.request_timeout, self.dispatch(&url)).await;
            drop(permit);

            let error = match outcome {
                Ok(Ok(doc)) => {
                    self.limiter.note_success(path);
                    return Ok(doc);
                }
                Ok(Err(e)) => e,
                Err(_) => Error::Timeout(format!("request to {} exceeded attempt timeout", path)),
            };

            if let Error::RateLimited { retry_after, .. } = &error {
                self.limiter.note_rate_limited(path, *retry_after);
            }

            if !error.is_retryable() || attempt >= self.config.max_attempts {
                return Err(error);
            }

            let delay = error
                .retry_after()
                .unwrap_or_else(|| self.backoff_delay(attempt));

            if started.elapsed() + delay > self.config.total_deadline {
                return Err(Error::Timeout(format!(
                    "request to {} exceeded total deadline after {} attempts",
                    path, attempt
                )));
            }

            warn!(
                path = path,
                attempt = attempt,
                max_attempts = self.config.max_attempts,
                delay_ms = delay.as_millis() as u64,
                error = %error,
                "retrying upstream request"
            );
            tokio::time::sleep(delay).await;
        }
    }

    async fn dispatch(&self, url: &Url) -> Result<ApiDocument> {
        let request = self
            .http
            .get(url.clone())
            .header("revision", &self.config.api_revision)
            .header("Authorization", self.auth_header());

        let response = request.send().await.map_err(map_transport_error)?;
        let status = response.status();

        if status.is_success() {
            return response
                .json::<ApiDocument>()
                .await
                .map_err(|e| Error::Serialization(format!("invalid JSON:API document: {}", e)));
        }

        Err(self.error_from_response(status, response).await)
    }

    async fn error_from_response(&self, status: StatusCode, response: reqwest::Response) -> Error {
        let retry_after = response
            .headers()
            .get(reqwest::header::RETRY_AFTER)
            .and_then(|v| v.to_str().ok())
            .and_then(|s| s.parse::<u64>().ok())
            .map(Duration::from_secs);

        let body = response.text().await.unwrap_or_default();

        match status {
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
                Error::Authentication(format!("upstream rejected credential ({})", status))
            }
            StatusCode::NOT_FOUND => Error::NotFound(body_detail(&body, "resource not found")),
            StatusCode::UNPROCESSABLE_ENTITY => Error::Validation {
                message: body_detail(&body, "upstream rejected request parameters"),
                fields: field_errors(&body),
            },
            StatusCode::TOO_MANY_REQUESTS => Error::RateLimited {
                message: body_detail(&body, "rate limit exceeded"),
                retry_after,
            },
            s if s.is_server_error() => {
                Error::Server(format!("{}: {}", s, body_detail(&body, "server error")))
            }
            s => Error::Server(format!("unexpected status {}: {}", s, body)),
        }
    }

    fn auth_header(&self) -> String {
        match self.config.auth_scheme {
            AuthScheme::PrivateKey => format!("Klaviyo-API-Key {}", self.config.api_key),
            AuthScheme::Bearer => format!("Bearer {}", self.config.api_key),
        }
    }

    fn build_url(&self, path: &str, params: &ApiParams) -> Result<Url> {
        let mut url = self.base_url.join(path)?;
        let pairs = params.to_query_pairs();
        if !pairs.is_empty() {
            let mut qp = url.query_pairs_mut();
            for (k, v) in &pairs {
                qp.append_pair(k, v);
            }
        }
        Ok(url)
    }

    fn backoff_delay(&self, attempt: u32) -> Duration {
        let exp = self.config.backoff_base.as_secs_f64()
            * self.config.backoff_factor.powi(attempt.saturating_sub(1) as i32);
        let jitter = 1.0 + self.config.backoff_jitter * rand::thread_rng().gen_range(-1.0..1.0);
        Duration::from_secs_f64((exp * jitter).max(0.0))
    }
}

#[async_trait]
impl UpstreamApi for UpstreamClient {
    async fn get(&self, path: &str, params: &ApiParams) -> Result<ApiDocument> {
        UpstreamClient::get(self, path, params).await
    }
}

fn map_transport_error(e: reqwest::Error) -> Error {
    if e.is_timeout() {
        Error::Timeout(e.to_string())
    } else {
        Error::Network(e.to_string())
    }
}

#[derive(Deserialize)]
struct ApiErrorBody {
    #[serde(default)]
    errors: Vec<ApiErrorObject>,
}

#[derive(Deserialize)]
struct ApiErrorObject {
    #[serde(default)]
    title: Option<String>,
    #[serde(default)]
    detail: Option<String>,
    #[serde(default)]
    source: Option<ApiErrorSource>,
}

#[derive(Deserialize)]
struct ApiErrorSource {
    #[serde(default)]
    pointer: Option<String>,
}

fn body_detail(body: &str, fallback: &str) -> String {
    serde_json::from_str::<ApiErrorBody>(body)
        .ok()
        .and_then(|b| {
            b.errors
                .into_iter()
                .next()
                .and_then(|e| e.detail.or(e.title))
        })
        .unwrap_or_else(|| fallback.to_string())
}

fn field_errors(body: &str) -> Vec<FieldError> {
    serde_json::from_str::<ApiErrorBody>(body)
        .map(|b| {
            b.errors
                .into_iter()
                .filter_map(|e| {
                    let path = e.source.and_then(|s| s.pointer)?;
                    Some(FieldError {
                        path,
                        message: e.detail.or(e.title).unwrap_or_default(),
                    })
                })
                .collect()
        })
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn auth_header_formats() {
        let mut config = UpstreamConfig::new("https://a.example", "pk_test");
        let client = UpstreamClient::new(config.clone()).unwrap();
        assert_eq!(client.auth_header(), "Klaviyo-API-Key pk_test");

        config.auth_scheme = AuthScheme::Bearer;
        let client = UpstreamClient::new(config).unwrap();
        assert_eq!(client.auth_header(), "Bearer pk_test");
    }

    #[test]
    fn empty_api_key_is_rejected() {
        let config = UpstreamConfig::new("https://a.example", "");
        assert!(matches!(UpstreamClient::new(config), Err(Error::Config(_))));
    }

    #[test]
    fn url_includes_encoded_params() {
        let config = UpstreamConfig::new("https://a.example", "k");
        let client = UpstreamClient::new(config).unwrap();
        let params = ApiParams::new()
            .filter(pulse_core::Filter::equals("status", "sent"))
            .page_size(25);
        let url = client.build_url("/api/campaigns", &params).unwrap();
        assert!(url.as_str().starts_with("https://a.example/api/campaigns?"));
        assert!(url.query().unwrap().contains("page%5Bsize%5D=25"));
    }

    #[test]
    fn field_errors_from_jsonapi_body() {
        let body = r#"{"errors":[{"detail":"must be a datetime","source":{"pointer":"/filter/updated"}}]}"#;
        let errs = field_errors(body);
        assert_eq!(errs.len(), 1);
        assert_eq!(errs[0].path, "/filter/updated");
        assert_eq!(errs[0].message, "must be a datetime");
        assert_eq!(body_detail(body, "x"), "must be a datetime");
    }
}
