//! Configuration, loaded from `PULSE__`-prefixed environment
//! variables with sane defaults for everything except the upstream
//! credential.

use serde::{Deserialize, Serialize};

use pulse_storage::DatabaseConfig;
use pulse_sync::ScheduleConfig;
use pulse_upstream::client::AuthScheme;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub server: ServerSettings,

    #[serde(default)]
    pub upstream: UpstreamSettings,

    #[serde(default)]
    pub database: DatabaseConfig,

    #[serde(default)]
    pub cache: CacheSettings,

    #[serde(default)]
    pub sync: SyncSettings,

    #[serde(default)]
    pub retention: RetentionSettings,

    #[serde(default)]
    pub log: LogSettings,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerSettings {
    #[serde(default = "default_host")]
    pub host: String,

    #[serde(default = "default_port")]
    pub port: u16,

    /// Graceful shutdown drain budget (seconds)
    #[serde(default = "default_shutdown_timeout")]
    pub shutdown_timeout_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpstreamSettings {
    /// Opaque upstream credential; the only required setting
    #[serde(default)]
    pub api_key: String,

    #[serde(default = "default_base_url")]
    pub base_url: String,

    #[serde(default = "default_api_revision")]
    pub api_revision: String,

    #[serde(default)]
    pub auth_scheme: AuthScheme,

    #[serde(default = "default_max_concurrent")]
    pub max_concurrent_requests: usize,

    #[serde(default = "default_min_request_interval")]
    pub min_request_interval_ms: u64,

    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,

    #[serde(default = "default_total_deadline")]
    pub total_deadline_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheSettings {
    #[serde(default = "default_overview_ttl")]
    pub overview_ttl_secs: u64,

    #[serde(default = "default_entities_ttl")]
    pub entities_ttl_secs: u64,

    #[serde(default = "default_analytics_ttl")]
    pub analytics_ttl_secs: u64,

    #[serde(default = "default_cache_capacity")]
    pub max_capacity: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncSettings {
    #[serde(default = "default_page_size")]
    pub page_size: u32,

    #[serde(default = "default_job_deadline")]
    pub job_deadline_secs: u64,

    #[serde(default = "default_max_parallel_types")]
    pub max_parallel_types: usize,

    /// Back the in-process lease with a Postgres advisory lock for
    /// multi-instance deployments
    #[serde(default)]
    pub use_advisory_locks: bool,

    #[serde(default)]
    pub schedules: ScheduleConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetentionSettings {
    /// Event rows older than this are pruned
    #[serde(default = "default_event_retention")]
    pub events_days: i64,

    /// Raw payload audit rows older than this are pruned
    #[serde(default = "default_raw_retention")]
    pub raw_days: i64,

    /// How often bucket summaries are recomputed
    #[serde(default = "default_aggregation_refresh")]
    pub aggregation_refresh_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogSettings {
    #[serde(default = "default_log_level")]
    pub level: String,

    /// `json` or `text`
    #[serde(default = "default_log_format")]
    pub format: String,
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    3001
}

fn default_shutdown_timeout() -> u64 {
    30
}

fn default_base_url() -> String {
    "https://a.klaviyo.com".to_string()
}

fn default_api_revision() -> String {
    "2024-10-15".to_string()
}

fn default_max_concurrent() -> usize {
    3
}

fn default_min_request_interval() -> u64 {
    1000
}

fn default_request_timeout() -> u64 {
    30
}

fn default_total_deadline() -> u64 {
    120
}

fn default_overview_ttl() -> u64 {
    300
}

fn default_entities_ttl() -> u64 {
    600
}

fn default_analytics_ttl() -> u64 {
    60
}

fn default_cache_capacity() -> u64 {
    10_000
}

fn default_page_size() -> u32 {
    50
}

fn default_job_deadline() -> u64 {
    600
}

fn default_max_parallel_types() -> usize {
    4
}

fn default_event_retention() -> i64 {
    730
}

fn default_raw_retention() -> i64 {
    30
}

fn default_aggregation_refresh() -> u64 {
    600
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "text".to_string()
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            shutdown_timeout_secs: default_shutdown_timeout(),
        }
    }
}

impl Default for UpstreamSettings {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            base_url: default_base_url(),
            api_revision: default_api_revision(),
            auth_scheme: AuthScheme::default(),
            max_concurrent_requests: default_max_concurrent(),
            min_request_interval_ms: default_min_request_interval(),
            request_timeout_secs: default_request_timeout(),
            total_deadline_secs: default_total_deadline(),
        }
    }
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self {
            overview_ttl_secs: default_overview_ttl(),
            entities_ttl_secs: default_entities_ttl(),
            analytics_ttl_secs: default_analytics_ttl(),
            max_capacity: default_cache_capacity(),
        }
    }
}

impl Default for SyncSettings {
    fn default() -> Self {
        Self {
            page_size: default_page_size(),
            job_deadline_secs: default_job_deadline(),
            max_parallel_types: default_max_parallel_types(),
            use_advisory_locks: false,
            schedules: ScheduleConfig::default(),
        }
    }
}

impl Default for RetentionSettings {
    fn default() -> Self {
        Self {
            events_days: default_event_retention(),
            raw_days: default_raw_retention(),
            aggregation_refresh_secs: default_aggregation_refresh(),
        }
    }
}

impl Default for LogSettings {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}

impl AppConfig {
    /// Load from environment variables: `PULSE__UPSTREAM__API_KEY`,
    /// `PULSE__DATABASE__URL`, and so on.
    pub fn from_env() -> Result<Self, config::ConfigError> {
        let builder = config::Config::builder().add_source(
            config::Environment::with_prefix("PULSE")
                .separator("__")
                .try_parsing(true),
        );
        builder.build()?.try_deserialize()
    }

    /// Startup validation; any entry here means exit code 1.
    pub fn validate(&self) -> Result<(), Vec<String>> {
        let mut errors = Vec::new();

        if self.upstream.api_key.is_empty() {
            errors.push("upstream API key is required (PULSE__UPSTREAM__API_KEY)".to_string());
        }
        if self.database.url.is_empty() {
            errors.push("database URL is required".to_string());
        }
        if self.database.min_connections > self.database.max_connections {
            errors.push("database min_connections cannot exceed max_connections".to_string());
        }
        if self.upstream.max_concurrent_requests == 0 {
            errors.push("upstream max_concurrent_requests must be at least 1".to_string());
        }
        if self.sync.page_size == 0 {
            errors.push("sync page_size must be at least 1".to_string());
        }
        if !matches!(self.log.format.as_str(), "json" | "text") {
            errors.push(format!("unknown log format {:?}", self.log.format));
        }
        if let Err(schedule_errors) = self.sync.schedules.validate() {
            errors.extend(schedule_errors);
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }

    /// Log the effective configuration, with the credential redacted.
    pub fn print_summary(&self) {
        tracing::info!("===========================================");
        tracing::info!("Pulse configuration");
        tracing::info!("===========================================");
        tracing::info!("Server: {}:{}", self.server.host, self.server.port);
        tracing::info!("Upstream: {} (revision {})", self.upstream.base_url, self.upstream.api_revision);
        tracing::info!("  credential: {}", if self.upstream.api_key.is_empty() { "MISSING" } else { "[redacted]" });
        tracing::info!(
            "  rate limit: {} concurrent, {}ms spacing",
            self.upstream.max_concurrent_requests,
            self.upstream.min_request_interval_ms
        );
        tracing::info!(
            "Database pool: {}-{} connections, statement timeout {}ms",
            self.database.min_connections,
            self.database.max_connections,
            self.database.statement_timeout_ms
        );
        tracing::info!(
            "Cache TTLs: overview {}s, entities {}s, analytics {}s",
            self.cache.overview_ttl_secs,
            self.cache.entities_ttl_secs,
            self.cache.analytics_ttl_secs
        );
        tracing::info!(
            "Sync: pages of {}, deadline {}s, fan-out {}",
            self.sync.page_size,
            self.sync.job_deadline_secs,
            self.sync.max_parallel_types
        );
        tracing::info!(
            "Retention: events {}d, raw payloads {}d",
            self.retention.events_days,
            self.retention.raw_days
        );
        tracing::info!("===========================================");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn with_key() -> AppConfig {
        AppConfig {
            upstream: UpstreamSettings {
                api_key: "pk_test".to_string(),
                ..Default::default()
            },
            ..Default::default()
        }
    }

    #[test]
    fn default_config_without_key_fails_validation() {
        let errors = AppConfig::default().validate().unwrap_err();
        assert!(errors.iter().any(|e| e.contains("API key")));
    }

    #[test]
    fn config_with_key_validates() {
        assert!(with_key().validate().is_ok());
    }

    #[test]
    fn bad_pool_sizing_is_rejected() {
        let mut config = with_key();
        config.database.min_connections = 20;
        config.database.max_connections = 5;
        let errors = config.validate().unwrap_err();
        assert!(errors.iter().any(|e| e.contains("min_connections")));
    }

    #[test]
    fn bad_log_format_is_rejected() {
        let mut config = with_key();
        config.log.format = "xml".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn bad_cron_expression_is_rejected() {
        let mut config = with_key();
        config.sync.schedules.events = "whenever".to_string();
        assert!(config.validate().is_err());
    }
}
