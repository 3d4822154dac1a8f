//! Cron-driven sync scheduling.
//!
//! One background loop per entity type, each sleeping until the next
//! cron fire time and shutting down over a watch channel. Expressions
//! use the 6-field form with a leading seconds column.

use std::str::FromStr;
use std::sync::Arc;

use chrono::Utc;
use cron::Schedule;
use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tracing::{debug, info, warn};

use pulse_core::{EntityType, Error, Result};

use crate::orchestrator::SyncOrchestrator;

/// Cron expressions per entity type. Defaults follow the ingestion
/// cadences the dashboard expects: metrics daily at 01:00, events
/// hourly, campaigns every 3 h, flows/forms/segments every 6 h,
/// profiles daily at 02:00.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScheduleConfig {
    #[serde(default = "default_metrics_schedule")]
    pub metrics: String,
    #[serde(default = "default_events_schedule")]
    pub events: String,
    #[serde(default = "default_campaigns_schedule")]
    pub campaigns: String,
    #[serde(default = "default_flows_schedule")]
    pub flows: String,
    #[serde(default = "default_forms_schedule")]
    pub forms: String,
    #[serde(default = "default_segments_schedule")]
    pub segments: String,
    #[serde(default = "default_profiles_schedule")]
    pub profiles: String,
}

fn default_metrics_schedule() -> String {
    "0 0 1 * * *".to_string()
}

fn default_events_schedule() -> String {
    "0 0 * * * *".to_string()
}

fn default_campaigns_schedule() -> String {
    "0 0 */3 * * *".to_string()
}

fn default_flows_schedule() -> String {
    "0 0 */6 * * *".to_string()
}

fn default_forms_schedule() -> String {
    "0 0 */6 * * *".to_string()
}

fn default_segments_schedule() -> String {
    "0 0 */6 * * *".to_string()
}

fn default_profiles_schedule() -> String {
    "0 0 2 * * *".to_string()
}

impl Default for ScheduleConfig {
    fn default() -> Self {
        Self {
            metrics: default_metrics_schedule(),
            events: default_events_schedule(),
            campaigns: default_campaigns_schedule(),
            flows: default_flows_schedule(),
            forms: default_forms_schedule(),
            segments: default_segments_schedule(),
            profiles: default_profiles_schedule(),
        }
    }
}

impl ScheduleConfig {
    fn entries(&self) -> [(EntityType, &str); 7] {
        [
            (EntityType::Metric, self.metrics.as_str()),
            (EntityType::Event, self.events.as_str()),
            (EntityType::Campaign, self.campaigns.as_str()),
            (EntityType::Flow, self.flows.as_str()),
            (EntityType::Form, self.forms.as_str()),
            (EntityType::Segment, self.segments.as_str()),
            (EntityType::Profile, self.profiles.as_str()),
        ]
    }

    /// Parse every expression, collecting the failures.
    pub fn validate(&self) -> std::result::Result<(), Vec<String>> {
        let mut errors = Vec::new();
        for (entity, expr) in self.entries() {
            if let Err(e) = Schedule::from_str(expr) {
                errors.push(format!("{}: invalid cron expression {:?}: {}", entity, expr, e));
            }
        }
        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }
}

pub struct SyncScheduler {
    orchestrator: Arc<SyncOrchestrator>,
    shutdown_tx: watch::Sender<bool>,
}

impl SyncScheduler {
    pub fn new(orchestrator: Arc<SyncOrchestrator>) -> Self {
        let (shutdown_tx, _) = watch::channel(false);
        Self {
            orchestrator,
            shutdown_tx,
        }
    }

    /// Spawn one loop per entity type. Fails fast on an unparseable
    /// expression.
    pub fn start(&self, config: &ScheduleConfig) -> Result<()> {
        for (entity, expr) in config.entries() {
            let schedule = Schedule::from_str(expr).map_err(|e| {
                Error::Config(format!("invalid cron expression for {}: {}", entity, e))
            })?;
            info!(entity = %entity, schedule = expr, "scheduling sync job");

            let orchestrator = Arc::clone(&self.orchestrator);
            let mut shutdown_rx = self.shutdown_tx.subscribe();
            tokio::spawn(async move {
                loop {
                    let Some(next) = schedule.upcoming(Utc).next() else {
                        warn!(entity = %entity, "schedule has no future fire times");
                        break;
                    };
                    let delay = (next - Utc::now())
                        .to_std()
                        .unwrap_or(std::time::Duration::ZERO);
                    debug!(entity = %entity, fire_at = %next, "sleeping until next sync");

                    tokio::select! {
                        _ = tokio::time::sleep(delay) => {
                            let outcome = orchestrator.sync_entity(entity, false, None).await;
                            if outcome.ok {
                                info!(entity = %entity, count = outcome.count, "scheduled sync complete");
                            } else {
                                warn!(entity = %entity, error = ?outcome.error, "scheduled sync failed");
                            }
                        }
                        _ = shutdown_rx.changed() => {
                            debug!(entity = %entity, "scheduler loop shutting down");
                            break;
                        }
                    }
                }
            });
        }
        Ok(())
    }

    pub fn shutdown(&self) {
        let _ = self.shutdown_tx.send(true);
    }
}
