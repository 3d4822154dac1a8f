//! JSON:API resources to store rows.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::Deserialize;

use pulse_core::{
    ApiDocument, EntityType, Error, Event, MarketingEntity, Metric, Profile, Resource, Result,
};

#[derive(Debug, Default, Deserialize)]
struct MarketingAttrs {
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    status: Option<String>,
    #[serde(default, alias = "created_at")]
    created: Option<DateTime<Utc>>,
    #[serde(default, alias = "updated_at")]
    updated: Option<DateTime<Utc>>,
    #[serde(default, alias = "archived_at")]
    archived: Option<DateTime<Utc>>,
    #[serde(default)]
    statistics: Option<Statistics>,
}

#[derive(Debug, Default, Deserialize)]
struct Statistics {
    #[serde(default, alias = "sent_count")]
    sent: i64,
    #[serde(default, alias = "open_count")]
    opens: i64,
    #[serde(default, alias = "click_count")]
    clicks: i64,
    #[serde(default, alias = "conversion_count")]
    conversions: i64,
    #[serde(default)]
    revenue: Option<Decimal>,
}

pub fn marketing_entity_from_resource(
    entity: EntityType,
    resource: &Resource,
    now: DateTime<Utc>,
) -> Result<MarketingEntity> {
    let attrs: MarketingAttrs = resource.decode_attributes()?;
    let stats = attrs.statistics.unwrap_or_default();
    Ok(MarketingEntity {
        id: resource.id.clone(),
        entity_type: entity,
        name: attrs.name.unwrap_or_default(),
        status: attrs.status.unwrap_or_else(|| "unknown".to_string()),
        created_at: attrs.created.unwrap_or(now),
        updated_at: attrs.updated.unwrap_or(now),
        archived_at: attrs.archived,
        sent_count: stats.sent,
        open_count: stats.opens,
        click_count: stats.clicks,
        conversion_count: stats.conversions,
        revenue: stats.revenue.unwrap_or(Decimal::ZERO),
        metadata: resource.attributes.clone(),
    })
}

#[derive(Debug, Default, Deserialize)]
struct MetricAttrs {
    #[serde(default)]
    name: Option<String>,
    #[serde(default, alias = "type")]
    kind: Option<String>,
    #[serde(default)]
    description: Option<String>,
    #[serde(default, alias = "created_at")]
    created: Option<DateTime<Utc>>,
    #[serde(default, alias = "updated_at")]
    updated: Option<DateTime<Utc>>,
    #[serde(default)]
    integration: Option<IntegrationAttrs>,
}

#[derive(Debug, Default, Deserialize)]
struct IntegrationAttrs {
    #[serde(default)]
    id: Option<String>,
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    category: Option<String>,
}

pub fn metric_from_resource(resource: &Resource, now: DateTime<Utc>) -> Result<Metric> {
    let attrs: MetricAttrs = resource.decode_attributes()?;
    let integration = attrs.integration.unwrap_or_default();
    Ok(Metric {
        id: resource.id.clone(),
        name: attrs.name.unwrap_or_default(),
        kind: attrs.kind,
        description: attrs.description,
        created_at: attrs.created.unwrap_or(now),
        updated_at: attrs.updated.unwrap_or(now),
        integration_id: integration.id,
        integration_name: integration.name,
        integration_category: integration.category,
        metadata: resource.attributes.clone(),
    })
}

/// Minimal metric row for an id only known from an event relationship.
pub fn stub_metric(id: &str, now: DateTime<Utc>) -> Metric {
    Metric {
        id: id.to_string(),
        name: String::new(),
        kind: None,
        description: None,
        created_at: now,
        updated_at: now,
        integration_id: None,
        integration_name: None,
        integration_category: None,
        metadata: serde_json::Value::Null,
    }
}

#[derive(Debug, Default, Deserialize)]
struct ProfileAttrs {
    #[serde(default)]
    email: Option<String>,
    #[serde(default, alias = "phone_number")]
    phone: Option<String>,
    #[serde(default)]
    external_id: Option<String>,
    #[serde(default)]
    first_name: Option<String>,
    #[serde(default)]
    last_name: Option<String>,
    #[serde(default, alias = "created_at")]
    created: Option<DateTime<Utc>>,
    #[serde(default, alias = "updated_at")]
    updated: Option<DateTime<Utc>>,
    #[serde(default)]
    properties: Option<serde_json::Value>,
    #[serde(default)]
    last_event_date: Option<DateTime<Utc>>,
}

pub fn profile_from_resource(resource: &Resource, now: DateTime<Utc>) -> Result<Profile> {
    let attrs: ProfileAttrs = resource.decode_attributes()?;
    Ok(Profile {
        id: resource.id.clone(),
        email: attrs.email,
        phone: attrs.phone,
        external_id: attrs.external_id,
        first_name: attrs.first_name,
        last_name: attrs.last_name,
        created_at: attrs.created.unwrap_or(now),
        updated_at: attrs.updated.unwrap_or(now),
        properties: attrs.properties.unwrap_or(serde_json::Value::Null),
        last_event_at: attrs.last_event_date,
    })
}

pub fn stub_profile(id: &str, now: DateTime<Utc>) -> Profile {
    Profile {
        id: id.to_string(),
        email: None,
        phone: None,
        external_id: None,
        first_name: None,
        last_name: None,
        created_at: now,
        updated_at: now,
        properties: serde_json::Value::Null,
        last_event_at: None,
    }
}

#[derive(Debug, Deserialize)]
struct EventAttrs {
    #[serde(alias = "datetime")]
    timestamp: DateTime<Utc>,
    #[serde(default)]
    value: Option<Decimal>,
    #[serde(default, alias = "event_properties")]
    properties: Option<serde_json::Value>,
}

/// Events must reference a metric and a profile; a resource without
/// those relationships is rejected.
pub fn event_from_resource(resource: &Resource) -> Result<Event> {
    let attrs: EventAttrs = resource.decode_attributes()?;
    let metric_id = resource.relationship_id("metric").ok_or_else(|| {
        Error::validation(format!("event {} has no metric relationship", resource.id))
    })?;
    let profile_id = resource.relationship_id("profile").ok_or_else(|| {
        Error::validation(format!("event {} has no profile relationship", resource.id))
    })?;

    Ok(Event {
        id: resource.id.clone(),
        metric_id,
        profile_id,
        timestamp: attrs.timestamp,
        value: attrs.value,
        properties: attrs.properties.unwrap_or(serde_json::Value::Null),
        raw: resource.attributes.clone(),
    })
}

/// Upstream `updated` attribute, used to advance the watermark.
pub fn updated_timestamp(resource: &Resource) -> Option<DateTime<Utc>> {
    let attrs = &resource.attributes;
    for key in ["updated", "updated_at", "datetime", "timestamp"] {
        if let Some(value) = attrs.get(key).and_then(|v| v.as_str()) {
            if let Ok(ts) = DateTime::parse_from_rfc3339(value) {
                return Some(ts.with_timezone(&Utc));
            }
        }
    }
    None
}

/// Side-loaded referent lookup for opportunistic ingestion.
pub fn included_metric(doc: &ApiDocument, id: &str, now: DateTime<Utc>) -> Metric {
    doc.included("metric", id)
        .and_then(|r| metric_from_resource(r, now).ok())
        .unwrap_or_else(|| stub_metric(id, now))
}

pub fn included_profile(doc: &ApiDocument, id: &str, now: DateTime<Utc>) -> Profile {
    doc.included("profile", id)
        .and_then(|r| profile_from_resource(r, now).ok())
        .unwrap_or_else(|| stub_profile(id, now))
}
