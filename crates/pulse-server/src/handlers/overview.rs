//! Aggregate KPI endpoint.

use std::time::Duration;

use axum::extract::{Query, State};
use axum::Json;
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde_json::{json, Value};

use pulse_core::{DateRange, EntityType, Result};
use pulse_storage::cache_key;

use crate::error::ApiResult;
use crate::state::AppState;

use super::RangeQuery;

#[derive(Debug, Default)]
struct Totals {
    sent: i64,
    opens: i64,
    clicks: i64,
    conversions: i64,
    revenue: Decimal,
}

impl Totals {
    fn open_rate(&self) -> f64 {
        rate(self.opens, self.sent)
    }

    fn click_rate(&self) -> f64 {
        rate(self.clicks, self.sent)
    }

    fn conversion_rate(&self) -> f64 {
        rate(self.conversions, self.sent)
    }

    fn revenue_f64(&self) -> f64 {
        self.revenue.to_f64().unwrap_or(0.0)
    }
}

fn rate(part: i64, whole: i64) -> f64 {
    if whole == 0 {
        0.0
    } else {
        part as f64 / whole as f64
    }
}

/// `GET /overview` — KPIs for the requested window against the window
/// of equal length immediately before it.
pub async fn overview(
    State(state): State<AppState>,
    Query(query): Query<RangeQuery>,
) -> ApiResult<Json<Value>> {
    let range = query.range();
    let key = cache_key("/overview", &[("dateRange", query.raw())]);
    let ttl = Duration::from_secs(state.config.cache.overview_ttl_secs);

    let computed = state.clone();
    let body = state
        .cache
        .get_or_compute(&key, ttl, async move { compute(&computed, range).await })
        .await?;
    Ok(Json(body.as_ref().clone()))
}

async fn compute(state: &AppState, range: DateRange) -> Result<Value> {
    let current = totals(state, range).await?;
    let previous = totals(state, range.previous()).await?;

    Ok(json!({
        "dateRange": {"start": range.start, "end": range.end},
        "kpis": {
            "revenue": kpi(current.revenue_f64(), previous.revenue_f64()),
            "recipients": kpi(current.sent as f64, previous.sent as f64),
            "openRate": kpi(current.open_rate(), previous.open_rate()),
            "clickRate": kpi(current.click_rate(), previous.click_rate()),
            "conversionRate": kpi(current.conversion_rate(), previous.conversion_rate()),
        }
    }))
}

async fn totals(state: &AppState, range: DateRange) -> Result<Totals> {
    let mut totals = Totals::default();
    for entity in EntityType::MARKETING {
        let rows = state
            .marketing
            .find_by_date_range(entity, range.start, range.end)
            .await?;
        for row in rows {
            totals.sent += row.sent_count;
            totals.opens += row.open_count;
            totals.clicks += row.click_count;
            totals.conversions += row.conversion_count;
            totals.revenue += row.revenue;
        }
    }
    Ok(totals)
}

fn kpi(current: f64, previous: f64) -> Value {
    let change = if previous == 0.0 {
        Value::Null
    } else {
        json!((current - previous) / previous * 100.0)
    };
    json!({"current": current, "previous": previous, "changePercent": change})
}
