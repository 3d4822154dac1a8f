//! HTTP handlers, grouped by surface.

pub mod analytics;
pub mod entities;
pub mod monitoring;
pub mod overview;
pub mod sync;

use serde::Deserialize;

use pulse_core::DateRange;

/// The `dateRange` query parameter shared by the read endpoints.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RangeQuery {
    #[serde(default, rename = "dateRange")]
    pub date_range: Option<String>,
}

impl RangeQuery {
    pub fn range(&self) -> DateRange {
        DateRange::parse(self.date_range.as_deref().unwrap_or(""))
    }

    pub fn raw(&self) -> &str {
        self.date_range.as_deref().unwrap_or("last-30-days")
    }
}
