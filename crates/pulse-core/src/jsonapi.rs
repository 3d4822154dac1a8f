//! JSON:API request parameters and document model for the upstream
//! marketing platform.
//!
//! The upstream encodes filters as `op(field,value)` expressions joined
//! by commas in a single `filter` parameter, with RFC 3339 datetimes and
//! double-quoted strings. Responses are JSON:API documents: `data` is a
//! resource or a list of resources, `included` carries side-loaded
//! referents, and `links.next` holds the pagination cursor URL.

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{Error, FieldError, Result};

/// Filter operators accepted by the upstream. The set is fixed;
/// anything else is rejected at the type level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FilterOp {
    Equals,
    GreaterThan,
    LessThan,
    GreaterOrEqual,
    LessOrEqual,
    Contains,
}

impl FilterOp {
    pub fn as_str(&self) -> &'static str {
        match self {
            FilterOp::Equals => "equals",
            FilterOp::GreaterThan => "greater-than",
            FilterOp::LessThan => "less-than",
            FilterOp::GreaterOrEqual => "greater-or-equal",
            FilterOp::LessOrEqual => "less-or-equal",
            FilterOp::Contains => "contains",
        }
    }
}

/// A filter operand.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum FilterValue {
    Str(String),
    Datetime(DateTime<Utc>),
    Number(f64),
    Bool(bool),
}

impl FilterValue {
    fn encode(&self) -> String {
        match self {
            // internal quotes escaped, whole value double-quoted
            FilterValue::Str(s) => format!("\"{}\"", s.replace('"', "\\\"")),
            FilterValue::Datetime(dt) => dt.to_rfc3339_opts(chrono::SecondsFormat::Secs, true),
            FilterValue::Number(n) => format!("{}", n),
            FilterValue::Bool(b) => b.to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Filter {
    pub op: FilterOp,
    pub field: String,
    pub value: FilterValue,
}

impl Filter {
    pub fn new(op: FilterOp, field: impl Into<String>, value: FilterValue) -> Self {
        Filter {
            op,
            field: field.into(),
            value,
        }
    }

    pub fn equals(field: impl Into<String>, value: impl Into<String>) -> Self {
        Filter::new(FilterOp::Equals, field, FilterValue::Str(value.into()))
    }

    pub fn updated_since(ts: DateTime<Utc>) -> Self {
        Filter::new(
            FilterOp::GreaterOrEqual,
            "updated",
            FilterValue::Datetime(ts),
        )
    }

    pub fn updated_before(ts: DateTime<Utc>) -> Self {
        Filter::new(FilterOp::LessOrEqual, "updated", FilterValue::Datetime(ts))
    }
}

impl fmt::Display for Filter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}({},{})", self.op.as_str(), self.field, self.value.encode())
    }
}

/// Sort key; descending keys are prefixed with `-` on the wire.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Sort {
    pub field: String,
    pub descending: bool,
}

impl Sort {
    pub fn asc(field: impl Into<String>) -> Self {
        Sort {
            field: field.into(),
            descending: false,
        }
    }

    pub fn desc(field: impl Into<String>) -> Self {
        Sort {
            field: field.into(),
            descending: true,
        }
    }

    fn encode(&self) -> String {
        if self.descending {
            format!("-{}", self.field)
        } else {
            self.field.clone()
        }
    }
}

/// Structured request parameters, serialized to the upstream's query
/// conventions. `fields` uses a BTreeMap so the canonical form is
/// deterministic; the canonical form is the request-coalescing key.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ApiParams {
    pub filters: Vec<Filter>,
    pub sort: Vec<Sort>,
    pub include: Vec<String>,
    pub fields: BTreeMap<String, Vec<String>>,
    pub page_cursor: Option<String>,
    pub page_size: Option<u32>,
}

impl ApiParams {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn filter(mut self, f: Filter) -> Self {
        self.filters.push(f);
        self
    }

    pub fn sort(mut self, s: Sort) -> Self {
        self.sort.push(s);
        self
    }

    pub fn include(mut self, resource: impl Into<String>) -> Self {
        self.include.push(resource.into());
        self
    }

    pub fn fields_for(mut self, resource: impl Into<String>, fields: Vec<String>) -> Self {
        self.fields.insert(resource.into(), fields);
        self
    }

    pub fn page_size(mut self, size: u32) -> Self {
        self.page_size = Some(size);
        self
    }

    pub fn with_cursor(mut self, cursor: Option<String>) -> Self {
        self.page_cursor = cursor;
        self
    }

    /// Query pairs in canonical order.
    pub fn to_query_pairs(&self) -> Vec<(String, String)> {
        let mut pairs = Vec::new();

        if !self.filters.is_empty() {
            let joined = self
                .filters
                .iter()
                .map(|f| f.to_string())
                .collect::<Vec<_>>()
                .join(",");
            pairs.push(("filter".to_string(), joined));
        }

        if !self.sort.is_empty() {
            let joined = self
                .sort
                .iter()
                .map(|s| s.encode())
                .collect::<Vec<_>>()
                .join(",");
            pairs.push(("sort".to_string(), joined));
        }

        if !self.include.is_empty() {
            pairs.push(("include".to_string(), self.include.join(",")));
        }

        for (resource, fields) in &self.fields {
            pairs.push((format!("fields[{}]", resource), fields.join(",")));
        }

        if let Some(size) = self.page_size {
            pairs.push(("page[size]".to_string(), size.to_string()));
        }

        if let Some(cursor) = &self.page_cursor {
            pairs.push(("page[cursor]".to_string(), cursor.clone()));
        }

        pairs
    }

    /// Canonical request string for a path: used as the coalescing key
    /// for identical concurrent requests.
    pub fn canonical_key(&self, path: &str) -> String {
        let pairs = self.to_query_pairs();
        if pairs.is_empty() {
            return path.to_string();
        }
        let query = pairs
            .iter()
            .map(|(k, v)| format!("{}={}", k, v))
            .collect::<Vec<_>>()
            .join("&");
        format!("{}?{}", path, query)
    }
}

/// One JSON:API resource object.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Resource {
    #[serde(rename = "type")]
    pub kind: String,
    pub id: String,
    #[serde(default)]
    pub attributes: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub relationships: Option<Value>,
}

impl Resource {
    /// Decode the attributes into a typed struct, reporting the
    /// offending resource on failure.
    pub fn decode_attributes<T: serde::de::DeserializeOwned>(&self) -> Result<T> {
        serde_json::from_value(self.attributes.clone()).map_err(|e| Error::Validation {
            message: format!("invalid {} attributes for id {}: {}", self.kind, self.id, e),
            fields: vec![FieldError {
                path: format!("/data/attributes/{}", self.kind),
                message: e.to_string(),
            }],
        })
    }

    /// Id of a to-one relationship, if present.
    pub fn relationship_id(&self, name: &str) -> Option<String> {
        self.relationships
            .as_ref()?
            .get(name)?
            .get("data")?
            .get("id")?
            .as_str()
            .map(|s| s.to_string())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DocumentLinks {
    #[serde(default)]
    pub next: Option<String>,
    #[serde(default)]
    pub prev: Option<String>,
}

/// `data` may be a single resource, a list, or null.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
enum DataField {
    Many(Vec<Resource>),
    One(Resource),
    Null,
}

impl Default for DataField {
    fn default() -> Self {
        DataField::Many(Vec::new())
    }
}

/// A decoded JSON:API response document.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ApiDocument {
    #[serde(default)]
    data: DataField,
    #[serde(default)]
    pub included: Vec<Resource>,
    #[serde(default)]
    pub links: DocumentLinks,
}

impl ApiDocument {
    pub fn from_resources(resources: Vec<Resource>) -> Self {
        ApiDocument {
            data: DataField::Many(resources),
            included: Vec::new(),
            links: DocumentLinks::default(),
        }
    }

    pub fn with_next_cursor(mut self, cursor: &str) -> Self {
        self.links.next = Some(format!("https://upstream.invalid/?page[cursor]={}", cursor));
        self
    }

    /// Primary resources, regardless of whether `data` was a single
    /// object or a list.
    pub fn resources(&self) -> &[Resource] {
        match &self.data {
            DataField::Many(v) => v,
            DataField::One(r) => std::slice::from_ref(r),
            DataField::Null => &[],
        }
    }

    pub fn is_empty(&self) -> bool {
        self.resources().is_empty()
    }

    /// Side-loaded resource by type and id.
    pub fn included(&self, kind: &str, id: &str) -> Option<&Resource> {
        self.included.iter().find(|r| r.kind == kind && r.id == id)
    }

    /// Pagination cursor extracted from `links.next`. The upstream
    /// hands back a full URL; only the `page[cursor]` parameter
    /// matters to us.
    pub fn next_cursor(&self) -> Option<String> {
        let next = self.links.next.as_deref()?;
        let url = url::Url::parse(next).ok()?;
        url.query_pairs()
            .find(|(k, _)| k == "page[cursor]")
            .map(|(_, v)| v.into_owned())
            .filter(|c| !c.is_empty())
    }
}
