//! Upstream query encoding: `op(field,value)` filters, sparse
//! fieldsets, and canonical coalescing keys.

use chrono::{TimeZone, Utc};

use pulse_core::{ApiParams, Filter, FilterOp, FilterValue, Sort};

#[test]
fn incremental_sync_filter_shape() {
    let watermark = Utc.with_ymd_and_hms(2025, 6, 1, 0, 0, 0).unwrap();
    let upper = Utc.with_ymd_and_hms(2025, 6, 2, 11, 59, 0).unwrap();

    let params = ApiParams::new()
        .page_size(50)
        .sort(Sort::asc("updated"))
        .filter(Filter::updated_before(upper))
        .filter(Filter::updated_since(watermark));

    let pairs = params.to_query_pairs();
    let filter = &pairs.iter().find(|(k, _)| k == "filter").unwrap().1;
    assert_eq!(
        filter,
        "less-or-equal(updated,2025-06-02T11:59:00Z),greater-or-equal(updated,2025-06-01T00:00:00Z)"
    );
}

#[test]
fn all_operators_encode() {
    let cases = [
        (FilterOp::Equals, "equals"),
        (FilterOp::GreaterThan, "greater-than"),
        (FilterOp::LessThan, "less-than"),
        (FilterOp::GreaterOrEqual, "greater-or-equal"),
        (FilterOp::LessOrEqual, "less-or-equal"),
        (FilterOp::Contains, "contains"),
    ];
    for (op, wire) in cases {
        let filter = Filter::new(op, "name", FilterValue::Str("x".into()));
        assert_eq!(filter.to_string(), format!("{}(name,\"x\")", wire));
    }
}

#[test]
fn numbers_and_bools_encode_bare() {
    let f = Filter::new(FilterOp::GreaterThan, "value", FilterValue::Number(12.5));
    assert_eq!(f.to_string(), "greater-than(value,12.5)");

    let f = Filter::new(FilterOp::Equals, "archived", FilterValue::Bool(false));
    assert_eq!(f.to_string(), "equals(archived,false)");
}

#[test]
fn identical_params_share_a_canonical_key() {
    let a = ApiParams::new()
        .fields_for("campaign", vec!["name".into(), "status".into()])
        .include("tags")
        .page_size(25);
    let b = a.clone();

    assert_eq!(a.canonical_key("/api/campaigns"), b.canonical_key("/api/campaigns"));

    let different = b.page_size(50);
    assert_ne!(
        a.canonical_key("/api/campaigns"),
        different.canonical_key("/api/campaigns")
    );
}

#[test]
fn cursors_change_the_key() {
    let base = ApiParams::new().page_size(10);
    let page2 = base.clone().with_cursor(Some("abc".into()));
    assert_ne!(base.canonical_key("/api/events"), page2.canonical_key("/api/events"));
}
