//! Date-range grammar accepted by the dashboard endpoints.

use chrono::NaiveDate;

use pulse_core::DateRange;

fn today() -> NaiveDate {
    NaiveDate::from_ymd_opt(2025, 7, 10).unwrap()
}

#[test]
fn all_grammar_forms_parse() {
    for input in [
        "last-7-days",
        "last-90-days",
        "this-month",
        "last-month",
        "this-year",
        "2025-02-01_to_2025-02-28",
    ] {
        let range = DateRange::parse_at(input, today());
        assert!(range.start < range.end, "{} produced an empty range", input);
    }
}

#[test]
fn unknown_input_defaults_to_thirty_days() {
    for input in ["", "yesterday-ish", "last--days", "2025-13-01_to_2025-13-05"] {
        let range = DateRange::parse_at(input, today());
        assert_eq!((range.end - range.start).num_days(), 29, "input {:?}", input);
    }
}

#[test]
fn explicit_range_is_inclusive() {
    let range = DateRange::parse_at("2025-02-01_to_2025-02-28", today());
    assert_eq!((range.end - range.start).num_days(), 27);
}

#[test]
fn previous_period_has_equal_length() {
    let range = DateRange::parse_at("last-14-days", today());
    let previous = range.previous();
    assert_eq!(previous.duration(), range.duration());
    assert_eq!(previous.end, range.start);
}
