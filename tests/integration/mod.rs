//! Cross-crate integration tests that run without external services.

mod analytics_scenarios;
mod date_ranges;
mod params_codec;
