//! Time-series analytics for the dashboard.
//!
//! Pure algorithms (preprocessing, decomposition, anomaly detection,
//! correlation, sample entropy, downsampling, forecasting) over
//! [`TimeSeriesPoint`](pulse_core::TimeSeriesPoint) vectors, plus the
//! [`AnalyticsEngine`] that feeds them from the store,
//! aggregate-first.

pub mod anomaly;
pub mod decompose;
pub mod downsample;
pub mod engine;
pub mod forecast;
pub mod preprocess;
pub mod stats;

pub use anomaly::detect_anomalies;
pub use decompose::{decompose_series, extract_trend};
pub use downsample::lttb;
pub use engine::AnalyticsEngine;
pub use forecast::{Forecast, ForecastMethod};
pub use preprocess::{preprocess, PreprocessOptions, PreprocessResult};
pub use stats::{calculate_correlation, calculate_sample_entropy};
