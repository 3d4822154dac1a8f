//! One repository per entity family, all backed by the shared
//! [`Database`](crate::db::Database) wrapper.

mod aggregate;
mod event;
mod marketing;
mod metric;
mod profile;
mod raw;
mod sync_status;

pub use aggregate::AggregatedMetricRepository;
pub use event::EventRepository;
pub use marketing::MarketingEntityRepository;
pub use metric::MetricRepository;
pub use profile::ProfileRepository;
pub use raw::RawResponseRepository;
pub use sync_status::SyncStatusRepository;

use pulse_core::Error;

/// Tag a rolled-back batch with the row count the caller attempted to
/// write, keeping the original error kind.
pub(crate) fn batch_error(count: usize, e: Error) -> Error {
    let tag = |m: String| format!("batch of {} rows rolled back: {}", count, m);
    match e {
        Error::Integrity(m) => Error::Integrity(tag(m)),
        Error::TransientDatabase(m) => Error::TransientDatabase(tag(m)),
        Error::Database(m) => Error::Database(tag(m)),
        other => other,
    }
}
