//! Links source records to the target record of their calendar day.

pub mod day;
pub mod error;
pub mod link;
pub mod memory;
pub mod model;
pub mod reconcile;
pub mod resolve;
pub mod select;
pub mod store;

pub use day::{CalendarDay, DayError, DayNormalizer};
pub use error::{ReconcileError, StoreError};
pub use link::{apply_link, ApplyMode, LinkOutcome};
pub use memory::InMemoryStore;
pub use model::{
    CollectionId, FieldValue, Record, RecordError, RecordId, Schema, SourceRecord, TargetRecord,
};
pub use reconcile::{
    reconcile, AmbiguityPolicy, ItemReport, Outcome, OutcomeCounts, ReconcileConfig, RunReport,
    DEFAULT_WINDOW_HOURS,
};
pub use resolve::{resolve_target, Resolution};
pub use select::{candidate_filter, select_candidates};
pub use store::{drain_pages, Filter, Page, RemoteStore};
