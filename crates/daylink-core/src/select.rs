use std::collections::HashSet;

use time::{Duration, OffsetDateTime};

use crate::error::StoreError;
use crate::model::{CollectionId, Schema, SourceRecord};
use crate::store::{drain_pages, Filter, RemoteStore};

/// Unlinked source records created strictly after `now - window`.
#[must_use]
pub fn candidate_filter(schema: &Schema, window: Duration, now: OffsetDateTime) -> Filter {
    Filter::All(vec![
        Filter::RelationIsEmpty { field: schema.source_link_field.clone() },
        Filter::CreatedAfter(now - window),
    ])
}

/// Collect every candidate across all pages, each id once, in pagination order.
///
/// # Errors
/// Any store failure, including a record that cannot be projected through `schema`.
pub fn select_candidates<S>(
    store: &S,
    collection: &CollectionId,
    schema: &Schema,
    window: Duration,
    now: OffsetDateTime,
) -> Result<Vec<SourceRecord>, StoreError>
where
    S: RemoteStore + ?Sized,
{
    let filter = candidate_filter(schema, window, now);
    let records = drain_pages(store, collection, &filter)?;

    let mut seen = HashSet::new();
    let mut candidates = Vec::with_capacity(records.len());
    for record in &records {
        if !seen.insert(record.id.clone()) {
            tracing::debug!(source_id = %record.id, "duplicate candidate across pages ignored");
            continue;
        }
        candidates.push(SourceRecord::from_record(record, schema)?);
    }

    Ok(candidates)
}
