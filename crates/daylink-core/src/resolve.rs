use crate::day::{CalendarDay, DayNormalizer};
use crate::error::StoreError;
use crate::model::{CollectionId, Schema, TargetRecord};
use crate::store::{drain_pages, Filter, RemoteStore};

#[derive(Debug, Clone, Eq, PartialEq)]
pub enum Resolution {
    NotFound,
    Unique(TargetRecord),
    /// More than one target claims the day. `chosen` is the first one returned.
    Ambiguous { chosen: TargetRecord, candidates: usize },
}

/// Find the target record for `day`.
///
/// The store's own date filter is trusted only to narrow the query: every result is
/// re-normalized with `normalizer` and kept only when it lands on `day`.
///
/// # Errors
/// Any store failure, including a target that cannot be projected through `schema`.
pub fn resolve_target<S>(
    store: &S,
    collection: &CollectionId,
    schema: &Schema,
    normalizer: &DayNormalizer,
    day: CalendarDay,
) -> Result<Resolution, StoreError>
where
    S: RemoteStore + ?Sized,
{
    let filter = Filter::DateEquals { field: schema.target_date_field.clone(), day };
    let records = drain_pages(store, collection, &filter)?;

    let mut matches = Vec::new();
    for record in &records {
        let target = TargetRecord::from_record(record, schema)?;
        let Some(raw) = target.calendar_date.as_deref() else {
            tracing::warn!(target_id = %target.id, %day, "target returned for day has no date");
            continue;
        };
        match normalizer.normalize(raw) {
            Ok(value) if value == day => matches.push(target),
            Ok(value) => {
                tracing::debug!(target_id = %target.id, %day, actual = %value, "target date differs after normalization");
            }
            Err(err) => {
                tracing::warn!(target_id = %target.id, %day, error = %err, "target date is unreadable");
            }
        }
    }

    let candidates = matches.len();
    let mut matches = matches.into_iter();
    Ok(match (matches.next(), candidates) {
        (None, _) => Resolution::NotFound,
        (Some(target), 1) => Resolution::Unique(target),
        (Some(chosen), _) => Resolution::Ambiguous { chosen, candidates },
    })
}
