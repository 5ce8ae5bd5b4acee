use std::collections::HashSet;

use time::OffsetDateTime;

use crate::day::{CalendarDay, DayNormalizer};
use crate::error::StoreError;
use crate::model::{CollectionId, Record, RecordId};

/// Query predicate understood by every remote store.
#[derive(Debug, Clone, Eq, PartialEq)]
pub enum Filter {
    DateEquals { field: String, day: CalendarDay },
    RelationIsEmpty { field: String },
    CreatedAfter(OffsetDateTime),
    All(Vec<Filter>),
}

impl Filter {
    /// Local evaluation, used by stores that hold records in process.
    #[must_use]
    pub fn matches(&self, record: &Record, normalizer: &DayNormalizer) -> bool {
        match self {
            Self::DateEquals { field, day } => match record.date(field) {
                Ok(Some(raw)) => normalizer.normalize(raw).is_ok_and(|value| value == *day),
                _ => false,
            },
            Self::RelationIsEmpty { field } => match record.relation(field) {
                Ok(references) => references.is_empty(),
                Err(_) => false,
            },
            Self::CreatedAfter(instant) => record.created_at > *instant,
            Self::All(filters) => filters.iter().all(|filter| filter.matches(record, normalizer)),
        }
    }
}

#[derive(Debug, Clone, Default, Eq, PartialEq)]
pub struct Page {
    pub records: Vec<Record>,
    pub next_cursor: Option<String>,
}

/// Remote collection access required by the reconciliation core.
pub trait RemoteStore {
    /// Fetch one page of `collection` matching `filter`, continuing from `cursor`.
    ///
    /// # Errors
    /// Returns [`StoreError`] when the query cannot be served.
    fn query_page(
        &self,
        collection: &CollectionId,
        filter: &Filter,
        cursor: Option<&str>,
    ) -> Result<Page, StoreError>;

    /// Fetch one record with complete relation lists.
    ///
    /// # Errors
    /// Returns [`StoreError`] when the record cannot be read.
    fn get_record(&self, id: &RecordId) -> Result<Record, StoreError>;

    /// Replace the whole relation list stored in `field`.
    ///
    /// # Errors
    /// Returns [`StoreError`] when the write is rejected. A rejected write leaves the
    /// previous list in place.
    fn update_references(
        &self,
        id: &RecordId,
        field: &str,
        references: &[RecordId],
    ) -> Result<(), StoreError>;
}

impl<T> RemoteStore for &T
where
    T: RemoteStore + ?Sized,
{
    fn query_page(
        &self,
        collection: &CollectionId,
        filter: &Filter,
        cursor: Option<&str>,
    ) -> Result<Page, StoreError> {
        (**self).query_page(collection, filter, cursor)
    }

    fn get_record(&self, id: &RecordId) -> Result<Record, StoreError> {
        (**self).get_record(id)
    }

    fn update_references(
        &self,
        id: &RecordId,
        field: &str,
        references: &[RecordId],
    ) -> Result<(), StoreError> {
        (**self).update_references(id, field, references)
    }
}

/// Follow cursors until the store stops returning one.
///
/// # Errors
/// Propagates the first page failure, and fails with [`StoreError::Decode`] when the
/// store hands back a cursor it already issued.
pub fn drain_pages<S>(
    store: &S,
    collection: &CollectionId,
    filter: &Filter,
) -> Result<Vec<Record>, StoreError>
where
    S: RemoteStore + ?Sized,
{
    let mut records = Vec::new();
    let mut seen_cursors = HashSet::new();
    let mut cursor: Option<String> = None;
    let mut pages = 0_usize;

    loop {
        let page = store.query_page(collection, filter, cursor.as_deref())?;
        pages += 1;
        tracing::debug!(
            collection = %collection,
            page = pages,
            records = page.records.len(),
            has_more = page.next_cursor.is_some(),
            "fetched page"
        );
        records.extend(page.records);

        match page.next_cursor {
            Some(next) => {
                if !seen_cursors.insert(next.clone()) {
                    return Err(StoreError::Decode(format!(
                        "pagination cursor `{next}` repeated for collection {collection}"
                    )));
                }
                cursor = Some(next);
            }
            None => return Ok(records),
        }
    }
}
