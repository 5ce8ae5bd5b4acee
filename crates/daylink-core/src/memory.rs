//! In-process [`RemoteStore`] with the same paging and replace-on-write behavior as a
//! hosted collection. Failures can be injected per record or per collection.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Mutex, MutexGuard, PoisonError};

use crate::day::DayNormalizer;
use crate::error::StoreError;
use crate::model::{CollectionId, FieldValue, Record, RecordId};
use crate::store::{Filter, Page, RemoteStore};

const DEFAULT_PAGE_SIZE: usize = 100;

#[derive(Debug)]
pub struct InMemoryStore {
    state: Mutex<State>,
}

#[derive(Debug, Default)]
struct State {
    page_size: usize,
    order: BTreeMap<CollectionId, Vec<RecordId>>,
    records: BTreeMap<RecordId, Record>,
    mirrors: Vec<Mirror>,
    failing_reads: BTreeSet<RecordId>,
    failing_updates: BTreeSet<RecordId>,
    failing_queries: BTreeMap<CollectionId, StoreError>,
    queries: usize,
    reads: usize,
    updates: usize,
}

/// Two-way relation: writing `target_field` on one record also sets `source_field` on
/// each referenced record, the way a hosted dual relation behaves.
#[derive(Debug, Clone)]
struct Mirror {
    target_field: String,
    source_field: String,
}

impl InMemoryStore {
    #[must_use]
    pub fn new() -> Self {
        Self { state: Mutex::new(State { page_size: DEFAULT_PAGE_SIZE, ..State::default() }) }
    }

    #[must_use]
    pub fn with_page_size(self, page_size: usize) -> Self {
        self.state().page_size = page_size.max(1);
        self
    }

    #[must_use]
    pub fn with_dual_relation(self, target_field: &str, source_field: &str) -> Self {
        self.state().mirrors.push(Mirror {
            target_field: target_field.to_string(),
            source_field: source_field.to_string(),
        });
        self
    }

    /// Insert or replace a record. Replacing keeps its original position.
    pub fn insert(&self, collection: &CollectionId, record: Record) {
        let mut state = self.state();
        let order = state.order.entry(collection.clone()).or_default();
        if !order.contains(&record.id) {
            order.push(record.id.clone());
        }
        state.records.insert(record.id.clone(), record);
    }

    pub fn fail_reads_for(&self, id: &RecordId) {
        self.state().failing_reads.insert(id.clone());
    }

    pub fn fail_updates_for(&self, id: &RecordId) {
        self.state().failing_updates.insert(id.clone());
    }

    pub fn fail_queries(&self, collection: &CollectionId, error: StoreError) {
        self.state().failing_queries.insert(collection.clone(), error);
    }

    #[must_use]
    pub fn record(&self, id: &RecordId) -> Option<Record> {
        self.state().records.get(id).cloned()
    }

    /// Current relation list, empty when the record or property is absent.
    #[must_use]
    pub fn references(&self, id: &RecordId, field: &str) -> Vec<RecordId> {
        self.state()
            .records
            .get(id)
            .and_then(|record| record.relation(field).ok().map(<[RecordId]>::to_vec))
            .unwrap_or_default()
    }

    /// Snapshot of every record in `collection`, in insertion order.
    #[must_use]
    pub fn records_in(&self, collection: &CollectionId) -> Vec<Record> {
        let state = self.state();
        state
            .order
            .get(collection)
            .map(|ids| ids.iter().filter_map(|id| state.records.get(id).cloned()).collect())
            .unwrap_or_default()
    }

    #[must_use]
    pub fn query_count(&self) -> usize {
        self.state().queries
    }

    #[must_use]
    pub fn read_count(&self) -> usize {
        self.state().reads
    }

    #[must_use]
    pub fn update_count(&self) -> usize {
        self.state().updates
    }

    fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl RemoteStore for InMemoryStore {
    fn query_page(
        &self,
        collection: &CollectionId,
        filter: &Filter,
        cursor: Option<&str>,
    ) -> Result<Page, StoreError> {
        let mut state = self.state();
        state.queries += 1;
        if let Some(err) = state.failing_queries.get(collection) {
            return Err(err.clone());
        }

        let offset = match cursor {
            None => 0,
            Some(raw) => raw.parse::<usize>().map_err(|_| StoreError::Api {
                status: 400,
                code: "validation_error".to_string(),
                message: format!("invalid start_cursor `{raw}`"),
            })?,
        };

        let normalizer = DayNormalizer::utc();
        let matching: Vec<Record> = state
            .order
            .get(collection)
            .map(|ids| {
                ids.iter()
                    .filter_map(|id| state.records.get(id))
                    .filter(|record| filter.matches(record, &normalizer))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default();

        let end = offset.saturating_add(state.page_size).min(matching.len());
        let records = matching.get(offset..end).map(<[Record]>::to_vec).unwrap_or_default();
        let next_cursor = (end < matching.len()).then(|| end.to_string());
        Ok(Page { records, next_cursor })
    }

    fn get_record(&self, id: &RecordId) -> Result<Record, StoreError> {
        let mut state = self.state();
        state.reads += 1;
        if state.failing_reads.contains(id) {
            return Err(StoreError::Transport(format!("read of {id} timed out")));
        }
        state.records.get(id).cloned().ok_or_else(|| StoreError::NotFound(id.to_string()))
    }

    fn update_references(
        &self,
        id: &RecordId,
        field: &str,
        references: &[RecordId],
    ) -> Result<(), StoreError> {
        let mut state = self.state();
        state.updates += 1;
        if state.failing_updates.contains(id) {
            return Err(StoreError::Api {
                status: 409,
                code: "conflict_error".to_string(),
                message: format!("update of {id} rejected"),
            });
        }

        let record =
            state.records.get_mut(id).ok_or_else(|| StoreError::NotFound(id.to_string()))?;
        match record.properties.get(field) {
            Some(FieldValue::Relation(_)) => {}
            _ => {
                return Err(StoreError::Api {
                    status: 400,
                    code: "validation_error".to_string(),
                    message: format!("{field} is not a relation property"),
                })
            }
        }
        record.properties.insert(field.to_string(), FieldValue::Relation(references.to_vec()));

        let mirrors: Vec<Mirror> =
            state.mirrors.iter().filter(|mirror| mirror.target_field == field).cloned().collect();
        for mirror in mirrors {
            for reference in references {
                let Some(linked) = state.records.get_mut(reference) else {
                    continue;
                };
                let entry = linked
                    .properties
                    .entry(mirror.source_field.clone())
                    .or_insert_with(|| FieldValue::Relation(Vec::new()));
                if let FieldValue::Relation(back) = entry {
                    if !back.contains(id) {
                        back.push(id.clone());
                    }
                }
            }
        }
        Ok(())
    }
}
