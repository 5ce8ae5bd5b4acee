use serde::{Deserialize, Serialize};

use crate::error::StoreError;
use crate::model::{RecordId, Schema};
use crate::store::RemoteStore;

#[derive(Debug, Clone, Copy, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApplyMode {
    Write,
    DryRun,
}

#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum LinkOutcome {
    Linked,
    AlreadyLinked,
    WouldLink,
}

/// Append `source` to the reference list of `target` unless it is already there.
///
/// Read-modify-write without a revision check: a concurrent writer between the read
/// and the write loses its update.
///
/// # Errors
/// Returns [`StoreError`] when the read or the write fails, or when the target lacks a
/// relation property named `schema.target_link_field`.
pub fn apply_link<S>(
    store: &S,
    schema: &Schema,
    target: &RecordId,
    source: &RecordId,
    mode: ApplyMode,
) -> Result<LinkOutcome, StoreError>
where
    S: RemoteStore + ?Sized,
{
    let record = store.get_record(target)?;
    let current = record.relation(&schema.target_link_field)?;

    if current.contains(source) {
        return Ok(LinkOutcome::AlreadyLinked);
    }
    if mode == ApplyMode::DryRun {
        return Ok(LinkOutcome::WouldLink);
    }

    let mut updated = Vec::with_capacity(current.len() + 1);
    updated.extend_from_slice(current);
    updated.push(source.clone());
    store.update_references(target, &schema.target_link_field, &updated)?;
    Ok(LinkOutcome::Linked)
}
