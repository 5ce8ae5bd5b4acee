//! Notion REST payloads and their mapping onto core records.

use std::collections::BTreeMap;

use daylink_core::{FieldValue, Filter, Record, RecordId, StoreError};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use time::format_description::well_known::Rfc3339;
use time::OffsetDateTime;

#[derive(Debug, Deserialize)]
pub(crate) struct QueryResponse {
    pub results: Vec<PageObject>,
    #[serde(default)]
    pub has_more: bool,
    #[serde(default)]
    pub next_cursor: Option<String>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct PageObject {
    pub id: String,
    #[serde(with = "time::serde::rfc3339")]
    pub created_time: OffsetDateTime,
    #[serde(default)]
    pub properties: BTreeMap<String, PropertyValue>,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub(crate) enum PropertyValue {
    Date {
        date: Option<DateValue>,
    },
    Relation {
        #[serde(default)]
        id: String,
        #[serde(default)]
        relation: Vec<RelationRef>,
        #[serde(default)]
        has_more: bool,
    },
    #[serde(other)]
    Other,
}

#[derive(Debug, Deserialize)]
pub(crate) struct DateValue {
    #[serde(default)]
    pub start: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) struct RelationRef {
    pub id: String,
}

#[derive(Debug, Deserialize)]
pub(crate) struct PropertyItemList {
    #[serde(default)]
    pub results: Vec<PropertyItem>,
    #[serde(default)]
    pub has_more: bool,
    #[serde(default)]
    pub next_cursor: Option<String>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct PropertyItem {
    #[serde(default)]
    pub relation: Option<RelationRef>,
}

#[derive(Debug, Default, Deserialize)]
pub(crate) struct ApiErrorBody {
    #[serde(default)]
    pub code: String,
    #[serde(default)]
    pub message: String,
}

impl PageObject {
    /// Relation properties whose inline list was cut short, as `(name, property id)`.
    pub fn truncated_relations(&self) -> Vec<(String, String)> {
        self.properties
            .iter()
            .filter_map(|(name, value)| match value {
                PropertyValue::Relation { id, has_more: true, .. } => {
                    Some((name.clone(), id.clone()))
                }
                _ => None,
            })
            .collect()
    }

    pub fn into_record(self) -> Record {
        let mut record = Record::new(RecordId::new(canonical_id(&self.id)), self.created_time);
        for (name, value) in self.properties {
            let field = match value {
                PropertyValue::Date { date } => {
                    FieldValue::Date(date.and_then(|value| value.start))
                }
                PropertyValue::Relation { relation, .. } => FieldValue::Relation(
                    relation.iter().map(|item| RecordId::new(canonical_id(&item.id))).collect(),
                ),
                PropertyValue::Other => continue,
            };
            record.properties.insert(name, field);
        }
        record
    }
}

/// Lowercase dashed UUID form, so ids copied from URLs match ids from the API.
/// Anything that is not a 32-digit hex id is returned trimmed but otherwise as-is.
#[must_use]
pub fn canonical_id(raw: &str) -> String {
    let hex: String = raw.trim().chars().filter(|c| *c != '-').collect();
    if hex.len() != 32 || !hex.chars().all(|c| c.is_ascii_hexdigit()) {
        return raw.trim().to_string();
    }
    let hex = hex.to_ascii_lowercase();
    format!("{}-{}-{}-{}-{}", &hex[0..8], &hex[8..12], &hex[12..16], &hex[16..20], &hex[20..32])
}

/// Encode a core filter as a Notion database query filter object.
///
/// # Errors
/// Returns [`StoreError::Decode`] when a timestamp cannot be rendered as RFC 3339.
pub fn encode_filter(filter: &Filter) -> Result<Value, StoreError> {
    Ok(match filter {
        Filter::DateEquals { field, day } => {
            json!({ "property": field, "date": { "equals": day.to_string() } })
        }
        Filter::RelationIsEmpty { field } => {
            json!({ "property": field, "relation": { "is_empty": true } })
        }
        Filter::CreatedAfter(instant) => {
            let after = instant
                .format(&Rfc3339)
                .map_err(|err| StoreError::Decode(format!("cannot encode {instant}: {err}")))?;
            json!({ "timestamp": "created_time", "created_time": { "after": after } })
        }
        Filter::All(filters) => {
            let encoded = filters.iter().map(encode_filter).collect::<Result<Vec<_>, _>>()?;
            json!({ "and": encoded })
        }
    })
}

pub(crate) fn relation_patch(field: &str, references: &[RecordId]) -> Value {
    let relation: Vec<RelationRef> =
        references.iter().map(|id| RelationRef { id: id.as_str().to_string() }).collect();
    json!({ "properties": { field: { "relation": relation } } })
}
