use std::collections::BTreeMap;
use std::fmt::{Display, Formatter};

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

use crate::error::StoreError;

pub const DEFAULT_SOURCE_DATE_FIELD: &str = "记账日期";
pub const DEFAULT_SOURCE_LINK_FIELD: &str = "关联";
pub const DEFAULT_TARGET_DATE_FIELD: &str = "日期";
/// Must match the relation label on the target collection byte for byte.
pub const DEFAULT_TARGET_LINK_FIELD: &str = "关联";

#[derive(Debug, Clone, Serialize, Deserialize, Eq, PartialEq, Ord, PartialOrd, Hash)]
#[serde(transparent)]
pub struct RecordId(String);

impl RecordId {
    #[must_use]
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Display for RecordId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Eq, PartialEq, Ord, PartialOrd, Hash)]
#[serde(transparent)]
pub struct CollectionId(String);

impl CollectionId {
    #[must_use]
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Display for CollectionId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Eq, PartialEq)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum FieldValue {
    Date(Option<String>),
    Relation(Vec<RecordId>),
}

impl FieldValue {
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Date(_) => "date",
            Self::Relation(_) => "relation",
        }
    }
}

/// Schema-less record as returned by a remote store.
#[derive(Debug, Clone, Serialize, Deserialize, Eq, PartialEq)]
pub struct Record {
    pub id: RecordId,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    #[serde(default)]
    pub properties: BTreeMap<String, FieldValue>,
}

#[derive(Debug, Clone, thiserror::Error, Eq, PartialEq)]
pub enum RecordError {
    #[error("record {record_id} has no property `{field}`")]
    MissingField { record_id: RecordId, field: String },
    #[error("property `{field}` on record {record_id} is a {actual}, expected {expected}")]
    WrongType { record_id: RecordId, field: String, expected: &'static str, actual: &'static str },
}

impl From<RecordError> for StoreError {
    fn from(err: RecordError) -> Self {
        Self::Schema(err.to_string())
    }
}

impl Record {
    #[must_use]
    pub fn new(id: RecordId, created_at: OffsetDateTime) -> Self {
        Self { id, created_at, properties: BTreeMap::new() }
    }

    #[must_use]
    pub fn with_date(mut self, field: &str, value: Option<&str>) -> Self {
        self.properties.insert(field.to_string(), FieldValue::Date(value.map(str::to_string)));
        self
    }

    #[must_use]
    pub fn with_relation(mut self, field: &str, references: Vec<RecordId>) -> Self {
        self.properties.insert(field.to_string(), FieldValue::Relation(references));
        self
    }

    /// Raw start value of a date property. An absent property reads as no date.
    ///
    /// # Errors
    /// Returns [`RecordError::WrongType`] when `field` holds a non-date value.
    pub fn date(&self, field: &str) -> Result<Option<&str>, RecordError> {
        match self.properties.get(field) {
            None => Ok(None),
            Some(FieldValue::Date(value)) => Ok(value.as_deref()),
            Some(other) => Err(self.wrong_type(field, "date", other)),
        }
    }

    /// # Errors
    /// Returns [`RecordError`] when `field` is absent or not a relation.
    pub fn relation(&self, field: &str) -> Result<&[RecordId], RecordError> {
        match self.properties.get(field) {
            None => Err(RecordError::MissingField {
                record_id: self.id.clone(),
                field: field.to_string(),
            }),
            Some(FieldValue::Relation(references)) => Ok(references),
            Some(other) => Err(self.wrong_type(field, "relation", other)),
        }
    }

    fn wrong_type(&self, field: &str, expected: &'static str, actual: &FieldValue) -> RecordError {
        RecordError::WrongType {
            record_id: self.id.clone(),
            field: field.to_string(),
            expected,
            actual: actual.kind(),
        }
    }
}

/// Property labels used to read both collections.
#[derive(Debug, Clone, Serialize, Deserialize, Eq, PartialEq)]
pub struct Schema {
    pub source_date_field: String,
    pub source_link_field: String,
    pub target_date_field: String,
    pub target_link_field: String,
}

impl Default for Schema {
    fn default() -> Self {
        Self {
            source_date_field: DEFAULT_SOURCE_DATE_FIELD.to_string(),
            source_link_field: DEFAULT_SOURCE_LINK_FIELD.to_string(),
            target_date_field: DEFAULT_TARGET_DATE_FIELD.to_string(),
            target_link_field: DEFAULT_TARGET_LINK_FIELD.to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Eq, PartialEq)]
pub struct SourceRecord {
    pub id: RecordId,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    pub accounting_date: Option<String>,
    pub linked: bool,
}

impl SourceRecord {
    /// # Errors
    /// Returns [`RecordError::WrongType`] when a schema field has an unexpected type.
    pub fn from_record(record: &Record, schema: &Schema) -> Result<Self, RecordError> {
        let accounting_date = record
            .date(&schema.source_date_field)?
            .map(str::trim)
            .filter(|value| !value.is_empty())
            .map(str::to_string);
        let linked = match record.relation(&schema.source_link_field) {
            Ok(references) => !references.is_empty(),
            Err(RecordError::MissingField { .. }) => false,
            Err(err) => return Err(err),
        };

        Ok(Self { id: record.id.clone(), created_at: record.created_at, accounting_date, linked })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Eq, PartialEq)]
pub struct TargetRecord {
    pub id: RecordId,
    pub calendar_date: Option<String>,
    pub references: Vec<RecordId>,
}

impl TargetRecord {
    /// # Errors
    /// Returns [`RecordError`] when the link field is absent or a field has an
    /// unexpected type.
    pub fn from_record(record: &Record, schema: &Schema) -> Result<Self, RecordError> {
        Ok(Self {
            id: record.id.clone(),
            calendar_date: record.date(&schema.target_date_field)?.map(str::to_string),
            references: record.relation(&schema.target_link_field)?.to_vec(),
        })
    }
}
