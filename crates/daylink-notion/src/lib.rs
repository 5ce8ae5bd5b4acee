//! Notion database access for the reconciliation core.

mod wire;

use std::fmt;
use std::time::Duration;

use daylink_core::{CollectionId, FieldValue, Filter, Page, Record, RecordId, RemoteStore, StoreError};
use serde::de::{DeserializeOwned, IgnoredAny};
use serde_json::{json, Value};

pub use wire::{canonical_id, encode_filter};
use wire::{relation_patch, ApiErrorBody, PageObject, PropertyItemList, QueryResponse};

pub const DEFAULT_BASE_URL: &str = "https://api.notion.com";
pub const NOTION_VERSION: &str = "2022-06-28";
pub const DEFAULT_PAGE_SIZE: u32 = 50;
pub const MAX_PAGE_SIZE: u32 = 100;
pub const DEFAULT_TIMEOUT_SECS: u64 = 30;

#[derive(Clone)]
pub struct NotionConfig {
    pub base_url: String,
    pub token: String,
    pub page_size: u32,
    pub timeout: Duration,
}

impl NotionConfig {
    #[must_use]
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            token: token.into(),
            page_size: DEFAULT_PAGE_SIZE,
            timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
        }
    }
}

impl fmt::Debug for NotionConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NotionConfig")
            .field("base_url", &self.base_url)
            .field("token", &"<redacted>")
            .field("page_size", &self.page_size)
            .field("timeout", &self.timeout)
            .finish()
    }
}

/// Blocking Notion API client. Requests are not retried.
pub struct NotionClient {
    agent: ureq::Agent,
    base_url: String,
    auth_header: String,
    page_size: u32,
}

impl fmt::Debug for NotionClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NotionClient")
            .field("base_url", &self.base_url)
            .field("page_size", &self.page_size)
            .finish_non_exhaustive()
    }
}

impl NotionClient {
    #[must_use]
    pub fn new(config: &NotionConfig) -> Self {
        let agent = ureq::AgentBuilder::new().timeout(config.timeout).build();
        Self {
            agent,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            auth_header: format!("Bearer {}", config.token),
            page_size: config.page_size.clamp(1, MAX_PAGE_SIZE),
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{path}", self.base_url)
    }

    fn send<T>(&self, request: ureq::Request, body: Option<&Value>) -> Result<T, StoreError>
    where
        T: DeserializeOwned,
    {
        let method = request.method().to_string();
        let path = request.url().trim_start_matches(&self.base_url).to_string();
        tracing::debug!(%method, %path, "notion request");

        let request = request
            .set("Authorization", &self.auth_header)
            .set("Notion-Version", NOTION_VERSION);
        let result = match body {
            Some(body) => request.send_json(body),
            None => request.call(),
        };

        match result {
            Ok(response) => response
                .into_json::<T>()
                .map_err(|err| StoreError::Decode(format!("{method} {path}: {err}"))),
            Err(ureq::Error::Status(status, response)) => {
                Err(status_error(status, response, &method, &path))
            }
            Err(ureq::Error::Transport(transport)) => {
                Err(StoreError::Transport(format!("{method} {path}: {transport}")))
            }
        }
    }

    /// Complete a relation that the page object only listed partially.
    fn relation_items(&self, page_id: &str, property_id: &str) -> Result<Vec<RecordId>, StoreError> {
        let url = self.url(&format!("/v1/pages/{page_id}/properties/{property_id}"));
        let page_size = self.page_size.to_string();
        let mut references = Vec::new();
        let mut cursor: Option<String> = None;

        loop {
            let mut request = self.agent.get(&url).query("page_size", &page_size);
            if let Some(cursor) = cursor.as_deref() {
                request = request.query("start_cursor", cursor);
            }
            let list: PropertyItemList = self.send(request, None)?;
            references.extend(
                list.results
                    .into_iter()
                    .filter_map(|item| item.relation)
                    .map(|item| RecordId::new(canonical_id(&item.id))),
            );
            match (list.has_more, list.next_cursor) {
                (true, Some(next)) => cursor = Some(next),
                _ => return Ok(references),
            }
        }
    }
}

fn status_error(status: u16, response: ureq::Response, method: &str, path: &str) -> StoreError {
    let body: ApiErrorBody = response.into_json().unwrap_or_default();
    tracing::debug!(status, code = %body.code, %method, %path, "notion error response");
    let message = if body.message.is_empty() {
        format!("{method} {path} returned HTTP {status}")
    } else {
        format!("{method} {path}: {}", body.message)
    };

    match status {
        401 => StoreError::Unauthorized(message),
        404 => StoreError::NotFound(message),
        429 => StoreError::RateLimited(message),
        _ => StoreError::Api { status, code: body.code, message },
    }
}

impl RemoteStore for NotionClient {
    fn query_page(
        &self,
        collection: &CollectionId,
        filter: &Filter,
        cursor: Option<&str>,
    ) -> Result<Page, StoreError> {
        let mut body = json!({
            "filter": encode_filter(filter)?,
            "page_size": self.page_size,
        });
        if let Some(cursor) = cursor {
            body["start_cursor"] = json!(cursor);
        }

        let url = self.url(&format!("/v1/databases/{}/query", collection.as_str()));
        let response: QueryResponse = self.send(self.agent.post(&url), Some(&body))?;
        let next_cursor = if response.has_more { response.next_cursor } else { None };
        let records = response.results.into_iter().map(PageObject::into_record).collect();
        Ok(Page { records, next_cursor })
    }

    fn get_record(&self, id: &RecordId) -> Result<Record, StoreError> {
        let url = self.url(&format!("/v1/pages/{}", id.as_str()));
        let page: PageObject = self.send(self.agent.get(&url), None)?;
        let truncated = page.truncated_relations();
        let page_id = page.id.clone();
        let mut record = page.into_record();

        for (name, property_id) in truncated {
            tracing::debug!(record_id = %id, property = %name, "fetching full relation list");
            let references = self.relation_items(&page_id, &property_id)?;
            record.properties.insert(name, FieldValue::Relation(references));
        }
        Ok(record)
    }

    fn update_references(
        &self,
        id: &RecordId,
        field: &str,
        references: &[RecordId],
    ) -> Result<(), StoreError> {
        let url = self.url(&format!("/v1/pages/{}", id.as_str()));
        let body = relation_patch(field, references);
        let _: IgnoredAny = self.send(self.agent.patch(&url), Some(&body))?;
        Ok(())
    }
}
