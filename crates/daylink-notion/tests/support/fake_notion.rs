#![allow(dead_code)]

//! In-process stand-in for the Notion REST endpoints the client touches.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Deserialize;
use serde_json::{json, Value};
use time::format_description::well_known::Rfc3339;
use time::OffsetDateTime;

pub const TOKEN: &str = "secret_fake_integration_token";

type Shared = Arc<Mutex<FakeState>>;
type Reply = (StatusCode, Json<Value>);

#[derive(Debug)]
struct FakeState {
    databases: BTreeMap<String, Vec<String>>,
    pages: BTreeMap<String, Value>,
    relation_preview_limit: usize,
    revoked: bool,
    failing_patches: BTreeSet<String>,
    throttled_reads: BTreeSet<String>,
    mirror: Option<(String, String)>,
    requests: Vec<String>,
}

pub struct FakeNotion {
    state: Shared,
    base_url: String,
}

impl FakeNotion {
    pub fn start() -> Self {
        let state: Shared = Arc::new(Mutex::new(FakeState {
            databases: BTreeMap::new(),
            pages: BTreeMap::new(),
            relation_preview_limit: 25,
            revoked: false,
            failing_patches: BTreeSet::new(),
            throttled_reads: BTreeSet::new(),
            mirror: None,
            requests: Vec::new(),
        }));

        let listener = std::net::TcpListener::bind("127.0.0.1:0")
            .unwrap_or_else(|err| panic!("bind fake notion: {err}"));
        let addr = listener.local_addr().unwrap_or_else(|err| panic!("local addr: {err}"));
        listener
            .set_nonblocking(true)
            .unwrap_or_else(|err| panic!("set nonblocking: {err}"));

        let app = app(state.clone());
        std::thread::spawn(move || {
            let runtime = tokio::runtime::Builder::new_current_thread()
                .enable_all()
                .build()
                .unwrap_or_else(|err| panic!("fake notion runtime: {err}"));
            runtime.block_on(async move {
                let listener = tokio::net::TcpListener::from_std(listener)
                    .unwrap_or_else(|err| panic!("fake notion listener: {err}"));
                axum::serve(listener, app)
                    .await
                    .unwrap_or_else(|err| panic!("fake notion serve: {err}"));
            });
        });

        Self { state, base_url: format!("http://{addr}") }
    }

    pub fn base_url(&self) -> String {
        self.base_url.clone()
    }

    fn lock(&self) -> MutexGuard<'_, FakeState> {
        lock(&self.state)
    }

    pub fn add_page(&self, database: &str, page: Value) {
        let id = page["id"].as_str().unwrap_or_else(|| panic!("page without id")).to_string();
        let mut state = self.lock();
        state.databases.entry(database.to_string()).or_default().push(id.clone());
        state.pages.insert(id, page);
    }

    pub fn set_relation_preview_limit(&self, limit: usize) {
        self.lock().relation_preview_limit = limit;
    }

    /// Keep `source_field` on the referenced pages in step with writes to `target_field`.
    pub fn mirror_relation(&self, target_field: &str, source_field: &str) {
        self.lock().mirror = Some((target_field.to_string(), source_field.to_string()));
    }

    pub fn revoke_token(&self) {
        self.lock().revoked = true;
    }

    pub fn fail_patch_for(&self, page_id: &str) {
        self.lock().failing_patches.insert(page_id.to_string());
    }

    pub fn throttle_reads_for(&self, page_id: &str) {
        self.lock().throttled_reads.insert(page_id.to_string());
    }

    pub fn requests(&self) -> Vec<String> {
        self.lock().requests.clone()
    }

    pub fn count_requests(&self, prefix: &str) -> usize {
        self.lock().requests.iter().filter(|line| line.starts_with(prefix)).count()
    }

    pub fn relation_ids(&self, page_id: &str, property: &str) -> Vec<String> {
        let state = self.lock();
        state
            .pages
            .get(page_id)
            .map(|page| relation_of(&page["properties"][property]))
            .unwrap_or_default()
    }
}

fn lock(state: &Shared) -> MutexGuard<'_, FakeState> {
    state.lock().unwrap_or_else(PoisonError::into_inner)
}

fn app(state: Shared) -> Router {
    Router::new()
        .route("/v1/databases/:database_id/query", post(query_database))
        .route("/v1/pages/:page_id", get(retrieve_page).patch(update_page))
        .route("/v1/pages/:page_id/properties/:property_id", get(retrieve_property))
        .with_state(state)
}

pub fn uuid(n: u64) -> String {
    format!("{:08x}-0000-4000-8000-{:012x}", n, n)
}

pub fn page(id: &str, created_time: &str, properties: Value) -> Value {
    json!({
        "object": "page",
        "id": id,
        "created_time": created_time,
        "archived": false,
        "properties": properties,
    })
}

pub fn date_prop(property_id: &str, start: Option<&str>) -> Value {
    let date = start.map_or(Value::Null, |start| json!({ "start": start, "end": null, "time_zone": null }));
    json!({ "id": property_id, "type": "date", "date": date })
}

pub fn relation_prop(property_id: &str, ids: &[String]) -> Value {
    let relation: Vec<Value> = ids.iter().map(|id| json!({ "id": id })).collect();
    json!({ "id": property_id, "type": "relation", "relation": relation, "has_more": false })
}

pub fn title_prop(text: &str) -> Value {
    json!({ "id": "title", "type": "title", "title": [{ "type": "text", "plain_text": text }] })
}

fn error(status: StatusCode, code: &str, message: &str) -> Reply {
    (
        status,
        Json(json!({ "object": "error", "status": status.as_u16(), "code": code, "message": message })),
    )
}

fn authorize(state: &mut FakeState, headers: &HeaderMap, line: String) -> Result<(), Reply> {
    state.requests.push(line);
    let expected = format!("Bearer {TOKEN}");
    let authorized = headers
        .get("authorization")
        .and_then(|value| value.to_str().ok())
        .is_some_and(|value| value == expected);
    if !authorized || state.revoked {
        return Err(error(StatusCode::UNAUTHORIZED, "unauthorized", "API token is invalid."));
    }
    if headers.get("notion-version").is_none() {
        return Err(error(StatusCode::BAD_REQUEST, "missing_version", "Notion-Version header missing."));
    }
    Ok(())
}

fn relation_of(property: &Value) -> Vec<String> {
    property["relation"]
        .as_array()
        .map(|items| {
            items.iter().filter_map(|item| item["id"].as_str().map(str::to_string)).collect()
        })
        .unwrap_or_default()
}

/// Page as the API returns it: relation lists cut to the preview limit.
fn presented(page: &Value, limit: usize) -> Value {
    let mut page = page.clone();
    if let Some(properties) = page["properties"].as_object_mut() {
        for property in properties.values_mut() {
            if property["type"] != "relation" {
                continue;
            }
            if let Some(items) = property["relation"].as_array_mut() {
                if items.len() > limit {
                    items.truncate(limit);
                    property["has_more"] = json!(true);
                }
            }
        }
    }
    page
}

fn matches(filter: &Value, page: &Value) -> Result<bool, String> {
    if let Some(all) = filter.get("and").and_then(Value::as_array) {
        for part in all {
            if !matches(part, page)? {
                return Ok(false);
            }
        }
        return Ok(true);
    }
    if filter["timestamp"] == "created_time" {
        let after = parse_instant(&filter["created_time"]["after"])?;
        let created = parse_instant(&page["created_time"])?;
        return Ok(created > after);
    }
    let Some(name) = filter["property"].as_str() else {
        return Err(format!("unsupported filter {filter}"));
    };
    let property = &page["properties"][name];
    if property.is_null() {
        return Err(format!("Could not find property with name or id: {name}"));
    }
    if filter["relation"]["is_empty"] == true {
        return Ok(relation_of(property).is_empty());
    }
    if let Some(day) = filter["date"]["equals"].as_str() {
        return Ok(property["date"]["start"]
            .as_str()
            .is_some_and(|start| start.get(..10) == Some(day)));
    }
    Err(format!("unsupported filter {filter}"))
}

fn parse_instant(value: &Value) -> Result<OffsetDateTime, String> {
    let raw = value.as_str().ok_or_else(|| format!("expected timestamp, got {value}"))?;
    OffsetDateTime::parse(raw, &Rfc3339).map_err(|err| format!("bad timestamp {raw}: {err}"))
}

fn window(total: usize, cursor: Option<&str>, page_size: usize) -> Result<(usize, usize), Reply> {
    let start = match cursor {
        Some(cursor) => cursor
            .parse::<usize>()
            .map_err(|_| error(StatusCode::BAD_REQUEST, "validation_error", "start_cursor is invalid."))?,
        None => 0,
    };
    let end = total.min(start + page_size.clamp(1, 100));
    Ok((start.min(total), end))
}

fn list_reply(results: Vec<Value>, end: usize, total: usize) -> Reply {
    let has_more = end < total;
    (
        StatusCode::OK,
        Json(json!({
            "object": "list",
            "results": results,
            "has_more": has_more,
            "next_cursor": if has_more { json!(end.to_string()) } else { Value::Null },
        })),
    )
}

async fn query_database(
    State(state): State<Shared>,
    Path(database_id): Path<String>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> Reply {
    let mut state = lock(&state);
    if let Err(reply) = authorize(&mut state, &headers, format!("POST /v1/databases/{database_id}/query")) {
        return reply;
    }
    let Some(ids) = state.databases.get(&database_id) else {
        return error(StatusCode::NOT_FOUND, "object_not_found", "Could not find database.");
    };

    let mut matched = Vec::new();
    for id in ids {
        let page = &state.pages[id];
        match matches(&body["filter"], page) {
            Ok(true) => matched.push(presented(page, state.relation_preview_limit)),
            Ok(false) => {}
            Err(message) => return error(StatusCode::BAD_REQUEST, "validation_error", &message),
        }
    }

    let page_size = body["page_size"].as_u64().map_or(100, |size| usize::try_from(size).unwrap_or(100));
    let (start, end) = match window(matched.len(), body["start_cursor"].as_str(), page_size) {
        Ok(bounds) => bounds,
        Err(reply) => return reply,
    };
    let total = matched.len();
    list_reply(matched[start..end].to_vec(), end, total)
}

async fn retrieve_page(
    State(state): State<Shared>,
    Path(page_id): Path<String>,
    headers: HeaderMap,
) -> Reply {
    let mut state = lock(&state);
    if let Err(reply) = authorize(&mut state, &headers, format!("GET /v1/pages/{page_id}")) {
        return reply;
    }
    if state.throttled_reads.contains(&page_id) {
        return error(StatusCode::TOO_MANY_REQUESTS, "rate_limited", "You have been rate limited.");
    }
    match state.pages.get(&page_id) {
        Some(page) => (StatusCode::OK, Json(presented(page, state.relation_preview_limit))),
        None => error(StatusCode::NOT_FOUND, "object_not_found", "Could not find page."),
    }
}

#[derive(Debug, Deserialize)]
struct PropertyQuery {
    page_size: Option<usize>,
    start_cursor: Option<String>,
}

async fn retrieve_property(
    State(state): State<Shared>,
    Path((page_id, property_id)): Path<(String, String)>,
    Query(query): Query<PropertyQuery>,
    headers: HeaderMap,
) -> Reply {
    let mut state = lock(&state);
    let line = format!("GET /v1/pages/{page_id}/properties/{property_id}");
    if let Err(reply) = authorize(&mut state, &headers, line) {
        return reply;
    }
    let Some(page) = state.pages.get(&page_id) else {
        return error(StatusCode::NOT_FOUND, "object_not_found", "Could not find page.");
    };
    let property = page["properties"]
        .as_object()
        .and_then(|properties| properties.values().find(|value| value["id"] == property_id.as_str()));
    let Some(property) = property else {
        return error(StatusCode::NOT_FOUND, "object_not_found", "Could not find property.");
    };

    let ids = relation_of(property);
    let (start, end) = match window(ids.len(), query.start_cursor.as_deref(), query.page_size.unwrap_or(100)) {
        Ok(bounds) => bounds,
        Err(reply) => return reply,
    };
    let results = ids[start..end]
        .iter()
        .map(|id| json!({ "object": "property_item", "type": "relation", "relation": { "id": id } }))
        .collect();
    list_reply(results, end, ids.len())
}

async fn update_page(
    State(state): State<Shared>,
    Path(page_id): Path<String>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> Reply {
    let mut guard = lock(&state);
    let state = &mut *guard;
    if let Err(reply) = authorize(state, &headers, format!("PATCH /v1/pages/{page_id}")) {
        return reply;
    }
    if state.failing_patches.contains(&page_id) {
        return error(StatusCode::CONFLICT, "conflict_error", "Conflict occurred while saving.");
    }
    let Some(updates) = body["properties"].as_object().cloned() else {
        return error(StatusCode::BAD_REQUEST, "validation_error", "body.properties should be an object.");
    };
    if !state.pages.contains_key(&page_id) {
        return error(StatusCode::NOT_FOUND, "object_not_found", "Could not find page.");
    }

    let mut mirrored = Vec::new();
    for (name, update) in updates {
        let ids = relation_of(&update);
        let Some(page) = state.pages.get_mut(&page_id) else {
            return error(StatusCode::NOT_FOUND, "object_not_found", "Could not find page.");
        };
        let property = &mut page["properties"][name.as_str()];
        if property["type"] != "relation" {
            return error(StatusCode::BAD_REQUEST, "validation_error", &format!("{name} is not a relation."));
        }
        property["relation"] = json!(ids.iter().map(|id| json!({ "id": id })).collect::<Vec<_>>());
        property["has_more"] = json!(false);
        if state.mirror.as_ref().is_some_and(|(target_field, _)| *target_field == name) {
            mirrored.extend(ids);
        }
    }

    if let Some((_, source_field)) = state.mirror.clone() {
        for source_id in mirrored {
            let Some(source) = state.pages.get_mut(&source_id) else { continue };
            let property = &mut source["properties"][source_field.as_str()];
            let mut current = relation_of(property);
            if !current.contains(&page_id) {
                current.push(page_id.clone());
                property["relation"] = json!(current.iter().map(|id| json!({ "id": id })).collect::<Vec<_>>());
            }
        }
    }

    (StatusCode::OK, Json(presented(&state.pages[&page_id], state.relation_preview_limit)))
}
