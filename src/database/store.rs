use async_trait::async_trait;
use chrono::{SecondsFormat, Utc};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use thiserror::Error;

/// A stored record. Every document carries `_id`, `createdAt` and `updatedAt`.
pub type Document = Map<String, Value>;

/// Top-level field equality filter. An empty filter matches everything.
pub type Filter = Map<String, Value>;

/// Field name to message.
pub type FieldErrors = BTreeMap<String, String>;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("validation failed: {0:?}")]
    Validation(FieldErrors),

    #[error("connection error: {0}")]
    Connection(String),

    #[error(transparent)]
    Sqlx(#[from] sqlx::Error),

    #[error(transparent)]
    Serialization(#[from] serde_json::Error),
}

/// Persistence collaborator used by the entity managers.
#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// Short backend name for logs and health output
    fn backend(&self) -> &'static str;

    /// Stamps `_id` (unless present), `createdAt` and `updatedAt`, then stores the document.
    async fn insert(&self, collection: &str, doc: Document) -> Result<Document, StoreError>;

    /// Documents matching `filter`, in insertion order.
    async fn find(&self, collection: &str, filter: &Filter) -> Result<Vec<Document>, StoreError>;

    async fn find_by_id(&self, collection: &str, id: &str) -> Result<Option<Document>, StoreError>;

    async fn find_one(&self, collection: &str, filter: &Filter) -> Result<Option<Document>, StoreError> {
        Ok(self.find(collection, filter).await?.into_iter().next())
    }

    /// Shallow-merges `patch` into the stored document and refreshes `updatedAt`.
    /// Returns the updated document, or `None` when the id is unknown.
    async fn update_by_id(
        &self,
        collection: &str,
        id: &str,
        patch: Document,
    ) -> Result<Option<Document>, StoreError>;

    async fn delete_by_id(&self, collection: &str, id: &str) -> Result<bool, StoreError>;

    async fn count(&self, collection: &str, filter: &Filter) -> Result<u64, StoreError> {
        Ok(self.find(collection, filter).await?.len() as u64)
    }

    async fn ping(&self) -> Result<(), StoreError>;
}

/// Fresh 24-character lowercase hex identifier.
pub fn new_object_id() -> String {
    let mut id = uuid::Uuid::new_v4().simple().to_string();
    id.truncate(24);
    id
}

pub fn is_object_id(value: &str) -> bool {
    value.len() == 24 && value.chars().all(|c| c.is_ascii_hexdigit())
}

pub fn now_timestamp() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// Builds a filter from a `json!({...})` literal.
pub fn filter(value: Value) -> Filter {
    match value {
        Value::Object(map) => map,
        _ => Filter::new(),
    }
}

pub fn matches(doc: &Document, filter: &Filter) -> bool {
    filter.iter().all(|(key, expected)| match doc.get(key) {
        Some(actual) => actual == expected,
        None => expected.is_null(),
    })
}

pub(crate) fn stamp_new(mut doc: Document) -> Document {
    let now = now_timestamp();
    let has_id = doc.get("_id").and_then(Value::as_str).is_some_and(is_object_id);
    if !has_id {
        doc.insert("_id".to_string(), Value::String(new_object_id()));
    }
    doc.insert("createdAt".to_string(), Value::String(now.clone()));
    doc.insert("updatedAt".to_string(), Value::String(now));
    doc
}

/// Drops keys callers may not overwrite and stamps `updatedAt`.
pub(crate) fn stamp_patch(mut patch: Document) -> Document {
    patch.remove("_id");
    patch.remove("createdAt");
    patch.insert("updatedAt".to_string(), Value::String(now_timestamp()));
    patch
}
