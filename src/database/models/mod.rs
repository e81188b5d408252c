pub mod classroom;
pub mod school;
pub mod student;
pub mod user;

use serde_json::Value;
use std::sync::Arc;

use super::store::{is_object_id, Document, DocumentStore, FieldErrors, Filter, StoreError};

pub use classroom::Resource;
pub use student::Gender;
pub use user::{Role, UserRecord};

/// Schema check run before a document is written.
pub type Validator = fn(&Document) -> Result<(), FieldErrors>;

/// One collection plus its validator.
#[derive(Clone)]
pub struct Model {
    collection: &'static str,
    store: Arc<dyn DocumentStore>,
    validator: Validator,
}

impl Model {
    pub fn new(collection: &'static str, store: Arc<dyn DocumentStore>, validator: Validator) -> Self {
        Self {
            collection,
            store,
            validator,
        }
    }

    pub fn collection(&self) -> &'static str {
        self.collection
    }

    pub async fn create(&self, doc: Document) -> Result<Document, StoreError> {
        (self.validator)(&doc).map_err(StoreError::Validation)?;
        self.store.insert(self.collection, doc).await
    }

    pub async fn find(&self, filter: &Filter) -> Result<Vec<Document>, StoreError> {
        self.store.find(self.collection, filter).await
    }

    /// Malformed ids never reach the store and read as absent.
    pub async fn find_by_id(&self, id: &str) -> Result<Option<Document>, StoreError> {
        if !is_object_id(id) {
            return Ok(None);
        }
        self.store.find_by_id(self.collection, id).await
    }

    pub async fn find_one(&self, filter: &Filter) -> Result<Option<Document>, StoreError> {
        self.store.find_one(self.collection, filter).await
    }

    /// Validates the merged result before writing the patch.
    pub async fn update(&self, id: &str, patch: Document) -> Result<Option<Document>, StoreError> {
        let Some(mut merged) = self.find_by_id(id).await? else {
            return Ok(None);
        };
        for (key, value) in &patch {
            merged.insert(key.clone(), value.clone());
        }
        (self.validator)(&merged).map_err(StoreError::Validation)?;
        self.store.update_by_id(self.collection, id, patch).await
    }

    pub async fn delete(&self, id: &str) -> Result<bool, StoreError> {
        if !is_object_id(id) {
            return Ok(false);
        }
        self.store.delete_by_id(self.collection, id).await
    }

    pub async fn count(&self, filter: &Filter) -> Result<u64, StoreError> {
        self.store.count(self.collection, filter).await
    }
}

/// The persistence models handed to every manager.
#[derive(Clone)]
pub struct Models {
    pub users: Model,
    pub schools: Model,
    pub classrooms: Model,
    pub students: Model,
    store: Arc<dyn DocumentStore>,
}

impl Models {
    pub fn new(store: Arc<dyn DocumentStore>) -> Self {
        Self {
            users: Model::new(user::COLLECTION, store.clone(), user::validate),
            schools: Model::new(school::COLLECTION, store.clone(), school::validate),
            classrooms: Model::new(classroom::COLLECTION, store.clone(), classroom::validate),
            students: Model::new(student::COLLECTION, store.clone(), student::validate),
            store,
        }
    }

    pub fn store(&self) -> &Arc<dyn DocumentStore> {
        &self.store
    }
}

// Validation helpers shared by the collection validators

pub(crate) fn require_str(doc: &Document, field: &str, message: &str, errors: &mut FieldErrors) {
    let present = doc
        .get(field)
        .and_then(Value::as_str)
        .is_some_and(|s| !s.trim().is_empty());
    if !present {
        errors.insert(field.to_string(), message.to_string());
    }
}

pub(crate) fn optional_str(doc: &Document, field: &str, errors: &mut FieldErrors) {
    match doc.get(field) {
        None | Some(Value::Null) | Some(Value::String(_)) => {}
        Some(_) => {
            errors.insert(field.to_string(), format!("{} must be a string", field));
        }
    }
}

pub(crate) fn finish(errors: FieldErrors) -> Result<(), FieldErrors> {
    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}
