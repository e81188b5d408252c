use super::{finish, optional_str, require_str};
use crate::database::store::{Document, FieldErrors};
use serde_json::Value;

pub const COLLECTION: &str = "schools";

pub fn validate(doc: &Document) -> Result<(), FieldErrors> {
    let mut errors = FieldErrors::new();
    require_str(doc, "name", "School name is required", &mut errors);
    for field in ["address", "contactEmail", "phone", "principal"] {
        optional_str(doc, field, &mut errors);
    }
    if let Some(email) = doc.get("contactEmail").and_then(Value::as_str) {
        if !email.is_empty() && !email.contains('@') {
            errors.insert("contactEmail".to_string(), "Invalid contact email".to_string());
        }
    }
    if !matches!(doc.get("isActive"), None | Some(Value::Bool(_))) {
        errors.insert("isActive".to_string(), "isActive must be a boolean".to_string());
    }
    finish(errors)
}
