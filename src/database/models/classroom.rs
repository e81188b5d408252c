use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::{finish, optional_str, require_str};
use crate::database::store::{Document, FieldErrors};

pub const COLLECTION: &str = "classrooms";

pub const DEFAULT_CAPACITY: i64 = 30;
pub const MIN_CAPACITY: i64 = 1;
pub const MAX_CAPACITY: i64 = 100;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Resource {
    Projector,
    Smartboard,
    Ac,
    Computers,
    Lab,
    Library,
}

impl Resource {
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "projector" => Some(Self::Projector),
            "smartboard" => Some(Self::Smartboard),
            "ac" => Some(Self::Ac),
            "computers" => Some(Self::Computers),
            "lab" => Some(Self::Lab),
            "library" => Some(Self::Library),
            _ => None,
        }
    }
}

pub fn validate(doc: &Document) -> Result<(), FieldErrors> {
    let mut errors = FieldErrors::new();
    require_str(doc, "name", "Classroom name is required", &mut errors);
    require_str(doc, "school", "School reference is required", &mut errors);
    optional_str(doc, "grade", &mut errors);
    optional_str(doc, "section", &mut errors);

    match doc.get("capacity").map(Value::as_i64) {
        None => {
            errors.insert("capacity".to_string(), "Capacity is required".to_string());
        }
        Some(None) => {
            errors.insert("capacity".to_string(), "Capacity must be a number".to_string());
        }
        Some(Some(n)) if n < MIN_CAPACITY => {
            errors.insert("capacity".to_string(), "Capacity must be at least 1".to_string());
        }
        Some(Some(n)) if n > MAX_CAPACITY => {
            errors.insert("capacity".to_string(), "Capacity cannot exceed 100".to_string());
        }
        Some(Some(_)) => {}
    }

    match doc.get("resources") {
        None | Some(Value::Null) => {}
        Some(Value::Array(items)) => {
            let invalid = items
                .iter()
                .find(|item| item.as_str().and_then(Resource::parse).is_none());
            if let Some(item) = invalid {
                errors.insert(
                    "resources".to_string(),
                    format!("{} is not a valid resource", item),
                );
            }
        }
        Some(_) => {
            errors.insert("resources".to_string(), "resources must be an array".to_string());
        }
    }

    finish(errors)
}
