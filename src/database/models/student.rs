use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::{finish, optional_str, require_str};
use crate::database::store::{Document, FieldErrors};

pub const COLLECTION: &str = "students";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Gender {
    Male,
    Female,
    Other,
}

impl Gender {
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "male" => Some(Self::Male),
            "female" => Some(Self::Female),
            "other" => Some(Self::Other),
            _ => None,
        }
    }
}

pub fn validate(doc: &Document) -> Result<(), FieldErrors> {
    let mut errors = FieldErrors::new();
    require_str(doc, "name", "Name is required", &mut errors);
    require_str(doc, "school", "School reference is required", &mut errors);
    for field in ["email", "phone", "grade", "classroom", "dateOfBirth"] {
        optional_str(doc, field, &mut errors);
    }

    match doc.get("gender") {
        None | Some(Value::Null) => {}
        Some(Value::String(g)) if Gender::parse(g).is_some() => {}
        Some(other) => {
            errors.insert("gender".to_string(), format!("{} is not a valid gender", other));
        }
    }

    if !matches!(doc.get("transferHistory"), None | Some(Value::Array(_))) {
        errors.insert(
            "transferHistory".to_string(),
            "transferHistory must be an array".to_string(),
        );
    }

    finish(errors)
}
