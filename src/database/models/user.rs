use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::{finish, require_str};
use crate::database::store::{Document, FieldErrors};

pub const COLLECTION: &str = "users";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Superadmin,
    SchoolAdmin,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Superadmin => "superadmin",
            Role::SchoolAdmin => "school_admin",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "superadmin" => Some(Role::Superadmin),
            "school_admin" => Some(Role::SchoolAdmin),
            _ => None,
        }
    }
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Stored user account. `password` holds the bcrypt hash and never leaves the manager.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserRecord {
    #[serde(rename = "_id")]
    pub id: String,
    pub email: String,
    #[serde(default, skip_serializing)]
    pub password: String,
    pub name: String,
    pub role: Role,
    #[serde(default)]
    pub school_id: Option<String>,
    #[serde(default = "default_active")]
    pub is_active: bool,
    #[serde(default)]
    pub last_login: Option<String>,
}

fn default_active() -> bool {
    true
}

impl UserRecord {
    pub fn from_document(doc: Document) -> Result<Self, serde_json::Error> {
        serde_json::from_value(Value::Object(doc))
    }
}

/// Strips the password hash from a stored user document.
pub fn public_view(mut doc: Document) -> Document {
    doc.remove("password");
    doc
}

pub fn validate(doc: &Document) -> Result<(), FieldErrors> {
    let mut errors = FieldErrors::new();
    require_str(doc, "email", "Email is required", &mut errors);
    require_str(doc, "password", "Password is required", &mut errors);
    require_str(doc, "name", "Name is required", &mut errors);

    let role = doc.get("role").and_then(Value::as_str).and_then(Role::parse);
    match role {
        None => {
            errors.insert(
                "role".to_string(),
                "Role must be either superadmin or school_admin".to_string(),
            );
        }
        Some(Role::SchoolAdmin) => {
            require_str(doc, "schoolId", "School ID is required for school administrator", &mut errors);
        }
        Some(Role::Superadmin) => {}
    }

    if let Some(email) = doc.get("email").and_then(Value::as_str) {
        if email != email.to_lowercase() {
            errors.insert("email".to_string(), "Email must be lowercase".to_string());
        }
    }

    finish(errors)
}
