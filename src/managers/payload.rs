use serde_json::{Map, Value};

use crate::database::{is_object_id, Document};
use crate::error::ApiError;
use crate::middleware::auth::AuthUser;

/// Read-side view over the merged request data a manager operation receives.
#[derive(Debug, Clone, Default)]
pub struct Payload {
    data: Map<String, Value>,
}

impl Payload {
    pub fn new(data: Value) -> Self {
        match data {
            Value::Object(data) => Self { data },
            _ => Self::default(),
        }
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.data.get(key).filter(|v| !v.is_null())
    }

    /// Non-blank string value.
    pub fn str(&self, key: &str) -> Option<&str> {
        self.get(key)
            .and_then(Value::as_str)
            .filter(|s| !s.trim().is_empty())
    }

    pub fn string(&self, key: &str) -> Option<String> {
        self.str(key).map(str::to_string)
    }

    /// Accepts a JSON number or a numeric string (query parameters arrive as strings).
    pub fn int(&self, key: &str) -> Option<i64> {
        match self.get(key)? {
            Value::Number(n) => n.as_i64(),
            Value::String(s) => s.trim().parse().ok(),
            _ => None,
        }
    }

    /// Accepts a JSON bool or `"true"`/`"false"`.
    pub fn flag(&self, key: &str) -> Option<bool> {
        match self.get(key)? {
            Value::Bool(b) => Some(*b),
            Value::String(s) => Some(s == "true"),
            _ => None,
        }
    }

    pub fn array(&self, key: &str) -> Option<&Vec<Value>> {
        self.get(key).and_then(Value::as_array)
    }

    /// A 24-hex identifier under `key`, or 400 with `message`.
    pub fn object_id(&self, key: &str, message: &str) -> Result<String, ApiError> {
        match self.str(key) {
            Some(id) if is_object_id(id) => Ok(id.to_string()),
            _ => Err(ApiError::bad_request(message)),
        }
    }

    /// The identity attached by `__auth`.
    pub fn user(&self) -> Result<AuthUser, ApiError> {
        self.get("user")
            .and_then(|u| serde_json::from_value(u.clone()).ok())
            .ok_or_else(|| ApiError::unauthorized("Authentication required"))
    }

    /// Copies the listed keys that are present, nulls included.
    pub fn pick(&self, keys: &[&str]) -> Document {
        keys.iter()
            .filter_map(|k| self.data.get(*k).map(|v| (k.to_string(), v.clone())))
            .collect()
    }

    /// Client-writable fields: everything except transport metadata and the
    /// listed keys.
    pub fn updates(&self, except: &[&str]) -> Document {
        const METADATA: [&str; 11] = [
            "id", "user", "file", "files", "headers", "ip", "method", "path", "moduleName", "fnName",
            "parentId",
        ];
        self.data
            .iter()
            .filter(|(k, _)| {
                !METADATA.contains(&k.as_str())
                    && !except.contains(&k.as_str())
                    && !k.starts_with("__")
                    && !k.starts_with('_')
            })
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect()
    }
}

/// `school_admin` identities may only touch records of their own school.
pub fn ensure_school_scope(user: &AuthUser, school_id: &str, message: &str) -> Result<(), ApiError> {
    if user.is_school_admin() && user.school_id.as_deref() != Some(school_id) {
        return Err(ApiError::forbidden(message));
    }
    Ok(())
}

pub fn doc_str<'a>(doc: &'a Document, key: &str) -> Option<&'a str> {
    doc.get(key).and_then(Value::as_str)
}

pub fn doc_id(doc: &Document) -> String {
    doc_str(doc, "_id").unwrap_or_default().to_string()
}

/// Orders documents by a string field; missing values sort first.
pub fn sort_by_field(docs: &mut [Document], key: &str) {
    docs.sort_by(|a, b| doc_str(a, key).cmp(&doc_str(b, key)));
}

pub fn documents(docs: Vec<Document>) -> Value {
    Value::Array(docs.into_iter().map(Value::Object).collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_typed_reads() {
        let p = Payload::new(json!({
            "name": "  ",
            "capacity": "25",
            "isActive": "false",
            "grade": 5,
            "list": [1, 2],
        }));
        assert_eq!(p.str("name"), None);
        assert_eq!(p.int("capacity"), Some(25));
        assert_eq!(p.int("grade"), Some(5));
        assert_eq!(p.flag("isActive"), Some(false));
        assert_eq!(p.array("list").map(Vec::len), Some(2));
        assert!(p.get("missing").is_none());
    }

    #[test]
    fn test_object_id_and_user() {
        let p = Payload::new(json!({ "id": "nope", "user": null }));
        assert_eq!(
            p.object_id("id", "Invalid school ID format").unwrap_err().message(),
            "Invalid school ID format"
        );
        assert_eq!(p.user().unwrap_err().status_code(), 401);
    }

    #[test]
    fn test_updates_strip_metadata() {
        let p = Payload::new(json!({
            "id": "x", "user": {}, "headers": {}, "__auth": {}, "_id": "y",
            "name": "New", "capacity": 10
        }));
        let updates = p.updates(&["capacity"]);
        assert_eq!(updates.len(), 1);
        assert_eq!(updates["name"], "New");
    }

    #[test]
    fn test_scope() {
        let admin = AuthUser {
            id: "u".into(),
            user_id: "u".into(),
            email: "a@b.co".into(),
            role: "school_admin".into(),
            school_id: Some("s1".into()),
            permissions: vec![],
        };
        assert!(ensure_school_scope(&admin, "s1", "no").is_ok());
        assert_eq!(ensure_school_scope(&admin, "s2", "no").unwrap_err().status_code(), 403);

        let root = AuthUser {
            role: "superadmin".into(),
            school_id: None,
            ..admin
        };
        assert!(ensure_school_scope(&root, "s2", "no").is_ok());
    }
}
