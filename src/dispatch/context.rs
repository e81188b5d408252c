use axum::http::{HeaderMap, HeaderValue, Method};
use serde_json::{Map, Value};

use crate::middleware::auth::AuthUser;

/// Everything a middleware chain and a handler may read about one request.
///
/// Middleware mutate it in place (`user`, `locals`) so later steps observe
/// what earlier steps attached.
#[derive(Debug, Clone)]
pub struct RequestContext {
    pub method: Method,
    pub path: String,
    pub headers: HeaderMap,
    pub query: Map<String, Value>,
    pub body: Map<String, Value>,
    /// Path parameters bound by the route pattern
    pub params: Map<String, Value>,
    /// Extra parameters attached by route-level middleware. They override
    /// query, body and path params in [`RequestContext::route_data`].
    pub route_params: Map<String, Value>,
    pub ip: Option<String>,
    pub user: Option<AuthUser>,
    /// Free-form attachments shared between middleware
    pub locals: Map<String, Value>,
}

impl RequestContext {
    pub fn new(method: Method, path: impl Into<String>) -> Self {
        Self {
            method,
            path: path.into(),
            headers: HeaderMap::new(),
            query: Map::new(),
            body: Map::new(),
            params: Map::new(),
            route_params: Map::new(),
            ip: None,
            user: None,
            locals: Map::new(),
        }
    }

    pub fn with_query(mut self, query: Map<String, Value>) -> Self {
        self.query = query;
        self
    }

    pub fn with_body(mut self, body: Map<String, Value>) -> Self {
        self.body = body;
        self
    }

    pub fn with_param(mut self, name: &str, value: impl Into<String>) -> Self {
        self.params.insert(name.to_string(), Value::String(value.into()));
        self
    }

    pub fn with_header(mut self, name: &'static str, value: &str) -> Self {
        if let Ok(value) = value.parse::<HeaderValue>() {
            self.headers.insert(name, value);
        }
        self
    }

    pub fn param(&self, name: &str) -> Option<&str> {
        self.params.get(name).and_then(Value::as_str)
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }

    /// Key used to bucket per-client state such as rate limits
    pub fn client_key(&self) -> String {
        self.ip.clone().unwrap_or_else(|| "unknown".to_string())
    }

    pub fn headers_json(&self) -> Value {
        let mut out = Map::new();
        for (name, value) in &self.headers {
            if let Ok(value) = value.to_str() {
                out.insert(name.as_str().to_string(), Value::String(value.to_string()));
            }
        }
        Value::Object(out)
    }

    fn user_json(&self) -> Value {
        self.user
            .as_ref()
            .and_then(|u| serde_json::to_value(u).ok())
            .unwrap_or(Value::Null)
    }

    /// Handler input for explicitly registered routes: query, body, path params
    /// and route params in that order (later keys win), then request metadata.
    /// Bodies are JSON only, so `file` and `files` are always null.
    pub fn route_data(&self) -> Map<String, Value> {
        let mut data = Map::new();
        for source in [&self.query, &self.body, &self.params, &self.route_params] {
            for (k, v) in source {
                data.insert(k.clone(), v.clone());
            }
        }
        data.insert("user".to_string(), self.user_json());
        data.insert("file".to_string(), Value::Null);
        data.insert("files".to_string(), Value::Null);
        data.insert("headers".to_string(), self.headers_json());
        data.insert(
            "ip".to_string(),
            self.ip.clone().map(Value::String).unwrap_or(Value::Null),
        );
        data.insert("method".to_string(), Value::String(self.method.to_string()));
        data.insert("path".to_string(), Value::String(self.path.clone()));
        data
    }

    /// Handler input on the dispatcher path: query (GET) or body (otherwise),
    /// then path params, then the chain's named results. `user` always
    /// reflects the authenticated identity, never client input.
    pub fn dispatch_data(&self, results: &Map<String, Value>) -> Map<String, Value> {
        let source = if self.method == Method::GET {
            &self.query
        } else {
            &self.body
        };
        let mut data = source.clone();
        for (k, v) in &self.params {
            data.insert(k.clone(), v.clone());
        }
        for (k, v) in results {
            data.insert(k.clone(), v.clone());
        }
        data.insert("user".to_string(), self.user_json());
        data
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn obj(v: Value) -> Map<String, Value> {
        v.as_object().cloned().unwrap_or_default()
    }

    #[test]
    fn test_route_data_precedence() {
        let ctx = RequestContext::new(Method::PUT, "/api/schools/abc")
            .with_query(obj(json!({"id": "from-query", "q": 1})))
            .with_body(obj(json!({"id": "from-body", "name": "N"})))
            .with_param("id", "from-path");
        let data = ctx.route_data();

        assert_eq!(data["id"], "from-path");
        assert_eq!(data["q"], 1);
        assert_eq!(data["name"], "N");
        assert_eq!(data["method"], "PUT");
        assert_eq!(data["path"], "/api/schools/abc");
        assert_eq!(data["user"], Value::Null);
        assert_eq!(data["file"], Value::Null);
        assert!(data.contains_key("files"));
    }

    #[test]
    fn test_route_params_override_path_params() {
        let mut ctx = RequestContext::new(Method::GET, "/api/schools/abc").with_param("id", "abc");
        ctx.route_params.insert("id".to_string(), json!("resolved"));
        ctx.route_params.insert("scope".to_string(), json!("school"));
        let data = ctx.route_data();
        assert_eq!(data["id"], "resolved");
        assert_eq!(data["scope"], "school");
    }

    #[test]
    fn test_dispatch_data_uses_query_for_get_only() {
        let results = obj(json!({"__requestId": "r-1"}));
        let get = RequestContext::new(Method::GET, "/api/school/list")
            .with_query(obj(json!({"isActive": "true"})))
            .with_body(obj(json!({"ignored": true})))
            .with_param("fnName", "list");
        let data = get.dispatch_data(&results);
        assert_eq!(data["isActive"], "true");
        assert!(data.get("ignored").is_none());
        assert_eq!(data["fnName"], "list");
        assert_eq!(data["__requestId"], "r-1");

        let post = RequestContext::new(Method::POST, "/api/auth/login")
            .with_query(obj(json!({"ignored": true})))
            .with_body(obj(json!({"email": "a@b.co"})));
        let data = post.dispatch_data(&Map::new());
        assert_eq!(data["email"], "a@b.co");
        assert!(data.get("ignored").is_none());
    }

    #[test]
    fn test_results_override_params() {
        let ctx = RequestContext::new(Method::POST, "/x").with_param("__auth", "spoofed");
        let data = ctx.dispatch_data(&obj(json!({"__auth": {"id": "real"}})));
        assert_eq!(data["__auth"]["id"], "real");
    }

    #[test]
    fn test_client_cannot_supply_user() {
        let ctx = RequestContext::new(Method::POST, "/api/school/create")
            .with_body(obj(json!({"user": {"role": "superadmin"}})));
        assert_eq!(ctx.dispatch_data(&Map::new())["user"], Value::Null);
        assert_eq!(ctx.route_data()["user"], Value::Null);
    }
}
