#![allow(dead_code)]

use std::net::SocketAddr;

use anyhow::{Context, Result};
use reqwest::{Method, StatusCode};
use serde_json::{json, Value};

use school_api::config::AppConfig;
use school_api::loader::boot;

pub const PASSWORD: &str = "secret123";

/// In-memory store, cheapest bcrypt cost, no rate limiting.
pub fn test_config() -> AppConfig {
    let mut config = AppConfig::development();
    config.security.bcrypt_cost = 4;
    config.api.enable_request_logging = false;
    config
}

/// One booted application per test, listening on a free local port.
pub struct TestServer {
    pub base_url: String,
    client: reqwest::Client,
}

pub struct Response {
    pub status: StatusCode,
    pub headers: reqwest::header::HeaderMap,
    pub body: Value,
}

impl Response {
    pub fn data(&self) -> &Value {
        &self.body["data"]
    }

    pub fn error(&self) -> &str {
        self.body["error"].as_str().unwrap_or_default()
    }
}

impl TestServer {
    pub async fn start() -> Result<Self> {
        Self::with_config(test_config()).await
    }

    pub async fn with_config(config: AppConfig) -> Result<Self> {
        let port = portpicker::pick_unused_port().context("failed to pick free port")?;
        let app = boot(config).await.context("boot failed")?;
        let router = app.into_router();

        // Bound before returning, so requests never race the listener
        let listener = tokio::net::TcpListener::bind(("127.0.0.1", port))
            .await
            .context("failed to bind test listener")?;
        tokio::spawn(async move {
            let _ = axum::serve(
                listener,
                router.into_make_service_with_connect_info::<SocketAddr>(),
            )
            .await;
        });

        Ok(Self {
            base_url: format!("http://127.0.0.1:{}", port),
            client: reqwest::Client::new(),
        })
    }

    pub async fn request(
        &self,
        method: Method,
        path: &str,
        token: Option<&str>,
        body: Option<Value>,
    ) -> Result<Response> {
        self.request_with_headers(method, path, token, &[], body).await
    }

    pub async fn request_with_headers(
        &self,
        method: Method,
        path: &str,
        token: Option<&str>,
        headers: &[(&str, &str)],
        body: Option<Value>,
    ) -> Result<Response> {
        let mut req = self.client.request(method, format!("{}{}", self.base_url, path));
        if let Some(token) = token {
            req = req.bearer_auth(token);
        }
        for (name, value) in headers {
            req = req.header(*name, *value);
        }
        if let Some(body) = body {
            req = req.json(&body);
        }

        let resp = req.send().await?;
        let status = resp.status();
        let headers = resp.headers().clone();
        let text = resp.text().await?;
        let body = if text.is_empty() {
            Value::Null
        } else {
            serde_json::from_str(&text).with_context(|| format!("non-JSON body: {}", text))?
        };
        Ok(Response { status, headers, body })
    }

    pub async fn get(&self, path: &str, token: Option<&str>) -> Result<Response> {
        self.request(Method::GET, path, token, None).await
    }

    pub async fn post(&self, path: &str, token: Option<&str>, body: Value) -> Result<Response> {
        self.request(Method::POST, path, token, Some(body)).await
    }

    pub async fn put(&self, path: &str, token: Option<&str>, body: Value) -> Result<Response> {
        self.request(Method::PUT, path, token, Some(body)).await
    }

    pub async fn patch(&self, path: &str, token: Option<&str>, body: Value) -> Result<Response> {
        self.request(Method::PATCH, path, token, Some(body)).await
    }

    pub async fn delete(&self, path: &str, token: Option<&str>) -> Result<Response> {
        self.request(Method::DELETE, path, token, None).await
    }

    /// Registers a superadmin and returns its token.
    pub async fn superadmin(&self, email: &str) -> Result<String> {
        let resp = self
            .post(
                "/api/auth/register",
                None,
                json!({ "email": email, "password": PASSWORD, "name": "Root", "role": "superadmin" }),
            )
            .await?;
        anyhow::ensure!(resp.status == StatusCode::CREATED, "register failed: {}", resp.body);
        token_of(&resp)
    }

    /// Registers a school administrator bound to `school_id`.
    pub async fn school_admin(&self, email: &str, school_id: &str) -> Result<String> {
        let resp = self
            .post(
                "/api/auth/register",
                None,
                json!({ "email": email, "password": PASSWORD, "name": "Admin", "schoolId": school_id }),
            )
            .await?;
        anyhow::ensure!(resp.status == StatusCode::CREATED, "register failed: {}", resp.body);
        token_of(&resp)
    }

    /// Creates a school as `token` and returns its id.
    pub async fn school(&self, token: &str, name: &str) -> Result<String> {
        let resp = self.post("/api/schools", Some(token), json!({ "name": name })).await?;
        anyhow::ensure!(resp.status == StatusCode::CREATED, "school create failed: {}", resp.body);
        id_of(resp.data())
    }

    /// Creates a classroom in `school_id` and returns its id.
    pub async fn classroom(&self, token: &str, school_id: &str, name: &str, capacity: i64) -> Result<String> {
        let resp = self
            .post(
                &format!("/api/schools/{}/classrooms", school_id),
                Some(token),
                json!({ "name": name, "capacity": capacity }),
            )
            .await?;
        anyhow::ensure!(resp.status == StatusCode::CREATED, "classroom create failed: {}", resp.body);
        id_of(resp.data())
    }
}

pub fn token_of(resp: &Response) -> Result<String> {
    resp.data()["token"]
        .as_str()
        .map(str::to_string)
        .context("response carries no token")
}

pub fn id_of(doc: &Value) -> Result<String> {
    doc["_id"].as_str().map(str::to_string).context("document has no _id")
}
