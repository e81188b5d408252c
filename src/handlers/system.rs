// handlers/system.rs - Service endpoints outside the entity routes
//
// GET /, /health and /api/test are public. The debug endpoints require a
// valid token and are only mounted outside production.

use axum::http::Method;
use chrono::Utc;
use once_cell::sync::OnceCell;
use serde_json::{json, Value};
use std::sync::Arc;

use crate::config::AppConfig;
use crate::database::Models;
use crate::dispatch::CapabilityRegistry;
use crate::error::ApiError;
use crate::managers::{handler, ManagerRegistry};
use crate::routing::RouteRegistry;

/// Everything the system endpoints report on.
pub struct SystemInfo {
    pub config: Arc<AppConfig>,
    pub models: Arc<Models>,
    pub managers: Arc<ManagerRegistry>,
    pub capabilities: Arc<CapabilityRegistry>,
    pub middleware: Vec<String>,
    /// Route table snapshot, filled once every route is registered
    pub routes: Arc<OnceCell<Value>>,
}

impl SystemInfo {
    fn route_count(&self) -> usize {
        self.routes
            .get()
            .and_then(Value::as_array)
            .map_or(0, Vec::len)
    }
}

fn environment(config: &AppConfig) -> Value {
    serde_json::to_value(config.environment).unwrap_or(Value::Null)
}

/// GET / - service description
pub async fn root(info: Arc<SystemInfo>) -> Result<Value, ApiError> {
    Ok(json!({
        "name": "School Management API",
        "version": env!("CARGO_PKG_VERSION"),
        "environment": environment(&info.config),
        "endpoints": {
            "auth": "/api/auth/* (register, login and refresh-token are public)",
            "schools": "/api/schools[/:id] (protected)",
            "classrooms": "/api/classrooms[/:id] (protected)",
            "students": "/api/students[/:id] (protected)",
            "dispatch": "/api/:moduleName/:fnName (exposed manager operations)",
            "health": "/health (public)",
        }
    }))
}

/// GET /health - 503 when the store does not answer
pub async fn health(info: Arc<SystemInfo>) -> Result<Value, ApiError> {
    let store = info.models.store();
    if let Err(err) = store.ping().await {
        tracing::error!("Health check failed: {}", err);
        return Err(ApiError::service_unavailable("Database unavailable"));
    }

    Ok(json!({
        "status": "healthy",
        "timestamp": Utc::now(),
        "env": environment(&info.config),
        "database": store.backend(),
    }))
}

/// GET /api/test
pub async fn api_test(info: Arc<SystemInfo>) -> Result<Value, ApiError> {
    Ok(json!({
        "message": "API test endpoint is working",
        "timestamp": Utc::now(),
        "env": environment(&info.config),
        "stats": {
            "managers": info.managers.len(),
            "routes": info.route_count(),
        }
    }))
}

/// GET /api/debug/routes
pub async fn debug_routes(info: Arc<SystemInfo>) -> Result<Value, ApiError> {
    let managers: Vec<&str> = info.managers.iter().map(|m| m.name()).collect();
    Ok(json!({
        "routes": info.routes.get().cloned().unwrap_or_else(|| json!([])),
        "managers": managers,
        "middleware": info.middleware,
    }))
}

/// GET /api/debug/managers - operations and the dispatcher's exposure table
pub async fn debug_managers(info: Arc<SystemInfo>) -> Result<Value, ApiError> {
    Ok(json!({
        "managers": info.managers.describe(),
        "exposed": info.capabilities.describe(),
    }))
}

macro_rules! endpoint {
    ($info:expr, $f:path) => {{
        let info = $info.clone();
        Some(handler(move |_data, _res| $f(info.clone())))
    }};
}

pub fn register_public(routes: &mut RouteRegistry, info: &Arc<SystemInfo>) {
    routes
        .public(Method::GET, "/", endpoint!(info, root))
        .public(Method::GET, "/health", endpoint!(info, health))
        .public(Method::GET, "/api/test", endpoint!(info, api_test));
}

/// No-op in production.
pub fn register_debug(routes: &mut RouteRegistry, info: &Arc<SystemInfo>) {
    if !info.config.debug_routes_enabled() {
        return;
    }
    routes
        .protected(Method::GET, "/api/debug/routes", endpoint!(info, debug_routes), &[])
        .protected(Method::GET, "/api/debug/managers", endpoint!(info, debug_managers), &[]);
}
