use async_trait::async_trait;
use serde_json::Value;
use std::sync::Arc;

use crate::dispatch::repository::MiddlewareEntry;
use crate::dispatch::traits::{Flow, Middleware, Step};
use crate::error::{ApiError, BootError};
use crate::loader::Injectable;

pub const REQUEST_ID_HEADER: &str = "x-request-id";

/// `__requestId`: reuses the caller's `x-request-id` or mints one, and
/// contributes it as a named result.
pub struct RequestId;

#[async_trait]
impl Middleware for RequestId {
    async fn handle(&self, step: Step<'_>) -> Result<Flow, ApiError> {
        let id = step
            .ctx
            .header(REQUEST_ID_HEADER)
            .filter(|v| !v.is_empty() && v.len() <= 128)
            .map(str::to_string)
            .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());

        step.ctx
            .locals
            .insert("requestId".to_string(), Value::String(id.clone()));
        Ok(Flow::contribute(Value::String(id)))
    }
}

pub fn build(_injectable: &Injectable) -> Result<MiddlewareEntry, BootError> {
    Ok(MiddlewareEntry::Single(Arc::new(RequestId)))
}
