use async_trait::async_trait;
use serde_json::{Map, Value};
use std::sync::Arc;

use crate::dispatch::repository::MiddlewareEntry;
use crate::dispatch::traits::{Flow, Middleware, Step};
use crate::error::{ApiError, BootError};
use crate::loader::Injectable;

/// `__sanitize`: scrubs client input before any handler sees it.
///
/// Object keys lose a leading `$` and every `.` (both become `_`), so input
/// can never smuggle query operators or dotted paths into a store filter.
/// String values have `<` escaped. Applies to query, body and path params,
/// recursively. Repeated query parameters already collapse to the last value
/// when the query string is parsed.
pub struct Sanitize;

fn clean_key(key: &str) -> Option<String> {
    if !key.starts_with('$') && !key.contains('.') {
        return None;
    }
    let mut out = key.replace('.', "_");
    if out.starts_with('$') {
        out.replace_range(..1, "_");
    }
    Some(out)
}

fn clean_string(value: &mut String) {
    if value.contains('<') {
        *value = value.replace('<', "&lt;");
    }
}

/// Records every rewritten key in `renamed`.
fn clean_value(value: &mut Value, renamed: &mut Vec<String>) {
    match value {
        Value::String(s) => clean_string(s),
        Value::Array(items) => {
            for item in items {
                clean_value(item, renamed);
            }
        }
        Value::Object(map) => clean_map(map, renamed),
        _ => {}
    }
}

fn clean_map(map: &mut Map<String, Value>, renamed: &mut Vec<String>) {
    let entries = std::mem::take(map);
    for (key, mut value) in entries {
        clean_value(&mut value, renamed);
        match clean_key(&key) {
            Some(safe) => {
                renamed.push(key);
                map.insert(safe, value);
            }
            None => {
                map.insert(key, value);
            }
        }
    }
}

#[async_trait]
impl Middleware for Sanitize {
    async fn handle(&self, step: Step<'_>) -> Result<Flow, ApiError> {
        let mut renamed = Vec::new();
        clean_map(&mut step.ctx.query, &mut renamed);
        clean_map(&mut step.ctx.body, &mut renamed);
        clean_map(&mut step.ctx.params, &mut renamed);

        for key in &renamed {
            tracing::warn!("Operator injection attempt on {} {}: {}", step.ctx.method, step.ctx.path, key);
        }
        Ok(Flow::next())
    }
}

pub fn build(_injectable: &Injectable) -> Result<MiddlewareEntry, BootError> {
    Ok(MiddlewareEntry::Single(Arc::new(Sanitize)))
}
