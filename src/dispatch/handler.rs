use axum::http::{Method, StatusCode};
use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, error};

use super::bolt::{Bolt, Completion};
use super::capability::CapabilityRegistry;
use super::context::RequestContext;
use super::repository::MiddlewareRepository;
use crate::error::ApiError;
use crate::managers::{Handler, ManagerRegistry};
use crate::middleware::response::{Reply, ResponseHandle};
use crate::middleware::role_check::RoleGuard;

pub const MODULE_PARAM: &str = "moduleName";
pub const FUNCTION_PARAM: &str = "fnName";

/// Success status for a handler result: POST answers 201, a DELETE with no
/// result answers 204 with an empty body, everything else 200.
pub fn success_reply(method: &Method, result: Value) -> Reply {
    if *method == Method::DELETE && result.is_null() {
        return Reply::no_content();
    }
    let status = if *method == Method::POST {
        StatusCode::CREATED
    } else {
        StatusCode::OK
    };
    Reply::success(status, result)
}

/// Non-empty `errors` value. An empty list means nothing failed.
fn is_collection(errors: &Value) -> bool {
    match errors {
        Value::Array(items) => !items.is_empty(),
        Value::Object(map) => !map.is_empty(),
        Value::Null => false,
        _ => true,
    }
}

/// Turns a handler's result into the reply, in priority order: already sent
/// (or `selfHandleResponse`), an `errors` collection, an `error` string, success.
pub fn settle(res: &ResponseHandle, method: &Method, result: Value) {
    if res.headers_sent() {
        return;
    }

    if let Value::Object(map) = &result {
        if map.get("selfHandleResponse").and_then(Value::as_bool) == Some(true) {
            return;
        }
        if let Some(errors) = map.get("errors").filter(|e| is_collection(e)) {
            res.send(Reply::failures(StatusCode::BAD_REQUEST, errors.clone()));
            return;
        }
        if let Some(Value::String(message)) = map.get("error") {
            res.send(Reply::failure(StatusCode::BAD_REQUEST, message.clone()));
            return;
        }
    }

    res.send(success_reply(method, result));
}

/// Generic `/api/:moduleName/:fnName` entry point.
pub struct Dispatcher {
    capabilities: Arc<CapabilityRegistry>,
    repository: Arc<MiddlewareRepository>,
    managers: Arc<ManagerRegistry>,
    mask_errors: bool,
}

impl Dispatcher {
    pub fn new(
        capabilities: Arc<CapabilityRegistry>,
        repository: Arc<MiddlewareRepository>,
        managers: Arc<ManagerRegistry>,
        mask_errors: bool,
    ) -> Self {
        Self {
            capabilities,
            repository,
            managers,
            mask_errors,
        }
    }

    pub fn capabilities(&self) -> &CapabilityRegistry {
        &self.capabilities
    }

    /// Resolves, runs the middleware chain and invokes the target operation.
    /// Every path leaves exactly one reply in `res`.
    pub async fn dispatch(&self, ctx: RequestContext, res: ResponseHandle) {
        let (module, function) = match (ctx.param(MODULE_PARAM), ctx.param(FUNCTION_PARAM)) {
            (Some(m), Some(f)) if !m.is_empty() && !f.is_empty() => (m.to_string(), f.to_string()),
            _ => {
                res.error(&ApiError::bad_request("Invalid route resolution"));
                return;
            }
        };

        let capability = match self.capabilities.resolve(&module, &ctx.method, &function) {
            Ok(capability) => capability,
            Err(err) => {
                debug!("Dispatch to {}.{} refused: {}", module, function, err);
                res.error(&ApiError::not_found(err.to_string()));
                return;
            }
        };

        let Some(handler) = self.managers.handler(&module, &function) else {
            res.error(&ApiError::not_found(format!("{}.{} is not available", module, function)));
            return;
        };

        let roles = capability.roles.to_vec();
        let mask = self.mask_errors;
        let target = format!("{}.{}", module, function);
        let chain = Bolt::new(
            &self.repository,
            self.managers.clone(),
            capability.stack,
            ctx,
            res.clone(),
            move |done| invoke(handler, function, done, mask),
        );

        let chain = match chain {
            Ok(chain) if roles.is_empty() => chain,
            Ok(chain) => chain.push(RoleGuard::link(&roles)),
            Err(err) => {
                error!("Cannot build chain for {}: {}", target, err);
                res.error(&ApiError::from(err));
                return;
            }
        };

        match chain.on_error(|err, res| {
            res.error(&err);
        })
        .run()
        .await
        {
            Ok(outcome) => debug!("Dispatched {}: {:?}", target, outcome),
            Err(err) => {
                error!("Dispatch of {} failed: {}", target, err);
                res.error(&ApiError::from(err));
            }
        }
    }
}

async fn invoke(handler: Handler, function: String, done: Completion, mask: bool) {
    let Completion { ctx, res, results } = done;
    let data = Value::Object(ctx.dispatch_data(&results));

    match handler(data, res.clone()).await {
        Ok(result) => settle(&res, &ctx.method, result),
        Err(err) => {
            error!("{} failed: {}", function, err);
            if res.headers_sent() {
                return;
            }
            if mask {
                res.error(&ApiError::internal_server_error(format!("{} failed to execute", function)));
            } else {
                res.error(&err);
            }
        }
    }
}
