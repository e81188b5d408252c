use async_trait::async_trait;
use serde_json::{Map, Value};
use std::sync::Arc;

use super::context::RequestContext;
use crate::error::ApiError;
use crate::managers::ManagerRegistry;
use crate::middleware::response::ResponseHandle;

/// Named results contributed by the middleware of one chain, keyed by identifier.
pub type Contributions = Map<String, Value>;

/// What a middleware decided.
#[derive(Debug, Clone, PartialEq)]
pub enum Flow {
    /// Continue; `Some` is recorded under the middleware's identifier.
    Next(Option<Value>),
    /// Stop the chain. The middleware has already sent the response.
    Halt,
}

impl Flow {
    pub fn next() -> Self {
        Flow::Next(None)
    }

    pub fn contribute(value: Value) -> Self {
        Flow::Next(Some(value))
    }
}

/// Borrowed view handed to each middleware as the chain advances.
pub struct Step<'a> {
    pub ctx: &'a mut RequestContext,
    pub res: &'a ResponseHandle,
    pub results: &'a Contributions,
    pub managers: &'a ManagerRegistry,
}

impl Step<'_> {
    /// Sends `err` as the response and stops the chain.
    pub fn halt_with(&self, err: &ApiError) -> Flow {
        self.res.error(err);
        Flow::Halt
    }
}

/// One unit of request preprocessing.
///
/// Returning `Err` aborts the chain; the chain's error callback (if any)
/// decides what reaches the client.
#[async_trait]
pub trait Middleware: Send + Sync {
    async fn handle(&self, step: Step<'_>) -> Result<Flow, ApiError>;
}

pub type MiddlewareBox = Arc<dyn Middleware>;

/// A middleware resolved for a specific chain, with the name its result is stored under.
#[derive(Clone)]
pub struct Link {
    pub name: String,
    pub middleware: MiddlewareBox,
}

impl Link {
    pub fn new(name: impl Into<String>, middleware: MiddlewareBox) -> Self {
        Self {
            name: name.into(),
            middleware,
        }
    }
}

impl std::fmt::Debug for Link {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Link").field("name", &self.name).finish()
    }
}
