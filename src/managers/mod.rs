pub mod auth;
pub mod classroom;
pub mod payload;
pub mod school;
pub mod student;

use axum::http::Method;
use futures::future::BoxFuture;
use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::future::Future;
use std::sync::Arc;

use crate::database::{filter, Model, Role, StoreError};
use crate::error::{ApiError, BootError};
use crate::middleware::response::ResponseHandle;

pub use payload::Payload;

pub type HandlerResult = Result<Value, ApiError>;

/// A manager operation: `(data, response) -> result`. `Value::Null` means
/// "no result" (a DELETE then answers 204).
pub type Handler = Arc<dyn Fn(Value, ResponseHandle) -> BoxFuture<'static, HandlerResult> + Send + Sync>;

pub fn handler<F, Fut>(f: F) -> Handler
where
    F: Fn(Value, ResponseHandle) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = HandlerResult> + Send + 'static,
{
    Arc::new(move |data, res| Box::pin(f(data, res)))
}

/// How an entity's `delete` operation removes records
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeletionPolicy {
    /// Flip `isActive` to false and keep the record
    Soft,
    /// Remove the record from the store
    Hard,
}

impl DeletionPolicy {
    /// `false` when the id is unknown.
    pub async fn apply(self, model: &Model, id: &str) -> Result<bool, StoreError> {
        match self {
            DeletionPolicy::Soft => Ok(model
                .update(id, filter(json!({ "isActive": false })))
                .await?
                .is_some()),
            DeletionPolicy::Hard => model.delete(id).await,
        }
    }
}

/// Declares that one operation is reachable through the generic dispatcher.
#[derive(Debug, Clone, PartialEq)]
pub struct Exposure {
    pub method: Method,
    pub function: String,
    /// Repository identifiers (`__name` or `__group.member`), run in order
    pub middleware: Vec<String>,
    /// When non-empty, a role guard runs after `middleware`
    pub roles: Vec<Role>,
}

impl Exposure {
    pub fn new(method: Method, function: impl Into<String>) -> Self {
        Self {
            method,
            function: function.into(),
            middleware: Vec::new(),
            roles: Vec::new(),
        }
    }

    pub fn get(function: impl Into<String>) -> Self {
        Self::new(Method::GET, function)
    }

    pub fn post(function: impl Into<String>) -> Self {
        Self::new(Method::POST, function)
    }

    pub fn with(mut self, identifier: impl Into<String>) -> Self {
        self.middleware.push(identifier.into());
        self
    }

    pub fn roles(mut self, roles: &[Role]) -> Self {
        self.roles = roles.to_vec();
        self
    }

    /// Parses `"get=list"`; a bare `"list"` means POST.
    pub fn parse(declaration: &str) -> Option<Self> {
        let (method, function) = match declaration.split_once('=') {
            Some((method, function)) => (method.trim(), function.trim()),
            None => ("post", declaration.trim()),
        };
        if function.is_empty() || !function.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
            return None;
        }
        let method = match method.to_ascii_lowercase().as_str() {
            "get" => Method::GET,
            "post" => Method::POST,
            "put" => Method::PUT,
            "patch" => Method::PATCH,
            "delete" => Method::DELETE,
            _ => return None,
        };
        Some(Self::new(method, function))
    }
}

/// A named bundle of operations plus its dispatcher exposure table.
pub struct Manager {
    name: String,
    operations: BTreeMap<String, Handler>,
    exposed: Vec<Exposure>,
    invalid_exposures: Vec<String>,
    deletion: Option<DeletionPolicy>,
}

impl Manager {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            operations: BTreeMap::new(),
            exposed: Vec::new(),
            invalid_exposures: Vec::new(),
            deletion: None,
        }
    }

    pub fn operation<F, Fut>(mut self, name: &str, f: F) -> Self
    where
        F: Fn(Value, ResponseHandle) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = HandlerResult> + Send + 'static,
    {
        self.operations.insert(name.to_string(), handler(f));
        self
    }

    /// Registers an operation backed by shared state, e.g. `SchoolService::list`.
    pub fn bind<S, F, Fut>(self, name: &str, state: &Arc<S>, f: F) -> Self
    where
        S: Send + Sync + 'static,
        F: Fn(Arc<S>, Value, ResponseHandle) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = HandlerResult> + Send + 'static,
    {
        let state = state.clone();
        self.operation(name, move |data, res| f(state.clone(), data, res))
    }

    pub fn expose(mut self, exposure: Exposure) -> Self {
        self.exposed.push(exposure);
        self
    }

    /// String form of [`Manager::expose`]; malformed declarations fail boot.
    pub fn expose_decl(mut self, declaration: &str) -> Self {
        match Exposure::parse(declaration) {
            Some(exposure) => self.exposed.push(exposure),
            None => self.invalid_exposures.push(declaration.to_string()),
        }
        self
    }

    pub fn deletion_policy(mut self, policy: DeletionPolicy) -> Self {
        self.deletion = Some(policy);
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// `None` when the manager has no such operation.
    pub fn handler(&self, operation: &str) -> Option<Handler> {
        self.operations.get(operation).cloned()
    }

    pub fn has_operation(&self, operation: &str) -> bool {
        self.operations.contains_key(operation)
    }

    pub fn operation_names(&self) -> impl Iterator<Item = &str> {
        self.operations.keys().map(String::as_str)
    }

    pub fn exposed(&self) -> &[Exposure] {
        &self.exposed
    }

    pub fn invalid_exposures(&self) -> &[String] {
        &self.invalid_exposures
    }

    pub fn deletion(&self) -> Option<DeletionPolicy> {
        self.deletion
    }
}

impl std::fmt::Debug for Manager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Manager")
            .field("name", &self.name)
            .field("operations", &self.operations.keys().collect::<Vec<_>>())
            .field("exposed", &self.exposed)
            .finish()
    }
}

/// Builds one manager from the boot-time context.
pub type ManagerBuilder = fn(&crate::loader::Injectable) -> Manager;

/// All managers by name. Frozen behind an `Arc` once boot finishes building it.
#[derive(Debug, Default)]
pub struct ManagerRegistry {
    managers: BTreeMap<String, Arc<Manager>>,
}

impl ManagerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, manager: Manager) -> Result<(), BootError> {
        let name = manager.name().to_string();
        if self.managers.contains_key(&name) {
            return Err(BootError::DuplicateManager(name));
        }
        tracing::debug!("Registered manager {}", name);
        self.managers.insert(name, Arc::new(manager));
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<&Arc<Manager>> {
        self.managers.get(name)
    }

    pub fn handler(&self, module: &str, operation: &str) -> Option<Handler> {
        self.get(module)?.handler(operation)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Arc<Manager>> {
        self.managers.values()
    }

    pub fn len(&self) -> usize {
        self.managers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.managers.is_empty()
    }

    pub fn describe(&self) -> Value {
        let managers: Vec<Value> = self
            .iter()
            .map(|m| {
                json!({
                    "name": m.name(),
                    "operations": m.operation_names().collect::<Vec<_>>(),
                    "exposed": m.exposed().iter().map(|e| json!({
                        "method": e.method.as_str(),
                        "function": e.function,
                        "middleware": e.middleware,
                        "roles": e.roles,
                    })).collect::<Vec<_>>(),
                })
            })
            .collect();
        json!({ "count": managers.len(), "managers": managers })
    }
}
