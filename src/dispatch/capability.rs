use axum::http::Method;
use serde_json::{json, Value};
use std::collections::{BTreeMap, HashMap};
use tracing::{debug, info};

use super::error::ResolveError;
use super::repository::MiddlewareRepository;
use crate::database::Role;
use crate::error::BootError;
use crate::managers::ManagerRegistry;

/// Reserved prefix for middleware identifiers
pub const MIDDLEWARE_PREFIX: &str = "__";

/// What the dispatcher needs to run one exposed operation.
#[derive(Debug, Clone, Copy)]
pub struct Capability<'a> {
    pub stack: &'a [String],
    pub roles: &'a [Role],
}

/// Which (module, method, function) triples the dispatcher may invoke and
/// which middleware each one requires. Built once at boot and read-only after.
#[derive(Debug, Default)]
pub struct CapabilityRegistry {
    /// module -> method -> functions, in declaration order
    matrix: BTreeMap<String, HashMap<Method, Vec<String>>>,
    /// "module.function" -> middleware identifiers
    stacks: HashMap<String, Vec<String>>,
    roles: HashMap<String, Vec<Role>>,
}

fn stack_key(module: &str, function: &str) -> String {
    format!("{}.{}", module, function)
}

impl CapabilityRegistry {
    /// Fails fast on malformed declarations and on any middleware the
    /// repository cannot resolve.
    pub fn build(managers: &ManagerRegistry, repository: &MiddlewareRepository) -> Result<Self, BootError> {
        let mut registry = Self::default();

        for manager in managers.iter() {
            let module = manager.name();

            if let Some(declaration) = manager.invalid_exposures().first() {
                return Err(BootError::InvalidExposure {
                    module: module.to_string(),
                    declaration: declaration.clone(),
                });
            }

            for exposure in manager.exposed() {
                let function = exposure.function.as_str();
                if !manager.has_operation(function) {
                    return Err(BootError::UnknownOperation {
                        module: module.to_string(),
                        function: function.to_string(),
                    });
                }

                for identifier in &exposure.middleware {
                    if !identifier.starts_with(MIDDLEWARE_PREFIX) {
                        return Err(BootError::InvalidIdentifier {
                            module: module.to_string(),
                            function: function.to_string(),
                            identifier: identifier.clone(),
                        });
                    }
                    if !repository.contains(identifier) {
                        return Err(BootError::MissingMiddleware {
                            module: module.to_string(),
                            function: function.to_string(),
                            identifier: identifier.clone(),
                        });
                    }
                }

                let functions = registry
                    .matrix
                    .entry(module.to_string())
                    .or_default()
                    .entry(exposure.method.clone())
                    .or_default();
                if !functions.iter().any(|f| f == function) {
                    functions.push(function.to_string());
                }

                // A function exposed on several methods shares one stack.
                let key = stack_key(module, function);
                let stack = registry.stacks.entry(key.clone()).or_default();
                for identifier in &exposure.middleware {
                    if !stack.contains(identifier) {
                        stack.push(identifier.clone());
                    }
                }
                if !exposure.roles.is_empty() {
                    registry.roles.insert(key, exposure.roles.clone());
                }

                debug!(
                    "Exposed {} {}.{} with {:?}",
                    exposure.method, module, function, exposure.middleware
                );
            }
        }

        info!(
            "Capability registry built: {} modules, {} operations",
            registry.matrix.len(),
            registry.stacks.len()
        );
        Ok(registry)
    }

    pub fn resolve(&self, module: &str, method: &Method, function: &str) -> Result<Capability<'_>, ResolveError> {
        let methods = self
            .matrix
            .get(module)
            .ok_or_else(|| ResolveError::ModuleNotFound(module.to_string()))?;

        let method_name = method.as_str().to_ascii_lowercase();
        let functions = methods.get(method).ok_or_else(|| ResolveError::UnsupportedMethod {
            method: method_name.clone(),
            module: module.to_string(),
        })?;

        if !functions.iter().any(|f| f == function) {
            return Err(ResolveError::FunctionNotFound {
                function: function.to_string(),
                method: method_name,
            });
        }

        let key = stack_key(module, function);
        Ok(Capability {
            stack: self.stacks.get(&key).map(Vec::as_slice).unwrap_or(&[]),
            roles: self.roles.get(&key).map(Vec::as_slice).unwrap_or(&[]),
        })
    }

    pub fn is_exposed(&self, module: &str, method: &Method, function: &str) -> bool {
        self.resolve(module, method, function).is_ok()
    }

    pub fn describe(&self) -> Value {
        let mut modules = serde_json::Map::new();
        for (module, methods) in &self.matrix {
            let mut by_method = serde_json::Map::new();
            for (method, functions) in methods {
                let entries: Vec<Value> = functions
                    .iter()
                    .map(|f| {
                        let key = stack_key(module, f);
                        json!({
                            "function": f,
                            "middleware": self.stacks.get(&key).cloned().unwrap_or_default(),
                            "roles": self.roles.get(&key).cloned().unwrap_or_default(),
                        })
                    })
                    .collect();
                by_method.insert(method.as_str().to_ascii_lowercase(), Value::Array(entries));
            }
            modules.insert(module.clone(), Value::Object(by_method));
        }
        Value::Object(modules)
    }
}
