use thiserror::Error;

use crate::error::ApiError;

/// Failures raised while running a middleware chain
#[derive(Debug, Error)]
pub enum ChainError {
    #[error("middleware {name} failed: {source}")]
    Middleware {
        name: String,
        #[source]
        source: ApiError,
    },

    #[error("unknown middleware {0}")]
    UnknownMiddleware(String),
}

/// Route resolution failures on the dispatcher path. The message is the
/// client-facing text.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ResolveError {
    #[error("module {0} not found")]
    ModuleNotFound(String),

    #[error("unsupported method {method} for {module}")]
    UnsupportedMethod { method: String, module: String },

    #[error("unable to find function {function} with method {method}")]
    FunctionNotFound { function: String, method: String },
}
