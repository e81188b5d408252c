pub mod auth;
pub mod rate_limit;
pub mod request_id;
pub mod response;
pub mod role_check;
pub mod sanitize;

use crate::dispatch::repository::MiddlewareBuilder;

pub use auth::{AuthMiddleware, AuthUser};
pub use rate_limit::RateLimiter;
pub use response::{Reply, ResponseHandle};
pub use role_check::RoleGuard;

/// Middleware repository entries, built in this order at boot
pub const BUILDERS: &[(&str, MiddlewareBuilder)] = &[
    ("__auth", auth::build),
    ("__rateLimit", rate_limit::build),
    ("__requestId", request_id::build),
    ("__sanitize", sanitize::build),
];
