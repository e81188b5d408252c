use axum::http::Method;
use tracing::warn;

use crate::managers::ManagerRegistry;
use crate::routing::RouteRegistry;

pub fn register(routes: &mut RouteRegistry, managers: &ManagerRegistry) {
    let Some(auth) = managers.get("auth") else {
        warn!("Auth manager not found, skipping auth routes");
        return;
    };

    routes
        .custom(Method::POST, "/api/auth/register", auth.handler("register"), &["__rateLimit.auth"])
        .custom(Method::POST, "/api/auth/login", auth.handler("login"), &["__rateLimit.auth"])
        .public(Method::POST, "/api/auth/refresh-token", auth.handler("refreshToken"))
        .protected(Method::GET, "/api/auth/me", auth.handler("getCurrentUser"), &[])
        .protected(Method::POST, "/api/auth/logout", auth.handler("logout"), &[])
        .protected(
            Method::POST,
            "/api/auth/change-password",
            auth.handler("changePassword"),
            &[],
        );
}
