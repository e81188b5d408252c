use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::auth::{AuthError, Claims, RevocationStore, TokenService, ACCESS_TOKEN};
use crate::database::Role;
use crate::dispatch::repository::MiddlewareEntry;
use crate::dispatch::traits::{Flow, Middleware, Step};
use crate::error::{ApiError, BootError};
use crate::loader::Injectable;

/// Authenticated identity extracted from a verified access token
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthUser {
    pub id: String,
    pub user_id: String,
    pub email: String,
    pub role: String,
    #[serde(default)]
    pub school_id: Option<String>,
    #[serde(default)]
    pub permissions: Vec<String>,
}

impl From<Claims> for AuthUser {
    fn from(claims: Claims) -> Self {
        Self {
            id: claims.user_id.clone(),
            user_id: claims.user_id,
            email: claims.email,
            role: claims.role,
            school_id: claims.school_id,
            permissions: claims.permissions,
        }
    }
}

impl AuthUser {
    pub fn role(&self) -> Option<Role> {
        Role::parse(&self.role)
    }

    pub fn is_school_admin(&self) -> bool {
        self.role() == Some(Role::SchoolAdmin)
    }
}

/// Bearer token from an `Authorization` header value.
pub fn bearer_token(header: &str) -> Result<&str, &'static str> {
    let token = header
        .strip_prefix("Bearer ")
        .ok_or("Invalid authorization format. Use Bearer token.")?;
    match token.split(' ').next() {
        Some(token) if !token.is_empty() => Ok(token),
        _ => Err("Authentication required. Token missing."),
    }
}

/// `__auth`: verifies the bearer token and attaches the identity.
pub struct AuthMiddleware {
    tokens: Arc<TokenService>,
    revocations: Arc<dyn RevocationStore>,
}

impl AuthMiddleware {
    pub fn new(tokens: Arc<TokenService>, revocations: Arc<dyn RevocationStore>) -> Self {
        Self { tokens, revocations }
    }

    async fn authenticate(&self, header: Option<&str>) -> Result<AuthUser, ApiError> {
        let header = header.ok_or_else(|| {
            ApiError::unauthorized("Authentication required. No authorization header provided.")
        })?;
        let token = bearer_token(header).map_err(ApiError::unauthorized)?;

        if self.revocations.is_revoked(token).await {
            return Err(ApiError::unauthorized("Token has been revoked. Please login again."));
        }

        let claims = self.tokens.verify(token).map_err(|e| {
            tracing::debug!("Token rejected: {}", e);
            match e {
                AuthError::Expired => ApiError::unauthorized("Token expired"),
                _ => ApiError::unauthorized("Invalid token"),
            }
        })?;

        if claims.token_type.as_deref().is_some_and(|t| t != ACCESS_TOKEN) {
            return Err(ApiError::unauthorized("Invalid token type. Access token required."));
        }

        Ok(AuthUser::from(claims))
    }
}

#[async_trait]
impl Middleware for AuthMiddleware {
    async fn handle(&self, step: Step<'_>) -> Result<Flow, ApiError> {
        let header = step.ctx.header("authorization").map(str::to_string);
        match self.authenticate(header.as_deref()).await {
            Ok(user) => {
                let contribution = serde_json::to_value(&user)
                    .map_err(|_| ApiError::internal_server_error("Authentication failed"))?;
                step.ctx.user = Some(user);
                Ok(Flow::contribute(contribution))
            }
            Err(err) => Ok(step.halt_with(&err)),
        }
    }
}

pub fn build(injectable: &Injectable) -> Result<MiddlewareEntry, BootError> {
    Ok(MiddlewareEntry::Single(Arc::new(AuthMiddleware::new(
        injectable.tokens.clone(),
        injectable.revocations.clone(),
    ))))
}
