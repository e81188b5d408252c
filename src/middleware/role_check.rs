use async_trait::async_trait;
use std::sync::Arc;

use crate::database::Role;
use crate::dispatch::traits::{Flow, Link, Middleware, Step};
use crate::error::ApiError;

/// Name the guard runs under inside a chain
pub const ROLE_CHECK: &str = "roleCheck";

/// Parameterised role check. Runs after `__auth`.
pub struct RoleGuard {
    roles: Vec<Role>,
}

impl RoleGuard {
    pub fn new(roles: &[Role]) -> Self {
        Self {
            roles: roles.to_vec(),
        }
    }

    pub fn link(roles: &[Role]) -> Link {
        Link::new(ROLE_CHECK, Arc::new(Self::new(roles)))
    }

    fn check(&self, step: &Step<'_>) -> Result<(), ApiError> {
        let user = step
            .ctx
            .user
            .as_ref()
            .ok_or_else(|| ApiError::unauthorized("Authentication required"))?;

        if user.role.is_empty() {
            return Err(ApiError::forbidden("User role not defined"));
        }

        if !self.roles.iter().any(|r| r.as_str() == user.role) {
            let required: Vec<&str> = self.roles.iter().map(Role::as_str).collect();
            return Err(ApiError::forbidden(format!(
                "Access denied. Required role(s): {}",
                required.join(" or ")
            )));
        }

        if user.is_school_admin() && user.school_id.as_deref().map_or(true, str::is_empty) {
            return Err(ApiError::forbidden("School admin must have a school ID"));
        }

        Ok(())
    }
}

#[async_trait]
impl Middleware for RoleGuard {
    async fn handle(&self, step: Step<'_>) -> Result<Flow, ApiError> {
        match self.check(&step) {
            Ok(()) => Ok(Flow::next()),
            Err(err) => Ok(step.halt_with(&err)),
        }
    }
}
