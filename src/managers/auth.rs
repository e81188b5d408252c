use chrono::{Duration, Utc};
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::info;

use super::payload::{doc_str, Payload};
use super::{Exposure, HandlerResult, Manager};
use crate::auth::{hash_password, verify_password, RevocationStore, TokenService};
use crate::database::models::user::public_view;
use crate::database::models::UserRecord;
use crate::database::store::now_timestamp;
use crate::database::{filter, is_object_id, Document, Models, Role};
use crate::error::ApiError;
use crate::loader::Injectable;
use crate::middleware::auth::bearer_token;

const MIN_PASSWORD_LEN: usize = 6;

/// `local@domain.tld` with no whitespace and a single `@`.
fn is_email(value: &str) -> bool {
    if value.chars().any(char::is_whitespace) {
        return false;
    }
    let Some((local, domain)) = value.split_once('@') else {
        return false;
    };
    if local.is_empty() || domain.contains('@') {
        return false;
    }
    domain
        .char_indices()
        .any(|(i, c)| c == '.' && i > 0 && i + 1 < domain.len())
}

fn session(user: &UserRecord, token: String) -> Value {
    json!({
        "user": {
            "_id": user.id,
            "email": user.email,
            "name": user.name,
            "role": user.role,
            "schoolId": user.school_id,
        },
        "token": token,
    })
}

fn record(doc: Document) -> Result<UserRecord, ApiError> {
    UserRecord::from_document(doc).map_err(|e| {
        tracing::error!("Stored user is malformed: {}", e);
        ApiError::internal_server_error("Failed to read user")
    })
}

pub struct AuthService {
    models: Arc<Models>,
    tokens: Arc<TokenService>,
    revocations: Arc<dyn RevocationStore>,
    bcrypt_cost: u32,
}

impl AuthService {
    pub fn new(injectable: &Injectable) -> Self {
        Self {
            models: injectable.models.clone(),
            tokens: injectable.tokens.clone(),
            revocations: injectable.revocations.clone(),
            bcrypt_cost: injectable.config.security.bcrypt_cost,
        }
    }

    pub async fn register(&self, data: Payload) -> HandlerResult {
        let (Some(email), Some(password), Some(name)) =
            (data.str("email"), data.str("password"), data.str("name"))
        else {
            return Err(ApiError::bad_request("Missing required fields: email, password, name"));
        };
        let email = email.trim().to_lowercase();

        if !is_email(&email) {
            return Err(ApiError::bad_request("Invalid email format"));
        }
        if password.chars().count() < MIN_PASSWORD_LEN {
            return Err(ApiError::bad_request("Password must be at least 6 characters long"));
        }

        let role = match data.str("role") {
            None => Role::SchoolAdmin,
            Some(role) => Role::parse(role).ok_or_else(|| {
                ApiError::bad_request("Invalid role. Role must be either superadmin or school_admin")
            })?,
        };

        if self
            .models
            .users
            .find_one(&filter(json!({ "email": email })))
            .await?
            .is_some()
        {
            return Err(ApiError::conflict("User already exists with this email"));
        }

        let school_id = match role {
            Role::Superadmin => Value::Null,
            Role::SchoolAdmin => {
                let school_id = data
                    .str("schoolId")
                    .ok_or_else(|| ApiError::bad_request("School ID is required for school administrator"))?;
                if !is_object_id(school_id) {
                    return Err(ApiError::bad_request("Invalid school ID format"));
                }
                if self.models.schools.find_by_id(school_id).await?.is_none() {
                    return Err(ApiError::not_found("School not found"));
                }
                Value::String(school_id.to_string())
            }
        };

        let hash = hash_password(password.to_string(), self.bcrypt_cost).await?;
        let doc = self
            .models
            .users
            .create(filter(json!({
                "email": email,
                "password": hash,
                "name": name,
                "role": role,
                "schoolId": school_id,
                "isActive": true,
            })))
            .await?;

        let user = record(doc)?;
        info!("Registered {} user {}", user.role, user.email);
        let token = self.tokens.issue(&user)?;
        Ok(session(&user, token))
    }

    pub async fn login(&self, data: Payload) -> HandlerResult {
        let (Some(email), Some(password)) = (data.str("email"), data.str("password")) else {
            return Err(ApiError::bad_request("Email and password are required"));
        };
        let email = email.trim().to_lowercase();

        let Some(doc) = self
            .models
            .users
            .find_one(&filter(json!({ "email": email })))
            .await?
        else {
            return Err(ApiError::unauthorized("Invalid credentials"));
        };
        let user = record(doc)?;

        if !user.is_active {
            return Err(ApiError::forbidden(
                "Account is deactivated. Please contact administrator.",
            ));
        }
        if !verify_password(password.to_string(), user.password.clone()).await? {
            return Err(ApiError::unauthorized("Invalid credentials"));
        }

        self.models
            .users
            .update(&user.id, filter(json!({ "lastLogin": now_timestamp() })))
            .await?;

        let token = self.tokens.issue(&user)?;
        Ok(session(&user, token))
    }

    /// Reissues a token whose signature is valid, expired or not.
    pub async fn refresh_token(&self, data: Payload) -> HandlerResult {
        let token = data
            .str("token")
            .ok_or_else(|| ApiError::bad_request("Token required"))?;
        let claims = self.tokens.verify_ignoring_expiry(token)?;

        if self.revocations.is_revoked(token).await {
            return Err(ApiError::unauthorized("Token has been revoked. Please login again."));
        }

        let doc = self
            .models
            .users
            .find_by_id(&claims.user_id)
            .await?
            .ok_or_else(|| ApiError::not_found("User not found"))?;
        let user = record(doc)?;
        if !user.is_active {
            return Err(ApiError::forbidden(
                "Account is deactivated. Please contact administrator.",
            ));
        }

        Ok(json!({ "token": self.tokens.issue(&user)? }))
    }

    pub async fn get_current_user(&self, data: Payload) -> HandlerResult {
        let user_id = data
            .get("user")
            .and_then(|u| u.get("userId").or_else(|| u.get("id")))
            .and_then(Value::as_str)
            .map(str::to_string)
            .ok_or_else(|| ApiError::unauthorized("User ID not found in token"))?;

        let doc = self
            .models
            .users
            .find_by_id(&user_id)
            .await?
            .ok_or_else(|| ApiError::not_found("User not found"))?;
        Ok(Value::Object(public_view(doc)))
    }

    /// Revokes the bearer token the request was authenticated with.
    pub async fn logout(&self, data: Payload) -> HandlerResult {
        let header = data
            .get("headers")
            .and_then(|h| h.get("authorization"))
            .and_then(Value::as_str);

        if let Some(token) = header.and_then(|h| bearer_token(h).ok()) {
            let expires_at = self
                .tokens
                .verify_ignoring_expiry(token)
                .map(|c| c.exp)
                .unwrap_or_else(|_| (Utc::now() + Duration::hours(24)).timestamp());
            self.revocations.revoke(token, expires_at).await;
        }

        Ok(json!({ "message": "Logged out successfully" }))
    }

    pub async fn change_password(&self, data: Payload) -> HandlerResult {
        let (Some(current), Some(new_password)) =
            (data.str("currentPassword"), data.str("newPassword"))
        else {
            return Err(ApiError::bad_request("Current password and new password are required"));
        };
        if new_password.chars().count() < MIN_PASSWORD_LEN {
            return Err(ApiError::bad_request("New password must be at least 6 characters long"));
        }

        let identity = data.user()?;
        let doc = self
            .models
            .users
            .find_by_id(&identity.user_id)
            .await?
            .ok_or_else(|| ApiError::unauthorized("User not found"))?;
        let stored = doc_str(&doc, "password").unwrap_or_default().to_string();

        if !verify_password(current.to_string(), stored).await? {
            return Err(ApiError::unauthorized("Current password is incorrect"));
        }

        let hash = hash_password(new_password.to_string(), self.bcrypt_cost).await?;
        self.models
            .users
            .update(&identity.user_id, filter(json!({ "password": hash })))
            .await?;

        Ok(json!({ "message": "Password updated successfully" }))
    }
}

pub fn build(injectable: &Injectable) -> Manager {
    let service = Arc::new(AuthService::new(injectable));

    Manager::new("auth")
        .bind("register", &service, |s, data, _| async move {
            s.register(Payload::new(data)).await
        })
        .bind("login", &service, |s, data, _| async move {
            s.login(Payload::new(data)).await
        })
        .bind("refreshToken", &service, |s, data, _| async move {
            s.refresh_token(Payload::new(data)).await
        })
        .bind("getCurrentUser", &service, |s, data, _| async move {
            s.get_current_user(Payload::new(data)).await
        })
        .bind("logout", &service, |s, data, _| async move {
            s.logout(Payload::new(data)).await
        })
        .bind("changePassword", &service, |s, data, _| async move {
            s.change_password(Payload::new(data)).await
        })
        .expose(Exposure::get("getCurrentUser").with("__auth"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_email_shape() {
        assert!(is_email("admin@school.test"));
        assert!(!is_email("admin@school"));
        assert!(!is_email("admin school@x.io"));
        assert!(!is_email("@x.io"));
        assert!(!is_email("a@b@c.io"));
        assert!(!is_email("a@.io"));
    }
}
