use std::sync::Arc;

use crate::auth::{RevocationStore, TokenService};
use crate::config::AppConfig;
use crate::database::Models;
use crate::managers::ManagerRegistry;

/// Shared dependencies handed to every manager and middleware builder.
///
/// `managers` is `None` while managers are being built and is filled in
/// once the registry is frozen.
#[derive(Clone)]
pub struct Injectable {
    pub config: Arc<AppConfig>,
    pub models: Arc<Models>,
    pub tokens: Arc<TokenService>,
    pub revocations: Arc<dyn RevocationStore>,
    pub managers: Option<Arc<ManagerRegistry>>,
}

impl Injectable {
    pub fn new(
        config: Arc<AppConfig>,
        models: Arc<Models>,
        tokens: Arc<TokenService>,
        revocations: Arc<dyn RevocationStore>,
    ) -> Self {
        Self {
            config,
            models,
            tokens,
            revocations,
            managers: None,
        }
    }

    pub fn with_managers(mut self, managers: Arc<ManagerRegistry>) -> Self {
        self.managers = Some(managers);
        self
    }
}
