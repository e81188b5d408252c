//! Composition root. Boot runs strictly in order and any failure aborts it
//! before the listener binds:
//! store -> models -> managers -> middleware -> capabilities -> routes.

pub mod injectable;

use axum::http::{header, HeaderName, HeaderValue};
use axum::Router;
use once_cell::sync::OnceCell;
use std::sync::Arc;
use tower_http::cors::{AllowOrigin, Any, CorsLayer};
use tower_http::set_header::SetResponseHeaderLayer;
use tower_http::trace::TraceLayer;
use tracing::{debug, info};

use crate::auth::{MemoryRevocationStore, RevocationStore, TokenService};
use crate::config::{AppConfig, StoreBackend};
use crate::database::{DocumentStore, MemoryStore, Models, PgDocumentStore};
use crate::dispatch::{CapabilityRegistry, Dispatcher, MiddlewareBuilder, MiddlewareRepository};
use crate::error::BootError;
use crate::handlers::{self, SystemInfo};
use crate::managers::{self, ManagerBuilder, ManagerRegistry};
use crate::middleware;
use crate::routes::{RouteFile, ROUTE_FILES};
use crate::routing::RouteRegistry;

pub use injectable::Injectable;

/// Entity managers, built in this order
pub const ENTITY_MANAGERS: &[ManagerBuilder] = &[
    managers::auth::build,
    managers::classroom::build,
    managers::school::build,
    managers::student::build,
];

/// Where the generic dispatcher is mounted, after every explicit route
pub const DISPATCH_PATH: &str = "/api/:moduleName/:fnName";

/// A booted application, ready to serve.
pub struct App {
    pub config: Arc<AppConfig>,
    pub injectable: Injectable,
    pub managers: Arc<ManagerRegistry>,
    pub routes: RouteRegistry,
}

impl App {
    /// The route table plus the HTTP layers every response passes through.
    pub fn into_router(self) -> Router {
        let api = &self.config.api;
        let mut router = self
            .routes
            .into_router(api.max_request_size_bytes, api.enable_request_logging);

        for (name, value) in SECURITY_HEADERS {
            router = router.layer(SetResponseHeaderLayer::if_not_present(
                name,
                HeaderValue::from_static(value),
            ));
        }
        if self.config.security.enable_cors {
            router = router.layer(cors_layer(&self.config.security.cors_origins));
        }
        router.layer(TraceLayer::new_for_http())
    }
}

const SECURITY_HEADERS: [(HeaderName, &str); 5] = [
    (header::X_CONTENT_TYPE_OPTIONS, "nosniff"),
    (header::X_FRAME_OPTIONS, "DENY"),
    (header::X_XSS_PROTECTION, "1; mode=block"),
    (header::REFERRER_POLICY, "strict-origin-when-cross-origin"),
    (
        HeaderName::from_static("permissions-policy"),
        "geolocation=(), microphone=(), camera=()",
    ),
];

fn cors_layer(origins: &[String]) -> CorsLayer {
    if origins.is_empty() || origins.iter().any(|o| o == "*") {
        return CorsLayer::permissive();
    }
    let allowed: Vec<HeaderValue> = origins.iter().filter_map(|o| o.parse().ok()).collect();
    CorsLayer::new()
        .allow_origin(AllowOrigin::list(allowed))
        .allow_methods(Any)
        .allow_headers(Any)
}

/// Boot configuration. Defaults to the production wiring; tests swap in
/// their own store, managers or middleware.
pub struct Boot {
    config: Arc<AppConfig>,
    store: Option<Arc<dyn DocumentStore>>,
    revocations: Arc<dyn RevocationStore>,
    managers: Vec<ManagerBuilder>,
    middleware: Vec<(&'static str, MiddlewareBuilder)>,
    route_files: Vec<(&'static str, RouteFile)>,
}

impl Boot {
    pub fn new(config: AppConfig) -> Self {
        Self {
            config: Arc::new(config),
            store: None,
            revocations: Arc::new(MemoryRevocationStore::new()),
            managers: ENTITY_MANAGERS.to_vec(),
            middleware: middleware::BUILDERS.to_vec(),
            route_files: ROUTE_FILES.to_vec(),
        }
    }

    pub fn store(mut self, store: Arc<dyn DocumentStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn revocations(mut self, revocations: Arc<dyn RevocationStore>) -> Self {
        self.revocations = revocations;
        self
    }

    /// Adds a manager after the entity managers.
    pub fn manager(mut self, builder: ManagerBuilder) -> Self {
        self.managers.push(builder);
        self
    }

    pub fn middleware(mut self, name: &'static str, builder: MiddlewareBuilder) -> Self {
        self.middleware.push((name, builder));
        self
    }

    async fn open_store(&self) -> Result<Arc<dyn DocumentStore>, BootError> {
        if let Some(store) = &self.store {
            return Ok(store.clone());
        }
        match self.config.database.backend {
            StoreBackend::Memory => Ok(Arc::new(MemoryStore::new())),
            StoreBackend::Postgres => {
                let store = PgDocumentStore::connect(&self.config.database).await?;
                store.ensure_schema().await?;
                Ok(Arc::new(store))
            }
        }
    }

    pub async fn build(self) -> Result<App, BootError> {
        let config = self.config.clone();
        info!("Booting in {:?} mode", config.environment);

        let store = self.open_store().await?;
        info!("Document store ready ({})", store.backend());
        let models = Arc::new(Models::new(store));
        let tokens = Arc::new(
            TokenService::new(&config.security).map_err(|e| BootError::Config(e.to_string()))?,
        );
        let injectable = Injectable::new(config.clone(), models.clone(), tokens, self.revocations.clone());

        let mut registry = ManagerRegistry::new();
        for build in &self.managers {
            registry.register(build(&injectable))?;
        }
        let managers = Arc::new(registry);
        let injectable = injectable.with_managers(managers.clone());
        info!("Loaded {} managers", managers.len());

        let repository = Arc::new(MiddlewareRepository::load(&self.middleware, &injectable)?);
        let capabilities = Arc::new(CapabilityRegistry::build(&managers, &repository)?);
        let dispatcher = Arc::new(Dispatcher::new(
            capabilities.clone(),
            repository.clone(),
            managers.clone(),
            config.api.mask_dispatch_errors,
        ));

        let mut routes = RouteRegistry::new(repository.clone(), managers.clone());
        routes.trust_proxy(config.api.trust_proxy);
        if config.api.enable_rate_limiting {
            routes.prelude("/api", &["__rateLimit.api"])?;
        }
        routes.prelude("/api", &["__sanitize"])?;

        let snapshot = Arc::new(OnceCell::new());
        let info = Arc::new(SystemInfo {
            config: config.clone(),
            models,
            managers: managers.clone(),
            capabilities,
            middleware: repository.identifiers(),
            routes: snapshot.clone(),
        });

        handlers::register_public(&mut routes, &info);
        for (name, register) in &self.route_files {
            let before = routes.len();
            register(&mut routes, &managers);
            debug!("Route file {} registered {} routes", name, routes.len() - before);
        }
        handlers::register_debug(&mut routes, &info);
        routes.mount_dispatcher(DISPATCH_PATH, dispatcher);

        // Only ever set here, so the cell is known to be empty.
        let _ = snapshot.set(routes.describe());
        info!("Loaded {} routes", routes.len());

        Ok(App {
            config,
            injectable,
            managers,
            routes,
        })
    }
}

/// Boots with the default wiring.
pub async fn boot(config: AppConfig) -> Result<App, BootError> {
    Boot::new(config).build().await
}
