use axum::{
    body::to_bytes,
    extract::{ConnectInfo, Request, State},
    http::{request::Parts, Method},
    response::{IntoResponse, Response},
    Router,
};
use serde_json::{json, Map, Value};
use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

use super::pattern::PathPattern;
use crate::database::Role;
use crate::dispatch::{success_reply, Bolt, Completion, Dispatcher, Link, MiddlewareRepository, RequestContext};
use crate::error::{ApiError, BootError};
use crate::managers::{Handler, Manager, ManagerRegistry};
use crate::middleware::response::{Reply, ResponseHandle};
use crate::middleware::role_check::RoleGuard;

/// Repository identifier `protected` routes authenticate with
pub const AUTH_MIDDLEWARE: &str = "__auth";

/// Both administrator roles
pub const ADMINS: &[Role] = &[Role::Superadmin, Role::SchoolAdmin];
pub const SUPERADMIN: &[Role] = &[Role::Superadmin];

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum RouteKind {
    Public,
    Protected,
    Custom,
}

impl RouteKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            RouteKind::Public => "public",
            RouteKind::Protected => "protected",
            RouteKind::Custom => "custom",
        }
    }
}

#[derive(Clone)]
enum Target {
    Handler(Handler),
    Dispatcher(Arc<Dispatcher>),
}

/// One registered route. Immutable once registered.
#[derive(Clone)]
pub struct RouteEntry {
    /// `None` matches every method
    pub method: Option<Method>,
    pub pattern: PathPattern,
    pub kind: RouteKind,
    pub roles: Vec<Role>,
    links: Vec<Link>,
    target: Target,
}

impl RouteEntry {
    pub fn method_label(&self) -> &str {
        self.method.as_ref().map(Method::as_str).unwrap_or("ALL")
    }

    pub fn middleware(&self) -> impl Iterator<Item = &str> {
        self.links.iter().map(|l| l.name.as_str())
    }

    fn accepts(&self, method: &Method) -> bool {
        self.method.as_ref().map_or(true, |m| m == method)
    }

    fn describe(&self) -> Value {
        json!({
            "method": self.method_label(),
            "path": self.pattern.as_str(),
            "type": self.kind.as_str(),
            "roles": self.roles,
            "middleware": self.middleware().collect::<Vec<_>>(),
            "hasHandler": matches!(self.target, Target::Handler(_)),
        })
    }
}

impl std::fmt::Debug for RouteEntry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RouteEntry")
            .field("method", &self.method_label())
            .field("path", &self.pattern.as_str())
            .field("kind", &self.kind)
            .field("roles", &self.roles)
            .finish()
    }
}

/// Extra route hung off a resource, e.g. `GET /:id/stats -> getStats`.
#[derive(Debug, Clone)]
pub struct AdditionalRoute {
    pub method: Method,
    /// Relative to the resource base unless it starts with `/`
    pub path: String,
    pub operation: String,
    pub roles: Vec<Role>,
}

/// Which CRUD actions `resource` registers, plus extra routes.
#[derive(Debug, Clone, Default)]
pub struct ResourceOptions {
    only: Option<Vec<String>>,
    except: Vec<String>,
    additional: Vec<AdditionalRoute>,
}

impl ResourceOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn only(mut self, actions: &[&str]) -> Self {
        self.only = Some(actions.iter().map(|a| a.to_string()).collect());
        self
    }

    pub fn except(mut self, actions: &[&str]) -> Self {
        self.except = actions.iter().map(|a| a.to_string()).collect();
        self
    }

    pub fn additional(mut self, method: Method, path: &str, operation: &str, roles: &[Role]) -> Self {
        self.additional.push(AdditionalRoute {
            method,
            path: path.to_string(),
            operation: operation.to_string(),
            roles: roles.to_vec(),
        });
        self
    }

    fn includes(&self, action: &str) -> bool {
        match &self.only {
            Some(only) => only.iter().any(|a| a == action),
            None => !self.except.iter().any(|a| a == action),
        }
    }
}

/// The standard five actions: (operation, method, suffix, roles)
const CRUD_ACTIONS: [(&str, Method, &str, &[Role]); 5] = [
    ("list", Method::GET, "", ADMINS),
    ("get", Method::GET, "/:id", ADMINS),
    ("create", Method::POST, "", ADMINS),
    ("update", Method::PUT, "/:id", ADMINS),
    ("delete", Method::DELETE, "/:id", SUPERADMIN),
];

/// Middleware run ahead of every route under `prefix`.
#[derive(Clone)]
struct Prelude {
    prefix: String,
    link: Link,
}

impl Prelude {
    fn covers(&self, path: &str) -> bool {
        path == self.prefix
            || path
                .strip_prefix(&self.prefix)
                .is_some_and(|rest| rest.starts_with('/'))
    }
}

/// Ordered route table. Routes are matched in registration order and the
/// first (method, pattern) match wins.
pub struct RouteRegistry {
    repository: Arc<MiddlewareRepository>,
    managers: Arc<ManagerRegistry>,
    prelude: Vec<Prelude>,
    routes: Vec<RouteEntry>,
    trust_proxy: bool,
}

impl RouteRegistry {
    pub fn new(repository: Arc<MiddlewareRepository>, managers: Arc<ManagerRegistry>) -> Self {
        Self {
            repository,
            managers,
            prelude: Vec::new(),
            routes: Vec::new(),
            trust_proxy: false,
        }
    }

    /// Take the client address from `X-Forwarded-For` rather than the socket.
    pub fn trust_proxy(&mut self, trust: bool) -> &mut Self {
        self.trust_proxy = trust;
        self
    }

    /// Runs `identifiers` before any route under `prefix`, matched or not.
    pub fn prelude(&mut self, prefix: &str, identifiers: &[&str]) -> Result<&mut Self, BootError> {
        for identifier in identifiers {
            let middleware = self.repository.resolve(identifier).ok_or_else(|| {
                BootError::PreludeMiddleware {
                    prefix: prefix.to_string(),
                    identifier: identifier.to_string(),
                }
            })?;
            debug!("Applying {} to routes under {}", identifier, prefix);
            self.prelude.push(Prelude {
                prefix: prefix.trim_end_matches('/').to_string(),
                link: Link::new(*identifier, middleware),
            });
        }
        Ok(self)
    }

    /// No middleware.
    pub fn public(&mut self, method: Method, path: &str, handler: Option<Handler>) -> &mut Self {
        self.register(Some(method), path, handler.map(Target::Handler), RouteKind::Public, &[], Vec::new())
    }

    /// Authenticates first, then checks `roles` when any are given.
    pub fn protected(
        &mut self,
        method: Method,
        path: &str,
        handler: Option<Handler>,
        roles: &[Role],
    ) -> &mut Self {
        let Some(auth) = self.link(AUTH_MIDDLEWARE, &method, path) else {
            return self;
        };
        let mut links = vec![auth];
        if !roles.is_empty() {
            links.push(RoleGuard::link(roles));
        }
        self.register(Some(method), path, handler.map(Target::Handler), RouteKind::Protected, roles, links)
    }

    /// Runs exactly `middleware`, in the order given.
    pub fn custom(
        &mut self,
        method: Method,
        path: &str,
        handler: Option<Handler>,
        middleware: &[&str],
    ) -> &mut Self {
        let mut links = Vec::with_capacity(middleware.len());
        for identifier in middleware {
            match self.link(identifier, &method, path) {
                Some(link) => links.push(link),
                None => return self,
            }
        }
        self.register(Some(method), path, handler.map(Target::Handler), RouteKind::Custom, &[], links)
    }

    /// Registers the CRUD actions of `manager` under `base` as protected
    /// routes: list/get/create/update allow both admin roles, delete only
    /// superadmins.
    pub fn resource(&mut self, base: &str, manager: &Manager, options: ResourceOptions) -> &mut Self {
        for (operation, method, suffix, roles) in CRUD_ACTIONS {
            if !options.includes(operation) || !manager.has_operation(operation) {
                continue;
            }
            let path = format!("{}{}", base, suffix);
            self.protected(method, &path, manager.handler(operation), roles);
        }

        for extra in &options.additional {
            let path = if extra.path.starts_with('/') {
                extra.path.clone()
            } else {
                format!("{}{}", base, extra.path)
            };
            self.protected(extra.method.clone(), &path, manager.handler(&extra.operation), &extra.roles);
        }
        self
    }

    /// [`RouteRegistry::resource`] under `{parent}/:parentId/{name}`.
    pub fn nested_resource(
        &mut self,
        parent: &str,
        name: &str,
        manager: &Manager,
        options: ResourceOptions,
    ) -> &mut Self {
        let base = format!("{}/:parentId/{}", parent.trim_end_matches('/'), name);
        self.resource(&base, manager, options)
    }

    /// Mounts the generic dispatcher for every method at `path`, which must
    /// bind `:moduleName` and `:fnName`.
    pub fn mount_dispatcher(&mut self, path: &str, dispatcher: Arc<Dispatcher>) -> &mut Self {
        self.register(None, path, Some(Target::Dispatcher(dispatcher)), RouteKind::Custom, &[], Vec::new())
    }

    pub fn routes(&self) -> &[RouteEntry] {
        &self.routes
    }

    pub fn len(&self) -> usize {
        self.routes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }

    pub fn describe(&self) -> Value {
        Value::Array(self.routes.iter().map(RouteEntry::describe).collect())
    }

    /// Route table grouped by kind, for the `routes` command.
    pub fn print_routes(&self) {
        let mut grouped: BTreeMap<RouteKind, Vec<&RouteEntry>> = BTreeMap::new();
        for route in &self.routes {
            grouped.entry(route.kind).or_default().push(route);
        }

        println!("Registered routes ({})", self.routes.len());
        for (kind, routes) in grouped {
            println!();
            println!("{} routes:", kind.as_str().to_uppercase());
            for route in routes {
                let roles = if route.roles.is_empty() {
                    String::new()
                } else {
                    let names: Vec<&str> = route.roles.iter().map(Role::as_str).collect();
                    format!(" [{}]", names.join(", "))
                };
                println!("  {:<6} {}{}", route.method_label(), route.pattern, roles);
            }
        }
    }

    /// Serves the table as an axum fallback. Unmatched requests get 404.
    pub fn into_router(self, max_body_bytes: usize, log_requests: bool) -> Router {
        let table = Arc::new(RouteTable {
            routes: self.routes,
            prelude: self.prelude,
            managers: self.managers,
            max_body_bytes,
            log_requests,
            trust_proxy: self.trust_proxy,
        });
        Router::new().fallback(serve).with_state(table)
    }

    fn link(&self, identifier: &str, method: &Method, path: &str) -> Option<Link> {
        match self.repository.resolve(identifier) {
            Some(middleware) => Some(Link::new(identifier, middleware)),
            None => {
                error!(
                    "Cannot register route {} {}: unknown middleware {}",
                    method, path, identifier
                );
                None
            }
        }
    }

    fn register(
        &mut self,
        method: Option<Method>,
        path: &str,
        target: Option<Target>,
        kind: RouteKind,
        roles: &[Role],
        links: Vec<Link>,
    ) -> &mut Self {
        let label = method.as_ref().map(Method::as_str).unwrap_or("ALL");
        let Some(target) = target else {
            error!("Cannot register route {} {}: handler is undefined", label, path);
            return self;
        };

        let pattern = PathPattern::parse(path);
        if let Some(existing) = self
            .routes
            .iter()
            .find(|r| r.method == method && r.pattern.same_shape(&pattern))
        {
            warn!(
                "Route {} {} is shadowed by {} registered earlier",
                label,
                path,
                existing.pattern
            );
        }

        debug!("Registered: {} {} [{}]", label, path, kind.as_str());
        self.routes.push(RouteEntry {
            method,
            pattern,
            kind,
            roles: roles.to_vec(),
            links,
            target,
        });
        self
    }
}

struct RouteTable {
    routes: Vec<RouteEntry>,
    prelude: Vec<Prelude>,
    managers: Arc<ManagerRegistry>,
    max_body_bytes: usize,
    log_requests: bool,
    trust_proxy: bool,
}

impl RouteTable {
    fn find(&self, method: &Method, path: &str) -> Option<(&RouteEntry, Map<String, Value>)> {
        self.routes
            .iter()
            .filter(|r| r.accepts(method))
            .find_map(|r| r.pattern.matches(path).map(|params| (r, params)))
    }
}

fn client_ip(parts: &Parts, trust_proxy: bool) -> Option<String> {
    let forwarded = trust_proxy
        .then(|| parts.headers.get("x-forwarded-for"))
        .flatten()
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(',').next())
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty());
    forwarded.or_else(|| {
        parts
            .extensions
            .get::<ConnectInfo<SocketAddr>>()
            .map(|ConnectInfo(addr)| addr.ip().to_string())
    })
}

fn parse_query(query: Option<&str>) -> Map<String, Value> {
    url::form_urlencoded::parse(query.unwrap_or_default().as_bytes())
        .map(|(k, v)| (k.into_owned(), Value::String(v.into_owned())))
        .collect()
}

fn parse_body(bytes: &[u8]) -> Result<Map<String, Value>, ApiError> {
    if bytes.iter().all(u8::is_ascii_whitespace) {
        return Ok(Map::new());
    }
    match serde_json::from_slice::<Value>(bytes) {
        Ok(Value::Object(map)) => Ok(map),
        Ok(_) => Err(ApiError::invalid_json("Request body must be a JSON object")),
        Err(_) => Err(ApiError::invalid_json("Invalid JSON in request body")),
    }
}

async fn serve(State(table): State<Arc<RouteTable>>, request: Request) -> Response {
    let (parts, body) = request.into_parts();
    let method = parts.method.clone();
    let path = parts.uri.path().to_string();

    let response = match to_bytes(body, table.max_body_bytes).await {
        Ok(bytes) => match parse_body(&bytes) {
            Ok(body) => route(&table, &parts, body).await,
            Err(err) => Reply::from(&err).into_response(),
        },
        Err(_) => Reply::from(&ApiError::payload_too_large("Request entity too large")).into_response(),
    };

    if table.log_requests {
        info!("{} {} -> {}", method, path, response.status().as_u16());
    }
    response
}

async fn route(table: &RouteTable, parts: &Parts, body: Map<String, Value>) -> Response {
    let path = parts.uri.path();
    let mut ctx = RequestContext::new(parts.method.clone(), path)
        .with_query(parse_query(parts.uri.query()))
        .with_body(body);
    ctx.headers = parts.headers.clone();
    ctx.ip = client_ip(parts, table.trust_proxy);

    let res = ResponseHandle::new();
    let mut links: Vec<Link> = table
        .prelude
        .iter()
        .filter(|p| p.covers(path))
        .map(|p| p.link.clone())
        .collect();

    let target = match table.find(&parts.method, path) {
        Some((entry, params)) => {
            ctx.params = params;
            links.extend(entry.links.iter().cloned());
            Some(entry.target.clone())
        }
        None => None,
    };

    let chain = Bolt::from_links(table.managers.clone(), links, ctx, res.clone(), move |done| {
        complete(target, done)
    })
    .on_error(|err, res| {
        res.error(&err);
    });

    if let Err(err) = chain.run().await {
        error!("Request chain failed: {}", err);
        res.error(&ApiError::from(err));
    }
    res.into_response()
}

async fn complete(target: Option<Target>, done: Completion) {
    match target {
        Some(Target::Handler(handler)) => run_handler(handler, done).await,
        Some(Target::Dispatcher(dispatcher)) => dispatcher.dispatch(done.ctx, done.res).await,
        None => {
            done.res.send(Reply {
                status: axum::http::StatusCode::NOT_FOUND,
                body: Some(json!({
                    "success": false,
                    "error": "Route not found",
                    "path": done.ctx.path,
                    "method": done.ctx.method.as_str(),
                })),
            });
        }
    }
}

/// Merged data in, envelope out. Errors keep their own status and message.
async fn run_handler(handler: Handler, done: Completion) {
    let Completion { ctx, res, .. } = done;
    let data = Value::Object(ctx.route_data());

    match handler(data, res.clone()).await {
        Ok(_) if res.headers_sent() => {}
        Ok(result) => {
            res.send(success_reply(&ctx.method, result));
        }
        Err(err) => {
            error!("Route handler error on {} {}: {}", ctx.method, ctx.path, err);
            if !res.headers_sent() {
                res.error(&err);
            }
        }
    }
}
