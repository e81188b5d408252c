//! Ordered, Express-style route table served as the axum fallback.

pub mod pattern;
pub mod registry;

pub use pattern::PathPattern;
pub use registry::{
    AdditionalRoute, ResourceOptions, RouteEntry, RouteKind, RouteRegistry, ADMINS, AUTH_MIDDLEWARE, SUPERADMIN,
};
