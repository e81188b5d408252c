//! Explicit REST routes, one file per entity. Each file registers against the
//! route registry using the frozen manager registry.

pub mod auth;
pub mod classroom;
pub mod school;
pub mod student;

use crate::managers::ManagerRegistry;
use crate::routing::RouteRegistry;

pub type RouteFile = fn(&mut RouteRegistry, &ManagerRegistry);

/// Loaded in this order; earlier registrations win on overlapping paths.
pub const ROUTE_FILES: &[(&str, RouteFile)] = &[
    ("auth", auth::register),
    ("classroom", classroom::register),
    ("school", school::register),
    ("student", student::register),
];
