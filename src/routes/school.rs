use axum::http::Method;
use tracing::warn;

use crate::managers::ManagerRegistry;
use crate::routing::{ResourceOptions, RouteRegistry, ADMINS, SUPERADMIN};

pub fn register(routes: &mut RouteRegistry, managers: &ManagerRegistry) {
    let Some(school) = managers.get("school") else {
        warn!("School manager not found, skipping school routes");
        return;
    };

    // Only superadmins create schools, unlike the resource default.
    routes
        .protected(
            Method::GET,
            "/api/schools/stats/overview",
            school.handler("getStats"),
            SUPERADMIN,
        )
        .protected(Method::POST, "/api/schools", school.handler("create"), SUPERADMIN)
        .resource(
            "/api/schools",
            school,
            ResourceOptions::new()
                .except(&["create"])
                .additional(Method::GET, "/:id/classrooms", "getClassrooms", ADMINS)
                .additional(Method::GET, "/:id/students", "getStudents", ADMINS)
                .additional(Method::PATCH, "/:id/toggle-status", "toggleStatus", SUPERADMIN),
        );
}
