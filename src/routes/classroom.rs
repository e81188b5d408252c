use axum::http::Method;
use tracing::warn;

use crate::managers::ManagerRegistry;
use crate::routing::{ResourceOptions, RouteRegistry, ADMINS, SUPERADMIN};

pub fn register(routes: &mut RouteRegistry, managers: &ManagerRegistry) {
    let Some(classroom) = managers.get("classroom") else {
        warn!("Classroom manager not found, skipping classroom routes");
        return;
    };

    routes
        .protected(
            Method::POST,
            "/api/classrooms/bulk/create",
            classroom.handler("bulkCreate"),
            SUPERADMIN,
        )
        .resource(
            "/api/classrooms",
            classroom,
            ResourceOptions::new()
                .additional(Method::GET, "/:id/stats", "getStats", ADMINS)
                .additional(Method::GET, "/:id/students", "getStudents", ADMINS)
                .additional(Method::PATCH, "/:id/capacity", "updateCapacity", ADMINS)
                .additional(Method::POST, "/:id/resources", "addResource", ADMINS)
                .additional(Method::DELETE, "/:id/resources/:resource", "removeResource", ADMINS),
        )
        .protected(
            Method::GET,
            "/api/schools/:schoolId/classrooms",
            classroom.handler("listBySchool"),
            ADMINS,
        )
        .nested_resource(
            "/api/schools",
            "classrooms",
            classroom,
            ResourceOptions::new().only(&["create"]),
        );
}
