use axum::http::Method;
use tracing::warn;

use crate::managers::ManagerRegistry;
use crate::routing::{ResourceOptions, RouteRegistry, ADMINS, SUPERADMIN};

pub fn register(routes: &mut RouteRegistry, managers: &ManagerRegistry) {
    let Some(student) = managers.get("student") else {
        warn!("Student manager not found, skipping student routes");
        return;
    };

    // Fixed paths go ahead of `/api/students/:id`.
    routes
        .protected(Method::GET, "/api/students/search", student.handler("search"), ADMINS)
        .protected(
            Method::GET,
            "/api/students/stats/overview",
            student.handler("getStats"),
            SUPERADMIN,
        )
        .protected(
            Method::POST,
            "/api/students/bulk/import",
            student.handler("bulkImport"),
            SUPERADMIN,
        )
        .protected(
            Method::POST,
            "/api/students/bulk/transfer",
            student.handler("bulkTransfer"),
            SUPERADMIN,
        );

    // School admins may deactivate their own students.
    routes.resource(
        "/api/students",
        student,
        ResourceOptions::new()
            .except(&["delete"])
            .additional(Method::DELETE, "/:id", "delete", ADMINS)
            .additional(Method::GET, "/:id/timeline", "getTimeline", ADMINS)
            .additional(Method::POST, "/:id/transfer", "transfer", ADMINS)
            .additional(Method::POST, "/:id/enroll", "enroll", ADMINS)
            .additional(Method::POST, "/:id/withdraw", "withdraw", ADMINS),
    );

    routes
        .protected(
            Method::GET,
            "/api/schools/:schoolId/students/stats",
            student.handler("getSchoolStats"),
            ADMINS,
        )
        .protected(
            Method::GET,
            "/api/schools/:schoolId/students",
            student.handler("listBySchool"),
            ADMINS,
        )
        .nested_resource(
            "/api/schools",
            "students",
            student,
            ResourceOptions::new().only(&["create"]),
        )
        .protected(
            Method::GET,
            "/api/classrooms/:classroomId/students",
            student.handler("listByClassroom"),
            ADMINS,
        );
}
