mod common;

use anyhow::Result;
use reqwest::StatusCode;
use serde_json::json;

use common::{id_of, TestServer};

#[tokio::test]
async fn create_under_a_school() -> Result<()> {
    let server = TestServer::start().await?;
    let root = server.superadmin("root@example.test").await?;
    let north = server.school(&root, "North High").await?;
    let path = format!("/api/schools/{}/classrooms", north);

    let res = server
        .post(&path, Some(&root), json!({ "name": "1A", "grade": "1", "resources": ["projector"] }))
        .await?;
    assert_eq!(res.status, StatusCode::CREATED);
    assert_eq!(res.data()["school"], north.as_str());
    assert_eq!(res.data()["capacity"], 30);
    assert_eq!(res.data()["resources"], json!(["projector"]));

    let dup = server.post(&path, Some(&root), json!({ "name": "1A" })).await?;
    assert_eq!(dup.status, StatusCode::CONFLICT);
    assert_eq!(dup.error(), "A classroom with this name already exists in this school");

    let too_big = server.post(&path, Some(&root), json!({ "name": "Hall", "capacity": 101 })).await?;
    assert_eq!(too_big.status, StatusCode::BAD_REQUEST);
    assert_eq!(too_big.error(), "Capacity cannot exceed 100");
    assert_eq!(too_big.body["errors"]["capacity"], "Capacity cannot exceed 100");

    let flat = server
        .post("/api/classrooms", Some(&root), json!({ "name": "2A", "schoolId": north }))
        .await?;
    assert_eq!(flat.status, StatusCode::CREATED);

    let nameless = server.post("/api/classrooms", Some(&root), json!({ "schoolId": north })).await?;
    assert_eq!(nameless.status, StatusCode::BAD_REQUEST);
    assert_eq!(nameless.error(), "Classroom name and school ID are required");
    Ok(())
}

#[tokio::test]
async fn school_admin_is_scoped() -> Result<()> {
    let server = TestServer::start().await?;
    let root = server.superadmin("root@example.test").await?;
    let north = server.school(&root, "North High").await?;
    let south = server.school(&root, "South High").await?;
    let south_room = server.classroom(&root, &south, "S1", 20).await?;
    server.classroom(&root, &north, "N1", 20).await?;
    let admin = server.school_admin("admin@north.test", &north).await?;

    let foreign = server
        .post(&format!("/api/schools/{}/classrooms", south), Some(&admin), json!({ "name": "X" }))
        .await?;
    assert_eq!(foreign.status, StatusCode::FORBIDDEN);
    assert_eq!(foreign.error(), "You can only create classrooms in your own school");

    let listed = server.get("/api/classrooms", Some(&admin)).await?;
    let listed = listed.data().as_array().unwrap();
    assert_eq!(listed.len(), 1);
    assert_eq!(listed[0]["name"], "N1");

    let peek = server.get(&format!("/api/classrooms/{}", south_room), Some(&admin)).await?;
    assert_eq!(peek.status, StatusCode::FORBIDDEN);
    assert_eq!(peek.error(), "You can only access classrooms from your own school");
    Ok(())
}

#[tokio::test]
async fn capacity_tracks_enrolment() -> Result<()> {
    let server = TestServer::start().await?;
    let root = server.superadmin("root@example.test").await?;
    let north = server.school(&root, "North High").await?;
    let room = server.classroom(&root, &north, "1A", 20).await?;

    for name in ["Ada", "Grace"] {
        let res = server
            .post("/api/students", Some(&root), json!({ "name": name, "schoolId": north, "classroomId": room }))
            .await?;
        assert_eq!(res.status, StatusCode::CREATED, "{}", res.body);
    }

    let got = server.get(&format!("/api/classrooms/{}", room), Some(&root)).await?;
    assert_eq!(got.data()["studentCount"], 2);
    assert_eq!(got.data()["availableSeats"], 18);

    let stats = server.get(&format!("/api/classrooms/{}/stats", room), Some(&root)).await?;
    assert_eq!(stats.data()["activeStudents"], 2);
    assert_eq!(stats.data()["utilizationRate"], "10.00");

    let capacity_path = format!("/api/classrooms/{}/capacity", room);
    let shrink = server.patch(&capacity_path, Some(&root), json!({ "capacity": 1 })).await?;
    assert_eq!(shrink.status, StatusCode::BAD_REQUEST);
    assert_eq!(shrink.error(), "Cannot set capacity below current student count (2)");

    let invalid = server.patch(&capacity_path, Some(&root), json!({ "capacity": 0 })).await?;
    assert_eq!(invalid.error(), "Valid capacity is required");

    let exact = server.patch(&capacity_path, Some(&root), json!({ "capacity": 2 })).await?;
    assert_eq!(exact.status, StatusCode::OK);
    assert_eq!(exact.data()["capacity"], 2);

    let full = server
        .post("/api/students", Some(&root), json!({ "name": "Linus", "schoolId": north, "classroomId": room }))
        .await?;
    assert_eq!(full.status, StatusCode::BAD_REQUEST);
    assert_eq!(full.error(), "Classroom has reached maximum capacity");

    let blocked = server.delete(&format!("/api/classrooms/{}", room), Some(&root)).await?;
    assert_eq!(blocked.status, StatusCode::BAD_REQUEST);
    assert_eq!(blocked.error(), "Cannot delete classroom with assigned students");
    Ok(())
}

#[tokio::test]
async fn resources_are_a_set() -> Result<()> {
    let server = TestServer::start().await?;
    let root = server.superadmin("root@example.test").await?;
    let north = server.school(&root, "North High").await?;
    let room = server.classroom(&root, &north, "Lab 1", 20).await?;
    let path = format!("/api/classrooms/{}/resources", room);

    let added = server.post(&path, Some(&root), json!({ "resource": "lab" })).await?;
    assert_eq!(added.status, StatusCode::CREATED);
    assert_eq!(added.data()["resources"], json!(["lab"]));

    let again = server.post(&path, Some(&root), json!({ "resource": "lab" })).await?;
    assert_eq!(again.data()["resources"], json!(["lab"]));

    let bogus = server.post(&path, Some(&root), json!({ "resource": "piano" })).await?;
    assert_eq!(bogus.status, StatusCode::BAD_REQUEST);
    assert!(bogus.error().starts_with("Invalid resource"));

    let removed = server.delete(&format!("{}/lab", path), Some(&root)).await?;
    assert_eq!(removed.status, StatusCode::OK);
    assert_eq!(removed.data()["resources"], json!([]));
    Ok(())
}

#[tokio::test]
async fn delete_is_superadmin_only() -> Result<()> {
    let server = TestServer::start().await?;
    let root = server.superadmin("root@example.test").await?;
    let north = server.school(&root, "North High").await?;
    let room = server.classroom(&root, &north, "1A", 20).await?;
    let admin = server.school_admin("admin@north.test", &north).await?;

    let denied = server.delete(&format!("/api/classrooms/{}", room), Some(&admin)).await?;
    assert_eq!(denied.status, StatusCode::FORBIDDEN);

    let deleted = server.delete(&format!("/api/classrooms/{}", room), Some(&root)).await?;
    assert_eq!(deleted.status, StatusCode::OK);
    assert_eq!(deleted.data()["message"], "Classroom deleted successfully");

    let after = server.get(&format!("/api/classrooms/{}", room), Some(&root)).await?;
    assert_eq!(after.status, StatusCode::NOT_FOUND);
    Ok(())
}

#[tokio::test]
async fn bulk_create_reports_per_entry() -> Result<()> {
    let server = TestServer::start().await?;
    let root = server.superadmin("root@example.test").await?;
    let north = server.school(&root, "North High").await?;
    let admin = server.school_admin("admin@north.test", &north).await?;

    let body = json!({
        "classrooms": [
            { "name": "B1", "school": north, "capacity": 25 },
            { "name": "B2", "school": "000000000000000000000000" },
            { "name": "B3", "school": north, "capacity": 500 },
        ]
    });

    let denied = server.post("/api/classrooms/bulk/create", Some(&admin), body.clone()).await?;
    assert_eq!(denied.status, StatusCode::FORBIDDEN);

    let res = server.post("/api/classrooms/bulk/create", Some(&root), body).await?;
    assert_eq!(res.status, StatusCode::CREATED);
    assert_eq!(res.data()["totalCreated"], 1);
    assert_eq!(res.data()["totalErrors"], 2);
    assert_eq!(res.data()["errors"][0]["error"], "School not found");
    id_of(&res.data()["created"][0])?;

    let empty = server
        .post("/api/classrooms/bulk/create", Some(&root), json!({ "classrooms": [] }))
        .await?;
    assert_eq!(empty.error(), "Valid classrooms array is required");
    Ok(())
}
