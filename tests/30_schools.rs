mod common;

use anyhow::Result;
use reqwest::StatusCode;
use serde_json::json;

use common::TestServer;

#[tokio::test]
async fn superadmin_creates_schools() -> Result<()> {
    let server = TestServer::start().await?;
    let root = server.superadmin("root@example.test").await?;

    let res = server
        .post(
            "/api/schools",
            Some(&root),
            json!({ "name": "North High", "address": "1 Main St", "contactEmail": "office@north.test" }),
        )
        .await?;
    assert_eq!(res.status, StatusCode::CREATED);
    assert_eq!(res.data()["name"], "North High");
    assert_eq!(res.data()["isActive"], true);
    assert!(res.data()["_id"].as_str().is_some());

    let dup = server.post("/api/schools", Some(&root), json!({ "name": "North High" })).await?;
    assert_eq!(dup.status, StatusCode::CONFLICT);
    assert_eq!(dup.error(), "School with this name already exists");

    let nameless = server.post("/api/schools", Some(&root), json!({ "address": "x" })).await?;
    assert_eq!(nameless.status, StatusCode::BAD_REQUEST);
    assert_eq!(nameless.error(), "School name is required");
    Ok(())
}

#[tokio::test]
async fn school_admin_sees_only_its_school() -> Result<()> {
    let server = TestServer::start().await?;
    let root = server.superadmin("root@example.test").await?;
    let north = server.school(&root, "North High").await?;
    let south = server.school(&root, "South High").await?;
    let admin = server.school_admin("admin@north.test", &north).await?;

    let create = server.post("/api/schools", Some(&admin), json!({ "name": "East High" })).await?;
    assert_eq!(create.status, StatusCode::FORBIDDEN);
    assert_eq!(create.error(), "Access denied. Required role(s): superadmin");

    let all = server.get("/api/schools", Some(&root)).await?;
    assert_eq!(all.data().as_array().unwrap().len(), 2);
    assert_eq!(all.data()[0]["name"], "North High");

    let scoped = server.get("/api/schools", Some(&admin)).await?;
    let scoped = scoped.data().as_array().unwrap();
    assert_eq!(scoped.len(), 1);
    assert_eq!(scoped[0]["_id"], north.as_str());

    let own = server.get(&format!("/api/schools/{}", north), Some(&admin)).await?;
    assert_eq!(own.status, StatusCode::OK);

    let other = server.get(&format!("/api/schools/{}", south), Some(&admin)).await?;
    assert_eq!(other.status, StatusCode::FORBIDDEN);
    assert_eq!(other.error(), "You can only access your own school");
    Ok(())
}

#[tokio::test]
async fn malformed_and_unknown_ids() -> Result<()> {
    let server = TestServer::start().await?;
    let root = server.superadmin("root@example.test").await?;

    let malformed = server.get("/api/schools/not-an-id", Some(&root)).await?;
    assert_eq!(malformed.status, StatusCode::BAD_REQUEST);
    assert_eq!(malformed.error(), "Invalid school ID format");

    let unknown = server
        .get("/api/schools/000000000000000000000000", Some(&root))
        .await?;
    assert_eq!(unknown.status, StatusCode::NOT_FOUND);
    assert_eq!(unknown.error(), "School not found");
    Ok(())
}

#[tokio::test]
async fn update_and_toggle_status() -> Result<()> {
    let server = TestServer::start().await?;
    let root = server.superadmin("root@example.test").await?;
    let north = server.school(&root, "North High").await?;
    server.school(&root, "South High").await?;
    let admin = server.school_admin("admin@north.test", &north).await?;

    let renamed = server
        .put(&format!("/api/schools/{}", north), Some(&admin), json!({ "principal": "Dr. Ada" }))
        .await?;
    assert_eq!(renamed.status, StatusCode::OK);
    assert_eq!(renamed.data()["principal"], "Dr. Ada");

    let clash = server
        .put(&format!("/api/schools/{}", north), Some(&root), json!({ "name": "South High" }))
        .await?;
    assert_eq!(clash.status, StatusCode::CONFLICT);

    let toggle_path = format!("/api/schools/{}/toggle-status", north);
    let denied = server.patch(&toggle_path, Some(&admin), json!({})).await?;
    assert_eq!(denied.status, StatusCode::FORBIDDEN);

    let off = server.patch(&toggle_path, Some(&root), json!({})).await?;
    assert_eq!(off.status, StatusCode::OK);
    assert_eq!(off.data()["isActive"], false);

    let inactive = server.get("/api/schools?isActive=false", Some(&root)).await?;
    assert_eq!(inactive.data().as_array().unwrap().len(), 1);
    Ok(())
}

#[tokio::test]
async fn delete_refuses_while_referenced() -> Result<()> {
    let server = TestServer::start().await?;
    let root = server.superadmin("root@example.test").await?;
    let north = server.school(&root, "North High").await?;
    let empty = server.school(&root, "Empty High").await?;
    server.classroom(&root, &north, "1A", 20).await?;
    let admin = server.school_admin("admin@north.test", &north).await?;

    let not_allowed = server.delete(&format!("/api/schools/{}", north), Some(&admin)).await?;
    assert_eq!(not_allowed.status, StatusCode::FORBIDDEN);

    let blocked = server.delete(&format!("/api/schools/{}", north), Some(&root)).await?;
    assert_eq!(blocked.status, StatusCode::CONFLICT);
    assert_eq!(blocked.error(), "Cannot delete school with existing classrooms");

    let gone = server.delete(&format!("/api/schools/{}", empty), Some(&root)).await?;
    assert_eq!(gone.status, StatusCode::NO_CONTENT);
    assert!(gone.body.is_null());
    Ok(())
}

#[tokio::test]
async fn stats_overview_is_superadmin_only() -> Result<()> {
    let server = TestServer::start().await?;
    let root = server.superadmin("root@example.test").await?;
    let north = server.school(&root, "North High").await?;
    server.classroom(&root, &north, "1A", 20).await?;
    let admin = server.school_admin("admin@north.test", &north).await?;

    let denied = server.get("/api/schools/stats/overview", Some(&admin)).await?;
    assert_eq!(denied.status, StatusCode::FORBIDDEN);

    let stats = server.get("/api/schools/stats/overview", Some(&root)).await?;
    assert_eq!(stats.status, StatusCode::OK);
    assert_eq!(stats.data()["totalSchools"], 1);
    assert_eq!(stats.data()["totalClassrooms"], 1);
    Ok(())
}

#[tokio::test]
async fn nested_school_listings() -> Result<()> {
    let server = TestServer::start().await?;
    let root = server.superadmin("root@example.test").await?;
    let north = server.school(&root, "North High").await?;
    server.classroom(&root, &north, "2B", 20).await?;
    server.classroom(&root, &north, "1A", 20).await?;

    let classrooms = server
        .get(&format!("/api/schools/{}/classrooms", north), Some(&root))
        .await?;
    assert_eq!(classrooms.status, StatusCode::OK);
    let rooms = classrooms.data().as_array().unwrap();
    assert_eq!(rooms.len(), 2);
    assert_eq!(rooms[0]["name"], "1A");
    Ok(())
}

#[tokio::test]
async fn input_is_sanitized_before_handlers() -> Result<()> {
    let server = TestServer::start().await?;
    let root = server.superadmin("root@example.test").await?;

    let created = server
        .post("/api/schools", Some(&root), json!({ "name": "<b>North</b> High" }))
        .await?;
    assert_eq!(created.status, StatusCode::CREATED);
    assert_eq!(created.data()["name"], "&lt;b>North&lt;/b> High");
    let id = common::id_of(created.data())?;

    let updated = server
        .put(
            &format!("/api/schools/{}", id),
            Some(&root),
            json!({ "$set": { "isActive": false }, "address.city": "Springfield" }),
        )
        .await?;
    assert_eq!(updated.status, StatusCode::OK);
    let school = updated.data().as_object().unwrap();
    assert!(!school.contains_key("$set"));
    assert!(!school.contains_key("_set"));
    assert!(!school.contains_key("address.city"));
    assert_eq!(school["address_city"], "Springfield");
    assert_eq!(school["isActive"], true);
    Ok(())
}
