mod common;

use anyhow::Result;
use reqwest::StatusCode;
use serde_json::{json, Value};

use common::{id_of, TestServer};

struct Campus {
    server: TestServer,
    root: String,
    north: String,
    south: String,
    admin: String,
}

async fn campus() -> Result<Campus> {
    let server = TestServer::start().await?;
    let root = server.superadmin("root@example.test").await?;
    let north = server.school(&root, "North High").await?;
    let south = server.school(&root, "South High").await?;
    let admin = server.school_admin("admin@north.test", &north).await?;
    Ok(Campus { server, root, north, south, admin })
}

async fn enrol(c: &Campus, token: &str, body: Value) -> Result<String> {
    let res = c.server.post("/api/students", Some(token), body).await?;
    anyhow::ensure!(res.status == StatusCode::CREATED, "enrol failed: {}", res.body);
    id_of(res.data())
}

#[tokio::test]
async fn create_validates_school_and_classroom() -> Result<()> {
    let c = campus().await?;
    let south_room = c.server.classroom(&c.root, &c.south, "S1", 10).await?;

    let res = c
        .server
        .post(
            "/api/students",
            Some(&c.admin),
            json!({ "name": "Ada", "schoolId": c.north, "email": "ada@north.test", "gender": "female" }),
        )
        .await?;
    assert_eq!(res.status, StatusCode::CREATED);
    assert_eq!(res.data()["school"], c.north.as_str());
    assert_eq!(res.data()["isActive"], true);
    assert_eq!(res.data()["transferHistory"], json!([]));
    assert!(res.data()["enrollmentDate"].as_str().is_some());

    let dup = c
        .server
        .post("/api/students", Some(&c.admin), json!({ "name": "Ada 2", "schoolId": c.north, "email": "ada@north.test" }))
        .await?;
    assert_eq!(dup.status, StatusCode::CONFLICT);
    assert_eq!(dup.error(), "Student with this email already exists");

    let foreign = c
        .server
        .post("/api/students", Some(&c.admin), json!({ "name": "Bob", "schoolId": c.south }))
        .await?;
    assert_eq!(foreign.status, StatusCode::FORBIDDEN);
    assert_eq!(foreign.error(), "You can only create students in your own school");

    let wrong_room = c
        .server
        .post(
            "/api/students",
            Some(&c.root),
            json!({ "name": "Bob", "schoolId": c.north, "classroomId": south_room }),
        )
        .await?;
    assert_eq!(wrong_room.status, StatusCode::BAD_REQUEST);
    assert_eq!(
        wrong_room.error(),
        "Classroom not found or does not belong to the specified school"
    );

    let bad_gender = c
        .server
        .post("/api/students", Some(&c.root), json!({ "name": "Bob", "schoolId": c.north, "gender": "x" }))
        .await?;
    assert_eq!(bad_gender.status, StatusCode::BAD_REQUEST);
    assert!(bad_gender.body["errors"]["gender"].is_string());

    let missing = c.server.post("/api/students", Some(&c.root), json!({ "name": "Bob" })).await?;
    assert_eq!(missing.error(), "Name and school ID are required");
    Ok(())
}

#[tokio::test]
async fn nested_create_and_listing() -> Result<()> {
    let c = campus().await?;

    let nested = c
        .server
        .post(&format!("/api/schools/{}/students", c.north), Some(&c.admin), json!({ "name": "Zed" }))
        .await?;
    assert_eq!(nested.status, StatusCode::CREATED);
    assert_eq!(nested.data()["school"], c.north.as_str());

    enrol(&c, &c.root, json!({ "name": "Amy", "schoolId": c.north })).await?;
    enrol(&c, &c.root, json!({ "name": "Sam", "schoolId": c.south })).await?;

    let mine = c.server.get("/api/students", Some(&c.admin)).await?;
    let names: Vec<&str> = mine
        .data()
        .as_array()
        .unwrap()
        .iter()
        .filter_map(|s| s["name"].as_str())
        .collect();
    assert_eq!(names, vec!["Amy", "Zed"]);

    let everyone = c.server.get("/api/students", Some(&c.root)).await?;
    assert_eq!(everyone.data().as_array().unwrap().len(), 3);

    let by_school = c
        .server
        .get(&format!("/api/schools/{}/students", c.south), Some(&c.admin))
        .await?;
    assert_eq!(by_school.status, StatusCode::FORBIDDEN);
    Ok(())
}

#[tokio::test]
async fn search_is_not_captured_by_the_id_route() -> Result<()> {
    let c = campus().await?;
    enrol(&c, &c.root, json!({ "name": "Ada Lovelace", "schoolId": c.north })).await?;
    enrol(&c, &c.root, json!({ "name": "Grace Hopper", "schoolId": c.north, "email": "ada@navy.test" })).await?;
    enrol(&c, &c.root, json!({ "name": "Ada South", "schoolId": c.south })).await?;

    let all = c.server.get("/api/students/search?q=ada", Some(&c.root)).await?;
    assert_eq!(all.status, StatusCode::OK);
    assert_eq!(all.data().as_array().unwrap().len(), 3);

    let scoped = c.server.get("/api/students/search?q=ADA", Some(&c.admin)).await?;
    assert_eq!(scoped.data().as_array().unwrap().len(), 2);

    let empty = c.server.get("/api/students/search", Some(&c.root)).await?;
    assert_eq!(empty.status, StatusCode::BAD_REQUEST);
    assert_eq!(empty.error(), "Search query is required");
    Ok(())
}

#[tokio::test]
async fn soft_delete_keeps_the_record() -> Result<()> {
    let c = campus().await?;
    let id = enrol(&c, &c.admin, json!({ "name": "Ada", "schoolId": c.north })).await?;

    let res = c.server.delete(&format!("/api/students/{}", id), Some(&c.admin)).await?;
    assert_eq!(res.status, StatusCode::OK);
    assert_eq!(res.data()["message"], "Student deactivated successfully");

    let after = c.server.get(&format!("/api/students/{}", id), Some(&c.admin)).await?;
    assert_eq!(after.status, StatusCode::OK);
    assert_eq!(after.data()["isActive"], false);

    let active = c.server.get("/api/students?isActive=true", Some(&c.admin)).await?;
    assert!(active.data().as_array().unwrap().is_empty());
    Ok(())
}

#[tokio::test]
async fn transfer_records_history() -> Result<()> {
    let c = campus().await?;
    let target_room = c.server.classroom(&c.root, &c.south, "S1", 1).await?;
    let id = enrol(&c, &c.admin, json!({ "name": "Ada", "schoolId": c.north })).await?;
    let other = enrol(&c, &c.admin, json!({ "name": "Bob", "schoolId": c.north })).await?;

    let res = c
        .server
        .post(
            &format!("/api/students/{}/transfer", id),
            Some(&c.admin),
            json!({ "targetSchoolId": c.south, "targetClassroomId": target_room, "reason": "Moved" }),
        )
        .await?;
    assert_eq!(res.status, StatusCode::CREATED, "{}", res.body);
    assert_eq!(res.data()["message"], "Student transferred successfully");
    assert_eq!(res.data()["student"]["school"], c.south.as_str());
    assert_eq!(res.data()["transferRecord"]["fromSchool"], c.north.as_str());
    assert_eq!(res.data()["transferRecord"]["reason"], "Moved");

    // Now out of the admin's reach
    let gone = c.server.get(&format!("/api/students/{}", id), Some(&c.admin)).await?;
    assert_eq!(gone.status, StatusCode::FORBIDDEN);

    let full = c
        .server
        .post(
            &format!("/api/students/{}/transfer", other),
            Some(&c.admin),
            json!({ "targetSchoolId": c.south, "targetClassroomId": target_room }),
        )
        .await?;
    assert_eq!(full.status, StatusCode::BAD_REQUEST);
    assert_eq!(full.error(), "Target classroom has reached maximum capacity");

    let timeline = c
        .server
        .get(&format!("/api/students/{}/timeline", id), Some(&c.root))
        .await?;
    let kinds: Vec<&str> = timeline
        .data()
        .as_array()
        .unwrap()
        .iter()
        .filter_map(|e| e["type"].as_str())
        .collect();
    assert!(kinds.contains(&"enrollment"));
    assert!(kinds.contains(&"transfer"));
    assert!(kinds.contains(&"last_updated"));
    Ok(())
}

#[tokio::test]
async fn enroll_and_withdraw() -> Result<()> {
    let c = campus().await?;
    let room = c.server.classroom(&c.root, &c.north, "1A", 10).await?;
    let foreign_room = c.server.classroom(&c.root, &c.south, "S1", 10).await?;
    let id = enrol(&c, &c.admin, json!({ "name": "Ada", "schoolId": c.north })).await?;

    let wrong = c
        .server
        .post(&format!("/api/students/{}/enroll", id), Some(&c.admin), json!({ "classroomId": foreign_room }))
        .await?;
    assert_eq!(wrong.status, StatusCode::NOT_FOUND);

    let enrolled = c
        .server
        .post(&format!("/api/students/{}/enroll", id), Some(&c.admin), json!({ "classroomId": room }))
        .await?;
    assert_eq!(enrolled.status, StatusCode::CREATED);
    assert_eq!(enrolled.data()["classroom"], room.as_str());

    let in_room = c
        .server
        .get(&format!("/api/classrooms/{}/students", room), Some(&c.admin))
        .await?;
    assert_eq!(in_room.data().as_array().unwrap().len(), 1);

    let withdrawn = c
        .server
        .post(&format!("/api/students/{}/withdraw", id), Some(&c.admin), json!({}))
        .await?;
    assert_eq!(withdrawn.data()["message"], "Student withdrawn successfully");

    let after = c.server.get(&format!("/api/students/{}", id), Some(&c.admin)).await?;
    assert_eq!(after.data()["isActive"], false);
    assert!(after.data()["classroom"].is_null());
    assert_eq!(after.data()["transferHistory"][0]["type"], "withdrawal");
    Ok(())
}

#[tokio::test]
async fn stats_and_bulk_operations() -> Result<()> {
    let c = campus().await?;
    enrol(&c, &c.root, json!({ "name": "Ada", "schoolId": c.north, "gender": "female", "grade": "5" })).await?;
    let bob = enrol(&c, &c.root, json!({ "name": "Bob", "schoolId": c.north, "gender": "male", "grade": "5" })).await?;
    let cy = enrol(&c, &c.root, json!({ "name": "Cy", "schoolId": c.north })).await?;
    c.server.delete(&format!("/api/students/{}", cy), Some(&c.root)).await?;

    let denied = c.server.get("/api/students/stats/overview", Some(&c.admin)).await?;
    assert_eq!(denied.status, StatusCode::FORBIDDEN);

    let stats = c.server.get("/api/students/stats/overview", Some(&c.root)).await?;
    assert_eq!(stats.status, StatusCode::OK);
    assert_eq!(stats.data()["totalStudents"], 2);
    assert_eq!(stats.data()["totalFemale"], 1);
    assert_eq!(stats.data()["recentEnrollments"], 2);
    assert_eq!(stats.data()["activePercentage"], 66.67);
    assert_eq!(stats.data()["studentsByGrade"], json!([{ "_id": "5", "count": 2 }]));

    let school_stats = c
        .server
        .get(&format!("/api/schools/{}/students/stats", c.north), Some(&c.admin))
        .await?;
    assert_eq!(school_stats.data()["totalStudents"], 2);

    let import = c
        .server
        .post(
            "/api/students/bulk/import",
            Some(&c.root),
            json!({ "students": [
                { "name": "Dee", "schoolId": c.south },
                { "name": "Eve", "schoolId": "000000000000000000000000" },
            ]}),
        )
        .await?;
    assert_eq!(import.status, StatusCode::CREATED);
    assert_eq!(import.data()["totalCreated"], 1);
    assert_eq!(import.data()["totalErrors"], 1);

    let moved = c
        .server
        .post(
            "/api/students/bulk/transfer",
            Some(&c.root),
            json!({ "studentIds": [bob, "000000000000000000000000"], "targetSchoolId": c.south }),
        )
        .await?;
    assert_eq!(moved.status, StatusCode::CREATED);
    assert_eq!(moved.data()["transferred"].as_array().unwrap().len(), 1);
    assert_eq!(moved.data()["failed"][0]["error"], "Student not found");
    Ok(())
}
