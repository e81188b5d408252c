use chrono::{DateTime, Duration, Utc};
use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{info, warn};

use super::payload::{doc_id, doc_str, documents, ensure_school_scope, sort_by_field, Payload};
use super::{DeletionPolicy, Exposure, HandlerResult, Manager};
use crate::database::store::now_timestamp;
use crate::database::{filter, is_object_id, Document, Filter, Models, Role};
use crate::error::ApiError;
use crate::loader::Injectable;
use crate::middleware::auth::AuthUser;

const DELETION: DeletionPolicy = DeletionPolicy::Soft;
const SEARCH_LIMIT: usize = 50;
const RECENT_DAYS: i64 = 30;

const ACCESS_DENIED: &str = "You can only access students from your own school";

fn contains_ci(haystack: Option<&str>, needle: &str) -> bool {
    haystack.is_some_and(|h| h.to_lowercase().contains(needle))
}

/// Case-insensitive substring match on name or email.
fn matches_query(student: &Document, query: &str) -> bool {
    let query = query.to_lowercase();
    contains_ci(doc_str(student, "name"), &query) || contains_ci(doc_str(student, "email"), &query)
}

fn enrolled_since(student: &Document, cutoff: DateTime<Utc>) -> bool {
    doc_str(student, "enrollmentDate")
        .and_then(|d| DateTime::parse_from_rfc3339(d).ok())
        .is_some_and(|d| d.with_timezone(&Utc) >= cutoff)
}

/// `[{_id, count}]` grouped by `field`, ordered by key with missing keys first.
fn group_count(students: &[Document], field: &str) -> Value {
    let mut groups: BTreeMap<Option<String>, u64> = BTreeMap::new();
    for student in students {
        let key = doc_str(student, field).map(str::to_string);
        *groups.entry(key).or_default() += 1;
    }
    Value::Array(
        groups
            .into_iter()
            .map(|(key, count)| json!({ "_id": key, "count": count }))
            .collect(),
    )
}

pub struct StudentService {
    models: Arc<Models>,
}

impl StudentService {
    pub fn new(models: Arc<Models>) -> Self {
        Self { models }
    }

    async fn load(&self, id: &str, user: &AuthUser, denied: &str) -> Result<Document, ApiError> {
        let student = self
            .models
            .students
            .find_by_id(id)
            .await?
            .ok_or_else(|| ApiError::not_found("Student not found"))?;
        ensure_school_scope(user, doc_str(&student, "school").unwrap_or_default(), denied)?;
        Ok(student)
    }

    /// The classroom, provided it belongs to `school`.
    async fn classroom_in(&self, classroom: &str, school: &str) -> Result<Option<Document>, ApiError> {
        Ok(self
            .models
            .classrooms
            .find_by_id(classroom)
            .await?
            .filter(|c| doc_str(c, "school") == Some(school)))
    }

    /// Errors when the classroom's active enrolment already fills its capacity.
    async fn ensure_seat(
        &self,
        classroom: &Document,
        excluding: Option<&str>,
        message: &str,
    ) -> Result<(), ApiError> {
        let Some(capacity) = classroom.get("capacity").and_then(Value::as_i64) else {
            return Ok(());
        };
        let occupants = self
            .models
            .students
            .find(&filter(json!({ "classroom": doc_id(classroom), "isActive": true })))
            .await?;
        let taken = occupants
            .iter()
            .filter(|s| Some(doc_id(s).as_str()) != excluding)
            .count() as i64;
        if taken >= capacity {
            return Err(ApiError::bad_request(message));
        }
        Ok(())
    }

    async fn email_taken(&self, email: &str, except: Option<&str>) -> Result<bool, ApiError> {
        let existing = self
            .models
            .students
            .find_one(&filter(json!({ "email": email })))
            .await?;
        Ok(existing.is_some_and(|s| Some(doc_id(&s).as_str()) != except))
    }

    fn school_param(data: &Payload) -> Option<String> {
        data.string("schoolId")
            .or_else(|| data.string("parentId"))
            .or_else(|| data.string("school"))
    }

    pub async fn list(&self, data: Payload) -> HandlerResult {
        let user = data.user()?;
        let mut criteria = Filter::new();
        if let Some(school) = Self::school_param(&data) {
            criteria.insert("school".to_string(), json!(school));
        }
        if let Some(classroom) = data.str("classroomId") {
            criteria.insert("classroom".to_string(), json!(classroom));
        }
        if let Some(grade) = data.str("grade") {
            criteria.insert("grade".to_string(), json!(grade));
        }
        if let Some(active) = data.flag("isActive") {
            criteria.insert("isActive".to_string(), json!(active));
        }
        if user.is_school_admin() {
            criteria.insert("school".to_string(), json!(user.school_id));
        }

        let mut students = self.models.students.find(&criteria).await?;
        if let Some(query) = data.str("search") {
            students.retain(|s| matches_query(s, query));
        }
        sort_by_field(&mut students, "name");
        Ok(documents(students))
    }

    pub async fn get(&self, data: Payload) -> HandlerResult {
        let id = data.string("id").unwrap_or_default();
        let student = self.load(&id, &data.user()?, ACCESS_DENIED).await?;
        Ok(Value::Object(student))
    }

    pub async fn create(&self, data: Payload) -> HandlerResult {
        let (Some(name), Some(school)) = (data.str("name"), Self::school_param(&data)) else {
            return Err(ApiError::bad_request("Name and school ID are required"));
        };

        if self.models.schools.find_by_id(&school).await?.is_none() {
            return Err(ApiError::not_found("School not found"));
        }
        ensure_school_scope(
            &data.user()?,
            &school,
            "You can only create students in your own school",
        )?;

        let classroom = data.string("classroomId");
        if let Some(classroom_id) = &classroom {
            let room = self.classroom_in(classroom_id, &school).await?.ok_or_else(|| {
                ApiError::bad_request("Classroom not found or does not belong to the specified school")
            })?;
            self.ensure_seat(&room, None, "Classroom has reached maximum capacity")
                .await?;
        }

        if let Some(email) = data.str("email") {
            if self.email_taken(email, None).await? {
                return Err(ApiError::conflict("Student with this email already exists"));
            }
        }

        let mut doc = data.pick(&[
            "email",
            "dateOfBirth",
            "gender",
            "address",
            "phone",
            "grade",
            "emergencyContact",
        ]);
        doc.insert("name".to_string(), json!(name));
        doc.insert("school".to_string(), json!(school));
        doc.insert("classroom".to_string(), json!(classroom));
        doc.insert("enrollmentDate".to_string(), json!(now_timestamp()));
        doc.insert("isActive".to_string(), Value::Bool(true));
        doc.insert("transferHistory".to_string(), json!([]));

        let student = self.models.students.create(doc).await?;
        info!("Enrolled student {} in school {}", name, school);
        Ok(Value::Object(student))
    }

    pub async fn update(&self, data: Payload) -> HandlerResult {
        let id = data.string("id").unwrap_or_default();
        let student = self
            .load(&id, &data.user()?, "You can only update students from your own school")
            .await?;
        let school = doc_str(&student, "school").unwrap_or_default().to_string();
        let updates = data.updates(&["school", "schoolId", "transferHistory", "enrollmentDate"]);

        if let Some(classroom) = updates.get("classroom").and_then(Value::as_str) {
            if Some(classroom) != doc_str(&student, "classroom") {
                let room = self.classroom_in(classroom, &school).await?.ok_or_else(|| {
                    ApiError::bad_request(
                        "Classroom not found or does not belong to the student's school",
                    )
                })?;
                self.ensure_seat(&room, Some(&id), "Classroom has reached maximum capacity")
                    .await?;
            }
        }

        if let Some(email) = updates.get("email").and_then(Value::as_str) {
            if Some(email) != doc_str(&student, "email") && self.email_taken(email, Some(&id)).await? {
                return Err(ApiError::conflict("Student with this email already exists"));
            }
        }

        let updated = self
            .models
            .students
            .update(&id, updates)
            .await?
            .ok_or_else(|| ApiError::not_found("Student not found"))?;
        Ok(Value::Object(updated))
    }

    /// Deactivates; the record is kept.
    pub async fn delete(&self, data: Payload) -> HandlerResult {
        let id = data.string("id").unwrap_or_default();
        self.load(&id, &data.user()?, "You can only delete students from your own school")
            .await?;
        DELETION.apply(&self.models.students, &id).await?;
        info!("Deactivated student {}", id);
        Ok(json!({ "message": "Student deactivated successfully" }))
    }

    pub async fn list_by_school(&self, data: Payload) -> HandlerResult {
        let school = Self::school_param(&data).unwrap_or_default();
        if self.models.schools.find_by_id(&school).await?.is_none() {
            return Err(ApiError::not_found("School not found"));
        }
        ensure_school_scope(&data.user()?, &school, ACCESS_DENIED)?;

        let mut students = self
            .models
            .students
            .find(&filter(json!({ "school": school, "isActive": true })))
            .await?;
        sort_by_field(&mut students, "name");
        Ok(documents(students))
    }

    pub async fn list_by_classroom(&self, data: Payload) -> HandlerResult {
        let classroom_id = data.string("classroomId").unwrap_or_default();
        let classroom = self
            .models
            .classrooms
            .find_by_id(&classroom_id)
            .await?
            .ok_or_else(|| ApiError::not_found("Classroom not found"))?;
        ensure_school_scope(
            &data.user()?,
            doc_str(&classroom, "school").unwrap_or_default(),
            ACCESS_DENIED,
        )?;

        let mut students = self
            .models
            .students
            .find(&filter(json!({ "classroom": classroom_id, "isActive": true })))
            .await?;
        sort_by_field(&mut students, "name");
        Ok(documents(students))
    }

    /// Moves a student to another school (and optionally a classroom there),
    /// appending to its transfer history.
    pub async fn transfer(&self, data: Payload) -> HandlerResult {
        let id = data.string("id").unwrap_or_default();
        let student = self
            .load(&id, &data.user()?, "You can only transfer students from your own school")
            .await?;

        let target_school = data.string("targetSchoolId").unwrap_or_default();
        if self.models.schools.find_by_id(&target_school).await?.is_none() {
            return Err(ApiError::not_found("Target school not found"));
        }

        let target_classroom = data.string("targetClassroomId");
        if let Some(classroom_id) = &target_classroom {
            let room = self
                .classroom_in(classroom_id, &target_school)
                .await?
                .ok_or_else(|| {
                    ApiError::bad_request("Target classroom not found or does not belong to target school")
                })?;
            self.ensure_seat(&room, Some(&id), "Target classroom has reached maximum capacity")
                .await?;
        }

        let record = json!({
            "fromSchool": student.get("school"),
            "toSchool": target_school,
            "fromClassroom": student.get("classroom"),
            "toClassroom": target_classroom,
            "date": now_timestamp(),
            "reason": data.str("reason").unwrap_or("Transfer"),
        });
        let mut history = student
            .get("transferHistory")
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default();
        history.push(record.clone());

        let updated = self
            .models
            .students
            .update(
                &id,
                filter(json!({
                    "school": target_school,
                    "classroom": target_classroom,
                    "transferHistory": history,
                })),
            )
            .await?
            .ok_or_else(|| ApiError::not_found("Student not found"))?;

        info!("Transferred student {} to school {}", id, target_school);
        Ok(json!({
            "message": "Student transferred successfully",
            "student": updated,
            "transferRecord": record,
        }))
    }

    pub async fn enroll(&self, data: Payload) -> HandlerResult {
        let id = data.string("id").unwrap_or_default();
        let student = self
            .load(&id, &data.user()?, "You can only enroll students from your own school")
            .await?;
        let school = doc_str(&student, "school").unwrap_or_default().to_string();

        let classroom_id = data.string("classroomId").unwrap_or_default();
        let room = self.classroom_in(&classroom_id, &school).await?.ok_or_else(|| {
            ApiError::not_found("Classroom not found or does not belong to student's school")
        })?;
        self.ensure_seat(&room, Some(&id), "Classroom has reached maximum capacity")
            .await?;

        let updated = self
            .models
            .students
            .update(&id, filter(json!({ "classroom": classroom_id })))
            .await?
            .ok_or_else(|| ApiError::not_found("Student not found"))?;
        Ok(Value::Object(updated))
    }

    pub async fn withdraw(&self, data: Payload) -> HandlerResult {
        let id = data.string("id").unwrap_or_default();
        let student = self
            .load(&id, &data.user()?, "You can only withdraw students from your own school")
            .await?;

        let mut history = student
            .get("transferHistory")
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default();
        history.push(json!({
            "date": now_timestamp(),
            "reason": data.str("reason").unwrap_or("Withdrawal"),
            "type": "withdrawal",
        }));

        self.models
            .students
            .update(
                &id,
                filter(json!({
                    "transferHistory": history,
                    "isActive": false,
                    "classroom": null,
                })),
            )
            .await?;
        info!("Withdrew student {}", id);
        Ok(json!({ "message": "Student withdrawn successfully" }))
    }

    pub async fn search(&self, data: Payload) -> HandlerResult {
        let query = data
            .str("q")
            .ok_or_else(|| ApiError::bad_request("Search query is required"))?;
        let user = data.user()?;

        let mut criteria = Filter::new();
        if let Some(school) = data.str("schoolId") {
            criteria.insert("school".to_string(), json!(school));
        }
        if user.is_school_admin() {
            criteria.insert("school".to_string(), json!(user.school_id));
        }

        let students: Vec<Document> = self
            .models
            .students
            .find(&criteria)
            .await?
            .into_iter()
            .filter(|s| matches_query(s, query))
            .take(SEARCH_LIMIT)
            .collect();
        Ok(documents(students))
    }

    pub async fn get_stats(&self, _data: Payload) -> HandlerResult {
        let all = self.models.students.count(&Filter::new()).await?;
        let active = self
            .models
            .students
            .find(&filter(json!({ "isActive": true })))
            .await?;
        let by_gender = |gender: &str| active.iter().filter(|s| doc_str(s, "gender") == Some(gender)).count();
        let cutoff = Utc::now() - Duration::days(RECENT_DAYS);
        let recent = active.iter().filter(|s| enrolled_since(s, cutoff)).count();
        let active_percentage = if all > 0 {
            (active.len() as f64 / all as f64 * 10000.0).round() / 100.0
        } else {
            0.0
        };

        Ok(json!({
            "totalStudents": active.len(),
            "totalMale": by_gender("male"),
            "totalFemale": by_gender("female"),
            "studentsByGrade": group_count(&active, "grade"),
            "recentEnrollments": recent,
            "activePercentage": active_percentage,
        }))
    }

    pub async fn get_school_stats(&self, data: Payload) -> HandlerResult {
        let school = Self::school_param(&data)
            .ok_or_else(|| ApiError::bad_request("School ID is required"))?;
        ensure_school_scope(&data.user()?, &school, ACCESS_DENIED)?;

        let students = self
            .models
            .students
            .find(&filter(json!({ "school": school, "isActive": true })))
            .await?;

        Ok(json!({
            "schoolId": school,
            "totalStudents": students.len(),
            "studentsByClassroom": group_count(&students, "classroom"),
        }))
    }

    /// Enrolment, transfers and withdrawals, and the last profile change, newest first.
    pub async fn get_timeline(&self, data: Payload) -> HandlerResult {
        let id = data.string("id").unwrap_or_default();
        let student = self.load(&id, &data.user()?, ACCESS_DENIED).await?;

        let mut timeline = vec![json!({
            "type": "enrollment",
            "date": student.get("enrollmentDate"),
            "description": "Student enrolled",
        })];
        for entry in student
            .get("transferHistory")
            .and_then(Value::as_array)
            .into_iter()
            .flatten()
        {
            timeline.push(json!({
                "type": entry.get("type").and_then(Value::as_str).unwrap_or("transfer"),
                "date": entry.get("date"),
                "description": entry.get("reason").and_then(Value::as_str).unwrap_or("Transfer"),
                "details": entry,
            }));
        }
        timeline.push(json!({
            "type": "last_updated",
            "date": student.get("updatedAt"),
            "description": "Profile last updated",
        }));

        // All dates share the store's RFC 3339 format, so string order is time order.
        timeline.sort_by(|a, b| b["date"].as_str().cmp(&a["date"].as_str()));
        Ok(Value::Array(timeline))
    }

    pub async fn bulk_import(&self, data: Payload) -> HandlerResult {
        let entries = data
            .array("students")
            .filter(|items| !items.is_empty())
            .ok_or_else(|| ApiError::bad_request("Valid students array is required"))?;

        let mut created = Vec::new();
        let mut errors = Vec::new();
        for entry in entries {
            match self.import_entry(entry).await {
                Ok(student) => created.push(Value::Object(student)),
                Err(err) => {
                    warn!("Bulk student entry rejected: {}", err);
                    errors.push(json!({ "data": entry, "error": err.message() }));
                }
            }
        }

        Ok(json!({
            "totalCreated": created.len(),
            "totalErrors": errors.len(),
            "created": created,
            "errors": errors,
        }))
    }

    async fn import_entry(&self, entry: &Value) -> Result<Document, ApiError> {
        let mut doc = entry.as_object().cloned().unwrap_or_default();
        doc.remove("_id");
        if let Some(school) = doc.remove("schoolId") {
            doc.entry("school").or_insert(school);
        }
        if let Some(school) = doc_str(&doc, "school") {
            if !is_object_id(school) || self.models.schools.find_by_id(school).await?.is_none() {
                return Err(ApiError::not_found("School not found"));
            }
        }
        if let Some(email) = doc_str(&doc, "email") {
            if self.email_taken(email, None).await? {
                return Err(ApiError::conflict("Student with this email already exists"));
            }
        }
        doc.insert("enrollmentDate".to_string(), json!(now_timestamp()));
        doc.insert("isActive".to_string(), Value::Bool(true));
        doc.entry("transferHistory").or_insert(json!([]));
        Ok(self.models.students.create(doc).await?)
    }

    /// Runs [`StudentService::transfer`] per id; one failure never stops the batch.
    pub async fn bulk_transfer(&self, data: Payload) -> HandlerResult {
        let ids = data
            .array("studentIds")
            .filter(|items| !items.is_empty())
            .ok_or_else(|| ApiError::bad_request("Valid student IDs array is required"))?;
        let target_school = data
            .str("targetSchoolId")
            .ok_or_else(|| ApiError::bad_request("Target school ID is required"))?;

        let mut transferred = Vec::new();
        let mut failed = Vec::new();
        for id in ids {
            let request = Payload::new(json!({
                "id": id,
                "targetSchoolId": target_school,
                "targetClassroomId": data.get("targetClassroomId"),
                "reason": data.get("reason"),
                "user": data.get("user"),
            }));
            match self.transfer(request).await {
                Ok(result) => transferred.push(json!({ "studentId": id, "result": result })),
                Err(err) => failed.push(json!({ "studentId": id, "error": err.message() })),
            }
        }

        Ok(json!({ "transferred": transferred, "failed": failed }))
    }
}

pub fn build(injectable: &Injectable) -> Manager {
    let service = Arc::new(StudentService::new(injectable.models.clone()));
    let admins = [Role::Superadmin, Role::SchoolAdmin];

    Manager::new("student")
        .bind("list", &service, |s, data, _| async move { s.list(Payload::new(data)).await })
        .bind("get", &service, |s, data, _| async move { s.get(Payload::new(data)).await })
        .bind("create", &service, |s, data, _| async move { s.create(Payload::new(data)).await })
        .bind("update", &service, |s, data, _| async move { s.update(Payload::new(data)).await })
        .bind("delete", &service, |s, data, _| async move { s.delete(Payload::new(data)).await })
        .bind("listBySchool", &service, |s, data, _| async move {
            s.list_by_school(Payload::new(data)).await
        })
        .bind("listByClassroom", &service, |s, data, _| async move {
            s.list_by_classroom(Payload::new(data)).await
        })
        .bind("transfer", &service, |s, data, _| async move {
            s.transfer(Payload::new(data)).await
        })
        .bind("enroll", &service, |s, data, _| async move { s.enroll(Payload::new(data)).await })
        .bind("withdraw", &service, |s, data, _| async move {
            s.withdraw(Payload::new(data)).await
        })
        .bind("search", &service, |s, data, _| async move { s.search(Payload::new(data)).await })
        .bind("getStats", &service, |s, data, _| async move {
            s.get_stats(Payload::new(data)).await
        })
        .bind("getSchoolStats", &service, |s, data, _| async move {
            s.get_school_stats(Payload::new(data)).await
        })
        .bind("getTimeline", &service, |s, data, _| async move {
            s.get_timeline(Payload::new(data)).await
        })
        .bind("bulkImport", &service, |s, data, _| async move {
            s.bulk_import(Payload::new(data)).await
        })
        .bind("bulkTransfer", &service, |s, data, _| async move {
            s.bulk_transfer(Payload::new(data)).await
        })
        .deletion_policy(DELETION)
        .expose_decl("get=search")
        .expose(Exposure::get("list").with("__auth").roles(&admins))
        .expose(Exposure::get("get").with("__auth").roles(&admins))
        .expose(Exposure::post("create").with("__auth").roles(&admins))
        .expose(Exposure::post("transfer").with("__auth").roles(&admins))
        .expose(Exposure::get("getStats").with("__auth").roles(&[Role::Superadmin]))
}
