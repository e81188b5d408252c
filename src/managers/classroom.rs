use serde_json::{json, Value};
use std::sync::Arc;
use tracing::{info, warn};

use super::payload::{doc_id, doc_str, documents, ensure_school_scope, sort_by_field, Payload};
use super::{DeletionPolicy, Exposure, HandlerResult, Manager};
use crate::database::models::classroom::DEFAULT_CAPACITY;
use crate::database::models::Resource;
use crate::database::{filter, Document, Filter, Models, Role};
use crate::error::ApiError;
use crate::loader::Injectable;
use crate::middleware::auth::AuthUser;

const DELETION: DeletionPolicy = DeletionPolicy::Hard;

const ACCESS_DENIED: &str = "You can only access classrooms from your own school";
const UPDATE_DENIED: &str = "You can only update classrooms from your own school";

fn capacity_of(classroom: &Document) -> i64 {
    classroom
        .get("capacity")
        .and_then(Value::as_i64)
        .unwrap_or(DEFAULT_CAPACITY)
}

fn with_seats(mut classroom: Document, students: u64) -> Value {
    let seats = capacity_of(&classroom) - students as i64;
    classroom.insert("studentCount".to_string(), json!(students));
    classroom.insert("availableSeats".to_string(), json!(seats));
    Value::Object(classroom)
}

/// Capacity as sent by the client; unparseable input is passed through for
/// the schema check to reject.
fn capacity_input(data: &Payload) -> Value {
    match data.get("capacity") {
        None => json!(DEFAULT_CAPACITY),
        Some(raw) => data.int("capacity").map(Value::from).unwrap_or_else(|| raw.clone()),
    }
}

pub struct ClassroomService {
    models: Arc<Models>,
}

impl ClassroomService {
    pub fn new(models: Arc<Models>) -> Self {
        Self { models }
    }

    async fn load(&self, id: &str, user: &AuthUser, denied: &str) -> Result<Document, ApiError> {
        let classroom = self
            .models
            .classrooms
            .find_by_id(id)
            .await?
            .ok_or_else(|| ApiError::not_found("Classroom not found"))?;
        ensure_school_scope(user, doc_str(&classroom, "school").unwrap_or_default(), denied)?;
        Ok(classroom)
    }

    async fn enrolled(&self, classroom_id: &str, active_only: bool) -> Result<u64, ApiError> {
        let mut criteria = filter(json!({ "classroom": classroom_id }));
        if active_only {
            criteria.insert("isActive".to_string(), Value::Bool(true));
        }
        Ok(self.models.students.count(&criteria).await?)
    }

    async fn annotate(&self, classrooms: Vec<Document>, active_only: bool) -> Result<Value, ApiError> {
        let mut out = Vec::with_capacity(classrooms.len());
        for classroom in classrooms {
            let students = self.enrolled(&doc_id(&classroom), active_only).await?;
            out.push(with_seats(classroom, students));
        }
        Ok(Value::Array(out))
    }

    async fn name_taken(&self, school: &str, name: &str, except: Option<&str>) -> Result<bool, ApiError> {
        let existing = self
            .models
            .classrooms
            .find_one(&filter(json!({ "school": school, "name": name })))
            .await?;
        Ok(existing.is_some_and(|c| Some(doc_id(&c).as_str()) != except))
    }

    async fn school_exists(&self, school: &str) -> Result<bool, ApiError> {
        Ok(self.models.schools.find_by_id(school).await?.is_some())
    }

    /// Accepts `schoolId`, a nested route's `parentId`, or `school`.
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
        if let Some(grade) = data.str("grade") {
            criteria.insert("grade".to_string(), json!(grade));
        }
        if let Some(active) = data.flag("isActive") {
            criteria.insert("isActive".to_string(), json!(active));
        }
        if user.is_school_admin() {
            criteria.insert("school".to_string(), json!(user.school_id));
        }

        let mut classrooms = self.models.classrooms.find(&criteria).await?;
        sort_by_field(&mut classrooms, "name");
        self.annotate(classrooms, true).await
    }

    pub async fn get(&self, data: Payload) -> HandlerResult {
        let id = data.string("id").unwrap_or_default();
        let classroom = self.load(&id, &data.user()?, ACCESS_DENIED).await?;
        let students = self.enrolled(&id, true).await?;
        Ok(with_seats(classroom, students))
    }

    pub async fn create(&self, data: Payload) -> HandlerResult {
        let (Some(name), Some(school)) = (data.str("name"), Self::school_param(&data)) else {
            return Err(ApiError::bad_request("Classroom name and school ID are required"));
        };

        if !self.school_exists(&school).await? {
            return Err(ApiError::not_found("School not found"));
        }
        ensure_school_scope(
            &data.user()?,
            &school,
            "You can only create classrooms in your own school",
        )?;
        if self.name_taken(&school, name, None).await? {
            return Err(ApiError::conflict(
                "A classroom with this name already exists in this school",
            ));
        }

        let mut doc = data.pick(&["name", "grade", "section"]);
        doc.insert("capacity".to_string(), capacity_input(&data));
        doc.insert(
            "resources".to_string(),
            data.get("resources").cloned().unwrap_or_else(|| json!([])),
        );
        doc.insert("school".to_string(), json!(school));
        doc.insert("isActive".to_string(), Value::Bool(true));

        let classroom = self.models.classrooms.create(doc).await?;
        info!("Created classroom {} in school {}", name, school);
        Ok(Value::Object(classroom))
    }

    pub async fn update(&self, data: Payload) -> HandlerResult {
        let id = data.string("id").unwrap_or_default();
        let classroom = self.load(&id, &data.user()?, UPDATE_DENIED).await?;
        let school = doc_str(&classroom, "school").unwrap_or_default().to_string();
        let mut updates = data.updates(&["school", "schoolId"]);

        if let Some(name) = updates.get("name").and_then(Value::as_str) {
            if Some(name) != doc_str(&classroom, "name") && self.name_taken(&school, name, Some(&id)).await? {
                return Err(ApiError::conflict(
                    "A classroom with this name already exists in this school",
                ));
            }
        }

        if updates.contains_key("capacity") {
            let capacity = capacity_input(&data);
            if let Some(requested) = capacity.as_i64() {
                if requested < capacity_of(&classroom) {
                    let students = self.enrolled(&id, false).await?;
                    if students as i64 > requested {
                        return Err(ApiError::bad_request(format!(
                            "Cannot reduce capacity below current student count ({})",
                            students
                        )));
                    }
                }
            }
            updates.insert("capacity".to_string(), capacity);
        }

        let updated = self
            .models
            .classrooms
            .update(&id, updates)
            .await?
            .ok_or_else(|| ApiError::not_found("Classroom not found"))?;
        Ok(Value::Object(updated))
    }

    pub async fn delete(&self, data: Payload) -> HandlerResult {
        let id = data.string("id").unwrap_or_default();
        self.load(&id, &data.user()?, "You can only delete classrooms from your own school")
            .await?;

        if self.enrolled(&id, false).await? > 0 {
            return Err(ApiError::bad_request("Cannot delete classroom with assigned students"));
        }

        DELETION.apply(&self.models.classrooms, &id).await?;
        info!("Deleted classroom {}", id);
        Ok(json!({ "message": "Classroom deleted successfully" }))
    }

    pub async fn get_stats(&self, data: Payload) -> HandlerResult {
        let id = data.string("id").unwrap_or_default();
        let classroom = self.load(&id, &data.user()?, ACCESS_DENIED).await?;
        let total = self.enrolled(&id, false).await?;
        let active = self.enrolled(&id, true).await?;
        let capacity = capacity_of(&classroom);
        let utilization = if capacity > 0 {
            json!(format!("{:.2}", active as f64 / capacity as f64 * 100.0))
        } else {
            json!(0)
        };

        Ok(json!({
            "_id": id,
            "name": classroom.get("name"),
            "capacity": capacity,
            "totalStudents": total,
            "activeStudents": active,
            "availableSeats": capacity - active as i64,
            "utilizationRate": utilization,
            "resources": classroom.get("resources").cloned().unwrap_or_else(|| json!([])),
            "grade": classroom.get("grade"),
            "section": classroom.get("section"),
            "isActive": classroom.get("isActive"),
        }))
    }

    pub async fn get_students(&self, data: Payload) -> HandlerResult {
        let id = data.string("id").unwrap_or_default();
        self.load(&id, &data.user()?, ACCESS_DENIED).await?;
        let mut students = self
            .models
            .students
            .find(&filter(json!({ "classroom": id })))
            .await?;
        sort_by_field(&mut students, "name");
        Ok(documents(students))
    }

    pub async fn list_by_school(&self, data: Payload) -> HandlerResult {
        let school = Self::school_param(&data).unwrap_or_default();
        if !self.school_exists(&school).await? {
            return Err(ApiError::not_found("School not found"));
        }
        ensure_school_scope(&data.user()?, &school, ACCESS_DENIED)?;

        let mut classrooms = self
            .models
            .classrooms
            .find(&filter(json!({ "school": school })))
            .await?;
        sort_by_field(&mut classrooms, "name");
        self.annotate(classrooms, false).await
    }

    pub async fn update_capacity(&self, data: Payload) -> HandlerResult {
        let capacity = data
            .int("capacity")
            .filter(|c| *c >= 1)
            .ok_or_else(|| ApiError::bad_request("Valid capacity is required"))?;
        let id = data.string("id").unwrap_or_default();
        self.load(&id, &data.user()?, UPDATE_DENIED).await?;

        let students = self.enrolled(&id, false).await?;
        if capacity < students as i64 {
            return Err(ApiError::bad_request(format!(
                "Cannot set capacity below current student count ({})",
                students
            )));
        }

        let updated = self
            .models
            .classrooms
            .update(&id, filter(json!({ "capacity": capacity })))
            .await?
            .ok_or_else(|| ApiError::not_found("Classroom not found"))?;
        Ok(Value::Object(updated))
    }

    pub async fn add_resource(&self, data: Payload) -> HandlerResult {
        let resource = data
            .str("resource")
            .ok_or_else(|| ApiError::bad_request("Resource is required"))?;
        if Resource::parse(resource).is_none() {
            return Err(ApiError::bad_request(
                "Invalid resource. Must be one of: projector, smartboard, ac, computers, lab, library",
            ));
        }
        let id = data.string("id").unwrap_or_default();
        let classroom = self.load(&id, &data.user()?, UPDATE_DENIED).await?;

        let mut resources = classroom
            .get("resources")
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default();
        if resources.iter().any(|r| r.as_str() == Some(resource)) {
            return Ok(Value::Object(classroom));
        }
        resources.push(json!(resource));
        self.save_resources(&id, resources).await
    }

    pub async fn remove_resource(&self, data: Payload) -> HandlerResult {
        let resource = data.string("resource").unwrap_or_default();
        let id = data.string("id").unwrap_or_default();
        let classroom = self.load(&id, &data.user()?, UPDATE_DENIED).await?;

        let resources: Vec<Value> = classroom
            .get("resources")
            .and_then(Value::as_array)
            .map(|items| {
                items
                    .iter()
                    .filter(|r| r.as_str() != Some(resource.as_str()))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default();
        self.save_resources(&id, resources).await
    }

    async fn save_resources(&self, id: &str, resources: Vec<Value>) -> HandlerResult {
        let updated = self
            .models
            .classrooms
            .update(id, filter(json!({ "resources": resources })))
            .await?
            .ok_or_else(|| ApiError::not_found("Classroom not found"))?;
        Ok(Value::Object(updated))
    }

    /// Creates each entry independently; failures are reported per entry.
    pub async fn bulk_create(&self, data: Payload) -> HandlerResult {
        let entries = data
            .array("classrooms")
            .filter(|items| !items.is_empty())
            .ok_or_else(|| ApiError::bad_request("Valid classrooms array is required"))?;

        let mut created = Vec::new();
        let mut errors = Vec::new();
        for entry in entries {
            match self.create_entry(entry).await {
                Ok(classroom) => created.push(Value::Object(classroom)),
                Err(err) => {
                    warn!("Bulk classroom entry rejected: {}", err);
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

    async fn create_entry(&self, entry: &Value) -> Result<Document, ApiError> {
        let mut doc = entry.as_object().cloned().unwrap_or_default();
        doc.remove("_id");
        let school = doc_str(&doc, "school").unwrap_or_default().to_string();
        if !school.is_empty() && !self.school_exists(&school).await? {
            return Err(ApiError::not_found("School not found"));
        }
        doc.entry("capacity").or_insert(json!(DEFAULT_CAPACITY));
        doc.entry("resources").or_insert(json!([]));
        doc.insert("isActive".to_string(), Value::Bool(true));
        Ok(self.models.classrooms.create(doc).await?)
    }
}

pub fn build(injectable: &Injectable) -> Manager {
    let service = Arc::new(ClassroomService::new(injectable.models.clone()));
    let admins = [Role::Superadmin, Role::SchoolAdmin];

    Manager::new("classroom")
        .bind("list", &service, |s, data, _| async move { s.list(Payload::new(data)).await })
        .bind("get", &service, |s, data, _| async move { s.get(Payload::new(data)).await })
        .bind("create", &service, |s, data, _| async move { s.create(Payload::new(data)).await })
        .bind("update", &service, |s, data, _| async move { s.update(Payload::new(data)).await })
        .bind("delete", &service, |s, data, _| async move { s.delete(Payload::new(data)).await })
        .bind("getStats", &service, |s, data, _| async move {
            s.get_stats(Payload::new(data)).await
        })
        .bind("getStudents", &service, |s, data, _| async move {
            s.get_students(Payload::new(data)).await
        })
        .bind("listBySchool", &service, |s, data, _| async move {
            s.list_by_school(Payload::new(data)).await
        })
        .bind("updateCapacity", &service, |s, data, _| async move {
            s.update_capacity(Payload::new(data)).await
        })
        .bind("addResource", &service, |s, data, _| async move {
            s.add_resource(Payload::new(data)).await
        })
        .bind("removeResource", &service, |s, data, _| async move {
            s.remove_resource(Payload::new(data)).await
        })
        .bind("bulkCreate", &service, |s, data, _| async move {
            s.bulk_create(Payload::new(data)).await
        })
        .deletion_policy(DELETION)
        .expose(Exposure::get("list").with("__auth").roles(&admins))
        .expose(Exposure::get("get").with("__auth").roles(&admins))
        .expose(Exposure::get("listBySchool").with("__auth").roles(&admins))
        .expose(Exposure::get("getStats").with("__auth").roles(&admins))
        .expose(Exposure::post("create").with("__auth").roles(&admins))
}
