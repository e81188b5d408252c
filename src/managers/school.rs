use serde_json::{json, Value};
use std::sync::Arc;
use tracing::info;

use super::payload::{doc_id, doc_str, documents, ensure_school_scope, sort_by_field, Payload};
use super::{DeletionPolicy, Exposure, HandlerResult, Manager};
use crate::database::{filter, Document, Models, Role};
use crate::error::ApiError;
use crate::loader::Injectable;

const DELETION: DeletionPolicy = DeletionPolicy::Hard;
const INVALID_ID: &str = "Invalid school ID format";

pub struct SchoolService {
    models: Arc<Models>,
}

impl SchoolService {
    pub fn new(models: Arc<Models>) -> Self {
        Self { models }
    }

    /// Loads the school named by `id` and applies the caller's scope.
    async fn load(&self, data: &Payload, denied: &str) -> Result<(String, Document), ApiError> {
        let id = data.object_id("id", INVALID_ID)?;
        let school = self
            .models
            .schools
            .find_by_id(&id)
            .await?
            .ok_or_else(|| ApiError::not_found("School not found"))?;
        ensure_school_scope(&data.user()?, &id, denied)?;
        Ok((id, school))
    }

    async fn name_taken(&self, name: &str, except: Option<&str>) -> Result<bool, ApiError> {
        let existing = self
            .models
            .schools
            .find_one(&filter(json!({ "name": name })))
            .await?;
        Ok(existing.is_some_and(|s| Some(doc_id(&s).as_str()) != except))
    }

    pub async fn list(&self, data: Payload) -> HandlerResult {
        let user = data.user()?;
        let mut criteria = filter(json!({}));
        if user.is_school_admin() {
            criteria.insert("_id".to_string(), json!(user.school_id));
        }
        if let Some(active) = data.flag("isActive") {
            criteria.insert("isActive".to_string(), json!(active));
        }

        let mut schools = self.models.schools.find(&criteria).await?;
        sort_by_field(&mut schools, "name");
        Ok(documents(schools))
    }

    pub async fn get(&self, data: Payload) -> HandlerResult {
        let (_, school) = self.load(&data, "You can only access your own school").await?;
        Ok(Value::Object(school))
    }

    pub async fn create(&self, data: Payload) -> HandlerResult {
        let name = data
            .str("name")
            .ok_or_else(|| ApiError::bad_request("School name is required"))?;

        if self.name_taken(name, None).await? {
            return Err(ApiError::conflict("School with this name already exists"));
        }

        let mut doc = data.pick(&["name", "address", "contactEmail", "phone", "principal"]);
        doc.insert("isActive".to_string(), Value::Bool(true));
        let school = self.models.schools.create(doc).await?;
        info!("Created school {}", name);
        Ok(Value::Object(school))
    }

    pub async fn update(&self, data: Payload) -> HandlerResult {
        let (id, school) = self.load(&data, "You can only update your own school").await?;
        let updates = data.updates(&[]);

        if let Some(name) = updates.get("name").and_then(Value::as_str) {
            if Some(name) != doc_str(&school, "name") && self.name_taken(name, Some(&id)).await? {
                return Err(ApiError::conflict("School with this name already exists"));
            }
        }

        let updated = self
            .models
            .schools
            .update(&id, updates)
            .await?
            .ok_or_else(|| ApiError::not_found("School not found"))?;
        Ok(Value::Object(updated))
    }

    /// Refuses while classrooms or students still reference the school.
    pub async fn delete(&self, data: Payload) -> HandlerResult {
        let id = data.object_id("id", INVALID_ID)?;
        if self.models.schools.find_by_id(&id).await?.is_none() {
            return Err(ApiError::not_found("School not found"));
        }

        let refs = filter(json!({ "school": id }));
        if self.models.classrooms.count(&refs).await? > 0 {
            return Err(ApiError::conflict("Cannot delete school with existing classrooms"));
        }
        if self.models.students.count(&refs).await? > 0 {
            return Err(ApiError::conflict("Cannot delete school with existing students"));
        }

        DELETION.apply(&self.models.schools, &id).await?;
        info!("Deleted school {}", id);
        Ok(Value::Null)
    }

    pub async fn get_stats(&self, _data: Payload) -> HandlerResult {
        let total = self.models.schools.count(&filter(json!({}))).await?;
        let active = self
            .models
            .schools
            .count(&filter(json!({ "isActive": true })))
            .await?;
        let classrooms = self.models.classrooms.count(&filter(json!({}))).await?;
        let students = self
            .models
            .students
            .count(&filter(json!({ "isActive": true })))
            .await?;

        Ok(json!({
            "totalSchools": total,
            "activeSchools": active,
            "inactiveSchools": total.saturating_sub(active),
            "totalClassrooms": classrooms,
            "totalStudents": students,
        }))
    }

    pub async fn get_classrooms(&self, data: Payload) -> HandlerResult {
        let (id, _) = self
            .load(&data, "You can only access classrooms from your own school")
            .await?;
        let mut classrooms = self
            .models
            .classrooms
            .find(&filter(json!({ "school": id })))
            .await?;
        sort_by_field(&mut classrooms, "name");
        Ok(documents(classrooms))
    }

    pub async fn get_students(&self, data: Payload) -> HandlerResult {
        let (id, _) = self
            .load(&data, "You can only access students from your own school")
            .await?;
        let mut students = self
            .models
            .students
            .find(&filter(json!({ "school": id, "isActive": true })))
            .await?;
        sort_by_field(&mut students, "name");
        Ok(documents(students))
    }

    pub async fn toggle_status(&self, data: Payload) -> HandlerResult {
        let (id, school) = self.load(&data, "You can only update your own school").await?;
        let active = school.get("isActive").and_then(Value::as_bool).unwrap_or(true);

        let updated = self
            .models
            .schools
            .update(&id, filter(json!({ "isActive": !active })))
            .await?
            .ok_or_else(|| ApiError::not_found("School not found"))?;
        info!("School {} is now {}", id, if active { "inactive" } else { "active" });
        Ok(Value::Object(updated))
    }
}

pub fn build(injectable: &Injectable) -> Manager {
    let service = Arc::new(SchoolService::new(injectable.models.clone()));
    let admins = [Role::Superadmin, Role::SchoolAdmin];

    Manager::new("school")
        .bind("list", &service, |s, data, _| async move { s.list(Payload::new(data)).await })
        .bind("get", &service, |s, data, _| async move { s.get(Payload::new(data)).await })
        .bind("create", &service, |s, data, _| async move { s.create(Payload::new(data)).await })
        .bind("update", &service, |s, data, _| async move { s.update(Payload::new(data)).await })
        .bind("delete", &service, |s, data, _| async move { s.delete(Payload::new(data)).await })
        .bind("getStats", &service, |s, data, _| async move {
            s.get_stats(Payload::new(data)).await
        })
        .bind("getClassrooms", &service, |s, data, _| async move {
            s.get_classrooms(Payload::new(data)).await
        })
        .bind("getStudents", &service, |s, data, _| async move {
            s.get_students(Payload::new(data)).await
        })
        .bind("toggleStatus", &service, |s, data, _| async move {
            s.toggle_status(Payload::new(data)).await
        })
        .deletion_policy(DELETION)
        .expose(
            Exposure::get("list")
                .with("__requestId")
                .with("__auth")
                .roles(&admins),
        )
        .expose(Exposure::get("get").with("__auth").roles(&admins))
        .expose(
            Exposure::post("create")
                .with("__auth")
                .with("__rateLimit.schoolCreation")
                .roles(&[Role::Superadmin]),
        )
        .expose(Exposure::get("getStats").with("__auth").roles(&[Role::Superadmin]))
}
