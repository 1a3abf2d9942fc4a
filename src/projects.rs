//! Project reads and saves on behalf of a user.
//!
//! Rights:
//!   admin       -> every project
//!   RI          -> projects of its entities (plus the ones it manages, read-only)
//!   PM / deputy -> projects it manages, matrix and technical data only
//!
//! A changed Docktor group URL clears the group name; the name is then
//! fetched again from Docktor in the background.

use std::collections::HashSet;
use std::sync::Arc;

use chrono::Utc;

use crate::db::{DbProject, EntityStore, EntityType, ProjectStore};
use crate::docktor::WorkloadInspector;
use crate::error::{DocktorError, ValidationError};
use crate::types::User;

pub struct ProjectService {
    projects: Arc<dyn ProjectStore>,
    entities: Arc<dyn EntityStore>,
    inspector: Option<Arc<dyn WorkloadInspector>>,
}

impl ProjectService {
    pub fn new(
        projects: Arc<dyn ProjectStore>,
        entities: Arc<dyn EntityStore>,
        inspector: Option<Arc<dyn WorkloadInspector>>,
    ) -> Self {
        Self {
            projects,
            entities,
            inspector,
        }
    }

    pub fn list(&self, user: &User) -> Result<Vec<DbProject>, ValidationError> {
        Ok(self.projects.find_for_user(user)?)
    }

    pub fn get(&self, user: &User, id: &str) -> Result<DbProject, ValidationError> {
        let project = self
            .projects
            .find_by_id(id)?
            .ok_or_else(|| ValidationError::NotFound(format!("Project {} not found", id)))?;
        if !self.projects.find_for_user(user)?.iter().any(|p| p.id == id) {
            return Err(ValidationError::Forbidden(format!(
                "User {} isn't allowed to view the project",
                user.username
            )));
        }
        Ok(project)
    }

    /// Create (`id == None`) or update a project.
    pub async fn save(
        &self,
        user: &User,
        id: Option<&str>,
        mut project: DbProject,
    ) -> Result<DbProject, ValidationError> {
        log::info!(
            "User {} ({}) trying to save project {}",
            user.username,
            user.role,
            id.unwrap_or("<new>")
        );

        let existing = match id {
            Some(id) => self.modifiable_project(user, id)?,
            None if user.is_admin() || user.is_ri() => DbProject::default(),
            None => {
                return Err(ValidationError::Forbidden(format!(
                    "User {} isn't allowed to create a project",
                    user.username
                )))
            }
        };

        project.name = project.name.trim().to_string();
        if project.name.is_empty() {
            return Err(ValidationError::Invalid(
                "The name field cannot be empty".to_string(),
            ));
        }
        if let Some(other) = self.projects.find_by_name(&project.name)? {
            if Some(other.id.as_str()) != id {
                return Err(ValidationError::Invalid(format!(
                    "Another project already exists with the same name {:?}",
                    other.name
                )));
            }
        }

        if user.is_pm_or_deputy() && details_changed(&project, &existing) {
            log::warn!(
                "User {} isn't allowed to update details of project {}",
                user.username,
                existing.name
            );
            return Err(ValidationError::Invalid(
                "Project managers and deputies are not allowed to update project details"
                    .to_string(),
            ));
        }
        if user.is_ri() && project.technical_data.mode != existing.technical_data.mode {
            return Err(ValidationError::Invalid(
                "RIs are not allowed to update deployment mode".to_string(),
            ));
        }

        self.validate_entities(user, &project, &existing)?;
        check_matrix(&project)?;

        let now = Utc::now();
        project.updated = now;
        match id {
            Some(id) => {
                project.id = id.to_string();
                project.created = existing.created;
                project.version = existing.version;
            }
            None => {
                project.id = String::new();
                project.created = now;
                project.version = 0;
            }
        }

        let url_changed = project.docktor_group_url != existing.docktor_group_url;
        project.docktor_group_name = if url_changed {
            String::new()
        } else {
            existing.docktor_group_name.clone()
        };

        let saved = self.projects.save(project)?;
        log::debug!("Project {} ({}) is saved", saved.name, saved.id);

        if url_changed && !saved.docktor_group_url.trim().is_empty() {
            self.spawn_group_refresh(&saved);
        }
        Ok(saved)
    }

    pub fn delete(&self, user: &User, id: &str) -> Result<(), ValidationError> {
        self.modifiable_project(user, id)?;
        self.projects.delete(id)?;
        log::info!("Project {} deleted by {}", id, user.username);
        Ok(())
    }

    fn modifiable_project(&self, user: &User, id: &str) -> Result<DbProject, ValidationError> {
        let existing = self.projects.find_by_id(id)?.ok_or_else(|| {
            ValidationError::NotFound("Trying to modify a non existing project".to_string())
        })?;
        let allowed = self
            .projects
            .find_modifiable_for_user(user)?
            .iter()
            .any(|p| p.id == id);
        if !allowed {
            return Err(ValidationError::Forbidden(format!(
                "User {} isn't allowed to update the project",
                user.username
            )));
        }
        Ok(existing)
    }

    fn validate_entities(
        &self,
        user: &User,
        project: &DbProject,
        existing: &DbProject,
    ) -> Result<(), ValidationError> {
        if project.business_unit.is_empty() && project.service_center.is_empty() {
            return Err(ValidationError::Invalid(
                "At least one of the business unit and service center fields is mandatory"
                    .to_string(),
            ));
        }

        if !project.business_unit.is_empty() {
            self.validate_entity(
                user,
                &project.business_unit,
                std::slice::from_ref(&existing.business_unit),
                EntityType::BusinessUnit,
            )?;
        }
        for sc in &project.service_center {
            self.validate_entity(user, sc, &existing.service_center, EntityType::ServiceCenter)?;
        }
        Ok(())
    }

    fn validate_entity(
        &self,
        user: &User,
        entity_id: &str,
        current: &[String],
        expected: EntityType,
    ) -> Result<(), ValidationError> {
        let entity = self.entities.find_by_id(entity_id)?.ok_or_else(|| {
            ValidationError::Invalid(format!("The {} {} does not exist", expected, entity_id))
        })?;
        if entity.entity_type != expected {
            return Err(ValidationError::Invalid(format!(
                "The entity {} ({}) is not of type {} but {}",
                entity.name, entity_id, expected, entity.entity_type
            )));
        }

        let allowed = user.is_admin()
            || current.iter().any(|c| c == entity_id)
            || user.entities.iter().any(|e| e == entity_id);
        if !allowed {
            return Err(ValidationError::Invalid(format!(
                "You can't add the entity {} to a project",
                entity_id
            )));
        }
        Ok(())
    }

    fn spawn_group_refresh(&self, project: &DbProject) {
        let Some(inspector) = self.inspector.clone() else {
            return;
        };
        let projects = self.projects.clone();
        let id = project.id.clone();
        let url = project.docktor_group_url.clone();
        tokio::spawn(async move {
            match refresh_docktor_group(projects.as_ref(), inspector.as_ref(), &id, &url).await {
                Ok(name) => log::debug!("Docktor group of project {} is now {}", id, name),
                Err(e) => log::error!(
                    "Unable to fetch and/or save Docktor group name of project {}: {}",
                    id,
                    e
                ),
            }
        });
    }
}

/// Fetch the group behind `url` and store its name on the project.
pub async fn refresh_docktor_group(
    projects: &dyn ProjectStore,
    inspector: &dyn WorkloadInspector,
    project_id: &str,
    url: &str,
) -> Result<String, RefreshError> {
    let group_id = inspector.resolve_group_id(url)?;
    let group = inspector.fetch_group(&group_id).await?;
    projects.update_docktor_group(project_id, url, &group.name)?;
    Ok(group.name)
}

#[derive(Debug, thiserror::Error)]
pub enum RefreshError {
    #[error(transparent)]
    Docktor(#[from] DocktorError),
    #[error(transparent)]
    Store(#[from] crate::db::DbError),
}

/// Fields only admins and RIs may change.
fn details_changed(project: &DbProject, existing: &DbProject) -> bool {
    project.name != existing.name
        || project.domain != existing.domain
        || project.project_manager != existing.project_manager
        || project.service_center != existing.service_center
        || project.business_unit != existing.business_unit
        || project.docktor_group_url != existing.docktor_group_url
}

fn check_matrix(project: &DbProject) -> Result<(), ValidationError> {
    let mut seen = HashSet::new();
    for line in &project.matrix {
        if !seen.insert(line.service.as_str()) {
            return Err(ValidationError::Invalid(format!(
                "Functional service {} appears more than once in the matrix",
                line.service
            )));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::test_utils::test_db;
    use crate::db::{DbEntity, EntityRepo, MatrixLine, ProjectRepo};
    use crate::docktor::{resolve_group_id, DocktorGroup};
    use crate::types::Role;
    use async_trait::async_trait;

    struct NamedGroups;

    #[async_trait]
    impl WorkloadInspector for NamedGroups {
        fn resolve_group_id(&self, url: &str) -> Result<String, DocktorError> {
            resolve_group_id(url)
        }

        async fn fetch_group(&self, group_id: &str) -> Result<DocktorGroup, DocktorError> {
            Ok(DocktorGroup {
                id: group_id.to_string(),
                name: format!("group-{}", group_id),
                containers: Vec::new(),
            })
        }
    }

    struct Fixture {
        projects: ProjectRepo,
        service: ProjectService,
    }

    fn fixture() -> Fixture {
        let db = test_db();
        let entities = EntityRepo::new(db.clone());
        for (id, kind) in [
            ("bu1", EntityType::BusinessUnit),
            ("bu2", EntityType::BusinessUnit),
            ("sc1", EntityType::ServiceCenter),
        ] {
            entities
                .save(DbEntity {
                    id: id.to_string(),
                    name: id.to_uppercase(),
                    entity_type: kind,
                })
                .unwrap();
        }
        let projects = ProjectRepo::new(db);
        let service = ProjectService::new(Arc::new(projects.clone()), Arc::new(entities), None);
        Fixture { projects, service }
    }

    fn user(id: &str, role: Role, entities: &[&str]) -> User {
        User {
            id: id.to_string(),
            username: id.to_string(),
            display_name: String::new(),
            role,
            entities: entities.iter().map(|e| e.to_string()).collect(),
        }
    }

    fn admin() -> User {
        user("admin", Role::Admin, &[])
    }

    fn draft(name: &str) -> DbProject {
        DbProject {
            name: name.to_string(),
            business_unit: "bu1".to_string(),
            project_manager: "pm1".to_string(),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_create_sets_id_and_dates() {
        let fx = fixture();
        let saved = fx.service.save(&admin(), None, draft("  Atlas ")).await.unwrap();
        assert_eq!(saved.name, "Atlas");
        assert!(!saved.id.is_empty());
        assert_eq!(saved.created, saved.updated);
    }

    #[tokio::test]
    async fn test_pm_cannot_create() {
        let fx = fixture();
        let pm = user("pm1", Role::Pm, &[]);
        let err = fx.service.save(&pm, None, draft("Atlas")).await.unwrap_err();
        assert!(matches!(err, ValidationError::Forbidden(_)));
    }

    #[tokio::test]
    async fn test_name_is_required_and_unique() {
        let fx = fixture();
        fx.service.save(&admin(), None, draft("Atlas")).await.unwrap();

        let err = fx.service.save(&admin(), None, draft(" ")).await.unwrap_err();
        assert!(matches!(err, ValidationError::Invalid(_)));

        let err = fx.service.save(&admin(), None, draft("ATLAS")).await.unwrap_err();
        assert!(matches!(err, ValidationError::Invalid(ref m) if m.contains("same name")));
    }

    #[tokio::test]
    async fn test_pm_edits_matrix_but_not_details() {
        let fx = fixture();
        let created = fx.service.save(&admin(), None, draft("Atlas")).await.unwrap();
        let pm = user("pm1", Role::Pm, &[]);

        let mut edit = created.clone();
        edit.matrix.push(MatrixLine {
            service: "jenkins".to_string(),
            comment: "planned for Q3".to_string(),
            ..Default::default()
        });
        let saved = fx.service.save(&pm, Some(&created.id), edit).await.unwrap();
        assert_eq!(saved.matrix.len(), 1);
        assert_eq!(saved.created, created.created);

        let mut rename = saved.clone();
        rename.name = "Atlas 2".to_string();
        let err = fx.service.save(&pm, Some(&created.id), rename).await.unwrap_err();
        assert!(matches!(err, ValidationError::Invalid(ref m) if m.contains("not allowed")));

        let stranger = user("pm9", Role::Deputy, &[]);
        let err = fx
            .service
            .save(&stranger, Some(&created.id), saved.clone())
            .await
            .unwrap_err();
        assert!(matches!(err, ValidationError::Forbidden(_)));
    }

    #[tokio::test]
    async fn test_ri_rules() {
        let fx = fixture();
        let created = fx.service.save(&admin(), None, draft("Atlas")).await.unwrap();
        let ri = user("ri1", Role::Ri, &["bu1"]);

        let mut edit = created.clone();
        edit.technical_data.mode = "SaaS".to_string();
        let err = fx.service.save(&ri, Some(&created.id), edit).await.unwrap_err();
        assert!(matches!(err, ValidationError::Invalid(ref m) if m.contains("deployment mode")));

        let mut edit = created.clone();
        edit.business_unit = "bu2".to_string();
        let err = fx.service.save(&ri, Some(&created.id), edit).await.unwrap_err();
        assert!(matches!(err, ValidationError::Invalid(ref m) if m.contains("can't add the entity")));

        let mut edit = created.clone();
        edit.service_center = vec!["sc1".to_string()];
        edit.description = "moved".to_string();
        assert!(fx.service.save(&ri, Some(&created.id), edit.clone()).await.is_err());
        let ri_sc = user("ri1", Role::Ri, &["bu1", "sc1"]);
        let saved = fx.service.save(&ri_sc, Some(&created.id), edit).await.unwrap();
        assert_eq!(saved.description, "moved");
    }

    #[tokio::test]
    async fn test_entity_checks() {
        let fx = fixture();

        let mut none = draft("Atlas");
        none.business_unit.clear();
        let err = fx.service.save(&admin(), None, none).await.unwrap_err();
        assert!(matches!(err, ValidationError::Invalid(ref m) if m.contains("mandatory")));

        let mut unknown = draft("Atlas");
        unknown.business_unit = "bu404".to_string();
        let err = fx.service.save(&admin(), None, unknown).await.unwrap_err();
        assert!(matches!(err, ValidationError::Invalid(ref m) if m.contains("does not exist")));

        let mut wrong_type = draft("Atlas");
        wrong_type.business_unit = "sc1".to_string();
        let err = fx.service.save(&admin(), None, wrong_type).await.unwrap_err();
        assert!(matches!(err, ValidationError::Invalid(ref m) if m.contains("not of type")));
    }

    #[tokio::test]
    async fn test_duplicate_matrix_line_is_refused() {
        let fx = fixture();
        let mut project = draft("Atlas");
        let line = MatrixLine {
            service: "jenkins".to_string(),
            ..Default::default()
        };
        project.matrix = vec![line.clone(), line];
        let err = fx.service.save(&admin(), None, project).await.unwrap_err();
        assert!(matches!(err, ValidationError::Invalid(ref m) if m.contains("more than once")));
    }

    #[tokio::test]
    async fn test_url_change_clears_group_name() {
        let fx = fixture();
        let mut project = draft("Atlas");
        project.docktor_group_url = "https://docktor/groups/1".to_string();
        let created = fx.service.save(&admin(), None, project).await.unwrap();
        fx.projects
            .update_docktor_group(&created.id, "https://docktor/groups/1", "atlas-prod")
            .unwrap();

        let mut same_url = fx.projects.find_by_id(&created.id).unwrap().unwrap();
        same_url.docktor_group_name = "tampered".to_string();
        let saved = fx.service.save(&admin(), Some(&created.id), same_url).await.unwrap();
        assert_eq!(saved.docktor_group_name, "atlas-prod");

        let mut moved = saved.clone();
        moved.docktor_group_url = "https://docktor/groups/2".to_string();
        let saved = fx.service.save(&admin(), Some(&created.id), moved).await.unwrap();
        assert_eq!(saved.docktor_group_name, "");
    }

    #[tokio::test]
    async fn test_refresh_docktor_group() {
        let fx = fixture();
        let mut project = draft("Atlas");
        project.docktor_group_url = "https://docktor/groups/7".to_string();
        let created = fx.projects.save(project).unwrap();

        let name = refresh_docktor_group(&fx.projects, &NamedGroups, &created.id, "https://docktor/groups/7")
            .await
            .unwrap();
        assert_eq!(name, "group-7");
        let stored = fx.projects.find_by_id(&created.id).unwrap().unwrap();
        assert_eq!(stored.docktor_group_name, "group-7");

        let err = refresh_docktor_group(&fx.projects, &NamedGroups, &created.id, "https://docktor/groups/")
            .await
            .unwrap_err();
        assert!(matches!(err, RefreshError::Docktor(DocktorError::Parse(_))));
    }

    #[tokio::test]
    async fn test_visibility() {
        let fx = fixture();
        let created = fx.service.save(&admin(), None, draft("Atlas")).await.unwrap();

        let outsider = user("pm9", Role::Pm, &[]);
        assert!(fx.service.list(&outsider).unwrap().is_empty());
        assert!(matches!(
            fx.service.get(&outsider, &created.id),
            Err(ValidationError::Forbidden(_))
        ));
        assert!(matches!(
            fx.service.get(&admin(), "missing"),
            Err(ValidationError::NotFound(_))
        ));
        assert_eq!(fx.service.get(&user("pm1", Role::Pm, &[]), &created.id).unwrap().name, "Atlas");
    }

    #[tokio::test]
    async fn test_delete_requires_rights() {
        let fx = fixture();
        let created = fx.service.save(&admin(), None, draft("Atlas")).await.unwrap();
        let ri = user("ri2", Role::Ri, &["bu2"]);
        assert!(matches!(
            fx.service.delete(&ri, &created.id),
            Err(ValidationError::Forbidden(_))
        ));
        fx.service.delete(&admin(), &created.id).unwrap();
        assert!(fx.projects.find_by_id(&created.id).unwrap().is_none());
    }
}
