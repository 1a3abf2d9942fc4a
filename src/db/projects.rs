use chrono::{DateTime, Utc};
use rusqlite::{params, OptionalExtension};

use super::*;

const PROJECT_COLUMNS: &str = "id, name, description, domain_json, client, project_manager,
    deputies_json, business_unit, service_center_json, docktor_group_name,
    docktor_group_url, technical_data_json, matrix_json, created, updated, version";

/// SQLite implementation of [`ProjectStore`].
#[derive(Clone)]
pub struct ProjectRepo {
    db: SharedDb,
}

impl ProjectRepo {
    pub fn new(db: SharedDb) -> Self {
        Self { db }
    }

    /// Helper: map a row selected with `PROJECT_COLUMNS` to `DbProject`.
    pub(crate) fn map_project_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<DbProject> {
        Ok(DbProject {
            id: row.get(0)?,
            name: row.get(1)?,
            description: row.get(2)?,
            domain: from_json_column(3, &row.get::<_, String>(3)?)?,
            client: row.get(4)?,
            project_manager: row.get(5)?,
            deputies: from_json_column(6, &row.get::<_, String>(6)?)?,
            business_unit: row.get(7)?,
            service_center: from_json_column(8, &row.get::<_, String>(8)?)?,
            docktor_group_name: row.get(9)?,
            docktor_group_url: row.get(10)?,
            technical_data: from_json_column(11, &row.get::<_, String>(11)?)?,
            matrix: from_json_column(12, &row.get::<_, String>(12)?)?,
            created: parse_timestamp(13, &row.get::<_, String>(13)?)?,
            updated: parse_timestamp(14, &row.get::<_, String>(14)?)?,
            version: row.get(15)?,
        })
    }

    fn query(&self, filter: &str, args: &[&dyn rusqlite::ToSql]) -> Result<Vec<DbProject>, DbError> {
        let db = self.db.lock();
        let mut stmt = db
            .conn_ref()
            .prepare(&format!("SELECT {} FROM projects {}", PROJECT_COLUMNS, filter))?;
        let rows = stmt.query_map(args, Self::map_project_row)?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    fn query_one(
        &self,
        filter: &str,
        args: &[&dyn rusqlite::ToSql],
    ) -> Result<Option<DbProject>, DbError> {
        let db = self.db.lock();
        let project = db
            .conn_ref()
            .query_row(
                &format!("SELECT {} FROM projects {}", PROJECT_COLUMNS, filter),
                args,
                Self::map_project_row,
            )
            .optional()?;
        Ok(project)
    }
}

fn parse_timestamp(idx: usize, raw: &str) -> rusqlite::Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(idx, rusqlite::types::Type::Text, Box::new(e))
        })
}

/// Encoded column values of a project, in `PROJECT_COLUMNS` order minus `version`.
struct ProjectRow {
    domain: String,
    deputies: String,
    service_center: String,
    technical_data: String,
    matrix: String,
    created: String,
    updated: String,
}

impl ProjectRow {
    fn encode(project: &DbProject) -> Result<Self, DbError> {
        Ok(Self {
            domain: to_json(&project.domain)?,
            deputies: to_json(&project.deputies)?,
            service_center: to_json(&project.service_center)?,
            technical_data: to_json(&project.technical_data)?,
            matrix: to_json(&project.matrix)?,
            created: project.created.to_rfc3339(),
            updated: project.updated.to_rfc3339(),
        })
    }
}

impl EnsureIndexes for ProjectRepo {
    fn ensure_indexes(&self) -> Result<(), DbError> {
        self.db.lock().conn_ref().execute_batch(
            "CREATE INDEX IF NOT EXISTS idx_projects_name ON projects(LOWER(name));
             CREATE INDEX IF NOT EXISTS idx_projects_docktor_group_url ON projects(docktor_group_url);
             CREATE INDEX IF NOT EXISTS idx_projects_business_unit ON projects(business_unit);
             CREATE INDEX IF NOT EXISTS idx_projects_project_manager ON projects(project_manager);",
        )?;
        Ok(())
    }
}

impl ProjectStore for ProjectRepo {
    fn find_with_docktor_group_url(&self) -> Result<Vec<DbProject>, DbError> {
        self.query("WHERE TRIM(docktor_group_url) != '' ORDER BY name", &[])
    }

    fn find_by_id(&self, id: &str) -> Result<Option<DbProject>, DbError> {
        self.query_one("WHERE id = ?1", &[&id])
    }

    fn find_by_name(&self, name: &str) -> Result<Option<DbProject>, DbError> {
        self.query_one("WHERE LOWER(name) = LOWER(?1)", &[&name])
    }

    fn find_all(&self) -> Result<Vec<DbProject>, DbError> {
        self.query("ORDER BY name", &[])
    }

    fn save(&self, mut project: DbProject) -> Result<DbProject, DbError> {
        if project.id.is_empty() {
            project.id = uuid::Uuid::new_v4().to_string();
        }
        let row = ProjectRow::encode(&project)?;

        let db = self.db.lock();
        let version = db.with_transaction(|tx| {
            tx.conn_ref().execute(
                "INSERT INTO projects (
                    id, name, description, domain_json, client, project_manager,
                    deputies_json, business_unit, service_center_json, docktor_group_name,
                    docktor_group_url, technical_data_json, matrix_json, created, updated, version
                 ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, 1)
                 ON CONFLICT(id) DO UPDATE SET
                    name = excluded.name,
                    description = excluded.description,
                    domain_json = excluded.domain_json,
                    client = excluded.client,
                    project_manager = excluded.project_manager,
                    deputies_json = excluded.deputies_json,
                    business_unit = excluded.business_unit,
                    service_center_json = excluded.service_center_json,
                    docktor_group_name = excluded.docktor_group_name,
                    docktor_group_url = excluded.docktor_group_url,
                    technical_data_json = excluded.technical_data_json,
                    matrix_json = excluded.matrix_json,
                    created = excluded.created,
                    updated = excluded.updated,
                    version = projects.version + 1",
                params![
                    project.id,
                    project.name,
                    project.description,
                    row.domain,
                    project.client,
                    project.project_manager,
                    row.deputies,
                    project.business_unit,
                    row.service_center,
                    project.docktor_group_name,
                    project.docktor_group_url,
                    row.technical_data,
                    row.matrix,
                    row.created,
                    row.updated,
                ],
            )?;
            let version: i64 = tx.conn_ref().query_row(
                "SELECT version FROM projects WHERE id = ?1",
                params![project.id],
                |r| r.get(0),
            )?;
            Ok(version)
        })?;

        project.version = version;
        Ok(project)
    }

    fn save_if_version(&self, mut project: DbProject) -> Result<DbProject, DbError> {
        let row = ProjectRow::encode(&project)?;

        let db = self.db.lock();
        let changed = db.conn_ref().execute(
            "UPDATE projects SET
                name = ?2, description = ?3, domain_json = ?4, client = ?5,
                project_manager = ?6, deputies_json = ?7, business_unit = ?8,
                service_center_json = ?9, docktor_group_name = ?10, docktor_group_url = ?11,
                technical_data_json = ?12, matrix_json = ?13, created = ?14, updated = ?15,
                version = version + 1
             WHERE id = ?1 AND version = ?16",
            params![
                project.id,
                project.name,
                project.description,
                row.domain,
                project.client,
                project.project_manager,
                row.deputies,
                project.business_unit,
                row.service_center,
                project.docktor_group_name,
                project.docktor_group_url,
                row.technical_data,
                row.matrix,
                row.created,
                row.updated,
                project.version,
            ],
        )?;

        if changed == 0 {
            let exists: bool = db.conn_ref().query_row(
                "SELECT EXISTS(SELECT 1 FROM projects WHERE id = ?1)",
                params![project.id],
                |r| r.get(0),
            )?;
            return Err(if exists {
                DbError::VersionConflict(project.name)
            } else {
                DbError::NotFound(format!("project {}", project.id))
            });
        }

        project.version += 1;
        Ok(project)
    }

    fn update_docktor_group(&self, id: &str, url: &str, name: &str) -> Result<(), DbError> {
        let db = self.db.lock();
        let changed = db.conn_ref().execute(
            "UPDATE projects SET docktor_group_name = ?3, updated = ?4, version = version + 1
             WHERE id = ?1 AND docktor_group_url = ?2",
            params![id, url, name, Utc::now().to_rfc3339()],
        )?;
        if changed == 0 {
            log::debug!("Docktor group of project {} not updated: URL changed meanwhile", id);
        }
        Ok(())
    }

    fn delete(&self, id: &str) -> Result<(), DbError> {
        let db = self.db.lock();
        let changed = db
            .conn_ref()
            .execute("DELETE FROM projects WHERE id = ?1", params![id])?;
        if changed == 0 {
            return Err(DbError::NotFound(format!("project {}", id)));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::super::test_utils::test_db;
    use super::*;
    use crate::types::{Deployed, Level, Priority};

    fn project(name: &str, url: &str) -> DbProject {
        DbProject {
            name: name.to_string(),
            docktor_group_url: url.to_string(),
            matrix: vec![MatrixLine {
                service: "fs1".to_string(),
                deployed: Deployed::Yes,
                progress: Level::STARTED,
                goal: Level::MAX,
                priority: Priority::P1,
                due_date: None,
                comment: "keep me".to_string(),
            }],
            ..Default::default()
        }
    }

    #[test]
    fn test_save_assigns_id_and_version() {
        let repo = ProjectRepo::new(test_db());
        let saved = repo.save(project("Atlas", "")).unwrap();
        assert!(!saved.id.is_empty());
        assert_eq!(saved.version, 1);

        let again = repo.save(saved.clone()).unwrap();
        assert_eq!(again.version, 2);

        let loaded = repo.find_by_id(&saved.id).unwrap().unwrap();
        assert_eq!(loaded.version, 2);
        assert_eq!(loaded.matrix, saved.matrix);
        assert_eq!(loaded.created.timestamp(), saved.created.timestamp());
    }

    #[test]
    fn test_find_by_name_ignores_case() {
        let repo = ProjectRepo::new(test_db());
        repo.save(project("Atlas", "")).unwrap();
        assert!(repo.find_by_name("aTLAS").unwrap().is_some());
        assert!(repo.find_by_name("Atla").unwrap().is_none());
    }

    #[test]
    fn test_candidates_exclude_blank_urls() {
        let repo = ProjectRepo::new(test_db());
        repo.save(project("Atlas", "https://docktor/groups/1")).unwrap();
        repo.save(project("Borealis", "   ")).unwrap();
        repo.save(project("Cygnus", "")).unwrap();

        let candidates = repo.find_with_docktor_group_url().unwrap();
        assert_eq!(candidates.len(), 1);
        assert_eq!(candidates[0].name, "Atlas");
    }

    #[test]
    fn test_save_if_version_detects_concurrent_edit() {
        let repo = ProjectRepo::new(test_db());
        let saved = repo.save(project("Atlas", "")).unwrap();

        // A human edit lands between the job's read and write.
        let mut human = saved.clone();
        human.description = "edited".to_string();
        repo.save(human).unwrap();

        let err = repo.save_if_version(saved.clone()).unwrap_err();
        assert!(matches!(err, DbError::VersionConflict(ref name) if name == "Atlas"));

        let fresh = repo.find_by_id(&saved.id).unwrap().unwrap();
        assert_eq!(fresh.description, "edited");
        let written = repo.save_if_version(fresh).unwrap();
        assert_eq!(written.version, 3);
    }

    #[test]
    fn test_save_if_version_unknown_project() {
        let repo = ProjectRepo::new(test_db());
        let mut ghost = project("Ghost", "");
        ghost.id = "missing".to_string();
        assert!(matches!(repo.save_if_version(ghost), Err(DbError::NotFound(_))));
    }

    #[test]
    fn test_update_docktor_group_skips_stale_url() {
        let repo = ProjectRepo::new(test_db());
        let saved = repo.save(project("Atlas", "https://docktor/groups/1")).unwrap();

        repo.update_docktor_group(&saved.id, "https://docktor/groups/2", "stale")
            .unwrap();
        let loaded = repo.find_by_id(&saved.id).unwrap().unwrap();
        assert_eq!(loaded.docktor_group_name, "");
        assert_eq!(loaded.version, saved.version);

        repo.update_docktor_group(&saved.id, "https://docktor/groups/1", "atlas-prod")
            .unwrap();
        let loaded = repo.find_by_id(&saved.id).unwrap().unwrap();
        assert_eq!(loaded.docktor_group_name, "atlas-prod");
        assert_eq!(loaded.version, saved.version + 1);
    }

    #[test]
    fn test_delete() {
        let repo = ProjectRepo::new(test_db());
        let saved = repo.save(project("Atlas", "")).unwrap();
        repo.delete(&saved.id).unwrap();
        assert!(repo.find_by_id(&saved.id).unwrap().is_none());
        assert!(matches!(repo.delete(&saved.id), Err(DbError::NotFound(_))));
    }
}
