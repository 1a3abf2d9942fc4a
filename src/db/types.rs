//! Shared type definitions for the database layer.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::types::{Deployed, Level, Priority};

/// Errors specific to database operations.
#[derive(Debug, Error)]
pub enum DbError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("Failed to encode or decode stored JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Home directory not found")]
    HomeDirNotFound,

    #[error("Failed to create database directory: {0}")]
    CreateDir(std::io::Error),

    #[error("Schema migration failed: {0}")]
    Migration(String),

    #[error("Project {0} was modified concurrently")]
    VersionConflict(String),

    #[error("Not found: {0}")]
    NotFound(String),
}

/// A row from the `functional_services` table.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DbFunctionalService {
    #[serde(default)]
    pub id: String,
    pub name: String,
    pub package: String,
    /// Ordering inside its package on exports and matrix screens.
    #[serde(default)]
    pub position: i64,
    /// Technical service names (e.g. `jenkins`) proving the service runs.
    #[serde(default)]
    pub services: Vec<String>,
    /// Deployed state is only ever set by users, never inferred.
    #[serde(default)]
    pub declarative_deployment: bool,
}

impl DbFunctionalService {
    /// True when one of the technical services is in `live` (lower-cased names).
    pub fn matches_any(&self, live: &std::collections::HashSet<String>) -> bool {
        self.services
            .iter()
            .any(|s| live.contains(&s.trim().to_lowercase()))
    }
}

/// One line of a project maturity matrix.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MatrixLine {
    /// Functional service id.
    pub service: String,
    #[serde(default)]
    pub deployed: Deployed,
    #[serde(default)]
    pub progress: Level,
    #[serde(default)]
    pub goal: Level,
    #[serde(default)]
    pub priority: Priority,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub due_date: Option<DateTime<Utc>>,
    #[serde(default)]
    pub comment: String,
}

/// Technical data of a project, flattened into the project JSON.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TechnicalData {
    #[serde(default)]
    pub technologies: Vec<String>,
    #[serde(default)]
    pub mode: String,
    #[serde(default, rename = "deliverables")]
    pub deliverables_in_version_control: bool,
    #[serde(default, rename = "specifications")]
    pub specifications_in_version_control: bool,
    #[serde(default, rename = "sourceCode")]
    pub source_code_in_version_control: bool,
    #[serde(default)]
    pub version_control_system: String,
    #[serde(default, rename = "isCDKApplicable")]
    pub is_cdk_applicable: bool,
}

/// A row from the `projects` table.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DbProject {
    #[serde(default)]
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub domain: Vec<String>,
    #[serde(default)]
    pub client: String,
    #[serde(default)]
    pub project_manager: String,
    #[serde(default)]
    pub deputies: Vec<String>,
    #[serde(default)]
    pub business_unit: String,
    #[serde(default)]
    pub service_center: Vec<String>,
    #[serde(default)]
    pub docktor_group_name: String,
    #[serde(default, rename = "docktorGroupURL")]
    pub docktor_group_url: String,
    #[serde(flatten)]
    pub technical_data: TechnicalData,
    #[serde(default)]
    pub matrix: Vec<MatrixLine>,
    #[serde(default = "Utc::now")]
    pub created: DateTime<Utc>,
    #[serde(default = "Utc::now")]
    pub updated: DateTime<Utc>,
    /// Bumped on every write; the deployment job saves only on a match.
    #[serde(default)]
    pub version: i64,
}

impl DbProject {
    /// Business unit plus service centers, skipping blanks.
    pub fn entity_ids(&self) -> Vec<&str> {
        std::iter::once(self.business_unit.as_str())
            .chain(self.service_center.iter().map(String::as_str))
            .filter(|e| !e.is_empty())
            .collect()
    }

    pub fn is_managed_by(&self, user_id: &str) -> bool {
        self.project_manager == user_id || self.deputies.iter().any(|d| d == user_id)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum EntityType {
    BusinessUnit,
    ServiceCenter,
}

impl EntityType {
    pub fn as_str(&self) -> &'static str {
        match self {
            EntityType::BusinessUnit => "businessUnit",
            EntityType::ServiceCenter => "serviceCenter",
        }
    }

    pub fn from_str_lossy(s: &str) -> Self {
        match s {
            "serviceCenter" => EntityType::ServiceCenter,
            _ => EntityType::BusinessUnit,
        }
    }
}

impl std::fmt::Display for EntityType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A row from the `entities` table (business units and service centers).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DbEntity {
    #[serde(default)]
    pub id: String,
    pub name: String,
    #[serde(rename = "type")]
    pub entity_type: EntityType,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_matrix_line_shape() {
        let line: MatrixLine = serde_json::from_str(
            r#"{"service":"fs1","deployed":"Yes","progress":2,"goal":5,"priority":"P1","dueDate":"2026-03-01T00:00:00Z","comment":"note"}"#,
        )
        .unwrap();
        assert_eq!(line.deployed, Deployed::Yes);
        assert_eq!(line.progress.value(), 2);
        assert_eq!(line.priority, Priority::P1);
        assert!(line.due_date.is_some());

        let json = serde_json::to_value(&line).unwrap();
        assert_eq!(json["service"], "fs1");
        assert_eq!(json["goal"], 5);
        assert_eq!(json["comment"], "note");
    }

    #[test]
    fn test_matrix_line_defaults_when_fields_absent() {
        let line: MatrixLine = serde_json::from_str(r#"{"service":"fs1"}"#).unwrap();
        assert_eq!(line.deployed, Deployed::NotApplicable);
        assert_eq!(line.progress, Level::NONE);
        assert!(line.due_date.is_none());
    }

    #[test]
    fn test_project_flattens_technical_data() {
        let project: DbProject = serde_json::from_str(
            r#"{"name":"Atlas","docktorGroupURL":"https://docktor/groups/42","mode":"SaaS","sourceCode":true}"#,
        )
        .unwrap();
        assert_eq!(project.docktor_group_url, "https://docktor/groups/42");
        assert_eq!(project.technical_data.mode, "SaaS");
        assert!(project.technical_data.source_code_in_version_control);
    }

    #[test]
    fn test_entity_ids_skip_blank_business_unit() {
        let project = DbProject {
            name: "Atlas".to_string(),
            service_center: vec!["sc1".to_string()],
            ..Default::default()
        };
        assert_eq!(project.entity_ids(), vec!["sc1"]);
    }
}
