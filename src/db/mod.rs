//! SQLite-backed storage for projects, the functional service catalog and entities.
//!
//! The database lives at `~/.dad/dad.db` unless `databasePath` is configured.
//! One connection is shared behind a `parking_lot::Mutex`; every store call
//! holds it only for the duration of a few statements.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::Mutex;
use rusqlite::Connection;

use crate::types::User;

pub mod entities;
pub mod projects;
pub mod services;
pub mod types;

pub use entities::EntityRepo;
pub use projects::ProjectRepo;
pub use services::ServiceRepo;
pub use types::*;

/// Connection handle shared by every repository.
pub type SharedDb = Arc<Mutex<DadDb>>;

pub struct DadDb {
    conn: Connection,
}

impl DadDb {
    /// Borrow the underlying connection for ad-hoc queries.
    pub fn conn_ref(&self) -> &Connection {
        &self.conn
    }

    /// Execute a closure within a SQLite transaction.
    /// Commits on Ok, rolls back on Err.
    pub fn with_transaction<F, T>(&self, f: F) -> Result<T, DbError>
    where
        F: FnOnce(&Self) -> Result<T, DbError>,
    {
        self.conn.execute_batch("BEGIN IMMEDIATE")?;
        match f(self) {
            Ok(val) => {
                self.conn.execute_batch("COMMIT")?;
                Ok(val)
            }
            Err(e) => {
                let _ = self.conn.execute_batch("ROLLBACK");
                Err(e)
            }
        }
    }

    /// Open (or create) the database at `path`, or at `~/.dad/dad.db`.
    pub fn open(path: Option<&str>) -> Result<Self, DbError> {
        let path = match path {
            Some(p) if !p.trim().is_empty() => PathBuf::from(p),
            _ => Self::default_path()?,
        };
        Self::open_at(&path)
    }

    /// Open a database at an explicit path and apply pending migrations.
    pub fn open_at(path: &Path) -> Result<Self, DbError> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                std::fs::create_dir_all(parent).map_err(DbError::CreateDir)?;
            }
        }

        let conn = Connection::open(path)?;
        conn.execute_batch("PRAGMA journal_mode=WAL;")?;

        let applied = crate::migrations::run_migrations(&conn).map_err(DbError::Migration)?;
        if applied > 0 {
            log::info!("Database at {} migrated ({} migrations)", path.display(), applied);
        }

        Ok(Self { conn })
    }

    fn default_path() -> Result<PathBuf, DbError> {
        let home = dirs::home_dir().ok_or(DbError::HomeDirNotFound)?;
        Ok(home.join(".dad").join("dad.db"))
    }

    pub fn into_shared(self) -> SharedDb {
        Arc::new(Mutex::new(self))
    }
}

// =============================================================================
// Store seams
// =============================================================================

/// Repositories create their own indexes. Called once at startup for the
/// explicit list of repositories, see [`ensure_all_indexes`].
pub trait EnsureIndexes {
    fn ensure_indexes(&self) -> Result<(), DbError>;
}

pub fn ensure_all_indexes(repos: &[&dyn EnsureIndexes]) -> Result<(), DbError> {
    for repo in repos {
        repo.ensure_indexes()?;
    }
    Ok(())
}

pub trait ProjectStore: Send + Sync {
    /// Projects whose Docktor group URL is not blank.
    fn find_with_docktor_group_url(&self) -> Result<Vec<DbProject>, DbError>;
    fn find_by_id(&self, id: &str) -> Result<Option<DbProject>, DbError>;
    /// Case-insensitive exact match.
    fn find_by_name(&self, name: &str) -> Result<Option<DbProject>, DbError>;
    fn find_all(&self) -> Result<Vec<DbProject>, DbError>;

    /// Projects a user can see: all for admins, entity projects plus managed
    /// ones for RIs, managed ones for PMs and deputies.
    fn find_for_user(&self, user: &User) -> Result<Vec<DbProject>, DbError> {
        let all = self.find_all()?;
        if user.is_admin() {
            return Ok(all);
        }
        let entities: HashSet<&str> = user.entities.iter().map(String::as_str).collect();
        Ok(all
            .into_iter()
            .filter(|p| {
                p.is_managed_by(&user.id)
                    || (user.is_ri() && p.entity_ids().iter().any(|e| entities.contains(e)))
            })
            .collect())
    }

    /// Projects a user can update. RIs lose the projects they only manage.
    fn find_modifiable_for_user(&self, user: &User) -> Result<Vec<DbProject>, DbError> {
        let all = self.find_all()?;
        if user.is_admin() {
            return Ok(all);
        }
        let entities: HashSet<&str> = user.entities.iter().map(String::as_str).collect();
        Ok(all
            .into_iter()
            .filter(|p| {
                if user.is_ri() {
                    p.entity_ids().iter().any(|e| entities.contains(e))
                } else {
                    p.is_managed_by(&user.id)
                }
            })
            .collect())
    }

    /// Insert or replace a project, assigning an id if blank and bumping
    /// `version`. Returns the stored project.
    fn save(&self, project: DbProject) -> Result<DbProject, DbError>;

    /// Replace a project only if its stored `version` still equals
    /// `project.version`. Fails with [`DbError::VersionConflict`] otherwise.
    fn save_if_version(&self, project: DbProject) -> Result<DbProject, DbError>;

    /// Record the resolved Docktor group name, unless the URL changed meanwhile.
    fn update_docktor_group(&self, id: &str, url: &str, name: &str) -> Result<(), DbError>;

    fn delete(&self, id: &str) -> Result<(), DbError>;
}

pub trait ServiceCatalog: Send + Sync {
    /// Whole catalog ordered by package, position, name.
    fn find_all(&self) -> Result<Vec<DbFunctionalService>, DbError>;
    fn find_by_id(&self, id: &str) -> Result<Option<DbFunctionalService>, DbError>;
    /// True when another service (not `excluding_id`) has this name and package.
    fn exists(&self, name: &str, package: &str, excluding_id: Option<&str>)
        -> Result<bool, DbError>;
    fn save(&self, service: DbFunctionalService) -> Result<DbFunctionalService, DbError>;
    fn delete(&self, id: &str) -> Result<(), DbError>;
}

pub trait EntityStore: Send + Sync {
    fn find_all(&self) -> Result<Vec<DbEntity>, DbError>;
    fn find_by_id(&self, id: &str) -> Result<Option<DbEntity>, DbError>;
    /// True when another entity (not `excluding_id`) has this name.
    fn exists(&self, name: &str, excluding_id: Option<&str>) -> Result<bool, DbError>;
    fn save(&self, entity: DbEntity) -> Result<DbEntity, DbError>;
    fn delete(&self, id: &str) -> Result<(), DbError>;
}

/// Serialize a list column.
pub(crate) fn to_json<T: serde::Serialize>(value: &T) -> Result<String, DbError> {
    Ok(serde_json::to_string(value)?)
}

/// Decode a JSON column inside a row mapper.
pub(crate) fn from_json_column<T: serde::de::DeserializeOwned>(
    idx: usize,
    raw: &str,
) -> rusqlite::Result<T> {
    serde_json::from_str(raw).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(idx, rusqlite::types::Type::Text, Box::new(e))
    })
}
