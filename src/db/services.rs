use rusqlite::{params, OptionalExtension};

use super::*;

/// SQLite implementation of [`ServiceCatalog`].
#[derive(Clone)]
pub struct ServiceRepo {
    db: SharedDb,
}

impl ServiceRepo {
    pub fn new(db: SharedDb) -> Self {
        Self { db }
    }

    fn map_service_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<DbFunctionalService> {
        Ok(DbFunctionalService {
            id: row.get(0)?,
            name: row.get(1)?,
            package: row.get(2)?,
            position: row.get(3)?,
            services: from_json_column(4, &row.get::<_, String>(4)?)?,
            declarative_deployment: row.get::<_, i32>(5)? != 0,
        })
    }
}

impl EnsureIndexes for ServiceRepo {
    fn ensure_indexes(&self) -> Result<(), DbError> {
        self.db.lock().conn_ref().execute_batch(
            "CREATE UNIQUE INDEX IF NOT EXISTS idx_functional_services_name_package
                ON functional_services(name, package);
             CREATE INDEX IF NOT EXISTS idx_functional_services_position
                ON functional_services(package, position);",
        )?;
        Ok(())
    }
}

impl ServiceCatalog for ServiceRepo {
    fn find_all(&self) -> Result<Vec<DbFunctionalService>, DbError> {
        let db = self.db.lock();
        let mut stmt = db.conn_ref().prepare(
            "SELECT id, name, package, position, services_json, declarative_deployment
             FROM functional_services ORDER BY package, position, name",
        )?;
        let rows = stmt.query_map([], Self::map_service_row)?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    fn find_by_id(&self, id: &str) -> Result<Option<DbFunctionalService>, DbError> {
        let db = self.db.lock();
        let service = db
            .conn_ref()
            .query_row(
                "SELECT id, name, package, position, services_json, declarative_deployment
                 FROM functional_services WHERE id = ?1",
                params![id],
                Self::map_service_row,
            )
            .optional()?;
        Ok(service)
    }

    fn exists(
        &self,
        name: &str,
        package: &str,
        excluding_id: Option<&str>,
    ) -> Result<bool, DbError> {
        let db = self.db.lock();
        let found: bool = db.conn_ref().query_row(
            "SELECT EXISTS(
                SELECT 1 FROM functional_services
                WHERE name = ?1 AND package = ?2 AND id != ?3
             )",
            params![name, package, excluding_id.unwrap_or("")],
            |r| r.get(0),
        )?;
        Ok(found)
    }

    fn save(&self, mut service: DbFunctionalService) -> Result<DbFunctionalService, DbError> {
        if service.id.is_empty() {
            service.id = uuid::Uuid::new_v4().to_string();
        }
        let services_json = to_json(&service.services)?;

        self.db.lock().conn_ref().execute(
            "INSERT INTO functional_services (
                id, name, package, position, services_json, declarative_deployment
             ) VALUES (?1, ?2, ?3, ?4, ?5, ?6)
             ON CONFLICT(id) DO UPDATE SET
                name = excluded.name,
                package = excluded.package,
                position = excluded.position,
                services_json = excluded.services_json,
                declarative_deployment = excluded.declarative_deployment",
            params![
                service.id,
                service.name,
                service.package,
                service.position,
                services_json,
                service.declarative_deployment as i32,
            ],
        )?;
        Ok(service)
    }

    fn delete(&self, id: &str) -> Result<(), DbError> {
        let changed = self
            .db
            .lock()
            .conn_ref()
            .execute("DELETE FROM functional_services WHERE id = ?1", params![id])?;
        if changed == 0 {
            return Err(DbError::NotFound(format!("functional service {}", id)));
        }
        Ok(())
    }
}
