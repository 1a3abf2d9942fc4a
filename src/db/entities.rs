use rusqlite::{params, OptionalExtension};

use super::*;

/// Business units and service centers.
#[derive(Clone)]
pub struct EntityRepo {
    db: SharedDb,
}

impl EntityRepo {
    pub fn new(db: SharedDb) -> Self {
        Self { db }
    }

    fn map_entity_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<DbEntity> {
        Ok(DbEntity {
            id: row.get(0)?,
            name: row.get(1)?,
            entity_type: EntityType::from_str_lossy(&row.get::<_, String>(2)?),
        })
    }
}

impl EnsureIndexes for EntityRepo {
    fn ensure_indexes(&self) -> Result<(), DbError> {
        self.db.lock().conn_ref().execute_batch(
            "CREATE INDEX IF NOT EXISTS idx_entities_type ON entities(entity_type);",
        )?;
        Ok(())
    }
}

impl EntityStore for EntityRepo {
    fn find_all(&self) -> Result<Vec<DbEntity>, DbError> {
        let db = self.db.lock();
        let mut stmt = db
            .conn_ref()
            .prepare("SELECT id, name, entity_type FROM entities ORDER BY name")?;
        let rows = stmt.query_map([], Self::map_entity_row)?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    fn find_by_id(&self, id: &str) -> Result<Option<DbEntity>, DbError> {
        let db = self.db.lock();
        let entity = db
            .conn_ref()
            .query_row(
                "SELECT id, name, entity_type FROM entities WHERE id = ?1",
                params![id],
                Self::map_entity_row,
            )
            .optional()?;
        Ok(entity)
    }

    fn exists(&self, name: &str, excluding_id: Option<&str>) -> Result<bool, DbError> {
        let db = self.db.lock();
        let found: bool = db.conn_ref().query_row(
            "SELECT EXISTS(SELECT 1 FROM entities WHERE name = ?1 AND id != ?2)",
            params![name, excluding_id.unwrap_or("")],
            |r| r.get(0),
        )?;
        Ok(found)
    }

    fn save(&self, mut entity: DbEntity) -> Result<DbEntity, DbError> {
        if entity.id.is_empty() {
            entity.id = uuid::Uuid::new_v4().to_string();
        }
        self.db.lock().conn_ref().execute(
            "INSERT INTO entities (id, name, entity_type) VALUES (?1, ?2, ?3)
             ON CONFLICT(id) DO UPDATE SET
                name = excluded.name,
                entity_type = excluded.entity_type",
            params![entity.id, entity.name, entity.entity_type.as_str()],
        )?;
        Ok(entity)
    }

    fn delete(&self, id: &str) -> Result<(), DbError> {
        let changed = self
            .db
            .lock()
            .conn_ref()
            .execute("DELETE FROM entities WHERE id = ?1", params![id])?;
        if changed == 0 {
            return Err(DbError::NotFound(format!("entity {}", id)));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::super::test_utils::test_db;
    use super::*;

    #[test]
    fn test_entity_roundtrip_keeps_type() {
        let repo = EntityRepo::new(test_db());
        let sc = repo
            .save(DbEntity {
                id: String::new(),
                name: "SC Lyon".to_string(),
                entity_type: EntityType::ServiceCenter,
            })
            .unwrap();

        let loaded = repo.find_by_id(&sc.id).unwrap().unwrap();
        assert_eq!(loaded.entity_type, EntityType::ServiceCenter);
        assert_eq!(repo.find_all().unwrap().len(), 1);
    }

    #[test]
    fn test_exists_ignores_the_entity_itself() {
        let repo = EntityRepo::new(test_db());
        let bu = repo
            .save(DbEntity {
                id: String::new(),
                name: "BU Paris".to_string(),
                entity_type: EntityType::BusinessUnit,
            })
            .unwrap();

        assert!(repo.exists("BU Paris", None).unwrap());
        assert!(!repo.exists("BU Paris", Some(&bu.id)).unwrap());
        assert!(!repo.exists("BU Lyon", None).unwrap());
    }

    #[test]
    fn test_delete() {
        let repo = EntityRepo::new(test_db());
        let bu = repo
            .save(DbEntity {
                id: String::new(),
                name: "BU Paris".to_string(),
                entity_type: EntityType::BusinessUnit,
            })
            .unwrap();

        repo.delete(&bu.id).unwrap();
        assert!(repo.find_by_id(&bu.id).unwrap().is_none());
        assert!(matches!(repo.delete(&bu.id), Err(DbError::NotFound(_))));
    }
}
