//! libSQL storage for instance lookups.
//!
//! The [`Storage`] struct wraps a local libSQL database holding the
//! `(category, slug) -> id` table that reference resolution reads.
//!
//! **Access rules:**
//! - Seed tooling: read-write via [`Storage::open`]
//! - Converters: read-only via [`Storage::open_readonly`]

mod migrations;

use std::collections::HashMap;
use std::path::Path;

use chrono::{DateTime, Utc};
use docweave_shared::{ConversionError, InstanceStore, Result};
use libsql::{Connection, Database, params};

/// Primary storage handle wrapping a libSQL database.
pub struct Storage {
    #[allow(dead_code)]
    db: Database,
    conn: Connection,
    readonly: bool,
}

/// One row of the `instances` table.
#[derive(Debug, Clone, PartialEq)]
pub struct InstanceRecord {
    pub category: String,
    pub slug: String,
    pub id: String,
    pub updated_at: DateTime<Utc>,
}

impl Storage {
    /// Open or create a database at `path` in read-write mode.
    pub async fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| ConversionError::io(parent, e))?;
        }

        let db = libsql::Builder::new_local(path)
            .build()
            .await
            .map_err(|e| ConversionError::Storage(e.to_string()))?;

        let conn = db
            .connect()
            .map_err(|e| ConversionError::Storage(e.to_string()))?;

        let storage = Self {
            db,
            conn,
            readonly: false,
        };
        storage.run_migrations().await?;
        Ok(storage)
    }

    /// Open an existing database at `path` in read-only mode.
    pub async fn open_readonly(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Err(ConversionError::Storage(format!(
                "database not found at {}",
                path.display()
            )));
        }

        let db = libsql::Builder::new_local(path)
            .build()
            .await
            .map_err(|e| ConversionError::Storage(e.to_string()))?;

        let conn = db
            .connect()
            .map_err(|e| ConversionError::Storage(e.to_string()))?;

        Ok(Self {
            db,
            conn,
            readonly: true,
        })
    }

    /// Run pending schema migrations.
    async fn run_migrations(&self) -> Result<()> {
        let current_version = self.get_schema_version().await;

        for migration in migrations::all_migrations() {
            if migration.version > current_version {
                tracing::info!(
                    version = migration.version,
                    description = migration.description,
                    "applying migration"
                );
                self.conn
                    .execute_batch(migration.sql)
                    .await
                    .map_err(|e| {
                        ConversionError::Storage(format!(
                            "migration v{} failed: {e}",
                            migration.version
                        ))
                    })?;
            }
        }
        Ok(())
    }

    /// Get the current schema version, or 0 if no migrations have been applied.
    async fn get_schema_version(&self) -> u32 {
        let result = self
            .conn
            .query("SELECT MAX(version) FROM schema_migrations", params![])
            .await;

        match result {
            Ok(mut rows) => {
                if let Ok(Some(row)) = rows.next().await {
                    row.get::<u32>(0).unwrap_or(0)
                } else {
                    0
                }
            }
            Err(_) => 0, // Table doesn't exist yet
        }
    }

    /// Ensure we're in read-write mode before writing.
    fn check_writable(&self) -> Result<()> {
        if self.readonly {
            return Err(ConversionError::Storage(
                "database is opened in read-only mode".into(),
            ));
        }
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Instances
    // -----------------------------------------------------------------------

    /// Insert or replace the id for `(category, slug)`.
    pub async fn upsert_instance(&self, category: &str, slug: &str, id: &str) -> Result<()> {
        self.check_writable()?;
        let now = Utc::now().to_rfc3339();
        self.conn
            .execute(
                "INSERT INTO instances (category, slug, id, updated_at)
                 VALUES (?1, ?2, ?3, ?4)
                 ON CONFLICT(category, slug) DO UPDATE SET
                    id = excluded.id,
                    updated_at = excluded.updated_at",
                params![category, slug, id, now],
            )
            .await
            .map_err(|e| ConversionError::Storage(e.to_string()))?;
        Ok(())
    }

    /// Remove one instance. Returns whether a row was deleted.
    pub async fn delete_instance(&self, category: &str, slug: &str) -> Result<bool> {
        self.check_writable()?;
        let affected = self
            .conn
            .execute(
                "DELETE FROM instances WHERE category = ?1 AND slug = ?2",
                params![category, slug],
            )
            .await
            .map_err(|e| ConversionError::Storage(e.to_string()))?;
        Ok(affected > 0)
    }

    /// Get one instance by category and slug.
    pub async fn get_instance(&self, category: &str, slug: &str) -> Result<Option<InstanceRecord>> {
        let mut rows = self
            .conn
            .query(
                "SELECT category, slug, id, updated_at FROM instances
                 WHERE category = ?1 AND slug = ?2",
                params![category, slug],
            )
            .await
            .map_err(|e| ConversionError::Storage(e.to_string()))?;

        match rows.next().await {
            Ok(Some(row)) => Ok(Some(row_to_instance(&row)?)),
            Ok(None) => Ok(None),
            Err(e) => Err(ConversionError::Storage(e.to_string())),
        }
    }

    /// List all instances of a category, ordered by slug.
    pub async fn list_instances(&self, category: &str) -> Result<Vec<InstanceRecord>> {
        let mut rows = self
            .conn
            .query(
                "SELECT category, slug, id, updated_at FROM instances
                 WHERE category = ?1 ORDER BY slug",
                params![category],
            )
            .await
            .map_err(|e| ConversionError::Storage(e.to_string()))?;

        let mut results = Vec::new();
        while let Some(row) = rows
            .next()
            .await
            .map_err(|e| ConversionError::Storage(e.to_string()))?
        {
            results.push(row_to_instance(&row)?);
        }
        Ok(results)
    }

    /// Ids for every known slug in `slugs`, in one query.
    pub async fn resolve_slugs(
        &self,
        category: &str,
        slugs: &[String],
    ) -> Result<HashMap<String, String>> {
        if slugs.is_empty() {
            return Ok(HashMap::new());
        }
        let slugs_json = serde_json::to_string(slugs)
            .map_err(|e| ConversionError::Storage(format!("failed to encode slugs: {e}")))?;

        let mut rows = self
            .conn
            .query(
                "SELECT slug, id FROM instances
                 WHERE category = ?1 AND slug IN (SELECT value FROM json_each(?2))",
                params![category, slugs_json],
            )
            .await
            .map_err(|e| ConversionError::Storage(e.to_string()))?;

        let mut found = HashMap::with_capacity(slugs.len());
        while let Some(row) = rows
            .next()
            .await
            .map_err(|e| ConversionError::Storage(e.to_string()))?
        {
            let slug: String = row
                .get(0)
                .map_err(|e| ConversionError::Storage(e.to_string()))?;
            let id: String = row
                .get(1)
                .map_err(|e| ConversionError::Storage(e.to_string()))?;
            found.insert(slug, id);
        }

        tracing::debug!(
            category,
            requested = slugs.len(),
            found = found.len(),
            "slugs resolved"
        );
        Ok(found)
    }
}

impl InstanceStore for Storage {
    async fn batch_resolve(
        &self,
        category: &str,
        slugs: &[String],
    ) -> Result<HashMap<String, String>> {
        self.resolve_slugs(category, slugs).await
    }
}

/// Helper to convert a libsql Row to an `InstanceRecord`.
fn row_to_instance(row: &libsql::Row) -> Result<InstanceRecord> {
    let updated_at_str: String = row
        .get(3)
        .map_err(|e| ConversionError::Storage(e.to_string()))?;
    let updated_at = DateTime::parse_from_rfc3339(&updated_at_str)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| ConversionError::Storage(format!("invalid updated_at: {e}")))?;

    Ok(InstanceRecord {
        category: row
            .get(0)
            .map_err(|e| ConversionError::Storage(e.to_string()))?,
        slug: row
            .get(1)
            .map_err(|e| ConversionError::Storage(e.to_string()))?,
        id: row
            .get(2)
            .map_err(|e| ConversionError::Storage(e.to_string()))?,
        updated_at,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    /// Create a temp file storage for testing.
    async fn test_storage() -> Storage {
        let tmp = std::env::temp_dir().join(format!("dw_test_{}.db", Uuid::now_v7()));
        Storage::open(&tmp).await.expect("open test db")
    }

    #[tokio::test]
    async fn open_and_migrate() {
        let storage = test_storage().await;
        let version = storage.get_schema_version().await;
        assert_eq!(version, 1);
    }

    #[tokio::test]
    async fn idempotent_migration() {
        let tmp = std::env::temp_dir().join(format!("dw_test_{}.db", Uuid::now_v7()));
        let s1 = Storage::open(&tmp).await.unwrap();
        drop(s1);
        let s2 = Storage::open(&tmp).await.unwrap();
        assert_eq!(s2.get_schema_version().await, 1);
    }

    #[tokio::test]
    async fn upsert_and_get() {
        let storage = test_storage().await;
        storage
            .upsert_instance("phone-numbers", "main", "abc123")
            .await
            .unwrap();
        storage
            .upsert_instance("phone-numbers", "main", "abc999")
            .await
            .unwrap();

        let record = storage
            .get_instance("phone-numbers", "main")
            .await
            .unwrap()
            .expect("record");
        assert_eq!(record.id, "abc999");
        assert!(storage.get_instance("addresses", "main").await.unwrap().is_none());

        assert!(storage.delete_instance("phone-numbers", "main").await.unwrap());
        assert!(!storage.delete_instance("phone-numbers", "main").await.unwrap());
    }

    #[tokio::test]
    async fn batch_resolve_returns_only_known_slugs() {
        let storage = test_storage().await;
        storage.upsert_instance("phone-numbers", "main", "p-1").await.unwrap();
        storage.upsert_instance("phone-numbers", "fax", "p-2").await.unwrap();
        storage.upsert_instance("addresses", "main", "a-1").await.unwrap();

        let found = storage
            .batch_resolve(
                "phone-numbers",
                &["main".into(), "support".into(), "fax".into()],
            )
            .await
            .unwrap();
        assert_eq!(found.len(), 2);
        assert_eq!(found["main"], "p-1");
        assert_eq!(found["fax"], "p-2");

        let none = storage.batch_resolve("phone-numbers", &[]).await.unwrap();
        assert!(none.is_empty());

        let listed = storage.list_instances("phone-numbers").await.unwrap();
        let slugs: Vec<_> = listed.iter().map(|r| r.slug.as_str()).collect();
        assert_eq!(slugs, ["fax", "main"]);
    }

    #[tokio::test]
    async fn list_fails_on_a_bad_row_instead_of_truncating() {
        let storage = test_storage().await;
        storage.upsert_instance("addresses", "a", "a-1").await.unwrap();
        storage.upsert_instance("addresses", "c", "c-1").await.unwrap();
        storage
            .conn
            .execute(
                "INSERT INTO instances (category, slug, id, updated_at)
                 VALUES ('addresses', 'b', 'b-1', 'not-a-date')",
                params![],
            )
            .await
            .unwrap();

        let err = storage.list_instances("addresses").await.unwrap_err();
        assert!(err.to_string().contains("invalid updated_at"));
        assert_eq!(storage.list_instances("phone-numbers").await.unwrap(), vec![]);
    }

    #[tokio::test]
    async fn readonly_rejects_writes_but_resolves() {
        let tmp = std::env::temp_dir().join(format!("dw_test_{}.db", Uuid::now_v7()));
        let rw = Storage::open(&tmp).await.unwrap();
        rw.upsert_instance("phone-numbers", "main", "p-1")
            .await
            .unwrap();
        drop(rw);

        let ro = Storage::open_readonly(&tmp).await.unwrap();
        let result = ro.upsert_instance("phone-numbers", "fax", "p-2").await;
        assert!(result.is_err());
        assert!(result.unwrap_err().to_string().contains("read-only"));

        let found = ro
            .batch_resolve("phone-numbers", &["main".into()])
            .await
            .unwrap();
        assert_eq!(found["main"], "p-1");
    }

    #[tokio::test]
    async fn readonly_requires_existing_file() {
        let tmp = std::env::temp_dir().join(format!("dw_missing_{}.db", Uuid::now_v7()));
        assert!(Storage::open_readonly(&tmp).await.is_err());
    }
}
