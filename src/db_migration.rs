use sqlx::SqlitePool;

use crate::errors::{DbError, DomainError, DomainResult};

/// One forward-only schema step.
#[derive(Debug, Clone, Copy)]
pub struct Migration {
    pub version: i64,
    pub name: &'static str,
    pub sql: &'static str,
}

// Embed all migration SQL files at compile time
const MIGRATIONS: &[Migration] = &[
    Migration {
        version: 1,
        name: "0001_entities.sql",
        sql: include_str!("../migrations/0001_entities.sql"),
    },
    Migration {
        version: 2,
        name: "0002_sync_metadata.sql",
        sql: include_str!("../migrations/0002_sync_metadata.sql"),
    },
];

/// Ordered list of migrations the running binary knows how to apply.
#[derive(Debug, Clone)]
pub struct Migrator {
    migrations: Vec<Migration>,
}

impl Default for Migrator {
    fn default() -> Self {
        Self::new(MIGRATIONS.to_vec())
    }
}

impl Migrator {
    pub fn new(mut migrations: Vec<Migration>) -> Self {
        migrations.sort_by_key(|m| m.version);
        Self { migrations }
    }

    /// Newest schema version this binary supports.
    pub fn latest_version(&self) -> i64 {
        self.migrations.last().map(|m| m.version).unwrap_or(0)
    }

    /// Bring the database to [`Migrator::latest_version`].
    ///
    /// Fails with `SchemaIncompatible` without touching any data when the
    /// database version is unknown to this binary or no migration is
    /// registered for some step between it and the newest version.
    pub async fn run(&self, pool: &SqlitePool) -> DomainResult<i64> {
        create_migrations_table(pool).await?;
        let current = current_version(pool).await?;
        let pending = self.plan(current)?;

        if pending.is_empty() {
            log::debug!("Schema up to date at version {}", current);
            return Ok(current);
        }

        log::info!(
            "Migrating schema from version {} to {} ({} pending)",
            current,
            self.latest_version(),
            pending.len()
        );

        let mut tx = pool
            .begin()
            .await
            .map_err(|e| DbError::Transaction(format!("Failed to begin migration transaction: {}", e)))?;

        for migration in &pending {
            sqlx::raw_sql(migration.sql)
                .execute(&mut *tx)
                .await
                .map_err(|e| DbError::Migration(format!("Failed to apply migration {}: {}", migration.name, e)))?;

            sqlx::query("INSERT INTO schema_migrations (version, name, applied_at) VALUES (?, ?, ?)")
                .bind(migration.version)
                .bind(migration.name)
                .bind(chrono::Utc::now().to_rfc3339())
                .execute(&mut *tx)
                .await
                .map_err(|e| DbError::Migration(format!("Failed to record migration {}: {}", migration.name, e)))?;

            log::info!("Applied migration {}", migration.name);
        }

        tx.commit()
            .await
            .map_err(|e| DbError::Transaction(format!("Failed to commit migrations: {}", e)))?;

        Ok(self.latest_version())
    }

    /// Migrations to apply on top of `current`, or why that is impossible.
    fn plan(&self, current: i64) -> DomainResult<Vec<Migration>> {
        let supported = self.latest_version();
        let incompatible = |reason: String| DomainError::SchemaIncompatible {
            found: current,
            supported,
            reason,
        };

        if current > supported {
            return Err(incompatible("database was written by a newer application version".to_string()));
        }
        if current > 0 && !self.migrations.iter().any(|m| m.version == current) {
            return Err(incompatible(format!("schema version {} is not known to this build", current)));
        }

        let pending: Vec<Migration> = self
            .migrations
            .iter()
            .filter(|m| m.version > current)
            .copied()
            .collect();

        let mut expected = current + 1;
        for migration in &pending {
            if migration.version != expected {
                return Err(incompatible(format!(
                    "no migration registered for version {}",
                    expected
                )));
            }
            expected += 1;
        }

        Ok(pending)
    }
}

async fn create_migrations_table(pool: &SqlitePool) -> DomainResult<()> {
    sqlx::query(
        "CREATE TABLE IF NOT EXISTS schema_migrations (
            version INTEGER PRIMARY KEY NOT NULL,
            name TEXT NOT NULL,
            applied_at TEXT NOT NULL
        )",
    )
    .execute(pool)
    .await
    .map_err(|e| DbError::Migration(format!("Failed to create migrations table: {}", e)))?;
    Ok(())
}

async fn current_version(pool: &SqlitePool) -> DomainResult<i64> {
    let version: Option<i64> = sqlx::query_scalar("SELECT MAX(version) FROM schema_migrations")
        .fetch_one(pool)
        .await
        .map_err(DbError::from)?;
    Ok(version.unwrap_or(0))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::{EntityStore, StoreOptions};
    use tempfile::TempDir;

    fn url(dir: &TempDir) -> String {
        format!("sqlite://{}", dir.path().join("schema.db").display())
    }

    const CREATE_A: Migration = Migration { version: 1, name: "a", sql: "CREATE TABLE a (id TEXT PRIMARY KEY);" };
    const CREATE_B: Migration = Migration { version: 2, name: "b", sql: "CREATE TABLE b (id TEXT PRIMARY KEY);" };
    const CREATE_C: Migration = Migration { version: 3, name: "c", sql: "CREATE TABLE c (id TEXT PRIMARY KEY);" };

    async fn open(dir: &TempDir, migrator: &Migrator) -> DomainResult<EntityStore> {
        EntityStore::open_with(&url(dir), "dev", StoreOptions::default(), migrator).await
    }

    #[test]
    fn test_plan_detects_gap() {
        let migrator = Migrator::new(vec![CREATE_C, CREATE_A, CREATE_B]);
        assert_eq!(migrator.plan(0).unwrap().len(), 3);
        assert_eq!(migrator.plan(2).unwrap().len(), 1);
        assert!(migrator.plan(3).unwrap().is_empty());

        let err = Migrator::new(vec![CREATE_A, CREATE_C]).plan(1).unwrap_err();
        assert!(matches!(err, DomainError::SchemaIncompatible { found: 1, supported: 3, .. }));
    }

    #[tokio::test]
    async fn test_default_schema_applies_once() {
        let dir = TempDir::new().unwrap();
        let migrator = Migrator::default();
        open(&dir, &migrator).await.unwrap();
        // Reopening is a no-op.
        let store = open(&dir, &migrator).await.unwrap();
        let version = current_version(store.pool()).await.unwrap();
        assert_eq!(version, migrator.latest_version());
    }

    #[tokio::test]
    async fn test_upgrade_applies_only_new_steps() {
        let dir = TempDir::new().unwrap();
        open(&dir, &Migrator::new(vec![CREATE_A])).await.unwrap();
        let store = open(&dir, &Migrator::new(vec![CREATE_A, CREATE_B])).await.unwrap();
        assert_eq!(current_version(store.pool()).await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_newer_database_is_incompatible() {
        let dir = TempDir::new().unwrap();
        open(&dir, &Migrator::new(vec![CREATE_A, CREATE_B])).await.unwrap();
        let result = open(&dir, &Migrator::new(vec![CREATE_A])).await;
        assert!(matches!(
            result,
            Err(DomainError::SchemaIncompatible { found: 2, supported: 1, .. })
        ));
    }

    #[tokio::test]
    async fn test_gap_fails_without_touching_data() {
        let dir = TempDir::new().unwrap();
        open(&dir, &Migrator::new(vec![CREATE_A])).await.unwrap();
        let result = open(&dir, &Migrator::new(vec![CREATE_A, CREATE_C])).await;
        assert!(matches!(result, Err(DomainError::SchemaIncompatible { found: 1, .. })));

        let store = open(&dir, &Migrator::new(vec![CREATE_A])).await.unwrap();
        assert_eq!(current_version(store.pool()).await.unwrap(), 1);
    }
}
