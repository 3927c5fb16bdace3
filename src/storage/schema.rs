use anyhow::Result;
use sqlx::{
    sqlite::{SqliteConnectOptions, SqlitePoolOptions},
    SqlitePool,
};
use std::str::FromStr;
use std::time::Duration;

use super::types::{is_lock_error, DatabaseError};

// ============================================================================
// Vault
// ============================================================================

/// Handle to the SQLite item store. Cloning shares the pool.
#[derive(Clone)]
pub struct Vault {
    pub(crate) pool: SqlitePool,
}

impl Vault {
    /// Open (creating if needed) the vault at `path` and run migrations.
    ///
    /// `":memory:"` gives a private in-memory vault.
    ///
    /// # Errors
    ///
    /// Returns `DatabaseError::InstanceLocked` if another process holds the
    /// database lock, `DatabaseError::Migration` if the schema could not be
    /// applied, and `DatabaseError::Other` for anything else.
    pub async fn open(path: &str) -> Result<Self, DatabaseError> {
        let url = format!("sqlite:{}?mode=rwc", path);

        // SEC-010: the vault holds fetched third-party text; keep it 0600
        // from the moment the file exists.
        #[cfg(unix)]
        if path != ":memory:" {
            use std::os::unix::fs::PermissionsExt;
            let db_path = std::path::Path::new(path);
            if db_path.exists() {
                let perms = std::fs::Permissions::from_mode(0o600);
                if let Err(e) = std::fs::set_permissions(path, perms) {
                    tracing::warn!(path = %path, error = %e, "SEC-010: Failed to set vault file permissions");
                }
            } else if let Some(parent) = db_path.parent() {
                if parent.exists() {
                    use std::os::unix::fs::OpenOptionsExt;
                    // Creation failures resurface from connect_with below.
                    let _file = std::fs::OpenOptions::new()
                        .write(true)
                        .create_new(true)
                        .mode(0o600)
                        .open(db_path)
                        .ok();
                }
            }
        }

        let options = SqliteConnectOptions::from_str(&url)
            .map_err(DatabaseError::from_sqlx)?
            .pragma("busy_timeout", "5000");
        // SQLite has one writer; five connections covers the concurrent readers
        // of an ingestion pass plus the engine's queries.
        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .acquire_timeout(Duration::from_secs(10))
            .connect_with(options)
            .await
            .map_err(DatabaseError::from_sqlx)?;

        let vault = Self { pool };
        vault.migrate().await.map_err(|e| {
            if is_lock_error(&e.to_string()) {
                DatabaseError::InstanceLocked
            } else {
                DatabaseError::Migration(e.to_string())
            }
        })?;
        tracing::debug!(path = %path, "Vault opened");
        Ok(vault)
    }

    /// Apply the schema in one transaction. Every statement is idempotent.
    async fn migrate(&self) -> Result<()> {
        // Per-connection settings, must run outside the transaction
        sqlx::query("PRAGMA busy_timeout = 5000")
            .execute(&self.pool)
            .await?;

        let mut tx = self.pool.begin().await?;

        // `pk` is the FTS rowid. An explicit INTEGER PRIMARY KEY survives VACUUM.
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS items (
                pk INTEGER PRIMARY KEY,
                id TEXT UNIQUE NOT NULL,
                title TEXT NOT NULL,
                url TEXT NOT NULL DEFAULT '',
                source_domain TEXT NOT NULL DEFAULT '',
                author TEXT,
                published_at INTEGER,
                retrieved_at INTEGER NOT NULL,
                topic_tags TEXT NOT NULL DEFAULT '[]',
                text_snippet TEXT NOT NULL DEFAULT '',
                text_clean TEXT NOT NULL DEFAULT '',
                quotes_json TEXT NOT NULL DEFAULT '[]',
                language TEXT NOT NULL DEFAULT 'en',
                content_type TEXT NOT NULL DEFAULT 'article',
                license_note TEXT,
                size_bytes INTEGER NOT NULL DEFAULT 0
            )
        "#,
        )
        .execute(&mut *tx)
        .await?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_items_domain ON items(source_domain)")
            .execute(&mut *tx)
            .await?;
        // Eviction walks oldest-first
        sqlx::query("CREATE INDEX IF NOT EXISTS idx_items_retrieved ON items(retrieved_at, pk)")
            .execute(&mut *tx)
            .await?;
        sqlx::query("CREATE INDEX IF NOT EXISTS idx_items_published ON items(published_at DESC)")
            .execute(&mut *tx)
            .await?;

        sqlx::query(
            r#"
            CREATE VIRTUAL TABLE IF NOT EXISTS items_fts
            USING fts5(title, text_snippet, text_clean, quotes_json, topic_tags,
                       content=items, content_rowid=pk)
        "#,
        )
        .execute(&mut *tx)
        .await?;

        sqlx::query(
            r#"
            CREATE TRIGGER IF NOT EXISTS items_fts_insert AFTER INSERT ON items BEGIN
                INSERT INTO items_fts(rowid, title, text_snippet, text_clean, quotes_json, topic_tags)
                VALUES (new.pk, new.title, new.text_snippet, new.text_clean, new.quotes_json, new.topic_tags);
            END
        "#,
        )
        .execute(&mut *tx)
        .await?;

        sqlx::query(
            r#"
            CREATE TRIGGER IF NOT EXISTS items_fts_delete AFTER DELETE ON items BEGIN
                INSERT INTO items_fts(items_fts, rowid, title, text_snippet, text_clean, quotes_json, topic_tags)
                VALUES ('delete', old.pk, old.title, old.text_snippet, old.text_clean, old.quotes_json, old.topic_tags);
            END
        "#,
        )
        .execute(&mut *tx)
        .await?;

        sqlx::query(
            r#"
            CREATE TRIGGER IF NOT EXISTS items_fts_update AFTER UPDATE ON items BEGIN
                INSERT INTO items_fts(items_fts, rowid, title, text_snippet, text_clean, quotes_json, topic_tags)
                VALUES ('delete', old.pk, old.title, old.text_snippet, old.text_clean, old.quotes_json, old.topic_tags);
                INSERT INTO items_fts(rowid, title, text_snippet, text_clean, quotes_json, topic_tags)
                VALUES (new.pk, new.title, new.text_snippet, new.text_clean, new.quotes_json, new.topic_tags);
            END
        "#,
        )
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;

        Ok(())
    }

    /// Close the pool, waiting for in-flight queries.
    pub async fn close(&self) {
        self.pool.close().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_open_memory_and_migrate_twice() {
        let vault = Vault::open(":memory:").await.unwrap();
        vault.migrate().await.unwrap();
        assert_eq!(vault.total_items().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_open_file_sets_permissions() {
        let dir = std::env::temp_dir().join("almanac_vault_test_perms");
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("vault.db");
        let _ = std::fs::remove_file(&path);

        let vault = Vault::open(path.to_str().unwrap()).await.unwrap();
        vault.close().await;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let mode = std::fs::metadata(&path).unwrap().permissions().mode();
            assert_eq!(mode & 0o777, 0o600);
        }

        std::fs::remove_dir_all(&dir).ok();
    }
}
