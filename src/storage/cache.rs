use anyhow::Result;
use sqlx::QueryBuilder;

use super::schema::Vault;
use super::types::{CacheStats, EvictionReport};

/// Bind-parameter batch size for chunked deletes.
const DELETE_CHUNK_SIZE: usize = 500;

impl Vault {
    // ========================================================================
    // Cache Management Operations
    // ========================================================================

    /// Item count, stored bytes and the `retrieved_at` range.
    pub async fn cache_stats(&self) -> Result<CacheStats> {
        let row: (i64, Option<i64>, Option<i64>, Option<i64>) = sqlx::query_as(
            r#"
            SELECT COUNT(*), SUM(size_bytes), MIN(retrieved_at), MAX(retrieved_at)
            FROM items
        "#,
        )
        .fetch_one(&self.pool)
        .await?;

        Ok(CacheStats {
            total_items: row.0,
            total_bytes: row.1.unwrap_or(0),
            oldest_retrieved: row.2,
            newest_retrieved: row.3,
        })
    }

    /// Delete items until stored bytes fit in `budget_bytes`.
    ///
    /// Victims are taken oldest `retrieved_at` first (insertion order breaks
    /// ties) and only from items retrieved before `older_than`, so usage can
    /// stay above budget when everything is recent. Runs in one transaction.
    pub async fn evict_to_budget(&self, budget_bytes: i64, older_than: i64) -> Result<EvictionReport> {
        let mut tx = self.pool.begin().await?;

        let (bytes_before,): (i64,) = sqlx::query_as("SELECT COALESCE(SUM(size_bytes), 0) FROM items")
            .fetch_one(&mut *tx)
            .await?;

        if bytes_before <= budget_bytes {
            tx.commit().await?;
            return Ok(EvictionReport {
                removed: 0,
                bytes_before,
                bytes_after: bytes_before,
            });
        }

        let candidates: Vec<(i64, i64)> = sqlx::query_as(
            r#"
            SELECT pk, size_bytes FROM items
            WHERE retrieved_at < ?
            ORDER BY retrieved_at ASC, pk ASC
        "#,
        )
        .bind(older_than)
        .fetch_all(&mut *tx)
        .await?;

        let mut usage = bytes_before;
        let mut victims = Vec::new();
        for (pk, size) in candidates {
            if usage <= budget_bytes {
                break;
            }
            victims.push(pk);
            usage -= size;
        }

        let mut removed = 0;
        for chunk in victims.chunks(DELETE_CHUNK_SIZE) {
            let mut builder: QueryBuilder<sqlx::Sqlite> =
                QueryBuilder::new("DELETE FROM items WHERE pk IN (");
            let mut separated = builder.separated(", ");
            for pk in chunk {
                separated.push_bind(*pk);
            }
            separated.push_unseparated(")");
            removed += builder.build().execute(&mut *tx).await?.rows_affected();
        }

        let (bytes_after,): (i64,) = sqlx::query_as("SELECT COALESCE(SUM(size_bytes), 0) FROM items")
            .fetch_one(&mut *tx)
            .await?;

        tx.commit().await?;

        if bytes_after > budget_bytes {
            tracing::warn!(
                budget = budget_bytes,
                usage = bytes_after,
                "Vault still over budget: remaining items are too recent to evict"
            );
        }
        tracing::info!(removed, bytes_before, bytes_after, "Evicted vault items");

        Ok(EvictionReport {
            removed,
            bytes_before,
            bytes_after,
        })
    }

    /// Delete every item retrieved before `cutoff`. Returns the number removed.
    pub async fn prune_older_than(&self, cutoff: i64) -> Result<u64> {
        let result = sqlx::query("DELETE FROM items WHERE retrieved_at < ?")
            .bind(cutoff)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }

    /// Delete every item. Returns the number removed.
    pub async fn clear(&self) -> Result<u64> {
        let result = sqlx::query("DELETE FROM items")
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }
}
