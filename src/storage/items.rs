use anyhow::Result;

use super::schema::Vault;
use super::types::{VaultItem, VaultRow};

/// Upper bound for any listing query.
pub(crate) const MAX_RESULTS: i64 = 500;

/// Column list matching [`VaultRow`], qualified with the `i` alias.
pub(crate) const ITEM_COLUMNS: &str = "i.id, i.title, i.url, i.source_domain, i.author, \
     i.published_at, i.retrieved_at, i.topic_tags, i.text_snippet, i.text_clean, \
     i.quotes_json, i.language, i.content_type, i.license_note";

pub(crate) fn clamp_limit(limit: usize) -> i64 {
    (limit as i64).clamp(0, MAX_RESULTS)
}

impl Vault {
    // ========================================================================
    // Item Operations
    // ========================================================================

    /// Insert or overwrite the item with this id.
    ///
    /// A single `INSERT ... ON CONFLICT DO UPDATE` statement, so the row and
    /// its index entry change together (the update trigger replaces the FTS
    /// entry). `retrieved_at` keeps the later of the stored and new values.
    pub async fn insert(&self, item: &VaultItem) -> Result<()> {
        if item.id.is_empty() {
            anyhow::bail!("Refusing to store an item without an id");
        }

        let tags_json = serde_json::to_string(&item.topic_tags)?;
        let quotes_json = serde_json::to_string(&item.quotes)?;
        let size_bytes = item.stored_size(&tags_json, &quotes_json);

        sqlx::query(
            r#"
            INSERT INTO items (
                id, title, url, source_domain, author, published_at, retrieved_at,
                topic_tags, text_snippet, text_clean, quotes_json, language,
                content_type, license_note, size_bytes
            )
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(id) DO UPDATE SET
                title = excluded.title,
                url = excluded.url,
                source_domain = excluded.source_domain,
                author = excluded.author,
                published_at = excluded.published_at,
                retrieved_at = MAX(items.retrieved_at, excluded.retrieved_at),
                topic_tags = excluded.topic_tags,
                text_snippet = excluded.text_snippet,
                text_clean = excluded.text_clean,
                quotes_json = excluded.quotes_json,
                language = excluded.language,
                content_type = excluded.content_type,
                license_note = excluded.license_note,
                size_bytes = excluded.size_bytes
        "#,
        )
        .bind(&item.id)
        .bind(&item.title)
        .bind(&item.url)
        .bind(&item.source_domain)
        .bind(&item.author)
        .bind(item.published_at)
        .bind(item.retrieved_at)
        .bind(&tags_json)
        .bind(&item.text_snippet)
        .bind(&item.text_clean)
        .bind(&quotes_json)
        .bind(&item.language)
        .bind(&item.content_type)
        .bind(&item.license_note)
        .bind(size_bytes)
        .execute(&self.pool)
        .await?;

        tracing::debug!(id = %item.id, bytes = size_bytes, "Stored vault item");
        Ok(())
    }

    pub async fn get_by_id(&self, id: &str) -> Result<Option<VaultItem>> {
        let row = sqlx::query_as::<_, VaultRow>(&format!(
            "SELECT {ITEM_COLUMNS} FROM items i WHERE i.id = ?"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(VaultRow::into_item))
    }

    /// Returns `false` when no item had this id.
    pub async fn delete(&self, id: &str) -> Result<bool> {
        let result = sqlx::query("DELETE FROM items WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    pub async fn total_items(&self) -> Result<i64> {
        let count: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM items")
            .fetch_one(&self.pool)
            .await?;
        Ok(count.0)
    }

    /// Most recent `retrieved_at`, or `None` for an empty vault.
    pub async fn last_updated(&self) -> Result<Option<i64>> {
        let row: (Option<i64>,) = sqlx::query_as("SELECT MAX(retrieved_at) FROM items")
            .fetch_one(&self.pool)
            .await?;
        Ok(row.0)
    }

    /// Every topic tag in the vault, sorted and without duplicates.
    pub async fn all_tags(&self) -> Result<Vec<String>> {
        let rows: Vec<(String,)> = sqlx::query_as(
            r#"
            SELECT DISTINCT tag.value
            FROM items, json_each(items.topic_tags) AS tag
            WHERE json_valid(items.topic_tags) AND tag.type = 'text'
            ORDER BY tag.value
        "#,
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(|(tag,)| tag).collect())
    }

    /// Items carrying `tag` (case-insensitive), newest first.
    pub async fn search_by_tag(&self, tag: &str, limit: usize) -> Result<Vec<VaultItem>> {
        let rows = sqlx::query_as::<_, VaultRow>(&format!(
            r#"
            SELECT {ITEM_COLUMNS}
            FROM items i
            WHERE json_valid(i.topic_tags)
              AND EXISTS (
                SELECT 1 FROM json_each(i.topic_tags) AS tag
                WHERE tag.value = ? COLLATE NOCASE
              )
            ORDER BY COALESCE(i.published_at, i.retrieved_at) DESC, i.pk DESC
            LIMIT ?
        "#
        ))
        .bind(tag.trim())
        .bind(clamp_limit(limit))
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(VaultRow::into_item).collect())
    }

    /// Items by `author` (case-insensitive exact match), newest first.
    pub async fn search_by_author(&self, author: &str, limit: usize) -> Result<Vec<VaultItem>> {
        let rows = sqlx::query_as::<_, VaultRow>(&format!(
            r#"
            SELECT {ITEM_COLUMNS}
            FROM items i
            WHERE i.author = ? COLLATE NOCASE
            ORDER BY COALESCE(i.published_at, i.retrieved_at) DESC, i.pk DESC
            LIMIT ?
        "#
        ))
        .bind(author.trim())
        .bind(clamp_limit(limit))
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(VaultRow::into_item).collect())
    }
}
