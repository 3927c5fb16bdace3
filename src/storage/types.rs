use thiserror::Error;

// ============================================================================
// Error Types
// ============================================================================

/// Errors raised while opening the vault.
#[derive(Debug, Error)]
pub enum DatabaseError {
    /// Another almanac process holds the database lock
    #[error("The vault is in use by another almanac process. Close it and try again.")]
    InstanceLocked,

    #[error("Vault migration failed: {0}")]
    Migration(String),

    #[error("Vault error: {0}")]
    Other(#[from] sqlx::Error),
}

impl DatabaseError {
    /// Classify a sqlx error, mapping lock contention to `InstanceLocked`.
    pub(crate) fn from_sqlx(err: sqlx::Error) -> Self {
        if is_lock_error(&err.to_string()) {
            return DatabaseError::InstanceLocked;
        }
        DatabaseError::Other(err)
    }
}

/// SQLITE_BUSY, SQLITE_LOCKED and SQLITE_CANTOPEN surface as these messages.
pub(crate) fn is_lock_error(message: &str) -> bool {
    let message = message.to_lowercase();
    message.contains("database is locked")
        || message.contains("database table is locked")
        || message.contains("sqlite_busy")
        || message.contains("sqlite_locked")
        || message.contains("unable to open database file")
}

// ============================================================================
// Items
// ============================================================================

/// One stored document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VaultItem {
    /// Content hash of (url, title, published_at), see `online::item_id`.
    pub id: String,
    pub title: String,
    pub url: String,
    pub source_domain: String,
    pub author: Option<String>,
    /// Epoch seconds. `None` when the source gave no usable date.
    pub published_at: Option<i64>,
    /// Epoch seconds. Never moves backwards when an item is re-inserted.
    pub retrieved_at: i64,
    pub topic_tags: Vec<String>,
    pub text_snippet: String,
    pub text_clean: String,
    pub quotes: Vec<String>,
    pub language: String,
    pub content_type: String,
    pub license_note: Option<String>,
}

impl VaultItem {
    /// Bytes this item accounts for against the cache budget.
    pub(crate) fn stored_size(&self, tags_json: &str, quotes_json: &str) -> i64 {
        (self.title.len()
            + self.url.len()
            + self.text_snippet.len()
            + self.text_clean.len()
            + tags_json.len()
            + quotes_json.len()) as i64
    }
}

/// A scored item returned by a vault query. Higher scores rank first.
#[derive(Debug, Clone, PartialEq)]
pub struct SearchResult {
    pub item: VaultItem,
    pub score: f64,
    pub matched_snippets: Vec<String>,
}

// ============================================================================
// Reports
// ============================================================================

/// FTS5 index health relative to the `items` table.
///
/// Counts come from the index's own docsize shadow table, so a desynced
/// index shows up as orphaned or missing entries.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FtsConsistencyReport {
    pub items_count: i64,
    pub fts_count: i64,
    /// Indexed rows with no item behind them
    pub orphaned_fts_entries: i64,
    /// Items the index does not know about
    pub missing_fts_entries: i64,
    pub is_consistent: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CacheStats {
    pub total_items: i64,
    pub total_bytes: i64,
    pub oldest_retrieved: Option<i64>,
    pub newest_retrieved: Option<i64>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EvictionReport {
    pub removed: u64,
    pub bytes_before: i64,
    pub bytes_after: i64,
}

// ============================================================================
// Row Types
// ============================================================================

/// Raw `items` row. JSON columns are decoded in [`VaultRow::into_item`].
#[derive(Debug, sqlx::FromRow)]
pub(crate) struct VaultRow {
    pub id: String,
    pub title: String,
    pub url: String,
    pub source_domain: String,
    pub author: Option<String>,
    pub published_at: Option<i64>,
    pub retrieved_at: i64,
    pub topic_tags: String,
    pub text_snippet: String,
    pub text_clean: String,
    pub quotes_json: String,
    pub language: String,
    pub content_type: String,
    pub license_note: Option<String>,
}

impl VaultRow {
    pub(crate) fn into_item(self) -> VaultItem {
        VaultItem {
            topic_tags: decode_list(&self.id, "topic_tags", &self.topic_tags),
            quotes: decode_list(&self.id, "quotes_json", &self.quotes_json),
            id: self.id,
            title: self.title,
            url: self.url,
            source_domain: self.source_domain,
            author: self.author,
            published_at: self.published_at,
            retrieved_at: self.retrieved_at,
            text_snippet: self.text_snippet,
            text_clean: self.text_clean,
            language: self.language,
            content_type: self.content_type,
            license_note: self.license_note,
        }
    }
}

/// `items` row plus the FTS5 rank and highlighted snippet.
#[derive(Debug, sqlx::FromRow)]
pub(crate) struct SearchRow {
    #[sqlx(flatten)]
    pub row: VaultRow,
    pub score: f64,
    pub snippet: Option<String>,
}

impl SearchRow {
    pub(crate) fn into_result(self) -> SearchResult {
        SearchResult {
            matched_snippets: self.snippet.filter(|s| !s.trim().is_empty()).into_iter().collect(),
            score: self.score,
            item: self.row.into_item(),
        }
    }
}

fn decode_list(id: &str, column: &str, json: &str) -> Vec<String> {
    serde_json::from_str(json).unwrap_or_else(|e| {
        tracing::warn!(item = %id, column, error = %e, "Corrupt JSON column, treating as empty");
        Vec::new()
    })
}
