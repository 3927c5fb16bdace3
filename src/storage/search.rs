use anyhow::Result;

use super::items::{clamp_limit, ITEM_COLUMNS};
use super::schema::Vault;
use super::types::{DatabaseError, FtsConsistencyReport, SearchResult, SearchRow};
use crate::util::{keywords, tokenize, MAX_QUERY_LENGTH};

// ============================================================================
// FTS5 Query Validation
// ============================================================================

/// Generated MATCH expressions are quoted terms plus operators, so they may
/// run longer than the user query they came from.
const MAX_EXPRESSION_LENGTH: usize = 512;
const MAX_WILDCARDS: usize = 3;
const MAX_OR_OPERATORS: usize = 5;
const MAX_PARENTHESES: usize = 5;
const MAX_AND_OPERATORS: usize = 10;

/// Terms OR-ed together in a full-text query.
const MAX_MATCH_TERMS: usize = MAX_OR_OPERATORS + 1;
/// Terms on each side of a quote query.
const MAX_QUOTE_TERMS: usize = 4;
/// Longest single term, in chars. Keeps every generated expression under
/// `MAX_EXPRESSION_LENGTH`.
const MAX_TERM_CHARS: usize = 48;

/// Column weights for title, text_snippet, text_clean, quotes_json, topic_tags.
const BM25: &str = "bm25(items_fts, 5.0, 2.0, 1.0, 3.0, 2.0)";

/// Highlighted excerpt from whichever column matched best.
const SNIPPET: &str = "snippet(items_fts, -1, '[', ']', '...', 12)";

/// Validate FTS5 expression complexity before handing it to SQLite.
///
/// Limits:
/// - Maximum expression length: 512 chars
/// - Maximum wildcards (*): 3
/// - Maximum OR operators: 5
/// - Maximum parentheses: 5, balanced
/// - Maximum AND operators: 10
fn validate_fts_query(query: &str) -> Result<()> {
    if query.chars().count() > MAX_EXPRESSION_LENGTH {
        anyhow::bail!(
            "Search expression exceeds maximum length of {} characters",
            MAX_EXPRESSION_LENGTH
        );
    }

    let wildcard_count = query.matches('*').count();
    if wildcard_count > MAX_WILDCARDS {
        anyhow::bail!(
            "Search query contains too many wildcards (max {})",
            MAX_WILDCARDS
        );
    }

    let or_count = query.to_uppercase().matches(" OR ").count();
    if or_count > MAX_OR_OPERATORS {
        anyhow::bail!(
            "Search query contains too many OR operators (max {})",
            MAX_OR_OPERATORS
        );
    }

    let open_paren_count = query.chars().filter(|&c| c == '(').count();
    let close_paren_count = query.chars().filter(|&c| c == ')').count();
    if open_paren_count > MAX_PARENTHESES {
        anyhow::bail!(
            "Search query contains too many parentheses (max {})",
            MAX_PARENTHESES
        );
    }
    if open_paren_count != close_paren_count {
        anyhow::bail!("Search query has unbalanced parentheses");
    }

    let and_count = query.to_uppercase().matches(" AND ").count();
    if and_count > MAX_AND_OPERATORS {
        anyhow::bail!(
            "Search query contains too many AND operators (max {})",
            MAX_AND_OPERATORS
        );
    }

    Ok(())
}

/// First `MAX_QUERY_LENGTH` chars of `query`, cut on a char boundary.
/// Long questions are searched by their opening words rather than refused.
fn clip_query(query: &str) -> &str {
    match query.char_indices().nth(MAX_QUERY_LENGTH) {
        Some((end, _)) => &query[..end],
        None => query,
    }
}

fn clip_terms(terms: Vec<String>, max_terms: usize) -> Vec<String> {
    terms
        .into_iter()
        .take(max_terms)
        .map(|t| t.chars().take(MAX_TERM_CHARS).collect())
        .collect()
}

// ============================================================================
// MATCH Expression Builders
// ============================================================================

/// `"a" OR "b" OR ...`. Terms are alphanumeric tokens, so quoting is enough
/// to neutralize FTS5 syntax.
fn any_of(terms: &[String]) -> Option<String> {
    if terms.is_empty() {
        return None;
    }
    Some(
        terms
            .iter()
            .map(|t| format!("\"{t}\""))
            .collect::<Vec<_>>()
            .join(" OR "),
    )
}

fn all_of(terms: &[String]) -> Option<String> {
    if terms.is_empty() {
        return None;
    }
    Some(
        terms
            .iter()
            .map(|t| format!("\"{t}\""))
            .collect::<Vec<_>>()
            .join(" AND "),
    )
}

/// Person tokens AND-ed, then AND-ed with the topic tokens OR-ed together.
fn quote_expression(person: &str, topic: &str) -> Option<String> {
    let person_terms = clip_terms(tokenize(person), MAX_QUOTE_TERMS);
    let topic_terms = if topic.trim().is_empty() {
        Vec::new()
    } else {
        clip_terms(keywords(topic), MAX_QUOTE_TERMS)
    };

    match (all_of(&person_terms), any_of(&topic_terms)) {
        (Some(p), Some(t)) => Some(format!("{p} AND ({t})")),
        (Some(p), None) => Some(p),
        (None, Some(t)) => Some(t),
        (None, None) => None,
    }
}

/// `%text%` for LIKE with `\` as the escape character.
fn like_contains(text: &str) -> String {
    let mut escaped = String::with_capacity(text.len() + 2);
    escaped.push('%');
    for c in text.chars() {
        if matches!(c, '%' | '_' | '\\') {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped.push('%');
    escaped
}

impl Vault {
    // ========================================================================
    // Search Operations
    // ========================================================================

    /// Ranked full-text search over title, snippet, text, quotes and tags.
    ///
    /// The query is reduced to its keywords, which are OR-ed together and
    /// ranked by weighted bm25 (title matches count most). Scores are
    /// negated bm25, so higher is better. An empty or keyword-less query
    /// returns nothing.
    pub async fn search_full_text(&self, query: &str, limit: usize) -> Result<Vec<SearchResult>> {
        let query = query.trim();
        if query.is_empty() {
            return Ok(Vec::new());
        }
        let query = clip_query(query);

        let terms = clip_terms(keywords(query), MAX_MATCH_TERMS);
        let Some(expression) = any_of(&terms) else {
            return Ok(Vec::new());
        };
        validate_fts_query(&expression)?;

        tracing::debug!(query = %query, expression = %expression, limit, "search_full_text");

        let rows = sqlx::query_as::<_, SearchRow>(&format!(
            r#"
            SELECT {ITEM_COLUMNS}, -{BM25} AS score, {SNIPPET} AS snippet
            FROM items_fts
            INNER JOIN items i ON i.pk = items_fts.rowid
            WHERE items_fts MATCH ?
            ORDER BY {BM25}, i.pk
            LIMIT ?
        "#
        ))
        .bind(&expression)
        .bind(clamp_limit(limit))
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(SearchRow::into_result).collect())
    }

    /// Search for things `person` said, optionally about `topic`.
    ///
    /// Only transcripts, statements, or items whose stored quotes mention the
    /// person are considered. Ordered by rank, then transcripts before
    /// statements before anything else.
    pub async fn search_quotes(
        &self,
        person: &str,
        topic: &str,
        limit: usize,
    ) -> Result<Vec<SearchResult>> {
        let person = clip_query(person.trim());
        let topic = clip_query(topic);

        let Some(expression) = quote_expression(person, topic) else {
            return Ok(Vec::new());
        };
        validate_fts_query(&expression)?;

        tracing::debug!(person = %person, topic = %topic, expression = %expression, "search_quotes");

        let rows = sqlx::query_as::<_, SearchRow>(&format!(
            r#"
            SELECT {ITEM_COLUMNS}, -{BM25} AS score, {SNIPPET} AS snippet
            FROM items_fts
            INNER JOIN items i ON i.pk = items_fts.rowid
            WHERE items_fts MATCH ?
              AND (i.content_type IN ('transcript', 'statement')
                   OR (? <> '' AND i.quotes_json LIKE ? ESCAPE '\'))
            ORDER BY {BM25},
                     CASE i.content_type
                         WHEN 'transcript' THEN 1
                         WHEN 'statement' THEN 2
                         ELSE 3
                     END,
                     i.pk
            LIMIT ?
        "#
        ))
        .bind(&expression)
        .bind(person)
        .bind(like_contains(person))
        .bind(clamp_limit(limit))
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(SearchRow::into_result).collect())
    }

    // ========================================================================
    // FTS5 Maintenance Operations
    // ========================================================================

    /// Compare the FTS5 index with the `items` table.
    ///
    /// Uses the index's docsize shadow table: an external-content FTS table
    /// answers plain SELECTs from `items` itself and would always look healthy.
    pub async fn check_index_consistency(&self) -> Result<FtsConsistencyReport, DatabaseError> {
        let items_count: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM items")
            .fetch_one(&self.pool)
            .await?;

        let fts_count: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM items_fts_docsize")
            .fetch_one(&self.pool)
            .await?;

        let orphaned: (i64,) = sqlx::query_as(
            "SELECT COUNT(*) FROM items_fts_docsize d LEFT JOIN items i ON d.id = i.pk WHERE i.pk IS NULL",
        )
        .fetch_one(&self.pool)
        .await?;

        let missing: (i64,) = sqlx::query_as(
            "SELECT COUNT(*) FROM items i LEFT JOIN items_fts_docsize d ON i.pk = d.id WHERE d.id IS NULL",
        )
        .fetch_one(&self.pool)
        .await?;

        let is_consistent = orphaned.0 == 0 && missing.0 == 0 && items_count.0 == fts_count.0;

        tracing::debug!(
            items = items_count.0,
            fts = fts_count.0,
            orphaned = orphaned.0,
            missing = missing.0,
            is_consistent = is_consistent,
            "FTS5 consistency check"
        );

        Ok(FtsConsistencyReport {
            items_count: items_count.0,
            fts_count: fts_count.0,
            orphaned_fts_entries: orphaned.0,
            missing_fts_entries: missing.0,
            is_consistent,
        })
    }

    /// Rebuild the FTS5 index from `items`. Returns the number of items indexed.
    pub async fn rebuild_index(&self) -> Result<usize> {
        sqlx::query("INSERT INTO items_fts(items_fts) VALUES('rebuild')")
            .execute(&self.pool)
            .await?;

        let count: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM items")
            .fetch_one(&self.pool)
            .await?;

        tracing::info!(items = count.0, "Rebuilt search index");
        Ok(count.0 as usize)
    }

    /// Merge FTS5 index segments. Safe to run at any time.
    pub async fn optimize_index(&self) -> Result<()> {
        sqlx::query("INSERT INTO items_fts(items_fts) VALUES('optimize')")
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Compact the database file.
    pub async fn vacuum(&self) -> Result<()> {
        sqlx::query("VACUUM").execute(&self.pool).await?;
        Ok(())
    }
}
