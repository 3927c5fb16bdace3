//! Candidate filtering and scoring for feed items.
//!
//! Everything here is a pure function of the query keywords, the candidate
//! text and the clock passed in, so ranking is reproducible in tests.

const DAY: i64 = 24 * 60 * 60;

/// Fraction of keywords that must appear for a feed item to be a candidate.
pub const MIN_KEYWORD_OVERLAP: f64 = 0.5;

/// Candidates scoring below this are dropped.
pub const MIN_RELEVANCE: f64 = 0.3;

const TITLE_WEIGHT: f64 = 0.6;
const SNIPPET_WEIGHT: f64 = 0.4;

/// A feed item that matched the query, before its page is fetched.
#[derive(Debug, Clone, PartialEq)]
pub struct OnlineResult {
    pub url: String,
    pub title: String,
    pub snippet: String,
    /// Name of the feed it came from
    pub source: String,
    pub category: String,
    pub published: Option<i64>,
    /// In `[0, 1]`
    pub relevance: f64,
}

fn match_fraction(keywords: &[String], text: &str) -> f64 {
    if keywords.is_empty() {
        return 0.0;
    }
    let text = text.to_lowercase();
    let hits = keywords.iter().filter(|k| text.contains(k.as_str())).count();
    hits as f64 / keywords.len() as f64
}

/// Keyword-overlap rule: at least half of the keywords occur in the title
/// or the description (case-insensitive substring match).
pub fn matches_keywords(keywords: &[String], title: &str, description: &str) -> bool {
    if keywords.is_empty() {
        return false;
    }
    let title = title.to_lowercase();
    let description = description.to_lowercase();
    let hits = keywords
        .iter()
        .filter(|k| title.contains(k.as_str()) || description.contains(k.as_str()))
        .count();
    hits as f64 / keywords.len() as f64 >= MIN_KEYWORD_OVERLAP
}

/// Score in `[0, 1]` from title and snippet keyword coverage, boosted for
/// items published in the last week (×1.2) or month (×1.1).
///
/// Unknown dates get no boost. Dates in the future count as recent.
pub fn calculate_relevance(
    keywords: &[String],
    title: &str,
    snippet: &str,
    published: Option<i64>,
    now: i64,
) -> f64 {
    let base = (TITLE_WEIGHT * match_fraction(keywords, title)
        + SNIPPET_WEIGHT * match_fraction(keywords, snippet))
    .min(1.0);

    let boost = match published.map(|p| now.saturating_sub(p)) {
        Some(age) if age < 7 * DAY => 1.2,
        Some(age) if age < 30 * DAY => 1.1,
        _ => 1.0,
    };

    (base * boost).min(1.0)
}

/// Score every candidate, drop weak ones, and keep the best `limit`.
///
/// The sort is stable, so equal scores keep feed order.
pub fn rank_candidates(
    keywords: &[String],
    candidates: Vec<OnlineResult>,
    now: i64,
    limit: usize,
) -> Vec<OnlineResult> {
    let mut scored: Vec<OnlineResult> = candidates
        .into_iter()
        .map(|mut c| {
            c.relevance = calculate_relevance(keywords, &c.title, &c.snippet, c.published, now);
            c
        })
        .filter(|c| c.relevance >= MIN_RELEVANCE)
        .collect();

    scored.sort_by(|a, b| b.relevance.total_cmp(&a.relevance));
    scored.truncate(limit);
    scored
}
