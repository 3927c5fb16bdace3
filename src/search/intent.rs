//! Query intent classification.
//!
//! Rules are checked in order and the first match wins. Matching happens on
//! an ASCII-lowercased copy of the query, which keeps byte offsets identical,
//! so captured names and topics are sliced from the original text and keep
//! their capitalization.

/// What the user is asking for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Intent {
    /// Something a person said
    Quote,
    HowTo,
    What,
    When,
    Where,
    Why,
    General,
}

impl Intent {
    /// WHAT, WHEN and WHERE questions get a single direct answer.
    pub fn is_direct(self) -> bool {
        matches!(self, Intent::What | Intent::When | Intent::Where)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueryAnalysis {
    pub intent: Intent,
    /// Query with the intent phrase removed
    pub main_topic: String,
    /// For quotes, what the person spoke about
    pub secondary_topic: String,
    pub person: String,
    pub needs_recent: bool,
    pub needs_official: bool,
}

const HOWTO_PREFIXES: &[&str] = &["how to ", "how do i ", "how can i "];
const WHAT_PREFIXES: &[&str] = &["what is ", "what are ", "what's "];
const WHEN_PREFIXES: &[&str] = &["when "];
const WHERE_PREFIXES: &[&str] = &["where "];
const WHY_PREFIXES: &[&str] = &["why "];

/// Words that mark a question about recent events. Matched as word prefixes
/// so "recently" and "currently" count.
const RECENCY_PREFIXES: &[&str] = &["recent", "latest", "current"];
const RECENCY_WORDS: &[&str] = &["today", "now"];

const ABOUT: &str = " about ";

pub fn analyze_query(text: &str) -> QueryAnalysis {
    let query = text.trim().trim_end_matches(['?', '!', '.']).trim_end();
    let lower = query.to_ascii_lowercase();

    let mut analysis = QueryAnalysis {
        intent: Intent::General,
        main_topic: query.to_string(),
        secondary_topic: String::new(),
        person: String::new(),
        needs_recent: needs_recent(&lower),
        needs_official: false,
    };

    if let Some((person, topic)) = match_quote(query, &lower) {
        analysis.intent = Intent::Quote;
        analysis.main_topic = person.to_string();
        analysis.person = person.to_string();
        analysis.secondary_topic = topic.to_string();
        analysis.needs_official = true;
        return analysis;
    }

    let prefixed = |prefixes: &[&str]| {
        prefixes
            .iter()
            .find(|p| lower.starts_with(*p))
            .map(|p| query[p.len()..].trim().to_string())
    };

    let (intent, topic) = if let Some(topic) = prefixed(HOWTO_PREFIXES) {
        (Intent::HowTo, Some(topic))
    } else if let Some(topic) = prefixed(WHAT_PREFIXES) {
        (Intent::What, Some(topic))
    } else if lower.starts_with("when ") || lower.contains("when did") {
        (Intent::When, prefixed(WHEN_PREFIXES))
    } else if lower.starts_with("where ") || lower.contains("where is") {
        (Intent::Where, prefixed(WHERE_PREFIXES))
    } else if lower.starts_with("why ") || lower.contains(" why ") {
        (Intent::Why, prefixed(WHY_PREFIXES))
    } else {
        (Intent::General, None)
    };

    analysis.intent = intent;
    if let Some(topic) = topic.filter(|t| !t.is_empty()) {
        analysis.main_topic = topic;
    }
    analysis
}

/// Match the quote patterns, returning `(person, topic)` sliced from `query`.
///
/// - "what did X say [about Y]"
/// - "X said [about Y]"
/// - "quote from X [about Y]"
fn match_quote<'a>(query: &'a str, lower: &str) -> Option<(&'a str, &'a str)> {
    const WHAT_DID: &str = "what did ";
    const SAID: &str = " said";
    const QUOTE_FROM: &str = "quote from ";

    let topic_after = |from: usize| {
        lower[from..]
            .find(ABOUT)
            .map(|i| query[from + i + ABOUT.len()..].trim())
            .unwrap_or("")
    };

    if let Some(pos) = lower.find(WHAT_DID) {
        let start = pos + WHAT_DID.len();
        if let Some(len) = lower[start..].find(" say") {
            let person = query[start..start + len].trim();
            if !person.is_empty() {
                return Some((person, topic_after(start + len)));
            }
        }
    }

    if let Some(pos) = lower.find(SAID) {
        let person = query[..pos].trim();
        if !person.is_empty() {
            return Some((person, topic_after(pos)));
        }
    }

    if let Some(pos) = lower.find(QUOTE_FROM) {
        let start = pos + QUOTE_FROM.len();
        let rest = &query[start..];
        let (person, topic) = match lower[start..].find(ABOUT) {
            Some(i) => (&rest[..i], &rest[i + ABOUT.len()..]),
            None => (rest, ""),
        };
        let person = person.trim();
        if !person.is_empty() {
            return Some((person, topic.trim()));
        }
    }

    None
}

fn needs_recent(lower: &str) -> bool {
    lower
        .split(|c: char| !c.is_alphanumeric())
        .any(|word| {
            RECENCY_WORDS.contains(&word) || RECENCY_PREFIXES.iter().any(|p| word.starts_with(p))
        })
}
