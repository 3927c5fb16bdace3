use crate::content::html::{
    attribute, find_elements, first_element, open_tags, paragraphs, remove_blocks, strip_tags,
    visible_chars, Element,
};
use crate::content::quotes::extract_quotes;
use crate::feed::parse_date;
use crate::util::{cap_words, collapse_whitespace, domain_of, truncate_chars};

/// Fallback title when a page has none.
pub const UNTITLED: &str = "Untitled";

/// Phrases that mark subscriber-only pages.
const PAYWALL_MARKERS: &[&str] = &["paywall", "subscriber only", "subscribe to read"];

/// An `<article>` is taken as the main text only above this many characters.
const MIN_ARTICLE_CHARS: usize = 200;

/// Content blocks with fewer words are never selected.
const MIN_BLOCK_WORDS: usize = 50;

/// Stopword votes needed before we claim a language other than the default.
const MIN_LANGUAGE_VOTES: usize = 3;

const DEFAULT_LANGUAGE: &str = "en";

const LANGUAGE_STOPWORDS: &[(&str, &[&str])] = &[
    ("en", &["the", "and", "is", "of", "to", "that", "with", "for"]),
    ("es", &["el", "los", "las", "que", "y", "es", "por", "con", "una"]),
    ("fr", &["le", "les", "est", "et", "des", "une", "pour", "dans", "avec"]),
    ("de", &["der", "die", "das", "und", "ist", "nicht", "mit", "ein", "zu"]),
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExtractorSettings {
    pub max_words: usize,
    pub snippet_chars: usize,
    pub max_quote_length: usize,
    pub quote_context_words: usize,
}

impl Default for ExtractorSettings {
    fn default() -> Self {
        Self {
            max_words: 2000,
            snippet_chars: 500,
            max_quote_length: 200,
            quote_context_words: 10,
        }
    }
}

/// Normalized article derived from a fetched page.
#[derive(Debug, Clone, PartialEq)]
pub struct ExtractedContent {
    pub title: String,
    pub author: String,
    pub publish_date: Option<i64>,
    pub domain: String,
    /// Plain text, one block per line, at most `max_words` words.
    pub main_text: String,
    /// Prefix of `main_text`, followed by `...` when cut.
    pub snippet: String,
    pub quotes: Vec<String>,
    pub language: String,
    pub word_count: usize,
    pub has_paywall: bool,
}

/// Heuristic HTML to article converter.
///
/// Every signal degrades to the next fallback when missing, so
/// [`ContentExtractor::extract`] always produces a result.
#[derive(Debug, Clone, Default)]
pub struct ContentExtractor {
    settings: ExtractorSettings,
}

impl ContentExtractor {
    pub fn new(settings: ExtractorSettings) -> Self {
        Self { settings }
    }

    pub fn settings(&self) -> &ExtractorSettings {
        &self.settings
    }

    pub fn extract(&self, html: &str, source_url: &str) -> ExtractedContent {
        let lower = html.to_ascii_lowercase();

        let title = meta_content(html, &lower, &["og:title"])
            .or_else(|| element_text(html, &lower, "title"))
            .or_else(|| element_text(html, &lower, "h1"))
            .unwrap_or_else(|| UNTITLED.to_string());
        let author = meta_content(html, &lower, &["author", "article:author"]).unwrap_or_default();
        let publish_date = meta_content(html, &lower, &["article:published_time", "datePublished"])
            .and_then(|value| parse_date(&value));

        let body = remove_blocks(html, &["script", "style", "noscript"]);
        let body_lower = body.to_ascii_lowercase();

        let text = main_text(&body, &body_lower);
        let (main_text, word_count) = cap_words(&text, self.settings.max_words);
        let snippet = truncate_chars(&main_text, self.settings.snippet_chars).into_owned();

        let quotes = extract_quotes(
            &main_text,
            self.settings.max_quote_length,
            self.settings.quote_context_words,
        )
        .into_iter()
        .map(|q| q.text)
        .collect();

        let has_paywall = PAYWALL_MARKERS.iter().any(|m| body_lower.contains(m));
        let language = detect_language(&main_text).to_string();

        tracing::debug!(
            url = %source_url,
            words = word_count,
            paywall = has_paywall,
            "Extracted page content"
        );

        ExtractedContent {
            title,
            author,
            publish_date,
            domain: domain_of(source_url),
            main_text,
            snippet,
            quotes,
            language,
            word_count,
            has_paywall,
        }
    }
}

/// `content` of the first `<meta>` whose property, name or itemprop matches
/// one of `keys`, trying keys in order.
fn meta_content(html: &str, lower: &str, keys: &[&str]) -> Option<String> {
    let metas = open_tags(html, lower, "meta");
    keys.iter().find_map(|key| {
        metas.iter().find_map(|tag| {
            let matches = ["property", "name", "itemprop"]
                .iter()
                .filter_map(|attr| attribute(tag, attr))
                .any(|v| v.eq_ignore_ascii_case(key));
            if !matches {
                return None;
            }
            attribute(tag, "content")
                .map(|c| collapse_whitespace(&c))
                .filter(|c| !c.is_empty())
        })
    })
}

fn element_text(html: &str, lower: &str, tag: &str) -> Option<String> {
    let el = first_element(lower, tag)?;
    let text = collapse_whitespace(&strip_tags(el.inner(html)));
    (!text.is_empty()).then_some(text)
}

fn main_text(html: &str, lower: &str) -> String {
    if let Some(article) = first_element(lower, "article") {
        let text = strip_tags(article.inner(html));
        if text.chars().count() > MIN_ARTICLE_CHARS {
            return text;
        }
    }

    if let Some(main) = first_element(lower, "main") {
        let text = strip_tags(main.inner(html));
        if !text.is_empty() {
            return text;
        }
    }

    if let Some(best) = score_blocks(html, lower).into_iter().next() {
        return best.text;
    }

    paragraphs(html, lower)
        .into_iter()
        .map(strip_tags)
        .filter(|p| !p.is_empty())
        .collect::<Vec<_>>()
        .join("\n")
}

/// A candidate content block with its readability score.
#[derive(Debug, Clone)]
struct ScoredBlock {
    start: usize,
    text: String,
    words: usize,
    link_density: f64,
    score: f64,
}

/// Score every `<div>`, `<section>` and `<article>` of at least
/// [`MIN_BLOCK_WORDS`] words, best first. Equal scores keep document order.
fn score_blocks(html: &str, lower: &str) -> Vec<ScoredBlock> {
    let mut elements: Vec<Element> = ["div", "section", "article"]
        .iter()
        .flat_map(|tag| find_elements(lower, tag))
        .collect();
    elements.sort_by_key(|e| e.start);

    let mut blocks: Vec<ScoredBlock> = elements
        .into_iter()
        .filter_map(|el| {
            let inner = el.inner(html);
            let text = strip_tags(inner);
            let words = text.split_whitespace().count();
            if words < MIN_BLOCK_WORDS {
                return None;
            }
            let link_density = link_density(inner, &lower[el.content_start..el.content_end], &text);
            Some(ScoredBlock {
                start: el.start,
                words,
                link_density,
                score: words as f64 * (1.0 - link_density),
                text,
            })
        })
        .collect();

    blocks.sort_by(|a, b| b.score.total_cmp(&a.score));
    tracing::trace!(
        candidates = blocks.len(),
        best = ?blocks.first().map(|b| (b.start, b.words, b.link_density)),
        "Scored content blocks"
    );
    blocks
}

/// Share of the block's visible characters that sit inside `<a>` elements.
fn link_density(inner: &str, inner_lower: &str, text: &str) -> f64 {
    let total = visible_chars(text);
    if total == 0 {
        return 0.0;
    }
    let linked: usize = find_elements(inner_lower, "a")
        .iter()
        .map(|a| visible_chars(&strip_tags(a.inner(inner))))
        .sum();
    (linked as f64 / total as f64).min(1.0)
}

/// Stopword vote over en/es/fr/de. Weak or tied votes fall back to `"en"`.
fn detect_language(text: &str) -> &'static str {
    let words: Vec<String> = text
        .split(|c: char| !c.is_alphabetic())
        .filter(|w| !w.is_empty())
        .take(500)
        .map(str::to_lowercase)
        .collect();

    let mut votes: Vec<(&'static str, usize)> = LANGUAGE_STOPWORDS
        .iter()
        .map(|(lang, stops)| {
            let n = words.iter().filter(|w| stops.contains(&w.as_str())).count();
            (*lang, n)
        })
        .collect();
    votes.sort_by(|a, b| b.1.cmp(&a.1));

    match votes.as_slice() {
        [(lang, top), rest @ ..]
            if *top >= MIN_LANGUAGE_VOTES && rest.first().map_or(0, |(_, n)| *n) < *top =>
        {
            *lang
        }
        _ => DEFAULT_LANGUAGE,
    }
}
