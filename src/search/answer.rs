//! Answer synthesis from ranked results.
//!
//! Every builder is a pure function of the analysis and the result set.
//! Confidence describes how strong the result set is, not whether the
//! answer is true.

use super::intent::{Intent, QueryAnalysis};
use crate::providers::EncyclopediaHit;
use crate::storage::SearchResult;
use crate::util::truncate_chars;

pub const DIRECT_CONFIDENCE: f64 = 0.75;
pub const STEPS_CONFIDENCE: f64 = 0.7;
pub const QUOTES_CONFIDENCE: f64 = 0.8;
pub const SUMMARY_CONFIDENCE: f64 = 0.65;
pub const COMBINED_CONFIDENCE: f64 = 0.8;
pub const ENCYCLOPEDIA_CONFIDENCE: f64 = 0.7;
pub const GENERATED_CONFIDENCE: f64 = 0.9;

/// Answers below this get encyclopedia sources appended.
pub const SUPPLEMENT_THRESHOLD: f64 = 0.7;

/// Confidence of an encyclopedia source appended to a weak answer.
const SUPPLEMENT_SOURCE_CONFIDENCE: f64 = 0.8;

pub const ENCYCLOPEDIA_DOMAIN: &str = "encyclopedia";
pub const ENCYCLOPEDIA_CONTENT_TYPE: &str = "encyclopedia";
const ENCYCLOPEDIA_SCHEME: &str = "encyclopedia://";

const MAX_QUOTES: usize = 3;
const MAX_STEPS: usize = 10;
const MAX_DIRECT_SOURCES: usize = 5;
const MAX_SUMMARY_RESULTS: usize = 3;
const STEP_EXCERPT_CHARS: usize = 200;

const STALE_AFTER_SECS: i64 = 30 * 24 * 60 * 60;
pub const STALE_WARNING: &str =
    "None of these sources was published in the last 30 days; the information may be out of date.";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AnswerType {
    Direct,
    Steps,
    Quotes,
    Summary,
    None,
}

/// Citation attached to an answer.
#[derive(Debug, Clone, PartialEq)]
pub struct SourceInfo {
    pub title: String,
    pub url: String,
    pub domain: String,
    pub author: Option<String>,
    pub published: Option<i64>,
    pub retrieved: Option<i64>,
    pub content_type: String,
    pub confidence: f64,
}

impl SourceInfo {
    fn from_result(result: &SearchResult, confidence: f64) -> Self {
        let item = &result.item;
        Self {
            title: item.title.clone(),
            url: item.url.clone(),
            domain: item.source_domain.clone(),
            author: item.author.clone(),
            published: item.published_at,
            retrieved: Some(item.retrieved_at),
            content_type: item.content_type.clone(),
            confidence,
        }
    }

    fn from_hit(hit: &EncyclopediaHit, confidence: f64) -> Self {
        Self {
            title: hit.title.clone(),
            url: format!("{ENCYCLOPEDIA_SCHEME}{}", hit.url),
            domain: ENCYCLOPEDIA_DOMAIN.to_string(),
            author: None,
            published: None,
            retrieved: None,
            content_type: ENCYCLOPEDIA_CONTENT_TYPE.to_string(),
            confidence,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Answer {
    pub answer_type: AnswerType,
    pub summary: String,
    pub steps: Vec<String>,
    pub quotes: Vec<String>,
    pub warnings: Vec<String>,
    pub sources: Vec<SourceInfo>,
    pub raw_text: Option<String>,
    /// In `[0, 1]`
    pub confidence: f64,
}

impl Answer {
    fn empty(answer_type: AnswerType, summary: impl Into<String>) -> Self {
        Self {
            answer_type,
            summary: summary.into(),
            steps: Vec::new(),
            quotes: Vec::new(),
            warnings: Vec::new(),
            sources: Vec::new(),
            raw_text: None,
            confidence: 0.0,
        }
    }

    /// Nothing found anywhere.
    pub fn none() -> Self {
        Self::empty(AnswerType::None, "No relevant results found.")
    }
}

/// Per-source confidences: each score relative to the best one in the set.
fn relative_scores(results: &[SearchResult]) -> impl Iterator<Item = f64> + '_ {
    let best = results.iter().map(|r| r.score).fold(f64::MIN, f64::max);
    results.iter().map(move |r| {
        if best > 0.0 {
            (r.score / best).clamp(0.0, 1.0)
        } else {
            0.0
        }
    })
}

fn sources(results: &[SearchResult], limit: usize) -> Vec<SourceInfo> {
    results
        .iter()
        .zip(relative_scores(results))
        .take(limit)
        .map(|(result, confidence)| SourceInfo::from_result(result, confidence))
        .collect()
}

fn subject(analysis: &QueryAnalysis) -> String {
    if analysis.secondary_topic.is_empty() {
        analysis.person.clone()
    } else {
        format!("{} about {}", analysis.person, analysis.secondary_topic)
    }
}

/// Up to three quotes from the best results, with one source per item used.
///
/// Items without stored quotes contribute their snippet instead.
pub fn build_quotes_answer(analysis: &QueryAnalysis, results: &[SearchResult]) -> Answer {
    if results.is_empty() {
        return Answer::empty(
            AnswerType::Quotes,
            format!("No quotes found for {}.", subject(analysis)),
        );
    }

    let mut answer = Answer::empty(AnswerType::Quotes, format!("Quotes from {}:", subject(analysis)));
    for (result, confidence) in results.iter().zip(relative_scores(results)) {
        let item = &result.item;
        if !item.quotes.is_empty() {
            let room = MAX_QUOTES - answer.quotes.len();
            answer.quotes.extend(item.quotes.iter().take(room).cloned());
        } else if !item.text_snippet.is_empty() {
            answer.quotes.push(item.text_snippet.clone());
        }
        answer.sources.push(SourceInfo::from_result(result, confidence));

        if answer.quotes.len() >= MAX_QUOTES {
            break;
        }
    }

    answer.confidence = if answer.quotes.is_empty() {
        0.0
    } else {
        QUOTES_CONFIDENCE
    };
    answer
}

/// Step-like lines from the top result: lines starting with the next step
/// number, bullets, or lines mentioning a step. Falls back to an excerpt.
pub fn build_steps_answer(_analysis: &QueryAnalysis, results: &[SearchResult]) -> Answer {
    let Some(top) = results.first() else {
        return Answer::empty(AnswerType::Steps, "No instructions found.");
    };

    let text = if top.item.text_clean.is_empty() {
        &top.item.text_snippet
    } else {
        &top.item.text_clean
    };

    let mut answer = Answer::empty(AnswerType::Steps, "Instructions:");
    for line in text.lines().map(str::trim).filter(|l| !l.is_empty()) {
        if answer.steps.len() == MAX_STEPS {
            break;
        }
        let next = (answer.steps.len() + 1).to_string();
        if line.starts_with(&next)
            || line.starts_with(['-', '*'])
            || line.to_lowercase().contains("step")
        {
            answer.steps.push(line.to_string());
        }
    }

    if answer.steps.is_empty() && !text.is_empty() {
        answer.steps.push(truncate_chars(text, STEP_EXCERPT_CHARS).into_owned());
    }

    answer.sources = sources(results, results.len());
    answer.confidence = STEPS_CONFIDENCE;
    answer
}

/// The top result's snippet, with its full text as `raw_text`.
pub fn build_direct_answer(_analysis: &QueryAnalysis, results: &[SearchResult]) -> Answer {
    let Some(top) = results.first() else {
        return Answer::empty(AnswerType::Direct, "No information found.");
    };

    let mut answer = Answer::empty(AnswerType::Direct, top.item.text_snippet.clone());
    answer.raw_text = Some(top.item.text_clean.clone()).filter(|t| !t.is_empty());
    answer.sources = sources(results, MAX_DIRECT_SOURCES);
    answer.confidence = DIRECT_CONFIDENCE;
    answer
}

fn combined_snippets(results: &[SearchResult]) -> String {
    results
        .iter()
        .take(MAX_SUMMARY_RESULTS)
        .map(|r| r.item.text_snippet.as_str())
        .filter(|s| !s.is_empty())
        .collect::<Vec<_>>()
        .join("\n\n")
}

/// Snippets of the top three results.
pub fn build_summary_answer(_analysis: &QueryAnalysis, results: &[SearchResult]) -> Answer {
    if results.is_empty() {
        return Answer::empty(AnswerType::Summary, "No relevant information found.");
    }

    let mut answer = Answer::empty(AnswerType::Summary, combined_snippets(results));
    answer.sources = sources(results, MAX_SUMMARY_RESULTS);
    answer.confidence = SUMMARY_CONFIDENCE;
    answer
}

/// Summary over vault results right after an online refresh.
pub fn build_combined_answer(results: &[SearchResult]) -> Answer {
    if results.is_empty() {
        return Answer::none();
    }

    let mut answer = Answer::empty(AnswerType::Summary, combined_snippets(results));
    answer.sources = sources(results, MAX_SUMMARY_RESULTS);
    answer.confidence = COMBINED_CONFIDENCE;
    answer
}

/// Template answer for the query's intent.
pub fn build_intent_answer(analysis: &QueryAnalysis, results: &[SearchResult]) -> Answer {
    match analysis.intent {
        Intent::Quote => build_quotes_answer(analysis, results),
        Intent::HowTo => build_steps_answer(analysis, results),
        intent if intent.is_direct() => build_direct_answer(analysis, results),
        _ => build_summary_answer(analysis, results),
    }
}

/// Wrap generated text, citing every result it was given.
pub fn build_generated_answer(text: &str, results: &[SearchResult]) -> Answer {
    let mut answer = Answer::empty(AnswerType::Summary, text.trim());
    answer.sources = sources(results, results.len());
    answer.confidence = GENERATED_CONFIDENCE;
    answer
}

/// Answer from the encyclopedia alone: the first hit's snippet, or its
/// title when the snippet is empty.
pub fn build_encyclopedia_answer(hits: &[EncyclopediaHit]) -> Answer {
    let Some(first) = hits.first() else {
        return Answer::none();
    };

    let summary = if first.snippet.is_empty() {
        first.title.clone()
    } else {
        first.snippet.clone()
    };

    let mut answer = Answer::empty(AnswerType::Summary, summary);
    answer.sources = vec![SourceInfo::from_hit(first, ENCYCLOPEDIA_CONFIDENCE)];
    answer.confidence = ENCYCLOPEDIA_CONFIDENCE;
    answer
}

/// Add encyclopedia hits as extra sources after the primary ones.
pub fn append_encyclopedia_sources(answer: &mut Answer, hits: &[EncyclopediaHit]) {
    answer.sources.extend(
        hits.iter()
            .map(|hit| SourceInfo::from_hit(hit, SUPPLEMENT_SOURCE_CONFIDENCE)),
    );
}

/// Warn when the question asks for recent information and no source was
/// published within the last 30 days.
pub fn add_staleness_warning(answer: &mut Answer, analysis: &QueryAnalysis, now: i64) {
    if !analysis.needs_recent || answer.answer_type == AnswerType::None {
        return;
    }
    let has_recent = answer
        .sources
        .iter()
        .filter_map(|s| s.published)
        .any(|published| now - published <= STALE_AFTER_SECS);
    if !has_recent {
        answer.warnings.push(STALE_WARNING.to_string());
    }
}
