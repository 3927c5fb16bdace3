use std::borrow::Cow;

use quick_xml::escape::{resolve_predefined_entity, unescape_with};

/// Marker appended to text cut short by [`truncate_chars`].
pub const ELLIPSIS: &str = "...";

/// Words that carry no retrieval signal on their own.
const STOPWORDS: &[&str] = &[
    "a", "an", "and", "are", "as", "at", "be", "by", "did", "do", "does", "for", "from", "how",
    "i", "in", "is", "it", "of", "on", "or", "say", "said", "the", "to", "was", "what", "when",
    "where", "which", "who", "why", "with",
];

/// Named HTML entities seen in feeds and pages that XML does not predefine.
fn resolve_html_entity(name: &str) -> Option<&'static str> {
    Some(match name {
        "nbsp" => " ",
        "mdash" => "\u{2014}",
        "ndash" => "\u{2013}",
        "hellip" => "\u{2026}",
        "lsquo" => "\u{2018}",
        "rsquo" => "\u{2019}",
        "ldquo" => "\u{201c}",
        "rdquo" => "\u{201d}",
        "laquo" => "\u{ab}",
        "raquo" => "\u{bb}",
        "copy" => "\u{a9}",
        "reg" => "\u{ae}",
        "trade" => "\u{2122}",
        "middot" => "\u{b7}",
        "bull" => "\u{2022}",
        "eacute" => "\u{e9}",
        "egrave" => "\u{e8}",
        "aacute" => "\u{e1}",
        "oacute" => "\u{f3}",
        "uuml" => "\u{fc}",
        "ouml" => "\u{f6}",
        "auml" => "\u{e4}",
        "ccedil" => "\u{e7}",
        "ntilde" => "\u{f1}",
        _ => return None,
    })
}

/// Longest character reference we try to resolve, `&` and `;` included.
const MAX_REFERENCE_LEN: usize = 12;

/// Decode XML and common HTML character references.
///
/// Each reference is resolved on its own, so a stray `&` or an unknown
/// entity is kept literally without affecting the rest of the text.
pub fn decode_entities(s: &str) -> Cow<'_, str> {
    if !s.contains('&') {
        return Cow::Borrowed(s);
    }

    let resolve =
        |name: &str| resolve_predefined_entity(name).or_else(|| resolve_html_entity(name));
    let mut out = String::with_capacity(s.len());
    let mut rest = s;
    while let Some(amp) = rest.find('&') {
        out.push_str(&rest[..amp]);
        let tail = &rest[amp..];
        let reference = tail
            .find(';')
            .filter(|&end| end < MAX_REFERENCE_LEN)
            .map(|end| &tail[..=end]);
        match reference.and_then(|r| unescape_with(r, resolve).ok().map(|d| (r.len(), d))) {
            Some((consumed, decoded)) => {
                out.push_str(&decoded);
                rest = &tail[consumed..];
            }
            None => {
                out.push('&');
                rest = &tail[1..];
            }
        }
    }
    out.push_str(rest);
    Cow::Owned(out)
}

/// Collapse every run of whitespace (including newlines) to a single space.
pub fn collapse_whitespace(s: &str) -> String {
    s.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Collapse whitespace inside each line and drop blank lines, keeping line breaks.
pub fn normalize_lines(s: &str) -> String {
    s.lines()
        .map(collapse_whitespace)
        .filter(|line| !line.is_empty())
        .collect::<Vec<_>>()
        .join("\n")
}

/// Keep at most `max_words` words, preserving line structure.
///
/// Returns the capped text and the number of words it contains.
pub fn cap_words(text: &str, max_words: usize) -> (String, usize) {
    let mut out = String::with_capacity(text.len().min(max_words.saturating_mul(8)));
    let mut count = 0;

    'lines: for line in text.lines() {
        let mut line_started = false;
        for word in line.split_whitespace() {
            if count == max_words {
                break 'lines;
            }
            if line_started {
                out.push(' ');
            } else {
                if !out.is_empty() {
                    out.push('\n');
                }
                line_started = true;
            }
            out.push_str(word);
            count += 1;
        }
    }

    (out, count)
}

/// Truncate to `max_chars` characters, appending [`ELLIPSIS`] if anything was cut.
///
/// The result always starts with a prefix of `s`.
pub fn truncate_chars(s: &str, max_chars: usize) -> Cow<'_, str> {
    match s.char_indices().nth(max_chars) {
        None => Cow::Borrowed(s),
        Some((cut, _)) => Cow::Owned(format!("{}{}", &s[..cut], ELLIPSIS)),
    }
}

/// Lowercased alphanumeric tokens of `s`, in order.
pub fn tokenize(s: &str) -> Vec<String> {
    s.split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
        .map(str::to_lowercase)
        .collect()
}

/// Query keywords: tokens minus stopwords, deduplicated in order.
///
/// Falls back to every token when the query is made only of stopwords, so
/// "what is it" still searches for something.
pub fn keywords(query: &str) -> Vec<String> {
    let tokens = tokenize(query);
    let mut seen = Vec::with_capacity(tokens.len());
    for token in tokens.iter().filter(|t| !STOPWORDS.contains(&t.as_str())) {
        if !seen.contains(token) {
            seen.push(token.clone());
        }
    }
    if seen.is_empty() {
        for token in tokens {
            if !seen.contains(&token) {
                seen.push(token);
            }
        }
    }
    seen
}

/// Strip terminal control characters from untrusted text before printing.
///
/// Keeps tab and newline. Returns `Cow::Borrowed` when nothing needs removing.
pub fn strip_control_chars(s: &str) -> Cow<'_, str> {
    let is_control = |c: char| c == '\u{7f}' || (c < ' ' && c != '\t' && c != '\n');
    if !s.chars().any(is_control) {
        return Cow::Borrowed(s);
    }
    Cow::Owned(s.chars().filter(|&c| !is_control(c)).collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_decode_entities_predefined_and_html() {
        assert_eq!(decode_entities("Fish &amp; Chips"), "Fish & Chips");
        assert_eq!(decode_entities("a&nbsp;b"), "a b");
        assert_eq!(decode_entities("&#8220;hi&#8221;"), "\u{201c}hi\u{201d}");
        assert_eq!(decode_entities("&lt;p&gt;"), "<p>");
    }

    #[test]
    fn test_decode_entities_malformed_kept() {
        assert_eq!(decode_entities("AT&T rocks"), "AT&T rocks");
        assert_eq!(decode_entities("&bogus;"), "&bogus;");
        assert_eq!(decode_entities("AT&T &amp; co;"), "AT&T & co;");
        assert!(matches!(decode_entities("plain"), Cow::Borrowed(_)));
    }

    #[test]
    fn test_normalize_lines() {
        let input = "  first   line \n\n\t second\tline  \n   \n";
        assert_eq!(normalize_lines(input), "first line\nsecond line");
    }

    #[test]
    fn test_cap_words_keeps_lines() {
        let (text, count) = cap_words("one two\nthree four five\nsix", 4);
        assert_eq!(text, "one two\nthree four");
        assert_eq!(count, 4);

        let (text, count) = cap_words("short text", 100);
        assert_eq!(text, "short text");
        assert_eq!(count, 2);
    }

    #[test]
    fn test_truncate_chars() {
        assert_eq!(truncate_chars("Hello World", 5), "Hello...");
        assert_eq!(truncate_chars("Hello", 5), "Hello");
        assert_eq!(truncate_chars("日本語テキスト", 3), "日本語...");
        assert_eq!(truncate_chars("", 0), "");
    }

    #[test]
    fn test_keywords_drop_stopwords() {
        assert_eq!(keywords("What is Hypothermia?"), vec!["hypothermia"]);
        assert_eq!(
            keywords("water purification, water!"),
            vec!["water", "purification"]
        );
    }

    #[test]
    fn test_keywords_fall_back_to_all_tokens() {
        assert_eq!(keywords("who is it"), vec!["who", "is", "it"]);
        assert!(keywords("  ?! ").is_empty());
    }

    #[test]
    fn test_strip_control_chars() {
        assert_eq!(strip_control_chars("he\x00llo\x1b[0m\n"), "hello[0m\n");
        assert!(matches!(strip_control_chars("clean\ttext"), Cow::Borrowed(_)));
    }
}
