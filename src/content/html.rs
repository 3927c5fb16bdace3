//! Heuristic HTML scanning.
//!
//! None of this is a DOM parser. Every routine works on byte offsets found
//! in an ASCII-lowercased copy of the document (same length, same offsets as
//! the original) and treats a missing delimiter as "not found".

use crate::util::{decode_entities, normalize_lines};

/// Tags that start a new line when converted to text.
const BLOCK_TAGS: &[&str] = &[
    "address", "article", "aside", "blockquote", "br", "dd", "div", "dl", "dt", "figcaption",
    "footer", "h1", "h2", "h3", "h4", "h5", "h6", "header", "hr", "main", "nav", "ol", "p",
    "pre", "section", "table", "td", "th", "tr", "ul",
];

/// Byte span of one element inside a document.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Element {
    /// Offset of the `<` of the opening tag.
    pub start: usize,
    /// Offset just past the opening tag's `>`.
    pub content_start: usize,
    /// Offset of the closing tag, or end of document when unclosed.
    pub content_end: usize,
}

impl Element {
    pub fn open_tag<'a>(&self, html: &'a str) -> &'a str {
        &html[self.start..self.content_start]
    }

    pub fn inner<'a>(&self, html: &'a str) -> &'a str {
        &html[self.content_start..self.content_end]
    }
}

/// True when `doc[at..]` continues a tag name, i.e. `<div` inside `<divider`.
fn continues_name(doc: &str, at: usize) -> bool {
    doc.as_bytes()
        .get(at)
        .is_some_and(|b| b.is_ascii_alphanumeric() || *b == b'-' || *b == b':' || *b == b'_')
}

/// Offsets of every `<tag` opening in `lower`.
fn open_positions(lower: &str, tag: &str) -> Vec<usize> {
    let needle = format!("<{tag}");
    lower
        .match_indices(&needle)
        .map(|(i, _)| i)
        .filter(|&i| !continues_name(lower, i + needle.len()))
        .collect()
}

/// Offsets of every `</tag` closing in `lower`.
fn close_positions(lower: &str, tag: &str) -> Vec<usize> {
    let needle = format!("</{tag}");
    lower
        .match_indices(&needle)
        .map(|(i, _)| i)
        .filter(|&i| !continues_name(lower, i + needle.len()))
        .collect()
}

/// Every `tag` element in document order, nested ones included.
///
/// Opening and closing tags are paired with a stack, so `<div><div></div></div>`
/// yields the outer element spanning the inner one. Elements left open run to
/// the end of the document.
pub fn find_elements(lower: &str, tag: &str) -> Vec<Element> {
    let opens = open_positions(lower, tag);
    if opens.is_empty() {
        return Vec::new();
    }
    let closes = close_positions(lower, tag);

    let mut events: Vec<(usize, bool)> = opens
        .iter()
        .map(|&p| (p, true))
        .chain(closes.iter().map(|&p| (p, false)))
        .collect();
    events.sort_unstable();

    let mut stack: Vec<usize> = Vec::new();
    let mut elements = Vec::with_capacity(opens.len());
    let mut push = |start: usize, content_end: usize| {
        if let Some(gt) = lower[start..].find('>') {
            let content_start = start + gt + 1;
            if content_start <= content_end {
                elements.push(Element {
                    start,
                    content_start,
                    content_end,
                });
            }
        }
    };

    for (pos, is_open) in events {
        if is_open {
            stack.push(pos);
        } else if let Some(start) = stack.pop() {
            push(start, pos);
        }
    }
    for start in stack {
        push(start, lower.len());
    }

    elements.sort_by_key(|e| e.start);
    elements
}

/// First `tag` element in document order.
pub fn first_element(lower: &str, tag: &str) -> Option<Element> {
    find_elements(lower, tag).into_iter().next()
}

/// Opening tags named `tag`, e.g. every `<meta ...>`.
pub fn open_tags<'a>(html: &'a str, lower: &str, tag: &str) -> Vec<&'a str> {
    open_positions(lower, tag)
        .into_iter()
        .filter_map(|start| {
            lower[start..]
                .find('>')
                .map(|gt| &html[start..start + gt + 1])
        })
        .collect()
}

/// Inner HTML of each `<p>`, ending at `</p>` or at the next `<p>`.
pub fn paragraphs<'a>(html: &'a str, lower: &str) -> Vec<&'a str> {
    let opens = open_positions(lower, "p");
    opens
        .iter()
        .enumerate()
        .filter_map(|(i, &start)| {
            let content_start = start + lower[start..].find('>')? + 1;
            let next_open = opens.get(i + 1).copied().unwrap_or(lower.len());
            let close = lower[content_start..]
                .find("</p")
                .map(|r| content_start + r)
                .unwrap_or(lower.len());
            let end = close.min(next_open).max(content_start);
            Some(&html[content_start..end])
        })
        .collect()
}

/// Attribute pairs of an opening tag, names lowercased and values entity-decoded.
///
/// Handles double-quoted, single-quoted, unquoted and valueless attributes in
/// any order.
pub fn attributes(open_tag: &str) -> Vec<(String, String)> {
    let bytes = open_tag.as_bytes();
    let mut attrs = Vec::new();

    // Skip "<name"
    let mut i = 1;
    while i < bytes.len() && !bytes[i].is_ascii_whitespace() && bytes[i] != b'>' && bytes[i] != b'/'
    {
        i += 1;
    }

    loop {
        while i < bytes.len() && (bytes[i].is_ascii_whitespace() || bytes[i] == b'/') {
            i += 1;
        }
        if i >= bytes.len() || bytes[i] == b'>' {
            break;
        }

        let name_start = i;
        while i < bytes.len()
            && !bytes[i].is_ascii_whitespace()
            && !matches!(bytes[i], b'=' | b'>' | b'/')
        {
            i += 1;
        }
        let name = open_tag[name_start..i].to_ascii_lowercase();

        while i < bytes.len() && bytes[i].is_ascii_whitespace() {
            i += 1;
        }
        if i >= bytes.len() || bytes[i] != b'=' {
            if !name.is_empty() {
                attrs.push((name, String::new()));
            }
            continue;
        }
        i += 1;
        while i < bytes.len() && bytes[i].is_ascii_whitespace() {
            i += 1;
        }

        let value = match bytes.get(i) {
            Some(&(q @ (b'"' | b'\''))) => {
                let value_start = i + 1;
                let value_end = open_tag[value_start..]
                    .find(q as char)
                    .map(|r| value_start + r)
                    .unwrap_or(bytes.len());
                i = (value_end + 1).min(bytes.len());
                &open_tag[value_start..value_end]
            }
            _ => {
                let value_start = i;
                while i < bytes.len() && !bytes[i].is_ascii_whitespace() && bytes[i] != b'>' {
                    i += 1;
                }
                &open_tag[value_start..i]
            }
        };
        if !name.is_empty() {
            attrs.push((name, decode_entities(value).trim().to_string()));
        }
    }

    attrs
}

/// Value of attribute `name` in an opening tag.
pub fn attribute(open_tag: &str, name: &str) -> Option<String> {
    attributes(open_tag)
        .into_iter()
        .find(|(k, _)| k == name)
        .map(|(_, v)| v)
}

/// Remove `<tag>...</tag>` blocks for each of `tags`.
///
/// An unterminated block drops the rest of the document: an unclosed
/// `<script>` swallows everything after it in a browser too.
pub fn remove_blocks(html: &str, tags: &[&str]) -> String {
    let lower = html.to_ascii_lowercase();
    let mut ranges = Vec::new();
    for tag in tags {
        block_ranges(&lower, tag, &mut ranges);
    }
    ranges.sort_unstable();

    let mut out = String::with_capacity(html.len());
    let mut cursor = 0;
    for (start, end) in ranges {
        // Overlap: a block of one tag inside a block of another
        if end <= cursor {
            continue;
        }
        if start >= cursor {
            out.push_str(&html[cursor..start]);
            out.push(' ');
        }
        cursor = end;
    }
    out.push_str(&html[cursor..]);
    out
}

/// Byte ranges of each `tag` block in `lower`, from `<tag` through the `>` of
/// the first `</tag` after it. An unterminated block runs to the end.
fn block_ranges(lower: &str, tag: &str, ranges: &mut Vec<(usize, usize)>) {
    let closes = close_positions(lower, tag);
    let mut next_close = 0;
    let mut cursor = 0;
    for start in open_positions(lower, tag) {
        if start < cursor {
            continue;
        }
        while closes.get(next_close).is_some_and(|&c| c < start) {
            next_close += 1;
        }
        let end = closes
            .get(next_close)
            .and_then(|&c| lower[c..].find('>').map(|gt| c + gt + 1))
            .unwrap_or(lower.len());
        ranges.push((start, end));
        if end == lower.len() {
            break;
        }
        cursor = end;
    }
}

/// Convert an HTML fragment to plain text.
///
/// Block-level tags become line breaks, `<li>` becomes a `- ` bullet line,
/// comments are dropped, entities are decoded and whitespace is normalized
/// per line. A `<` that does not start a tag is kept as text.
pub fn strip_tags(html: &str) -> String {
    let mut raw = String::with_capacity(html.len());
    let mut rest = html;

    while let Some(lt) = rest.find('<') {
        raw.push_str(&rest[..lt]);
        let tail = &rest[lt..];

        if tail.starts_with("<!--") {
            rest = match tail.find("-->") {
                Some(end) => &tail[end + 3..],
                None => "",
            };
            continue;
        }

        let starts_tag = tail[1..]
            .chars()
            .next()
            .is_some_and(|c| c.is_ascii_alphabetic() || matches!(c, '/' | '!' | '?'));
        if !starts_tag {
            raw.push('<');
            rest = &tail[1..];
            continue;
        }

        let Some(gt) = tail.find('>') else {
            rest = "";
            break;
        };
        let name: String = tail[1..gt]
            .trim_start_matches('/')
            .chars()
            .take_while(|c| c.is_ascii_alphanumeric())
            .map(|c| c.to_ascii_lowercase())
            .collect();
        if name == "li" && !tail.starts_with("</") {
            raw.push_str("\n- ");
        } else if BLOCK_TAGS.contains(&name.as_str()) {
            raw.push('\n');
        }
        rest = &tail[gt + 1..];
    }
    raw.push_str(rest);

    normalize_lines(&decode_entities(&raw))
}

/// Number of non-whitespace characters in `text`.
pub fn visible_chars(text: &str) -> usize {
    text.chars().filter(|c| !c.is_whitespace()).count()
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_find_elements_nested() {
        let html = "<div id=a><div id=b>inner</div>outer</div><divider></divider>";
        let lower = html.to_ascii_lowercase();
        let found = find_elements(&lower, "div");
        assert_eq!(found.len(), 2);
        assert_eq!(found[0].inner(html), "<div id=b>inner</div>outer");
        assert_eq!(found[1].inner(html), "inner");
    }

    #[test]
    fn test_find_elements_unclosed_runs_to_end() {
        let html = "<section>open forever";
        let lower = html.to_ascii_lowercase();
        let found = find_elements(&lower, "section");
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].inner(html), "open forever");
    }

    #[test]
    fn test_find_elements_case_insensitive() {
        let html = "<ARTICLE class=x>Body</Article>";
        let lower = html.to_ascii_lowercase();
        let el = first_element(&lower, "article").unwrap();
        assert_eq!(el.inner(html), "Body");
        assert_eq!(el.open_tag(html), "<ARTICLE class=x>");
    }

    #[test]
    fn test_attributes_mixed_quoting() {
        let tag = r#"<meta content='It&apos;s here' property="og:title" data-x=plain defer>"#;
        let attrs = attributes(tag);
        assert_eq!(
            attrs,
            vec![
                ("content".to_string(), "It's here".to_string()),
                ("property".to_string(), "og:title".to_string()),
                ("data-x".to_string(), "plain".to_string()),
                ("defer".to_string(), String::new()),
            ]
        );
        assert_eq!(attribute(r#"<link href="/a" />"#, "href").as_deref(), Some("/a"));
    }

    #[test]
    fn test_remove_blocks() {
        let html = "a<script>var x = '<p>';</script>b<STYLE>p{}</STYLE>c<script>never closed";
        assert_eq!(remove_blocks(html, &["script", "style"]), "a b c ");
    }

    #[test]
    fn test_remove_blocks_nested_and_repeated() {
        let html = "<p>x</p><noscript><style>a{}</style>y</noscript>z<script>1</script><scripts>kept";
        assert_eq!(
            remove_blocks(html, &["script", "style", "noscript"]),
            "<p>x</p> z <scripts>kept"
        );
        assert_eq!(remove_blocks("no blocks here", &["script"]), "no blocks here");
    }

    #[test]
    fn test_remove_blocks_many_blocks() {
        let html = "<p>keep</p><script>drop()</script>".repeat(5_000);
        let cleaned = remove_blocks(&html, &["script"]);
        assert_eq!(cleaned, "<p>keep</p> ".repeat(5_000));
    }

    #[test]
    fn test_strip_tags_structure() {
        let html = "<h2>Steps</h2><ol><li>Boil &amp; cool</li><li>Filter</li></ol><p>a < b</p>";
        assert_eq!(strip_tags(html), "Steps\n- Boil & cool\n- Filter\na < b");
    }

    #[test]
    fn test_strip_tags_drops_comments_and_unterminated() {
        assert_eq!(strip_tags("x<!-- hidden -->y<b"), "xy");
        assert_eq!(strip_tags("no tags"), "no tags");
    }

    #[test]
    fn test_paragraphs_unclosed() {
        let html = "<p>one<p>two</p><P>three";
        let lower = html.to_ascii_lowercase();
        assert_eq!(paragraphs(html, &lower), vec!["one", "two", "three"]);
    }
}
