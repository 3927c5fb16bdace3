use chrono::{DateTime, NaiveDate, NaiveDateTime};
use thiserror::Error;

use crate::content::html::{attribute, strip_tags};
use crate::util::collapse_whitespace;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ParseError {
    /// Neither an RSS nor an Atom root marker was found.
    #[error("Document is neither RSS nor Atom")]
    UnknownFormat,
    /// The document has a feed root but no `<item>`/`<entry>` elements.
    #[error("Feed contains no items")]
    NoItems,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FeedFormat {
    Rss,
    Atom,
}

/// A parsed feed. Items keep document order.
#[derive(Debug, Clone, PartialEq)]
pub struct RawFeed {
    pub format: FeedFormat,
    pub title: String,
    pub link: String,
    pub description: String,
    pub items: Vec<RawFeedItem>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct RawFeedItem {
    pub title: String,
    pub link: String,
    pub description: String,
    pub author: String,
    /// Epoch seconds; `None` when absent or not a date we understand.
    pub published: Option<i64>,
    pub guid: String,
}

/// Parse an RSS 2.0 / RSS 1.0 (RDF) or Atom document.
///
/// This is tag-scoped substring scanning, not a validating XML parser. It
/// tolerates broken markup and never panics on hostile input; fields that
/// cannot be found come back empty.
pub fn parse(xml: &str) -> Result<RawFeed, ParseError> {
    let feed = if xml.contains("<rss") || xml.contains("<rdf:RDF") {
        parse_rss(xml)
    } else if xml.contains("<feed") {
        parse_atom(xml)
    } else {
        return Err(ParseError::UnknownFormat);
    };

    if feed.items.is_empty() {
        return Err(ParseError::NoItems);
    }
    Ok(feed)
}

fn parse_rss(xml: &str) -> RawFeed {
    let items: Vec<RawFeedItem> = elements(xml, "item")
        .into_iter()
        .map(|el| {
            let item = el.inner;
            let link = text_of(item, "link");
            let guid = text_of(item, "guid");
            RawFeedItem {
                title: text_of(item, "title"),
                link: if link.is_empty() && guid.starts_with("http") {
                    guid.clone()
                } else {
                    link.clone()
                },
                description: first_non_empty(item, &["description", "content:encoded"]),
                author: first_non_empty(item, &["author", "dc:creator"]),
                published: parse_date(&first_non_empty(item, &["pubDate", "dc:date"])),
                guid: if guid.is_empty() { link } else { guid },
            }
        })
        .collect();

    let header = channel_header(xml, "item");
    RawFeed {
        format: FeedFormat::Rss,
        title: text_of(header, "title"),
        link: text_of(header, "link"),
        description: text_of(header, "description"),
        items,
    }
}

fn parse_atom(xml: &str) -> RawFeed {
    let items: Vec<RawFeedItem> = elements(xml, "entry")
        .into_iter()
        .map(|el| {
            let entry = el.inner;
            let author = find(entry, "author", 0)
                .map(|a| text_of(a.inner, "name"))
                .unwrap_or_default();
            let link = atom_link(entry);
            let id = text_of(entry, "id");
            RawFeedItem {
                title: text_of(entry, "title"),
                guid: if id.is_empty() { link.clone() } else { id },
                link,
                description: first_non_empty(entry, &["summary", "content"]),
                author,
                published: parse_date(&first_non_empty(entry, &["published", "updated"])),
            }
        })
        .collect();

    let header = channel_header(xml, "entry");
    RawFeed {
        format: FeedFormat::Atom,
        title: text_of(header, "title"),
        link: atom_link(header),
        description: text_of(header, "subtitle"),
        items,
    }
}

/// The part of the document before the first item, where channel metadata lives.
fn channel_header<'a>(xml: &'a str, item_tag: &str) -> &'a str {
    let end = find(xml, item_tag, 0).map(|el| el.start).unwrap_or(xml.len());
    &xml[..end]
}

/// Atom links live in the `href` attribute. Prefer `rel="alternate"` or a
/// link with no `rel`, else take the first link with an href.
fn atom_link(scope: &str) -> String {
    let mut fallback = None;
    let mut pos = 0;
    while let Some(open) = find_open(scope, "link", pos) {
        pos = open.end;
        let Some(href) = attribute(open.tag, "href").filter(|h| !h.is_empty()) else {
            continue;
        };
        match attribute(open.tag, "rel").as_deref() {
            None | Some("alternate") => return href,
            Some(_) => {
                fallback.get_or_insert(href);
            }
        }
    }
    fallback.unwrap_or_default()
}

// ============================================================================
// Tag Scanning
// ============================================================================

struct OpenTag<'a> {
    start: usize,
    end: usize,
    tag: &'a str,
}

struct Found<'a> {
    start: usize,
    end: usize,
    inner: &'a str,
}

/// Next `<tag` at or after `from` whose name is not merely a prefix of a longer one.
fn find_open<'a>(doc: &'a str, tag: &str, from: usize) -> Option<OpenTag<'a>> {
    let needle = format!("<{tag}");
    let mut pos = from;
    loop {
        let start = pos + doc.get(pos..)?.find(&needle)?;
        let after = start + needle.len();
        match doc.as_bytes().get(after) {
            Some(b'>' | b'/') => {}
            Some(b) if b.is_ascii_whitespace() => {}
            Some(_) => {
                pos = after;
                continue;
            }
            None => return None,
        }
        let end = after + doc[after..].find('>')? + 1;
        return Some(OpenTag {
            start,
            end,
            tag: &doc[start..end],
        });
    }
}

/// Next `<tag ...>...</tag>` at or after `from`. Self-closing tags have empty content.
fn find<'a>(doc: &'a str, tag: &str, from: usize) -> Option<Found<'a>> {
    let open = find_open(doc, tag, from)?;
    if open.tag.ends_with("/>") {
        return Some(Found {
            start: open.start,
            end: open.end,
            inner: "",
        });
    }
    let closing = format!("</{tag}>");
    let close = open.end + doc[open.end..].find(&closing)?;
    Some(Found {
        start: open.start,
        end: close + closing.len(),
        inner: &doc[open.end..close],
    })
}

/// Every non-overlapping `tag` element, in document order.
fn elements<'a>(doc: &'a str, tag: &str) -> Vec<Found<'a>> {
    let mut found = Vec::new();
    let mut pos = 0;
    while let Some(el) = find(doc, tag, pos) {
        pos = el.end;
        found.push(el);
    }
    found
}

/// Cleaned text of the first `tag` element in `scope`, or empty.
fn text_of(scope: &str, tag: &str) -> String {
    find(scope, tag, 0)
        .map(|el| clean_text(el.inner))
        .unwrap_or_default()
}

fn first_non_empty(scope: &str, tags: &[&str]) -> String {
    tags.iter()
        .map(|tag| text_of(scope, tag))
        .find(|text| !text.is_empty())
        .unwrap_or_default()
}

/// Unwrap CDATA, decode entities, drop markup and collapse whitespace.
///
/// Entity decoding happens before tag stripping so escaped HTML in a
/// description (`&lt;p&gt;`) is stripped too.
fn clean_text(raw: &str) -> String {
    let unwrapped = raw.replace("<![CDATA[", "").replace("]]>", "");
    let decoded = crate::util::decode_entities(&unwrapped);
    collapse_whitespace(&strip_tags(&decoded))
}

// ============================================================================
// Dates
// ============================================================================

/// Parse an RFC 2822 (RSS) or RFC 3339 / ISO 8601 (Atom, Dublin Core) date.
///
/// Anything else is `None`. Never substitutes the current time.
pub fn parse_date(value: &str) -> Option<i64> {
    let value = value.trim();
    if value.is_empty() {
        return None;
    }

    if let Ok(dt) = DateTime::parse_from_rfc2822(value) {
        return Some(dt.timestamp());
    }
    if let Ok(dt) = DateTime::parse_from_rfc3339(value) {
        return Some(dt.timestamp());
    }
    for format in ["%Y-%m-%dT%H:%M:%S", "%Y-%m-%d %H:%M:%S", "%Y-%m-%dT%H:%M:%S%.f"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(value, format) {
            return Some(naive.and_utc().timestamp());
        }
    }
    NaiveDate::parse_from_str(value, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|naive| naive.and_utc().timestamp())
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    const RSS: &str = r#"<?xml version="1.0"?>
<rss version="2.0" xmlns:dc="http://purl.org/dc/elements/1.1/"><channel>
  <title>Field Notes</title>
  <link>https://notes.example.com/</link>
  <description>Outdoor skills</description>
  <item>
    <title><![CDATA[Water purification basics]]></title>
    <link>https://notes.example.com/water</link>
    <description>&lt;p&gt;Boil water for &lt;b&gt;one&lt;/b&gt; minute.&lt;/p&gt;</description>
    <dc:creator>Jane Doe</dc:creator>
    <pubDate>Mon, 01 Jan 2024 12:00:00 GMT</pubDate>
    <guid>water-1</guid>
  </item>
  <item>
    <title>Knots &amp; lashings</title>
    <guid>https://notes.example.com/knots</guid>
    <pubDate>not a date</pubDate>
  </item>
</channel></rss>"#;

    const ATOM: &str = r#"<?xml version="1.0" encoding="utf-8"?>
<feed xmlns="http://www.w3.org/2005/Atom">
  <title>Atom Notes</title>
  <subtitle>Short field notes</subtitle>
  <link rel="self" href="https://atom.example.com/feed.xml"/>
  <link href="https://atom.example.com/"/>
  <entry>
    <title>Fire starting</title>
    <link rel="edit" href="https://atom.example.com/edit/1"/>
    <link rel="alternate" type="text/html" href="https://atom.example.com/fire"/>
    <id>urn:uuid:1</id>
    <updated>2024-02-03T04:05:06Z</updated>
    <content type="html">Use &lt;em&gt;dry&lt;/em&gt; tinder.</content>
    <author><name>Sam</name></author>
  </entry>
</feed>"#;

    #[test]
    fn test_parse_rss_items_and_channel() {
        let feed = parse(RSS).unwrap();
        assert_eq!(feed.format, FeedFormat::Rss);
        assert_eq!(feed.title, "Field Notes");
        assert_eq!(feed.link, "https://notes.example.com/");
        assert_eq!(feed.description, "Outdoor skills");
        assert_eq!(feed.items.len(), 2);

        let first = &feed.items[0];
        assert_eq!(first.title, "Water purification basics");
        assert_eq!(first.link, "https://notes.example.com/water");
        assert_eq!(first.description, "Boil water for one minute.");
        assert_eq!(first.author, "Jane Doe");
        assert_eq!(first.published, Some(1_704_110_400));
        assert_eq!(first.guid, "water-1");
    }

    #[test]
    fn test_parse_rss_link_falls_back_to_permalink_guid() {
        let feed = parse(RSS).unwrap();
        let second = &feed.items[1];
        assert_eq!(second.title, "Knots & lashings");
        assert_eq!(second.link, "https://notes.example.com/knots");
        assert_eq!(second.published, None);
    }

    #[test]
    fn test_parse_atom() {
        let feed = parse(ATOM).unwrap();
        assert_eq!(feed.format, FeedFormat::Atom);
        assert_eq!(feed.title, "Atom Notes");
        assert_eq!(feed.description, "Short field notes");
        assert_eq!(feed.link, "https://atom.example.com/");

        let entry = &feed.items[0];
        assert_eq!(entry.title, "Fire starting");
        assert_eq!(entry.link, "https://atom.example.com/fire");
        assert_eq!(entry.description, "Use dry tinder.");
        assert_eq!(entry.author, "Sam");
        assert_eq!(entry.guid, "urn:uuid:1");
        assert_eq!(entry.published, Some(1_706_933_106));
    }

    #[test]
    fn test_parse_preserves_document_order() {
        let xml = "<rss><channel><item><title>a</title></item><item><title>b</title></item>\
                   <item><title>c</title></item></channel></rss>";
        let titles: Vec<_> = parse(xml)
            .unwrap()
            .items
            .into_iter()
            .map(|i| i.title)
            .collect();
        assert_eq!(titles, vec!["a", "b", "c"]);
    }

    #[test]
    fn test_parse_failures() {
        assert_eq!(parse("<html><body>hi</body></html>"), Err(ParseError::UnknownFormat));
        assert_eq!(
            parse("<rss><channel><title>Empty</title></channel></rss>"),
            Err(ParseError::NoItems)
        );
        assert_eq!(parse(""), Err(ParseError::UnknownFormat));
    }

    #[test]
    fn test_parse_truncated_document_does_not_panic() {
        // The first item is complete, the second is cut off mid-element.
        let truncated = &RSS[..RSS.find("<pubDate>not").unwrap()];
        let feed = parse(truncated).unwrap();
        assert_eq!(feed.items.len(), 1);

        assert_eq!(parse("<rss><item><title>never closed"), Err(ParseError::NoItems));
    }

    #[test]
    fn test_tag_prefix_not_confused() {
        let xml = "<rss><item><titles>wrong</titles><title>right</title></item></rss>";
        assert_eq!(parse(xml).unwrap().items[0].title, "right");
    }

    #[test]
    fn test_parse_date_formats() {
        assert_eq!(parse_date("Mon, 01 Jan 2024 12:00:00 GMT"), Some(1_704_110_400));
        assert_eq!(parse_date("Mon, 01 Jan 2024 12:00:00 +0100"), Some(1_704_106_800));
        assert_eq!(parse_date("2024-01-01T12:00:00Z"), Some(1_704_110_400));
        assert_eq!(parse_date("2024-01-01T12:00:00.250+00:00"), Some(1_704_110_400));
        assert_eq!(parse_date("2024-01-01T12:00:00"), Some(1_704_110_400));
        assert_eq!(parse_date("2024-01-01"), Some(1_704_067_200));
    }

    #[test]
    fn test_parse_date_unknown_is_none() {
        assert_eq!(parse_date(""), None);
        assert_eq!(parse_date("yesterday"), None);
        assert_eq!(parse_date("32/13/2024"), None);
    }
}
