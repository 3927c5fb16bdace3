/// Quotes shorter than this many characters are treated as scare quotes or titles.
pub const MIN_QUOTE_CHARS: usize = 20;

/// A quotation found in plain text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Quote {
    /// Text between the quote marks, trimmed.
    pub text: String,
    /// Up to N words either side of the quotation, with the quotation itself.
    pub context: String,
    /// Character offset of the opening quote mark.
    pub position: usize,
}

fn closing_mark(open: char) -> Option<char> {
    match open {
        '"' => Some('"'),
        '\u{201c}' => Some('\u{201d}'),
        _ => None,
    }
}

/// Find straight (`"..."`) and curly (`“...”`) quotations in `text`.
///
/// Only quotations of [`MIN_QUOTE_CHARS`]..=`max_len` characters are kept.
/// Pairs never overlap: scanning resumes after each closing mark, and an
/// opening mark with no partner ends the scan for that mark.
pub fn extract_quotes(text: &str, max_len: usize, context_words: usize) -> Vec<Quote> {
    let mut quotes = Vec::new();
    let mut chars = text.char_indices().enumerate();

    while let Some((char_pos, (open_at, c))) = chars.next() {
        let Some(close) = closing_mark(c) else {
            continue;
        };
        let body_start = open_at + c.len_utf8();
        let Some(rel) = text[body_start..].find(close) else {
            continue;
        };
        let body_end = body_start + rel;
        let after = body_end + close.len_utf8();

        // Skip the iterator past the closing mark.
        let consumed = text[open_at..after].chars().count() - 1;
        for _ in 0..consumed {
            chars.next();
        }

        let body = text[body_start..body_end].trim();
        let len = body.chars().count();
        if len < MIN_QUOTE_CHARS || len > max_len {
            continue;
        }

        quotes.push(Quote {
            text: body.to_string(),
            context: context_around(text, open_at, after, context_words),
            position: char_pos,
        });
    }

    quotes
}

fn context_around(text: &str, start: usize, end: usize, words: usize) -> String {
    let mut before: Vec<&str> = text[..start].split_whitespace().rev().take(words).collect();
    before.reverse();
    let after = text[end..].split_whitespace().take(words);

    before
        .into_iter()
        .chain(std::iter::once(&text[start..end]))
        .chain(after)
        .collect::<Vec<_>>()
        .join(" ")
}
