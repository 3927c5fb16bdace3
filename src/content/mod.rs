//! Page content extraction.
//!
//! [`ContentExtractor`] turns fetched HTML into an [`ExtractedContent`]:
//! metadata, readable main text, snippet, quotations, paywall and language
//! signals. The scanning helpers live in [`html`].

mod extractor;
pub mod html;
mod quotes;

pub use extractor::{ContentExtractor, ExtractedContent, ExtractorSettings, UNTITLED};
pub use quotes::{extract_quotes, Quote, MIN_QUOTE_CHARS};
