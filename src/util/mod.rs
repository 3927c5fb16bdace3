//! Shared helpers for untrusted text and URLs.
//!
//! - **Text**: entity decoding, whitespace normalization, word/char caps,
//!   query keyword extraction
//! - **URLs**: SSRF-safe validation and domain extraction

mod text;
mod url_validator;

pub use text::{
    cap_words, collapse_whitespace, decode_entities, keywords, normalize_lines,
    strip_control_chars, tokenize, truncate_chars, ELLIPSIS,
};
pub use url_validator::{domain_of, validate_url, UrlValidationError};

/// Query length in chars that search considers; longer queries are clipped.
pub const MAX_QUERY_LENGTH: usize = 256;
