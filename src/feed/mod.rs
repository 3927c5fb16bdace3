//! Feed sources and feed documents.
//!
//! - [`catalog`] - the configured RSS/Atom sources, persisted as TOML
//! - [`parser`] - tag-scoped scanning of RSS and Atom documents into [`RawFeed`]

mod catalog;
mod parser;

pub use catalog::{CatalogError, FeedCatalog, FeedConfig};
pub use parser::{parse, parse_date, FeedFormat, ParseError, RawFeed, RawFeedItem};
