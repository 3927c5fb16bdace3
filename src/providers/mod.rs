//! External collaborators the engine talks to through traits.
//!
//! - [`PageFetcher`]: network fetches, with [`HttpFetcher`] over reqwest
//! - [`Encyclopedia`]: offline fallback articles, [`NullEncyclopedia`] when absent
//! - [`TextGenerator`]: optional streaming answer generation

mod encyclopedia;
mod fetch;
mod generator;

pub use encyclopedia::{Encyclopedia, EncyclopediaHit, NullEncyclopedia};
pub use fetch::{FetchError, FetchResponse, HttpFetcher, PageFetcher, MAX_PAGE_SIZE};
pub use generator::TextGenerator;
