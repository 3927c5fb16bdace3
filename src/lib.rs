//! almanac: offline-first question answering over a local full-text vault.
//!
//! Questions are answered from the vault, refreshed from RSS/Atom feeds when
//! online, with an offline encyclopedia as the fallback source.

pub mod config;
pub mod content;
pub mod feed;
pub mod online;
pub mod providers;
pub mod search;
pub mod storage;
pub mod util;
