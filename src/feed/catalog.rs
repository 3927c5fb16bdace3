use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use thiserror::Error;

/// Catalog files larger than this are refused (1 MB).
const MAX_CATALOG_SIZE: u64 = 1_048_576;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum CatalogError {
    #[error("Feed already in catalog: {0}")]
    DuplicateUrl(String),
}

/// One configured ingestion source.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeedConfig {
    pub name: String,
    pub url: String,
    #[serde(default)]
    pub category: String,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    /// Higher priorities are fetched first.
    #[serde(default)]
    pub priority: i32,
}

fn default_enabled() -> bool {
    true
}

impl FeedConfig {
    pub fn new(name: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            url: url.into(),
            category: String::new(),
            enabled: true,
            priority: 0,
        }
    }

    pub fn with_category(mut self, category: impl Into<String>) -> Self {
        self.category = category.into();
        self
    }

    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct CatalogFile {
    #[serde(default)]
    feeds: Vec<FeedConfig>,
}

/// The set of configured feeds. Urls are unique.
///
/// Pure data: the only I/O is the explicit [`FeedCatalog::load`] and
/// [`FeedCatalog::save`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FeedCatalog {
    feeds: Vec<FeedConfig>,
}

impl FeedCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, feed: FeedConfig) -> Result<(), CatalogError> {
        if self.get(&feed.url).is_some() {
            return Err(CatalogError::DuplicateUrl(feed.url));
        }
        self.feeds.push(feed);
        Ok(())
    }

    /// Returns `false` when no feed has this url.
    pub fn remove(&mut self, url: &str) -> bool {
        let before = self.feeds.len();
        self.feeds.retain(|f| f.url != url);
        self.feeds.len() != before
    }

    /// Returns `false` when no feed has this url.
    pub fn set_enabled(&mut self, url: &str, enabled: bool) -> bool {
        match self.feeds.iter_mut().find(|f| f.url == url) {
            Some(feed) => {
                feed.enabled = enabled;
                true
            }
            None => false,
        }
    }

    pub fn get(&self, url: &str) -> Option<&FeedConfig> {
        self.feeds.iter().find(|f| f.url == url)
    }

    pub fn feeds(&self) -> &[FeedConfig] {
        &self.feeds
    }

    pub fn len(&self) -> usize {
        self.feeds.len()
    }

    pub fn is_empty(&self) -> bool {
        self.feeds.is_empty()
    }

    pub fn by_category(&self, category: &str) -> Vec<&FeedConfig> {
        self.feeds
            .iter()
            .filter(|f| f.category.eq_ignore_ascii_case(category))
            .collect()
    }

    /// Enabled feeds, highest priority first. Equal priorities keep catalog order.
    pub fn enabled_by_priority(&self) -> Vec<FeedConfig> {
        let mut enabled: Vec<FeedConfig> =
            self.feeds.iter().filter(|f| f.enabled).cloned().collect();
        enabled.sort_by(|a, b| b.priority.cmp(&a.priority));
        enabled
    }

    /// Load a catalog from a TOML file with a `[[feeds]]` array.
    ///
    /// A missing file is an empty catalog. Entries repeating an earlier url
    /// are dropped with a warning.
    pub fn load(path: &Path) -> Result<Self> {
        match std::fs::metadata(path) {
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!(path = %path.display(), "No feed catalog found, starting empty");
                return Ok(Self::default());
            }
            Err(e) => {
                return Err(e).with_context(|| format!("Failed to stat '{}'", path.display()))
            }
            Ok(meta) if meta.len() > MAX_CATALOG_SIZE => {
                anyhow::bail!(
                    "Feed catalog '{}' is {} bytes (max {})",
                    path.display(),
                    meta.len(),
                    MAX_CATALOG_SIZE
                );
            }
            Ok(_) => {}
        }

        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read feed catalog '{}'", path.display()))?;
        let file: CatalogFile = toml::from_str(&content)
            .with_context(|| format!("Invalid feed catalog '{}'", path.display()))?;

        let mut catalog = Self::default();
        for feed in file.feeds {
            if let Err(e) = catalog.add(feed) {
                tracing::warn!(path = %path.display(), error = %e, "Skipping duplicate catalog entry");
            }
        }
        tracing::info!(path = %path.display(), feeds = catalog.len(), "Loaded feed catalog");
        Ok(catalog)
    }

    /// Write the catalog atomically: temp file in the same directory, fsync, rename.
    pub fn save(&self, path: &Path) -> Result<()> {
        use std::io::Write;
        use std::time::{SystemTime, UNIX_EPOCH};

        let content = toml::to_string_pretty(&CatalogFile {
            feeds: self.feeds.clone(),
        })
        .context("Failed to serialize feed catalog")?;

        // SEC-009: unpredictable temp name, created with create_new
        let suffix = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_nanos())
            .unwrap_or(0);
        let temp_path = path.with_extension(format!("tmp.{suffix:016x}"));

        let write = || -> Result<()> {
            let mut file = std::fs::OpenOptions::new()
                .write(true)
                .create_new(true)
                .open(&temp_path)
                .with_context(|| format!("Failed to create '{}'", temp_path.display()))?;
            file.write_all(content.as_bytes())
                .with_context(|| format!("Failed to write '{}'", temp_path.display()))?;
            file.sync_all()
                .with_context(|| format!("Failed to sync '{}'", temp_path.display()))?;
            std::fs::rename(&temp_path, path).with_context(|| {
                format!(
                    "Failed to rename '{}' to '{}'",
                    temp_path.display(),
                    path.display()
                )
            })
        };

        write().inspect_err(|_| {
            let _ = std::fs::remove_file(&temp_path);
        })
    }
}
