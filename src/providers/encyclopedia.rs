use anyhow::Result;
use async_trait::async_trait;

/// One article found in the offline encyclopedia.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncyclopediaHit {
    pub title: String,
    pub url: String,
    pub snippet: String,
}

/// Read-only offline reference used as a fallback source.
#[async_trait]
pub trait Encyclopedia: Send + Sync {
    async fn search_articles(&self, query: &str, limit: usize) -> Result<Vec<EncyclopediaHit>>;
}

/// Encyclopedia with no articles, used when none is installed.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullEncyclopedia;

#[async_trait]
impl Encyclopedia for NullEncyclopedia {
    async fn search_articles(&self, _query: &str, _limit: usize) -> Result<Vec<EncyclopediaHit>> {
        Ok(Vec::new())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_null_encyclopedia_is_empty() {
        let hits = NullEncyclopedia.search_articles("anything", 5).await.unwrap();
        assert!(hits.is_empty());
    }
}
