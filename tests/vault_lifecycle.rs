//! Integration tests for the vault lifecycle: upsert, search, delete, eviction.
//!
//! Each test creates its own in-memory SQLite database for isolation and
//! checks that the full-text index tracks the row store after every step.

use almanac::feed::{FeedCatalog, FeedConfig};
use almanac::online::item_id;
use almanac::storage::{Vault, VaultItem};
use pretty_assertions::assert_eq;

async fn test_vault() -> Vault {
    Vault::open(":memory:").await.unwrap()
}

fn item(url: &str, title: &str, clean: &str, retrieved_at: i64) -> VaultItem {
    VaultItem {
        id: item_id(url, title, None),
        title: title.to_string(),
        url: url.to_string(),
        source_domain: "example.com".to_string(),
        author: None,
        published_at: None,
        retrieved_at,
        topic_tags: vec!["outdoors".to_string()],
        text_snippet: clean.chars().take(40).collect(),
        text_clean: clean.to_string(),
        quotes: Vec::new(),
        language: "en".to_string(),
        content_type: "article".to_string(),
        license_note: None,
    }
}

async fn assert_index_consistent(vault: &Vault) {
    let report = vault.check_index_consistency().await.unwrap();
    assert!(report.is_consistent, "index out of sync: {report:?}");
}

#[tokio::test]
async fn test_upsert_is_idempotent_and_index_follows() {
    let vault = test_vault().await;
    let mut doc = item("https://example.com/fire", "Fire starting", "Use dry tinder and kindling.", 100);

    vault.insert(&doc).await.unwrap();
    vault.insert(&doc).await.unwrap();
    assert_eq!(vault.total_items().await.unwrap(), 1);

    doc.text_clean = "Ferro rods work even when wet.".to_string();
    doc.text_snippet = doc.text_clean.clone();
    doc.retrieved_at = 200;
    vault.insert(&doc).await.unwrap();
    assert_eq!(vault.total_items().await.unwrap(), 1);
    assert_index_consistent(&vault).await;

    let fresh = vault.search_full_text("ferro rods", 10).await.unwrap();
    assert_eq!(fresh.len(), 1);
    assert_eq!(fresh[0].item.id, doc.id);

    let stale = vault.search_full_text("kindling", 10).await.unwrap();
    assert!(stale.is_empty());
}

#[tokio::test]
async fn test_retrieved_at_never_decreases() {
    let vault = test_vault().await;
    let mut doc = item("https://example.com/knots", "Knots", "The bowline holds.", 500);
    vault.insert(&doc).await.unwrap();

    doc.retrieved_at = 100;
    vault.insert(&doc).await.unwrap();

    let stored = vault.get_by_id(&doc.id).await.unwrap().unwrap();
    assert_eq!(stored.retrieved_at, 500);
}

#[tokio::test]
async fn test_delete_keeps_index_consistent() {
    let vault = test_vault().await;
    let a = item("https://example.com/a", "Shelter", "Build a lean-to shelter.", 1);
    let b = item("https://example.com/b", "Water", "Filter then boil water.", 2);
    vault.insert(&a).await.unwrap();
    vault.insert(&b).await.unwrap();

    assert!(vault.delete(&a.id).await.unwrap());
    assert!(!vault.delete(&a.id).await.unwrap());
    assert_index_consistent(&vault).await;

    assert!(vault.search_full_text("shelter", 10).await.unwrap().is_empty());
    assert_eq!(vault.search_full_text("water", 10).await.unwrap().len(), 1);
}

#[tokio::test]
async fn test_eviction_removes_oldest_first() {
    let vault = test_vault().await;
    let body = "x".repeat(1000);
    for (n, retrieved_at) in [(1, 300), (2, 100), (3, 200), (4, 400)] {
        vault
            .insert(&item(&format!("https://example.com/{n}"), &format!("Doc {n}"), &body, retrieved_at))
            .await
            .unwrap();
    }

    let before = vault.cache_stats().await.unwrap();
    let per_item = before.total_bytes / 4;
    let budget = before.total_bytes - per_item;

    let report = vault.evict_to_budget(budget, i64::MAX).await.unwrap();
    assert_eq!(report.removed, 1);
    assert!(report.bytes_after <= budget);

    let remaining: Vec<i64> = {
        let mut v = Vec::new();
        for n in 1..=4 {
            let id = item_id(&format!("https://example.com/{n}"), &format!("Doc {n}"), None);
            if let Some(found) = vault.get_by_id(&id).await.unwrap() {
                v.push(found.retrieved_at);
            }
        }
        v
    };
    assert_eq!(remaining, vec![300, 200, 400]);
    assert_index_consistent(&vault).await;

    let after = vault.cache_stats().await.unwrap();
    assert_eq!(after.oldest_retrieved, Some(200));
    assert_eq!(after.newest_retrieved, Some(400));
}

#[tokio::test]
async fn test_maintenance_keeps_data() {
    let vault = test_vault().await;
    vault
        .insert(&item("https://example.com/m", "Maps", "Read contour lines.", 1))
        .await
        .unwrap();

    vault.optimize_index().await.unwrap();
    vault.vacuum().await.unwrap();
    vault.optimize_index().await.unwrap();

    assert_eq!(vault.total_items().await.unwrap(), 1);
    assert_eq!(vault.all_tags().await.unwrap(), vec!["outdoors".to_string()]);
    assert_eq!(vault.search_full_text("contour", 5).await.unwrap().len(), 1);
    assert_index_consistent(&vault).await;
}

#[test]
fn test_catalog_save_then_load() {
    let dir = std::env::temp_dir().join("almanac_catalog_lifecycle");
    std::fs::create_dir_all(&dir).unwrap();
    let path = dir.join("feeds.toml");

    let mut catalog = FeedCatalog::new();
    catalog
        .add(FeedConfig::new("Weather", "https://weather.example.com/rss").with_priority(5))
        .unwrap();
    catalog
        .add(FeedConfig::new("Outdoors", "https://outdoors.example.com/atom").with_category("survival"))
        .unwrap();
    catalog.set_enabled("https://weather.example.com/rss", false);

    catalog.save(&path).unwrap();
    let loaded = FeedCatalog::load(&path).unwrap();
    assert_eq!(loaded, catalog);

    std::fs::remove_dir_all(&dir).ok();
}
