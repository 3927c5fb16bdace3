use anyhow::{Context, Result};
use clap::{CommandFactory, Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use almanac::config::Config;
use almanac::feed::{FeedCatalog, FeedConfig};
use almanac::online::OnlineAggregator;
use almanac::providers::HttpFetcher;
use almanac::search::{Answer, SearchEngine};
use almanac::storage::{DatabaseError, Vault};
use almanac::util::{domain_of, strip_control_chars, validate_url};

/// Get the config directory path (~/.config/almanac/)
fn get_config_dir() -> Result<PathBuf> {
    let home = std::env::var("HOME").context("HOME environment variable not set")?;
    Ok(PathBuf::from(home).join(".config").join("almanac"))
}

#[derive(Parser, Debug)]
#[command(
    name = "almanac",
    version,
    about = "Offline-first question answering over a local vault, RSS feeds and an encyclopedia"
)]
struct Args {
    /// Reset the vault (delete and recreate)
    #[arg(long, global = true)]
    reset_db: bool,

    /// Rebuild the search index (FTS5)
    #[arg(long, global = true)]
    rebuild_search: bool,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Ask a question
    Ask {
        /// Only use the vault and the encyclopedia
        #[arg(long)]
        offline: bool,

        #[arg(required = true)]
        query: Vec<String>,
    },
    /// Manage the feed catalog
    Feeds {
        #[command(subcommand)]
        action: FeedsAction,
    },
    /// Show vault statistics
    Stats,
    /// Check and compact the vault
    Maintain {
        /// Delete items retrieved more than this many days ago
        #[arg(long, value_name = "DAYS")]
        prune_days: Option<u32>,
    },
}

#[derive(Subcommand, Debug)]
enum FeedsAction {
    List,
    Add {
        url: String,
        #[arg(long)]
        name: Option<String>,
        #[arg(long, default_value = "")]
        category: String,
        /// Higher priorities are searched first
        #[arg(long, default_value_t = 0)]
        priority: i32,
    },
    Remove {
        url: String,
    },
    Enable {
        url: String,
    },
    Disable {
        url: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let args = Args::parse();

    let config_dir = get_config_dir()?;
    if !config_dir.exists() {
        std::fs::create_dir_all(&config_dir).context("Failed to create config directory")?;
        println!("Created config directory: {}", config_dir.display());
    }

    // SEC-007: user-only access to the config directory
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        match std::fs::metadata(&config_dir) {
            Ok(metadata) => {
                let mut perms = metadata.permissions();
                perms.set_mode(0o700);
                if let Err(e) = std::fs::set_permissions(&config_dir, perms) {
                    tracing::warn!(
                        path = %config_dir.display(),
                        error = %e,
                        "Failed to set config directory permissions to 0700"
                    );
                }
            }
            Err(e) => {
                tracing::warn!(
                    path = %config_dir.display(),
                    error = %e,
                    "Failed to read config directory metadata"
                );
            }
        }
    }

    let config = Config::load(&config_dir.join("config.toml")).context("Failed to load config")?;
    let catalog_path = config_dir.join("feeds.toml");
    let db_path = config_dir.join("vault.db");

    if args.reset_db && db_path.exists() {
        std::fs::remove_file(&db_path).context("Failed to delete vault")?;
        println!("Vault reset.");
    }

    // Catalog edits never need the vault
    if let Some(Command::Feeds { action }) = &args.command {
        return run_feeds(action, &catalog_path);
    }

    let db_path_str = db_path
        .to_str()
        .ok_or_else(|| anyhow::anyhow!("Invalid UTF-8 in vault path"))?;
    let vault = match Vault::open(db_path_str).await {
        Ok(vault) => vault,
        Err(DatabaseError::InstanceLocked) => {
            eprintln!(
                "Error: Another instance of almanac appears to be running. Please close it and try again."
            );
            std::process::exit(1);
        }
        Err(e) => {
            return Err(anyhow::anyhow!("Failed to open vault: {}", e));
        }
    };

    if args.rebuild_search {
        tracing::info!("Rebuilding search index...");
        let count = vault
            .rebuild_index()
            .await
            .context("Failed to rebuild search index")?;
        tracing::info!(items = count, "Search index rebuilt");
        println!("Search index rebuilt: {} items indexed", count);
    } else {
        check_index(&vault).await;
    }

    match args.command {
        Some(Command::Ask { offline, query }) => {
            run_ask(&config, vault.clone(), &catalog_path, offline, &query.join(" ")).await?
        }
        Some(Command::Stats) => run_stats(&vault, &catalog_path).await?,
        Some(Command::Maintain { prune_days }) => run_maintain(&config, &vault, prune_days).await?,
        Some(Command::Feeds { .. }) => {}
        None if args.rebuild_search || args.reset_db => {}
        None => {
            Args::command().print_help()?;
            println!();
        }
    }

    vault.close().await;
    Ok(())
}

async fn check_index(vault: &Vault) {
    match vault.check_index_consistency().await {
        Ok(report) if report.is_consistent => {
            tracing::debug!("FTS5 index is consistent");
        }
        Ok(report) => {
            tracing::warn!(
                items = report.items_count,
                fts = report.fts_count,
                orphaned = report.orphaned_fts_entries,
                missing = report.missing_fts_entries,
                "FTS index inconsistent, run with --rebuild-search"
            );
            eprintln!(
                "Warning: Search index is out of sync (missing: {}, orphaned: {}). Run with --rebuild-search to fix.",
                report.missing_fts_entries, report.orphaned_fts_entries
            );
        }
        Err(e) => {
            tracing::warn!(error = %e, "Failed to check FTS5 consistency");
        }
    }
}

// ============================================================================
// Commands
// ============================================================================

async fn run_ask(
    config: &Config,
    vault: Vault,
    catalog_path: &Path,
    offline: bool,
    query: &str,
) -> Result<()> {
    let catalog = FeedCatalog::load(catalog_path)?;

    let mut fetcher = HttpFetcher::new(&config.user_agent).context("Failed to create HTTP client")?;
    if let Some(probe) = &config.probe_url {
        fetcher = fetcher.with_probe_url(probe.clone());
    }

    let aggregator = OnlineAggregator::new(
        vault.clone(),
        Arc::new(fetcher),
        catalog,
        config.aggregator_settings(),
    )
    .with_extractor(almanac::content::ContentExtractor::new(config.extractor_settings()));

    let engine = SearchEngine::new(vault).with_aggregator(Arc::new(aggregator));
    engine.set_online_mode(!offline);

    let answer = engine.ask(query).await?;
    print_answer(&answer);
    Ok(())
}

fn print_answer(answer: &Answer) {
    println!("{}", clean_field(&answer.summary));
    for (i, step) in answer.steps.iter().enumerate() {
        println!("  {}. {}", i + 1, clean_field(step));
    }
    for quote in &answer.quotes {
        println!("  \"{}\"", clean_field(quote));
    }
    for warning in &answer.warnings {
        println!("Warning: {}", clean_field(warning));
    }

    if !answer.sources.is_empty() {
        println!();
        println!("Sources:");
        for (i, source) in answer.sources.iter().enumerate() {
            let date = source.published.map(format_date).unwrap_or_default();
            println!(
                "  [{}] {} ({}) {}",
                i + 1,
                clean_field(&source.title),
                clean_field(&source.domain),
                date
            );
            if !source.url.is_empty() {
                println!("      {}", clean_field(&source.url));
            }
        }
    }
    println!();
    println!("Confidence: {:.2}", answer.confidence);
}

fn format_date(epoch: i64) -> String {
    chrono::DateTime::from_timestamp(epoch, 0)
        .map(|d| d.format("%Y-%m-%d").to_string())
        .unwrap_or_default()
}

fn run_feeds(action: &FeedsAction, catalog_path: &Path) -> Result<()> {
    let mut catalog = FeedCatalog::load(catalog_path)?;

    match action {
        FeedsAction::List => {
            if catalog.is_empty() {
                println!("No feeds configured. Add one with: almanac feeds add <URL>");
            }
            for feed in catalog.feeds() {
                println!(
                    "{} {:>4}  {:<24} {:<12} {}",
                    if feed.enabled { "*" } else { " " },
                    feed.priority,
                    clean_field(&feed.name),
                    clean_field(&feed.category),
                    feed.url
                );
            }
            return Ok(());
        }
        FeedsAction::Add {
            url,
            name,
            category,
            priority,
        } => {
            validate_url(url).map_err(|e| anyhow::anyhow!("Invalid feed URL: {}", e))?;
            let name = name.clone().unwrap_or_else(|| domain_of(url));
            catalog.add(
                FeedConfig::new(name, url.as_str())
                    .with_category(category.as_str())
                    .with_priority(*priority),
            )?;
            println!("Added {}", url);
        }
        FeedsAction::Remove { url } => {
            if !catalog.remove(url) {
                anyhow::bail!("No feed with URL {}", url);
            }
            println!("Removed {}", url);
        }
        FeedsAction::Enable { url } | FeedsAction::Disable { url } => {
            let enabled = matches!(action, FeedsAction::Enable { .. });
            if !catalog.set_enabled(url, enabled) {
                anyhow::bail!("No feed with URL {}", url);
            }
            println!("{} {}", if enabled { "Enabled" } else { "Disabled" }, url);
        }
    }

    catalog.save(catalog_path)
}

fn clean_field(s: &str) -> String {
    strip_control_chars(s).into_owned()
}

async fn run_stats(vault: &Vault, catalog_path: &Path) -> Result<()> {
    let stats = vault.cache_stats().await?;
    let tags = vault.all_tags().await?;
    let catalog = FeedCatalog::load(catalog_path)?;
    let enabled = catalog.feeds().iter().filter(|f| f.enabled).count();

    println!("Items:    {}", stats.total_items);
    println!("Size:     {:.2} MB", stats.total_bytes as f64 / (1024.0 * 1024.0));
    if let (Some(oldest), Some(newest)) = (stats.oldest_retrieved, stats.newest_retrieved) {
        println!("Fetched:  {} to {}", format_date(oldest), format_date(newest));
    }
    println!("Tags:     {}", tags.len());
    println!("Feeds:    {} ({} enabled)", catalog.len(), enabled);
    Ok(())
}

async fn run_maintain(config: &Config, vault: &Vault, prune_days: Option<u32>) -> Result<()> {
    if let Some(days) = prune_days {
        let cutoff = chrono::Utc::now().timestamp() - i64::from(days) * 24 * 60 * 60;
        let removed = vault.prune_older_than(cutoff).await?;
        println!("Pruned {} items older than {} days", removed, days);
    }

    let budget = (config.cache_size_limit_mb.saturating_mul(1024 * 1024)).min(i64::MAX as u64) as i64;
    let older_than =
        chrono::Utc::now().timestamp() - i64::from(config.prune_age_days) * 24 * 60 * 60;
    let eviction = vault.evict_to_budget(budget, older_than).await?;
    if eviction.removed > 0 {
        println!("Evicted {} items to fit the cache budget", eviction.removed);
    }

    vault.optimize_index().await.context("Failed to optimize search index")?;
    vault.vacuum().await.context("Failed to vacuum vault")?;

    let report = vault.check_index_consistency().await?;
    println!(
        "Vault compacted. Index {}",
        if report.is_consistent {
            "consistent"
        } else {
            "inconsistent, run with --rebuild-search"
        }
    );
    Ok(())
}
