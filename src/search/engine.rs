use anyhow::Result;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use super::answer::{
    add_staleness_warning, append_encyclopedia_sources, build_combined_answer,
    build_encyclopedia_answer, build_generated_answer, build_intent_answer, Answer,
    SUPPLEMENT_THRESHOLD,
};
use super::intent::{analyze_query, Intent, QueryAnalysis};
use super::prompt::{build_context, build_prompt, DEFAULT_CONTEXT_WORDS, MAX_ANSWER_TOKENS};
use crate::online::OnlineAggregator;
use crate::providers::{Encyclopedia, EncyclopediaHit, NullEncyclopedia, TextGenerator};
use crate::storage::{SearchResult, Vault};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineSettings {
    /// Vault results fetched per question
    pub vault_limit: usize,
    pub encyclopedia_limit: usize,
    /// Word budget for generator context
    pub context_words: usize,
    pub max_answer_tokens: usize,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            vault_limit: 10,
            encyclopedia_limit: 5,
            context_words: DEFAULT_CONTEXT_WORDS,
            max_answer_tokens: MAX_ANSWER_TOKENS,
        }
    }
}

/// Answers questions from the vault, refreshing it from the web when online
/// and falling back to the encyclopedia.
///
/// All collaborators are injected. Without an aggregator the engine is
/// offline-only; without a generator answers come from templates.
pub struct SearchEngine {
    vault: Vault,
    aggregator: Option<Arc<OnlineAggregator>>,
    encyclopedia: Arc<dyn Encyclopedia>,
    generator: Option<Arc<dyn TextGenerator>>,
    settings: EngineSettings,
    online_mode: AtomicBool,
}

impl SearchEngine {
    pub fn new(vault: Vault) -> Self {
        Self {
            vault,
            aggregator: None,
            encyclopedia: Arc::new(NullEncyclopedia),
            generator: None,
            settings: EngineSettings::default(),
            online_mode: AtomicBool::new(true),
        }
    }

    pub fn with_aggregator(mut self, aggregator: Arc<OnlineAggregator>) -> Self {
        self.aggregator = Some(aggregator);
        self
    }

    pub fn with_encyclopedia(mut self, encyclopedia: Arc<dyn Encyclopedia>) -> Self {
        self.encyclopedia = encyclopedia;
        self
    }

    pub fn with_generator(mut self, generator: Arc<dyn TextGenerator>) -> Self {
        self.generator = Some(generator);
        self
    }

    pub fn with_settings(mut self, settings: EngineSettings) -> Self {
        self.settings = settings;
        self
    }

    pub fn vault(&self) -> &Vault {
        &self.vault
    }

    pub fn aggregator(&self) -> Option<&Arc<OnlineAggregator>> {
        self.aggregator.as_ref()
    }

    /// User switch for the online path. On by default.
    pub fn set_online_mode(&self, enabled: bool) {
        self.online_mode.store(enabled, Ordering::Relaxed);
    }

    pub fn online_mode(&self) -> bool {
        self.online_mode.load(Ordering::Relaxed)
    }

    /// True when online mode is on, an aggregator is attached and its
    /// fetcher reports connectivity.
    pub async fn is_online(&self) -> bool {
        if !self.online_mode() {
            return false;
        }
        match &self.aggregator {
            Some(aggregator) => aggregator.is_online().await,
            None => false,
        }
    }

    // ========================================================================
    // Question Answering
    // ========================================================================

    pub async fn ask(&self, query: &str) -> Result<Answer> {
        let query = query.trim();
        if query.is_empty() {
            return Ok(Answer::none());
        }

        if self.is_online().await {
            self.ask_online(query).await
        } else {
            self.ask_offline(query).await
        }
    }

    /// Answer from the vault and the encyclopedia only.
    pub async fn ask_offline(&self, query: &str) -> Result<Answer> {
        let query = query.trim();
        if query.is_empty() {
            return Ok(Answer::none());
        }
        let analysis = analyze_query(query);
        tracing::debug!(query = %query, intent = ?analysis.intent, "ask_offline");

        let results = self.search_vault(query, &analysis).await?;
        let hits = self.search_encyclopedia(query).await;
        if results.is_empty() && hits.is_empty() {
            return Ok(Answer::none());
        }

        let mut answer = match self.generate(query, &analysis, &results).await {
            Some(generated) => generated,
            None => build_intent_answer(&analysis, &results),
        };
        if answer.confidence < SUPPLEMENT_THRESHOLD {
            append_encyclopedia_sources(&mut answer, &hits);
        }
        add_staleness_warning(&mut answer, &analysis, now());
        Ok(answer)
    }

    /// Refresh the vault from the feeds, then answer from it.
    ///
    /// Ingestion problems other than storage failures never fail the
    /// question; the vault is searched regardless.
    pub async fn ask_online(&self, query: &str) -> Result<Answer> {
        let query = query.trim();
        if query.is_empty() {
            return Ok(Answer::none());
        }
        let analysis = analyze_query(query);
        tracing::debug!(query = %query, intent = ?analysis.intent, "ask_online");

        if let Some(aggregator) = &self.aggregator {
            let report = aggregator.search_and_save(query).await?;
            tracing::debug!(
                ingested = report.items.len(),
                skipped = ?report.skipped,
                "Online refresh done"
            );
        }

        let results = self.search_vault(query, &analysis).await?;
        if results.is_empty() {
            let hits = self.search_encyclopedia(query).await;
            let mut answer = build_encyclopedia_answer(&hits);
            add_staleness_warning(&mut answer, &analysis, now());
            return Ok(answer);
        }

        let intent = analysis.intent;
        let mut answer = match self.generate(query, &analysis, &results).await {
            Some(generated) => generated,
            None if matches!(intent, Intent::Quote | Intent::HowTo) || intent.is_direct() => {
                build_intent_answer(&analysis, &results)
            }
            None => build_combined_answer(&results),
        };
        if answer.confidence < SUPPLEMENT_THRESHOLD {
            let hits = self.search_encyclopedia(query).await;
            append_encyclopedia_sources(&mut answer, &hits);
        }
        add_staleness_warning(&mut answer, &analysis, now());
        Ok(answer)
    }

    async fn search_vault(&self, query: &str, analysis: &QueryAnalysis) -> Result<Vec<SearchResult>> {
        let limit = self.settings.vault_limit;
        match analysis.intent {
            Intent::Quote => {
                self.vault
                    .search_quotes(&analysis.person, &analysis.secondary_topic, limit)
                    .await
            }
            _ => self.vault.search_full_text(query, limit).await,
        }
    }

    async fn search_encyclopedia(&self, query: &str) -> Vec<EncyclopediaHit> {
        match self
            .encyclopedia
            .search_articles(query, self.settings.encyclopedia_limit)
            .await
        {
            Ok(hits) => hits,
            Err(e) => {
                tracing::warn!(query = %query, error = %e, "Encyclopedia search failed");
                Vec::new()
            }
        }
    }

    /// Generated answer, when a generator is attached and the intent suits
    /// free text. `None` means use the templates.
    async fn generate(
        &self,
        query: &str,
        analysis: &QueryAnalysis,
        results: &[SearchResult],
    ) -> Option<Answer> {
        let generator = self.generator.as_ref()?;
        if results.is_empty() || matches!(analysis.intent, Intent::Quote | Intent::HowTo) {
            return None;
        }

        let context = build_context(results, self.settings.context_words);
        let prompt = build_prompt(query, &context);

        let mut text = String::new();
        let outcome = {
            let mut on_token = |token: &str| text.push_str(token);
            generator
                .generate_streaming(&prompt, &mut on_token, self.settings.max_answer_tokens)
                .await
        };

        match outcome {
            Ok(()) if !text.trim().is_empty() => Some(build_generated_answer(&text, results)),
            Ok(()) => {
                tracing::debug!(query = %query, "Generator returned nothing, using template");
                None
            }
            Err(e) => {
                tracing::warn!(query = %query, error = %e, "Generation failed, using template");
                None
            }
        }
    }
}

fn now() -> i64 {
    chrono::Utc::now().timestamp()
}
