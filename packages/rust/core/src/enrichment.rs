//! Enrichment fan-out.
//!
//! Each query of each top-ranked pattern runs as its own task. Every task is
//! tagged with the pattern and query slot it serves, and results are grouped
//! by that tag, never by completion order. A failing query yields a failed
//! [`EnrichmentResult`] and leaves its siblings untouched.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::time::Instant;
use tracing::{debug, info, instrument, warn};

use vignette_shared::{
    Diagnostic, EnrichmentResult, Pattern, PatternId, PipelineConfig, PipelineStage, Result,
    RetryPolicy, SearchClient, SearchResponse,
};

use crate::cache::{CacheOutcome, CachedSearch, QueryCache};
use crate::fanout::join_by_deadline;
use crate::retry::with_retry;
use crate::schema::Validate;

/// Configuration for the enrichment coordinator.
#[derive(Debug, Clone)]
pub struct EnrichmentConfig {
    /// How many top-ranked patterns get enriched.
    pub top_k: usize,
    /// Retry policy for each search call.
    pub retry: RetryPolicy,
    /// Optional ceiling on the whole round.
    pub batch_timeout: Option<Duration>,
}

impl From<&PipelineConfig> for EnrichmentConfig {
    fn from(config: &PipelineConfig) -> Self {
        Self {
            top_k: config.top_k,
            retry: config.enrichment_retry,
            batch_timeout: config.enrichment_batch_timeout,
        }
    }
}

/// Identity of one in-flight query: which pattern, which of its queries.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct QueryTag {
    pub pattern_id: PatternId,
    pub slot: usize,
}

/// All results for one pattern, in query order.
#[derive(Debug, Clone, PartialEq)]
pub struct EnrichmentBundle {
    pub pattern_id: PatternId,
    pub results: Vec<EnrichmentResult>,
}

/// The outcome of one enrichment round.
#[derive(Debug, Clone, Default)]
pub struct EnrichmentOutcome {
    /// One bundle per selected pattern, in ranked order.
    pub bundles: Vec<EnrichmentBundle>,
    pub queries_issued: usize,
    pub queries_failed: usize,
    pub cache_hits: usize,
    pub diagnostics: Vec<Diagnostic>,
}

impl EnrichmentOutcome {
    pub fn bundle_for(&self, pattern_id: &PatternId) -> Option<&EnrichmentBundle> {
        self.bundles.iter().find(|b| &b.pattern_id == pattern_id)
    }
}

/// The first `k` patterns of an already ranked list.
pub fn select_top_k(patterns: &[Pattern], k: usize) -> &[Pattern] {
    &patterns[..k.min(patterns.len())]
}

/// Runs enrichment queries concurrently through the shared cache.
pub struct EnrichmentCoordinator {
    search: Arc<dyn SearchClient>,
    cache: Arc<QueryCache>,
    config: EnrichmentConfig,
}

impl EnrichmentCoordinator {
    pub fn new(search: Arc<dyn SearchClient>, cache: Arc<QueryCache>, config: EnrichmentConfig) -> Self {
        Self {
            search,
            cache,
            config,
        }
    }

    /// Enrich the top-ranked patterns. Never fails as a whole.
    #[instrument(skip_all, fields(patterns = patterns.len(), top_k = self.config.top_k))]
    pub async fn enrich(&self, patterns: &[Pattern]) -> EnrichmentOutcome {
        let purged = self.cache.purge_expired().await;
        if purged > 0 {
            debug!(purged, "dropped expired cache entries");
        }

        let selected = select_top_k(patterns, self.config.top_k);
        let deadline = self.config.batch_timeout.map(|t| Instant::now() + t);

        let mut tasks = Vec::new();
        for pattern in selected {
            for (slot, query) in pattern.queries.iter().enumerate() {
                let tag = QueryTag {
                    pattern_id: pattern.id.clone(),
                    slot,
                };
                let handle = tokio::spawn(run_query(
                    self.search.clone(),
                    self.cache.clone(),
                    self.config.retry,
                    query.clone(),
                ));
                tasks.push((tag, query.clone(), handle));
            }
        }

        let mut outcome = EnrichmentOutcome {
            queries_issued: tasks.len(),
            ..Default::default()
        };
        let mut by_tag: HashMap<QueryTag, EnrichmentResult> = HashMap::with_capacity(tasks.len());

        for (tag, query, handle) in tasks {
            let joined = join_by_deadline(handle, deadline).await.and_then(|r| r);
            let result = match joined {
                Ok(cached) => {
                    if cached.outcome == CacheOutcome::Hit {
                        outcome.cache_hits += 1;
                    }
                    success_result(&tag, query, cached)
                }
                Err(e) => {
                    warn!(pattern = %tag.pattern_id, query = %query, error = %e, "enrichment query failed");
                    outcome.queries_failed += 1;
                    outcome
                        .diagnostics
                        .push(Diagnostic::from_error(PipelineStage::Enriching, &query, &e));
                    EnrichmentResult::failed(tag.pattern_id.clone(), query, e.to_string())
                }
            };
            by_tag.insert(tag, result);
        }

        for pattern in selected {
            let results = (0..pattern.queries.len())
                .filter_map(|slot| {
                    by_tag.remove(&QueryTag {
                        pattern_id: pattern.id.clone(),
                        slot,
                    })
                })
                .collect();
            outcome.bundles.push(EnrichmentBundle {
                pattern_id: pattern.id.clone(),
                results,
            });
        }

        info!(
            issued = outcome.queries_issued,
            failed = outcome.queries_failed,
            cache_hits = outcome.cache_hits,
            "enrichment round complete"
        );
        outcome
    }
}

async fn run_query(
    search: Arc<dyn SearchClient>,
    cache: Arc<QueryCache>,
    retry: RetryPolicy,
    query: String,
) -> Result<CachedSearch> {
    cache
        .get_or_fetch(&query, || async {
            debug!(query = %query, "querying search collaborator");
            with_retry(&retry, "search", |_| {
                let search = search.clone();
                let query = query.clone();
                async move {
                    let response: SearchResponse = search.search(&query).await?;
                    response.validate()?;
                    Ok(response)
                }
            })
            .await
        })
        .await
}

fn success_result(tag: &QueryTag, query: String, cached: CachedSearch) -> EnrichmentResult {
    EnrichmentResult {
        pattern_id: tag.pattern_id.clone(),
        query,
        answer: cached.response.answer,
        citations: cached.response.citations,
        fetched_at: cached.fetched_at,
        success: true,
        from_cache: cached.outcome == CacheOutcome::Hit,
        error: None,
    }
}
