//! Pattern extraction: interactions in, ranked behavioral patterns out.

use std::sync::Arc;

use chrono::Duration as ChronoDuration;
use serde::{Deserialize, Serialize};
use tracing::{info, instrument, warn};

use vignette_shared::{
    Diagnostic, InteractionRecord, InteractionSummary, ModelClient, ModelTask, Pattern, PatternId,
    PipelineStage, Result, RetryPolicy, VignetteError, WidgetKind,
};

use crate::retry::with_retry;
use crate::schema::{Validate, request_structured};

/// Fewest patterns a model response may contain.
pub const MIN_PATTERNS: usize = 4;

/// Most patterns a model response may contain.
pub const MAX_PATTERNS: usize = 8;

/// Most recent records included in the model context.
const MAX_CONTEXT_RECORDS: usize = 400;

const FALLBACK_CONFIDENCE: f64 = 0.1;

// ---------------------------------------------------------------------------
// Model response schema
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct PatternsResponse {
    patterns: Vec<RawPattern>,
}

#[derive(Debug, Deserialize)]
struct RawPattern {
    title: String,
    #[serde(default)]
    description: String,
    confidence: f64,
    #[serde(default)]
    keywords: Vec<String>,
    widget: WidgetKind,
    #[serde(default)]
    queries: Vec<String>,
}

impl Validate for PatternsResponse {
    fn validate(&self) -> Result<()> {
        let count = self.patterns.len();
        if !(MIN_PATTERNS..=MAX_PATTERNS).contains(&count) {
            return Err(VignetteError::validation(format!(
                "expected {MIN_PATTERNS}-{MAX_PATTERNS} patterns, got {count}"
            )));
        }
        Ok(())
    }
}

impl PatternsResponse {
    /// Build validated patterns, numbered in response order, then ranked.
    fn into_ranked(self) -> Result<Vec<Pattern>> {
        let patterns = self
            .patterns
            .into_iter()
            .enumerate()
            .map(|(i, raw)| {
                Pattern::new(
                    PatternId::numbered(i + 1),
                    raw.title,
                    raw.description,
                    raw.confidence,
                    raw.keywords,
                    raw.widget,
                    raw.queries,
                )
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(rank_patterns(patterns))
    }
}

/// Compact view of one interaction sent to the model.
#[derive(Debug, Serialize)]
struct ContextRecord<'a> {
    source: &'a str,
    kind: &'a str,
    timestamp: String,
    payload: &'a serde_json::Value,
}

// ---------------------------------------------------------------------------
// Ranking, windowing, fallback
// ---------------------------------------------------------------------------

/// Sort by confidence descending. The sort is stable, so ties keep their
/// original order.
pub fn rank_patterns(mut patterns: Vec<Pattern>) -> Vec<Pattern> {
    patterns.sort_by(|a, b| b.confidence.total_cmp(&a.confidence));
    patterns
}

/// Keep records no older than `lookback_days` before the newest record.
///
/// The window is anchored on the data rather than the wall clock so the same
/// input always selects the same records.
pub fn within_lookback(records: &[InteractionRecord], lookback_days: u32) -> Vec<InteractionRecord> {
    let Some(newest) = records.iter().map(|r| r.timestamp).max() else {
        return Vec::new();
    };
    // A window reaching past the representable range keeps everything.
    let cutoff = ChronoDuration::try_days(i64::from(lookback_days))
        .and_then(|window| newest.checked_sub_signed(window));
    records
        .iter()
        .filter(|r| cutoff.is_none_or(|c| r.timestamp >= c))
        .cloned()
        .collect()
}

/// Low-detail pattern built from aggregate counts when extraction is impossible.
pub fn fallback_pattern(summary: &InteractionSummary) -> Result<Pattern> {
    let (title, description) = if summary.total == 0 {
        (
            "Getting started".to_string(),
            "No recent activity yet. New sections appear as interactions arrive.".to_string(),
        )
    } else {
        let top_source = InteractionSummary::top_keys(&summary.by_source, 1);
        let top_kind = InteractionSummary::top_keys(&summary.by_kind, 1);
        (
            "Recent activity".to_string(),
            format!(
                "{} interactions across {} source(s); mostly {} via {}.",
                summary.total,
                summary.by_source.len(),
                top_kind.first().map(String::as_str).unwrap_or("activity"),
                top_source.first().map(String::as_str).unwrap_or("unknown sources"),
            ),
        )
    };

    let mut keywords = InteractionSummary::top_keys(&summary.by_source, 3);
    keywords.extend(InteractionSummary::top_keys(&summary.by_kind, 3));

    Pattern::new(
        PatternId("pattern-fallback".into()),
        title,
        description,
        FALLBACK_CONFIDENCE,
        keywords,
        WidgetKind::Card,
        Vec::new(),
    )
    .map_err(|e| VignetteError::Fatal(format!("fallback pattern construction failed: {e}")))
}

// ---------------------------------------------------------------------------
// Extractor
// ---------------------------------------------------------------------------

/// Patterns plus how they were obtained.
#[derive(Debug, Clone)]
pub struct PatternOutcome {
    /// Ranked, never empty.
    pub patterns: Vec<Pattern>,
    pub used_fallback: bool,
    pub diagnostics: Vec<Diagnostic>,
}

/// Turns a window of interactions into ranked patterns via one model call.
pub struct PatternExtractor {
    model: Arc<dyn ModelClient>,
    retry: RetryPolicy,
}

impl PatternExtractor {
    pub fn new(model: Arc<dyn ModelClient>, retry: RetryPolicy) -> Self {
        Self { model, retry }
    }

    /// Extract ranked patterns. Only fails if the fallback itself cannot be built.
    #[instrument(skip_all, fields(interactions = interactions.len(), lookback_days = lookback_days))]
    pub async fn extract(
        &self,
        interactions: &[InteractionRecord],
        summary: &InteractionSummary,
        lookback_days: u32,
    ) -> Result<PatternOutcome> {
        if interactions.is_empty() {
            info!("no interactions in window, using fallback pattern");
            return Ok(PatternOutcome {
                patterns: vec![fallback_pattern(summary)?],
                used_fallback: true,
                diagnostics: Vec::new(),
            });
        }

        let context = build_context(interactions, summary, lookback_days);
        let model = &self.model;
        let result = with_retry(&self.retry, ModelTask::ExtractPatterns.as_str(), |_| {
            let context = context.clone();
            async move {
                let response: PatternsResponse =
                    request_structured(model.as_ref(), ModelTask::ExtractPatterns, context).await?;
                response.into_ranked()
            }
        })
        .await;

        match result {
            Ok(patterns) => {
                info!(count = patterns.len(), "patterns extracted");
                Ok(PatternOutcome {
                    patterns,
                    used_fallback: false,
                    diagnostics: Vec::new(),
                })
            }
            Err(e) => {
                warn!(error = %e, "pattern extraction failed, using fallback pattern");
                Ok(PatternOutcome {
                    patterns: vec![fallback_pattern(summary)?],
                    used_fallback: true,
                    diagnostics: vec![Diagnostic::from_error(
                        PipelineStage::Patterning,
                        ModelTask::ExtractPatterns.as_str(),
                        &e,
                    )],
                })
            }
        }
    }
}

fn build_context(
    interactions: &[InteractionRecord],
    summary: &InteractionSummary,
    lookback_days: u32,
) -> serde_json::Value {
    let mut recent: Vec<&InteractionRecord> = interactions.iter().collect();
    recent.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
    recent.truncate(MAX_CONTEXT_RECORDS);

    let records: Vec<ContextRecord<'_>> = recent
        .into_iter()
        .map(|r| ContextRecord {
            source: &r.source,
            kind: &r.kind,
            timestamp: r.timestamp.to_rfc3339(),
            payload: &r.payload,
        })
        .collect();

    serde_json::json!({
        "lookback_days": lookback_days,
        "summary": summary,
        "interactions": records,
        "limits": { "min_patterns": MIN_PATTERNS, "max_patterns": MAX_PATTERNS },
    })
}
