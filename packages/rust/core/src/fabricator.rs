//! Content fabrication: one model call per widget slot, run concurrently.
//!
//! A slot whose generation fails, times out, or panics gets a fallback unit
//! built from its pattern. The number of units produced always equals the
//! number of slots requested.

use std::sync::Arc;
use std::time::Duration;

use serde::Deserialize;
use serde_json::json;
use tokio::time::Instant;
use tracing::{info, instrument, warn};

use vignette_shared::{
    ColorScheme, ContentUnit, Diagnostic, EnrichmentResult, ModelClient, ModelTask, Pattern,
    PipelineConfig, PipelineStage, Result, RetryPolicy, UnitContent, UnitKey, UnitStatus,
    VignetteError,
};

use crate::enrichment::EnrichmentOutcome;
use crate::fanout::join_by_deadline;
use crate::retry::with_retry;
use crate::schema::{Validate, request_structured};

/// Most enrichment answers copied into a fallback unit.
const MAX_FALLBACK_HIGHLIGHTS: usize = 3;

/// A pattern paired with whatever enrichment it received.
#[derive(Debug, Clone)]
pub struct WidgetSlot {
    pub pattern: Pattern,
    pub enrichment: Vec<EnrichmentResult>,
}

/// One slot per ranked pattern. Patterns that were not enriched get an
/// empty enrichment list.
pub fn build_slots(patterns: &[Pattern], enrichment: &EnrichmentOutcome) -> Vec<WidgetSlot> {
    patterns
        .iter()
        .map(|pattern| WidgetSlot {
            pattern: pattern.clone(),
            enrichment: enrichment
                .bundle_for(&pattern.id)
                .map(|b| b.results.clone())
                .unwrap_or_default(),
        })
        .collect()
}

/// The model's answer for one widget.
#[derive(Debug, Clone, Deserialize)]
pub struct GeneratedWidget {
    pub title: String,
    pub body: String,
    #[serde(default)]
    pub highlights: Vec<String>,
}

impl Validate for GeneratedWidget {
    fn validate(&self) -> Result<()> {
        if self.title.trim().is_empty() {
            return Err(VignetteError::validation("widget title is empty"));
        }
        if self.body.trim().is_empty() {
            return Err(VignetteError::validation("widget body is empty"));
        }
        Ok(())
    }
}

#[derive(Debug, Clone)]
pub struct FabricationConfig {
    pub retry: RetryPolicy,
    pub batch_timeout: Option<Duration>,
}

impl From<&PipelineConfig> for FabricationConfig {
    fn from(config: &PipelineConfig) -> Self {
        Self {
            retry: config.fabrication_retry,
            batch_timeout: config.fabrication_batch_timeout,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct FabricationOutcome {
    /// One unit per slot, in slot order.
    pub units: Vec<ContentUnit>,
    pub requested: usize,
    pub fallback_count: usize,
    pub diagnostics: Vec<Diagnostic>,
}

/// Unit built from the pattern alone, used when generation fails.
pub fn fallback_unit(slot: &WidgetSlot, reason: &str) -> ContentUnit {
    let pattern = &slot.pattern;
    let body = if pattern.description.is_empty() {
        pattern.title.clone()
    } else {
        format!("{}\n\n{}", pattern.title, pattern.description)
    };
    let highlights = slot
        .enrichment
        .iter()
        .filter(|r| r.success)
        .map(|r| r.answer.trim().to_string())
        .filter(|a| !a.is_empty())
        .take(MAX_FALLBACK_HIGHLIGHTS)
        .collect();

    ContentUnit {
        key: UnitKey::new(pattern.widget, &pattern.title),
        pattern_id: pattern.id.clone(),
        confidence: pattern.confidence,
        title: pattern.title.clone(),
        content: UnitContent { body, highlights },
        status: UnitStatus::Fallback,
        note: Some(reason.to_string()),
    }
}

fn generated_unit(pattern: &Pattern, widget: GeneratedWidget) -> ContentUnit {
    let title = widget.title.trim().to_string();
    ContentUnit {
        key: UnitKey::new(pattern.widget, &title),
        pattern_id: pattern.id.clone(),
        confidence: pattern.confidence,
        title,
        content: UnitContent {
            body: widget.body.trim().to_string(),
            highlights: widget.highlights,
        },
        status: UnitStatus::Ok,
        note: None,
    }
}

fn widget_context(slot: &WidgetSlot, theme: &ColorScheme) -> serde_json::Value {
    let pattern = &slot.pattern;
    let findings: Vec<serde_json::Value> = slot
        .enrichment
        .iter()
        .filter(|r| r.success)
        .map(|r| json!({ "query": r.query, "answer": r.answer, "citations": r.citations }))
        .collect();

    json!({
        "pattern": {
            "id": pattern.id,
            "title": pattern.title,
            "description": pattern.description,
            "confidence": pattern.confidence,
            "keywords": pattern.keywords,
        },
        "widget": pattern.widget,
        "size_class": pattern.widget.size_class(),
        "theme": { "mood": theme.mood, "primary": theme.primary, "accent": theme.accent },
        "enrichment": findings,
    })
}

/// Generates widget content for every slot.
pub struct ContentFabricator {
    model: Arc<dyn ModelClient>,
    config: FabricationConfig,
}

impl ContentFabricator {
    pub fn new(model: Arc<dyn ModelClient>, config: FabricationConfig) -> Self {
        Self { model, config }
    }

    #[instrument(skip_all, fields(slots = slots.len()))]
    pub async fn fabricate(&self, slots: Vec<WidgetSlot>, theme: &ColorScheme) -> FabricationOutcome {
        let deadline = self.config.batch_timeout.map(|t| Instant::now() + t);

        let handles: Vec<_> = slots
            .iter()
            .map(|slot| {
                let model = self.model.clone();
                let retry = self.config.retry;
                let context = widget_context(slot, theme);
                tokio::spawn(async move {
                    with_retry(&retry, ModelTask::GenerateWidget.as_str(), |_| {
                        let model = model.clone();
                        let context = context.clone();
                        async move {
                            request_structured::<GeneratedWidget>(
                                model.as_ref(),
                                ModelTask::GenerateWidget,
                                context,
                            )
                            .await
                        }
                    })
                    .await
                })
            })
            .collect();

        let mut outcome = FabricationOutcome {
            requested: slots.len(),
            ..Default::default()
        };

        for (slot, handle) in slots.iter().zip(handles) {
            let joined = join_by_deadline(handle, deadline).await.and_then(|r| r);
            let unit = match joined {
                Ok(widget) => generated_unit(&slot.pattern, widget),
                Err(e) => {
                    warn!(pattern = %slot.pattern.id, error = %e, "widget generation failed, using fallback");
                    outcome.fallback_count += 1;
                    outcome.diagnostics.push(Diagnostic::from_error(
                        PipelineStage::Fabricating,
                        UnitKey::new(slot.pattern.widget, &slot.pattern.title).to_string(),
                        &e,
                    ));
                    fallback_unit(slot, &e.to_string())
                }
            };
            outcome.units.push(unit);
        }

        info!(
            requested = outcome.requested,
            fallbacks = outcome.fallback_count,
            "fabrication round complete"
        );
        outcome
    }
}
