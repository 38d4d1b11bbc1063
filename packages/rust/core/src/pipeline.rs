//! End-to-end generation pipeline:
//! interactions → patterns → theme → enrichment → fabrication → dedup → document.

use std::sync::Arc;

use chrono::Utc;
use tracing::{error, info, instrument};
use uuid::Uuid;

use vignette_shared::{
    Document, InteractionRecord, InteractionSummary, ModelClient, PipelineConfig, PipelineStage,
    Result, SearchClient, VignetteError,
};

use crate::assembler::{self, AssemblyInput};
use crate::cache::QueryCache;
use crate::dedup::dedupe;
use crate::enrichment::{EnrichmentConfig, EnrichmentCoordinator};
use crate::fabricator::{ContentFabricator, FabricationConfig, build_slots};
use crate::patterns::{PatternExtractor, within_lookback};
use crate::theme::ThemeSynthesizer;

/// Progress callback for reporting pipeline status.
pub trait ProgressReporter: Send + Sync {
    /// Called on every stage transition, including `Failed`.
    fn stage(&self, stage: PipelineStage);
    /// Free-form progress inside a stage.
    fn detail(&self, message: &str);
    /// Called when the document is assembled.
    fn done(&self, document: &Document);
}

/// No-op progress reporter for headless/test usage.
pub struct SilentProgress;

impl ProgressReporter for SilentProgress {
    fn stage(&self, _stage: PipelineStage) {}
    fn detail(&self, _message: &str) {}
    fn done(&self, _document: &Document) {}
}

/// Walks the stage state machine and reports every transition.
struct StageTracker<'a> {
    current: PipelineStage,
    progress: &'a dyn ProgressReporter,
}

impl<'a> StageTracker<'a> {
    fn new(progress: &'a dyn ProgressReporter) -> Self {
        Self {
            current: PipelineStage::Init,
            progress,
        }
    }

    /// Move to the next stage on the success path.
    fn advance(&mut self) -> Result<PipelineStage> {
        let next = self.current.next().ok_or_else(|| {
            VignetteError::Fatal(format!("no stage after {}", self.current))
        })?;
        info!(from = %self.current, to = %next, "pipeline stage");
        self.current = next;
        self.progress.stage(next);
        Ok(next)
    }

    fn fail(&mut self, err: &VignetteError) {
        error!(stage = %self.current, error = %err, "pipeline failed");
        self.current = PipelineStage::Failed;
        self.progress.stage(PipelineStage::Failed);
    }
}

/// The generation pipeline and its collaborators.
pub struct Pipeline {
    config: PipelineConfig,
    model: Arc<dyn ModelClient>,
    search: Arc<dyn SearchClient>,
    cache: Arc<QueryCache>,
}

impl Pipeline {
    /// Build a pipeline with a fresh enrichment cache.
    pub fn new(config: PipelineConfig, model: Arc<dyn ModelClient>, search: Arc<dyn SearchClient>) -> Self {
        let cache = Arc::new(QueryCache::new(config.cache_ttl));
        Self::with_cache(config, model, search, cache)
    }

    /// Build a pipeline that shares an existing enrichment cache.
    pub fn with_cache(
        config: PipelineConfig,
        model: Arc<dyn ModelClient>,
        search: Arc<dyn SearchClient>,
        cache: Arc<QueryCache>,
    ) -> Self {
        Self {
            config,
            model,
            search,
            cache,
        }
    }

    pub fn cache(&self) -> &Arc<QueryCache> {
        &self.cache
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Run every stage and return the assembled document.
    ///
    /// Per-call failures degrade to fallbacks and are recorded in the
    /// document diagnostics. An error is returned only when a mandatory
    /// fallback cannot be built.
    #[instrument(skip_all, fields(run_id = %Uuid::now_v7(), interactions = interactions.len()))]
    pub async fn run(
        &self,
        interactions: &[InteractionRecord],
        progress: &dyn ProgressReporter,
    ) -> Result<Document> {
        let mut tracker = StageTracker::new(progress);
        match self.run_stages(interactions, &mut tracker).await {
            Ok(document) => {
                progress.done(&document);
                info!(
                    units = document.units.len(),
                    fallbacks = document.metadata.fallback_units,
                    diagnostics = document.metadata.diagnostics.len(),
                    "pipeline complete"
                );
                Ok(document)
            }
            Err(e) => {
                tracker.fail(&e);
                Err(e)
            }
        }
    }

    async fn run_stages(
        &self,
        interactions: &[InteractionRecord],
        tracker: &mut StageTracker<'_>,
    ) -> Result<Document> {
        let progress = tracker.progress;

        // --- Intake ---
        tracker.advance()?;
        let window = within_lookback(interactions, self.config.lookback_days);
        let summary = InteractionSummary::from_records(&window);
        progress.detail(&format!(
            "{} of {} interactions inside the {}-day window",
            window.len(),
            interactions.len(),
            self.config.lookback_days
        ));

        // --- Patterns ---
        tracker.advance()?;
        let extractor = PatternExtractor::new(self.model.clone(), self.config.patterns_retry);
        let patterns = extractor
            .extract(&window, &summary, self.config.lookback_days)
            .await?;
        progress.detail(&format!("{} pattern(s)", patterns.patterns.len()));

        // --- Theme ---
        tracker.advance()?;
        let synthesizer = ThemeSynthesizer::new(self.model.clone(), self.config.theme_retry);
        let theme = synthesizer.synthesize(&patterns.patterns, &summary).await?;
        progress.detail(&format!("theme mood: {}", theme.scheme.mood));

        // --- Enrichment ---
        tracker.advance()?;
        let coordinator = EnrichmentCoordinator::new(
            self.search.clone(),
            self.cache.clone(),
            EnrichmentConfig::from(&self.config),
        );
        let enrichment = coordinator.enrich(&patterns.patterns).await;
        progress.detail(&format!(
            "{} queries, {} failed, {} cached",
            enrichment.queries_issued, enrichment.queries_failed, enrichment.cache_hits
        ));

        // --- Fabrication ---
        tracker.advance()?;
        let fabricator =
            ContentFabricator::new(self.model.clone(), FabricationConfig::from(&self.config));
        let slots = build_slots(&patterns.patterns, &enrichment);
        let fabricated = fabricator.fabricate(slots, &theme.scheme).await;
        progress.detail(&format!(
            "{} widget(s), {} fallback",
            fabricated.units.len(),
            fabricated.fallback_count
        ));

        // --- Dedup ---
        tracker.advance()?;
        let deduped = dedupe(fabricated.units);

        // --- Assembly ---
        tracker.advance()?;
        let mut diagnostics = patterns.diagnostics;
        diagnostics.extend(theme.diagnostics);
        diagnostics.extend(enrichment.diagnostics);
        diagnostics.extend(fabricated.diagnostics);
        diagnostics.extend(deduped.diagnostics);

        let input = AssemblyInput {
            interaction_count: window.len(),
            pattern_count: patterns.patterns.len(),
            used_fallback_patterns: patterns.used_fallback,
            used_fallback_theme: theme.used_fallback,
            queries_issued: enrichment.queries_issued,
            queries_failed: enrichment.queries_failed,
            cache_hits: enrichment.cache_hits,
            units_requested: fabricated.requested,
            fallback_units: fabricated.fallback_count,
            duplicates_removed: deduped.removed,
            diagnostics,
        };
        Ok(assembler::assemble(theme.scheme, deduped.units, input, Utc::now()))
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;
    use std::time::Duration;

    use vignette_shared::{FailureKind, ModelTask, PatternId, UnitStatus};

    use super::*;
    use crate::assembler::validate_document;
    use crate::test_support::{
        Reply, ScriptedModel, ScriptedSearch, at, patterns_json, record, test_config, theme_json,
        widget_json,
    };

    #[derive(Default)]
    struct RecordingProgress {
        stages: Mutex<Vec<PipelineStage>>,
        done: Mutex<bool>,
    }

    impl ProgressReporter for RecordingProgress {
        fn stage(&self, stage: PipelineStage) {
            self.stages.lock().unwrap().push(stage);
        }
        fn detail(&self, _message: &str) {}
        fn done(&self, _document: &Document) {
            *self.done.lock().unwrap() = true;
        }
    }

    fn interactions() -> Vec<InteractionRecord> {
        vec![
            record("r1", "browser", "visit", at(2)),
            record("r2", "fitness", "run", at(3)),
            record("r3", "music", "play", at(4)),
            record("r4", "browser", "search", at(5)),
        ]
    }

    /// Four patterns; the top three carry two queries each.
    fn four_patterns() -> Reply {
        Reply::Json(patterns_json(&[
            ("Evening runs", 0.9, "hero", &["trail running tips", "running shoes 2026"]),
            ("Jazz evenings", 0.7, "card", &["new jazz albums", "jazz clubs nearby"]),
            ("Recipe hunting", 0.6, "timeline", &["quick dinners", "seasonal produce"]),
            ("Late reading", 0.3, "tip", &[]),
        ]))
    }

    fn pipeline(model: Arc<ScriptedModel>, search: Arc<ScriptedSearch>) -> Pipeline {
        Pipeline::new(test_config(), model, search)
    }

    #[tokio::test(start_paused = true)]
    async fn empty_input_yields_single_fallback_unit() {
        let model = Arc::new(ScriptedModel::new());
        let search = Arc::new(ScriptedSearch::new());
        let doc = pipeline(model.clone(), search.clone())
            .run(&[], &SilentProgress)
            .await
            .unwrap();

        assert_eq!(doc.units.len(), 1);
        assert_eq!(doc.units[0].pattern_id, PatternId("pattern-fallback".into()));
        assert!(doc.metadata.used_fallback_patterns);
        assert_eq!(doc.metadata.interaction_count, 0);
        assert_eq!(doc.metadata.queries_issued, 0);
        assert_eq!(model.calls(ModelTask::ExtractPatterns), 0);
        assert_eq!(search.total_calls(), 0);
        validate_document(&doc).unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn one_failing_query_keeps_every_pattern() {
        let model = Arc::new(
            ScriptedModel::new()
                .with_patterns(four_patterns())
                .with_theme(Reply::Json(theme_json("lively"))),
        );
        let search = Arc::new(ScriptedSearch::new().failing("new jazz albums"));
        let doc = pipeline(model, search.clone())
            .run(&interactions(), &SilentProgress)
            .await
            .unwrap();

        assert_eq!(doc.units.len(), 4);
        for n in 1..=3 {
            assert!(doc.units.iter().any(|u| u.pattern_id == PatternId::numbered(n)));
        }
        assert_eq!(doc.metadata.queries_issued, 6);
        assert_eq!(doc.metadata.queries_failed, 1);
        let enrichment_failures: Vec<_> = doc
            .metadata
            .diagnostics
            .iter()
            .filter(|d| d.stage == PipelineStage::Enriching)
            .collect();
        assert_eq!(enrichment_failures.len(), 1);
        assert_eq!(enrichment_failures[0].subject, "new jazz albums");
        assert_eq!(search.calls("new jazz albums"), 2);
        assert_eq!(doc.theme.mood, "lively");
        validate_document(&doc).unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn pattern_with_no_answers_still_gets_generated_unit() {
        let model = Arc::new(ScriptedModel::new().with_patterns(four_patterns()));
        let search = Arc::new(
            ScriptedSearch::new()
                .failing("new jazz albums")
                .failing("jazz clubs nearby"),
        );
        let doc = pipeline(model.clone(), search)
            .run(&interactions(), &SilentProgress)
            .await
            .unwrap();

        let jazz = doc
            .units
            .iter()
            .find(|u| u.pattern_id == PatternId::numbered(2))
            .unwrap();
        assert_eq!(jazz.status, UnitStatus::Ok);
        assert_eq!(model.widget_calls("Jazz evenings"), 1);
        assert_eq!(doc.metadata.queries_failed, 2);
        let enrichment_failures = doc
            .metadata
            .diagnostics
            .iter()
            .filter(|d| d.stage == PipelineStage::Enriching)
            .count();
        assert_eq!(enrichment_failures, 2);
        validate_document(&doc).unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn oversized_lookback_still_assembles() {
        let model = Arc::new(ScriptedModel::new().with_patterns(four_patterns()));
        let search = Arc::new(ScriptedSearch::new());
        let mut config = test_config();
        config.lookback_days = u32::MAX;
        let doc = Pipeline::new(config, model, search)
            .run(&interactions(), &SilentProgress)
            .await
            .unwrap();
        assert_eq!(doc.metadata.interaction_count, 4);
        validate_document(&doc).unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn timed_out_widget_degrades_to_fallback() {
        let model = Arc::new(
            ScriptedModel::new()
                .with_patterns(four_patterns())
                .with_widgets(|title| {
                    if title == "Jazz evenings" {
                        Reply::Hang
                    } else {
                        Reply::Json(widget_json(title))
                    }
                }),
        );
        let search = Arc::new(ScriptedSearch::new());
        let doc = pipeline(model.clone(), search)
            .run(&interactions(), &SilentProgress)
            .await
            .unwrap();

        let jazz = doc
            .units
            .iter()
            .find(|u| u.pattern_id == PatternId::numbered(2))
            .unwrap();
        assert_eq!(jazz.status, UnitStatus::Fallback);
        assert!(jazz.content.body.contains("Jazz evenings"));
        assert!(!jazz.content.highlights.is_empty());
        assert_eq!(model.widget_calls("Jazz evenings"), 3);
        assert_eq!(doc.metadata.fallback_units, 1);
        assert_eq!(doc.units.len(), 4);

        let failure = doc
            .metadata
            .diagnostics
            .iter()
            .find(|d| d.stage == PipelineStage::Fabricating)
            .unwrap();
        assert_eq!(failure.kind, FailureKind::Exhaustion);
        assert!(failure.message.contains("timed out"));
    }

    #[tokio::test(start_paused = true)]
    async fn duplicate_widgets_are_collapsed() {
        let model = Arc::new(
            ScriptedModel::new()
                .with_patterns(Reply::Json(patterns_json(&[
                    ("Morning coffee", 0.8, "card", &[]),
                    ("Coffee breaks", 0.6, "card", &[]),
                    ("Podcasts", 0.5, "stat", &[]),
                    ("Stretching", 0.2, "tip", &[]),
                ])))
                .with_widgets(|title| {
                    if title.contains("offee") {
                        Reply::Json(widget_json("Coffee Rituals"))
                    } else {
                        Reply::Json(widget_json(title))
                    }
                }),
        );
        let search = Arc::new(ScriptedSearch::new());
        let doc = pipeline(model, search)
            .run(&interactions(), &SilentProgress)
            .await
            .unwrap();

        assert_eq!(doc.units.len(), 3);
        let coffee: Vec<_> = doc.units.iter().filter(|u| u.title == "Coffee Rituals").collect();
        assert_eq!(coffee.len(), 1);
        assert_eq!(coffee[0].pattern_id, PatternId::numbered(1));
        assert_eq!(doc.metadata.duplicates_removed, 1);
        assert_eq!(doc.metadata.units_requested, 4);
        let dup: Vec<_> = doc
            .metadata
            .diagnostics
            .iter()
            .filter(|d| d.kind == FailureKind::DuplicateConflict)
            .collect();
        assert_eq!(dup.len(), 1);
        validate_document(&doc).unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn reports_every_stage_in_order() {
        let model = Arc::new(ScriptedModel::new().with_patterns(four_patterns()));
        let search = Arc::new(ScriptedSearch::new());
        let progress = RecordingProgress::default();
        pipeline(model, search)
            .run(&interactions(), &progress)
            .await
            .unwrap();

        assert_eq!(
            *progress.stages.lock().unwrap(),
            vec![
                PipelineStage::Fetching,
                PipelineStage::Patterning,
                PipelineStage::Theming,
                PipelineStage::Enriching,
                PipelineStage::Fabricating,
                PipelineStage::Deduping,
                PipelineStage::Assembled,
            ]
        );
        assert!(*progress.done.lock().unwrap());
    }

    #[tokio::test(start_paused = true)]
    async fn identical_inputs_give_identical_documents() {
        let run = || async {
            let model = Arc::new(
                ScriptedModel::new()
                    .with_patterns(four_patterns())
                    .with_theme(Reply::Json(theme_json("steady"))),
            );
            let search = Arc::new(ScriptedSearch::new().failing("quick dinners"));
            pipeline(model, search)
                .run(&interactions(), &SilentProgress)
                .await
                .unwrap()
        };
        let first = run().await;
        tokio::time::advance(Duration::from_secs(5)).await;
        let second = run().await;

        assert_eq!(first.theme, second.theme);
        assert_eq!(first.units, second.units);
        assert_eq!(first.metadata.content_digest, second.metadata.content_digest);
        assert_eq!(first.metadata.diagnostics, second.metadata.diagnostics);
    }

    #[tokio::test(start_paused = true)]
    async fn shared_cache_serves_second_run() {
        let model = Arc::new(ScriptedModel::new().with_patterns(four_patterns()));
        let search = Arc::new(ScriptedSearch::new());
        let pipeline = pipeline(model, search.clone());

        let first = pipeline.run(&interactions(), &SilentProgress).await.unwrap();
        let second = pipeline.run(&interactions(), &SilentProgress).await.unwrap();

        assert_eq!(first.metadata.cache_hits, 0);
        assert_eq!(second.metadata.cache_hits, 6);
        assert_eq!(search.total_calls(), 6);
        assert_eq!(pipeline.cache().len().await, 6);
    }

    #[tokio::test(start_paused = true)]
    async fn lookback_excludes_old_interactions() {
        let model = Arc::new(ScriptedModel::new().with_patterns(four_patterns()));
        let search = Arc::new(ScriptedSearch::new());
        let mut config = test_config();
        config.lookback_days = 2;
        let doc = Pipeline::new(config, model, search)
            .run(&interactions(), &SilentProgress)
            .await
            .unwrap();
        assert_eq!(doc.metadata.interaction_count, 3);
    }

    #[test]
    fn tracker_failure_is_terminal() {
        let progress = RecordingProgress::default();
        let mut tracker = StageTracker::new(&progress);
        tracker.advance().unwrap();
        tracker.fail(&VignetteError::Fatal("fallback pattern construction failed".into()));
        assert_eq!(tracker.current, PipelineStage::Failed);
        assert!(tracker.advance().is_err());
        assert_eq!(
            *progress.stages.lock().unwrap(),
            vec![PipelineStage::Fetching, PipelineStage::Failed]
        );
    }
}
