//! Core domain types for Vignette documents.

use std::collections::BTreeMap;
use std::sync::LazyLock;

use chrono::{DateTime, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::{FailureKind, Result, VignetteError};

/// Largest number of enrichment queries a single pattern may carry.
pub const MAX_QUERIES_PER_PATTERN: usize = 2;

// ---------------------------------------------------------------------------
// Interactions
// ---------------------------------------------------------------------------

/// One behavioral interaction, as delivered by the ingestion step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InteractionRecord {
    pub id: String,
    /// Where the interaction came from (e.g., `browser`, `calendar`).
    pub source: String,
    /// What happened (e.g., `visit`, `search`, `play`).
    pub kind: String,
    pub timestamp: DateTime<Utc>,
    /// Source-specific detail. Opaque to the pipeline.
    #[serde(default)]
    pub payload: serde_json::Value,
}

/// Aggregate counts over the interactions inside the lookback window.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct InteractionSummary {
    pub total: usize,
    pub by_source: BTreeMap<String, usize>,
    pub by_kind: BTreeMap<String, usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub first_seen: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_seen: Option<DateTime<Utc>>,
}

impl InteractionSummary {
    /// Summarize a list of interactions.
    pub fn from_records(records: &[InteractionRecord]) -> Self {
        let mut summary = Self {
            total: records.len(),
            ..Default::default()
        };
        for record in records {
            *summary.by_source.entry(record.source.clone()).or_default() += 1;
            *summary.by_kind.entry(record.kind.clone()).or_default() += 1;
            summary.first_seen = Some(match summary.first_seen {
                Some(t) => t.min(record.timestamp),
                None => record.timestamp,
            });
            summary.last_seen = Some(match summary.last_seen {
                Some(t) => t.max(record.timestamp),
                None => record.timestamp,
            });
        }
        summary
    }

    /// The `n` most frequent keys of a count map, most frequent first.
    /// Ties keep alphabetical order.
    pub fn top_keys(counts: &BTreeMap<String, usize>, n: usize) -> Vec<String> {
        let mut entries: Vec<(&String, &usize)> = counts.iter().collect();
        entries.sort_by(|a, b| b.1.cmp(a.1));
        entries.into_iter().take(n).map(|(k, _)| k.clone()).collect()
    }
}

// ---------------------------------------------------------------------------
// Patterns
// ---------------------------------------------------------------------------

/// Stable identifier of a [`Pattern`] within one pipeline run.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PatternId(pub String);

impl PatternId {
    /// Identifier for the `n`-th pattern (1-based) in model response order.
    pub fn numbered(n: usize) -> Self {
        Self(format!("pattern-{n}"))
    }
}

impl std::fmt::Display for PatternId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Visual footprint of a widget, used for document ordering.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SizeClass {
    Large,
    Medium,
    Small,
}

/// The kind of widget a pattern is rendered as.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WidgetKind {
    Hero,
    Feature,
    Timeline,
    Card,
    Stat,
    Tip,
}

impl WidgetKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Hero => "hero",
            Self::Feature => "feature",
            Self::Timeline => "timeline",
            Self::Card => "card",
            Self::Stat => "stat",
            Self::Tip => "tip",
        }
    }

    pub fn size_class(&self) -> SizeClass {
        match self {
            Self::Hero | Self::Feature => SizeClass::Large,
            Self::Timeline | Self::Card => SizeClass::Medium,
            Self::Stat | Self::Tip => SizeClass::Small,
        }
    }
}

impl std::fmt::Display for WidgetKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A ranked behavioral theme derived from interaction data.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Pattern {
    pub id: PatternId,
    pub title: String,
    pub description: String,
    /// Model confidence in `[0, 1]`.
    pub confidence: f64,
    #[serde(default)]
    pub keywords: Vec<String>,
    pub widget: WidgetKind,
    /// Search queries used for enrichment (at most [`MAX_QUERIES_PER_PATTERN`]).
    #[serde(default)]
    pub queries: Vec<String>,
}

impl Pattern {
    /// Build a pattern, rejecting values that break the pattern invariants.
    pub fn new(
        id: PatternId,
        title: impl Into<String>,
        description: impl Into<String>,
        confidence: f64,
        keywords: Vec<String>,
        widget: WidgetKind,
        queries: Vec<String>,
    ) -> Result<Self> {
        let title = title.into().trim().to_string();
        if title.is_empty() {
            return Err(VignetteError::validation(format!("{id}: empty title")));
        }
        if !confidence.is_finite() || !(0.0..=1.0).contains(&confidence) {
            return Err(VignetteError::validation(format!(
                "{id}: confidence {confidence} outside [0, 1]"
            )));
        }
        if queries.len() > MAX_QUERIES_PER_PATTERN {
            return Err(VignetteError::validation(format!(
                "{id}: {} queries (max {MAX_QUERIES_PER_PATTERN})",
                queries.len()
            )));
        }
        let queries = queries
            .into_iter()
            .map(|q| q.trim().to_string())
            .filter(|q| !q.is_empty())
            .collect();

        Ok(Self {
            id,
            title,
            description: description.into().trim().to_string(),
            confidence,
            keywords,
            widget,
            queries,
        })
    }
}

// ---------------------------------------------------------------------------
// Theme
// ---------------------------------------------------------------------------

static HEX_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^#[0-9A-Fa-f]{6}$").expect("static hex regex"));

/// A strict `#RRGGBB` color. Stored uppercase.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct HexColor(String);

impl HexColor {
    pub fn parse(value: &str) -> Result<Self> {
        let trimmed = value.trim();
        if HEX_RE.is_match(trimmed) {
            Ok(Self(trimmed.to_ascii_uppercase()))
        } else {
            Err(VignetteError::validation(format!(
                "invalid hex color {value:?} (expected #RRGGBB)"
            )))
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for HexColor {
    type Error = VignetteError;

    fn try_from(value: String) -> Result<Self> {
        Self::parse(&value)
    }
}

impl From<HexColor> for String {
    fn from(color: HexColor) -> Self {
        color.0
    }
}

impl std::fmt::Display for HexColor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// The document palette plus the reasoning behind it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColorScheme {
    pub primary: HexColor,
    pub secondary: HexColor,
    pub accent: HexColor,
    pub background: HexColor,
    pub surface: HexColor,
    pub text: HexColor,
    pub mood: String,
    pub rationale: String,
}

// ---------------------------------------------------------------------------
// Enrichment
// ---------------------------------------------------------------------------

/// The outcome of one enrichment query, attributed to its source pattern.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnrichmentResult {
    pub pattern_id: PatternId,
    pub query: String,
    pub answer: String,
    #[serde(default)]
    pub citations: Vec<String>,
    pub fetched_at: DateTime<Utc>,
    pub success: bool,
    #[serde(default)]
    pub from_cache: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl EnrichmentResult {
    /// Placeholder for a query that could not be answered.
    pub fn failed(pattern_id: PatternId, query: impl Into<String>, error: impl Into<String>) -> Self {
        Self {
            pattern_id,
            query: query.into(),
            answer: String::new(),
            citations: Vec::new(),
            fetched_at: Utc::now(),
            success: false,
            from_cache: false,
            error: Some(error.into()),
        }
    }
}

// ---------------------------------------------------------------------------
// Content units
// ---------------------------------------------------------------------------

/// Normalize a unit title for identity comparison: trimmed and lowercased.
pub fn normalize_title(title: &str) -> String {
    title.trim().to_lowercase()
}

/// Identity of a content unit within a document.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct UnitKey {
    pub widget: WidgetKind,
    pub title: String,
}

impl UnitKey {
    pub fn new(widget: WidgetKind, title: &str) -> Self {
        Self {
            widget,
            title: normalize_title(title),
        }
    }
}

impl std::fmt::Display for UnitKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.widget, self.title)
    }
}

/// Whether a unit came from the model or from its pattern fallback.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UnitStatus {
    Ok,
    Fallback,
}

/// Rendered content of a unit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnitContent {
    pub body: String,
    #[serde(default)]
    pub highlights: Vec<String>,
}

/// One generated widget in the final document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContentUnit {
    pub key: UnitKey,
    pub pattern_id: PatternId,
    /// Confidence of the source pattern, carried for ordering.
    pub confidence: f64,
    pub title: String,
    pub content: UnitContent,
    pub status: UnitStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,
}

impl ContentUnit {
    pub fn widget(&self) -> WidgetKind {
        self.key.widget
    }
}

// ---------------------------------------------------------------------------
// Pipeline stages and diagnostics
// ---------------------------------------------------------------------------

/// States of the generation pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PipelineStage {
    Init,
    Fetching,
    Patterning,
    Theming,
    Enriching,
    Fabricating,
    Deduping,
    Assembled,
    Failed,
}

impl PipelineStage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Init => "init",
            Self::Fetching => "fetching",
            Self::Patterning => "patterning",
            Self::Theming => "theming",
            Self::Enriching => "enriching",
            Self::Fabricating => "fabricating",
            Self::Deduping => "deduping",
            Self::Assembled => "assembled",
            Self::Failed => "failed",
        }
    }

    /// The stage that follows this one on the success path.
    pub fn next(&self) -> Option<Self> {
        match self {
            Self::Init => Some(Self::Fetching),
            Self::Fetching => Some(Self::Patterning),
            Self::Patterning => Some(Self::Theming),
            Self::Theming => Some(Self::Enriching),
            Self::Enriching => Some(Self::Fabricating),
            Self::Fabricating => Some(Self::Deduping),
            Self::Deduping => Some(Self::Assembled),
            Self::Assembled | Self::Failed => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Assembled | Self::Failed)
    }
}

impl std::fmt::Display for PipelineStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A recorded, non-fatal failure.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Diagnostic {
    pub stage: PipelineStage,
    /// What failed: a query, a unit key, or a stage name.
    pub subject: String,
    pub kind: FailureKind,
    pub message: String,
}

impl Diagnostic {
    pub fn new(
        stage: PipelineStage,
        subject: impl Into<String>,
        kind: FailureKind,
        message: impl Into<String>,
    ) -> Self {
        Self {
            stage,
            subject: subject.into(),
            kind,
            message: message.into(),
        }
    }

    /// Diagnostic describing an error.
    pub fn from_error(stage: PipelineStage, subject: impl Into<String>, err: &VignetteError) -> Self {
        Self::new(stage, subject, err.kind(), err.to_string())
    }
}

// ---------------------------------------------------------------------------
// Document
// ---------------------------------------------------------------------------

/// Counts and diagnostics describing how a document was produced.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenerationMetadata {
    /// The only field allowed to differ between otherwise identical runs.
    pub generated_at: DateTime<Utc>,
    pub interaction_count: usize,
    pub pattern_count: usize,
    pub used_fallback_patterns: bool,
    pub used_fallback_theme: bool,
    pub queries_issued: usize,
    pub queries_failed: usize,
    pub cache_hits: usize,
    pub units_requested: usize,
    pub fallback_units: usize,
    pub duplicates_removed: usize,
    /// SHA-256 over the theme and the ordered units.
    pub content_digest: String,
    #[serde(default)]
    pub diagnostics: Vec<Diagnostic>,
}

/// The final assembled artifact handed to rendering.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Document {
    pub theme: ColorScheme,
    pub units: Vec<ContentUnit>,
    pub metadata: GenerationMetadata,
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;

    use super::*;

    fn record(source: &str, kind: &str, day: u32) -> InteractionRecord {
        InteractionRecord {
            id: format!("{source}-{kind}-{day}"),
            source: source.into(),
            kind: kind.into(),
            timestamp: Utc.with_ymd_and_hms(2026, 3, day, 12, 0, 0).unwrap(),
            payload: serde_json::Value::Null,
        }
    }

    #[test]
    fn hex_color_accepts_strict_six_digit() {
        assert_eq!(HexColor::parse("#1a2B3c").unwrap().as_str(), "#1A2B3C");
        assert!(HexColor::parse("#FFF").is_err());
        assert!(HexColor::parse("1A2B3C").is_err());
        assert!(HexColor::parse("#1A2B3G").is_err());
        assert!(HexColor::parse("#1A2B3C4D").is_err());
    }

    #[test]
    fn color_scheme_rejects_invalid_hex_on_deserialize() {
        let json = r##"{"primary":"#112233","secondary":"#445566","accent":"red",
            "background":"#FFFFFF","surface":"#EEEEEE","text":"#000000",
            "mood":"calm","rationale":"r"}"##;
        let err = serde_json::from_str::<ColorScheme>(json).unwrap_err();
        assert!(err.to_string().contains("invalid hex color"));
    }

    #[test]
    fn pattern_new_validates_invariants() {
        let ok = Pattern::new(
            PatternId::numbered(1),
            "  Evening runs ",
            "Runs after work",
            0.8,
            vec!["running".into()],
            WidgetKind::Hero,
            vec!["best trails".into(), "  ".into()],
        )
        .unwrap();
        assert_eq!(ok.title, "Evening runs");
        assert_eq!(ok.queries, vec!["best trails".to_string()]);

        let too_confident = Pattern::new(
            PatternId::numbered(2),
            "x",
            "",
            1.2,
            vec![],
            WidgetKind::Tip,
            vec![],
        );
        assert!(too_confident.is_err());

        let nan = Pattern::new(PatternId::numbered(3), "x", "", f64::NAN, vec![], WidgetKind::Tip, vec![]);
        assert!(nan.is_err());

        let untitled = Pattern::new(PatternId::numbered(4), "  ", "", 0.5, vec![], WidgetKind::Tip, vec![]);
        assert!(untitled.is_err());

        let chatty = Pattern::new(
            PatternId::numbered(5),
            "x",
            "",
            0.5,
            vec![],
            WidgetKind::Tip,
            vec!["a".into(), "b".into(), "c".into()],
        );
        assert!(chatty.is_err());
    }

    #[test]
    fn normalize_title_trims_and_lowercases() {
        assert_eq!(normalize_title("  Morning Focus \n"), "morning focus");
        assert_eq!(normalize_title("ALREADY"), "already");
        assert_eq!(normalize_title(""), "");
    }

    #[test]
    fn unit_key_equality_uses_normalized_title() {
        assert_eq!(
            UnitKey::new(WidgetKind::Card, "Deep Work"),
            UnitKey::new(WidgetKind::Card, " deep work ")
        );
        assert_ne!(
            UnitKey::new(WidgetKind::Card, "Deep Work"),
            UnitKey::new(WidgetKind::Stat, "Deep Work")
        );
    }

    #[test]
    fn summary_counts_and_bounds() {
        let records = vec![
            record("browser", "visit", 3),
            record("browser", "search", 1),
            record("music", "play", 5),
        ];
        let summary = InteractionSummary::from_records(&records);
        assert_eq!(summary.total, 3);
        assert_eq!(summary.by_source["browser"], 2);
        assert_eq!(summary.by_kind["play"], 1);
        assert_eq!(summary.first_seen, Some(records[1].timestamp));
        assert_eq!(summary.last_seen, Some(records[2].timestamp));
        assert_eq!(
            InteractionSummary::top_keys(&summary.by_source, 1),
            vec!["browser".to_string()]
        );
    }

    #[test]
    fn stage_sequence_ends_assembled() {
        let mut stage = PipelineStage::Init;
        let mut seen = vec![stage];
        while let Some(next) = stage.next() {
            stage = next;
            seen.push(stage);
        }
        assert_eq!(seen.len(), 8);
        assert_eq!(stage, PipelineStage::Assembled);
        assert!(stage.is_terminal());
        assert!(PipelineStage::Failed.is_terminal());
    }

    #[test]
    fn widget_size_classes() {
        assert_eq!(WidgetKind::Hero.size_class(), SizeClass::Large);
        assert_eq!(WidgetKind::Card.size_class(), SizeClass::Medium);
        assert_eq!(WidgetKind::Tip.size_class(), SizeClass::Small);
        assert!(SizeClass::Large < SizeClass::Small);
    }
}
