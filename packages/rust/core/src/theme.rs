//! Color theme synthesis from ranked patterns.

use std::sync::Arc;

use serde::Serialize;
use tracing::{info, instrument, warn};

use vignette_shared::{
    ColorScheme, Diagnostic, HexColor, InteractionSummary, ModelClient, ModelTask, Pattern,
    PipelineStage, Result, RetryPolicy, VignetteError,
};

use crate::retry::with_retry;
use crate::schema::{Validate, request_structured};

/// Coarse mood derived from how strongly the dominant pattern stands out.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MoodBucket {
    Vibrant,
    Warm,
    Balanced,
    Calm,
}

impl MoodBucket {
    pub fn from_confidence(confidence: f64) -> Self {
        if confidence >= 0.75 {
            Self::Vibrant
        } else if confidence >= 0.5 {
            Self::Warm
        } else if confidence >= 0.25 {
            Self::Balanced
        } else {
            Self::Calm
        }
    }

    /// Bucket for a ranked pattern list. Empty lists are calm.
    pub fn for_patterns(patterns: &[Pattern]) -> Self {
        patterns
            .first()
            .map(|p| Self::from_confidence(p.confidence))
            .unwrap_or(Self::Calm)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Vibrant => "vibrant",
            Self::Warm => "warm",
            Self::Balanced => "balanced",
            Self::Calm => "calm",
        }
    }
}

/// The predefined palette for a mood bucket.
pub fn default_scheme(bucket: MoodBucket) -> Result<ColorScheme> {
    let [primary, secondary, accent, background, surface, text] = match bucket {
        MoodBucket::Vibrant => ["#E4572E", "#F3A712", "#29335C", "#FFF8F0", "#FFFFFF", "#1B1B1E"],
        MoodBucket::Warm => ["#C8553D", "#F28F3B", "#588B8B", "#FFF5EB", "#FFFFFF", "#2D2A32"],
        MoodBucket::Balanced => ["#3D5A80", "#98C1D9", "#EE6C4D", "#F7F9FB", "#FFFFFF", "#293241"],
        MoodBucket::Calm => ["#4A6670", "#8AA29E", "#D1BCE3", "#F4F6F5", "#FFFFFF", "#1F2A2E"],
    };
    Ok(ColorScheme {
        primary: HexColor::parse(primary)?,
        secondary: HexColor::parse(secondary)?,
        accent: HexColor::parse(accent)?,
        background: HexColor::parse(background)?,
        surface: HexColor::parse(surface)?,
        text: HexColor::parse(text)?,
        mood: bucket.as_str().to_string(),
        rationale: format!("Default {} palette", bucket.as_str()),
    })
}

impl Validate for ColorScheme {
    fn validate(&self) -> Result<()> {
        if self.mood.trim().is_empty() {
            return Err(VignetteError::validation("theme mood is empty"));
        }
        Ok(())
    }
}

/// The chosen scheme plus how it was obtained.
#[derive(Debug, Clone)]
pub struct ThemeOutcome {
    pub scheme: ColorScheme,
    pub used_fallback: bool,
    pub diagnostics: Vec<Diagnostic>,
}

#[derive(Debug, Serialize)]
struct ThemePattern<'a> {
    title: &'a str,
    description: &'a str,
    confidence: f64,
    keywords: &'a [String],
}

pub struct ThemeSynthesizer {
    model: Arc<dyn ModelClient>,
    retry: RetryPolicy,
}

impl ThemeSynthesizer {
    pub fn new(model: Arc<dyn ModelClient>, retry: RetryPolicy) -> Self {
        Self { model, retry }
    }

    /// Ask the model for a scheme; fall back to the bucket palette on failure.
    #[instrument(skip_all, fields(patterns = patterns.len()))]
    pub async fn synthesize(
        &self,
        patterns: &[Pattern],
        summary: &InteractionSummary,
    ) -> Result<ThemeOutcome> {
        let bucket = MoodBucket::for_patterns(patterns);
        let context = serde_json::json!({
            "mood_hint": bucket,
            "patterns": patterns
                .iter()
                .map(|p| ThemePattern {
                    title: &p.title,
                    description: &p.description,
                    confidence: p.confidence,
                    keywords: &p.keywords,
                })
                .collect::<Vec<_>>(),
            "sources": summary.by_source,
        });

        let model = &self.model;
        let result = with_retry(&self.retry, ModelTask::SynthesizeTheme.as_str(), |_| {
            let context = context.clone();
            async move {
                request_structured::<ColorScheme>(model.as_ref(), ModelTask::SynthesizeTheme, context)
                    .await
            }
        })
        .await;

        match result {
            Ok(scheme) => {
                info!(mood = %scheme.mood, "theme synthesized");
                Ok(ThemeOutcome {
                    scheme,
                    used_fallback: false,
                    diagnostics: Vec::new(),
                })
            }
            Err(e) => {
                warn!(error = %e, bucket = bucket.as_str(), "theme synthesis failed, using default palette");
                let scheme = default_scheme(bucket)
                    .map_err(|e| VignetteError::Fatal(format!("default palette invalid: {e}")))?;
                Ok(ThemeOutcome {
                    scheme,
                    used_fallback: true,
                    diagnostics: vec![Diagnostic::from_error(
                        PipelineStage::Theming,
                        ModelTask::SynthesizeTheme.as_str(),
                        &e,
                    )],
                })
            }
        }
    }
}
