//! Collaborator contracts for the external calls the pipeline makes.
//!
//! The pipeline only sees these traits. Concrete HTTP adapters live in
//! `vignette-providers`; tests use scripted fakes.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::Result;

/// Which structured object a model call is expected to produce.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModelTask {
    ExtractPatterns,
    SynthesizeTheme,
    GenerateWidget,
}

impl ModelTask {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ExtractPatterns => "extract_patterns",
            Self::SynthesizeTheme => "synthesize_theme",
            Self::GenerateWidget => "generate_widget",
        }
    }
}

impl std::fmt::Display for ModelTask {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A structured model call: the task plus its JSON context.
#[derive(Debug, Clone, Serialize)]
pub struct ModelRequest {
    pub task: ModelTask,
    pub context: serde_json::Value,
}

/// AI-model collaborator: `(context) -> JSON object`.
///
/// Implementations return the raw JSON object; callers validate it against
/// the schema of the task.
#[async_trait]
pub trait ModelClient: Send + Sync {
    async fn generate(&self, request: ModelRequest) -> Result<serde_json::Value>;
}

/// Answer from the search collaborator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SearchResponse {
    pub answer: String,
    #[serde(default)]
    pub citations: Vec<String>,
}

/// Search collaborator: `(query) -> {answer, citations}`.
#[async_trait]
pub trait SearchClient: Send + Sync {
    async fn search(&self, query: &str) -> Result<SearchResponse>;
}
