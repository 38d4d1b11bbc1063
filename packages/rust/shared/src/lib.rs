//! Shared types, error model, configuration, and collaborator contracts for Vignette.
//!
//! This crate is the foundation depended on by all other Vignette crates.
//! It provides:
//! - [`VignetteError`]: the unified error type
//! - Domain types ([`Pattern`], [`ColorScheme`], [`ContentUnit`], [`Document`], ...)
//! - Configuration ([`AppConfig`], [`PipelineConfig`], config loading)
//! - Collaborator traits ([`ModelClient`], [`SearchClient`])

pub mod client;
pub mod config;
pub mod error;
pub mod types;

// Re-export public API at crate root for ergonomic imports.
pub use client::{ModelClient, ModelRequest, ModelTask, SearchClient, SearchResponse};
pub use config::{
    AppConfig, MAX_LOOKBACK_DAYS, ModelProviderConfig, PipelineConfig, PipelineSettings,
    RetryPolicy, RetrySettings, SearchProviderConfig, TimeoutSettings, config_dir,
    config_file_path, init_config, load_config, load_config_from, validate_api_key,
    validate_config,
};
pub use error::{FailureKind, Result, VignetteError};
pub use types::{
    ColorScheme, ContentUnit, Diagnostic, Document, EnrichmentResult, GenerationMetadata,
    HexColor, InteractionRecord, InteractionSummary, MAX_QUERIES_PER_PATTERN, Pattern,
    PatternId, PipelineStage, SizeClass, UnitContent, UnitKey, UnitStatus, WidgetKind,
    normalize_title,
};
