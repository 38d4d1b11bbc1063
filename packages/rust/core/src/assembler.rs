//! Document assembler.
//!
//! Orders deduplicated units, stamps generation metadata and a content
//! digest, and writes the final document to disk.

use std::path::Path;

use chrono::{DateTime, Utc};
use sha2::{Digest, Sha256};
use tracing::{debug, info, instrument};

use vignette_shared::{
    ColorScheme, ContentUnit, Diagnostic, Document, GenerationMetadata, Result, UnitKey,
    UnitStatus, VignetteError, normalize_title,
};

/// Counts gathered by the earlier stages.
#[derive(Debug, Clone, Default)]
pub struct AssemblyInput {
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
    pub diagnostics: Vec<Diagnostic>,
}

/// Sort units for display: size class (large first), then confidence
/// (highest first), then pattern id, then normalized title.
pub fn order_units(units: &mut [ContentUnit]) {
    units.sort_by(|a, b| {
        a.widget()
            .size_class()
            .cmp(&b.widget().size_class())
            .then_with(|| b.confidence.total_cmp(&a.confidence))
            .then_with(|| a.pattern_id.cmp(&b.pattern_id))
            .then_with(|| normalize_title(&a.title).cmp(&normalize_title(&b.title)))
    });
}

/// SHA-256 over the theme and the ordered units, as lowercase hex.
pub fn content_digest(theme: &ColorScheme, units: &[ContentUnit]) -> String {
    let mut hasher = Sha256::new();
    for field in [
        theme.primary.as_str(),
        theme.secondary.as_str(),
        theme.accent.as_str(),
        theme.background.as_str(),
        theme.surface.as_str(),
        theme.text.as_str(),
        theme.mood.as_str(),
        theme.rationale.as_str(),
    ] {
        hasher.update(field.as_bytes());
        hasher.update([0u8]);
    }
    for unit in units {
        hasher.update(unit.key.to_string().as_bytes());
        hasher.update([0u8]);
        hasher.update(unit.pattern_id.0.as_bytes());
        hasher.update([0u8]);
        hasher.update(unit.title.as_bytes());
        hasher.update([0u8]);
        hasher.update(unit.content.body.as_bytes());
        for highlight in &unit.content.highlights {
            hasher.update([0u8]);
            hasher.update(highlight.as_bytes());
        }
        hasher.update([0x1f]);
        hasher.update(match unit.status {
            UnitStatus::Ok => b"ok".as_slice(),
            UnitStatus::Fallback => b"fallback".as_slice(),
        });
        if let Some(note) = &unit.note {
            hasher.update([0u8]);
            hasher.update(note.as_bytes());
        }
        hasher.update([0x1e]);
    }
    format!("{:x}", hasher.finalize())
}

/// Build the final document. Identical inputs give identical documents
/// apart from `generated_at`.
#[instrument(skip_all, fields(units = units.len()))]
pub fn assemble(
    theme: ColorScheme,
    mut units: Vec<ContentUnit>,
    input: AssemblyInput,
    generated_at: DateTime<Utc>,
) -> Document {
    order_units(&mut units);
    let content_digest = content_digest(&theme, &units);

    info!(
        units = units.len(),
        fallbacks = input.fallback_units,
        digest = %content_digest,
        "document assembled"
    );

    Document {
        theme,
        units,
        metadata: GenerationMetadata {
            generated_at,
            interaction_count: input.interaction_count,
            pattern_count: input.pattern_count,
            used_fallback_patterns: input.used_fallback_patterns,
            used_fallback_theme: input.used_fallback_theme,
            queries_issued: input.queries_issued,
            queries_failed: input.queries_failed,
            cache_hits: input.cache_hits,
            units_requested: input.units_requested,
            fallback_units: input.fallback_units,
            duplicates_removed: input.duplicates_removed,
            content_digest,
            diagnostics: input.diagnostics,
        },
    }
}

/// Check the structural guarantees of an assembled document.
pub fn validate_document(document: &Document) -> Result<()> {
    let mut keys = std::collections::HashSet::new();
    for unit in &document.units {
        let key = UnitKey::new(unit.widget(), &unit.title);
        if !keys.insert(key.clone()) {
            return Err(VignetteError::validation(format!("duplicate unit {key}")));
        }
    }

    let mut ordered = document.units.clone();
    order_units(&mut ordered);
    if ordered != document.units {
        return Err(VignetteError::validation("units are not in display order"));
    }

    let meta = &document.metadata;
    if meta.units_requested != document.units.len() + meta.duplicates_removed {
        return Err(VignetteError::validation(format!(
            "unit count mismatch: requested {}, present {}, removed {}",
            meta.units_requested,
            document.units.len(),
            meta.duplicates_removed
        )));
    }
    if meta.content_digest != content_digest(&document.theme, &document.units) {
        return Err(VignetteError::validation("content digest does not match"));
    }
    Ok(())
}

/// Write a document as pretty JSON (write to temp, then rename).
pub fn write_document(path: &Path, document: &Document) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent).map_err(|e| VignetteError::io(parent, e))?;
    }

    let json = serde_json::to_string_pretty(document)
        .map_err(|e| VignetteError::validation(format!("JSON serialization failed: {e}")))?;

    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "document.json".into());
    let temp = path.with_file_name(format!(".{file_name}.tmp"));

    std::fs::write(&temp, &json).map_err(|e| VignetteError::io(&temp, e))?;
    std::fs::rename(&temp, path).map_err(|e| VignetteError::io(path, e))?;

    debug!(path = %path.display(), bytes = json.len(), "wrote document");
    Ok(())
}

/// Read a document written by [`write_document`].
pub fn read_document(path: &Path) -> Result<Document> {
    let content = std::fs::read_to_string(path).map_err(|e| VignetteError::io(path, e))?;
    serde_json::from_str(&content)
        .map_err(|e| VignetteError::validation(format!("invalid document {}: {e}", path.display())))
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
