//! Unit deduplication by `(widget, normalized title)`.

use std::collections::HashSet;

use tracing::debug;

use vignette_shared::{ContentUnit, Diagnostic, FailureKind, PipelineStage, UnitKey};

#[derive(Debug, Clone, Default)]
pub struct DedupOutcome {
    pub units: Vec<ContentUnit>,
    pub removed: usize,
    pub diagnostics: Vec<Diagnostic>,
}

/// Keep the first unit for each identity key and drop the rest.
///
/// Keys are recomputed from the unit's widget and title so a stale or
/// hand-built key cannot hide a duplicate. Running this on its own output
/// changes nothing.
pub fn dedupe(units: Vec<ContentUnit>) -> DedupOutcome {
    let mut seen: HashSet<UnitKey> = HashSet::with_capacity(units.len());
    let mut outcome = DedupOutcome::default();

    for mut unit in units {
        let key = UnitKey::new(unit.widget(), &unit.title);
        if seen.contains(&key) {
            debug!(key = %key, pattern = %unit.pattern_id, "dropping duplicate unit");
            outcome.removed += 1;
            outcome.diagnostics.push(Diagnostic::new(
                PipelineStage::Deduping,
                key.to_string(),
                FailureKind::DuplicateConflict,
                format!("duplicate of an earlier unit; dropped unit from {}", unit.pattern_id),
            ));
            continue;
        }
        seen.insert(key.clone());
        unit.key = key;
        outcome.units.push(unit);
    }

    outcome
}
