//! Interaction file loading.
//!
//! Accepts either a bare JSON array of records or an object with an
//! `interactions` array.

use std::path::Path;

use color_eyre::eyre::{Result, WrapErr};
use serde::Deserialize;
use tracing::debug;

use vignette_shared::InteractionRecord;

#[derive(Deserialize)]
#[serde(untagged)]
enum InteractionFile {
    Bare(Vec<InteractionRecord>),
    Wrapped { interactions: Vec<InteractionRecord> },
}

pub(crate) fn parse_interactions(content: &str) -> Result<Vec<InteractionRecord>> {
    let file: InteractionFile =
        serde_json::from_str(content).wrap_err("interaction file is not a list of records")?;
    Ok(match file {
        InteractionFile::Bare(records) => records,
        InteractionFile::Wrapped { interactions } => interactions,
    })
}

pub(crate) fn load_interactions(path: &Path) -> Result<Vec<InteractionRecord>> {
    let content = std::fs::read_to_string(path)
        .wrap_err_with(|| format!("failed to read {}", path.display()))?;
    let records =
        parse_interactions(&content).wrap_err_with(|| format!("in {}", path.display()))?;
    debug!(count = records.len(), path = %path.display(), "loaded interactions");
    Ok(records)
}
