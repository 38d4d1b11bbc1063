//! Generation pipeline for Vignette.
//!
//! Turns interaction records into a themed, deduplicated [`Document`]:
//! pattern extraction, theme synthesis, concurrent enrichment through a TTL
//! cache, concurrent widget fabrication, deduplication, and assembly.
//!
//! [`Document`]: vignette_shared::Document

pub mod assembler;
pub mod cache;
pub mod dedup;
pub mod enrichment;
pub mod fabricator;
mod fanout;
pub mod patterns;
pub mod pipeline;
pub mod retry;
pub mod schema;
pub mod theme;

#[cfg(test)]
mod test_support;

pub use pipeline::{Pipeline, ProgressReporter, SilentProgress};
