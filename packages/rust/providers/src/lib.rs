//! HTTP adapters for the model and search collaborators.

mod openrouter;
mod search;

pub use openrouter::{OpenRouterClient, OpenRouterConfig};
pub use search::{HttpSearchClient, SearchConfig};

/// User-Agent string for outbound requests.
const USER_AGENT: &str = concat!("Vignette/", env!("CARGO_PKG_VERSION"));
