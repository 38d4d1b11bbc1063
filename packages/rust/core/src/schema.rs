//! Schema-validated model responses.
//!
//! Every model call declares the Rust type it expects back. A response that
//! does not deserialize into that type, or that breaks the type's own rules,
//! is a validation failure and is retried like a transport failure.

use serde::de::DeserializeOwned;

use vignette_shared::{ModelClient, ModelRequest, ModelTask, Result, SearchResponse, VignetteError};

/// Semantic checks that run after a response deserializes.
pub trait Validate {
    fn validate(&self) -> Result<()>;
}

/// Call the model for `task` and decode the answer as `T`.
pub async fn request_structured<T>(
    client: &dyn ModelClient,
    task: ModelTask,
    context: serde_json::Value,
) -> Result<T>
where
    T: DeserializeOwned + Validate,
{
    let raw = client.generate(ModelRequest { task, context }).await?;

    let parsed: T = serde_json::from_value(raw).map_err(|e| {
        VignetteError::validation(format!("{task}: response does not match schema: {e}"))
    })?;
    parsed.validate().map_err(|e| match e {
        VignetteError::Validation { message } => {
            VignetteError::validation(format!("{task}: {message}"))
        }
        other => other,
    })?;

    Ok(parsed)
}

impl Validate for SearchResponse {
    fn validate(&self) -> Result<()> {
        if self.answer.trim().is_empty() {
            return Err(VignetteError::validation("search returned an empty answer"));
        }
        Ok(())
    }
}
