//! Joining spawned sibling tasks without letting one outcome affect another.

use tokio::task::JoinHandle;
use tokio::time::Instant;

use vignette_shared::VignetteError;

/// Await a spawned task, giving up at `deadline` if one is set.
///
/// A panicked or cancelled task, or one still running at the deadline, is
/// turned into a transport error for that task alone. Tasks cut off by the
/// deadline are aborted.
pub(crate) async fn join_by_deadline<T>(
    mut handle: JoinHandle<T>,
    deadline: Option<Instant>,
) -> Result<T, VignetteError> {
    let joined = match deadline {
        Some(deadline) => match tokio::time::timeout_at(deadline, &mut handle).await {
            Ok(joined) => joined,
            Err(_) => {
                handle.abort();
                return Err(VignetteError::transport("batch timeout reached before completion"));
            }
        },
        None => handle.await,
    };

    joined.map_err(|e| {
        if e.is_panic() {
            VignetteError::transport(format!("task panicked: {e}"))
        } else {
            VignetteError::transport(format!("task cancelled: {e}"))
        }
    })
}
