use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::core::error::LoadError;

/// Contract every backend implements so an [`Orchestrator`](super::Orchestrator)
/// can bring it up before activation and release it after replacement.
///
/// `load_required` must be idempotent: a second call on a loaded backend
/// returns `Ok(())` without reloading. `dispose` is invoked exactly once by
/// the orchestrator that owns the instance, including for candidates whose
/// load failed or was cancelled half way, so it must tolerate partial state.
#[async_trait]
pub trait Loadable: Send + Sync {
    async fn load_required(
        &self,
        model: Option<&str>,
        cancel: &CancellationToken,
    ) -> Result<(), LoadError>;

    fn is_loaded(&self) -> bool;

    async fn dispose(&self) {}
}
