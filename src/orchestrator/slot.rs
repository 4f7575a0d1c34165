use std::{future::Future, sync::Arc};

use parking_lot::Mutex;
use tokio::{
    runtime::Handle,
    sync::{Mutex as AsyncMutex, RwLock},
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::{BackendKind, BackendRegistry, Capability, Loadable};
use crate::core::error::{Error, LoadError, OrchestratorError};

enum Slot<S: ?Sized, K> {
    Unloaded,
    Active { kind: K, backend: Arc<S> },
    Disposed,
}

type Orphans<S> = Arc<Mutex<Vec<Arc<S>>>>;

// Dropped unsettled (the switch future was abandoned), the candidate is
// queued for disposal.
struct Candidate<S: Loadable + ?Sized + 'static> {
    backend: Arc<S>,
    orphans: Orphans<S>,
    settled: bool,
}

impl<S: Loadable + ?Sized + 'static> Candidate<S> {
    fn settle(mut self) -> Arc<S> {
        self.settled = true;
        Arc::clone(&self.backend)
    }
}

impl<S: Loadable + ?Sized + 'static> Drop for Candidate<S> {
    fn drop(&mut self) {
        if self.settled {
            return;
        }
        warn!("backend switch abandoned mid-load; disposing candidate");
        self.orphans.lock().push(Arc::clone(&self.backend));
        if let Ok(handle) = Handle::try_current() {
            let orphans = Arc::clone(&self.orphans);
            handle.spawn(async move { dispose_orphans(&orphans).await });
        }
    }
}

async fn dispose_orphans<S: Loadable + ?Sized>(orphans: &Mutex<Vec<Arc<S>>>) {
    let pending = std::mem::take(&mut *orphans.lock());
    for backend in pending {
        backend.dispose().await;
    }
}

/// Owns the single active backend of one capability and swaps it atomically.
///
/// Switches are serialised by an exclusive section. A candidate stays owned
/// by the switch in flight until its load succeeds; only then is it moved into
/// the slot and the previous instance disposed. Operations hold a read guard
/// on the slot for their whole duration, so a commit waits for in-flight
/// operations against the old instance to drain before disposing it.
pub struct Orchestrator<S: ?Sized, K> {
    registry: BackendRegistry<S, K>,
    slot: RwLock<Slot<S, K>>,
    switching: AsyncMutex<()>,
    current: Mutex<Option<K>>,
    disposed: Mutex<bool>,
    orphans: Orphans<S>,
}

impl<S, K> Orchestrator<S, K>
where
    S: Loadable + ?Sized + 'static,
    K: BackendKind,
{
    pub fn new(registry: BackendRegistry<S, K>) -> Self {
        Self {
            registry,
            slot: RwLock::new(Slot::Unloaded),
            switching: AsyncMutex::new(()),
            current: Mutex::new(None),
            disposed: Mutex::new(false),
            orphans: Arc::new(Mutex::new(Vec::new())),
        }
    }

    #[must_use]
    pub fn capability(&self) -> Capability {
        K::CAPABILITY
    }

    pub fn current_service_type(&self) -> Option<K> {
        *self.current.lock()
    }

    pub fn is_disposed(&self) -> bool {
        *self.disposed.lock()
    }

    pub fn registered_backends(&self) -> Vec<K> {
        self.registry.kinds()
    }

    /// Handle to the active instance, mostly for diagnostics. Holders must not
    /// keep it past the next switch: the orchestrator disposes it regardless.
    pub async fn current(&self) -> Option<Arc<S>> {
        match &*self.slot.read().await {
            Slot::Active { backend, .. } => Some(Arc::clone(backend)),
            Slot::Unloaded | Slot::Disposed => None,
        }
    }

    pub async fn switch_to(
        &self,
        kind: K,
        load_model: bool,
        cancel: &CancellationToken,
    ) -> Result<(), OrchestratorError> {
        let capability = K::CAPABILITY;
        let _switching = tokio::select! {
            guard = self.switching.lock() => guard,
            _ = cancel.cancelled() => return Err(OrchestratorError::Cancelled(capability)),
        };
        dispose_orphans(&self.orphans).await;

        if self.is_disposed() {
            return Err(OrchestratorError::Disposed(capability));
        }
        if self.current_service_type() == Some(kind) {
            debug!(%capability, backend = %kind, "backend already active");
            return Ok(());
        }

        info!(%capability, backend = %kind, load_model, "switching backend");
        let candidate = Candidate {
            backend: self.registry.create(kind)?,
            orphans: Arc::clone(&self.orphans),
            settled: false,
        };

        if load_model {
            let outcome = tokio::select! {
                result = candidate.backend.load_required(None, cancel) => result,
                _ = cancel.cancelled() => Err(LoadError::Cancelled),
            };
            let outcome = match outcome {
                Ok(()) if cancel.is_cancelled() => Err(LoadError::Cancelled),
                other => other,
            };
            if let Err(error) = outcome {
                candidate.settle().dispose().await;
                return Err(match error {
                    LoadError::Cancelled => {
                        info!(%capability, backend = %kind, "backend switch cancelled");
                        OrchestratorError::Cancelled(capability)
                    }
                    source => {
                        warn!(%capability, backend = %kind, "backend failed to load: {source}");
                        OrchestratorError::Load {
                            capability,
                            backend: kind.to_string(),
                            source,
                        }
                    }
                });
            }
        }

        let previous = {
            let mut slot = self.slot.write().await;
            let previous = std::mem::replace(
                &mut *slot,
                Slot::Active {
                    kind,
                    backend: candidate.settle(),
                },
            );
            *self.current.lock() = Some(kind);
            previous
        };

        if let Slot::Active { kind: old, backend } = previous {
            backend.dispose().await;
            debug!(%capability, backend = %old, "disposed previous backend");
        }
        info!(%capability, backend = %kind, "backend active");
        Ok(())
    }

    /// Runs `operation` against the active backend. The slot stays pinned to
    /// that instance until the returned future completes.
    pub async fn with_backend<T, F, Fut>(&self, operation: F) -> Result<T, Error>
    where
        F: FnOnce(Arc<S>) -> Fut,
        Fut: Future<Output = anyhow::Result<T>>,
    {
        let capability = K::CAPABILITY;
        let slot = self.slot.read().await;
        let backend = match &*slot {
            Slot::Active { backend, .. } => Arc::clone(backend),
            Slot::Unloaded => return Err(OrchestratorError::NoActiveBackend(capability).into()),
            Slot::Disposed => return Err(OrchestratorError::Disposed(capability).into()),
        };
        let result = operation(backend).await;
        drop(slot);
        result.map_err(|source| Error::Backend { capability, source })
    }

    pub async fn dispose(&self) {
        let _switching = self.switching.lock().await;
        dispose_orphans(&self.orphans).await;
        {
            let mut disposed = self.disposed.lock();
            if *disposed {
                return;
            }
            *disposed = true;
        }

        let previous = {
            let mut slot = self.slot.write().await;
            *self.current.lock() = None;
            std::mem::replace(&mut *slot, Slot::Disposed)
        };
        if let Slot::Active { kind, backend } = previous {
            backend.dispose().await;
            info!(capability = %K::CAPABILITY, backend = %kind, "orchestrator disposed");
        }
    }
}
