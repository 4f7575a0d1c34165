use std::{collections::HashMap, fmt, sync::Arc};

use parking_lot::Mutex;
use serde_json::Value;
use tokio::sync::Mutex as AsyncMutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use super::InterpreterHost;
use crate::core::error::RuntimeError;

// Not `Clone`: two owners never present the same identity.
pub struct DependentToken {
    id: Uuid,
    label: &'static str,
}

impl DependentToken {
    #[must_use]
    pub fn new(label: &'static str) -> Self {
        Self {
            id: Uuid::new_v4(),
            label,
        }
    }

    #[must_use]
    pub fn label(&self) -> &'static str {
        self.label
    }
}

impl fmt::Debug for DependentToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DependentToken")
            .field("label", &self.label)
            .field("id", &self.id)
            .finish()
    }
}

#[derive(Default)]
struct RuntimeState {
    initialized: bool,
    closed: bool,
    dependents: HashMap<Uuid, &'static str>,
}

/// Reference-counted owner of the shared interpreter. It runs while at least
/// one dependent is registered; first/last decisions happen under `lifecycle`.
pub struct RuntimeManager {
    host: Arc<dyn InterpreterHost>,
    lifecycle: AsyncMutex<()>,
    state: Mutex<RuntimeState>,
}

impl RuntimeManager {
    pub fn new(host: Arc<dyn InterpreterHost>) -> Self {
        Self {
            host,
            lifecycle: AsyncMutex::new(()),
            state: Mutex::new(RuntimeState::default()),
        }
    }

    pub fn is_runtime_initialized(&self) -> bool {
        self.state.lock().initialized
    }

    pub fn dependent_count(&self) -> usize {
        self.state.lock().dependents.len()
    }

    pub fn is_registered(&self, dependent: &DependentToken) -> bool {
        self.state.lock().dependents.contains_key(&dependent.id)
    }

    pub fn dependents(&self) -> Vec<&'static str> {
        let mut labels: Vec<_> = self.state.lock().dependents.values().copied().collect();
        labels.sort_unstable();
        labels
    }

    pub async fn start_runtime(
        &self,
        dependent: &DependentToken,
        cancel: &CancellationToken,
    ) -> Result<(), RuntimeError> {
        let _lifecycle = tokio::select! {
            guard = self.lifecycle.lock() => guard,
            _ = cancel.cancelled() => return Err(RuntimeError::Cancelled),
        };

        {
            let mut state = self.state.lock();
            if state.closed {
                return Err(RuntimeError::Closed);
            }
            if state.initialized && !self.host.is_alive() {
                warn!(
                    dependent = dependent.label,
                    dependents = state.dependents.len(),
                    "shared interpreter died; restarting it"
                );
                state.initialized = false;
            }
            if state.initialized {
                if state.dependents.insert(dependent.id, dependent.label).is_none() {
                    debug!(
                        dependent = dependent.label,
                        dependents = state.dependents.len(),
                        "runtime dependent registered"
                    );
                }
                return Ok(());
            }
        }

        info!(dependent = dependent.label, "initializing shared interpreter");
        let outcome = tokio::select! {
            outcome = self.host.initialize() => outcome.map_err(RuntimeError::Initialization),
            _ = cancel.cancelled() => Err(RuntimeError::Cancelled),
        };
        if let Err(failure) = outcome {
            self.host.shutdown().await;
            match &failure {
                RuntimeError::Cancelled => {
                    info!(dependent = dependent.label, "interpreter start cancelled")
                }
                _ => error!(
                    dependent = dependent.label,
                    "interpreter failed to start: {failure}"
                ),
            }
            return Err(failure);
        }

        let mut state = self.state.lock();
        state.initialized = true;
        state.dependents.insert(dependent.id, dependent.label);
        info!(
            dependent = dependent.label,
            dependents = state.dependents.len(),
            "shared interpreter running"
        );
        Ok(())
    }

    pub async fn stop_runtime(&self, dependent: &DependentToken) {
        let _lifecycle = self.lifecycle.lock().await;
        let last = {
            let mut state = self.state.lock();
            if state.dependents.remove(&dependent.id).is_none() {
                debug!(dependent = dependent.label, "stop requested by unregistered dependent");
                return;
            }
            debug!(
                dependent = dependent.label,
                dependents = state.dependents.len(),
                "runtime dependent released"
            );
            state.dependents.is_empty() && state.initialized
        };

        if last {
            self.host.shutdown().await;
            self.state.lock().initialized = false;
            info!(dependent = dependent.label, "last dependent released; interpreter stopped");
        }
    }

    // Drops every dependent; one mid-call sees its call fail.
    pub async fn force_shutdown(&self) {
        let _lifecycle = self.lifecycle.lock().await;
        self.shutdown_locked().await;
    }

    pub async fn close(&self) {
        let _lifecycle = self.lifecycle.lock().await;
        self.shutdown_locked().await;
        self.state.lock().closed = true;
        debug!("runtime manager closed");
    }

    async fn shutdown_locked(&self) {
        let (was_initialized, dropped) = {
            let mut state = self.state.lock();
            let dropped: Vec<&'static str> =
                state.dependents.drain().map(|(_, label)| label).collect();
            let was_initialized = std::mem::replace(&mut state.initialized, false);
            (was_initialized, dropped)
        };
        if was_initialized || self.host.is_alive() {
            self.host.shutdown().await;
        }
        if dropped.is_empty() {
            debug!(was_initialized, "forced interpreter shutdown");
        } else {
            warn!(?dropped, "forced interpreter shutdown with dependents still registered");
        }
    }

    pub async fn exec(&self, dependent: &DependentToken, source: &str) -> Result<(), RuntimeError> {
        self.ensure_registered(dependent)?;
        self.host.exec(source).await
    }

    pub async fn call(
        &self,
        dependent: &DependentToken,
        function: &str,
        args: Vec<Value>,
    ) -> Result<Value, RuntimeError> {
        self.ensure_registered(dependent)?;
        self.host.call(function, args).await
    }

    fn ensure_registered(&self, dependent: &DependentToken) -> Result<(), RuntimeError> {
        let state = self.state.lock();
        if state.closed {
            return Err(RuntimeError::Closed);
        }
        if !state.initialized {
            return Err(RuntimeError::NotInitialized);
        }
        if !state.dependents.contains_key(&dependent.id) {
            return Err(RuntimeError::NotRegistered(dependent.label));
        }
        Ok(())
    }
}
