use std::{collections::HashMap, fmt, hash::Hash, sync::Arc};

use serde::Serialize;

use super::Capability;
use crate::core::error::OrchestratorError;

pub trait BackendKind:
    Copy + Eq + Hash + fmt::Debug + fmt::Display + Send + Sync + 'static
{
    const CAPABILITY: Capability;

    fn descriptor(&self) -> BackendDescriptor {
        BackendDescriptor {
            capability: Self::CAPABILITY,
            backend: self.to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "camelCase")]
pub struct BackendDescriptor {
    pub capability: Capability,
    pub backend: String,
}

type Factory<S> = Arc<dyn Fn() -> anyhow::Result<Arc<S>> + Send + Sync>;

pub struct BackendRegistry<S: ?Sized, K> {
    factories: HashMap<K, Factory<S>>,
}

impl<S: ?Sized, K: BackendKind> BackendRegistry<S, K> {
    pub fn new() -> Self {
        Self {
            factories: HashMap::new(),
        }
    }

    pub fn register<F>(&mut self, kind: K, factory: F) -> &mut Self
    where
        F: Fn() -> anyhow::Result<Arc<S>> + Send + Sync + 'static,
    {
        if self.factories.insert(kind, Arc::new(factory)).is_some() {
            tracing::debug!(
                capability = %K::CAPABILITY,
                backend = %kind,
                "replaced backend factory"
            );
        }
        self
    }

    #[must_use]
    pub fn with<F>(mut self, kind: K, factory: F) -> Self
    where
        F: Fn() -> anyhow::Result<Arc<S>> + Send + Sync + 'static,
    {
        self.register(kind, factory);
        self
    }

    pub fn contains(&self, kind: K) -> bool {
        self.factories.contains_key(&kind)
    }

    pub fn kinds(&self) -> Vec<K> {
        self.factories.keys().copied().collect()
    }

    pub fn create(&self, kind: K) -> Result<Arc<S>, OrchestratorError> {
        let factory =
            self.factories
                .get(&kind)
                .ok_or_else(|| OrchestratorError::UnknownBackend {
                    capability: K::CAPABILITY,
                    backend: kind.to_string(),
                })?;
        factory().map_err(|source| OrchestratorError::Construction {
            capability: K::CAPABILITY,
            backend: kind.to_string(),
            source,
        })
    }
}

impl<S: ?Sized, K: BackendKind> Default for BackendRegistry<S, K> {
    fn default() -> Self {
        Self::new()
    }
}
