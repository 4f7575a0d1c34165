use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};

use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use super::{DependentToken, RuntimeManager};
use crate::{
    core::error::{LoadError, ProvisioningError, RuntimeError},
    environment::EnvironmentService,
};

pub struct InterpreterBinding {
    runtime: Arc<RuntimeManager>,
    environment: Arc<EnvironmentService>,
    environment_name: String,
    token: DependentToken,
    attached: AtomicBool,
}

impl InterpreterBinding {
    pub fn new(
        runtime: Arc<RuntimeManager>,
        environment: Arc<EnvironmentService>,
        environment_name: impl Into<String>,
        label: &'static str,
    ) -> Self {
        Self {
            runtime,
            environment,
            environment_name: environment_name.into(),
            token: DependentToken::new(label),
            attached: AtomicBool::new(false),
        }
    }

    pub fn environment(&self) -> &EnvironmentService {
        &self.environment
    }

    pub fn is_attached(&self) -> bool {
        self.attached.load(Ordering::SeqCst) && self.runtime.is_registered(&self.token)
    }

    pub async fn provision(
        &self,
        packages: &[&str],
        cancel: &CancellationToken,
    ) -> Result<(), ProvisioningError> {
        self.environment.install_base(cancel).await?;
        let environment = Some(self.environment_name.as_str());
        let installed = self.environment.installed_packages(environment);
        let missing: Vec<&str> = packages
            .iter()
            .copied()
            .filter(|package| !installed.contains(*package))
            .collect();
        if missing.is_empty() {
            debug!(dependent = self.token.label(), "packages already provisioned");
            return Ok(());
        }
        self.environment
            .install_packages_via_index(missing.as_slice(), environment, cancel)
            .await
    }

    pub async fn attach(&self, cancel: &CancellationToken) -> Result<(), RuntimeError> {
        self.runtime.start_runtime(&self.token, cancel).await?;
        self.attached.store(true, Ordering::SeqCst);
        Ok(())
    }

    pub async fn release(&self) {
        if self.attached.swap(false, Ordering::SeqCst) {
            self.runtime.stop_runtime(&self.token).await;
        }
    }

    // any failure after attaching releases the runtime again
    pub async fn bring_up(
        &self,
        packages: &[&str],
        setup: &str,
        cancel: &CancellationToken,
    ) -> Result<(), LoadError> {
        self.provision(packages, cancel)
            .await
            .map_err(|error| match error {
                ProvisioningError::Cancelled => LoadError::Cancelled,
                other => LoadError::Provisioning(other),
            })?;
        self.attach(cancel).await.map_err(|error| match error {
            RuntimeError::Cancelled => LoadError::Cancelled,
            other => LoadError::Runtime(other),
        })?;
        if let Err(error) = self.exec(setup).await {
            self.release().await;
            return Err(error.into());
        }
        if cancel.is_cancelled() {
            self.release().await;
            return Err(LoadError::Cancelled);
        }
        Ok(())
    }

    pub async fn exec(&self, source: &str) -> Result<(), RuntimeError> {
        self.runtime.exec(&self.token, source).await
    }

    pub async fn call(&self, function: &str, args: Vec<Value>) -> Result<Value, RuntimeError> {
        self.runtime.call(&self.token, function, args).await
    }
}

pub fn python_string(value: &str) -> String {
    // JSON string escapes are a subset of Python's.
    serde_json::Value::String(value.to_string()).to_string()
}
