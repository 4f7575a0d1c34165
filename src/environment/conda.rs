use std::{
    collections::{BTreeSet, HashMap},
    path::{Path, PathBuf},
    sync::Arc,
};

use parking_lot::Mutex;
use tokio::sync::Mutex as AsyncMutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::{
    platform::Platform,
    process::{split_command_line, CommandOutput, ProcessRunner, ProcessSpec},
    InstallInstruction,
};
use crate::{
    core::error::{DownloadError, ProvisioningError},
    models::{download_with_retry, Downloader, RetryPolicy},
};

pub const BASE_ENVIRONMENT: &str = "base";

#[derive(Debug, Clone)]
pub struct EnvironmentConfig {
    pub root: PathBuf,
    pub downloads: PathBuf,
    pub default_environment: String,
    pub retry: RetryPolicy,
}

pub struct EnvironmentService {
    config: EnvironmentConfig,
    platform: Platform,
    downloader: Arc<dyn Downloader>,
    runner: Arc<dyn ProcessRunner>,
    installing: AsyncMutex<()>,
    packages: Mutex<HashMap<String, BTreeSet<String>>>,
}

impl EnvironmentService {
    pub fn new(
        config: EnvironmentConfig,
        downloader: Arc<dyn Downloader>,
        runner: Arc<dyn ProcessRunner>,
    ) -> Self {
        Self {
            config,
            platform: Platform::current(),
            downloader,
            runner,
            installing: AsyncMutex::new(()),
            packages: Mutex::new(HashMap::new()),
        }
    }

    #[must_use]
    pub fn with_platform(mut self, platform: Platform) -> Self {
        self.platform = platform;
        self
    }

    pub fn root(&self) -> &Path {
        &self.config.root
    }

    pub fn default_environment(&self) -> &str {
        &self.config.default_environment
    }

    pub fn platform(&self) -> Platform {
        self.platform
    }

    pub fn conda_executable(&self) -> PathBuf {
        self.platform.conda_executable(&self.config.root)
    }

    pub fn is_installed(&self) -> bool {
        self.conda_executable().is_file()
    }

    pub fn environment_prefix(&self, environment: Option<&str>) -> PathBuf {
        let name = self.environment_name(environment);
        if name == BASE_ENVIRONMENT {
            self.config.root.clone()
        } else {
            self.config.root.join("envs").join(name)
        }
    }

    pub fn environment_exists(&self, environment: &str) -> bool {
        if !self.is_installed() {
            return false;
        }
        let name = self.environment_name(Some(environment));
        name == BASE_ENVIRONMENT || self.environment_prefix(Some(name)).join("conda-meta").is_dir()
    }

    pub fn python_executable(&self, environment: Option<&str>) -> PathBuf {
        self.platform
            .python_executable(&self.environment_prefix(environment))
    }

    pub fn pip_executable(&self, environment: Option<&str>) -> PathBuf {
        self.platform.pip_executable(&self.environment_prefix(environment))
    }

    pub fn binary_dirs(&self, environment: Option<&str>) -> Vec<PathBuf> {
        self.platform.binary_dirs(&self.environment_prefix(environment))
    }

    pub fn python_library_path(
        &self,
        environment: Option<&str>,
    ) -> Result<PathBuf, ProvisioningError> {
        let prefix = self.environment_prefix(environment);
        self.platform
            .find_python_library(&prefix)
            .ok_or(ProvisioningError::LibraryMissing(prefix))
    }

    pub fn installed_packages(&self, environment: Option<&str>) -> BTreeSet<String> {
        let name = self.environment_name(environment);
        self.packages.lock().get(name).cloned().unwrap_or_default()
    }

    pub async fn install_base(&self, cancel: &CancellationToken) -> Result<(), ProvisioningError> {
        let _installing = tokio::select! {
            guard = self.installing.lock() => guard,
            _ = cancel.cancelled() => return Err(ProvisioningError::Cancelled),
        };
        if self.is_installed() {
            debug!(root = %self.config.root.display(), "package manager already installed");
            return Ok(());
        }

        let url = self.platform.installer_url()?;
        let installer = self
            .config
            .downloads
            .join(self.platform.installer_file_name());
        info!(%url, "downloading package manager installer");
        download_with_retry(
            self.downloader.as_ref(),
            &url,
            &installer,
            self.config.retry,
            cancel,
        )
        .await
        .map_err(|error| match error {
            DownloadError::Cancelled => ProvisioningError::Cancelled,
            other => ProvisioningError::InstallerDownload(other),
        })?;

        let outcome = self.run_installer(&installer, cancel).await;
        if let Err(error) = tokio::fs::remove_file(&installer).await {
            warn!(path = %installer.display(), "failed to remove installer: {error}");
        }
        outcome?;

        let executable = self.conda_executable();
        if !executable.is_file() {
            return Err(ProvisioningError::ExecutableMissing(executable));
        }
        self.packages
            .lock()
            .entry(BASE_ENVIRONMENT.to_string())
            .or_default();
        info!(root = %self.config.root.display(), "package manager installed");
        Ok(())
    }

    async fn run_installer(
        &self,
        installer: &Path,
        cancel: &CancellationToken,
    ) -> Result<CommandOutput, ProvisioningError> {
        let root = &self.config.root;
        // the installer refuses to write into an existing directory
        if root.exists() {
            warn!(root = %root.display(), "removing incomplete installation");
            tokio::fs::remove_dir_all(root).await?;
        }
        if let Some(parent) = root.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let spec = self.platform.installer_invocation(installer, root);
        self.run_checked(spec, cancel).await
    }

    pub async fn create_environment(
        &self,
        name: &str,
        python_version: Option<&str>,
        cancel: &CancellationToken,
    ) -> Result<(), ProvisioningError> {
        self.ensure_installed()?;
        if self.environment_exists(name) {
            debug!(env = name, "environment already exists");
            return Ok(());
        }

        let python = python_version
            .map(|version| format!("python={version}"))
            .unwrap_or_else(|| "python".to_string());
        let spec = ProcessSpec::new(self.conda_executable())
            .args(["create", "-n", name])
            .arg(python)
            .arg("-y");
        self.run_checked(spec, cancel).await?;

        if !self.environment_exists(name) {
            return Err(ProvisioningError::EnvironmentMissing(name.to_string()));
        }
        info!(env = name, "environment created");
        Ok(())
    }

    // one package per invocation, stopping at the first failure
    pub async fn install_packages_via_index<P: AsRef<str>>(
        &self,
        packages: &[P],
        environment: Option<&str>,
        cancel: &CancellationToken,
    ) -> Result<(), ProvisioningError> {
        if packages.is_empty() {
            return Err(ProvisioningError::NoPackages);
        }
        let environment = self.resolve_environment(environment)?;
        let pip = self.pip_executable(Some(&environment));

        for package in packages {
            let package = package.as_ref();
            let spec = self
                .activated(ProcessSpec::new(&pip), &environment)
                .args(["install", package, "--quiet"]);
            self.run_checked(spec, cancel).await?;
            self.record(&environment, [package]);
            info!(env = %environment, package, "installed package from index");
        }
        Ok(())
    }

    // every instruction is attempted; the first failure is returned
    pub async fn install_packages_via_channel(
        &self,
        instructions: &[InstallInstruction],
        environment: Option<&str>,
        cancel: &CancellationToken,
    ) -> Result<(), ProvisioningError> {
        if instructions.iter().all(|instruction| instruction.packages.is_empty()) {
            return Err(ProvisioningError::NoPackages);
        }
        let environment = self.resolve_environment(environment)?;
        let conda = self.conda_executable();

        let mut first_failure = None;
        for instruction in instructions {
            if instruction.packages.is_empty() {
                warn!(channel = %instruction.channel, "skipping instruction without packages");
                continue;
            }
            let spec = self
                .activated(ProcessSpec::new(&conda), &environment)
                .args(instruction.arguments(&environment));
            match self.run_checked(spec, cancel).await {
                Ok(_) => {
                    self.record(&environment, instruction.packages.iter());
                    info!(
                        env = %environment,
                        channel = %instruction.channel,
                        "installed packages from channel"
                    );
                }
                Err(ProvisioningError::Cancelled) => return Err(ProvisioningError::Cancelled),
                Err(error) => {
                    warn!(
                        env = %environment,
                        channel = %instruction.channel,
                        exit_code = ?error.exit_code(),
                        "channel install failed: {error}"
                    );
                    first_failure.get_or_insert(error);
                }
            }
        }
        first_failure.map_or(Ok(()), Err)
    }

    pub async fn install_package_via_channel(
        &self,
        instruction: &InstallInstruction,
        environment: Option<&str>,
        cancel: &CancellationToken,
    ) -> Result<(), ProvisioningError> {
        self.install_packages_via_channel(std::slice::from_ref(instruction), environment, cancel)
            .await
    }

    pub async fn execute_command(
        &self,
        command: &str,
        environment: Option<&str>,
        cancel: &CancellationToken,
    ) -> Result<CommandOutput, ProvisioningError> {
        let argv = split_command_line(command);
        if argv.is_empty() {
            return Err(ProvisioningError::EmptyCommand);
        }
        let environment = self.resolve_environment(environment)?;
        let spec = self
            .activated(ProcessSpec::new(self.conda_executable()), &environment)
            .args(["run", "-n", environment.as_str()])
            .args(argv);
        self.run_checked(spec, cancel).await
    }

    fn environment_name<'a>(&'a self, environment: Option<&'a str>) -> &'a str {
        match environment.map(str::trim) {
            Some(name) if !name.is_empty() => name,
            _ => self.config.default_environment.as_str(),
        }
    }

    fn ensure_installed(&self) -> Result<(), ProvisioningError> {
        if self.is_installed() {
            Ok(())
        } else {
            Err(ProvisioningError::NotInstalled(self.config.root.clone()))
        }
    }

    fn resolve_environment(&self, environment: Option<&str>) -> Result<String, ProvisioningError> {
        self.ensure_installed()?;
        let name = self.environment_name(environment);
        if !self.environment_exists(name) {
            return Err(ProvisioningError::EnvironmentMissing(name.to_string()));
        }
        Ok(name.to_string())
    }

    fn activated(&self, spec: ProcessSpec, environment: &str) -> ProcessSpec {
        spec.env("CONDA_DEFAULT_ENV", environment).env(
            "CONDA_PREFIX",
            self.environment_prefix(Some(environment))
                .display()
                .to_string(),
        )
    }

    fn record<I, P>(&self, environment: &str, packages: I)
    where
        I: IntoIterator<Item = P>,
        P: AsRef<str>,
    {
        let mut guard = self.packages.lock();
        let installed = guard.entry(environment.to_string()).or_default();
        installed.extend(packages.into_iter().map(|package| package.as_ref().to_string()));
    }

    async fn run_checked(
        &self,
        spec: ProcessSpec,
        cancel: &CancellationToken,
    ) -> Result<CommandOutput, ProvisioningError> {
        debug!(command = %spec, "running");
        let output = self.runner.run(&spec, cancel).await?;
        debug!(command = %spec, exit_code = ?output.exit_code, "finished");
        output.into_result(&spec)
    }
}
