use std::{io, path::PathBuf};

use thiserror::Error;

use crate::orchestrator::Capability;

pub type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Debug, Error)]
pub enum ProvisioningError {
    #[error("package manager is not installed at {0}")]
    NotInstalled(PathBuf),
    #[error("environment `{0}` does not exist")]
    EnvironmentMissing(String),
    #[error("no installer available for platform {os}/{arch}")]
    UnsupportedPlatform { os: String, arch: String },
    #[error("installer download failed: {0}")]
    InstallerDownload(#[source] DownloadError),
    #[error("installer finished but {0} was not found")]
    ExecutableMissing(PathBuf),
    #[error("no packages requested")]
    NoPackages,
    #[error("empty command")]
    EmptyCommand,
    #[error("`{command}` exited with {}: {}", describe_exit(.exit_code), diagnostic(.stdout, .stderr))]
    CommandFailed {
        command: String,
        exit_code: Option<i32>,
        stdout: String,
        stderr: String,
    },
    #[error("failed to launch {program}")]
    Spawn {
        program: String,
        #[source]
        source: io::Error,
    },
    #[error("python shared library not found under {0}")]
    LibraryMissing(PathBuf),
    #[error("cancelled")]
    Cancelled,
    #[error(transparent)]
    Io(#[from] io::Error),
}

impl ProvisioningError {
    #[must_use]
    pub fn exit_code(&self) -> Option<i32> {
        match self {
            Self::CommandFailed { exit_code, .. } => *exit_code,
            _ => None,
        }
    }
}

fn describe_exit(code: &Option<i32>) -> String {
    code.map_or_else(|| "no exit code".to_string(), |code| format!("exit code {code}"))
}

fn diagnostic(stdout: &str, stderr: &str) -> String {
    let stderr = stderr.trim();
    if stderr.is_empty() {
        stdout.trim().to_string()
    } else {
        stderr.to_string()
    }
}

#[derive(Debug, Error)]
pub enum RuntimeError {
    #[error("interpreter initialization failed: {0:#}")]
    Initialization(anyhow::Error),
    #[error("interpreter is not initialized")]
    NotInitialized,
    #[error("caller `{0}` is not a registered runtime dependent")]
    NotRegistered(&'static str),
    #[error("interpreter call failed: {0}")]
    Call(String),
    #[error("interpreter bridge broke: {0:#}")]
    Bridge(anyhow::Error),
    #[error("runtime manager has been closed")]
    Closed,
    #[error("cancelled")]
    Cancelled,
}

#[derive(Debug, Error)]
pub enum LoadError {
    #[error("model `{name}` is not available at {}", path.display())]
    MissingModel { name: String, path: PathBuf },
    #[error(transparent)]
    Provisioning(#[from] ProvisioningError),
    #[error(transparent)]
    Runtime(#[from] RuntimeError),
    #[error(transparent)]
    Download(#[from] DownloadError),
    #[error("cancelled")]
    Cancelled,
    #[error("{0:#}")]
    Failed(anyhow::Error),
}

impl From<anyhow::Error> for LoadError {
    fn from(error: anyhow::Error) -> Self {
        Self::Failed(error)
    }
}

#[derive(Debug, Error)]
pub enum DownloadError {
    #[error("download url is empty")]
    EmptyUrl,
    #[error("download destination is empty")]
    EmptyDestination,
    #[error("request to {url} failed")]
    Http {
        url: String,
        #[source]
        source: reqwest::Error,
    },
    #[error("{url} answered with status {status}")]
    Status { url: String, status: u16 },
    #[error("writing {}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("checksum mismatch for {}: expected {expected}, got {actual}", path.display())]
    Checksum {
        path: PathBuf,
        expected: String,
        actual: String,
    },
    #[error("cancelled")]
    Cancelled,
}

#[derive(Debug, Error)]
pub enum OrchestratorError {
    #[error("{0} orchestrator has been disposed")]
    Disposed(Capability),
    #[error("no active {0} backend")]
    NoActiveBackend(Capability),
    #[error("no {capability} backend registered for `{backend}`")]
    UnknownBackend {
        capability: Capability,
        backend: String,
    },
    #[error("constructing {capability} backend `{backend}` failed: {source:#}")]
    Construction {
        capability: Capability,
        backend: String,
        source: anyhow::Error,
    },
    #[error("loading {capability} backend `{backend}` failed")]
    Load {
        capability: Capability,
        backend: String,
        #[source]
        source: LoadError,
    },
    #[error("switch of {0} backend cancelled")]
    Cancelled(Capability),
}

#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Provisioning(#[from] ProvisioningError),
    #[error(transparent)]
    Runtime(#[from] RuntimeError),
    #[error(transparent)]
    Load(#[from] LoadError),
    #[error(transparent)]
    Download(#[from] DownloadError),
    #[error(transparent)]
    Orchestrator(#[from] OrchestratorError),
    #[error("{capability} operation failed: {source:#}")]
    Backend {
        capability: Capability,
        source: anyhow::Error,
    },
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}
