//! Fakes shared by the unit tests of interpreter-backed backends.

use std::{
    fs,
    path::Path,
    sync::{
        atomic::{AtomicBool, AtomicUsize, Ordering},
        Arc,
    },
    time::Duration,
};

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::Value;
use tokio_util::sync::CancellationToken;

use super::{InterpreterHost, RuntimeManager};
use crate::{
    core::error::{DownloadError, ProvisioningError, RuntimeError},
    environment::{
        CommandOutput, EnvironmentConfig, EnvironmentService, Platform, ProcessRunner,
        ProcessSpec, BASE_ENVIRONMENT,
    },
    models::{Downloader, RetryPolicy},
};

type CallHandler = Box<dyn Fn(&str, &[Value]) -> Result<Value, RuntimeError> + Send + Sync>;

pub struct ScriptedHost {
    pub initializations: AtomicUsize,
    pub shutdowns: AtomicUsize,
    alive: AtomicBool,
    pub fail_exec: AtomicBool,
    pub execs: Mutex<Vec<String>>,
    pub calls: Mutex<Vec<(String, Vec<Value>)>>,
    handler: CallHandler,
}

impl ScriptedHost {
    pub fn new(
        handler: impl Fn(&str, &[Value]) -> Result<Value, RuntimeError> + Send + Sync + 'static,
    ) -> Arc<Self> {
        Arc::new(Self {
            initializations: AtomicUsize::new(0),
            shutdowns: AtomicUsize::new(0),
            alive: AtomicBool::new(false),
            fail_exec: AtomicBool::new(false),
            execs: Mutex::new(Vec::new()),
            calls: Mutex::new(Vec::new()),
            handler: Box::new(handler),
        })
    }
}

#[async_trait]
impl InterpreterHost for ScriptedHost {
    async fn initialize(&self) -> anyhow::Result<()> {
        self.initializations.fetch_add(1, Ordering::SeqCst);
        self.alive.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn shutdown(&self) {
        self.shutdowns.fetch_add(1, Ordering::SeqCst);
        self.alive.store(false, Ordering::SeqCst);
    }

    fn is_alive(&self) -> bool {
        self.alive.load(Ordering::SeqCst)
    }

    async fn exec(&self, source: &str) -> Result<(), RuntimeError> {
        self.execs.lock().push(source.to_string());
        if self.fail_exec.load(Ordering::SeqCst) {
            return Err(RuntimeError::Call("ModuleNotFoundError: no module".into()));
        }
        Ok(())
    }

    async fn call(&self, function: &str, args: Vec<Value>) -> Result<Value, RuntimeError> {
        let result = (self.handler)(function, &args);
        self.calls.lock().push((function.to_string(), args));
        result
    }
}

#[derive(Default)]
pub struct RecordingRunner {
    pub specs: Mutex<Vec<ProcessSpec>>,
}

#[async_trait]
impl ProcessRunner for RecordingRunner {
    async fn run(
        &self,
        spec: &ProcessSpec,
        _cancel: &CancellationToken,
    ) -> Result<CommandOutput, ProvisioningError> {
        self.specs.lock().push(spec.clone());
        Ok(CommandOutput {
            stdout: String::new(),
            stderr: String::new(),
            exit_code: Some(0),
        })
    }
}

struct OfflineDownloader;

#[async_trait]
impl Downloader for OfflineDownloader {
    async fn download_file(&self, url: &str, _destination: &Path) -> Result<(), DownloadError> {
        Err(DownloadError::Status {
            url: url.to_string(),
            status: 503,
        })
    }
}

pub fn installed_environment(dir: &Path) -> (Arc<EnvironmentService>, Arc<RecordingRunner>) {
    let root = dir.join("miniconda");
    fs::create_dir_all(root.join("bin")).unwrap();
    fs::write(root.join("bin").join("conda"), b"").unwrap();
    let runner = Arc::new(RecordingRunner::default());
    let config = EnvironmentConfig {
        root,
        downloads: dir.join("downloads"),
        default_environment: BASE_ENVIRONMENT.into(),
        retry: RetryPolicy::new(1, Duration::from_millis(1)),
    };
    let service = EnvironmentService::new(config, Arc::new(OfflineDownloader), runner.clone())
        .with_platform(Platform::new("linux", "x86_64"));
    (Arc::new(service), runner)
}

pub fn runtime(host: Arc<ScriptedHost>) -> Arc<RuntimeManager> {
    Arc::new(RuntimeManager::new(host))
}
