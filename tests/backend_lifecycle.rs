use std::{
    fs,
    path::{Path, PathBuf},
    sync::{
        atomic::{AtomicBool, AtomicUsize, Ordering},
        Arc,
    },
    time::Duration,
};

use async_trait::async_trait;
use desktop_eye::{
    core::error::{DownloadError, Error, OrchestratorError, ProvisioningError, RuntimeError},
    environment::{CommandOutput, InstallInstruction, ProcessRunner, ProcessSpec},
    models::{Downloader, FASTTEXT_FOLDER, FASTTEXT_LIGHT_MODEL},
    orchestrator::Capability,
    runtime::{DependentToken, InterpreterHost, RuntimeManager},
    AppConfig, AppPaths, AppServices, ConfigStore, Language,
};
use parking_lot::Mutex;
use serde_json::{json, Value};
use tokio_util::sync::CancellationToken;

#[derive(Default)]
struct FakeHost {
    initializations: AtomicUsize,
    shutdowns: AtomicUsize,
    alive: AtomicBool,
    stall_exec: AtomicBool,
}

#[async_trait]
impl InterpreterHost for FakeHost {
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

    async fn exec(&self, _source: &str) -> Result<(), RuntimeError> {
        if self.stall_exec.load(Ordering::SeqCst) {
            tokio::time::sleep(Duration::from_secs(3600)).await;
        }
        Ok(())
    }

    async fn call(&self, function: &str, _args: Vec<Value>) -> Result<Value, RuntimeError> {
        Ok(json!(function))
    }
}

/// Plays the installer and package manager. Channels named `broken` fail.
#[derive(Default)]
struct FakeConda {
    runs: Mutex<Vec<ProcessSpec>>,
}

impl FakeConda {
    fn installer_runs(&self) -> usize {
        self.runs
            .lock()
            .iter()
            .filter(|spec| installer_target(spec).is_some())
            .count()
    }

    fn channel_installs(&self) -> Vec<Vec<String>> {
        self.runs
            .lock()
            .iter()
            .filter(|spec| spec.args.first().map(String::as_str) == Some("install"))
            .filter(|spec| spec.args.iter().any(|arg| arg == "-c"))
            .map(|spec| spec.args.clone())
            .collect()
    }
}

fn installer_target(spec: &ProcessSpec) -> Option<PathBuf> {
    if let Some(position) = spec.args.iter().position(|arg| arg == "-p") {
        return spec.args.get(position + 1).map(PathBuf::from);
    }
    spec.args
        .iter()
        .find_map(|arg| arg.strip_prefix("/D="))
        .map(PathBuf::from)
}

fn conda_at(root: &Path) -> PathBuf {
    if cfg!(windows) {
        root.join("Scripts").join("conda.exe")
    } else {
        root.join("bin").join("conda")
    }
}

fn exited(code: i32, stdout: &str, stderr: &str) -> CommandOutput {
    CommandOutput {
        stdout: stdout.into(),
        stderr: stderr.into(),
        exit_code: Some(code),
    }
}

#[async_trait]
impl ProcessRunner for FakeConda {
    async fn run(
        &self,
        spec: &ProcessSpec,
        _cancel: &CancellationToken,
    ) -> Result<CommandOutput, ProvisioningError> {
        self.runs.lock().push(spec.clone());
        if let Some(target) = installer_target(spec) {
            let conda = conda_at(&target);
            fs::create_dir_all(conda.parent().unwrap()).unwrap();
            fs::write(&conda, b"").unwrap();
            return Ok(exited(0, "installation finished.", ""));
        }
        let args: Vec<&str> = spec.args.iter().map(String::as_str).collect();
        Ok(match args.as_slice() {
            ["run", "-n", _, "python", "--version"] => exited(0, "Python 3.11.9\n", ""),
            ["install", rest @ ..]
                if rest.windows(2).any(|pair| pair[0] == "-c" && pair[1] == "broken") =>
            {
                exited(1, "", "PackagesNotFoundError: not available from channels")
            }
            _ => exited(0, "", ""),
        })
    }
}

#[derive(Default)]
struct FakeDownloader {
    downloads: AtomicUsize,
}

#[async_trait]
impl Downloader for FakeDownloader {
    async fn download_file(&self, _url: &str, destination: &Path) -> Result<(), DownloadError> {
        self.downloads.fetch_add(1, Ordering::SeqCst);
        let written = destination
            .parent()
            .map_or(Ok(()), fs::create_dir_all)
            .and_then(|()| fs::write(destination, b"#!/bin/sh\n"));
        written.map_err(|source| DownloadError::Io {
            path: destination.to_path_buf(),
            source,
        })
    }
}

struct Harness {
    _dir: tempfile::TempDir,
    services: AppServices,
    host: Arc<FakeHost>,
    conda: Arc<FakeConda>,
    downloader: Arc<FakeDownloader>,
}

fn harness() -> Harness {
    let dir = tempfile::tempdir().unwrap();
    let config = Arc::new(ConfigStore::at(dir.path().join("config.json")).unwrap());
    config
        .write(AppConfig {
            download_attempts: 1,
            download_retry_delay_ms: 1,
            ..AppConfig::default()
        })
        .unwrap();
    let host = Arc::new(FakeHost::default());
    let conda = Arc::new(FakeConda::default());
    let downloader = Arc::new(FakeDownloader::default());

    let interpreter = host.clone();
    let services = AppServices::assemble(
        config,
        AppPaths::new(dir.path().join("data")),
        downloader.clone(),
        conda.clone(),
        move |_| {
            let host: Arc<dyn InterpreterHost> = interpreter;
            host
        },
    )
    .unwrap();

    Harness {
        _dir: dir,
        services,
        host,
        conda,
        downloader,
    }
}

#[tokio::test]
async fn runtime_survives_until_the_last_dependent_leaves() {
    let harness = harness();
    let runtime: &RuntimeManager = harness.services.runtime();
    let cancel = CancellationToken::new();
    let first = DependentToken::new("first");
    let second = DependentToken::new("second");

    runtime.start_runtime(&first, &cancel).await.unwrap();
    runtime.start_runtime(&second, &cancel).await.unwrap();
    runtime.stop_runtime(&first).await;
    assert!(runtime.is_runtime_initialized());
    assert_eq!(runtime.dependent_count(), 1);

    // a caller that never started is ignored
    let stranger = DependentToken::new("stranger");
    runtime.stop_runtime(&stranger).await;
    assert_eq!(runtime.dependent_count(), 1);

    runtime.stop_runtime(&second).await;
    assert!(!runtime.is_runtime_initialized());
    assert_eq!(harness.host.initializations.load(Ordering::SeqCst), 1);
    assert_eq!(harness.host.shutdowns.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn force_shutdown_then_restart() {
    let harness = harness();
    let runtime = harness.services.runtime();
    let cancel = CancellationToken::new();
    let holder = DependentToken::new("holder");

    runtime.start_runtime(&holder, &cancel).await.unwrap();
    runtime.force_shutdown().await;
    assert!(!runtime.is_runtime_initialized());
    assert_eq!(runtime.dependent_count(), 0);

    runtime.start_runtime(&holder, &cancel).await.unwrap();
    assert!(runtime.is_runtime_initialized());
    assert_eq!(harness.host.initializations.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn base_install_runs_once() {
    let harness = harness();
    let environment = harness.services.environment();
    let cancel = CancellationToken::new();
    assert!(!environment.is_installed());

    environment.install_base(&cancel).await.unwrap();
    environment.install_base(&cancel).await.unwrap();

    assert!(environment.is_installed());
    assert_eq!(harness.downloader.downloads.load(Ordering::SeqCst), 1);
    assert_eq!(harness.conda.installer_runs(), 1);
    assert!(harness.services.status().environment_installed);
}

#[tokio::test]
async fn channel_installs_attempt_every_channel() {
    let harness = harness();
    let environment = harness.services.environment();
    let cancel = CancellationToken::new();
    environment.install_base(&cancel).await.unwrap();

    let error = environment
        .install_packages_via_channel(
            &[
                InstallInstruction::new("conda-forge", ["tesseract"]),
                InstallInstruction::new("broken", ["leptonica"]),
                InstallInstruction::new("bioconda", ["numpy"]),
            ],
            None,
            &cancel,
        )
        .await
        .unwrap_err();

    assert!(matches!(error, ProvisioningError::CommandFailed { exit_code: Some(1), .. }));
    assert!(error.to_string().contains("PackagesNotFoundError"));
    let attempted = harness.conda.channel_installs();
    assert_eq!(attempted.len(), 3);
    assert!(attempted[0].contains(&"conda-forge".to_string()));
    let installed = environment.installed_packages(None);
    assert!(installed.contains("tesseract"));
    assert!(installed.contains("numpy"));
    assert!(!installed.contains("leptonica"));
}

#[tokio::test]
async fn commands_run_inside_the_environment() {
    let harness = harness();
    let environment = harness.services.environment();
    let cancel = CancellationToken::new();

    assert!(matches!(
        environment.execute_command("python --version", None, &cancel).await,
        Err(ProvisioningError::NotInstalled(_))
    ));

    environment.install_base(&cancel).await.unwrap();
    let output = environment
        .execute_command("python --version", None, &cancel)
        .await
        .unwrap();
    assert_eq!(output.stdout.trim(), "Python 3.11.9");
}

#[tokio::test]
async fn switching_backends_is_all_or_nothing() {
    let harness = harness();
    let services = &harness.services;
    let cancel = CancellationToken::new();

    let active = services
        .switch(Capability::Classifier, "script", true, &cancel)
        .await
        .unwrap();
    assert_eq!(active.backend, "script");

    // asking for the active type again keeps it and touches nothing
    services
        .switch(Capability::Classifier, "script", true, &cancel)
        .await
        .unwrap();
    assert_eq!(harness.host.initializations.load(Ordering::SeqCst), 0);

    // the fastText model is not on disk, so the switch fails and script stays
    let error = services
        .switch(Capability::Classifier, "fast-text", true, &cancel)
        .await
        .unwrap_err();
    assert!(matches!(
        error,
        Error::Orchestrator(OrchestratorError::Load { capability: Capability::Classifier, .. })
    ));
    assert_eq!(
        services.status().backends[1],
        (Capability::Classifier, Some("script".to_string()))
    );
    let classification = services
        .classify("Le chat est sur la table et il dort", &cancel)
        .await
        .unwrap();
    assert_eq!(classification.language, Language::French);
    assert!(!services.runtime().is_runtime_initialized());
}

#[tokio::test]
async fn backends_share_one_runtime() {
    let harness = harness();
    let services = &harness.services;
    let cancel = CancellationToken::new();
    services.environment().install_base(&cancel).await.unwrap();

    let folder = services.models().folder(FASTTEXT_FOLDER);
    fs::create_dir_all(&folder).unwrap();
    fs::write(folder.join(FASTTEXT_LIGHT_MODEL), b"ftz").unwrap();

    services
        .switch(Capability::Classifier, "fast-text", true, &cancel)
        .await
        .unwrap();
    services
        .switch(Capability::Translator, "nllb", true, &cancel)
        .await
        .unwrap();
    assert_eq!(services.runtime().dependent_count(), 2);
    assert_eq!(harness.host.initializations.load(Ordering::SeqCst), 1);

    // replacing the classifier drops one dependent; the translator keeps it up
    services
        .switch(Capability::Classifier, "script", true, &cancel)
        .await
        .unwrap();
    assert!(services.runtime().is_runtime_initialized());
    assert_eq!(services.runtime().dependent_count(), 1);

    services.shutdown().await;
    assert!(!services.runtime().is_runtime_initialized());
    assert_eq!(harness.host.shutdowns.load(Ordering::SeqCst), 1);
    assert!(matches!(
        services.classify("hello", &cancel).await,
        Err(Error::Orchestrator(OrchestratorError::Disposed(Capability::Classifier)))
    ));
}

#[tokio::test]
async fn abandoned_switch_releases_its_runtime_registration() {
    let harness = harness();
    let services = &harness.services;
    let cancel = CancellationToken::new();
    services.environment().install_base(&cancel).await.unwrap();

    // the translator registers with the runtime, then hangs in its setup
    harness.host.stall_exec.store(true, Ordering::SeqCst);
    let timed_out = tokio::time::timeout(
        Duration::from_millis(50),
        services.switch(Capability::Translator, "nllb", true, &cancel),
    )
    .await;
    assert!(timed_out.is_err());
    harness.host.stall_exec.store(false, Ordering::SeqCst);
    tokio::time::sleep(Duration::from_millis(50)).await;

    assert_eq!(services.runtime().dependent_count(), 0);
    assert!(!services.runtime().is_runtime_initialized());
    assert_eq!(harness.host.initializations.load(Ordering::SeqCst), 1);
    assert_eq!(harness.host.shutdowns.load(Ordering::SeqCst), 1);
    assert_eq!(services.status().backends[2], (Capability::Translator, None));
}
