use std::{
    fs,
    path::{Path, PathBuf},
    time::Duration,
};

use anyhow::{Context, Result};
use directories::ProjectDirs;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

use crate::{
    classifier::ClassifierKind, environment::BASE_ENVIRONMENT, language::Language,
    models::ModelDescriptor, models::RetryPolicy, ocr::OcrEngine, translation::TranslatorKind,
    tts::TtsKind,
};

const CONFIG_FILE: &str = "config.json";
pub const DATA_DIR_ENV: &str = "DESKTOP_EYE_DATA_DIR";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct AppConfig {
    pub local_data_dir: Option<PathBuf>,
    pub setup_finished: bool,
    pub setup_completed_at: Option<OffsetDateTime>,
    pub ocr_engine: OcrEngine,
    pub classifier: ClassifierKind,
    pub translator: TranslatorKind,
    pub tts: TtsKind,
    pub ocr_languages: Vec<Language>,
    pub environment_name: String,
    pub download_attempts: u32,
    pub download_retry_delay_ms: u64,
    pub interpreter_shutdown_timeout_ms: u64,
    pub custom_models: Vec<ModelDescriptor>,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            local_data_dir: None,
            setup_finished: false,
            setup_completed_at: None,
            ocr_engine: OcrEngine::default(),
            classifier: ClassifierKind::default(),
            translator: TranslatorKind::default(),
            tts: TtsKind::default(),
            ocr_languages: vec![Language::English],
            environment_name: BASE_ENVIRONMENT.into(),
            download_attempts: 3,
            download_retry_delay_ms: 1000,
            interpreter_shutdown_timeout_ms: 5000,
            custom_models: Vec::new(),
        }
    }
}

impl AppConfig {
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(
            self.download_attempts.max(1),
            Duration::from_millis(self.download_retry_delay_ms),
        )
    }

    pub fn interpreter_shutdown_timeout(&self) -> Duration {
        Duration::from_millis(self.interpreter_shutdown_timeout_ms)
    }

    // DESKTOP_EYE_DATA_DIR, then localDataDir, then the platform default
    pub fn resolve_data_dir(&self) -> Result<PathBuf> {
        if let Some(dir) = std::env::var_os(DATA_DIR_ENV).filter(|value| !value.is_empty()) {
            return Ok(PathBuf::from(dir));
        }
        if let Some(dir) = &self.local_data_dir {
            return Ok(dir.clone());
        }
        Ok(project_dirs()?.data_local_dir().to_path_buf())
    }
}

pub struct ConfigStore {
    path: PathBuf,
    inner: RwLock<AppConfig>,
}

impl ConfigStore {
    pub fn open() -> Result<Self> {
        let path = resolve_config_path()?;
        Self::at(path)
    }

    // a malformed file falls back to defaults
    pub fn at(path: PathBuf) -> Result<Self> {
        let config = match load_config(&path) {
            Ok(config) => config,
            Err(error) => {
                tracing::warn!("Failed to read {}: {error:?}", path.display());
                AppConfig::default()
            }
        };
        Ok(Self {
            path,
            inner: RwLock::new(config),
        })
    }

    pub fn path(&self) -> &Path {
        self.path.as_path()
    }

    pub fn read(&self) -> AppConfig {
        self.inner.read().clone()
    }

    pub fn write(&self, config: AppConfig) -> Result<()> {
        let mut guard = self.inner.write();
        *guard = config;
        persist_config(self.path.as_path(), &guard)
    }

    pub fn update(&self, change: impl FnOnce(&mut AppConfig)) -> Result<AppConfig> {
        let mut guard = self.inner.write();
        change(&mut guard);
        persist_config(self.path.as_path(), &guard)?;
        Ok(guard.clone())
    }

    pub fn mark_setup_finished(&self) -> Result<()> {
        let mut guard = self.inner.write();
        if guard.setup_finished {
            return Ok(());
        }
        guard.setup_finished = true;
        guard.setup_completed_at = Some(OffsetDateTime::now_utc());
        persist_config(self.path.as_path(), &guard)
    }
}

fn project_dirs() -> Result<ProjectDirs> {
    ProjectDirs::from("com", "DesktopEye", "DesktopEye").context("missing project directories")
}

fn resolve_config_path() -> Result<PathBuf> {
    let project_dirs = project_dirs()?;
    let dir = project_dirs.config_dir();
    fs::create_dir_all(dir).context("creating config directory failed")?;
    Ok(dir.join(CONFIG_FILE))
}

fn load_config(path: &Path) -> Result<AppConfig> {
    if !path.exists() {
        return Ok(AppConfig::default());
    }
    let bytes = fs::read(path).with_context(|| format!("failed reading {path:?}"))?;
    serde_json::from_slice(&bytes).context("config json could not be parsed")
}

fn persist_config(path: &Path, config: &AppConfig) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).with_context(|| format!("create dir {parent:?}"))?;
    }
    let serialized = serde_json::to_vec_pretty(config).context("serialize config to json failed")?;
    fs::write(path, serialized).with_context(|| format!("write config to {path:?}"))?;
    Ok(())
}
