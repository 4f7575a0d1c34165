use std::{
    fs::{self, File},
    path::{Path, PathBuf},
};

use anyhow::{Context, Result};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

use super::metadata::{compute_sha256, total_size};

const MANIFEST_FILE: &str = "manifest.json";

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "kebab-case")]
pub enum ModelKind {
    OpticalCharacterRecognition,
    TextClassifier,
    TextTranslator,
    TextToSpeech,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "kebab-case")]
pub enum ModelRuntime {
    Tesseract,
    FastText,
    NllbPyTorch,
    KokoroTts,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "kebab-case")]
pub enum ModelSource {
    DirectDownload,
    HuggingFace,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ModelDescriptor {
    pub name: String,
    pub url: String,
    pub folder: String,
    pub kind: ModelKind,
    pub runtime: ModelRuntime,
    pub source: ModelSource,
}

impl ModelDescriptor {
    #[must_use]
    pub fn path(&self, base_dir: &Path) -> PathBuf {
        base_dir.join(&self.folder).join(&self.name)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub enum ModelStatus {
    NotInstalled,
    Installed,
    Error(String),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModelRecord {
    pub name: String,
    pub folder: String,
    pub status: ModelStatus,
    #[serde(default)]
    pub size_bytes: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub checksum: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub installed_at: Option<OffsetDateTime>,
}

pub struct ModelManager {
    root: PathBuf,
    manifest: PathBuf,
    records: RwLock<Vec<ModelRecord>>,
}

impl ModelManager {
    pub fn new(root: PathBuf) -> Result<Self> {
        fs::create_dir_all(&root)
            .with_context(|| format!("create model directory {}", root.display()))?;
        let manifest = root.join(MANIFEST_FILE);
        let records = load_manifest(&manifest)?;
        Ok(Self {
            root,
            manifest,
            records: RwLock::new(records),
        })
    }

    pub fn root(&self) -> &Path {
        self.root.as_path()
    }

    #[must_use]
    pub fn path(&self, descriptor: &ModelDescriptor) -> PathBuf {
        descriptor.path(&self.root)
    }

    #[must_use]
    pub fn folder(&self, folder: &str) -> PathBuf {
        self.root.join(folder)
    }

    pub fn is_available(&self, descriptor: &ModelDescriptor) -> bool {
        self.path(descriptor).exists()
    }

    pub fn status(&self, descriptor: &ModelDescriptor) -> ModelStatus {
        if self.is_available(descriptor) {
            return ModelStatus::Installed;
        }
        self.records
            .read()
            .iter()
            .find(|record| record.name == descriptor.name && record.folder == descriptor.folder)
            .map(|record| match &record.status {
                // file removed behind our back
                ModelStatus::Installed => ModelStatus::NotInstalled,
                other => other.clone(),
            })
            .unwrap_or(ModelStatus::NotInstalled)
    }

    pub fn records(&self) -> Vec<ModelRecord> {
        self.records.read().clone()
    }

    pub fn record_installed(&self, descriptor: &ModelDescriptor) -> Result<ModelRecord> {
        let path = self.path(descriptor);
        let checksum = if path.is_file() {
            Some(compute_sha256(&path)?)
        } else {
            None
        };
        let record = ModelRecord {
            name: descriptor.name.clone(),
            folder: descriptor.folder.clone(),
            status: ModelStatus::Installed,
            size_bytes: total_size(&path),
            checksum,
            installed_at: Some(OffsetDateTime::now_utc()),
        };
        self.upsert(record.clone())?;
        Ok(record)
    }

    pub fn record_failure(&self, descriptor: &ModelDescriptor, message: String) -> Result<()> {
        self.upsert(ModelRecord {
            name: descriptor.name.clone(),
            folder: descriptor.folder.clone(),
            status: ModelStatus::Error(message),
            size_bytes: 0,
            checksum: None,
            installed_at: None,
        })
    }

    pub fn uninstall(&self, descriptor: &ModelDescriptor) -> Result<bool> {
        let path = self.path(descriptor);
        let existed = path.exists();
        if path.is_dir() {
            fs::remove_dir_all(&path)
                .with_context(|| format!("remove model directory {}", path.display()))?;
        } else if existed {
            fs::remove_file(&path)
                .with_context(|| format!("remove model file {}", path.display()))?;
        }
        let mut records = self.records.write();
        records.retain(|record| {
            !(record.name == descriptor.name && record.folder == descriptor.folder)
        });
        save_manifest(&self.manifest, &records)?;
        Ok(existed)
    }

    fn upsert(&self, record: ModelRecord) -> Result<()> {
        let mut records = self.records.write();
        if let Some(existing) = records
            .iter_mut()
            .find(|current| current.name == record.name && current.folder == record.folder)
        {
            *existing = record;
        } else {
            records.push(record);
        }
        save_manifest(&self.manifest, &records)
    }
}

fn load_manifest(path: &Path) -> Result<Vec<ModelRecord>> {
    if !path.exists() {
        return Ok(Vec::new());
    }
    let manifest = File::open(path).context("open model manifest")?;
    match serde_json::from_reader(manifest) {
        Ok(records) => Ok(records),
        Err(error) => {
            tracing::warn!("Ignoring unreadable model manifest {}: {error}", path.display());
            Ok(Vec::new())
        }
    }
}

fn save_manifest(path: &Path, records: &[ModelRecord]) -> Result<()> {
    let manifest = File::create(path).context("create model manifest")?;
    serde_json::to_writer_pretty(manifest, records).context("write model manifest")?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn descriptor(name: &str) -> ModelDescriptor {
        ModelDescriptor {
            name: name.into(),
            url: format!("https://example.invalid/{name}"),
            folder: "tesseract".into(),
            kind: ModelKind::OpticalCharacterRecognition,
            runtime: ModelRuntime::Tesseract,
            source: ModelSource::DirectDownload,
        }
    }

    #[test]
    fn availability_follows_the_file() {
        let dir = tempfile::tempdir().unwrap();
        let manager = ModelManager::new(dir.path().to_path_buf()).unwrap();
        let eng = descriptor("eng.traineddata");

        assert!(!manager.is_available(&eng));
        assert_eq!(manager.status(&eng), ModelStatus::NotInstalled);

        fs::create_dir_all(dir.path().join("tesseract")).unwrap();
        fs::write(manager.path(&eng), b"abc").unwrap();
        assert!(manager.is_available(&eng));
        assert_eq!(manager.status(&eng), ModelStatus::Installed);
    }

    #[test]
    fn manifest_survives_reload() {
        let dir = tempfile::tempdir().unwrap();
        let eng = descriptor("eng.traineddata");
        let fra = descriptor("fra.traineddata");
        {
            let manager = ModelManager::new(dir.path().to_path_buf()).unwrap();
            fs::create_dir_all(dir.path().join("tesseract")).unwrap();
            fs::write(manager.path(&eng), b"abc").unwrap();
            let record = manager.record_installed(&eng).unwrap();
            assert_eq!(record.size_bytes, 3);
            assert!(record.checksum.is_some());
            manager.record_failure(&fra, "status 404".into()).unwrap();
        }

        let manager = ModelManager::new(dir.path().to_path_buf()).unwrap();
        assert_eq!(manager.records().len(), 2);
        assert_eq!(manager.status(&fra), ModelStatus::Error("status 404".into()));

        assert!(manager.uninstall(&eng).unwrap());
        assert!(!manager.is_available(&eng));
        assert_eq!(manager.records().len(), 1);
    }

    #[test]
    fn corrupt_manifest_starts_empty() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join(MANIFEST_FILE), b"{not json").unwrap();
        let manager = ModelManager::new(dir.path().to_path_buf()).unwrap();
        assert!(manager.records().is_empty());
    }
}
