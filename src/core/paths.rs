use std::{
    fs,
    path::{Path, PathBuf},
};

use anyhow::{Context, Result};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppPaths {
    pub data_dir: PathBuf,
    pub models: PathBuf,
    pub miniconda: PathBuf,
    pub downloads: PathBuf,
    pub cache: PathBuf,
}

impl AppPaths {
    pub fn new(data_dir: impl AsRef<Path>) -> Self {
        let data_dir = data_dir.as_ref().to_path_buf();
        Self {
            models: data_dir.join("models"),
            miniconda: data_dir.join("miniconda"),
            downloads: data_dir.join("downloads"),
            cache: data_dir.join("cache"),
            data_dir,
        }
    }

    // the installer insists on creating the distribution root itself
    pub fn ensure(&self) -> Result<()> {
        for dir in [&self.models, &self.downloads, &self.cache] {
            fs::create_dir_all(dir).with_context(|| format!("create {}", dir.display()))?;
        }
        Ok(())
    }
}
