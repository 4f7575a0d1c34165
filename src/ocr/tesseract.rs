use std::{
    path::{Path, PathBuf},
    sync::Arc,
};

use anyhow::{anyhow, bail, Context};
use async_trait::async_trait;
use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use super::{BoundingBox, OcrBackend, OcrResult, OcrWord};
use crate::{
    core::error::{LoadError, ProvisioningError},
    environment::{ProcessRunner, ProcessSpec},
    language::Language,
    models::{tesseract_descriptor, ModelManager, TESSERACT_FOLDER},
    orchestrator::Loadable,
};

const WORD_LEVEL: &str = "5";

pub struct TesseractOcr {
    binary: PathBuf,
    models: Arc<ModelManager>,
    runner: Arc<dyn ProcessRunner>,
    languages: Vec<Language>,
    loaded: Mutex<Option<Vec<String>>>,
}

impl TesseractOcr {
    pub fn new(
        binary: impl Into<PathBuf>,
        models: Arc<ModelManager>,
        runner: Arc<dyn ProcessRunner>,
        languages: Vec<Language>,
    ) -> Self {
        Self {
            binary: binary.into(),
            models,
            runner,
            languages,
            loaded: Mutex::new(None),
        }
    }

    fn tessdata_dir(&self) -> PathBuf {
        self.models.folder(TESSERACT_FOLDER)
    }

    fn has_trained_data(&self, code: &str) -> bool {
        self.models.is_available(&tesseract_descriptor(code))
    }

    fn requested_codes(&self, model: Option<&str>) -> Vec<String> {
        let codes: Vec<String> = match model {
            Some(model) => model
                .split('+')
                .map(str::trim)
                .filter(|code| !code.is_empty())
                .map(str::to_string)
                .collect(),
            None => self
                .languages
                .iter()
                .map(|language| language.tesseract_code().to_string())
                .collect(),
        };
        if codes.is_empty() {
            vec![Language::English.tesseract_code().to_string()]
        } else {
            codes
        }
    }

    fn codes_for(&self, languages: &[Language]) -> anyhow::Result<Vec<String>> {
        let loaded = self
            .loaded
            .lock()
            .clone()
            .ok_or_else(|| anyhow!("tesseract backend is not loaded"))?;
        if languages.is_empty() {
            return Ok(loaded);
        }
        let hinted: Vec<String> = languages
            .iter()
            .map(Language::tesseract_code)
            .filter(|code| self.has_trained_data(code))
            .map(str::to_string)
            .collect();
        if hinted.is_empty() {
            debug!(?languages, "no trained data for hinted languages, using loaded set");
            return Ok(loaded);
        }
        Ok(hinted)
    }
}

#[async_trait]
impl Loadable for TesseractOcr {
    async fn load_required(
        &self,
        model: Option<&str>,
        cancel: &CancellationToken,
    ) -> Result<(), LoadError> {
        if model.is_none() && self.is_loaded() {
            return Ok(());
        }

        let probe = ProcessSpec::new(&self.binary).arg("--version");
        let output = self
            .runner
            .run(&probe, cancel)
            .await
            .map_err(|error| match error {
                ProvisioningError::Cancelled => LoadError::Cancelled,
                other => LoadError::Provisioning(other),
            })?;
        let output = output.into_result(&probe)?;
        debug!(version = %output.combined().lines().next().unwrap_or_default(), "tesseract found");

        let codes = self.requested_codes(model);
        for code in &codes {
            let descriptor = tesseract_descriptor(code);
            if !self.models.is_available(&descriptor) {
                return Err(LoadError::MissingModel {
                    path: self.models.path(&descriptor),
                    name: descriptor.name,
                });
            }
        }

        info!(languages = %codes.join("+"), "tesseract ready");
        *self.loaded.lock() = Some(codes);
        Ok(())
    }

    fn is_loaded(&self) -> bool {
        self.loaded.lock().is_some()
    }

    async fn dispose(&self) {
        self.loaded.lock().take();
    }
}

#[async_trait]
impl OcrBackend for TesseractOcr {
    async fn recognize(
        &self,
        image: &Path,
        languages: &[Language],
        cancel: &CancellationToken,
    ) -> anyhow::Result<OcrResult> {
        if !image.is_file() {
            bail!("image {} does not exist", image.display());
        }
        let codes = self.codes_for(languages)?;
        let spec = ProcessSpec::new(&self.binary)
            .arg(image.to_string_lossy())
            .arg("stdout")
            .arg("--tessdata-dir")
            .arg(self.tessdata_dir().to_string_lossy())
            .arg("-l")
            .arg(codes.join("+"))
            .arg("tsv");
        let output = self
            .runner
            .run(&spec, cancel)
            .await?
            .into_result(&spec)
            .context("tesseract recognition failed")?;
        Ok(parse_tsv(&output.stdout))
    }
}

// lines are rebuilt from the page/block/paragraph/line numbering
pub fn parse_tsv(tsv: &str) -> OcrResult {
    let mut words = Vec::new();
    let mut lines: Vec<String> = Vec::new();
    let mut current_line: Option<(&str, &str, &str, &str)> = None;

    for row in tsv.lines() {
        let columns: Vec<&str> = row.splitn(12, '\t').collect();
        if columns.len() < 12 || columns[0] != WORD_LEVEL {
            continue;
        }
        let text = columns[11].trim();
        let Ok(confidence) = columns[10].trim().parse::<f32>() else {
            continue;
        };
        if text.is_empty() || confidence < 0.0 {
            continue;
        }

        let line = (columns[1], columns[2], columns[3], columns[4]);
        match lines.last_mut() {
            Some(last) if current_line == Some(line) => {
                last.push(' ');
                last.push_str(text);
            }
            _ => lines.push(text.to_string()),
        }
        current_line = Some(line);

        let number = |index: usize| columns[index].trim().parse::<u32>().unwrap_or(0);
        words.push(OcrWord {
            text: text.to_string(),
            bounds: BoundingBox {
                left: number(6),
                top: number(7),
                width: number(8),
                height: number(9),
            },
            confidence,
        });
    }

    let mean_confidence = if words.is_empty() {
        0.0
    } else {
        words.iter().map(|word| word.confidence).sum::<f32>() / words.len() as f32
    };

    OcrResult {
        text: lines.join("\n"),
        words,
        mean_confidence,
    }
}
