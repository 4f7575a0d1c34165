use std::{
    path::{Path, PathBuf},
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
};

use anyhow::{anyhow, bail, Context};
use async_trait::async_trait;
use serde_json::json;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};
use uuid::Uuid;

use super::SpeechSynthesizer;
use crate::{
    core::error::LoadError,
    language::Language,
    models::{ModelManager, KOKORO_FOLDER, KOKORO_MODEL, KOKORO_VOICES},
    orchestrator::Loadable,
    runtime::{python_string, InterpreterBinding},
};

const PACKAGES: &[&str] = &["kokoro-onnx", "soundfile"];

pub struct KokoroTts {
    binding: InterpreterBinding,
    models: Arc<ModelManager>,
    output_dir: PathBuf,
    loaded: AtomicBool,
}

impl KokoroTts {
    pub fn new(binding: InterpreterBinding, models: Arc<ModelManager>, cache_dir: &Path) -> Self {
        Self {
            binding,
            models,
            output_dir: cache_dir.join("tts"),
            loaded: AtomicBool::new(false),
        }
    }

    fn required_file(&self, name: &str) -> Result<PathBuf, LoadError> {
        let path = self.models.folder(KOKORO_FOLDER).join(name);
        if path.is_file() {
            Ok(path)
        } else {
            Err(LoadError::MissingModel {
                name: name.to_string(),
                path,
            })
        }
    }
}

fn setup_script(model: &Path, voices: &Path) -> String {
    format!(
        r#"import soundfile
from kokoro_onnx import Kokoro
_kokoro = Kokoro({model}, {voices})

def kokoro_synthesize(text, voice, lang, path):
    samples, sample_rate = _kokoro.create(text, voice=voice, speed=1.0, lang=lang)
    soundfile.write(path, samples, sample_rate, subtype="PCM_16")
    return path
"#,
        model = python_string(&model.to_string_lossy()),
        voices = python_string(&voices.to_string_lossy()),
    )
}

pub fn validate_wav(path: &Path) -> anyhow::Result<hound::WavSpec> {
    let reader = hound::WavReader::open(path)
        .with_context(|| format!("read synthesized audio {}", path.display()))?;
    if reader.duration() == 0 {
        bail!("synthesized audio {} is empty", path.display());
    }
    Ok(reader.spec())
}

#[async_trait]
impl Loadable for KokoroTts {
    async fn load_required(
        &self,
        model: Option<&str>,
        cancel: &CancellationToken,
    ) -> Result<(), LoadError> {
        if self.is_loaded() {
            return Ok(());
        }
        let model = self.required_file(model.unwrap_or(KOKORO_MODEL))?;
        let voices = self.required_file(KOKORO_VOICES)?;
        self.binding
            .bring_up(PACKAGES, &setup_script(&model, &voices), cancel)
            .await?;
        self.loaded.store(true, Ordering::SeqCst);
        info!(model = %model.display(), "kokoro voice loaded");
        Ok(())
    }

    fn is_loaded(&self) -> bool {
        self.loaded.load(Ordering::SeqCst)
    }

    async fn dispose(&self) {
        if self.loaded.swap(false, Ordering::SeqCst) {
            if let Err(error) = self.binding.exec("_kokoro = None").await {
                debug!("kokoro release failed: {error}");
            }
        }
        self.binding.release().await;
    }
}

#[async_trait]
impl SpeechSynthesizer for KokoroTts {
    async fn synthesize(
        &self,
        text: &str,
        language: Language,
        cancel: &CancellationToken,
    ) -> anyhow::Result<PathBuf> {
        if text.trim().is_empty() {
            bail!("no text to synthesize");
        }
        if !self.is_loaded() {
            bail!("kokoro voice is not loaded");
        }
        let (lang, voice) = language
            .kokoro_voice()
            .ok_or_else(|| anyhow!("kokoro has no voice for {language}"))?;

        tokio::fs::create_dir_all(&self.output_dir)
            .await
            .with_context(|| format!("create {}", self.output_dir.display()))?;
        let path = self.output_dir.join(format!("{}.wav", Uuid::new_v4()));
        let args = vec![
            json!(text),
            json!(voice),
            json!(lang),
            json!(path.to_string_lossy()),
        ];
        tokio::select! {
            reply = self.binding.call("kokoro_synthesize", args) => { reply?; }
            _ = cancel.cancelled() => bail!("speech synthesis cancelled"),
        }

        let spec = validate_wav(&path)?;
        debug!(path = %path.display(), sample_rate = spec.sample_rate, "speech synthesized");
        Ok(path)
    }
}
