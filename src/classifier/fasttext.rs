use std::{
    path::PathBuf,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
};

use anyhow::{bail, Context};
use async_trait::async_trait;
use serde_json::json;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use super::{Classification, LanguageClassifier};
use crate::{
    core::error::LoadError,
    language::Language,
    models::{ModelManager, FASTTEXT_FOLDER, FASTTEXT_LIGHT_MODEL},
    orchestrator::Loadable,
    runtime::{python_string, InterpreterBinding},
};

const PACKAGES: &[&str] = &["fasttext-wheel", "numpy<2"];
const TOP_K: usize = 5;

pub struct FastTextClassifier {
    binding: InterpreterBinding,
    models: Arc<ModelManager>,
    loaded: AtomicBool,
}

impl FastTextClassifier {
    pub fn new(binding: InterpreterBinding, models: Arc<ModelManager>) -> Self {
        Self {
            binding,
            models,
            loaded: AtomicBool::new(false),
        }
    }

    fn model_path(&self, model: Option<&str>) -> PathBuf {
        self.models
            .folder(FASTTEXT_FOLDER)
            .join(model.unwrap_or(FASTTEXT_LIGHT_MODEL))
    }
}

fn setup_script(model: &str) -> String {
    format!(
        r#"import fasttext
fasttext.FastText.eprint = lambda *args, **kwargs: None
_fasttext_model = fasttext.load_model({model})

def fasttext_classify(text, k):
    labels, scores = _fasttext_model.predict(text.replace("\n", " "), k=k)
    return [[label.replace("__label__", ""), float(score)] for label, score in zip(labels, scores)]
"#,
        model = python_string(model)
    )
}

// labels are either ISO codes (`en`) or FLORES codes (`eng_Latn`)
fn parse_predictions(predictions: Vec<(String, f32)>) -> Option<Classification> {
    Classification::from_scores(predictions.into_iter().filter_map(|(label, score)| {
        let language = Language::from_code(&label);
        if language.is_none() {
            debug!(%label, "ignoring unsupported fastText label");
        }
        language.map(|language| (language, score))
    }))
}

#[async_trait]
impl Loadable for FastTextClassifier {
    async fn load_required(
        &self,
        model: Option<&str>,
        cancel: &CancellationToken,
    ) -> Result<(), LoadError> {
        if self.is_loaded() {
            return Ok(());
        }
        let path = self.model_path(model);
        if !path.is_file() {
            return Err(LoadError::MissingModel {
                name: model.unwrap_or(FASTTEXT_LIGHT_MODEL).to_string(),
                path,
            });
        }
        self.binding
            .bring_up(PACKAGES, &setup_script(&path.to_string_lossy()), cancel)
            .await?;
        self.loaded.store(true, Ordering::SeqCst);
        info!(model = %path.display(), "fastText classifier loaded");
        Ok(())
    }

    fn is_loaded(&self) -> bool {
        self.loaded.load(Ordering::SeqCst)
    }

    async fn dispose(&self) {
        if self.loaded.swap(false, Ordering::SeqCst) {
            if let Err(error) = self.binding.exec("_fasttext_model = None").await {
                debug!("fastText model release failed: {error}");
            }
        }
        self.binding.release().await;
    }
}

#[async_trait]
impl LanguageClassifier for FastTextClassifier {
    async fn classify(
        &self,
        text: &str,
        cancel: &CancellationToken,
    ) -> anyhow::Result<Classification> {
        if !self.is_loaded() {
            bail!("fastText classifier is not loaded");
        }
        if text.trim().is_empty() {
            bail!("no text to classify");
        }
        let reply = tokio::select! {
            reply = self.binding.call("fasttext_classify", vec![json!(text), json!(TOP_K)]) => reply?,
            _ = cancel.cancelled() => bail!("classification cancelled"),
        };
        let predictions: Vec<(String, f32)> =
            serde_json::from_value(reply).context("unexpected fastText reply")?;
        match parse_predictions(predictions) {
            Some(classification) => Ok(classification),
            None => bail!("fastText returned no supported language"),
        }
    }
}
