use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};

use anyhow::{anyhow, bail};
use async_trait::async_trait;
use serde_json::json;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use super::Translator;
use crate::{
    core::error::LoadError,
    language::Language,
    models::{ModelManager, NLLB_FOLDER, NLLB_MODEL},
    orchestrator::Loadable,
    runtime::{python_string, InterpreterBinding},
};

const PACKAGES: &[&str] = &["transformers", "torch", "sentencepiece"];
const MAX_LENGTH: usize = 512;

pub struct NllbTranslator {
    binding: InterpreterBinding,
    models: Arc<ModelManager>,
    loaded: AtomicBool,
}

impl NllbTranslator {
    pub fn new(binding: InterpreterBinding, models: Arc<ModelManager>) -> Self {
        Self {
            binding,
            models,
            loaded: AtomicBool::new(false),
        }
    }
}

fn setup_script(model: &str, cache_dir: &str) -> String {
    format!(
        r#"from transformers import AutoModelForSeq2SeqLM, AutoTokenizer
_nllb_tokenizer = AutoTokenizer.from_pretrained({model}, cache_dir={cache_dir})
_nllb_model = AutoModelForSeq2SeqLM.from_pretrained({model}, cache_dir={cache_dir})

def nllb_translate(text, source, target, max_length):
    _nllb_tokenizer.src_lang = source
    inputs = _nllb_tokenizer(text, return_tensors="pt")
    tokens = _nllb_model.generate(
        **inputs,
        forced_bos_token_id=_nllb_tokenizer.convert_tokens_to_ids(target),
        max_length=max_length,
    )
    return _nllb_tokenizer.batch_decode(tokens, skip_special_tokens=True)[0]
"#,
        model = python_string(model),
        cache_dir = python_string(cache_dir),
    )
}

#[async_trait]
impl Loadable for NllbTranslator {
    async fn load_required(
        &self,
        model: Option<&str>,
        cancel: &CancellationToken,
    ) -> Result<(), LoadError> {
        if self.is_loaded() {
            return Ok(());
        }
        let model = model.unwrap_or(NLLB_MODEL);
        let cache_dir = self.models.folder(NLLB_FOLDER);
        tokio::fs::create_dir_all(&cache_dir)
            .await
            .map_err(|error| LoadError::Failed(anyhow!(error).context("create NLLB cache")))?;

        info!(model, "loading NLLB translator");
        self.binding
            .bring_up(
                PACKAGES,
                &setup_script(model, &cache_dir.to_string_lossy()),
                cancel,
            )
            .await?;
        self.loaded.store(true, Ordering::SeqCst);
        Ok(())
    }

    fn is_loaded(&self) -> bool {
        self.loaded.load(Ordering::SeqCst)
    }

    async fn dispose(&self) {
        if self.loaded.swap(false, Ordering::SeqCst) {
            if let Err(error) = self
                .binding
                .exec("_nllb_model = None\n_nllb_tokenizer = None")
                .await
            {
                debug!("NLLB release failed: {error}");
            }
        }
        self.binding.release().await;
    }
}

#[async_trait]
impl Translator for NllbTranslator {
    async fn translate(
        &self,
        text: &str,
        source: Language,
        target: Language,
        cancel: &CancellationToken,
    ) -> anyhow::Result<String> {
        if text.trim().is_empty() {
            return Ok(String::new());
        }
        if source == target {
            return Ok(text.to_string());
        }
        if !self.is_loaded() {
            bail!("NLLB translator is not loaded");
        }
        let args = vec![
            json!(text),
            json!(source.nllb_code()),
            json!(target.nllb_code()),
            json!(MAX_LENGTH),
        ];
        let reply = tokio::select! {
            reply = self.binding.call("nllb_translate", args) => reply?,
            _ = cancel.cancelled() => bail!("translation cancelled"),
        };
        reply
            .as_str()
            .map(str::to_string)
            .ok_or_else(|| anyhow!("unexpected NLLB reply: {reply}"))
    }
}
