mod tesseract;

use std::{fmt, path::Path};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use crate::{
    language::Language,
    orchestrator::{BackendKind, Capability, Loadable},
};

pub use tesseract::{parse_tsv, TesseractOcr};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "kebab-case")]
pub enum OcrEngine {
    Tesseract,
}

impl Default for OcrEngine {
    fn default() -> Self {
        OcrEngine::Tesseract
    }
}

impl fmt::Display for OcrEngine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            OcrEngine::Tesseract => "tesseract",
        })
    }
}

impl BackendKind for OcrEngine {
    const CAPABILITY: Capability = Capability::Ocr;
}

#[derive(Debug, Clone, Copy, Default, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct BoundingBox {
    pub left: u32,
    pub top: u32,
    pub width: u32,
    pub height: u32,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct OcrWord {
    pub text: String,
    pub bounds: BoundingBox,
    /// 0 to 100, as reported by the engine.
    pub confidence: f32,
}

#[derive(Debug, Clone, Default, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct OcrResult {
    pub text: String,
    pub words: Vec<OcrWord>,
    pub mean_confidence: f32,
}

#[async_trait]
pub trait OcrBackend: Loadable {
    // empty `languages` means whatever the backend loaded
    async fn recognize(
        &self,
        image: &Path,
        languages: &[Language],
        cancel: &CancellationToken,
    ) -> anyhow::Result<OcrResult>;
}
