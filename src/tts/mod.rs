mod kokoro;

use std::{fmt, path::PathBuf};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use crate::{
    language::Language,
    orchestrator::{BackendKind, Capability, Loadable},
};

pub use kokoro::{validate_wav, KokoroTts};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "kebab-case")]
pub enum TtsKind {
    Kokoro,
}

impl Default for TtsKind {
    fn default() -> Self {
        TtsKind::Kokoro
    }
}

impl fmt::Display for TtsKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            TtsKind::Kokoro => "kokoro",
        })
    }
}

impl BackendKind for TtsKind {
    const CAPABILITY: Capability = Capability::Tts;
}

#[async_trait]
pub trait SpeechSynthesizer: Loadable {
    async fn synthesize(
        &self,
        text: &str,
        language: Language,
        cancel: &CancellationToken,
    ) -> anyhow::Result<PathBuf>;
}
