mod nllb;

use std::fmt;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use crate::{
    language::Language,
    orchestrator::{BackendKind, Capability, Loadable},
};

pub use nllb::NllbTranslator;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "kebab-case")]
pub enum TranslatorKind {
    Nllb,
}

impl Default for TranslatorKind {
    fn default() -> Self {
        TranslatorKind::Nllb
    }
}

impl fmt::Display for TranslatorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            TranslatorKind::Nllb => "nllb",
        })
    }
}

impl BackendKind for TranslatorKind {
    const CAPABILITY: Capability = Capability::Translator;
}

#[async_trait]
pub trait Translator: Loadable {
    async fn translate(
        &self,
        text: &str,
        source: Language,
        target: Language,
        cancel: &CancellationToken,
    ) -> anyhow::Result<String>;
}
