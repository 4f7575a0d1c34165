mod fasttext;
mod script;

use std::fmt;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use crate::{
    language::Language,
    orchestrator::{BackendKind, Capability, Loadable},
};

pub use fasttext::FastTextClassifier;
pub use script::ScriptClassifier;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "kebab-case")]
pub enum ClassifierKind {
    Script,
    FastText,
}

impl Default for ClassifierKind {
    fn default() -> Self {
        ClassifierKind::Script
    }
}

impl fmt::Display for ClassifierKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ClassifierKind::Script => "script",
            ClassifierKind::FastText => "fast-text",
        })
    }
}

impl BackendKind for ClassifierKind {
    const CAPABILITY: Capability = Capability::Classifier;
}

#[derive(Debug, Clone, Copy, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct LanguageScore {
    pub language: Language,
    pub confidence: f32,
}

/// Best guess first; `ranking` is sorted by descending confidence and
/// includes the best guess.
#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Classification {
    pub language: Language,
    pub confidence: f32,
    pub ranking: Vec<LanguageScore>,
}

impl Classification {
    // `None` when nothing scored above zero
    pub fn from_scores(scores: impl IntoIterator<Item = (Language, f32)>) -> Option<Self> {
        let mut ranking: Vec<LanguageScore> = scores
            .into_iter()
            .filter(|(_, score)| *score > 0.0)
            .map(|(language, confidence)| LanguageScore {
                language,
                confidence,
            })
            .collect();
        let total: f32 = ranking.iter().map(|score| score.confidence).sum();
        if total <= 0.0 {
            return None;
        }
        for score in &mut ranking {
            score.confidence /= total;
        }
        ranking.sort_by(|a, b| b.confidence.total_cmp(&a.confidence));
        let best = *ranking.first()?;
        Some(Self {
            language: best.language,
            confidence: best.confidence,
            ranking,
        })
    }
}

#[async_trait]
pub trait LanguageClassifier: Loadable {
    async fn classify(&self, text: &str, cancel: &CancellationToken)
        -> anyhow::Result<Classification>;
}
