mod loadable;
mod registry;
mod slot;

use std::{fmt, str::FromStr};

use anyhow::anyhow;
use serde::{Deserialize, Serialize};

pub use loadable::Loadable;
pub use registry::{BackendDescriptor, BackendKind, BackendRegistry};
pub use slot::Orchestrator;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "kebab-case")]
pub enum Capability {
    Ocr,
    Classifier,
    Translator,
    Tts,
}

impl Capability {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Capability::Ocr => "ocr",
            Capability::Classifier => "classifier",
            Capability::Translator => "translator",
            Capability::Tts => "tts",
        }
    }
}

impl fmt::Display for Capability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Capability {
    type Err = anyhow::Error;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "ocr" => Ok(Capability::Ocr),
            "classifier" => Ok(Capability::Classifier),
            "translator" => Ok(Capability::Translator),
            "tts" => Ok(Capability::Tts),
            other => Err(anyhow!("unknown capability `{other}`")),
        }
    }
}
