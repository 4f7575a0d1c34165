use std::collections::HashSet;

use crate::language::Language;

use super::manager::{ModelDescriptor, ModelKind, ModelRuntime, ModelSource};

pub const TESSERACT_FOLDER: &str = "tesseract";
pub const FASTTEXT_FOLDER: &str = "fasttext";
pub const NLLB_FOLDER: &str = "nllb-pytorch";
pub const KOKORO_FOLDER: &str = "kokoro-tts";

pub const FASTTEXT_LIGHT_MODEL: &str = "FastTextLight.bin";
pub const FASTTEXT_MODEL: &str = "FastText.bin";
pub const NLLB_MODEL: &str = "facebook/nllb-200-distilled-600M";
pub const KOKORO_MODEL: &str = "kokoro-v1.0.onnx";
pub const KOKORO_VOICES: &str = "voices-v1.0.bin";

const TESSDATA_BASE_URL: &str = "https://raw.githubusercontent.com/tesseract-ocr/tessdata/refs/heads/main";
const KOKORO_BASE_URL: &str =
    "https://github.com/thewh1teagle/kokoro-onnx/releases/download/model-files-v1.0";

pub const DEFAULT_TESSERACT_CODES: [&str; 11] = [
    "eng", "spa", "por", "fra", "deu", "ita", "jpn", "jpn_vert", "chi_sim", "chi_tra", "osd",
];

pub trait ModelProvider: Send + Sync {
    fn models(&self) -> Vec<ModelDescriptor>;

    fn find(&self, folder: &str, name: &str) -> Option<ModelDescriptor> {
        self.models()
            .into_iter()
            .find(|model| model.folder == folder && model.name == name)
    }

    fn by_runtime(&self, runtime: ModelRuntime) -> Vec<ModelDescriptor> {
        self.models()
            .into_iter()
            .filter(|model| model.runtime == runtime)
            .collect()
    }
}

pub struct ModelRegistry;

impl ModelRegistry {
    pub fn defaults() -> Vec<ModelDescriptor> {
        vec![
            ModelDescriptor {
                name: FASTTEXT_LIGHT_MODEL.into(),
                url: "https://dl.fbaipublicfiles.com/fasttext/supervised-models/lid.176.bin".into(),
                folder: FASTTEXT_FOLDER.into(),
                kind: ModelKind::TextClassifier,
                runtime: ModelRuntime::FastText,
                source: ModelSource::DirectDownload,
            },
            ModelDescriptor {
                name: FASTTEXT_MODEL.into(),
                url: "https://huggingface.co/facebook/fasttext-language-identification/resolve/main/model.bin"
                    .into(),
                folder: FASTTEXT_FOLDER.into(),
                kind: ModelKind::TextClassifier,
                runtime: ModelRuntime::FastText,
                source: ModelSource::DirectDownload,
            },
            ModelDescriptor {
                name: NLLB_MODEL.into(),
                url: format!("https://huggingface.co/{NLLB_MODEL}"),
                folder: NLLB_FOLDER.into(),
                kind: ModelKind::TextTranslator,
                runtime: ModelRuntime::NllbPyTorch,
                source: ModelSource::HuggingFace,
            },
            ModelDescriptor {
                name: KOKORO_MODEL.into(),
                url: format!("{KOKORO_BASE_URL}/{KOKORO_MODEL}"),
                folder: KOKORO_FOLDER.into(),
                kind: ModelKind::TextToSpeech,
                runtime: ModelRuntime::KokoroTts,
                source: ModelSource::DirectDownload,
            },
            ModelDescriptor {
                name: KOKORO_VOICES.into(),
                url: format!("{KOKORO_BASE_URL}/{KOKORO_VOICES}"),
                folder: KOKORO_FOLDER.into(),
                kind: ModelKind::TextToSpeech,
                runtime: ModelRuntime::KokoroTts,
                source: ModelSource::DirectDownload,
            },
        ]
    }

    pub fn tesseract_codes(selected: &[Language]) -> Vec<&'static str> {
        let mut seen = HashSet::new();
        DEFAULT_TESSERACT_CODES
            .into_iter()
            .chain(selected.iter().map(Language::tesseract_code))
            .filter(|code| seen.insert(*code))
            .collect()
    }

    pub fn tesseract_models(codes: &[&str]) -> Vec<ModelDescriptor> {
        codes.iter().map(|code| tesseract_descriptor(code)).collect()
    }
}

pub fn tesseract_descriptor(code: &str) -> ModelDescriptor {
    let name = format!("{code}.traineddata");
    ModelDescriptor {
        url: format!("{TESSDATA_BASE_URL}/{}", name.to_ascii_lowercase()),
        name,
        folder: TESSERACT_FOLDER.into(),
        kind: ModelKind::OpticalCharacterRecognition,
        runtime: ModelRuntime::Tesseract,
        source: ModelSource::DirectDownload,
    }
}

// registry defaults, then custom models, then Tesseract trained data for
// the merged OCR language list
pub struct ModelCatalog {
    models: Vec<ModelDescriptor>,
}

impl ModelCatalog {
    pub fn new(custom: Vec<ModelDescriptor>, ocr_languages: &[Language]) -> Self {
        let codes = ModelRegistry::tesseract_codes(ocr_languages);
        let mut models = ModelRegistry::defaults();
        for model in custom {
            if models
                .iter()
                .any(|known| known.folder == model.folder && known.name == model.name)
            {
                tracing::warn!(
                    "Ignoring custom model {}/{} that shadows a built-in model",
                    model.folder,
                    model.name
                );
                continue;
            }
            models.push(model);
        }
        models.extend(ModelRegistry::tesseract_models(&codes));
        Self { models }
    }
}

impl ModelProvider for ModelCatalog {
    fn models(&self) -> Vec<ModelDescriptor> {
        self.models.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tesseract_codes_merge_without_duplicates() {
        let codes = ModelRegistry::tesseract_codes(&[
            Language::English,
            Language::Korean,
            Language::Korean,
        ]);
        assert_eq!(codes.len(), DEFAULT_TESSERACT_CODES.len() + 1);
        assert_eq!(codes.first(), Some(&"eng"));
        assert_eq!(codes.last(), Some(&"kor"));
    }

    #[test]
    fn tesseract_descriptor_points_at_tessdata() {
        let model = tesseract_descriptor("chi_sim");
        assert_eq!(model.name, "chi_sim.traineddata");
        assert_eq!(model.folder, TESSERACT_FOLDER);
        assert!(model.url.ends_with("/main/chi_sim.traineddata"));
    }

    #[test]
    fn catalog_combines_defaults_custom_and_tesseract() {
        let custom = ModelDescriptor {
            name: "custom.bin".into(),
            url: "https://example.invalid/custom.bin".into(),
            folder: FASTTEXT_FOLDER.into(),
            kind: ModelKind::TextClassifier,
            runtime: ModelRuntime::FastText,
            source: ModelSource::DirectDownload,
        };
        let shadowing = ModelDescriptor {
            name: FASTTEXT_MODEL.into(),
            ..custom.clone()
        };
        let catalog = ModelCatalog::new(vec![custom, shadowing], &[Language::Dutch]);

        let models = catalog.models();
        assert_eq!(
            models.len(),
            ModelRegistry::defaults().len() + 1 + DEFAULT_TESSERACT_CODES.len() + 1
        );
        assert!(catalog.find(FASTTEXT_FOLDER, "custom.bin").is_some());
        assert!(catalog.find(TESSERACT_FOLDER, "nld.traineddata").is_some());
        assert_eq!(catalog.by_runtime(ModelRuntime::KokoroTts).len(), 2);
        assert_eq!(
            catalog
                .by_runtime(ModelRuntime::NllbPyTorch)
                .first()
                .map(|model| model.source),
            Some(ModelSource::HuggingFace)
        );
    }
}
