use std::{
    path::{Path, PathBuf},
    sync::Arc,
};

use anyhow::Context;
use serde::{de::DeserializeOwned, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use super::{
    error::{Error, OrchestratorError, Result},
    paths::AppPaths,
    settings::{AppConfig, ConfigStore},
};
use crate::{
    classifier::{
        Classification, ClassifierKind, FastTextClassifier, LanguageClassifier, ScriptClassifier,
    },
    environment::{EnvironmentConfig, EnvironmentService, ProcessRunner, TokioProcessRunner},
    language::Language,
    models::{
        Downloader, HttpDownloader, ModelCatalog, ModelDownloadService, ModelManager,
        ModelProvider,
    },
    ocr::{OcrBackend, OcrEngine, OcrResult, TesseractOcr},
    orchestrator::{BackendDescriptor, BackendKind, BackendRegistry, Capability, Orchestrator},
    runtime::{InterpreterBinding, InterpreterHost, ProcessInterpreter, RuntimeManager},
    translation::{NllbTranslator, Translator, TranslatorKind},
    tts::{KokoroTts, SpeechSynthesizer, TtsKind},
};

const TESSERACT_BINARY: &str = "tesseract";

pub type OcrOrchestrator = Orchestrator<dyn OcrBackend, OcrEngine>;
pub type ClassifierOrchestrator = Orchestrator<dyn LanguageClassifier, ClassifierKind>;
pub type TranslatorOrchestrator = Orchestrator<dyn Translator, TranslatorKind>;
pub type TtsOrchestrator = Orchestrator<dyn SpeechSynthesizer, TtsKind>;

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Activation {
    pub backend: BackendDescriptor,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl Activation {
    fn record<K: BackendKind>(
        kind: K,
        outcome: std::result::Result<(), OrchestratorError>,
    ) -> Self {
        let backend = kind.descriptor();
        let error = outcome.err().map(|error| {
            warn!(
                capability = %backend.capability,
                backend = %backend.backend,
                "default backend unavailable: {error:#}"
            );
            format!("{:#}", anyhow::Error::new(error))
        });
        Self { backend, error }
    }

    pub fn succeeded(&self) -> bool {
        self.error.is_none()
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusReport {
    pub data_dir: PathBuf,
    pub environment_installed: bool,
    pub environment: String,
    pub runtime_initialized: bool,
    pub dependents: Vec<&'static str>,
    pub backends: Vec<(Capability, Option<String>)>,
}

pub struct AppServices {
    config: Arc<ConfigStore>,
    paths: AppPaths,
    environment: Arc<EnvironmentService>,
    runtime: Arc<RuntimeManager>,
    models: Arc<ModelManager>,
    catalog: Arc<ModelCatalog>,
    downloads: ModelDownloadService,
    ocr: OcrOrchestrator,
    classifier: ClassifierOrchestrator,
    translator: TranslatorOrchestrator,
    tts: TtsOrchestrator,
}

impl AppServices {
    pub fn build(config: Arc<ConfigStore>) -> Result<Self> {
        let snapshot = config.read();
        let paths = AppPaths::new(snapshot.resolve_data_dir()?);
        let downloader: Arc<dyn Downloader> = Arc::new(HttpDownloader::new()?);
        let shutdown_timeout = snapshot.interpreter_shutdown_timeout();
        let environment_name = snapshot.environment_name.clone();
        Self::assemble(
            config,
            paths,
            downloader,
            Arc::new(TokioProcessRunner),
            move |environment| {
                let host: Arc<dyn InterpreterHost> = Arc::new(ProcessInterpreter::new(
                    environment,
                    environment_name,
                    shutdown_timeout,
                ));
                host
            },
        )
    }

    // `host` receives the environment service the interpreter runs from
    pub fn assemble<H>(
        config: Arc<ConfigStore>,
        paths: AppPaths,
        downloader: Arc<dyn Downloader>,
        runner: Arc<dyn ProcessRunner>,
        host: H,
    ) -> Result<Self>
    where
        H: FnOnce(Arc<EnvironmentService>) -> Arc<dyn InterpreterHost>,
    {
        let snapshot = config.read();
        paths.ensure()?;
        info!(data_dir = %paths.data_dir.display(), "assembling services");

        let environment = Arc::new(EnvironmentService::new(
            EnvironmentConfig {
                root: paths.miniconda.clone(),
                downloads: paths.downloads.clone(),
                default_environment: snapshot.environment_name.clone(),
                retry: snapshot.retry_policy(),
            },
            downloader.clone(),
            runner.clone(),
        ));
        let runtime = Arc::new(RuntimeManager::new(host(environment.clone())));
        let models = Arc::new(
            ModelManager::new(paths.models.clone()).context("opening the model store")?,
        );
        let catalog = Arc::new(ModelCatalog::new(
            snapshot.custom_models.clone(),
            &snapshot.ocr_languages,
        ));
        let downloads = ModelDownloadService::new(
            catalog.clone(),
            models.clone(),
            downloader,
            snapshot.retry_policy(),
        );

        let wiring = Wiring {
            environment: environment.clone(),
            runtime: runtime.clone(),
            models: models.clone(),
            runner,
            config: snapshot,
            cache: paths.cache.clone(),
        };

        Ok(Self {
            ocr: Orchestrator::new(wiring.ocr_registry()),
            classifier: Orchestrator::new(wiring.classifier_registry()),
            translator: Orchestrator::new(wiring.translator_registry()),
            tts: Orchestrator::new(wiring.tts_registry()),
            config,
            paths,
            environment,
            runtime,
            models,
            catalog,
            downloads,
        })
    }

    pub fn config(&self) -> &ConfigStore {
        &self.config
    }

    pub fn paths(&self) -> &AppPaths {
        &self.paths
    }

    pub fn environment(&self) -> &Arc<EnvironmentService> {
        &self.environment
    }

    pub fn runtime(&self) -> &Arc<RuntimeManager> {
        &self.runtime
    }

    pub fn models(&self) -> &Arc<ModelManager> {
        &self.models
    }

    pub fn catalog(&self) -> &dyn ModelProvider {
        self.catalog.as_ref()
    }

    pub fn downloads(&self) -> &ModelDownloadService {
        &self.downloads
    }

    pub fn ocr(&self) -> &OcrOrchestrator {
        &self.ocr
    }

    pub fn classifier(&self) -> &ClassifierOrchestrator {
        &self.classifier
    }

    pub fn translator(&self) -> &TranslatorOrchestrator {
        &self.translator
    }

    pub fn tts(&self) -> &TtsOrchestrator {
        &self.tts
    }

    pub async fn activate_defaults(&self, cancel: &CancellationToken) -> Vec<Activation> {
        let config = self.config.read();
        vec![
            Activation::record(
                config.ocr_engine,
                self.ocr.switch_to(config.ocr_engine, true, cancel).await,
            ),
            Activation::record(
                config.classifier,
                self.classifier.switch_to(config.classifier, true, cancel).await,
            ),
            Activation::record(
                config.translator,
                self.translator.switch_to(config.translator, true, cancel).await,
            ),
            Activation::record(
                config.tts,
                self.tts.switch_to(config.tts, true, cancel).await,
            ),
        ]
    }

    pub async fn switch(
        &self,
        capability: Capability,
        backend: &str,
        load_model: bool,
        cancel: &CancellationToken,
    ) -> Result<BackendDescriptor> {
        match capability {
            Capability::Ocr => {
                let kind: OcrEngine = parse_kind(backend)?;
                self.ocr.switch_to(kind, load_model, cancel).await?;
                Ok(kind.descriptor())
            }
            Capability::Classifier => {
                let kind: ClassifierKind = parse_kind(backend)?;
                self.classifier.switch_to(kind, load_model, cancel).await?;
                Ok(kind.descriptor())
            }
            Capability::Translator => {
                let kind: TranslatorKind = parse_kind(backend)?;
                self.translator.switch_to(kind, load_model, cancel).await?;
                Ok(kind.descriptor())
            }
            Capability::Tts => {
                let kind: TtsKind = parse_kind(backend)?;
                self.tts.switch_to(kind, load_model, cancel).await?;
                Ok(kind.descriptor())
            }
        }
    }

    pub async fn recognize(
        &self,
        image: &Path,
        languages: &[Language],
        cancel: &CancellationToken,
    ) -> Result<OcrResult> {
        self.ocr
            .with_backend(
                |backend| async move { backend.recognize(image, languages, cancel).await },
            )
            .await
    }

    pub async fn classify(&self, text: &str, cancel: &CancellationToken) -> Result<Classification> {
        self.classifier
            .with_backend(|backend| async move { backend.classify(text, cancel).await })
            .await
    }

    pub async fn translate(
        &self,
        text: &str,
        source: Language,
        target: Language,
        cancel: &CancellationToken,
    ) -> Result<String> {
        self.translator
            .with_backend(|backend| async move {
                backend.translate(text, source, target, cancel).await
            })
            .await
    }

    pub async fn synthesize(
        &self,
        text: &str,
        language: Language,
        cancel: &CancellationToken,
    ) -> Result<PathBuf> {
        self.tts
            .with_backend(|backend| async move { backend.synthesize(text, language, cancel).await })
            .await
    }

    pub fn status(&self) -> StatusReport {
        StatusReport {
            data_dir: self.paths.data_dir.clone(),
            environment_installed: self.environment.is_installed(),
            environment: self.environment.default_environment().to_string(),
            runtime_initialized: self.runtime.is_runtime_initialized(),
            dependents: self.runtime.dependents(),
            backends: vec![
                (
                    Capability::Ocr,
                    self.ocr.current_service_type().map(|kind| kind.to_string()),
                ),
                (
                    Capability::Classifier,
                    self.classifier
                        .current_service_type()
                        .map(|kind| kind.to_string()),
                ),
                (
                    Capability::Translator,
                    self.translator
                        .current_service_type()
                        .map(|kind| kind.to_string()),
                ),
                (
                    Capability::Tts,
                    self.tts.current_service_type().map(|kind| kind.to_string()),
                ),
            ],
        }
    }

    pub async fn shutdown(&self) {
        self.tts.dispose().await;
        self.translator.dispose().await;
        self.classifier.dispose().await;
        self.ocr.dispose().await;
        self.runtime.close().await;
        info!("services shut down");
    }
}

fn parse_kind<K: BackendKind + DeserializeOwned>(name: &str) -> Result<K> {
    serde_json::from_value(serde_json::Value::String(name.trim().to_ascii_lowercase())).map_err(
        |_| {
            Error::from(OrchestratorError::UnknownBackend {
                capability: K::CAPABILITY,
                backend: name.to_string(),
            })
        },
    )
}

#[derive(Clone)]
struct Wiring {
    environment: Arc<EnvironmentService>,
    runtime: Arc<RuntimeManager>,
    models: Arc<ModelManager>,
    runner: Arc<dyn ProcessRunner>,
    config: AppConfig,
    cache: PathBuf,
}

impl Wiring {
    fn binding(&self, label: &'static str) -> InterpreterBinding {
        InterpreterBinding::new(
            self.runtime.clone(),
            self.environment.clone(),
            self.config.environment_name.clone(),
            label,
        )
    }

    fn ocr_registry(&self) -> BackendRegistry<dyn OcrBackend, OcrEngine> {
        let wiring = self.clone();
        BackendRegistry::new().with(OcrEngine::Tesseract, move || {
            let backend: Arc<dyn OcrBackend> = Arc::new(TesseractOcr::new(
                TESSERACT_BINARY,
                wiring.models.clone(),
                wiring.runner.clone(),
                wiring.config.ocr_languages.clone(),
            ));
            Ok(backend)
        })
    }

    fn classifier_registry(&self) -> BackendRegistry<dyn LanguageClassifier, ClassifierKind> {
        let wiring = self.clone();
        BackendRegistry::new()
            .with(ClassifierKind::Script, || {
                let backend: Arc<dyn LanguageClassifier> = Arc::new(ScriptClassifier::new());
                Ok(backend)
            })
            .with(ClassifierKind::FastText, move || {
                let backend: Arc<dyn LanguageClassifier> = Arc::new(FastTextClassifier::new(
                    wiring.binding("fasttext"),
                    wiring.models.clone(),
                ));
                Ok(backend)
            })
    }

    fn translator_registry(&self) -> BackendRegistry<dyn Translator, TranslatorKind> {
        let wiring = self.clone();
        BackendRegistry::new().with(TranslatorKind::Nllb, move || {
            let backend: Arc<dyn Translator> =
                Arc::new(NllbTranslator::new(wiring.binding("nllb"), wiring.models.clone()));
            Ok(backend)
        })
    }

    fn tts_registry(&self) -> BackendRegistry<dyn SpeechSynthesizer, TtsKind> {
        let wiring = self.clone();
        BackendRegistry::new().with(TtsKind::Kokoro, move || {
            let backend: Arc<dyn SpeechSynthesizer> = Arc::new(KokoroTts::new(
                wiring.binding("kokoro"),
                wiring.models.clone(),
                &wiring.cache,
            ));
            Ok(backend)
        })
    }
}
