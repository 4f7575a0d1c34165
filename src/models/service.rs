use std::{fmt, sync::Arc};

use serde::Serialize;
use tokio_util::sync::CancellationToken;

use crate::core::error::DownloadError;

use super::{
    download_with_retry, Downloader, ModelDescriptor, ModelManager, ModelProvider, ModelSource,
    RetryPolicy,
};

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase", tag = "outcome", content = "detail")]
pub enum DownloadOutcome {
    AlreadyAvailable,
    Downloaded,
    Deferred,
    Failed(String),
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ModelReport {
    pub folder: String,
    pub name: String,
    #[serde(flatten)]
    pub outcome: DownloadOutcome,
}

impl fmt::Display for ModelReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match &self.outcome {
            DownloadOutcome::AlreadyAvailable => "available".to_string(),
            DownloadOutcome::Downloaded => "downloaded".to_string(),
            DownloadOutcome::Deferred => "deferred to backend".to_string(),
            DownloadOutcome::Failed(message) => format!("failed: {message}"),
        };
        write!(f, "{}/{}: {label}", self.folder, self.name)
    }
}

pub struct ModelDownloadService {
    provider: Arc<dyn ModelProvider>,
    manager: Arc<ModelManager>,
    downloader: Arc<dyn Downloader>,
    retry: RetryPolicy,
}

impl ModelDownloadService {
    pub fn new(
        provider: Arc<dyn ModelProvider>,
        manager: Arc<ModelManager>,
        downloader: Arc<dyn Downloader>,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            provider,
            manager,
            downloader,
            retry,
        }
    }

    pub fn missing(&self) -> Vec<ModelDescriptor> {
        self.provider
            .models()
            .into_iter()
            .filter(|model| !self.manager.is_available(model))
            .collect()
    }

    // a failed model does not stop the others; cancellation does
    pub async fn download_missing(
        &self,
        cancel: &CancellationToken,
    ) -> Result<Vec<ModelReport>, DownloadError> {
        let mut reports = Vec::new();
        for model in self.provider.models() {
            let outcome = if self.manager.is_available(&model) {
                DownloadOutcome::AlreadyAvailable
            } else if model.source == ModelSource::HuggingFace {
                tracing::debug!(model = %model.name, "hub model resolved at load time");
                DownloadOutcome::Deferred
            } else {
                self.download(&model, cancel).await?
            };
            reports.push(ModelReport {
                folder: model.folder.clone(),
                name: model.name.clone(),
                outcome,
            });
        }
        Ok(reports)
    }

    pub async fn download(
        &self,
        model: &ModelDescriptor,
        cancel: &CancellationToken,
    ) -> Result<DownloadOutcome, DownloadError> {
        let destination = self.manager.path(model);
        tracing::info!(model = %model.name, folder = %model.folder, "downloading model");
        match download_with_retry(
            self.downloader.as_ref(),
            &model.url,
            &destination,
            self.retry,
            cancel,
        )
        .await
        {
            Ok(()) => {
                if let Err(error) = self.manager.record_installed(model) {
                    tracing::warn!("Failed to persist model manifest: {error:?}");
                }
                Ok(DownloadOutcome::Downloaded)
            }
            Err(DownloadError::Cancelled) => Err(DownloadError::Cancelled),
            Err(error) => {
                tracing::warn!(model = %model.name, "model download failed: {error}");
                let message = error.to_string();
                if let Err(error) = self.manager.record_failure(model, message.clone()) {
                    tracing::warn!("Failed to persist model manifest: {error:?}");
                }
                Ok(DownloadOutcome::Failed(message))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::{
        path::Path,
        sync::atomic::{AtomicUsize, Ordering},
        time::Duration,
    };

    use async_trait::async_trait;

    use super::*;
    use crate::{
        language::Language,
        models::{ModelCatalog, ModelKind, ModelRuntime, ModelStatus},
    };

    struct FakeDownloader {
        calls: AtomicUsize,
        failing: &'static str,
    }

    #[async_trait]
    impl Downloader for FakeDownloader {
        async fn download_file(&self, url: &str, destination: &Path) -> Result<(), DownloadError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if url.ends_with(self.failing) {
                return Err(DownloadError::Status {
                    url: url.to_string(),
                    status: 404,
                });
            }
            if let Some(parent) = destination.parent() {
                std::fs::create_dir_all(parent).unwrap();
            }
            std::fs::write(destination, url.as_bytes()).unwrap();
            Ok(())
        }
    }

    struct FixedProvider(Vec<ModelDescriptor>);

    impl ModelProvider for FixedProvider {
        fn models(&self) -> Vec<ModelDescriptor> {
            self.0.clone()
        }
    }

    fn model(name: &str, source: ModelSource) -> ModelDescriptor {
        ModelDescriptor {
            name: name.into(),
            url: format!("https://example.invalid/{name}"),
            folder: "misc".into(),
            kind: ModelKind::TextClassifier,
            runtime: ModelRuntime::FastText,
            source,
        }
    }

    fn service(
        dir: &Path,
        models: Vec<ModelDescriptor>,
        failing: &'static str,
    ) -> (ModelDownloadService, Arc<FakeDownloader>, Arc<ModelManager>) {
        let manager = Arc::new(ModelManager::new(dir.to_path_buf()).unwrap());
        let downloader = Arc::new(FakeDownloader {
            calls: AtomicUsize::new(0),
            failing,
        });
        let service = ModelDownloadService::new(
            Arc::new(FixedProvider(models)),
            manager.clone(),
            downloader.clone(),
            RetryPolicy::new(2, Duration::from_millis(1)),
        );
        (service, downloader, manager)
    }

    #[tokio::test]
    async fn downloads_only_what_is_missing() {
        let dir = tempfile::tempdir().unwrap();
        let models = vec![
            model("present.bin", ModelSource::DirectDownload),
            model("absent.bin", ModelSource::DirectDownload),
            model("hub/repo", ModelSource::HuggingFace),
        ];
        std::fs::create_dir_all(dir.path().join("misc")).unwrap();
        std::fs::write(dir.path().join("misc").join("present.bin"), b"x").unwrap();
        let (service, downloader, manager) = service(dir.path(), models.clone(), "never");

        assert_eq!(service.missing().len(), 2);
        let reports = service
            .download_missing(&CancellationToken::new())
            .await
            .unwrap();
        let outcomes: Vec<_> = reports.iter().map(|report| report.outcome.clone()).collect();
        assert_eq!(
            outcomes,
            vec![
                DownloadOutcome::AlreadyAvailable,
                DownloadOutcome::Downloaded,
                DownloadOutcome::Deferred,
            ]
        );
        assert_eq!(downloader.calls.load(Ordering::SeqCst), 1);
        assert_eq!(manager.status(&models[1]), ModelStatus::Installed);
    }

    #[tokio::test]
    async fn one_failure_does_not_stop_the_rest() {
        let dir = tempfile::tempdir().unwrap();
        let models = vec![
            model("broken.bin", ModelSource::DirectDownload),
            model("fine.bin", ModelSource::DirectDownload),
        ];
        let (service, downloader, manager) = service(dir.path(), models.clone(), "broken.bin");

        let reports = service
            .download_missing(&CancellationToken::new())
            .await
            .unwrap();
        assert!(matches!(reports[0].outcome, DownloadOutcome::Failed(_)));
        assert_eq!(reports[1].outcome, DownloadOutcome::Downloaded);
        // two attempts on the broken one, one on the fine one
        assert_eq!(downloader.calls.load(Ordering::SeqCst), 3);
        assert!(matches!(manager.status(&models[0]), ModelStatus::Error(_)));
    }

    #[tokio::test]
    async fn cancellation_aborts_the_batch() {
        let dir = tempfile::tempdir().unwrap();
        let (service, downloader, _) = service(
            dir.path(),
            vec![model("a.bin", ModelSource::DirectDownload)],
            "never",
        );
        let cancel = CancellationToken::new();
        cancel.cancel();
        assert!(matches!(
            service.download_missing(&cancel).await,
            Err(DownloadError::Cancelled)
        ));
        assert_eq!(downloader.calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn catalog_reports_tesseract_models_missing() {
        let dir = tempfile::tempdir().unwrap();
        let manager = Arc::new(ModelManager::new(dir.path().to_path_buf()).unwrap());
        let service = ModelDownloadService::new(
            Arc::new(ModelCatalog::new(Vec::new(), &[Language::English])),
            manager,
            Arc::new(FakeDownloader {
                calls: AtomicUsize::new(0),
                failing: "never",
            }),
            RetryPolicy::default(),
        );
        assert!(service
            .missing()
            .iter()
            .any(|model| model.name == "eng.traineddata"));
    }
}
