mod download;
mod manager;
mod metadata;
mod registry;
mod service;

pub use download::{download_with_retry, staging_path, Downloader, HttpDownloader, RetryPolicy};
pub use manager::{
    ModelDescriptor, ModelKind, ModelManager, ModelRecord, ModelRuntime, ModelSource, ModelStatus,
};
pub use metadata::{compute_sha256, total_size};
pub use registry::{
    tesseract_descriptor, ModelCatalog, ModelProvider, ModelRegistry, DEFAULT_TESSERACT_CODES,
    FASTTEXT_FOLDER, FASTTEXT_LIGHT_MODEL, FASTTEXT_MODEL, KOKORO_FOLDER, KOKORO_MODEL,
    KOKORO_VOICES, NLLB_FOLDER, NLLB_MODEL, TESSERACT_FOLDER,
};
pub use service::{DownloadOutcome, ModelDownloadService, ModelReport};
