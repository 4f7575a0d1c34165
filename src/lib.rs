pub mod classifier;
pub mod core;
pub mod environment;
pub mod language;
pub mod models;
pub mod ocr;
pub mod orchestrator;
pub mod runtime;
pub mod translation;
pub mod tts;

pub use crate::core::{AppConfig, AppPaths, AppServices, ConfigStore, Error, Result};
pub use crate::language::Language;
