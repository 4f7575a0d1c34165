pub mod app_state;
pub mod error;
pub mod paths;
pub mod settings;

pub use app_state::{Activation, AppServices, StatusReport};
pub use error::{Error, Result};
pub use paths::AppPaths;
pub use settings::{AppConfig, ConfigStore};
