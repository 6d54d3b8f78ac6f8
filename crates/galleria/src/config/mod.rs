pub mod loader;
pub mod schema;

pub use loader::{apply_env_overrides, load_config, load_config_from_str, DISPATCH_MODE_ENV};
pub use schema::{
    ConversionConfig, DispatchConfig, DispatchMode, ImportConfig, MediaKind, QueueConfig,
    SourceConfig, StorageConfig, SubmissionState,
};
