pub mod app;
pub mod config;
pub mod db;
pub mod dispatch;
pub mod error;
pub mod logging;
pub mod model;
pub mod pipeline;
pub mod processor;
pub mod queue;
pub mod sanitize;
pub mod secrets;
pub mod server;
pub mod source;
pub mod storage;
pub mod worker;

pub use app::ImportService;
pub use config::{load_config, load_config_from_str, DispatchMode, ImportConfig, MediaKind};
pub use db::{Database, DatabaseError};
pub use dispatch::{DispatchReport, Dispatcher, InlineDispatcher, QueuedDispatcher};
pub use error::{ConfigError, ImportError, ProcessError, Result, StorageError};
pub use logging::{init_logging, LogFormat};
pub use model::{JobStatus, JobStatusView};
pub use pipeline::{CompletionTracker, GalleryFinalizer, ImportOrchestrator, ImportRequest};
pub use queue::{Delivery, TaskHandler, TaskQueue};
pub use secrets::{SecretError, SecretRef};
pub use source::{ClassroomClient, SourceError, SubmissionSource};
pub use worker::{ConversionWorker, SubmissionWorkUnit, TaskEndpoint};
