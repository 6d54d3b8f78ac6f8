use std::path::PathBuf;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImportConfig {
    pub version: String,
    #[serde(default = "default_database_path")]
    pub database_path: PathBuf,
    pub storage: StorageConfig,
    pub source: SourceConfig,
    #[serde(default)]
    pub conversion: ConversionConfig,
    #[serde(default)]
    pub dispatch: DispatchConfig,
}

fn default_database_path() -> PathBuf {
    crate::db::default_database_path().unwrap_or_else(|| PathBuf::from("galleria.db"))
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StorageConfig {
    /// Root directory of the object store.
    pub root: PathBuf,
    /// Base URL under which stored objects are publicly served.
    pub public_base_url: String,
    #[serde(default = "default_staging_prefix")]
    pub staging_prefix: String,
    #[serde(default = "default_artwork_prefix")]
    pub artwork_prefix: String,
}

fn default_staging_prefix() -> String {
    "staging".to_string()
}

fn default_artwork_prefix() -> String {
    "artworks".to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SourceConfig {
    #[serde(default = "default_base_url")]
    pub base_url: String,
    #[serde(default = "default_drive_base_url")]
    pub drive_base_url: String,
    /// Direct token value. Prefer `access_token_file` or `access_token_env_var`.
    #[serde(default)]
    pub access_token_insecure: Option<String>,
    #[serde(default)]
    pub access_token_file: Option<String>,
    #[serde(default)]
    pub access_token_env_var: Option<String>,
    #[serde(default = "default_page_size")]
    pub page_size: u32,
    #[serde(default = "default_submission_states")]
    pub submission_states: Vec<SubmissionState>,
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,
}

fn default_base_url() -> String {
    "https://classroom.googleapis.com/v1".to_string()
}

fn default_drive_base_url() -> String {
    "https://www.googleapis.com/drive/v3".to_string()
}

fn default_page_size() -> u32 {
    100
}

fn default_request_timeout() -> u64 {
    30
}

pub fn default_submission_states() -> Vec<SubmissionState> {
    vec![
        SubmissionState::Returned,
        SubmissionState::TurnedIn,
        SubmissionState::ReclaimedByStudent,
        SubmissionState::New,
        SubmissionState::Created,
    ]
}

/// Submission lifecycle states understood by the external source.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SubmissionState {
    New,
    Created,
    TurnedIn,
    Returned,
    ReclaimedByStudent,
}

impl SubmissionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::New => "NEW",
            Self::Created => "CREATED",
            Self::TurnedIn => "TURNED_IN",
            Self::Returned => "RETURNED",
            Self::ReclaimedByStudent => "RECLAIMED_BY_STUDENT",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConversionConfig {
    #[serde(default = "default_max_long_edge")]
    pub max_long_edge: u32,
    #[serde(default = "default_thumbnail_size")]
    pub thumbnail_size: u32,
    #[serde(default = "default_jpeg_quality")]
    pub jpeg_quality: u8,
    #[serde(default = "default_document_dpi")]
    pub document_dpi: u32,
    #[serde(default = "default_max_document_pages")]
    pub max_document_pages: u32,
}

fn default_max_long_edge() -> u32 {
    2048
}

fn default_thumbnail_size() -> u32 {
    400
}

fn default_jpeg_quality() -> u8 {
    85
}

fn default_document_dpi() -> u32 {
    150
}

fn default_max_document_pages() -> u32 {
    50
}

impl Default for ConversionConfig {
    fn default() -> Self {
        Self {
            max_long_edge: default_max_long_edge(),
            thumbnail_size: default_thumbnail_size(),
            jpeg_quality: default_jpeg_quality(),
            document_dpi: default_document_dpi(),
            max_document_pages: default_max_document_pages(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DispatchMode {
    /// Run every work unit in-process, one after the other.
    Inline,
    /// Hand every work unit to the task queue.
    Queued,
}

impl std::str::FromStr for DispatchMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "inline" => Ok(Self::Inline),
            "queued" => Ok(Self::Queued),
            other => Err(format!("unknown dispatch mode '{}'", other)),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DispatchConfig {
    #[serde(default = "default_dispatch_mode")]
    pub mode: DispatchMode,
    /// Delivery offset added per work unit.
    #[serde(default = "default_stagger_ms")]
    pub stagger_ms: u64,
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_worker_count")]
    pub worker_count: usize,
    #[serde(default)]
    pub queue: Option<QueueConfig>,
}

fn default_dispatch_mode() -> DispatchMode {
    DispatchMode::Queued
}

fn default_stagger_ms() -> u64 {
    2000
}

fn default_max_attempts() -> u32 {
    3
}

fn default_worker_count() -> usize {
    num_cpus::get()
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            mode: default_dispatch_mode(),
            stagger_ms: default_stagger_ms(),
            max_attempts: default_max_attempts(),
            worker_count: default_worker_count(),
            queue: None,
        }
    }
}

/// Remote task-queue settings. When absent in queued mode, the local
/// threaded queue is used.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueueConfig {
    /// Queue API endpoint that accepts task creation requests.
    pub endpoint: String,
    /// Processing endpoint the queue delivers payloads to.
    pub processing_url: String,
    #[serde(default)]
    pub token_insecure: Option<String>,
    #[serde(default)]
    pub token_file: Option<String>,
    #[serde(default)]
    pub token_env_var: Option<String>,
}

/// Media kinds accepted for conversion. Everything else is skipped before
/// grouping.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaKind {
    Image,
    Document,
}

impl MediaKind {
    pub fn from_content_type(content_type: &str) -> Option<Self> {
        let essence = content_type
            .split(';')
            .next()
            .unwrap_or("")
            .trim()
            .to_lowercase();

        if essence.starts_with("image/") {
            Some(Self::Image)
        } else if essence == "application/pdf" {
            Some(Self::Document)
        } else {
            None
        }
    }

    /// Resolves the kind from a declared content type, consulting the file
    /// name only when the declared type is missing or generic.
    pub fn resolve(content_type: Option<&str>, filename: &str) -> Option<Self> {
        match content_type {
            Some(ct) if !is_generic_content_type(ct) => Self::from_content_type(ct),
            _ => mime_guess::from_path(filename)
                .first()
                .and_then(|m| Self::from_content_type(m.essence_str())),
        }
    }
}

fn is_generic_content_type(content_type: &str) -> bool {
    let trimmed = content_type.trim();
    trimmed.is_empty() || trimmed.eq_ignore_ascii_case("application/octet-stream")
}
