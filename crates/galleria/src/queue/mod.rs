//! Task queues carrying serialized work units to the conversion endpoint.

pub mod http;
pub mod local;

pub use http::HttpTaskQueue;
pub use local::LocalTaskQueue;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::secrets::SecretError;

#[derive(Error, Debug)]
pub enum QueueError {
    #[error("Queue request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("Queue rejected task with status {status}: {body}")]
    Api { status: u16, body: String },

    #[error("Queue credentials could not be resolved: {0}")]
    Credentials(#[from] SecretError),

    #[error("Queue is shut down")]
    Closed,
}

/// At-least-once delivery of opaque payloads, each no earlier than its
/// `not_before` time. Returns the queue-assigned task name.
#[async_trait]
pub trait TaskQueue: Send + Sync {
    async fn enqueue(&self, payload: Vec<u8>, not_before: DateTime<Utc>) -> Result<String, QueueError>;
}

/// Result of one delivery attempt, as reported back to the queue.
#[derive(Debug, Clone, PartialEq)]
pub enum Delivery {
    /// Handled; do not deliver again.
    Done,
    /// Transient failure; deliver again if attempts remain.
    Retry(String),
    /// The payload can never succeed; drop it.
    Reject(String),
}

/// Receiving side of a queue.
pub trait TaskHandler: Send + Sync {
    fn handle(&self, payload: &[u8]) -> Delivery;

    /// Called once when a payload ran out of delivery attempts.
    fn on_exhausted(&self, payload: &[u8], last_error: &str);
}
