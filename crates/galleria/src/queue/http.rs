//! Remote task queue speaking a Cloud-Tasks style REST API: each task is an
//! HTTP POST of the payload to the processing endpoint, scheduled for a
//! given time.

use std::time::Duration;

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use chrono::{DateTime, SecondsFormat, Utc};
use reqwest::Client;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};

use super::{QueueError, TaskQueue};
use crate::config::QueueConfig;
use crate::sanitize::redact_url;
use crate::secrets::SecretRef;

const MAX_ERROR_BODY_LENGTH: usize = 200;
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct CreateTaskRequest<'a> {
    task: TaskBody<'a>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct TaskBody<'a> {
    schedule_time: String,
    http_request: HttpRequestBody<'a>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct HttpRequestBody<'a> {
    url: &'a str,
    http_method: &'static str,
    headers: Headers,
    body: String,
}

#[derive(Serialize)]
struct Headers {
    #[serde(rename = "Content-Type")]
    content_type: &'static str,
}

#[derive(Deserialize)]
struct CreatedTask {
    name: String,
}

fn create_task_request<'a>(
    processing_url: &'a str,
    payload: &[u8],
    not_before: DateTime<Utc>,
) -> CreateTaskRequest<'a> {
    CreateTaskRequest {
        task: TaskBody {
            schedule_time: not_before.to_rfc3339_opts(SecondsFormat::Millis, true),
            http_request: HttpRequestBody {
                url: processing_url,
                http_method: "POST",
                headers: Headers {
                    content_type: "application/json",
                },
                body: BASE64.encode(payload),
            },
        },
    }
}

pub struct HttpTaskQueue {
    client: Client,
    endpoint: String,
    processing_url: String,
    token: Option<SecretString>,
}

impl HttpTaskQueue {
    pub fn from_config(config: &QueueConfig) -> Result<Self, QueueError> {
        let token = SecretRef::new(
            config.token_insecure.as_deref(),
            config.token_file.as_deref(),
            config.token_env_var.as_deref(),
        )
        .resolve_optional()?;

        let client = Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .user_agent(concat!("galleria/", env!("CARGO_PKG_VERSION")))
            .build()?;

        Ok(Self::with_client(
            client,
            &config.endpoint,
            &config.processing_url,
            token,
        ))
    }

    pub fn with_client(
        client: Client,
        endpoint: &str,
        processing_url: &str,
        token: Option<SecretString>,
    ) -> Self {
        Self {
            client,
            endpoint: endpoint.trim_end_matches('/').to_string(),
            processing_url: processing_url.to_string(),
            token,
        }
    }

    fn tasks_url(&self) -> String {
        format!("{}/tasks", self.endpoint)
    }
}

#[async_trait]
impl TaskQueue for HttpTaskQueue {
    async fn enqueue(&self, payload: Vec<u8>, not_before: DateTime<Utc>) -> Result<String, QueueError> {
        let url = self.tasks_url();
        let body = create_task_request(&self.processing_url, &payload, not_before);

        let mut request = self.client.post(&url).json(&body);
        if let Some(token) = &self.token {
            request = request.bearer_auth(token.expose_secret());
        }

        let response = request.send().await?;
        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            tracing::warn!(url = %redact_url(&url), status = status.as_u16(), "task creation rejected");
            return Err(QueueError::Api {
                status: status.as_u16(),
                body: text.chars().take(MAX_ERROR_BODY_LENGTH).collect(),
            });
        }

        let created: CreatedTask = response.json().await?;
        tracing::debug!(task = %created.name, "task enqueued");
        Ok(created.name)
    }
}
