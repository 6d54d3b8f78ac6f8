//! Wires configuration into a ready-to-use import service: database, object
//! store, converters, task endpoint, dispatcher and orchestrator.

use std::sync::Arc;
use std::time::{Duration, Instant};

use log::info;

use crate::config::{DispatchMode, ImportConfig};
use crate::db::Database;
use crate::dispatch::{Dispatcher, InlineDispatcher, QueuedDispatcher};
use crate::error::ImportError;
use crate::model::JobStatusView;
use crate::pipeline::{CompletionTracker, ImportOrchestrator, ImportRequest, OrchestratorSettings};
use crate::processor::ConverterRegistry;
use crate::queue::local::LocalQueueSettings;
use crate::queue::{HttpTaskQueue, LocalTaskQueue, TaskQueue};
use crate::source::SubmissionSource;
use crate::storage::{LocalObjectStore, ObjectStore};
use crate::worker::{ConversionWorker, TaskEndpoint};

const STATUS_POLL_INTERVAL: Duration = Duration::from_millis(200);
const LOCAL_RETRY_BACKOFF: Duration = Duration::from_secs(1);

pub struct ImportService {
    db: Database,
    orchestrator: Arc<ImportOrchestrator>,
    endpoint: Arc<TaskEndpoint>,
    /// Present when queued mode runs without a remote queue.
    local_queue: Option<Arc<LocalTaskQueue>>,
}

impl ImportService {
    /// Opens the configured database and store, rendering documents with
    /// poppler.
    pub fn from_config(
        config: &ImportConfig,
        source: Arc<dyn SubmissionSource>,
    ) -> Result<Self, ImportError> {
        let db = Database::open(&config.database_path)?;
        let store: Arc<dyn ObjectStore> = Arc::new(LocalObjectStore::new(
            &config.storage.root,
            &config.storage.public_base_url,
        ));
        let registry = ConverterRegistry::new(&config.conversion);
        Self::build(config, db, store, source, registry)
    }

    /// Assembles the service from already-constructed parts.
    pub fn build(
        config: &ImportConfig,
        db: Database,
        store: Arc<dyn ObjectStore>,
        source: Arc<dyn SubmissionSource>,
        registry: ConverterRegistry,
    ) -> Result<Self, ImportError> {
        let tracker = Arc::new(CompletionTracker::new(db.clone()));
        let worker = ConversionWorker::new(
            db.clone(),
            Arc::clone(&store),
            Arc::new(registry),
            config.storage.artwork_prefix.clone(),
        );
        let endpoint = Arc::new(TaskEndpoint::new(worker, tracker));

        let dispatch = &config.dispatch;
        let mut local_queue = None;
        let dispatcher: Arc<dyn Dispatcher> = match dispatch.mode {
            DispatchMode::Inline => {
                info!("Dispatching work units inline");
                Arc::new(InlineDispatcher::new(Arc::clone(&endpoint)))
            }
            DispatchMode::Queued => {
                let queue: Arc<dyn TaskQueue> = match &dispatch.queue {
                    Some(remote) => {
                        info!("Dispatching work units to remote task queue");
                        Arc::new(HttpTaskQueue::from_config(remote)?)
                    }
                    None => {
                        info!("Dispatching work units to local task queue");
                        let queue = Arc::new(LocalTaskQueue::start(
                            Arc::clone(&endpoint) as Arc<dyn crate::queue::TaskHandler>,
                            LocalQueueSettings {
                                worker_count: dispatch.worker_count,
                                max_attempts: dispatch.max_attempts,
                                retry_backoff: LOCAL_RETRY_BACKOFF,
                            },
                        ));
                        local_queue = Some(Arc::clone(&queue));
                        queue
                    }
                };
                Arc::new(QueuedDispatcher::new(
                    queue,
                    db.clone(),
                    Arc::clone(&store),
                    Duration::from_millis(dispatch.stagger_ms),
                ))
            }
        };

        let orchestrator = Arc::new(ImportOrchestrator::new(
            db.clone(),
            store,
            source,
            dispatcher,
            OrchestratorSettings {
                submission_states: config.source.submission_states.clone(),
                staging_prefix: config.storage.staging_prefix.clone(),
            },
        ));

        Ok(Self {
            db,
            orchestrator,
            endpoint,
            local_queue,
        })
    }

    pub fn database(&self) -> &Database {
        &self.db
    }

    pub fn orchestrator(&self) -> &Arc<ImportOrchestrator> {
        &self.orchestrator
    }

    /// The processing endpoint, for hosting it behind a remote queue.
    pub fn endpoint(&self) -> &Arc<TaskEndpoint> {
        &self.endpoint
    }

    pub fn local_queue(&self) -> Option<&Arc<LocalTaskQueue>> {
        self.local_queue.as_ref()
    }

    pub async fn start_import(&self, request: &ImportRequest) -> Result<String, ImportError> {
        self.orchestrator.start_import(request).await
    }

    pub fn job_status(&self, job_id: &str) -> Result<JobStatusView, ImportError> {
        self.orchestrator.job_status(job_id)
    }

    /// Polls until the job is terminal or `timeout` elapses, returning the
    /// last observed status.
    pub async fn wait_for_job(
        &self,
        job_id: &str,
        timeout: Duration,
    ) -> Result<JobStatusView, ImportError> {
        let deadline = Instant::now() + timeout;
        loop {
            let status = self.job_status(job_id)?;
            if status.status.is_terminal() || Instant::now() >= deadline {
                return Ok(status);
            }
            tokio::time::sleep(STATUS_POLL_INTERVAL).await;
        }
    }

    /// Stops the local queue's workers, if any.
    pub fn shutdown(&self) {
        if let Some(queue) = &self.local_queue {
            queue.join();
        }
    }
}
