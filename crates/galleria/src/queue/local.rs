use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use crossbeam_channel::{unbounded, Receiver, RecvTimeoutError, Sender};
use log::{debug, error, info, warn};

use super::{Delivery, QueueError, TaskHandler, TaskQueue};

const POLL_INTERVAL: Duration = Duration::from_millis(100);

#[derive(Debug, Clone)]
pub struct LocalQueueSettings {
    pub worker_count: usize,
    pub max_attempts: u32,
    /// Delay before redelivery, multiplied by the attempt number.
    pub retry_backoff: Duration,
}

impl Default for LocalQueueSettings {
    fn default() -> Self {
        Self {
            worker_count: 2,
            max_attempts: 3,
            retry_backoff: Duration::from_secs(1),
        }
    }
}

struct QueuedTask {
    name: String,
    payload: Vec<u8>,
    not_before: DateTime<Utc>,
    attempt: u32,
}

/// In-process task queue backed by a pool of worker threads.
///
/// Delivery is at-least-once: a payload whose handler asks for a retry is
/// delivered again after a linear backoff until `max_attempts` is reached,
/// then handed to [`TaskHandler::on_exhausted`].
pub struct LocalTaskQueue {
    sender: Sender<QueuedTask>,
    workers: Mutex<Vec<JoinHandle<()>>>,
    shutdown: Arc<AtomicBool>,
    pending: Arc<AtomicUsize>,
    next_id: AtomicU64,
}

impl LocalTaskQueue {
    /// Starts the worker threads. A `worker_count` of 0 is raised to 1.
    pub fn start(handler: Arc<dyn TaskHandler>, settings: LocalQueueSettings) -> Self {
        let worker_count = settings.worker_count.max(1);
        let (sender, receiver) = unbounded::<QueuedTask>();
        let shutdown = Arc::new(AtomicBool::new(false));
        let pending = Arc::new(AtomicUsize::new(0));

        let workers = (0..worker_count)
            .map(|worker_id| {
                let worker = Worker {
                    id: worker_id,
                    receiver: receiver.clone(),
                    requeue: sender.clone(),
                    handler: Arc::clone(&handler),
                    shutdown: Arc::clone(&shutdown),
                    pending: Arc::clone(&pending),
                    max_attempts: settings.max_attempts.max(1),
                    retry_backoff: settings.retry_backoff,
                };
                thread::spawn(move || worker.run())
            })
            .collect();

        info!("Started local task queue with {} workers", worker_count);

        Self {
            sender,
            workers: Mutex::new(workers),
            shutdown,
            pending,
            next_id: AtomicU64::new(1),
        }
    }

    /// Tasks enqueued and not yet finished (including scheduled retries).
    pub fn pending(&self) -> usize {
        self.pending.load(Ordering::SeqCst)
    }

    /// Blocks until no task is pending or `timeout` elapses. Returns true
    /// if the queue drained.
    pub fn wait_idle(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        while self.pending() > 0 {
            if Instant::now() >= deadline {
                return false;
            }
            thread::sleep(Duration::from_millis(20));
        }
        true
    }

    pub fn shutdown(&self) {
        info!("Shutting down local task queue...");
        self.shutdown.store(true, Ordering::Relaxed);
    }

    pub fn is_shutdown(&self) -> bool {
        self.shutdown.load(Ordering::Relaxed)
    }

    /// Signals shutdown and joins every worker. Tasks still queued are
    /// abandoned.
    pub fn join(&self) {
        self.shutdown();
        let workers = match self.workers.lock() {
            Ok(mut guard) => std::mem::take(&mut *guard),
            Err(poisoned) => std::mem::take(&mut *poisoned.into_inner()),
        };
        for (i, worker) in workers.into_iter().enumerate() {
            if let Err(e) = worker.join() {
                error!("Queue worker {} panicked: {:?}", i, e);
            } else {
                debug!("Queue worker {} finished", i);
            }
        }
        info!("All queue workers have stopped");
    }
}

impl Drop for LocalTaskQueue {
    fn drop(&mut self) {
        self.join();
    }
}

#[async_trait]
impl TaskQueue for LocalTaskQueue {
    async fn enqueue(&self, payload: Vec<u8>, not_before: DateTime<Utc>) -> Result<String, QueueError> {
        if self.is_shutdown() {
            return Err(QueueError::Closed);
        }

        let name = format!("local-{}", self.next_id.fetch_add(1, Ordering::Relaxed));
        self.pending.fetch_add(1, Ordering::SeqCst);
        let task = QueuedTask {
            name: name.clone(),
            payload,
            not_before,
            attempt: 0,
        };
        if self.sender.send(task).is_err() {
            self.pending.fetch_sub(1, Ordering::SeqCst);
            return Err(QueueError::Closed);
        }
        Ok(name)
    }
}

struct Worker {
    id: usize,
    receiver: Receiver<QueuedTask>,
    requeue: Sender<QueuedTask>,
    handler: Arc<dyn TaskHandler>,
    shutdown: Arc<AtomicBool>,
    pending: Arc<AtomicUsize>,
    max_attempts: u32,
    retry_backoff: Duration,
}

impl Worker {
    fn run(self) {
        debug!("Queue worker {} started", self.id);

        loop {
            if self.shutdown.load(Ordering::Relaxed) {
                debug!("Queue worker {} received shutdown signal", self.id);
                break;
            }

            match self.receiver.recv_timeout(POLL_INTERVAL) {
                Ok(task) => {
                    if let Some(wait) = remaining(task.not_before) {
                        // Not due yet: nap briefly, then let any worker pick it up again.
                        thread::sleep(wait.min(POLL_INTERVAL));
                        if remaining(task.not_before).is_some() {
                            self.put_back(task);
                            continue;
                        }
                    }
                    self.deliver(task);
                }
                Err(RecvTimeoutError::Timeout) => continue,
                Err(RecvTimeoutError::Disconnected) => {
                    debug!("Queue worker {} channel disconnected", self.id);
                    break;
                }
            }
        }

        debug!("Queue worker {} stopped", self.id);
    }

    fn deliver(&self, mut task: QueuedTask) {
        task.attempt += 1;
        debug!(
            "Queue worker {} delivering {} (attempt {})",
            self.id, task.name, task.attempt
        );

        let delivery = panic::catch_unwind(AssertUnwindSafe(|| self.handler.handle(&task.payload)))
            .unwrap_or_else(|_| Delivery::Retry("handler panicked".to_string()));

        match delivery {
            Delivery::Done => self.finish(),
            Delivery::Reject(reason) => {
                warn!("Task {} rejected: {}", task.name, reason);
                self.finish();
            }
            Delivery::Retry(reason) if task.attempt < self.max_attempts => {
                warn!(
                    "Task {} failed on attempt {}/{}: {}",
                    task.name, task.attempt, self.max_attempts, reason
                );
                let backoff = self.retry_backoff * task.attempt;
                task.not_before = Utc::now()
                    + chrono::Duration::from_std(backoff).unwrap_or_else(|_| chrono::Duration::zero());
                self.put_back(task);
            }
            Delivery::Retry(reason) => {
                error!(
                    "Task {} exhausted {} attempts: {}",
                    task.name, self.max_attempts, reason
                );
                self.handler.on_exhausted(&task.payload, &reason);
                self.finish();
            }
        }
    }

    fn put_back(&self, task: QueuedTask) {
        if self.requeue.send(task).is_err() {
            self.finish();
        }
    }

    fn finish(&self) {
        self.pending.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Time left until `not_before`, or `None` if it is due.
fn remaining(not_before: DateTime<Utc>) -> Option<Duration> {
    (not_before - Utc::now())
        .to_std()
        .ok()
        .filter(|d| !d.is_zero())
}
