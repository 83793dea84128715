//! Public entry point for take exports.
//!
//! # Example
//!
//! ```ignore
//! use cps_client::export::{ExportClient, ExportFile, FileSink};
//!
//! let client = ExportClient::builder().build("192.168.1.20", info.export_port);
//! let (sink, done) = FileSink::channel("/captures");
//! let id = client.export_take_files("slate_1", vec![ExportFile::new("video.mov", 1 << 20)], sink)?;
//! let paths = done.await??;
//! ```

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::task::JoinHandle;

use super::queue::{AbortOutcome, ExportQueue};
use super::sink::ExportSink;
use super::worker::ExportWorker;
use super::{ExportContext, ExportFile, ExportTakeTask, TaskId};
use crate::config::ExportConfig;
use crate::error::{CpsError, Result};
use crate::transport::{Connector, TcpConnector};

/// Builder for configuring an [`ExportClient`].
pub struct ExportClientBuilder {
    config: ExportConfig,
    connector: Arc<dyn Connector>,
}

impl ExportClientBuilder {
    pub fn new() -> Self {
        Self {
            config: ExportConfig::default(),
            connector: Arc::new(TcpConnector),
        }
    }

    pub fn config(mut self, config: ExportConfig) -> Self {
        self.config = config;
        self
    }

    /// Default: 1
    pub fn protocol_version(mut self, version: u16) -> Self {
        self.config.protocol_version = version;
        self
    }

    /// Largest single read of file data.
    ///
    /// Default: 64 KiB
    pub fn chunk_size(mut self, size: usize) -> Self {
        self.config.chunk_size = size.max(1);
        self
    }

    /// Bounds every read, so it also bounds how long an abort can take to
    /// be observed.
    ///
    /// Default: 5 seconds
    pub fn read_timeout(mut self, timeout: Duration) -> Self {
        self.config.read_timeout = timeout;
        self
    }

    /// Default: 5 seconds
    pub fn write_timeout(mut self, timeout: Duration) -> Self {
        self.config.write_timeout = timeout;
        self
    }

    /// Default: 5 seconds
    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.config.connect_timeout = timeout;
        self
    }

    /// Default: `i32::MAX`
    pub fn queue_capacity(mut self, capacity: usize) -> Self {
        self.config.queue_capacity = capacity;
        self
    }

    pub fn connector<C: Connector>(mut self, connector: C) -> Self {
        self.connector = Arc::new(connector);
        self
    }

    /// Spawn the worker for the export server at `host:port`.
    ///
    /// Must be called from within a Tokio runtime. The connection is opened
    /// lazily by the first task.
    pub fn build(self, host: &str, port: u16) -> ExportClient {
        let queue = Arc::new(ExportQueue::new(self.config.queue_capacity));
        let worker = ExportWorker::new(
            self.config.clone(),
            self.connector,
            format!("{}:{}", host, port),
            queue.clone(),
        );
        let handle = tokio::spawn(worker.run());

        ExportClient {
            config: self.config,
            queue,
            next_task_id: AtomicU32::new(1),
            worker: Mutex::new(Some(handle)),
        }
    }
}

impl Default for ExportClientBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Queues export tasks for a single background worker.
pub struct ExportClient {
    config: ExportConfig,
    queue: Arc<ExportQueue>,
    next_task_id: AtomicU32,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl ExportClient {
    pub fn builder() -> ExportClientBuilder {
        ExportClientBuilder::new()
    }

    pub fn config(&self) -> &ExportConfig {
        &self.config
    }

    /// Queue `files` of one take. Returns the task id without waiting.
    ///
    /// When the task cannot be queued the sink is finalized with the same
    /// error that is returned.
    pub fn export_take_files<S: ExportSink>(
        &self,
        take_name: &str,
        files: Vec<ExportFile>,
        sink: S,
    ) -> Result<TaskId> {
        self.export_files(vec![(take_name.to_string(), files)], sink)
    }

    /// Queue files from several takes as one task.
    pub fn export_files<S: ExportSink>(
        &self,
        takes: Vec<(String, Vec<ExportFile>)>,
        sink: S,
    ) -> Result<TaskId> {
        let contexts = takes
            .into_iter()
            .flat_map(|(take_name, files)| {
                files.into_iter().map(move |file| ExportContext {
                    take_name: take_name.clone(),
                    file,
                })
            })
            .collect();
        let task = ExportTakeTask {
            contexts,
            sink: Box::new(sink),
        };

        let id = self.next_task_id.fetch_add(1, Ordering::Relaxed);
        match self.queue.push(id, task) {
            Ok(()) => {
                tracing::debug!("Export task {} queued", id);
                Ok(id)
            }
            Err((error, task)) => {
                tracing::warn!("Export task {} rejected: {}", id, error);
                let returned = match &error {
                    CpsError::QueueFull => CpsError::QueueFull,
                    _ => CpsError::InvalidState("export client is shut down"),
                };
                task.sink.finalize(Err(error));
                Err(returned)
            }
        }
    }

    /// Abort one task. A queued task is finalized with `Aborted` right away;
    /// a running one fails with `Aborted` at its next checkpoint.
    ///
    /// Returns false if the id is unknown or already finished.
    pub fn abort_export(&self, id: TaskId) -> bool {
        match self.queue.abort(id) {
            AbortOutcome::Removed(task) => {
                tracing::debug!("Export task {} removed from queue", id);
                task.sink.finalize(Err(CpsError::Aborted));
                true
            }
            AbortOutcome::Cancelled => {
                tracing::debug!("Export task {} cancelled while running", id);
                true
            }
            AbortOutcome::NotFound => false,
        }
    }

    /// Finalize every queued task with `Aborted` and cancel the running one.
    ///
    /// Returns the number of queued tasks removed.
    pub fn abort_all_exports(&self) -> usize {
        let drained = self.queue.drain();
        let count = drained.len();
        for (id, task) in drained {
            tracing::debug!("Export task {} removed from queue", id);
            task.sink.finalize(Err(CpsError::Aborted));
        }
        self.queue.cancel_running();
        count
    }

    /// Abort everything and wait for the worker to exit. Idempotent.
    pub async fn shutdown(&self) {
        self.abort_all_exports();
        self.queue.close();
        let worker = self
            .worker
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take();
        if let Some(handle) = worker {
            let _ = handle.await;
        }
    }

    /// No task queued or running.
    pub fn is_idle(&self) -> bool {
        self.queue.is_empty() && !self.queue.is_running()
    }

    pub fn queued_tasks(&self) -> usize {
        self.queue.len()
    }
}

impl Drop for ExportClient {
    fn drop(&mut self) {
        self.abort_all_exports();
        self.queue.close();
    }
}
