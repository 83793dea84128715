//! Export worker: the only owner of the export connection.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

use tokio::io::AsyncWriteExt;
use tokio_util::sync::CancellationToken;

use super::queue::ExportQueue;
use super::sink::ExportSink;
use super::wire_format::{ExportHeader, ExportRequest, ExportResponse, ExportStatus, HASH_SIZE};
use super::{ExportContext, ExportTakeTask, TaskId};
use crate::config::ExportConfig;
use crate::error::{CpsError, Result};
use crate::transaction::TransactionIds;
use crate::transport::{
    connect_timeout, read_exact_timeout, write_all_timeout, BoxedStream, Connector,
};

/// Per-task progress, logged as the task advances.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ExportState {
    Idle,
    Sending,
    Receiving,
    Done,
}

pub(crate) struct ExportWorker {
    config: ExportConfig,
    connector: Arc<dyn Connector>,
    address: String,
    queue: Arc<ExportQueue>,
    transaction_ids: TransactionIds,
    connection: Option<BoxedStream>,
}

impl ExportWorker {
    pub(crate) fn new(
        config: ExportConfig,
        connector: Arc<dyn Connector>,
        address: String,
        queue: Arc<ExportQueue>,
    ) -> Self {
        Self {
            config,
            connector,
            address,
            queue,
            transaction_ids: TransactionIds::random(),
            connection: None,
        }
    }

    /// Process tasks until the shutdown sentinel is popped.
    pub(crate) async fn run(mut self) {
        while let Some((id, task, cancel)) = self.queue.pop().await {
            self.execute(id, task, &cancel).await;
            self.queue.finish_running(id);
        }
        self.close().await;
        tracing::debug!("Export worker exiting");
    }

    async fn execute(&mut self, id: TaskId, task: ExportTakeTask, cancel: &CancellationToken) {
        let ExportTakeTask { contexts, mut sink } = task;
        log_state(id, ExportState::Idle);

        let result = self.transfer(id, &contexts, sink.as_mut(), cancel).await;

        let keep_connection = result.is_ok() && !cancel.is_cancelled() && !self.queue.is_empty();
        if !keep_connection {
            self.close().await;
        }

        log_state(id, ExportState::Done);
        match &result {
            Ok(()) => tracing::debug!("Export task {} finished", id),
            Err(CpsError::Aborted) => tracing::debug!("Export task {} aborted", id),
            Err(e) => tracing::warn!("Export task {} failed: {}", id, e),
        }
        sink.finalize(result);
    }

    async fn transfer(
        &mut self,
        id: TaskId,
        contexts: &[ExportContext],
        sink: &mut dyn ExportSink,
        cancel: &CancellationToken,
    ) -> Result<()> {
        checkpoint(cancel)?;
        let mut stream = match self.connection.take() {
            Some(stream) => stream,
            None => {
                cancellable(
                    cancel,
                    connect_timeout(
                        self.connector.as_ref(),
                        &self.address,
                        self.config.connect_timeout,
                    ),
                )
                .await?
            }
        };

        let result = self.exchange(id, &mut stream, contexts, sink, cancel).await;
        // Reuse is decided by the caller; the stream goes back either way.
        self.connection = Some(stream);
        result
    }

    async fn exchange(
        &self,
        id: TaskId,
        stream: &mut BoxedStream,
        contexts: &[ExportContext],
        sink: &mut dyn ExportSink,
        cancel: &CancellationToken,
    ) -> Result<()> {
        log_state(id, ExportState::Sending);
        let mut expected: HashMap<u32, &ExportContext> = HashMap::with_capacity(contexts.len());
        for context in contexts {
            checkpoint(cancel)?;
            let transaction_id = self.transaction_ids.next_id();
            let request = ExportRequest::new(
                ExportHeader::new(self.config.protocol_version, transaction_id),
                context.take_name.as_str(),
                context.file.name.as_str(),
                context.file.offset,
            );
            let bytes = request.encode()?;
            cancellable(
                cancel,
                write_all_timeout(stream, &bytes, self.config.write_timeout),
            )
            .await?;
            expected.insert(transaction_id, context);
        }

        log_state(id, ExportState::Receiving);
        let chunk_size = self.config.chunk_size.max(1);
        let mut chunk = vec![0u8; chunk_size];
        while !expected.is_empty() {
            checkpoint(cancel)?;
            let response = cancellable(
                cancel,
                ExportResponse::read_from(stream, self.config.read_timeout),
            )
            .await?;

            if response.status != ExportStatus::Success {
                return Err(CpsError::ExportStatus(response.status));
            }
            if response.header.version != self.config.protocol_version {
                return Err(CpsError::UnsupportedVersion {
                    expected: self.config.protocol_version,
                    actual: response.header.version,
                });
            }
            let transaction_id = response.header.transaction_id;
            let context = *expected
                .get(&transaction_id)
                .ok_or(CpsError::UnknownTransaction(transaction_id))?;
            let length = response
                .length
                .ok_or_else(|| CpsError::Protocol("success response without length".into()))?;

            sink.start_file(&context.take_name, &context.file)?;

            let mut remaining = length;
            while remaining > 0 {
                checkpoint(cancel)?;
                let n = remaining.min(chunk_size as u64) as usize;
                cancellable(
                    cancel,
                    read_exact_timeout(stream, &mut chunk[..n], self.config.read_timeout),
                )
                .await?;
                sink.process_data(&chunk[..n])?;
                remaining -= n as u64;
            }

            let mut hash = [0u8; HASH_SIZE];
            cancellable(
                cancel,
                read_exact_timeout(stream, &mut hash, self.config.read_timeout),
            )
            .await?;
            if !sink.finish_file(&context.take_name, &context.file, &hash) {
                return Err(CpsError::HashMismatch {
                    take: context.take_name.clone(),
                    file: context.file.name.clone(),
                });
            }
            expected.remove(&transaction_id);
            tracing::trace!(
                "Task {} received {}/{} ({} bytes)",
                id,
                context.take_name,
                context.file.name,
                length
            );
        }
        Ok(())
    }

    async fn close(&mut self) {
        if let Some(mut stream) = self.connection.take() {
            let _ = stream.shutdown().await;
            tracing::debug!("Export connection closed");
        }
    }
}

fn log_state(id: TaskId, state: ExportState) {
    tracing::debug!("Export task {} -> {:?}", id, state);
}

fn checkpoint(cancel: &CancellationToken) -> Result<()> {
    if cancel.is_cancelled() {
        return Err(CpsError::Aborted);
    }
    Ok(())
}

/// Run `fut` unless the task is cancelled first.
async fn cancellable<T, F>(cancel: &CancellationToken, fut: F) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    tokio::select! {
        _ = cancel.cancelled() => Err(CpsError::Aborted),
        result = fut => result,
    }
}
