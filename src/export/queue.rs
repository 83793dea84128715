//! FIFO of export tasks feeding the single worker.

use std::collections::VecDeque;
use std::sync::{Mutex, MutexGuard};

use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;

use super::{ExportTakeTask, TaskId};
use crate::error::CpsError;

enum Entry {
    Task(TaskId, ExportTakeTask),
    /// Makes `pop` return `None`.
    Shutdown,
}

struct Running {
    id: TaskId,
    cancel: CancellationToken,
}

#[derive(Default)]
struct QueueState {
    entries: VecDeque<Entry>,
    /// Number of `Entry::Task` in `entries`.
    queued: usize,
    running: Option<Running>,
    closed: bool,
}

/// Result of [`ExportQueue::abort`].
pub(crate) enum AbortOutcome {
    /// Still queued; handed back untouched.
    Removed(ExportTakeTask),
    /// Running; its token was cancelled.
    Cancelled,
    NotFound,
}

/// Bounded task queue.
///
/// Semaphore permits track pushes. Aborted entries leave a permit behind,
/// so `pop` simply retries when it wakes to an empty deque.
pub(crate) struct ExportQueue {
    state: Mutex<QueueState>,
    permits: Semaphore,
    capacity: usize,
}

impl ExportQueue {
    pub(crate) fn new(capacity: usize) -> Self {
        Self {
            state: Mutex::new(QueueState::default()),
            permits: Semaphore::new(0),
            capacity,
        }
    }

    fn lock(&self) -> MutexGuard<'_, QueueState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Enqueue without blocking. On failure the task is handed back.
    pub(crate) fn push(
        &self,
        id: TaskId,
        task: ExportTakeTask,
    ) -> std::result::Result<(), (CpsError, ExportTakeTask)> {
        let mut state = self.lock();
        if state.closed {
            return Err((CpsError::InvalidState("export client is shut down"), task));
        }
        if state.queued >= self.capacity {
            return Err((CpsError::QueueFull, task));
        }
        state.entries.push_back(Entry::Task(id, task));
        state.queued += 1;
        drop(state);
        self.permits.add_permits(1);
        Ok(())
    }

    /// Wait for the next task and mark it running.
    ///
    /// Returns `None` once the shutdown sentinel is reached.
    pub(crate) async fn pop(&self) -> Option<(TaskId, ExportTakeTask, CancellationToken)> {
        loop {
            let permit = self.permits.acquire().await.ok()?;
            permit.forget();

            let mut state = self.lock();
            match state.entries.pop_front() {
                Some(Entry::Task(id, task)) => {
                    state.queued -= 1;
                    let cancel = CancellationToken::new();
                    state.running = Some(Running {
                        id,
                        cancel: cancel.clone(),
                    });
                    return Some((id, task, cancel));
                }
                Some(Entry::Shutdown) => return None,
                None => continue,
            }
        }
    }

    /// Clear the running marker once `id` has been finalized.
    pub(crate) fn finish_running(&self, id: TaskId) {
        let mut state = self.lock();
        if state.running.as_ref().map(|r| r.id) == Some(id) {
            state.running = None;
        }
    }

    pub(crate) fn abort(&self, id: TaskId) -> AbortOutcome {
        let mut state = self.lock();
        let position = state
            .entries
            .iter()
            .position(|e| matches!(e, Entry::Task(task_id, _) if *task_id == id));
        if let Some(index) = position {
            if let Some(Entry::Task(_, task)) = state.entries.remove(index) {
                state.queued -= 1;
                return AbortOutcome::Removed(task);
            }
        }
        match &state.running {
            Some(running) if running.id == id => {
                running.cancel.cancel();
                AbortOutcome::Cancelled
            }
            _ => AbortOutcome::NotFound,
        }
    }

    /// Remove every queued task, keeping a pending shutdown sentinel.
    pub(crate) fn drain(&self) -> Vec<(TaskId, ExportTakeTask)> {
        let mut state = self.lock();
        let mut drained = Vec::new();
        let mut kept = VecDeque::new();
        for entry in state.entries.drain(..) {
            match entry {
                Entry::Task(id, task) => drained.push((id, task)),
                Entry::Shutdown => kept.push_back(Entry::Shutdown),
            }
        }
        state.entries = kept;
        state.queued = 0;
        drained
    }

    /// Cancel the running task. Returns whether one was running.
    pub(crate) fn cancel_running(&self) -> bool {
        match &self.lock().running {
            Some(running) => {
                running.cancel.cancel();
                true
            }
            None => false,
        }
    }

    /// Reject further pushes and wake the worker with the sentinel.
    pub(crate) fn close(&self) {
        let mut state = self.lock();
        if state.closed {
            return;
        }
        state.closed = true;
        state.entries.push_back(Entry::Shutdown);
        drop(state);
        self.permits.add_permits(1);
    }

    /// Queued (not running) tasks.
    pub(crate) fn len(&self) -> usize {
        self.lock().queued
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub(crate) fn is_running(&self) -> bool {
        self.lock().running.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Result;
    use crate::export::{ExportContext, ExportFile, ExportSink, HASH_SIZE};
    use std::time::Duration;

    struct NullSink;

    impl ExportSink for NullSink {
        fn start_file(&mut self, _: &str, _: &ExportFile) -> Result<()> {
            Ok(())
        }
        fn process_data(&mut self, _: &[u8]) -> Result<()> {
            Ok(())
        }
        fn finish_file(&mut self, _: &str, _: &ExportFile, _: &[u8; HASH_SIZE]) -> bool {
            true
        }
        fn finalize(self: Box<Self>, _: Result<()>) {}
    }

    fn task(take: &str) -> ExportTakeTask {
        ExportTakeTask {
            contexts: vec![ExportContext {
                take_name: take.to_string(),
                file: ExportFile::new("f", 1),
            }],
            sink: Box::new(NullSink),
        }
    }

    #[tokio::test]
    async fn test_fifo_order() {
        let queue = ExportQueue::new(10);
        queue.push(1, task("a")).ok().unwrap();
        queue.push(2, task("b")).ok().unwrap();

        let (id, t, _) = queue.pop().await.unwrap();
        assert_eq!(id, 1);
        assert_eq!(t.contexts[0].take_name, "a");
        assert!(queue.is_running());
        queue.finish_running(1);

        let (id, _, _) = queue.pop().await.unwrap();
        assert_eq!(id, 2);
    }

    #[test]
    fn test_push_at_capacity() {
        let queue = ExportQueue::new(1);
        assert!(queue.push(1, task("a")).is_ok());
        match queue.push(2, task("b")) {
            Err((CpsError::QueueFull, t)) => assert_eq!(t.contexts[0].take_name, "b"),
            _ => panic!("expected QueueFull"),
        }
        assert_eq!(queue.len(), 1);
    }

    #[tokio::test]
    async fn test_capacity_frees_as_tasks_leave() {
        let queue = ExportQueue::new(2);
        queue.push(1, task("a")).ok().unwrap();
        queue.push(2, task("b")).ok().unwrap();
        assert!(matches!(queue.push(3, task("c")), Err((CpsError::QueueFull, _))));

        queue.pop().await.unwrap();
        assert_eq!(queue.len(), 1);
        queue.push(3, task("c")).ok().unwrap();

        assert!(matches!(queue.abort(3), AbortOutcome::Removed(_)));
        assert_eq!(queue.len(), 1);
        assert_eq!(queue.drain().len(), 1);
        assert_eq!(queue.len(), 0);
        queue.push(4, task("d")).ok().unwrap();
        queue.push(5, task("e")).ok().unwrap();
        assert_eq!(queue.len(), 2);
    }

    #[tokio::test]
    async fn test_abort_queued_and_running() {
        let queue = ExportQueue::new(10);
        queue.push(1, task("a")).ok().unwrap();
        queue.push(2, task("b")).ok().unwrap();

        let (_, _, cancel) = queue.pop().await.unwrap();

        assert!(matches!(queue.abort(2), AbortOutcome::Removed(_)));
        assert!(matches!(queue.abort(1), AbortOutcome::Cancelled));
        assert!(cancel.is_cancelled());
        assert!(matches!(queue.abort(3), AbortOutcome::NotFound));
        assert!(queue.is_empty());
    }

    #[tokio::test]
    async fn test_pop_skips_stale_permits() {
        let queue = ExportQueue::new(10);
        queue.push(1, task("a")).ok().unwrap();
        queue.push(2, task("b")).ok().unwrap();
        assert_eq!(queue.drain().len(), 2);

        queue.push(3, task("c")).ok().unwrap();
        let (id, _, _) = queue.pop().await.unwrap();
        assert_eq!(id, 3);

        let next = tokio::time::timeout(Duration::from_millis(50), queue.pop()).await;
        assert!(next.is_err());
    }

    #[tokio::test]
    async fn test_close_ends_pop_and_rejects_push() {
        let queue = ExportQueue::new(10);
        queue.push(1, task("a")).ok().unwrap();
        queue.close();

        assert!(queue.pop().await.is_some());
        assert!(queue.pop().await.is_none());
        assert!(matches!(
            queue.push(2, task("b")),
            Err((CpsError::InvalidState(_), _))
        ));
    }

    #[test]
    fn test_drain_keeps_sentinel() {
        let queue = ExportQueue::new(10);
        queue.push(1, task("a")).ok().unwrap();
        queue.close();

        assert_eq!(queue.drain().len(), 1);
        assert_eq!(queue.lock().entries.len(), 1);
    }
}
