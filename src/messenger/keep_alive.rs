//! Periodic keep-alive over the normal request path.

use std::sync::{Arc, Weak};
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use super::{ConnectionShared, Inner};
use crate::control::KeepAlive;

/// A running keep-alive task.
pub(crate) struct KeepAliveTask {
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

impl KeepAliveTask {
    pub(crate) fn spawn(
        inner: Weak<Inner>,
        connection: Arc<ConnectionShared>,
        interval: Duration,
        failure_bound: u32,
    ) -> Self {
        let cancel = CancellationToken::new();
        let handle = tokio::spawn(run(inner, connection, interval, failure_bound, cancel.clone()));
        Self { cancel, handle }
    }

    /// Signal the task to exit without waiting for it.
    pub(crate) fn cancel(self) {
        self.cancel.cancel();
    }

    /// Signal the task and wait for it to exit.
    pub(crate) async fn shutdown(self) {
        self.cancel.cancel();
        let _ = self.handle.await;
    }
}

async fn run(
    inner: Weak<Inner>,
    connection: Arc<ConnectionShared>,
    period: Duration,
    failure_bound: u32,
    cancel: CancellationToken,
) {
    let mut ticker = interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut failures = 0u32;

    loop {
        tokio::select! {
            _ = cancel.cancelled() => return,
            _ = ticker.tick() => {}
        }

        let Some(messenger) = inner.upgrade() else {
            return;
        };

        let result = tokio::select! {
            _ = cancel.cancelled() => return,
            result = messenger.send_request(&KeepAlive) => result,
        };

        match result {
            Ok(_) => {
                if failures > 0 {
                    tracing::debug!("Keep-alive recovered after {} failure(s)", failures);
                }
                failures = 0;
            }
            Err(e) => {
                failures += 1;
                tracing::warn!(
                    "Keep-alive failed ({}/{}): {}",
                    failures,
                    failure_bound,
                    e
                );
                if failures >= failure_bound {
                    tracing::error!("Keep-alive failure bound reached, disconnecting");
                    messenger.report_disconnect(&connection);
                    // Stopping joins this task, so it has to run elsewhere.
                    let generation = connection.generation;
                    tokio::spawn(async move { messenger.shutdown(Some(generation)).await });
                    return;
                }
            }
        }
    }
}
