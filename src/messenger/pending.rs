//! In-flight request table keyed by transaction id.
//!
//! A context is resolved at most once (by the receive loop, by a connection
//! failure, or by its own removal) and removed exactly once, always by the
//! task that registered it.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard};

use tokio::sync::oneshot;

use crate::error::{CpsError, Result};
use crate::protocol::ControlMessage;

type Promise = oneshot::Sender<Result<ControlMessage>>;
type Response = oneshot::Receiver<Result<ControlMessage>>;

/// A request waiting for its response.
#[derive(Debug)]
pub(crate) struct RequestContext {
    /// Distinguishes registrations that share a wrapped transaction id.
    nonce: u64,
    message: ControlMessage,
    promise: Option<Promise>,
}

impl RequestContext {
    /// The request as it was sent.
    pub(crate) fn message(&self) -> &ControlMessage {
        &self.message
    }

    /// Returns false if already resolved.
    fn resolve(&mut self, result: Result<ControlMessage>) -> bool {
        match self.promise.take() {
            Some(tx) => {
                // The waiter may have given up already; that is not an error here.
                let _ = tx.send(result);
                true
            }
            None => false,
        }
    }

    fn is_resolved(&self) -> bool {
        self.promise.is_none()
    }
}

#[derive(Debug, Default)]
pub(crate) struct PendingRequests {
    contexts: Mutex<HashMap<u32, RequestContext>>,
    nonces: AtomicU64,
}

impl PendingRequests {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<u32, RequestContext>> {
        self.contexts.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Register a context for `message` before it is handed to the writer.
    ///
    /// Returns the nonce its removal must present, and the response receiver.
    pub(crate) fn register(&self, message: ControlMessage) -> (u64, Response) {
        let (tx, rx) = oneshot::channel();
        let transaction_id = message.transaction_id;
        let nonce = self.nonces.fetch_add(1, Ordering::Relaxed);
        let context = RequestContext {
            nonce,
            message,
            promise: Some(tx),
        };
        if let Some(mut stale) = self.lock().insert(transaction_id, context) {
            tracing::warn!(
                "Transaction id {} reused while {} was still pending",
                transaction_id,
                stale.message().address_path
            );
            stale.resolve(Err(CpsError::BrokenPromise));
        }
        (nonce, rx)
    }

    /// Deliver a response. Returns false for unknown or already resolved ids.
    ///
    /// The context stays in the table; its waiter removes it.
    pub(crate) fn resolve(&self, transaction_id: u32, message: ControlMessage) -> bool {
        match self.lock().get_mut(&transaction_id) {
            Some(context) => context.resolve(Ok(message)),
            None => false,
        }
    }

    /// Remove the context registered under `nonce`, resolving it with
    /// `BrokenPromise` if nothing else did. A newer registration that reused
    /// the transaction id is left alone.
    pub(crate) fn remove(&self, transaction_id: u32, nonce: u64) -> Option<RequestContext> {
        let mut contexts = self.lock();
        if contexts.get(&transaction_id)?.nonce != nonce {
            return None;
        }
        let mut context = contexts.remove(&transaction_id)?;
        drop(contexts);
        if !context.is_resolved() {
            context.resolve(Err(CpsError::BrokenPromise));
        }
        Some(context)
    }

    /// Resolve every unresolved context with `ConnectionClosed`.
    pub(crate) fn fail_all(&self) -> usize {
        self.lock()
            .values_mut()
            .map(|context| context.resolve(Err(CpsError::ConnectionClosed)))
            .filter(|resolved| *resolved)
            .count()
    }

    pub(crate) fn len(&self) -> usize {
        self.lock().len()
    }
}

/// Removes its context when dropped, so a cancelled or failed request never
/// leaves an entry behind.
pub(crate) struct PendingGuard<'a> {
    pending: &'a PendingRequests,
    transaction_id: u32,
    nonce: u64,
}

impl<'a> PendingGuard<'a> {
    pub(crate) fn new(pending: &'a PendingRequests, transaction_id: u32, nonce: u64) -> Self {
        Self {
            pending,
            transaction_id,
            nonce,
        }
    }
}

impl Drop for PendingGuard<'_> {
    fn drop(&mut self) {
        self.pending.remove(self.transaction_id, self.nonce);
    }
}
