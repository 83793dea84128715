//! Control messenger: one persistent connection, many concurrent requests.
//!
//! The messenger owns the control connection through two tasks: a writer
//! fed by a send queue and a receive loop that resolves pending requests by
//! transaction id and dispatches updates by address path. Callers only ever
//! enqueue packets and wait on a oneshot with a timeout.
//!
//! # Example
//!
//! ```ignore
//! use cps_client::ControlMessenger;
//!
//! let messenger = ControlMessenger::builder()
//!     .request_timeout(std::time::Duration::from_secs(3))
//!     .build();
//! messenger.start("192.168.1.20", 14785).await?;
//! messenger.start_session().await?;
//! let info = messenger.get_server_information().await?;
//! messenger.stop().await;
//! ```

mod keep_alive;
mod pending;
mod receiver;

use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::config::MessengerConfig;
use crate::control::{
    AbortRecordingTake, ControlRequest, ControlResponse, GetServerInformation, GetState,
    GetStreamingSubjects, GetTakeList, GetTakeMetadata, ServerInformation, StartRecordingTake,
    StartSession, StartSessionResponse, StartStreaming, StateResponse, StopRecordingTake,
    StopSession, StopStreaming, StreamingSubjectsResponse, Subscribe, TakeListResponse,
    TakeMetadataResponse, Unsubscribe, UpdateDecoder, UpdateDecoders,
};
use crate::error::{CpsError, Result};
use crate::handler::{DisconnectHandler, HandlerRegistry, UpdateHandler};
use crate::protocol::{now_millis, ControlMessage, MessageType};
use crate::transaction::TransactionIds;
use crate::transport::{connect_timeout, Connector, TcpConnector};
use crate::writer::{spawn_writer_task, OutboundPacket, WriterHandle};

use keep_alive::KeepAliveTask;
use pending::{PendingGuard, PendingRequests};
use receiver::ReceiverConfig;

/// Messenger lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessengerState {
    Stopped,
    Starting,
    Running,
    Stopping,
}

/// Builder for configuring a [`ControlMessenger`].
pub struct ControlMessengerBuilder {
    config: MessengerConfig,
    connector: Arc<dyn Connector>,
    decoders: UpdateDecoders,
}

impl ControlMessengerBuilder {
    pub fn new() -> Self {
        Self {
            config: MessengerConfig::default(),
            connector: Arc::new(TcpConnector),
            decoders: UpdateDecoders::default(),
        }
    }

    /// Replace the whole configuration.
    pub fn config(mut self, config: MessengerConfig) -> Self {
        self.config = config;
        self
    }

    /// Default: 1
    pub fn protocol_version(mut self, version: u16) -> Self {
        self.config.protocol_version = version;
        self
    }

    /// How long `send_request` waits for a response.
    ///
    /// Default: 3 seconds
    pub fn request_timeout(mut self, timeout: Duration) -> Self {
        self.config.request_timeout = timeout;
        self
    }

    /// Default: 5 seconds
    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.config.connect_timeout = timeout;
        self
    }

    /// Default: 5 seconds
    pub fn keep_alive_interval(mut self, interval: Duration) -> Self {
        self.config.keep_alive_interval = interval;
        self
    }

    /// Consecutive keep-alive failures treated as a lost connection.
    ///
    /// Default: 3
    pub fn keep_alive_failure_bound(mut self, bound: u32) -> Self {
        self.config.keep_alive_failure_bound = bound.max(1);
        self
    }

    /// Default: 256
    pub fn channel_capacity(mut self, capacity: usize) -> Self {
        self.config.writer.channel_capacity = capacity;
        self
    }

    pub fn max_payload_size(mut self, size: u32) -> Self {
        self.config.max_payload_size = size;
        self
    }

    /// Use a custom connector instead of TCP.
    pub fn connector<C: Connector>(mut self, connector: C) -> Self {
        self.connector = Arc::new(connector);
        self
    }

    /// Add a decoder for an update path before the messenger starts.
    pub fn update_decoder(mut self, address_path: &str, decoder: UpdateDecoder) -> Self {
        self.decoders.register(address_path, decoder);
        self
    }

    pub fn build(self) -> ControlMessenger {
        ControlMessenger {
            inner: Arc::new(Inner {
                config: self.config,
                connector: self.connector,
                state: Mutex::new(MessengerState::Stopped),
                lifecycle: tokio::sync::Mutex::new(()),
                connection: Mutex::new(None),
                generations: AtomicU64::new(0),
                session_id: Mutex::new(String::new()),
                transaction_ids: TransactionIds::random(),
                pending: PendingRequests::new(),
                handlers: Mutex::new(HandlerRegistry::new()),
                decoders: Mutex::new(self.decoders),
                disconnect_handler: Mutex::new(None),
                keep_alive: Mutex::new(None),
            }),
        }
    }
}

impl Default for ControlMessengerBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// State shared by the tasks of one connection.
pub(crate) struct ConnectionShared {
    generation: u64,
    disconnected: AtomicBool,
}

struct Connection {
    shared: Arc<ConnectionShared>,
    writer: WriterHandle,
    writer_task: JoinHandle<Result<()>>,
    reader_task: JoinHandle<()>,
    cancel: CancellationToken,
}

pub(crate) struct Inner {
    config: MessengerConfig,
    connector: Arc<dyn Connector>,
    state: Mutex<MessengerState>,
    /// Serializes `start` and `shutdown`.
    lifecycle: tokio::sync::Mutex<()>,
    connection: Mutex<Option<Connection>>,
    generations: AtomicU64,
    session_id: Mutex<String>,
    transaction_ids: TransactionIds,
    pending: PendingRequests,
    handlers: Mutex<HandlerRegistry>,
    decoders: Mutex<UpdateDecoders>,
    disconnect_handler: Mutex<Option<DisconnectHandler>>,
    keep_alive: Mutex<Option<KeepAliveTask>>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|e| e.into_inner())
}

impl Inner {
    fn state(&self) -> MessengerState {
        *lock(&self.state)
    }

    fn set_state(&self, state: MessengerState) {
        *lock(&self.state) = state;
    }

    fn session_id(&self) -> String {
        lock(&self.session_id).clone()
    }

    fn set_session(&self, session_id: String) {
        *lock(&self.session_id) = session_id;
    }

    fn clear_session(&self) {
        lock(&self.session_id).clear();
    }

    fn handlers(&self) -> MutexGuard<'_, HandlerRegistry> {
        lock(&self.handlers)
    }

    fn decoders(&self) -> MutexGuard<'_, UpdateDecoders> {
        lock(&self.decoders)
    }

    fn writer(&self) -> Result<WriterHandle> {
        lock(&self.connection)
            .as_ref()
            .map(|c| c.writer.clone())
            .ok_or(CpsError::InvalidState("messenger is not running"))
    }

    async fn start(self: &Arc<Self>, host: &str, port: u16) -> Result<()> {
        let _lifecycle = self.lifecycle.lock().await;
        if self.state() != MessengerState::Stopped {
            return Err(CpsError::InvalidState("messenger already started"));
        }
        self.set_state(MessengerState::Starting);

        let address = format!("{}:{}", host, port);
        let stream = match connect_timeout(
            self.connector.as_ref(),
            &address,
            self.config.connect_timeout,
        )
        .await
        {
            Ok(stream) => stream,
            Err(e) => {
                tracing::error!("Control connect to {} failed: {}", address, e);
                self.set_state(MessengerState::Stopped);
                return Err(e);
            }
        };

        let (read_half, write_half) = tokio::io::split(stream);
        let (writer, writer_task) = spawn_writer_task(write_half, self.config.writer.clone());

        let shared = Arc::new(ConnectionShared {
            generation: self.generations.fetch_add(1, Ordering::Relaxed) + 1,
            disconnected: AtomicBool::new(false),
        });
        let cancel = CancellationToken::new();
        let reader_task = tokio::spawn(receiver::run(
            Arc::downgrade(self),
            shared.clone(),
            read_half,
            ReceiverConfig {
                protocol_version: self.config.protocol_version,
                max_payload_size: self.config.max_payload_size,
                payload_timeout: self.config.request_timeout,
            },
            cancel.clone(),
        ));

        *lock(&self.connection) = Some(Connection {
            shared,
            writer,
            writer_task,
            reader_task,
            cancel,
        });
        self.set_state(MessengerState::Running);
        tracing::debug!("Control messenger connected to {}", address);
        Ok(())
    }

    /// Tear down the connection. With `Some(generation)` only that
    /// connection is stopped, so a late disconnect cannot stop a newer one.
    async fn shutdown(&self, generation: Option<u64>) {
        let _lifecycle = self.lifecycle.lock().await;
        let connection = {
            let mut guard = lock(&self.connection);
            let current = match (guard.as_ref(), generation) {
                (Some(c), Some(g)) => c.shared.generation == g,
                (Some(_), None) => true,
                (None, _) => false,
            };
            if !current {
                return;
            }
            guard.take()
        };
        let Some(connection) = connection else {
            return;
        };
        self.set_state(MessengerState::Stopping);
        connection.shared.disconnected.store(true, Ordering::Release);

        let keep_alive = lock(&self.keep_alive).take();
        if let Some(task) = keep_alive {
            task.shutdown().await;
        }

        connection.cancel.cancel();
        let _ = connection.reader_task.await;

        // Dropping the last handle closes the queue; the writer flushes and exits.
        drop(connection.writer);
        let mut writer_task = connection.writer_task;
        if tokio::time::timeout(self.config.writer.write_timeout, &mut writer_task)
            .await
            .is_err()
        {
            tracing::warn!("Writer did not drain in time, aborting");
            writer_task.abort();
        }

        let failed = self.pending.fail_all();
        if failed > 0 {
            tracing::debug!("Failed {} pending request(s) on stop", failed);
        }
        self.clear_session();
        self.set_state(MessengerState::Stopped);
        tracing::debug!("Control messenger stopped");
    }

    /// Invoke the disconnect handler at most once per connection.
    fn report_disconnect(&self, connection: &ConnectionShared) {
        if connection.disconnected.swap(true, Ordering::AcqRel) {
            return;
        }
        let handler = lock(&self.disconnect_handler).clone();
        if let Some(handler) = handler {
            handler();
        }
    }

    fn start_keep_alive(self: &Arc<Self>) {
        let shared = match lock(&self.connection).as_ref() {
            Some(c) => c.shared.clone(),
            None => return,
        };
        let mut keep_alive = lock(&self.keep_alive);
        if keep_alive.is_some() {
            return;
        }
        *keep_alive = Some(KeepAliveTask::spawn(
            Arc::downgrade(self),
            shared,
            self.config.keep_alive_interval,
            self.config.keep_alive_failure_bound,
        ));
    }

    fn stop_keep_alive(&self) {
        let task = lock(&self.keep_alive).take();
        if let Some(task) = task {
            task.cancel();
        }
    }

    async fn send_request<R: ControlRequest>(&self, request: &R) -> Result<R::Response> {
        let writer = self.writer()?;

        let session_id = self.session_id();
        let transaction_id = self.transaction_ids.next_id();
        let message = ControlMessage::new(
            MessageType::Request,
            R::ADDRESS_PATH,
            session_id.clone(),
            transaction_id,
            now_millis(),
        )
        .with_body(request.body()?);
        let packet = OutboundPacket::new(&message.to_packet(self.config.protocol_version)?);

        // Registered before the writer sees the packet so a fast response
        // always finds its context.
        let (nonce, response) = self.pending.register(message);
        let guard = PendingGuard::new(&self.pending, transaction_id, nonce);

        writer.send(packet).await?;
        drop(writer);

        let outcome = tokio::time::timeout(self.config.request_timeout, response).await;
        drop(guard);

        let response = match outcome {
            Ok(Ok(result)) => result?,
            Ok(Err(_)) => return Err(CpsError::BrokenPromise),
            Err(_) => {
                tracing::debug!(
                    "Request {} on {} timed out",
                    transaction_id,
                    R::ADDRESS_PATH
                );
                return Err(CpsError::Timeout);
            }
        };

        if !session_id.is_empty() && response.session_id != session_id {
            return Err(CpsError::InvalidSession {
                expected: session_id,
                actual: response.session_id,
            });
        }
        if !response.error.is_empty() {
            return Err(CpsError::Server {
                name: response.error.name,
                description: response.error.description,
            });
        }
        R::Response::parse(response.body.as_ref())
    }
}

/// Handle to a control messenger. Cheap to clone.
#[derive(Clone)]
pub struct ControlMessenger {
    inner: Arc<Inner>,
}

impl ControlMessenger {
    /// Messenger with default configuration over TCP.
    pub fn new() -> Self {
        ControlMessengerBuilder::new().build()
    }

    pub fn builder() -> ControlMessengerBuilder {
        ControlMessengerBuilder::new()
    }

    pub fn config(&self) -> &MessengerConfig {
        &self.inner.config
    }

    pub fn state(&self) -> MessengerState {
        self.inner.state()
    }

    /// Current session id, empty outside a session.
    pub fn session_id(&self) -> String {
        self.inner.session_id()
    }

    /// Requests registered and not yet removed by their waiters.
    pub fn pending_requests(&self) -> usize {
        self.inner.pending.len()
    }

    pub fn is_keep_alive_running(&self) -> bool {
        lock(&self.inner.keep_alive).is_some()
    }

    /// Connect and spawn the writer and receive tasks.
    ///
    /// Only valid from [`MessengerState::Stopped`]. On failure the state
    /// stays `Stopped`.
    pub async fn start(&self, host: &str, port: u16) -> Result<()> {
        self.inner.start(host, port).await
    }

    /// Stop keep-alive and both tasks, close the connection and fail
    /// outstanding requests with `ConnectionClosed`. Idempotent.
    pub async fn stop(&self) {
        self.inner.shutdown(None).await
    }

    /// Send a typed request and wait for its typed response.
    pub async fn send_request<R: ControlRequest>(&self, request: R) -> Result<R::Response> {
        self.inner.send_request(&request).await
    }

    /// Send a request on a background task and hand the result to `callback`.
    pub fn send_request_with_callback<R, F>(&self, request: R, callback: F) -> JoinHandle<()>
    where
        R: ControlRequest + 'static,
        F: FnOnce(Result<R::Response>) + Send + 'static,
    {
        let inner = self.inner.clone();
        tokio::spawn(async move {
            let result = inner.send_request(&request).await;
            callback(result);
        })
    }

    /// Open a session, remember its id and start keep-alive.
    pub async fn start_session(&self) -> Result<StartSessionResponse> {
        let response = self.send_request(StartSession).await?;
        self.inner.set_session(response.session_id.clone());
        self.inner.start_keep_alive();
        tracing::debug!("Session {} started", response.session_id);
        Ok(response)
    }

    /// Close the session. Keep-alive stops and the session id is cleared
    /// even if the server rejects the request.
    pub async fn stop_session(&self) -> Result<()> {
        let result = self.send_request(StopSession).await;
        self.inner.stop_keep_alive();
        self.inner.clear_session();
        result.map(|_| ())
    }

    pub async fn get_server_information(&self) -> Result<ServerInformation> {
        self.send_request(GetServerInformation).await
    }

    pub async fn subscribe(&self) -> Result<()> {
        self.send_request(Subscribe).await.map(|_| ())
    }

    pub async fn unsubscribe(&self) -> Result<()> {
        self.send_request(Unsubscribe).await.map(|_| ())
    }

    pub async fn get_state(&self) -> Result<StateResponse> {
        self.send_request(GetState).await
    }

    pub async fn start_recording_take(&self, request: StartRecordingTake) -> Result<()> {
        self.send_request(request).await.map(|_| ())
    }

    /// Returns the name of the recorded take.
    pub async fn stop_recording_take(&self) -> Result<String> {
        self.send_request(StopRecordingTake)
            .await
            .map(|r| r.take_name)
    }

    pub async fn abort_recording_take(&self) -> Result<()> {
        self.send_request(AbortRecordingTake).await.map(|_| ())
    }

    pub async fn get_take_list(&self) -> Result<TakeListResponse> {
        self.send_request(GetTakeList).await
    }

    pub async fn get_take_metadata(&self, names: Vec<String>) -> Result<TakeMetadataResponse> {
        self.send_request(GetTakeMetadata { names }).await
    }

    pub async fn get_streaming_subjects(&self) -> Result<StreamingSubjectsResponse> {
        self.send_request(GetStreamingSubjects).await
    }

    pub async fn start_streaming(&self, request: StartStreaming) -> Result<()> {
        self.send_request(request).await.map(|_| ())
    }

    pub async fn stop_streaming(&self) -> Result<()> {
        self.send_request(StopStreaming).await.map(|_| ())
    }

    /// Handle updates on `address_path`, replacing any previous handler.
    pub fn register_update_handler<H: UpdateHandler>(&self, address_path: &str, handler: H) {
        self.inner.handlers().register(address_path, handler);
    }

    /// Returns whether a handler was registered.
    pub fn unregister_update_handler(&self, address_path: &str) -> bool {
        self.inner.handlers().unregister(address_path)
    }

    /// Decode updates on a new (or overridden) address path.
    pub fn register_update_decoder(&self, address_path: &str, decoder: UpdateDecoder) {
        self.inner.decoders().register(address_path, decoder);
    }

    /// Called once per connection when it is lost or keep-alive gives up.
    pub fn set_disconnect_handler<F>(&self, handler: F)
    where
        F: Fn() + Send + Sync + 'static,
    {
        *lock(&self.inner.disconnect_handler) = Some(Arc::new(handler));
    }
}

impl Default for ControlMessenger {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for ControlMessenger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ControlMessenger")
            .field("state", &self.state())
            .field("pending_requests", &self.pending_requests())
            .finish()
    }
}
