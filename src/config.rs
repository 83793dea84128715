//! Tunables for the control messenger and the export client.

use std::time::Duration;

use crate::protocol::{DEFAULT_MAX_PAYLOAD_SIZE, PROTOCOL_VERSION};
use crate::writer::{WriterConfig, DEFAULT_CHANNEL_CAPACITY};

/// Default wait for a control response.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(3);

/// Default TCP connect timeout for both channels.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// Default period between keep-alive requests.
pub const DEFAULT_KEEP_ALIVE_INTERVAL: Duration = Duration::from_secs(5);

/// Default number of consecutive keep-alive failures treated as a disconnect.
pub const DEFAULT_KEEP_ALIVE_FAILURE_BOUND: u32 = 3;

/// Export protocol version spoken by this client.
pub const EXPORT_PROTOCOL_VERSION: u16 = 1;

/// Largest file chunk read in one call.
pub const DEFAULT_CHUNK_SIZE: usize = 64 * 1024;

/// Default per-read timeout on the export connection.
pub const DEFAULT_EXPORT_READ_TIMEOUT: Duration = Duration::from_secs(5);

/// Default per-write timeout on the export connection.
pub const DEFAULT_EXPORT_WRITE_TIMEOUT: Duration = Duration::from_secs(5);

/// Default export queue capacity.
pub const DEFAULT_QUEUE_CAPACITY: usize = i32::MAX as usize;

/// Control messenger configuration.
#[derive(Debug, Clone)]
pub struct MessengerConfig {
    /// Version stamped on outgoing packets and required on incoming ones.
    pub protocol_version: u16,
    pub request_timeout: Duration,
    pub connect_timeout: Duration,
    pub keep_alive_interval: Duration,
    pub keep_alive_failure_bound: u32,
    /// Headers announcing more than this are rejected before allocating.
    pub max_payload_size: u32,
    pub writer: WriterConfig,
}

impl Default for MessengerConfig {
    fn default() -> Self {
        Self {
            protocol_version: PROTOCOL_VERSION,
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            keep_alive_interval: DEFAULT_KEEP_ALIVE_INTERVAL,
            keep_alive_failure_bound: DEFAULT_KEEP_ALIVE_FAILURE_BOUND,
            max_payload_size: DEFAULT_MAX_PAYLOAD_SIZE,
            writer: WriterConfig {
                channel_capacity: DEFAULT_CHANNEL_CAPACITY,
                ..WriterConfig::default()
            },
        }
    }
}

/// Export client configuration.
#[derive(Debug, Clone)]
pub struct ExportConfig {
    pub protocol_version: u16,
    /// Upper bound for a single `read_exact` of file data.
    pub chunk_size: usize,
    pub read_timeout: Duration,
    pub write_timeout: Duration,
    pub connect_timeout: Duration,
    /// `export_*` calls fail with `QueueFull` once this many tasks wait.
    pub queue_capacity: usize,
}

impl Default for ExportConfig {
    fn default() -> Self {
        Self {
            protocol_version: EXPORT_PROTOCOL_VERSION,
            chunk_size: DEFAULT_CHUNK_SIZE,
            read_timeout: DEFAULT_EXPORT_READ_TIMEOUT,
            write_timeout: DEFAULT_EXPORT_WRITE_TIMEOUT,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
        }
    }
}
