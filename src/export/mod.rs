//! Export channel: bulk transfer of take files.
//!
//! - Binary header/request/response codecs
//! - Bounded task queue with per-task cancellation
//! - Single worker owning the export connection
//! - Sink interface plus in-memory and on-disk sinks

mod client;
mod queue;
mod sink;
mod worker;
mod wire_format;

pub use client::{ExportClient, ExportClientBuilder};
pub use sink::{ExportSink, ExportedFile, FileSink, MemorySink};
pub use wire_format::{
    ExportHeader, ExportRequest, ExportResponse, ExportStatus, EXPORT_HEADER_SIZE, EXPORT_MAGIC,
    HASH_SIZE,
};

/// Identifier returned when a task is queued.
pub type TaskId = u32;

/// A file to fetch from a take.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExportFile {
    pub name: String,
    /// Expected size in bytes.
    pub length: u64,
    /// First byte to transfer.
    pub offset: u64,
}

impl ExportFile {
    pub fn new(name: impl Into<String>, length: u64) -> Self {
        Self {
            name: name.into(),
            length,
            offset: 0,
        }
    }

    pub fn with_offset(mut self, offset: u64) -> Self {
        self.offset = offset;
        self
    }
}

/// One (take, file) pair of a task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExportContext {
    pub take_name: String,
    pub file: ExportFile,
}

/// Unit of work for the worker: every file to fetch and where to put it.
pub struct ExportTakeTask {
    pub contexts: Vec<ExportContext>,
    pub sink: Box<dyn ExportSink>,
}
