//! Destinations for exported file bytes.
//!
//! The worker drives a sink through `start_file`, `process_data` (once per
//! chunk), `finish_file` and finally `finalize`. Sinks own hash
//! verification and the keep/delete policy for partial output.

use std::fs::{self, File, OpenOptions};
use std::io::{BufWriter, Seek, SeekFrom, Write};
use std::path::{Component, Path, PathBuf};

use md5::{Digest, Md5};
use tokio::sync::oneshot;

use super::wire_format::HASH_SIZE;
use super::ExportFile;
use crate::error::{CpsError, Result};

/// Receives the files of one export task.
///
/// Methods are called from the export worker task and should not block
/// for long.
pub trait ExportSink: Send + 'static {
    /// A new file begins. Errors fail the task.
    fn start_file(&mut self, take_name: &str, file: &ExportFile) -> Result<()>;

    /// Next chunk of the current file. Errors fail the task.
    fn process_data(&mut self, data: &[u8]) -> Result<()>;

    /// The current file is complete. Returns false if `hash` does not match
    /// the received data or the file could not be committed.
    fn finish_file(&mut self, take_name: &str, file: &ExportFile, hash: &[u8; HASH_SIZE]) -> bool;

    /// Called exactly once with the task outcome.
    fn finalize(self: Box<Self>, result: Result<()>);
}

/// A file collected by [`MemorySink`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExportedFile {
    pub take_name: String,
    pub file_name: String,
    pub data: Vec<u8>,
}

/// Buffers files in memory and hands them over on completion.
pub struct MemorySink {
    files: Vec<ExportedFile>,
    current: Option<(ExportedFile, Md5)>,
    done: Option<oneshot::Sender<Result<Vec<ExportedFile>>>>,
}

impl MemorySink {
    /// Sink plus the receiver its outcome is delivered to.
    pub fn channel() -> (Self, oneshot::Receiver<Result<Vec<ExportedFile>>>) {
        let (tx, rx) = oneshot::channel();
        let sink = Self {
            files: Vec::new(),
            current: None,
            done: Some(tx),
        };
        (sink, rx)
    }
}

impl ExportSink for MemorySink {
    fn start_file(&mut self, take_name: &str, file: &ExportFile) -> Result<()> {
        let entry = ExportedFile {
            take_name: take_name.to_string(),
            file_name: file.name.clone(),
            data: Vec::with_capacity(file.length.min(64 * 1024 * 1024) as usize),
        };
        self.current = Some((entry, Md5::new()));
        Ok(())
    }

    fn process_data(&mut self, data: &[u8]) -> Result<()> {
        let (entry, hasher) = self
            .current
            .as_mut()
            .ok_or(CpsError::InvalidState("data received before start_file"))?;
        entry.data.extend_from_slice(data);
        hasher.update(data);
        Ok(())
    }

    fn finish_file(&mut self, _take_name: &str, _file: &ExportFile, hash: &[u8; HASH_SIZE]) -> bool {
        let Some((entry, hasher)) = self.current.take() else {
            return false;
        };
        if hasher.finalize().as_slice() != hash {
            tracing::warn!("MD5 mismatch for {}/{}", entry.take_name, entry.file_name);
            return false;
        }
        self.files.push(entry);
        true
    }

    fn finalize(mut self: Box<Self>, result: Result<()>) {
        let outcome = result.map(|()| std::mem::take(&mut self.files));
        if let Some(tx) = self.done.take() {
            let _ = tx.send(outcome);
        }
    }
}

struct OpenFile {
    path: PathBuf,
    /// Bytes that were already on disk before this task.
    offset: u64,
    writer: BufWriter<File>,
    hasher: Md5,
}

/// A file touched by the current task and where its own bytes begin.
struct WrittenFile {
    path: PathBuf,
    offset: u64,
}

/// Writes files to `<root>/<take>/<file>`.
///
/// When a task fails, files it created are removed and resumed files are
/// truncated back to the offset they were resumed from.
pub struct FileSink {
    root: PathBuf,
    current: Option<OpenFile>,
    written: Vec<WrittenFile>,
    done: Option<oneshot::Sender<Result<Vec<PathBuf>>>>,
}

impl FileSink {
    /// Sink plus the receiver the written paths (or the error) arrive on.
    pub fn channel(root: impl Into<PathBuf>) -> (Self, oneshot::Receiver<Result<Vec<PathBuf>>>) {
        let (tx, rx) = oneshot::channel();
        let sink = Self {
            root: root.into(),
            current: None,
            written: Vec::new(),
            done: Some(tx),
        };
        (sink, rx)
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn target_path(&self, take_name: &str, file_name: &str) -> Result<PathBuf> {
        for name in [take_name, file_name] {
            let mut components = Path::new(name).components();
            let single_normal = matches!(components.next(), Some(Component::Normal(_)))
                && components.next().is_none();
            if !single_normal {
                return Err(CpsError::Protocol(format!(
                    "Refusing to write outside the export root: {:?}",
                    name
                )));
            }
        }
        Ok(self.root.join(take_name).join(file_name))
    }

    fn discard_written(&mut self) {
        if let Some(open) = self.current.take() {
            drop(open.writer);
            self.written.push(WrittenFile {
                path: open.path,
                offset: open.offset,
            });
        }
        for file in self.written.drain(..) {
            let result = if file.offset == 0 {
                fs::remove_file(&file.path)
            } else {
                OpenOptions::new()
                    .write(true)
                    .open(&file.path)
                    .and_then(|handle| handle.set_len(file.offset))
            };
            if let Err(e) = result {
                tracing::debug!("Could not discard {}: {}", file.path.display(), e);
            }
        }
    }
}

impl ExportSink for FileSink {
    fn start_file(&mut self, take_name: &str, file: &ExportFile) -> Result<()> {
        let path = self.target_path(take_name, &file.name)?;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }

        let mut handle = if file.offset == 0 {
            File::create(&path)?
        } else {
            // Resume: keep the first `offset` bytes and append after them.
            let handle = OpenOptions::new().write(true).create(true).open(&path)?;
            handle.set_len(file.offset)?;
            handle
        };
        handle.seek(SeekFrom::Start(file.offset))?;

        self.current = Some(OpenFile {
            path,
            offset: file.offset,
            writer: BufWriter::new(handle),
            hasher: Md5::new(),
        });
        Ok(())
    }

    fn process_data(&mut self, data: &[u8]) -> Result<()> {
        let open = self
            .current
            .as_mut()
            .ok_or(CpsError::InvalidState("data received before start_file"))?;
        open.writer.write_all(data)?;
        open.hasher.update(data);
        Ok(())
    }

    fn finish_file(&mut self, _take_name: &str, _file: &ExportFile, hash: &[u8; HASH_SIZE]) -> bool {
        let Some(mut open) = self.current.take() else {
            return false;
        };
        let flushed = open.writer.flush().is_ok();
        let matches = open.hasher.finalize().as_slice() == hash;
        if !matches {
            tracing::warn!("MD5 mismatch for {}", open.path.display());
        }
        self.written.push(WrittenFile {
            path: open.path,
            offset: open.offset,
        });
        flushed && matches
    }

    fn finalize(mut self: Box<Self>, result: Result<()>) {
        let outcome = match result {
            Ok(()) => Ok(self.written.drain(..).map(|file| file.path).collect()),
            Err(e) => {
                self.discard_written();
                Err(e)
            }
        };
        if let Some(tx) = self.done.take() {
            let _ = tx.send(outcome);
        }
    }
}
