//! # cps-client
//!
//! Client SDK for the Capture Protocol Stack.
//!
//! A capture server exposes two TCP channels:
//!
//! - **Control channel**: framed JSON request/response/update messages with
//!   sessions, keep-alive and server-pushed updates
//! - **Export channel**: binary protocol for pulling recorded take files,
//!   verified with MD5
//!
//! ## Example
//!
//! ```ignore
//! use cps_client::{ControlMessenger, ExportClient};
//! use cps_client::export::{ExportFile, MemorySink};
//!
//! #[tokio::main]
//! async fn main() -> cps_client::Result<()> {
//!     let messenger = ControlMessenger::new();
//!     messenger.start("192.168.1.20", 14410).await?;
//!     messenger.start_session().await?;
//!
//!     let info = messenger.get_server_information().await?;
//!     let takes = messenger.get_take_list().await?;
//!
//!     let export = ExportClient::builder().build("192.168.1.20", info.export_port);
//!     let (sink, done) = MemorySink::channel();
//!     export.export_take_files(&takes.names[0], vec![ExportFile::new("clip.mov", 1024)], sink)?;
//!     let files = done.await.map_err(|_| cps_client::CpsError::BrokenPromise)??;
//!
//!     messenger.stop_session().await?;
//!     messenger.stop().await;
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod control;
pub mod error;
pub mod export;
pub mod handler;
pub mod messenger;
pub mod protocol;
pub mod transport;

mod transaction;
mod writer;

pub use config::{ExportConfig, MessengerConfig};
pub use error::{CpsError, ErrorKind, Result};
pub use export::{ExportClient, ExportClientBuilder};
pub use messenger::{ControlMessenger, ControlMessengerBuilder, MessengerState};
pub use writer::WriterConfig;
