//! Transport module - byte-stream connections for the control and export channels.
//!
//! Provides:
//! - [`Connector`] - opens a connection to `host:port`
//! - [`TcpConnector`] - the production TCP implementation
//! - Timeout-bounded exact reads and full writes over any [`ByteStream`]
//!
//! Both channels are plain byte streams; framing lives in
//! [`protocol`](crate::protocol) and [`export`](crate::export).

mod tcp;

pub use tcp::{
    connect_timeout, read_exact_timeout, write_all_timeout, BoxFuture, BoxedStream, ByteStream,
    Connector, TcpConnector,
};
