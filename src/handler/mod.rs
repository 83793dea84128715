//! Handler module - update dispatch by address path.
//!
//! Provides:
//! - [`HandlerRegistry`] - maps address paths to update handlers
//! - [`UpdateHandler`] - implemented by any `Fn(ControlUpdate)`
//! - [`DisconnectHandler`] - invoked once when the control connection drops
//!
//! # Example
//!
//! ```ignore
//! use cps_client::control::ControlUpdate;
//!
//! messenger.register_update_handler("/recording/status", |update: ControlUpdate| {
//!     tracing::info!("recording status: {:?}", update);
//! });
//! messenger.set_disconnect_handler(|| tracing::warn!("device went away"));
//! ```

mod registry;

pub use registry::{DisconnectHandler, HandlerRegistry, UpdateHandler};
