//! httpagent - embeddable HTTP/1.x client and server engine
//!
//! Agents own a pump thread that waits on socket readiness and a worker pool
//! that parses, writes and runs application callbacks. Connections are driven
//! through serialised work queues, so each one sees its events in order.

pub mod client;
pub mod config;
pub mod dispatch;
pub mod error;
pub mod http;
pub mod ioda;
pub mod server;
pub mod stream;

pub use error::{Error, Result};
