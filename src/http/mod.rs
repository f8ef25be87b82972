//! HTTP message layer.
//!
//! Everything that knows about wire formats lives here; the connection
//! engines in [`client`](crate::client) and [`server`](crate::server) only
//! move bytes and drive these types.
//!
//! # Architecture
//!
//! - **`options`**: ordered, case-insensitive header / configuration set
//! - **`parser`**: incremental HTTP/1.x request and response parsers
//! - **`writer`**: HTTP/1.x serialisation into an [`Ioda`](crate::ioda::Ioda)
//! - **`request`** / **`response`**: one-directional message state with callbacks
//! - **`connection`**: the connection lifecycle state machine
//! - **`frame`**: HTTP/2 frame layout (structural only)
//!
//! # Message Parsing
//!
//! Both parsers are pull parsers over the connection's input buffer. Each
//! call advances at most one step:
//!
//! ```text
//!        ┌─────────────┐
//!        │    Reset    │ ← skip blank lines between messages
//!        └──────┬──────┘
//!               │ first non-blank byte
//!               ▼
//!        ┌──────────────────┐
//!        │     Header       │ ← wait for the empty line, yield Head
//!        └──────┬───────────┘
//!               │ Content-Length > 0
//!               ▼
//!        ┌──────────────────┐
//!        │      Body        │ ← yield Body chunks as they arrive
//!        └──────┬───────────┘
//!               │ declared length reached
//!               └─ Complete → Reset (same connection)
//! ```

pub mod connection;
pub mod frame;
pub mod options;
pub mod parser;
pub mod request;
pub mod response;
pub mod writer;

use std::fmt;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;

use parking_lot::Mutex;

use crate::error::{Error, Result};
use crate::ioda::Ioda;
use options::{CONNECTION, Options, PROTOCOL};

/// Wire protocol selected for a connection through the `PROTOCOL` option.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Protocol {
    Http10,
    Http11,
    Http2,
    Https10,
    Https11,
    Https2,
}

impl Protocol {
    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "HTTP/1.0" => Some(Protocol::Http10),
            "HTTP/1.1" => Some(Protocol::Http11),
            "HTTP/2" => Some(Protocol::Http2),
            "HTTPS/1.0" => Some(Protocol::Https10),
            "HTTPS/1.1" => Some(Protocol::Https11),
            "HTTPS/2" => Some(Protocol::Https2),
            _ => None,
        }
    }

    /// Reads `PROTOCOL` from `options`, defaulting to HTTP/1.1.
    pub fn from_options(options: &Options) -> Result<Self> {
        match options.locate(PROTOCOL) {
            None => Ok(Protocol::Http11),
            Some(value) => Protocol::from_str(value)
                .ok_or_else(|| Error::InvalidArgument(format!("{PROTOCOL}: {value}"))),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Protocol::Http10 => "HTTP/1.0",
            Protocol::Http11 => "HTTP/1.1",
            Protocol::Http2 => "HTTP/2",
            Protocol::Https10 => "HTTPS/1.0",
            Protocol::Https11 => "HTTPS/1.1",
            Protocol::Https2 => "HTTPS/2",
        }
    }

    /// The version string written on the wire.
    pub fn version(&self) -> &'static str {
        match self {
            Protocol::Http10 | Protocol::Https10 => "HTTP/1.0",
            Protocol::Http11 | Protocol::Https11 => "HTTP/1.1",
            Protocol::Http2 | Protocol::Https2 => "HTTP/2",
        }
    }

    pub fn is_encrypted(&self) -> bool {
        matches!(
            self,
            Protocol::Https10 | Protocol::Https11 | Protocol::Https2
        )
    }

    pub fn is_http2(&self) -> bool {
        matches!(self, Protocol::Http2 | Protocol::Https2)
    }

    /// Fails for selections this engine recognises but cannot drive.
    pub fn require_supported(self) -> Result<Self> {
        if self.is_encrypted() || self.is_http2() {
            return Err(Error::Unsupported(self.as_str().to_string()));
        }
        Ok(self)
    }
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Determines whether a connection persists after an exchange.
///
/// HTTP/1.1 defaults to keep-alive unless `Connection: close` is present.
/// HTTP/1.0 closes unless `Connection: keep-alive` is present.
pub fn keep_alive(version: &str, options: &Options) -> bool {
    match options.locate(CONNECTION) {
        Some(v) if v.eq_ignore_ascii_case("close") => false,
        Some(v) if v.eq_ignore_ascii_case("keep-alive") => true,
        _ => version != "HTTP/1.0",
    }
}

/// Body chunk arrived.
pub type OnIoda<M> = Arc<dyn Fn(&M, &Ioda) + Send + Sync>;
/// Message complete.
pub type OnEnd<M> = Arc<dyn Fn(&M) + Send + Sync>;
/// Message failed; the stream is ended right after.
pub type OnError<M> = Arc<dyn Fn(&M, &str) + Send + Sync>;

/// Runs a user callback, logging instead of unwinding if it panics.
/// Returns `false` if it panicked.
pub(crate) fn guarded(callback: &'static str, f: impl FnOnce()) -> bool {
    if catch_unwind(AssertUnwindSafe(f)).is_err() {
        tracing::error!(callback, "user callback panicked");
        return false;
    }
    true
}

/// Callback slots shared by requests and responses.
///
/// A callback is cloned out of its slot before it runs so no lock is held
/// while user code executes.
pub(crate) struct Callbacks<M> {
    ioda: Mutex<Option<OnIoda<M>>>,
    end: Mutex<Option<OnEnd<M>>>,
    error: Mutex<Option<OnError<M>>>,
}

impl<M> Default for Callbacks<M> {
    fn default() -> Self {
        Self {
            ioda: Mutex::new(None),
            end: Mutex::new(None),
            error: Mutex::new(None),
        }
    }
}

impl<M> Callbacks<M> {
    pub(crate) fn set_ioda(&self, f: OnIoda<M>) {
        *self.ioda.lock() = Some(f);
    }

    pub(crate) fn set_end(&self, f: OnEnd<M>) {
        *self.end.lock() = Some(f);
    }

    pub(crate) fn set_error(&self, f: OnError<M>) {
        *self.error.lock() = Some(f);
    }

    pub(crate) fn ioda(&self, msg: &M, chunk: &Ioda) {
        let f = self.ioda.lock().clone();
        if let Some(f) = f {
            let _ = guarded("on_ioda", || f(msg, chunk));
        }
    }

    pub(crate) fn end(&self, msg: &M) {
        let f = self.end.lock().clone();
        if let Some(f) = f {
            let _ = guarded("on_end", || f(msg));
        }
    }

    pub(crate) fn error(&self, msg: &M, reason: &str) {
        let f = self.error.lock().clone();
        if let Some(f) = f {
            let _ = guarded("on_error", || f(msg, reason));
        }
    }

    /// Drops every callback; they may capture the message's own handles.
    pub(crate) fn clear(&self) {
        self.ioda.lock().take();
        self.end.lock().take();
        self.error.lock().take();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn protocol_selection() {
        let mut options = Options::new();
        assert_eq!(Protocol::from_options(&options).unwrap(), Protocol::Http11);

        options.insert(PROTOCOL, "HTTP/1.0");
        assert_eq!(Protocol::from_options(&options).unwrap(), Protocol::Http10);

        options.insert(PROTOCOL, "SPDY/3");
        assert!(matches!(
            Protocol::from_options(&options),
            Err(Error::InvalidArgument(_))
        ));
    }

    #[test]
    fn encrypted_and_http2_unsupported() {
        for p in [Protocol::Http2, Protocol::Https10, Protocol::Https11, Protocol::Https2] {
            assert!(matches!(p.require_supported(), Err(Error::Unsupported(_))));
        }
        assert!(Protocol::Http11.require_supported().is_ok());
    }

    #[test]
    fn keep_alive_defaults() {
        let none = Options::new();
        assert!(keep_alive("HTTP/1.1", &none));
        assert!(!keep_alive("HTTP/1.0", &none));

        let close: Options = [(CONNECTION, "Close")].into_iter().collect();
        assert!(!keep_alive("HTTP/1.1", &close));

        let persist: Options = [(CONNECTION, "keep-alive")].into_iter().collect();
        assert!(keep_alive("HTTP/1.0", &persist));
    }
}
