use std::io;

use crate::http::connection::{ConnectionEvent, ConnectionState};
use crate::http::parser::ParseError;
use crate::stream::{StreamEvent, StreamState};

/// Errors returned by the engine's synchronous entry points.
///
/// Failures that happen after work has been queued are never returned here;
/// they reach the application through the `on_error` / `on_end` callbacks.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The connection is not in the READY state.
    #[error("connection not ready")]
    NotReady,

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// A recognised but unimplemented protocol selection (HTTPS, HTTP/2).
    #[error("unsupported protocol `{0}`")]
    Unsupported(String),

    #[error("protocol error: {0}")]
    Protocol(String),

    #[error(transparent)]
    Parse(#[from] ParseError),

    #[error(transparent)]
    Io(#[from] io::Error),

    #[error("stream {0} has ended")]
    StreamEnded(u32),

    /// A server stream already has its response or rejection queued.
    #[error("stream {0} already answered")]
    AlreadyAnswered(u32),

    #[error("stream {0} not found")]
    UnknownStream(u32),

    #[error("stream {0} already mapped")]
    DuplicateStream(u32),

    #[error("stream {id}: no transition from {from:?} on {event:?}")]
    StreamTransition {
        id: u32,
        from: StreamState,
        event: StreamEvent,
    },

    #[error("connection: no transition from {from:?} on {event:?}")]
    ConnectionTransition {
        from: ConnectionState,
        event: ConnectionEvent,
    },
}

pub type Result<T> = std::result::Result<T, Error>;
