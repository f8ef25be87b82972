//! Streams: one request/response exchange each.
//!
//! A [`Stream`] pairs one [`Request`] with one [`Response`] and lives in its
//! connection's [`StreamSet`]. HTTP/1.x only ever uses one stream at a time
//! under the root, so the tree degenerates to a list; the HTTP/2 states are
//! kept so the lifecycle stays the same shape either way.

pub mod set;

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::Mutex;

use crate::client::Client;
use crate::error::{Error, Result};
use crate::http::guarded;
use crate::http::options::Options;
use crate::http::request::Request;
use crate::http::response::Response;
use crate::server::Server;

pub use set::{ROOT, StreamSet};

/// Stream states from RFC 7540 §5.1.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StreamState {
    #[default]
    Idle,
    Open,
    HalfClosedLocal,
    HalfClosedRemote,
    ReservedLocal,
    ReservedRemote,
    Closed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamEvent {
    SendHeaders,
    RecvHeaders,
    SendPushPromise,
    RecvPushPromise,
    SendEndStream,
    RecvEndStream,
    /// Abrupt or final close from any live state.
    Reset,
}

impl StreamState {
    /// The single place stream state changes. `id` only labels the error.
    pub fn transition(self, id: u32, event: StreamEvent) -> Result<Self> {
        use StreamEvent::*;
        use StreamState::*;

        let next = match (self, event) {
            (Closed, _) => None,
            (_, Reset) => Some(Closed),
            (Idle, SendHeaders | RecvHeaders) => Some(Open),
            (Idle, SendPushPromise) => Some(ReservedLocal),
            (Idle, RecvPushPromise) => Some(ReservedRemote),
            (ReservedLocal, SendHeaders) => Some(HalfClosedRemote),
            (ReservedRemote, RecvHeaders) => Some(HalfClosedLocal),
            (Open, SendEndStream) => Some(HalfClosedLocal),
            (Open, RecvEndStream) => Some(HalfClosedRemote),
            (HalfClosedLocal, RecvEndStream) => Some(Closed),
            (HalfClosedRemote, SendEndStream) => Some(Closed),
            _ => None,
        };
        next.ok_or(Error::StreamTransition {
            id,
            from: self,
            event,
        })
    }
}

/// Connection a stream belongs to.
#[derive(Clone)]
pub(crate) enum Owner {
    Client(Weak<Client>),
    Server(Weak<Server>),
    /// Not attached to any connection.
    Detached,
}

pub type StreamHandler = Arc<dyn Fn(&Stream) + Send + Sync>;
pub type StreamErrorHandler = Arc<dyn Fn(&Stream, &str) + Send + Sync>;

#[derive(Default)]
struct Handlers {
    end: Option<StreamHandler>,
    error: Option<StreamErrorHandler>,
    close: Option<StreamHandler>,
}

pub struct Stream {
    id: u32,
    this: Weak<Stream>,
    owner: Owner,
    state: Mutex<StreamState>,
    request: Mutex<Option<Arc<Request>>>,
    response: Mutex<Option<Arc<Response>>>,
    handlers: Mutex<Handlers>,
    protocol: String,
    /// A response or rejection has been queued for the peer.
    answered: AtomicBool,
    ended: AtomicBool,
}

impl Stream {
    pub(crate) fn new(id: u32, owner: Owner, protocol: &str, options: Options) -> Arc<Self> {
        Arc::new_cyclic(|this: &Weak<Stream>| Stream {
            id,
            this: this.clone(),
            owner,
            state: Mutex::new(StreamState::Idle),
            request: Mutex::new(Some(Arc::new(Request::new(this.clone(), protocol, options)))),
            response: Mutex::new(Some(Arc::new(Response::new(this.clone(), protocol)))),
            handlers: Mutex::new(Handlers::default()),
            protocol: protocol.to_string(),
            answered: AtomicBool::new(false),
            ended: AtomicBool::new(false),
        })
    }

    /// A stream outside any connection, e.g. for building a dependency
    /// tree by hand. Writing it fails with [`Error::NotReady`].
    pub fn detached(id: u32) -> Arc<Self> {
        Stream::new(id, Owner::Detached, "HTTP/1.1", Options::new())
    }

    pub fn id(&self) -> u32 {
        self.id
    }

    pub fn state(&self) -> StreamState {
        *self.state.lock()
    }

    /// Applies `event` to the stream state.
    pub fn transition(&self, event: StreamEvent) -> Result<StreamState> {
        let mut state = self.state.lock();
        *state = state.transition(self.id, event)?;
        Ok(*state)
    }

    /// The request, until the stream ends.
    pub fn request(&self) -> Option<Arc<Request>> {
        self.request.lock().clone()
    }

    /// The response, until the stream ends.
    pub fn response(&self) -> Option<Arc<Response>> {
        self.response.lock().clone()
    }

    /// Protocol version of the exchange, still known after the stream ends.
    pub fn protocol(&self) -> &str {
        &self.protocol
    }

    /// True once an answer to the request has been queued.
    pub fn is_answered(&self) -> bool {
        self.answered.load(Ordering::Acquire)
    }

    /// Marks the stream answered; false if it already was.
    pub(crate) fn claim_answer(&self) -> bool {
        !self.answered.swap(true, Ordering::AcqRel)
    }

    pub fn is_ended(&self) -> bool {
        self.ended.load(Ordering::Acquire)
    }

    pub fn on_end(&self, f: impl Fn(&Stream) + Send + Sync + 'static) {
        self.handlers.lock().end = Some(Arc::new(f));
    }

    pub fn on_error(&self, f: impl Fn(&Stream, &str) + Send + Sync + 'static) {
        self.handlers.lock().error = Some(Arc::new(f));
    }

    pub fn on_close(&self, f: impl Fn(&Stream) + Send + Sync + 'static) {
        self.handlers.lock().close = Some(Arc::new(f));
    }

    fn this(&self) -> Result<Arc<Stream>> {
        self.this.upgrade().ok_or(Error::StreamEnded(self.id))
    }

    /// Queues the stream on its connection: the request on a client, the
    /// response on a server. A server stream is answered at most once; a
    /// second `write` or `reject` fails with [`Error::AlreadyAnswered`].
    pub fn write(&self) -> Result<()> {
        if self.is_ended() {
            return Err(Error::StreamEnded(self.id));
        }
        match &self.owner {
            Owner::Client(client) => {
                let client = client.upgrade().ok_or(Error::NotReady)?;
                client.write(self.this()?)
            }
            Owner::Server(server) => {
                let server = server.upgrade().ok_or(Error::NotReady)?;
                server.respond(self.this()?)
            }
            Owner::Detached => Err(Error::NotReady),
        }
    }

    /// Answers the exchange with `code` and no body.
    ///
    /// A server writes a status-line-only response. A client has nothing to
    /// send, so it completes the response locally with that code.
    pub fn reject(&self, code: u16) -> Result<()> {
        match &self.owner {
            Owner::Server(server) => {
                let server = server.upgrade().ok_or(Error::NotReady)?;
                server.reject(Some(self.this()?), code)
            }
            Owner::Client(_) | Owner::Detached => {
                if let Some(response) = self.response() {
                    response.set_code(code);
                }
                self.end();
                Ok(())
            }
        }
    }

    /// Reports a failure to the response, the request and the stream's
    /// error handler. The stream still has to be ended.
    pub fn error(&self, reason: &str) {
        if self.is_ended() {
            return;
        }
        tracing::debug!(stream = self.id, reason, "stream error");
        if let Some(response) = self.response() {
            response.error(reason);
        }
        if let Some(request) = self.request() {
            request.error(reason);
        }
        let handler = self.handlers.lock().error.clone();
        if let Some(handler) = handler {
            let _ = guarded("stream on_error", || handler(self, reason));
        }
    }

    /// Ends the exchange. Only the first call has any effect.
    ///
    /// Finalises the response, then the request, runs the completion
    /// handler, releases both messages, closes the stream and unmaps it from
    /// its connection. A server stream ended before it was answered is
    /// answered 500 so the connection can move on.
    pub fn end(&self) {
        if self.ended.swap(true, Ordering::AcqRel) {
            return;
        }
        let unanswered = match &self.owner {
            Owner::Server(server) if self.claim_answer() => Some(server.clone()),
            _ => None,
        };
        let keep_alive = self.request().is_none_or(|r| r.keep_alive());

        let response = self.response.lock().take();
        let request = self.request.lock().take();
        if let Some(response) = &response {
            response.end();
        }
        if let Some(request) = &request {
            request.end();
        }

        let end = self.handlers.lock().end.clone();
        if let Some(end) = end {
            let _ = guarded("stream on_end", || end(self));
        }
        drop(response);
        drop(request);

        if let Err(e) = self.transition(StreamEvent::Reset) {
            tracing::trace!(stream = self.id, error = %e, "stream already closed");
        }
        let close = std::mem::take(&mut *self.handlers.lock()).close;
        if let Some(close) = close {
            let _ = guarded("stream on_close", || close(self));
        }

        self.release();

        if let Some(server) = unanswered.and_then(|s| s.upgrade()) {
            server.unanswered(self, keep_alive);
        }
    }

    fn release(&self) {
        let removed = match &self.owner {
            Owner::Client(client) => client.upgrade().and_then(|c| c.streams().remove(self.id)),
            Owner::Server(server) => server.upgrade().and_then(|s| s.streams().remove(self.id)),
            Owner::Detached => None,
        };
        drop(removed);
    }
}

impl fmt::Debug for Stream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Stream")
            .field("id", &self.id)
            .field("state", &self.state())
            .field("ended", &self.is_ended())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    #[test]
    fn http1_lifecycle() {
        let s = StreamState::Idle;
        let s = s.transition(1, StreamEvent::SendHeaders).unwrap();
        assert_eq!(s, StreamState::Open);
        assert_eq!(s.transition(1, StreamEvent::Reset).unwrap(), StreamState::Closed);
    }

    #[test]
    fn half_close_both_ways() {
        let s = StreamState::Open
            .transition(3, StreamEvent::SendEndStream)
            .unwrap();
        assert_eq!(s, StreamState::HalfClosedLocal);
        assert_eq!(
            s.transition(3, StreamEvent::RecvEndStream).unwrap(),
            StreamState::Closed
        );
        assert!(s.transition(3, StreamEvent::SendEndStream).is_err());
    }

    #[test]
    fn push_reservation() {
        let s = StreamState::Idle
            .transition(2, StreamEvent::SendPushPromise)
            .unwrap();
        assert_eq!(s, StreamState::ReservedLocal);
        assert_eq!(
            s.transition(2, StreamEvent::SendHeaders).unwrap(),
            StreamState::HalfClosedRemote
        );
    }

    #[test]
    fn nothing_leaves_closed() {
        for event in [StreamEvent::SendHeaders, StreamEvent::RecvHeaders, StreamEvent::Reset] {
            assert!(matches!(
                StreamState::Closed.transition(9, event),
                Err(Error::StreamTransition { id: 9, from: StreamState::Closed, .. })
            ));
        }
    }

    #[test]
    fn end_runs_handler_once() {
        let stream = Stream::detached(1);
        let count = Arc::new(AtomicUsize::new(0));
        let seen = count.clone();
        stream.on_end(move |_| {
            seen.fetch_add(1, Ordering::SeqCst);
        });

        stream.end();
        stream.end();

        assert_eq!(count.load(Ordering::SeqCst), 1);
        assert_eq!(stream.state(), StreamState::Closed);
        assert!(stream.request().is_none());
        assert!(stream.response().is_none());
    }

    #[test]
    fn detached_write_not_ready() {
        let stream = Stream::detached(1);
        assert!(matches!(stream.write(), Err(Error::NotReady)));
    }
}
