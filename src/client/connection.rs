use std::fmt;
use std::future::Future;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use tokio::net::TcpStream;
use tokio::sync::oneshot;
use tracing::{debug, trace, warn};

use super::agent::ClientAgent;
use crate::dispatch::socket::{self, ReadStatus, Selected, Selection};
use crate::dispatch::{Context, Watch, WorkQueue, Worker};
use crate::error::{Error, Result};
use crate::http::connection::{ConnectionEvent, ConnectionState, Lifecycle};
use crate::http::guarded;
use crate::http::options::{HOST, Options};
use crate::http::parser::{Progress, ResponseParser};
use crate::http::request::Method;
use crate::http::response::Response;
use crate::http::Protocol;
use crate::ioda::Ioda;
use crate::stream::{Owner, ROOT, Stream, StreamEvent, StreamSet};

pub type ClientCloseHandler = Arc<dyn Fn(&Client) + Send + Sync>;

/// Inbound work: bytes from the pump, or a request to close.
pub enum Inbound {
    Data(Ioda),
    Close(String),
}

/// The request currently on the wire and the signal that releases the
/// outbound worker once its response completes.
struct Exchange {
    stream: Arc<Stream>,
    done: oneshot::Sender<()>,
}

#[derive(Default)]
struct State {
    life: Lifecycle,
    socket: Option<Arc<TcpStream>>,
    watch: Option<Watch>,
    active: Option<Exchange>,
}

#[derive(Default)]
struct Reader {
    input: Ioda,
    parser: Option<ResponseParser>,
}

/// One outbound HTTP/1.x connection.
///
/// Requests are written in the order [`write`](Client::write) is called and
/// only one is on the wire at a time: the outbound worker waits for each
/// response to complete before taking the next stream.
pub struct Client {
    this: Weak<Client>,
    agent: Weak<ClientAgent>,
    context: Context,
    protocol: Protocol,
    options: Options,
    peer: SocketAddr,
    local: SocketAddr,
    serial: AtomicU64,
    state: Mutex<State>,
    reader: Mutex<Reader>,
    streams: StreamSet,
    close_handler: Mutex<Option<ClientCloseHandler>>,
    inbound: WorkQueue<Inbound>,
    outbound: WorkQueue<Arc<Stream>>,
}

impl Client {
    pub(crate) fn connect(
        context: &Context,
        agent: Weak<ClientAgent>,
        addr: SocketAddr,
        options: &Options,
    ) -> Result<Arc<Self>> {
        let protocol = Protocol::from_options(options)?.require_supported()?;
        let socket = socket::connect(context.pump(), addr, context.connect_timeout())?;
        let peer = socket.peer_addr()?;
        let local = socket.local_addr()?;

        let client = Arc::new_cyclic(|this: &Weak<Client>| Client {
            this: this.clone(),
            agent,
            context: context.clone(),
            protocol,
            options: options.clone(),
            peer,
            local,
            serial: AtomicU64::new(0),
            state: Mutex::new(State::default()),
            reader: Mutex::new(Reader::default()),
            streams: StreamSet::new(1),
            close_handler: Mutex::new(None),
            inbound: WorkQueue::start(context.workers(), "client-inbound", this.clone()),
            outbound: WorkQueue::start(context.workers(), "client-outbound", this.clone()),
        });
        client.ready(socket)?;
        debug!(peer = %peer, local = %local, protocol = %protocol, "client connected");
        Ok(client)
    }

    fn ready(&self, socket: TcpStream) -> Result<()> {
        let socket = Arc::new(socket);
        let watch = self
            .context
            .watch(socket::watch_readable(socket.clone(), self.this.clone()));
        let mut state = self.state.lock();
        state.life.apply(ConnectionEvent::Connected)?;
        state.socket = Some(socket);
        state.watch = Some(watch);
        Ok(())
    }

    pub fn peer(&self) -> SocketAddr {
        self.peer
    }

    pub fn local(&self) -> SocketAddr {
        self.local
    }

    pub fn protocol(&self) -> Protocol {
        self.protocol
    }

    /// Options the connection was opened with.
    pub fn options(&self) -> &Options {
        &self.options
    }

    pub fn state(&self) -> ConnectionState {
        self.state.lock().life.state()
    }

    pub fn is_ready(&self) -> bool {
        self.state.lock().life.is_ready()
    }

    pub fn streams(&self) -> &StreamSet {
        &self.streams
    }

    pub fn agent(&self) -> Option<Arc<ClientAgent>> {
        self.agent.upgrade()
    }

    pub fn on_close(&self, f: impl Fn(&Client) + Send + Sync + 'static) {
        *self.close_handler.lock() = Some(Arc::new(f));
    }

    fn serial(&self) -> u64 {
        self.serial.load(Ordering::Acquire)
    }

    /// Creates a stream whose request carries `options` as its headers.
    /// A `Host` header naming the peer is added unless one is given.
    pub fn make_stream(&self, options: &Options) -> Result<Arc<Stream>> {
        if !self.is_ready() {
            return Err(Error::NotReady);
        }
        let mut headers = options.clone();
        if !headers.contains(HOST) {
            headers.insert(HOST, self.peer.to_string());
        }
        let id = self.streams.assign_stream_id(2);
        let stream = Stream::new(
            id,
            Owner::Client(self.this.clone()),
            self.protocol.version(),
            headers,
        );
        self.streams.insert(ROOT, stream.clone())?;
        trace!(peer = %self.peer, stream = id, "stream created");
        Ok(stream)
    }

    /// Queues `stream`'s request for writing.
    pub fn write(&self, stream: Arc<Stream>) -> Result<()> {
        if !self.is_ready() {
            return Err(Error::NotReady);
        }
        let owned = self
            .streams
            .get_stream(stream.id())
            .is_some_and(|s| Arc::ptr_eq(&s, &stream));
        if !owned {
            return Err(Error::UnknownStream(stream.id()));
        }
        self.outbound.enqueue(self.serial(), stream)
    }

    /// Closes the connection now. Outstanding streams fail.
    pub fn close(&self) {
        self.shutdown("connection closed");
    }

    /// Closes the connection from the inbound queue, after work already
    /// queued there.
    pub fn close_enq(&self) {
        self.close_with("connection closed");
    }

    fn close_with(&self, reason: &str) {
        let watch = self.state.lock().watch.take();
        drop(watch);
        if self
            .inbound
            .enqueue(self.serial(), Inbound::Close(reason.to_string()))
            .is_err()
        {
            self.shutdown(reason);
        }
    }

    fn connection_error(&self, reason: &str) {
        warn!(peer = %self.peer, reason, "client connection error");
        self.close_with(reason);
    }

    fn shutdown(&self, reason: &str) {
        if self.state.lock().life.begin_close().is_err() {
            return;
        }
        debug!(peer = %self.peer, reason, "closing client");

        // unmap before the socket goes away
        if let Some(agent) = self.agent.upgrade() {
            agent.disconnect(self);
        }
        self.serial.fetch_add(1, Ordering::AcqRel);

        let (socket, watch, active) = {
            let mut state = self.state.lock();
            (state.socket.take(), state.watch.take(), state.active.take())
        };
        drop(watch);
        drop(socket);
        {
            let mut reader = self.reader.lock();
            reader.input.clear();
            reader.parser = None;
        }

        if let Some(Exchange { stream, done }) = active {
            stream.error(reason);
            stream.end();
            drop(done);
        }
        for stream in self.streams.streams() {
            stream.error(reason);
            stream.end();
        }

        if let Err(e) = self.state.lock().life.apply(ConnectionEvent::Closed) {
            warn!(peer = %self.peer, error = %e, "client close out of order");
        }
        let handler = self.close_handler.lock().take();
        if let Some(handler) = handler {
            let _ = guarded("client on_close", || handler(self));
        }
    }

    fn active_response(&self) -> Option<Arc<Response>> {
        let state = self.state.lock();
        state.active.as_ref().and_then(|ex| ex.stream.response())
    }

    fn receive(&self, data: Ioda) {
        if !self.is_ready() {
            return;
        }
        self.reader.lock().input.append_ioda(data);

        loop {
            let step = {
                let mut reader = self.reader.lock();
                let Reader { input, parser } = &mut *reader;
                match parser.as_mut() {
                    Some(parser) => Some(parser.parse(input)),
                    None if input.is_empty() => return,
                    None => None,
                }
            };
            let Some(step) = step else {
                self.connection_error("unexpected data from server");
                return;
            };

            match step {
                Ok(Progress::Incomplete) => return,
                Ok(Progress::Head(head)) => {
                    if let Some(response) = self.active_response() {
                        trace!(peer = %self.peer, code = head.code, "response head");
                        response.apply(head);
                    }
                }
                Ok(Progress::Body(chunk)) => {
                    if let Some(response) = self.active_response() {
                        response.push_body(chunk);
                    }
                }
                Ok(Progress::Complete) => self.complete(),
                Err(e) => {
                    self.connection_error(&e.to_string());
                    return;
                }
            }
        }
    }

    fn complete(&self) {
        self.reader.lock().parser = None;
        let active = self.state.lock().active.take();
        let Some(Exchange { stream, done }) = active else {
            return;
        };

        let keep_alive = stream.response().is_none_or(|r| r.keep_alive());
        if let Err(e) = stream.transition(StreamEvent::RecvEndStream) {
            trace!(stream = stream.id(), error = %e, "end of response out of order");
        }
        debug!(peer = %self.peer, stream = stream.id(), "response complete");
        stream.end();
        let _ = done.send(());

        if !keep_alive {
            self.close_enq();
        }
    }

    async fn send(&self, stream: Arc<Stream>) {
        let Some(request) = stream.request() else {
            return;
        };
        let method = request.method();
        if method.allows_body() && request.body_len() == 0 {
            debug!(peer = %self.peer, stream = stream.id(), method = %method, "no body; rejecting locally");
            let _ = stream.reject(411);
            return;
        }

        let mut bytes = request.encode();
        let path = request.path();
        drop(request);

        let (done, finished) = oneshot::channel();
        let socket = {
            let mut state = self.state.lock();
            match state.socket.clone() {
                Some(socket) if state.life.is_ready() => {
                    state.active = Some(Exchange {
                        stream: stream.clone(),
                        done,
                    });
                    Some(socket)
                }
                _ => None,
            }
        };
        let Some(socket) = socket else {
            <Self as Worker<Arc<Stream>>>::purge(self, stream);
            return;
        };
        self.reader.lock().parser = Some(ResponseParser::new(
            self.context.response_limits(),
            method == Method::HEAD,
        ));

        if let Err(e) = stream.transition(StreamEvent::SendHeaders) {
            trace!(stream = stream.id(), error = %e, "headers out of order");
        }
        if let Err(e) = stream.transition(StreamEvent::SendEndStream) {
            trace!(stream = stream.id(), error = %e, "end of request out of order");
        }
        trace!(peer = %self.peer, stream = stream.id(), method = %method, path = %path, bytes = bytes.len(), "writing request");
        drop(stream);

        let written = socket::send_all(&socket, &mut bytes).await;
        drop(socket);
        if let Err(e) = written {
            self.connection_error(&e.to_string());
            return;
        }

        // one request in flight
        let _ = finished.await;
    }
}

impl Worker<Inbound> for Client {
    fn serial(&self) -> u64 {
        Client::serial(self)
    }

    fn work(self: Arc<Self>, item: Inbound) -> impl Future<Output = ()> + Send {
        async move {
            match item {
                Inbound::Data(data) => self.receive(data),
                Inbound::Close(reason) => self.shutdown(&reason),
            }
        }
    }

    fn purge(&self, _item: Inbound) {}

    fn panicked(&self, queue: &'static str) {
        warn!(peer = %self.peer, queue, "closing client after panic");
        self.shutdown("internal error");
    }
}

impl Worker<Arc<Stream>> for Client {
    fn serial(&self) -> u64 {
        Client::serial(self)
    }

    fn work(self: Arc<Self>, stream: Arc<Stream>) -> impl Future<Output = ()> + Send {
        async move { self.send(stream).await }
    }

    fn purge(&self, stream: Arc<Stream>) {
        stream.error("connection closed");
        stream.end();
    }

    fn panicked(&self, queue: &'static str) {
        warn!(peer = %self.peer, queue, "closing client after panic");
        self.shutdown("internal error");
    }
}

impl Selected for Client {
    fn selected(&self, socket: &TcpStream) -> Selection {
        let mut data = Ioda::new();
        match socket::read_available(socket, self.context.config().read_size, &mut data) {
            Ok(ReadStatus::Data(0)) => Selection::Continue,
            Ok(ReadStatus::Data(n)) => {
                trace!(peer = %self.peer, bytes = n, "client read");
                if self.inbound.enqueue(self.serial(), Inbound::Data(data)).is_err() {
                    return Selection::Stop;
                }
                Selection::Continue
            }
            Ok(ReadStatus::Closed) => {
                debug!(peer = %self.peer, "server closed connection");
                self.close_enq();
                Selection::Stop
            }
            Err(e) => {
                self.connection_error(&e.to_string());
                Selection::Stop
            }
        }
    }
}

impl fmt::Debug for Client {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Client")
            .field("peer", &self.peer)
            .field("local", &self.local)
            .field("protocol", &self.protocol)
            .field("state", &self.state())
            .finish()
    }
}
