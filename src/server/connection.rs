use std::fmt;
use std::future::Future;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use tokio::net::TcpStream;
use tracing::{debug, trace, warn};

use super::listener::Listen;
use crate::dispatch::socket::{self, ReadStatus, Selected, Selection};
use crate::dispatch::{Context, Watch, WorkQueue, Worker};
use crate::error::{Error, Result};
use crate::http::connection::{ConnectionEvent, ConnectionState, Lifecycle};
use crate::http::options::Options;
use crate::http::parser::{ParseError, Progress, RequestHead, RequestParser};
use crate::http::request::Method;
use crate::http::writer;
use crate::ioda::Ioda;
use crate::stream::{Owner, ROOT, Stream, StreamEvent, StreamSet};

/// Work for a server connection's inbound queue.
pub enum Inbound {
    Data(Ioda),
    /// The previous response went out; parse what is buffered.
    Resume,
    /// Read failure: report it, then close.
    Fail(String),
    Close,
}

pub enum Outbound {
    Respond(Arc<Stream>),
    Reject {
        stream: Option<Arc<Stream>>,
        code: u16,
        close: bool,
    },
    /// A stream ended without an answer; the peer still gets a 500.
    Unanswered { protocol: String, keep_alive: bool },
}

#[derive(Default)]
struct State {
    life: Lifecycle,
    socket: Option<Arc<TcpStream>>,
    watch: Option<Watch>,
    /// A request is with the application or its answer is being written;
    /// parsing waits.
    responding: bool,
    /// Reads stopped until the outstanding answer is written.
    paused: bool,
}

struct Reader {
    input: Ioda,
    parser: RequestParser,
    /// Bytes of a refused body still to skip.
    discard: usize,
    /// Stream whose request is being parsed.
    current: Option<Arc<Stream>>,
}

/// One accepted HTTP/1.x connection.
///
/// Requests are handled strictly one after another: the next request is not
/// parsed until the response to the previous one has been written.
pub struct Server {
    this: Weak<Server>,
    listen: Weak<Listen>,
    context: Context,
    peer: SocketAddr,
    local: SocketAddr,
    serial: AtomicU64,
    /// Buffered input above which reads pause while a request is answered.
    pause_at: usize,
    state: Mutex<State>,
    reader: Mutex<Reader>,
    streams: StreamSet,
    inbound: WorkQueue<Inbound>,
    outbound: WorkQueue<Outbound>,
}

impl Server {
    pub(crate) fn accept(
        context: &Context,
        listen: Weak<Listen>,
        socket: TcpStream,
        peer: SocketAddr,
        local: SocketAddr,
    ) -> Result<Arc<Self>> {
        let server = Arc::new_cyclic(|this: &Weak<Server>| Server {
            this: this.clone(),
            listen,
            context: context.clone(),
            peer,
            local,
            serial: AtomicU64::new(0),
            pause_at: {
                let limits = context.request_limits();
                limits.header + limits.body
            },
            state: Mutex::new(State::default()),
            reader: Mutex::new(Reader {
                input: Ioda::new(),
                parser: RequestParser::new(context.request_limits()),
                discard: 0,
                current: None,
            }),
            streams: StreamSet::new(1),
            inbound: WorkQueue::start(context.workers(), "server-inbound", this.clone()),
            outbound: WorkQueue::start(context.workers(), "server-outbound", this.clone()),
        });
        server.ready(socket)?;
        Ok(server)
    }

    fn ready(&self, socket: TcpStream) -> Result<()> {
        let socket = Arc::new(socket);
        let watch = self.watch(&socket);
        let mut state = self.state.lock();
        state.life.apply(ConnectionEvent::Connected)?;
        state.socket = Some(socket);
        state.watch = Some(watch);
        Ok(())
    }

    fn watch(&self, socket: &Arc<TcpStream>) -> Watch {
        self.context
            .watch(socket::watch_readable(socket.clone(), self.this.clone()))
    }

    pub fn peer(&self) -> SocketAddr {
        self.peer
    }

    pub fn local(&self) -> SocketAddr {
        self.local
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

    pub fn listen(&self) -> Option<Arc<Listen>> {
        self.listen.upgrade()
    }

    fn serial(&self) -> u64 {
        self.serial.load(Ordering::Acquire)
    }

    /// Queues the response of `stream` for writing.
    pub fn respond(&self, stream: Arc<Stream>) -> Result<()> {
        if !self.is_ready() {
            return Err(Error::NotReady);
        }
        if !stream.claim_answer() {
            return Err(Error::AlreadyAnswered(stream.id()));
        }
        self.outbound.enqueue(self.serial(), Outbound::Respond(stream))
    }

    /// Queues a status-line-only response. Without a stream it answers a
    /// request that never got one.
    pub fn reject(&self, stream: Option<Arc<Stream>>, code: u16) -> Result<()> {
        if !self.is_ready() {
            return Err(Error::NotReady);
        }
        if let Some(stream) = &stream {
            if !stream.claim_answer() {
                return Err(Error::AlreadyAnswered(stream.id()));
            }
        }
        self.outbound.enqueue(
            self.serial(),
            Outbound::Reject {
                stream,
                code,
                close: false,
            },
        )
    }

    pub fn close(&self) {
        self.shutdown("connection closed");
    }

    /// Closes the connection from the inbound queue.
    pub fn close_enq(&self) {
        let watch = self.state.lock().watch.take();
        drop(watch);
        if self.inbound.enqueue(self.serial(), Inbound::Close).is_err() {
            self.close();
        }
    }

    /// Answers a stream that ended before the application answered it.
    pub(crate) fn unanswered(&self, stream: &Stream, keep_alive: bool) {
        if !self.is_ready() {
            return;
        }
        debug!(peer = %self.peer, stream = stream.id(), "stream ended unanswered");
        let item = Outbound::Unanswered {
            protocol: stream.protocol().to_string(),
            keep_alive,
        };
        if self.outbound.enqueue(self.serial(), item).is_err() {
            self.close();
        }
    }

    /// Reports `reason` to the listener's error handler and closes.
    fn fail(&self, reason: &str) {
        warn!(peer = %self.peer, reason, "server connection error");
        if let Some(listen) = self.listen.upgrade() {
            listen.connection_error(self, reason);
        }
        self.shutdown(reason);
    }

    fn shutdown(&self, reason: &str) {
        if self.state.lock().life.begin_close().is_err() {
            return;
        }
        debug!(peer = %self.peer, reason, "closing server connection");

        // unmap before the socket goes away
        if let Some(listen) = self.listen.upgrade() {
            listen.disconnect(self);
        }
        self.serial.fetch_add(1, Ordering::AcqRel);

        let (socket, watch) = {
            let mut state = self.state.lock();
            state.responding = false;
            state.paused = false;
            (state.socket.take(), state.watch.take())
        };
        drop(watch);
        drop(socket);
        let current = {
            let mut reader = self.reader.lock();
            reader.input.clear();
            reader.parser.reset();
            reader.discard = 0;
            reader.current.take()
        };
        drop(current);

        for stream in self.streams.streams() {
            stream.error(reason);
            stream.end();
        }

        if let Err(e) = self.state.lock().life.apply(ConnectionEvent::Closed) {
            warn!(peer = %self.peer, error = %e, "server close out of order");
        }
        if let Some(listen) = self.listen.upgrade() {
            listen.closed(self);
        }
    }

    fn receive(&self, data: Ioda) {
        if !self.is_ready() {
            return;
        }
        self.reader.lock().input.append_ioda(data);
        self.drain();
        self.throttle();
    }

    /// Stops reading while an answer is outstanding and too much input is
    /// already buffered. [`next_exchange`](Self::next_exchange) resumes.
    fn throttle(&self) {
        let buffered = self.reader.lock().input.len();
        if buffered <= self.pause_at {
            return;
        }
        let watch = {
            let mut state = self.state.lock();
            if !state.responding || state.watch.is_none() {
                return;
            }
            state.paused = true;
            state.watch.take()
        };
        debug!(peer = %self.peer, buffered, "pausing reads");
        drop(watch);
    }

    /// Parses buffered input until it runs out or a request is complete.
    fn drain(&self) {
        loop {
            {
                let mut reader = self.reader.lock();
                if reader.discard > 0 {
                    let n = reader.discard.min(reader.input.len());
                    reader.input.discard(n);
                    reader.discard -= n;
                    if reader.discard > 0 {
                        return;
                    }
                }
            }
            if self.state.lock().responding {
                return;
            }
            let step = {
                let mut reader = self.reader.lock();
                let Reader { input, parser, .. } = &mut *reader;
                parser.parse(input)
            };

            match step {
                Ok(Progress::Incomplete) => return,
                Ok(Progress::Head(head)) => self.begin(head),
                Ok(Progress::Body(chunk)) => {
                    let request = self
                        .reader
                        .lock()
                        .current
                        .as_ref()
                        .and_then(|s| s.request());
                    if let Some(request) = request {
                        request.push_body(chunk);
                    }
                }
                Ok(Progress::Complete) => self.dispatch(),
                Err(e) => {
                    self.refuse(e);
                    return;
                }
            }
        }
    }

    fn begin(&self, head: RequestHead) {
        let id = self.streams.assign_stream_id(2);
        trace!(peer = %self.peer, stream = id, method = %head.method, path = %head.path, "request head");
        let stream = Stream::new(
            id,
            Owner::Server(self.this.clone()),
            &head.protocol,
            Options::new(),
        );
        if let Some(request) = stream.request() {
            request.apply(head);
        }
        if let Err(e) = stream.transition(StreamEvent::RecvHeaders) {
            trace!(stream = id, error = %e, "headers out of order");
        }
        if let Err(e) = self.streams.insert(ROOT, stream.clone()) {
            warn!(peer = %self.peer, stream = id, error = %e, "stream not mapped");
        }
        self.reader.lock().current = Some(stream);
    }

    /// Hands a complete request to the listener.
    fn dispatch(&self) {
        let current = self.reader.lock().current.take();
        let Some(stream) = current else {
            return;
        };
        self.state.lock().responding = true;
        if let Err(e) = stream.transition(StreamEvent::RecvEndStream) {
            trace!(stream = stream.id(), error = %e, "end of request out of order");
        }

        match self.listen.upgrade() {
            Some(listen) => listen.do_request(stream),
            None => {
                let _ = stream.reject(501);
            }
        }
    }

    /// Answers a request the parser refused.
    fn refuse(&self, error: ParseError) {
        let current = self.reader.lock().current.take();
        match error {
            ParseError::StartLine => {
                drop(current);
                self.fail(&error.to_string());
            }
            ParseError::TooLarge(length) => {
                debug!(peer = %self.peer, length, "request body over limit");
                self.reader.lock().discard = length;
                self.state.lock().responding = true;
                self.queue_reject(current, 413, false);
            }
            other => {
                debug!(peer = %self.peer, error = %other, "bad request");
                self.state.lock().responding = true;
                self.queue_reject(current, other.status(), true);
            }
        }
    }

    fn queue_reject(&self, stream: Option<Arc<Stream>>, code: u16, close: bool) {
        if let Some(stream) = &stream {
            let _ = stream.claim_answer();
        }
        let item = Outbound::Reject {
            stream,
            code,
            close,
        };
        if self.outbound.enqueue(self.serial(), item).is_err() {
            self.close();
        }
    }

    async fn send(&self, bytes: &mut Ioda) -> bool {
        let socket = self.state.lock().socket.clone();
        let Some(socket) = socket else {
            return false;
        };
        match socket::send_all(&socket, bytes).await {
            Ok(n) => {
                trace!(peer = %self.peer, bytes = n, "server wrote");
                true
            }
            Err(e) => {
                drop(socket);
                self.fail(&e.to_string());
                false
            }
        }
    }

    async fn write_response(&self, stream: Arc<Stream>) {
        let (Some(request), Some(response)) = (stream.request(), stream.response()) else {
            // ended after it was queued; the response is gone
            if self.write_status(stream.protocol(), 500).await {
                self.next_exchange(false);
            }
            return;
        };
        let head_only = request.method() == Method::HEAD;
        let keep_alive = request.keep_alive() && response.keep_alive();
        let mut bytes = response.encode(head_only);
        debug!(peer = %self.peer, stream = stream.id(), code = response.code(), keep_alive, "responding");
        drop(request);
        drop(response);

        if let Err(e) = stream.transition(StreamEvent::SendEndStream) {
            trace!(stream = stream.id(), error = %e, "response out of order");
        }
        if !self.send(&mut bytes).await {
            return;
        }
        stream.end();
        self.next_exchange(keep_alive);
    }

    async fn write_reject(&self, stream: Option<Arc<Stream>>, code: u16, close: bool) {
        let request = stream.as_ref().and_then(|s| s.request());
        let protocol = stream
            .as_ref()
            .map_or("HTTP/1.1", |s| s.protocol())
            .to_string();
        // a stream that already ended left nothing to judge keep-alive by
        let keep_alive = !close
            && match &request {
                Some(request) => request.keep_alive(),
                None => stream.is_none(),
            };
        drop(request);

        debug!(peer = %self.peer, code, keep_alive, "rejecting request");
        if !self.write_status(&protocol, code).await {
            return;
        }
        if let Some(stream) = stream {
            if let Some(response) = stream.response() {
                response.set_code(code);
            }
            stream.end();
        }
        self.next_exchange(keep_alive);
    }

    async fn write_status(&self, protocol: &str, code: u16) -> bool {
        let mut bytes = writer::write_reject(protocol, code);
        self.send(&mut bytes).await
    }

    async fn write_unanswered(&self, protocol: String, keep_alive: bool) {
        if self.write_status(&protocol, 500).await {
            self.next_exchange(keep_alive);
        }
    }

    fn next_exchange(&self, keep_alive: bool) {
        if !keep_alive {
            self.shutdown("connection closed");
            return;
        }
        let resume = {
            let mut state = self.state.lock();
            state.responding = false;
            if std::mem::take(&mut state.paused) {
                state.socket.clone()
            } else {
                None
            }
        };
        if let Some(socket) = resume {
            let watch = self.watch(&socket);
            let mut state = self.state.lock();
            if state.life.is_ready() && state.watch.is_none() {
                debug!(peer = %self.peer, "resuming reads");
                state.watch = Some(watch);
            }
        }
        if self.inbound.enqueue(self.serial(), Inbound::Resume).is_err() {
            self.close();
        }
    }
}

impl Worker<Inbound> for Server {
    fn serial(&self) -> u64 {
        Server::serial(self)
    }

    fn work(self: Arc<Self>, item: Inbound) -> impl Future<Output = ()> + Send {
        async move {
            match item {
                Inbound::Data(data) => self.receive(data),
                Inbound::Resume => self.drain(),
                Inbound::Fail(reason) => self.fail(&reason),
                Inbound::Close => self.shutdown("connection closed"),
            }
        }
    }

    fn purge(&self, _item: Inbound) {}

    fn panicked(&self, queue: &'static str) {
        warn!(peer = %self.peer, queue, "closing server connection after panic");
        self.shutdown("internal error");
    }
}

impl Worker<Outbound> for Server {
    fn serial(&self) -> u64 {
        Server::serial(self)
    }

    fn work(self: Arc<Self>, item: Outbound) -> impl Future<Output = ()> + Send {
        async move {
            match item {
                Outbound::Respond(stream) => self.write_response(stream).await,
                Outbound::Reject {
                    stream,
                    code,
                    close,
                } => self.write_reject(stream, code, close).await,
                Outbound::Unanswered {
                    protocol,
                    keep_alive,
                } => self.write_unanswered(protocol, keep_alive).await,
            }
        }
    }

    fn purge(&self, item: Outbound) {
        let stream = match item {
            Outbound::Respond(stream) => Some(stream),
            Outbound::Reject { stream, .. } => stream,
            Outbound::Unanswered { .. } => None,
        };
        if let Some(stream) = stream {
            stream.error("connection closed");
            stream.end();
        }
    }

    fn panicked(&self, queue: &'static str) {
        warn!(peer = %self.peer, queue, "closing server connection after panic");
        self.shutdown("internal error");
    }
}

impl Selected for Server {
    fn selected(&self, socket: &TcpStream) -> Selection {
        let mut data = Ioda::new();
        match socket::read_available(socket, self.context.config().read_size, &mut data) {
            Ok(ReadStatus::Data(0)) => Selection::Continue,
            Ok(ReadStatus::Data(n)) => {
                trace!(peer = %self.peer, bytes = n, "server read");
                if self.inbound.enqueue(self.serial(), Inbound::Data(data)).is_err() {
                    return Selection::Stop;
                }
                Selection::Continue
            }
            Ok(ReadStatus::Closed) => {
                debug!(peer = %self.peer, "client closed connection");
                self.close_enq();
                Selection::Stop
            }
            Err(e) => {
                let watch = self.state.lock().watch.take();
                drop(watch);
                let _ = self
                    .inbound
                    .enqueue(self.serial(), Inbound::Fail(e.to_string()));
                Selection::Stop
            }
        }
    }
}

impl fmt::Debug for Server {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Server")
            .field("peer", &self.peer)
            .field("local", &self.local)
            .field("state", &self.state())
            .finish()
    }
}
