use std::collections::HashMap;
use std::fmt;
use std::net::SocketAddr;
use std::sync::{Arc, Weak};
use std::time::Duration;

use parking_lot::Mutex;
use tokio::net::{TcpListener, TcpStream};
use tracing::{debug, info, warn};

use super::agent::ListenAgent;
use super::connection::Server;
use crate::dispatch::socket;
use crate::dispatch::{Context, Watch};
use crate::error::Result;
use crate::http::connection::{ConnectionEvent, ConnectionState, Lifecycle};
use crate::http::options::Options;
use crate::http::{Protocol, guarded};
use crate::stream::Stream;

pub type RequestHandler = Arc<dyn Fn(Arc<Stream>) + Send + Sync>;
pub type ServerHandler = Arc<dyn Fn(&Server) + Send + Sync>;
pub type ServerErrorHandler = Arc<dyn Fn(&Server, &str) + Send + Sync>;

#[derive(Default)]
struct Handlers {
    request: Option<RequestHandler>,
    close: Option<ServerHandler>,
    error: Option<ServerErrorHandler>,
}

#[derive(Default)]
struct State {
    life: Lifecycle,
    watch: Option<Watch>,
}

/// A bound listening socket and the server connections it accepted.
///
/// Complete requests go to the [`on_request`](Listen::on_request) handler;
/// without one every request is answered 501.
pub struct Listen {
    this: Weak<Listen>,
    agent: Weak<ListenAgent>,
    context: Context,
    protocol: Protocol,
    local: SocketAddr,
    options: Mutex<Options>,
    state: Mutex<State>,
    servers: Mutex<HashMap<SocketAddr, Arc<Server>>>,
    handlers: Mutex<Handlers>,
}

impl Listen {
    pub(crate) fn bind(
        context: &Context,
        agent: Weak<ListenAgent>,
        addr: SocketAddr,
        options: &Options,
    ) -> Result<Arc<Self>> {
        let protocol = Protocol::from_options(options)?.require_supported()?;
        let listener = socket::bind(context.pump(), addr)?;
        let local = listener.local_addr()?;

        let listen = Arc::new_cyclic(|this: &Weak<Listen>| Listen {
            this: this.clone(),
            agent,
            context: context.clone(),
            protocol,
            local,
            options: Mutex::new(options.clone()),
            state: Mutex::new(State::default()),
            servers: Mutex::new(HashMap::new()),
            handlers: Mutex::new(Handlers::default()),
        });

        let watch = context.watch(accept_loop(listener, Arc::downgrade(&listen)));
        {
            let mut state = listen.state.lock();
            state.life.apply(ConnectionEvent::Connected)?;
            state.watch = Some(watch);
        }
        info!(address = %local, protocol = %protocol, "listening");
        Ok(listen)
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local
    }

    pub fn protocol(&self) -> Protocol {
        self.protocol
    }

    pub fn state(&self) -> ConnectionState {
        self.state.lock().life.state()
    }

    pub fn is_ready(&self) -> bool {
        self.state.lock().life.is_ready()
    }

    pub fn options(&self) -> Options {
        self.options.lock().clone()
    }

    /// Adds `options`, replacing any with the same names.
    pub fn opt_append(&self, options: &Options) {
        self.options.lock().append(options);
    }

    pub fn opt_reset(&self, options: Options) {
        *self.options.lock() = options;
    }

    pub fn on_request(&self, f: impl Fn(Arc<Stream>) + Send + Sync + 'static) {
        self.handlers.lock().request = Some(Arc::new(f));
    }

    /// Called after each server connection closes.
    pub fn on_close(&self, f: impl Fn(&Server) + Send + Sync + 'static) {
        self.handlers.lock().close = Some(Arc::new(f));
    }

    /// Called when a server connection fails, before it closes.
    pub fn on_error(&self, f: impl Fn(&Server, &str) + Send + Sync + 'static) {
        self.handlers.lock().error = Some(Arc::new(f));
    }

    /// Hands a complete request to the request handler.
    ///
    /// Without a handler the request is answered 501; if the handler panics
    /// before answering it is answered 500.
    pub fn do_request(&self, stream: Arc<Stream>) {
        let handler = self.handlers.lock().request.clone();
        let Some(handler) = handler else {
            let _ = stream.reject(501);
            return;
        };
        let target = stream.clone();
        if !guarded("on_request", || handler(target)) && !stream.is_answered() {
            let _ = stream.reject(500);
        }
    }

    pub(crate) fn connection_error(&self, server: &Server, reason: &str) {
        let handler = self.handlers.lock().error.clone();
        if let Some(handler) = handler {
            let _ = guarded("listen on_error", || handler(server, reason));
        }
    }

    pub(crate) fn closed(&self, server: &Server) {
        let handler = self.handlers.lock().close.clone();
        if let Some(handler) = handler {
            let _ = guarded("listen on_close", || handler(server));
        }
    }

    fn accepted(&self, socket: TcpStream, peer: SocketAddr) {
        if !self.is_ready() {
            return;
        }
        if peer.ip().is_unspecified() || peer.port() == 0 {
            warn!(peer = %peer, "refusing connection without a usable peer address");
            return;
        }
        if let Err(e) = socket.set_nodelay(true) {
            debug!(peer = %peer, error = %e, "set_nodelay failed");
        }
        match Server::accept(&self.context, self.this.clone(), socket, peer, self.local) {
            Ok(server) => {
                debug!(peer = %peer, "accepted connection");
                self.map_insert(server);
            }
            Err(e) => warn!(peer = %peer, error = %e, "failed to set up connection"),
        }
    }

    /// Maps `server` by peer address. A second connection from a mapped
    /// peer closes both.
    pub fn map_insert(&self, server: Arc<Server>) {
        let existing = {
            let mut servers = self.servers.lock();
            match servers.get(&server.peer()) {
                Some(existing) => Some(existing.clone()),
                None => {
                    servers.insert(server.peer(), server.clone());
                    None
                }
            }
        };
        if let Some(existing) = existing {
            warn!(peer = %server.peer(), "duplicate peer; closing both connections");
            existing.close_enq();
            server.close_enq();
        }
    }

    pub fn map_locate(&self, peer: SocketAddr) -> Option<Arc<Server>> {
        self.servers.lock().get(&peer).cloned()
    }

    pub fn map_remove(&self, peer: SocketAddr) -> Option<Arc<Server>> {
        self.servers.lock().remove(&peer)
    }

    /// Removes `server` if it is the one mapped for its peer.
    pub fn disconnect(&self, server: &Server) -> bool {
        let mut servers = self.servers.lock();
        match servers.get(&server.peer()) {
            Some(mapped) if std::ptr::eq(Arc::as_ptr(mapped), server) => {
                servers.remove(&server.peer());
                true
            }
            _ => false,
        }
    }

    pub fn len(&self) -> usize {
        self.servers.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.servers.lock().is_empty()
    }

    /// Closes every accepted connection; the listener stays open.
    pub fn reset(&self) {
        let servers: Vec<Arc<Server>> = self.servers.lock().values().cloned().collect();
        debug!(address = %self.local, count = servers.len(), "resetting listener");
        for server in servers {
            server.close();
        }
    }

    /// Stops accepting and closes every accepted connection.
    pub fn close(&self) {
        if self.state.lock().life.begin_close().is_err() {
            return;
        }
        if let Some(agent) = self.agent.upgrade() {
            agent.disconnect(self);
        }
        let watch = self.state.lock().watch.take();
        drop(watch);
        self.reset();
        if let Err(e) = self.state.lock().life.apply(ConnectionEvent::Closed) {
            warn!(address = %self.local, error = %e, "listener close out of order");
        }
        info!(address = %self.local, "listener closed");
    }
}

impl fmt::Debug for Listen {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Listen")
            .field("local", &self.local)
            .field("protocol", &self.protocol)
            .field("state", &self.state())
            .field("connections", &self.len())
            .finish()
    }
}

/// Watcher task accepting connections until the listener goes away.
async fn accept_loop(listener: TcpListener, target: Weak<Listen>) {
    loop {
        match listener.accept().await {
            Ok((socket, peer)) => {
                let Some(listen) = target.upgrade() else {
                    break;
                };
                listen.accepted(socket, peer);
            }
            Err(e) => {
                if target.strong_count() == 0 {
                    break;
                }
                warn!(error = %e, "accept failed");
                tokio::time::sleep(Duration::from_millis(50)).await;
            }
        }
    }
}
