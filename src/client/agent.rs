use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use tracing::{debug, info};
use url::Url;

use super::connection::Client;
use crate::config::EngineConfig;
use crate::dispatch::Dispatch;
use crate::dispatch::socket::{self, Family};
use crate::error::{Error, Result};
use crate::http::Protocol;
use crate::http::options::{Options, PROTOCOL};

/// Identity of a connection: its two endpoints, order-independent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnKey {
    low: SocketAddr,
    high: SocketAddr,
}

impl ConnKey {
    pub fn new(a: SocketAddr, b: SocketAddr) -> Self {
        if a <= b {
            Self { low: a, high: b }
        } else {
            Self { low: b, high: a }
        }
    }
}

/// Owns the client connections and the pump and workers that drive them.
///
/// Dropping the agent closes every connection and stops its pump.
pub struct ClientAgent {
    this: Weak<ClientAgent>,
    dispatch: Dispatch,
    clients: Mutex<HashMap<ConnKey, Arc<Client>>>,
}

impl ClientAgent {
    pub fn new(config: EngineConfig) -> Result<Arc<Self>> {
        let dispatch = Dispatch::start("client", config)?;
        Ok(Arc::new_cyclic(|this| ClientAgent {
            this: this.clone(),
            dispatch,
            clients: Mutex::new(HashMap::new()),
        }))
    }

    /// Connects to `host` (`name:port`, `[v6]:port` or a bare name on port
    /// 80), trying each resolved address in turn.
    pub fn connect(&self, host: &str, options: &Options) -> Result<Arc<Client>> {
        Protocol::from_options(options)?.require_supported()?;
        let addrs = socket::resolve(host, 80, Family::Any)?;

        let mut last = None;
        for addr in addrs {
            match Client::connect(self.dispatch.context(), self.this.clone(), addr, options) {
                Ok(client) => {
                    info!(host, peer = %client.peer(), "connected");
                    self.map_insert(client.clone());
                    return Ok(client);
                }
                Err(e) => {
                    debug!(host, addr = %addr, error = %e, "connect attempt failed");
                    last = Some(e);
                }
            }
        }
        let reason = last.map(|e| e.to_string()).unwrap_or_default();
        Err(Error::InvalidArgument(format!("{host}: {reason}")))
    }

    /// Connects to the authority of an `http` or `https` URL.
    ///
    /// The scheme picks the `PROTOCOL` option unless `options` already sets
    /// one.
    pub fn connect_url(&self, url: &Url, options: &Options) -> Result<Arc<Client>> {
        let protocol = match url.scheme() {
            "http" => "HTTP/1.1",
            "https" => "HTTPS/1.1",
            other => return Err(Error::InvalidArgument(format!("scheme: {other}"))),
        };
        let host = url
            .host_str()
            .ok_or_else(|| Error::InvalidArgument(format!("{url}: no host")))?;
        let port = url
            .port_or_known_default()
            .ok_or_else(|| Error::InvalidArgument(format!("{url}: no port")))?;

        let mut options = options.clone();
        if !options.contains(PROTOCOL) {
            options.insert(PROTOCOL, protocol);
        }
        self.connect(&format!("{host}:{port}"), &options)
    }

    /// Removes `client` from the identity map if it is the mapped
    /// connection for its endpoints.
    pub fn disconnect(&self, client: &Client) -> bool {
        let key = ConnKey::new(client.peer(), client.local());
        let mut clients = self.clients.lock();
        match clients.get(&key) {
            Some(mapped) if std::ptr::eq(Arc::as_ptr(mapped), client) => {
                clients.remove(&key);
                true
            }
            _ => false,
        }
    }

    /// Maps `client`, returning whatever was mapped for its endpoints.
    pub fn map_insert(&self, client: Arc<Client>) -> Option<Arc<Client>> {
        let key = ConnKey::new(client.peer(), client.local());
        self.clients.lock().insert(key, client)
    }

    pub fn map_locate(&self, peer: SocketAddr, local: SocketAddr) -> Option<Arc<Client>> {
        self.clients.lock().get(&ConnKey::new(peer, local)).cloned()
    }

    pub fn map_remove(&self, peer: SocketAddr, local: SocketAddr) -> Option<Arc<Client>> {
        self.clients.lock().remove(&ConnKey::new(peer, local))
    }

    pub fn len(&self) -> usize {
        self.clients.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.clients.lock().is_empty()
    }

    /// Closes every mapped connection.
    pub fn reset(&self) {
        let clients: Vec<Arc<Client>> = self.clients.lock().values().cloned().collect();
        debug!(count = clients.len(), "resetting client agent");
        for client in clients {
            client.close();
        }
    }
}

impl Drop for ClientAgent {
    fn drop(&mut self) {
        self.reset();
        self.clients.lock().clear();
        self.dispatch.stop();
    }
}
