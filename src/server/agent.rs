use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use tracing::debug;

use super::listener::Listen;
use crate::config::EngineConfig;
use crate::dispatch::Dispatch;
use crate::dispatch::socket::{self, Family};
use crate::error::{Error, Result};
use crate::http::Protocol;
use crate::http::options::Options;

/// Owns the listeners and the pump and workers that drive them.
pub struct ListenAgent {
    this: Weak<ListenAgent>,
    dispatch: Dispatch,
    listens: Mutex<HashMap<SocketAddr, Arc<Listen>>>,
}

impl ListenAgent {
    pub fn new(config: EngineConfig) -> Result<Arc<Self>> {
        let dispatch = Dispatch::start("listen", config)?;
        Ok(Arc::new_cyclic(|this| ListenAgent {
            this: this.clone(),
            dispatch,
            listens: Mutex::new(HashMap::new()),
        }))
    }

    /// Listens on `host` (`name:port`, `[v6]:port`, or `:port` for every
    /// interface), restricted to `family`.
    ///
    /// An address that is already being listened on returns its existing
    /// [`Listen`].
    pub fn connect(&self, host: &str, family: Family, options: &Options) -> Result<Arc<Listen>> {
        Protocol::from_options(options)?.require_supported()?;
        let addrs = socket::resolve(host, 80, family)?;

        let mut last = None;
        for addr in addrs {
            if let Some(existing) = self.map_locate(addr) {
                debug!(address = %addr, "reusing listener");
                return Ok(existing);
            }
            match Listen::bind(self.dispatch.context(), self.this.clone(), addr, options) {
                Ok(listen) => {
                    self.map_insert(listen.clone());
                    return Ok(listen);
                }
                Err(e) => {
                    debug!(host, address = %addr, error = %e, "bind attempt failed");
                    last = Some(e);
                }
            }
        }
        let reason = last.map(|e| e.to_string()).unwrap_or_default();
        Err(Error::InvalidArgument(format!("{host}: {reason}")))
    }

    /// Removes `listen` if it is the one mapped for its address.
    pub fn disconnect(&self, listen: &Listen) -> bool {
        let mut listens = self.listens.lock();
        match listens.get(&listen.local_addr()) {
            Some(mapped) if std::ptr::eq(Arc::as_ptr(mapped), listen) => {
                listens.remove(&listen.local_addr());
                true
            }
            _ => false,
        }
    }

    pub fn map_insert(&self, listen: Arc<Listen>) -> Option<Arc<Listen>> {
        self.listens.lock().insert(listen.local_addr(), listen)
    }

    pub fn map_locate(&self, addr: SocketAddr) -> Option<Arc<Listen>> {
        self.listens.lock().get(&addr).cloned()
    }

    pub fn map_remove(&self, addr: SocketAddr) -> Option<Arc<Listen>> {
        self.listens.lock().remove(&addr)
    }

    pub fn len(&self) -> usize {
        self.listens.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.listens.lock().is_empty()
    }

    /// Closes every listener and its connections.
    pub fn reset(&self) {
        let listens: Vec<Arc<Listen>> = self.listens.lock().values().cloned().collect();
        debug!(count = listens.len(), "resetting listen agent");
        for listen in listens {
            listen.close();
        }
    }
}

impl Drop for ListenAgent {
    fn drop(&mut self) {
        self.reset();
        self.listens.lock().clear();
        self.dispatch.stop();
    }
}
