//! Event pump, worker pool and per-connection work queues.
//!
//! Every agent owns one [`Dispatch`]: a pump thread whose runtime is the
//! readiness multiplexer for all of the agent's sockets, and a worker pool
//! that runs the connections' inbound and outbound [`WorkQueue`]s. The pump
//! only reads sockets and enqueues; parsing, writing and user callbacks all
//! happen on the workers.

pub mod pump;
pub mod queue;
pub mod socket;

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio::runtime::Handle;

use crate::config::EngineConfig;
use crate::error::Result;
use crate::http::parser::Limits;

pub use pump::{Pump, Watch, Workers};
pub use queue::{WorkQueue, Worker};

/// Pump and worker pool owned by one agent.
pub struct Dispatch {
    // pump drops first so no watcher runs after the workers are gone
    pump: Pump,
    workers: Workers,
    context: Context,
}

impl Dispatch {
    pub fn start(name: &str, config: EngineConfig) -> Result<Self> {
        let pump = Pump::start(name, Duration::from_millis(config.pump_timeout_ms))?;
        let workers = Workers::start(name, config.worker_threads)?;
        let context = Context {
            pump: pump.handle().clone(),
            workers: workers.handle().clone(),
            config: Arc::new(config),
        };
        tracing::debug!(agent = name, "dispatch started");
        Ok(Self {
            pump,
            workers,
            context,
        })
    }

    pub fn context(&self) -> &Context {
        &self.context
    }

    pub fn stop(&self) {
        self.pump.stop();
    }

    pub fn workers(&self) -> &Workers {
        &self.workers
    }
}

/// Cloneable handles into an agent's dispatch, held by its connections.
#[derive(Clone)]
pub struct Context {
    pump: Handle,
    workers: Handle,
    config: Arc<EngineConfig>,
}

impl Context {
    pub fn pump(&self) -> &Handle {
        &self.pump
    }

    pub fn workers(&self) -> &Handle {
        &self.workers
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Runs a watcher task on the pump.
    pub fn watch<F>(&self, task: F) -> Watch
    where
        F: Future<Output = ()> + Send + 'static,
    {
        Watch::new(self.pump.spawn(task).abort_handle())
    }

    pub fn request_limits(&self) -> Limits {
        Limits {
            header: self.config.header_limit,
            body: self.config.body_limit,
        }
    }

    pub fn response_limits(&self) -> Limits {
        Limits {
            header: self.config.header_limit,
            body: self.config.response_limit,
        }
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.config.connect_timeout_ms)
    }
}
