use std::path::Path;

use anyhow::Context;
use serde::Deserialize;

/// Tuning for the dispatch layer and the wire codec.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct EngineConfig {
    /// Threads in each agent's worker pool.
    pub worker_threads: usize,
    /// Upper bound on one pump wait, so shutdown is seen promptly.
    pub pump_timeout_ms: u64,
    pub connect_timeout_ms: u64,
    /// Largest request body a server accepts (413 above it).
    pub body_limit: usize,
    /// Largest header block, start line included (431 above it).
    pub header_limit: usize,
    /// Largest response body a client accepts.
    pub response_limit: usize,
    /// Bytes read per readiness event before yielding to other sockets.
    pub read_size: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            worker_threads: 4,
            pump_timeout_ms: 250,
            connect_timeout_ms: 5_000,
            body_limit: 1_048_576,
            header_limit: 16 * 1024,
            response_limit: 64 * 1024 * 1024,
            read_size: 256 * 1024,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Config {
    pub listen_addr: String,
    /// Value for the `PROTOCOL` option of the demo listener.
    pub protocol: String,
    pub engine: EngineConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            listen_addr: "127.0.0.1:8080".to_string(),
            protocol: "HTTP/1.1".to_string(),
            engine: EngineConfig::default(),
        }
    }
}

impl Config {
    /// Defaults, with `LISTEN` from the environment overriding the address.
    pub fn load() -> Self {
        Self::default().with_env()
    }

    pub fn from_yaml_str(yaml: &str) -> anyhow::Result<Self> {
        let cfg: Config = serde_yaml::from_str(yaml).context("invalid configuration")?;
        Ok(cfg.with_env())
    }

    pub fn from_file(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("reading {}", path.display()))?;
        Self::from_yaml_str(&text)
    }

    fn with_env(mut self) -> Self {
        if let Ok(addr) = std::env::var("LISTEN") {
            self.listen_addr = addr;
        }
        self
    }
}
