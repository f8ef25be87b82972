//! Outbound side: [`ClientAgent`] opens [`Client`] connections.
//!
//! ```no_run
//! use httpagent::client::ClientAgent;
//! use httpagent::config::EngineConfig;
//! use httpagent::http::options::Options;
//!
//! # fn main() -> httpagent::Result<()> {
//! let agent = ClientAgent::new(EngineConfig::default())?;
//! let client = agent.connect("127.0.0.1:8080", &Options::new())?;
//! let stream = client.make_stream(&Options::new())?;
//! if let Some(response) = stream.response() {
//!     response.on_end(|r| println!("{} {}", r.code(), r.reason()));
//! }
//! stream.write()?;
//! # Ok(())
//! # }
//! ```

pub mod agent;
pub mod connection;

pub use agent::{ClientAgent, ConnKey};
pub use connection::{Client, ClientCloseHandler};
