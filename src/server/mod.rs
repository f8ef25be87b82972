//! Inbound side: [`ListenAgent`] binds [`Listen`]ers, which accept
//! [`Server`] connections and hand complete requests to the application.

pub mod agent;
pub mod connection;
pub mod listener;

pub use agent::ListenAgent;
pub use connection::Server;
pub use listener::{Listen, RequestHandler, ServerErrorHandler, ServerHandler};
