//! Connection lifecycle shared by clients and servers.
//!
//! ```text
//!   Reset ──Connected──▶ Ready ──Close──▶ Closing ──Closed──▶ Reset
//! ```
//!
//! [`ConnectionState::transition`] is the only way a connection changes
//! state. `Close` is accepted once, which is what makes `close()`
//! idempotent.

use crate::error::{Error, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConnectionState {
    /// Initial, and terminal after teardown.
    #[default]
    Reset,
    Ready,
    /// Close requested; the socket is being torn down.
    Closing,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionEvent {
    Connected,
    Close,
    Closed,
}

impl ConnectionState {
    pub fn transition(self, event: ConnectionEvent) -> Result<Self> {
        use ConnectionEvent::*;
        use ConnectionState::*;

        match (self, event) {
            (Reset, Connected) => Ok(Ready),
            (Ready, Close) => Ok(Closing),
            (Closing, Closed) => Ok(Reset),
            (from, event) => Err(Error::ConnectionTransition { from, event }),
        }
    }

    pub fn is_ready(&self) -> bool {
        *self == ConnectionState::Ready
    }
}

/// State plus the rule that every change goes through `transition`.
#[derive(Debug, Default)]
pub struct Lifecycle {
    state: ConnectionState,
}

impl Lifecycle {
    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn is_ready(&self) -> bool {
        self.state.is_ready()
    }

    pub fn apply(&mut self, event: ConnectionEvent) -> Result<ConnectionState> {
        self.state = self.state.transition(event)?;
        Ok(self.state)
    }

    /// `Ok(())` when the caller owns the close that just started.
    pub fn begin_close(&mut self) -> Result<()> {
        self.apply(ConnectionEvent::Close).map(|_| ())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn full_cycle() {
        let mut life = Lifecycle::default();
        assert_eq!(life.state(), ConnectionState::Reset);
        life.apply(ConnectionEvent::Connected).unwrap();
        assert!(life.is_ready());
        life.begin_close().unwrap();
        assert_eq!(life.state(), ConnectionState::Closing);
        life.apply(ConnectionEvent::Closed).unwrap();
        assert_eq!(life.state(), ConnectionState::Reset);
    }

    #[test]
    fn close_accepted_once() {
        let mut life = Lifecycle::default();
        life.apply(ConnectionEvent::Connected).unwrap();
        assert!(life.begin_close().is_ok());
        assert!(matches!(
            life.begin_close(),
            Err(Error::ConnectionTransition {
                from: ConnectionState::Closing,
                event: ConnectionEvent::Close
            })
        ));
    }

    #[test]
    fn cannot_close_before_connect() {
        let mut life = Lifecycle::default();
        assert!(life.begin_close().is_err());
        assert_eq!(life.state(), ConnectionState::Reset);
    }
}
