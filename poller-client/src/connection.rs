//! Connection state tracking
//!
//! Turns the stream of per-cycle outcomes into a stable connected /
//! disconnected signal. Callbacks are edge-triggered: they fire only when the
//! state actually flips.

use std::fmt;

use crate::dispatch::invoke_isolated;

/// Callback fired on a connection state edge.
pub type StateCallback = Box<dyn FnMut() + Send + 'static>;

/// Whether the last poll cycle reached the server
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ConnectionState {
    #[default]
    Disconnected,
    Connected,
}

impl ConnectionState {
    pub fn is_connected(&self) -> bool {
        matches!(self, ConnectionState::Connected)
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConnectionState::Disconnected => write!(f, "disconnected"),
            ConnectionState::Connected => write!(f, "connected"),
        }
    }
}

/// A state edge produced by a cycle outcome
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    /// Disconnected -> Connected
    Connected,
    /// Connected -> Disconnected
    Disconnected,
}

/// Edge-triggered connection state machine
#[derive(Default)]
pub struct ConnectionMonitor {
    state: ConnectionState,
    on_connect: Option<StateCallback>,
    on_disconnect: Option<StateCallback>,
}

impl ConnectionMonitor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    /// Set the callback fired on the disconnected -> connected edge,
    /// replacing any previous one.
    pub fn set_on_connect(&mut self, callback: StateCallback) {
        self.on_connect = Some(callback);
    }

    /// Set the callback fired on the connected -> disconnected edge,
    /// replacing any previous one.
    pub fn set_on_disconnect(&mut self, callback: StateCallback) {
        self.on_disconnect = Some(callback);
    }

    /// Record a cycle that reached the server.
    ///
    /// The connect callback runs before the stored state flips, so it still
    /// observes `Disconnected`.
    pub fn record_success(&mut self) -> Option<Transition> {
        if self.state.is_connected() {
            return None;
        }

        if let Some(callback) = self.on_connect.as_mut() {
            invoke_isolated("on_connect", callback);
        }
        self.state = ConnectionState::Connected;
        tracing::info!("Poller connected");
        Some(Transition::Connected)
    }

    /// Record a cycle that failed to reach the server.
    pub fn record_failure(&mut self) -> Option<Transition> {
        if !self.state.is_connected() {
            return None;
        }

        if let Some(callback) = self.on_disconnect.as_mut() {
            invoke_isolated("on_disconnect", callback);
        }
        self.state = ConnectionState::Disconnected;
        tracing::info!("Poller disconnected");
        Some(Transition::Disconnected)
    }
}

impl fmt::Debug for ConnectionMonitor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionMonitor")
            .field("state", &self.state)
            .field("on_connect", &self.on_connect.is_some())
            .field("on_disconnect", &self.on_disconnect.is_some())
            .finish()
    }
}
