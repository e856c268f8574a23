// src/bus/state.rs - bus connection state machine
//! Connection state of the message bus and its transition table.
//!
//! Initial connection and reconnection share one routine in the adapter; every
//! state change is computed here so the two paths cannot drift apart.

use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BusConnectionState {
    #[default]
    Disconnected,
    Connecting,
    Connected,
    Reconnecting,
}

impl fmt::Display for BusConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            BusConnectionState::Disconnected => "disconnected",
            BusConnectionState::Connecting => "connecting",
            BusConnectionState::Connected => "connected",
            BusConnectionState::Reconnecting => "reconnecting",
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BusEvent {
    /// Process startup.
    Start,
    /// Connect and subscribe both succeeded.
    ConnectSucceeded,
    /// The bounded connect retry budget ran out.
    RetriesExhausted,
    /// Publish/receive error, or repeated empty/malformed deliveries.
    SessionLost,
    /// The periodic keepalive check found the bus not connected.
    KeepaliveMissed,
    Shutdown,
}

pub fn transition(state: BusConnectionState, event: BusEvent) -> BusConnectionState {
    use BusConnectionState::*;
    use BusEvent::*;

    match (state, event) {
        (_, Shutdown) => Disconnected,
        (Disconnected, Start) => Connecting,
        (Disconnected, KeepaliveMissed) => Reconnecting,
        (Connecting | Reconnecting, ConnectSucceeded) => Connected,
        (Connecting | Reconnecting, RetriesExhausted) => Disconnected,
        (Connected, SessionLost) => Reconnecting,
        (current, _) => current,
    }
}

#[cfg(test)]
mod tests {
    use super::BusConnectionState::*;
    use super::BusEvent::*;
    use super::*;

    #[test]
    fn startup_path() {
        assert_eq!(transition(Disconnected, Start), Connecting);
        assert_eq!(transition(Connecting, ConnectSucceeded), Connected);
        assert_eq!(transition(Connecting, RetriesExhausted), Disconnected);
    }

    #[test]
    fn reconnect_path() {
        assert_eq!(transition(Connected, SessionLost), Reconnecting);
        assert_eq!(transition(Reconnecting, ConnectSucceeded), Connected);
        assert_eq!(transition(Reconnecting, RetriesExhausted), Disconnected);
        assert_eq!(transition(Disconnected, KeepaliveMissed), Reconnecting);
    }

    #[test]
    fn irrelevant_events_leave_state_alone() {
        assert_eq!(transition(Connected, Start), Connected);
        assert_eq!(transition(Connected, KeepaliveMissed), Connected);
        assert_eq!(transition(Disconnected, SessionLost), Disconnected);
        assert_eq!(transition(Disconnected, ConnectSucceeded), Disconnected);
    }

    #[test]
    fn shutdown_always_disconnects() {
        for state in [Disconnected, Connecting, Connected, Reconnecting] {
            assert_eq!(transition(state, Shutdown), Disconnected);
        }
    }
}
