//! Types shared by the client surface

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::registration::RegistrationState;

/// Transport lifecycle of the signaling connection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    Disconnecting,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConnectionState::Disconnected => write!(f, "Disconnected"),
            ConnectionState::Connecting => write!(f, "Connecting"),
            ConnectionState::Connected => write!(f, "Connected"),
            ConnectionState::Disconnecting => write!(f, "Disconnecting"),
        }
    }
}

/// Snapshot of client activity
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientStats {
    pub connection: ConnectionState,
    pub registration: RegistrationState,
    /// Calls that have not reached Terminated
    pub live_calls: usize,
    /// Lines held, terminated calls in their drain window included
    pub lines_in_use: usize,
    pub max_lines: usize,
    /// Sessions created since the client was built
    pub total_calls: u64,
    pub calls_placed: u64,
    pub calls_received: u64,
    /// Inbound calls refused because every line was taken
    pub calls_rejected: u64,
    pub messages_sent: u64,
    pub messages_received: u64,
    /// Operations currently holding a pending slot
    pub pending_operations: usize,
}

/// Counters kept alongside the connection state
#[derive(Debug, Clone, Default)]
pub(crate) struct Counters {
    pub calls_placed: u64,
    pub calls_received: u64,
    pub calls_rejected: u64,
    pub messages_sent: u64,
    pub messages_received: u64,
}
