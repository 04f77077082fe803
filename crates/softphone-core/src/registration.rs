//! Registration state and bookkeeping
//!
//! The registrar binding is driven entirely by adapter events. This module only
//! holds the resulting state; the transitions themselves live in the client.
//!
//! ```rust
//! use rvoip_softphone_core::registration::{RegistrationInfo, RegistrationState};
//!
//! let info = RegistrationInfo::default();
//! assert_eq!(info.state, RegistrationState::Unregistered);
//! assert!(!info.is_registered());
//! ```

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Registration status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RegistrationState {
    /// No binding
    Unregistered,
    /// REGISTER outstanding
    Registering,
    /// Binding accepted by the registrar
    Registered,
    /// Binding removal outstanding
    Unregistering,
    /// Last attempt failed or timed out
    Failed,
}

impl fmt::Display for RegistrationState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RegistrationState::Unregistered => write!(f, "Unregistered"),
            RegistrationState::Registering => write!(f, "Registering"),
            RegistrationState::Registered => write!(f, "Registered"),
            RegistrationState::Unregistering => write!(f, "Unregistering"),
            RegistrationState::Failed => write!(f, "Failed"),
        }
    }
}

/// Snapshot of the registration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegistrationInfo {
    /// Current state
    pub state: RegistrationState,
    /// Granted lifetime in seconds, once registered
    pub expires: Option<u32>,
    /// When the binding lapses
    pub expires_at: Option<DateTime<Utc>>,
    /// When the binding was last accepted
    pub registered_at: Option<DateTime<Utc>>,
    /// Reason of the last failure
    pub last_error: Option<String>,
    /// Successful registrations and refreshes
    pub refresh_count: u32,
}

impl Default for RegistrationInfo {
    fn default() -> Self {
        Self {
            state: RegistrationState::Unregistered,
            expires: None,
            expires_at: None,
            registered_at: None,
            last_error: None,
            refresh_count: 0,
        }
    }
}

impl RegistrationInfo {
    pub fn is_registered(&self) -> bool {
        self.state == RegistrationState::Registered
    }

    /// Record an accepted binding; returns the absolute expiry
    pub(crate) fn mark_registered(&mut self, expires: u32) -> DateTime<Utc> {
        let now = Utc::now();
        let expires_at = now + ChronoDuration::seconds(i64::from(expires));
        self.state = RegistrationState::Registered;
        self.expires = Some(expires);
        self.expires_at = Some(expires_at);
        self.registered_at = Some(now);
        self.last_error = None;
        self.refresh_count += 1;
        expires_at
    }

    pub(crate) fn mark_failed(&mut self, reason: impl Into<String>) {
        self.state = RegistrationState::Failed;
        self.last_error = Some(reason.into());
    }

    /// Drop the binding
    pub(crate) fn clear(&mut self) {
        self.state = RegistrationState::Unregistered;
        self.expires = None;
        self.expires_at = None;
    }

    /// Seconds until the binding lapses, zero once it did
    pub fn remaining_secs(&self) -> Option<i64> {
        self.expires_at
            .map(|at| (at - Utc::now()).num_seconds().max(0))
    }
}
