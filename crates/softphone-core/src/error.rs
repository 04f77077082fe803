//! Error types for the softphone core
//!
//! Two layers of errors exist:
//!
//! - [`AdapterError`] is what a [`SignalingAdapter`](crate::adapter::SignalingAdapter)
//!   implementation reports back for a failed request.
//! - [`ClientError`] is what every public operation of the core returns. Each
//!   variant names the operation that failed; variants that originate from an
//!   asynchronous round-trip also carry the elapsed time and, when the adapter
//!   was involved, the underlying [`AdapterError`] as their source.
//!
//! ```rust
//! use rvoip_softphone_core::{ClientError, AdapterError};
//! use std::time::Duration;
//!
//! let err = ClientError::Registration {
//!     operation: "register",
//!     status: Some(403),
//!     reason: "Forbidden".to_string(),
//!     elapsed: Duration::from_millis(180),
//!     source: None,
//! };
//! assert_eq!(err.operation(), "register");
//! assert_eq!(err.category(), "registration");
//! assert!(!err.is_recoverable());
//! ```

use std::time::Duration;
use thiserror::Error;

use crate::call::CallId;

/// Result type for core operations
pub type ClientResult<T> = Result<T, ClientError>;

/// Result type returned by signaling adapters
pub type AdapterResult<T> = Result<T, AdapterError>;

/// Failure reported by a signaling adapter
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum AdapterError {
    /// The adapter does not implement the requested capability
    #[error("capability '{capability}' is not supported by this adapter")]
    NotSupported {
        /// Capability name, e.g. "presence"
        capability: String,
        /// What the host can use instead, if anything
        suggestion: Option<String>,
    },

    /// Transport level failure (socket closed, DNS failure, ...)
    #[error("transport error: {0}")]
    Transport(String),

    /// The remote side answered with a final failure response
    #[error("rejected with {status} {reason}")]
    Rejected {
        /// Status code reported by the remote side
        status: u16,
        /// Reason phrase
        reason: String,
    },

    /// A request was issued before `initialize`
    #[error("adapter is not initialized")]
    NotInitialized,

    /// Anything else
    #[error("{0}")]
    Other(String),
}

impl AdapterError {
    /// Build a `NotSupported` error with a suggested alternative
    pub fn not_supported(capability: impl Into<String>, suggestion: Option<&str>) -> Self {
        Self::NotSupported {
            capability: capability.into(),
            suggestion: suggestion.map(str::to_string),
        }
    }

    /// Status code carried by the error, if any
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::Rejected { status, .. } => Some(*status),
            _ => None,
        }
    }
}

/// Errors returned by the softphone core
#[derive(Debug, Clone, Error)]
pub enum ClientError {
    /// Connection to the signaling server could not be established
    #[error("{operation}: connection failed: {reason}")]
    Connection {
        /// Operation that failed
        operation: &'static str,
        /// Human readable reason
        reason: String,
        /// Time spent before failing
        elapsed: Duration,
        /// Adapter failure, if the adapter reported one
        #[source]
        source: Option<AdapterError>,
    },

    /// `connection:connected` did not arrive in time
    #[error("{operation}: connection timed out after {}ms", elapsed.as_millis())]
    ConnectionTimeout {
        /// Operation that failed
        operation: &'static str,
        /// Time spent before failing
        elapsed: Duration,
    },

    /// The registrar refused the registration
    #[error("{operation}: registration failed ({}): {reason}", status.map(|s| s.to_string()).unwrap_or_else(|| "no status".to_string()))]
    Registration {
        /// Operation that failed
        operation: &'static str,
        /// Server status code, if reported
        status: Option<u16>,
        /// Server or adapter reason
        reason: String,
        /// Time spent before failing
        elapsed: Duration,
        /// Adapter failure, if the adapter reported one
        #[source]
        source: Option<AdapterError>,
    },

    /// `registration:registered` did not arrive in time
    #[error("{operation}: registration timed out after {}ms", elapsed.as_millis())]
    RegistrationTimeout {
        /// Operation that failed
        operation: &'static str,
        /// Time spent before failing
        elapsed: Duration,
    },

    /// `registration:unregistered` did not arrive in time
    #[error("{operation}: unregistration timed out after {}ms", elapsed.as_millis())]
    UnregistrationTimeout {
        /// Operation that failed
        operation: &'static str,
        /// Time spent before failing
        elapsed: Duration,
    },

    /// `connection:disconnected` did not arrive in time
    #[error("{operation}: disconnect timed out after {}ms", elapsed.as_millis())]
    DisconnectTimeout {
        /// Operation that failed
        operation: &'static str,
        /// Time spent before failing
        elapsed: Duration,
    },

    /// A single adapter request (call setup, hold, message, ...) timed out
    #[error("{operation}: request timed out after {}ms", elapsed.as_millis())]
    RequestTimeout {
        /// Operation that failed
        operation: &'static str,
        /// Time spent before failing
        elapsed: Duration,
    },

    /// Another operation of the same kind is still outstanding
    #[error("{operation}: an operation of this kind is already in progress")]
    AlreadyInProgress {
        /// Operation that was rejected
        operation: &'static str,
    },

    /// The operation is not valid in the current state
    #[error("{operation}: invalid state {state}, expected {expected}")]
    InvalidState {
        /// Operation that was rejected
        operation: &'static str,
        /// State found
        state: String,
        /// State(s) the operation requires
        expected: String,
    },

    /// All lines are occupied
    #[error("{operation}: line limit of {max} reached")]
    LineLimitExceeded {
        /// Operation that was rejected
        operation: &'static str,
        /// Configured maximum
        max: usize,
    },

    /// The bound adapter lacks a capability
    #[error("{operation}: adapter does not support {capability}")]
    AdapterNotSupported {
        /// Operation that was rejected
        operation: &'static str,
        /// Missing capability
        capability: String,
        /// Suggested alternative
        suggestion: Option<String>,
        /// Time spent before failing
        elapsed: Duration,
    },

    /// Unknown call id
    #[error("{operation}: call {call_id} not found")]
    NotFound {
        /// Operation that was rejected
        operation: &'static str,
        /// Id that was looked up
        call_id: CallId,
    },

    /// Configuration rejected by validation
    #[error("invalid configuration for {field}: {reason}")]
    InvalidConfiguration {
        /// Offending field
        field: String,
        /// Why it was rejected
        reason: String,
    },

    /// Character outside the DTMF alphabet
    #[error("{operation}: invalid DTMF tone '{tone}'")]
    InvalidDtmf {
        /// Operation that was rejected
        operation: &'static str,
        /// Offending character
        tone: char,
    },

    /// The operation was cancelled, typically by `stop()`
    #[error("{operation}: cancelled after {}ms", elapsed.as_millis())]
    Cancelled {
        /// Operation that was cancelled
        operation: &'static str,
        /// Time spent before cancellation
        elapsed: Duration,
    },

    /// Generic adapter failure for a request
    #[error("{operation}: adapter request failed: {source}")]
    Adapter {
        /// Operation that failed
        operation: &'static str,
        /// Time spent before failing
        elapsed: Duration,
        /// Adapter failure
        #[source]
        source: AdapterError,
    },
}

impl ClientError {
    /// Create an invalid state error
    pub fn invalid_state(
        operation: &'static str,
        state: impl ToString,
        expected: impl Into<String>,
    ) -> Self {
        Self::InvalidState {
            operation,
            state: state.to_string(),
            expected: expected.into(),
        }
    }

    /// Create a configuration error
    pub fn config(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidConfiguration {
            field: field.into(),
            reason: reason.into(),
        }
    }

    /// Create a not-found error
    pub fn not_found(operation: &'static str, call_id: CallId) -> Self {
        Self::NotFound { operation, call_id }
    }

    /// Wrap an adapter failure, mapping `NotSupported` onto its dedicated variant
    pub fn from_adapter(operation: &'static str, elapsed: Duration, source: AdapterError) -> Self {
        match source {
            AdapterError::NotSupported {
                capability,
                suggestion,
            } => Self::AdapterNotSupported {
                operation,
                capability,
                suggestion,
                elapsed,
            },
            source => Self::Adapter {
                operation,
                elapsed,
                source,
            },
        }
    }

    /// Name of the operation that failed
    pub fn operation(&self) -> &'static str {
        match self {
            Self::Connection { operation, .. }
            | Self::ConnectionTimeout { operation, .. }
            | Self::Registration { operation, .. }
            | Self::RegistrationTimeout { operation, .. }
            | Self::UnregistrationTimeout { operation, .. }
            | Self::DisconnectTimeout { operation, .. }
            | Self::RequestTimeout { operation, .. }
            | Self::AlreadyInProgress { operation }
            | Self::InvalidState { operation, .. }
            | Self::LineLimitExceeded { operation, .. }
            | Self::AdapterNotSupported { operation, .. }
            | Self::NotFound { operation, .. }
            | Self::InvalidDtmf { operation, .. }
            | Self::Cancelled { operation, .. }
            | Self::Adapter { operation, .. } => operation,
            Self::InvalidConfiguration { .. } => "validate_config",
        }
    }

    /// Time spent in the operation before it failed.
    ///
    /// Synchronous rejections (guards, state checks, lookups) report zero.
    pub fn elapsed(&self) -> Duration {
        match self {
            Self::Connection { elapsed, .. }
            | Self::ConnectionTimeout { elapsed, .. }
            | Self::Registration { elapsed, .. }
            | Self::RegistrationTimeout { elapsed, .. }
            | Self::UnregistrationTimeout { elapsed, .. }
            | Self::DisconnectTimeout { elapsed, .. }
            | Self::RequestTimeout { elapsed, .. }
            | Self::AdapterNotSupported { elapsed, .. }
            | Self::Cancelled { elapsed, .. }
            | Self::Adapter { elapsed, .. } => *elapsed,
            _ => Duration::ZERO,
        }
    }

    /// Underlying adapter failure, if any
    pub fn adapter_error(&self) -> Option<&AdapterError> {
        match self {
            Self::Connection { source, .. } | Self::Registration { source, .. } => source.as_ref(),
            Self::Adapter { source, .. } => Some(source),
            _ => None,
        }
    }

    /// Whether this is one of the timeout variants
    pub fn is_timeout(&self) -> bool {
        matches!(
            self,
            Self::ConnectionTimeout { .. }
                | Self::RegistrationTimeout { .. }
                | Self::UnregistrationTimeout { .. }
                | Self::DisconnectTimeout { .. }
                | Self::RequestTimeout { .. }
        )
    }

    /// Whether retrying the same operation later may succeed
    pub fn is_recoverable(&self) -> bool {
        match self {
            Self::Connection { .. }
            | Self::ConnectionTimeout { .. }
            | Self::RegistrationTimeout { .. }
            | Self::UnregistrationTimeout { .. }
            | Self::DisconnectTimeout { .. }
            | Self::RequestTimeout { .. }
            | Self::AlreadyInProgress { .. }
            | Self::LineLimitExceeded { .. } => true,
            Self::Registration { status, .. } => matches!(status, Some(s) if *s >= 500),
            Self::Adapter { source, .. } => matches!(source, AdapterError::Transport(_)),
            _ => false,
        }
    }

    /// Coarse category used in structured logs
    pub fn category(&self) -> &'static str {
        match self {
            Self::Connection { .. } | Self::ConnectionTimeout { .. } | Self::DisconnectTimeout { .. } => {
                "connection"
            }
            Self::Registration { .. }
            | Self::RegistrationTimeout { .. }
            | Self::UnregistrationTimeout { .. } => "registration",
            Self::AlreadyInProgress { .. } | Self::InvalidState { .. } | Self::Cancelled { .. } => {
                "state"
            }
            Self::LineLimitExceeded { .. } | Self::NotFound { .. } => "call",
            Self::InvalidDtmf { .. } => "dtmf",
            Self::InvalidConfiguration { .. } => "configuration",
            Self::AdapterNotSupported { .. } | Self::Adapter { .. } | Self::RequestTimeout { .. } => {
                "adapter"
            }
        }
    }
}
