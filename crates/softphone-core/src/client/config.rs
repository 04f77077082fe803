//! Client configuration
//!
//! [`ClientConfig`] is plain data: it derives `Serialize`/`Deserialize` with
//! defaults for every field, so hosts can load it from JSON and override only
//! what they need. It is validated by [`ClientConfig::validate`], which
//! `start()` calls before touching the adapter.
//!
//! ```rust
//! use rvoip_softphone_core::client::config::ClientConfig;
//!
//! let config = ClientConfig::from_json_str(r#"{
//!     "uri": "wss://sip.example.com:7443",
//!     "identity": "sip:alice@example.com",
//!     "registration": { "auto_register": false },
//!     "session": { "drain_window_ms": 1500 },
//!     "max_concurrent_lines": 2
//! }"#).unwrap();
//!
//! assert!(!config.registration.auto_register);
//! assert_eq!(config.session.drain_window_ms, 1500);
//! assert_eq!(config.timeouts.register_ms, 10_000);
//! assert!(config.validate().is_ok());
//! ```

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::time::Duration;
use url::Url;

use crate::dtmf::DtmfOptions;
use crate::error::{ClientError, ClientResult};

/// URI schemes accepted for the signaling server and the identity
const SIGNALING_SCHEMES: &[&str] = &["sip", "sips", "ws", "wss"];

/// Digest credentials
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credentials {
    pub username: String,
    pub password: String,
    /// Realm, when it differs from the identity's domain
    #[serde(default)]
    pub realm: Option<String>,
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .field("realm", &self.realm)
            .finish()
    }
}

/// Registration behavior
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RegistrationConfig {
    /// Requested binding lifetime in seconds
    pub expires: u32,
    /// Register as part of `start()`
    pub auto_register: bool,
    /// Refresh the binding on `registration:expiring`
    pub auto_refresh: bool,
    /// Headers handed to the adapter untouched
    pub extra_headers: HashMap<String, String>,
}

impl Default for RegistrationConfig {
    fn default() -> Self {
        Self {
            expires: 3600,
            auto_register: true,
            auto_refresh: true,
            extra_headers: HashMap::new(),
        }
    }
}

/// Per-call session behavior
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// How long a terminated session keeps its line before it is purged
    pub drain_window_ms: u64,
    /// DTMF timing and failure policy
    pub dtmf: DtmfOptions,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            drain_window_ms: 2000,
            dtmf: DtmfOptions::default(),
        }
    }
}

impl SessionConfig {
    pub fn drain_window(&self) -> Duration {
        Duration::from_millis(self.drain_window_ms)
    }
}

/// Deadlines of the asynchronous operations
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TimeoutConfig {
    pub connect_ms: u64,
    pub register_ms: u64,
    pub unregister_ms: u64,
    pub disconnect_ms: u64,
    /// Single adapter requests: call setup, answer, hold, transfer, ...
    pub request_ms: u64,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            connect_ms: 10_000,
            register_ms: 10_000,
            unregister_ms: 10_000,
            disconnect_ms: 5_000,
            request_ms: 10_000,
        }
    }
}

impl TimeoutConfig {
    pub fn connect(&self) -> Duration {
        Duration::from_millis(self.connect_ms)
    }

    pub fn register(&self) -> Duration {
        Duration::from_millis(self.register_ms)
    }

    pub fn unregister(&self) -> Duration {
        Duration::from_millis(self.unregister_ms)
    }

    pub fn disconnect(&self) -> Duration {
        Duration::from_millis(self.disconnect_ms)
    }

    pub fn request(&self) -> Duration {
        Duration::from_millis(self.request_ms)
    }
}

/// Softphone client configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// Signaling server, e.g. `wss://sip.example.com:7443`
    pub uri: String,
    /// Address of record, e.g. `sip:alice@example.com`
    pub identity: String,
    /// Authentication, if the registrar challenges
    pub credentials: Option<Credentials>,
    /// Display name presented to callees
    pub display_name: Option<String>,
    pub registration: RegistrationConfig,
    pub session: SessionConfig,
    /// Lines available for simultaneous calls
    pub max_concurrent_lines: usize,
    pub timeouts: TimeoutConfig,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            uri: String::new(),
            identity: String::new(),
            credentials: None,
            display_name: None,
            registration: RegistrationConfig::default(),
            session: SessionConfig::default(),
            max_concurrent_lines: 4,
            timeouts: TimeoutConfig::default(),
        }
    }
}

impl ClientConfig {
    /// Configuration for `identity` reachable through `uri`, defaults elsewhere
    pub fn new(uri: impl Into<String>, identity: impl Into<String>) -> Self {
        Self {
            uri: uri.into(),
            identity: identity.into(),
            ..Self::default()
        }
    }

    /// Parse from JSON; missing fields take their defaults
    pub fn from_json_str(json: &str) -> ClientResult<Self> {
        serde_json::from_str(json).map_err(|e| ClientError::config("json", e.to_string()))
    }

    pub fn with_credentials(mut self, username: impl Into<String>, password: impl Into<String>) -> Self {
        self.credentials = Some(Credentials {
            username: username.into(),
            password: password.into(),
            realm: None,
        });
        self
    }

    pub fn with_display_name(mut self, name: impl Into<String>) -> Self {
        self.display_name = Some(name.into());
        self
    }

    pub fn with_auto_register(mut self, enabled: bool) -> Self {
        self.registration.auto_register = enabled;
        self
    }

    pub fn with_auto_refresh(mut self, enabled: bool) -> Self {
        self.registration.auto_refresh = enabled;
        self
    }

    pub fn with_expires(mut self, expires: u32) -> Self {
        self.registration.expires = expires;
        self
    }

    pub fn with_max_lines(mut self, max: usize) -> Self {
        self.max_concurrent_lines = max;
        self
    }

    pub fn with_drain_window_ms(mut self, drain_window_ms: u64) -> Self {
        self.session.drain_window_ms = drain_window_ms;
        self
    }

    pub fn with_dtmf(mut self, dtmf: DtmfOptions) -> Self {
        self.session.dtmf = dtmf;
        self
    }

    pub fn with_timeouts(mut self, timeouts: TimeoutConfig) -> Self {
        self.timeouts = timeouts;
        self
    }

    /// Check every field; the first problem found is reported
    pub fn validate(&self) -> ClientResult<()> {
        validate_uri("uri", &self.uri)?;
        validate_uri("identity", &self.identity)?;

        if let Some(credentials) = &self.credentials {
            if credentials.username.trim().is_empty() {
                return Err(ClientError::config("credentials.username", "must not be empty"));
            }
        }
        if self.registration.expires == 0 {
            return Err(ClientError::config("registration.expires", "must be greater than zero"));
        }
        if self.max_concurrent_lines == 0 {
            return Err(ClientError::config("max_concurrent_lines", "must be greater than zero"));
        }
        if self.session.drain_window_ms == 0 {
            return Err(ClientError::config("session.drain_window_ms", "must be greater than zero"));
        }
        if self.session.dtmf.duration_ms == 0 {
            return Err(ClientError::config("session.dtmf.duration_ms", "must be greater than zero"));
        }

        let timeouts = [
            ("timeouts.connect_ms", self.timeouts.connect_ms),
            ("timeouts.register_ms", self.timeouts.register_ms),
            ("timeouts.unregister_ms", self.timeouts.unregister_ms),
            ("timeouts.disconnect_ms", self.timeouts.disconnect_ms),
            ("timeouts.request_ms", self.timeouts.request_ms),
        ];
        if let Some((field, _)) = timeouts.iter().find(|(_, value)| *value == 0) {
            return Err(ClientError::config(*field, "must be greater than zero"));
        }
        Ok(())
    }
}

fn validate_uri(field: &str, value: &str) -> ClientResult<Url> {
    if value.trim().is_empty() {
        return Err(ClientError::config(field, "must not be empty"));
    }
    let url = Url::parse(value).map_err(|e| ClientError::config(field, e.to_string()))?;
    if !SIGNALING_SCHEMES.contains(&url.scheme()) {
        return Err(ClientError::config(
            field,
            format!("unsupported scheme '{}'", url.scheme()),
        ));
    }
    Ok(url)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn valid() -> ClientConfig {
        ClientConfig::new("wss://sip.example.com:7443", "sip:alice@example.com")
    }

    fn rejected_field(config: &ClientConfig) -> String {
        match config.validate() {
            Err(ClientError::InvalidConfiguration { field, .. }) => field,
            other => panic!("expected a configuration error, got {other:?}"),
        }
    }

    #[test]
    fn defaults() {
        let config = valid();
        assert!(config.validate().is_ok());
        assert!(config.registration.auto_register);
        assert_eq!(config.session.drain_window(), Duration::from_millis(2000));
        assert_eq!(config.timeouts.disconnect(), Duration::from_secs(5));
        assert_eq!(config.timeouts.connect(), Duration::from_secs(10));
    }

    #[test]
    fn zero_drain_window_is_rejected() {
        let config = valid().with_drain_window_ms(0);
        assert_eq!(rejected_field(&config), "session.drain_window_ms");
    }

    #[test]
    fn uris_are_parsed() {
        let mut config = valid();
        config.uri = "not a uri".into();
        assert_eq!(rejected_field(&config), "uri");

        let mut config = valid();
        config.identity = "http://example.com".into();
        assert_eq!(rejected_field(&config), "identity");
    }

    #[test]
    fn zero_limits_are_rejected() {
        assert_eq!(rejected_field(&valid().with_max_lines(0)), "max_concurrent_lines");
        let timeouts = TimeoutConfig {
            unregister_ms: 0,
            ..TimeoutConfig::default()
        };
        assert_eq!(rejected_field(&valid().with_timeouts(timeouts)), "timeouts.unregister_ms");
    }

    #[test]
    fn credentials_are_not_logged() {
        let config = valid().with_credentials("alice", "hunter2");
        let printed = format!("{config:?}");
        assert!(printed.contains("alice"));
        assert!(!printed.contains("hunter2"));
    }

    #[test]
    fn json_errors_are_configuration_errors() {
        let err = ClientConfig::from_json_str("{ not json").unwrap_err();
        assert_eq!(err.operation(), "validate_config");
    }
}
