//! Builder for [`SipClient`]
//!
//! The builder takes the configuration and an [`AdapterFactory`]. `build()`
//! validates the configuration, asks the factory for the adapter and wires the
//! event bus, the line manager and the pending table together. Nothing is
//! connected until [`SipClient::start`] is called.
//!
//! ```rust
//! use rvoip_softphone_core::{ClientConfig, ClientError, SipClientBuilder};
//!
//! // Building without an adapter is a configuration error.
//! let config = ClientConfig::new("wss://sip.example.com", "sip:alice@example.com");
//! let err = SipClientBuilder::new(config).build().unwrap_err();
//! assert!(matches!(err, ClientError::InvalidConfiguration { .. }));
//! ```

use parking_lot::Mutex;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use tracing::info;

use super::config::ClientConfig;
use super::{ClientInner, CoreState, SipClient};
use crate::adapter::{AdapterFactory, SignalingAdapter};
use crate::error::{ClientError, ClientResult};
use crate::event_bus::EventBus;
use crate::lines::MultiLineManager;
use crate::pending::PendingOperations;

/// Fluent builder for [`SipClient`]
pub struct SipClientBuilder {
    config: ClientConfig,
    factory: Option<Box<dyn AdapterFactory>>,
}

impl SipClientBuilder {
    pub fn new(config: ClientConfig) -> Self {
        Self { config, factory: None }
    }

    /// Factory producing the signaling adapter
    pub fn adapter(mut self, factory: impl AdapterFactory + 'static) -> Self {
        self.factory = Some(Box::new(factory));
        self
    }

    /// Replace the configuration given to [`new`](Self::new)
    pub fn config(mut self, config: ClientConfig) -> Self {
        self.config = config;
        self
    }

    /// Validate the configuration, create the adapter and assemble the client
    pub fn build(self) -> ClientResult<SipClient> {
        self.config.validate()?;
        let factory = self
            .factory
            .ok_or_else(|| ClientError::config("adapter", "no adapter factory was provided"))?;
        let adapter: Arc<dyn SignalingAdapter> = Arc::from(factory.create(&self.config)?);

        let bus = Arc::new(EventBus::new());
        let lines = MultiLineManager::new(
            self.config.max_concurrent_lines,
            self.config.session.drain_window(),
            bus.clone(),
        );

        info!(
            uri = %self.config.uri,
            identity = %self.config.identity,
            adapter = adapter.name(),
            max_lines = self.config.max_concurrent_lines,
            "Softphone client built"
        );

        Ok(SipClient::from_inner(Arc::new(ClientInner {
            config: self.config,
            adapter,
            bus,
            lines,
            pending: PendingOperations::new(),
            state: Mutex::new(CoreState::default()),
            adapter_initialized: AtomicBool::new(false),
        })))
    }
}

impl std::fmt::Debug for SipClientBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SipClientBuilder")
            .field("config", &self.config)
            .field("adapter", &self.factory.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::NullAdapter;

    fn config() -> ClientConfig {
        ClientConfig::new("wss://sip.example.com:7443", "sip:alice@example.com")
    }

    #[test]
    fn build_requires_an_adapter() {
        let err = SipClientBuilder::new(config()).build().unwrap_err();
        assert!(matches!(err, ClientError::InvalidConfiguration { ref field, .. } if field == "adapter"));
    }

    #[test]
    fn build_validates_configuration_first() {
        let err = SipClientBuilder::new(config().with_max_lines(0))
            .adapter(|_: &ClientConfig| -> ClientResult<Box<dyn SignalingAdapter>> { Ok(Box::new(NullAdapter)) })
            .build()
            .unwrap_err();
        assert!(matches!(err, ClientError::InvalidConfiguration { .. }));
    }

    #[test]
    fn factory_errors_surface_from_build() {
        let err = SipClientBuilder::new(config())
            .adapter(|_: &ClientConfig| -> ClientResult<Box<dyn SignalingAdapter>> {
                Err(ClientError::config("adapter", "transport unavailable"))
            })
            .build()
            .unwrap_err();
        assert!(err.to_string().contains("transport unavailable"));
    }

    #[test]
    fn built_client_starts_disconnected() {
        let client = SipClientBuilder::new(config())
            .adapter(|_: &ClientConfig| -> ClientResult<Box<dyn SignalingAdapter>> { Ok(Box::new(NullAdapter)) })
            .build()
            .unwrap();
        assert_eq!(client.adapter_name(), "null");
        let stats = client.stats();
        assert_eq!(stats.connection, super::super::ConnectionState::Disconnected);
        assert_eq!(stats.max_lines, 4);
        assert_eq!(stats.pending_operations, 0);
    }
}
