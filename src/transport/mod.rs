//! Collaborator interfaces for the stanza transport and settings retrieval
//!
//! The gateway never opens sockets itself. An implementation of
//! [`Transport`] carries XML stanzas to and from the access point and reports
//! its lifecycle through [`TransportEvent`]s; a [`SettingsSource`] provides
//! `/settings.json`.

use crate::error::Result;
use crate::protocol::messages::{DOMAIN, RESOURCE, TRANSPORT_PORT};
use crate::protocol::xml::Element;
use crate::types::AccessPointSettings;
use async_trait::async_trait;
use tokio::sync::mpsc;
use zeroize::Zeroizing;

/// Lifecycle and traffic reported by a transport
#[derive(Debug, Clone)]
pub enum TransportEvent {
    /// Stream is up; `jid` is the full address we are bound to
    Online {
        /// Bound address, `local@domain/resource`
        jid: String,
    },
    /// An inbound stanza
    Stanza(Element),
    /// Stream closed
    Offline,
    /// Transport-level failure; the stream is unusable afterwards
    Error(String),
}

/// Everything a transport needs to open the stream
#[derive(Clone)]
pub struct TransportParams {
    /// WebSocket endpoint, `ws://<host>:5280/xmpp-websocket`
    pub service: String,
    /// Stream domain
    pub domain: String,
    /// Resource to bind
    pub resource: String,
    /// Local part of the user's jid
    pub username: String,
    /// Transport password
    pub password: Zeroizing<String>,
}

impl TransportParams {
    /// Parameters for `hostname` with the fixed domain and resource
    #[must_use]
    pub fn new(hostname: &str, username: impl Into<String>, password: &str) -> Self {
        Self {
            service: format!("ws://{hostname}:{TRANSPORT_PORT}/xmpp-websocket"),
            domain: DOMAIN.to_string(),
            resource: RESOURCE.to_string(),
            username: username.into(),
            password: Zeroizing::new(password.to_string()),
        }
    }
}

impl std::fmt::Debug for TransportParams {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransportParams")
            .field("service", &self.service)
            .field("domain", &self.domain)
            .field("resource", &self.resource)
            .field("username", &self.username)
            .finish_non_exhaustive()
    }
}

/// Stanza stream to the access point
#[async_trait]
pub trait Transport: Send {
    /// Open the stream; lifecycle and inbound stanzas go to `events`
    ///
    /// # Errors
    ///
    /// Returns error if the stream cannot be opened
    async fn start(
        &mut self,
        params: TransportParams,
        events: mpsc::Sender<TransportEvent>,
    ) -> Result<()>;

    /// Send one stanza
    ///
    /// # Errors
    ///
    /// Returns error if the stream is closed
    async fn send(&mut self, stanza: Element) -> Result<()>;

    /// Close the stream
    ///
    /// # Errors
    ///
    /// Returns error if shutdown fails
    async fn stop(&mut self) -> Result<()>;
}

/// Source of the access point's `/settings.json`
#[async_trait]
pub trait SettingsSource: Send + Sync {
    /// Fetch and parse the settings of `hostname`
    ///
    /// # Errors
    ///
    /// Returns error if the document cannot be retrieved or parsed
    async fn fetch_settings(&self, hostname: &str) -> Result<AccessPointSettings>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_params_service_url() {
        let params = TransportParams::new("192.168.1.10", "a1b2", "secret");
        assert_eq!(params.service, "ws://192.168.1.10:5280/xmpp-websocket");
        assert_eq!(params.domain, "busch-jaeger.de");
        assert_eq!(params.resource, "freeathome-api");
        assert!(!format!("{params:?}").contains("secret"));
    }
}
