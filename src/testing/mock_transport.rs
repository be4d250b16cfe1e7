//! In-memory transport wired to a [`MockAccessPoint`]

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::{Mutex, mpsc};

use super::mock_access_point::MockAccessPoint;
use crate::error::{GatewayError, Result};
use crate::protocol::xml::Element;
use crate::transport::{SettingsSource, Transport, TransportEvent, TransportParams};
use crate::types::AccessPointSettings;

struct Shared {
    access_point: MockAccessPoint,
    events: Option<mpsc::Sender<TransportEvent>>,
    sent: Vec<Element>,
    params: Option<TransportParams>,
    stopped: bool,
}

/// Transport that delivers every sent stanza to a mock access point and
/// feeds its answers back as events
pub struct MockTransport {
    shared: Arc<Mutex<Shared>>,
    refuse_start: bool,
}

/// Test-side view of a [`MockTransport`]
#[derive(Clone)]
pub struct MockTransportHandle {
    shared: Arc<Mutex<Shared>>,
}

impl MockTransport {
    /// Wrap `access_point`
    #[must_use]
    pub fn new(access_point: MockAccessPoint) -> (Self, MockTransportHandle) {
        let shared = Arc::new(Mutex::new(Shared {
            access_point,
            events: None,
            sent: Vec::new(),
            params: None,
            stopped: false,
        }));
        (
            Self {
                shared: shared.clone(),
                refuse_start: false,
            },
            MockTransportHandle { shared },
        )
    }

    /// Fail `start` with a transport error
    #[must_use]
    pub fn refusing_start(mut self) -> Self {
        self.refuse_start = true;
        self
    }
}

fn deliver(shared: &Shared, event: TransportEvent) -> Result<()> {
    let events = shared
        .events
        .as_ref()
        .ok_or_else(|| GatewayError::transport("mock transport not started"))?;
    events
        .try_send(event)
        .map_err(|e| GatewayError::transport(format!("event channel: {e}")))
}

#[async_trait]
impl Transport for MockTransport {
    async fn start(
        &mut self,
        params: TransportParams,
        events: mpsc::Sender<TransportEvent>,
    ) -> Result<()> {
        if self.refuse_start {
            return Err(GatewayError::transport("connection refused"));
        }
        let mut shared = self.shared.lock().await;
        let jid = shared.access_point.bound_jid();
        shared.access_point.bind(jid.clone());
        shared.events = Some(events);
        shared.params = Some(params);
        shared.stopped = false;
        deliver(&shared, TransportEvent::Online { jid })
    }

    async fn send(&mut self, stanza: Element) -> Result<()> {
        let mut shared = self.shared.lock().await;
        if shared.stopped {
            return Err(GatewayError::transport("stream closed"));
        }
        let replies = shared
            .access_point
            .handle_stanza(&stanza)
            .map_err(|e| GatewayError::transport(format!("access point rejected stanza: {e}")))?;
        shared.sent.push(stanza);
        for reply in replies {
            deliver(&shared, TransportEvent::Stanza(reply))?;
        }
        Ok(())
    }

    async fn stop(&mut self) -> Result<()> {
        let mut shared = self.shared.lock().await;
        shared.stopped = true;
        shared.events = None;
        Ok(())
    }
}

impl MockTransportHandle {
    /// Stanzas the client has sent so far
    pub async fn sent(&self) -> Vec<Element> {
        self.shared.lock().await.sent.clone()
    }

    /// Parameters passed to `start`
    pub async fn params(&self) -> Option<TransportParams> {
        self.shared.lock().await.params.clone()
    }

    /// True once `stop` has been called
    pub async fn is_stopped(&self) -> bool {
        self.shared.lock().await.stopped
    }

    /// Push an arbitrary event to the client
    ///
    /// # Errors
    ///
    /// Returns error if the transport is not started
    pub async fn inject(&self, event: TransportEvent) -> Result<()> {
        deliver(&*self.shared.lock().await, event)
    }

    /// Publish an encrypted update document on the `update` stream
    ///
    /// # Errors
    ///
    /// Returns error if the transport is not started
    pub async fn publish_update(&self, xml: &str) -> Result<()> {
        let mut shared = self.shared.lock().await;
        let stanza = shared
            .access_point
            .publish_update(xml)
            .map_err(|e| GatewayError::Internal {
                message: e.to_string(),
            })?;
        deliver(&shared, TransportEvent::Stanza(stanza))
    }

    /// Run `f` against the access point
    pub async fn with_access_point<R>(&self, f: impl FnOnce(&mut MockAccessPoint) -> R) -> R {
        f(&mut self.shared.lock().await.access_point)
    }
}

/// Settings source returning a fixed document
#[derive(Debug, Clone)]
pub struct MockSettingsSource {
    json: String,
}

impl MockSettingsSource {
    /// Serve `json` for every host
    #[must_use]
    pub fn new(json: impl Into<String>) -> Self {
        Self { json: json.into() }
    }

    /// Serve the settings of `access_point`
    #[must_use]
    pub fn for_access_point(access_point: &MockAccessPoint) -> Self {
        Self::new(access_point.settings_json())
    }
}

#[async_trait]
impl SettingsSource for MockSettingsSource {
    async fn fetch_settings(&self, _hostname: &str) -> Result<AccessPointSettings> {
        AccessPointSettings::from_json(&self.json)
    }
}
