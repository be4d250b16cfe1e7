use super::state::{SessionAction, SessionState};
use crate::error::{GatewayError, Result};
use crate::model::{self, DeviceTree};
use crate::protocol::codec::MessageReader;
use crate::protocol::crypto::CryptoEngine;
use crate::protocol::messages::{
    self, CONTROL_JID, ErrorResponse, NewSessionResult, PROTOCOL_VERSION, RESULT_OK,
    RpcCallResult, StanzaBuilder, ids,
};
use crate::protocol::xml::Element;
use crate::transport::TransportEvent;
use crate::types::AccessPointUser;

/// Protocol state machine for one connection
///
/// Consumes [`TransportEvent`]s and returns the [`SessionAction`]s the driver
/// has to perform, in order. Owns all key material through its
/// [`CryptoEngine`]; nothing here is shared between tasks.
#[derive(Debug)]
pub struct SessionMachine {
    state: SessionState,
    engine: CryptoEngine,
    stanzas: StanzaBuilder,
    identity: String,
    legacy_caps: bool,
    connected_as: Option<String>,
    subscribed: bool,
    keep_alive_id: u64,
}

impl SessionMachine {
    /// Create a machine for `user`
    ///
    /// `legacy_caps` selects the capability announcement for firmware
    /// below 3.0.1.
    #[must_use]
    pub fn new(engine: CryptoEngine, user: &AccessPointUser, legacy_caps: bool) -> Self {
        Self {
            state: SessionState::Disconnected,
            engine,
            stanzas: StanzaBuilder::new(user.transport_username()),
            identity: user.jid.clone(),
            legacy_caps,
            connected_as: None,
            subscribed: false,
            keep_alive_id: 1,
        }
    }

    /// Current state
    #[must_use]
    pub fn state(&self) -> SessionState {
        self.state
    }

    /// True once the access point confirmed the presence subscription
    #[must_use]
    pub fn is_subscribed(&self) -> bool {
        self.subscribed
    }

    /// Address the transport is bound to, once online
    #[must_use]
    pub fn connected_as(&self) -> Option<&str> {
        self.connected_as.as_deref()
    }

    /// Crypto state, for inspection
    #[must_use]
    pub fn engine(&self) -> &CryptoEngine {
        &self.engine
    }

    /// Feed one transport event
    ///
    /// # Errors
    ///
    /// Returns a fatal error when a handshake step fails, the access point
    /// sends an error response or the transport fails. Decode problems
    /// after login are returned as non-fatal errors and leave the session
    /// running.
    pub fn handle_event(&mut self, event: TransportEvent) -> Result<Vec<SessionAction>> {
        match event {
            TransportEvent::Online { jid } => self.on_online(jid),
            TransportEvent::Stanza(stanza) => self.on_stanza(&stanza),
            TransportEvent::Offline => {
                tracing::info!("Access point has gone offline");
                Ok(self.teardown())
            }
            TransportEvent::Error(message) => {
                self.teardown();
                Err(GatewayError::transport(message))
            }
        }
    }

    /// Drop all session state and return to `Disconnected`
    pub fn teardown(&mut self) -> Vec<SessionAction> {
        let was_authenticated = self.state.is_authenticated();
        self.state = SessionState::Disconnected;
        self.engine.reset();
        self.connected_as = None;
        self.subscribed = false;

        if was_authenticated {
            vec![SessionAction::StopKeepAlive]
        } else {
            Vec::new()
        }
    }

    /// Next keep-alive ping, or `None` before login
    pub fn keep_alive_stanza(&mut self) -> Option<Element> {
        if !self.state.is_authenticated() {
            return None;
        }
        let id = self.keep_alive_id;
        self.keep_alive_id += 1;
        Some(StanzaBuilder::keep_alive(id))
    }

    /// Encrypted `setDatapoint` request
    ///
    /// # Errors
    ///
    /// Returns error before login or if encryption fails
    pub fn set_datapoint_stanza(
        &mut self,
        serial: &str,
        channel: &str,
        datapoint: &str,
        value: &str,
    ) -> Result<Element> {
        if !self.state.is_authenticated() {
            return Err(GatewayError::InvalidState {
                message: "cannot set a datapoint before login".into(),
                current_state: self.state.to_string(),
            });
        }
        let payload = messages::set_datapoint(serial, channel, datapoint, value)?;
        self.encrypted(&payload)
    }

    fn transition(&mut self, next: SessionState) {
        tracing::debug!("Session state {} -> {}", self.state, next);
        self.state = next;
    }

    fn encrypted(&mut self, payload: &[u8]) -> Result<Element> {
        let frame = self.engine.encrypt_payload(payload)?;
        Ok(self.stanzas.crypt_message(&frame))
    }

    fn on_online(&mut self, jid: String) -> Result<Vec<SessionAction>> {
        tracing::info!("Connected as {}", jid);
        if self.state != SessionState::Disconnected {
            self.teardown();
        }
        self.connected_as = Some(jid);

        self.engine.generate_keypair();
        let authenticator = self
            .engine
            .generate_local_key()
            .map_err(GatewayError::handshake)?;
        let stanza = self.stanzas.crypt_exchange_local_keys(&authenticator);

        self.transition(SessionState::AwaitingLocalKeyExchange);
        tracing::info!("Sent authenticator");
        Ok(vec![SessionAction::Send(stanza)])
    }

    fn on_stanza(&mut self, stanza: &Element) -> Result<Vec<SessionAction>> {
        match (stanza.name(), stanza.get_attr("type")) {
            ("iq", Some("result")) if self.is_from_control(stanza) => {
                let payload = messages::rpc_result_payload(stanza)
                    .map_err(|e| self.escalate(e.into()))?;
                let Some(data) = payload else {
                    return Ok(Vec::new());
                };
                self.on_rpc_result(&data).map_err(|e| self.escalate(e))
            }
            ("iq", Some("error")) => {
                tracing::warn!("Access point returned an iq error: {}", stanza);
                Ok(Vec::new())
            }
            ("presence", Some("subscribe" | "subscribed")) => Ok(self.on_subscription()),
            ("message", Some("headline")) => Ok(self.on_headline(stanza)),
            _ => {
                tracing::debug!("Ignoring <{}> stanza", stanza.name());
                Ok(Vec::new())
            }
        }
    }

    fn is_from_control(&self, stanza: &Element) -> bool {
        stanza.get_attr("from") == Some(CONTROL_JID)
            && stanza.get_attr("to").is_some_and(|to| Some(to) == self.connected_as.as_deref())
    }

    /// Decode failures inside a handshake step end the attempt
    fn escalate(&self, err: GatewayError) -> GatewayError {
        match err {
            GatewayError::Decode { message, source } if self.state.is_handshaking() => {
                GatewayError::Handshake { message, source }
            }
            other => other,
        }
    }

    fn on_rpc_result(&mut self, data: &[u8]) -> Result<Vec<SessionAction>> {
        if self.state == SessionState::AwaitingLocalKeyExchange {
            return self.on_key_exchange(data);
        }

        let mut reader = MessageReader::new(data);
        match reader.read_u8()? {
            ids::NEW_SESSION_RESULT => self.on_new_session(&mut reader),
            ids::CRYPTED_CONTAINER_TO_CLIENT => {
                let inner = self.engine.decrypt_payload(&mut reader)?;
                self.on_container(&inner)
            }
            ids::ERROR_RESPONSE => Err(access_point_error(&mut reader)),
            other => Err(GatewayError::Decode {
                message: format!("unexpected message type {other}"),
                source: None,
            }),
        }
    }

    fn on_key_exchange(&mut self, data: &[u8]) -> Result<Vec<SessionAction>> {
        tracing::info!("Received local key");
        let result = self
            .engine
            .complete_key_exchange(data)
            .map_err(GatewayError::handshake)?;
        tracing::debug!("Access point flags: {}", result.flags);

        let payload = messages::start_new_session(&result.session_id)?;
        let stanza = self.stanzas.crypt_message(&payload);
        self.transition(SessionState::SessionNegotiating);
        tracing::info!("Sent new session request");
        Ok(vec![SessionAction::Send(stanza)])
    }

    fn on_new_session(&mut self, reader: &mut MessageReader<'_>) -> Result<Vec<SessionAction>> {
        let result = NewSessionResult::decode(reader)?;
        if result.result != RESULT_OK {
            return Err(GatewayError::Handshake {
                message: format!("failed to establish session (code {})", result.result),
                source: None,
            });
        }
        if result.version != PROTOCOL_VERSION {
            tracing::warn!(
                "Unknown protocol version {:#x} detected, continuing",
                result.version
            );
        }
        self.engine.install_session(result.session_id, result.blob);

        let client_first = self
            .engine
            .begin_login(&self.identity)
            .map_err(|e| authentication_failed(&e))?;
        let stanza = self.encrypted(&messages::login_sasl(&client_first)?)?;
        self.transition(SessionState::Authenticating);
        tracing::info!("Sent login SASL message");
        Ok(vec![SessionAction::Send(stanza)])
    }

    fn on_container(&mut self, inner: &[u8]) -> Result<Vec<SessionAction>> {
        let mut reader = MessageReader::new(inner);
        match reader.read_u8()? {
            ids::SASL_CHALLENGE => {
                tracing::info!("Received SASL challenge");
                let server_first = reader.read_string()?;
                let client_final = self
                    .engine
                    .answer_challenge(&server_first)
                    .map_err(|e| authentication_failed(&e))?;
                let stanza = self.encrypted(&messages::sasl_response(&client_final)?)?;
                tracing::info!("Sent SASL challenge response");
                Ok(vec![SessionAction::Send(stanza)])
            }
            ids::SASL_LOGIN_SUCCESS => self.on_login_success(&mut reader),
            ids::RPC_CALL_RESULT => self.on_call_result(&mut reader),
            ids::ERROR_RESPONSE => Err(access_point_error(&mut reader)),
            other => Err(GatewayError::Decode {
                message: format!("unexpected container message {other}"),
                source: None,
            }),
        }
    }

    fn on_login_success(&mut self, reader: &mut MessageReader<'_>) -> Result<Vec<SessionAction>> {
        let server_final = reader.read_string()?;
        self.engine
            .verify_server_final(&server_final)
            .map_err(|e| authentication_failed(&e))?;
        self.transition(SessionState::Authenticated);
        tracing::info!("Successfully authenticated");

        let caps = StanzaBuilder::capability_announcement(self.legacy_caps);
        let master = self.encrypted(&messages::request_master_data()?)?;
        tracing::info!("Requested master data");
        Ok(vec![
            SessionAction::StartKeepAlive,
            SessionAction::Send(caps),
            SessionAction::Send(master),
        ])
    }

    fn on_call_result(&mut self, reader: &mut MessageReader<'_>) -> Result<Vec<SessionAction>> {
        let result = RpcCallResult::decode(reader)?;
        if !result.is_master_data() {
            tracing::debug!("Ignoring RPC result of {} bytes", result.body.len());
            return Ok(Vec::new());
        }

        let tree = model::parse_master(&result.value()?)?;
        tracing::info!("Received master data with {} devices", tree.devices.len());
        let mut actions = vec![SessionAction::ReplaceTree(tree)];

        if !self.subscribed {
            actions.push(SessionAction::Send(self.stanzas.subscribe()));
            if self.state < SessionState::Subscribing {
                self.transition(SessionState::Subscribing);
            }
            tracing::info!("Sent subscription request");
        }
        Ok(actions)
    }

    fn on_subscription(&mut self) -> Vec<SessionAction> {
        if self.subscribed || !self.state.is_authenticated() {
            return Vec::new();
        }
        self.subscribed = true;
        self.transition(SessionState::Active);
        tracing::info!("Sent subscription confirmation");
        vec![
            SessionAction::Send(self.stanzas.subscribed()),
            SessionAction::Subscribed,
        ]
    }

    fn on_headline(&mut self, stanza: &Element) -> Vec<SessionAction> {
        messages::pubsub_items(stanza)
            .into_iter()
            .filter_map(|item| match self.open_item(item.stream, &item.data) {
                Ok(action) => action,
                Err(err) => {
                    tracing::warn!("Dropped {} item: {}", item.stream, err);
                    Some(SessionAction::Dropped(err))
                }
            })
            .collect()
    }

    fn open_item(&mut self, stream: &str, data: &str) -> Result<Option<SessionAction>> {
        let plaintext = self.engine.decrypt_pubsub(data, stream)?;
        let text = messages::decode_compressed(&mut MessageReader::new(&plaintext))?;

        if stream == "log" {
            tracing::info!("Access point log: {}", text);
            return Ok(None);
        }
        let update: DeviceTree = model::parse_update(&text)?;
        if update.is_empty() {
            return Ok(None);
        }
        Ok(Some(SessionAction::MergeUpdate(update)))
    }
}

fn access_point_error(reader: &mut MessageReader<'_>) -> GatewayError {
    match ErrorResponse::decode(reader) {
        Ok(response) => {
            tracing::error!(
                "Access point error {}: {}",
                response.code,
                response.message
            );
            GatewayError::AccessPoint {
                code: response.code,
                message: response.message,
            }
        }
        Err(e) => GatewayError::AccessPoint {
            code: 0,
            message: format!("unreadable error response: {e}"),
        },
    }
}

fn authentication_failed(err: &dyn std::error::Error) -> GatewayError {
    GatewayError::AuthenticationFailed {
        message: err.to_string(),
    }
}
