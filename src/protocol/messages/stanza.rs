use super::{CONTROL_JID, DOMAIN, LOG_NAMESPACE, MessageError, RESOURCE, UPDATE_NAMESPACE};
use crate::protocol::crypto::SCRAM_MECHANISM;
use crate::protocol::xml::Element;
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;

const CLIENT_NS: &str = "jabber:client";
const RPC_NS: &str = "jabber:iq:rpc";
const CAPS_NS: &str = "http://jabber.org/protocol/caps";

/// Builds the stanzas sent to the access point
///
/// Message ids come from a counter owned by the builder, so two sessions
/// never share id state.
#[derive(Debug, Clone)]
pub struct StanzaBuilder {
    username: String,
    next_id: u64,
}

impl StanzaBuilder {
    /// Create a builder for the transport username (local part of the jid)
    #[must_use]
    pub fn new(username: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            next_id: 1,
        }
    }

    /// Transport username
    #[must_use]
    pub fn username(&self) -> &str {
        &self.username
    }

    fn next_id(&mut self) -> String {
        let id = self.next_id;
        self.next_id += 1;
        id.to_string()
    }

    fn full_jid(&self) -> String {
        format!("{}@{DOMAIN}/{RESOURCE}", self.username)
    }

    fn rpc_call(&mut self, method: &str, params: Vec<Element>) -> Element {
        let params = params.into_iter().fold(Element::new("params"), |acc, value| {
            acc.child(Element::new("param").child(Element::new("value").child(value)))
        });

        Element::new("iq")
            .attr("xmlns", CLIENT_NS)
            .attr("to", CONTROL_JID)
            .attr("type", "set")
            .attr("id", self.next_id())
            .child(
                Element::new("query").attr("xmlns", RPC_NS).child(
                    Element::new("methodCall")
                        .child(Element::new("methodName").text(method))
                        .child(params),
                ),
            )
    }

    /// `RemoteInterface.cryptExchangeLocalKeys2` carrying the local authenticator
    pub fn crypt_exchange_local_keys(&mut self, authenticator: &[u8]) -> Element {
        let jid = format!("{}@{DOMAIN}", self.username);
        self.rpc_call(
            "RemoteInterface.cryptExchangeLocalKeys2",
            vec![
                Element::new("string").text(jid),
                Element::new("base64").text(STANDARD.encode(authenticator)),
                Element::new("string").text(SCRAM_MECHANISM),
                Element::new("int").text("0"),
            ],
        )
    }

    /// `RemoteInterface.cryptMessage` carrying a binary payload
    pub fn crypt_message(&mut self, payload: &[u8]) -> Element {
        self.rpc_call(
            "RemoteInterface.cryptMessage",
            vec![Element::new("base64").text(STANDARD.encode(payload))],
        )
    }

    /// XMPP ping with a caller-owned id
    #[must_use]
    pub fn keep_alive(id: u64) -> Element {
        Element::new("iq")
            .attr("xmlns", CLIENT_NS)
            .attr("to", CONTROL_JID)
            .attr("type", "get")
            .attr("id", id.to_string())
            .child(Element::new("ping").attr("xmlns", "urn:xmpp:ping"))
    }

    /// Capability presence; firmware below 3.0.1 expects the legacy node
    #[must_use]
    pub fn capability_announcement(legacy: bool) -> Element {
        let caps = if legacy {
            Element::new("c")
                .attr("xmlns", CAPS_NS)
                .attr("ver", "1.1")
                .attr("node", "http://gonicus.de/caps")
        } else {
            Element::new("c")
                .attr("xmlns", CAPS_NS)
                .attr("hash", "sha-1")
                .attr("ver", "fixfCv/LdbraoPYq21aYj8JK6PA=")
                .attr("node", "http://freeathome.com/caps")
        };
        Element::new("presence").attr("xmlns", CLIENT_NS).child(caps)
    }

    /// Presence subscription request to the control identity
    #[must_use]
    pub fn subscribe(&self) -> Element {
        Element::new("presence")
            .attr("type", "subscribe")
            .attr("from", self.full_jid())
            .attr("to", CONTROL_JID)
    }

    /// Presence subscription confirmation
    #[must_use]
    pub fn subscribed(&self) -> Element {
        Element::new("presence")
            .attr("xmlns", CLIENT_NS)
            .attr("type", "subscribed")
            .attr("from", self.full_jid())
            .attr("to", CONTROL_JID)
    }
}

/// Binary payload of an RPC result stanza
///
/// Returns `Ok(None)` for an `iq` result without content (such as a ping
/// reply).
///
/// # Errors
///
/// Returns error if the stanza has content but no base64 value
pub fn rpc_result_payload(stanza: &Element) -> Result<Option<Vec<u8>>, MessageError> {
    if stanza.nodes().is_empty() {
        return Ok(None);
    }
    let value = stanza
        .find_path(&["query", "methodResponse", "params", "param", "value"])
        .and_then(|value| value.child_text("base64"))
        .ok_or_else(|| MessageError::MalformedStanza("iq result without base64 value".into()))?;
    Ok(Some(STANDARD.decode(value.trim())?))
}

/// One encrypted item from a headline message
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PubSubItem {
    /// Stream the item belongs to (`update` or `log`)
    pub stream: &'static str,
    /// Base64 ciphertext
    pub data: String,
}

/// Encrypted items of a pubsub headline message, in document order
#[must_use]
pub fn pubsub_items(stanza: &Element) -> Vec<PubSubItem> {
    let Some(items) = stanza.find_path(&["event", "items"]) else {
        return Vec::new();
    };

    items
        .children_named("item")
        .filter_map(|item| {
            item.elements().find_map(|payload| {
                let stream = match (payload.name(), payload.get_attr("xmlns")) {
                    ("update", Some(UPDATE_NAMESPACE)) => "update",
                    ("log", Some(LOG_NAMESPACE)) => "log",
                    _ => return None,
                };
                payload.child_text("data").map(|data| PubSubItem {
                    stream,
                    data: data.trim().to_string(),
                })
            })
        })
        .collect()
}
