use super::*;
use crate::protocol::crypto::CryptoError;
use crate::protocol::messages::{CONTROL_JID, StanzaBuilder};
use crate::protocol::xml::Element;
use crate::transport::{SettingsSource, Transport, TransportEvent, TransportParams};
use crate::types::AccessPointSettings;
use tokio::sync::mpsc;

// --- mock_access_point.rs tests ---

#[test]
fn test_settings_document_selects_user() {
    let ap = test_access_point();
    let settings = AccessPointSettings::from_json(&ap.settings_json()).unwrap();
    let user = settings.select_user(TEST_USER).unwrap();

    assert_eq!(user.jid, ap.user_jid());
    assert_eq!(user.transport_username(), "6a2f9e41-0b7c");
    let (salt, iterations) = user.scram_parameters().unwrap();
    assert_eq!(salt.len(), 32);
    assert_eq!(iterations, 4096);
    assert!(settings.check_firmware().is_ok());
}

#[test]
fn test_firmware_override() {
    let ap = test_access_point().with_firmware("3.1.0");
    let settings = AccessPointSettings::from_json(&ap.settings_json()).unwrap();
    assert!(!settings.uses_legacy_caps());
}

#[test]
fn test_key_exchange_rejects_bad_authenticator() {
    let mut ap = test_access_point();
    assert!(matches!(
        ap.key_exchange_response(&[0u8; 10]),
        Err(MockError::Crypto(CryptoError::InvalidKeyLength { actual: 10, .. }))
    ));
    assert!(matches!(
        ap.key_exchange_response(&[1u8; 64]),
        Err(MockError::Crypto(CryptoError::VerificationFailed(_)))
    ));
}

#[test]
fn test_ping_and_subscription_answers() {
    let mut ap = test_access_point();
    ap.bind(ap.bound_jid());

    let replies = ap.handle_stanza(&StanzaBuilder::keep_alive(42)).unwrap();
    assert_eq!(replies.len(), 1);
    assert_eq!(replies[0].get_attr("type"), Some("result"));
    assert_eq!(replies[0].get_attr("id"), Some("42"));

    let subscribe = Element::new("presence").attr("type", "subscribe");
    let replies = ap.handle_stanza(&subscribe).unwrap();
    assert_eq!(replies[0].get_attr("type"), Some("subscribed"));
    assert_eq!(replies[0].get_attr("from"), Some(CONTROL_JID));
    assert_eq!(replies[0].get_attr("to"), Some(ap.bound_jid().as_str()));

    let chatter = Element::new("message").attr("type", "chat");
    assert!(ap.handle_stanza(&chatter).unwrap().is_empty());
}

#[test]
fn test_unknown_rpc_method_rejected() {
    let mut ap = test_access_point();
    let call = Element::new("iq").attr("type", "set").child(
        Element::new("query").child(
            Element::new("methodCall")
                .child(Element::new("methodName").text("RemoteInterface.reboot")),
        ),
    );
    assert!(matches!(
        ap.handle_stanza(&call),
        Err(MockError::Unexpected(method)) if method == "RemoteInterface.reboot"
    ));
}

#[test]
fn test_published_items_are_sequenced() {
    let mut ap = test_access_point();
    let first = ap.publish_update("<update/>").unwrap();
    let log = ap.publish_log("entry").unwrap();

    let items = crate::protocol::messages::pubsub_items(&first);
    assert_eq!(items.len(), 1);
    assert_eq!(items[0].stream, "update");
    let items = crate::protocol::messages::pubsub_items(&log);
    assert_eq!(items[0].stream, "log");
}

// --- mock_transport.rs tests ---

fn params() -> TransportParams {
    TransportParams::new("sysap.local", "6a2f9e41-0b7c", TEST_PASSWORD)
}

#[tokio::test]
async fn test_transport_start_send_stop() {
    let ap = test_access_point();
    let bound = ap.bound_jid();
    let (mut transport, handle) = MockTransport::new(ap);
    let (tx, mut rx) = mpsc::channel(16);

    transport.start(params(), tx).await.unwrap();
    match rx.recv().await {
        Some(TransportEvent::Online { jid }) => assert_eq!(jid, bound),
        other => panic!("expected online, got {other:?}"),
    }
    assert_eq!(handle.params().await.unwrap().username, "6a2f9e41-0b7c");

    transport.send(StanzaBuilder::keep_alive(7)).await.unwrap();
    match rx.recv().await {
        Some(TransportEvent::Stanza(reply)) => assert_eq!(reply.get_attr("id"), Some("7")),
        other => panic!("expected stanza, got {other:?}"),
    }
    assert_eq!(handle.sent().await.len(), 1);

    transport.stop().await.unwrap();
    assert!(handle.is_stopped().await);
    assert!(transport.send(StanzaBuilder::keep_alive(8)).await.is_err());
    assert!(rx.recv().await.is_none());
}

#[tokio::test]
async fn test_transport_refusing_start() {
    let (transport, handle) = MockTransport::new(test_access_point());
    let mut transport = transport.refusing_start();
    let (tx, _rx) = mpsc::channel(4);

    let err = transport.start(params(), tx).await.unwrap_err();
    assert!(err.is_connection_lost());
    assert!(handle.params().await.is_none());
}

#[tokio::test]
async fn test_handle_inject_and_publish() {
    let (mut transport, handle) = MockTransport::new(test_access_point());
    assert!(handle.inject(TransportEvent::Offline).await.is_err());

    let (tx, mut rx) = mpsc::channel(8);
    transport.start(params(), tx).await.unwrap();
    let _online = rx.recv().await;

    handle.inject(TransportEvent::Offline).await.unwrap();
    assert!(matches!(rx.recv().await, Some(TransportEvent::Offline)));

    handle.publish_update("<update/>").await.unwrap();
    assert!(matches!(rx.recv().await, Some(TransportEvent::Stanza(_))));

    let writes = handle.with_access_point(|ap| ap.writes().len()).await;
    assert_eq!(writes, 0);
}

#[tokio::test]
async fn test_settings_source_serves_document() {
    let ap = test_access_point();
    let source = MockSettingsSource::for_access_point(&ap);
    let settings = source.fetch_settings("sysap.local").await.unwrap();
    assert_eq!(settings.select_user(TEST_USER).unwrap().jid, ap.user_jid());

    let broken = MockSettingsSource::new("{");
    assert!(broken.fetch_settings("sysap.local").await.is_err());
}
