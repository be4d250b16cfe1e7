use super::engine::stream_name;
use super::*;
use crate::protocol::codec::{CodecError, MessageReader, MessageWriter};
use crate::protocol::messages::{FLAG_KEY_ROTATION, ids};
use crate::testing::{MockAccessPoint, TEST_PASSWORD, TEST_USER, test_access_point};
use crate::types::AccessPointSettings;
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use proptest::prelude::*;
use std::collections::HashSet;

// --- primitives.rs tests ---

#[test]
fn test_pbkdf2_sha256_vector() {
    let key = primitives::derive_password_key(b"password", b"salt", 1);
    assert_eq!(
        hex(&key[..]),
        "120fb6cffcf8b32c43e7225256c4f837a86548c92ccc35480805987cb70be17b"
    );
}

#[test]
fn test_poly1305_vector() {
    let key: [u8; 32] = [
        0x85, 0xd6, 0xbe, 0x78, 0x57, 0x55, 0x6d, 0x33, 0x7f, 0x44, 0x52, 0xfe, 0x42, 0xd5, 0x06,
        0xa8, 0x01, 0x03, 0x80, 0x8a, 0xfb, 0x0d, 0xb2, 0xfd, 0x4a, 0xbf, 0xf6, 0xaf, 0x41, 0x49,
        0xf5, 0x1b,
    ];
    let tag = primitives::one_time_auth(b"Cryptographic Forum Research Group", &key);
    assert_eq!(hex(&tag), "a8061dc1305136c6c22b8baf0c0127a9");
    assert!(primitives::one_time_auth_verify(
        &tag,
        b"Cryptographic Forum Research Group",
        &key
    ));
    assert!(!primitives::one_time_auth_verify(
        &tag,
        b"Cryptographic Forum Research Grouq",
        &key
    ));
    assert!(!primitives::one_time_auth_verify(&tag[..15], b"x", &key));
}

#[test]
fn test_authenticator_token_round_trip() {
    let secret = [3u8; 32];
    let hash_key = [9u8; 16];
    let token = primitives::authenticator_token(&secret, &hash_key, b"public key").unwrap();

    assert!(primitives::verify_authenticator_token(&secret, &hash_key, &token, b"public key").unwrap());
    assert!(!primitives::verify_authenticator_token(&secret, &[8u8; 16], &token, b"public key").unwrap());
    assert!(!primitives::verify_authenticator_token(&[4u8; 32], &hash_key, &token, b"public key").unwrap());
}

#[test]
fn test_generic_hash_rejects_long_key() {
    let err = primitives::keyed_generic_hash(b"msg", &[0u8; 65]).unwrap_err();
    assert!(matches!(err, CryptoError::InvalidKeyLength { .. }));
}

// --- scram.rs tests ---

const RFC_NONCE: &str = "rOprNGfwEbeRWgbNEkqO";
const RFC_SERVER_FIRST: &str =
    "r=rOprNGfwEbeRWgbNEkqO%hvYDpWUa2RaTCAfuxFIlj)hNlF$k0,s=W22ZaJ0SNY7soEsUEjb6gQ==,i=4096";

fn rfc_client() -> ScramClient {
    ScramClient::with_policy(ScramPolicy {
        min_salt_len: 16,
        ..ScramPolicy::default()
    })
}

#[test]
fn test_scram_reference_vector() {
    let mut client = rfc_client();
    let first = client.create_client_first_with_nonce("user", RFC_NONCE).unwrap();
    assert_eq!(first, "n,,n=user,r=rOprNGfwEbeRWgbNEkqO");

    client.set_server_first(RFC_SERVER_FIRST, "pencil").unwrap();
    let last = client.create_client_final().unwrap();
    assert_eq!(
        last,
        "c=biws,r=rOprNGfwEbeRWgbNEkqO%hvYDpWUa2RaTCAfuxFIlj)hNlF$k0,\
         p=dHzbZapWIk4jUhN+Ute9ytag9zjfMHgsqmmiz7AndVQ="
    );

    client
        .set_server_final("v=6rriTRBi23WpRR/wtup+mMhUZUn/dB5nLTJRsjl95G4=")
        .unwrap();
    assert_eq!(client.state(), ScramState::Verified);
}

#[test]
fn test_scram_tampered_server_first() {
    let cases = [
        // nonce does not extend ours
        "r=XXXXNGfwEbeRWgbNEkqO%hvYDpWUa2RaTCAfuxFIlj)hNlF$k0,s=W22ZaJ0SNY7soEsUEjb6gQ==,i=4096",
        // nonce equal to ours
        "r=rOprNGfwEbeRWgbNEkqO,s=W22ZaJ0SNY7soEsUEjb6gQ==,i=4096",
        // iterations below the floor
        "r=rOprNGfwEbeRWgbNEkqO%hvYDpWUa2RaTCAfuxFIlj)hNlF$k0,s=W22ZaJ0SNY7soEsUEjb6gQ==,i=4095",
        // missing salt
        "r=rOprNGfwEbeRWgbNEkqO%hvYDpWUa2RaTCAfuxFIlj)hNlF$k0,i=4096",
        // non-numeric iterations
        "r=rOprNGfwEbeRWgbNEkqO%hvYDpWUa2RaTCAfuxFIlj)hNlF$k0,s=W22ZaJ0SNY7soEsUEjb6gQ==,i=many",
    ];

    for case in cases {
        let mut client = rfc_client();
        client.create_client_first_with_nonce("user", RFC_NONCE).unwrap();
        assert!(
            matches!(
                client.set_server_first(case, "pencil"),
                Err(CryptoError::ScramError(_))
            ),
            "accepted {case}"
        );
        assert_eq!(client.state(), ScramState::Failed);
    }
}

#[test]
fn test_scram_default_policy_rejects_short_salt() {
    let mut client = ScramClient::new();
    client.create_client_first_with_nonce("user", RFC_NONCE).unwrap();
    assert!(client.set_server_first(RFC_SERVER_FIRST, "pencil").is_err());
}

#[test]
fn test_scram_bad_server_signature() {
    let mut client = rfc_client();
    client.create_client_first_with_nonce("user", RFC_NONCE).unwrap();
    client.set_server_first(RFC_SERVER_FIRST, "pencil").unwrap();
    client.create_client_final().unwrap();

    let err = client
        .set_server_final("v=AAAATRBi23WpRR/wtup+mMhUZUn/dB5nLTJRsjl95G4=")
        .unwrap_err();
    assert!(matches!(err, CryptoError::VerificationFailed(_)));
    assert_eq!(client.state(), ScramState::Failed);
}

#[test]
fn test_scram_server_error_attribute() {
    let mut client = rfc_client();
    client.create_client_first_with_nonce("user", RFC_NONCE).unwrap();
    client.set_server_first(RFC_SERVER_FIRST, "pencil").unwrap();
    client.create_client_final().unwrap();

    let err = client.set_server_final("e=invalid-proof").unwrap_err();
    assert!(err.to_string().contains("invalid-proof"));
}

#[test]
fn test_scram_out_of_order_calls() {
    let mut client = ScramClient::new();
    assert!(matches!(
        client.create_client_final(),
        Err(CryptoError::InvalidState { .. })
    ));

    client.create_client_first("user").unwrap();
    assert!(client.create_client_first("user").is_err());
    assert_eq!(client.state(), ScramState::ClientFirstSent);
}

#[test]
fn test_scram_random_nonce_is_base64() {
    let mut client = ScramClient::new();
    let first = client.create_client_first("user@busch-jaeger.de").unwrap();
    let nonce = first.rsplit_once(",r=").unwrap().1;
    assert_eq!(STANDARD.decode(nonce).unwrap().len(), 32);
}

// --- replay.rs tests ---

#[test]
fn test_replay_out_of_order_fills_gaps() {
    let mut window = ReplayWindow::new("update", 0);
    for sequence in [0, 1, 2, 5, 3, 4, 6] {
        window.accept(sequence).unwrap();
    }
    assert_eq!(window.skipped_len(), 0);
    assert_eq!(window.expected(), 7);

    let err = window.accept(3).unwrap_err();
    assert!(matches!(
        err,
        CryptoError::ReplayRejected {
            sequence: 3,
            expected: 7,
            ..
        }
    ));
}

#[test]
fn test_replay_skipped_set_is_capped() {
    let mut window = ReplayWindow::new("update", 0);
    // Every odd number leaves one gap: 40 gaps in total
    for i in 0..40 {
        assert_eq!(window.accept(2 * i + 1).unwrap(), Admission::Ahead);
    }

    assert_eq!(window.skipped_len(), SKIPPED_CAPACITY);
    // The 8 lowest gaps (0, 2, .., 14) were evicted
    assert_eq!(window.skipped().next(), Some(16));
    assert!(window.accept(14).is_err());
    assert_eq!(window.accept(16).unwrap(), Admission::Late);
}

#[test]
fn test_replay_gap_fill_is_bounded() {
    let mut window = ReplayWindow::new("log", 10);
    window.accept(100).unwrap();
    assert_eq!(window.skipped().collect::<Vec<_>>(), (84..100).collect::<Vec<_>>());
    assert!(window.accept(50).is_err());
    assert_eq!(window.expected(), 101);
}

#[test]
fn test_replay_check_has_no_side_effects() {
    let window = ReplayWindow::new("update", 4);
    assert_eq!(window.check(9).unwrap(), Admission::Ahead);
    assert_eq!(window.expected(), 4);
    assert_eq!(window.skipped_len(), 0);
}

proptest! {
    #[test]
    fn prop_replay_window_bounded_and_single_use(
        sequences in prop::collection::vec(0u64..200, 0..120)
    ) {
        let mut window = ReplayWindow::new("update", 0);
        let mut accepted = HashSet::new();
        for sequence in sequences {
            if window.accept(sequence).is_ok() {
                prop_assert!(accepted.insert(sequence), "{} accepted twice", sequence);
            }
            prop_assert!(window.skipped_len() <= SKIPPED_CAPACITY);
        }
    }
}

// --- engine.rs tests ---

fn engine_for(ap: &MockAccessPoint) -> CryptoEngine {
    let settings = AccessPointSettings::from_json(&ap.settings_json()).unwrap();
    let (salt, iterations) = settings
        .select_user(TEST_USER)
        .unwrap()
        .scram_parameters()
        .unwrap();
    CryptoEngine::new(TEST_PASSWORD, salt, iterations)
}

/// Engine and access point sharing a session
fn established() -> (CryptoEngine, MockAccessPoint) {
    let mut ap = test_access_point();
    let mut engine = engine_for(&ap);
    engine.generate_keypair();
    let local = engine.generate_local_key().unwrap();
    let response = ap.key_exchange_response(&local).unwrap();
    let result = engine.complete_key_exchange(&response).unwrap();
    engine.install_session(result.session_id, [7u8; lengths::SESSION_BLOB]);
    (engine, ap)
}

/// Key-exchange response signed with `secret`
fn signed_response(secret: &[u8], code: u32, session_id: &str) -> Vec<u8> {
    let mut region = MessageWriter::new();
    region.write_string(session_id).unwrap();
    region.write_string("flags").unwrap();
    region.write_blob(&[5u8; 32]).unwrap();
    let region = region.to_bytes();

    let hash_key = [1u8; 16];
    let tag = primitives::authenticator_token(secret, &hash_key, &region).unwrap();

    let mut writer = MessageWriter::new();
    writer.write_u32(2).write_u32(code);
    writer.write_blob(&hash_key).unwrap();
    writer.write_blob(&tag).unwrap();
    writer.write_blob(&region).unwrap();
    writer.to_bytes()
}

fn low_cost_engine() -> (CryptoEngine, Vec<u8>) {
    let mut engine = CryptoEngine::new("pw", b"salt".to_vec(), 1);
    engine.generate_keypair();
    let secret = primitives::derive_password_key(b"pw", b"salt", 1).to_vec();
    (engine, secret)
}

#[test]
fn test_local_key_layout() {
    let mut engine = CryptoEngine::new("pw", b"salt".to_vec(), 1);
    assert!(matches!(
        engine.generate_local_key(),
        Err(CryptoError::MissingKey(_))
    ));

    engine.generate_keypair();
    let local = engine.generate_local_key().unwrap();
    assert_eq!(&local[..32], engine.public_key().unwrap());

    let secret = primitives::derive_password_key(b"pw", b"salt", 1);
    assert!(
        primitives::verify_authenticator_token(&secret[..], &local[32..48], &local[48..], &local[..32])
            .unwrap()
    );
}

#[test]
fn test_key_exchange_with_mock_access_point() {
    let (engine, _ap) = established();
    assert!(engine.has_shared_key());
}

#[test]
fn test_key_exchange_wrong_password() {
    let mut ap = test_access_point();
    let settings = AccessPointSettings::from_json(&ap.settings_json()).unwrap();
    let (salt, iterations) = settings.users[0].scram_parameters().unwrap();
    let mut engine = CryptoEngine::new("not the password", salt, iterations);
    engine.generate_keypair();

    // The access point rejects our authenticator
    let local = engine.generate_local_key().unwrap();
    assert!(ap.key_exchange_response(&local).is_err());
}

#[test]
fn test_key_exchange_rejects_bad_tag() {
    let (mut engine, secret) = low_cost_engine();
    let mut response = signed_response(&secret, 0, "sid");
    let last = response.len() - 1;
    response[last] ^= 1;

    assert!(matches!(
        engine.complete_key_exchange(&response),
        Err(CryptoError::VerificationFailed(_))
    ));
    assert!(!engine.has_shared_key());
}

#[test]
fn test_key_exchange_result_codes() {
    let (mut engine, secret) = low_cost_engine();
    let result = engine
        .complete_key_exchange(&signed_response(&secret, 0, "sid"))
        .unwrap();
    assert_eq!(result.session_id, "sid");
    assert_eq!(result.flags, "flags");

    let (mut engine, secret) = low_cost_engine();
    let err = engine
        .complete_key_exchange(&signed_response(&secret, 25, "sid"))
        .unwrap_err();
    assert!(err.to_string().contains("existing session"));

    let (mut engine, secret) = low_cost_engine();
    assert!(
        engine
            .complete_key_exchange(&signed_response(&secret, 7, "sid"))
            .is_err()
    );

    let (mut engine, secret) = low_cost_engine();
    assert!(
        engine
            .complete_key_exchange(&signed_response(&secret, 0, ""))
            .is_err()
    );
}

#[test]
fn test_key_exchange_version_and_truncation() {
    let (mut engine, secret) = low_cost_engine();
    let mut response = signed_response(&secret, 0, "sid");
    response[0] = 3;
    assert!(matches!(
        engine.complete_key_exchange(&response),
        Err(CryptoError::KeyExchangeFailed(_))
    ));

    let response = signed_response(&secret, 0, "sid");
    assert!(matches!(
        engine.complete_key_exchange(&response[..20]),
        Err(CryptoError::Codec(CodecError::InsufficientData { .. }))
    ));
}

#[test]
fn test_container_frame_layout() {
    let (mut engine, _ap) = established();
    let first = engine.encrypt_payload(b"hello").unwrap();
    let second = engine.encrypt_payload(b"hello").unwrap();

    let mut reader = MessageReader::new(&first);
    assert_eq!(reader.read_u8().unwrap(), ids::CRYPTED_CONTAINER_TO_SERVER);
    assert_eq!(reader.read_u8().unwrap(), FLAG_KEY_ROTATION);
    assert_eq!(reader.read_string().unwrap(), "mock-session");
    let nonce = reader.read_blob(lengths::NONCE).unwrap();
    assert_eq!(&nonce[..8], &[7u8; 8]);
    assert_eq!(&nonce[8..16], &[1, 0, 0, 0, 0, 0, 0, 0]);
    assert_eq!(reader.read_u32().unwrap() as usize, 24 + 16 + 5);
    assert_eq!(reader.remaining_len(), 24 + 16 + 5);

    // Counter advances per message
    assert_eq!(second[1 + 1 + 4 + 12 + 8], 2);
    assert_eq!(engine.in_flight_count(), 2);
}

#[test]
fn test_container_round_trip_is_single_use() {
    let (mut engine, ap) = established();
    let frame = engine.encrypt_payload(b"ping").unwrap();

    let mut reader = MessageReader::new(&frame[1..]);
    let (reply_nonce, inner) = ap.open_container(&mut reader).unwrap();
    assert_eq!(inner, b"ping");

    let reply = ap.seal_container(&reply_nonce, b"\x08pong", false).unwrap();
    let opened = engine
        .decrypt_payload(&mut MessageReader::new(&reply[1..]))
        .unwrap();
    assert_eq!(opened, b"\x08pong");
    assert_eq!(engine.in_flight_count(), 0);

    let again = engine.decrypt_payload(&mut MessageReader::new(&reply[1..]));
    assert!(matches!(again, Err(CryptoError::DecryptionFailed(_))));
}

#[test]
fn test_container_length_mismatch() {
    let (mut engine, ap) = established();
    let frame = engine.encrypt_payload(b"ping").unwrap();
    let (reply_nonce, _) = ap.open_container(&mut MessageReader::new(&frame[1..])).unwrap();

    let mut reply = ap.seal_container(&reply_nonce, b"\x08pong", false).unwrap();
    reply.pop();
    assert!(matches!(
        engine.decrypt_payload(&mut MessageReader::new(&reply[1..])),
        Err(CryptoError::DecryptionFailed(_))
    ));
    // A failed open keeps the nonce
    assert_eq!(engine.in_flight_count(), 1);
}

#[test]
fn test_oversized_payload_rejected_before_crypto() {
    let mut engine = CryptoEngine::new("pw", b"salt".to_vec(), 1);
    let payload = vec![0u8; lengths::MAX_PAYLOAD + 1];
    assert!(matches!(
        engine.encrypt_payload(&payload),
        Err(CryptoError::PayloadTooLarge { .. })
    ));
    assert_eq!(engine.in_flight_count(), 0);
}

#[test]
fn test_encrypt_requires_session() {
    let mut engine = CryptoEngine::new("pw", b"salt".to_vec(), 1);
    assert!(matches!(
        engine.encrypt_payload(b"x"),
        Err(CryptoError::MissingKey(_))
    ));
}

#[test]
fn test_counter_exhaustion() {
    let (mut engine, _ap) = established();
    engine.set_message_counter(u64::from(u32::MAX));
    engine.encrypt_payload(b"last").unwrap();
    assert!(matches!(
        engine.encrypt_payload(b"one more"),
        Err(CryptoError::CounterExhausted)
    ));
}

#[test]
fn test_stream_names() {
    assert_eq!(
        stream_name("http://abb.com/protocol/update_encrypted"),
        Some("update")
    );
    assert_eq!(stream_name("a/b/log"), Some("log"));
    assert_eq!(stream_name("noslash"), None);
}

#[test]
fn test_key_table_skips_topics_without_path() {
    let (mut engine, ap) = established();
    let frame = engine.encrypt_payload(b"x").unwrap();
    let (reply_nonce, _) = ap.open_container(&mut MessageReader::new(&frame[1..])).unwrap();

    let mut table = MessageWriter::new();
    table.write_blob(&[0u8; 32]).unwrap();
    table.write_u16(2);
    table.write_string("orphan").unwrap();
    table.write_u64(4);
    table.write_string("x/update_encrypted").unwrap();
    table.write_u64(9);
    table.write_u8(ids::RPC_CALL_RESULT);

    let mut reply = ap.seal_container(&reply_nonce, &table.to_bytes(), false).unwrap();
    reply[1] = FLAG_KEY_ROTATION;
    let inner = engine
        .decrypt_payload(&mut MessageReader::new(&reply[1..]))
        .unwrap();

    assert_eq!(inner, [ids::RPC_CALL_RESULT]);
    assert!(engine.replay_window("orphan").is_none());
    assert_eq!(engine.replay_window("update").unwrap().expected(), 9);
}

/// Session whose pubsub key table has been installed
fn with_pubsub_key() -> (CryptoEngine, MockAccessPoint) {
    let (mut engine, ap) = established();
    let frame = engine.encrypt_payload(b"x").unwrap();
    let (reply_nonce, _) = ap.open_container(&mut MessageReader::new(&frame[1..])).unwrap();
    let reply = ap.seal_container(&reply_nonce, &[ids::SASL_LOGIN_SUCCESS], true).unwrap();
    engine
        .decrypt_payload(&mut MessageReader::new(&reply[1..]))
        .unwrap();
    (engine, ap)
}

#[test]
fn test_pubsub_requires_key() {
    let (mut engine, ap) = established();
    let item = ap.seal_pubsub(0, b"data").unwrap();
    assert!(matches!(
        engine.decrypt_pubsub(&item, "update"),
        Err(CryptoError::MissingKey(_))
    ));
}

#[test]
fn test_pubsub_decrypt_and_replay() {
    let (mut engine, ap) = with_pubsub_key();

    let item = ap.seal_pubsub(0, b"first").unwrap();
    assert_eq!(engine.decrypt_pubsub(&item, "update").unwrap(), b"first");
    assert!(matches!(
        engine.decrypt_pubsub(&item, "update"),
        Err(CryptoError::ReplayRejected { sequence: 0, .. })
    ));

    // Streams are tracked independently
    let log = ap.seal_pubsub(0, b"log entry").unwrap();
    assert_eq!(engine.decrypt_pubsub(&log, "log").unwrap(), b"log entry");
}

#[test]
fn test_pubsub_failed_decrypt_leaves_window() {
    let (mut engine, ap) = with_pubsub_key();
    let item = ap.seal_pubsub(5, b"payload").unwrap();
    let mut bytes = STANDARD.decode(&item).unwrap();
    let last = bytes.len() - 1;
    bytes[last] ^= 0xff;

    let err = engine
        .decrypt_pubsub(&STANDARD.encode(&bytes), "update")
        .unwrap_err();
    assert!(matches!(err, CryptoError::DecryptionFailed(_)));

    let window = engine.replay_window("update").unwrap();
    assert_eq!(window.expected(), 0);
    assert_eq!(window.skipped_len(), 0);

    // The genuine item is still accepted afterwards
    assert_eq!(engine.decrypt_pubsub(&item, "update").unwrap(), b"payload");
}

#[test]
fn test_pubsub_rejects_wide_sequence_and_bad_input() {
    let (mut engine, ap) = with_pubsub_key();
    let item = ap.seal_pubsub(1, b"payload").unwrap();
    let mut bytes = STANDARD.decode(&item).unwrap();
    bytes[20] = 1;
    assert!(matches!(
        engine.decrypt_pubsub(&STANDARD.encode(&bytes), "update"),
        Err(CryptoError::Codec(CodecError::ValueOutOfRange { .. }))
    ));

    assert!(matches!(
        engine.decrypt_pubsub("not base64!", "update"),
        Err(CryptoError::InvalidEncoding(_))
    ));
    assert!(engine.decrypt_pubsub(&STANDARD.encode([0u8; 10]), "update").is_err());
}

#[test]
fn test_pubsub_failed_decrypt_on_unknown_stream_adds_no_window() {
    let (mut engine, ap) = with_pubsub_key();
    let item = ap.seal_pubsub(3, b"x").unwrap();
    let mut bytes = STANDARD.decode(&item).unwrap();
    let last = bytes.len() - 1;
    bytes[last] ^= 0xff;

    assert!(engine
        .decrypt_pubsub(&STANDARD.encode(&bytes), "status")
        .is_err());
    assert!(engine.replay_window("status").is_none());
}

#[test]
fn test_pubsub_unknown_stream_window_created() {
    let (mut engine, ap) = with_pubsub_key();
    let item = ap.seal_pubsub(3, b"x").unwrap();
    engine.decrypt_pubsub(&item, "status").unwrap();
    let window = engine.replay_window("status").unwrap();
    assert_eq!(window.expected(), 4);
    assert_eq!(window.skipped().collect::<Vec<_>>(), [0, 1, 2]);
}

#[test]
fn test_login_through_engine() {
    let (mut engine, _) = established();
    let first = engine.begin_login("6a2f9e41@busch-jaeger.de").unwrap();
    assert!(first.starts_with("n,,n=6a2f9e41@busch-jaeger.de,r="));
    assert_eq!(engine.scram_state(), ScramState::ClientFirstSent);
    assert!(engine.answer_challenge("r=other,s=c2FsdA==,i=4096").is_err());
    assert_eq!(engine.scram_state(), ScramState::Failed);
}

#[test]
fn test_reset_discards_session() {
    let (mut engine, _ap) = with_pubsub_key();
    engine.encrypt_payload(b"pending").unwrap();
    engine.reset();

    assert!(!engine.has_shared_key());
    assert_eq!(engine.in_flight_count(), 0);
    assert!(engine.replay_window("update").is_none());
    assert!(engine.public_key().is_none());
    assert_eq!(engine.scram_state(), ScramState::Idle);
    assert!(format!("{engine:?}").contains("CryptoEngine"));
}

fn hex(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}
