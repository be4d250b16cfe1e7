use super::*;
use crate::error::GatewayError;
use std::cmp::Ordering;
use std::collections::HashMap;
use std::io::Write;
use std::time::Duration;

// --- config.rs tests ---

#[test]
fn test_config_defaults() {
    let config = GatewayConfig::default();

    assert_eq!(config.keep_alive_interval, Duration::from_secs(15));
    assert_eq!(config.handshake_timeout, Duration::from_secs(30));
    assert!(!config.debug_protocol);
    assert!(config.validate().is_err());
}

#[test]
fn test_config_builder() {
    let config = GatewayConfig::builder()
        .hostname("sysap.local")
        .username("installer")
        .password("secret")
        .keep_alive_interval(Duration::from_secs(5))
        .handshake_timeout(Duration::from_secs(60))
        .debug_protocol(true)
        .build();

    assert_eq!(config.hostname, "sysap.local");
    assert_eq!(config.password.as_str(), "secret");
    assert_eq!(config.keep_alive_interval, Duration::from_secs(5));
    assert_eq!(config.handshake_timeout, Duration::from_secs(60));
    assert!(config.debug_protocol);
    assert!(config.validate().is_ok());
}

#[test]
fn test_config_debug_redacts_password() {
    let config = GatewayConfig::builder().password("hunter2").build();
    let debug = format!("{config:?}");
    assert!(!debug.contains("hunter2"));
    assert!(debug.contains("<redacted>"));
}

#[test]
fn test_config_validation() {
    let base = GatewayConfig::builder()
        .hostname("h")
        .username("u")
        .password("p");

    assert!(base.clone().build().validate().is_ok());
    assert!(base.clone().hostname("  ").build().validate().is_err());
    assert!(base.clone().password("").build().validate().is_err());
    assert!(
        base.keep_alive_interval(Duration::ZERO)
            .build()
            .validate()
            .is_err()
    );
}

#[test]
fn test_config_from_json() {
    let config = GatewayConfig::from_json_str(
        r#"{"hostname": "192.168.1.10", "username": "api", "password": "pw", "debug": true}"#,
    )
    .unwrap();
    assert_eq!(config.hostname, "192.168.1.10");
    assert!(config.debug_protocol);

    let without_debug =
        GatewayConfig::from_json_str(r#"{"hostname": "h", "username": "u", "password": "p"}"#)
            .unwrap();
    assert!(!without_debug.debug_protocol);

    let err = GatewayConfig::from_json_str(r#"{"hostname": "h"}"#).unwrap_err();
    assert!(matches!(err, GatewayError::Configuration { .. }));
}

#[test]
fn test_config_from_json_file() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    write!(
        file,
        r#"{{"hostname": "h", "username": "u", "password": "p"}}"#
    )
    .unwrap();

    let config = GatewayConfig::from_json_file(file.path()).unwrap();
    assert_eq!(config.username, "u");

    let missing = GatewayConfig::from_json_file("/nonexistent/config.json").unwrap_err();
    assert!(matches!(missing, GatewayError::Io(_)));
}

#[test]
fn test_config_from_lookup() {
    let vars: HashMap<&str, &str> = [
        (ENV_HOSTNAME, "h"),
        (ENV_USERNAME, "u"),
        (ENV_PASSWORD, "p"),
        (ENV_DEBUG, "1"),
    ]
    .into_iter()
    .collect();

    let config = GatewayConfig::from_lookup(|key| vars.get(key).map(ToString::to_string)).unwrap();
    assert_eq!(config.hostname, "h");
    assert!(config.debug_protocol);

    let err = GatewayConfig::from_lookup(|key| {
        (key != ENV_PASSWORD)
            .then(|| vars.get(key).map(ToString::to_string))
            .flatten()
    })
    .unwrap_err();
    assert!(err.to_string().contains(ENV_PASSWORD));
}

// --- settings.rs tests ---

const SETTINGS: &str = r#"{
    "flags": {"version": "2.6.0"},
    "users": [
        {"name": "installer", "jid": "a1b2@busch-jaeger.de", "enabled": true,
         "authmethods": {"SCRAM-SHA-256": {"iterations": 4096, "salt": "c2FsdHNhbHQ="}}},
        {"name": "guest", "jid": "c3d4@busch-jaeger.de", "enabled": false, "authmethods": {}}
    ]
}"#;

#[test]
fn test_settings_select_user() {
    let settings = AccessPointSettings::from_json(SETTINGS).unwrap();

    let user = settings.select_user("installer").unwrap();
    assert_eq!(user.transport_username(), "a1b2");
    let (salt, iterations) = user.scram_parameters().unwrap();
    assert_eq!(salt, b"saltsalt");
    assert_eq!(iterations, 4096);

    assert!(matches!(
        settings.select_user("nobody"),
        Err(GatewayError::Configuration { .. })
    ));
    assert!(settings.select_user("guest").is_err());
}

#[test]
fn test_settings_missing_fields() {
    assert!(AccessPointSettings::from_json(r#"{"users": []}"#).is_err());
    assert!(AccessPointSettings::from_json(r#"{"flags": {"version": "2.6.0"}}"#).is_err());
}

#[test]
fn test_user_without_scram_parameters() {
    let settings = AccessPointSettings::from_json(SETTINGS).unwrap();
    let guest = &settings.users[1];
    assert!(guest.scram_parameters().is_err());
}

#[test]
fn test_firmware_check() {
    let mut settings = AccessPointSettings::from_json(SETTINGS).unwrap();
    assert!(settings.check_firmware().is_ok());
    assert!(settings.uses_legacy_caps());

    settings.flags.version = "2.3.1".into();
    assert!(settings.check_firmware().is_ok());

    settings.flags.version = "2.2.4".into();
    assert!(matches!(
        settings.check_firmware(),
        Err(GatewayError::UnsupportedFirmware { .. })
    ));

    settings.flags.version = "3.0.1".into();
    assert!(!settings.uses_legacy_caps());
}

#[test]
fn test_compare_versions() {
    assert_eq!(compare_versions("2.3.1", "2.3.1"), Ordering::Equal);
    assert_eq!(compare_versions("2.3", "2.3.0"), Ordering::Equal);
    assert_eq!(compare_versions("2.10.0", "2.9.9"), Ordering::Greater);
    assert_eq!(compare_versions("2.3.0", "2.3.1"), Ordering::Less);
    assert_eq!(compare_versions("3.0.1-rc1", "3.0.1"), Ordering::Equal);
}
