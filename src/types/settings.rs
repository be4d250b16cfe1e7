use crate::error::{GatewayError, Result};
use crate::protocol::crypto::SCRAM_MECHANISM;
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use serde::Deserialize;
use std::cmp::Ordering;
use std::collections::HashMap;

/// Oldest firmware the protocol implementation supports
pub const MINIMUM_FIRMWARE: &str = "2.3.1";

/// Firmware from which the hashed capability node is announced
pub const CURRENT_CAPS_FIRMWARE: &str = "3.0.1";

/// Contents of `/settings.json` on the access point
#[derive(Debug, Clone, Deserialize)]
pub struct AccessPointSettings {
    /// Firmware flags
    pub flags: SettingsFlags,
    /// Configured users
    pub users: Vec<AccessPointUser>,
}

/// Firmware information
#[derive(Debug, Clone, Deserialize)]
pub struct SettingsFlags {
    /// Dotted firmware version
    pub version: String,
}

/// One user record
#[derive(Debug, Clone, Deserialize)]
pub struct AccessPointUser {
    /// Login name
    pub name: String,
    /// Transport identity, `local@domain`
    pub jid: String,
    /// Disabled users cannot log in
    #[serde(default = "enabled_by_default")]
    pub enabled: bool,
    /// Authentication parameters per mechanism
    #[serde(default)]
    pub authmethods: HashMap<String, AuthMethod>,
}

/// PBKDF2 parameters for one mechanism
#[derive(Debug, Clone, Deserialize)]
pub struct AuthMethod {
    /// Iteration count
    pub iterations: u32,
    /// Base64 salt
    pub salt: String,
}

fn enabled_by_default() -> bool {
    true
}

impl AccessPointSettings {
    /// Parse the settings document
    ///
    /// # Errors
    ///
    /// Returns a configuration error if `flags.version` or `users` is missing
    pub fn from_json(json: &str) -> Result<Self> {
        serde_json::from_str(json)
            .map_err(|e| GatewayError::configuration(format!("invalid access point settings: {e}")))
    }

    /// Find the enabled user called `username`
    ///
    /// # Errors
    ///
    /// Returns a configuration error if no such user exists or it is disabled
    pub fn select_user(&self, username: &str) -> Result<&AccessPointUser> {
        let user = self
            .users
            .iter()
            .find(|user| user.name == username)
            .ok_or_else(|| {
                GatewayError::configuration(format!(
                    "user '{username}' does not exist on the access point"
                ))
            })?;

        if !user.enabled {
            return Err(GatewayError::configuration(format!(
                "user '{username}' is disabled on the access point"
            )));
        }
        Ok(user)
    }

    /// Reject firmware older than [`MINIMUM_FIRMWARE`]
    ///
    /// # Errors
    ///
    /// Returns [`GatewayError::UnsupportedFirmware`]
    pub fn check_firmware(&self) -> Result<()> {
        if compare_versions(&self.flags.version, MINIMUM_FIRMWARE) == Ordering::Less {
            return Err(GatewayError::UnsupportedFirmware {
                version: self.flags.version.clone(),
                minimum: MINIMUM_FIRMWARE.to_string(),
            });
        }
        Ok(())
    }

    /// True if the firmware expects the legacy capability announcement
    #[must_use]
    pub fn uses_legacy_caps(&self) -> bool {
        compare_versions(&self.flags.version, CURRENT_CAPS_FIRMWARE) == Ordering::Less
    }
}

impl AccessPointUser {
    /// Local part of the jid, used as the transport user name
    #[must_use]
    pub fn transport_username(&self) -> &str {
        self.jid.split('@').next().unwrap_or(&self.jid)
    }

    /// Decoded salt and iteration count for SCRAM-SHA-256
    ///
    /// # Errors
    ///
    /// Returns a configuration error if the mechanism is missing or the salt is not base64
    pub fn scram_parameters(&self) -> Result<(Vec<u8>, u32)> {
        let method = self.authmethods.get(SCRAM_MECHANISM).ok_or_else(|| {
            GatewayError::configuration(format!(
                "user '{}' has no {SCRAM_MECHANISM} parameters",
                self.name
            ))
        })?;
        let salt = STANDARD
            .decode(&method.salt)
            .map_err(|e| GatewayError::configuration(format!("invalid salt: {e}")))?;
        Ok((salt, method.iterations))
    }
}

/// Compare dotted version strings numerically
///
/// Missing components count as zero; trailing non-digits in a component are ignored.
#[must_use]
pub fn compare_versions(a: &str, b: &str) -> Ordering {
    fn parts(version: &str) -> Vec<u64> {
        version
            .trim()
            .trim_start_matches('v')
            .split('.')
            .map(|part| {
                let digits: String = part.chars().take_while(char::is_ascii_digit).collect();
                digits.parse().unwrap_or(0)
            })
            .collect()
    }

    let (a, b) = (parts(a), parts(b));
    let len = a.len().max(b.len());
    (0..len)
        .map(|i| {
            a.get(i)
                .copied()
                .unwrap_or(0)
                .cmp(&b.get(i).copied().unwrap_or(0))
        })
        .find(|ordering| ordering.is_ne())
        .unwrap_or(Ordering::Equal)
}
