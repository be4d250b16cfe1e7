use crate::error::{GatewayError, Result};
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;
use zeroize::Zeroizing;

/// Environment variable holding the access point host name
pub const ENV_HOSTNAME: &str = "SYSAP_HOSTNAME";
/// Environment variable holding the user name
pub const ENV_USERNAME: &str = "SYSAP_USERNAME";
/// Environment variable holding the password
pub const ENV_PASSWORD: &str = "SYSAP_PASSWORD";
/// Environment variable enabling protocol debug logging when set to `1`
pub const ENV_DEBUG: &str = "SYSAP_DEBUG";

/// Configuration for the gateway
#[derive(Clone)]
pub struct GatewayConfig {
    /// Host name or address of the access point
    pub hostname: String,

    /// User name as listed in the access point settings
    pub username: String,

    /// Password, wiped on drop
    pub password: Zeroizing<String>,

    /// Interval between keep-alive pings (default: 15 seconds)
    pub keep_alive_interval: Duration,

    /// Bound on the handshake until the login is verified (default: 30 seconds)
    pub handshake_timeout: Duration,

    /// Log full stanza text at debug level
    pub debug_protocol: bool,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            hostname: String::new(),
            username: String::new(),
            password: Zeroizing::new(String::new()),
            keep_alive_interval: Duration::from_secs(15),
            handshake_timeout: Duration::from_secs(30),
            debug_protocol: false,
        }
    }
}

impl std::fmt::Debug for GatewayConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GatewayConfig")
            .field("hostname", &self.hostname)
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .field("keep_alive_interval", &self.keep_alive_interval)
            .field("handshake_timeout", &self.handshake_timeout)
            .field("debug_protocol", &self.debug_protocol)
            .finish()
    }
}

/// On-disk shape of the configuration file
#[derive(Deserialize)]
struct ConfigFile {
    hostname: String,
    username: String,
    password: String,
    #[serde(default)]
    debug: bool,
}

impl GatewayConfig {
    /// Create a new config builder
    #[must_use]
    pub fn builder() -> GatewayConfigBuilder {
        GatewayConfigBuilder::default()
    }

    /// Parse `{"hostname", "username", "password", "debug"?}`
    ///
    /// # Errors
    ///
    /// Returns a configuration error if the JSON is malformed or a field is empty
    pub fn from_json_str(json: &str) -> Result<Self> {
        let file: ConfigFile = serde_json::from_str(json)
            .map_err(|e| GatewayError::configuration(format!("invalid configuration: {e}")))?;

        let config = Self::builder()
            .hostname(file.hostname)
            .username(file.username)
            .password(file.password)
            .debug_protocol(file.debug)
            .build();
        config.validate()?;
        Ok(config)
    }

    /// Read and parse a JSON configuration file
    ///
    /// # Errors
    ///
    /// Returns error if the file cannot be read or is invalid
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let json = std::fs::read_to_string(path)?;
        Self::from_json_str(&json)
    }

    /// Build from process environment variables
    ///
    /// # Errors
    ///
    /// Returns a configuration error if a required variable is missing
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from any key lookup using the `SYSAP_*` names
    ///
    /// # Errors
    ///
    /// Returns a configuration error if a required key is missing
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let require = |key: &str| {
            lookup(key)
                .filter(|value| !value.is_empty())
                .ok_or_else(|| GatewayError::configuration(format!("{key} is not set")))
        };

        let config = Self::builder()
            .hostname(require(ENV_HOSTNAME)?)
            .username(require(ENV_USERNAME)?)
            .password(require(ENV_PASSWORD)?)
            .debug_protocol(lookup(ENV_DEBUG).as_deref() == Some("1"))
            .build();
        config.validate()?;
        Ok(config)
    }

    /// Reject empty credentials and zero durations
    ///
    /// # Errors
    ///
    /// Returns a configuration error naming the first bad field
    pub fn validate(&self) -> Result<()> {
        if self.hostname.trim().is_empty() {
            return Err(GatewayError::configuration("hostname is empty"));
        }
        if self.username.trim().is_empty() {
            return Err(GatewayError::configuration("username is empty"));
        }
        if self.password.is_empty() {
            return Err(GatewayError::configuration("password is empty"));
        }
        if self.keep_alive_interval.is_zero() {
            return Err(GatewayError::configuration("keep-alive interval is zero"));
        }
        if self.handshake_timeout.is_zero() {
            return Err(GatewayError::configuration("handshake timeout is zero"));
        }
        Ok(())
    }
}

/// Builder for `GatewayConfig`
#[derive(Debug, Clone, Default)]
pub struct GatewayConfigBuilder {
    config: GatewayConfig,
}

impl GatewayConfigBuilder {
    /// Set access point host name
    #[must_use]
    pub fn hostname(mut self, hostname: impl Into<String>) -> Self {
        self.config.hostname = hostname.into();
        self
    }

    /// Set user name
    #[must_use]
    pub fn username(mut self, username: impl Into<String>) -> Self {
        self.config.username = username.into();
        self
    }

    /// Set password
    #[must_use]
    pub fn password(mut self, password: impl Into<String>) -> Self {
        self.config.password = Zeroizing::new(password.into());
        self
    }

    /// Set keep-alive interval
    #[must_use]
    pub fn keep_alive_interval(mut self, interval: Duration) -> Self {
        self.config.keep_alive_interval = interval;
        self
    }

    /// Set handshake timeout
    #[must_use]
    pub fn handshake_timeout(mut self, timeout: Duration) -> Self {
        self.config.handshake_timeout = timeout;
        self
    }

    /// Enable protocol debug logging
    #[must_use]
    pub fn debug_protocol(mut self, enable: bool) -> Self {
        self.config.debug_protocol = enable;
        self
    }

    /// Build the configuration
    #[must_use]
    pub fn build(self) -> GatewayConfig {
        self.config
    }
}
