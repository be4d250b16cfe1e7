//! Core types module

mod config;
mod settings;

#[cfg(test)]
mod tests;

pub use config::{
    ENV_DEBUG, ENV_HOSTNAME, ENV_PASSWORD, ENV_USERNAME, GatewayConfig, GatewayConfigBuilder,
};
pub use settings::{
    AccessPointSettings, AccessPointUser, AuthMethod, CURRENT_CAPS_FIRMWARE, MINIMUM_FIRMWARE,
    SettingsFlags, compare_versions,
};
