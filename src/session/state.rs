//! Handshake progress of one connection attempt

use crate::error::GatewayError;
use crate::model::DeviceTree;
use crate::protocol::xml::Element;

/// Session state, ordered by handshake progress
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub enum SessionState {
    /// No transport stream
    #[default]
    Disconnected,
    /// Local authenticator sent, waiting for the access point's keys
    AwaitingLocalKeyExchange,
    /// Start-new-session sent
    SessionNegotiating,
    /// SCRAM exchange running
    Authenticating,
    /// Login verified; keep-alive running, master data requested
    Authenticated,
    /// Presence subscription requested
    Subscribing,
    /// Subscribed to pubsub updates
    Active,
}

impl SessionState {
    /// True once the login has been verified
    #[must_use]
    pub fn is_authenticated(self) -> bool {
        self >= Self::Authenticated
    }

    /// True while a handshake step is outstanding
    #[must_use]
    pub fn is_handshaking(self) -> bool {
        matches!(
            self,
            Self::AwaitingLocalKeyExchange | Self::SessionNegotiating | Self::Authenticating
        )
    }
}

impl std::fmt::Display for SessionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Disconnected => "disconnected",
            Self::AwaitingLocalKeyExchange => "awaiting local key exchange",
            Self::SessionNegotiating => "session negotiating",
            Self::Authenticating => "authenticating",
            Self::Authenticated => "authenticated",
            Self::Subscribing => "subscribing",
            Self::Active => "active",
        };
        f.write_str(name)
    }
}

/// Side effects requested by the state machine, executed by the driver in order
#[derive(Debug)]
pub enum SessionAction {
    /// Send a stanza
    Send(Element),
    /// Start the keep-alive timer
    StartKeepAlive,
    /// Stop the keep-alive timer
    StopKeepAlive,
    /// Replace the device tree with master data
    ReplaceTree(DeviceTree),
    /// Merge an incremental update and publish it
    MergeUpdate(DeviceTree),
    /// Presence subscription confirmed
    Subscribed,
    /// An inbound item was dropped; the session continues
    Dropped(GatewayError),
}
