//! Test doubles for the access point and its transport

pub mod fixtures;
pub mod mock_access_point;
pub mod mock_transport;
#[cfg(test)]
/// Unit tests for the mocks.
mod tests;

pub use mock_access_point::{MockAccessPoint, MockError};
pub use mock_transport::{MockSettingsSource, MockTransport, MockTransportHandle};

/// User name configured on every mock access point
pub const TEST_USER: &str = "installer";
/// Password of [`TEST_USER`]
pub const TEST_PASSWORD: &str = "correct horse battery staple";

/// Mock access point with the default test user
#[must_use]
pub fn test_access_point() -> MockAccessPoint {
    MockAccessPoint::new(TEST_USER, TEST_PASSWORD)
}
