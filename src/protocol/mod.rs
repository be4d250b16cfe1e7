//! Access point wire protocol
//!
//! Layered bottom-up: [`codec`] frames binary messages, [`crypto`] seals
//! them, [`messages`] builds payloads and stanzas, [`xml`] holds the
//! element trees the transport carries.

pub mod codec;
pub mod crypto;
pub mod messages;
pub mod xml;
