//! Handshake and message dispatch for one connection
//!
//! [`SessionMachine`] turns transport events into protocol steps. It does
//! no I/O; the gateway driver executes the returned [`SessionAction`]s.

mod machine;
mod state;


pub use machine::SessionMachine;
pub use state::{SessionAction, SessionState};
