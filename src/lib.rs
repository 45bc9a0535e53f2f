//! webphone - SIP-over-WebSocket softphone core
//!
//! Owns the User Agent identity, the registration lifecycle and the single
//! current call session, and bridges engine events to observers and to
//! local/remote media streams. The SIP and WebRTC stacks themselves sit
//! behind the traits in [`infrastructure::engine`].

pub mod application;
pub mod config;
pub mod domain;
pub mod infrastructure;

// Re-export commonly used types
pub use application::{PhoneEvent, WebPhone};
pub use domain::shared::error::PhoneError;
pub use domain::shared::result::Result;
