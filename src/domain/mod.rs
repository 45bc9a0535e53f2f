//! Domain layer - identity, registration, sessions and messages
//!
//! Nothing in here talks to the engine; the application layer mirrors engine
//! events into these types.

pub mod identity;
pub mod message;
pub mod registration;
pub mod session;
pub mod shared;

// Re-export commonly used types
pub use shared::{PhoneError, Result};
