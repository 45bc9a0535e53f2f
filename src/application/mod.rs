//! Application layer - Use cases and application services
//!
//! This layer orchestrates domain objects and the engine to fulfill use cases.
//! It's responsible for:
//! - Binding the identity to an engine agent
//! - Registration and session control
//! - Mirroring engine events into domain state
//! - Publishing events to observers

pub mod dispatch;
pub mod messenger;
pub mod phone;
pub mod registerer;
pub mod session;
pub mod user_agent;

pub use dispatch::{EventDispatcher, EventSubscription, PhoneEvent};
pub use messenger::Messenger;
pub use phone::WebPhone;
pub use registerer::{Registerer, RegistrationWatch};
pub use session::{ControlOutcome, SessionController, SessionHandle, SkipReason};
pub use user_agent::{TransportState, UserAgent};
