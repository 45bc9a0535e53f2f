//! Session bounded context - one call attempt or active call

pub mod aggregate;
pub mod event;
pub mod media;
pub mod value_object;

pub use aggregate::Session;
pub use event::SessionEvent;
pub use media::{MediaStream, MediaStreamPair, MediaTrack, TrackKind};
pub use value_object::{Direction, EndReason, MediaConstraints, SessionState, TerminationAction};
