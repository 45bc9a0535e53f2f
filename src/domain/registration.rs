//! Registration bounded context

use crate::domain::shared::PhoneError;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Registration state of the User Agent
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", content = "reason", rename_all = "snake_case")]
pub enum RegistrationState {
    Unregistered,
    Registering,
    Registered,
    Failed(String),
}

impl RegistrationState {
    /// Transitions are one-directional within an attempt; a new attempt
    /// may start from any settled state.
    pub fn can_transition_to(&self, next: &RegistrationState) -> bool {
        use RegistrationState::*;

        match (self, next) {
            (Unregistered, Registering) => true,
            (Registering, Registered) => true,
            (Registering, Failed(_)) => true,

            (Registered, Registering) => true,
            (Failed(_), Registering) => true,

            (Registered, Unregistered) => true,
            (Failed(_), Unregistered) => true,

            _ => false,
        }
    }

    /// Registered or Failed
    pub fn is_terminal(&self) -> bool {
        matches!(self, RegistrationState::Registered | RegistrationState::Failed(_))
    }

    pub fn is_registered(&self) -> bool {
        matches!(self, RegistrationState::Registered)
    }

    pub fn as_error(&self) -> Option<PhoneError> {
        match self {
            RegistrationState::Failed(reason) => {
                Some(PhoneError::RegistrationFailed(reason.clone()))
            }
            _ => None,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            RegistrationState::Unregistered => "unregistered",
            RegistrationState::Registering => "registering",
            RegistrationState::Registered => "registered",
            RegistrationState::Failed(_) => "failed",
        }
    }
}

impl fmt::Display for RegistrationState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RegistrationState::Failed(reason) => write!(f, "failed ({reason})"),
            other => f.write_str(other.name()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_attempt_is_one_directional() {
        let registering = RegistrationState::Registering;
        assert!(RegistrationState::Unregistered.can_transition_to(&registering));
        assert!(registering.can_transition_to(&RegistrationState::Registered));
        assert!(registering.can_transition_to(&RegistrationState::Failed("timeout".into())));

        assert!(!registering.can_transition_to(&RegistrationState::Unregistered));
        assert!(!RegistrationState::Registered.can_transition_to(&RegistrationState::Failed("x".into())));
        assert!(!RegistrationState::Unregistered.can_transition_to(&RegistrationState::Registered));
    }

    #[test]
    fn test_new_attempt_from_settled_state() {
        assert!(RegistrationState::Failed("401".into()).can_transition_to(&RegistrationState::Registering));
        assert!(RegistrationState::Registered.can_transition_to(&RegistrationState::Registering));
        assert!(RegistrationState::Registered.can_transition_to(&RegistrationState::Unregistered));
    }

    #[test]
    fn test_failure_maps_to_error() {
        let failed = RegistrationState::Failed("403 Forbidden".into());
        assert!(failed.is_terminal());
        assert_eq!(
            failed.as_error(),
            Some(PhoneError::RegistrationFailed("403 Forbidden".into()))
        );
        assert_eq!(RegistrationState::Registered.as_error(), None);
        assert_eq!(failed.to_string(), "failed (403 Forbidden)");
    }

    #[test]
    fn test_serialization() {
        let json = serde_json::to_string(&RegistrationState::Failed("timeout".into())).unwrap();
        assert_eq!(json, r#"{"state":"failed","reason":"timeout"}"#);
    }
}
