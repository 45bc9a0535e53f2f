//! Domain errors

use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PhoneError {
    #[error("Invalid address: {0}")]
    InvalidAddress(String),

    #[error("Invalid target: {0}")]
    InvalidTarget(String),

    #[error("Transport unavailable: {0}")]
    TransportUnavailable(String),

    #[error("Registration failed: {0}")]
    RegistrationFailed(String),

    #[error("Negotiation failed: {0}")]
    NegotiationFailed(String),

    #[error("Session is no longer the current session")]
    NotCurrentSession,

    #[error("No active session")]
    NoActiveSession,

    #[error("Another session is already in progress")]
    SessionInProgress,

    #[error("Invalid state transition: {0}")]
    InvalidStateTransition(String),

    #[error("Configuration error: {0}")]
    Config(String),
}

impl PhoneError {
    /// Staleness errors: the operation had nothing (or the wrong thing) to act on.
    pub fn is_benign(&self) -> bool {
        matches!(self, PhoneError::NotCurrentSession | PhoneError::NoActiveSession)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_benign_errors() {
        assert!(PhoneError::NotCurrentSession.is_benign());
        assert!(PhoneError::NoActiveSession.is_benign());
        assert!(!PhoneError::InvalidAddress("x".into()).is_benign());
        assert!(!PhoneError::NegotiationFailed("488".into()).is_benign());
    }

    #[test]
    fn test_error_display() {
        let err = PhoneError::RegistrationFailed("403 Forbidden".to_string());
        assert_eq!(err.to_string(), "Registration failed: 403 Forbidden");
    }
}
