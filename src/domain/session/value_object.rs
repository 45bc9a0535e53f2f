//! Session value objects

use crate::domain::shared::PhoneError;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Who sent the INVITE
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    /// We sent the INVITE
    Outbound,
    /// We received the INVITE
    Inbound,
}

/// Session lifecycle state, mirrored from the engine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    /// Created, nothing sent or answered yet
    Initial,
    /// INVITE sent, or invitation accepted; waiting for negotiation
    Establishing,
    /// Media negotiated
    Established,
    /// BYE sent
    Terminating,
    /// Ended, absorbing
    Terminated,
}

impl SessionState {
    pub fn can_transition_to(&self, next: SessionState) -> bool {
        use SessionState::*;

        match (self, next) {
            (Initial, Establishing) => true,
            (Initial, Terminated) => true,

            (Establishing, Established) => true,
            (Establishing, Terminating) => true,
            (Establishing, Terminated) => true,

            (Established, Terminating) => true,
            (Established, Terminated) => true,

            (Terminating, Terminated) => true,

            (Terminated, _) => false,

            _ => false,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, SessionState::Terminated)
    }

    pub fn is_established(&self) -> bool {
        matches!(self, SessionState::Established)
    }

    pub fn name(&self) -> &'static str {
        match self {
            SessionState::Initial => "Initial",
            SessionState::Establishing => "Establishing",
            SessionState::Established => "Established",
            SessionState::Terminating => "Terminating",
            SessionState::Terminated => "Terminated",
        }
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Requested media for a session; audio is always on in practice
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MediaConstraints {
    pub audio: bool,
    pub video: bool,
}

impl MediaConstraints {
    pub fn new(audio: bool, video: bool) -> Self {
        Self { audio, video }
    }

    pub fn audio_only() -> Self {
        Self::new(true, false)
    }

    pub fn with_video(video: bool) -> Self {
        Self::new(true, video)
    }
}

impl Default for MediaConstraints {
    fn default() -> Self {
        Self::audio_only()
    }
}

/// Signaling operation that ends a session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TerminationAction {
    /// CANCEL an INVITE we sent
    Cancel,
    /// Decline an invitation we received
    Reject,
    /// BYE on a dialog
    Bye,
}

impl TerminationAction {
    /// Total over (direction, state). `None` once termination is under way.
    pub fn select(direction: Direction, state: SessionState) -> Option<Self> {
        use SessionState::*;

        match (direction, state) {
            (Direction::Outbound, Initial | Establishing) => Some(TerminationAction::Cancel),
            (Direction::Inbound, Initial) => Some(TerminationAction::Reject),
            (Direction::Inbound, Establishing) => Some(TerminationAction::Bye),
            (_, Established) => Some(TerminationAction::Bye),
            (_, Terminating | Terminated) => None,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            TerminationAction::Cancel => "cancel",
            TerminationAction::Reject => "reject",
            TerminationAction::Bye => "bye",
        }
    }
}

/// Why a session reached Terminated
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EndReason {
    /// We sent BYE
    LocalHangup,
    /// The remote party sent BYE
    RemoteHangup,
    /// The INVITE was withdrawn before an answer
    Canceled,
    /// The invitation was declined locally
    Rejected,
    /// The session never got established
    NegotiationFailed(String),
}

impl EndReason {
    pub fn as_error(&self) -> Option<PhoneError> {
        match self {
            EndReason::NegotiationFailed(reason) => {
                Some(PhoneError::NegotiationFailed(reason.clone()))
            }
            _ => None,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            EndReason::LocalHangup => "local_hangup",
            EndReason::RemoteHangup => "remote_hangup",
            EndReason::Canceled => "canceled",
            EndReason::Rejected => "rejected",
            EndReason::NegotiationFailed(_) => "negotiation_failed",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_valid_state_transitions() {
        let initial = SessionState::Initial;
        assert!(initial.can_transition_to(SessionState::Establishing));
        assert!(initial.can_transition_to(SessionState::Terminated));
        assert!(!initial.can_transition_to(SessionState::Established));
        assert!(!initial.can_transition_to(SessionState::Terminating));

        let establishing = SessionState::Establishing;
        assert!(establishing.can_transition_to(SessionState::Established));
        assert!(establishing.can_transition_to(SessionState::Terminated));

        let established = SessionState::Established;
        assert!(established.can_transition_to(SessionState::Terminating));
        assert!(established.can_transition_to(SessionState::Terminated));
        assert!(!established.can_transition_to(SessionState::Establishing));

        assert!(SessionState::Terminating.can_transition_to(SessionState::Terminated));
    }

    #[test]
    fn test_terminated_is_absorbing() {
        let terminated = SessionState::Terminated;
        for next in [
            SessionState::Initial,
            SessionState::Establishing,
            SessionState::Established,
            SessionState::Terminating,
            SessionState::Terminated,
        ] {
            assert!(!terminated.can_transition_to(next));
        }
    }

    #[test]
    fn test_termination_action_table() {
        use Direction::*;
        use SessionState::*;

        assert_eq!(TerminationAction::select(Outbound, Initial), Some(TerminationAction::Cancel));
        assert_eq!(TerminationAction::select(Outbound, Establishing), Some(TerminationAction::Cancel));
        assert_eq!(TerminationAction::select(Outbound, Established), Some(TerminationAction::Bye));
        assert_eq!(TerminationAction::select(Inbound, Initial), Some(TerminationAction::Reject));
        assert_eq!(TerminationAction::select(Inbound, Establishing), Some(TerminationAction::Bye));
        assert_eq!(TerminationAction::select(Inbound, Established), Some(TerminationAction::Bye));

        for direction in [Outbound, Inbound] {
            assert_eq!(TerminationAction::select(direction, Terminating), None);
            assert_eq!(TerminationAction::select(direction, Terminated), None);
        }
    }

    #[test]
    fn test_end_reason_error_mapping() {
        let failed = EndReason::NegotiationFailed("486 Busy Here".into());
        assert_eq!(
            failed.as_error(),
            Some(PhoneError::NegotiationFailed("486 Busy Here".into()))
        );
        assert_eq!(EndReason::RemoteHangup.as_error(), None);
        assert_eq!(failed.label(), "negotiation_failed");
    }

    #[test]
    fn test_media_constraints() {
        let audio = MediaConstraints::with_video(false);
        assert!(audio.audio);
        assert!(!audio.video);
        assert_eq!(audio, MediaConstraints::default());
        assert!(MediaConstraints::with_video(true).video);
    }
}
