//! Per (booking, device) code lifecycle.
//!
//! ```text
//! None ──push ok──► Active ──revoke confirmed──► Revoked
//!   │
//!   └──push failed──► Failed
//! ```
//!
//! Pure: no IO, no clock. The orchestrator feeds it vendor outcomes and
//! persists whatever state comes back.

use crate::error::TransitionError;
use crate::model::CodeStatus;

/// Lifecycle position of one code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CodeState {
    None,
    Active,
    Revoked,
    Failed,
}

/// Vendor outcome driving a transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CodeEvent {
    PushSucceeded,
    PushFailed,
    RevokeConfirmed,
    /// Vendor revoke failed or timed out.
    RevokeFailed,
}

impl CodeEvent {
    fn name(&self) -> &'static str {
        match self {
            Self::PushSucceeded => "record a successful push",
            Self::PushFailed => "record a failed push",
            Self::RevokeConfirmed => "confirm revocation",
            Self::RevokeFailed => "record a failed revocation",
        }
    }
}

impl CodeState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Revoked | Self::Failed)
    }

    /// Next state for `event`.
    ///
    /// Confirming revocation of an already revoked code is a no-op, which
    /// keeps manual and scheduled revocation idempotent.
    pub fn apply(self, event: CodeEvent) -> Result<CodeState, TransitionError> {
        match (self, event) {
            (Self::None, CodeEvent::PushSucceeded) => Ok(Self::Active),
            (Self::None, CodeEvent::PushFailed) => Ok(Self::Failed),
            (Self::Active, CodeEvent::RevokeConfirmed) => Ok(Self::Revoked),
            // at-least-once: the next pass retries
            (Self::Active, CodeEvent::RevokeFailed) => Ok(Self::Active),
            (Self::Revoked, CodeEvent::RevokeConfirmed) => Ok(Self::Revoked),
            (from, event) => Err(TransitionError {
                from,
                event: event.name(),
            }),
        }
    }

    /// Persisted status, or `None` before the first push resolved.
    pub fn status(&self) -> Option<CodeStatus> {
        match self {
            Self::None => None,
            Self::Active => Some(CodeStatus::Active),
            Self::Revoked => Some(CodeStatus::Revoked),
            Self::Failed => Some(CodeStatus::Failed),
        }
    }
}

impl From<CodeStatus> for CodeState {
    fn from(status: CodeStatus) -> Self {
        match status {
            CodeStatus::Active => Self::Active,
            CodeStatus::Revoked => Self::Revoked,
            CodeStatus::Failed => Self::Failed,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn push_outcomes_leave_none() {
        assert_eq!(
            CodeState::None.apply(CodeEvent::PushSucceeded),
            Ok(CodeState::Active)
        );
        assert_eq!(
            CodeState::None.apply(CodeEvent::PushFailed),
            Ok(CodeState::Failed)
        );
    }

    #[test]
    fn failed_is_terminal() {
        assert!(CodeState::Failed.is_terminal());
        assert!(CodeState::Failed
            .apply(CodeEvent::RevokeConfirmed)
            .is_err());
        assert!(CodeState::Failed.apply(CodeEvent::PushSucceeded).is_err());
    }

    #[test]
    fn revocation_is_idempotent() {
        let revoked = CodeState::Active
            .apply(CodeEvent::RevokeConfirmed)
            .unwrap();
        assert_eq!(revoked, CodeState::Revoked);
        assert_eq!(
            revoked.apply(CodeEvent::RevokeConfirmed),
            Ok(CodeState::Revoked)
        );
    }

    #[test]
    fn failed_revoke_keeps_code_active() {
        assert_eq!(
            CodeState::Active.apply(CodeEvent::RevokeFailed),
            Ok(CodeState::Active)
        );
    }

    #[test]
    fn active_cannot_be_pushed_twice() {
        let err = CodeState::Active
            .apply(CodeEvent::PushSucceeded)
            .unwrap_err();
        assert_eq!(err.from, CodeState::Active);
    }
}
