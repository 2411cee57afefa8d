//! Allowed phase changes.

use crate::error::AdapterError;
use crate::state::Phase;

/// Phases reachable from `from` in one step.
#[must_use]
pub fn successors(from: Phase) -> &'static [Phase] {
    use Phase::{
        AwaitFeedback, Completed, Error, FeedbackCompleted, Found, Idle, Initialized,
        ProcessingFeedback, Recommending, Searching,
    };

    match from {
        // Resume runs restore straight into `await_feedback`.
        Idle => &[Initialized, AwaitFeedback, Error],
        Initialized => &[Searching, Error],
        Searching => &[Found, Error],
        Found => &[Recommending, Error],
        Recommending => &[AwaitFeedback, Error],
        AwaitFeedback => &[ProcessingFeedback, Error],
        ProcessingFeedback => &[Completed, FeedbackCompleted, Error],
        Completed | FeedbackCompleted | Error => &[],
    }
}

/// Reject anything but a listed edge.
pub fn check(from: Phase, to: Phase) -> Result<(), AdapterError> {
    if successors(from).contains(&to) {
        Ok(())
    } else {
        Err(AdapterError::IllegalTransition { from, to })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ALL: [Phase; 10] = [
        Phase::Idle,
        Phase::Initialized,
        Phase::Searching,
        Phase::Found,
        Phase::Recommending,
        Phase::AwaitFeedback,
        Phase::ProcessingFeedback,
        Phase::Completed,
        Phase::FeedbackCompleted,
        Phase::Error,
    ];

    #[test]
    fn test_happy_path_is_allowed() {
        let path = [
            Phase::Idle,
            Phase::Initialized,
            Phase::Searching,
            Phase::Found,
            Phase::Recommending,
            Phase::AwaitFeedback,
            Phase::ProcessingFeedback,
            Phase::FeedbackCompleted,
        ];
        for pair in path.windows(2) {
            assert!(check(pair[0], pair[1]).is_ok(), "{} -> {}", pair[0], pair[1]);
        }
    }

    #[test]
    fn test_error_reachable_from_every_live_phase() {
        for from in ALL.iter().copied().filter(|p| !p.is_terminal()) {
            assert!(check(from, Phase::Error).is_ok(), "{from} -> error");
        }
    }

    #[test]
    fn test_terminal_phases_are_final() {
        for from in ALL.iter().copied().filter(|p| p.is_terminal()) {
            assert!(successors(from).is_empty());
        }
    }

    #[test]
    fn test_skips_are_rejected() {
        assert_eq!(
            check(Phase::Searching, Phase::AwaitFeedback),
            Err(AdapterError::IllegalTransition {
                from: Phase::Searching,
                to: Phase::AwaitFeedback,
            })
        );
        assert!(check(Phase::ProcessingFeedback, Phase::Searching).is_err());
        assert!(check(Phase::Idle, Phase::FeedbackCompleted).is_err());
    }
}
