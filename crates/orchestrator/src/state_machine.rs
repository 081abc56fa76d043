use keelson_core::BuildStatus;

use crate::error::{OrchestratorError, Result};

/// Legal moves of a build: `in_queue -> progress -> {ok, failed, builder_error}`.
pub struct BuildStateMachine;

impl BuildStateMachine {
    pub fn validate_transition(from: &BuildStatus, to: &BuildStatus) -> Result<()> {
        let allowed = Self::allowed_transitions(from);

        if allowed.contains(to) {
            Ok(())
        } else {
            Err(OrchestratorError::InvalidTransition {
                from: from.as_str().to_string(),
                to: to.as_str().to_string(),
            })
        }
    }

    fn allowed_transitions(from: &BuildStatus) -> Vec<BuildStatus> {
        match from {
            BuildStatus::InQueue => vec![BuildStatus::Progress],
            BuildStatus::Progress => BuildStatus::TERMINAL.to_vec(),
            BuildStatus::Ok | BuildStatus::Failed | BuildStatus::BuilderError => vec![],
        }
    }

    pub fn can_transition(from: &BuildStatus, to: &BuildStatus) -> bool {
        Self::validate_transition(from, to).is_ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_valid_transitions() {
        assert!(BuildStateMachine::can_transition(
            &BuildStatus::InQueue,
            &BuildStatus::Progress
        ));
        for terminal in BuildStatus::TERMINAL {
            assert!(BuildStateMachine::can_transition(
                &BuildStatus::Progress,
                &terminal
            ));
        }
    }

    #[test]
    fn test_invalid_transitions() {
        assert!(!BuildStateMachine::can_transition(
            &BuildStatus::InQueue,
            &BuildStatus::Ok
        ));
        assert!(!BuildStateMachine::can_transition(
            &BuildStatus::Progress,
            &BuildStatus::InQueue
        ));
        assert!(!BuildStateMachine::can_transition(
            &BuildStatus::Failed,
            &BuildStatus::Progress
        ));
    }

    #[test]
    fn test_terminal_states_are_final() {
        for terminal in BuildStatus::TERMINAL {
            for target in [
                BuildStatus::InQueue,
                BuildStatus::Progress,
                BuildStatus::Ok,
                BuildStatus::Failed,
                BuildStatus::BuilderError,
            ] {
                assert!(!BuildStateMachine::can_transition(&terminal, &target));
            }
        }
    }

    #[test]
    fn test_error_names_both_states() {
        let err = BuildStateMachine::validate_transition(&BuildStatus::Ok, &BuildStatus::Progress)
            .unwrap_err();
        assert_eq!(err.to_string(), "Invalid state transition from ok to progress");
    }
}
