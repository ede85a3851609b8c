use crate::error::{CoordinationError, Result};
use crate::state::schema::{AssignmentStatus, WorkflowStatus};

/// Validate a workflow status transition is allowed.
pub fn validate_transition(from: WorkflowStatus, to: WorkflowStatus) -> Result<()> {
    let valid = match from {
        WorkflowStatus::Active => matches!(
            to,
            WorkflowStatus::Completed
                | WorkflowStatus::Failed
                | WorkflowStatus::Cancelled
                | WorkflowStatus::Paused
        ),
        WorkflowStatus::Paused => matches!(
            to,
            WorkflowStatus::Active | WorkflowStatus::Failed | WorkflowStatus::Cancelled
        ),
        // Terminal states
        WorkflowStatus::Completed | WorkflowStatus::Failed | WorkflowStatus::Cancelled => false,
    };

    if valid {
        Ok(())
    } else {
        Err(CoordinationError::InvalidTransition {
            from: from.to_string(),
            to: to.to_string(),
        })
    }
}

/// Get valid transitions from a workflow status.
pub fn valid_transitions(from: WorkflowStatus) -> Vec<WorkflowStatus> {
    match from {
        WorkflowStatus::Active => vec![
            WorkflowStatus::Completed,
            WorkflowStatus::Failed,
            WorkflowStatus::Cancelled,
            WorkflowStatus::Paused,
        ],
        WorkflowStatus::Paused => vec![
            WorkflowStatus::Active,
            WorkflowStatus::Failed,
            WorkflowStatus::Cancelled,
        ],
        WorkflowStatus::Completed | WorkflowStatus::Failed | WorkflowStatus::Cancelled => vec![],
    }
}

/// Validate an assignment status transition. Assignments only move forward.
pub fn validate_assignment_transition(from: AssignmentStatus, to: AssignmentStatus) -> Result<()> {
    let valid = match from {
        AssignmentStatus::Assigned => matches!(
            to,
            AssignmentStatus::Started | AssignmentStatus::Failed | AssignmentStatus::Cancelled
        ),
        AssignmentStatus::Started => matches!(
            to,
            AssignmentStatus::Completed | AssignmentStatus::Failed | AssignmentStatus::Cancelled
        ),
        AssignmentStatus::Completed | AssignmentStatus::Failed | AssignmentStatus::Cancelled => {
            false
        }
    };

    if valid {
        Ok(())
    } else {
        Err(CoordinationError::InvalidTransition {
            from: from.to_string(),
            to: to.to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_valid_transitions() {
        // Active can go anywhere except back to itself
        assert!(validate_transition(WorkflowStatus::Active, WorkflowStatus::Completed).is_ok());
        assert!(validate_transition(WorkflowStatus::Active, WorkflowStatus::Failed).is_ok());
        assert!(validate_transition(WorkflowStatus::Active, WorkflowStatus::Cancelled).is_ok());
        assert!(validate_transition(WorkflowStatus::Active, WorkflowStatus::Paused).is_ok());
        assert!(validate_transition(WorkflowStatus::Active, WorkflowStatus::Active).is_err());

        // Paused resumes or ends
        assert!(validate_transition(WorkflowStatus::Paused, WorkflowStatus::Active).is_ok());
        assert!(validate_transition(WorkflowStatus::Paused, WorkflowStatus::Cancelled).is_ok());
        assert!(validate_transition(WorkflowStatus::Paused, WorkflowStatus::Completed).is_err());

        // Terminal states are final
        for terminal in [
            WorkflowStatus::Completed,
            WorkflowStatus::Failed,
            WorkflowStatus::Cancelled,
        ] {
            assert!(validate_transition(terminal, WorkflowStatus::Active).is_err());
            assert!(validate_transition(terminal, WorkflowStatus::Cancelled).is_err());
            assert!(valid_transitions(terminal).is_empty());
        }
    }

    #[test]
    fn test_valid_transitions_list_matches_validation() {
        for from in [WorkflowStatus::Active, WorkflowStatus::Paused] {
            for to in valid_transitions(from) {
                assert!(validate_transition(from, to).is_ok(), "{} -> {}", from, to);
            }
        }
    }

    #[test]
    fn test_assignment_moves_forward_only() {
        use AssignmentStatus::*;

        assert!(validate_assignment_transition(Assigned, Started).is_ok());
        assert!(validate_assignment_transition(Assigned, Cancelled).is_ok());
        assert!(validate_assignment_transition(Started, Completed).is_ok());
        assert!(validate_assignment_transition(Started, Failed).is_ok());

        assert!(validate_assignment_transition(Started, Assigned).is_err());
        assert!(validate_assignment_transition(Assigned, Completed).is_err());
        assert!(validate_assignment_transition(Completed, Failed).is_err());
        assert!(validate_assignment_transition(Cancelled, Started).is_err());
    }

    #[test]
    fn test_transition_error_names_states() {
        let err = validate_transition(WorkflowStatus::Completed, WorkflowStatus::Active).unwrap_err();
        assert_eq!(
            err.to_string(),
            "Invalid status transition: cannot go from 'completed' to 'active'"
        );
    }
}
