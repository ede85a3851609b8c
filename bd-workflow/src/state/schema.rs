use serde::{Deserialize, Serialize};

use crate::error::CoordinationError;

/// Kind of work a workflow performs. Each type is served by the agent of the same name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkflowType {
    Research,
    Poc,
    Documentation,
    Validation,
}

/// Agent types mirror workflow types one to one.
pub type AgentType = WorkflowType;

impl WorkflowType {
    pub const ALL: [WorkflowType; 4] = [
        WorkflowType::Research,
        WorkflowType::Poc,
        WorkflowType::Documentation,
        WorkflowType::Validation,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            WorkflowType::Research => "research",
            WorkflowType::Poc => "poc",
            WorkflowType::Documentation => "documentation",
            WorkflowType::Validation => "validation",
        }
    }

    /// The result type an agent of this type produces.
    pub fn result_type(&self) -> ResultType {
        match self {
            WorkflowType::Research => ResultType::Findings,
            WorkflowType::Poc => ResultType::PocResults,
            WorkflowType::Documentation => ResultType::Documentation,
            WorkflowType::Validation => ResultType::Validation,
        }
    }
}

impl std::fmt::Display for WorkflowType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for WorkflowType {
    type Err = CoordinationError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "research" => Ok(WorkflowType::Research),
            "poc" => Ok(WorkflowType::Poc),
            "documentation" => Ok(WorkflowType::Documentation),
            "validation" => Ok(WorkflowType::Validation),
            _ => Err(CoordinationError::InvalidWorkflowType(s.to_string())),
        }
    }
}

/// Workflow status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkflowStatus {
    Active,
    Completed,
    Failed,
    Paused,
    Cancelled,
}

impl WorkflowStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            WorkflowStatus::Active => "active",
            WorkflowStatus::Completed => "completed",
            WorkflowStatus::Failed => "failed",
            WorkflowStatus::Paused => "paused",
            WorkflowStatus::Cancelled => "cancelled",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            WorkflowStatus::Completed | WorkflowStatus::Failed | WorkflowStatus::Cancelled
        )
    }

    /// Status the linked issue should carry while the workflow is in this state.
    pub fn issue_status(&self) -> &'static str {
        match self {
            WorkflowStatus::Active => "in_progress",
            WorkflowStatus::Completed => "closed",
            WorkflowStatus::Failed | WorkflowStatus::Paused => "blocked",
            WorkflowStatus::Cancelled => "cancelled",
        }
    }
}

impl std::fmt::Display for WorkflowStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for WorkflowStatus {
    type Err = CoordinationError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "active" => Ok(WorkflowStatus::Active),
            "completed" => Ok(WorkflowStatus::Completed),
            "failed" => Ok(WorkflowStatus::Failed),
            "paused" => Ok(WorkflowStatus::Paused),
            "cancelled" => Ok(WorkflowStatus::Cancelled),
            _ => Err(CoordinationError::InvalidValue {
                field: "workflow status",
                value: s.to_string(),
            }),
        }
    }
}

/// Status of one step assignment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AssignmentStatus {
    Assigned,
    Started,
    Completed,
    Failed,
    Cancelled,
}

impl AssignmentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            AssignmentStatus::Assigned => "assigned",
            AssignmentStatus::Started => "started",
            AssignmentStatus::Completed => "completed",
            AssignmentStatus::Failed => "failed",
            AssignmentStatus::Cancelled => "cancelled",
        }
    }

    pub fn is_finished(&self) -> bool {
        matches!(
            self,
            AssignmentStatus::Completed | AssignmentStatus::Failed | AssignmentStatus::Cancelled
        )
    }
}

impl std::fmt::Display for AssignmentStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for AssignmentStatus {
    type Err = CoordinationError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "assigned" => Ok(AssignmentStatus::Assigned),
            "started" => Ok(AssignmentStatus::Started),
            "completed" => Ok(AssignmentStatus::Completed),
            "failed" => Ok(AssignmentStatus::Failed),
            "cancelled" => Ok(AssignmentStatus::Cancelled),
            _ => Err(CoordinationError::InvalidValue {
                field: "assignment status",
                value: s.to_string(),
            }),
        }
    }
}

/// Kind of payload a stored result carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResultType {
    Findings,
    PocResults,
    Documentation,
    Validation,
    Performance,
}

impl ResultType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ResultType::Findings => "findings",
            ResultType::PocResults => "poc_results",
            ResultType::Documentation => "documentation",
            ResultType::Validation => "validation",
            ResultType::Performance => "performance",
        }
    }
}

impl std::fmt::Display for ResultType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for ResultType {
    type Err = CoordinationError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "findings" => Ok(ResultType::Findings),
            "poc_results" => Ok(ResultType::PocResults),
            "documentation" => Ok(ResultType::Documentation),
            "validation" => Ok(ResultType::Validation),
            "performance" => Ok(ResultType::Performance),
            _ => Err(CoordinationError::InvalidValue {
                field: "result type",
                value: s.to_string(),
            }),
        }
    }
}

/// Registration status of an agent instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentStatus {
    Active,
    Inactive,
    Busy,
    Error,
}

impl AgentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            AgentStatus::Active => "active",
            AgentStatus::Inactive => "inactive",
            AgentStatus::Busy => "busy",
            AgentStatus::Error => "error",
        }
    }
}

impl std::fmt::Display for AgentStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for AgentStatus {
    type Err = CoordinationError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "active" => Ok(AgentStatus::Active),
            "inactive" => Ok(AgentStatus::Inactive),
            "busy" => Ok(AgentStatus::Busy),
            "error" => Ok(AgentStatus::Error),
            _ => Err(CoordinationError::InvalidValue {
                field: "agent status",
                value: s.to_string(),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_workflow_type_from_str() {
        assert_eq!("poc".parse::<WorkflowType>().unwrap(), WorkflowType::Poc);
        assert_eq!("Research".parse::<WorkflowType>().unwrap(), WorkflowType::Research);
        assert!(matches!(
            "deploy".parse::<WorkflowType>(),
            Err(CoordinationError::InvalidWorkflowType(_))
        ));
    }

    #[test]
    fn test_workflow_status_terminal() {
        assert!(!WorkflowStatus::Active.is_terminal());
        assert!(!WorkflowStatus::Paused.is_terminal());
        assert!(WorkflowStatus::Completed.is_terminal());
        assert!(WorkflowStatus::Failed.is_terminal());
        assert!(WorkflowStatus::Cancelled.is_terminal());
    }

    #[test]
    fn test_issue_status_mapping() {
        assert_eq!(WorkflowStatus::Active.issue_status(), "in_progress");
        assert_eq!(WorkflowStatus::Completed.issue_status(), "closed");
        assert_eq!(WorkflowStatus::Failed.issue_status(), "blocked");
        assert_eq!(WorkflowStatus::Paused.issue_status(), "blocked");
        assert_eq!(WorkflowStatus::Cancelled.issue_status(), "cancelled");
    }

    #[test]
    fn test_result_type_for_workflow_type() {
        assert_eq!(WorkflowType::Poc.result_type(), ResultType::PocResults);
        assert_eq!(WorkflowType::Research.result_type().to_string(), "findings");
    }

    #[test]
    fn test_serde_uses_snake_case() {
        let json = serde_json::to_string(&ResultType::PocResults).unwrap();
        assert_eq!(json, "\"poc_results\"");
    }
}
