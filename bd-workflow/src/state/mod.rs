pub mod schema;
pub mod transitions;

// Re-export all schema types for convenience
pub use schema::{AgentStatus, AgentType, AssignmentStatus, ResultType, WorkflowStatus, WorkflowType};
