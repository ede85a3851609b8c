use thiserror::Error;

/// Error types for bd-workflow operations.
/// These are used by both the library and binary crates.
#[derive(Error, Debug)]
pub enum CoordinationError {
    #[error("Invalid workflow type '{0}'. Valid values: research, poc, documentation, validation")]
    InvalidWorkflowType(String),

    #[error("Invalid {field} value: '{value}'")]
    InvalidValue { field: &'static str, value: String },

    #[error("Invalid priority {0}: must be between 0 (highest) and 3")]
    InvalidPriority(i32),

    #[error("{field} score {value} is out of range [0, {max}]")]
    ScoreOutOfRange {
        field: &'static str,
        value: f64,
        max: f64,
    },

    #[error("Template '{0}' not found")]
    TemplateNotFound(String),

    #[error("Agent type '{agent_type}' does not declare step '{step}'")]
    UnsupportedStep { agent_type: String, step: String },

    #[error("Invalid status transition: cannot go from '{from}' to '{to}'")]
    InvalidTransition { from: String, to: String },

    #[error("Workflow '{id}' is already {status}")]
    TerminalWorkflow { id: String, status: String },

    #[error("Workflow '{0}' not found")]
    WorkflowNotFound(String),

    #[error("Agent '{agent_type}/{agent_id}' not found")]
    AgentNotFound { agent_type: String, agent_id: String },

    #[error("No agent implementation registered for type '{0}'")]
    UnknownAgentType(String),

    #[error("Agent '{agent_id}' is at capacity ({current}/{max})")]
    AgentAtCapacity {
        agent_id: String,
        current: i64,
        max: i64,
    },

    #[error("No active {0} agent has free capacity")]
    NoAvailableAgent(String),

    #[error("Assignment {0} not found")]
    AssignmentNotFound(i64),

    #[error("Checksum mismatch for migration {version}: ledger has {recorded}, file has {actual}")]
    ChecksumMismatch {
        version: String,
        recorded: String,
        actual: String,
    },

    #[error("Migration {version} failed: {message}")]
    MigrationFailed { version: String, message: String },

    #[error("Migration {0} failed previously. Fix it, then run 'bd-workflow migrate retry {0}'")]
    MigrationPreviouslyFailed(String),

    #[error("Execution failed: {0}")]
    Execution(String),

    #[error("{context}")]
    Store {
        context: String,
        #[source]
        source: rusqlite::Error,
    },

    #[error("{context}")]
    Io {
        context: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, CoordinationError>;

/// Attach operation context to raw store errors.
pub trait StoreContext<T> {
    fn store_context<F: FnOnce() -> String>(self, context: F) -> Result<T>;
}

impl<T> StoreContext<T> for rusqlite::Result<T> {
    fn store_context<F: FnOnce() -> String>(self, context: F) -> Result<T> {
        self.map_err(|source| CoordinationError::Store {
            context: context(),
            source,
        })
    }
}

impl<T> StoreContext<T> for std::io::Result<T> {
    fn store_context<F: FnOnce() -> String>(self, context: F) -> Result<T> {
        self.map_err(|source| CoordinationError::Io {
            context: context(),
            source,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_store_context_wraps_rusqlite_error() {
        let raw: rusqlite::Result<()> = Err(rusqlite::Error::QueryReturnedNoRows);
        let err = raw.store_context(|| "load workflow wf-poc-1".to_string()).unwrap_err();
        assert_eq!(err.to_string(), "load workflow wf-poc-1");

        // The cause is reported once, through the source chain
        let chained = format!("{:#}", anyhow::Error::new(err));
        assert_eq!(chained, "load workflow wf-poc-1: Query returned no rows");
    }

    #[test]
    fn test_score_message_names_range() {
        let err = CoordinationError::ScoreOutOfRange {
            field: "confidence",
            value: 1.5,
            max: 1.0,
        };
        assert_eq!(err.to_string(), "confidence score 1.5 is out of range [0, 1]");
    }
}
