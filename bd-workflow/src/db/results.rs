use rusqlite::{params, Connection};
use serde::Serialize;

use super::{json_column, parse_column};
use crate::error::{CoordinationError, Result};
use crate::state::{AgentType, ResultType};

/// Durable output of a workflow run. Immutable once written.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WorkflowResult {
    /// Assigned by the store; `None` until written.
    pub id: Option<i64>,
    pub workflow_id: String,
    pub agent_type: AgentType,
    pub result_type: ResultType,
    pub result_data: serde_json::Value,
    pub confidence_score: f64,
    pub execution_time_ms: i64,
    pub artifacts: Vec<String>,
    pub metadata: serde_json::Value,
    pub quality_score: f64,
    pub created_at: String,
}

impl WorkflowResult {
    /// Reject scores outside their ranges. Values are never clamped.
    pub fn validate(&self) -> Result<()> {
        check_range("confidence", self.confidence_score, 1.0)?;
        check_range("quality", self.quality_score, 10.0)?;
        if self.execution_time_ms < 0 {
            return Err(CoordinationError::InvalidValue {
                field: "execution time",
                value: self.execution_time_ms.to_string(),
            });
        }
        Ok(())
    }
}

fn check_range(field: &'static str, value: f64, max: f64) -> Result<()> {
    if value.is_finite() && (0.0..=max).contains(&value) {
        Ok(())
    } else {
        Err(CoordinationError::ScoreOutOfRange { field, value, max })
    }
}

/// Append a result row and return its id.
pub fn insert(conn: &Connection, result: &WorkflowResult) -> rusqlite::Result<i64> {
    let to_sql_err = |e: serde_json::Error| rusqlite::Error::ToSqlConversionFailure(Box::new(e));
    conn.execute(
        "INSERT INTO workflow_results (workflow_id, agent_type, result_type, result_data, confidence_score, execution_time_ms, artifacts, metadata, quality_score, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
        params![
            result.workflow_id,
            result.agent_type.as_str(),
            result.result_type.as_str(),
            serde_json::to_string(&result.result_data).map_err(to_sql_err)?,
            result.confidence_score,
            result.execution_time_ms,
            serde_json::to_string(&result.artifacts).map_err(to_sql_err)?,
            serde_json::to_string(&result.metadata).map_err(to_sql_err)?,
            result.quality_score,
            result.created_at,
        ],
    )?;
    Ok(conn.last_insert_rowid())
}

/// Results for a workflow, oldest first.
pub fn list_by_workflow(conn: &Connection, workflow_id: &str) -> rusqlite::Result<Vec<WorkflowResult>> {
    let mut stmt = conn.prepare(
        "SELECT id, workflow_id, agent_type, result_type, result_data, confidence_score, execution_time_ms, artifacts, metadata, quality_score, created_at
         FROM workflow_results WHERE workflow_id = ?1 ORDER BY id",
    )?;
    let rows = stmt.query_map(params![workflow_id], row_to_result)?;
    rows.collect()
}

fn row_to_result(row: &rusqlite::Row) -> rusqlite::Result<WorkflowResult> {
    Ok(WorkflowResult {
        id: Some(row.get(0)?),
        workflow_id: row.get(1)?,
        agent_type: parse_column(row, 2)?,
        result_type: parse_column(row, 3)?,
        result_data: json_column(row, 4)?,
        confidence_score: row.get(5)?,
        execution_time_ms: row.get(6)?,
        artifacts: json_column(row, 7)?,
        metadata: json_column(row, 8)?,
        quality_score: row.get(9)?,
        created_at: row.get(10)?,
    })
}
