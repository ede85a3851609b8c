use rusqlite::{params, Connection};
use serde::Serialize;

use super::parse_column;
use crate::state::{AgentType, WorkflowStatus, WorkflowType};

/// One (date, workflow type, agent type) bucket of `workflow_analytics`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AnalyticsRollup {
    pub date: String,
    pub workflow_type: WorkflowType,
    pub agent_type: AgentType,
    pub total_workflows: i64,
    pub successful_workflows: i64,
    pub failed_workflows: i64,
    pub avg_execution_time_ms: f64,
    /// Averaged over successful workflows only.
    pub avg_confidence_score: f64,
}

/// Assignment totals for one agent instance.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AgentAssignmentCounts {
    pub agent_type: AgentType,
    pub agent_id: String,
    pub total: i64,
    pub completed: i64,
    pub failed: i64,
    pub in_progress: i64,
}

/// Merge a rollup into its bucket.
///
/// Counts are added. Averages are merged weighted by the counts they were
/// taken over, so flushing the same day twice accumulates instead of
/// overwriting.
pub fn merge_rollup(conn: &Connection, rollup: &AnalyticsRollup) -> rusqlite::Result<()> {
    conn.execute(
        "INSERT INTO workflow_analytics (date, workflow_type, agent_type, total_workflows, successful_workflows, failed_workflows, avg_execution_time_ms, avg_confidence_score)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
         ON CONFLICT(date, workflow_type, agent_type) DO UPDATE SET
            avg_execution_time_ms = CASE
                WHEN total_workflows + excluded.total_workflows = 0 THEN 0.0
                ELSE (avg_execution_time_ms * total_workflows + excluded.avg_execution_time_ms * excluded.total_workflows)
                     / (total_workflows + excluded.total_workflows)
            END,
            avg_confidence_score = CASE
                WHEN successful_workflows + excluded.successful_workflows = 0 THEN 0.0
                ELSE (avg_confidence_score * successful_workflows + excluded.avg_confidence_score * excluded.successful_workflows)
                     / (successful_workflows + excluded.successful_workflows)
            END,
            total_workflows = total_workflows + excluded.total_workflows,
            successful_workflows = successful_workflows + excluded.successful_workflows,
            failed_workflows = failed_workflows + excluded.failed_workflows",
        params![
            rollup.date,
            rollup.workflow_type.as_str(),
            rollup.agent_type.as_str(),
            rollup.total_workflows,
            rollup.successful_workflows,
            rollup.failed_workflows,
            rollup.avg_execution_time_ms,
            rollup.avg_confidence_score,
        ],
    )?;
    Ok(())
}

/// Rollups dated on or after `since_date` (`YYYY-MM-DD`).
pub fn list_rollups(
    conn: &Connection,
    since_date: &str,
    agent_type: Option<AgentType>,
) -> rusqlite::Result<Vec<AnalyticsRollup>> {
    let mut stmt = conn.prepare(
        "SELECT date, workflow_type, agent_type, total_workflows, successful_workflows, failed_workflows, avg_execution_time_ms, avg_confidence_score
         FROM workflow_analytics
         WHERE date >= ?1 AND (?2 IS NULL OR agent_type = ?2)
         ORDER BY date, workflow_type, agent_type",
    )?;
    let rows = stmt.query_map(params![since_date, agent_type.map(|t| t.as_str())], |row| {
        Ok(AnalyticsRollup {
            date: row.get(0)?,
            workflow_type: parse_column(row, 1)?,
            agent_type: parse_column(row, 2)?,
            total_workflows: row.get(3)?,
            successful_workflows: row.get(4)?,
            failed_workflows: row.get(5)?,
            avg_execution_time_ms: row.get(6)?,
            avg_confidence_score: row.get(7)?,
        })
    })?;
    rows.collect()
}

/// Workflow counts per status for workflows created at or after `since`.
pub fn count_by_status(
    conn: &Connection,
    since: Option<&str>,
) -> rusqlite::Result<Vec<(WorkflowStatus, i64)>> {
    let mut stmt = conn.prepare(
        "SELECT status, COUNT(*) FROM workflow_mappings
         WHERE ?1 IS NULL OR created_at >= ?1
         GROUP BY status ORDER BY status",
    )?;
    let rows = stmt.query_map(params![since], |row| Ok((parse_column(row, 0)?, row.get(1)?)))?;
    rows.collect()
}

/// Mean execution time over results created at or after `since`.
pub fn avg_result_execution_ms(conn: &Connection, since: Option<&str>) -> rusqlite::Result<Option<f64>> {
    conn.query_row(
        "SELECT AVG(execution_time_ms) FROM workflow_results WHERE ?1 IS NULL OR created_at >= ?1",
        params![since],
        |row| row.get(0),
    )
}

/// Per-agent assignment totals for assignments made at or after `since`.
pub fn assignment_counts(
    conn: &Connection,
    since: Option<&str>,
) -> rusqlite::Result<Vec<AgentAssignmentCounts>> {
    let mut stmt = conn.prepare(
        "SELECT agent_type, agent_id, COUNT(*),
                SUM(CASE WHEN status = 'completed' THEN 1 ELSE 0 END),
                SUM(CASE WHEN status = 'failed' THEN 1 ELSE 0 END),
                SUM(CASE WHEN status IN ('assigned', 'started') THEN 1 ELSE 0 END)
         FROM agent_assignments
         WHERE ?1 IS NULL OR assigned_at >= ?1
         GROUP BY agent_type, agent_id ORDER BY agent_type, agent_id",
    )?;
    let rows = stmt.query_map(params![since], |row| {
        Ok(AgentAssignmentCounts {
            agent_type: parse_column(row, 0)?,
            agent_id: row.get(1)?,
            total: row.get(2)?,
            completed: row.get(3)?,
            failed: row.get(4)?,
            in_progress: row.get(5)?,
        })
    })?;
    rows.collect()
}
