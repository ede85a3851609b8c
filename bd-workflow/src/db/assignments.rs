use rusqlite::{params, Connection};
use serde::Serialize;

use super::{parse_column, OptionalExt};
use crate::state::{AgentType, AssignmentStatus};

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Assignment {
    pub id: i64,
    pub workflow_id: String,
    pub agent_type: AgentType,
    pub agent_id: String,
    pub step_number: i64,
    pub step_name: String,
    pub assigned_at: String,
    pub started_at: Option<String>,
    pub completed_at: Option<String>,
    pub status: AssignmentStatus,
    pub handoff_from: Option<String>,
    pub handoff_to: Option<String>,
}

const COLUMNS: &str = "id, workflow_id, agent_type, agent_id, step_number, step_name, assigned_at, started_at, completed_at, status, handoff_from, handoff_to";

/// Insert an assignment as the workflow's next step.
///
/// The step number is computed in the same statement as the insert, so numbers
/// stay contiguous from 1 even with concurrent writers.
pub fn insert_next(
    conn: &Connection,
    workflow_id: &str,
    agent_type: AgentType,
    agent_id: &str,
    step_name: &str,
    handoff_from: Option<&str>,
    now: &str,
) -> rusqlite::Result<Assignment> {
    conn.execute(
        "INSERT INTO agent_assignments (workflow_id, agent_type, agent_id, step_number, step_name, assigned_at, status, handoff_from)
         SELECT ?1, ?2, ?3, COALESCE(MAX(step_number), 0) + 1, ?4, ?5, 'assigned', ?6
         FROM agent_assignments WHERE workflow_id = ?1",
        params![workflow_id, agent_type.as_str(), agent_id, step_name, now, handoff_from],
    )?;
    let id = conn.last_insert_rowid();
    find(conn, id)?.ok_or(rusqlite::Error::QueryReturnedNoRows)
}

pub fn find(conn: &Connection, id: i64) -> rusqlite::Result<Option<Assignment>> {
    conn.query_row(
        &format!("SELECT {COLUMNS} FROM agent_assignments WHERE id = ?1"),
        params![id],
        row_to_assignment,
    )
    .optional()
}

/// Move an assignment from `expected` to `status`, stamping the matching timestamp.
///
/// Returns false when the assignment was no longer in `expected`.
pub fn transition(
    conn: &Connection,
    id: i64,
    expected: AssignmentStatus,
    status: AssignmentStatus,
    now: &str,
) -> rusqlite::Result<bool> {
    let started_at = (status == AssignmentStatus::Started).then_some(now);
    let completed_at = status.is_finished().then_some(now);
    let changed = conn.execute(
        "UPDATE agent_assignments
         SET status = ?1,
             started_at = COALESCE(?2, started_at),
             completed_at = COALESCE(?3, completed_at)
         WHERE id = ?4 AND status = ?5",
        params![status.as_str(), started_at, completed_at, id, expected.as_str()],
    )?;
    Ok(changed == 1)
}

pub fn set_handoff_to(conn: &Connection, id: i64, to_agent_id: &str) -> rusqlite::Result<()> {
    conn.execute(
        "UPDATE agent_assignments SET handoff_to = ?1 WHERE id = ?2",
        params![to_agent_id, id],
    )?;
    Ok(())
}

/// All assignments of a workflow, in step order.
pub fn list_by_workflow(conn: &Connection, workflow_id: &str) -> rusqlite::Result<Vec<Assignment>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {COLUMNS} FROM agent_assignments WHERE workflow_id = ?1 ORDER BY step_number"
    ))?;
    let rows = stmt.query_map(params![workflow_id], row_to_assignment)?;
    rows.collect()
}

/// Assignments of a workflow that have not finished yet.
pub fn list_open_by_workflow(
    conn: &Connection,
    workflow_id: &str,
) -> rusqlite::Result<Vec<Assignment>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {COLUMNS} FROM agent_assignments
         WHERE workflow_id = ?1 AND status IN ('assigned', 'started') ORDER BY step_number"
    ))?;
    let rows = stmt.query_map(params![workflow_id], row_to_assignment)?;
    rows.collect()
}

/// Unfinished assignments held by one agent instance, oldest first.
pub fn list_open_by_agent(
    conn: &Connection,
    agent_type: AgentType,
    agent_id: &str,
) -> rusqlite::Result<Vec<Assignment>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {COLUMNS} FROM agent_assignments
         WHERE agent_type = ?1 AND agent_id = ?2 AND status IN ('assigned', 'started')
         ORDER BY assigned_at, id"
    ))?;
    let rows = stmt.query_map(params![agent_type.as_str(), agent_id], row_to_assignment)?;
    rows.collect()
}

pub fn list_by_status(conn: &Connection, status: AssignmentStatus) -> rusqlite::Result<Vec<Assignment>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {COLUMNS} FROM agent_assignments WHERE status = ?1 ORDER BY workflow_id, step_number"
    ))?;
    let rows = stmt.query_map(params![status.as_str()], row_to_assignment)?;
    rows.collect()
}

/// The step an agent is currently working on within a workflow, if any.
pub fn find_started(
    conn: &Connection,
    workflow_id: &str,
    agent_id: &str,
) -> rusqlite::Result<Option<Assignment>> {
    conn.query_row(
        &format!(
            "SELECT {COLUMNS} FROM agent_assignments
             WHERE workflow_id = ?1 AND agent_id = ?2 AND status = 'started'
             ORDER BY step_number DESC LIMIT 1"
        ),
        params![workflow_id, agent_id],
        row_to_assignment,
    )
    .optional()
}

fn row_to_assignment(row: &rusqlite::Row) -> rusqlite::Result<Assignment> {
    Ok(Assignment {
        id: row.get(0)?,
        workflow_id: row.get(1)?,
        agent_type: parse_column(row, 2)?,
        agent_id: row.get(3)?,
        step_number: row.get(4)?,
        step_name: row.get(5)?,
        assigned_at: row.get(6)?,
        started_at: row.get(7)?,
        completed_at: row.get(8)?,
        status: parse_column(row, 9)?,
        handoff_from: row.get(10)?,
        handoff_to: row.get(11)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::test_db;
    use crate::db::workflows::{self, tests::make_test_workflow};
    use crate::state::WorkflowType;

    const NOW: &str = "2026-02-06T00:00:00.000Z";

    fn setup() -> Connection {
        let conn = test_db();
        workflows::insert(&conn, &make_test_workflow("wf-poc-1", WorkflowType::Poc)).unwrap();
        workflows::insert(&conn, &make_test_workflow("wf-poc-2", WorkflowType::Poc)).unwrap();
        conn
    }

    #[test]
    fn test_step_numbers_are_contiguous_per_workflow() {
        let conn = setup();
        for step in ["setup_environment", "build_code", "run_tests"] {
            insert_next(&conn, "wf-poc-1", WorkflowType::Poc, "poc-agent-1", step, None, NOW).unwrap();
        }
        let other = insert_next(&conn, "wf-poc-2", WorkflowType::Poc, "poc-agent-1", "build_code", None, NOW).unwrap();
        assert_eq!(other.step_number, 1);

        let steps: Vec<i64> = list_by_workflow(&conn, "wf-poc-1")
            .unwrap()
            .iter()
            .map(|a| a.step_number)
            .collect();
        assert_eq!(steps, vec![1, 2, 3]);
    }

    #[test]
    fn test_insert_requires_existing_workflow() {
        let conn = setup();
        let result = insert_next(&conn, "wf-missing", WorkflowType::Poc, "poc-agent-1", "build_code", None, NOW);
        assert!(result.is_err());
    }

    #[test]
    fn test_transition_stamps_times() {
        let conn = setup();
        let a = insert_next(&conn, "wf-poc-1", WorkflowType::Poc, "poc-agent-1", "build_code", None, NOW).unwrap();
        assert_eq!(a.status, AssignmentStatus::Assigned);

        let later = "2026-02-06T00:05:00.000Z";
        assert!(transition(&conn, a.id, AssignmentStatus::Assigned, AssignmentStatus::Started, later).unwrap());
        let started = find(&conn, a.id).unwrap().unwrap();
        assert_eq!(started.started_at.as_deref(), Some(later));
        assert!(started.completed_at.is_none());
        assert_eq!(find_started(&conn, "wf-poc-1", "poc-agent-1").unwrap().unwrap().id, a.id);

        assert!(transition(&conn, a.id, AssignmentStatus::Started, AssignmentStatus::Completed, later).unwrap());
        // Already completed: a second finish does nothing
        assert!(!transition(&conn, a.id, AssignmentStatus::Started, AssignmentStatus::Failed, later).unwrap());

        let done = find(&conn, a.id).unwrap().unwrap();
        assert_eq!(done.status, AssignmentStatus::Completed);
        assert_eq!(done.completed_at.as_deref(), Some(later));
        assert!(list_open_by_workflow(&conn, "wf-poc-1").unwrap().is_empty());
    }

    #[test]
    fn test_open_by_agent_spans_workflows() {
        let conn = setup();
        let a = insert_next(&conn, "wf-poc-1", WorkflowType::Poc, "poc-agent-1", "build_code", None, NOW).unwrap();
        insert_next(&conn, "wf-poc-2", WorkflowType::Poc, "poc-agent-1", "run_tests", None, NOW).unwrap();
        insert_next(&conn, "wf-poc-2", WorkflowType::Poc, "poc-agent-2", "run_tests", None, NOW).unwrap();
        transition(&conn, a.id, AssignmentStatus::Assigned, AssignmentStatus::Cancelled, NOW).unwrap();

        let open = list_open_by_agent(&conn, WorkflowType::Poc, "poc-agent-1").unwrap();
        assert_eq!(open.len(), 1);
        assert_eq!(open[0].workflow_id, "wf-poc-2");
    }
}
