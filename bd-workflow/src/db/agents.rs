use rusqlite::{params, Connection};
use serde::Serialize;

use super::{json_column, parse_column, OptionalExt};
use crate::state::{AgentStatus, AgentType};

/// Registration record for one agent instance.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AgentConfiguration {
    pub agent_type: AgentType,
    pub agent_id: String,
    pub configuration: serde_json::Value,
    pub capabilities: Vec<String>,
    pub max_workload: i64,
    pub current_workload: i64,
    pub status: AgentStatus,
    pub last_heartbeat: Option<String>,
    pub performance_metrics: serde_json::Value,
}

const COLUMNS: &str = "agent_type, agent_id, configuration, capabilities, max_workload, current_workload, status, last_heartbeat, performance_metrics";

/// Register an agent, or refresh an existing registration and mark it active.
///
/// Current workload is preserved across re-registration.
pub fn upsert(
    conn: &Connection,
    agent_type: AgentType,
    agent_id: &str,
    max_workload: i64,
    capabilities: &[String],
    configuration: &serde_json::Value,
    now: &str,
) -> rusqlite::Result<()> {
    let to_sql_err = |e: serde_json::Error| rusqlite::Error::ToSqlConversionFailure(Box::new(e));
    conn.execute(
        "INSERT INTO agent_configurations (agent_type, agent_id, configuration, capabilities, max_workload, current_workload, status, last_heartbeat)
         VALUES (?1, ?2, ?3, ?4, ?5, 0, 'active', ?6)
         ON CONFLICT(agent_type, agent_id) DO UPDATE SET
            configuration = excluded.configuration,
            capabilities = excluded.capabilities,
            max_workload = excluded.max_workload,
            status = 'active',
            last_heartbeat = excluded.last_heartbeat",
        params![
            agent_type.as_str(),
            agent_id,
            serde_json::to_string(configuration).map_err(to_sql_err)?,
            serde_json::to_string(capabilities).map_err(to_sql_err)?,
            max_workload,
            now,
        ],
    )?;
    Ok(())
}

pub fn find(
    conn: &Connection,
    agent_type: AgentType,
    agent_id: &str,
) -> rusqlite::Result<Option<AgentConfiguration>> {
    conn.query_row(
        &format!("SELECT {COLUMNS} FROM agent_configurations WHERE agent_type = ?1 AND agent_id = ?2"),
        params![agent_type.as_str(), agent_id],
        row_to_agent,
    )
    .optional()
}

pub fn list(conn: &Connection, agent_type: Option<AgentType>) -> rusqlite::Result<Vec<AgentConfiguration>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {COLUMNS} FROM agent_configurations
         WHERE ?1 IS NULL OR agent_type = ?1 ORDER BY agent_type, agent_id"
    ))?;
    let rows = stmt.query_map(params![agent_type.map(|t| t.as_str())], row_to_agent)?;
    rows.collect()
}

/// Returns false when no such agent is registered.
pub fn set_status(
    conn: &Connection,
    agent_type: AgentType,
    agent_id: &str,
    status: AgentStatus,
) -> rusqlite::Result<bool> {
    let changed = conn.execute(
        "UPDATE agent_configurations SET status = ?1 WHERE agent_type = ?2 AND agent_id = ?3",
        params![status.as_str(), agent_type.as_str(), agent_id],
    )?;
    Ok(changed == 1)
}

pub fn heartbeat(conn: &Connection, agent_type: AgentType, agent_id: &str, now: &str) -> rusqlite::Result<bool> {
    let changed = conn.execute(
        "UPDATE agent_configurations SET last_heartbeat = ?1 WHERE agent_type = ?2 AND agent_id = ?3",
        params![now, agent_type.as_str(), agent_id],
    )?;
    Ok(changed == 1)
}

/// Take one unit of workload if the agent is active and below its maximum.
///
/// Single conditional UPDATE: the check and the increment cannot interleave
/// with another writer. Returns false when nothing was taken.
pub fn try_acquire(conn: &Connection, agent_type: AgentType, agent_id: &str) -> rusqlite::Result<bool> {
    let changed = conn.execute(
        "UPDATE agent_configurations
         SET current_workload = current_workload + 1
         WHERE agent_type = ?1 AND agent_id = ?2
           AND status = 'active'
           AND current_workload < max_workload",
        params![agent_type.as_str(), agent_id],
    )?;
    Ok(changed == 1)
}

/// Give back one unit of workload. Never drops below zero.
pub fn release(conn: &Connection, agent_type: AgentType, agent_id: &str) -> rusqlite::Result<()> {
    conn.execute(
        "UPDATE agent_configurations
         SET current_workload = MAX(current_workload - 1, 0)
         WHERE agent_type = ?1 AND agent_id = ?2",
        params![agent_type.as_str(), agent_id],
    )?;
    Ok(())
}

/// An agent with room for more work, plus its track record.
#[derive(Debug, Clone, PartialEq)]
pub struct Candidate {
    pub agent: AgentConfiguration,
    pub assignments_total: i64,
    pub assignments_completed: i64,
    /// Mean `execution_time_ms` of results on workflows the agent worked on.
    pub avg_result_ms: Option<f64>,
}

/// Active agents of one type below their maximum workload, least loaded first.
pub fn list_candidates(conn: &Connection, agent_type: AgentType) -> rusqlite::Result<Vec<Candidate>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {COLUMNS},
            (SELECT COUNT(*) FROM agent_assignments aa
             WHERE aa.agent_type = ac.agent_type AND aa.agent_id = ac.agent_id),
            (SELECT COUNT(*) FROM agent_assignments aa
             WHERE aa.agent_type = ac.agent_type AND aa.agent_id = ac.agent_id AND aa.status = 'completed'),
            (SELECT AVG(wr.execution_time_ms) FROM workflow_results wr
             WHERE wr.workflow_id IN (
                SELECT aa.workflow_id FROM agent_assignments aa
                WHERE aa.agent_type = ac.agent_type AND aa.agent_id = ac.agent_id))
         FROM agent_configurations ac
         WHERE ac.agent_type = ?1 AND ac.status = 'active' AND ac.current_workload < ac.max_workload
         ORDER BY ac.current_workload, ac.agent_id"
    ))?;
    let rows = stmt.query_map(params![agent_type.as_str()], |row| {
        Ok(Candidate {
            agent: row_to_agent(row)?,
            assignments_total: row.get(9)?,
            assignments_completed: row.get(10)?,
            avg_result_ms: row.get(11)?,
        })
    })?;
    rows.collect()
}

fn row_to_agent(row: &rusqlite::Row) -> rusqlite::Result<AgentConfiguration> {
    Ok(AgentConfiguration {
        agent_type: parse_column(row, 0)?,
        agent_id: row.get(1)?,
        configuration: json_column(row, 2)?,
        capabilities: json_column(row, 3)?,
        max_workload: row.get(4)?,
        current_workload: row.get(5)?,
        status: parse_column(row, 6)?,
        last_heartbeat: row.get(7)?,
        performance_metrics: json_column(row, 8)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::test_db;
    use crate::state::WorkflowType;

    const NOW: &str = "2026-02-06T00:00:00.000Z";

    fn register(conn: &Connection, id: &str, max: i64) {
        upsert(
            conn,
            WorkflowType::Research,
            id,
            max,
            &["library_discovery".to_string()],
            &serde_json::json!({}),
            NOW,
        )
        .unwrap();
    }

    #[test]
    fn test_upsert_and_find() {
        let conn = test_db();
        register(&conn, "research-agent-1", 3);

        let agent = find(&conn, WorkflowType::Research, "research-agent-1").unwrap().unwrap();
        assert_eq!(agent.max_workload, 3);
        assert_eq!(agent.current_workload, 0);
        assert_eq!(agent.status, AgentStatus::Active);
        assert_eq!(agent.capabilities, vec!["library_discovery"]);

        // Same id under another type is a different agent
        assert!(find(&conn, WorkflowType::Poc, "research-agent-1").unwrap().is_none());
    }

    #[test]
    fn test_reregister_reactivates_and_keeps_workload() {
        let conn = test_db();
        register(&conn, "research-agent-1", 3);
        assert!(try_acquire(&conn, WorkflowType::Research, "research-agent-1").unwrap());
        set_status(&conn, WorkflowType::Research, "research-agent-1", AgentStatus::Inactive).unwrap();

        register(&conn, "research-agent-1", 5);
        let agent = find(&conn, WorkflowType::Research, "research-agent-1").unwrap().unwrap();
        assert_eq!(agent.status, AgentStatus::Active);
        assert_eq!(agent.max_workload, 5);
        assert_eq!(agent.current_workload, 1);

        let count: i64 = conn
            .query_row("SELECT COUNT(*) FROM agent_configurations", [], |row| row.get(0))
            .unwrap();
        assert_eq!(count, 1);
    }

    #[test]
    fn test_acquire_stops_at_max_workload() {
        let conn = test_db();
        register(&conn, "research-agent-1", 2);

        assert!(try_acquire(&conn, WorkflowType::Research, "research-agent-1").unwrap());
        assert!(try_acquire(&conn, WorkflowType::Research, "research-agent-1").unwrap());
        assert!(!try_acquire(&conn, WorkflowType::Research, "research-agent-1").unwrap());

        let agent = find(&conn, WorkflowType::Research, "research-agent-1").unwrap().unwrap();
        assert_eq!(agent.current_workload, 2);

        release(&conn, WorkflowType::Research, "research-agent-1").unwrap();
        assert!(try_acquire(&conn, WorkflowType::Research, "research-agent-1").unwrap());
    }

    #[test]
    fn test_acquire_refuses_inactive_agent() {
        let conn = test_db();
        register(&conn, "research-agent-1", 2);
        set_status(&conn, WorkflowType::Research, "research-agent-1", AgentStatus::Inactive).unwrap();
        assert!(!try_acquire(&conn, WorkflowType::Research, "research-agent-1").unwrap());
    }

    #[test]
    fn test_release_never_goes_negative() {
        let conn = test_db();
        register(&conn, "research-agent-1", 2);
        release(&conn, WorkflowType::Research, "research-agent-1").unwrap();
        let agent = find(&conn, WorkflowType::Research, "research-agent-1").unwrap().unwrap();
        assert_eq!(agent.current_workload, 0);
    }

    #[test]
    fn test_candidates_skip_full_and_inactive_agents() {
        let conn = test_db();
        register(&conn, "research-agent-1", 2);
        register(&conn, "research-agent-2", 1);
        register(&conn, "research-agent-3", 2);
        register(&conn, "research-agent-4", 2);
        assert!(try_acquire(&conn, WorkflowType::Research, "research-agent-1").unwrap());
        assert!(try_acquire(&conn, WorkflowType::Research, "research-agent-2").unwrap());
        set_status(&conn, WorkflowType::Research, "research-agent-4", AgentStatus::Inactive).unwrap();
        upsert(&conn, WorkflowType::Poc, "poc-agent-1", 1, &[], &serde_json::json!({}), NOW).unwrap();

        let ids: Vec<_> = list_candidates(&conn, WorkflowType::Research)
            .unwrap()
            .into_iter()
            .map(|c| c.agent.agent_id)
            .collect();
        assert_eq!(ids, vec!["research-agent-3", "research-agent-1"]);
    }

    #[test]
    fn test_candidate_track_record() {
        use crate::db::{assignments, results, workflows};
        use crate::state::AssignmentStatus;

        let conn = test_db();
        register(&conn, "research-agent-1", 5);
        for (id, ms) in [("wf-research-1", 1000), ("wf-research-2", 3000)] {
            workflows::insert(&conn, &workflows::tests::make_test_workflow(id, WorkflowType::Research)).unwrap();
            let a = assignments::insert_next(&conn, id, WorkflowType::Research, "research-agent-1", "s1", None, NOW)
                .unwrap();
            assignments::insert_next(&conn, id, WorkflowType::Research, "research-agent-1", "s2", None, NOW).unwrap();
            assignments::transition(&conn, a.id, AssignmentStatus::Assigned, AssignmentStatus::Completed, NOW)
                .unwrap();
            let mut result = results::tests::make_test_result(id);
            result.execution_time_ms = ms;
            results::insert(&conn, &result).unwrap();
        }

        let candidates = list_candidates(&conn, WorkflowType::Research).unwrap();
        assert_eq!(candidates.len(), 1);
        assert_eq!(candidates[0].assignments_total, 4);
        assert_eq!(candidates[0].assignments_completed, 2);
        // Each workflow's result counts once, however many steps the agent ran
        assert_eq!(candidates[0].avg_result_ms, Some(2000.0));
    }

    #[test]
    fn test_list_filters_by_type() {
        let conn = test_db();
        register(&conn, "research-agent-1", 2);
        upsert(&conn, WorkflowType::Poc, "poc-agent-1", 1, &[], &serde_json::json!({}), NOW).unwrap();

        assert_eq!(list(&conn, None).unwrap().len(), 2);
        let poc = list(&conn, Some(WorkflowType::Poc)).unwrap();
        assert_eq!(poc.len(), 1);
        assert_eq!(poc[0].agent_id, "poc-agent-1");
    }
}
