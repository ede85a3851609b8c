use rusqlite::types::Value as SqlValue;
use rusqlite::{params, params_from_iter, Connection};
use serde::{Deserialize, Serialize};

use super::{json_column, parse_column, OptionalExt};
use crate::state::{AgentType, WorkflowStatus, WorkflowType};
use crate::templates::Variables;

/// Free-form workflow metadata, stored as JSON in `workflow_mappings.metadata`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WorkflowMetadata {
    #[serde(default)]
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub agent_type: Option<AgentType>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub template_id: Option<String>,
    #[serde(default)]
    pub variables: Variables,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cancel_reason: Option<String>,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Workflow {
    pub id: String,
    pub issue_id: Option<String>,
    pub workflow_type: WorkflowType,
    pub status: WorkflowStatus,
    pub priority: i32,
    pub metadata: WorkflowMetadata,
    pub parent_workflow_id: Option<String>,
    pub created_at: String,
    pub updated_at: String,
    pub completed_at: Option<String>,
}

impl Workflow {
    /// Agent type serving this workflow; defaults to the workflow type.
    pub fn agent_type(&self) -> AgentType {
        self.metadata.agent_type.unwrap_or(self.workflow_type)
    }

    pub fn title(&self) -> &str {
        &self.metadata.title
    }
}

/// Filters for listing workflows.
#[derive(Debug, Clone)]
pub struct WorkflowFilter {
    pub status: Option<WorkflowStatus>,
    pub workflow_type: Option<WorkflowType>,
    pub agent_type: Option<AgentType>,
    pub limit: usize,
}

impl Default for WorkflowFilter {
    fn default() -> Self {
        Self {
            status: None,
            workflow_type: None,
            agent_type: None,
            limit: 20,
        }
    }
}

const COLUMNS: &str = "tempolite_workflow_id, beads_issue_id, workflow_type, status, priority, metadata, parent_workflow_id, created_at, updated_at, completed_at";

/// Insert a new workflow record.
pub fn insert(conn: &Connection, wf: &Workflow) -> rusqlite::Result<()> {
    let metadata = serde_json::to_string(&wf.metadata)
        .map_err(|e| rusqlite::Error::ToSqlConversionFailure(Box::new(e)))?;
    conn.execute(
        &format!("INSERT INTO workflow_mappings ({COLUMNS}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)"),
        params![
            wf.id,
            wf.issue_id,
            wf.workflow_type.as_str(),
            wf.status.as_str(),
            wf.priority,
            metadata,
            wf.parent_workflow_id,
            wf.created_at,
            wf.updated_at,
            wf.completed_at,
        ],
    )?;
    Ok(())
}

pub fn find(conn: &Connection, id: &str) -> rusqlite::Result<Option<Workflow>> {
    conn.query_row(
        &format!("SELECT {COLUMNS} FROM workflow_mappings WHERE tempolite_workflow_id = ?1"),
        params![id],
        row_to_workflow,
    )
    .optional()
}

pub fn find_status(conn: &Connection, id: &str) -> rusqlite::Result<Option<WorkflowStatus>> {
    conn.query_row(
        "SELECT status FROM workflow_mappings WHERE tempolite_workflow_id = ?1",
        params![id],
        |row| parse_column(row, 0),
    )
    .optional()
}

/// Move a workflow from `expected` to `status`.
///
/// Compare-and-set on the current status: returns false when another writer
/// changed the status first.
pub fn transition_status(
    conn: &Connection,
    id: &str,
    expected: WorkflowStatus,
    status: WorkflowStatus,
    now: &str,
) -> rusqlite::Result<bool> {
    let completed_at = status.is_terminal().then_some(now);
    let changed = conn.execute(
        "UPDATE workflow_mappings
         SET status = ?1, updated_at = ?2, completed_at = COALESCE(?3, completed_at)
         WHERE tempolite_workflow_id = ?4 AND status = ?5",
        params![status.as_str(), now, completed_at, id, expected.as_str()],
    )?;
    Ok(changed == 1)
}

pub fn update_metadata(
    conn: &Connection,
    id: &str,
    metadata: &WorkflowMetadata,
    now: &str,
) -> rusqlite::Result<()> {
    let metadata = serde_json::to_string(metadata)
        .map_err(|e| rusqlite::Error::ToSqlConversionFailure(Box::new(e)))?;
    conn.execute(
        "UPDATE workflow_mappings SET metadata = ?1, updated_at = ?2 WHERE tempolite_workflow_id = ?3",
        params![metadata, now, id],
    )?;
    Ok(())
}

/// List workflows matching the filter, newest first.
///
/// The agent type filter matches the workflow's configured agent or any agent
/// that holds an assignment on it.
pub fn list(conn: &Connection, filter: &WorkflowFilter) -> rusqlite::Result<Vec<Workflow>> {
    let mut clauses: Vec<&str> = Vec::new();
    let mut values: Vec<SqlValue> = Vec::new();

    if let Some(status) = filter.status {
        clauses.push("status = ?");
        values.push(SqlValue::Text(status.as_str().to_string()));
    }
    if let Some(workflow_type) = filter.workflow_type {
        clauses.push("workflow_type = ?");
        values.push(SqlValue::Text(workflow_type.as_str().to_string()));
    }
    if let Some(agent_type) = filter.agent_type {
        clauses.push(
            "(COALESCE(json_extract(metadata, '$.agent_type'), workflow_type) = ?
              OR EXISTS (SELECT 1 FROM agent_assignments a
                         WHERE a.workflow_id = tempolite_workflow_id AND a.agent_type = ?))",
        );
        values.push(SqlValue::Text(agent_type.as_str().to_string()));
        values.push(SqlValue::Text(agent_type.as_str().to_string()));
    }

    let where_sql = if clauses.is_empty() {
        String::new()
    } else {
        format!("WHERE {}", clauses.join(" AND "))
    };
    values.push(SqlValue::Integer(filter.limit as i64));

    let mut stmt = conn.prepare(&format!(
        "SELECT {COLUMNS} FROM workflow_mappings {where_sql}
         ORDER BY created_at DESC, rowid DESC LIMIT ?"
    ))?;
    let rows = stmt.query_map(params_from_iter(values.iter()), row_to_workflow)?;
    rows.collect()
}

/// Ids of workflows that were running or paused, oldest first.
pub fn list_unfinished_ids(conn: &Connection) -> rusqlite::Result<Vec<String>> {
    let mut stmt = conn.prepare(
        "SELECT tempolite_workflow_id FROM workflow_mappings
         WHERE status IN ('active', 'paused') ORDER BY created_at, rowid",
    )?;
    let rows = stmt.query_map([], |row| row.get(0))?;
    rows.collect()
}

fn row_to_workflow(row: &rusqlite::Row) -> rusqlite::Result<Workflow> {
    Ok(Workflow {
        id: row.get(0)?,
        issue_id: row.get(1)?,
        workflow_type: parse_column(row, 2)?,
        status: parse_column(row, 3)?,
        priority: row.get(4)?,
        metadata: json_column(row, 5)?,
        parent_workflow_id: row.get(6)?,
        created_at: row.get(7)?,
        updated_at: row.get(8)?,
        completed_at: row.get(9)?,
    })
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::db::test_db;

    pub(crate) fn make_test_workflow(id: &str, workflow_type: WorkflowType) -> Workflow {
        Workflow {
            id: id.to_string(),
            issue_id: Some("bd-42".to_string()),
            workflow_type,
            status: WorkflowStatus::Active,
            priority: 2,
            metadata: WorkflowMetadata {
                title: "Build auth module".to_string(),
                ..Default::default()
            },
            parent_workflow_id: None,
            created_at: "2026-02-06T00:00:00.000Z".to_string(),
            updated_at: "2026-02-06T00:00:00.000Z".to_string(),
            completed_at: None,
        }
    }

    #[test]
    fn test_insert_and_find() {
        let conn = test_db();
        let mut wf = make_test_workflow("wf-poc-00000001", WorkflowType::Poc);
        wf.metadata.variables.insert("language".to_string(), "go".into());
        insert(&conn, &wf).expect("insert should succeed");

        let found = find(&conn, "wf-poc-00000001").unwrap().unwrap();
        assert_eq!(found, wf);
        assert_eq!(found.agent_type(), WorkflowType::Poc);

        assert!(find(&conn, "wf-missing").unwrap().is_none());
    }

    #[test]
    fn test_metadata_keeps_unknown_keys() {
        let conn = test_db();
        let mut wf = make_test_workflow("wf-research-1", WorkflowType::Research);
        wf.metadata
            .extra
            .insert("source".to_string(), serde_json::json!("import"));
        insert(&conn, &wf).unwrap();

        let found = find(&conn, "wf-research-1").unwrap().unwrap();
        assert_eq!(found.metadata.extra["source"], "import");
    }

    #[test]
    fn test_transition_status_is_compare_and_set() {
        let conn = test_db();
        let wf = make_test_workflow("wf-poc-1", WorkflowType::Poc);
        insert(&conn, &wf).unwrap();

        let now = "2026-02-06T01:00:00.000Z";
        assert!(transition_status(&conn, &wf.id, WorkflowStatus::Active, WorkflowStatus::Completed, now).unwrap());
        // Stale expectation loses
        assert!(!transition_status(&conn, &wf.id, WorkflowStatus::Active, WorkflowStatus::Failed, now).unwrap());

        let found = find(&conn, &wf.id).unwrap().unwrap();
        assert_eq!(found.status, WorkflowStatus::Completed);
        assert_eq!(found.completed_at.as_deref(), Some(now));
    }

    #[test]
    fn test_pause_does_not_stamp_completion() {
        let conn = test_db();
        let wf = make_test_workflow("wf-poc-1", WorkflowType::Poc);
        insert(&conn, &wf).unwrap();

        transition_status(&conn, &wf.id, WorkflowStatus::Active, WorkflowStatus::Paused, "2026-02-06T01:00:00.000Z").unwrap();
        let found = find(&conn, &wf.id).unwrap().unwrap();
        assert_eq!(found.status, WorkflowStatus::Paused);
        assert!(found.completed_at.is_none());
    }

    #[test]
    fn test_list_filters_and_orders() {
        let conn = test_db();
        let mut a = make_test_workflow("wf-research-a", WorkflowType::Research);
        a.created_at = "2026-02-06T00:00:00.000Z".to_string();
        let mut b = make_test_workflow("wf-poc-b", WorkflowType::Poc);
        b.created_at = "2026-02-06T01:00:00.000Z".to_string();
        b.status = WorkflowStatus::Completed;
        let mut c = make_test_workflow("wf-poc-c", WorkflowType::Poc);
        c.created_at = "2026-02-06T02:00:00.000Z".to_string();
        c.metadata.agent_type = Some(WorkflowType::Validation);
        for wf in [&a, &b, &c] {
            insert(&conn, wf).unwrap();
        }

        let all = list(&conn, &WorkflowFilter::default()).unwrap();
        let ids: Vec<_> = all.iter().map(|w| w.id.as_str()).collect();
        assert_eq!(ids, vec!["wf-poc-c", "wf-poc-b", "wf-research-a"]);

        let active = list(
            &conn,
            &WorkflowFilter {
                status: Some(WorkflowStatus::Active),
                ..Default::default()
            },
        )
        .unwrap();
        assert_eq!(active.len(), 2);

        let validation = list(
            &conn,
            &WorkflowFilter {
                agent_type: Some(WorkflowType::Validation),
                ..Default::default()
            },
        )
        .unwrap();
        assert_eq!(validation.len(), 1);
        assert_eq!(validation[0].id, "wf-poc-c");

        let limited = list(
            &conn,
            &WorkflowFilter {
                limit: 1,
                ..Default::default()
            },
        )
        .unwrap();
        assert_eq!(limited.len(), 1);
    }

    #[test]
    fn test_list_unfinished_ids() {
        let conn = test_db();
        let a = make_test_workflow("wf-a", WorkflowType::Poc);
        let mut b = make_test_workflow("wf-b", WorkflowType::Poc);
        b.status = WorkflowStatus::Cancelled;
        let mut c = make_test_workflow("wf-c", WorkflowType::Poc);
        c.status = WorkflowStatus::Paused;
        for wf in [&a, &b, &c] {
            insert(&conn, wf).unwrap();
        }
        assert_eq!(list_unfinished_ids(&conn).unwrap(), vec!["wf-a", "wf-c"]);
    }
}
