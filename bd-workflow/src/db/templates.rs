use rusqlite::{params, Connection};

use crate::templates::WorkflowTemplate;

/// Count one use of a template, inserting its row on first use.
pub fn record_usage(conn: &Connection, template: &WorkflowTemplate) -> rusqlite::Result<()> {
    let to_sql_err = |e: serde_json::Error| rusqlite::Error::ToSqlConversionFailure(Box::new(e));
    let agent_sequence: Vec<&str> = template.steps.iter().map(|s| s.name).collect();
    conn.execute(
        "INSERT INTO workflow_templates (id, name, description, workflow_type, template_def, agent_sequence, variables, usage_count)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, 1)
         ON CONFLICT(id) DO UPDATE SET usage_count = usage_count + 1",
        params![
            template.id,
            template.name,
            template.description,
            template.workflow_type.as_str(),
            serde_json::to_string(template).map_err(to_sql_err)?,
            serde_json::to_string(&agent_sequence).map_err(to_sql_err)?,
            serde_json::to_string(&template.variables).map_err(to_sql_err)?,
        ],
    )?;
    Ok(())
}

pub fn usage_count(conn: &Connection, id: &str) -> rusqlite::Result<i64> {
    conn.query_row(
        "SELECT COALESCE((SELECT usage_count FROM workflow_templates WHERE id = ?1), 0)",
        params![id],
        |row| row.get(0),
    )
}
