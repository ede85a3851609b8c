//! Read-only reports over the coordination store.

use std::collections::BTreeMap;

use chrono::{DateTime, Duration, Utc};
use rusqlite::Connection;
use serde::Serialize;

use crate::db::{self, agents, analytics};
use crate::error::{CoordinationError, Result, StoreContext};
use crate::state::{AgentStatus, AgentType, WorkflowStatus};

/// Parse a reporting window such as `7d` or `12h`.
pub fn parse_period(period: &str) -> Result<Duration> {
    let invalid = || CoordinationError::InvalidValue {
        field: "period",
        value: period.to_string(),
    };
    let trimmed = period.trim();
    let unit = trimmed.chars().last().ok_or_else(invalid)?;
    let n: i64 = trimmed[..trimmed.len() - unit.len_utf8()]
        .parse()
        .map_err(|_| invalid())?;
    if n <= 0 {
        return Err(invalid());
    }
    let window = match unit {
        'd' => Duration::try_days(n),
        'h' => Duration::try_hours(n),
        _ => None,
    };
    // Windows reaching past the representable calendar are rejected here
    window
        .filter(|w| Utc::now().checked_sub_signed(*w).is_some())
        .ok_or_else(invalid)
}

/// Start of a window ending at `now`.
fn window_start(now: DateTime<Utc>, window: Duration) -> Result<DateTime<Utc>> {
    now.checked_sub_signed(window).ok_or_else(|| CoordinationError::InvalidValue {
        field: "period",
        value: format!("{}h", window.num_hours()),
    })
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AgentPerformance {
    pub agent_type: AgentType,
    pub total_workflows: i64,
    pub successful_workflows: i64,
    pub failed_workflows: i64,
    pub success_rate: f64,
    pub avg_execution_time_ms: f64,
    pub avg_confidence_score: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AgentWorkload {
    pub agent_type: AgentType,
    pub agent_id: String,
    pub status: AgentStatus,
    pub current_workload: i64,
    pub max_workload: i64,
    pub assignments_total: i64,
    pub assignments_completed: i64,
    pub assignments_failed: i64,
    pub assignments_in_progress: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Summary {
    pub since: Option<String>,
    pub total_workflows: i64,
    pub by_status: BTreeMap<String, i64>,
    /// completed / (completed + failed); `None` before anything finished.
    pub success_rate: Option<f64>,
    pub avg_execution_time_ms: Option<f64>,
    pub agents: Vec<AgentWorkload>,
}

pub struct Reporter<'a> {
    conn: &'a Connection,
}

impl<'a> Reporter<'a> {
    pub fn new(conn: &'a Connection) -> Self {
        Self { conn }
    }

    /// Per agent type performance over the last `window`.
    pub fn performance(&self, window: Duration, agent_type: Option<AgentType>) -> Result<Vec<AgentPerformance>> {
        self.performance_at(Utc::now(), window, agent_type)
    }

    fn performance_at(
        &self,
        now: DateTime<Utc>,
        window: Duration,
        agent_type: Option<AgentType>,
    ) -> Result<Vec<AgentPerformance>> {
        let since_date = window_start(now, window)?.format("%Y-%m-%d").to_string();
        let rollups = analytics::list_rollups(self.conn, &since_date, agent_type)
            .store_context(|| format!("load analytics since {}", since_date))?;

        let mut by_agent: BTreeMap<AgentType, AgentPerformance> = BTreeMap::new();
        for r in rollups {
            let entry = by_agent.entry(r.agent_type).or_insert(AgentPerformance {
                agent_type: r.agent_type,
                total_workflows: 0,
                successful_workflows: 0,
                failed_workflows: 0,
                success_rate: 0.0,
                avg_execution_time_ms: 0.0,
                avg_confidence_score: 0.0,
            });
            // Running sums; turned into averages below
            entry.avg_execution_time_ms += r.avg_execution_time_ms * r.total_workflows as f64;
            entry.avg_confidence_score += r.avg_confidence_score * r.successful_workflows as f64;
            entry.total_workflows += r.total_workflows;
            entry.successful_workflows += r.successful_workflows;
            entry.failed_workflows += r.failed_workflows;
        }

        Ok(by_agent
            .into_values()
            .map(|mut p| {
                if p.total_workflows > 0 {
                    p.avg_execution_time_ms /= p.total_workflows as f64;
                    p.success_rate = p.successful_workflows as f64 / p.total_workflows as f64;
                }
                if p.successful_workflows > 0 {
                    p.avg_confidence_score /= p.successful_workflows as f64;
                }
                p
            })
            .collect())
    }

    /// Workflow and agent overview. Without a window, covers all history.
    pub fn summary(&self, window: Option<Duration>) -> Result<Summary> {
        let since = window
            .map(|w| window_start(Utc::now(), w).map(db::format_timestamp))
            .transpose()?;
        let since_ref = since.as_deref();

        let counts = analytics::count_by_status(self.conn, since_ref)
            .store_context(|| "count workflows by status".to_string())?;
        let count_of = |status: WorkflowStatus| {
            counts
                .iter()
                .find(|(s, _)| *s == status)
                .map_or(0, |(_, n)| *n)
        };
        let finished = count_of(WorkflowStatus::Completed) + count_of(WorkflowStatus::Failed);
        let success_rate = (finished > 0).then(|| count_of(WorkflowStatus::Completed) as f64 / finished as f64);

        let avg_execution_time_ms = analytics::avg_result_execution_ms(self.conn, since_ref)
            .store_context(|| "average result execution time".to_string())?;

        let assignment_counts = analytics::assignment_counts(self.conn, since_ref)
            .store_context(|| "count agent assignments".to_string())?;
        let agents = agents::list(self.conn, None)
            .store_context(|| "list agents".to_string())?
            .into_iter()
            .map(|a| {
                let counts = assignment_counts
                    .iter()
                    .find(|c| c.agent_type == a.agent_type && c.agent_id == a.agent_id);
                AgentWorkload {
                    assignments_total: counts.map_or(0, |c| c.total),
                    assignments_completed: counts.map_or(0, |c| c.completed),
                    assignments_failed: counts.map_or(0, |c| c.failed),
                    assignments_in_progress: counts.map_or(0, |c| c.in_progress),
                    agent_type: a.agent_type,
                    agent_id: a.agent_id,
                    status: a.status,
                    current_workload: a.current_workload,
                    max_workload: a.max_workload,
                }
            })
            .collect();

        Ok(Summary {
            since,
            total_workflows: counts.iter().map(|(_, n)| n).sum(),
            by_status: counts.iter().map(|(s, n)| (s.to_string(), *n)).collect(),
            success_rate,
            avg_execution_time_ms,
            agents,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::analytics::{merge_rollup, AnalyticsRollup};
    use crate::db::test_db;
    use crate::db::workflows::{self, tests::make_test_workflow};
    use crate::state::WorkflowType;
    use chrono::TimeZone;

    #[test]
    fn test_parse_period() {
        assert_eq!(parse_period("7d").unwrap(), Duration::days(7));
        assert_eq!(parse_period("12h").unwrap(), Duration::hours(12));
        assert_eq!(parse_period(" 30d ").unwrap(), Duration::days(30));
        for bad in ["", "d", "7", "7w", "-1d", "0d", "xd", "7é"] {
            assert!(parse_period(bad).is_err(), "{bad} should be rejected");
        }
    }

    #[test]
    fn test_parse_period_rejects_out_of_range_windows() {
        for huge in ["999999999999d", "99999999d", "9223372036854775807h"] {
            let err = parse_period(huge).unwrap_err();
            assert!(
                matches!(err, CoordinationError::InvalidValue { field: "period", ref value } if value == huge),
                "{huge}: {err}"
            );
        }
        let conn = test_db();
        let err = Reporter::new(&conn)
            .performance_at(Utc::now(), Duration::MAX, None)
            .unwrap_err();
        assert!(matches!(err, CoordinationError::InvalidValue { field: "period", .. }));
    }

    fn rollup(date: &str, agent: AgentType, total: i64, ok: i64, avg_ms: f64, conf: f64) -> AnalyticsRollup {
        AnalyticsRollup {
            date: date.to_string(),
            workflow_type: agent,
            agent_type: agent,
            total_workflows: total,
            successful_workflows: ok,
            failed_workflows: total - ok,
            avg_execution_time_ms: avg_ms,
            avg_confidence_score: conf,
        }
    }

    #[test]
    fn test_performance_combines_days_in_window() {
        let conn = test_db();
        merge_rollup(&conn, &rollup("2026-02-01", AgentType::Poc, 99, 99, 1.0, 1.0)).unwrap();
        merge_rollup(&conn, &rollup("2026-02-05", AgentType::Poc, 1, 1, 100.0, 0.9)).unwrap();
        merge_rollup(&conn, &rollup("2026-02-06", AgentType::Poc, 3, 1, 300.0, 0.6)).unwrap();
        merge_rollup(&conn, &rollup("2026-02-06", AgentType::Research, 2, 2, 50.0, 0.8)).unwrap();

        let now = Utc.with_ymd_and_hms(2026, 2, 6, 12, 0, 0).unwrap();
        let report = Reporter::new(&conn).performance_at(now, Duration::days(2), None).unwrap();
        assert_eq!(report.len(), 2);

        let poc = report.iter().find(|p| p.agent_type == AgentType::Poc).unwrap();
        assert_eq!(poc.total_workflows, 4);
        assert_eq!(poc.successful_workflows, 2);
        assert_eq!(poc.failed_workflows, 2);
        assert!((poc.success_rate - 0.5).abs() < 1e-9);
        assert!((poc.avg_execution_time_ms - 250.0).abs() < 1e-9);
        assert!((poc.avg_confidence_score - 0.75).abs() < 1e-9);

        let only_research = Reporter::new(&conn)
            .performance_at(now, Duration::days(2), Some(AgentType::Research))
            .unwrap();
        assert_eq!(only_research.len(), 1);
    }

    #[test]
    fn test_summary_counts_and_workload() {
        let conn = test_db();
        let mut a = make_test_workflow("wf-a", WorkflowType::Poc);
        a.status = WorkflowStatus::Completed;
        let mut b = make_test_workflow("wf-b", WorkflowType::Poc);
        b.status = WorkflowStatus::Failed;
        let c = make_test_workflow("wf-c", WorkflowType::Research);
        for wf in [&a, &b, &c] {
            workflows::insert(&conn, wf).unwrap();
        }
        agents::upsert(&conn, AgentType::Poc, "poc-1", 3, &[], &serde_json::json!({}), "2026-02-06T00:00:00.000Z").unwrap();
        agents::try_acquire(&conn, AgentType::Poc, "poc-1").unwrap();

        let summary = Reporter::new(&conn).summary(None).unwrap();
        assert_eq!(summary.total_workflows, 3);
        assert_eq!(summary.by_status["active"], 1);
        assert_eq!(summary.success_rate, Some(0.5));
        assert_eq!(summary.avg_execution_time_ms, None);
        assert_eq!(summary.agents.len(), 1);
        assert_eq!(summary.agents[0].current_workload, 1);
        assert_eq!(summary.agents[0].assignments_total, 0);
    }

    #[test]
    fn test_summary_empty_store() {
        let conn = test_db();
        let summary = Reporter::new(&conn).summary(Some(Duration::days(7))).unwrap();
        assert_eq!(summary.total_workflows, 0);
        assert_eq!(summary.success_rate, None);
        assert!(summary.since.is_some());
    }
}
