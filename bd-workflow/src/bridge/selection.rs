//! Choosing agents for new work and spotting overloaded ones.
//!
//! Candidates are active agents with a free slot. Each is scored from three
//! signals, higher is better:
//!
//! - availability (40%): free slots over maximum workload
//! - success rate (35%): completed assignments over all assignments, 1.0 with no history
//! - speed (25%): `1 - avg_ms / 10min`, floored at 0, 1.0 with no results yet

use std::cmp::Ordering;

use serde::Serialize;
use tracing::debug;

use super::Bridge;
use crate::db::agents::{self, Candidate};
use crate::db::{self, results};
use crate::error::{CoordinationError, Result, StoreContext};
use crate::state::{AgentStatus, AgentType};

const AVAILABILITY_WEIGHT: f64 = 0.40;
const SUCCESS_WEIGHT: f64 = 0.35;
const SPEED_WEIGHT: f64 = 0.25;
/// Average durations at or beyond this score zero for speed.
const SLOW_MS: f64 = 600_000.0;

/// Load at or above which an agent is overloaded.
const OVERLOADED: f64 = 0.8;
/// Load below which an agent can take work off an overloaded peer.
const UNDERLOADED: f64 = 0.5;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AgentScore {
    pub agent_type: AgentType,
    pub agent_id: String,
    pub score: f64,
    pub current_workload: i64,
    pub max_workload: i64,
    pub available_slots: i64,
    pub success_rate: f64,
    pub avg_duration_ms: Option<f64>,
    pub reason: String,
}

impl AgentScore {
    fn from_candidate(c: Candidate) -> Self {
        let agent = c.agent;
        let available_slots = agent.max_workload - agent.current_workload;
        let success_rate = if c.assignments_total > 0 {
            c.assignments_completed as f64 / c.assignments_total as f64
        } else {
            1.0
        };
        let score = score(available_slots, agent.max_workload, success_rate, c.avg_result_ms);
        let timing = c
            .avg_result_ms
            .map_or_else(|| "no timing history".to_string(), |ms| format!("avg {:.0}ms", ms));
        Self {
            reason: format!(
                "selected {} (score={:.2}): {}/{} slots used, {:.0}% success rate, {}",
                agent.agent_id,
                score,
                agent.current_workload,
                agent.max_workload,
                success_rate * 100.0,
                timing
            ),
            agent_type: agent.agent_type,
            agent_id: agent.agent_id,
            score,
            current_workload: agent.current_workload,
            max_workload: agent.max_workload,
            available_slots,
            success_rate,
            avg_duration_ms: c.avg_result_ms,
        }
    }
}

fn score(available_slots: i64, max_workload: i64, success_rate: f64, avg_ms: Option<f64>) -> f64 {
    let availability = if max_workload > 0 {
        available_slots as f64 / max_workload as f64
    } else {
        0.0
    };
    let speed = avg_ms.map_or(1.0, |ms| (1.0 - ms / SLOW_MS).max(0.0));
    availability * AVAILABILITY_WEIGHT + success_rate * SUCCESS_WEIGHT + speed * SPEED_WEIGHT
}

/// Where a workflow should go next.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HandoffPlan {
    pub workflow_id: String,
    pub from_agent_id: String,
    pub to_agent_type: AgentType,
    pub to_agent_id: String,
    pub score: f64,
    pub reason: String,
    /// Results already stored for the workflow.
    pub result_count: usize,
    pub planned_at: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RebalanceSuggestion {
    pub agent_type: AgentType,
    pub from_agent_id: String,
    pub to_agent_id: String,
    pub from_load_percent: f64,
    pub to_load_percent: f64,
    pub reason: String,
}

impl Bridge {
    /// Highest scoring active agent of `agent_type` with a free slot.
    /// Ties go to the less loaded agent, then the lower id.
    pub fn select_agent(&self, agent_type: AgentType) -> Result<AgentScore> {
        self.best_agent(agent_type, None)
    }

    fn best_agent(&self, agent_type: AgentType, exclude: Option<&str>) -> Result<AgentScore> {
        let candidates = agents::list_candidates(&self.conn, agent_type)
            .store_context(|| format!("load {} agent candidates", agent_type))?;

        let mut best: Option<AgentScore> = None;
        for scored in candidates
            .into_iter()
            .filter(|c| Some(c.agent.agent_id.as_str()) != exclude)
            .map(AgentScore::from_candidate)
        {
            if best.as_ref().map_or(true, |b| scored.score > b.score) {
                best = Some(scored);
            }
        }
        let best = best.ok_or_else(|| CoordinationError::NoAvailableAgent(agent_type.to_string()))?;
        debug!(agent_type = %agent_type, agent_id = %best.agent_id, score = best.score, "agent selected");
        Ok(best)
    }

    /// Pick the agent a workflow should be handed to. Read-only: carry the
    /// plan out with [`Bridge::coordinate_handoff`].
    pub fn plan_handoff(&self, workflow_id: &str, from_agent_id: &str, to_agent_type: AgentType) -> Result<HandoffPlan> {
        let status = self.workflow_status(workflow_id)?;
        if status.is_terminal() {
            return Err(CoordinationError::TerminalWorkflow {
                id: workflow_id.to_string(),
                status: status.to_string(),
            });
        }
        let target = self.best_agent(to_agent_type, Some(from_agent_id))?;
        let result_count = results::list_by_workflow(&self.conn, workflow_id)
            .store_context(|| format!("load results of workflow {}", workflow_id))?
            .len();

        Ok(HandoffPlan {
            workflow_id: workflow_id.to_string(),
            from_agent_id: from_agent_id.to_string(),
            to_agent_type: target.agent_type,
            to_agent_id: target.agent_id,
            score: target.score,
            reason: target.reason,
            result_count,
            planned_at: db::now(),
        })
    }

    /// Pair each overloaded agent with the most loaded same-type peer that is
    /// still under half load. Suggestions only; nothing is moved.
    pub fn rebalance_agents(&self) -> Result<Vec<RebalanceSuggestion>> {
        let mut loads: Vec<(AgentType, String, f64)> = agents::list(&self.conn, None)
            .store_context(|| "list agents".to_string())?
            .into_iter()
            .filter(|a| a.status == AgentStatus::Active)
            .map(|a| {
                let load = if a.max_workload > 0 {
                    a.current_workload as f64 / a.max_workload as f64
                } else {
                    0.0
                };
                (a.agent_type, a.agent_id, load)
            })
            .collect();
        loads.sort_by(|a, b| b.2.partial_cmp(&a.2).unwrap_or(Ordering::Equal));

        let mut suggestions = Vec::new();
        for (agent_type, from, from_load) in loads.iter().filter(|(_, _, load)| *load >= OVERLOADED) {
            let peer = loads
                .iter()
                .find(|(t, id, load)| t == agent_type && id != from && *load < UNDERLOADED);
            if let Some((_, to, to_load)) = peer {
                suggestions.push(RebalanceSuggestion {
                    agent_type: *agent_type,
                    from_agent_id: from.clone(),
                    to_agent_id: to.clone(),
                    from_load_percent: from_load * 100.0,
                    to_load_percent: to_load * 100.0,
                    reason: format!(
                        "{} is at {:.0}% load, {} is at {:.0}% load",
                        from,
                        from_load * 100.0,
                        to,
                        to_load * 100.0
                    ),
                });
            }
        }
        Ok(suggestions)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bridge::tests::test_bridge;
    use crate::bridge::StartRequest;
    use crate::db::results::tests::make_test_result;
    use crate::state::{WorkflowStatus, WorkflowType};

    fn register(bridge: &Bridge, agent_type: AgentType, id: &str, max: i64, load: i64) {
        bridge.register_agent(agent_type, id, Some(max), &[]).unwrap();
        for _ in 0..load {
            assert!(agents::try_acquire(bridge.conn(), agent_type, id).unwrap());
        }
    }

    #[test]
    fn test_score_weights() {
        assert!((score(5, 5, 1.0, None) - 1.0).abs() < 1e-9);
        assert!((score(2, 4, 0.5, Some(300_000.0)) - 0.5).abs() < 1e-9);
        // Slower than ten minutes earns nothing for speed
        assert!((score(0, 4, 1.0, Some(900_000.0)) - 0.35).abs() < 1e-9);
        assert_eq!(score(0, 0, 0.0, Some(SLOW_MS)), 0.0);
    }

    #[test]
    fn test_select_prefers_free_capacity() {
        let bridge = test_bridge();
        register(&bridge, AgentType::Poc, "poc-busy", 4, 3);
        register(&bridge, AgentType::Poc, "poc-idle", 4, 0);
        register(&bridge, AgentType::Research, "research-1", 4, 0);

        let best = bridge.select_agent(AgentType::Poc).unwrap();
        assert_eq!(best.agent_id, "poc-idle");
        assert_eq!(best.available_slots, 4);
        assert_eq!(best.success_rate, 1.0);
        assert!((best.score - 1.0).abs() < 1e-9);
        assert!(best.reason.starts_with("selected poc-idle (score=1.00): 0/4 slots used"));
    }

    #[test]
    fn test_select_weighs_track_record() {
        let bridge = test_bridge();
        register(&bridge, AgentType::Poc, "poc-flaky", 4, 0);
        register(&bridge, AgentType::Poc, "poc-steady", 4, 0);

        let wf = bridge
            .start_workflow(StartRequest::new(WorkflowType::Poc, "Build auth module"))
            .unwrap();
        let a = bridge.assign_step(&wf.id, AgentType::Poc, "poc-flaky", "build_code").unwrap();
        bridge.start_assignment(a.id).unwrap();
        bridge.fail_assignment(a.id).unwrap();

        let best = bridge.select_agent(AgentType::Poc).unwrap();
        assert_eq!(best.agent_id, "poc-steady");
    }

    #[test]
    fn test_select_without_capacity() {
        let bridge = test_bridge();
        assert!(matches!(
            bridge.select_agent(AgentType::Validation).unwrap_err(),
            CoordinationError::NoAvailableAgent(ref t) if t == "validation"
        ));

        register(&bridge, AgentType::Validation, "validation-full", 1, 1);
        register(&bridge, AgentType::Validation, "validation-off", 3, 0);
        bridge.unregister_agent(AgentType::Validation, "validation-off").unwrap();
        assert!(matches!(
            bridge.select_agent(AgentType::Validation).unwrap_err(),
            CoordinationError::NoAvailableAgent(_)
        ));
    }

    #[test]
    fn test_plan_handoff_skips_the_current_agent() {
        let bridge = test_bridge();
        register(&bridge, AgentType::Research, "research-1", 5, 0);
        register(&bridge, AgentType::Research, "research-2", 5, 2);
        let wf = bridge
            .start_workflow(StartRequest::new(WorkflowType::Research, "Pick a parser"))
            .unwrap();
        bridge.store_results(&wf.id, &make_test_result(&wf.id)).unwrap();

        let plan = bridge.plan_handoff(&wf.id, "research-1", AgentType::Research).unwrap();
        assert_eq!(plan.to_agent_id, "research-2");
        assert_eq!(plan.from_agent_id, "research-1");
        assert_eq!(plan.result_count, 1);

        bridge.update_workflow_status(&wf.id, WorkflowStatus::Completed).unwrap();
        assert!(matches!(
            bridge.plan_handoff(&wf.id, "research-1", AgentType::Research).unwrap_err(),
            CoordinationError::TerminalWorkflow { .. }
        ));
        assert!(matches!(
            bridge.plan_handoff("wf-missing", "research-1", AgentType::Research).unwrap_err(),
            CoordinationError::WorkflowNotFound(_)
        ));
    }

    #[test]
    fn test_rebalance_pairs_overloaded_with_underloaded_peers() {
        let bridge = test_bridge();
        register(&bridge, AgentType::Research, "r1", 5, 4);
        register(&bridge, AgentType::Research, "r2", 5, 1);
        register(&bridge, AgentType::Research, "r3", 5, 3);
        register(&bridge, AgentType::Poc, "p1", 2, 2);
        register(&bridge, AgentType::Poc, "p2", 4, 1);
        // Overloaded with no eligible peer
        register(&bridge, AgentType::Validation, "v1", 1, 1);

        let moves: Vec<_> = bridge
            .rebalance_agents()
            .unwrap()
            .into_iter()
            .map(|s| (s.from_agent_id, s.to_agent_id, s.from_load_percent, s.to_load_percent))
            .collect();
        assert_eq!(
            moves,
            vec![
                ("p1".to_string(), "p2".to_string(), 100.0, 25.0),
                ("r1".to_string(), "r2".to_string(), 80.0, 20.0),
            ]
        );
    }

    #[test]
    fn test_rebalance_ignores_inactive_agents() {
        let bridge = test_bridge();
        register(&bridge, AgentType::Poc, "p1", 2, 2);
        register(&bridge, AgentType::Poc, "p2", 4, 0);
        bridge.unregister_agent(AgentType::Poc, "p2").unwrap();
        assert!(bridge.rebalance_agents().unwrap().is_empty());
    }
}
