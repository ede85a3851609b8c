//! Coordination bridge: the write path for workflows, agents, and assignments.
//!
//! Every multi-row change runs in an IMMEDIATE transaction, so concurrent
//! processes sharing the store serialize on the write lock instead of
//! interleaving check and update.

pub mod execute;
pub mod selection;

use std::path::Path;

use rusqlite::{Connection, Transaction, TransactionBehavior};
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::db::agents::{self, AgentConfiguration};
use crate::db::assignments::{self, Assignment};
use crate::db::migrations::{MigrationSource, Migrator};
use crate::db::results::{self, WorkflowResult};
use crate::db::workflows::{self, Workflow, WorkflowFilter, WorkflowMetadata};
use crate::db::{self, templates as template_store};
use crate::error::{CoordinationError, Result, StoreContext};
use crate::state::transitions::{validate_assignment_transition, validate_transition};
use crate::state::{AgentStatus, AgentType, AssignmentStatus, WorkflowStatus, WorkflowType};
use crate::templates::{TemplateCatalog, Variables};

pub use execute::{ExecutionReport, Executor, StepReport};
pub use selection::{AgentScore, HandoffPlan, RebalanceSuggestion};

/// Defaults the bridge applies when a caller leaves a value out.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BridgeSettings {
    pub default_priority: i32,
    pub default_max_workload: i64,
}

impl Default for BridgeSettings {
    fn default() -> Self {
        Self {
            default_priority: 2,
            default_max_workload: 5,
        }
    }
}

impl From<&Config> for BridgeSettings {
    fn from(config: &Config) -> Self {
        Self {
            default_priority: config.workflows.default_priority,
            default_max_workload: config.agents.default_max_workload,
        }
    }
}

/// Everything needed to create a workflow.
#[derive(Debug, Clone)]
pub struct StartRequest {
    pub workflow_type: WorkflowType,
    pub title: String,
    pub issue_id: Option<String>,
    /// Defaults to the workflow type.
    pub agent_type: Option<AgentType>,
    pub priority: Option<i32>,
    pub variables: Variables,
    pub template_id: Option<String>,
    pub parent_workflow_id: Option<String>,
}

impl StartRequest {
    pub fn new(workflow_type: WorkflowType, title: impl Into<String>) -> Self {
        Self {
            workflow_type,
            title: title.into(),
            issue_id: None,
            agent_type: None,
            priority: None,
            variables: Variables::new(),
            template_id: None,
            parent_workflow_id: None,
        }
    }
}

/// Outcome of [`Bridge::recover_from_crash`].
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct RecoveryReport {
    /// Assignments that were `started` and are now `failed`.
    pub failed_assignments: Vec<i64>,
    /// Workflows still `active` or `paused`, oldest first.
    pub unfinished_workflows: Vec<String>,
}

pub struct Bridge {
    conn: Connection,
    settings: BridgeSettings,
}

impl Bridge {
    pub fn new(conn: Connection, settings: BridgeSettings) -> Self {
        Self { conn, settings }
    }

    /// Open the coordination store named by the config, migrating it first
    /// when `migrations.auto_migrate` is set.
    pub fn open(path: &Path, config: &Config) -> Result<Self> {
        let conn = db::open_or_create(path)
            .store_context(|| format!("open coordination store {}", path.display()))?;
        if config.migrations.auto_migrate {
            let migrator = Migrator::new(MigrationSource::resolve(&config.migrations.directory));
            let applied = migrator.migrate(&conn)?;
            if !applied.is_empty() {
                info!(count = applied.len(), "applied pending migrations");
            }
        }
        Ok(Self::new(conn, BridgeSettings::from(config)))
    }

    pub fn conn(&self) -> &Connection {
        &self.conn
    }

    pub fn settings(&self) -> BridgeSettings {
        self.settings
    }

    fn immediate(&self) -> Result<Transaction<'_>> {
        Transaction::new_unchecked(&self.conn, TransactionBehavior::Immediate)
            .store_context(|| "begin transaction".to_string())
    }

    // Workflows

    pub fn start_workflow(&self, req: StartRequest) -> Result<Workflow> {
        let priority = req.priority.unwrap_or(self.settings.default_priority);
        if !(0..=3).contains(&priority) {
            return Err(CoordinationError::InvalidPriority(priority));
        }

        let template = req
            .template_id
            .as_deref()
            .map(|id| TemplateCatalog::builtin().get(id))
            .transpose()?;
        if let Some(t) = template {
            if t.workflow_type != req.workflow_type {
                return Err(CoordinationError::InvalidValue {
                    field: "template",
                    value: format!("{} is a {} template", t.id, t.workflow_type),
                });
            }
        }
        let variables = match template {
            Some(t) => t.apply(&req.variables),
            None => req.variables,
        };

        let now = db::now();
        let workflow = Workflow {
            id: generate_workflow_id(req.workflow_type),
            issue_id: req.issue_id,
            workflow_type: req.workflow_type,
            status: WorkflowStatus::Active,
            priority,
            metadata: WorkflowMetadata {
                title: req.title,
                agent_type: req.agent_type,
                template_id: req.template_id,
                variables,
                ..Default::default()
            },
            parent_workflow_id: req.parent_workflow_id,
            created_at: now.clone(),
            updated_at: now,
            completed_at: None,
        };

        let tx = self.immediate()?;
        if let Some(parent) = &workflow.parent_workflow_id {
            if workflows::find_status(&tx, parent)
                .store_context(|| format!("load parent workflow {}", parent))?
                .is_none()
            {
                return Err(CoordinationError::WorkflowNotFound(parent.clone()));
            }
        }
        workflows::insert(&tx, &workflow).store_context(|| format!("insert workflow {}", workflow.id))?;
        if let Some(t) = template {
            template_store::record_usage(&tx, t).store_context(|| format!("record usage of template {}", t.id))?;
        }
        tx.commit().store_context(|| format!("commit workflow {}", workflow.id))?;

        info!(
            workflow_id = %workflow.id,
            workflow_type = %workflow.workflow_type,
            priority,
            issue_id = workflow.issue_id.as_deref().unwrap_or(""),
            "workflow started"
        );
        Ok(workflow)
    }

    pub fn get_workflow(&self, id: &str) -> Result<Workflow> {
        workflows::find(&self.conn, id)
            .store_context(|| format!("load workflow {}", id))?
            .ok_or_else(|| CoordinationError::WorkflowNotFound(id.to_string()))
    }

    pub fn workflow_status(&self, id: &str) -> Result<WorkflowStatus> {
        workflows::find_status(&self.conn, id)
            .store_context(|| format!("load status of workflow {}", id))?
            .ok_or_else(|| CoordinationError::WorkflowNotFound(id.to_string()))
    }

    pub fn list_workflows(&self, filter: &WorkflowFilter) -> Result<Vec<Workflow>> {
        workflows::list(&self.conn, filter).store_context(|| "list workflows".to_string())
    }

    pub fn get_results(&self, id: &str) -> Result<Vec<WorkflowResult>> {
        self.workflow_status(id)?;
        results::list_by_workflow(&self.conn, id).store_context(|| format!("load results of workflow {}", id))
    }

    pub fn get_assignments(&self, id: &str) -> Result<Vec<Assignment>> {
        self.workflow_status(id)?;
        assignments::list_by_workflow(&self.conn, id)
            .store_context(|| format!("load assignments of workflow {}", id))
    }

    /// Append a result. Does not change the workflow's status.
    pub fn store_results(&self, id: &str, result: &WorkflowResult) -> Result<i64> {
        result.validate()?;
        if result.workflow_id != id {
            return Err(CoordinationError::InvalidValue {
                field: "result workflow id",
                value: result.workflow_id.clone(),
            });
        }
        let tx = self.immediate()?;
        let status = workflows::find_status(&tx, id)
            .store_context(|| format!("load status of workflow {}", id))?
            .ok_or_else(|| CoordinationError::WorkflowNotFound(id.to_string()))?;
        if status.is_terminal() {
            return Err(CoordinationError::TerminalWorkflow {
                id: id.to_string(),
                status: status.to_string(),
            });
        }
        let result_id = results::insert(&tx, result).store_context(|| format!("store result for {}", id))?;
        tx.commit().store_context(|| format!("commit result for {}", id))?;
        debug!(workflow_id = id, result_id, result_type = %result.result_type, "result stored");
        Ok(result_id)
    }

    /// Move a workflow to `status`. Terminal workflows never change again.
    pub fn update_workflow_status(&self, id: &str, status: WorkflowStatus) -> Result<Workflow> {
        let tx = self.immediate()?;
        let current = workflows::find_status(&tx, id)
            .store_context(|| format!("load status of workflow {}", id))?
            .ok_or_else(|| CoordinationError::WorkflowNotFound(id.to_string()))?;
        check_transition(id, current, status)?;

        let now = db::now();
        if !workflows::transition_status(&tx, id, current, status, &now)
            .store_context(|| format!("update status of workflow {}", id))?
        {
            return Err(CoordinationError::InvalidTransition {
                from: current.to_string(),
                to: status.to_string(),
            });
        }
        tx.commit().store_context(|| format!("commit status of workflow {}", id))?;

        info!(workflow_id = id, from = %current, to = %status, issue_status = status.issue_status(), "workflow status changed");
        self.get_workflow(id)
    }

    /// Cancel an active or paused workflow, along with its open assignments.
    pub fn cancel_workflow(&self, id: &str, reason: Option<&str>) -> Result<Workflow> {
        let tx = self.immediate()?;
        let mut workflow = workflows::find(&tx, id)
            .store_context(|| format!("load workflow {}", id))?
            .ok_or_else(|| CoordinationError::WorkflowNotFound(id.to_string()))?;
        check_transition(id, workflow.status, WorkflowStatus::Cancelled)?;

        let now = db::now();
        workflows::transition_status(&tx, id, workflow.status, WorkflowStatus::Cancelled, &now)
            .store_context(|| format!("cancel workflow {}", id))?;
        if let Some(reason) = reason {
            workflow.metadata.cancel_reason = Some(reason.to_string());
            workflows::update_metadata(&tx, id, &workflow.metadata, &now)
                .store_context(|| format!("record cancel reason for {}", id))?;
        }

        let open = assignments::list_open_by_workflow(&tx, id)
            .store_context(|| format!("load open assignments of {}", id))?;
        for a in &open {
            assignments::transition(&tx, a.id, a.status, AssignmentStatus::Cancelled, &now)
                .store_context(|| format!("cancel assignment {}", a.id))?;
            agents::release(&tx, a.agent_type, &a.agent_id)
                .store_context(|| format!("release workload of {}", a.agent_id))?;
        }
        tx.commit().store_context(|| format!("commit cancel of {}", id))?;

        info!(
            workflow_id = id,
            reason = reason.unwrap_or(""),
            cancelled_assignments = open.len(),
            issue_status = WorkflowStatus::Cancelled.issue_status(),
            "workflow cancelled"
        );
        self.get_workflow(id)
    }

    // Agents

    pub fn register_agent(
        &self,
        agent_type: AgentType,
        agent_id: &str,
        max_workload: Option<i64>,
        capabilities: &[String],
    ) -> Result<AgentConfiguration> {
        let max = max_workload.unwrap_or(self.settings.default_max_workload);
        if max < 1 {
            return Err(CoordinationError::InvalidValue {
                field: "max workload",
                value: max.to_string(),
            });
        }
        agents::upsert(
            &self.conn,
            agent_type,
            agent_id,
            max,
            capabilities,
            &serde_json::json!({}),
            &db::now(),
        )
        .store_context(|| format!("register agent {}/{}", agent_type, agent_id))?;
        info!(%agent_type, agent_id, max_workload = max, "agent registered");
        self.get_agent(agent_type, agent_id)
    }

    pub fn unregister_agent(&self, agent_type: AgentType, agent_id: &str) -> Result<()> {
        let found = agents::set_status(&self.conn, agent_type, agent_id, AgentStatus::Inactive)
            .store_context(|| format!("unregister agent {}/{}", agent_type, agent_id))?;
        if !found {
            return Err(agent_not_found(agent_type, agent_id));
        }
        info!(%agent_type, agent_id, "agent unregistered");
        Ok(())
    }

    pub fn heartbeat(&self, agent_type: AgentType, agent_id: &str) -> Result<()> {
        let found = agents::heartbeat(&self.conn, agent_type, agent_id, &db::now())
            .store_context(|| format!("heartbeat for {}/{}", agent_type, agent_id))?;
        if found {
            Ok(())
        } else {
            Err(agent_not_found(agent_type, agent_id))
        }
    }

    pub fn get_agent(&self, agent_type: AgentType, agent_id: &str) -> Result<AgentConfiguration> {
        agents::find(&self.conn, agent_type, agent_id)
            .store_context(|| format!("load agent {}/{}", agent_type, agent_id))?
            .ok_or_else(|| agent_not_found(agent_type, agent_id))
    }

    pub fn list_agents(&self, agent_type: Option<AgentType>) -> Result<Vec<AgentConfiguration>> {
        agents::list(&self.conn, agent_type).store_context(|| "list agents".to_string())
    }

    pub fn agent_assignments(&self, agent_type: AgentType, agent_id: &str) -> Result<Vec<Assignment>> {
        assignments::list_open_by_agent(&self.conn, agent_type, agent_id)
            .store_context(|| format!("load assignments of agent {}/{}", agent_type, agent_id))
    }

    // Assignments

    /// Assign the workflow's next step to an agent, taking one unit of its workload.
    pub fn assign_step(
        &self,
        workflow_id: &str,
        agent_type: AgentType,
        agent_id: &str,
        step_name: &str,
    ) -> Result<Assignment> {
        let tx = self.immediate()?;
        let assignment = assign_in(&tx, workflow_id, agent_type, agent_id, step_name, None)?;
        tx.commit().store_context(|| format!("commit assignment for {}", workflow_id))?;
        debug!(workflow_id, agent_id, step = step_name, step_number = assignment.step_number, "step assigned");
        Ok(assignment)
    }

    pub fn start_assignment(&self, id: i64) -> Result<Assignment> {
        self.move_assignment(id, AssignmentStatus::Started)
    }

    pub fn complete_assignment(&self, id: i64) -> Result<Assignment> {
        self.move_assignment(id, AssignmentStatus::Completed)
    }

    pub fn fail_assignment(&self, id: i64) -> Result<Assignment> {
        self.move_assignment(id, AssignmentStatus::Failed)
    }

    fn move_assignment(&self, id: i64, to: AssignmentStatus) -> Result<Assignment> {
        let tx = self.immediate()?;
        let current = assignments::find(&tx, id)
            .store_context(|| format!("load assignment {}", id))?
            .ok_or(CoordinationError::AssignmentNotFound(id))?;
        validate_assignment_transition(current.status, to)?;

        assignments::transition(&tx, id, current.status, to, &db::now())
            .store_context(|| format!("move assignment {} to {}", id, to))?;
        if to.is_finished() {
            agents::release(&tx, current.agent_type, &current.agent_id)
                .store_context(|| format!("release workload of {}", current.agent_id))?;
        }
        let updated = assignments::find(&tx, id)
            .store_context(|| format!("reload assignment {}", id))?
            .ok_or(CoordinationError::AssignmentNotFound(id))?;
        tx.commit().store_context(|| format!("commit assignment {}", id))?;
        Ok(updated)
    }

    /// Hand a workflow from one agent to another.
    ///
    /// Completes the step `from_agent_id` has started, marking it handed to
    /// the target, then assigns `step_name` to the target as the next step.
    pub fn coordinate_handoff(
        &self,
        workflow_id: &str,
        from_agent_id: &str,
        to_agent_type: AgentType,
        to_agent_id: &str,
        step_name: &str,
    ) -> Result<Assignment> {
        let tx = self.immediate()?;
        let from = assignments::find_started(&tx, workflow_id, from_agent_id)
            .store_context(|| format!("load started step of {} on {}", from_agent_id, workflow_id))?
            .ok_or_else(|| CoordinationError::InvalidValue {
                field: "handoff",
                value: format!("{} has no started step on {}", from_agent_id, workflow_id),
            })?;

        let now = db::now();
        assignments::transition(&tx, from.id, AssignmentStatus::Started, AssignmentStatus::Completed, &now)
            .store_context(|| format!("complete assignment {}", from.id))?;
        assignments::set_handoff_to(&tx, from.id, to_agent_id)
            .store_context(|| format!("mark handoff on assignment {}", from.id))?;
        agents::release(&tx, from.agent_type, &from.agent_id)
            .store_context(|| format!("release workload of {}", from.agent_id))?;

        let next = assign_in(&tx, workflow_id, to_agent_type, to_agent_id, step_name, Some(from_agent_id))?;
        tx.commit().store_context(|| format!("commit handoff on {}", workflow_id))?;

        info!(workflow_id, from = from_agent_id, to = to_agent_id, step = step_name, "handoff");
        Ok(next)
    }

    /// Fail assignments left `started` by a crashed process and release their
    /// workload. Workflows are left as they are; the report lists the ones
    /// still open so they can be resumed or cancelled.
    pub fn recover_from_crash(&self) -> Result<RecoveryReport> {
        let tx = self.immediate()?;
        let now = db::now();
        let stuck = assignments::list_by_status(&tx, AssignmentStatus::Started)
            .store_context(|| "load started assignments".to_string())?;

        let mut report = RecoveryReport::default();
        for a in stuck {
            assignments::transition(&tx, a.id, AssignmentStatus::Started, AssignmentStatus::Failed, &now)
                .store_context(|| format!("fail assignment {}", a.id))?;
            agents::release(&tx, a.agent_type, &a.agent_id)
                .store_context(|| format!("release workload of {}", a.agent_id))?;
            warn!(workflow_id = %a.workflow_id, assignment = a.id, step = %a.step_name, "marked interrupted step failed");
            report.failed_assignments.push(a.id);
        }
        report.unfinished_workflows =
            workflows::list_unfinished_ids(&tx).store_context(|| "list unfinished workflows".to_string())?;
        tx.commit().store_context(|| "commit crash recovery".to_string())?;

        info!(
            failed_assignments = report.failed_assignments.len(),
            unfinished_workflows = report.unfinished_workflows.len(),
            "crash recovery finished"
        );
        Ok(report)
    }
}

/// `wf-{type}-{8 hex}`.
pub fn generate_workflow_id(workflow_type: WorkflowType) -> String {
    let uuid = uuid::Uuid::new_v4().simple().to_string();
    format!("wf-{}-{}", workflow_type, &uuid[..8])
}

fn agent_not_found(agent_type: AgentType, agent_id: &str) -> CoordinationError {
    CoordinationError::AgentNotFound {
        agent_type: agent_type.to_string(),
        agent_id: agent_id.to_string(),
    }
}

fn check_transition(id: &str, from: WorkflowStatus, to: WorkflowStatus) -> Result<()> {
    if from.is_terminal() {
        return Err(CoordinationError::TerminalWorkflow {
            id: id.to_string(),
            status: from.to_string(),
        });
    }
    validate_transition(from, to)
}

/// Assignment body shared by plain assignment and handoff. Caller owns the transaction.
fn assign_in(
    conn: &Connection,
    workflow_id: &str,
    agent_type: AgentType,
    agent_id: &str,
    step_name: &str,
    handoff_from: Option<&str>,
) -> Result<Assignment> {
    let status = workflows::find_status(conn, workflow_id)
        .store_context(|| format!("load status of workflow {}", workflow_id))?
        .ok_or_else(|| CoordinationError::WorkflowNotFound(workflow_id.to_string()))?;
    if status.is_terminal() {
        return Err(CoordinationError::TerminalWorkflow {
            id: workflow_id.to_string(),
            status: status.to_string(),
        });
    }

    let acquired = agents::try_acquire(conn, agent_type, agent_id)
        .store_context(|| format!("reserve workload on {}", agent_id))?;
    if !acquired {
        let agent = agents::find(conn, agent_type, agent_id)
            .store_context(|| format!("load agent {}/{}", agent_type, agent_id))?
            .ok_or_else(|| agent_not_found(agent_type, agent_id))?;
        if agent.status != AgentStatus::Active {
            return Err(CoordinationError::InvalidValue {
                field: "agent status",
                value: format!("{} is {}", agent_id, agent.status),
            });
        }
        return Err(CoordinationError::AgentAtCapacity {
            agent_id: agent_id.to_string(),
            current: agent.current_workload,
            max: agent.max_workload,
        });
    }

    assignments::insert_next(conn, workflow_id, agent_type, agent_id, step_name, handoff_from, &db::now())
        .store_context(|| format!("insert assignment for {}", workflow_id))
}
