//! Synchronous workflow execution on top of the bridge.
//!
//! Each planned step is assigned to the agent, run, and recorded so progress
//! is visible in the store while the workflow runs. The agent's aggregate
//! [`Agent::execute`] then decides the outcome and produces the stored result.
//!
//! Cancellation is cooperative: the workflow's status is re-read before every
//! step, and a workflow that is no longer active stops without a result.

use std::time::{Duration, Instant};

use serde::Serialize;
use tracing::{info, warn};

use super::{Bridge, StartRequest};
use crate::agents::registry::generate_agent_id;
use crate::agents::{execute_step, plan_steps, Agent, ExecutionContext, Registry, StepInput, StepOutput};
use crate::db::results::WorkflowResult;
use crate::db::workflows::Workflow;
use crate::error::{CoordinationError, Result};
use crate::metrics::MetricsCollector;
use crate::state::{AgentStatus, WorkflowStatus};
use crate::templates::TemplateCatalog;

/// One step as it ran.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StepReport {
    /// 1-based position in the plan.
    pub index: usize,
    pub total: usize,
    pub name: String,
    pub assignment_id: i64,
    #[serde(rename = "duration_ms", serialize_with = "serialize_millis")]
    pub duration: Duration,
    pub error: Option<String>,
}

impl StepReport {
    pub fn succeeded(&self) -> bool {
        self.error.is_none()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ExecutionReport {
    /// State after the run.
    pub workflow: Workflow,
    pub agent_id: String,
    pub steps: Vec<StepReport>,
    pub result: Option<WorkflowResult>,
    /// Why the workflow failed, when it did.
    pub error: Option<String>,
    /// Set when the workflow was paused or cancelled while running.
    pub stopped_by: Option<WorkflowStatus>,
    #[serde(rename = "duration_ms", serialize_with = "serialize_millis")]
    pub duration: Duration,
}

impl ExecutionReport {
    pub fn succeeded(&self) -> bool {
        self.workflow.status == WorkflowStatus::Completed
    }
}

fn serialize_millis<S: serde::Serializer>(d: &Duration, s: S) -> std::result::Result<S::Ok, S::Error> {
    s.serialize_u64(d.as_millis() as u64)
}

pub struct Executor<'a> {
    bridge: &'a Bridge,
    registry: &'a Registry,
    metrics: MetricsCollector,
    retry_backoff: Duration,
}

impl<'a> Executor<'a> {
    pub fn new(bridge: &'a Bridge, registry: &'a Registry, retry_backoff: Duration) -> Self {
        Self {
            bridge,
            registry,
            metrics: MetricsCollector::new(),
            retry_backoff,
        }
    }

    pub fn metrics(&self) -> &MetricsCollector {
        &self.metrics
    }

    /// Start a workflow and run it to the end.
    pub fn execute<F>(&mut self, req: StartRequest, agent_id: Option<&str>, on_step: F) -> Result<ExecutionReport>
    where
        F: FnMut(&StepReport),
    {
        let workflow = self.bridge.start_workflow(req)?;
        self.run_workflow(&workflow.id, agent_id, on_step)
    }

    /// Run an active workflow. `on_step` is called after each step finishes.
    ///
    /// Without an `agent_id`, the best registered agent with free capacity
    /// runs it, or a newly named one when none is available.
    ///
    /// Failed steps are recorded and the run continues. An error from the
    /// agent's aggregate execution fails the workflow and is reported in the
    /// returned report. Any other error also marks the workflow failed and is
    /// returned.
    pub fn run_workflow<F>(&mut self, workflow_id: &str, agent_id: Option<&str>, mut on_step: F) -> Result<ExecutionReport>
    where
        F: FnMut(&StepReport),
    {
        let workflow = self.bridge.get_workflow(workflow_id)?;
        match workflow.status {
            WorkflowStatus::Active => {}
            status if status.is_terminal() => {
                return Err(CoordinationError::TerminalWorkflow {
                    id: workflow.id,
                    status: status.to_string(),
                })
            }
            status => {
                return Err(CoordinationError::InvalidValue {
                    field: "workflow status",
                    value: format!("{} is {}; resume it first", workflow.id, status),
                })
            }
        }

        let agent_type = workflow.agent_type();
        let agent_id = match agent_id {
            Some(id) => id.to_string(),
            None => match self.bridge.select_agent(agent_type) {
                Ok(selected) => {
                    info!(workflow_id = %workflow.id, reason = %selected.reason, "reusing registered agent");
                    selected.agent_id
                }
                Err(CoordinationError::NoAvailableAgent(_)) => generate_agent_id(agent_type),
                Err(e) => return Err(e),
            },
        };
        let agent = self.registry.get(agent_type, agent_id)?;

        let started = Instant::now();
        self.metrics.record_workflow_start(&workflow.id, workflow.workflow_type);

        let outcome = self.drive(&workflow, agent.as_ref(), started, &mut on_step);
        let report = match outcome {
            Ok(report) => report,
            Err(e) => {
                self.fail_after_error(&workflow.id, &e);
                self.finish(&workflow, agent.as_ref(), started.elapsed(), false, None);
                return Err(e);
            }
        };

        if report.stopped_by.is_none() {
            let confidence = report.result.as_ref().map(|r| r.confidence_score);
            self.finish(&workflow, agent.as_ref(), report.duration, report.succeeded(), confidence);
        } else if let Err(e) = self.metrics.flush_to_db(self.bridge.conn()) {
            warn!(error = %e, "failed to flush workflow analytics");
        }
        Ok(report)
    }

    fn drive(
        &mut self,
        workflow: &Workflow,
        agent: &dyn Agent,
        started: Instant,
        on_step: &mut dyn FnMut(&StepReport),
    ) -> Result<ExecutionReport> {
        self.ensure_registered(agent)?;

        let template = workflow
            .metadata
            .template_id
            .as_deref()
            .map(|id| TemplateCatalog::builtin().get(id))
            .transpose()?;
        let mut ctx = ExecutionContext::new(plan_steps(agent, template)?, self.retry_backoff);
        if let Some(t) = template {
            ctx.continue_on_error = t.execution.continue_on_error;
            ctx.deadline = Some(started + t.execution.timeout);
        }

        info!(workflow_id = %workflow.id, agent_id = agent.id(), steps = ctx.plan.len(), "executing workflow");

        let mut report = ExecutionReport {
            workflow: workflow.clone(),
            agent_id: agent.id().to_string(),
            steps: Vec::with_capacity(ctx.plan.len()),
            result: None,
            error: None,
            stopped_by: None,
            duration: Duration::ZERO,
        };

        let mut results = StepOutput::new();
        let total = ctx.plan.len();
        for (i, step) in ctx.plan.iter().enumerate() {
            if let Some(status) = self.stopped(&workflow.id)? {
                return self.stop(report, status, started);
            }

            let assignment = self
                .bridge
                .assign_step(&workflow.id, agent.agent_type(), agent.id(), step.name)?;
            self.bridge.start_assignment(assignment.id)?;

            let input = StepInput {
                workflow_id: &workflow.id,
                title: workflow.title(),
                step_number: i + 1,
                total_steps: total,
                variables: &workflow.metadata.variables,
                results: &results,
            };
            let step_started = Instant::now();
            let outcome = execute_step(&ctx, step, &input);
            let duration = step_started.elapsed();

            let error = match outcome {
                Ok(output) => {
                    results.extend(output);
                    self.bridge.complete_assignment(assignment.id)?;
                    None
                }
                Err(e) => {
                    warn!(workflow_id = %workflow.id, step = step.name, error = %e, "step failed");
                    self.bridge.fail_assignment(assignment.id)?;
                    Some(e.to_string())
                }
            };
            self.metrics
                .record_step_execution(workflow.workflow_type, step.name, duration, error.is_none());

            let step_report = StepReport {
                index: i + 1,
                total,
                name: step.name.to_string(),
                assignment_id: assignment.id,
                duration,
                error,
            };
            on_step(&step_report);
            report.steps.push(step_report);
        }

        if let Some(status) = self.stopped(&workflow.id)? {
            return self.stop(report, status, started);
        }

        match agent.execute(&ctx, workflow) {
            Ok(result) => {
                let result_id = self.bridge.store_results(&workflow.id, &result)?;
                report.workflow = self.bridge.update_workflow_status(&workflow.id, WorkflowStatus::Completed)?;
                report.result = Some(WorkflowResult {
                    id: Some(result_id),
                    ..result
                });
            }
            Err(e) => {
                warn!(workflow_id = %workflow.id, error = %e, "workflow failed");
                report.workflow = self.bridge.update_workflow_status(&workflow.id, WorkflowStatus::Failed)?;
                report.error = Some(e.to_string());
            }
        }
        report.duration = started.elapsed();
        Ok(report)
    }

    /// Register the agent, or reactivate it, so it can take assignments.
    fn ensure_registered(&self, agent: &dyn Agent) -> Result<()> {
        match self.bridge.get_agent(agent.agent_type(), agent.id()) {
            Ok(existing) if existing.status == AgentStatus::Active => Ok(()),
            Ok(existing) => {
                let capabilities = existing.capabilities.clone();
                self.bridge
                    .register_agent(agent.agent_type(), agent.id(), Some(existing.max_workload), &capabilities)
                    .map(|_| ())
            }
            Err(CoordinationError::AgentNotFound { .. }) => {
                let capabilities: Vec<String> = agent.capabilities().iter().map(|c| c.to_string()).collect();
                self.bridge
                    .register_agent(agent.agent_type(), agent.id(), None, &capabilities)
                    .map(|_| ())
            }
            Err(e) => Err(e),
        }
    }

    fn stopped(&self, workflow_id: &str) -> Result<Option<WorkflowStatus>> {
        let status = self.bridge.workflow_status(workflow_id)?;
        Ok((status != WorkflowStatus::Active).then_some(status))
    }

    fn stop(&self, mut report: ExecutionReport, status: WorkflowStatus, started: Instant) -> Result<ExecutionReport> {
        info!(workflow_id = %report.workflow.id, %status, "workflow stopped before completion");
        report.workflow = self.bridge.get_workflow(&report.workflow.id)?;
        report.stopped_by = Some(status);
        report.duration = started.elapsed();
        Ok(report)
    }

    fn fail_after_error(&self, workflow_id: &str, err: &CoordinationError) {
        warn!(workflow_id, error = %err, "execution aborted");
        match self.bridge.workflow_status(workflow_id) {
            Ok(WorkflowStatus::Active) | Ok(WorkflowStatus::Paused) => {
                if let Err(e) = self.bridge.update_workflow_status(workflow_id, WorkflowStatus::Failed) {
                    warn!(workflow_id, error = %e, "could not mark workflow failed");
                }
            }
            Ok(_) => {}
            Err(e) => warn!(workflow_id, error = %e, "could not read workflow status"),
        }
    }

    fn finish(&mut self, workflow: &Workflow, agent: &dyn Agent, duration: Duration, success: bool, confidence: Option<f64>) {
        self.metrics.record_workflow_end(
            &workflow.id,
            workflow.workflow_type,
            agent.agent_type(),
            duration,
            success,
            confidence,
        );
        if let Err(e) = self.metrics.flush_to_db(self.bridge.conn()) {
            warn!(error = %e, "failed to flush workflow analytics");
        }
    }
}
