//! Agents and the step contract they run on.
//!
//! An agent declares a fixed, ordered list of [`Step`]s for one workflow type
//! and an aggregate [`Agent::execute`] that runs its own pipeline over the
//! planned steps and produces one [`WorkflowResult`].
//!
//! The built-in agents are deterministic: they derive their output from the
//! workflow's variables and earlier step outputs. Real capability providers
//! plug in through [`registry::Registry::register`].

pub mod documentation;
pub mod poc;
pub mod registry;
pub mod research;
pub mod validation;

use std::time::{Duration, Instant};

use serde_json::{Map, Value};
use thiserror::Error;
use tracing::{debug, warn};

use crate::db::workflows::Workflow;
use crate::db::{self, results::WorkflowResult};
use crate::error::{CoordinationError, Result};
use crate::state::AgentType;
use crate::templates::{format_duration, Variables, WorkflowTemplate};

pub use registry::Registry;

/// Output of one step: named values merged into the run's accumulated results.
pub type StepOutput = Map<String, Value>;

/// What a step sees when it runs.
#[derive(Debug, Clone, Copy)]
pub struct StepInput<'a> {
    pub workflow_id: &'a str,
    pub title: &'a str,
    pub step_number: usize,
    pub total_steps: usize,
    pub variables: &'a Variables,
    /// Outputs of the steps that ran before this one.
    pub results: &'a StepOutput,
}

impl<'a> StepInput<'a> {
    pub fn var_str(&self, key: &str) -> Option<&'a str> {
        self.variables.get(key).and_then(Value::as_str).filter(|s| !s.is_empty())
    }

    /// Variables arrive as strings from the CLI and as booleans from templates.
    pub fn var_bool(&self, key: &str) -> Option<bool> {
        match self.variables.get(key)? {
            Value::Bool(b) => Some(*b),
            Value::String(s) => match s.to_lowercase().as_str() {
                "true" | "yes" | "1" => Some(true),
                "false" | "no" | "0" => Some(false),
                _ => None,
            },
            _ => None,
        }
    }

    pub fn result_bool(&self, key: &str) -> bool {
        self.results.get(key).and_then(Value::as_bool).unwrap_or(false)
    }
}

#[derive(Debug, Clone, Error, PartialEq)]
pub enum StepError {
    #[error("{0}")]
    Failed(String),

    #[error("exceeded its {timeout} timeout (took {elapsed})")]
    TimedOut { timeout: String, elapsed: String },
}

pub type StepFn = fn(&StepInput<'_>) -> std::result::Result<StepOutput, StepError>;

/// One named unit of agent work.
#[derive(Debug, Clone)]
pub struct Step {
    pub name: &'static str,
    pub description: &'static str,
    /// Declared budget. Checked after the step returns; steps are never interrupted.
    pub timeout: Duration,
    /// Extra attempts after the first failure.
    pub retry_count: u32,
    pub run: StepFn,
}

impl Step {
    pub const fn new(
        name: &'static str,
        description: &'static str,
        timeout: Duration,
        retry_count: u32,
        run: StepFn,
    ) -> Self {
        Self {
            name,
            description,
            timeout,
            retry_count,
            run,
        }
    }
}

/// Per-run settings handed to an agent.
#[derive(Debug, Clone)]
pub struct ExecutionContext {
    /// Steps to run, in order. Usually the agent's declared steps, or the
    /// subset a template selects.
    pub plan: Vec<Step>,
    /// Attempt `n` of a failing step waits `n` times this before retrying.
    pub retry_backoff: Duration,
    pub continue_on_error: bool,
    pub deadline: Option<Instant>,
}

impl ExecutionContext {
    pub fn new(plan: Vec<Step>, retry_backoff: Duration) -> Self {
        Self {
            plan,
            retry_backoff,
            continue_on_error: false,
            deadline: None,
        }
    }
}

pub trait Agent: Send + Sync {
    fn id(&self) -> &str;

    fn agent_type(&self) -> AgentType;

    fn capabilities(&self) -> &[&'static str];

    /// The fixed, ordered step sequence this agent declares.
    fn steps(&self) -> &[Step];

    /// Run the agent's pipeline over `ctx.plan` and produce the aggregate result.
    ///
    /// An error here fails the workflow.
    fn execute(&self, ctx: &ExecutionContext, workflow: &Workflow) -> Result<WorkflowResult>;
}

/// Resolve the steps a workflow will run.
///
/// Without a template this is the agent's declared list. With one, it is the
/// template's steps in template order, carrying the template's timeout and
/// retry settings; every template step must be one the agent declares.
pub fn plan_steps(agent: &dyn Agent, template: Option<&WorkflowTemplate>) -> Result<Vec<Step>> {
    let Some(template) = template else {
        return Ok(agent.steps().to_vec());
    };

    template
        .steps
        .iter()
        .map(|ts| {
            let declared = agent
                .steps()
                .iter()
                .find(|s| s.name == ts.name)
                .ok_or_else(|| CoordinationError::UnsupportedStep {
                    agent_type: agent.agent_type().to_string(),
                    step: ts.name.to_string(),
                })?;
            Ok(Step {
                timeout: ts.timeout,
                retry_count: ts.retry_count.min(template.execution.max_retries),
                ..declared.clone()
            })
        })
        .collect()
}

/// Run one step, retrying up to `step.retry_count` more times.
pub fn execute_step(
    ctx: &ExecutionContext,
    step: &Step,
    input: &StepInput<'_>,
) -> std::result::Result<StepOutput, StepError> {
    let attempts = step.retry_count + 1;
    let mut attempt = 1;
    loop {
        let started = Instant::now();
        let outcome = (step.run)(input).and_then(|output| {
            let elapsed = started.elapsed();
            if elapsed > step.timeout {
                Err(StepError::TimedOut {
                    timeout: format_duration(step.timeout),
                    elapsed: format_duration(elapsed),
                })
            } else {
                Ok(output)
            }
        });

        match outcome {
            Ok(output) => return Ok(output),
            Err(e) if attempt < attempts => {
                debug!(step = step.name, attempt, error = %e, "step failed, retrying");
                std::thread::sleep(ctx.retry_backoff * attempt);
                attempt += 1;
            }
            Err(e) => return Err(e),
        }
    }
}

/// Accumulated state of a pipeline run.
#[derive(Debug, Default)]
pub(crate) struct PipelineRun {
    pub results: StepOutput,
    pub failed: Vec<(&'static str, String)>,
    pub elapsed: Duration,
}

/// Run `ctx.plan` in order, merging each step's output into the results.
///
/// A failing step stops the pipeline unless `ctx.continue_on_error` is set,
/// in which case it is recorded and the next step runs.
pub(crate) fn run_pipeline(ctx: &ExecutionContext, workflow: &Workflow) -> Result<PipelineRun> {
    let started = Instant::now();
    let mut run = PipelineRun::default();

    for (i, step) in ctx.plan.iter().enumerate() {
        if ctx.deadline.is_some_and(|d| Instant::now() > d) {
            return Err(CoordinationError::Execution(format!(
                "workflow {} exceeded its timeout before step {}",
                workflow.id, step.name
            )));
        }

        let input = StepInput {
            workflow_id: &workflow.id,
            title: workflow.title(),
            step_number: i + 1,
            total_steps: ctx.plan.len(),
            variables: &workflow.metadata.variables,
            results: &run.results,
        };

        match execute_step(ctx, step, &input) {
            Ok(output) => run.results.extend(output),
            Err(e) if ctx.continue_on_error => {
                warn!(workflow_id = %workflow.id, step = step.name, error = %e, "step failed, continuing");
                run.failed.push((step.name, e.to_string()));
            }
            Err(e) => {
                return Err(CoordinationError::Execution(format!(
                    "step {} failed: {}",
                    step.name, e
                )))
            }
        }
    }

    run.elapsed = started.elapsed();
    Ok(run)
}

/// Assemble the aggregate result for a finished pipeline.
pub(crate) fn build_result(
    agent_type: AgentType,
    workflow: &Workflow,
    run: PipelineRun,
    confidence: f64,
    quality: f64,
    artifacts: Vec<String>,
) -> WorkflowResult {
    let failed_steps: Vec<Value> = run
        .failed
        .iter()
        .map(|(name, error)| serde_json::json!({"step": name, "error": error}))
        .collect();
    WorkflowResult {
        id: None,
        workflow_id: workflow.id.clone(),
        agent_type,
        result_type: agent_type.result_type(),
        result_data: Value::Object(run.results),
        confidence_score: confidence,
        execution_time_ms: run.elapsed.as_millis() as i64,
        artifacts,
        metadata: serde_json::json!({ "failed_steps": failed_steps }),
        quality_score: quality,
        created_at: db::now(),
    }
}

/// Turn a `json!` object literal into a step output.
pub(crate) fn output(value: Value) -> StepOutput {
    match value {
        Value::Object(map) => map,
        other => {
            let mut map = Map::new();
            map.insert("value".to_string(), other);
            map
        }
    }
}
