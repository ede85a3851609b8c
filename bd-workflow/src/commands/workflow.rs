use anyhow::Context as _;
use serde_json::json;

use bd_workflow::agents::Registry;
use bd_workflow::bridge::{ExecutionReport, Executor, StartRequest, StepReport};
use bd_workflow::db::workflows::WorkflowFilter;
use bd_workflow::state::{AgentType, WorkflowStatus, WorkflowType};

use super::{format_elapsed, print_json, Context, OutputFormat};

/// Flags shared by `start` and `execute`.
#[derive(clap::Args)]
pub struct StartArgs {
    /// Workflow type: research, poc, documentation, validation
    pub workflow_type: WorkflowType,

    /// Short description of the work
    pub title: String,

    /// Agent type to run the workflow (default: same as the workflow type)
    #[arg(long)]
    pub agent: Option<AgentType>,

    /// Priority from 0 (highest) to 3 (default from config)
    #[arg(long)]
    pub priority: Option<i32>,

    /// Workflow variable as key=value; repeatable
    #[arg(long = "variable", value_parser = parse_variable)]
    pub variables: Vec<(String, String)>,

    /// Template to start from
    #[arg(long)]
    pub template: Option<String>,

    /// Issue this workflow works on
    #[arg(long)]
    pub issue: Option<String>,

    /// Parent workflow id
    #[arg(long)]
    pub parent: Option<String>,
}

impl StartArgs {
    fn into_request(self) -> StartRequest {
        let mut req = StartRequest::new(self.workflow_type, self.title);
        req.agent_type = self.agent;
        req.priority = self.priority;
        req.template_id = self.template;
        req.issue_id = self.issue;
        req.parent_workflow_id = self.parent;
        req.variables = self
            .variables
            .into_iter()
            .map(|(k, v)| (k, serde_json::Value::String(v)))
            .collect();
        req
    }
}

fn parse_variable(s: &str) -> Result<(String, String), String> {
    match s.split_once('=') {
        Some((k, v)) if !k.trim().is_empty() => Ok((k.trim().to_string(), v.to_string())),
        _ => Err(format!("expected key=value, got '{}'", s)),
    }
}

pub fn start(ctx: &Context, args: StartArgs) -> anyhow::Result<u8> {
    let bridge = ctx.bridge()?;
    let wf = bridge.start_workflow(args.into_request())?;

    println!("Workflow started successfully");
    println!("  Workflow ID:    {}", wf.id);
    println!("  Issue ID:       {}", wf.issue_id.as_deref().unwrap_or("-"));
    println!("  Type:           {}", wf.workflow_type);
    println!("  Status:         {}", wf.status);
    println!("  Priority:       {}", wf.priority);
    println!("  Agent Type:     {}", wf.agent_type());
    if let Some(template) = &wf.metadata.template_id {
        println!("  Template:       {}", template);
    }
    println!("  Created:        {}", wf.created_at);
    Ok(0)
}

pub fn execute(ctx: &Context, args: StartArgs, agent_id: Option<&str>) -> anyhow::Result<u8> {
    let bridge = ctx.bridge()?;
    let registry = Registry::with_builtin();
    let mut executor = Executor::new(&bridge, &registry, ctx.retry_backoff());

    let wf = bridge.start_workflow(args.into_request())?;
    println!("Workflow {} started, executing...\n", wf.id);

    let report = executor.run_workflow(&wf.id, agent_id, print_step)?;
    print_outcome(&report);
    Ok(if report.succeeded() { 0 } else { 1 })
}

fn print_step(step: &StepReport) {
    if step.index == 1 {
        println!("Steps: {}\n", step.total);
    }
    match &step.error {
        None => println!("  [{}/{}] {} ... OK ({})", step.index, step.total, step.name, format_elapsed(step.duration)),
        Some(e) => {
            println!("  [{}/{}] {} ... FAILED ({})", step.index, step.total, step.name, format_elapsed(step.duration));
            println!("         Error: {}", e);
        }
    }
}

fn print_outcome(report: &ExecutionReport) {
    println!();
    println!("Agent: {} ({})", report.agent_id, report.workflow.agent_type());
    let elapsed = format_elapsed(report.duration);
    if let Some(status) = report.stopped_by {
        println!("Workflow {} {} after {}", report.workflow.id, status, elapsed);
        return;
    }
    match &report.result {
        Some(result) => {
            println!("Workflow {} completed in {}", report.workflow.id, elapsed);
            println!("  Status:     {}", report.workflow.status);
            println!("  Confidence: {:.2}", result.confidence_score);
            println!("  Quality:    {:.1}/10", result.quality_score);
            println!("  Artifacts:  {}", result.artifacts.join(", "));
        }
        None => {
            println!("Workflow {} FAILED after {}", report.workflow.id, elapsed);
            println!("  Status:     {}", report.workflow.status);
            if let Some(e) = &report.error {
                println!("Error: {}", e);
            }
        }
    }
}

pub fn status(ctx: &Context, workflow_id: &str, format: OutputFormat) -> anyhow::Result<u8> {
    let bridge = ctx.bridge()?;
    let wf = bridge.get_workflow(workflow_id)?;
    let results = bridge.get_results(workflow_id)?;
    let assignments = bridge.get_assignments(workflow_id)?;

    if format == OutputFormat::Json {
        print_json(&json!({
            "workflow": wf,
            "issue_status": wf.status.issue_status(),
            "assignments": assignments,
            "results": results,
        }))?;
        return Ok(0);
    }

    let agent = assignments.last().map_or("-", |a| a.agent_id.as_str());
    println!("Workflow: {}", wf.id);
    println!("================");
    println!("Title:          {}", wf.title());
    println!("Issue:          {}", wf.issue_id.as_deref().unwrap_or("-"));
    println!("Type:           {}", wf.workflow_type);
    println!("Status:         {} (issue: {})", wf.status, wf.status.issue_status());
    println!("Priority:       {}", wf.priority);
    println!("Agent:          {} ({})", agent, wf.agent_type());
    println!("Started:        {}", wf.created_at);
    if let Some(completed) = &wf.completed_at {
        println!("Completed:      {}", completed);
    }
    if let Some(reason) = &wf.metadata.cancel_reason {
        println!("Cancel Reason:  {}", reason);
    }

    if !assignments.is_empty() {
        println!("\nSteps: {}", assignments.len());
        for a in &assignments {
            println!("  {:>2}. {:<30} {:<10} {}", a.step_number, a.step_name, a.status, a.agent_id);
        }
    }
    if !results.is_empty() {
        println!("\nResults: {}", results.len());
        for r in &results {
            println!(
                "  - {}: confidence={:.2} quality={:.1} duration={}ms",
                r.result_type, r.confidence_score, r.quality_score, r.execution_time_ms
            );
        }
    }
    Ok(0)
}

pub fn list(
    ctx: &Context,
    status: Option<WorkflowStatus>,
    workflow_type: Option<WorkflowType>,
    agent_type: Option<AgentType>,
    limit: usize,
    format: OutputFormat,
) -> anyhow::Result<u8> {
    let bridge = ctx.bridge()?;
    let filter = WorkflowFilter {
        status,
        workflow_type,
        agent_type,
        limit,
    };
    let workflows = bridge.list_workflows(&filter)?;

    if format == OutputFormat::Json {
        print_json(&workflows)?;
        return Ok(0);
    }

    if workflows.is_empty() {
        println!("No workflows found.");
        return Ok(0);
    }

    println!("{:<25} {:<14} {:<12} {:<10} {}", "WORKFLOW ID", "TYPE", "STATUS", "PRIORITY", "CREATED");
    println!("{}", "-".repeat(85));
    for wf in &workflows {
        println!(
            "{:<25} {:<14} {:<12} {:<10} {}",
            wf.id, wf.workflow_type, wf.status, wf.priority, wf.created_at
        );
    }
    println!("\nTotal: {} workflows", workflows.len());
    Ok(0)
}

pub fn cancel(ctx: &Context, workflow_id: &str, reason: &str) -> anyhow::Result<u8> {
    let bridge = ctx.bridge()?;
    bridge
        .cancel_workflow(workflow_id, Some(reason))
        .with_context(|| format!("failed to cancel workflow {}", workflow_id))?;
    println!("Workflow {} cancelled", workflow_id);
    Ok(0)
}

/// Pause or resume.
pub fn set_status(ctx: &Context, workflow_id: &str, status: WorkflowStatus) -> anyhow::Result<u8> {
    let bridge = ctx.bridge()?;
    let wf = bridge
        .update_workflow_status(workflow_id, status)
        .with_context(|| format!("failed to set workflow {} to {}", workflow_id, status))?;
    let verb = if status == WorkflowStatus::Paused { "paused" } else { "resumed" };
    println!("Workflow {} {}", wf.id, verb);
    Ok(0)
}

pub fn results(ctx: &Context, workflow_id: &str, format: OutputFormat) -> anyhow::Result<u8> {
    let bridge = ctx.bridge()?;
    let results = bridge.get_results(workflow_id)?;

    if format == OutputFormat::Json {
        print_json(&results)?;
        return Ok(0);
    }

    if results.is_empty() {
        println!("No results found for this workflow");
        return Ok(0);
    }

    println!("Results for workflow {}:", workflow_id);
    println!("{}", "=".repeat(60));
    for (i, r) in results.iter().enumerate() {
        println!("\nResult #{}:", i + 1);
        println!("  Type:           {}", r.result_type);
        println!("  Agent:          {}", r.agent_type);
        println!("  Confidence:     {:.2}", r.confidence_score);
        println!("  Quality Score:  {:.2}", r.quality_score);
        println!("  Execution Time: {}ms", r.execution_time_ms);
        if !r.artifacts.is_empty() {
            println!("  Artifacts:      {}", r.artifacts.join(", "));
        }
        println!("  Created:        {}", r.created_at);
    }
    Ok(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_variable() {
        assert_eq!(parse_variable("language=go").unwrap(), ("language".to_string(), "go".to_string()));
        assert_eq!(parse_variable("query=a=b").unwrap(), ("query".to_string(), "a=b".to_string()));
        assert_eq!(parse_variable("empty=").unwrap(), ("empty".to_string(), String::new()));
        assert!(parse_variable("novalue").is_err());
        assert!(parse_variable("=x").is_err());
    }
}
