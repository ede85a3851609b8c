use serde_json::json;

use bd_workflow::state::AgentType;

use super::{print_json, Context, OutputFormat};

pub fn register(
    ctx: &Context,
    agent_type: AgentType,
    agent_id: &str,
    max_workload: Option<i64>,
    capabilities: &[String],
) -> anyhow::Result<u8> {
    let bridge = ctx.bridge()?;
    let agent = bridge.register_agent(agent_type, agent_id, max_workload, capabilities)?;

    println!("Agent {} registered successfully", agent.agent_id);
    println!("  Type:         {}", agent.agent_type);
    println!("  Max Workload: {}", agent.max_workload);
    if !agent.capabilities.is_empty() {
        println!("  Capabilities: {}", agent.capabilities.join(", "));
    }
    Ok(0)
}

pub fn unregister(ctx: &Context, agent_type: AgentType, agent_id: &str) -> anyhow::Result<u8> {
    let bridge = ctx.bridge()?;
    bridge.unregister_agent(agent_type, agent_id)?;
    println!("Agent {} unregistered", agent_id);
    Ok(0)
}

pub fn heartbeat(ctx: &Context, agent_type: AgentType, agent_id: &str) -> anyhow::Result<u8> {
    let bridge = ctx.bridge()?;
    bridge.heartbeat(agent_type, agent_id)?;
    Ok(0)
}

pub fn status(ctx: &Context, agent_type: AgentType, agent_id: &str, format: OutputFormat) -> anyhow::Result<u8> {
    let bridge = ctx.bridge()?;
    let agent = bridge.get_agent(agent_type, agent_id)?;
    let open = bridge.agent_assignments(agent_type, agent_id)?;

    if format == OutputFormat::Json {
        print_json(&json!({ "agent": agent, "assignments": open }))?;
        return Ok(0);
    }

    println!("Agent: {}", agent.agent_id);
    println!("============");
    println!("Type:            {}", agent.agent_type);
    println!("Status:          {}", agent.status);
    println!("Current Load:    {}/{}", agent.current_workload, agent.max_workload);
    println!("Last Heartbeat:  {}", agent.last_heartbeat.as_deref().unwrap_or("never"));

    println!("\nActive Assignments:");
    if open.is_empty() {
        println!("  No active assignments");
    }
    for a in &open {
        println!("  - {} [{}] {} since {}", a.workflow_id, a.step_name, a.status, a.assigned_at);
    }
    Ok(0)
}

pub fn list(ctx: &Context, agent_type: Option<AgentType>, format: OutputFormat) -> anyhow::Result<u8> {
    let bridge = ctx.bridge()?;
    let agents = bridge.list_agents(agent_type)?;

    if format == OutputFormat::Json {
        print_json(&agents)?;
        return Ok(0);
    }

    if agents.is_empty() {
        println!("No agents registered.");
        return Ok(0);
    }

    println!("{:<25} {:<14} {:<10} {:<12} {}", "AGENT ID", "TYPE", "STATUS", "WORKLOAD", "LAST HEARTBEAT");
    println!("{}", "-".repeat(90));
    for a in &agents {
        println!(
            "{:<25} {:<14} {:<10} {:<12} {}",
            a.agent_id,
            a.agent_type,
            a.status,
            format!("{}/{}", a.current_workload, a.max_workload),
            a.last_heartbeat.as_deref().unwrap_or("never")
        );
    }
    println!("\nTotal: {} agents", agents.len());
    Ok(0)
}

pub fn recover(ctx: &Context) -> anyhow::Result<u8> {
    let bridge = ctx.bridge()?;
    let report = bridge.recover_from_crash()?;

    println!("Failed {} interrupted step(s)", report.failed_assignments.len());
    if report.unfinished_workflows.is_empty() {
        println!("No unfinished workflows");
    } else {
        println!("Unfinished workflows (resume or cancel):");
        for id in &report.unfinished_workflows {
            println!("  - {}", id);
        }
    }
    Ok(0)
}

pub fn select(ctx: &Context, agent_type: AgentType, format: OutputFormat) -> anyhow::Result<u8> {
    let bridge = ctx.bridge()?;
    let best = bridge.select_agent(agent_type)?;

    if format == OutputFormat::Json {
        print_json(&best)?;
        return Ok(0);
    }

    println!("{}", best.agent_id);
    println!("  {}", best.reason);
    Ok(0)
}

pub fn plan_handoff(
    ctx: &Context,
    workflow_id: &str,
    from_agent_id: &str,
    to_agent_type: AgentType,
    format: OutputFormat,
) -> anyhow::Result<u8> {
    let bridge = ctx.bridge()?;
    let plan = bridge.plan_handoff(workflow_id, from_agent_id, to_agent_type)?;

    if format == OutputFormat::Json {
        print_json(&plan)?;
        return Ok(0);
    }

    println!("Handoff plan for {}", plan.workflow_id);
    println!("  From:    {}", plan.from_agent_id);
    println!("  To:      {} ({})", plan.to_agent_id, plan.to_agent_type);
    println!("  Results: {}", plan.result_count);
    println!("  {}", plan.reason);
    Ok(0)
}

pub fn rebalance(ctx: &Context, format: OutputFormat) -> anyhow::Result<u8> {
    let bridge = ctx.bridge()?;
    let suggestions = bridge.rebalance_agents()?;

    if format == OutputFormat::Json {
        print_json(&suggestions)?;
        return Ok(0);
    }

    if suggestions.is_empty() {
        println!("No overloaded agents.");
        return Ok(0);
    }
    for s in &suggestions {
        println!("  {} -> {} ({}): {}", s.from_agent_id, s.to_agent_id, s.agent_type, s.reason);
    }
    Ok(0)
}
