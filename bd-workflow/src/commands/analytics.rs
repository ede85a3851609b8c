use bd_workflow::analytics::{parse_period, Reporter};
use bd_workflow::state::{AgentStatus, AgentType};

use super::{print_json, Context, OutputFormat};

pub fn performance(
    ctx: &Context,
    period: &str,
    agent_type: Option<AgentType>,
    format: OutputFormat,
) -> anyhow::Result<u8> {
    let window = parse_period(period)?;
    let bridge = ctx.bridge()?;
    let report = Reporter::new(bridge.conn()).performance(window, agent_type)?;

    if format == OutputFormat::Json {
        print_json(&serde_json::json!({ "period": period, "agents": report }))?;
        return Ok(0);
    }

    println!("Performance Analytics ({})", period);
    println!("{}", "=".repeat(50));
    if report.is_empty() {
        println!("No workflows finished in this period.");
        return Ok(0);
    }
    for p in &report {
        println!("\n{}:", p.agent_type);
        println!("  Total:              {}", p.total_workflows);
        println!("  Completed:          {}", p.successful_workflows);
        println!("  Failed:             {}", p.failed_workflows);
        println!("  Success Rate:       {:.1}%", p.success_rate * 100.0);
        println!("  Avg Execution Time: {:.0} ms", p.avg_execution_time_ms);
        println!("  Avg Confidence:     {:.2}", p.avg_confidence_score);
    }
    Ok(0)
}

pub fn summary(ctx: &Context, period: Option<&str>, format: OutputFormat) -> anyhow::Result<u8> {
    let window = period.map(parse_period).transpose()?;
    let bridge = ctx.bridge()?;
    let summary = Reporter::new(bridge.conn()).summary(window)?;

    if format == OutputFormat::Json {
        print_json(&summary)?;
        return Ok(0);
    }

    let count = |status: &str| summary.by_status.get(status).copied().unwrap_or(0);
    println!("System Summary{}", period.map(|p| format!(" ({})", p)).unwrap_or_default());
    println!("{}", "=".repeat(50));
    println!("\nWorkflows:");
    for status in ["active", "paused", "completed", "failed", "cancelled"] {
        println!("  {:<11} {}", format!("{}:", capitalize(status)), count(status));
    }
    println!("  {:<11} {}", "Total:", summary.total_workflows);
    match summary.success_rate {
        Some(rate) => println!("  Success Rate: {:.1}%", rate * 100.0),
        None => println!("  Success Rate: -"),
    }
    if let Some(avg) = summary.avg_execution_time_ms {
        println!("  Avg Execution Time: {:.0} ms", avg);
    }

    let active = summary.agents.iter().filter(|a| a.status == AgentStatus::Active).count();
    println!("\nAgents:");
    println!("  Total:      {}", summary.agents.len());
    println!("  Active:     {}", active);
    for a in &summary.agents {
        println!(
            "  - {} ({}) load {}/{}, assignments: {} done, {} failed, {} open",
            a.agent_id,
            a.agent_type,
            a.current_workload,
            a.max_workload,
            a.assignments_completed,
            a.assignments_failed,
            a.assignments_in_progress
        );
    }
    Ok(0)
}

fn capitalize(s: &str) -> String {
    let mut chars = s.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}
