use bd_workflow::state::WorkflowType;
use bd_workflow::templates::{format_duration, TemplateCatalog};

use super::{print_json, OutputFormat};

pub fn list(workflow_type: Option<WorkflowType>, format: OutputFormat) -> anyhow::Result<u8> {
    let templates = TemplateCatalog::builtin().list(workflow_type);

    if format == OutputFormat::Json {
        print_json(&templates)?;
        return Ok(0);
    }

    println!("{:<22} {:<15} {:<14} {}", "ID", "AGENT TYPE", "STEPS", "DESCRIPTION");
    println!("{}", "-".repeat(80));
    for t in &templates {
        println!("{:<22} {:<15} {:<14} {}", t.id, t.workflow_type, t.steps.len(), t.description);
    }
    println!("\nTotal: {} templates", templates.len());
    Ok(0)
}

pub fn show(template_id: &str, format: OutputFormat) -> anyhow::Result<u8> {
    let t = TemplateCatalog::builtin().get(template_id)?;

    if format == OutputFormat::Json {
        print_json(t)?;
        return Ok(0);
    }

    println!("Template: {}", t.id);
    println!("================");
    println!("Name:              {}", t.name);
    println!("Description:       {}", t.description);
    println!("Agent Type:        {}", t.workflow_type);
    println!("Timeout:           {}", format_duration(t.execution.timeout));
    println!("Max Retries:       {}", t.execution.max_retries);
    println!("Continue On Error: {}", t.execution.continue_on_error);

    println!("\nSteps:");
    for (i, step) in t.steps.iter().enumerate() {
        println!(
            "  {}. {:<30} timeout={} retries={}",
            i + 1,
            step.name,
            format_duration(step.timeout),
            step.retry_count
        );
        println!("     {}", step.description);
    }

    if !t.variables.is_empty() {
        println!("\nDefault Variables:");
        for (k, v) in &t.variables {
            println!("  {} = {}", k, v);
        }
    }
    Ok(0)
}
