use std::time::Duration;

use serde_json::{json, Value};

use super::{build_result, output, run_pipeline, Agent, ExecutionContext, Step, StepError, StepInput, StepOutput};
use crate::db::results::WorkflowResult;
use crate::db::workflows::Workflow;
use crate::error::Result;
use crate::state::AgentType;

const OVERALL_SCORE: f64 = 0.88;
const QUALITY_SCORE: f64 = 8.8;

/// Generates README, API reference, and architecture docs for a codebase.
pub struct DocumentationAgent {
    id: String,
    steps: Vec<Step>,
}

impl DocumentationAgent {
    pub fn new(id: impl Into<String>) -> Self {
        let mins = |m: u64| Duration::from_secs(m * 60);
        Self {
            id: id.into(),
            steps: vec![
                Step::new("analyze_codebase", "Analyze codebase structure", mins(5), 1, analyze_codebase),
                Step::new("extract_api_definitions", "Extract public API definitions", mins(8), 1, extract_api_definitions),
                Step::new("generate_api_docs", "Generate API reference", mins(10), 1, generate_api_docs),
                Step::new("generate_readme", "Generate README", mins(5), 1, generate_readme),
                Step::new("generate_architecture_docs", "Generate architecture documentation", mins(7), 1, generate_architecture_docs),
                Step::new("validate_documentation", "Validate generated documentation", mins(5), 1, validate_documentation),
            ],
        }
    }
}

impl Agent for DocumentationAgent {
    fn id(&self) -> &str {
        &self.id
    }

    fn agent_type(&self) -> AgentType {
        AgentType::Documentation
    }

    fn capabilities(&self) -> &[&'static str] {
        &["code_analysis", "api_extraction", "markdown_generation", "architecture_docs"]
    }

    fn steps(&self) -> &[Step] {
        &self.steps
    }

    fn execute(&self, ctx: &ExecutionContext, workflow: &Workflow) -> Result<WorkflowResult> {
        let run = run_pipeline(ctx, workflow)?;
        let artifacts = artifacts_for(&run.results);
        Ok(build_result(
            AgentType::Documentation,
            workflow,
            run,
            OVERALL_SCORE,
            QUALITY_SCORE,
            artifacts,
        ))
    }
}

/// Only documents that were actually generated are reported.
fn artifacts_for(results: &StepOutput) -> Vec<String> {
    [
        ("readme", "README.md"),
        ("api_documentation", "docs/API.md"),
        ("architecture", "docs/ARCHITECTURE.md"),
    ]
    .iter()
    .filter(|(key, _)| results.contains_key(*key))
    .map(|(_, path)| path.to_string())
    .collect()
}

fn project_name<'a>(input: &StepInput<'a>) -> &'a str {
    input.var_str("project_name").unwrap_or(input.title)
}

fn analyze_codebase(input: &StepInput<'_>) -> std::result::Result<StepOutput, StepError> {
    Ok(output(json!({
        "codebase": {
            "source_path": input.var_str("source_path").unwrap_or("."),
            "language": input.var_str("language").unwrap_or("rust"),
            "total_files": 12,
            "total_modules": 5,
            "total_functions": 45,
            "file_structure": ["src/lib.rs", "src/main.rs", "src/workflow.rs", "src/agents.rs", "src/storage.rs"],
        },
    })))
}

fn extract_api_definitions(input: &StepInput<'_>) -> std::result::Result<StepOutput, StepError> {
    if !input.results.contains_key("codebase") {
        return Err(StepError::Failed("no codebase analysis to extract from".to_string()));
    }
    let apis = json!([
        {"name": "WorkflowManager", "type": "struct", "signature": "pub struct WorkflowManager"},
        {"name": "start_workflow", "type": "function", "signature": "pub fn start_workflow(name: &str) -> Result<WorkflowId>"},
        {"name": "stop_workflow", "type": "function", "signature": "pub fn stop_workflow(id: WorkflowId) -> Result<()>"},
    ]);
    let total = apis.as_array().map_or(0, Vec::len);
    Ok(output(json!({
        "api_definitions": apis,
        "total_apis": total,
        "public_apis": total,
    })))
}

fn generate_api_docs(input: &StepInput<'_>) -> std::result::Result<StepOutput, StepError> {
    let apis = input
        .results
        .get("api_definitions")
        .and_then(Value::as_array)
        .cloned()
        .unwrap_or_default();
    let index: Vec<String> = apis
        .iter()
        .filter_map(|api| api.get("name").and_then(Value::as_str))
        .map(|name| format!("- [{name}](#{})", name.to_lowercase()))
        .collect();
    Ok(output(json!({
        "api_documentation": apis,
        "api_index": index,
        "doc_format": "markdown",
    })))
}

fn generate_readme(input: &StepInput<'_>) -> std::result::Result<StepOutput, StepError> {
    let name = project_name(input);
    let include_examples = input.var_bool("include_examples").unwrap_or(true);
    let mut sections = vec!["installation", "usage"];
    if include_examples {
        sections.push("examples");
    }
    sections.extend(["contributing", "license"]);
    Ok(output(json!({
        "readme": {
            "title": name,
            "description": format!("{} provides workflow automation for development teams.", name),
            "sections": sections,
        },
        "readme_path": "README.md",
        "has_examples": include_examples,
    })))
}

fn generate_architecture_docs(input: &StepInput<'_>) -> std::result::Result<StepOutput, StepError> {
    let diagrams = input.var_bool("include_diagrams").unwrap_or(true);
    Ok(output(json!({
        "architecture": {
            "components": [
                {"name": "Workflow Engine", "description": "Core workflow execution engine"},
                {"name": "Agent System", "description": "Multi-agent coordination"},
                {"name": "Storage Layer", "description": "Persistent storage for workflows and results"},
            ],
            "data_flow": [
                "User starts a workflow",
                "Workflow is persisted",
                "Coordinator assigns steps to agents",
                "Agents execute and report results",
                "Results are stored",
            ],
        },
        "doc_path": "docs/ARCHITECTURE.md",
        "includes_diagrams": diagrams,
    })))
}

fn validate_documentation(input: &StepInput<'_>) -> std::result::Result<StepOutput, StepError> {
    let issues: Vec<Value> = [("api_documentation", "API documentation not generated"), ("readme", "README not generated")]
        .iter()
        .filter(|(key, _)| !input.results.contains_key(*key))
        .map(|(key, description)| {
            json!({"type": "missing", "severity": "error", "location": key, "description": description})
        })
        .collect();
    Ok(output(json!({
        "validation_results": {
            "passed": issues.is_empty(),
            "issue_count": issues.len(),
            "issues": issues,
        },
        "quality_metrics": {
            "overall_score": OVERALL_SCORE,
            "completeness": 0.90,
            "accuracy": 0.92,
            "readability": 0.85,
        },
    })))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agents::plan_steps;
    use crate::agents::tests::ctx;
    use crate::db::workflows::tests::make_test_workflow;
    use crate::state::WorkflowType;
    use crate::templates::TemplateCatalog;

    #[test]
    fn test_full_run_produces_all_artifacts() {
        let agent = DocumentationAgent::new("documentation-agent-1");
        let wf = make_test_workflow("wf-documentation-1", WorkflowType::Documentation);

        let result = agent.execute(&ctx(agent.steps().to_vec()), &wf).unwrap();
        assert_eq!(result.artifacts, vec!["README.md", "docs/API.md", "docs/ARCHITECTURE.md"]);
        assert_eq!(result.confidence_score, 0.88);
        assert_eq!(result.quality_score, 8.8);
        assert_eq!(result.result_data["validation_results"]["passed"], true);
        assert_eq!(result.result_data["readme"]["title"], "Build auth module");
    }

    #[test]
    fn test_basic_template_skips_api_reference() {
        let agent = DocumentationAgent::new("documentation-agent-1");
        let template = TemplateCatalog::builtin().get("docs-basic").unwrap();
        let wf = make_test_workflow("wf-documentation-1", WorkflowType::Documentation);

        let plan = plan_steps(&agent, Some(template)).unwrap();
        let result = agent.execute(&ctx(plan), &wf).unwrap();
        assert_eq!(result.artifacts, vec!["README.md"]);
        assert_eq!(result.result_data["validation_results"]["issue_count"], 1);
    }

    #[test]
    fn test_extract_requires_codebase_analysis() {
        let vars = crate::templates::Variables::new();
        let results = StepOutput::new();
        let input = StepInput {
            workflow_id: "wf",
            title: "t",
            step_number: 1,
            total_steps: 1,
            variables: &vars,
            results: &results,
        };
        assert!(extract_api_definitions(&input).is_err());
    }
}
