//! Library research agent.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use super::{build_result, output, run_pipeline, Agent, ExecutionContext, Step, StepError, StepInput, StepOutput};
use crate::db::results::WorkflowResult;
use crate::db::workflows::Workflow;
use crate::error::Result;
use crate::state::AgentType;

const NAMED_CONFIDENCE: f64 = 0.85;
const INFERRED_CONFIDENCE: f64 = 0.6;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LibraryFinding {
    pub name: String,
    pub registry: String,
    pub relevance_score: f64,
    pub confidence_score: f64,
}

pub struct ResearchAgent {
    id: String,
    steps: Vec<Step>,
}

impl ResearchAgent {
    pub fn new(id: impl Into<String>) -> Self {
        let mins = |m: u64| Duration::from_secs(m * 60);
        Self {
            id: id.into(),
            steps: vec![
                Step::new("library_discovery", "Discover candidate libraries", mins(5), 2, discover_libraries),
                Step::new("documentation_analysis", "Analyze library documentation", mins(10), 2, analyze_documentation),
                Step::new("static_analysis", "Inspect the local project", mins(8), 1, static_analysis),
                Step::new("findings_synthesis", "Rank findings and recommend", mins(5), 1, synthesize_findings),
            ],
        }
    }
}

impl Agent for ResearchAgent {
    fn id(&self) -> &str {
        &self.id
    }

    fn agent_type(&self) -> AgentType {
        AgentType::Research
    }

    fn capabilities(&self) -> &[&'static str] {
        &["library_discovery", "documentation_analysis", "static_analysis", "benchmark_comparison"]
    }

    fn steps(&self) -> &[Step] {
        &self.steps
    }

    fn execute(&self, ctx: &ExecutionContext, workflow: &Workflow) -> Result<WorkflowResult> {
        let run = run_pipeline(ctx, workflow)?;
        let findings = findings_from(&run.results);
        Ok(build_result(
            AgentType::Research,
            workflow,
            run,
            confidence(&findings),
            quality(&findings),
            vec![
                "research_findings.json".to_string(),
                "library_comparison.md".to_string(),
                "recommendations.md".to_string(),
            ],
        ))
    }
}

fn findings_from(results: &StepOutput) -> Vec<LibraryFinding> {
    results
        .get("libraries")
        .cloned()
        .and_then(|v| serde_json::from_value(v).ok())
        .unwrap_or_default()
}

/// Mean finding confidence, plus 0.05 when there is more than one to compare.
fn confidence(findings: &[LibraryFinding]) -> f64 {
    if findings.is_empty() {
        return 0.0;
    }
    let avg = findings.iter().map(|f| f.confidence_score).sum::<f64>() / findings.len() as f64;
    if findings.len() > 1 {
        (avg + 0.05).min(1.0)
    } else {
        avg
    }
}

fn quality(findings: &[LibraryFinding]) -> f64 {
    if findings.is_empty() {
        return 0.0;
    }
    let mut q = 7.0;
    if findings.len() > 1 {
        q += 1.0;
    }
    q += 0.5 * findings.iter().filter(|f| f.confidence_score > 0.9).count() as f64;
    q.min(10.0)
}

fn registry_for(ecosystem: &str) -> &'static str {
    match ecosystem.to_lowercase().as_str() {
        "rust" | "cargo" => "crates.io",
        "node" | "npm" | "javascript" | "typescript" => "npm",
        "python" | "pypi" => "pypi",
        "elixir" | "erlang" | "hex" => "hex",
        "go" | "golang" => "pkg.go.dev",
        _ => "unknown",
    }
}

/// Library names from the `libraries` variable: a comma list or a JSON array.
fn named_libraries(input: &StepInput<'_>) -> Vec<String> {
    match input.variables.get("libraries") {
        Some(Value::String(s)) => s
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .collect(),
        Some(Value::Array(items)) => items.iter().filter_map(Value::as_str).map(str::to_string).collect(),
        _ => Vec::new(),
    }
}

fn slug(text: &str) -> String {
    text.split(|c: char| !c.is_ascii_alphanumeric())
        .filter(|w| !w.is_empty())
        .map(str::to_lowercase)
        .collect::<Vec<_>>()
        .join("-")
}

fn discover_libraries(input: &StepInput<'_>) -> std::result::Result<StepOutput, StepError> {
    let query = input.var_str("query").unwrap_or(input.title);
    let ecosystem = input.var_str("ecosystem").unwrap_or("rust");
    let registry = registry_for(ecosystem);

    let named = named_libraries(input);
    let (names, confidence) = if named.is_empty() {
        let inferred = slug(query);
        if inferred.is_empty() {
            return Err(StepError::Failed(
                "research query is required (set the query variable or a title)".to_string(),
            ));
        }
        (vec![inferred], INFERRED_CONFIDENCE)
    } else {
        (named, NAMED_CONFIDENCE)
    };

    let count = names.len();
    let findings: Vec<LibraryFinding> = names
        .into_iter()
        .enumerate()
        .map(|(rank, name)| LibraryFinding {
            name,
            registry: registry.to_string(),
            relevance_score: 1.0 - rank as f64 / (count as f64 * 2.0),
            confidence_score: confidence,
        })
        .collect();

    Ok(output(json!({
        "libraries": findings,
        "query": query,
        "focus": input.var_str("focus").unwrap_or("general"),
        "ecosystem": ecosystem,
        "libraries_found": count,
    })))
}

fn analyze_documentation(input: &StepInput<'_>) -> std::result::Result<StepOutput, StepError> {
    let findings = findings_from(input.results);
    let analysis: serde_json::Map<String, Value> = findings
        .iter()
        .map(|f| {
            let url = match f.registry.as_str() {
                "crates.io" => format!("https://docs.rs/{}", f.name),
                "npm" => format!("https://www.npmjs.com/package/{}", f.name),
                "pypi" => format!("https://pypi.org/project/{}", f.name),
                "hex" => format!("https://hexdocs.pm/{}", f.name),
                "pkg.go.dev" => format!("https://pkg.go.dev/{}", f.name),
                _ => String::new(),
            };
            (f.name.clone(), json!({"documentation_url": url, "note": "manual review recommended"}))
        })
        .collect();

    Ok(output(json!({
        "documentation_analysis": analysis,
        "libraries_analyzed": findings.len(),
    })))
}

fn static_analysis(input: &StepInput<'_>) -> std::result::Result<StepOutput, StepError> {
    let project_path = input.var_str("project_path").unwrap_or(".");
    let root = Path::new(project_path);
    let project_type = [("Cargo.toml", "rust"), ("go.mod", "go"), ("package.json", "node")]
        .iter()
        .find(|(manifest, _)| root.join(manifest).is_file())
        .map(|(_, kind)| *kind);

    let analysis = match project_type {
        Some(kind) => json!({"project_path": project_path, "project_type": kind}),
        None => json!({
            "project_path": project_path,
            "note": format!("No Go/Rust/Node project detected at {}", project_path),
        }),
    };
    Ok(output(json!({
        "static_analysis": analysis,
        "analysis_method": "manifest_detection",
    })))
}

fn synthesize_findings(input: &StepInput<'_>) -> std::result::Result<StepOutput, StepError> {
    let mut findings = findings_from(input.results);
    findings.sort_by(|a, b| b.relevance_score.total_cmp(&a.relevance_score));

    let recommendations: Vec<Value> = findings
        .iter()
        .enumerate()
        .map(|(i, f)| {
            json!({
                "rank": i + 1,
                "library": f.name,
                "registry": f.registry,
                "confidence": f.confidence_score,
            })
        })
        .collect();
    let top_confidence = findings.first().map_or(0.0, |f| f.confidence_score);

    let mut sources: Vec<&str> = findings.iter().map(|f| f.registry.as_str()).collect();
    sources.sort_unstable();
    sources.dedup();

    Ok(output(json!({
        "recommendations": recommendations,
        "summary": {
            "primary_recommendation": findings.first().map(|f| f.name.as_str()).unwrap_or(""),
            "risk_assessment": if top_confidence >= 0.8 { "low" } else { "medium" },
        },
        "analysis_summary": {
            "total_libraries_found": findings.len(),
            "methodology": "automated_research",
            "sources": sources,
        },
    })))
}
