//! Built-in workflow templates.
//!
//! The catalog is built once on first use and is read-only afterwards.

use std::collections::BTreeMap;
use std::sync::OnceLock;
use std::time::Duration;

use serde::{Serialize, Serializer};
use serde_json::Value;

use crate::error::{CoordinationError, Result};
use crate::state::WorkflowType;

/// Variables a workflow sees during execution.
pub type Variables = BTreeMap<String, Value>;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TemplateStep {
    pub name: &'static str,
    pub description: &'static str,
    #[serde(serialize_with = "serialize_duration")]
    pub timeout: Duration,
    pub retry_count: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ExecutionConfig {
    #[serde(serialize_with = "serialize_duration")]
    pub timeout: Duration,
    pub max_retries: u32,
    pub continue_on_error: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WorkflowTemplate {
    pub id: &'static str,
    pub name: &'static str,
    pub description: &'static str,
    pub workflow_type: WorkflowType,
    pub steps: Vec<TemplateStep>,
    pub variables: Variables,
    pub execution: ExecutionConfig,
}

impl WorkflowTemplate {
    /// Merge caller variables over the template defaults. Caller values win.
    pub fn apply(&self, overrides: &Variables) -> Variables {
        let mut merged = self.variables.clone();
        merged.extend(overrides.iter().map(|(k, v)| (k.clone(), v.clone())));
        merged
    }
}

/// Ordered, read-only set of templates.
#[derive(Debug)]
pub struct TemplateCatalog {
    templates: Vec<WorkflowTemplate>,
}

impl TemplateCatalog {
    pub fn new(mut templates: Vec<WorkflowTemplate>) -> Self {
        templates.sort_by(|a, b| a.id.cmp(b.id));
        Self { templates }
    }

    /// The process-wide built-in catalog.
    pub fn builtin() -> &'static TemplateCatalog {
        static CATALOG: OnceLock<TemplateCatalog> = OnceLock::new();
        CATALOG.get_or_init(|| TemplateCatalog::new(builtin_templates()))
    }

    /// All templates, optionally restricted to one workflow type, ordered by id.
    pub fn list(&self, workflow_type: Option<WorkflowType>) -> Vec<&WorkflowTemplate> {
        self.templates
            .iter()
            .filter(|t| workflow_type.map_or(true, |wt| t.workflow_type == wt))
            .collect()
    }

    pub fn get(&self, id: &str) -> Result<&WorkflowTemplate> {
        self.templates
            .iter()
            .find(|t| t.id == id)
            .ok_or_else(|| CoordinationError::TemplateNotFound(id.to_string()))
    }
}

/// Render a duration the way templates declare them: `5m`, `45s`, `1h30m`.
pub fn format_duration(d: Duration) -> String {
    let secs = d.as_secs();
    if secs == 0 {
        return format!("{}ms", d.as_millis());
    }
    let (h, m, s) = (secs / 3600, (secs % 3600) / 60, secs % 60);
    let mut out = String::new();
    if h > 0 {
        out.push_str(&format!("{}h", h));
    }
    if m > 0 {
        out.push_str(&format!("{}m", m));
    }
    if s > 0 {
        out.push_str(&format!("{}s", s));
    }
    out
}

fn serialize_duration<S: Serializer>(d: &Duration, s: S) -> std::result::Result<S::Ok, S::Error> {
    s.serialize_str(&format_duration(*d))
}

const fn mins(m: u64) -> Duration {
    Duration::from_secs(m * 60)
}

fn step(name: &'static str, description: &'static str, timeout_mins: u64, retry_count: u32) -> TemplateStep {
    TemplateStep {
        name,
        description,
        timeout: mins(timeout_mins),
        retry_count,
    }
}

fn vars(pairs: &[(&str, Value)]) -> Variables {
    pairs.iter().map(|(k, v)| (k.to_string(), v.clone())).collect()
}

fn builtin_templates() -> Vec<WorkflowTemplate> {
    vec![
        WorkflowTemplate {
            id: "research-basic",
            name: "Basic Research",
            description: "Basic library research with discovery and analysis",
            workflow_type: WorkflowType::Research,
            steps: vec![
                step("library_discovery", "Discover relevant libraries", 5, 2),
                step("documentation_analysis", "Analyze documentation", 10, 2),
                step("findings_synthesis", "Synthesize findings", 5, 1),
            ],
            variables: vars(&[("focus", "general".into())]),
            execution: ExecutionConfig {
                timeout: mins(30),
                max_retries: 3,
                continue_on_error: false,
            },
        },
        WorkflowTemplate {
            id: "research-performance",
            name: "Performance Research",
            description: "Research focused on performance benchmarks and comparisons",
            workflow_type: WorkflowType::Research,
            steps: vec![
                step("library_discovery", "Discover libraries with focus on performance", 5, 2),
                step("documentation_analysis", "Analyze performance characteristics", 10, 2),
                step("static_analysis", "Analyze implementation efficiency", 8, 1),
                step("findings_synthesis", "Generate performance comparison report", 5, 1),
            ],
            variables: vars(&[("focus", "performance".into())]),
            execution: ExecutionConfig {
                timeout: mins(30),
                max_retries: 3,
                continue_on_error: false,
            },
        },
        WorkflowTemplate {
            id: "poc-basic",
            name: "Basic POC",
            description: "Basic proof-of-concept with build and test",
            workflow_type: WorkflowType::Poc,
            steps: vec![
                step("setup_environment", "Setup development environment", 5, 2),
                step("generate_implementation", "Generate POC code", 10, 2),
                step("build_code", "Build the code", 10, 1),
                step("run_tests", "Run test suite", 10, 1),
                step("cleanup_and_report", "Generate report", 5, 1),
            ],
            variables: vars(&[("language", "rust".into())]),
            execution: ExecutionConfig {
                timeout: mins(45),
                max_retries: 3,
                continue_on_error: false,
            },
        },
        WorkflowTemplate {
            id: "poc-full",
            name: "Full POC with Benchmarks",
            description: "Complete POC including performance benchmarks",
            workflow_type: WorkflowType::Poc,
            steps: vec![
                step("setup_environment", "Setup development environment", 5, 2),
                step("generate_implementation", "Generate POC code", 10, 2),
                step("build_code", "Build the code", 10, 1),
                step("run_tests", "Run test suite", 10, 1),
                step("benchmark_performance", "Run performance benchmarks", 8, 1),
                step("cleanup_and_report", "Generate comprehensive report", 5, 1),
            ],
            variables: vars(&[("language", "rust".into()), ("benchmarks", true.into())]),
            execution: ExecutionConfig {
                timeout: mins(50),
                max_retries: 3,
                continue_on_error: false,
            },
        },
        WorkflowTemplate {
            id: "docs-basic",
            name: "Basic Documentation",
            description: "Generate README and basic API docs",
            workflow_type: WorkflowType::Documentation,
            steps: vec![
                step("analyze_codebase", "Analyze codebase structure", 5, 1),
                step("extract_api_definitions", "Extract API definitions", 8, 1),
                step("generate_readme", "Generate README", 5, 1),
                step("validate_documentation", "Validate documentation", 5, 1),
            ],
            variables: vars(&[("include_examples", true.into())]),
            execution: ExecutionConfig {
                timeout: mins(30),
                max_retries: 2,
                continue_on_error: false,
            },
        },
        WorkflowTemplate {
            id: "docs-comprehensive",
            name: "Comprehensive Documentation",
            description: "Generate complete documentation including architecture docs",
            workflow_type: WorkflowType::Documentation,
            steps: vec![
                step("analyze_codebase", "Analyze codebase structure", 5, 1),
                step("extract_api_definitions", "Extract API definitions", 8, 1),
                step("generate_api_docs", "Generate API reference", 10, 1),
                step("generate_readme", "Generate README", 5, 1),
                step("generate_architecture_docs", "Generate architecture documentation", 7, 1),
                step("validate_documentation", "Validate all documentation", 5, 1),
            ],
            variables: vars(&[
                ("include_examples", true.into()),
                ("include_architecture", true.into()),
                ("include_diagrams", true.into()),
            ]),
            execution: ExecutionConfig {
                timeout: mins(35),
                max_retries: 2,
                continue_on_error: false,
            },
        },
        WorkflowTemplate {
            id: "validation-standard",
            name: "Standard Validation",
            description: "Standard validation with code quality, security, and performance checks",
            workflow_type: WorkflowType::Validation,
            steps: vec![
                step("load_checklist", "Load validation checklist", 2, 1),
                step("validate_code_quality", "Validate code quality", 5, 1),
                step("validate_security", "Security validation", 5, 1),
                step("generate_validation_report", "Generate report", 5, 1),
            ],
            variables: vars(&[("checklist_id", "default".into())]),
            execution: ExecutionConfig {
                timeout: mins(20),
                max_retries: 1,
                continue_on_error: true,
            },
        },
        WorkflowTemplate {
            id: "validation-full",
            name: "Full Validation",
            description: "Comprehensive validation including all categories",
            workflow_type: WorkflowType::Validation,
            steps: vec![
                step("load_checklist", "Load validation checklist", 2, 1),
                step("validate_code_quality", "Validate code quality", 5, 1),
                step("validate_security", "Security validation", 5, 1),
                step("validate_performance", "Performance validation", 5, 1),
                step("validate_compliance", "Compliance checks", 3, 1),
                step("generate_validation_report", "Generate comprehensive report", 5, 1),
            ],
            variables: vars(&[("checklist_id", "default".into())]),
            execution: ExecutionConfig {
                timeout: mins(25),
                max_retries: 1,
                continue_on_error: true,
            },
        },
    ]
}
