//! Proof-of-concept agent: set up, generate, build, test, benchmark, report.
//!
//! Build and test outcomes are simulated. Setting the `build_success`
//! variable to false makes the build report failure, which fails `run_tests`
//! and with it the workflow.

use std::time::Duration;

use serde_json::{json, Value};
use tracing::warn;

use super::{build_result, output, run_pipeline, Agent, ExecutionContext, Step, StepError, StepInput, StepOutput};
use crate::db::results::WorkflowResult;
use crate::db::workflows::Workflow;
use crate::error::Result;
use crate::state::AgentType;

pub struct PocAgent {
    id: String,
    steps: Vec<Step>,
}

impl PocAgent {
    pub fn new(id: impl Into<String>) -> Self {
        let mins = |m: u64| Duration::from_secs(m * 60);
        Self {
            id: id.into(),
            steps: vec![
                Step::new("setup_environment", "Set up development environment", mins(5), 2, setup_environment),
                Step::new("generate_implementation", "Generate POC implementation code", mins(10), 2, generate_implementation),
                Step::new("build_code", "Build the generated code", mins(10), 1, build_code),
                Step::new("run_tests", "Execute test suite", mins(10), 1, run_tests),
                Step::new("benchmark_performance", "Run performance benchmarks", mins(8), 1, benchmark_performance),
                Step::new("cleanup_and_report", "Clean up and generate report", mins(5), 1, cleanup_and_report),
            ],
        }
    }
}

impl Agent for PocAgent {
    fn id(&self) -> &str {
        &self.id
    }

    fn agent_type(&self) -> AgentType {
        AgentType::Poc
    }

    fn capabilities(&self) -> &[&'static str] {
        &["code_generation", "build_automation", "test_execution", "benchmarking", "rollback"]
    }

    fn steps(&self) -> &[Step] {
        &self.steps
    }

    fn execute(&self, ctx: &ExecutionContext, workflow: &Workflow) -> Result<WorkflowResult> {
        let run = match run_pipeline(ctx, workflow) {
            Ok(run) => run,
            Err(e) => {
                warn!(workflow_id = %workflow.id, workspace = %workspace_dir(&workflow.id), "discarding POC workspace after failure");
                return Err(e);
            }
        };

        let artifacts = run
            .results
            .get("artifacts")
            .and_then(Value::as_array)
            .map(|a| a.iter().filter_map(Value::as_str).map(str::to_string).collect())
            .unwrap_or_default();
        let outcome = Outcome::from_results(&run.results);
        Ok(build_result(
            AgentType::Poc,
            workflow,
            run,
            outcome.confidence(),
            outcome.quality(),
            artifacts,
        ))
    }
}

/// Build and test outcome read back from step outputs.
#[derive(Debug, Clone, Copy, PartialEq)]
struct Outcome {
    build_success: bool,
    test_success: bool,
    /// Percent, 0 to 100. Zero when tests never ran.
    coverage: f64,
}

impl Outcome {
    fn from_results(results: &StepOutput) -> Self {
        let flag = |key: &str| results.get(key).and_then(Value::as_bool).unwrap_or(false);
        Self {
            build_success: flag("build_success"),
            test_success: flag("test_success"),
            coverage: results
                .get("test_results")
                .and_then(|t| t.get("coverage"))
                .and_then(Value::as_f64)
                .unwrap_or(0.0),
        }
    }

    fn confidence(&self) -> f64 {
        let mut c = 0.5;
        if self.build_success {
            c += 0.25;
        }
        if self.test_success {
            c += 0.25;
        }
        (c + self.coverage / 100.0 * 0.1).min(1.0)
    }

    fn quality(&self) -> f64 {
        let mut q = 5.0;
        if self.build_success {
            q += 2.0;
        }
        if self.test_success {
            q += 2.0;
        }
        (q + self.coverage / 100.0).min(10.0)
    }

    fn recommendation(&self) -> &'static str {
        match (self.build_success, self.test_success) {
            (true, true) => "production_ready",
            (true, false) => "needs_testing",
            (false, _) => "needs_fixes",
        }
    }
}

fn workspace_dir(workflow_id: &str) -> String {
    format!("/tmp/poc-{}", workflow_id)
}

fn language(input: &StepInput<'_>) -> String {
    input.var_str("language").unwrap_or("rust").to_lowercase()
}

fn setup_environment(input: &StepInput<'_>) -> std::result::Result<StepOutput, StepError> {
    let language = language(input);
    let tools: &[&str] = match language.as_str() {
        "rust" => &["cargo", "rustc", "clippy"],
        "go" => &["go", "gofmt", "golangci-lint"],
        "node" | "javascript" | "typescript" => &["node", "npm", "eslint"],
        "python" => &["python", "pip", "pytest"],
        _ => &[],
    };
    Ok(output(json!({
        "environment": {
            "language": language,
            "framework": input.var_str("framework").unwrap_or(""),
            "environment_ready": true,
            "tools_installed": tools,
            "workspace_dir": workspace_dir(input.workflow_id),
        },
    })))
}

fn generate_implementation(input: &StepInput<'_>) -> std::result::Result<StepOutput, StepError> {
    let language = language(input);
    let files: &[&str] = match language.as_str() {
        "rust" => &["Cargo.toml", "src/lib.rs", "src/main.rs", "tests/integration_tests.rs"],
        "go" => &["go.mod", "main.go", "main_test.go"],
        _ => &["README.md", "src/main", "tests/main_test"],
    };
    Ok(output(json!({
        "generated_files": files,
        "feature": input.var_str("feature").unwrap_or("basic_implementation"),
        "language": language,
        "implementation_type": "module",
        "code_metrics": {
            "lines_of_code": 150,
            "cyclomatic_complexity": 5.2,
            "maintainability_index": 85.0,
            "documentation_coverage": 60.0,
        },
    })))
}

fn build_code(input: &StepInput<'_>) -> std::result::Result<StepOutput, StepError> {
    let success = input.var_bool("build_success").unwrap_or(true);
    let build_output = if success {
        vec!["Compiling poc v0.1.0", "Finished dev [unoptimized + debuginfo] target(s)"]
    } else {
        vec!["Compiling poc v0.1.0", "error: could not compile `poc`"]
    };
    Ok(output(json!({
        "build_success": success,
        "build_output": build_output,
        "binary_path": "target/debug/poc",
        "warnings": 2,
        "errors": if success { 0 } else { 1 },
    })))
}

fn run_tests(input: &StepInput<'_>) -> std::result::Result<StepOutput, StepError> {
    if !input.result_bool("build_success") {
        return Err(StepError::Failed("cannot run tests: build failed".to_string()));
    }
    let (total, passed) = (15, 14);
    Ok(output(json!({
        "test_success": passed == total,
        "test_results": {
            "total_tests": total,
            "passed_tests": passed,
            "failed_tests": total - passed,
            "skipped_tests": 0,
            "coverage": 87.5,
            "test_output": [
                "running 15 tests",
                "test test_basic_functionality ... ok",
                "test test_error_handling ... ok",
                "test test_edge_cases ... FAILED",
                "test result: FAILED. 14 passed; 1 failed",
            ],
        },
    })))
}

fn benchmark_performance(input: &StepInput<'_>) -> std::result::Result<StepOutput, StepError> {
    if !input.result_bool("test_success") {
        warn!(workflow_id = input.workflow_id, "some tests failed, benchmarking anyway");
    }
    Ok(output(json!({
        "benchmark_success": true,
        "benchmark_results": {
            "benchmarks": [
                {"name": "bench_basic_operations", "iterations": 100_000, "duration_ns_per_op": 5400},
                {"name": "bench_concurrent_access", "iterations": 50_000, "duration_ns_per_op": 12_300},
            ],
            "total_duration_ms": 5600,
        },
        "performance_metrics": {
            "latency_avg_ms": 5.4,
            "latency_p95_ms": 8.2,
            "latency_p99_ms": 12.5,
            "memory_usage_mb": 45.2,
        },
    })))
}

fn cleanup_and_report(input: &StepInput<'_>) -> std::result::Result<StepOutput, StepError> {
    let outcome = Outcome::from_results(input.results);
    Ok(output(json!({
        "report": {
            "build_success": outcome.build_success,
            "test_success": outcome.test_success,
            "overall_success": outcome.build_success && outcome.test_success,
            "steps_completed": input.step_number,
            "total_steps": input.total_steps,
            "recommendation": outcome.recommendation(),
        },
        "artifacts": [
            "poc_implementation.tar.gz",
            "test_report.json",
            "benchmark_results.json",
            "performance_analysis.md",
        ],
        "summary": format!(
            "POC completed with build={}, tests={}",
            outcome.build_success, outcome.test_success
        ),
    })))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agents::tests::ctx;
    use crate::db::workflows::tests::make_test_workflow;
    use crate::state::{ResultType, WorkflowType};

    #[test]
    fn test_default_run_scores() {
        let agent = PocAgent::new("poc-agent-1");
        let wf = make_test_workflow("wf-poc-1", WorkflowType::Poc);

        let result = agent.execute(&ctx(agent.steps().to_vec()), &wf).unwrap();
        assert_eq!(result.result_type, ResultType::PocResults);
        // Build ok, one failing test, 87.5% coverage
        assert!((result.confidence_score - 0.8375).abs() < 1e-9);
        assert!((result.quality_score - 7.875).abs() < 1e-9);
        assert_eq!(result.result_data["report"]["recommendation"], "needs_testing");
        assert_eq!(result.artifacts.len(), 4);
        assert_eq!(result.result_data["environment"]["tools_installed"][0], "cargo");
    }

    #[test]
    fn test_declared_step_budgets() {
        let agent = PocAgent::new("poc-agent-1");
        let budgets: Vec<_> = agent.steps().iter().map(|s| (s.name, s.timeout.as_secs(), s.retry_count)).collect();
        assert_eq!(
            budgets,
            vec![
                ("setup_environment", 300, 2),
                ("generate_implementation", 600, 2),
                ("build_code", 600, 1),
                ("run_tests", 600, 1),
                ("benchmark_performance", 480, 1),
                ("cleanup_and_report", 300, 1),
            ]
        );
    }

    #[test]
    fn test_build_failure_fails_run_tests() {
        let agent = PocAgent::new("poc-agent-1");
        let mut wf = make_test_workflow("wf-poc-1", WorkflowType::Poc);
        wf.metadata
            .variables
            .insert("build_success".to_string(), json!("false"));

        let err = agent.execute(&ctx(agent.steps().to_vec()), &wf).unwrap_err();
        assert_eq!(
            err.to_string(),
            "Execution failed: step run_tests failed: cannot run tests: build failed"
        );
    }

    #[test]
    fn test_go_toolchain() {
        let agent = PocAgent::new("poc-agent-1");
        let mut wf = make_test_workflow("wf-poc-1", WorkflowType::Poc);
        wf.metadata.variables.insert("language".to_string(), json!("go"));

        let result = agent.execute(&ctx(agent.steps().to_vec()), &wf).unwrap();
        assert_eq!(
            result.result_data["environment"]["tools_installed"],
            json!(["go", "gofmt", "golangci-lint"])
        );
        assert_eq!(result.result_data["generated_files"][0], "go.mod");
    }

    #[test]
    fn test_outcome_caps_and_recommendations() {
        let perfect = Outcome {
            build_success: true,
            test_success: true,
            coverage: 100.0,
        };
        assert_eq!(perfect.confidence(), 1.0);
        assert_eq!(perfect.quality(), 10.0);
        assert_eq!(perfect.recommendation(), "production_ready");

        let broken = Outcome {
            build_success: false,
            test_success: false,
            coverage: 0.0,
        };
        assert_eq!(broken.confidence(), 0.5);
        assert_eq!(broken.quality(), 5.0);
        assert_eq!(broken.recommendation(), "needs_fixes");
    }
}
