//! In-process metrics for workflow and step executions.
//!
//! Counters and duration samples live only for the life of the collector.
//! Per-day rollups are persisted to `workflow_analytics` by
//! [`MetricsCollector::flush_to_db`].

use std::collections::BTreeMap;
use std::time::Duration;

use chrono::Utc;
use rusqlite::Connection;
use serde::Serialize;
use tracing::debug;

use crate::db::analytics::{self, AnalyticsRollup};
use crate::error::{Result, StoreContext};
use crate::state::{AgentType, WorkflowType};

/// Summary of the samples recorded under one duration key, in milliseconds.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DurationStats {
    pub count: usize,
    pub avg_ms: f64,
    pub p95_ms: f64,
    pub p99_ms: f64,
    pub max_ms: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct MetricsSnapshot {
    pub counters: BTreeMap<String, u64>,
    pub durations: BTreeMap<String, DurationStats>,
}

#[derive(Debug, Default)]
struct Bucket {
    total: i64,
    successful: i64,
    failed: i64,
    total_ms: f64,
    /// Sum over successful workflows only.
    confidence_sum: f64,
}

type BucketKey = (String, WorkflowType, AgentType);

#[derive(Debug, Default)]
pub struct MetricsCollector {
    counters: BTreeMap<String, u64>,
    durations: BTreeMap<String, Vec<Duration>>,
    buckets: BTreeMap<BucketKey, Bucket>,
}

impl MetricsCollector {
    pub fn new() -> Self {
        Self::default()
    }

    fn incr(&mut self, key: String) {
        *self.counters.entry(key).or_insert(0) += 1;
    }

    fn sample(&mut self, key: String, duration: Duration) {
        self.durations.entry(key).or_default().push(duration);
    }

    pub fn record_workflow_start(&mut self, workflow_id: &str, workflow_type: WorkflowType) {
        debug!(workflow_id, %workflow_type, "workflow started");
        self.incr(format!("workflows.started.{}", workflow_type));
    }

    /// Record a finished workflow. `confidence` is the stored result's score
    /// and only counts toward the average when the workflow succeeded.
    pub fn record_workflow_end(
        &mut self,
        workflow_id: &str,
        workflow_type: WorkflowType,
        agent_type: AgentType,
        duration: Duration,
        success: bool,
        confidence: Option<f64>,
    ) {
        self.record_workflow_end_on(
            &Utc::now().format("%Y-%m-%d").to_string(),
            workflow_id,
            workflow_type,
            agent_type,
            duration,
            success,
            confidence,
        );
    }

    #[allow(clippy::too_many_arguments)]
    fn record_workflow_end_on(
        &mut self,
        date: &str,
        workflow_id: &str,
        workflow_type: WorkflowType,
        agent_type: AgentType,
        duration: Duration,
        success: bool,
        confidence: Option<f64>,
    ) {
        debug!(workflow_id, %workflow_type, %agent_type, success, duration_ms = duration.as_millis() as u64, "workflow finished");
        let outcome = if success { "completed" } else { "failed" };
        self.incr(format!("workflows.{}.{}", outcome, workflow_type));
        self.sample(format!("workflow.duration.{}", workflow_type), duration);

        let bucket = self
            .buckets
            .entry((date.to_string(), workflow_type, agent_type))
            .or_default();
        bucket.total += 1;
        bucket.total_ms += duration.as_secs_f64() * 1000.0;
        if success {
            bucket.successful += 1;
            bucket.confidence_sum += confidence.unwrap_or(0.0);
        } else {
            bucket.failed += 1;
        }
    }

    pub fn record_step_execution(
        &mut self,
        workflow_type: WorkflowType,
        step_name: &str,
        duration: Duration,
        success: bool,
    ) {
        let outcome = if success { "success" } else { "failure" };
        self.incr(format!("steps.{}.{}.{}", outcome, workflow_type, step_name));
        self.sample(format!("step.duration.{}.{}", workflow_type, step_name), duration);
    }

    pub fn counter(&self, key: &str) -> u64 {
        self.counters.get(key).copied().unwrap_or(0)
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            counters: self.counters.clone(),
            durations: self
                .durations
                .iter()
                .filter_map(|(k, samples)| duration_stats(samples).map(|s| (k.clone(), s)))
                .collect(),
        }
    }

    /// Persist per-day rollups and clear them. Returns the number of buckets written.
    ///
    /// All buckets are merged in one transaction; on error nothing is cleared.
    pub fn flush_to_db(&mut self, conn: &Connection) -> Result<usize> {
        if self.buckets.is_empty() {
            return Ok(0);
        }
        let tx = conn
            .unchecked_transaction()
            .store_context(|| "begin metrics flush".to_string())?;
        for ((date, workflow_type, agent_type), bucket) in &self.buckets {
            let rollup = AnalyticsRollup {
                date: date.clone(),
                workflow_type: *workflow_type,
                agent_type: *agent_type,
                total_workflows: bucket.total,
                successful_workflows: bucket.successful,
                failed_workflows: bucket.failed,
                avg_execution_time_ms: bucket.total_ms / bucket.total as f64,
                avg_confidence_score: if bucket.successful > 0 {
                    bucket.confidence_sum / bucket.successful as f64
                } else {
                    0.0
                },
            };
            analytics::merge_rollup(&tx, &rollup)
                .store_context(|| format!("flush analytics for {} {}", date, workflow_type))?;
        }
        tx.commit().store_context(|| "commit metrics flush".to_string())?;

        let flushed = self.buckets.len();
        self.buckets.clear();
        debug!(buckets = flushed, "flushed workflow analytics");
        Ok(flushed)
    }
}

/// Nearest-rank percentiles over the samples. `None` when empty.
fn duration_stats(samples: &[Duration]) -> Option<DurationStats> {
    if samples.is_empty() {
        return None;
    }
    let mut ms: Vec<f64> = samples.iter().map(|d| d.as_secs_f64() * 1000.0).collect();
    ms.sort_by(f64::total_cmp);
    let rank = |p: f64| {
        let idx = (p * ms.len() as f64).ceil() as usize;
        ms[idx.clamp(1, ms.len()) - 1]
    };
    Some(DurationStats {
        count: ms.len(),
        avg_ms: ms.iter().sum::<f64>() / ms.len() as f64,
        p95_ms: rank(0.95),
        p99_ms: rank(0.99),
        max_ms: ms[ms.len() - 1],
    })
}
