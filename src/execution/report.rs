//! Run report assembly and persistence.
//!
//! The engine's contract ends at [`RunReport::assemble`]. Writing the report
//! somewhere is the job of a [`ReportSink`]; [`JsonReportWriter`] is the
//! default sink and writes `execution_report.json` next to the run's outputs.
//!
//! `total_duration` in the summary is the sum of per-task durations. Under
//! parallel execution this overstates wall-clock time; the real wall-clock
//! span is `finished_at - started_at`.

use crate::env;
use crate::execution::context::ResultLedger;
use crate::execution::result::{ExecutionResult, ExecutionStatus};
use crate::task::ExecutionPlan;
use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use tokio::fs as async_fs;
use tracing::info;
use uuid::Uuid;

/// How a plan was executed
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum RunMode {
    Sequential,
    Parallel,
}

/// Aggregate counts for a run
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RunSummary {
    pub total_tasks: usize,
    pub completed: usize,
    pub failed: usize,
    pub skipped: usize,
    pub not_attempted: usize,
    /// Sum of per-task durations in seconds
    pub total_duration: f64,
    /// completed / total_tasks, 0.0 for an empty run
    pub success_rate: f64,
}

impl RunSummary {
    pub fn from_results<'a>(results: impl IntoIterator<Item = &'a ExecutionResult>) -> Self {
        let mut summary = RunSummary {
            total_tasks: 0,
            completed: 0,
            failed: 0,
            skipped: 0,
            not_attempted: 0,
            total_duration: 0.0,
            success_rate: 0.0,
        };

        for result in results {
            summary.total_tasks += 1;
            summary.total_duration += result.duration;
            match result.status {
                ExecutionStatus::Completed => summary.completed += 1,
                ExecutionStatus::Failed => summary.failed += 1,
                ExecutionStatus::Skipped => summary.skipped += 1,
                ExecutionStatus::NotAttempted => summary.not_attempted += 1,
                ExecutionStatus::Pending | ExecutionStatus::InProgress => {}
            }
        }

        if summary.total_tasks > 0 {
            summary.success_rate = summary.completed as f64 / summary.total_tasks as f64;
        }
        summary
    }

    pub fn success_percentage(&self) -> f64 {
        self.success_rate * 100.0
    }
}

/// Everything known about one plan run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunReport {
    pub run_id: Uuid,
    pub mode: RunMode,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub output_directory: PathBuf,
    pub plan: ExecutionPlan,
    /// One entry per task, in recording order
    pub results: Vec<ExecutionResult>,
    pub summary: RunSummary,
}

impl RunReport {
    pub fn assemble(
        plan: &ExecutionPlan,
        ledger: ResultLedger,
        mode: RunMode,
        started_at: DateTime<Utc>,
        output_directory: PathBuf,
    ) -> Self {
        let results = ledger.into_results();
        let summary = RunSummary::from_results(&results);
        Self {
            run_id: Uuid::new_v4(),
            mode,
            started_at,
            finished_at: Utc::now(),
            output_directory,
            plan: plan.clone(),
            results,
            summary,
        }
    }

    pub fn result(&self, task_id: &str) -> Option<&ExecutionResult> {
        self.results.iter().find(|r| r.task_id == task_id)
    }

    pub fn status_of(&self, task_id: &str) -> Option<ExecutionStatus> {
        self.result(task_id).map(|r| r.status)
    }

    /// Ids of tasks with the given status, in recording order
    pub fn tasks_with_status(&self, status: ExecutionStatus) -> Vec<&str> {
        self.results
            .iter()
            .filter(|r| r.status == status)
            .map(|r| r.task_id.as_str())
            .collect()
    }

    pub fn is_success(&self) -> bool {
        self.summary.total_tasks == self.summary.completed
    }

    /// Process exit status for the run: 0 when every task completed
    pub fn exit_code(&self) -> i32 {
        if self.is_success() { 0 } else { 1 }
    }

    pub fn to_json_string(&self) -> Result<String> {
        serde_json::to_string_pretty(self).context("Failed to serialize run report")
    }

    pub fn from_json_str(content: &str) -> Result<Self> {
        serde_json::from_str(content).context("Failed to parse run report")
    }
}

impl fmt::Display for RunReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "Execution report for '{}' ({:?} mode)",
            self.plan.project_name, self.mode
        )?;
        for result in &self.results {
            let detail = match result.status {
                ExecutionStatus::Failed => result.error.as_deref().unwrap_or_default(),
                _ => result.reason().unwrap_or_default(),
            };
            if detail.is_empty() {
                writeln!(f, "  {:<14} {}", result.status.as_str(), result.task_id)?;
            } else {
                writeln!(f, "  {:<14} {} ({})", result.status.as_str(), result.task_id, detail)?;
            }
        }
        let summary = &self.summary;
        write!(
            f,
            "Completed {}/{} tasks ({:.1}%), {} failed, {} skipped, {} not attempted",
            summary.completed,
            summary.total_tasks,
            summary.success_percentage(),
            summary.failed,
            summary.skipped,
            summary.not_attempted
        )
    }
}

/// Destination for finished run reports
#[async_trait]
pub trait ReportSink: Send + Sync {
    /// Persist the report, returning where it was written
    async fn persist(&self, report: &RunReport) -> Result<PathBuf>;
}

/// Writes the report as pretty JSON, atomically (temp file + rename)
#[derive(Debug, Clone, Default)]
pub struct JsonReportWriter {
    directory: Option<PathBuf>,
}

impl JsonReportWriter {
    /// Write into each report's own output directory
    pub fn new() -> Self {
        Self::default()
    }

    /// Write into a fixed directory instead
    pub fn in_directory(directory: impl Into<PathBuf>) -> Self {
        Self {
            directory: Some(directory.into()),
        }
    }

    fn target_path(&self, report: &RunReport) -> PathBuf {
        self.directory
            .as_deref()
            .unwrap_or(report.output_directory.as_path())
            .join(env::REPORT_FILE_NAME)
    }
}

#[async_trait]
impl ReportSink for JsonReportWriter {
    async fn persist(&self, report: &RunReport) -> Result<PathBuf> {
        let path = self.target_path(report);
        let parent = path.parent().unwrap_or(Path::new("."));
        async_fs::create_dir_all(parent)
            .await
            .with_context(|| format!("Failed to create report directory: {}", parent.display()))?;

        let content = report.to_json_string()?;
        let temp_path = path.with_extension("json.tmp");
        async_fs::write(&temp_path, content)
            .await
            .with_context(|| format!("Failed to write report: {}", temp_path.display()))?;
        async_fs::rename(&temp_path, &path)
            .await
            .with_context(|| format!("Failed to finalize report: {}", path.display()))?;

        info!("Execution report saved to {}", path.display());
        Ok(path)
    }
}
