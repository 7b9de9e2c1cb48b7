use crate::{Criticality, TaskRecord, TaskStatus};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskReportEntry {
    pub id: String,
    pub status: TaskStatus,
    pub criticality: Criticality,
    pub attempts: u32,
    pub duration_ms: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Totals {
    pub succeeded: usize,
    pub failed: usize,
    pub warnings: usize,
    pub skipped: usize,
}

/// Exit signal of a finished run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Success,
    /// Completed, but something failed, warned or was skipped.
    Partial,
    /// Aborted, or a critical task failed.
    Failure,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionReport {
    pub run_id: String,
    pub tasks: Vec<TaskReportEntry>,
    pub totals: Totals,
    pub success_rate: f64,
    pub total_wall_ms: u64,
    /// Sum of task durations, what a serial run would have taken.
    pub serial_estimate_ms: u64,
    pub aborted: bool,
}

/// Folds terminal task records, in report order, into a report.
pub fn generate(run_id: &str, records: &[TaskRecord], wall_time: Duration, aborted: bool) -> ExecutionReport {
    let mut totals = Totals::default();
    let mut serial_estimate_ms = 0u64;

    let tasks = records
        .iter()
        .map(|record| {
            match record.status {
                TaskStatus::Succeeded => totals.succeeded += 1,
                TaskStatus::SucceededWithWarning => totals.warnings += 1,
                TaskStatus::Failed => totals.failed += 1,
                TaskStatus::Skipped => totals.skipped += 1,
                TaskStatus::Pending | TaskStatus::Running | TaskStatus::Retrying => {}
            }
            serial_estimate_ms = serial_estimate_ms.saturating_add(record.duration_ms);
            TaskReportEntry {
                id: record.id.clone(),
                status: record.status,
                criticality: record.criticality,
                attempts: record.attempt_count,
                duration_ms: record.duration_ms,
                error: record.last_error.clone(),
            }
        })
        .collect::<Vec<_>>();

    let success_rate = if tasks.is_empty() {
        0.0
    } else {
        (totals.succeeded + totals.warnings) as f64 / tasks.len() as f64
    };

    ExecutionReport {
        run_id: run_id.to_string(),
        tasks,
        totals,
        success_rate,
        total_wall_ms: crate::retry::duration_ms(wall_time),
        serial_estimate_ms,
        aborted,
    }
}

impl ExecutionReport {
    pub fn status(&self) -> RunStatus {
        let critical_failure = self
            .tasks
            .iter()
            .any(|t| t.status == TaskStatus::Failed && t.criticality == Criticality::Critical);
        if self.aborted || critical_failure {
            RunStatus::Failure
        } else if self.totals.failed + self.totals.warnings + self.totals.skipped > 0 {
            RunStatus::Partial
        } else {
            RunStatus::Success
        }
    }

    pub fn task(&self, id: &str) -> Option<&TaskReportEntry> {
        self.tasks.iter().find(|t| t.id == id)
    }

    /// Wall time over serial estimate; above 1.0 means parallelism paid off.
    pub fn speedup(&self) -> f64 {
        if self.total_wall_ms == 0 {
            return 1.0;
        }
        self.serial_estimate_ms as f64 / self.total_wall_ms as f64
    }

    /// Copy with every timing zeroed, for comparing runs.
    pub fn without_timings(&self) -> Self {
        let mut report = self.clone();
        report.total_wall_ms = 0;
        report.serial_estimate_ms = 0;
        for task in &mut report.tasks {
            task.duration_ms = 0;
        }
        report
    }

    pub async fn save(&self, path: impl AsRef<Path>) -> std::io::Result<()> {
        let json = serde_json::to_vec_pretty(self)?;
        tokio::fs::write(path, json).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Task;

    fn record(id: &str, status: TaskStatus, duration_ms: u64) -> TaskRecord {
        let mut record = TaskRecord::pending(&Task::new(id, "noop"));
        record.status = status;
        record.duration_ms = duration_ms;
        record.attempt_count = u32::from(status != TaskStatus::Skipped);
        record
    }

    #[test]
    fn folds_totals_and_rates() {
        let records = vec![
            record("a", TaskStatus::Succeeded, 100),
            record("b", TaskStatus::SucceededWithWarning, 50),
            record("c", TaskStatus::Failed, 25),
            record("d", TaskStatus::Skipped, 0),
        ];
        let report = generate("run", &records, Duration::from_millis(120), false);

        assert_eq!(
            report.totals,
            Totals {
                succeeded: 1,
                failed: 1,
                warnings: 1,
                skipped: 1
            }
        );
        assert_eq!(report.success_rate, 0.5);
        assert_eq!(report.serial_estimate_ms, 175);
        assert_eq!(report.total_wall_ms, 120);
        assert_eq!(report.status(), RunStatus::Partial);
        assert_eq!(
            report.tasks.iter().map(|t| t.id.as_str()).collect::<Vec<_>>(),
            ["a", "b", "c", "d"]
        );
    }

    #[test]
    fn critical_failure_fails_the_run() {
        let mut failed = record("deploy", TaskStatus::Failed, 10);
        failed.criticality = Criticality::Critical;
        let report = generate("run", &[failed], Duration::from_millis(10), false);
        assert_eq!(report.status(), RunStatus::Failure);
    }

    #[test]
    fn clean_run_succeeds_and_empty_run_has_zero_rate() {
        let report = generate("run", &[record("a", TaskStatus::Succeeded, 5)], Duration::ZERO, false);
        assert_eq!(report.status(), RunStatus::Success);
        assert_eq!(report.success_rate, 1.0);
        assert_eq!(report.speedup(), 1.0);

        assert_eq!(generate("run", &[], Duration::ZERO, false).success_rate, 0.0);
    }

    #[tokio::test]
    async fn report_file_shape() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("execution_report.json");
        let mut failed = record("b", TaskStatus::Failed, 7);
        failed.last_error = Some("boom".into());
        generate("run", &[record("a", TaskStatus::Succeeded, 3), failed], Duration::from_millis(9), false)
            .save(&path)
            .await
            .unwrap();

        let value: serde_json::Value = serde_json::from_slice(&std::fs::read(&path).unwrap()).unwrap();
        assert_eq!(value["tasks"][0]["durationMs"], 3);
        assert!(value["tasks"][0].get("error").is_none());
        assert_eq!(value["tasks"][1]["error"], "boom");
        assert_eq!(value["totals"]["failed"], 1);
        assert_eq!(value["successRate"], 0.5);
        assert_eq!(value["totalWallMs"], 9);
        assert_eq!(value["serialEstimateMs"], 10);
    }
}
