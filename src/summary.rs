use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::io;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

use crate::processing::{format_minutes, TaskResult};
use crate::transcription::srt::write_atomic;

/// Everything a run produced, in completion order
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunReport {
    pub results: Vec<TaskResult>,
    /// Tasks never dispatched because the run was cancelled
    pub skipped: Vec<PathBuf>,
    pub cancelled: bool,
    pub worker_count: usize,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub wall_clock_seconds: f64,
}

impl RunReport {
    /// Report for a run with nothing to do
    pub fn empty() -> Self {
        let now = Utc::now();
        Self {
            results: Vec::new(),
            skipped: Vec::new(),
            cancelled: false,
            worker_count: 0,
            started_at: now,
            finished_at: now,
            wall_clock_seconds: 0.0,
        }
    }

    pub fn summary(&self) -> RunSummary {
        RunSummary::from_results(&self.results)
    }

    pub fn failures(&self) -> impl Iterator<Item = &TaskResult> {
        self.results.iter().filter(|result| !result.success)
    }

    /// Serialize to pretty JSON and write it atomically
    pub async fn save(&self, path: &Path) -> io::Result<()> {
        let json = serde_json::to_string_pretty(self)?;
        let path = path.to_path_buf();

        tokio::task::spawn_blocking(move || write_atomic(&path, json.as_bytes()))
            .await
            .map_err(|e| io::Error::new(io::ErrorKind::Other, e))?
    }
}

/// Aggregate figures over the task results
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunSummary {
    pub files_processed: usize,
    pub files_succeeded: usize,
    /// Sum of per-task elapsed seconds, not wall clock
    pub total_elapsed: f64,
    /// `None` when nothing was processed
    pub average_per_file: Option<f64>,
}

impl RunSummary {
    pub fn from_results(results: &[TaskResult]) -> Self {
        let files_processed = results.len();
        let files_succeeded = results.iter().filter(|result| result.success).count();
        let total_elapsed: f64 = results.iter().map(|result| result.elapsed_seconds).sum();
        let average_per_file = if files_processed > 0 {
            Some(total_elapsed / files_processed as f64)
        } else {
            None
        };

        Self {
            files_processed,
            files_succeeded,
            total_elapsed,
            average_per_file,
        }
    }

    pub fn files_failed(&self) -> usize {
        self.files_processed - self.files_succeeded
    }

    pub fn success_rate(&self) -> f64 {
        if self.files_processed > 0 {
            self.files_succeeded as f64 / self.files_processed as f64 * 100.0
        } else {
            0.0
        }
    }
}

/// Log the end-of-run summary
pub fn report(run: &RunReport) {
    let summary = run.summary();

    info!("📊 Processing summary");
    info!("📁 Files processed: {}", summary.files_processed);
    info!("✅ Successful: {}", summary.files_succeeded);
    info!("❌ Failed: {}", summary.files_failed());
    info!("📊 Success rate: {:.1}%", summary.success_rate());
    info!(
        "⏱️  Total processing time: {:.2}s ({})",
        summary.total_elapsed,
        format_minutes(summary.total_elapsed)
    );

    match summary.average_per_file {
        Some(average) => info!("⏱️  Average per file: {:.2}s ({})", average, format_minutes(average)),
        None => info!("⏱️  Average per file: n/a"),
    }

    info!(
        "🎉 Wall clock: {:.2}s with {} workers",
        run.wall_clock_seconds, run.worker_count
    );

    if run.cancelled {
        warn!("🛑 Run was cancelled; {} videos never started", run.skipped.len());
        for path in &run.skipped {
            warn!("   - skipped {}", path.display());
        }
    }

    for failure in run.failures() {
        warn!(
            "   - {}: {}",
            failure.source_file.display(),
            failure.error_message.as_deref().unwrap_or("Unknown error")
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn result(id: usize, success: bool, elapsed: f64) -> TaskResult {
        TaskResult {
            task_id: id,
            source_file: PathBuf::from(format!("/in/video{}.mp4", id)),
            success,
            elapsed_seconds: elapsed,
            error_message: (!success).then(|| "Audio extraction failed: boom".to_string()),
            audio_path: None,
            subtitle_path: None,
            segments: 0,
        }
    }

    #[test]
    fn test_empty_summary_has_no_average() {
        let summary = RunSummary::from_results(&[]);
        assert_eq!(summary.files_processed, 0);
        assert_eq!(summary.files_succeeded, 0);
        assert_eq!(summary.total_elapsed, 0.0);
        assert_eq!(summary.average_per_file, None);
        assert_eq!(summary.success_rate(), 0.0);
    }

    #[test]
    fn test_summary_counts_failures() {
        let results: Vec<_> = (0..5).map(|id| result(id, id != 2, 2.0)).collect();
        let summary = RunSummary::from_results(&results);

        assert_eq!(summary.files_processed, 5);
        assert_eq!(summary.files_succeeded, 4);
        assert_eq!(summary.files_failed(), 1);
        assert_eq!(summary.total_elapsed, 10.0);
        assert_eq!(summary.average_per_file, Some(2.0));
    }

    #[test]
    fn test_report_does_not_panic_on_empty_run() {
        report(&RunReport::empty());
    }

    #[tokio::test]
    async fn test_save_writes_json() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("processing_results.json");

        let mut run = RunReport::empty();
        run.results.push(result(0, true, 1.5));
        run.results.push(result(1, false, 0.5));
        run.save(&path).await.unwrap();

        let loaded: RunReport =
            serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(loaded.results.len(), 2);
        assert_eq!(loaded.summary().files_succeeded, 1);
        assert_eq!(loaded.failures().count(), 1);
    }
}
