use anyhow::{anyhow, Context, Result};
use chrono::Utc;
use futures::FutureExt;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet, VecDeque};
use std::panic::AssertUnwindSafe;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio::sync::{mpsc, watch};
use tracing::{debug, error, info, warn};

use crate::audio::{audio_output_path, AudioExtract};
use crate::config::{AudioFormat, Config, Language};
use crate::error::{PipelineError, PipelineResult};
use crate::summary::RunReport;
use crate::transcription::{
    DecodeOptions, SRTGenerator, TranscriberFactory, Transcribe, TranscriptSegment,
};
use crate::video::discover_videos;

/// Name of the per-run results file written to the output directory
pub const RESULTS_FILE: &str = "processing_results.json";

/// One source video's end-to-end conversion unit
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VideoTask {
    /// Position in discovery order; the task's identity
    pub id: usize,
    pub source_path: PathBuf,
    /// Base name for the audio and subtitle artifacts, unique within the batch
    pub output_stem: String,
    pub output_dir: PathBuf,
    pub audio_format: AudioFormat,
    pub model: String,
    pub language: Language,
    pub beam_size: u32,
    pub patience: f64,
}

impl VideoTask {
    pub fn decode_options(&self) -> DecodeOptions {
        DecodeOptions {
            language: self.language.clone(),
            beam_size: self.beam_size,
            patience: self.patience,
        }
    }

    pub fn subtitle_path(&self) -> PathBuf {
        self.output_dir.join(format!("{}.srt", self.output_stem))
    }

    pub fn file_name(&self) -> String {
        self.source_path
            .file_name()
            .map(|name| name.to_string_lossy().to_string())
            .unwrap_or_else(|| self.source_path.display().to_string())
    }
}

/// Build one task per discovered video.
///
/// Artifacts are named after the source stem. When two sources share a stem
/// (`talk.mp4` and `talk.mkv`) each gets `<stem>_<ext>` so concurrent workers
/// never write the same path.
pub fn build_tasks(videos: &[PathBuf], config: &Config) -> Vec<VideoTask> {
    let stem_of = |path: &Path| {
        path.file_stem()
            .map(|stem| stem.to_string_lossy().to_string())
            .unwrap_or_else(|| "video".to_string())
    };

    let mut stem_counts: HashMap<String, usize> = HashMap::new();
    for video in videos {
        *stem_counts.entry(stem_of(video).to_lowercase()).or_default() += 1;
    }

    let mut used = HashSet::new();

    videos
        .iter()
        .enumerate()
        .map(|(id, video)| {
            let stem = stem_of(video);
            let candidate = if stem_counts[&stem.to_lowercase()] > 1 {
                let ext = video
                    .extension()
                    .map(|ext| ext.to_string_lossy().to_lowercase())
                    .unwrap_or_default();
                format!("{}_{}", stem, ext)
            } else {
                stem
            };

            let mut output_stem = candidate.clone();
            let mut suffix = 2;
            while !used.insert(output_stem.to_lowercase()) {
                output_stem = format!("{}_{}", candidate, suffix);
                suffix += 1;
            }

            VideoTask {
                id,
                source_path: video.clone(),
                output_stem,
                output_dir: config.output_dir.clone(),
                audio_format: config.audio_format,
                model: config.model.clone(),
                language: config.language.clone(),
                beam_size: config.beam_size,
                patience: config.patience,
            }
        })
        .collect()
}

/// Terminal outcome of one task
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskResult {
    pub task_id: usize,
    pub source_file: PathBuf,
    pub success: bool,
    pub elapsed_seconds: f64,
    pub error_message: Option<String>,
    pub audio_path: Option<PathBuf>,
    pub subtitle_path: Option<PathBuf>,
    pub segments: usize,
}

/// Artifacts of a task that ran to completion
#[derive(Debug, Clone)]
struct StageOutcome {
    audio_path: PathBuf,
    subtitle_path: PathBuf,
    segments: usize,
}

impl TaskResult {
    fn success(task: &VideoTask, elapsed: Duration, outcome: StageOutcome) -> Self {
        Self {
            task_id: task.id,
            source_file: task.source_path.clone(),
            success: true,
            elapsed_seconds: elapsed.as_secs_f64(),
            error_message: None,
            audio_path: Some(outcome.audio_path),
            subtitle_path: Some(outcome.subtitle_path),
            segments: outcome.segments,
        }
    }

    fn failure(task: &VideoTask, elapsed: Duration, error: PipelineError) -> Self {
        Self {
            task_id: task.id,
            source_file: task.source_path.clone(),
            success: false,
            elapsed_seconds: elapsed.as_secs_f64(),
            error_message: Some(error.to_string()),
            audio_path: None,
            subtitle_path: None,
            segments: 0,
        }
    }
}

/// Number of workers for a batch: never more than the tasks, never more than the
/// available parallelism
pub fn worker_count(available_parallelism: usize, task_count: usize) -> usize {
    available_parallelism.max(1).min(task_count)
}

/// Per-worker transcriber handle, loaded on first use and dropped with the worker
pub struct WorkerSlot<F: TranscriberFactory> {
    factory: Arc<F>,
    handle: Option<F::Transcriber>,
    loads: usize,
}

impl<F: TranscriberFactory> WorkerSlot<F> {
    pub fn new(factory: Arc<F>) -> Self {
        Self {
            factory,
            handle: None,
            loads: 0,
        }
    }

    /// Borrow the transcriber, loading it if this worker has none yet.
    ///
    /// A failed load leaves the slot empty so the next task tries again.
    pub async fn acquire(&mut self) -> PipelineResult<&mut F::Transcriber> {
        let handle = match self.handle.take() {
            Some(handle) => handle,
            None => {
                let handle = self.factory.load().await?;
                self.loads += 1;
                handle
            }
        };
        Ok(self.handle.insert(handle))
    }

    pub fn is_loaded(&self) -> bool {
        self.handle.is_some()
    }

    /// How many times this slot loaded a transcriber
    pub fn loads(&self) -> usize {
        self.loads
    }
}

/// Per-task pipeline: extract, transcribe, write subtitles
pub struct PipelineStage<E> {
    extractor: Arc<E>,
}

impl<E> Clone for PipelineStage<E> {
    fn clone(&self) -> Self {
        Self {
            extractor: Arc::clone(&self.extractor),
        }
    }
}

impl<E: AudioExtract> PipelineStage<E> {
    pub fn new(extractor: Arc<E>) -> Self {
        Self { extractor }
    }

    /// Run one task to a `TaskResult`. Never returns an error: every failure
    /// of a step ends the task and is recorded in the result.
    ///
    /// Shutdown abandons the task only while it is extracting or transcribing.
    /// Once a transcript exists the subtitle write runs to completion, so a
    /// committed `.srt` always belongs to a successful result.
    pub async fn execute<F: TranscriberFactory>(
        &self,
        task: &VideoTask,
        slot: &mut WorkerSlot<F>,
        shutdown: &mut watch::Receiver<bool>,
    ) -> TaskResult {
        let start_time = Instant::now();
        let name = task.file_name();
        info!("Processing: {}", name);

        let result = match self.run_steps(task, slot, shutdown).await {
            Ok(outcome) => TaskResult::success(task, start_time.elapsed(), outcome),
            Err(PipelineError::Cancelled) => {
                warn!("🛑 Abandoning {}", name);
                self.discard_audio(task).await;
                TaskResult::failure(task, start_time.elapsed(), PipelineError::Cancelled)
            }
            Err(e) => {
                error!("Error processing {}: {}", name, e);
                TaskResult::failure(task, start_time.elapsed(), e)
            }
        };

        info!(
            "File time: {:.2}s ({}) for {}",
            result.elapsed_seconds,
            format_minutes(result.elapsed_seconds),
            name
        );
        result
    }

    async fn run_steps<F: TranscriberFactory>(
        &self,
        task: &VideoTask,
        slot: &mut WorkerSlot<F>,
        shutdown: &mut watch::Receiver<bool>,
    ) -> PipelineResult<StageOutcome> {
        // Finished work wins over a shutdown observed in the same poll
        let (audio_path, segments) = tokio::select! {
            biased;
            prepared = self.transcribe_steps(task, slot) => prepared?,
            _ = wait_for_shutdown(shutdown) => return Err(PipelineError::Cancelled),
        };

        // Stage 3: Subtitle file
        let generator = SRTGenerator::from_segments(&segments);
        let issues = generator.validate();
        if !issues.is_empty() {
            warn!("SRT validation issues for {}: {:?}", task.file_name(), issues);
        }

        let subtitle_path = task.subtitle_path();
        generator.save_to_file(&subtitle_path).await?;
        info!("💾 Subtitles saved at: {} ({} entries)", subtitle_path.display(), generator.len());

        Ok(StageOutcome {
            audio_path,
            subtitle_path,
            segments: generator.len(),
        })
    }

    async fn transcribe_steps<F: TranscriberFactory>(
        &self,
        task: &VideoTask,
        slot: &mut WorkerSlot<F>,
    ) -> PipelineResult<(PathBuf, Vec<TranscriptSegment>)> {
        // Stage 1: Audio Extraction
        let audio_path = self
            .extractor
            .extract(&task.source_path, &task.output_dir, &task.output_stem, task.audio_format)
            .await?;

        // Stage 2: Transcription
        let transcriber = slot.acquire().await?;
        let segments = transcriber
            .transcribe(&audio_path, &task.decode_options())
            .await?;

        Ok((audio_path, segments))
    }

    /// Remove the audio of an abandoned task; a killed ffmpeg leaves a partial file
    async fn discard_audio(&self, task: &VideoTask) {
        let audio_path = audio_output_path(&task.output_dir, &task.output_stem, task.audio_format);
        match tokio::fs::remove_file(&audio_path).await {
            Ok(()) => debug!("Removed partial audio {}", audio_path.display()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => warn!("Failed to remove {}: {}", audio_path.display(), e),
        }
    }
}

/// Bounded worker pool running the pipeline over a batch of videos
pub struct BatchProcessor<E, F> {
    stage: PipelineStage<E>,
    factory: Arc<F>,
    parallelism: usize,
    shutdown: watch::Receiver<bool>,
    // Keeps the default shutdown channel open when no external one is attached
    _shutdown_tx: Option<watch::Sender<bool>>,
}

impl<E, F> BatchProcessor<E, F>
where
    E: AudioExtract + 'static,
    F: TranscriberFactory + 'static,
{
    pub fn new(extractor: E, factory: F, parallelism: usize) -> Self {
        let (shutdown_tx, shutdown) = watch::channel(false);
        info!("🔧 Initializing BatchProcessor with parallelism {}", parallelism.max(1));

        Self {
            stage: PipelineStage::new(Arc::new(extractor)),
            factory: Arc::new(factory),
            parallelism: parallelism.max(1),
            shutdown,
            _shutdown_tx: Some(shutdown_tx),
        }
    }

    /// Stop dispatching and abandon in-flight tasks once `shutdown` turns true
    pub fn with_shutdown(mut self, shutdown: watch::Receiver<bool>) -> Self {
        self.shutdown = shutdown;
        self._shutdown_tx = None;
        self
    }

    /// Process every video in `config.input_dir` and save the run report
    pub async fn process_directory(&self, config: &Config) -> Result<RunReport> {
        info!("🚀 Starting batch processing...");
        info!("📁 Input: {}", config.input_dir.display());
        info!("📂 Output: {}", config.output_dir.display());

        if !config.input_dir.is_dir() {
            return Err(anyhow!(
                "Input directory not found: {}",
                config.input_dir.display()
            ));
        }

        tokio::fs::create_dir_all(&config.output_dir)
            .await
            .with_context(|| format!("Cannot create output directory {}", config.output_dir.display()))?;

        let videos = discover_videos(&config.input_dir)?;
        if videos.is_empty() {
            warn!("No video files found in {}", config.input_dir.display());
            return Ok(RunReport::empty());
        }

        let tasks = build_tasks(&videos, config);
        let report = self.run(tasks).await;

        let results_path = config.output_dir.join(RESULTS_FILE);
        match report.save(&results_path).await {
            Ok(()) => info!("💾 Results saved to: {}", results_path.display()),
            Err(e) => warn!("Failed to save results to {}: {}", results_path.display(), e),
        }

        Ok(report)
    }

    /// Run all tasks and wait for every dispatched task to report.
    ///
    /// Results arrive in completion order; correlate them by `task_id`.
    pub async fn run(&self, tasks: Vec<VideoTask>) -> RunReport {
        let started_at = Utc::now();
        let start_time = Instant::now();
        let total = tasks.len();
        let workers = worker_count(self.parallelism, total);

        if workers == 0 {
            return RunReport::empty();
        }

        info!("📹 Processing {} videos with {} parallel workers", total, workers);

        let queue = Arc::new(Mutex::new(VecDeque::from(tasks)));
        let (tx, mut rx) = mpsc::unbounded_channel();

        let handles: Vec<_> = (0..workers)
            .map(|worker_id| {
                let worker = Worker {
                    id: worker_id,
                    stage: self.stage.clone(),
                    slot: WorkerSlot::new(Arc::clone(&self.factory)),
                    queue: Arc::clone(&queue),
                    results: tx.clone(),
                    shutdown: self.shutdown.clone(),
                    total,
                };
                tokio::spawn(worker.run())
            })
            .collect();

        // Drop the original sender to close the channel when all workers exit
        drop(tx);

        let mut results = Vec::with_capacity(total);
        while let Some(result) = rx.recv().await {
            results.push(result);
        }

        for handle in handles {
            if let Err(e) = handle.await {
                error!("Worker terminated abnormally: {}", e);
            }
        }

        let skipped: Vec<PathBuf> = drain_queue(&queue)
            .into_iter()
            .map(|task| task.source_path)
            .collect();

        let cancelled = *self.shutdown.borrow();
        if cancelled {
            warn!(
                "🛑 Run cancelled: {} tasks reported, {} never started",
                results.len(),
                skipped.len()
            );
        }

        RunReport {
            results,
            skipped,
            cancelled,
            worker_count: workers,
            started_at,
            finished_at: Utc::now(),
            wall_clock_seconds: start_time.elapsed().as_secs_f64(),
        }
    }
}

/// One pool member: pulls tasks until the queue is empty or shutdown is signalled
struct Worker<E, F: TranscriberFactory> {
    id: usize,
    stage: PipelineStage<E>,
    slot: WorkerSlot<F>,
    queue: Arc<Mutex<VecDeque<VideoTask>>>,
    results: mpsc::UnboundedSender<TaskResult>,
    shutdown: watch::Receiver<bool>,
    total: usize,
}

impl<E, F> Worker<E, F>
where
    E: AudioExtract + 'static,
    F: TranscriberFactory + 'static,
{
    async fn run(mut self) {
        debug!("Worker {} started", self.id);

        loop {
            if *self.shutdown.borrow() {
                debug!("Worker {} stopping: shutdown requested", self.id);
                break;
            }

            let Some(task) = pop_task(&self.queue) else {
                break;
            };

            info!(
                "📹 Worker {} took video {}/{}: {}",
                self.id,
                task.id + 1,
                self.total,
                task.source_path.display()
            );

            let accepted = Instant::now();
            let execution =
                AssertUnwindSafe(self.stage.execute(&task, &mut self.slot, &mut self.shutdown))
                    .catch_unwind();

            let result = match execution.await {
                Ok(result) => result,
                Err(payload) => {
                    error!("Task for {} panicked", task.file_name());
                    TaskResult::failure(&task, accepted.elapsed(), PipelineError::from_panic(payload))
                }
            };

            if result.success {
                info!("✅ Completed: {} in {:.2}s", task.file_name(), result.elapsed_seconds);
            } else {
                warn!(
                    "❌ Failed: {} - {}",
                    task.file_name(),
                    result.error_message.as_deref().unwrap_or("Unknown error")
                );
            }

            if self.results.send(result).is_err() {
                error!("Result channel closed, worker {} exiting", self.id);
                break;
            }
        }

        debug!(
            "Worker {} exiting after {} transcriber loads (loaded: {})",
            self.id,
            self.slot.loads(),
            self.slot.is_loaded()
        );
    }
}

fn pop_task(queue: &Mutex<VecDeque<VideoTask>>) -> Option<VideoTask> {
    queue
        .lock()
        .unwrap_or_else(|poisoned| poisoned.into_inner())
        .pop_front()
}

fn drain_queue(queue: &Mutex<VecDeque<VideoTask>>) -> Vec<VideoTask> {
    queue
        .lock()
        .unwrap_or_else(|poisoned| poisoned.into_inner())
        .drain(..)
        .collect()
}

/// Resolves once the flag is true; pends forever if the sender goes away first
async fn wait_for_shutdown(shutdown: &mut watch::Receiver<bool>) {
    loop {
        if *shutdown.borrow_and_update() {
            return;
        }
        if shutdown.changed().await.is_err() {
            std::future::pending::<()>().await;
        }
    }
}

/// `125.4` -> `"2m 5s"`
pub fn format_minutes(seconds: f64) -> String {
    let whole = seconds.max(0.0) as u64;
    format!("{}m {}s", whole / 60, whole % 60)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ConfigBuilder;

    #[test]
    fn test_worker_count_bounds() {
        assert_eq!(worker_count(8, 3), 3);
        assert_eq!(worker_count(2, 10), 2);
        assert_eq!(worker_count(4, 0), 0);
        assert_eq!(worker_count(0, 5), 1);
    }

    #[test]
    fn test_build_tasks_copies_config() {
        let config = ConfigBuilder::new()
            .with_output_dir(PathBuf::from("/out"))
            .with_model("base")
            .build();
        let videos = vec![PathBuf::from("/in/a.mkv"), PathBuf::from("/in/b.mp4")];

        let tasks = build_tasks(&videos, &config);
        assert_eq!(tasks.len(), 2);
        assert_eq!(tasks[0].id, 0);
        assert_eq!(tasks[1].id, 1);
        assert_eq!(tasks[0].output_stem, "a");
        assert_eq!(tasks[1].model, "base");
        assert_eq!(tasks[1].subtitle_path(), PathBuf::from("/out/b.srt"));
        assert_eq!(tasks[0].decode_options().beam_size, 5);
    }

    #[test]
    fn test_build_tasks_disambiguates_shared_stems() {
        let config = Config::default();
        let videos = vec![
            PathBuf::from("/in/Talk.MKV"),
            PathBuf::from("/in/other.avi"),
            PathBuf::from("/in/talk.mp4"),
        ];

        let tasks = build_tasks(&videos, &config);
        let stems: Vec<_> = tasks.iter().map(|t| t.output_stem.as_str()).collect();
        assert_eq!(stems, vec!["Talk_mkv", "other", "talk_mp4"]);
    }

    #[test]
    fn test_build_tasks_never_reuses_a_stem() {
        let config = Config::default();
        let videos = vec![
            PathBuf::from("/in/a.mp4"),
            PathBuf::from("/in/a.mkv"),
            PathBuf::from("/in/a_mp4.mov"),
        ];

        let tasks = build_tasks(&videos, &config);
        let unique: HashSet<_> = tasks.iter().map(|t| t.output_stem.to_lowercase()).collect();
        assert_eq!(unique.len(), 3);
    }

    #[test]
    fn test_format_minutes() {
        assert_eq!(format_minutes(125.4), "2m 5s");
        assert_eq!(format_minutes(0.2), "0m 0s");
    }

    #[tokio::test]
    async fn test_wait_for_shutdown_pends_when_sender_dropped() {
        let (tx, mut rx) = watch::channel(false);
        drop(tx);
        let waited = tokio::time::timeout(Duration::from_millis(50), wait_for_shutdown(&mut rx)).await;
        assert!(waited.is_err());
    }

    #[tokio::test]
    async fn test_wait_for_shutdown_resolves_on_signal() {
        let (tx, mut rx) = watch::channel(false);
        tx.send(true).unwrap();
        let waited = tokio::time::timeout(Duration::from_millis(50), wait_for_shutdown(&mut rx)).await;
        assert!(waited.is_ok());
    }

    struct CountingFactory {
        failures_left: Mutex<usize>,
        hang: bool,
    }

    struct FixedTranscriber {
        hang: bool,
    }

    #[async_trait::async_trait]
    impl Transcribe for FixedTranscriber {
        async fn transcribe(
            &mut self,
            _audio_path: &Path,
            _options: &DecodeOptions,
        ) -> PipelineResult<Vec<TranscriptSegment>> {
            if self.hang {
                std::future::pending::<()>().await;
            }
            Ok(vec![TranscriptSegment::new(0.0, 1.0, "hi")])
        }
    }

    #[async_trait::async_trait]
    impl TranscriberFactory for CountingFactory {
        type Transcriber = FixedTranscriber;

        async fn load(&self) -> PipelineResult<FixedTranscriber> {
            let mut failures_left = self.failures_left.lock().unwrap();
            if *failures_left > 0 {
                *failures_left -= 1;
                return Err(PipelineError::ModelLoad("no model".to_string()));
            }
            Ok(FixedTranscriber { hang: self.hang })
        }
    }

    struct WritingExtractor;

    #[async_trait::async_trait]
    impl AudioExtract for WritingExtractor {
        async fn extract(
            &self,
            _video_path: &Path,
            output_dir: &Path,
            stem: &str,
            format: AudioFormat,
        ) -> PipelineResult<PathBuf> {
            // Synchronous write so the step is ready on its first poll
            let audio_path = audio_output_path(output_dir, stem, format);
            std::fs::write(&audio_path, b"partial")?;
            Ok(audio_path)
        }
    }

    fn factory(failures: usize, hang: bool) -> Arc<CountingFactory> {
        Arc::new(CountingFactory {
            failures_left: Mutex::new(failures),
            hang,
        })
    }

    #[tokio::test]
    async fn test_worker_slot_loads_once() {
        let mut slot = WorkerSlot::new(factory(0, false));
        assert!(!slot.is_loaded());

        for _ in 0..3 {
            slot.acquire().await.unwrap();
        }

        assert!(slot.is_loaded());
        assert_eq!(slot.loads(), 1);
    }

    #[tokio::test]
    async fn test_worker_slot_retries_after_failed_load() {
        let mut slot = WorkerSlot::new(factory(1, false));

        assert!(matches!(slot.acquire().await, Err(PipelineError::ModelLoad(_))));
        assert!(!slot.is_loaded());
        assert_eq!(slot.loads(), 0);

        slot.acquire().await.unwrap();
        assert_eq!(slot.loads(), 1);
    }

    fn single_task(dir: &Path) -> VideoTask {
        let config = ConfigBuilder::new()
            .with_output_dir(dir.to_path_buf())
            .build();
        build_tasks(&[dir.join("talk.mp4")], &config).remove(0)
    }

    #[tokio::test]
    async fn test_shutdown_during_transcription_discards_audio() {
        let temp_dir = tempfile::TempDir::new().unwrap();
        let task = single_task(temp_dir.path());
        let stage = PipelineStage::new(Arc::new(WritingExtractor));
        let mut slot = WorkerSlot::new(factory(0, true));
        let (tx, mut rx) = watch::channel(false);

        let cancel = async {
            tokio::time::sleep(Duration::from_millis(20)).await;
            tx.send(true).unwrap();
        };
        let (result, ()) = tokio::join!(stage.execute(&task, &mut slot, &mut rx), cancel);

        assert!(!result.success);
        assert_eq!(result.error_message.as_deref(), Some("cancelled"));
        assert!(!temp_dir.path().join("talk.wav").exists());
        assert!(!task.subtitle_path().exists());
    }

    #[tokio::test]
    async fn test_finished_transcript_is_committed_despite_shutdown() {
        let temp_dir = tempfile::TempDir::new().unwrap();
        let task = single_task(temp_dir.path());
        let stage = PipelineStage::new(Arc::new(WritingExtractor));
        let mut slot = WorkerSlot::new(factory(0, false));
        let (tx, mut rx) = watch::channel(false);

        // Transcription completes in the same poll that observes the flag
        tx.send(true).unwrap();
        let result = stage.execute(&task, &mut slot, &mut rx).await;

        assert!(result.success);
        assert_eq!(result.subtitle_path.as_deref(), Some(task.subtitle_path().as_path()));
        assert!(task.subtitle_path().exists());
    }
}
