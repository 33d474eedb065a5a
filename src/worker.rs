//! Per-task worker.
//!
//! Drives one queued task to completion: sequences the audio-extraction pass
//! when needed, then attempts each target language through the subprocess
//! supervisor, updating the store after every attempt. One language's failure
//! never aborts the task; the task as a whole fails only when no language
//! completed.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::cleanup::{self, CleanupPolicy};
use crate::config::{Config, ExistingFilePolicy};
use crate::engine::{self, EngineCommand, EngineCommandBuilder, EngineEvent};
use crate::error::{Result, SubqueueError};
use crate::lang;
use crate::store::{AudioExtractionStatus, LanguageStatus, QueueStore, TaskType};
use crate::supervisor::{EngineRunner, ProcessOutcome};

/// Observable events consumed by the front end.
#[derive(Debug, Clone)]
pub enum WorkerEvent {
    Status {
        path: PathBuf,
        message: String,
    },
    Progress {
        path: PathBuf,
        percent: u8,
        text: String,
    },
    LanguageCompleted {
        path: PathBuf,
        lang_code: String,
        success: bool,
    },
    TaskFinished {
        path: PathBuf,
        summary: String,
        success: bool,
    },
}

/// Two-tier cancellation, shared between front end, worker, and supervisor.
#[derive(Clone, Default)]
pub struct CancelFlags {
    force: Arc<AtomicBool>,
    stop_after_current: Arc<AtomicBool>,
}

impl CancelFlags {
    pub fn new() -> Self {
        Self::default()
    }

    /// Finish the in-flight language, then halt before starting the next.
    pub fn request_stop_after_current(&self) {
        self.stop_after_current.store(true, Ordering::Relaxed);
    }

    /// Interrupt the live subprocess and discard the in-flight attempt.
    pub fn request_force_cancel(&self) {
        self.force.store(true, Ordering::Relaxed);
    }

    pub fn should_stop_gracefully(&self) -> bool {
        self.stop_after_current.load(Ordering::Relaxed)
    }

    pub fn force_cancelled(&self) -> bool {
        self.force.load(Ordering::Relaxed)
    }

    /// The raw flag the supervisor polls between output reads.
    pub fn force_flag(&self) -> Arc<AtomicBool> {
        self.force.clone()
    }
}

/// Everything a worker needs, passed explicitly instead of read from ambient
/// front-end state.
#[derive(Clone)]
pub struct WorkerContext {
    pub store: Arc<Mutex<QueueStore>>,
    pub config: Arc<Config>,
    pub events: mpsc::UnboundedSender<WorkerEvent>,
    pub cancel: CancelFlags,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SkipDecision {
    Proceed,
    SameAsInput,
    Exists,
}

pub struct TaskWorker {
    ctx: WorkerContext,
    runner: Arc<dyn EngineRunner>,
    input_path: PathBuf,
    description: String,
    target_languages: Vec<String>,
    current_language: Option<String>,
}

impl TaskWorker {
    pub fn new(ctx: WorkerContext, runner: Arc<dyn EngineRunner>, input_path: PathBuf) -> Self {
        Self {
            ctx,
            runner,
            input_path,
            description: String::new(),
            target_languages: Vec::new(),
            current_language: None,
        }
    }

    fn store(&self) -> MutexGuard<'_, QueueStore> {
        self.ctx.store.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn emit(&self, event: WorkerEvent) {
        let _ = self.ctx.events.send(event);
    }

    fn status(&self, message: &str) {
        info!("{}: {}", self.input_path.display(), message);
        self.emit(WorkerEvent::Status {
            path: self.input_path.clone(),
            message: message.to_string(),
        });
    }

    fn finish(&self, success: bool) {
        let summary = self.store().progress_summary(&self.input_path);
        self.emit(WorkerEvent::TaskFinished {
            path: self.input_path.clone(),
            summary,
            success,
        });
    }

    fn cancel_cleanup(&self) {
        let policy = CleanupPolicy::new(&self.ctx.config);
        let mut store = self.store();
        policy.cancel_cleanup(&mut store, &self.input_path, self.current_language.as_deref());
    }

    /// Run the task to completion, cancellation, or failure.
    pub async fn run(&mut self) -> Result<bool> {
        if self.ctx.cancel.force_cancelled() {
            self.cancel_cleanup();
            self.finish(false);
            return Ok(false);
        }

        let task = self.store().task(&self.input_path).cloned().ok_or_else(|| {
            SubqueueError::Store(format!(
                "No queued task for {}",
                self.input_path.display()
            ))
        })?;
        self.description = task.description.clone();
        self.target_languages = task.target_languages.clone();

        let success = match task.task_type {
            TaskType::VideoSubtitle => self.run_video_subtitle().await?,
            TaskType::Video => {
                let video = task
                    .video_file
                    .clone()
                    .unwrap_or_else(|| self.input_path.clone());
                self.run_video_only(&video).await?
            }
            TaskType::Subtitle => self.run_translate_loop().await?,
        };

        if self.ctx.cancel.force_cancelled() {
            self.cancel_cleanup();
            self.finish(false);
            return Ok(false);
        }

        self.finish(success);
        Ok(success)
    }

    /// Paired video and subtitle: decide skips up front, run one extraction
    /// pass if any language still needs work, then the shared translate loop.
    async fn run_video_subtitle(&mut self) -> Result<bool> {
        let mut any_needs_work = false;
        for lang_code in self.target_languages.clone() {
            match self.skip_decision(&lang_code) {
                SkipDecision::Proceed => any_needs_work = true,
                decision => self.apply_skip(&lang_code, decision)?,
            }
        }

        if !any_needs_work {
            return Ok(true);
        }

        if self.store().should_extract_audio(&self.input_path) {
            let extracted = self.extract_audio_pass().await?;
            if !extracted || self.ctx.cancel.force_cancelled() {
                return Ok(false);
            }
        }

        self.run_translate_loop().await
    }

    /// Video without a paired subtitle: each language gets a combined
    /// extract+translate invocation.
    async fn run_video_only(&mut self, video: &Path) -> Result<bool> {
        if !video.exists() {
            self.status("Video file not found");
            return Ok(false);
        }

        let mut completed_count = 0;
        for lang_code in self.target_languages.clone() {
            if self.ctx.cancel.force_cancelled() {
                return Ok(false);
            }

            match self.skip_decision(&lang_code) {
                SkipDecision::Proceed => {}
                decision => {
                    self.apply_skip(&lang_code, decision)?;
                    completed_count += 1;
                    continue;
                }
            }

            if self.ctx.cancel.should_stop_gracefully() {
                break;
            }

            self.current_language = Some(lang_code.clone());
            self.store()
                .mark(&self.input_path, &lang_code, LanguageStatus::InProgress)?;
            self.status(&format!(
                "Extracting and translating to {}...",
                lang::language_name(&lang_code)
            ));

            let command = self.build_video_command(video, &lang_code);
            let success = self.execute_translation(command, &lang_code).await?;

            if self.ctx.cancel.force_cancelled() {
                return Ok(false);
            }

            self.record_attempt(&lang_code, success, &mut completed_count)?;
        }

        if self.ctx.cancel.force_cancelled() {
            return Ok(false);
        }

        self.conclude(completed_count)
    }

    /// Shared translate loop: keep asking the store for the next language,
    /// resume-priority first. Each language is attempted at most once per
    /// run; a failed language stays queued for a later run.
    async fn run_translate_loop(&mut self) -> Result<bool> {
        let mut completed_count = 0;
        let mut attempted: HashSet<String> = HashSet::new();

        loop {
            if self.ctx.cancel.force_cancelled() {
                return Ok(false);
            }

            let lang_code = match self.next_language(&attempted) {
                Some(code) => code,
                None => break,
            };

            match self.skip_decision(&lang_code) {
                SkipDecision::Proceed => {}
                decision => {
                    self.apply_skip(&lang_code, decision)?;
                    completed_count += 1;
                    continue;
                }
            }

            if self.ctx.cancel.should_stop_gracefully() {
                break;
            }

            self.current_language = Some(lang_code.clone());
            self.store()
                .mark(&self.input_path, &lang_code, LanguageStatus::InProgress)?;
            attempted.insert(lang_code.clone());

            self.discard_stale_checkpoint(&lang_code);

            let command = self.build_subtitle_command(&lang_code);
            let success = self.execute_translation(command, &lang_code).await?;

            if self.ctx.cancel.force_cancelled() {
                return Ok(false);
            }

            self.record_attempt(&lang_code, success, &mut completed_count)?;
        }

        if self.ctx.cancel.force_cancelled() {
            return Ok(false);
        }

        self.conclude(completed_count)
    }

    /// Next language to attempt: an in-progress language takes resume
    /// priority, then queued ones in target order, excluding languages
    /// already attempted in this run.
    fn next_language(&self, attempted: &HashSet<String>) -> Option<String> {
        let store = self.store();
        let task = store.task(&self.input_path)?;

        for wanted in [LanguageStatus::InProgress, LanguageStatus::Queued] {
            for code in &task.target_languages {
                if attempted.contains(code) {
                    continue;
                }
                if let Some(job) = task.languages.get(code) {
                    if job.status == wanted {
                        return Some(code.clone());
                    }
                }
            }
        }

        None
    }

    fn record_attempt(
        &mut self,
        lang_code: &str,
        success: bool,
        completed_count: &mut usize,
    ) -> Result<()> {
        if success {
            self.store()
                .mark(&self.input_path, lang_code, LanguageStatus::Completed)?;
            *completed_count += 1;
        } else {
            self.store()
                .mark(&self.input_path, lang_code, LanguageStatus::Queued)?;
        }
        self.emit(WorkerEvent::LanguageCompleted {
            path: self.input_path.clone(),
            lang_code: lang_code.to_string(),
            success,
        });
        Ok(())
    }

    fn conclude(&self, completed_count: usize) -> Result<bool> {
        if self.store().progress_summary(&self.input_path) == "Translated" {
            cleanup::remove_checkpoint(&self.input_path);
            return Ok(true);
        }
        Ok(completed_count > 0)
    }

    /// Skip rules: translating into the input file would be destructive, and
    /// an existing output blocks re-translation under the skip policy. The
    /// overwrite policy proceeds past existing files but still treats
    /// same-as-input as a skip.
    fn skip_decision(&self, lang_code: &str) -> SkipDecision {
        let output = self.output_path(lang_code);

        if output == self.input_path {
            return SkipDecision::SameAsInput;
        }

        if output.exists()
            && self.ctx.config.output.existing_file_handling == ExistingFilePolicy::Skip
        {
            return SkipDecision::Exists;
        }

        SkipDecision::Proceed
    }

    /// A skipped language counts as already satisfied.
    fn apply_skip(&self, lang_code: &str, decision: SkipDecision) -> Result<()> {
        let reason = match decision {
            SkipDecision::SameAsInput => "same as input file",
            SkipDecision::Exists => "file already exists",
            SkipDecision::Proceed => return Ok(()),
        };
        self.status(&format!(
            "Skipped {} - {}",
            lang::language_name(lang_code),
            reason
        ));

        self.store()
            .mark(&self.input_path, lang_code, LanguageStatus::Completed)?;
        self.emit(WorkerEvent::LanguageCompleted {
            path: self.input_path.clone(),
            lang_code: lang_code.to_string(),
            success: true,
        });
        Ok(())
    }

    fn output_path(&self, lang_code: &str) -> PathBuf {
        let store = self.store();
        store
            .task(&self.input_path)
            .and_then(|task| task.languages.get(lang_code))
            .map(|job| job.output_file.clone())
            .unwrap_or_else(|| {
                lang::output_path_for(
                    &self.input_path,
                    &self.ctx.config.output.naming_pattern,
                    lang_code,
                )
            })
    }

    /// Always-fresh-restart policy: any lingering checkpoint from a prior
    /// attempt is discarded together with the partial output, rather than
    /// resuming mid-file.
    fn discard_stale_checkpoint(&self, lang_code: &str) {
        let checkpoint = engine::progress_file_path(&self.input_path);
        if !checkpoint.exists() {
            return;
        }

        if let Some(stale) = engine::read_checkpoint(&self.input_path) {
            debug!(
                "Discarding stale checkpoint at line {} for {}",
                stale.line,
                self.input_path.display()
            );
        }
        cleanup::remove_checkpoint(&self.input_path);

        let output = self.output_path(lang_code);
        if output != self.input_path && output.exists() {
            let _ = std::fs::remove_file(&output);
        }
    }

    /// One extraction pass in extraction-only mode. The filesystem is the
    /// source of truth for the result: the pass succeeded iff the expected
    /// audio artifact exists afterwards.
    async fn extract_audio_pass(&mut self) -> Result<bool> {
        let video = self
            .store()
            .task(&self.input_path)
            .and_then(|task| task.video_file.clone());

        let video = match video {
            Some(video) if video.exists() => video,
            _ => {
                self.status("Video file not found");
                return Ok(false);
            }
        };

        self.status("Extracting Audio");
        self.store().set_audio_extraction_status(
            &self.input_path,
            AudioExtractionStatus::Extracting,
            None,
        )?;

        let engine_cfg = &self.ctx.config.engine;
        let mut command = EngineCommandBuilder::new(&engine_cfg.binary_path)
            .extract_audio(&video, &engine_cfg.model_name);
        if let Some(dir) = video.parent() {
            command = command.current_dir(dir);
        }

        let run = self.supervised_run(command, "audio extraction").await;

        if self.ctx.cancel.force_cancelled()
            || matches!(&run, Some(run) if run.outcome == ProcessOutcome::Cancelled)
        {
            self.cancel_cleanup();
            return Ok(false);
        }

        let expected_audio = lang::extracted_audio_path(&video);
        if expected_audio.exists() {
            self.store().set_audio_extraction_status(
                &self.input_path,
                AudioExtractionStatus::Completed,
                Some(expected_audio),
            )?;
            let expected_subtitle = lang::extracted_subtitle_path(&video);
            if expected_subtitle.exists() {
                self.store()
                    .set_extracted_subtitle_file(&self.input_path, Some(expected_subtitle))?;
            }
            self.status("Audio extraction successful");
            Ok(true)
        } else {
            self.store().set_audio_extraction_status(
                &self.input_path,
                AudioExtractionStatus::Failed,
                None,
            )?;
            self.status("Audio extraction failed");
            Ok(false)
        }
    }

    /// Run one translation attempt and interpret the result. Success requires
    /// a zero exit code and the completion marker; everything else is a
    /// transient failure for this language.
    async fn execute_translation(
        &mut self,
        command: EngineCommand,
        lang_code: &str,
    ) -> Result<bool> {
        let lang_name = lang::language_name(lang_code);
        let total = self.target_languages.len();

        if total > 1 {
            let completed = self
                .store()
                .task(&self.input_path)
                .map(|task| {
                    task.languages
                        .values()
                        .filter(|job| job.status == LanguageStatus::Completed)
                        .count()
                })
                .unwrap_or(0);
            self.status(&format!(
                "Translating {} {}/{}",
                lang_name,
                completed + 1,
                total
            ));
        } else {
            self.status(&format!("Translating {}", lang_name));
        }

        let run = match self.supervised_run(command, &lang_name).await {
            Some(run) => run,
            None => return Ok(false),
        };

        if self.ctx.cancel.force_cancelled() || run.outcome == ProcessOutcome::Cancelled {
            self.cancel_cleanup();
            return Ok(false);
        }

        if run.succeeded() {
            return Ok(true);
        }

        match run.outcome {
            ProcessOutcome::Exited(0) => {
                // Clean exit without the completion marker: the engine
                // aborted internally.
                warn!(
                    "Engine exited 0 without completion marker for {} ({})",
                    self.input_path.display(),
                    lang_code
                );
                self.status(&format!("{} failed: translation did not complete", lang_name));
            }
            ProcessOutcome::Exited(code) => {
                warn!(
                    "Engine exited {} for {} ({}): {}",
                    code,
                    self.input_path.display(),
                    lang_code,
                    run.stderr_tail
                );
                let detail = run.stderr_tail.lines().last().unwrap_or("engine error");
                self.status(&format!("{} failed: {}", lang_name, detail));
            }
            ProcessOutcome::Cancelled => {}
        }

        Ok(false)
    }

    /// Launch through the supervisor with engine events forwarded to the
    /// front end. A launch failure counts as a failed attempt, not a fatal
    /// error, so the remaining languages still get their turn.
    async fn supervised_run(
        &self,
        command: EngineCommand,
        label: &str,
    ) -> Option<crate::supervisor::EngineRun> {
        let (engine_tx, engine_rx) = mpsc::unbounded_channel();
        let forwarder = tokio::spawn(forward_engine_events(
            engine_rx,
            self.ctx.events.clone(),
            self.input_path.clone(),
            label.to_string(),
        ));

        let result = self.runner.run(command, engine_tx).await;
        let _ = forwarder.await;

        match result {
            Ok(run) => Some(run),
            Err(e) => {
                warn!("Engine launch failed for {}: {}", label, e);
                self.status(&format!("{} failed: {}", label, e));
                None
            }
        }
    }

    fn build_subtitle_command(&self, lang_code: &str) -> EngineCommand {
        let engine_cfg = &self.ctx.config.engine;
        let mut command = EngineCommandBuilder::new(&engine_cfg.binary_path)
            .translate()
            .api_key(&engine_cfg.api_key)
            .target_language(lang_code)
            .input_file(&self.input_path)
            .output_file(self.output_path(lang_code))
            .model(&engine_cfg.model_name);

        if !engine_cfg.api_key2.is_empty() {
            command = command.api_key2(&engine_cfg.api_key2);
        }
        if !self.description.is_empty() {
            command = command.task_description(&self.description);
        }

        if let Some(audio) = self.store().extracted_audio_file(&self.input_path) {
            if audio.exists() {
                command = command.audio_file(&audio);
            }
        }

        command = command.tuning(&engine_cfg.tuning);
        if let Some(dir) = self.input_path.parent() {
            command = command.current_dir(dir);
        }
        command
    }

    fn build_video_command(&self, video: &Path, lang_code: &str) -> EngineCommand {
        let engine_cfg = &self.ctx.config.engine;
        let mut command = EngineCommandBuilder::new(&engine_cfg.binary_path)
            .translate()
            .api_key(&engine_cfg.api_key)
            .target_language(lang_code)
            .video_file(video)
            .output_file(self.output_path(lang_code))
            .model(&engine_cfg.model_name);

        if !engine_cfg.api_key2.is_empty() {
            command = command.api_key2(&engine_cfg.api_key2);
        }
        if !self.description.is_empty() {
            command = command.task_description(&self.description);
        }

        command = command.tuning(&engine_cfg.tuning);
        if let Some(dir) = video.parent() {
            command = command.current_dir(dir);
        }
        command
    }
}

/// Map engine events onto front-end worker events.
async fn forward_engine_events(
    mut rx: mpsc::UnboundedReceiver<EngineEvent>,
    events: mpsc::UnboundedSender<WorkerEvent>,
    path: PathBuf,
    label: String,
) {
    while let Some(event) = rx.recv().await {
        match event {
            EngineEvent::Progress {
                percent,
                detail,
                state,
            } => {
                let text = format!("{}% - {} | {}...", percent, detail, state.label());
                let _ = events.send(WorkerEvent::Progress {
                    path: path.clone(),
                    percent,
                    text,
                });
            }
            EngineEvent::Resuming { line } => {
                let _ = events.send(WorkerEvent::Status {
                    path: path.clone(),
                    message: format!("Resuming {} from line {}", label, line),
                });
            }
            EngineEvent::Completed => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::supervisor::EngineRun;
    use async_trait::async_trait;
    use std::collections::VecDeque;
    use tempfile::TempDir;

    /// Scripted engine stand-in: returns pre-baked results in order and
    /// records every invocation.
    struct StubEngine {
        script: Mutex<VecDeque<StubResult>>,
        commands: Mutex<Vec<EngineCommand>>,
    }

    struct StubResult {
        exit_code: i32,
        completed: bool,
        create_file: Option<PathBuf>,
    }

    impl StubEngine {
        fn new(script: Vec<StubResult>) -> Arc<Self> {
            Arc::new(Self {
                script: Mutex::new(script.into()),
                commands: Mutex::new(Vec::new()),
            })
        }

        fn invocations(&self) -> usize {
            self.commands.lock().unwrap().len()
        }
    }

    #[async_trait]
    impl EngineRunner for StubEngine {
        async fn run(
            &self,
            command: EngineCommand,
            _events: mpsc::UnboundedSender<EngineEvent>,
        ) -> Result<EngineRun> {
            self.commands.lock().unwrap().push(command);

            let result = self.script.lock().unwrap().pop_front().unwrap_or(StubResult {
                exit_code: 0,
                completed: true,
                create_file: None,
            });

            if let Some(path) = &result.create_file {
                std::fs::write(path, b"artifact").unwrap();
            }

            Ok(EngineRun {
                outcome: ProcessOutcome::Exited(result.exit_code),
                completed: result.completed,
                stderr_tail: String::new(),
            })
        }
    }

    fn context(
        dir: &TempDir,
    ) -> (
        WorkerContext,
        mpsc::UnboundedReceiver<WorkerEvent>,
        Arc<Mutex<QueueStore>>,
    ) {
        let mut config = Config::default();
        config.engine.api_key = "key".to_string();
        config.queue.state_file = dir.path().join("queue.json");

        let store = Arc::new(Mutex::new(QueueStore::load(config.queue.state_file.clone())));
        let (tx, rx) = mpsc::unbounded_channel();

        let ctx = WorkerContext {
            store: store.clone(),
            config: Arc::new(config),
            events: tx,
            cancel: CancelFlags::new(),
        };
        (ctx, rx, store)
    }

    fn add_subtitle_task(store: &Arc<Mutex<QueueStore>>, path: &Path, codes: &[&str]) {
        let languages: Vec<String> = codes.iter().map(|c| c.to_string()).collect();
        store
            .lock()
            .unwrap()
            .add(
                path,
                &languages,
                "",
                "{original_name}.{lang_code}.{modifiers}.srt",
                TaskType::Subtitle,
                None,
                false,
            )
            .unwrap();
    }

    fn drain(rx: &mut mpsc::UnboundedReceiver<WorkerEvent>) -> Vec<WorkerEvent> {
        let mut events = Vec::new();
        while let Ok(event) = rx.try_recv() {
            events.push(event);
        }
        events
    }

    #[tokio::test]
    async fn test_failed_language_does_not_abort_the_task() {
        let dir = TempDir::new().unwrap();
        let (ctx, mut rx, store) = context(&dir);
        let input = dir.path().join("Movie.en.srt");
        std::fs::write(&input, b"subs").unwrap();
        add_subtitle_task(&store, &input, &["sv", "fr"]);

        // First attempt exits 0 without the completion marker, second works.
        let engine = StubEngine::new(vec![
            StubResult {
                exit_code: 0,
                completed: false,
                create_file: None,
            },
            StubResult {
                exit_code: 0,
                completed: true,
                create_file: None,
            },
        ]);

        let mut worker = TaskWorker::new(ctx, engine.clone(), input.clone());
        let success = worker.run().await.unwrap();

        assert!(success);
        assert_eq!(engine.invocations(), 2);

        let store = store.lock().unwrap();
        let task = store.task(&input).unwrap();
        assert_eq!(task.languages["sv"].status, LanguageStatus::Queued);
        assert_eq!(task.languages["fr"].status, LanguageStatus::Completed);

        let events = drain(&mut rx);
        let completions: Vec<_> = events
            .iter()
            .filter_map(|e| match e {
                WorkerEvent::LanguageCompleted {
                    lang_code, success, ..
                } => Some((lang_code.clone(), *success)),
                _ => None,
            })
            .collect();
        assert_eq!(
            completions,
            vec![("sv".to_string(), false), ("fr".to_string(), true)]
        );
    }

    #[tokio::test]
    async fn test_all_languages_failing_fails_the_task() {
        let dir = TempDir::new().unwrap();
        let (ctx, mut rx, store) = context(&dir);
        let input = dir.path().join("Movie.en.srt");
        std::fs::write(&input, b"subs").unwrap();
        add_subtitle_task(&store, &input, &["sv", "fr"]);

        let engine = StubEngine::new(vec![
            StubResult {
                exit_code: 2,
                completed: false,
                create_file: None,
            },
            StubResult {
                exit_code: 2,
                completed: false,
                create_file: None,
            },
        ]);

        let mut worker = TaskWorker::new(ctx, engine.clone(), input.clone());
        let success = worker.run().await.unwrap();

        assert!(!success);
        assert_eq!(engine.invocations(), 2);

        let finished = drain(&mut rx)
            .into_iter()
            .find_map(|e| match e {
                WorkerEvent::TaskFinished {
                    summary, success, ..
                } => Some((summary, success)),
                _ => None,
            })
            .unwrap();
        assert_eq!(finished, ("Queued".to_string(), false));
    }

    #[tokio::test]
    async fn test_existing_output_is_skipped_without_engine_run() {
        let dir = TempDir::new().unwrap();
        let (ctx, _rx, store) = context(&dir);
        let input = dir.path().join("Movie.en.srt");
        std::fs::write(&input, b"subs").unwrap();
        std::fs::write(dir.path().join("Movie.sv.srt"), b"existing").unwrap();
        add_subtitle_task(&store, &input, &["sv"]);

        let engine = StubEngine::new(vec![]);
        let mut worker = TaskWorker::new(ctx, engine.clone(), input.clone());
        let success = worker.run().await.unwrap();

        assert!(success);
        assert_eq!(engine.invocations(), 0);
        assert_eq!(
            store.lock().unwrap().task(&input).unwrap().languages["sv"].status,
            LanguageStatus::Completed
        );
    }

    #[tokio::test]
    async fn test_same_as_input_is_skipped_even_with_overwrite_policy() {
        let dir = TempDir::new().unwrap();
        let (mut ctx, _rx, store) = context(&dir);
        let mut config = (*ctx.config).clone();
        config.output.existing_file_handling = ExistingFilePolicy::Overwrite;
        ctx.config = Arc::new(config);

        // Input already carries the target language tag.
        let input = dir.path().join("Movie.sv.srt");
        std::fs::write(&input, b"subs").unwrap();
        add_subtitle_task(&store, &input, &["sv"]);

        let engine = StubEngine::new(vec![]);
        let mut worker = TaskWorker::new(ctx, engine.clone(), input.clone());
        let success = worker.run().await.unwrap();

        assert!(success);
        assert_eq!(engine.invocations(), 0);
    }

    #[tokio::test]
    async fn test_graceful_stop_leaves_remaining_languages_queued() {
        let dir = TempDir::new().unwrap();
        let (ctx, _rx, store) = context(&dir);
        let input = dir.path().join("Movie.en.srt");
        std::fs::write(&input, b"subs").unwrap();
        add_subtitle_task(&store, &input, &["sv", "fr"]);

        ctx.cancel.request_stop_after_current();

        let engine = StubEngine::new(vec![]);
        let mut worker = TaskWorker::new(ctx, engine.clone(), input.clone());
        worker.run().await.unwrap();

        assert_eq!(engine.invocations(), 0);
        let store = store.lock().unwrap();
        let task = store.task(&input).unwrap();
        assert_eq!(task.languages["sv"].status, LanguageStatus::Queued);
        assert_eq!(task.languages["fr"].status, LanguageStatus::Queued);
    }

    #[tokio::test]
    async fn test_in_progress_language_is_retried_first() {
        let dir = TempDir::new().unwrap();
        let (ctx, _rx, store) = context(&dir);
        let input = dir.path().join("Movie.en.srt");
        std::fs::write(&input, b"subs").unwrap();
        add_subtitle_task(&store, &input, &["sv", "fr"]);

        // Simulate a prior crash mid-fr, with a lingering checkpoint.
        store
            .lock()
            .unwrap()
            .mark(&input, "fr", LanguageStatus::InProgress)
            .unwrap();
        let checkpoint = engine::progress_file_path(&input);
        std::fs::write(&checkpoint, r#"{"line":57}"#).unwrap();

        let engine = StubEngine::new(vec![]);
        let mut worker = TaskWorker::new(ctx, engine.clone(), input.clone());
        worker.run().await.unwrap();

        // fr was attempted before sv, and the stale checkpoint is gone.
        let commands = engine.commands.lock().unwrap();
        let fr_position = commands[0]
            .args
            .iter()
            .position(|a| a == "fr");
        assert!(fr_position.is_some());
        assert!(!checkpoint.exists());
    }

    #[tokio::test]
    async fn test_video_subtitle_extraction_failure_aborts_task() {
        let dir = TempDir::new().unwrap();
        let (ctx, _rx, store) = context(&dir);
        let input = dir.path().join("Movie.en.srt");
        let video = dir.path().join("Movie.mkv");
        std::fs::write(&input, b"subs").unwrap();
        std::fs::write(&video, b"video").unwrap();

        store
            .lock()
            .unwrap()
            .add(
                &input,
                &["sv".to_string()],
                "",
                "{original_name}.{lang_code}.{modifiers}.srt",
                TaskType::VideoSubtitle,
                Some(video),
                true,
            )
            .unwrap();

        // Extraction run that produces no audio artifact.
        let engine = StubEngine::new(vec![StubResult {
            exit_code: 1,
            completed: false,
            create_file: None,
        }]);

        let mut worker = TaskWorker::new(ctx, engine.clone(), input.clone());
        let success = worker.run().await.unwrap();

        assert!(!success);
        assert_eq!(engine.invocations(), 1);

        let store = store.lock().unwrap();
        let task = store.task(&input).unwrap();
        assert_eq!(
            task.audio_extraction_status,
            AudioExtractionStatus::Failed
        );
        assert_eq!(task.languages["sv"].status, LanguageStatus::Queued);
    }

    #[tokio::test]
    async fn test_video_subtitle_extraction_then_translation() {
        let dir = TempDir::new().unwrap();
        let (ctx, _rx, store) = context(&dir);
        let input = dir.path().join("Movie.en.srt");
        let video = dir.path().join("Movie.mkv");
        std::fs::write(&input, b"subs").unwrap();
        std::fs::write(&video, b"video").unwrap();

        store
            .lock()
            .unwrap()
            .add(
                &input,
                &["sv".to_string()],
                "",
                "{original_name}.{lang_code}.{modifiers}.srt",
                TaskType::VideoSubtitle,
                Some(video.clone()),
                true,
            )
            .unwrap();

        let audio = lang::extracted_audio_path(&video);
        let engine = StubEngine::new(vec![
            // Extraction pass leaves the audio artifact behind.
            StubResult {
                exit_code: 0,
                completed: false,
                create_file: Some(audio.clone()),
            },
            // Translation pass.
            StubResult {
                exit_code: 0,
                completed: true,
                create_file: None,
            },
        ]);

        let mut worker = TaskWorker::new(ctx, engine.clone(), input.clone());
        let success = worker.run().await.unwrap();

        assert!(success);
        assert_eq!(engine.invocations(), 2);

        // The translation invocation carries the extracted audio path.
        let commands = engine.commands.lock().unwrap();
        assert!(commands[1]
            .args
            .contains(&audio.to_string_lossy().to_string()));

        let store = store.lock().unwrap();
        assert_eq!(store.progress_summary(&input), "Translated");
        assert_eq!(
            store.task(&input).unwrap().audio_extraction_status,
            AudioExtractionStatus::Completed
        );
    }
}
