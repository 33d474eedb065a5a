//! Queue runner.
//!
//! Sequences queued tasks one at a time: credentials are validated before
//! anything starts, each task runs on its own worker while this side consumes
//! the event stream, and every outcome is followed by the matching cleanup
//! scenario. On exit the queue-on-exit policy decides whether the queue is
//! cleared.

use indicatif::{ProgressBar, ProgressStyle};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::mpsc;
use tracing::{info, warn};

use crate::cleanup::{self, CleanupPolicy, CleanupScenario};
use crate::config::Config;
use crate::error::Result;
use crate::store::QueueStore;
use crate::supervisor::{EngineRunner, Supervisor};
use crate::worker::{CancelFlags, TaskWorker, WorkerContext, WorkerEvent};

pub struct QueueRunner {
    store: Arc<Mutex<QueueStore>>,
    config: Arc<Config>,
    runner: Arc<dyn EngineRunner>,
    cancel: CancelFlags,
}

impl QueueRunner {
    pub fn new(config: Config, runner: Arc<dyn EngineRunner>, cancel: CancelFlags) -> Self {
        let store = QueueStore::load(config.queue.state_file.clone());
        Self {
            store: Arc::new(Mutex::new(store)),
            config: Arc::new(config),
            runner,
            cancel,
        }
    }

    /// Runner wired to the real subprocess supervisor.
    pub fn with_supervisor(config: Config) -> Self {
        let cancel = CancelFlags::new();
        let runner = Arc::new(Supervisor::new(cancel.force_flag()));
        Self::new(config, runner, cancel)
    }

    /// Shared cancellation flags, for signal handlers.
    pub fn cancel_flags(&self) -> CancelFlags {
        self.cancel.clone()
    }

    fn store(&self) -> MutexGuard<'_, QueueStore> {
        self.store.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Drive the queue until no work remains or cancellation stops it.
    pub async fn run(&self) -> Result<()> {
        self.config.validate_credentials()?;

        if !self.store().has_work_remaining() {
            info!("No work remaining in queue");
            self.exit_cleanup();
            return Ok(());
        }

        loop {
            if self.cancel.force_cancelled() || self.cancel.should_stop_gracefully() {
                break;
            }

            let path = match self.next_task() {
                Some(path) => path,
                None => break,
            };

            self.run_task(&path).await;
        }

        self.exit_cleanup();
        Ok(())
    }

    /// First task with a language still to process, in store order.
    fn next_task(&self) -> Option<PathBuf> {
        let store = self.store();
        store
            .paths()
            .into_iter()
            .find(|path| store.next_language_to_process(path).is_some())
    }

    async fn run_task(&self, path: &Path) {
        info!("Processing task: {}", path.display());

        let (events_tx, mut events_rx) = mpsc::unbounded_channel();
        let ctx = WorkerContext {
            store: self.store.clone(),
            config: self.config.clone(),
            events: events_tx,
            cancel: self.cancel.clone(),
        };

        let mut worker = TaskWorker::new(ctx, self.runner.clone(), path.to_path_buf());
        let handle = tokio::spawn(async move { worker.run().await });

        let bar = task_progress_bar(path);
        while let Some(event) = events_rx.recv().await {
            match event {
                WorkerEvent::Status { message, .. } => bar.set_message(message),
                WorkerEvent::Progress { percent, text, .. } => {
                    bar.set_position(percent as u64);
                    bar.set_message(text);
                }
                WorkerEvent::LanguageCompleted {
                    lang_code, success, ..
                } => {
                    let verdict = if success { "completed" } else { "failed" };
                    bar.println(format!(
                        "  {} {}",
                        crate::lang::language_name(&lang_code),
                        verdict
                    ));
                }
                WorkerEvent::TaskFinished { summary, .. } => {
                    bar.finish_with_message(summary);
                }
            }
        }

        let success = match handle.await {
            Ok(Ok(success)) => success,
            Ok(Err(e)) => {
                warn!("Task failed for {}: {}", path.display(), e);
                false
            }
            Err(e) => {
                warn!("Task worker aborted for {}: {}", path.display(), e);
                false
            }
        };

        let mut store = self.store();
        let _ = store.sync_audio_extraction(path);

        let scenario = if success {
            if store.progress_summary(path) == "Translated" {
                CleanupScenario::Success
            } else {
                CleanupScenario::PartialSuccess
            }
        } else {
            CleanupScenario::Failure
        };
        CleanupPolicy::new(&self.config).cleanup_task_artifacts(&mut store, path, scenario);
    }

    /// Apply the queue-on-exit policy. Transient extracted subtitles go away
    /// unconditionally; the queue itself is cleared only when the policy
    /// agrees.
    fn exit_cleanup(&self) {
        let policy = CleanupPolicy::new(&self.config);
        let mut store = self.store();

        for path in store.paths() {
            if let Some(subtitle) = store.extracted_subtitle_file(&path) {
                if subtitle.exists() {
                    let _ = std::fs::remove_file(&subtitle);
                }
            }
        }

        if policy.queue_would_clear(&store) {
            for path in store.paths() {
                cleanup::remove_checkpoint(&path);
                policy.cleanup_task_artifacts(&mut store, &path, CleanupScenario::Exit);
            }
            if store.clear_all().is_ok() {
                info!("Queue cleared on exit");
            }
        }
    }
}

fn task_progress_bar(path: &Path) -> ProgressBar {
    let bar = ProgressBar::new(100);
    if let Ok(style) =
        ProgressStyle::with_template("{prefix} [{bar:40.cyan/blue}] {pos:>3}% {msg}")
    {
        bar.set_style(style.progress_chars("#>-"));
    }
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    bar.set_prefix(name);
    bar
}
