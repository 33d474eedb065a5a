//! Cleanup policy engine.
//!
//! Reconciles on-disk derived artifacts with task outcomes. Deletable
//! artifacts are progress checkpoints, derived `_extracted.srt` /
//! `_extracted.mp3` files, and (opt-in per scenario) the extracted audio
//! track. A completed language's final output file is never deleted here.
//! Every deletion is best-effort: filesystem errors are logged and ignored.

use std::path::{Path, PathBuf};
use tracing::debug;

use crate::config::{CleanupConfig, Config, QueueOnExitPolicy};
use crate::engine;
use crate::lang;
use crate::store::{LanguageStatus, QueueStore};

/// The six independently configurable cleanup scenarios.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CleanupScenario {
    Success,
    PartialSuccess,
    Failure,
    Cancel,
    Remove,
    Exit,
}

pub struct CleanupPolicy {
    cleanup: CleanupConfig,
}

impl CleanupPolicy {
    pub fn new(config: &Config) -> Self {
        Self {
            cleanup: config.cleanup.clone(),
        }
    }

    fn audio_flag(&self, scenario: CleanupScenario) -> Option<bool> {
        match scenario {
            CleanupScenario::Success => Some(self.cleanup.audio_on_success),
            // Partial success keeps the audio so the remaining languages can
            // resume without re-extracting.
            CleanupScenario::PartialSuccess => None,
            CleanupScenario::Failure => Some(self.cleanup.audio_on_failure),
            CleanupScenario::Cancel => Some(self.cleanup.audio_on_cancel),
            CleanupScenario::Remove => Some(self.cleanup.audio_on_remove),
            CleanupScenario::Exit => Some(self.cleanup.audio_on_exit),
        }
    }

    /// Whether the extracted audio track should be deleted for this
    /// scenario. The exit scenario is additionally gated on the queue-on-exit
    /// policy agreeing that the queue would be cleared.
    pub fn should_cleanup_audio(&self, scenario: CleanupScenario, store: &QueueStore) -> bool {
        let enabled = match self.audio_flag(scenario) {
            Some(flag) => flag,
            None => return false,
        };
        if !enabled {
            return false;
        }

        if scenario == CleanupScenario::Exit {
            return self.queue_would_clear(store);
        }

        true
    }

    /// Whether the queue-on-exit policy would clear the queue right now.
    pub fn queue_would_clear(&self, store: &QueueStore) -> bool {
        match self.cleanup.queue_on_exit {
            QueueOnExitPolicy::Clear => true,
            QueueOnExitPolicy::ClearIfTranslated => store
                .paths()
                .iter()
                .all(|path| store.progress_summary(path) == "Translated"),
            QueueOnExitPolicy::Keep => false,
        }
    }

    /// Delete the derived extraction artifacts of one task according to the
    /// outcome scenario.
    pub fn cleanup_task_artifacts(
        &self,
        store: &mut QueueStore,
        path: &Path,
        scenario: CleanupScenario,
    ) {
        if let Some(subtitle) = store.extracted_subtitle_file(path) {
            remove_file_quietly(&subtitle);
        }
        if let Some(predicted) = predicted_extracted_subtitle(store, path) {
            remove_file_quietly(&predicted);
        }

        if scenario == CleanupScenario::PartialSuccess {
            let _ = store.set_extracted_subtitle_file(path, None);
            return;
        }

        if self.should_cleanup_audio(scenario, store) {
            let audio = match store.sync_audio_extraction(path) {
                Ok((audio, _)) => audio,
                Err(_) => store.extracted_audio_file(path),
            };
            if let Some(audio) = audio {
                remove_file_quietly(&audio);
            }
            let _ = store.clear_extraction_artifacts(path);
        } else {
            let _ = store.set_extracted_subtitle_file(path, None);
        }
    }

    /// Force-cancel cleanup: discard the in-flight language's partial output
    /// and checkpoint, revert it to queued, and leave completed languages
    /// untouched.
    pub fn cancel_cleanup(
        &self,
        store: &mut QueueStore,
        path: &Path,
        current_language: Option<&str>,
    ) {
        remove_checkpoint(path);

        if let Some(lang_code) = current_language {
            let output = store
                .task(path)
                .and_then(|task| task.languages.get(lang_code))
                .map(|job| job.output_file.clone());

            if let Some(output) = output {
                if output.exists()
                    && output.as_path() != path
                    && !output_is_input_alias(path, &output, lang_code)
                {
                    remove_file_quietly(&output);
                }
            }

            let _ = store.mark(path, lang_code, LanguageStatus::Queued);
        }

        self.cleanup_task_artifacts(store, path, CleanupScenario::Cancel);
    }
}

/// Remove the engine's progress checkpoint for this input, if present.
pub fn remove_checkpoint(input_path: &Path) {
    remove_file_quietly(&engine::progress_file_path(input_path));
}

fn remove_file_quietly(path: &Path) {
    if path.exists() {
        if let Err(e) = std::fs::remove_file(path) {
            debug!("Cleanup could not remove {}: {}", path.display(), e);
        }
    }
}

/// Expected extracted-subtitle name derived from the task's source file
/// (video when paired, input otherwise), with trailing language codes
/// stripped from the stem.
fn predicted_extracted_subtitle(store: &QueueStore, path: &Path) -> Option<PathBuf> {
    let task = store.task(path)?;
    let source = task.video_file.clone().unwrap_or_else(|| path.to_path_buf());

    let stem = source.file_stem()?.to_string_lossy().into_owned();
    let stripped = lang::strip_language_codes_from_name(&stem);
    let file_name = format!("{}_extracted.srt", stripped);

    Some(match source.parent() {
        Some(dir) => dir.join(file_name),
        None => PathBuf::from(file_name),
    })
}

/// True when the output name is just the input under the same language tag,
/// in which case deleting it would destroy the input subtitle.
fn output_is_input_alias(input: &Path, output: &Path, lang_code: &str) -> bool {
    let parse = |path: &Path| {
        path.file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .and_then(|name| lang::parse_subtitle_filename(&name))
    };

    let (input_parsed, output_parsed) = match (parse(input), parse(output)) {
        (Some(i), Some(o)) => (i, o),
        _ => return false,
    };

    if input_parsed.base_name != output_parsed.base_name
        || input_parsed.modifiers_string != output_parsed.modifiers_string
    {
        return false;
    }

    let normalize = |code: &Option<String>| {
        code.as_deref()
            .and_then(lang::normalize_language_code)
            .map(str::to_string)
    };

    let input_lang = normalize(&input_parsed.lang_code);
    let output_lang = normalize(&output_parsed.lang_code);

    input_lang.as_deref() == Some(lang_code) && output_lang.as_deref() == Some(lang_code)
}
