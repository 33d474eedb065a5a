//! Persistent queue state.
//!
//! The whole queue lives in one JSON document keyed by absolute input path.
//! Every mutation rewrites the document in full, so any crash leaves the
//! previous consistent state on disk. A missing or unparsable document means
//! an empty queue, never a startup failure.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::warn;

use crate::error::Result;
use crate::lang;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskType {
    Subtitle,
    Video,
    #[serde(rename = "video+subtitle")]
    VideoSubtitle,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LanguageStatus {
    Queued,
    InProgress,
    Completed,
    Skipped,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AudioExtractionStatus {
    Pending,
    Extracting,
    Completed,
    Failed,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LanguageJob {
    pub status: LanguageStatus,
    pub output_file: PathBuf,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    pub languages: BTreeMap<String, LanguageJob>,
    pub description: String,
    pub target_languages: Vec<String>,
    pub output_pattern: String,
    pub task_type: TaskType,
    pub video_file: Option<PathBuf>,
    pub requires_audio_extraction: bool,
    pub extracted_audio_file: Option<PathBuf>,
    #[serde(default)]
    pub extracted_subtitle_file: Option<PathBuf>,
    pub audio_extraction_status: AudioExtractionStatus,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct QueueState {
    queue_state: BTreeMap<String, Task>,
}

/// Write-through store for every task and its per-language status.
pub struct QueueStore {
    state_file: PathBuf,
    state: QueueState,
}

impl QueueStore {
    /// Load the store, starting from an empty queue when the document is
    /// missing or unreadable.
    pub fn load(state_file: PathBuf) -> Self {
        let state = match std::fs::read_to_string(&state_file) {
            Ok(content) => match serde_json::from_str(&content) {
                Ok(state) => state,
                Err(e) => {
                    warn!("Queue state file is unreadable, starting empty: {}", e);
                    QueueState::default()
                }
            },
            Err(_) => QueueState::default(),
        };

        Self { state_file, state }
    }

    fn save(&self) -> Result<()> {
        if let Some(parent) = self.state_file.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let content = serde_json::to_string_pretty(&self.state)?;
        std::fs::write(&self.state_file, content)?;
        Ok(())
    }

    fn key(path: &Path) -> String {
        path.to_string_lossy().into_owned()
    }

    pub fn task(&self, path: &Path) -> Option<&Task> {
        self.state.queue_state.get(&Self::key(path))
    }

    /// Task paths in deterministic store order.
    pub fn paths(&self) -> Vec<PathBuf> {
        self.state.queue_state.keys().map(PathBuf::from).collect()
    }

    pub fn is_empty(&self) -> bool {
        self.state.queue_state.is_empty()
    }

    /// Add a task, or extend an existing one with languages it does not have
    /// yet. Idempotent on path; existing language jobs keep their status.
    #[allow(clippy::too_many_arguments)]
    pub fn add(
        &mut self,
        path: &Path,
        languages: &[String],
        description: &str,
        output_pattern: &str,
        task_type: TaskType,
        video_file: Option<PathBuf>,
        requires_extraction: bool,
    ) -> Result<()> {
        let key = Self::key(path);

        let task = self
            .state
            .queue_state
            .entry(key)
            .or_insert_with(|| Task {
                languages: BTreeMap::new(),
                description: description.to_string(),
                target_languages: Vec::new(),
                output_pattern: output_pattern.to_string(),
                task_type,
                video_file,
                requires_audio_extraction: requires_extraction,
                extracted_audio_file: None,
                extracted_subtitle_file: None,
                audio_extraction_status: AudioExtractionStatus::Pending,
            });

        for lang_code in languages {
            if !task.target_languages.contains(lang_code) {
                task.target_languages.push(lang_code.clone());
            }
            if !task.languages.contains_key(lang_code) {
                let output_file = lang::output_path_for(path, output_pattern, lang_code);
                task.languages.insert(
                    lang_code.clone(),
                    LanguageJob {
                        status: LanguageStatus::Queued,
                        output_file,
                    },
                );
            }
        }

        self.save()
    }

    pub fn remove(&mut self, path: &Path) -> Result<()> {
        if self.state.queue_state.remove(&Self::key(path)).is_some() {
            self.save()?;
        }
        Ok(())
    }

    /// The language currently marked in-progress for this task, if any.
    pub fn current_language_in_progress(&self, path: &Path) -> Option<String> {
        let task = self.task(path)?;
        task.target_languages
            .iter()
            .find(|code| {
                task.languages
                    .get(*code)
                    .map(|job| job.status == LanguageStatus::InProgress)
                    .unwrap_or(false)
            })
            .cloned()
    }

    /// Next language the worker should attempt: an in-progress language takes
    /// resume priority over queued ones; order follows the user's selection.
    pub fn next_language_to_process(&self, path: &Path) -> Option<String> {
        let task = self.task(path)?;

        for wanted in [LanguageStatus::InProgress, LanguageStatus::Queued] {
            for code in &task.target_languages {
                if let Some(job) = task.languages.get(code) {
                    if job.status == wanted {
                        return Some(code.clone());
                    }
                }
            }
        }

        None
    }

    /// Set the status of one language job. Persists immediately.
    pub fn mark(&mut self, path: &Path, lang_code: &str, status: LanguageStatus) -> Result<()> {
        if let Some(task) = self.state.queue_state.get_mut(&Self::key(path)) {
            if let Some(job) = task.languages.get_mut(lang_code) {
                job.status = status;
                self.save()?;
            }
        }
        Ok(())
    }

    pub fn progress_summary(&self, path: &Path) -> String {
        let task = match self.task(path) {
            Some(task) => task,
            None => return "Queued".to_string(),
        };

        let total = task.languages.len();
        let completed = task
            .languages
            .values()
            .filter(|job| job.status == LanguageStatus::Completed)
            .count();

        if completed == 0 {
            "Queued".to_string()
        } else if completed == total {
            "Translated".to_string()
        } else {
            format!("{}/{} Languages completed", completed, total)
        }
    }

    /// True iff any language job anywhere is queued or in progress.
    pub fn has_work_remaining(&self) -> bool {
        self.state.queue_state.values().any(|task| {
            task.languages.values().any(|job| {
                matches!(
                    job.status,
                    LanguageStatus::Queued | LanguageStatus::InProgress
                )
            })
        })
    }

    /// Replace the task's target language set. Languages retained across the
    /// change keep their status, new ones start queued, and output paths are
    /// recomputed for all of them.
    pub fn update_languages(
        &mut self,
        path: &Path,
        new_languages: &[String],
        description: &str,
        output_pattern: &str,
    ) -> Result<()> {
        let key = Self::key(path);
        if let Some(task) = self.state.queue_state.get_mut(&key) {
            let old_languages = std::mem::take(&mut task.languages);

            task.description = description.to_string();
            task.target_languages = new_languages.to_vec();
            task.output_pattern = output_pattern.to_string();

            for lang_code in new_languages {
                let status = old_languages
                    .get(lang_code)
                    .map(|job| job.status)
                    .unwrap_or(LanguageStatus::Queued);
                let output_file = lang::output_path_for(path, output_pattern, lang_code);
                task.languages.insert(
                    lang_code.clone(),
                    LanguageJob {
                        status,
                        output_file,
                    },
                );
            }

            self.save()?;
        }
        Ok(())
    }

    pub fn set_audio_extraction_status(
        &mut self,
        path: &Path,
        status: AudioExtractionStatus,
        audio_file: Option<PathBuf>,
    ) -> Result<()> {
        if let Some(task) = self.state.queue_state.get_mut(&Self::key(path)) {
            task.audio_extraction_status = status;
            if audio_file.is_some() {
                task.extracted_audio_file = audio_file;
            }
            self.save()?;
        }
        Ok(())
    }

    pub fn set_extracted_subtitle_file(
        &mut self,
        path: &Path,
        subtitle_file: Option<PathBuf>,
    ) -> Result<()> {
        if let Some(task) = self.state.queue_state.get_mut(&Self::key(path)) {
            task.extracted_subtitle_file = subtitle_file;
            self.save()?;
        }
        Ok(())
    }

    pub fn extracted_audio_file(&self, path: &Path) -> Option<PathBuf> {
        self.task(path)?.extracted_audio_file.clone()
    }

    pub fn extracted_subtitle_file(&self, path: &Path) -> Option<PathBuf> {
        self.task(path)?.extracted_subtitle_file.clone()
    }

    /// Whether the extraction pass still has to run for this task.
    pub fn should_extract_audio(&self, path: &Path) -> bool {
        self.task(path)
            .map(|task| {
                task.requires_audio_extraction
                    && task.audio_extraction_status != AudioExtractionStatus::Completed
            })
            .unwrap_or(false)
    }

    /// Reconcile the recorded extraction state against the filesystem.
    ///
    /// A crash or external interference can leave the status stuck at pending
    /// or extracting while the derived audio already exists on disk; in that
    /// case the state is repaired from the expected artifact names. Returns
    /// the current (audio, subtitle) artifact paths.
    pub fn sync_audio_extraction(
        &mut self,
        path: &Path,
    ) -> Result<(Option<PathBuf>, Option<PathBuf>)> {
        let key = Self::key(path);
        let task = match self.state.queue_state.get_mut(&key) {
            Some(task) => task,
            None => return Ok((None, None)),
        };

        let video_file = match (&task.video_file, task.audio_extraction_status) {
            (
                Some(video),
                AudioExtractionStatus::Pending | AudioExtractionStatus::Extracting,
            ) => video.clone(),
            _ => {
                return Ok((
                    task.extracted_audio_file.clone(),
                    task.extracted_subtitle_file.clone(),
                ))
            }
        };

        let expected_audio = lang::extracted_audio_path(&video_file);
        let expected_subtitle = lang::extracted_subtitle_path(&video_file);

        if expected_audio.exists() {
            task.audio_extraction_status = AudioExtractionStatus::Completed;
            task.extracted_audio_file = Some(expected_audio.clone());
            if expected_subtitle.exists() {
                task.extracted_subtitle_file = Some(expected_subtitle.clone());
            }
            let result = (
                task.extracted_audio_file.clone(),
                task.extracted_subtitle_file.clone(),
            );
            self.save()?;
            return Ok(result);
        }

        Ok((
            task.extracted_audio_file.clone(),
            task.extracted_subtitle_file.clone(),
        ))
    }

    /// Forget extraction artifacts after they are deleted from disk.
    pub fn clear_extraction_artifacts(&mut self, path: &Path) -> Result<()> {
        if let Some(task) = self.state.queue_state.get_mut(&Self::key(path)) {
            task.extracted_audio_file = None;
            task.extracted_subtitle_file = None;
            task.audio_extraction_status = AudioExtractionStatus::Pending;
            self.save()?;
        }
        Ok(())
    }

    /// Re-queue every language of a task, regardless of prior status.
    pub fn reset_languages(&mut self, path: &Path) -> Result<()> {
        if let Some(task) = self.state.queue_state.get_mut(&Self::key(path)) {
            for job in task.languages.values_mut() {
                job.status = LanguageStatus::Queued;
            }
            self.save()?;
        }
        Ok(())
    }

    pub fn clear_all(&mut self) -> Result<()> {
        self.state.queue_state.clear();
        self.save()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn store(dir: &TempDir) -> QueueStore {
        QueueStore::load(dir.path().join("queue.json"))
    }

    fn add_task(store: &mut QueueStore, path: &Path, codes: &[&str]) {
        let languages: Vec<String> = codes.iter().map(|c| c.to_string()).collect();
        store
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

    #[test]
    fn test_add_creates_queued_jobs() {
        let dir = TempDir::new().unwrap();
        let mut store = store(&dir);
        let path = dir.path().join("Movie.2020.en.srt");

        add_task(&mut store, &path, &["sv", "fr", "de"]);

        let task = store.task(&path).unwrap();
        assert_eq!(task.languages.len(), 3);
        assert!(task
            .languages
            .values()
            .all(|job| job.status == LanguageStatus::Queued));
        assert_eq!(
            task.languages["sv"].output_file,
            dir.path().join("Movie.2020.sv.srt")
        );
    }

    #[test]
    fn test_add_is_idempotent_and_extends_targets() {
        let dir = TempDir::new().unwrap();
        let mut store = store(&dir);
        let path = dir.path().join("Movie.en.srt");

        add_task(&mut store, &path, &["sv"]);
        store.mark(&path, "sv", LanguageStatus::Completed).unwrap();
        add_task(&mut store, &path, &["sv", "fr"]);

        let task = store.task(&path).unwrap();
        assert_eq!(task.target_languages, vec!["sv", "fr"]);
        assert_eq!(task.languages["sv"].status, LanguageStatus::Completed);
        assert_eq!(task.languages["fr"].status, LanguageStatus::Queued);
    }

    #[test]
    fn test_next_language_prefers_in_progress() {
        let dir = TempDir::new().unwrap();
        let mut store = store(&dir);
        let path = dir.path().join("Movie.en.srt");

        add_task(&mut store, &path, &["sv", "fr", "de"]);
        store.mark(&path, "de", LanguageStatus::InProgress).unwrap();

        assert_eq!(store.next_language_to_process(&path).as_deref(), Some("de"));

        store.mark(&path, "de", LanguageStatus::Completed).unwrap();
        assert_eq!(store.next_language_to_process(&path).as_deref(), Some("sv"));
    }

    #[test]
    fn test_progress_summary() {
        let dir = TempDir::new().unwrap();
        let mut store = store(&dir);
        let path = dir.path().join("Movie.en.srt");

        add_task(&mut store, &path, &["sv", "fr"]);
        assert_eq!(store.progress_summary(&path), "Queued");

        store.mark(&path, "sv", LanguageStatus::Completed).unwrap();
        assert_eq!(store.progress_summary(&path), "1/2 Languages completed");

        store.mark(&path, "fr", LanguageStatus::Completed).unwrap();
        assert_eq!(store.progress_summary(&path), "Translated");
    }

    #[test]
    fn test_has_work_remaining() {
        let dir = TempDir::new().unwrap();
        let mut store = store(&dir);
        let path = dir.path().join("Movie.en.srt");

        assert!(!store.has_work_remaining());

        add_task(&mut store, &path, &["sv"]);
        assert!(store.has_work_remaining());

        store.mark(&path, "sv", LanguageStatus::Skipped).unwrap();
        assert!(!store.has_work_remaining());
    }

    #[test]
    fn test_update_languages_keeps_retained_statuses() {
        let dir = TempDir::new().unwrap();
        let mut store = store(&dir);
        let path = dir.path().join("Movie.en.srt");

        add_task(&mut store, &path, &["sv", "fr"]);
        store.mark(&path, "sv", LanguageStatus::Completed).unwrap();

        let new_languages = vec!["sv".to_string(), "de".to_string()];
        store
            .update_languages(
                &path,
                &new_languages,
                "desc",
                "{original_name}.{lang_code}.{modifiers}.srt",
            )
            .unwrap();

        let task = store.task(&path).unwrap();
        assert_eq!(task.target_languages, vec!["sv", "de"]);
        assert!(!task.languages.contains_key("fr"));
        assert_eq!(task.languages["sv"].status, LanguageStatus::Completed);
        assert_eq!(task.languages["de"].status, LanguageStatus::Queued);
    }

    #[test]
    fn test_persistence_round_trip() {
        let dir = TempDir::new().unwrap();
        let state_file = dir.path().join("queue.json");
        let path = dir.path().join("Movie.en.srt");

        {
            let mut store = QueueStore::load(state_file.clone());
            add_task(&mut store, &path, &["sv", "fr"]);
            store.mark(&path, "sv", LanguageStatus::InProgress).unwrap();
        }

        let store = QueueStore::load(state_file);
        assert_eq!(
            store.current_language_in_progress(&path).as_deref(),
            Some("sv")
        );
        assert_eq!(store.next_language_to_process(&path).as_deref(), Some("sv"));
    }

    #[test]
    fn test_corrupt_state_starts_empty() {
        let dir = TempDir::new().unwrap();
        let state_file = dir.path().join("queue.json");
        std::fs::write(&state_file, "{not json").unwrap();

        let store = QueueStore::load(state_file);
        assert!(store.is_empty());
    }

    #[test]
    fn test_sync_audio_extraction_self_heals() {
        let dir = TempDir::new().unwrap();
        let mut store = store(&dir);
        let path = dir.path().join("Movie.en.srt");
        let video = dir.path().join("Movie.mkv");

        store
            .add(
                &path,
                &["sv".to_string()],
                "",
                "{original_name}.{lang_code}.{modifiers}.srt",
                TaskType::VideoSubtitle,
                Some(video.clone()),
                true,
            )
            .unwrap();

        // Nothing on disk yet: state is untouched.
        let (audio, _) = store.sync_audio_extraction(&path).unwrap();
        assert!(audio.is_none());
        assert!(store.should_extract_audio(&path));

        // Simulate a crash after the engine finished extracting.
        std::fs::write(dir.path().join("Movie_extracted.mp3"), b"audio").unwrap();
        let (audio, _) = store.sync_audio_extraction(&path).unwrap();
        assert_eq!(audio, Some(dir.path().join("Movie_extracted.mp3")));
        assert!(!store.should_extract_audio(&path));
    }
}
