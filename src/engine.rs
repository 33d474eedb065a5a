//! Invocation contract for the external translation engine.
//!
//! The engine is a dedicated CLI binary launched once per language attempt
//! (or once per extraction pass). Every tuning parameter travels as a
//! discrete argument; progress comes back as newline-delimited JSON records
//! on stdout.

use serde::Deserialize;
use std::path::{Path, PathBuf};

use crate::config::TuningConfig;

/// One engine invocation: binary, arguments, working directory.
#[derive(Debug, Clone)]
pub struct EngineCommand {
    pub binary_path: String,
    pub args: Vec<String>,
    pub current_dir: Option<PathBuf>,
    pub description: String,
}

impl EngineCommand {
    pub fn new<S1: Into<String>, S2: Into<String>>(binary_path: S1, description: S2) -> Self {
        Self {
            binary_path: binary_path.into(),
            args: Vec::new(),
            current_dir: None,
            description: description.into(),
        }
    }

    pub fn arg<S: Into<String>>(mut self, arg: S) -> Self {
        self.args.push(arg.into());
        self
    }

    fn key_value<S: Into<String>>(self, key: &str, value: S) -> Self {
        self.arg(key).arg(value)
    }

    fn path_arg<P: AsRef<Path>>(self, key: &str, path: P) -> Self {
        self.key_value(key, path.as_ref().to_string_lossy().to_string())
    }

    pub fn api_key<S: Into<String>>(self, key: S) -> Self {
        self.key_value("--api-key", key)
    }

    pub fn api_key2<S: Into<String>>(self, key: S) -> Self {
        self.key_value("--api-key2", key)
    }

    pub fn target_language<S: Into<String>>(self, code: S) -> Self {
        self.key_value("--target-language", code)
    }

    pub fn input_file<P: AsRef<Path>>(self, path: P) -> Self {
        self.path_arg("--input-file", path)
    }

    pub fn video_file<P: AsRef<Path>>(self, path: P) -> Self {
        self.path_arg("--video-file", path)
    }

    pub fn audio_file<P: AsRef<Path>>(self, path: P) -> Self {
        self.path_arg("--audio-file", path)
    }

    pub fn output_file<P: AsRef<Path>>(self, path: P) -> Self {
        self.path_arg("--output-file", path)
    }

    pub fn model<S: Into<String>>(self, model: S) -> Self {
        self.key_value("--model", model)
    }

    /// Free-text description forwarded to the engine as translation context.
    pub fn task_description<S: Into<String>>(self, description: S) -> Self {
        self.key_value("--description", description)
    }

    pub fn current_dir<P: AsRef<Path>>(mut self, dir: P) -> Self {
        self.current_dir = Some(dir.as_ref().to_path_buf());
        self
    }

    /// Append the enabled tuning parameters as discrete arguments.
    pub fn tuning(mut self, tuning: &TuningConfig) -> Self {
        if tuning.use_request_parameters {
            self = self.key_value("--batch-size", tuning.batch_size.to_string());
            if !tuning.free_quota {
                self = self.arg("--no-free-quota");
            }
            if tuning.progress_log {
                self = self.arg("--progress-log");
            }
            if tuning.thoughts_log {
                self = self.arg("--thoughts-log");
            }
        }

        if tuning.use_model_tuning {
            self = self
                .key_value("--temperature", tuning.temperature.to_string())
                .key_value("--top-p", tuning.top_p.to_string())
                .key_value("--top-k", tuning.top_k.to_string())
                .key_value("--thinking-budget", tuning.thinking_budget.to_string());
            if !tuning.streaming {
                self = self.arg("--no-streaming");
            }
            if !tuning.thinking {
                self = self.arg("--no-thinking");
            }
        }

        self
    }
}

/// Builder tied to one engine binary.
pub struct EngineCommandBuilder {
    binary_path: String,
}

impl EngineCommandBuilder {
    pub fn new<S: Into<String>>(binary_path: S) -> Self {
        Self {
            binary_path: binary_path.into(),
        }
    }

    /// Translation mode: one language, subtitle or video input.
    pub fn translate(&self) -> EngineCommand {
        EngineCommand::new(&self.binary_path, "Translation").arg("translate")
    }

    /// Extraction-only mode: pull the audio track out of a video.
    pub fn extract_audio<P: AsRef<Path>>(&self, video_path: P, model: &str) -> EngineCommand {
        EngineCommand::new(&self.binary_path, "Audio extraction")
            .arg("extract-audio")
            .path_arg("--video-file", video_path)
            .key_value("--model", model)
    }
}

/// Coarse engine activity reported alongside progress.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EngineState {
    Thinking,
    Processing,
    #[serde(other)]
    Working,
}

impl Default for EngineState {
    fn default() -> Self {
        EngineState::Working
    }
}

impl EngineState {
    pub fn label(&self) -> &'static str {
        match self {
            EngineState::Thinking => "Thinking",
            EngineState::Processing => "Processing",
            EngineState::Working => "Working",
        }
    }
}

/// One record of the engine's stdout event stream.
///
/// `completed` is the literal completion marker: a clean exit without it is
/// still treated as a failed attempt, guarding against engines that exit 0
/// after an internal abort.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum EngineEvent {
    Progress {
        percent: u8,
        #[serde(default)]
        detail: String,
        #[serde(default)]
        state: EngineState,
    },
    Resuming {
        line: u64,
    },
    Completed,
}

/// Parse one stdout line into an engine event. Lines that are not JSON
/// records carry no control meaning and yield `None`.
pub fn parse_event(line: &str) -> Option<EngineEvent> {
    let trimmed = line.trim();
    if !trimmed.starts_with('{') {
        return None;
    }
    serde_json::from_str(trimmed).ok()
}

/// Progress checkpoint the engine writes next to the input file.
#[derive(Debug, Clone, Deserialize)]
pub struct Checkpoint {
    pub line: u64,
}

/// Checkpoint path convention: `<stem>.progress` next to the input.
pub fn progress_file_path(input_path: &Path) -> PathBuf {
    let stem = input_path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    let file_name = format!("{}.progress", stem);
    match input_path.parent() {
        Some(dir) => dir.join(file_name),
        None => PathBuf::from(file_name),
    }
}

/// Read a lingering checkpoint, if any. Unreadable files count as absent.
pub fn read_checkpoint(input_path: &Path) -> Option<Checkpoint> {
    let content = std::fs::read_to_string(progress_file_path(input_path)).ok()?;
    serde_json::from_str(&content).ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_progress_event() {
        let event = parse_event(
            r#"{"event":"progress","percent":42,"detail":"Batch 3/7","state":"thinking"}"#,
        )
        .unwrap();
        assert_eq!(
            event,
            EngineEvent::Progress {
                percent: 42,
                detail: "Batch 3/7".to_string(),
                state: EngineState::Thinking,
            }
        );
    }

    #[test]
    fn test_parse_completed_event() {
        assert_eq!(
            parse_event(r#"{"event":"completed"}"#),
            Some(EngineEvent::Completed)
        );
    }

    #[test]
    fn test_parse_resuming_event() {
        assert_eq!(
            parse_event(r#"{"event":"resuming","line":120}"#),
            Some(EngineEvent::Resuming { line: 120 })
        );
    }

    #[test]
    fn test_parse_ignores_plain_text() {
        assert_eq!(parse_event("loading model weights"), None);
        assert_eq!(parse_event(""), None);
        assert_eq!(parse_event("{not json"), None);
    }

    #[test]
    fn test_unknown_state_maps_to_working() {
        let event =
            parse_event(r#"{"event":"progress","percent":5,"state":"uploading"}"#).unwrap();
        match event {
            EngineEvent::Progress { state, .. } => assert_eq!(state, EngineState::Working),
            other => panic!("unexpected event: {:?}", other),
        }
    }

    #[test]
    fn test_translate_command_args() {
        let cmd = EngineCommandBuilder::new("srt-engine")
            .translate()
            .api_key("key")
            .target_language("sv")
            .input_file("/media/Movie.en.srt")
            .output_file("/media/Movie.sv.srt")
            .model("gemini-2.5-flash");

        assert_eq!(cmd.args[0], "translate");
        assert!(cmd.args.contains(&"--target-language".to_string()));
        assert!(cmd.args.contains(&"sv".to_string()));
        assert!(cmd.args.contains(&"/media/Movie.sv.srt".to_string()));
    }

    #[test]
    fn test_tuning_args_only_when_enabled() {
        let mut tuning = crate::config::Config::default().engine.tuning;
        let cmd = EngineCommandBuilder::new("srt-engine").translate().tuning(&tuning);
        assert!(!cmd.args.contains(&"--batch-size".to_string()));
        assert!(!cmd.args.contains(&"--temperature".to_string()));

        tuning.use_request_parameters = true;
        tuning.use_model_tuning = true;
        tuning.free_quota = false;
        let cmd = EngineCommandBuilder::new("srt-engine").translate().tuning(&tuning);
        assert!(cmd.args.contains(&"--batch-size".to_string()));
        assert!(cmd.args.contains(&"--no-free-quota".to_string()));
        assert!(cmd.args.contains(&"--temperature".to_string()));
    }

    #[test]
    fn test_progress_file_path() {
        assert_eq!(
            progress_file_path(Path::new("/media/Movie.2020.en.srt")),
            PathBuf::from("/media/Movie.2020.en.progress")
        );
    }
}
