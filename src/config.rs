use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::{Result, SubqueueError};

fn default_batch_size() -> u32 {
    300
}

fn default_thinking_budget() -> u32 {
    2048
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub engine: EngineConfig,
    pub output: OutputConfig,
    pub queue: QueueConfig,
    pub cleanup: CleanupConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Path to the translation engine binary
    pub binary_path: String,
    /// Model passed to the engine
    pub model_name: String,
    /// Primary API key
    pub api_key: String,
    /// Optional secondary API key for quota rotation
    pub api_key2: String,
    /// Request/model tuning parameters forwarded to the engine
    pub tuning: TuningConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TuningConfig {
    /// Forward request parameters (batch size, quota, log flags)
    pub use_request_parameters: bool,
    #[serde(default = "default_batch_size")]
    pub batch_size: u32,
    pub free_quota: bool,
    pub progress_log: bool,
    pub thoughts_log: bool,
    /// Forward model sampling parameters
    pub use_model_tuning: bool,
    pub temperature: f32,
    pub top_p: f32,
    pub top_k: u32,
    pub streaming: bool,
    pub thinking: bool,
    #[serde(default = "default_thinking_budget")]
    pub thinking_budget: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutputConfig {
    /// Output naming pattern; placeholders: {original_name}, {lang_code}, {modifiers}
    pub naming_pattern: String,
    /// What to do when the output file already exists
    pub existing_file_handling: ExistingFilePolicy,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExistingFilePolicy {
    /// Treat the language as already satisfied
    Skip,
    /// Translate again, replacing the file
    Overwrite,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueConfig {
    /// Persisted queue state document
    pub state_file: PathBuf,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CleanupConfig {
    /// Whether the queue is cleared when the run command exits
    pub queue_on_exit: QueueOnExitPolicy,
    /// Delete the extracted audio track per outcome scenario
    pub audio_on_success: bool,
    pub audio_on_failure: bool,
    pub audio_on_cancel: bool,
    pub audio_on_remove: bool,
    pub audio_on_exit: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueueOnExitPolicy {
    /// Always clear the queue on exit
    Clear,
    /// Clear only when every task is fully translated
    ClearIfTranslated,
    /// Never clear on exit
    Keep,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            engine: EngineConfig {
                binary_path: "srt-engine".to_string(),
                model_name: "gemini-2.5-flash".to_string(),
                api_key: String::new(),
                api_key2: String::new(),
                tuning: TuningConfig {
                    use_request_parameters: false,
                    batch_size: 300,
                    free_quota: true,
                    progress_log: false,
                    thoughts_log: false,
                    use_model_tuning: false,
                    temperature: 0.7,
                    top_p: 0.95,
                    top_k: 40,
                    streaming: true,
                    thinking: true,
                    thinking_budget: 2048,
                },
            },
            output: OutputConfig {
                naming_pattern: "{original_name}.{lang_code}.{modifiers}.srt".to_string(),
                existing_file_handling: ExistingFilePolicy::Skip,
            },
            queue: QueueConfig {
                state_file: PathBuf::from(".subqueue/queue.json"),
            },
            cleanup: CleanupConfig {
                queue_on_exit: QueueOnExitPolicy::ClearIfTranslated,
                audio_on_success: true,
                audio_on_failure: false,
                audio_on_cancel: false,
                audio_on_remove: true,
                audio_on_exit: false,
            },
        }
    }
}

impl Config {
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| SubqueueError::Config(format!("Failed to read config file: {}", e)))?;

        toml::from_str(&content)
            .map_err(|e| SubqueueError::Config(format!("Failed to parse config file: {}", e)))
    }

    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let content = toml::to_string_pretty(self)
            .map_err(|e| SubqueueError::Config(format!("Failed to serialize config: {}", e)))?;

        if let Some(parent) = path.as_ref().parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        std::fs::write(path, content)
            .map_err(|e| SubqueueError::Config(format!("Failed to write config file: {}", e)))?;

        Ok(())
    }

    /// Credentials must be present before any task starts.
    pub fn validate_credentials(&self) -> Result<()> {
        if self.engine.api_key.trim().is_empty() {
            return Err(SubqueueError::Config(
                "Missing API key: set engine.api_key in the configuration file".to_string(),
            ));
        }
        Ok(())
    }
}
