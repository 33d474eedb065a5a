use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// Enable verbose logging
    #[arg(short, long)]
    pub verbose: bool,

    /// Configuration file path
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Add subtitle or video files to the translation queue
    Add {
        /// Subtitle/video files or directories to queue
        #[arg(required = true)]
        paths: Vec<PathBuf>,

        /// Target language codes (comma-separated, e.g. "sv,fr,de")
        #[arg(short, long)]
        languages: String,

        /// Description forwarded to the engine as translation context
        #[arg(short, long, default_value = "")]
        description: String,

        /// Recurse into directories
        #[arg(short, long)]
        recursive: bool,
    },

    /// List queued tasks with their per-language progress
    List,

    /// Remove a task from the queue
    Remove {
        /// Input file of the task to remove
        path: PathBuf,
    },

    /// Replace the target languages of a queued task
    Languages {
        /// Input file of the task to update
        path: PathBuf,

        /// New target language codes (comma-separated)
        #[arg(short, long)]
        languages: String,

        /// New description (keeps the current one when omitted)
        #[arg(short, long)]
        description: Option<String>,
    },

    /// Re-queue every language of a task
    Reset {
        /// Input file of the task to reset
        path: PathBuf,
    },

    /// Run the translation queue.
    ///
    /// Ctrl-C once finishes the in-flight language and stops; Ctrl-C twice
    /// force-cancels the running engine and reverts the in-flight language.
    Run,

    /// Remove every task and its derived artifacts
    Clear,
}
