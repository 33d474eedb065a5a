//! Subqueue - persistent subtitle translation queue.
//!
//! Queues subtitle files (optionally paired with video) for machine
//! translation into one or more target languages, driving an external
//! translation engine one subprocess at a time while tracking per-language
//! progress durably across restarts.

use anyhow::Result;
use clap::Parser;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use tracing::{info, Level};
use tracing_appender::{non_blocking, rolling};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};
use walkdir::WalkDir;

use subqueue::cleanup::{self, CleanupPolicy, CleanupScenario};
use subqueue::cli::{Args, Commands};
use subqueue::config::Config;
use subqueue::error::SubqueueError;
use subqueue::lang;
use subqueue::store::{LanguageStatus, QueueStore, Task, TaskType};
use subqueue::workflow::QueueRunner;

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    setup_logging(args.verbose)?;

    let config = match &args.config {
        Some(config_path) => Config::from_file(config_path)?,
        None => {
            if Path::new("config.toml").exists() {
                info!("Found config.toml in current directory, loading...");
                Config::from_file("config.toml")?
            } else {
                Config::default()
            }
        }
    };

    match args.command {
        Commands::Add {
            paths,
            languages,
            description,
            recursive,
        } => {
            add_files(&config, &paths, &languages, &description, recursive)?;
        }
        Commands::List => {
            list_tasks(&config);
        }
        Commands::Remove { path } => {
            remove_task(&config, &path)?;
        }
        Commands::Languages {
            path,
            languages,
            description,
        } => {
            update_languages(&config, &path, &languages, description)?;
        }
        Commands::Reset { path } => {
            let mut store = QueueStore::load(config.queue.state_file.clone());
            let path = absolute_path(&path);
            store.reset_languages(&path)?;
            println!("Re-queued all languages for {}", path.display());
        }
        Commands::Run => {
            run_queue(config).await?;
        }
        Commands::Clear => {
            clear_queue(&config);
        }
    }

    Ok(())
}

/// Resolve the comma-separated code list to canonical codes, rejecting
/// anything the resolver does not know before the store is touched.
fn parse_language_codes(input: &str) -> Result<Vec<String>> {
    let mut codes = Vec::new();
    for raw in input.split(',') {
        let raw = raw.trim();
        if raw.is_empty() {
            continue;
        }
        let code = lang::normalize_language_code(raw)
            .ok_or_else(|| SubqueueError::UnknownLanguage(raw.to_string()))?;
        if !codes.contains(&code.to_string()) {
            codes.push(code.to_string());
        }
    }

    if codes.is_empty() {
        return Err(SubqueueError::Config("No target languages given".to_string()).into());
    }
    Ok(codes)
}

fn absolute_path(path: &Path) -> PathBuf {
    std::fs::canonicalize(path).unwrap_or_else(|_| {
        std::path::absolute(path).unwrap_or_else(|_| path.to_path_buf())
    })
}

/// Queue the given files, pairing subtitles with their videos: a pair becomes
/// one video+subtitle task with audio extraction, a lone subtitle a subtitle
/// task, and a lone video a video task.
fn add_files(
    config: &Config,
    paths: &[PathBuf],
    languages: &str,
    description: &str,
    recursive: bool,
) -> Result<()> {
    let codes = parse_language_codes(languages)?;

    let mut files = Vec::new();
    for path in paths {
        let path = absolute_path(path);
        if path.is_dir() {
            let max_depth = if recursive { usize::MAX } else { 1 };
            for entry in WalkDir::new(&path)
                .max_depth(max_depth)
                .into_iter()
                .filter_map(|e| e.ok())
            {
                if entry.file_type().is_file() {
                    files.push(entry.path().to_path_buf());
                }
            }
        } else if path.exists() {
            files.push(path);
        } else {
            return Err(SubqueueError::FileNotFound(path.display().to_string()).into());
        }
    }

    let subtitles: Vec<PathBuf> = files
        .iter()
        .filter(|f| lang::is_subtitle_file(f))
        .cloned()
        .collect();
    let videos: Vec<PathBuf> = files
        .iter()
        .filter(|f| lang::is_video_file(f))
        .cloned()
        .collect();

    if subtitles.is_empty() && videos.is_empty() {
        return Err(SubqueueError::Config(
            "No subtitle or video files found in the given paths".to_string(),
        )
        .into());
    }

    let mut store = QueueStore::load(config.queue.state_file.clone());
    let mut paired: HashSet<PathBuf> = HashSet::new();
    let mut added = 0;

    for subtitle in &subtitles {
        let video_pair = videos
            .iter()
            .find(|video| !paired.contains(*video) && lang::subtitle_video_pair(subtitle, video));

        match video_pair {
            Some(video) => {
                store.add(
                    subtitle,
                    &codes,
                    description,
                    &config.output.naming_pattern,
                    TaskType::VideoSubtitle,
                    Some(video.clone()),
                    true,
                )?;
                paired.insert(video.clone());
                println!("Added {} (paired with {})", subtitle.display(), video.display());
            }
            None => {
                store.add(
                    subtitle,
                    &codes,
                    description,
                    &config.output.naming_pattern,
                    TaskType::Subtitle,
                    None,
                    false,
                )?;
                println!("Added {}", subtitle.display());
            }
        }
        added += 1;
    }

    for video in &videos {
        if paired.contains(video) {
            continue;
        }
        store.add(
            video,
            &codes,
            description,
            &config.output.naming_pattern,
            TaskType::Video,
            Some(video.clone()),
            false,
        )?;
        println!("Added {} (video)", video.display());
        added += 1;
    }

    println!("{} task(s) queued for: {}", added, codes.join(", "));
    Ok(())
}

fn task_type_label(task: &Task) -> &'static str {
    match task.task_type {
        TaskType::Subtitle => "subtitle",
        TaskType::Video => "video",
        TaskType::VideoSubtitle => "video+subtitle",
    }
}

fn status_label(status: LanguageStatus) -> &'static str {
    match status {
        LanguageStatus::Queued => "queued",
        LanguageStatus::InProgress => "in progress",
        LanguageStatus::Completed => "completed",
        LanguageStatus::Skipped => "skipped",
    }
}

fn list_tasks(config: &Config) {
    let store = QueueStore::load(config.queue.state_file.clone());

    if store.is_empty() {
        println!("Queue is empty.");
        return;
    }

    for path in store.paths() {
        let task = match store.task(&path) {
            Some(task) => task,
            None => continue,
        };

        println!(
            "{} [{}] - {}",
            path.display(),
            task_type_label(task),
            store.progress_summary(&path)
        );

        for code in &task.target_languages {
            if let Some(job) = task.languages.get(code) {
                println!(
                    "    {:<8} {:<12} {}",
                    code,
                    status_label(job.status),
                    job.output_file.display()
                );
            }
        }
    }
}

fn remove_task(config: &Config, path: &Path) -> Result<()> {
    let path = absolute_path(path);
    let mut store = QueueStore::load(config.queue.state_file.clone());

    if store.task(&path).is_none() {
        println!("No queued task for {}", path.display());
        return Ok(());
    }

    cleanup::remove_checkpoint(&path);
    CleanupPolicy::new(config).cleanup_task_artifacts(&mut store, &path, CleanupScenario::Remove);
    store.remove(&path)?;

    println!("Removed {}", path.display());
    Ok(())
}

fn update_languages(
    config: &Config,
    path: &Path,
    languages: &str,
    description: Option<String>,
) -> Result<()> {
    let codes = parse_language_codes(languages)?;
    let path = absolute_path(path);
    let mut store = QueueStore::load(config.queue.state_file.clone());

    let current = match store.task(&path) {
        Some(task) => task.description.clone(),
        None => {
            println!("No queued task for {}", path.display());
            return Ok(());
        }
    };

    let description = description.unwrap_or(current);
    store.update_languages(&path, &codes, &description, &config.output.naming_pattern)?;

    println!("Updated {} -> {}", path.display(), codes.join(", "));
    Ok(())
}

fn clear_queue(config: &Config) {
    let mut store = QueueStore::load(config.queue.state_file.clone());
    let policy = CleanupPolicy::new(config);

    for path in store.paths() {
        cleanup::remove_checkpoint(&path);
        policy.cleanup_task_artifacts(&mut store, &path, CleanupScenario::Remove);
    }

    if store.clear_all().is_ok() {
        println!("Queue cleared.");
    }
}

async fn run_queue(config: Config) -> Result<()> {
    let runner = QueueRunner::with_supervisor(config);

    // First Ctrl-C stops after the in-flight language, second force-cancels.
    let cancel = runner.cancel_flags();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            eprintln!("Stopping after the current language... press Ctrl-C again to force cancel");
            cancel.request_stop_after_current();

            if tokio::signal::ctrl_c().await.is_ok() {
                eprintln!("Force cancelling...");
                cancel.request_force_cancel();
            }
        }
    });

    runner.run().await?;

    info!("Queue run finished");
    Ok(())
}

/// Setup logging to both console and file
fn setup_logging(verbose: bool) -> Result<()> {
    let app_dir = std::env::current_dir()?.join(".subqueue");
    let log_dir = app_dir.join("log");
    std::fs::create_dir_all(&log_dir)?;

    // File appender with daily rotation; the guard must outlive the program.
    let file_appender = rolling::daily(&log_dir, "subqueue.log");
    let (non_blocking_file, _guard) = non_blocking(file_appender);
    std::mem::forget(_guard);

    let log_level = if verbose { Level::DEBUG } else { Level::INFO };

    let console_layer = fmt::layer()
        .with_target(false)
        .with_file(false)
        .with_line_number(false);

    let file_layer = fmt::layer()
        .with_writer(non_blocking_file)
        .with_target(false)
        .with_thread_ids(true)
        .with_file(true)
        .with_line_number(true)
        .with_ansi(false);

    let subscriber = tracing_subscriber::registry()
        .with(EnvFilter::from_default_env().add_directive(log_level.into()))
        .with(console_layer)
        .with(file_layer);

    subscriber
        .try_init()
        .map_err(|e| anyhow::anyhow!("Failed to initialize logging: {}", e))?;

    Ok(())
}
