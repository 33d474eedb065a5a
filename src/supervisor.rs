//! Subprocess supervision for the translation engine.
//!
//! One engine process runs at a time. Its stdout and stderr are drained by
//! two background reader tasks into a single channel; the supervising loop
//! polls that channel with a short timeout while also checking process
//! liveness and the force-cancel flag, so cancellation latency stays within
//! roughly one poll interval.

use async_trait::async_trait;
use std::collections::VecDeque;
use std::process::Stdio;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::engine::{parse_event, EngineCommand, EngineEvent};
use crate::error::{Result, SubqueueError};

const POLL_TIMEOUT: Duration = Duration::from_millis(100);
const EXIT_GRACE: Duration = Duration::from_secs(5);
const STDERR_TAIL_LINES: usize = 10;

/// How the engine process ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessOutcome {
    /// Normal exit with the given code.
    Exited(i32),
    /// Terminated because cancellation was requested.
    Cancelled,
}

/// Result of one supervised engine run.
#[derive(Debug)]
pub struct EngineRun {
    pub outcome: ProcessOutcome,
    /// Whether the completion marker was observed on stdout.
    pub completed: bool,
    /// Trimmed tail of stderr, for user-visible failure messages.
    pub stderr_tail: String,
}

impl EngineRun {
    /// Success for one attempt: clean exit and the completion marker.
    pub fn succeeded(&self) -> bool {
        self.outcome == ProcessOutcome::Exited(0) && self.completed
    }
}

/// Seam between the worker and the subprocess machinery.
#[async_trait]
pub trait EngineRunner: Send + Sync {
    async fn run(
        &self,
        command: EngineCommand,
        events: mpsc::UnboundedSender<EngineEvent>,
    ) -> Result<EngineRun>;
}

enum StreamLine {
    Out(String),
    Err(String),
}

pub struct Supervisor {
    cancel: Arc<AtomicBool>,
}

impl Supervisor {
    pub fn new(cancel: Arc<AtomicBool>) -> Self {
        Self { cancel }
    }

    fn spawn_child(&self, command: &EngineCommand) -> Result<Child> {
        let mut cmd = Command::new(&command.binary_path);
        cmd.args(&command.args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        if let Some(dir) = &command.current_dir {
            cmd.current_dir(dir);
        }

        #[cfg(unix)]
        cmd.process_group(0);

        cmd.spawn().map_err(|e| {
            SubqueueError::Engine(format!(
                "{}: failed to launch engine '{}': {}",
                command.description, command.binary_path, e
            ))
        })
    }
}

fn spawn_reader<R>(
    stream: R,
    tx: mpsc::UnboundedSender<StreamLine>,
    wrap: fn(String) -> StreamLine,
) where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut lines = BufReader::new(stream).lines();
        while let Ok(Some(line)) = lines.next_line().await {
            if tx.send(wrap(line)).is_err() {
                break;
            }
        }
    });
}

/// Platform-appropriate interrupt: signal the whole process tree so the
/// engine's own children go down with it.
fn send_interrupt(child: &Child) {
    let pid = match child.id() {
        Some(pid) => pid,
        None => return,
    };

    #[cfg(unix)]
    {
        let _ = std::process::Command::new("kill")
            .args(["-TERM", "--", &format!("-{}", pid)])
            .status();
    }

    #[cfg(windows)]
    {
        let _ = std::process::Command::new("taskkill")
            .args(["/F", "/T", "/PID", &pid.to_string()])
            .status();
    }
}

#[async_trait]
impl EngineRunner for Supervisor {
    async fn run(
        &self,
        command: EngineCommand,
        events: mpsc::UnboundedSender<EngineEvent>,
    ) -> Result<EngineRun> {
        debug!(
            "Running engine: {} {:?} ({})",
            command.binary_path, command.args, command.description
        );

        let mut child = self.spawn_child(&command)?;

        let (tx, mut rx) = mpsc::unbounded_channel();
        if let Some(stdout) = child.stdout.take() {
            spawn_reader(stdout, tx.clone(), StreamLine::Out);
        }
        if let Some(stderr) = child.stderr.take() {
            spawn_reader(stderr, tx.clone(), StreamLine::Err);
        }
        drop(tx);

        let mut completed = false;
        let mut stderr_tail: VecDeque<String> = VecDeque::new();
        let mut interrupted = false;

        let mut handle_line = |line: StreamLine, completed: &mut bool, tail: &mut VecDeque<String>| {
            match line {
                StreamLine::Out(text) => {
                    if let Some(event) = parse_event(&text) {
                        if event == EngineEvent::Completed {
                            *completed = true;
                        }
                        let _ = events.send(event);
                    } else if !text.trim().is_empty() {
                        debug!("engine: {}", text);
                    }
                }
                StreamLine::Err(text) => {
                    debug!("engine stderr: {}", text);
                    let trimmed = text.trim();
                    if !trimmed.is_empty() {
                        if tail.len() == STDERR_TAIL_LINES {
                            tail.pop_front();
                        }
                        tail.push_back(trimmed.to_string());
                    }
                }
            }
        };

        let mut streams_open = true;
        let status = loop {
            if self.cancel.load(Ordering::Relaxed) && !interrupted {
                send_interrupt(&child);
                interrupted = true;
            }

            if streams_open {
                match tokio::time::timeout(POLL_TIMEOUT, rx.recv()).await {
                    Ok(Some(line)) => {
                        handle_line(line, &mut completed, &mut stderr_tail);
                        continue;
                    }
                    Ok(None) => streams_open = false,
                    Err(_) => {}
                }
            }

            if interrupted {
                // After an interrupt the wait is bounded, escalating to a
                // hard kill if the engine ignores the signal.
                break match tokio::time::timeout(EXIT_GRACE, child.wait()).await {
                    Ok(status) => status?,
                    Err(_) => {
                        child.kill().await?;
                        child.wait().await?
                    }
                };
            }

            // Without cancellation an attempt has no timeout: keep polling
            // liveness until the engine exits on its own.
            match child.try_wait() {
                Ok(Some(status)) => break status,
                Ok(None) => {
                    if !streams_open {
                        tokio::time::sleep(POLL_TIMEOUT).await;
                    }
                }
                Err(e) => {
                    warn!("Failed to poll engine process: {}", e);
                    break child.wait().await?;
                }
            }
        };

        // Drain whatever the readers buffered before shutdown; the wait per
        // line is bounded in case a stray grandchild keeps a pipe open.
        loop {
            match tokio::time::timeout(POLL_TIMEOUT, rx.recv()).await {
                Ok(Some(line)) => handle_line(line, &mut completed, &mut stderr_tail),
                Ok(None) | Err(_) => break,
            }
        }

        let outcome = if self.cancel.load(Ordering::Relaxed) {
            ProcessOutcome::Cancelled
        } else {
            ProcessOutcome::Exited(status.code().unwrap_or(-1))
        };

        debug!(
            "Engine finished: {:?}, completed marker: {}",
            outcome, completed
        );

        Ok(EngineRun {
            outcome,
            completed,
            stderr_tail: stderr_tail.into_iter().collect::<Vec<_>>().join("\n"),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::EngineCommandBuilder;

    fn run_command(program: &str, args: &[&str]) -> EngineCommand {
        let mut cmd = EngineCommand::new(program, "test");
        for arg in args {
            cmd = cmd.arg(*arg);
        }
        cmd
    }

    #[tokio::test]
    #[cfg(unix)]
    async fn test_clean_exit_with_completion_marker() {
        let supervisor = Supervisor::new(Arc::new(AtomicBool::new(false)));
        let (tx, mut rx) = mpsc::unbounded_channel();

        let cmd = run_command(
            "sh",
            &["-c", r#"echo '{"event":"progress","percent":50,"detail":"half"}'; echo '{"event":"completed"}'"#],
        );

        let run = supervisor.run(cmd, tx).await.unwrap();
        assert!(run.succeeded());
        assert_eq!(run.outcome, ProcessOutcome::Exited(0));

        let first = rx.recv().await.unwrap();
        assert!(matches!(first, EngineEvent::Progress { percent: 50, .. }));
        assert_eq!(rx.recv().await.unwrap(), EngineEvent::Completed);
    }

    #[tokio::test]
    #[cfg(unix)]
    async fn test_clean_exit_without_marker_is_not_success() {
        let supervisor = Supervisor::new(Arc::new(AtomicBool::new(false)));
        let (tx, _rx) = mpsc::unbounded_channel();

        let cmd = run_command("sh", &["-c", "echo done; exit 0"]);
        let run = supervisor.run(cmd, tx).await.unwrap();

        assert_eq!(run.outcome, ProcessOutcome::Exited(0));
        assert!(!run.completed);
        assert!(!run.succeeded());
    }

    #[tokio::test]
    #[cfg(unix)]
    async fn test_nonzero_exit_keeps_stderr_tail() {
        let supervisor = Supervisor::new(Arc::new(AtomicBool::new(false)));
        let (tx, _rx) = mpsc::unbounded_channel();

        let cmd = run_command("sh", &["-c", "echo 'quota exhausted' >&2; exit 3"]);
        let run = supervisor.run(cmd, tx).await.unwrap();

        assert_eq!(run.outcome, ProcessOutcome::Exited(3));
        assert!(run.stderr_tail.contains("quota exhausted"));
    }

    #[tokio::test]
    #[cfg(unix)]
    async fn test_cancellation_terminates_subprocess() {
        let cancel = Arc::new(AtomicBool::new(false));
        let supervisor = Supervisor::new(cancel.clone());
        let (tx, _rx) = mpsc::unbounded_channel();

        let cmd = run_command("sleep", &["30"]);
        let flag = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(300)).await;
            flag.store(true, Ordering::Relaxed);
        });

        let start = std::time::Instant::now();
        let run = supervisor.run(cmd, tx).await.unwrap();

        assert_eq!(run.outcome, ProcessOutcome::Cancelled);
        assert!(start.elapsed() < Duration::from_secs(10));
    }

    #[tokio::test]
    async fn test_missing_binary_is_an_engine_error() {
        let supervisor = Supervisor::new(Arc::new(AtomicBool::new(false)));
        let (tx, _rx) = mpsc::unbounded_channel();

        let cmd = EngineCommandBuilder::new("/nonexistent/srt-engine").translate();
        let result = supervisor.run(cmd, tx).await;
        assert!(matches!(result, Err(SubqueueError::Engine(_))));
    }
}
