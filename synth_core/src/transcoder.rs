use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::process::Command;
use tracing::debug;

/// A structured subprocess invocation: program, arguments, an optional
/// stdin payload, and a hard wall-clock limit.
#[derive(Debug, Clone)]
pub struct TranscoderCommand {
    pub program: PathBuf,
    pub args: Vec<String>,
    pub stdin: Option<Vec<u8>>,
    pub timeout: Duration,
}

/// Captured output of a finished transcoder process.
#[derive(Debug, Clone, Default)]
pub struct TranscoderOutput {
    pub stdout: String,
    pub stderr: String,
}

#[derive(Debug, Clone, Error)]
pub enum TranscoderError {
    #[error("failed to run {program}: {message}")]
    Spawn { program: String, message: String },

    #[error("{status}: {stderr}")]
    NonZeroExit { status: String, stderr: String },

    #[error("timed out after {}s (process killed)", limit.as_secs())]
    TimedOut { limit: Duration },
}

/// External subprocess capability.
///
/// The speech engine and the format converter are both driven through this
/// trait, so tests can substitute a fake without touching the orchestrator.
#[async_trait]
pub trait Transcoder: Send + Sync {
    async fn run(&self, cmd: TranscoderCommand) -> Result<TranscoderOutput, TranscoderError>;
}

/// Real implementation over `tokio::process`.
#[derive(Debug, Default)]
pub struct ProcessTranscoder;

#[async_trait]
impl Transcoder for ProcessTranscoder {
    async fn run(&self, cmd: TranscoderCommand) -> Result<TranscoderOutput, TranscoderError> {
        let program = cmd.program.display().to_string();
        debug!(%program, args = ?cmd.args, "spawning transcoder");

        let mut child = Command::new(&cmd.program)
            .args(&cmd.args)
            .stdin(if cmd.stdin.is_some() {
                Stdio::piped()
            } else {
                Stdio::null()
            })
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| TranscoderError::Spawn {
                program: program.clone(),
                message: e.to_string(),
            })?;

        if let Some(payload) = cmd.stdin {
            if let Some(mut stdin) = child.stdin.take() {
                // A broken pipe here surfaces through the exit status.
                let _ = stdin.write_all(&payload).await;
                let _ = stdin.shutdown().await;
            }
        }

        // Drain both pipes concurrently so the child never blocks on a full
        // pipe while we wait on its exit status.
        let mut stdout_pipe = child.stdout.take();
        let mut stderr_pipe = child.stderr.take();
        let stdout_task = tokio::spawn(async move {
            let mut buf = Vec::new();
            if let Some(pipe) = stdout_pipe.as_mut() {
                let _ = pipe.read_to_end(&mut buf).await;
            }
            buf
        });
        let stderr_task = tokio::spawn(async move {
            let mut buf = Vec::new();
            if let Some(pipe) = stderr_pipe.as_mut() {
                let _ = pipe.read_to_end(&mut buf).await;
            }
            buf
        });

        let status = match tokio::time::timeout(cmd.timeout, child.wait()).await {
            Ok(Ok(status)) => status,
            Ok(Err(e)) => {
                return Err(TranscoderError::Spawn {
                    program,
                    message: e.to_string(),
                })
            }
            Err(_) => {
                let _ = child.start_kill();
                let _ = child.wait().await;
                return Err(TranscoderError::TimedOut { limit: cmd.timeout });
            }
        };

        let stdout = String::from_utf8_lossy(&stdout_task.await.unwrap_or_default()).into_owned();
        let stderr = String::from_utf8_lossy(&stderr_task.await.unwrap_or_default()).into_owned();

        if status.success() {
            Ok(TranscoderOutput { stdout, stderr })
        } else {
            Err(TranscoderError::NonZeroExit {
                status: status.to_string(),
                stderr: stderr.trim().to_string(),
            })
        }
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    /// Counting fake used by pipeline tests. Writes a placeholder artifact
    /// to the command's output path so the pipeline stages chain normally.
    #[derive(Default)]
    pub struct FakeTranscoder {
        pub invocations: AtomicUsize,
        pub fail: AtomicBool,
        pub delay: Option<Duration>,
    }

    impl FakeTranscoder {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn with_delay(delay: Duration) -> Self {
            Self {
                delay: Some(delay),
                ..Self::default()
            }
        }

        pub fn count(&self) -> usize {
            self.invocations.load(Ordering::SeqCst)
        }

        pub fn set_fail(&self, fail: bool) {
            self.fail.store(fail, Ordering::SeqCst);
        }

        fn output_path(cmd: &TranscoderCommand) -> Option<String> {
            cmd.args
                .iter()
                .position(|a| a == "--output_file")
                .map(|i| cmd.args[i + 1].clone())
                .or_else(|| cmd.args.last().cloned())
        }
    }

    #[async_trait]
    impl Transcoder for FakeTranscoder {
        async fn run(&self, cmd: TranscoderCommand) -> Result<TranscoderOutput, TranscoderError> {
            self.invocations.fetch_add(1, Ordering::SeqCst);
            if let Some(delay) = self.delay {
                tokio::time::sleep(delay).await;
            }
            if self.fail.load(Ordering::SeqCst) {
                return Err(TranscoderError::NonZeroExit {
                    status: "exit status: 1".to_string(),
                    stderr: "synthetic failure".to_string(),
                });
            }
            if let Some(out) = Self::output_path(&cmd) {
                std::fs::write(&out, b"RIFF").map_err(|e| TranscoderError::Spawn {
                    program: cmd.program.display().to_string(),
                    message: e.to_string(),
                })?;
            }
            Ok(TranscoderOutput {
                stdout: "fake 1.0.0".to_string(),
                stderr: String::new(),
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_missing_program_is_spawn_error() {
        let result = ProcessTranscoder
            .run(TranscoderCommand {
                program: PathBuf::from("/nonexistent/transcoder-binary"),
                args: vec![],
                stdin: None,
                timeout: Duration::from_secs(1),
            })
            .await;
        assert!(matches!(result, Err(TranscoderError::Spawn { .. })));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_nonzero_exit_captures_stderr() {
        let result = ProcessTranscoder
            .run(TranscoderCommand {
                program: PathBuf::from("/bin/sh"),
                args: vec!["-c".into(), "echo oops >&2; exit 3".into()],
                stdin: None,
                timeout: Duration::from_secs(5),
            })
            .await;
        match result {
            Err(TranscoderError::NonZeroExit { stderr, .. }) => assert_eq!(stderr, "oops"),
            other => panic!("expected NonZeroExit, got {other:?}"),
        }
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_timeout_kills_process() {
        let start = std::time::Instant::now();
        let result = ProcessTranscoder
            .run(TranscoderCommand {
                program: PathBuf::from("/bin/sh"),
                args: vec!["-c".into(), "sleep 30".into()],
                stdin: None,
                timeout: Duration::from_millis(100),
            })
            .await;
        assert!(matches!(result, Err(TranscoderError::TimedOut { .. })));
        assert!(start.elapsed() < Duration::from_secs(10));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_stdin_payload_reaches_process() {
        let result = ProcessTranscoder
            .run(TranscoderCommand {
                program: PathBuf::from("/bin/cat"),
                args: vec![],
                stdin: Some(b"hello engine".to_vec()),
                timeout: Duration::from_secs(5),
            })
            .await
            .unwrap();
        assert_eq!(result.stdout, "hello engine");
    }
}
