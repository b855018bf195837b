// Shell Runner
// Executes step commands through the platform shell

use std::collections::HashMap;
use std::path::Path;
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Command;
use tokio::sync::watch;

/// Configuration for a single command execution
#[derive(Debug, Clone, Default)]
pub struct ShellConfig {
    /// Timeout for the command (None = no timeout)
    pub timeout: Option<Duration>,
}

/// Output collected from a command
#[derive(Debug, Clone, Default)]
pub struct ShellOutput {
    /// Standard output
    pub stdout: String,
    /// Standard error
    pub stderr: String,
    /// Exit code (None if the process was killed or failed to spawn)
    pub exit_code: Option<i32>,
    /// The command exceeded its timeout and was killed
    pub timed_out: bool,
    /// The run was cancelled and the command was killed
    pub cancelled: bool,
}

impl ShellOutput {
    fn spawn_failure(message: String) -> Self {
        Self {
            stderr: message,
            ..Default::default()
        }
    }
}

/// Callback for handling output lines in real time (line, is_stderr)
pub type OutputCallback = Box<dyn Fn(&str, bool) + Send + Sync>;

/// Runs command strings through `sh -c` (or `cmd /C` on Windows)
pub struct ShellRunner;

impl ShellRunner {
    pub fn new() -> Self {
        Self
    }

    fn shell_command() -> (&'static str, &'static [&'static str]) {
        if cfg!(target_os = "windows") {
            ("cmd", &["/C"])
        } else {
            ("sh", &["-c"])
        }
    }

    /// Execute a command string, streaming output lines through the
    /// callback and honoring timeout and cancellation by killing the child.
    pub async fn run_script(
        &self,
        script: &str,
        env: &HashMap<String, String>,
        working_dir: &Path,
        config: &ShellConfig,
        on_output: Option<OutputCallback>,
        cancel: Option<watch::Receiver<bool>>,
    ) -> ShellOutput {
        let (shell_cmd, shell_args) = Self::shell_command();

        let mut cmd = Command::new(shell_cmd);
        cmd.args(shell_args);
        cmd.arg(script);
        cmd.current_dir(working_dir);
        cmd.envs(env);
        cmd.stdout(Stdio::piped());
        cmd.stderr(Stdio::piped());
        cmd.kill_on_drop(true);

        let mut child = match cmd.spawn() {
            Ok(child) => child,
            Err(e) => {
                return ShellOutput::spawn_failure(format!(
                    "Failed to spawn shell process '{}': {}",
                    shell_cmd, e
                ));
            }
        };

        let stdout = child.stdout.take().expect("stdout was piped");
        let stderr = child.stderr.take().expect("stderr was piped");

        let on_output = on_output.map(Arc::new);
        let stdout_cb = on_output.clone();
        let stderr_cb = on_output;

        let stdout_handle = tokio::spawn(async move {
            let mut lines = BufReader::new(stdout).lines();
            let mut output = String::new();
            while let Ok(Some(line)) = lines.next_line().await {
                if let Some(cb) = &stdout_cb {
                    cb(&line, false);
                }
                if !output.is_empty() {
                    output.push('\n');
                }
                output.push_str(&line);
            }
            output
        });

        let stderr_handle = tokio::spawn(async move {
            let mut lines = BufReader::new(stderr).lines();
            let mut output = String::new();
            while let Ok(Some(line)) = lines.next_line().await {
                if let Some(cb) = &stderr_cb {
                    cb(&line, true);
                }
                if !output.is_empty() {
                    output.push('\n');
                }
                output.push_str(&line);
            }
            output
        });

        enum Waited {
            Exited(Option<i32>),
            TimedOut,
            Cancelled,
        }

        let waited = {
            let deadline = async {
                match config.timeout {
                    Some(timeout) => tokio::time::sleep(timeout).await,
                    None => std::future::pending().await,
                }
            };
            tokio::pin!(deadline);

            let cancelled = crate::execution::wait_cancelled(cancel);
            tokio::pin!(cancelled);

            tokio::select! {
                status = child.wait() => Waited::Exited(status.ok().and_then(|s| s.code())),
                _ = &mut deadline => Waited::TimedOut,
                _ = &mut cancelled => Waited::Cancelled,
            }
        };

        // The wait future is dropped by now, so the child can be killed
        if !matches!(waited, Waited::Exited(_)) {
            let _ = child.kill().await;
        }

        let stdout = stdout_handle.await.unwrap_or_default();
        let mut stderr = stderr_handle.await.unwrap_or_default();

        match waited {
            Waited::Exited(exit_code) => ShellOutput {
                stdout,
                stderr,
                exit_code,
                timed_out: false,
                cancelled: false,
            },
            Waited::TimedOut => {
                if !stderr.is_empty() {
                    stderr.push('\n');
                }
                stderr.push_str(&format!(
                    "Process timed out after {:?}",
                    config.timeout.unwrap_or_default()
                ));
                ShellOutput {
                    stdout,
                    stderr,
                    exit_code: None,
                    timed_out: true,
                    cancelled: false,
                }
            }
            Waited::Cancelled => ShellOutput {
                stdout,
                stderr,
                exit_code: None,
                timed_out: false,
                cancelled: true,
            },
        }
    }
}

impl Default for ShellRunner {
    fn default() -> Self {
        Self::new()
    }
}
