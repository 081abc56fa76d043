//! Shell command execution with captured, line-split output.

use async_trait::async_trait;
use std::path::Path;
use std::process::{ExitStatus, Stdio};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Command;
use tracing::{debug, trace};

use crate::error::RunnerError;

/// What a finished command printed and how it exited.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandOutput {
    /// stdout and stderr interleaved in emission order, one entry per line.
    pub stdout: Vec<String>,
    pub exit_code: i32,
}

impl CommandOutput {
    pub fn is_success(&self) -> bool {
        self.exit_code == 0
    }
}

#[async_trait]
pub trait CommandRunner: Send + Sync {
    /// Run `command` with `working_dir` as its current directory.
    ///
    /// A non-zero exit code is reported in the output. `Err` means the
    /// process could not be started or its output could not be read.
    async fn execute(&self, working_dir: &Path, command: &str)
        -> Result<CommandOutput, RunnerError>;
}

/// Runs commands through the platform shell.
#[derive(Debug, Clone)]
pub struct ShellRunner {
    shell: String,
}

impl ShellRunner {
    pub fn new() -> Self {
        #[cfg(unix)]
        let shell = "sh".to_string();
        #[cfg(windows)]
        let shell = "cmd".to_string();
        Self { shell }
    }

    pub fn with_shell(mut self, shell: impl Into<String>) -> Self {
        self.shell = shell.into();
        self
    }

    fn command(&self, script: &str) -> Command {
        let mut cmd = Command::new(&self.shell);
        // stderr is merged at the shell level so both streams keep their
        // relative order in the captured output.
        #[cfg(unix)]
        cmd.arg("-c").arg(format!("exec 2>&1\n{}", script));
        #[cfg(windows)]
        cmd.arg("/C").arg(format!("({}) 2>&1", script));
        cmd
    }
}

impl Default for ShellRunner {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl CommandRunner for ShellRunner {
    async fn execute(
        &self,
        working_dir: &Path,
        command: &str,
    ) -> Result<CommandOutput, RunnerError> {
        debug!(dir = %working_dir.display(), command, "Running command");

        if !working_dir.is_dir() {
            return Err(RunnerError::MissingDirectory(
                working_dir.display().to_string(),
            ));
        }

        let mut child = self
            .command(command)
            .current_dir(working_dir)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .spawn()
            .map_err(|source| RunnerError::Spawn {
                command: command.to_string(),
                dir: working_dir.display().to_string(),
                source,
            })?;

        let io_err = |source: std::io::Error| RunnerError::Io {
            command: command.to_string(),
            source,
        };

        let mut stdout = Vec::new();
        if let Some(pipe) = child.stdout.take() {
            let mut reader = BufReader::new(pipe);
            let mut buf = Vec::new();
            loop {
                buf.clear();
                let read = reader.read_until(b'\n', &mut buf).await.map_err(io_err)?;
                if read == 0 {
                    break;
                }
                let line = String::from_utf8_lossy(&buf)
                    .trim_end_matches(['\n', '\r'])
                    .to_string();
                trace!(command, line = %line, "output");
                stdout.push(line);
            }
        }

        let status = child.wait().await.map_err(io_err)?;
        let exit_code = exit_code(status);
        debug!(command, exit_code, lines = stdout.len(), "Command finished");

        Ok(CommandOutput { stdout, exit_code })
    }
}

#[cfg(unix)]
fn exit_code(status: ExitStatus) -> i32 {
    use std::os::unix::process::ExitStatusExt;
    status
        .code()
        .or_else(|| status.signal().map(|signal| 128 + signal))
        .unwrap_or(-1)
}

#[cfg(not(unix))]
fn exit_code(status: ExitStatus) -> i32 {
    status.code().unwrap_or(-1)
}

/// Quote a single argument for `sh`.
pub fn shell_quote(arg: &str) -> String {
    let safe = !arg.is_empty()
        && arg
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || "-_./:@=+,".contains(c));
    if safe {
        arg.to_string()
    } else {
        format!("'{}'", arg.replace('\'', r"'\''"))
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_captures_stdout_lines() {
        let dir = TempDir::new().unwrap();
        let output = ShellRunner::new()
            .execute(dir.path(), "echo one; echo two")
            .await
            .unwrap();

        assert!(output.is_success());
        assert_eq!(output.stdout, vec!["one", "two"]);
    }

    #[tokio::test]
    async fn test_interleaves_stderr_in_order() {
        let dir = TempDir::new().unwrap();
        let output = ShellRunner::new()
            .execute(dir.path(), "echo out1; echo err1 >&2; echo out2")
            .await
            .unwrap();

        assert_eq!(output.stdout, vec!["out1", "err1", "out2"]);
    }

    #[tokio::test]
    async fn test_non_zero_exit_is_data() {
        let dir = TempDir::new().unwrap();
        let output = ShellRunner::new()
            .execute(dir.path(), "ls -al not_a_file")
            .await
            .unwrap();

        assert!(!output.is_success());
        assert_ne!(output.exit_code, 0);
    }

    #[tokio::test]
    async fn test_runs_in_working_dir() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("file"), "my file").unwrap();

        let output = ShellRunner::new()
            .execute(dir.path(), "cat file")
            .await
            .unwrap();
        assert_eq!(output.stdout, vec!["my file"]);
    }

    #[tokio::test]
    async fn test_missing_directory_is_error() {
        let dir = TempDir::new().unwrap();
        let missing = dir.path().join("nope");

        let result = ShellRunner::new().execute(&missing, "true").await;
        assert!(matches!(result, Err(RunnerError::MissingDirectory(_))));
    }

    #[tokio::test]
    async fn test_missing_shell_is_spawn_error() {
        let dir = TempDir::new().unwrap();
        let result = ShellRunner::new()
            .with_shell("/definitely/not/a/shell")
            .execute(dir.path(), "true")
            .await;
        assert!(matches!(result, Err(RunnerError::Spawn { .. })));
    }

    #[tokio::test]
    async fn test_signal_exit_code() {
        let dir = TempDir::new().unwrap();
        let output = ShellRunner::new()
            .execute(dir.path(), "kill -9 $$")
            .await
            .unwrap();
        assert_eq!(output.exit_code, 128 + 9);
    }

    #[test]
    fn test_shell_quote() {
        assert_eq!(shell_quote("master"), "master");
        assert_eq!(shell_quote("test/files/repo"), "test/files/repo");
        assert_eq!(shell_quote("my repo"), "'my repo'");
        assert_eq!(shell_quote("it's"), r"'it'\''s'");
        assert_eq!(shell_quote(""), "''");
    }
}
