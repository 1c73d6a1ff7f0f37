//! Runs gated commands and turns process outcomes into [`ToolResult`]s.

use std::process::Command;
use std::time::Duration;

use anyhow::Result;
use tracing::{info, instrument, warn};

use crate::core::command::ParsedCommand;
use crate::core::types::ToolResult;
use crate::io::process::run_command_with_timeout;

/// Returned in place of empty stdout so the model always sees some text.
pub const NO_OUTPUT: &str = "Command executed successfully (no output)";

/// Outcome of one external process.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ProcessOutput {
    /// `None` when the process was killed by a signal.
    pub exit_code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
    pub timed_out: bool,
}

impl ProcessOutput {
    pub fn success(stdout: impl Into<String>) -> Self {
        Self {
            exit_code: Some(0),
            stdout: stdout.into(),
            ..Self::default()
        }
    }

    pub fn failure(exit_code: i32, stderr: impl Into<String>) -> Self {
        Self {
            exit_code: Some(exit_code),
            stderr: stderr.into(),
            ..Self::default()
        }
    }
}

/// Abstraction over process execution.
pub trait CommandRunner {
    /// Run a full command line. `Err` means the process could not be started.
    fn run(&self, command_line: &str) -> Result<ProcessOutput>;

    /// Timeout applied by this runner, for error messages.
    fn timeout(&self) -> Duration;
}

impl<R: CommandRunner + ?Sized> CommandRunner for &R {
    fn run(&self, command_line: &str) -> Result<ProcessOutput> {
        (**self).run(command_line)
    }

    fn timeout(&self) -> Duration {
        (**self).timeout()
    }
}

/// Runs command lines through `sh -c` with a hard timeout.
#[derive(Debug, Clone)]
pub struct ShellRunner {
    timeout: Duration,
    output_limit_bytes: usize,
}

impl ShellRunner {
    pub fn new(timeout: Duration, output_limit_bytes: usize) -> Self {
        Self {
            timeout,
            output_limit_bytes,
        }
    }
}

impl CommandRunner for ShellRunner {
    #[instrument(skip_all, fields(timeout_secs = self.timeout.as_secs()))]
    fn run(&self, command_line: &str) -> Result<ProcessOutput> {
        let mut cmd = Command::new("sh");
        cmd.arg("-c").arg(command_line);
        let output = run_command_with_timeout(cmd, None, self.timeout, self.output_limit_bytes)?;
        Ok(ProcessOutput {
            exit_code: output.status.code(),
            stdout: output.stdout_text(),
            stderr: output.stderr_text(),
            timed_out: output.timed_out,
        })
    }

    fn timeout(&self) -> Duration {
        self.timeout
    }
}

/// Execute an already-gated command. Never retries.
pub fn invoke<R: CommandRunner>(runner: &R, command: &ParsedCommand) -> ToolResult {
    let line = command.command_line();
    info!(target: "cloudpilot::audit", command = %line, "executing command");
    run_line(runner, &line)
}

/// Run a line and map the outcome. Shared with help lookups, which bypass the gate.
pub(crate) fn run_line<R: CommandRunner>(runner: &R, line: &str) -> ToolResult {
    let output = match runner.run(line) {
        Ok(output) => output,
        Err(err) => {
            warn!(command = %line, err = %format!("{err:#}"), "command failed to start");
            return ToolResult::error(format!("{err:#}"));
        }
    };

    if output.timed_out {
        warn!(command = %line, "command timed out");
        return ToolResult::error(format!(
            "command timed out after {}s",
            runner.timeout().as_secs()
        ));
    }

    match output.exit_code {
        Some(0) => {
            if output.stdout.trim().is_empty() {
                ToolResult::success(NO_OUTPUT)
            } else {
                ToolResult::success(output.stdout)
            }
        }
        code => {
            let stderr = output.stderr.trim();
            if stderr.is_empty() {
                let status = code.map_or_else(|| "signal".to_string(), |c| c.to_string());
                ToolResult::error(format!("command exited with status {status}"))
            } else {
                ToolResult::error(stderr.to_string())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::command::parse_command;
    use crate::test_support::ScriptedRunner;

    fn gcloud(raw: &str) -> ParsedCommand {
        parse_command(raw, "gcloud").expect("parse")
    }

    #[test]
    fn stdout_is_returned_on_success() {
        let runner = ScriptedRunner::new().respond(ProcessOutput::success("vm-1\nvm-2\n"));
        let result = invoke(&runner, &gcloud("gcloud compute instances list"));
        assert_eq!(result, ToolResult::success("vm-1\nvm-2\n"));
        assert_eq!(runner.calls(), vec!["gcloud compute instances list"]);
    }

    #[test]
    fn empty_stdout_yields_sentinel() {
        let runner = ScriptedRunner::new().respond(ProcessOutput::success("  \n"));
        let result = invoke(&runner, &gcloud("gcloud config set project demo"));
        assert_eq!(result, ToolResult::success(NO_OUTPUT));
        assert!(!result.render().is_empty());
    }

    #[test]
    fn failing_command_reports_stderr() {
        let runner =
            ScriptedRunner::new().respond(ProcessOutput::failure(1, "ERROR: permission denied\n"));
        let result = invoke(&runner, &gcloud("gcloud projects list"));
        assert_eq!(result, ToolResult::error("ERROR: permission denied"));
    }

    #[test]
    fn failing_command_without_stderr_reports_status() {
        let runner = ScriptedRunner::new().respond(ProcessOutput::failure(2, ""));
        let result = invoke(&runner, &gcloud("gcloud projects list"));
        assert_eq!(result, ToolResult::error("command exited with status 2"));
    }

    #[test]
    fn timeout_is_an_execution_error() {
        let runner = ScriptedRunner::new().respond(ProcessOutput {
            timed_out: true,
            ..ProcessOutput::default()
        });
        let result = invoke(&runner, &gcloud("gcloud compute instances list"));
        assert!(matches!(
            result,
            ToolResult::ExecutionError { message } if message.contains("timed out after")
        ));
    }

    #[test]
    fn spawn_failure_is_an_execution_error() {
        let runner = ScriptedRunner::new().fail_with("No such file or directory");
        let result = invoke(&runner, &gcloud("gcloud compute instances list"));
        assert!(matches!(
            result,
            ToolResult::ExecutionError { message } if message.contains("No such file")
        ));
    }

    #[cfg(unix)]
    #[test]
    fn shell_runner_runs_real_commands() {
        let runner = ShellRunner::new(Duration::from_secs(5), 1024);
        let output = runner.run("echo hello").expect("run");
        assert_eq!(output.exit_code, Some(0));
        assert_eq!(output.stdout, "hello\n");
    }
}
