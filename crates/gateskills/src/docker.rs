use async_trait::async_trait;
use gatecore::config::DockerConfig;
use gatecore::{CommandError, CommandOutput, ContainerRunner};
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;

/// Runs host commands (docker, git) as child processes with a hard timeout
pub struct DockerCli {
    timeout: Duration,
}

impl DockerCli {
    pub fn new(config: &DockerConfig) -> Self {
        Self {
            timeout: config.command_timeout,
        }
    }
}

#[async_trait]
impl ContainerRunner for DockerCli {
    async fn run(&self, program: &str, args: &[String]) -> Result<CommandOutput, CommandError> {
        tracing::debug!(program, ?args, "running command");

        let mut cmd = Command::new(program);
        cmd.args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let child = cmd.spawn().map_err(|e| CommandError::Spawn {
            program: program.to_string(),
            message: e.to_string(),
        })?;

        // Dropping the child on timeout kills it
        let output = match tokio::time::timeout(self.timeout, child.wait_with_output()).await {
            Ok(result) => result.map_err(|e| CommandError::Io {
                program: program.to_string(),
                message: e.to_string(),
            })?,
            Err(_) => {
                tracing::warn!(program, seconds = self.timeout.as_secs(), "command timed out");
                return Err(CommandError::Timeout {
                    program: program.to_string(),
                    seconds: self.timeout.as_secs(),
                });
            }
        };

        let result = CommandOutput {
            // Killed by a signal: no exit code
            exit_code: output.status.code().unwrap_or(-1),
            stdout: String::from_utf8_lossy(&output.stdout).to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).to_string(),
        };
        if !result.success() {
            tracing::warn!(program, exit_code = result.exit_code, "command exited non-zero");
        }
        Ok(result)
    }
}
