//! Command executor - runs a job step's shell command
//!
//! Command text goes to `sh -c` untouched, so the full shell language is
//! available to job documents (pipes, redirects, variable expansion). When a
//! step names a `runAsUser`, the shell is started through `sudo -u <user>`.

use async_trait::async_trait;
use std::process::Stdio;
use thiserror::Error;
use tokio::process::Command;

#[derive(Error, Debug)]
pub enum ExecError {
    #[error("failed to start {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    /// Process ran and exited unsuccessfully; `output` is stdout followed by stderr
    #[error("{status}: {output}")]
    Exit { status: String, output: String },
}

impl ExecError {
    /// Captured output of the failed process, empty if it never started
    pub fn output(&self) -> &str {
        match self {
            ExecError::Spawn { .. } => "",
            ExecError::Exit { output, .. } => output,
        }
    }
}

/// Runs one resolved command, blocking the caller until it exits
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait CommandRunner: Send + Sync {
    /// Run `command`, as `run_as_user` when non-empty, returning combined output
    async fn run(&self, command: &str, run_as_user: &str) -> Result<String, ExecError>;
}

/// Runs commands through the system shell
#[derive(Debug, Clone)]
pub struct ShellCommandRunner {
    shell: String,
    elevate: String,
}

impl Default for ShellCommandRunner {
    fn default() -> Self {
        Self {
            shell: "sh".into(),
            elevate: "sudo".into(),
        }
    }
}

impl ShellCommandRunner {
    pub fn new() -> Self {
        Self::default()
    }

    fn build_command(&self, command: &str, run_as_user: &str) -> Command {
        let mut cmd = if run_as_user.is_empty() {
            Command::new(&self.shell)
        } else {
            let mut cmd = Command::new(&self.elevate);
            cmd.args(["-u", run_as_user, self.shell.as_str()]);
            cmd
        };

        cmd.arg("-c")
            .arg(command)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        cmd
    }
}

#[async_trait]
impl CommandRunner for ShellCommandRunner {
    async fn run(&self, command: &str, run_as_user: &str) -> Result<String, ExecError> {
        let mut cmd = self.build_command(command, run_as_user);

        let result = cmd.output().await;
        let output = result.map_err(|source| ExecError::Spawn {
            program: cmd.as_std().get_program().to_string_lossy().into_owned(),
            source,
        })?;

        let mut combined = String::from_utf8_lossy(&output.stdout).into_owned();
        combined.push_str(&String::from_utf8_lossy(&output.stderr));

        if output.status.success() {
            Ok(combined)
        } else {
            let status = match output.status.code() {
                Some(code) => format!("exit status {}", code),
                // killed by a signal
                None => output.status.to_string(),
            };
            Err(ExecError::Exit {
                status,
                output: combined,
            })
        }
    }
}
