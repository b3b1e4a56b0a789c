//! Remote execution adapter.
//!
//! Binds run options (user, key file, passwords, privilege escalation) and
//! a named task to one blocking SSH execution per host, returning a
//! per-host result bag. Failures are classified into three kinds: the ssh
//! process could not be driven at all (engine failure), the target did not
//! accept the connection (unreachable), or the remote command exited
//! non-zero (task failed).

use async_trait::async_trait;
use std::collections::HashMap;
use std::process::Stdio;
use thiserror::Error;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info};

use crate::types::UpgradeRequest;

/// ssh(1) reserves exit status 255 for its own (connection) errors; any
/// other non-zero status comes from the remote command.
const SSH_TRANSPORT_FAILURE: i32 = 255;

const CONNECT_TIMEOUT_SECONDS: u32 = 30;

/// Remote package whose presence the bootstrap stage guarantees before
/// the system upgrade runs.
const BOOTSTRAP_PACKAGE: &str = "requests";

#[derive(Error, Debug)]
pub enum ExecError {
    #[error("execution engine failure: {0}")]
    Engine(String),

    #[error("target {host} unreachable: {detail}")]
    Unreachable { host: String, detail: String },

    #[error("task '{task}' failed with exit code {exit_code}: {stderr}")]
    TaskFailed {
        task: String,
        exit_code: i32,
        stderr: String,
    },

    #[error("no result recorded for host {0}")]
    MissingHost(String),
}

/// A named remote task: one shell command, optionally run as root.
#[derive(Debug, Clone)]
pub struct RemoteTask {
    pub name: &'static str,
    pub command: String,
    pub become_root: bool,
}

/// Ensure the bootstrap package is at its latest version on the target.
pub fn bootstrap_task() -> RemoteTask {
    RemoteTask {
        name: "bootstrap",
        command: format!("pip install --upgrade {}", BOOTSTRAP_PACKAGE),
        become_root: true,
    }
}

/// Full OS package upgrade. Success/failure is binary; no partial
/// completion signal is consumed.
pub fn system_upgrade_task() -> RemoteTask {
    RemoteTask {
        name: "system-upgrade",
        command: "if command -v apt-get >/dev/null 2>&1; then \
                  apt-get -y -q update && \
                  DEBIAN_FRONTEND=noninteractive apt-get -y -q dist-upgrade; \
                  elif command -v yum >/dev/null 2>&1; then \
                  yum -y -q update; \
                  else echo 'no supported package manager found' >&2; exit 1; fi"
            .to_string(),
        become_root: true,
    }
}

/// Captured output of one remote command.
#[derive(Debug, Clone)]
pub struct CommandOutput {
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
}

/// Results of one task run, keyed by host.
#[derive(Debug, Default)]
pub struct ResultBag {
    outputs: HashMap<String, CommandOutput>,
}

impl ResultBag {
    pub fn insert(&mut self, host: String, output: CommandOutput) {
        self.outputs.insert(host, output);
    }

    /// Explicit lookup that fails loudly when the host entry is absent.
    pub fn output(&self, host: &str) -> Result<&CommandOutput, ExecError> {
        self.outputs
            .get(host)
            .ok_or_else(|| ExecError::MissingHost(host.to_string()))
    }
}

/// Seam between the pipeline and the SSH transport.
#[async_trait]
pub trait RemoteExecutor: Send + Sync {
    /// Run one task against every host in order, blocking until each
    /// completes. Stops at the first failing host. No retries.
    async fn run(&self, hosts: &[String], task: &RemoteTask) -> Result<ResultBag, ExecError>;
}

/// Production executor shelling out to the system ssh binary.
pub struct SshExecutor {
    user: String,
    key_path: Option<String>,
    ssh_password: Option<String>,
    sudo_password: Option<String>,
}

impl SshExecutor {
    pub fn new(request: &UpgradeRequest) -> Self {
        Self {
            user: request.user.clone(),
            key_path: request.key_path.clone(),
            ssh_password: request.ssh_password.clone(),
            sudo_password: request.sudo_password.clone(),
        }
    }

    /// The command string executed on the remote side, with privilege
    /// escalation applied. `sudo -S` reads the password from stdin when
    /// one was supplied; `sudo -n` fails fast instead of prompting when
    /// none was.
    fn remote_command(&self, task: &RemoteTask) -> String {
        if !task.become_root {
            return task.command.clone();
        }
        let quoted = shell_quote(&task.command);
        if self.sudo_password.is_some() {
            format!("sudo -S -p '' sh -c {}", quoted)
        } else {
            format!("sudo -n sh -c {}", quoted)
        }
    }

    /// Program and argument vector for one host. Password authentication
    /// goes through sshpass with the password in the SSHPASS environment
    /// variable, never on the argument vector.
    fn command_line(&self, host: &str, task: &RemoteTask) -> (String, Vec<String>) {
        let mut args: Vec<String> = Vec::new();

        let program = if self.ssh_password.is_some() {
            args.push("-e".to_string());
            args.push("ssh".to_string());
            "sshpass".to_string()
        } else {
            "ssh".to_string()
        };

        if self.ssh_password.is_none() {
            args.push("-o".to_string());
            args.push("BatchMode=yes".to_string());
        }
        args.push("-o".to_string());
        args.push("StrictHostKeyChecking=accept-new".to_string());
        args.push("-o".to_string());
        args.push(format!("ConnectTimeout={}", CONNECT_TIMEOUT_SECONDS));

        if let Some(key) = &self.key_path {
            args.push("-i".to_string());
            args.push(key.clone());
        }

        args.push(format!("{}@{}", self.user, host));
        args.push(self.remote_command(task));

        (program, args)
    }

    async fn run_one(&self, host: &str, task: &RemoteTask) -> Result<CommandOutput, ExecError> {
        let (program, args) = self.command_line(host, task);

        debug!(
            host = %host,
            task = task.name,
            program = %program,
            "Executing remote task over SSH"
        );

        let feed_sudo_password = task.become_root && self.sudo_password.is_some();

        let mut command = tokio::process::Command::new(&program);
        command
            .args(&args)
            .stdin(if feed_sudo_password {
                Stdio::piped()
            } else {
                Stdio::null()
            })
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());

        if let Some(password) = &self.ssh_password {
            command.env("SSHPASS", password);
        }

        let mut child = command
            .spawn()
            .map_err(|e| ExecError::Engine(format!("failed to spawn {}: {}", program, e)))?;

        if feed_sudo_password {
            if let (Some(mut stdin), Some(password)) = (child.stdin.take(), &self.sudo_password) {
                stdin
                    .write_all(format!("{}\n", password).as_bytes())
                    .await
                    .map_err(|e| ExecError::Engine(format!("failed to feed sudo password: {}", e)))?;
            }
        }

        let output = child
            .wait_with_output()
            .await
            .map_err(|e| ExecError::Engine(format!("failed to collect ssh output: {}", e)))?;

        let captured = CommandOutput {
            exit_code: output.status.code().unwrap_or(-1),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        };

        classify_output(host, task, captured)
    }
}

/// Sorts one finished execution into success, transport failure or remote
/// task failure.
fn classify_output(
    host: &str,
    task: &RemoteTask,
    output: CommandOutput,
) -> Result<CommandOutput, ExecError> {
    match output.exit_code {
        0 => Ok(output),
        SSH_TRANSPORT_FAILURE => Err(ExecError::Unreachable {
            host: host.to_string(),
            detail: output.stderr.trim().to_string(),
        }),
        code => Err(ExecError::TaskFailed {
            task: task.name.to_string(),
            exit_code: code,
            stderr: output.stderr.trim().to_string(),
        }),
    }
}

/// POSIX single-quote escaping for embedding a command under `sh -c`.
fn shell_quote(command: &str) -> String {
    format!("'{}'", command.replace('\'', r"'\''"))
}

#[async_trait]
impl RemoteExecutor for SshExecutor {
    async fn run(&self, hosts: &[String], task: &RemoteTask) -> Result<ResultBag, ExecError> {
        let mut bag = ResultBag::default();
        for host in hosts {
            let output = self.run_one(host, task).await?;
            info!(
                host = %host,
                task = task.name,
                exit_code = output.exit_code,
                "Remote task completed"
            );
            bag.insert(host.clone(), output);
        }
        Ok(bag)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn executor(
        key_path: Option<&str>,
        ssh_password: Option<&str>,
        sudo_password: Option<&str>,
    ) -> SshExecutor {
        SshExecutor {
            user: "admin".to_string(),
            key_path: key_path.map(|s| s.to_string()),
            ssh_password: ssh_password.map(|s| s.to_string()),
            sudo_password: sudo_password.map(|s| s.to_string()),
        }
    }

    fn plain_task() -> RemoteTask {
        RemoteTask {
            name: "probe",
            command: "uname -a".to_string(),
            become_root: false,
        }
    }

    #[test]
    fn test_command_line_key_auth() {
        let exec = executor(Some("/keys/upgrade.pem"), None, None);
        let (program, args) = exec.command_line("203.0.113.7", &plain_task());

        assert_eq!(program, "ssh");
        assert!(args.contains(&"BatchMode=yes".to_string()));
        assert!(args.contains(&"-i".to_string()));
        assert!(args.contains(&"/keys/upgrade.pem".to_string()));
        assert!(args.contains(&"admin@203.0.113.7".to_string()));
        assert_eq!(args.last().unwrap(), "uname -a");
    }

    #[test]
    fn test_command_line_password_auth_uses_sshpass_env() {
        let exec = executor(None, Some("hunter2"), None);
        let (program, args) = exec.command_line("203.0.113.7", &plain_task());

        assert_eq!(program, "sshpass");
        assert_eq!(args[0], "-e");
        assert_eq!(args[1], "ssh");
        // Password never appears on the argument vector.
        assert!(!args.iter().any(|a| a.contains("hunter2")));
        // BatchMode would break password prompting.
        assert!(!args.contains(&"BatchMode=yes".to_string()));
    }

    #[test]
    fn test_remote_command_plain() {
        let exec = executor(None, None, None);
        assert_eq!(exec.remote_command(&plain_task()), "uname -a");
    }

    #[test]
    fn test_remote_command_sudo_without_password() {
        let exec = executor(None, None, None);
        let task = bootstrap_task();
        assert_eq!(
            exec.remote_command(&task),
            "sudo -n sh -c 'pip install --upgrade requests'"
        );
    }

    #[test]
    fn test_remote_command_sudo_with_password_reads_stdin() {
        let exec = executor(None, None, Some("secret"));
        let task = bootstrap_task();
        let cmd = exec.remote_command(&task);
        assert!(cmd.starts_with("sudo -S -p ''"));
        assert!(cmd.contains("pip install --upgrade requests"));
    }

    #[test]
    fn test_shell_quote_escapes_single_quotes() {
        assert_eq!(shell_quote("echo 'hi'"), r"'echo '\''hi'\'''");
    }

    #[test]
    fn test_classify_success() {
        let out = CommandOutput {
            exit_code: 0,
            stdout: "ok".to_string(),
            stderr: String::new(),
        };
        let result = classify_output("h", &plain_task(), out).unwrap();
        assert_eq!(result.stdout, "ok");
    }

    #[test]
    fn test_classify_transport_failure_is_unreachable() {
        let out = CommandOutput {
            exit_code: 255,
            stdout: String::new(),
            stderr: "Connection timed out\n".to_string(),
        };
        let err = classify_output("203.0.113.7", &plain_task(), out).unwrap_err();
        match err {
            ExecError::Unreachable { host, detail } => {
                assert_eq!(host, "203.0.113.7");
                assert_eq!(detail, "Connection timed out");
            }
            other => panic!("expected Unreachable, got {:?}", other),
        }
    }

    #[test]
    fn test_classify_nonzero_exit_is_task_failure() {
        let out = CommandOutput {
            exit_code: 100,
            stdout: String::new(),
            stderr: "E: dpkg was interrupted".to_string(),
        };
        let err = classify_output("h", &system_upgrade_task(), out).unwrap_err();
        match err {
            ExecError::TaskFailed {
                task,
                exit_code,
                stderr,
            } => {
                assert_eq!(task, "system-upgrade");
                assert_eq!(exit_code, 100);
                assert!(stderr.contains("dpkg"));
            }
            other => panic!("expected TaskFailed, got {:?}", other),
        }
    }

    #[test]
    fn test_result_bag_missing_host_fails_loudly() {
        let bag = ResultBag::default();
        let err = bag.output("203.0.113.7").unwrap_err();
        assert!(matches!(err, ExecError::MissingHost(_)));
    }
}
