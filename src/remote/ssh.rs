//! Session transport over the system `ssh` client.
//!
//! `connect` starts a multiplexing control master in the background; every
//! command then rides the same authenticated connection. The private key and
//! control socket live in a per-session temp dir removed on close.

use std::path::PathBuf;
use std::process::{Output, Stdio};

use async_trait::async_trait;
use tempfile::TempDir;
use tokio::process::Command;
use tracing::{debug, warn};

use super::{ConnectTarget, RemoteCommand, RemoteExecutor, Session};
use crate::{Error, Result};

/// Exit status `ssh` uses for its own (transport) failures
const SSH_TRANSPORT_FAILURE: i32 = 255;

/// Opens sessions by shelling out to `ssh`
#[derive(Clone, Debug)]
pub struct SshExecutor {
    program: String,
    connect_timeout_secs: u64,
}

impl SshExecutor {
    /// Create an executor using `ssh` from `PATH`
    pub fn new() -> Self {
        Self {
            program: "ssh".to_string(),
            connect_timeout_secs: 10,
        }
    }

    /// Use a different client binary
    pub fn with_program(mut self, program: impl Into<String>) -> Self {
        self.program = program.into();
        self
    }
}

impl Default for SshExecutor {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl RemoteExecutor for SshExecutor {
    async fn connect(&self, target: &ConnectTarget) -> Result<Box<dyn Session>> {
        let dir = tempfile::Builder::new()
            .prefix("k3s-bootstrap-")
            .tempdir()
            .map_err(|e| connection_error(target, format!("failed to create session dir: {e}")))?;

        let dir_path = dir.path().to_path_buf();
        let key_path = dir_path.join("id");
        write_private_key(&key_path, &target.private_key)
            .await
            .map_err(|e| connection_error(target, format!("failed to write private key: {e}")))?;

        let mut session = SshSession {
            program: self.program.clone(),
            target: target.clone(),
            key_path,
            control_path: dir_path.join("control"),
            connect_timeout_secs: self.connect_timeout_secs,
            _dir: dir,
            open: false,
        };

        // -f backgrounds the master once authentication has succeeded. The
        // forked master keeps any inherited pipes open, so its diagnostics go
        // to a log file instead.
        let log_path = dir_path.join("master.log");
        let status = Command::new(&session.program)
            .args(["-M", "-N", "-f", "-E"])
            .arg(&log_path)
            .args(session.common_args())
            .arg(session.destination())
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .await
            .map_err(|e| connection_error(target, format!("failed to run {}: {e}", self.program)))?;

        if !status.success() {
            let log = tokio::fs::read_to_string(&log_path).await.unwrap_or_default();
            let message = match log.trim() {
                "" => format!("ssh exited with {status}"),
                log => log.to_string(),
            };
            return Err(connection_error(target, message));
        }

        debug!(node = %target.host, address = %target.address, "ssh session established");
        session.open = true;
        Ok(Box::new(session))
    }
}

struct SshSession {
    program: String,
    target: ConnectTarget,
    key_path: PathBuf,
    control_path: PathBuf,
    connect_timeout_secs: u64,
    _dir: TempDir,
    open: bool,
}

impl SshSession {
    fn destination(&self) -> String {
        format!("{}@{}", self.target.user, self.target.address)
    }

    fn common_args(&self) -> Vec<String> {
        vec![
            "-i".to_string(),
            self.key_path.display().to_string(),
            "-p".to_string(),
            self.target.port.to_string(),
            "-S".to_string(),
            self.control_path.display().to_string(),
            "-o".to_string(),
            "BatchMode=yes".to_string(),
            "-o".to_string(),
            "IdentitiesOnly=yes".to_string(),
            "-o".to_string(),
            "StrictHostKeyChecking=no".to_string(),
            "-o".to_string(),
            "UserKnownHostsFile=/dev/null".to_string(),
            "-o".to_string(),
            "LogLevel=ERROR".to_string(),
            "-o".to_string(),
            format!("ConnectTimeout={}", self.connect_timeout_secs),
        ]
    }

    async fn exec(&self, command: &RemoteCommand) -> Result<Output> {
        debug!(node = %self.target.host, command = %command, "running remote command");

        let output = Command::new(&self.program)
            .args(self.common_args())
            .arg(self.destination())
            .arg("--")
            .arg(command.line())
            .stdin(Stdio::null())
            .output()
            .await
            .map_err(|e| {
                Error::command(
                    &self.target.host,
                    command.to_string(),
                    format!("failed to run {}: {e}", self.program),
                )
            })?;

        if output.status.success() {
            return Ok(output);
        }

        if output.status.code() == Some(SSH_TRANSPORT_FAILURE) {
            return Err(connection_error(&self.target, stderr_message(&output)));
        }

        Err(Error::command(
            &self.target.host,
            command.to_string(),
            format!("{}: {}", output.status, stderr_message(&output)),
        ))
    }

    fn exit_master_args(&self) -> Vec<String> {
        let mut args = self.common_args();
        args.extend(["-O".to_string(), "exit".to_string(), self.destination()]);
        args
    }
}

#[async_trait]
impl Session for SshSession {
    async fn run(&mut self, command: &RemoteCommand) -> Result<()> {
        let output = self.exec(command).await?;
        for line in String::from_utf8_lossy(&output.stdout).lines() {
            debug!(node = %self.target.host, "    {}", line);
        }
        Ok(())
    }

    async fn capture(&mut self, command: &RemoteCommand) -> Result<String> {
        let output = self.exec(command).await?;
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }

    async fn close(&mut self) {
        if !self.open {
            return;
        }
        self.open = false;

        match Command::new(&self.program)
            .args(self.exit_master_args())
            .stdin(Stdio::null())
            .output()
            .await
        {
            Ok(output) if output.status.success() => {
                debug!(node = %self.target.host, "ssh session closed");
            }
            Ok(output) => {
                warn!(node = %self.target.host, error = %stderr_message(&output), "failed to stop ssh control master");
            }
            Err(e) => {
                warn!(node = %self.target.host, error = %e, "failed to stop ssh control master");
            }
        }
    }
}

impl Drop for SshSession {
    fn drop(&mut self) {
        if self.open {
            // Dropped without close(): stop the master before the temp dir goes away
            let _ = std::process::Command::new(&self.program)
                .args(self.exit_master_args())
                .stdin(Stdio::null())
                .stdout(Stdio::null())
                .stderr(Stdio::null())
                .status();
        }
    }
}

fn connection_error(target: &ConnectTarget, message: impl Into<String>) -> Error {
    Error::connection(&target.host, &target.address, message)
}

fn stderr_message(output: &Output) -> String {
    let stderr = String::from_utf8_lossy(&output.stderr);
    let stderr = stderr.trim();
    if stderr.is_empty() {
        format!("ssh exited with {}", output.status)
    } else {
        stderr.to_string()
    }
}

async fn write_private_key(path: &std::path::Path, key: &str) -> std::io::Result<()> {
    let mut content = key.to_string();
    // OpenSSH rejects keys without a final newline
    if !content.ends_with('\n') {
        content.push('\n');
    }

    let mut options = tokio::fs::OpenOptions::new();
    options.write(true).create_new(true);
    #[cfg(unix)]
    options.mode(0o600);

    let mut file = options.open(path).await?;
    tokio::io::AsyncWriteExt::write_all(&mut file, content.as_bytes()).await?;
    tokio::io::AsyncWriteExt::flush(&mut file).await
}
