//! Remote command execution.
//!
//! The poller only needs "run this shell text on the host, give me stdout or
//! tell me it failed". [`SshExecutor`] does that with the system `ssh` client
//! in batch mode and a hard wall-clock limit per command.

use std::io::Read;
use std::path::PathBuf;
use std::process::{Child, Command, Stdio};
use std::time::{Duration, Instant};

use crate::config::Config;
use crate::error::ExecError;

/// Something that can run a command on the monitored host.
pub trait CommandExecutor: Send {
    /// Run `command` and return its trimmed stdout.
    fn execute(&mut self, command: &str) -> Result<String, ExecError>;

    /// Whether the last command reached the host.
    fn is_connected(&self) -> bool;

    /// Address this executor talks to.
    fn host(&self) -> &str;
}

/// Runs commands through the `ssh` binary.
#[derive(Debug, Clone)]
pub struct SshExecutor {
    host: String,
    port: u16,
    user: String,
    identity_file: Option<PathBuf>,
    timeout: Duration,
    connected: bool,
}

impl SshExecutor {
    pub fn new(host: impl Into<String>, config: &Config) -> Self {
        Self {
            host: host.into(),
            port: config.ssh_port,
            user: config.ssh_user.clone(),
            identity_file: config.identity_file.clone(),
            timeout: config.command_timeout(),
            connected: false,
        }
    }

    /// Build the local `ssh` invocation for a remote command.
    pub fn command(&self, remote: &str) -> Command {
        let connect_secs = self.timeout.as_secs().max(1);
        let mut cmd = Command::new("ssh");
        cmd.arg("-o")
            .arg("BatchMode=yes")
            .arg("-o")
            .arg(format!("ConnectTimeout={connect_secs}"))
            .arg("-o")
            .arg("StrictHostKeyChecking=accept-new")
            .arg("-p")
            .arg(self.port.to_string());
        if let Some(identity) = &self.identity_file {
            cmd.arg("-i").arg(identity);
        }
        cmd.arg(format!("{}@{}", self.user, self.host)).arg(remote);
        cmd
    }
}

impl CommandExecutor for SshExecutor {
    fn execute(&mut self, command: &str) -> Result<String, ExecError> {
        let result = run_with_timeout(self.command(command), self.timeout);
        self.connected = result.is_ok();
        result
    }

    fn is_connected(&self) -> bool {
        self.connected
    }

    fn host(&self) -> &str {
        &self.host
    }
}

/// Run a local process, killing it if it outlives `timeout`.
///
/// Non-zero exit and blank stdout are failures.
pub fn run_with_timeout(mut command: Command, timeout: Duration) -> Result<String, ExecError> {
    let mut child = command
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .spawn()?;

    // Drain stdout on a separate thread so a chatty child never blocks on a
    // full pipe while we poll for exit.
    let reader = child.stdout.take().map(|mut stdout| {
        std::thread::spawn(move || {
            let mut out = Vec::new();
            let _ = stdout.read_to_end(&mut out);
            out
        })
    });

    let start = Instant::now();
    let status = loop {
        match child.try_wait() {
            Ok(Some(status)) => break status,
            Ok(None) if start.elapsed() >= timeout => {
                reap(&mut child);
                return Err(ExecError::Timeout(timeout.as_millis() as u64));
            }
            Ok(None) => std::thread::sleep(Duration::from_millis(5)),
            Err(e) => {
                reap(&mut child);
                return Err(ExecError::Spawn(e));
            }
        }
    };

    let out = reader
        .and_then(|handle| handle.join().ok())
        .unwrap_or_default();

    if !status.success() {
        return Err(ExecError::Failed {
            status: status.code().unwrap_or(-1),
        });
    }

    let text = String::from_utf8_lossy(&out).trim().to_string();
    if text.is_empty() {
        return Err(ExecError::Empty);
    }
    Ok(text)
}

/// Kill `child` and wait for it so no zombie is left behind.
fn reap(child: &mut Child) {
    let _ = child.kill();
    let _ = child.wait();
}
