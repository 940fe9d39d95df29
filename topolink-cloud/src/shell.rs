use std::fmt::Debug;
use std::io::Write;
use std::path::PathBuf;
use std::process::Command;
use std::time::Duration;

use crate::error::{CloudError, Result};

/// Runs one command on a remote host and returns its stdout.
pub trait RemoteShell: Send + Sync + Debug {
    /// Run `command` on `host` as the configured user.
    fn exec(&self, host: &str, private_key: &str, command: &str)
    -> Result<String>;
}

/// [`RemoteShell`] backed by the system OpenSSH client.
///
/// Host keys are accepted without being remembered: instances are
/// short-lived and their addresses get recycled.
#[derive(Debug, Clone)]
pub struct OpenSshShell {
    program: PathBuf,
    user: String,
    connect_timeout: Duration,
}

impl Default for OpenSshShell {
    fn default() -> Self {
        Self {
            program: PathBuf::from("ssh"),
            user: "root".to_string(),
            connect_timeout: Duration::from_secs(30),
        }
    }
}

impl OpenSshShell {
    /// SSH client binary to run.
    pub fn with_program(mut self, program: impl Into<PathBuf>) -> Self {
        self.program = program.into();
        self
    }

    /// Remote user to log in as.
    pub fn with_user(mut self, user: impl Into<String>) -> Self {
        self.user = user.into();
        self
    }

    /// Give up connecting after `timeout`.
    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    fn shell_error(host: &str, message: impl Into<String>) -> CloudError {
        CloudError::Shell {
            host: host.to_string(),
            message: message.into(),
        }
    }
}

impl RemoteShell for OpenSshShell {
    fn exec(
        &self,
        host: &str,
        private_key: &str,
        command: &str,
    ) -> Result<String> {
        // Removed when dropped; created readable by the owner only.
        let mut key_file = tempfile::NamedTempFile::new()
            .map_err(|e| Self::shell_error(host, e.to_string()))?;
        key_file
            .write_all(private_key.as_bytes())
            .and_then(|_| key_file.flush())
            .map_err(|e| Self::shell_error(host, e.to_string()))?;

        let output = Command::new(&self.program)
            .arg("-i")
            .arg(key_file.path())
            .args(["-o", "StrictHostKeyChecking=no"])
            .args(["-o", "UserKnownHostsFile=/dev/null"])
            .args(["-o", "BatchMode=yes"])
            .arg("-o")
            .arg(format!("ConnectTimeout={}", self.connect_timeout.as_secs()))
            .arg(format!("{}@{}", self.user, host))
            .arg(command)
            .output()
            .map_err(|e| {
                log::error!("[CloudTasks] SSH connection error to {}: {}", host, e);
                Self::shell_error(host, e.to_string())
            })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            log::error!(
                "[CloudTasks] Remote command on {} exited with {}: {}",
                host,
                output.status,
                stderr.trim()
            );
            return Err(Self::shell_error(
                host,
                format!("exit status {}: {}", output.status, stderr.trim()),
            ));
        }
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}
