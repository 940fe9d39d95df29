//! Starting the simulation server on a freshly created cloud instance.
//!
//! The request travels as a versioned JSON document, single-quoted for the
//! remote shell. The start script answers with one JSON object on the first
//! line of its stdout.

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use topolink_core::CloudSettings;
use zeroize::Zeroizing;

use crate::error::{CloudError, Result};
use crate::shell::RemoteShell;

/// Version of the JSON request understood by the start script.
pub const BOOTSTRAP_FORMAT_VERSION: u32 = 1;
/// Start script location on the instance image.
pub const START_SCRIPT: &str =
    "/opt/gns3/gns3-server/gns3server/start_server.py";
/// Where the start script's stderr is kept on the instance.
pub const START_STDERR_LOG: &str = "/tmp/gns3_stderr.log";
/// The start script does not report its port yet.
pub const DEFAULT_SERVER_PORT: u16 = 8000;

/// Arguments handed to the start script.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BootstrapRequest {
    /// Always [`BOOTSTRAP_FORMAT_VERSION`].
    pub version: u32,
    /// Instance the server runs on.
    pub instance_id: String,
    /// Account the server acts for.
    pub cloud_user_name: String,
    /// API key of that account.
    pub cloud_api_key: String,
    /// Region of the instance.
    pub region: String,
    /// Idle seconds before the server shuts itself down.
    pub dead_time: u64,
}

impl fmt::Debug for BootstrapRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BootstrapRequest")
            .field("version", &self.version)
            .field("instance_id", &self.instance_id)
            .field("cloud_user_name", &self.cloud_user_name)
            .field("cloud_api_key", &"<redacted>")
            .field("region", &self.region)
            .field("dead_time", &self.dead_time)
            .finish()
    }
}

impl BootstrapRequest {
    /// Request for `instance_id`, taking account details from `settings`.
    pub fn new(
        instance_id: impl Into<String>,
        settings: &CloudSettings,
        region: impl Into<String>,
    ) -> Self {
        Self {
            version: BOOTSTRAP_FORMAT_VERSION,
            instance_id: instance_id.into(),
            cloud_user_name: settings.cloud_user_name.clone(),
            cloud_api_key: settings.cloud_api_key.clone(),
            region: region.into(),
            dead_time: settings.dead_time_secs,
        }
    }

    /// Shell command line running the start script with this request.
    pub fn command(&self) -> Result<String> {
        let data = serde_json::to_string(self)
            .map_err(|e| CloudError::Bootstrap(e.to_string()))?;
        Ok(format!(
            "/usr/bin/python3 {} -d -v --data={} 2>{}",
            START_SCRIPT,
            shell_quote(&data),
            START_STDERR_LOG
        ))
    }
}

/// Quote `raw` as a single POSIX shell word.
pub fn shell_quote(raw: &str) -> String {
    format!("'{}'", raw.replace('\'', r"'\''"))
}

/// Where the started server can be reached, plus whatever else the start
/// script reported.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServerInfo {
    /// Address the server listens on.
    pub host: String,
    /// Port the server listens on.
    pub port: u16,
    /// Remaining fields of the start script's answer.
    #[serde(flatten)]
    pub details: Map<String, Value>,
}

impl ServerInfo {
    /// HTTP base URL of the server.
    pub fn base_url(&self) -> String {
        format!("http://{}:{}", self.host, self.port)
    }
}

/// Parse the start script's stdout. Only the first line is considered.
pub fn parse_start_response(stdout: &str, host: &str) -> Result<ServerInfo> {
    let line = stdout.lines().next().map(str::trim).unwrap_or_default();
    if line.is_empty() {
        return Err(CloudError::Bootstrap(
            "start script produced no output".to_string(),
        ));
    }
    let mut details: Map<String, Value> =
        serde_json::from_str(line).map_err(|e| {
            CloudError::Bootstrap(format!("unexpected start script output: {e}"))
        })?;
    details.remove("host");
    details.remove("port");

    Ok(ServerInfo {
        host: host.to_string(),
        port: DEFAULT_SERVER_PORT,
        details,
    })
}

/// Everything needed to start the server on one instance.
#[derive(Clone)]
pub struct StartServerJob {
    /// Instance address.
    pub host: String,
    /// Key used to log in.
    pub private_key: Zeroizing<String>,
    /// Start script arguments.
    pub request: BootstrapRequest,
}

impl fmt::Debug for StartServerJob {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StartServerJob")
            .field("host", &self.host)
            .field("request", &self.request)
            .finish_non_exhaustive()
    }
}

/// Run the start script over `shell` and parse its answer.
pub fn start_server(
    shell: &dyn RemoteShell,
    job: &StartServerJob,
) -> Result<ServerInfo> {
    let command = job.request.command()?;
    log::info!(
        "[CloudTasks] Starting server for instance {} on {}",
        job.request.instance_id,
        job.host
    );
    let stdout = shell.exec(&job.host, &job.private_key, &command)?;
    log::debug!("[CloudTasks] ssh response: {}", stdout.trim_end());
    parse_start_response(&stdout, &job.host)
}
