use thiserror::Error;

/// Failures of background cloud tasks. They are logged where they happen
/// and never produce a completion event.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CloudError {
    /// A required cloud setting is empty.
    #[error("Missing cloud setting: {0}")]
    MissingSetting(&'static str),

    /// The provider rejected the credentials.
    #[error("Authentication failed for cloud provider")]
    Authentication,

    /// The region could not be selected.
    #[error("Unable to set cloud provider region: {0}")]
    Region(String),

    /// A provider call failed or was refused.
    #[error("Cloud provider error: {0}")]
    Provider(String),

    /// Running a command on `host` failed.
    #[error("Remote shell error on {host}: {message}")]
    Shell {
        /// Remote host.
        host: String,
        /// Failure description, including stderr when available.
        message: String,
    },

    /// The start script failed or answered something unexpected.
    #[error("Server bootstrap failed: {0}")]
    Bootstrap(String),

    /// The job could not run to completion on the worker pool.
    #[error("Task worker error: {0}")]
    Worker(String),
}

/// Result alias for cloud operations.
pub type Result<T> = std::result::Result<T, CloudError>;
