//! # topolink-cloud
//!
//! Helpers for simulation servers hosted on cloud instances: connecting to
//! the provider, listing/creating/deleting instances and starting the
//! server on an instance over SSH. All of it is slow, blocking work, so it
//! runs through [`CloudTasks`], which reports completions on a channel.

/// Starting the server on an instance.
pub mod bootstrap;
/// Error types.
pub mod error;
/// Cloud provider seam.
pub mod provider;
/// Remote command execution.
pub mod shell;
/// Background task queue.
pub mod tasks;

pub use bootstrap::{
    BootstrapRequest, DEFAULT_SERVER_PORT, ServerInfo, StartServerJob,
    parse_start_response, shell_quote, start_server,
};
pub use error::{CloudError, Result};
pub use provider::{
    CloudCredentials, CloudProvider, Instance, KeyPair, Region,
    connect_provider,
};
pub use shell::{OpenSshShell, RemoteShell};
pub use tasks::{CloudEvent, CloudTasks, TaskHandle};
