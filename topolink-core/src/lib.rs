//! # topolink-core
//!
//! Client-side controller for a topology simulation server.
//!
//! A [`Controller`] tracks the connection to one server (a version handshake
//! retried until it succeeds), forwards HTTP requests through a pluggable
//! [`Transport`], and caches static assets such as symbol icons in a local
//! directory keyed by the MD5 of their URL.
//!
//! ```no_run
//! use std::sync::Arc;
//! use topolink_core::{ClientSettings, Controller, HttpTransport};
//!
//! # async fn run() -> topolink_core::Result<()> {
//! let settings = ClientSettings::load()?;
//! let controller = Controller::new(settings.clone())?;
//! let transport = HttpTransport::from_settings(&settings)?;
//! controller.attach_transport(Arc::new(transport));
//!
//! if let Some(icon) = controller.fetch_icon(":/symbols/router.svg").await {
//!     println!("router icon at {}", icon.path().display());
//! }
//! # Ok(())
//! # }
//! ```

/// Disk cache for downloaded assets.
pub mod cache;
/// Handshake bookkeeping.
pub mod connection;
/// The controller and its asset pipeline.
pub mod controller;
/// Error types.
pub mod error;
/// User-facing notifications.
pub mod notify;
/// Client settings.
pub mod settings;
/// Symbol id to URL resolution.
pub mod symbols;
/// Transport seam and the HTTP implementation.
pub mod transport;

pub use cache::{AssetCache, AssetKind, CacheKey};
pub use connection::{ConnectionPhase, ConnectionState, HandshakeFailureOutcome};
pub use controller::{AssetFetch, Controller, ControllerBuilder, ControllerEvent};
pub use error::{ControllerError, Result, TransportError};
pub use notify::{LogNotifier, UserNotifier};
pub use settings::{
    CacheSettings, ClientSettings, CloudSettings, ControllerSettings,
    ServerSettings,
};
pub use symbols::{ControllerSymbols, IconHandle, SymbolRegistry};
pub use transport::{HttpTransport, Method, Transport, TransportResponse};
