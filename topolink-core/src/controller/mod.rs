//! The controller: one coordinating object per simulation server.
//!
//! It owns the transport reference, drives the version handshake, forwards
//! requests and fronts the static asset cache. Clones share state.

mod assets;

pub use assets::AssetFetch;

use std::path::Path;
use std::sync::{Arc, Weak};
use std::time::Duration;

use dashmap::DashMap;
use log::{debug, info, warn};
use parking_lot::{Mutex, RwLock};
use tokio::sync::{broadcast, oneshot};
use tokio::task::JoinHandle;

use crate::cache::AssetCache;
use crate::connection::{ConnectionPhase, ConnectionState};
use crate::error::{ControllerError, Result};
use crate::notify::{LogNotifier, UserNotifier};
use crate::settings::ClientSettings;
use crate::symbols::{ControllerSymbols, SymbolRegistry};
use crate::transport::{Method, Transport, TransportResponse, error_message};

const EVENT_CAPACITY: usize = 64;

/// Notifications published by the controller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ControllerEvent {
    /// The handshake succeeded after the controller was not connected.
    Connected,
    /// A handshake attempt failed.
    HandshakeFailed {
        /// Server message, or the transport error.
        message: String,
    },
    /// Another handshake attempt will run after `delay`.
    RetryScheduled {
        /// Time until the next attempt.
        delay: Duration,
    },
}

type Waiters = Vec<oneshot::Sender<Option<std::path::PathBuf>>>;

struct Inner {
    transport: RwLock<Option<Arc<dyn Transport>>>,
    state: Mutex<ConnectionState>,
    handshake_task: Mutex<Option<JoinHandle<()>>>,
    events: broadcast::Sender<ControllerEvent>,
    cache: AssetCache,
    in_flight: DashMap<String, Waiters>,
    dedupe_in_flight: bool,
    handshake_path: String,
    synchronous_timeout: Duration,
    auto_start_local_server: bool,
    symbols: Arc<dyn SymbolRegistry>,
    notifier: Arc<dyn UserNotifier>,
}

impl Drop for Inner {
    fn drop(&mut self) {
        if let Some(task) = self.handshake_task.get_mut().take() {
            task.abort();
        }
    }
}

/// Coordinates one simulation server: handshake, requests and assets.
#[derive(Clone)]
pub struct Controller {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for Controller {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Controller")
            .field("phase", &self.phase())
            .field("has_transport", &self.inner.transport.read().is_some())
            .field("cache_dir", &self.inner.cache.dir())
            .finish()
    }
}

/// Builder for [`Controller`]; anything left unset falls back to the
/// settings defaults, a temporary cache, [`ControllerSymbols`] and
/// [`LogNotifier`].
#[derive(Debug, Default)]
pub struct ControllerBuilder {
    settings: ClientSettings,
    cache: Option<AssetCache>,
    symbols: Option<Arc<dyn SymbolRegistry>>,
    notifier: Option<Arc<dyn UserNotifier>>,
}

impl ControllerBuilder {
    /// Settings to read defaults from.
    pub fn settings(mut self, settings: ClientSettings) -> Self {
        self.settings = settings;
        self
    }

    /// Use `cache` instead of one derived from the settings.
    pub fn cache(mut self, cache: AssetCache) -> Self {
        self.cache = Some(cache);
        self
    }

    /// Registry used by the icon fetches.
    pub fn symbols(mut self, symbols: Arc<dyn SymbolRegistry>) -> Self {
        self.symbols = Some(symbols);
        self
    }

    /// Receiver of connection error alerts.
    pub fn notifier(mut self, notifier: Arc<dyn UserNotifier>) -> Self {
        self.notifier = Some(notifier);
        self
    }

    /// Create the controller; fails only when the cache directory cannot be set up.
    pub fn build(self) -> Result<Controller> {
        let settings = self.settings;
        let cache = match self.cache {
            Some(cache) => cache,
            None => match &settings.cache.directory {
                Some(dir) => AssetCache::persistent(dir)?,
                None => AssetCache::temporary()?,
            },
        };
        let (events, _) = broadcast::channel(EVENT_CAPACITY);

        Ok(Controller {
            inner: Arc::new(Inner {
                transport: RwLock::new(None),
                state: Mutex::new(ConnectionState::new(
                    settings.controller.retry_delay(),
                )),
                handshake_task: Mutex::new(None),
                events,
                cache,
                in_flight: DashMap::new(),
                dedupe_in_flight: settings.cache.dedupe_in_flight,
                handshake_path: settings.controller.handshake_path.clone(),
                synchronous_timeout: settings.controller.synchronous_timeout(),
                auto_start_local_server: settings.server.auto_start,
                symbols: self
                    .symbols
                    .unwrap_or_else(|| Arc::new(ControllerSymbols)),
                notifier: self.notifier.unwrap_or_else(|| Arc::new(LogNotifier)),
            }),
        })
    }
}

impl Controller {
    /// Start configuring a controller.
    pub fn builder() -> ControllerBuilder {
        ControllerBuilder::default()
    }

    /// Controller built from `settings` alone.
    pub fn new(settings: ClientSettings) -> Result<Self> {
        Self::builder().settings(settings).build()
    }

    /// True when the server is not started by this client.
    pub fn is_remote(&self) -> bool {
        !self.inner.auto_start_local_server
    }

    /// True once the handshake on the current transport succeeded.
    pub fn is_connected(&self) -> bool {
        self.inner.state.lock().connected()
    }

    /// Current connection phase.
    pub fn phase(&self) -> ConnectionPhase {
        self.inner.state.lock().phase()
    }

    /// Snapshot of the connection bookkeeping.
    pub fn connection_state(&self) -> ConnectionState {
        self.inner.state.lock().clone()
    }

    /// Receive controller events from now on.
    pub fn subscribe(&self) -> broadcast::Receiver<ControllerEvent> {
        self.inner.events.subscribe()
    }

    /// Directory holding cached assets.
    pub fn cache_dir(&self) -> &Path {
        self.inner.cache.dir()
    }

    /// The asset cache.
    pub fn cache(&self) -> &AssetCache {
        &self.inner.cache
    }

    /// Currently attached transport.
    pub fn transport(&self) -> Option<Arc<dyn Transport>> {
        self.inner.transport.read().clone()
    }

    /// Replace the transport and start the version handshake against it.
    ///
    /// Must be called from within a tokio runtime. A handshake still
    /// retrying against the previous transport is cancelled.
    pub fn attach_transport(&self, transport: Arc<dyn Transport>) {
        info!("[Controller] Attaching transport {:?}", transport);
        let generation = {
            let mut state = self.inner.state.lock();
            *self.inner.transport.write() = Some(transport.clone());
            state.begin_handshake()
        };

        let task = tokio::spawn(run_handshake(
            Arc::downgrade(&self.inner),
            transport,
            generation,
        ));
        if let Some(previous) = self.inner.handshake_task.lock().replace(task)
        {
            previous.abort();
        }
    }

    /// Drop the transport. Requests and fetches become no-ops again.
    pub fn detach_transport(&self) {
        {
            let mut state = self.inner.state.lock();
            *self.inner.transport.write() = None;
            state.reset();
        }
        if let Some(task) = self.inner.handshake_task.lock().take() {
            task.abort();
        }
        info!("[Controller] Transport detached");
    }

    /// Forward a request to the transport.
    ///
    /// Without a transport nothing is sent and
    /// [`ControllerError::TransportUnavailable`] is returned.
    pub async fn request(
        &self,
        method: Method,
        path: &str,
        body: Option<serde_json::Value>,
    ) -> Result<TransportResponse> {
        let Some(transport) = self.transport() else {
            debug!(
                "[Controller] Dropping {} {}: no transport attached",
                method, path
            );
            return Err(ControllerError::TransportUnavailable);
        };
        Ok(transport.request(method, path, body).await?)
    }

    /// GET `path`.
    pub async fn get(&self, path: &str) -> Result<TransportResponse> {
        self.request(Method::GET, path, None).await
    }

    /// POST `body` to `path`.
    pub async fn post(
        &self,
        path: &str,
        body: serde_json::Value,
    ) -> Result<TransportResponse> {
        self.request(Method::POST, path, Some(body)).await
    }

    /// PUT `body` to `path`.
    pub async fn put(
        &self,
        path: &str,
        body: serde_json::Value,
    ) -> Result<TransportResponse> {
        self.request(Method::PUT, path, Some(body)).await
    }

    /// DELETE `path`.
    pub async fn delete(&self, path: &str) -> Result<TransportResponse> {
        self.request(Method::DELETE, path, None).await
    }

    /// GET `path` and wait for the answer, bounded by `timeout`.
    pub async fn get_synchronous(
        &self,
        path: &str,
        timeout: Duration,
    ) -> Result<TransportResponse> {
        let transport =
            self.transport().ok_or(ControllerError::TransportUnavailable)?;
        Ok(transport.request_synchronous(path, timeout).await?)
    }

    /// [`get_synchronous`](Self::get_synchronous) with the configured
    /// timeout.
    pub async fn get_synchronous_default(
        &self,
        path: &str,
    ) -> Result<TransportResponse> {
        self.get_synchronous(path, self.inner.synchronous_timeout)
            .await
    }
}

async fn run_handshake(
    weak: Weak<Inner>,
    transport: Arc<dyn Transport>,
    generation: u64,
) {
    loop {
        let path = match weak.upgrade() {
            Some(inner) => inner.handshake_path.clone(),
            None => return,
        };
        let failure = match transport.request(Method::GET, &path, None).await
        {
            Ok(response) if response.is_success() => None,
            Ok(response) => {
                Some(error_message(response.status, &response.body))
            }
            Err(err) => Some(err.user_message()),
        };

        let retry_after = {
            let Some(inner) = weak.upgrade() else {
                return;
            };
            // Attach and detach move to a new generation under this lock,
            // so a stale result can never be applied after them.
            let mut state = inner.state.lock();
            if !state.is_current(generation) {
                debug!("[Controller] Stale handshake result ignored");
                return;
            }

            let Some(message) = failure else {
                if state.on_handshake_success() {
                    info!("[Controller] Connected to {}", path);
                    let _ = inner.events.send(ControllerEvent::Connected);
                }
                return;
            };

            let outcome = state.on_handshake_failure(message.clone());
            let _ = inner.events.send(ControllerEvent::HandshakeFailed {
                message: message.clone(),
            });
            let _ = inner.events.send(ControllerEvent::RetryScheduled {
                delay: outcome.retry_after,
            });
            drop(state);

            warn!(
                "[Controller] Handshake failed ({}), retrying in {:?}",
                message, outcome.retry_after
            );
            if let Some(alert) = outcome.alert {
                inner.notifier.show_connection_error(&alert);
            }
            outcome.retry_after
        };

        tokio::time::sleep(retry_after).await;
    }
}
