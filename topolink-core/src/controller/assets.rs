//! Static asset pipeline: cache lookup, download, store, hand back a path.
//!
//! A fetch resolves at most once. Failures are logged and resolve to
//! `None`; there is no retry at this layer.

use std::future::Future;
use std::path::PathBuf;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use dashmap::mapref::entry::Entry;
use futures::FutureExt;
use log::{debug, error};
use tokio::sync::oneshot;

use super::{Controller, Inner};
use crate::error::{ControllerError, Result};
use crate::symbols::IconHandle;
use crate::transport::{Method, Transport, error_message};

/// Outcome of [`Controller::fetch_static`]; awaiting it yields the cached
/// path, or `None` if nothing will ever be delivered.
#[derive(Debug)]
pub enum AssetFetch {
    /// No transport attached; nothing was requested.
    Unavailable,
    /// Served from the disk cache without touching the network.
    Ready(PathBuf),
    /// A download is in flight.
    Pending(oneshot::Receiver<Option<PathBuf>>),
}

impl AssetFetch {
    /// True for a cache hit.
    pub fn is_ready(&self) -> bool {
        matches!(self, AssetFetch::Ready(_))
    }

    /// True when no transport was attached.
    pub fn is_unavailable(&self) -> bool {
        matches!(self, AssetFetch::Unavailable)
    }
}

impl Future for AssetFetch {
    type Output = Option<PathBuf>;

    fn poll(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
    ) -> Poll<Self::Output> {
        match &mut *self {
            AssetFetch::Unavailable => Poll::Ready(None),
            AssetFetch::Ready(_) => {
                match std::mem::replace(&mut *self, AssetFetch::Unavailable) {
                    AssetFetch::Ready(path) => Poll::Ready(Some(path)),
                    _ => Poll::Ready(None),
                }
            }
            AssetFetch::Pending(rx) => match Pin::new(rx).poll(cx) {
                Poll::Ready(Ok(path)) => {
                    *self = AssetFetch::Unavailable;
                    Poll::Ready(path)
                }
                // Sender dropped without an answer (task aborted).
                Poll::Ready(Err(_)) => {
                    *self = AssetFetch::Unavailable;
                    Poll::Ready(None)
                }
                Poll::Pending => Poll::Pending,
            },
        }
    }
}

impl Controller {
    /// Resolve a controller-relative `url` to a file in the asset cache.
    ///
    /// A cached file is returned immediately without any network call,
    /// even if the remote content may have changed since.
    ///
    /// Must be called from within a tokio runtime: a miss spawns the
    /// download.
    pub fn fetch_static(&self, url: &str) -> AssetFetch {
        let Some(transport) = self.transport() else {
            debug!("[Controller] fetch_static({}) without transport", url);
            return AssetFetch::Unavailable;
        };

        if let Some(path) = self.inner.cache.lookup(url) {
            return AssetFetch::Ready(path);
        }

        let (tx, rx) = oneshot::channel();
        let inner = Arc::clone(&self.inner);
        let url = url.to_string();

        if !self.inner.dedupe_in_flight {
            tokio::spawn(async move {
                let path = download_logged(&inner, transport, &url).await;
                let _ = tx.send(path);
            });
            return AssetFetch::Pending(rx);
        }

        match self.inner.in_flight.entry(url.clone()) {
            Entry::Occupied(mut waiting) => {
                debug!("[Controller] Joining in-flight fetch of {}", url);
                waiting.get_mut().push(tx);
                return AssetFetch::Pending(rx);
            }
            Entry::Vacant(slot) => {
                slot.insert(vec![tx]);
            }
        }

        let mut flight = InFlight {
            inner,
            url,
            path: None,
        };
        tokio::spawn(async move {
            flight.path =
                download_logged(&flight.inner, transport, &flight.url).await;
        });
        AssetFetch::Pending(rx)
    }

    /// Callback form of [`fetch_static`](Self::fetch_static), with the same
    /// runtime requirement.
    ///
    /// On a cache hit `callback` runs before this returns; after a download
    /// it runs on the runtime. It never runs when the fetch fails or no
    /// transport is attached.
    pub fn fetch_static_with<F>(&self, url: &str, callback: F)
    where
        F: FnOnce(PathBuf) + Send + 'static,
    {
        match self.fetch_static(url) {
            AssetFetch::Unavailable => {}
            AssetFetch::Ready(path) => callback(path),
            pending @ AssetFetch::Pending(_) => {
                tokio::spawn(async move {
                    if let Some(path) = pending.await {
                        callback(path);
                    }
                });
            }
        }
    }

    /// Fetch the icon of `symbol_id` through the symbol registry.
    ///
    /// Like [`fetch_static`](Self::fetch_static), this must be called from
    /// within a tokio runtime.
    pub fn fetch_icon(
        &self,
        symbol_id: &str,
    ) -> impl Future<Output = Option<IconHandle>> + Send + 'static {
        let url = self.inner.symbols.resolve_url(symbol_id);
        self.fetch_static(&url)
            .map(|path| path.map(IconHandle::from_path))
    }

    /// Callback form of [`fetch_icon`](Self::fetch_icon); needs a tokio
    /// runtime too.
    pub fn fetch_icon_with<F>(&self, symbol_id: &str, callback: F)
    where
        F: FnOnce(IconHandle) + Send + 'static,
    {
        let url = self.inner.symbols.resolve_url(symbol_id);
        self.fetch_static_with(&url, move |path| {
            callback(IconHandle::from_path(path))
        });
    }
}

/// Owned by the task downloading `url`. However that task ends (done,
/// panicked or cancelled), dropping this clears the in-flight entry and
/// answers everyone waiting on it.
struct InFlight {
    inner: Arc<Inner>,
    url: String,
    path: Option<PathBuf>,
}

impl Drop for InFlight {
    fn drop(&mut self) {
        if let Some((_, waiters)) = self.inner.in_flight.remove(&self.url) {
            for waiter in waiters {
                let _ = waiter.send(self.path.clone());
            }
        }
    }
}

async fn download_logged(
    inner: &Inner,
    transport: Arc<dyn Transport>,
    url: &str,
) -> Option<PathBuf> {
    match download(inner, transport, url).await {
        Ok(path) => Some(path),
        Err(err) => {
            error!("[Controller] Error while downloading file: {}", err);
            None
        }
    }
}

async fn download(
    inner: &Inner,
    transport: Arc<dyn Transport>,
    url: &str,
) -> Result<PathBuf> {
    let response = transport
        .request(Method::GET, url, None)
        .await
        .map_err(|e| ControllerError::FetchFailure {
            url: url.to_string(),
            reason: e.to_string(),
        })?;
    if !response.is_success() {
        return Err(ControllerError::FetchFailure {
            url: url.to_string(),
            reason: error_message(response.status, &response.body),
        });
    }
    inner.cache.store(url, &response.body).await
}
