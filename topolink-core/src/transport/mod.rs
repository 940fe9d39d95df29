//! Transport seam between the controller and the network.
//!
//! The controller never talks to reqwest directly; everything goes through
//! [`Transport`] so tests (and alternative clients) can stand in for the
//! real HTTP stack.

mod http;

pub use http::HttpTransport;

use std::fmt::Debug;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
pub use reqwest::Method;
use serde::de::DeserializeOwned;

use crate::error::TransportError;

/// Raw response of a completed request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransportResponse {
    /// HTTP status code.
    pub status: u16,
    /// Raw body bytes.
    pub body: Bytes,
}

impl TransportResponse {
    /// Response with the given status and body.
    pub fn new(status: u16, body: impl Into<Bytes>) -> Self {
        Self {
            status,
            body: body.into(),
        }
    }

    /// A 200 response.
    pub fn ok(body: impl Into<Bytes>) -> Self {
        Self::new(200, body)
    }

    /// True for 2xx statuses.
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// Decode the body as JSON.
    pub fn json<T: DeserializeOwned>(&self) -> Result<T, TransportError> {
        serde_json::from_slice(&self.body).map_err(|e| {
            TransportError::Network(format!("invalid JSON body: {e}"))
        })
    }

    /// The body as text, lossily decoded.
    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }
}

/// Performs request/response cycles against one remote endpoint.
#[async_trait]
pub trait Transport: Send + Sync + Debug {
    /// Send `method path` with an optional JSON body.
    async fn request(
        &self,
        method: Method,
        path: &str,
        body: Option<serde_json::Value>,
    ) -> Result<TransportResponse, TransportError>;

    /// GET `path`, giving up after `timeout`.
    ///
    /// Meant for one-shot reads where the caller waits for the answer
    /// instead of continuing on a callback.
    async fn request_synchronous(
        &self,
        path: &str,
        timeout: Duration,
    ) -> Result<TransportResponse, TransportError> {
        match tokio::time::timeout(
            timeout,
            self.request(Method::GET, path, None),
        )
        .await
        {
            Ok(result) => result,
            Err(_) => Err(TransportError::Timeout(timeout)),
        }
    }
}

/// Extract the human readable message from an error body.
///
/// The server answers errors with `{"message": "..."}`; anything else is
/// returned as text, or the status line when the body is empty.
pub(crate) fn error_message(status: u16, body: &[u8]) -> String {
    if let Ok(value) = serde_json::from_slice::<serde_json::Value>(body)
        && let Some(message) = value.get("message").and_then(|m| m.as_str())
    {
        return message.to_string();
    }
    let text = String::from_utf8_lossy(body).trim().to_string();
    if text.is_empty() {
        format!("HTTP {status}")
    } else {
        text
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug)]
    struct Stalled;

    #[async_trait]
    impl Transport for Stalled {
        async fn request(
            &self,
            _method: Method,
            _path: &str,
            _body: Option<serde_json::Value>,
        ) -> Result<TransportResponse, TransportError> {
            std::future::pending().await
        }
    }

    #[tokio::test(start_paused = true)]
    async fn default_synchronous_request_times_out() {
        let timeout = Duration::from_secs(2);
        let err = Stalled
            .request_synchronous("/settings", timeout)
            .await
            .unwrap_err();
        assert_eq!(err, TransportError::Timeout(timeout));
    }

    #[test]
    fn error_message_prefers_json_message_field() {
        let body = br#"{"message": "Controller is starting", "status": 503}"#;
        assert_eq!(error_message(503, body), "Controller is starting");
    }

    #[test]
    fn error_message_falls_back_to_text_then_status() {
        assert_eq!(error_message(500, b" boom \n"), "boom");
        assert_eq!(error_message(502, b""), "HTTP 502");
    }

    #[test]
    fn response_helpers() {
        let resp = TransportResponse::ok(r#"{"version": "2.2.0"}"#);
        assert!(resp.is_success());
        let value: serde_json::Value = resp.json().unwrap();
        assert_eq!(value["version"], "2.2.0");
        assert!(!TransportResponse::new(404, "").is_success());
    }
}
