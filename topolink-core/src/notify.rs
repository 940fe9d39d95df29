use std::fmt::Debug;

/// User-facing notifications raised by the controller.
pub trait UserNotifier: Send + Sync + Debug {
    /// Called with the server's message on the first failed handshake of a
    /// streak.
    fn show_connection_error(&self, message: &str);
}

/// Notifier for headless use: connection errors go to the log.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogNotifier;

impl UserNotifier for LogNotifier {
    fn show_connection_error(&self, message: &str) {
        log::error!("[Controller] Connection error: {}", message);
    }
}
