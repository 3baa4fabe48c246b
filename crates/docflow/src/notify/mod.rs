//! Best-effort owner callbacks.

pub mod dispatcher;
pub mod error;
pub mod http;
pub mod payload;

pub use dispatcher::{NotificationDispatcher, NotificationSender};
pub use error::NotifyError;
pub use http::HttpNotifier;
pub use payload::WebhookPayload;

/// Delivers one webhook. Implementations must bound their own runtime.
pub trait Notifier: Send + Sync {
    fn notify(&self, payload: &WebhookPayload) -> Result<(), NotifyError>;
}
