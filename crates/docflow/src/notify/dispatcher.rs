//! Delivers webhooks off the worker threads.

use std::sync::Arc;
use std::thread::{self, JoinHandle};

use crossbeam_channel::{bounded, Receiver, Sender, TrySendError};
use log::{debug, error, info, warn};

use crate::error::WorkerError;

use super::payload::WebhookPayload;
use super::Notifier;

/// Webhooks waiting for delivery before new ones are dropped.
pub const DEFAULT_BACKLOG: usize = 1024;

enum Message {
    Deliver(Box<WebhookPayload>),
    Stop,
}

/// Handle used by the facade and the workers to queue a webhook. Cloning is
/// cheap. Sending never blocks and never fails the caller; a full backlog
/// drops the payload.
#[derive(Clone)]
pub struct NotificationSender {
    tx: Option<Sender<Message>>,
}

impl NotificationSender {
    /// A sender that drops everything, for when no callback URL is set.
    pub fn disabled() -> Self {
        Self { tx: None }
    }

    pub fn is_enabled(&self) -> bool {
        self.tx.is_some()
    }

    pub fn send(&self, payload: WebhookPayload) {
        match &self.tx {
            Some(tx) => {
                let job_id = payload.job_id.clone();
                let status = payload.status;
                match tx.try_send(Message::Deliver(Box::new(payload))) {
                    Ok(()) => {}
                    Err(TrySendError::Full(_)) => warn!(
                        "Webhook backlog full, dropping {} webhook for job {}",
                        status, job_id
                    ),
                    Err(TrySendError::Disconnected(_)) => {
                        warn!("Notifier is stopped, dropping webhook for job {}", job_id)
                    }
                }
            }
            None => debug!(
                "No callback configured, dropping {} webhook for job {}",
                payload.status, payload.job_id
            ),
        }
    }
}

/// Owns the notifier thread. Payloads are delivered one at a time in the
/// order they were sent; a failed delivery is logged and dropped.
pub struct NotificationDispatcher {
    tx: Option<Sender<Message>>,
    handle: Option<JoinHandle<()>>,
}

impl NotificationDispatcher {
    pub fn start(notifier: Arc<dyn Notifier>) -> Result<Self, WorkerError> {
        Self::with_backlog(notifier, DEFAULT_BACKLOG)
    }

    /// Starts the thread with room for `backlog` undelivered payloads.
    pub fn with_backlog(notifier: Arc<dyn Notifier>, backlog: usize) -> Result<Self, WorkerError> {
        let (tx, rx) = bounded(backlog.max(1));
        let handle = thread::Builder::new()
            .name("docflow-notifier".to_string())
            .spawn(move || deliver_loop(notifier, rx))
            .map_err(|e| WorkerError::SpawnFailed(format!("notifier: {}", e)))?;

        info!("Notification dispatcher started");
        Ok(Self {
            tx: Some(tx),
            handle: Some(handle),
        })
    }

    pub fn disabled() -> Self {
        info!("No callback URL configured, webhooks are disabled");
        Self {
            tx: None,
            handle: None,
        }
    }

    pub fn sender(&self) -> NotificationSender {
        NotificationSender {
            tx: self.tx.clone(),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.tx.is_some()
    }

    /// Delivers everything already queued, then stops the thread.
    pub fn shutdown(&mut self) {
        if let Some(tx) = self.tx.take() {
            let _ = tx.send(Message::Stop);
        }
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                error!("Notifier thread panicked");
            }
        }
    }
}

impl Drop for NotificationDispatcher {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn deliver_loop(notifier: Arc<dyn Notifier>, rx: Receiver<Message>) {
    for message in rx.iter() {
        let payload = match message {
            Message::Deliver(payload) => payload,
            Message::Stop => break,
        };
        match notifier.notify(&payload) {
            Ok(()) => debug!(
                "Delivered {} webhook for job {}",
                payload.status, payload.job_id
            ),
            Err(e) => warn!(
                "Webhook for job {} ({}) failed: {}",
                payload.job_id, payload.status, e
            ),
        }
    }
    debug!("Notification dispatcher stopped");
}
