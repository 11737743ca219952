// Third Party
use serde::Serialize;
use tokio::sync::mpsc;
use tracing::{error, info};

// Local
use crate::watcher::Notification;

/// Log `event` as a single INFO line carrying its JSON serialization in the `event` field.
/// An event that fails to serialize is reported at ERROR and dropped.
pub fn log_event<T: Serialize>(event: &T) {
    match serde_json::to_string(event) {
        Ok(payload) => info!(event = %payload, "Cluster event"),
        Err(e) => error!("Error marshalling event to json: {}", e),
    }
}

/// Consumes watch notifications and logs newly added objects.
pub struct EventSink<T> {
    receiver: mpsc::Receiver<Notification<T>>,
}

impl<T: Serialize> EventSink<T> {
    pub fn new(receiver: mpsc::Receiver<Notification<T>>) -> Self {
        Self { receiver }
    }

    /// Runs until every sender is gone. Updates and deletions are not logged.
    pub async fn run(mut self) {
        while let Some(notification) = self.receiver.recv().await {
            match notification {
                Notification::Added(event) => log_event(&event),
                Notification::Updated(_) | Notification::Deleted(_) => {}
            }
        }
    }
}
