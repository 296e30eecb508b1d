//! Notification events.
//!
//! The core emits events; delivery (email, push, whatever) belongs to an
//! external consumer subscribed to the channel.

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::broadcast;
use tracing::debug;

/// Events emitted by the core for external notification delivery.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum NotificationEvent {
    /// Identification confidence fell below threshold.
    UncertainId {
        job_id: String,
        disc_label: String,
        best_guess: Option<String>,
    },
    /// A rip finished and landed in the library.
    Complete { job_id: String, title: String },
    /// A job failed.
    Error { job_id: String, message: String },
    /// Periodic digest window elapsed.
    DigestDue { since: DateTime<Utc> },
}

/// Sink for notification events.
pub trait Notifier: Send + Sync {
    fn notify(&self, event: NotificationEvent);
}

/// Broadcast-channel notifier; consumers subscribe, and events are dropped
/// when nobody listens.
pub struct ChannelNotifier {
    tx: broadcast::Sender<NotificationEvent>,
}

impl ChannelNotifier {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<NotificationEvent> {
        self.tx.subscribe()
    }
}

impl Notifier for ChannelNotifier {
    fn notify(&self, event: NotificationEvent) {
        debug!("notification event: {event:?}");
        let _ = self.tx.send(event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_subscriber_receives_event() {
        let notifier = ChannelNotifier::new(8);
        let mut rx = notifier.subscribe();

        notifier.notify(NotificationEvent::Complete {
            job_id: "job-1".to_string(),
            title: "Iron Man".to_string(),
        });

        match rx.recv().await.unwrap() {
            NotificationEvent::Complete { job_id, title } => {
                assert_eq!(job_id, "job-1");
                assert_eq!(title, "Iron Man");
            }
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[test]
    fn test_notify_without_subscribers_is_fine() {
        let notifier = ChannelNotifier::new(8);
        notifier.notify(NotificationEvent::Error {
            job_id: "job-1".to_string(),
            message: "boom".to_string(),
        });
    }

    #[test]
    fn test_event_serialization_tags() {
        let event = NotificationEvent::UncertainId {
            job_id: "j".to_string(),
            disc_label: "L".to_string(),
            best_guess: None,
        };
        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains("\"type\":\"uncertain_id\""));
    }
}
