use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tracing::debug;

/// Event published after a message row commits
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewMessageNotice {
    pub message_id: i64,
    pub mailbox_id: i64,
    pub sender_email: String,
    pub sender_name: String,
    pub subject: String,
    pub received_at: DateTime<Utc>,
}

/// Sink for delivery events. Publishing never blocks delivery and
/// never fails it; listeners are best-effort.
pub trait NotificationHub: Send + Sync {
    fn broadcast_new_message(&self, notice: NewMessageNotice);
}

/// Fan-out hub backed by a tokio broadcast channel.
///
/// WebSocket sessions subscribe and filter by mailbox; with no
/// subscribers events are simply dropped.
pub struct BroadcastHub {
    tx: broadcast::Sender<NewMessageNotice>,
}

impl BroadcastHub {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<NewMessageNotice> {
        self.tx.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

impl NotificationHub for BroadcastHub {
    fn broadcast_new_message(&self, notice: NewMessageNotice) {
        debug!(
            "Broadcasting message {} for mailbox {}",
            notice.message_id, notice.mailbox_id
        );
        // Err means no subscribers, which is fine
        let _ = self.tx.send(notice);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn notice(mailbox_id: i64) -> NewMessageNotice {
        NewMessageNotice {
            message_id: 1,
            mailbox_id,
            sender_email: "a@x.com".to_string(),
            sender_name: "A".to_string(),
            subject: "Hi".to_string(),
            received_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_broadcast_reaches_subscriber() {
        let hub = BroadcastHub::new(16);
        let mut rx = hub.subscribe();

        hub.broadcast_new_message(notice(42));

        let received = rx.recv().await.unwrap();
        assert_eq!(received.mailbox_id, 42);
        assert_eq!(received.subject, "Hi");
    }

    #[tokio::test]
    async fn test_broadcast_without_subscribers_is_ok() {
        let hub = BroadcastHub::new(16);
        // Must not panic or error out
        hub.broadcast_new_message(notice(1));
        assert_eq!(hub.subscriber_count(), 0);
    }

    #[tokio::test]
    async fn test_multiple_subscribers_all_receive() {
        let hub = BroadcastHub::new(16);
        let mut rx1 = hub.subscribe();
        let mut rx2 = hub.subscribe();

        hub.broadcast_new_message(notice(7));

        assert_eq!(rx1.recv().await.unwrap().mailbox_id, 7);
        assert_eq!(rx2.recv().await.unwrap().mailbox_id, 7);
    }
}
