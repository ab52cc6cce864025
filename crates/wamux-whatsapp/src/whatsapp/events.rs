//! Notifications raised while processing webhook callbacks.

use serde::Serialize;
use serde_json::Value;
use tokio::sync::broadcast;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum WaEvent {
    /// A callback passed signature verification. Carries the whole body.
    WebhookReceived { payload: Value },
    MessageReceived {
        from: String,
        preview: String,
        message_type: String,
        account: String,
        raw: Value,
    },
    MessageDelivered {
        message_id: String,
        account: String,
        raw: Value,
    },
    MessageRead {
        message_id: String,
        account: String,
        raw: Value,
    },
}

impl WaEvent {
    pub fn name(&self) -> &'static str {
        match self {
            Self::WebhookReceived { .. } => "webhook_received",
            Self::MessageReceived { .. } => "message_received",
            Self::MessageDelivered { .. } => "message_delivered",
            Self::MessageRead { .. } => "message_read",
        }
    }
}

/// Receiver side of webhook notifications.
pub trait EventSink: Send + Sync {
    fn emit(&self, event: WaEvent);
}

impl EventSink for broadcast::Sender<WaEvent> {
    fn emit(&self, event: WaEvent) {
        // No subscribers is fine.
        let _ = self.send(event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_broadcast_sink_delivers() {
        let (tx, mut rx) = broadcast::channel(4);
        tx.emit(WaEvent::WebhookReceived { payload: json!({"entry": []}) });
        let got = rx.recv().await.unwrap();
        assert_eq!(got.name(), "webhook_received");
    }

    #[test]
    fn test_emit_without_receivers_is_silent() {
        let (tx, rx) = broadcast::channel::<WaEvent>(4);
        drop(rx);
        tx.emit(WaEvent::MessageRead {
            message_id: "m1".into(),
            account: "default".into(),
            raw: json!({}),
        });
    }

    #[test]
    fn test_serialized_tag() {
        let ev = WaEvent::MessageDelivered {
            message_id: "m1".into(),
            account: "sales".into(),
            raw: json!({"id": "m1"}),
        };
        let v = serde_json::to_value(&ev).unwrap();
        assert_eq!(v["event"], "message_delivered");
        assert_eq!(v["account"], "sales");
    }
}
