//! Incoming webhook handling for WhatsApp Cloud API.
//!
//! Handles:
//! - Webhook verification challenge (`GET`)
//! - Signed callbacks carrying messages and status updates (`POST`)
//!
//! The tenant a callback belongs to is unknown until its body is read, so
//! both the verify token and the signature are checked against every
//! configured account in turn.

use crate::whatsapp::accounts::AccountStore;
use crate::whatsapp::auth::verify_signature;
use crate::whatsapp::error::WaResult;
use crate::whatsapp::events::{EventSink, WaEvent};
use crate::whatsapp::store::WaStore;
use crate::whatsapp::types::*;
use chrono::Utc;
use log::{debug, error, info, warn};
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::Arc;

/// Tenant name used when no account owns the callback's phone number.
pub const UNKNOWN_ACCOUNT: &str = "unknown";

/// Query of the verification handshake. Accepts both the `hub.mode` form
/// the platform sends and the `hub_mode` form.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct VerifyQuery {
    #[serde(rename = "hub.mode", alias = "hub_mode", default)]
    pub mode: Option<String>,
    #[serde(rename = "hub.verify_token", alias = "hub_verify_token", default)]
    pub verify_token: Option<String>,
    #[serde(rename = "hub.challenge", alias = "hub_challenge", default)]
    pub challenge: Option<String>,
}

/// What to answer the platform with.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WebhookReply {
    /// Handshake accepted; echo the challenge.
    Challenge(String),
    /// Handshake rejected.
    Forbidden,
    /// Callback verified and processed.
    Accepted,
    /// Callback signature missing or wrong; nothing was processed.
    InvalidSignature,
}

impl WebhookReply {
    pub fn status_code(&self) -> u16 {
        match self {
            Self::Challenge(_) | Self::Accepted => 200,
            Self::Forbidden | Self::InvalidSignature => 403,
        }
    }

    /// JSON body for callback replies, `None` for the plain-text handshake.
    pub fn json_body(&self) -> Option<Value> {
        match self {
            Self::Accepted => Some(json!({ "status": "ok" })),
            Self::InvalidSignature => Some(json!({ "error": "Invalid signature" })),
            Self::Challenge(_) | Self::Forbidden => None,
        }
    }

    pub fn text_body(&self) -> String {
        match self {
            Self::Challenge(c) => c.clone(),
            Self::Forbidden => "Forbidden".to_string(),
            other => other
                .json_body()
                .map(|v| v.to_string())
                .unwrap_or_default(),
        }
    }
}

/// Short human-readable summary of an inbound message.
pub fn message_preview(message: &Value) -> String {
    let kind = message["type"].as_str().unwrap_or("text");
    let caption_or = |placeholder: &str| {
        message[kind]["caption"]
            .as_str()
            .map(String::from)
            .unwrap_or_else(|| placeholder.to_string())
    };
    match kind {
        "text" => message["text"]["body"]
            .as_str()
            .unwrap_or_default()
            .to_string(),
        "image" => caption_or("[image]"),
        "video" => caption_or("[video]"),
        "document" => caption_or("[document]"),
        "audio" => "[audio]".to_string(),
        "sticker" => "[sticker]".to_string(),
        "contacts" => "[contacts]".to_string(),
        "location" => match message["location"]["name"].as_str() {
            Some(name) if !name.is_empty() => name.to_string(),
            _ => "[location]".to_string(),
        },
        "interactive" => message["interactive"]["button_reply"]["title"]
            .as_str()
            .or_else(|| message["interactive"]["list_reply"]["title"].as_str())
            .unwrap_or("[interactive]")
            .to_string(),
        other => format!("[{other}]"),
    }
}

fn non_empty_array(v: &Value) -> bool {
    v.as_array().is_some_and(|a| !a.is_empty())
}

fn array_of(v: &Value) -> &[Value] {
    v.as_array().map(Vec::as_slice).unwrap_or_default()
}

/// Webhook processor shared by the HTTP handlers.
pub struct WebhookProcessor {
    accounts: Arc<dyn AccountStore>,
    store: Option<Arc<dyn WaStore>>,
    logging: LoggingConfig,
    events: Arc<dyn EventSink>,
}

impl WebhookProcessor {
    pub fn new(
        accounts: Arc<dyn AccountStore>,
        store: Option<Arc<dyn WaStore>>,
        logging: LoggingConfig,
        events: Arc<dyn EventSink>,
    ) -> Self {
        Self {
            accounts,
            store,
            logging,
            events,
        }
    }

    // ─── Verification challenge ─────────────────────────────────────

    /// Accept iff the mode is `subscribe` and the token matches the verify
    /// token of any account.
    pub async fn verify(&self, query: &VerifyQuery) -> WaResult<WebhookReply> {
        let Some(token) = query.verify_token.as_deref() else {
            return Ok(WebhookReply::Forbidden);
        };
        let accounts = self.accounts.list_all().await?;
        let owner = accounts
            .iter()
            .find(|a| a.webhook_verify_token.as_deref() == Some(token));

        match (query.mode.as_deref(), owner) {
            (Some("subscribe"), Some(account)) => {
                info!("Webhook verification accepted [account={}]", account.name);
                Ok(WebhookReply::Challenge(
                    query.challenge.clone().unwrap_or_default(),
                ))
            }
            _ => {
                warn!("Webhook verification rejected");
                Ok(WebhookReply::Forbidden)
            }
        }
    }

    // ─── Callbacks ───────────────────────────────────────────────────

    /// Verify and process one callback body.
    pub async fn handle(&self, signature: Option<&str>, body: &[u8]) -> WaResult<WebhookReply> {
        let accounts = self.accounts.list_all().await?;

        let Some(signature) = signature else {
            warn!("Webhook rejected: missing signature header");
            return Ok(WebhookReply::InvalidSignature);
        };
        let verified = accounts.iter().any(|a| match a.webhook_secret.as_deref() {
            Some(secret) if !secret.is_empty() => verify_signature(secret, signature, body),
            _ => false,
        });
        if !verified {
            warn!("Webhook rejected: signature does not match any account");
            return Ok(WebhookReply::InvalidSignature);
        }

        let payload: Value = serde_json::from_slice(body).unwrap_or_else(|e| {
            warn!("Verified webhook body is not JSON ({}); treating as empty", e);
            json!({})
        });

        self.events.emit(WaEvent::WebhookReceived {
            payload: payload.clone(),
        });

        for entry in array_of(&payload["entry"]) {
            for change in array_of(&entry["changes"]) {
                self.process_change(&accounts, &change["value"]).await;
            }
        }

        Ok(WebhookReply::Accepted)
    }

    async fn process_change(&self, accounts: &[Account], value: &Value) {
        let phone_number_id = value["metadata"]["phone_number_id"]
            .as_str()
            .unwrap_or_default();
        let account_name = accounts
            .iter()
            .find(|a| !phone_number_id.is_empty() && a.phone_number_id == phone_number_id)
            .map(|a| a.name.as_str())
            .unwrap_or(UNKNOWN_ACCOUNT);
        debug!("Processing webhook change [account={}]", account_name);

        self.log_change(account_name, value).await;
        self.process_messages(account_name, value).await;
        self.process_statuses(account_name, value).await;
    }

    async fn log_change(&self, account_name: &str, value: &Value) {
        if !self.logging.webhooks {
            return;
        }
        let Some(store) = &self.store else {
            return;
        };
        let event_type = if non_empty_array(&value["messages"]) {
            WebhookEventType::Message
        } else if non_empty_array(&value["statuses"]) {
            WebhookEventType::Status
        } else {
            WebhookEventType::Unknown
        };
        let entry = WebhookLog {
            account_name: account_name.to_string(),
            event_type,
            payload: value.clone(),
            processed_at: Utc::now(),
        };
        if let Err(e) = store.log_webhook(entry).await {
            error!("Failed to write webhook audit record: {}", e);
        }
    }

    async fn process_messages(&self, account_name: &str, value: &Value) {
        for message in array_of(&value["messages"]) {
            let from = message["from"].as_str().unwrap_or_default().to_string();
            let kind = message["type"].as_str().unwrap_or("text").to_string();
            let preview = message_preview(message);

            if self.logging.messages {
                if let Some(store) = &self.store {
                    let now = Utc::now();
                    let record = MessageRecord {
                        account_name: account_name.to_string(),
                        remote_message_id: message["id"]
                            .as_str()
                            .filter(|s| !s.is_empty())
                            .map(String::from),
                        direction: MessageDirection::Inbound,
                        to: value["metadata"]["display_phone_number"]
                            .as_str()
                            .map(String::from),
                        from: Some(from.clone()),
                        message_type: kind.clone(),
                        content: message.clone(),
                        status: MessageStatus::Delivered,
                        status_at: now,
                        created_at: now,
                    };
                    if let Err(e) = store.insert_message(record).await {
                        error!("Failed to record inbound message: {}", e);
                    }
                }
            }

            self.events.emit(WaEvent::MessageReceived {
                from,
                preview,
                message_type: kind,
                account: account_name.to_string(),
                raw: message.clone(),
            });
        }
    }

    async fn process_statuses(&self, account_name: &str, value: &Value) {
        for status in array_of(&value["statuses"]) {
            let message_id = status["id"].as_str().unwrap_or_default().to_string();
            let state = status["status"].as_str().unwrap_or_default();

            if self.logging.messages {
                if let (Some(store), Some(parsed)) = (&self.store, MessageStatus::parse(state)) {
                    if let Err(e) = store
                        .update_message_status(&message_id, parsed, Utc::now())
                        .await
                    {
                        error!("Failed to update status of {}: {}", message_id, e);
                    }
                }
            }

            let account = account_name.to_string();
            let raw = status.clone();
            match state {
                "delivered" => self.events.emit(WaEvent::MessageDelivered {
                    message_id,
                    account,
                    raw,
                }),
                "read" => self.events.emit(WaEvent::MessageRead {
                    message_id,
                    account,
                    raw,
                }),
                _ => {}
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::whatsapp::accounts::ConfigAccountStore;
    use crate::whatsapp::auth::sign_payload;
    use crate::whatsapp::config::AccountConfig;
    use crate::whatsapp::store::MemoryStore;
    use std::collections::BTreeMap;
    use tokio::sync::broadcast;

    const SECRET: &str = "app-secret";

    struct Harness {
        processor: WebhookProcessor,
        store: Arc<MemoryStore>,
        rx: broadcast::Receiver<WaEvent>,
    }

    impl Harness {
        fn drain(&mut self) -> Vec<WaEvent> {
            let mut out = Vec::new();
            while let Ok(ev) = self.rx.try_recv() {
                out.push(ev);
            }
            out
        }
    }

    fn harness(logging: LoggingConfig) -> Harness {
        let mut accounts = BTreeMap::new();
        accounts.insert(
            "marketing".to_string(),
            AccountConfig {
                access_token: "t1".into(),
                phone_number_id: "PN1".into(),
                business_account_id: "B1".into(),
                webhook_verify_token: None,
                webhook_secret: Some("other-secret".into()),
            },
        );
        accounts.insert(
            "support".to_string(),
            AccountConfig {
                access_token: "t2".into(),
                phone_number_id: "PN2".into(),
                business_account_id: "B2".into(),
                webhook_verify_token: Some("verify-me".into()),
                webhook_secret: Some(SECRET.into()),
            },
        );
        let store = Arc::new(MemoryStore::new());
        let (tx, rx) = broadcast::channel(64);
        let processor = WebhookProcessor::new(
            Arc::new(ConfigAccountStore::new(accounts)),
            Some(store.clone() as Arc<dyn WaStore>),
            logging,
            Arc::new(tx),
        );
        Harness {
            processor,
            store,
            rx,
        }
    }

    fn callback(phone_number_id: &str, value: Value) -> Vec<u8> {
        let mut value = value;
        value["metadata"] = json!({
            "display_phone_number": "15550001111",
            "phone_number_id": phone_number_id
        });
        serde_json::to_vec(&json!({
            "object": "whatsapp_business_account",
            "entry": [{"id": "WABA", "changes": [{"field": "messages", "value": value}]}]
        }))
        .unwrap()
    }

    fn query(mode: &str, token: &str, challenge: &str) -> VerifyQuery {
        VerifyQuery {
            mode: Some(mode.into()),
            verify_token: Some(token.into()),
            challenge: Some(challenge.into()),
        }
    }

    #[tokio::test]
    async fn test_verify_accepts_any_matching_account() {
        let h = harness(LoggingConfig::default());
        let reply = h
            .processor
            .verify(&query("subscribe", "verify-me", "1158201444"))
            .await
            .unwrap();
        assert_eq!(reply, WebhookReply::Challenge("1158201444".into()));
        assert_eq!(reply.status_code(), 200);
        assert_eq!(reply.text_body(), "1158201444");
    }

    #[tokio::test]
    async fn test_verify_rejections() {
        let h = harness(LoggingConfig::default());
        for q in [
            query("subscribe", "wrong", "c"),
            query("unsubscribe", "verify-me", "c"),
            VerifyQuery::default(),
        ] {
            let reply = h.processor.verify(&q).await.unwrap();
            assert_eq!(reply, WebhookReply::Forbidden);
            assert_eq!(reply.status_code(), 403);
        }
    }

    #[test]
    fn test_verify_query_accepts_both_key_forms() {
        let dotted: VerifyQuery = serde_json::from_value(json!({
            "hub.mode": "subscribe", "hub.verify_token": "v", "hub.challenge": "c"
        }))
        .unwrap();
        let underscored: VerifyQuery = serde_json::from_value(json!({
            "hub_mode": "subscribe", "hub_verify_token": "v", "hub_challenge": "c"
        }))
        .unwrap();
        assert_eq!(dotted, underscored);
        assert_eq!(dotted.mode.as_deref(), Some("subscribe"));
    }

    #[tokio::test]
    async fn test_text_message_scenario() {
        let mut h = harness(LoggingConfig::default());
        let body = callback(
            "PN2",
            json!({"messages": [{"from": "60111", "id": "wamid.IN1", "type": "text", "text": {"body": "Hi"}}]}),
        );
        let sig = sign_payload(SECRET, &body);

        let reply = h.processor.handle(Some(&sig), &body).await.unwrap();
        assert_eq!(reply, WebhookReply::Accepted);
        assert_eq!(reply.json_body(), Some(json!({"status": "ok"})));

        let events = h.drain();
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].name(), "webhook_received");
        match &events[1] {
            WaEvent::MessageReceived {
                from,
                preview,
                message_type,
                account,
                ..
            } => {
                assert_eq!(from, "60111");
                assert_eq!(preview, "Hi");
                assert_eq!(message_type, "text");
                assert_eq!(account, "support");
            }
            other => panic!("unexpected event {other:?}"),
        }

        let msgs = h.store.messages().await;
        assert_eq!(msgs.len(), 1);
        assert_eq!(msgs[0].direction, MessageDirection::Inbound);
        assert_eq!(msgs[0].status, MessageStatus::Delivered);
        assert_eq!(msgs[0].to.as_deref(), Some("15550001111"));

        let logs = h.store.webhook_logs().await;
        assert_eq!(logs.len(), 1);
        assert_eq!(logs[0].event_type, WebhookEventType::Message);
        assert_eq!(logs[0].account_name, "support");
    }

    #[tokio::test]
    async fn test_delivered_and_read_scenario() {
        let mut h = harness(LoggingConfig::default());
        for id in ["m1", "m2", "m3"] {
            let now = Utc::now();
            h.store
                .insert_message(MessageRecord {
                    account_name: "support".into(),
                    remote_message_id: Some(id.into()),
                    direction: MessageDirection::Outbound,
                    to: Some("60111".into()),
                    from: Some("PN2".into()),
                    message_type: "text".into(),
                    content: json!({}),
                    status: MessageStatus::Sent,
                    status_at: now,
                    created_at: now,
                })
                .await
                .unwrap();
        }

        let body = callback(
            "PN2",
            json!({"statuses": [
                {"id": "m2", "status": "read"},
                {"id": "m1", "status": "delivered"},
                {"id": "m3", "status": "deleted"}
            ]}),
        );
        let sig = sign_payload(SECRET, &body);
        h.processor.handle(Some(&sig), &body).await.unwrap();

        let events = h.drain();
        let delivered: Vec<_> = events
            .iter()
            .filter(|e| matches!(e, WaEvent::MessageDelivered { message_id, .. } if message_id == "m1"))
            .collect();
        let read: Vec<_> = events
            .iter()
            .filter(|e| matches!(e, WaEvent::MessageRead { message_id, .. } if message_id == "m2"))
            .collect();
        assert_eq!(delivered.len(), 1);
        assert_eq!(read.len(), 1);
        assert_eq!(events.len(), 3);

        let msgs = h.store.messages().await;
        let status_of = |id: &str| {
            msgs.iter()
                .find(|m| m.remote_message_id.as_deref() == Some(id))
                .map(|m| m.status)
        };
        assert_eq!(status_of("m1"), Some(MessageStatus::Delivered));
        assert_eq!(status_of("m2"), Some(MessageStatus::Read));
        assert_eq!(status_of("m3"), Some(MessageStatus::Sent));

        let logs = h.store.webhook_logs().await;
        assert_eq!(logs[0].event_type, WebhookEventType::Status);
    }

    #[tokio::test]
    async fn test_bad_signature_processes_nothing() {
        let mut h = harness(LoggingConfig::default());
        let body = callback(
            "PN2",
            json!({"messages": [{"from": "1", "type": "text", "text": {"body": "x"}}]}),
        );
        let sig = sign_payload(SECRET, &body);
        let mut tampered = body.clone();
        let last = tampered.len() - 2;
        tampered[last] ^= 0x01;

        for (header, payload) in [(Some(sig.as_str()), tampered.as_slice()), (None, body.as_slice())] {
            let reply = h.processor.handle(header, payload).await.unwrap();
            assert_eq!(reply, WebhookReply::InvalidSignature);
            assert_eq!(reply.status_code(), 403);
        }
        assert!(h.drain().is_empty());
        assert!(h.store.messages().await.is_empty());
        assert!(h.store.webhook_logs().await.is_empty());
    }

    #[tokio::test]
    async fn test_any_account_secret_verifies() {
        let mut h = harness(LoggingConfig::default());
        let body = callback("PN1", json!({}));
        let sig = sign_payload("other-secret", &body);
        let reply = h.processor.handle(Some(&sig), &body).await.unwrap();
        assert_eq!(reply, WebhookReply::Accepted);
        assert_eq!(h.drain().len(), 1);
        let logs = h.store.webhook_logs().await;
        assert_eq!(logs[0].account_name, "marketing");
        assert_eq!(logs[0].event_type, WebhookEventType::Unknown);
    }

    #[tokio::test]
    async fn test_unmatched_phone_number_is_unknown_tenant() {
        let mut h = harness(LoggingConfig::default());
        let body = callback(
            "PN-OTHER",
            json!({"messages": [{"from": "1", "type": "sticker", "sticker": {}}]}),
        );
        let sig = sign_payload(SECRET, &body);
        h.processor.handle(Some(&sig), &body).await.unwrap();

        let events = h.drain();
        assert!(matches!(
            &events[1],
            WaEvent::MessageReceived { account, preview, .. } if account == UNKNOWN_ACCOUNT && preview == "[sticker]"
        ));
    }

    #[tokio::test]
    async fn test_malformed_siblings_do_not_abort() {
        let mut h = harness(LoggingConfig::default());
        let body = serde_json::to_vec(&json!({
            "entry": [
                {"changes": "not-a-list"},
                {"id": "no-changes"},
                {"changes": [
                    {"value": {"messages": "oops"}},
                    {"value": {
                        "metadata": {"phone_number_id": "PN2"},
                        "messages": [{"from": "9", "type": "text", "text": {"body": "still here"}}]
                    }}
                ]}
            ]
        }))
        .unwrap();
        let sig = sign_payload(SECRET, &body);
        h.processor.handle(Some(&sig), &body).await.unwrap();

        let received: Vec<_> = h
            .drain()
            .into_iter()
            .filter(|e| matches!(e, WaEvent::MessageReceived { .. }))
            .collect();
        assert_eq!(received.len(), 1);
    }

    #[tokio::test]
    async fn test_non_json_verified_body_is_empty_payload() {
        let mut h = harness(LoggingConfig::default());
        let body = b"definitely not json";
        let sig = sign_payload(SECRET, body);
        let reply = h.processor.handle(Some(&sig), body).await.unwrap();
        assert_eq!(reply, WebhookReply::Accepted);
        let events = h.drain();
        assert_eq!(events, vec![WaEvent::WebhookReceived { payload: json!({}) }]);
    }

    #[tokio::test]
    async fn test_logging_toggles_off() {
        let mut h = harness(LoggingConfig::disabled());
        let body = callback(
            "PN2",
            json!({"messages": [{"from": "1", "id": "x", "type": "text", "text": {"body": "yo"}}]}),
        );
        let sig = sign_payload(SECRET, &body);
        h.processor.handle(Some(&sig), &body).await.unwrap();

        assert_eq!(h.drain().len(), 2);
        assert!(h.store.messages().await.is_empty());
        assert!(h.store.webhook_logs().await.is_empty());
    }

    #[test]
    fn test_preview_table() {
        let cases = [
            (json!({"type": "text", "text": {"body": "hello"}}), "hello"),
            (json!({"type": "image", "image": {"caption": "look"}}), "look"),
            (json!({"type": "image", "image": {}}), "[image]"),
            (json!({"type": "video"}), "[video]"),
            (json!({"type": "document", "document": {"caption": "cv.pdf"}}), "cv.pdf"),
            (json!({"type": "audio"}), "[audio]"),
            (json!({"type": "contacts", "contacts": []}), "[contacts]"),
            (json!({"type": "location", "location": {"name": "KLCC"}}), "KLCC"),
            (json!({"type": "location", "location": {"name": ""}}), "[location]"),
            (
                json!({"type": "interactive", "interactive": {"button_reply": {"title": "Yes"}}}),
                "Yes",
            ),
            (
                json!({"type": "interactive", "interactive": {"list_reply": {"title": "Option B"}}}),
                "Option B",
            ),
            (json!({"type": "interactive", "interactive": {}}), "[interactive]"),
            (json!({"type": "order"}), "[order]"),
            (json!({"text": {"body": "untyped"}}), "untyped"),
        ];
        for (msg, want) in cases {
            assert_eq!(message_preview(&msg), want, "{msg}");
        }
    }
}
