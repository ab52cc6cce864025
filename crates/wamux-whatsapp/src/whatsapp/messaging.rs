//! Compose and send one outbound message at a time.
//!
//! A [`MessageBuilder`] holds a [`Draft`]: the recipient, exactly one active
//! [`MessageKind`], and a free-form overlay that is deep-merged over the
//! generated payload right before sending.
//!
//! ```ignore
//! let mut msg = wa.message().await?;
//! let resp = msg
//!     .to("60123456789")
//!     .template("order_update", "en")
//!     .component("body", json!([{"type": "text", "text": "#1042"}]))
//!     .send()
//!     .await?;
//! ```

use crate::whatsapp::api_client::CloudApiClient;
use crate::whatsapp::error::WaResult;
use crate::whatsapp::merge::deep_merge;
use crate::whatsapp::types::{MessageDirection, MessageRecord, MessageStatus};
use chrono::Utc;
use log::{debug, error};
use serde_json::{json, Map, Value};

/// One entry of `template.components`.
#[derive(Debug, Clone, PartialEq)]
pub struct TemplateComponent {
    pub component_type: String,
    pub parameters: Value,
}

/// The active message type and its fields. Switching type replaces the
/// whole value, so nothing of the previous type survives.
#[derive(Debug, Clone, PartialEq)]
pub enum MessageKind {
    Text {
        body: String,
        preview_url: bool,
    },
    Image {
        link: String,
        caption: Option<String>,
    },
    Video {
        link: String,
        caption: Option<String>,
    },
    Audio {
        link: String,
    },
    Document {
        link: String,
        filename: Option<String>,
        caption: Option<String>,
    },
    Sticker {
        link: String,
    },
    Location {
        latitude: f64,
        longitude: f64,
        name: Option<String>,
        address: Option<String>,
    },
    Contacts(Value),
    Interactive(Value),
    Template {
        name: String,
        language: String,
        components: Vec<TemplateComponent>,
    },
    Reaction {
        message_id: String,
        emoji: String,
    },
}

impl MessageKind {
    /// Value of the payload's `type` key, which is also the key the
    /// fragment is stored under.
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::Text { .. } => "text",
            Self::Image { .. } => "image",
            Self::Video { .. } => "video",
            Self::Audio { .. } => "audio",
            Self::Document { .. } => "document",
            Self::Sticker { .. } => "sticker",
            Self::Location { .. } => "location",
            Self::Contacts(_) => "contacts",
            Self::Interactive(_) => "interactive",
            Self::Template { .. } => "template",
            Self::Reaction { .. } => "reaction",
        }
    }

    fn fragment(&self) -> Value {
        match self {
            Self::Text { body, preview_url } => json!({
                "preview_url": preview_url,
                "body": body,
            }),
            Self::Image { link, caption } | Self::Video { link, caption } => {
                let mut obj = json!({ "link": link });
                if let Some(c) = caption {
                    obj["caption"] = json!(c);
                }
                obj
            }
            Self::Audio { link } | Self::Sticker { link } => json!({ "link": link }),
            Self::Document {
                link,
                filename,
                caption,
            } => {
                let mut obj = json!({ "link": link });
                if let Some(f) = filename {
                    obj["filename"] = json!(f);
                }
                if let Some(c) = caption {
                    obj["caption"] = json!(c);
                }
                obj
            }
            Self::Location {
                latitude,
                longitude,
                name,
                address,
            } => {
                let mut obj = json!({
                    "latitude": latitude,
                    "longitude": longitude,
                });
                if let Some(n) = name {
                    obj["name"] = json!(n);
                }
                if let Some(a) = address {
                    obj["address"] = json!(a);
                }
                obj
            }
            Self::Contacts(v) | Self::Interactive(v) => v.clone(),
            Self::Template {
                name,
                language,
                components,
            } => {
                let mut obj = json!({
                    "name": name,
                    "language": { "code": language },
                });
                if !components.is_empty() {
                    obj["components"] = components
                        .iter()
                        .map(|c| {
                            json!({
                                "type": c.component_type,
                                "parameters": c.parameters,
                            })
                        })
                        .collect();
                }
                obj
            }
            Self::Reaction { message_id, emoji } => json!({
                "message_id": message_id,
                "emoji": emoji,
            }),
        }
    }
}

/// In-progress state of one outbound message.
#[derive(Debug, Clone, PartialEq)]
pub struct Draft {
    pub to: Option<String>,
    pub kind: Option<MessageKind>,
    pub overlay: Map<String, Value>,
}

impl Default for Draft {
    fn default() -> Self {
        Self {
            to: None,
            kind: None,
            overlay: Map::new(),
        }
    }
}

impl Draft {
    /// The request body `send()` would post.
    pub fn payload(&self) -> Value {
        let mut payload = json!({ "messaging_product": "whatsapp" });
        if let Some(to) = &self.to {
            payload["to"] = json!(to);
        }
        if let Some(kind) = &self.kind {
            let key = kind.type_name();
            payload["type"] = json!(key);
            payload[key] = kind.fragment();
        }
        if !self.overlay.is_empty() {
            deep_merge(&mut payload, Value::Object(self.overlay.clone()));
        }
        payload
    }

    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }
}

/// Parsed body of a `/messages` response.
#[derive(Debug, Clone, PartialEq)]
pub struct MessageResponse {
    data: Value,
}

impl MessageResponse {
    pub fn new(data: Value) -> Self {
        Self { data }
    }

    pub fn is_successful(&self) -> bool {
        self.data.get("error").is_none()
    }

    /// `messages[0].id`.
    pub fn message_id(&self) -> Option<&str> {
        self.data["messages"][0]["id"].as_str()
    }

    pub fn contacts(&self) -> &[Value] {
        self.data["contacts"]
            .as_array()
            .map(Vec::as_slice)
            .unwrap_or_default()
    }

    pub fn as_json(&self) -> &Value {
        &self.data
    }

    pub fn into_json(self) -> Value {
        self.data
    }
}

/// Message sender bound to one tenant.
///
/// Driven through `&mut self`; one builder composes one message at a time.
pub struct MessageBuilder {
    client: CloudApiClient,
    draft: Draft,
}

impl MessageBuilder {
    pub fn new(client: CloudApiClient) -> Self {
        Self {
            client,
            draft: Draft::default(),
        }
    }

    pub fn draft(&self) -> &Draft {
        &self.draft
    }

    pub fn client(&self) -> &CloudApiClient {
        &self.client
    }

    fn set_kind(&mut self, kind: MessageKind) -> &mut Self {
        self.draft.kind = Some(kind);
        self
    }

    pub fn to(&mut self, recipient: impl Into<String>) -> &mut Self {
        self.draft.to = Some(recipient.into());
        self
    }

    // ─── Types ───────────────────────────────────────────────────────

    pub fn text(&mut self, body: impl Into<String>, preview_url: bool) -> &mut Self {
        self.set_kind(MessageKind::Text {
            body: body.into(),
            preview_url,
        })
    }

    pub fn image(&mut self, link: impl Into<String>, caption: Option<&str>) -> &mut Self {
        self.set_kind(MessageKind::Image {
            link: link.into(),
            caption: caption.map(String::from),
        })
    }

    pub fn video(&mut self, link: impl Into<String>, caption: Option<&str>) -> &mut Self {
        self.set_kind(MessageKind::Video {
            link: link.into(),
            caption: caption.map(String::from),
        })
    }

    pub fn audio(&mut self, link: impl Into<String>) -> &mut Self {
        self.set_kind(MessageKind::Audio { link: link.into() })
    }

    pub fn document(
        &mut self,
        link: impl Into<String>,
        filename: Option<&str>,
        caption: Option<&str>,
    ) -> &mut Self {
        self.set_kind(MessageKind::Document {
            link: link.into(),
            filename: filename.map(String::from),
            caption: caption.map(String::from),
        })
    }

    pub fn sticker(&mut self, link: impl Into<String>) -> &mut Self {
        self.set_kind(MessageKind::Sticker { link: link.into() })
    }

    pub fn location(
        &mut self,
        latitude: f64,
        longitude: f64,
        name: Option<&str>,
        address: Option<&str>,
    ) -> &mut Self {
        self.set_kind(MessageKind::Location {
            latitude,
            longitude,
            name: name.map(String::from),
            address: address.map(String::from),
        })
    }

    /// Contact cards, sent as the `contacts` type.
    pub fn contact(&mut self, contacts: Value) -> &mut Self {
        self.set_kind(MessageKind::Contacts(contacts))
    }

    pub fn interactive(&mut self, interactive: Value) -> &mut Self {
        self.set_kind(MessageKind::Interactive(interactive))
    }

    /// Activate a template message. Always starts with no components.
    pub fn template(&mut self, name: impl Into<String>, language: impl Into<String>) -> &mut Self {
        self.set_kind(MessageKind::Template {
            name: name.into(),
            language: language.into(),
            components: Vec::new(),
        })
    }

    /// Append a template component. Ignored unless a template is active.
    pub fn component(&mut self, component_type: impl Into<String>, parameters: Value) -> &mut Self {
        match &mut self.draft.kind {
            Some(MessageKind::Template { components, .. }) => {
                components.push(TemplateComponent {
                    component_type: component_type.into(),
                    parameters,
                });
            }
            _ => debug!("component() ignored: no template is active"),
        }
        self
    }

    pub fn reaction(&mut self, message_id: impl Into<String>, emoji: impl Into<String>) -> &mut Self {
        self.set_kind(MessageKind::Reaction {
            message_id: message_id.into(),
            emoji: emoji.into(),
        })
    }

    // ─── Overlay ─────────────────────────────────────────────────────

    /// Deep-merge `fragment` into the overlay. Non-object fragments are
    /// ignored since the overlay is keyed.
    pub fn payload(&mut self, fragment: Value) -> &mut Self {
        match fragment {
            Value::Object(map) => {
                let mut overlay = Value::Object(std::mem::take(&mut self.draft.overlay));
                deep_merge(&mut overlay, Value::Object(map));
                if let Value::Object(map) = overlay {
                    self.draft.overlay = map;
                }
            }
            other => debug!("payload() ignored non-object fragment: {}", other),
        }
        self
    }

    /// The body that `send()` would post, without sending it.
    pub fn preview(&self) -> Value {
        self.draft.payload()
    }

    // ─── Send ────────────────────────────────────────────────────────

    /// POST the draft to `{phone_number_id}/messages`.
    ///
    /// On success the draft is reset. On error it is kept so the same
    /// message can be retried.
    pub async fn send(&mut self) -> WaResult<MessageResponse> {
        let payload = self.draft.payload();
        let account = self.client.account();
        let endpoint = format!("{}/messages", account.phone_number_id);

        debug!(
            "Sending {} message [account={}]",
            payload["type"].as_str().unwrap_or("untyped"),
            account.name
        );
        let resp = self.client.post(&endpoint, &payload).await?;
        let response = MessageResponse::new(resp.body);

        self.record(&payload, &response).await;
        self.draft = Draft::default();

        Ok(response)
    }

    async fn record(&self, payload: &Value, response: &MessageResponse) {
        if !self.client.logging().messages {
            return;
        }
        let Some(store) = self.client.store() else {
            return;
        };
        let account = self.client.account();
        let now = Utc::now();
        let record = MessageRecord {
            account_name: account.name.clone(),
            remote_message_id: response.message_id().map(String::from),
            direction: MessageDirection::Outbound,
            to: payload["to"].as_str().map(String::from),
            from: Some(account.phone_number_id.clone()),
            message_type: payload["type"].as_str().unwrap_or("unknown").to_string(),
            content: payload.clone(),
            status: if response.is_successful() {
                MessageStatus::Sent
            } else {
                MessageStatus::Failed
            },
            status_at: now,
            created_at: now,
        };
        if let Err(e) = store.insert_message(record).await {
            error!("Failed to record outbound message: {}", e);
        }
    }
}
