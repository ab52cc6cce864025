//! Shared data types: tenant accounts, logging toggles, persisted records.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

// ═══════════════════════════════════════════════════════════════════════
//  Accounts
// ═══════════════════════════════════════════════════════════════════════

/// One set of Cloud API credentials, addressed by a unique name.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Account {
    pub name: String,
    pub access_token: String,
    pub phone_number_id: String,
    pub business_account_id: String,
    #[serde(default)]
    pub webhook_verify_token: Option<String>,
    #[serde(default)]
    pub webhook_secret: Option<String>,
}

impl fmt::Debug for Account {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Account")
            .field("name", &self.name)
            .field("access_token", &"<redacted>")
            .field("phone_number_id", &self.phone_number_id)
            .field("business_account_id", &self.business_account_id)
            .field(
                "webhook_verify_token",
                &self.webhook_verify_token.as_ref().map(|_| "<redacted>"),
            )
            .field(
                "webhook_secret",
                &self.webhook_secret.as_ref().map(|_| "<redacted>"),
            )
            .finish()
    }
}

// ═══════════════════════════════════════════════════════════════════════
//  Logging toggles
// ═══════════════════════════════════════════════════════════════════════

/// Which records get persisted. Threaded into each component explicitly.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "enabled")]
    pub api_requests: bool,
    #[serde(default = "enabled")]
    pub messages: bool,
    #[serde(default = "enabled")]
    pub webhooks: bool,
    #[serde(default = "enabled")]
    pub templates: bool,
}

fn enabled() -> bool {
    true
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            api_requests: true,
            messages: true,
            webhooks: true,
            templates: true,
        }
    }
}

impl LoggingConfig {
    /// Everything off.
    pub fn disabled() -> Self {
        Self {
            api_requests: false,
            messages: false,
            webhooks: false,
            templates: false,
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════
//  Enums
// ═══════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageDirection {
    Outbound,
    Inbound,
}

impl MessageDirection {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Outbound => "outbound",
            Self::Inbound => "inbound",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "outbound" => Some(Self::Outbound),
            "inbound" => Some(Self::Inbound),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageStatus {
    Sent,
    Delivered,
    Read,
    Failed,
}

impl MessageStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Sent => "sent",
            Self::Delivered => "delivered",
            Self::Read => "read",
            Self::Failed => "failed",
        }
    }

    /// Exact match on the wire value; anything else is not a known status.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "sent" => Some(Self::Sent),
            "delivered" => Some(Self::Delivered),
            "read" => Some(Self::Read),
            "failed" => Some(Self::Failed),
            _ => None,
        }
    }
}

/// Review state of a message template.
///
/// The platform has more states than the three we model; those are kept
/// verbatim in `Other`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum TemplateStatus {
    Approved,
    Pending,
    Rejected,
    Other(String),
}

impl TemplateStatus {
    pub fn as_str(&self) -> &str {
        match self {
            Self::Approved => "APPROVED",
            Self::Pending => "PENDING",
            Self::Rejected => "REJECTED",
            Self::Other(s) => s,
        }
    }
}

impl From<&str> for TemplateStatus {
    fn from(s: &str) -> Self {
        match s {
            "APPROVED" => Self::Approved,
            "PENDING" => Self::Pending,
            "REJECTED" => Self::Rejected,
            other => Self::Other(other.to_string()),
        }
    }
}

impl From<String> for TemplateStatus {
    fn from(s: String) -> Self {
        Self::from(s.as_str())
    }
}

impl From<TemplateStatus> for String {
    fn from(s: TemplateStatus) -> Self {
        s.as_str().to_string()
    }
}

/// Classification of one webhook change for the audit log.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WebhookEventType {
    Message,
    Status,
    Unknown,
}

impl WebhookEventType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Message => "message",
            Self::Status => "status",
            Self::Unknown => "unknown",
        }
    }

    pub fn parse(s: &str) -> Self {
        match s {
            "message" => Self::Message,
            "status" => Self::Status,
            _ => Self::Unknown,
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════
//  Persisted records
// ═══════════════════════════════════════════════════════════════════════

/// A sent or received message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MessageRecord {
    pub account_name: String,
    pub remote_message_id: Option<String>,
    pub direction: MessageDirection,
    pub to: Option<String>,
    pub from: Option<String>,
    pub message_type: String,
    /// Raw payload as sent or received.
    pub content: Value,
    pub status: MessageStatus,
    pub status_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
}

/// Local mirror of one remote template.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TemplateRecord {
    pub account_name: String,
    pub remote_template_id: String,
    pub name: String,
    pub language: String,
    pub category: String,
    pub status: TemplateStatus,
    pub components: Value,
}

/// Audit entry for one outbound API call. Append-only.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApiCallLog {
    pub account_name: String,
    pub method: String,
    pub endpoint: String,
    pub request_payload: Value,
    pub response_payload: Value,
    pub status_code: u16,
    pub duration_ms: u64,
    pub created_at: DateTime<Utc>,
}

/// Audit entry for one webhook change. Append-only.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WebhookLog {
    pub account_name: String,
    pub event_type: WebhookEventType,
    pub payload: Value,
    pub processed_at: DateTime<Utc>,
}
