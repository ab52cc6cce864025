//! # wamux-whatsapp – multi-tenant WhatsApp Business Cloud API core
//!
//! Addresses several WhatsApp Business accounts (tenants) through one
//! interface, built against the **Meta Cloud API v24.0** by default.
//!
//! ## Capabilities
//!
//! - **Accounts** – resolve a tenant by name from config or a database.
//! - **Requests** – bearer-authenticated Graph API calls with audit logging
//!   and auth / rate-limit / generic error classification.
//! - **Messaging** – text, media, location, contacts, interactive, template
//!   and reaction messages composed as a draft with a deep-merge overlay.
//! - **Templates** – cursor pagination, create / update / delete, and
//!   reconciliation of a local mirror.
//! - **Webhooks** – verify-token handshake, HMAC-SHA256 signature check
//!   against every tenant, message previews and status tracking.
//!
//! Persistence is reached only through [`store::WaStore`] and
//! [`accounts::AccountStore`].

pub mod types;
pub mod error;
pub mod config;
pub mod accounts;
pub mod store;
pub mod merge;
pub mod auth;
pub mod events;
pub mod api_client;
pub mod messaging;
pub mod templates;
pub mod webhooks;
pub mod service;

// Re-exports
pub use accounts::{AccountStore, ConfigAccountStore};
pub use api_client::{CloudApiClient, RawResponse};
pub use config::{AccountConfig, AccountDriver, WaConfig};
pub use error::{ApiErrorDetail, WaResult, WhatsAppError};
pub use events::{EventSink, WaEvent};
pub use messaging::{Draft, MessageBuilder, MessageKind, MessageResponse, TemplateComponent};
pub use service::{MessageSyncReport, WhatsApp};
pub use store::{MemoryStore, WaStore};
pub use templates::{TemplatePage, TemplateQuery, TemplateResponse, TemplateService, TemplateSyncReport};
pub use types::*;
pub use webhooks::{message_preview, VerifyQuery, WebhookProcessor, WebhookReply};
