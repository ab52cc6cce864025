//! Persistence surface consumed by the core, plus an in-memory backend.

use crate::whatsapp::error::WaResult;
use crate::whatsapp::types::*;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;

/// Everything the core writes or reads back.
///
/// Consistency (uniqueness of `(account_name, remote_template_id)`, lookup
/// by `remote_message_id`) is the implementation's responsibility.
#[async_trait]
pub trait WaStore: Send + Sync {
    async fn log_api_call(&self, entry: ApiCallLog) -> WaResult<()>;

    async fn log_webhook(&self, entry: WebhookLog) -> WaResult<()>;

    async fn insert_message(&self, record: MessageRecord) -> WaResult<()>;

    /// Overwrite the status of every record with this remote id. Returns the
    /// number of records touched.
    async fn update_message_status(
        &self,
        remote_message_id: &str,
        status: MessageStatus,
        at: DateTime<Utc>,
    ) -> WaResult<u64>;

    /// Outbound records of one tenant still in `status`, oldest first.
    async fn messages_with_status(
        &self,
        account_name: &str,
        status: MessageStatus,
        since: Option<DateTime<Utc>>,
    ) -> WaResult<Vec<MessageRecord>>;

    async fn upsert_template(&self, record: TemplateRecord) -> WaResult<()>;

    async fn templates(&self, account_name: &str) -> WaResult<Vec<TemplateRecord>>;

    /// Delete the tenant's templates whose remote id is not in `keep`.
    async fn delete_templates_except(&self, account_name: &str, keep: &[String]) -> WaResult<u64>;

    async fn delete_templates_named(&self, account_name: &str, name: &str) -> WaResult<u64>;
}

#[derive(Default)]
struct MemoryTables {
    api_calls: Vec<ApiCallLog>,
    webhooks: Vec<WebhookLog>,
    messages: Vec<MessageRecord>,
    templates: Vec<TemplateRecord>,
}

/// Process-local store. Used by tests and when no database is configured.
#[derive(Default)]
pub struct MemoryStore {
    tables: RwLock<MemoryTables>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn api_calls(&self) -> Vec<ApiCallLog> {
        self.tables.read().await.api_calls.clone()
    }

    pub async fn webhook_logs(&self) -> Vec<WebhookLog> {
        self.tables.read().await.webhooks.clone()
    }

    pub async fn messages(&self) -> Vec<MessageRecord> {
        self.tables.read().await.messages.clone()
    }
}

#[async_trait]
impl WaStore for MemoryStore {
    async fn log_api_call(&self, entry: ApiCallLog) -> WaResult<()> {
        self.tables.write().await.api_calls.push(entry);
        Ok(())
    }

    async fn log_webhook(&self, entry: WebhookLog) -> WaResult<()> {
        self.tables.write().await.webhooks.push(entry);
        Ok(())
    }

    async fn insert_message(&self, record: MessageRecord) -> WaResult<()> {
        self.tables.write().await.messages.push(record);
        Ok(())
    }

    async fn update_message_status(
        &self,
        remote_message_id: &str,
        status: MessageStatus,
        at: DateTime<Utc>,
    ) -> WaResult<u64> {
        let mut tables = self.tables.write().await;
        let mut touched = 0;
        for rec in tables
            .messages
            .iter_mut()
            .filter(|m| m.remote_message_id.as_deref() == Some(remote_message_id))
        {
            rec.status = status;
            rec.status_at = at;
            touched += 1;
        }
        Ok(touched)
    }

    async fn messages_with_status(
        &self,
        account_name: &str,
        status: MessageStatus,
        since: Option<DateTime<Utc>>,
    ) -> WaResult<Vec<MessageRecord>> {
        let tables = self.tables.read().await;
        let mut out: Vec<MessageRecord> = tables
            .messages
            .iter()
            .filter(|m| {
                m.account_name == account_name
                    && m.direction == MessageDirection::Outbound
                    && m.status == status
                    && since.map_or(true, |s| m.created_at >= s)
            })
            .cloned()
            .collect();
        out.sort_by_key(|m| m.created_at);
        Ok(out)
    }

    async fn upsert_template(&self, record: TemplateRecord) -> WaResult<()> {
        let mut tables = self.tables.write().await;
        match tables.templates.iter_mut().find(|t| {
            t.account_name == record.account_name
                && t.remote_template_id == record.remote_template_id
        }) {
            Some(existing) => *existing = record,
            None => tables.templates.push(record),
        }
        Ok(())
    }

    async fn templates(&self, account_name: &str) -> WaResult<Vec<TemplateRecord>> {
        Ok(self
            .tables
            .read()
            .await
            .templates
            .iter()
            .filter(|t| t.account_name == account_name)
            .cloned()
            .collect())
    }

    async fn delete_templates_except(&self, account_name: &str, keep: &[String]) -> WaResult<u64> {
        let mut tables = self.tables.write().await;
        let before = tables.templates.len();
        tables
            .templates
            .retain(|t| t.account_name != account_name || keep.contains(&t.remote_template_id));
        Ok((before - tables.templates.len()) as u64)
    }

    async fn delete_templates_named(&self, account_name: &str, name: &str) -> WaResult<u64> {
        let mut tables = self.tables.write().await;
        let before = tables.templates.len();
        tables
            .templates
            .retain(|t| t.account_name != account_name || t.name != name);
        Ok((before - tables.templates.len()) as u64)
    }
}
