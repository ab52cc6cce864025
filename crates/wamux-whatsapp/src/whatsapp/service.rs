//! High-level multi-tenant facade.
//!
//! `WhatsApp` resolves a tenant (explicit override or the configured
//! default) and hands out components bound to it. It also hosts the two
//! maintenance sweeps: template reconciliation and message status refresh.

use crate::whatsapp::accounts::AccountStore;
use crate::whatsapp::api_client::CloudApiClient;
use crate::whatsapp::config::WaConfig;
use crate::whatsapp::error::{WaResult, WhatsAppError};
use crate::whatsapp::events::EventSink;
use crate::whatsapp::messaging::MessageBuilder;
use crate::whatsapp::store::WaStore;
use crate::whatsapp::templates::{TemplateService, TemplateSyncReport};
use crate::whatsapp::types::{Account, MessageStatus};
use crate::whatsapp::webhooks::WebhookProcessor;
use chrono::{DateTime, Utc};
use log::{debug, info, warn};
use serde::Serialize;
use serde_json::json;
use std::sync::Arc;

/// Outcome of a status refresh for one tenant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MessageSyncReport {
    pub account: String,
    pub pending: usize,
    pub updated: usize,
    pub failed: usize,
}

/// Entry point: tenant resolution plus component construction.
#[derive(Clone)]
pub struct WhatsApp {
    config: Arc<WaConfig>,
    accounts: Arc<dyn AccountStore>,
    store: Option<Arc<dyn WaStore>>,
    http: reqwest::Client,
    account_name: Option<String>,
}

impl WhatsApp {
    pub fn new(
        config: WaConfig,
        accounts: Arc<dyn AccountStore>,
        store: Option<Arc<dyn WaStore>>,
    ) -> Self {
        Self {
            config: Arc::new(config),
            accounts,
            store,
            http: reqwest::Client::new(),
            account_name: None,
        }
    }

    /// A copy bound to `name`. The receiver is left untouched.
    pub fn account(&self, name: impl Into<String>) -> Self {
        Self {
            account_name: Some(name.into()),
            ..self.clone()
        }
    }

    /// Tenant this handle resolves to.
    pub fn account_name(&self) -> &str {
        self.account_name
            .as_deref()
            .unwrap_or(&self.config.default_account)
    }

    pub fn config(&self) -> &WaConfig {
        &self.config
    }

    pub fn accounts(&self) -> &Arc<dyn AccountStore> {
        &self.accounts
    }

    pub fn store(&self) -> Option<&Arc<dyn WaStore>> {
        self.store.as_ref()
    }

    fn client_for(&self, account: Account) -> CloudApiClient {
        let client = CloudApiClient::new(account, self.config.api_base(), &self.config.api_version)
            .with_http_client(self.http.clone());
        match &self.store {
            Some(store) => client.with_store(store.clone(), self.config.logging),
            None => client,
        }
    }

    /// Executor bound to the resolved tenant.
    pub async fn client(&self) -> WaResult<CloudApiClient> {
        let account = self.accounts.find(self.account_name()).await?;
        Ok(self.client_for(account))
    }

    pub async fn message(&self) -> WaResult<MessageBuilder> {
        Ok(MessageBuilder::new(self.client().await?))
    }

    pub async fn template(&self) -> WaResult<TemplateService> {
        Ok(TemplateService::new(self.client().await?))
    }

    /// Processor for inbound callbacks, checking every known tenant.
    pub fn webhook_processor(&self, events: Arc<dyn EventSink>) -> WebhookProcessor {
        WebhookProcessor::new(
            self.accounts.clone(),
            self.store.clone(),
            self.config.logging,
            events,
        )
    }

    async fn target_accounts(&self, account: Option<&str>) -> WaResult<Vec<Account>> {
        match account {
            Some(name) => Ok(vec![self.accounts.find(name).await?]),
            None => self.accounts.list_all().await,
        }
    }

    // ─── Maintenance sweeps ──────────────────────────────────────────

    /// Reconcile the local template mirror for one tenant, or all of them.
    pub async fn sync_templates(&self, account: Option<&str>) -> WaResult<Vec<TemplateSyncReport>> {
        let mut reports = Vec::new();
        for acct in self.target_accounts(account).await? {
            info!("Syncing templates for account: {}", acct.name);
            let report = TemplateService::new(self.client_for(acct)).sync_all().await?;
            info!(
                "  Done. Total: {} templates, {} removed.",
                report.seen, report.deleted
            );
            reports.push(report);
        }
        Ok(reports)
    }

    /// Re-fetch outbound messages still marked `sent` and store any newer
    /// status. A failure on one message is logged and the sweep goes on.
    pub async fn sync_message_statuses(
        &self,
        account: Option<&str>,
        since: Option<DateTime<Utc>>,
    ) -> WaResult<Vec<MessageSyncReport>> {
        let store = self
            .store
            .clone()
            .ok_or_else(|| WhatsAppError::config("message sync requires a store"))?;

        let mut reports = Vec::new();
        for acct in self.target_accounts(account).await? {
            info!("Syncing messages for account: {}", acct.name);
            let pending = store
                .messages_with_status(&acct.name, MessageStatus::Sent, since)
                .await?;
            let mut report = MessageSyncReport {
                account: acct.name.clone(),
                pending: pending.len(),
                updated: 0,
                failed: 0,
            };
            let client = self.client_for(acct);

            for record in pending {
                let Some(remote_id) = record.remote_message_id.as_deref() else {
                    debug!("Skipping outbound record without remote id");
                    continue;
                };
                match client.get(remote_id, &json!({})).await {
                    Ok(resp) => {
                        let fresh = resp.body["status"].as_str().and_then(MessageStatus::parse);
                        let Some(status) = fresh.filter(|s| *s != record.status) else {
                            continue;
                        };
                        match store.update_message_status(remote_id, status, Utc::now()).await {
                            Ok(_) => report.updated += 1,
                            Err(e) => {
                                warn!("  Failed to store status of message {}: {}", remote_id, e);
                                report.failed += 1;
                            }
                        }
                    }
                    Err(e) => {
                        warn!("  Failed to sync message {}: {}", remote_id, e);
                        report.failed += 1;
                    }
                }
            }

            info!("  Done. Updated {} messages.", report.updated);
            reports.push(report);
        }
        Ok(reports)
    }
}
