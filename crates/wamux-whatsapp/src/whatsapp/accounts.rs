//! Tenant account lookup.

use crate::whatsapp::config::AccountConfig;
use crate::whatsapp::error::{WaResult, WhatsAppError};
use crate::whatsapp::types::Account;
use async_trait::async_trait;
use std::collections::BTreeMap;

/// Resolves a tenant name to its credentials.
///
/// `find` is an exact, case-sensitive match. Picking a default tenant is the
/// caller's job, never the store's.
#[async_trait]
pub trait AccountStore: Send + Sync {
    async fn find(&self, name: &str) -> WaResult<Account>;

    async fn list_all(&self) -> WaResult<Vec<Account>>;
}

/// Accounts read from the static `accounts` mapping of the configuration.
#[derive(Debug, Clone, Default)]
pub struct ConfigAccountStore {
    accounts: BTreeMap<String, AccountConfig>,
}

impl ConfigAccountStore {
    pub fn new(accounts: BTreeMap<String, AccountConfig>) -> Self {
        Self { accounts }
    }
}

#[async_trait]
impl AccountStore for ConfigAccountStore {
    async fn find(&self, name: &str) -> WaResult<Account> {
        self.accounts
            .get(name)
            .map(|cfg| cfg.to_account(name))
            .ok_or_else(|| WhatsAppError::AccountNotFound(name.to_string()))
    }

    async fn list_all(&self) -> WaResult<Vec<Account>> {
        Ok(self
            .accounts
            .iter()
            .map(|(name, cfg)| cfg.to_account(name))
            .collect())
    }
}
