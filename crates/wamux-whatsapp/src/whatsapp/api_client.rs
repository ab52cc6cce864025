//! HTTP client for the WhatsApp Business Cloud API (Meta Graph API).
//!
//! One client is bound to one tenant. Every call is timed, optionally
//! written to the API audit log, and non-2xx responses are classified into
//! [`WhatsAppError::Auth`], [`WhatsAppError::RateLimited`] or
//! [`WhatsAppError::Api`]. There is no retry: a failure surfaces once.

use crate::whatsapp::error::{WaResult, WhatsAppError};
use crate::whatsapp::store::WaStore;
use crate::whatsapp::types::{Account, ApiCallLog, LoggingConfig};
use chrono::Utc;
use log::{debug, error, warn};
use reqwest::header::ACCEPT;
use reqwest::Method;
use serde_json::Value;
use std::fmt;
use std::sync::Arc;
use std::time::Instant;

/// Status and parsed body of a 2xx response.
#[derive(Debug, Clone, PartialEq)]
pub struct RawResponse {
    pub status: u16,
    /// Parsed JSON, or `{}` when the body was empty or not JSON.
    pub body: Value,
}

/// Low-level HTTP client for the Meta Graph API.
#[derive(Clone)]
pub struct CloudApiClient {
    http: reqwest::Client,
    account: Arc<Account>,
    base_url: String,
    api_version: String,
    store: Option<Arc<dyn WaStore>>,
    logging: LoggingConfig,
}

impl fmt::Debug for CloudApiClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CloudApiClient")
            .field("account", &self.account)
            .field("base_url", &self.base_url)
            .field("api_version", &self.api_version)
            .field("has_store", &self.store.is_some())
            .field("logging", &self.logging)
            .finish()
    }
}

impl CloudApiClient {
    /// Create a client for `account`. Nothing is persisted until a store is
    /// attached with [`with_store`](Self::with_store).
    pub fn new(account: Account, base_url: impl Into<String>, api_version: impl Into<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            account: Arc::new(account),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_version: api_version.into(),
            store: None,
            logging: LoggingConfig::disabled(),
        }
    }

    /// Share a connection pool with other clients.
    pub fn with_http_client(mut self, http: reqwest::Client) -> Self {
        self.http = http;
        self
    }

    pub fn with_store(mut self, store: Arc<dyn WaStore>, logging: LoggingConfig) -> Self {
        self.store = Some(store);
        self.logging = logging;
        self
    }

    pub fn account(&self) -> &Account {
        &self.account
    }

    pub fn store(&self) -> Option<&Arc<dyn WaStore>> {
        self.store.as_ref()
    }

    pub fn logging(&self) -> LoggingConfig {
        self.logging
    }

    /// Build a Graph API URL: `{base}/{version}/{endpoint}`.
    pub fn url(&self, endpoint: &str) -> String {
        format!(
            "{}/{}/{}",
            self.base_url,
            self.api_version,
            endpoint.trim_start_matches('/')
        )
    }

    // ─── HTTP verbs ──────────────────────────────────────────────────

    /// GET with `data` as query parameters.
    pub async fn get(&self, endpoint: &str, data: &Value) -> WaResult<RawResponse> {
        self.execute(Method::GET, endpoint, data).await
    }

    /// POST with `data` as a JSON body.
    pub async fn post(&self, endpoint: &str, data: &Value) -> WaResult<RawResponse> {
        self.execute(Method::POST, endpoint, data).await
    }

    /// PUT with `data` as a JSON body.
    pub async fn put(&self, endpoint: &str, data: &Value) -> WaResult<RawResponse> {
        self.execute(Method::PUT, endpoint, data).await
    }

    /// DELETE with `data` as query parameters.
    pub async fn delete(&self, endpoint: &str, data: &Value) -> WaResult<RawResponse> {
        self.execute(Method::DELETE, endpoint, data).await
    }

    // ─── Core request method ─────────────────────────────────────────

    async fn execute(&self, method: Method, endpoint: &str, data: &Value) -> WaResult<RawResponse> {
        let url = self.url(endpoint);
        debug!("{} {} [account={}]", method, url, self.account.name);

        let mut req = self
            .http
            .request(method.clone(), &url)
            .bearer_auth(&self.account.access_token)
            .header(ACCEPT, "application/json");

        req = if method == Method::GET || method == Method::DELETE {
            req.query(&query_pairs(data))
        } else {
            req.json(data)
        };

        let started = Instant::now();
        let resp = req.send().await?;
        let status = resp.status().as_u16();
        let text = resp.text().await?;
        let duration_ms = started.elapsed().as_millis() as u64;

        let body = parse_body(&text);

        self.audit(&method, endpoint, data, &body, status, duration_ms)
            .await;

        if !(200..300).contains(&status) {
            let err = WhatsAppError::from_api_response(status, &body);
            warn!(
                "{} {} failed for account [{}]: {}",
                method, endpoint, self.account.name, err
            );
            return Err(err);
        }

        Ok(RawResponse { status, body })
    }

    async fn audit(
        &self,
        method: &Method,
        endpoint: &str,
        request: &Value,
        response: &Value,
        status_code: u16,
        duration_ms: u64,
    ) {
        if !self.logging.api_requests {
            return;
        }
        let Some(store) = &self.store else {
            return;
        };
        let entry = ApiCallLog {
            account_name: self.account.name.clone(),
            method: method.as_str().to_uppercase(),
            endpoint: endpoint.to_string(),
            request_payload: request.clone(),
            response_payload: response.clone(),
            status_code,
            duration_ms,
            created_at: Utc::now(),
        };
        if let Err(e) = store.log_api_call(entry).await {
            error!("Failed to write API audit record: {}", e);
        }
    }
}

fn parse_body(text: &str) -> Value {
    if text.trim().is_empty() {
        return Value::Object(Default::default());
    }
    serde_json::from_str(text).unwrap_or_else(|_| Value::Object(Default::default()))
}

/// Flatten a JSON object into query pairs. Strings are sent as-is, null
/// values are skipped, anything else is sent as its JSON text.
fn query_pairs(data: &Value) -> Vec<(String, String)> {
    let Value::Object(map) = data else {
        return Vec::new();
    };
    map.iter()
        .filter_map(|(k, v)| match v {
            Value::Null => None,
            Value::String(s) => Some((k.clone(), s.clone())),
            other => Some((k.clone(), other.to_string())),
        })
        .collect()
}
