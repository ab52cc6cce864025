//! WhatsApp message template management via the Cloud API.
//!
//! Listing is cursor paginated. Every fetched page can be mirrored into the
//! local template table, and [`TemplateService::sync_all`] walks the whole
//! listing before removing local rows the platform no longer reports.

use crate::whatsapp::api_client::CloudApiClient;
use crate::whatsapp::error::{WaResult, WhatsAppError};
use crate::whatsapp::merge::deep_merge;
use crate::whatsapp::types::{TemplateRecord, TemplateStatus};
use log::{debug, error, info, warn};
use serde::Serialize;
use serde_json::{json, Map, Value};

// ═══════════════════════════════════════════════════════════════════════
//  Query / page
// ═══════════════════════════════════════════════════════════════════════

/// Parameters of one listing request.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TemplateQuery {
    pub fields: Vec<String>,
    pub limit: Option<u32>,
    pub after: Option<String>,
}

impl TemplateQuery {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fields<I, S>(mut self, fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.fields = fields.into_iter().map(Into::into).collect();
        self
    }

    pub fn limit(mut self, limit: u32) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn after(mut self, cursor: impl Into<String>) -> Self {
        self.after = Some(cursor.into());
        self
    }

    fn params(&self) -> Value {
        let mut params = Map::new();
        if !self.fields.is_empty() {
            params.insert("fields".into(), json!(self.fields.join(",")));
        }
        if let Some(limit) = self.limit {
            params.insert("limit".into(), json!(limit));
        }
        if let Some(after) = &self.after {
            params.insert("after".into(), json!(after));
        }
        Value::Object(params)
    }
}

/// One page of the template listing, plus the query that produced it.
#[derive(Debug, Clone, PartialEq)]
pub struct TemplatePage {
    data: Value,
    query: TemplateQuery,
}

impl TemplatePage {
    pub fn new(data: Value, query: TemplateQuery) -> Self {
        Self { data, query }
    }

    /// Templates on this page, in listing order.
    pub fn templates(&self) -> &[Value] {
        self.data["data"]
            .as_array()
            .map(Vec::as_slice)
            .unwrap_or_default()
    }

    /// True only when the platform returned both a cursor and a next link.
    pub fn has_next_page(&self) -> bool {
        self.next_page_cursor().is_some() && !self.data["paging"]["next"].is_null()
    }

    pub fn next_page_cursor(&self) -> Option<&str> {
        self.data["paging"]["cursors"]["after"].as_str()
    }

    /// The query for the following page: same fields and limit, new cursor.
    pub fn next_page(&self) -> Option<TemplateQuery> {
        if !self.has_next_page() {
            return None;
        }
        let cursor = self.next_page_cursor()?;
        Some(TemplateQuery {
            after: Some(cursor.to_string()),
            ..self.query.clone()
        })
    }

    /// Fetch the following page, if there is one.
    pub async fn fetch_next(&self, service: &TemplateService) -> WaResult<Option<TemplatePage>> {
        match self.next_page() {
            Some(query) => service.list(query).await.map(Some),
            None => Ok(None),
        }
    }

    pub fn query(&self) -> &TemplateQuery {
        &self.query
    }

    pub fn as_json(&self) -> &Value {
        &self.data
    }
}

/// Body of a single-template call (get / create / update / delete).
#[derive(Debug, Clone, PartialEq)]
pub struct TemplateResponse {
    data: Value,
}

impl TemplateResponse {
    pub fn new(data: Value) -> Self {
        Self { data }
    }

    pub fn is_successful(&self) -> bool {
        self.data.get("error").is_none()
    }

    pub fn id(&self) -> Option<&str> {
        self.data["id"].as_str()
    }

    pub fn name(&self) -> Option<&str> {
        self.data["name"].as_str()
    }

    pub fn status(&self) -> Option<TemplateStatus> {
        self.data["status"].as_str().map(TemplateStatus::from)
    }

    pub fn category(&self) -> Option<&str> {
        self.data["category"].as_str()
    }

    pub fn components(&self) -> &[Value] {
        self.data["components"]
            .as_array()
            .map(Vec::as_slice)
            .unwrap_or_default()
    }

    pub fn as_json(&self) -> &Value {
        &self.data
    }
}

/// Outcome of a full reconciliation for one tenant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TemplateSyncReport {
    pub account: String,
    pub pages: usize,
    pub seen: usize,
    pub deleted: u64,
}

// ═══════════════════════════════════════════════════════════════════════
//  Service
// ═══════════════════════════════════════════════════════════════════════

/// Template management operations for one tenant.
pub struct TemplateService {
    client: CloudApiClient,
    overlay: Map<String, Value>,
}

impl TemplateService {
    pub fn new(client: CloudApiClient) -> Self {
        Self {
            client,
            overlay: Map::new(),
        }
    }

    pub fn client(&self) -> &CloudApiClient {
        &self.client
    }

    fn templates_endpoint(&self) -> String {
        format!("{}/message_templates", self.client.account().business_account_id)
    }

    /// Deep-merge extra fields into the next create/update body.
    pub fn payload(&mut self, fragment: Value) -> &mut Self {
        if let Value::Object(map) = fragment {
            let mut overlay = Value::Object(std::mem::take(&mut self.overlay));
            deep_merge(&mut overlay, Value::Object(map));
            if let Value::Object(map) = overlay {
                self.overlay = map;
            }
        }
        self
    }

    fn apply_overlay(&mut self, mut body: Value) -> Value {
        let overlay = std::mem::take(&mut self.overlay);
        if !overlay.is_empty() {
            deep_merge(&mut body, Value::Object(overlay));
        }
        body
    }

    // ─── Listing ─────────────────────────────────────────────────────

    /// Fetch one page. Mirrors it locally when template logging is on.
    pub async fn list(&self, query: TemplateQuery) -> WaResult<TemplatePage> {
        self.fetch_page(query, self.client.logging().templates)
            .await
    }

    async fn fetch_page(&self, query: TemplateQuery, mirror: bool) -> WaResult<TemplatePage> {
        let resp = self
            .client
            .get(&self.templates_endpoint(), &query.params())
            .await?;
        let page = TemplatePage::new(resp.body, query);
        debug!(
            "Listed {} templates [account={}]",
            page.templates().len(),
            self.client.account().name
        );
        if mirror {
            self.mirror(&page).await?;
        }
        Ok(page)
    }

    async fn mirror(&self, page: &TemplatePage) -> WaResult<()> {
        let Some(store) = self.client.store() else {
            return Ok(());
        };
        let account = &self.client.account().name;
        for t in page.templates() {
            let Some(id) = template_id(t) else {
                warn!("Skipping template without id: {}", t);
                continue;
            };
            store
                .upsert_template(TemplateRecord {
                    account_name: account.clone(),
                    remote_template_id: id,
                    name: t["name"].as_str().unwrap_or_default().to_string(),
                    language: t["language"].as_str().unwrap_or_default().to_string(),
                    category: t["category"].as_str().unwrap_or_default().to_string(),
                    status: TemplateStatus::from(t["status"].as_str().unwrap_or_default()),
                    components: match &t["components"] {
                        Value::Null => json!([]),
                        other => other.clone(),
                    },
                })
                .await?;
        }
        Ok(())
    }

    /// Walk every page, mirror each one, then delete local templates of
    /// this tenant whose id was not seen. Deletion only happens after the
    /// walk finished.
    pub async fn sync_all(&self) -> WaResult<TemplateSyncReport> {
        let store = self
            .client
            .store()
            .cloned()
            .ok_or_else(|| WhatsAppError::config("template sync requires a store"))?;
        let account = self.client.account().name.clone();

        let mut seen: Vec<String> = Vec::new();
        let mut pages = 0;
        let mut page = self.fetch_page(TemplateQuery::new(), true).await?;
        loop {
            pages += 1;
            seen.extend(page.templates().iter().filter_map(template_id));
            debug!("  Synced {} templates...", page.templates().len());
            match page.next_page() {
                Some(query) => page = self.fetch_page(query, true).await?,
                None => break,
            }
        }

        let deleted = store.delete_templates_except(&account, &seen).await?;
        if deleted > 0 {
            info!("Removed {} stale templates [account={}]", deleted, account);
        }

        Ok(TemplateSyncReport {
            account,
            pages,
            seen: seen.len(),
            deleted,
        })
    }

    // ─── Single template ─────────────────────────────────────────────

    pub async fn get(&self, id: &str) -> WaResult<TemplateResponse> {
        let endpoint = format!("{}/{}", self.templates_endpoint(), id);
        let resp = self.client.get(&endpoint, &json!({})).await?;
        Ok(TemplateResponse::new(resp.body))
    }

    /// Submit a new template for review. Consumes the overlay.
    pub async fn create(
        &mut self,
        name: &str,
        language: &str,
        category: &str,
        components: Value,
    ) -> WaResult<TemplateResponse> {
        let body = self.apply_overlay(json!({
            "name": name,
            "language": language,
            "category": category,
            "components": components,
        }));
        let resp = self.client.post(&self.templates_endpoint(), &body).await?;
        info!(
            "Created template '{}' [account={}]",
            name,
            self.client.account().name
        );
        Ok(TemplateResponse::new(resp.body))
    }

    /// Replace a template's components. Consumes the overlay.
    pub async fn update(&mut self, id: &str, components: Value) -> WaResult<TemplateResponse> {
        let body = self.apply_overlay(json!({ "components": components }));
        let endpoint = format!("{}/{}", self.templates_endpoint(), id);
        let resp = self.client.post(&endpoint, &body).await?;
        Ok(TemplateResponse::new(resp.body))
    }

    /// Delete every language of the named template. Local rows with that
    /// name are removed too when template logging is on.
    pub async fn delete(&self, name: &str) -> WaResult<TemplateResponse> {
        let resp = self
            .client
            .delete(&self.templates_endpoint(), &json!({ "name": name }))
            .await?;

        if self.client.logging().templates {
            if let Some(store) = self.client.store() {
                let account = &self.client.account().name;
                if let Err(e) = store.delete_templates_named(account, name).await {
                    error!("Failed to remove local template '{}': {}", name, e);
                }
            }
        }

        Ok(TemplateResponse::new(resp.body))
    }
}

/// Template ids arrive as strings, but accept numbers too.
fn template_id(t: &Value) -> Option<String> {
    match &t["id"] {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::whatsapp::store::{MemoryStore, WaStore};
    use crate::whatsapp::types::{Account, LoggingConfig};
    use std::sync::Arc;
    use wiremock::matchers::{body_json, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn account() -> Account {
        Account {
            name: "default".into(),
            access_token: "tok".into(),
            phone_number_id: "123".into(),
            business_account_id: "456".into(),
            webhook_verify_token: None,
            webhook_secret: None,
        }
    }

    fn service(base: &str, store: Option<Arc<MemoryStore>>, logging: LoggingConfig) -> TemplateService {
        let mut client = CloudApiClient::new(account(), base, "v24.0");
        if let Some(store) = store {
            client = client.with_store(store, logging);
        }
        TemplateService::new(client)
    }

    fn local(id: &str) -> TemplateRecord {
        TemplateRecord {
            account_name: "default".into(),
            remote_template_id: id.into(),
            name: format!("t{id}"),
            language: "en".into(),
            category: "UTILITY".into(),
            status: TemplateStatus::Approved,
            components: json!([]),
        }
    }

    #[test]
    fn test_query_params() {
        let q = TemplateQuery::new().fields(["name", "status"]).limit(10);
        assert_eq!(q.params(), json!({"fields": "name,status", "limit": 10}));
        assert_eq!(TemplateQuery::new().params(), json!({}));
    }

    #[test]
    fn test_has_next_page_truth_table() {
        let q = TemplateQuery::new();
        let both = TemplatePage::new(
            json!({"data": [], "paging": {"cursors": {"after": "C"}, "next": "https://next"}}),
            q.clone(),
        );
        let cursor_only = TemplatePage::new(
            json!({"data": [], "paging": {"cursors": {"after": "C"}}}),
            q.clone(),
        );
        let next_only = TemplatePage::new(
            json!({"data": [], "paging": {"cursors": {}, "next": "https://next"}}),
            q.clone(),
        );
        let neither = TemplatePage::new(json!({"data": []}), q);

        assert!(both.has_next_page());
        assert!(!cursor_only.has_next_page());
        assert!(!next_only.has_next_page());
        assert!(!neither.has_next_page());
        assert_eq!(cursor_only.next_page_cursor(), Some("C"));
        assert_eq!(cursor_only.next_page(), None);
    }

    #[test]
    fn test_next_page_keeps_fields_and_limit() {
        let q = TemplateQuery::new().fields(["name"]).limit(2).after("OLD");
        let page = TemplatePage::new(
            json!({"paging": {"cursors": {"after": "NEW"}, "next": "https://next"}}),
            q,
        );
        assert_eq!(
            page.next_page(),
            Some(TemplateQuery {
                fields: vec!["name".into()],
                limit: Some(2),
                after: Some("NEW".into()),
            })
        );
    }

    #[tokio::test]
    async fn test_fetch_next_uses_cursor_and_original_query() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v24.0/456/message_templates"))
            .and(query_param("after", "C1"))
            .and(query_param("fields", "name,status"))
            .and(query_param("limit", "1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "data": [{"id": "2", "name": "second"}]
            })))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/v24.0/456/message_templates"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "data": [{"id": "1", "name": "first"}],
                "paging": {"cursors": {"after": "C1"}, "next": "https://graph/next"}
            })))
            .expect(1)
            .mount(&server)
            .await;

        let svc = service(&server.uri(), None, LoggingConfig::default());
        let first = svc
            .list(TemplateQuery::new().fields(["name", "status"]).limit(1))
            .await
            .unwrap();
        assert_eq!(first.templates()[0]["name"], "first");

        let second = first.fetch_next(&svc).await.unwrap().unwrap();
        assert_eq!(second.templates()[0]["name"], "second");
        assert!(!second.has_next_page());
        assert!(second.fetch_next(&svc).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_list_mirrors_when_enabled() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "data": [
                    {"id": "1", "name": "hello", "language": "en_US", "category": "MARKETING", "status": "APPROVED", "components": [{"type": "BODY"}]},
                    {"name": "no_id"}
                ]
            })))
            .mount(&server)
            .await;

        let store = Arc::new(MemoryStore::new());
        let svc = service(&server.uri(), Some(store.clone()), LoggingConfig::default());
        svc.list(TemplateQuery::new()).await.unwrap();

        let rows = store.templates("default").await.unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].name, "hello");
        assert_eq!(rows[0].status, TemplateStatus::Approved);
        assert_eq!(rows[0].components, json!([{"type": "BODY"}]));

        let off = LoggingConfig {
            templates: false,
            ..LoggingConfig::default()
        };
        let store = Arc::new(MemoryStore::new());
        let svc = service(&server.uri(), Some(store.clone()), off);
        svc.list(TemplateQuery::new()).await.unwrap();
        assert!(store.templates("default").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_sync_all_deletes_only_stale() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(query_param("after", "P2"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "data": [{"id": "2", "name": "t2", "status": "PENDING"}]
            })))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "data": [{"id": "1", "name": "t1", "status": "APPROVED"}],
                "paging": {"cursors": {"after": "P2"}, "next": "https://graph/next"}
            })))
            .mount(&server)
            .await;

        let store = Arc::new(MemoryStore::new());
        for id in ["1", "2", "3"] {
            store.upsert_template(local(id)).await.unwrap();
        }

        // Mirroring is forced during a sync even with the toggle off.
        let logging = LoggingConfig {
            templates: false,
            ..LoggingConfig::default()
        };
        let svc = service(&server.uri(), Some(store.clone()), logging);
        let report = svc.sync_all().await.unwrap();

        assert_eq!(report.pages, 2);
        assert_eq!(report.seen, 2);
        assert_eq!(report.deleted, 1);

        let mut ids: Vec<String> = store
            .templates("default")
            .await
            .unwrap()
            .into_iter()
            .map(|t| t.remote_template_id)
            .collect();
        ids.sort();
        assert_eq!(ids, vec!["1", "2"]);
    }

    #[tokio::test]
    async fn test_sync_failure_midway_deletes_nothing() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(query_param("after", "P2"))
            .respond_with(ResponseTemplate::new(429).set_body_json(json!({"error": {"code": 80007}})))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "data": [{"id": "1"}],
                "paging": {"cursors": {"after": "P2"}, "next": "https://graph/next"}
            })))
            .mount(&server)
            .await;

        let store = Arc::new(MemoryStore::new());
        store.upsert_template(local("3")).await.unwrap();
        let svc = service(&server.uri(), Some(store.clone()), LoggingConfig::default());

        let err = svc.sync_all().await.unwrap_err();
        assert!(err.is_rate_limited());
        assert!(store
            .templates("default")
            .await
            .unwrap()
            .iter()
            .any(|t| t.remote_template_id == "3"));
    }

    #[tokio::test]
    async fn test_sync_requires_store() {
        let svc = service("http://localhost:9", None, LoggingConfig::default());
        let err = svc.sync_all().await.unwrap_err();
        assert!(matches!(err, WhatsAppError::Config(_)));
    }

    #[tokio::test]
    async fn test_create_applies_and_resets_overlay() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v24.0/456/message_templates"))
            .and(body_json(json!({
                "name": "promo",
                "language": "en",
                "category": "MARKETING",
                "components": [],
                "allow_category_change": true
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "id": "99", "status": "PENDING", "category": "MARKETING"
            })))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/v24.0/456/message_templates/99"))
            .and(body_json(json!({"components": [{"type": "BODY", "text": "x"}]})))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"success": true})))
            .expect(1)
            .mount(&server)
            .await;

        let mut svc = service(&server.uri(), None, LoggingConfig::default());
        let resp = svc
            .payload(json!({"allow_category_change": true}))
            .create("promo", "en", "MARKETING", json!([]))
            .await
            .unwrap();
        assert_eq!(resp.id(), Some("99"));
        assert_eq!(resp.status(), Some(TemplateStatus::Pending));

        // Overlay was consumed by create.
        let resp = svc
            .update("99", json!([{"type": "BODY", "text": "x"}]))
            .await
            .unwrap();
        assert!(resp.is_successful());
    }

    #[tokio::test]
    async fn test_delete_removes_local_rows_by_name() {
        let server = MockServer::start().await;
        Mock::given(method("DELETE"))
            .and(path("/v24.0/456/message_templates"))
            .and(query_param("name", "t1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"success": true})))
            .expect(1)
            .mount(&server)
            .await;

        let store = Arc::new(MemoryStore::new());
        store.upsert_template(local("1")).await.unwrap();
        store.upsert_template(local("2")).await.unwrap();

        let svc = service(&server.uri(), Some(store.clone()), LoggingConfig::default());
        assert!(svc.delete("t1").await.unwrap().is_successful());

        let rows = store.templates("default").await.unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].name, "t2");
    }

    #[tokio::test]
    async fn test_get_single_template() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v24.0/456/message_templates/77"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "id": "77", "name": "welcome", "status": "PAUSED", "components": [{"type": "BODY"}]
            })))
            .mount(&server)
            .await;

        let svc = service(&server.uri(), None, LoggingConfig::default());
        let t = svc.get("77").await.unwrap();
        assert_eq!(t.name(), Some("welcome"));
        assert_eq!(t.status(), Some(TemplateStatus::Other("PAUSED".into())));
        assert_eq!(t.components().len(), 1);
    }
}
