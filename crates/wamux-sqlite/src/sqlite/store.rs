//! `SqliteStore` – tenant accounts and every wamux record in one SQLite file.

use crate::sqlite::schema;
use crate::sqlite::types::*;
use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use log::{debug, info, warn};
use serde_json::Value;
use sqlx::sqlite::{SqlitePool, SqlitePoolOptions, SqliteRow};
use sqlx::Row;
use wamux_whatsapp::{
    Account, AccountStore, ApiCallLog, MessageDirection, MessageRecord, MessageStatus,
    TemplateRecord, TemplateStatus, WaResult, WaStore, WebhookLog, WhatsAppError,
};

#[derive(Debug, Clone)]
pub struct SqliteStore {
    pool: SqlitePool,
}

fn ts(at: DateTime<Utc>) -> String {
    // Fixed width so string comparison orders by time.
    at.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn parse_ts(raw: &str) -> Result<DateTime<Utc>, SqliteError> {
    DateTime::parse_from_rfc3339(raw)
        .map(|d| d.with_timezone(&Utc))
        .map_err(|e| SqliteError::corrupt(format!("bad timestamp '{raw}': {e}")))
}

fn json_text(v: &Value) -> String {
    v.to_string()
}

fn parse_json(raw: Option<String>) -> Value {
    raw.and_then(|s| serde_json::from_str(&s).ok())
        .unwrap_or(Value::Null)
}

fn get<'r, T>(row: &'r SqliteRow, col: &str) -> Result<T, SqliteError>
where
    T: sqlx::Decode<'r, sqlx::Sqlite> + sqlx::Type<sqlx::Sqlite>,
{
    row.try_get(col).map_err(SqliteError::query)
}

fn row_to_account(row: &SqliteRow) -> Result<Account, SqliteError> {
    Ok(Account {
        name: get(row, "name")?,
        access_token: get(row, "access_token")?,
        phone_number_id: get(row, "phone_number_id")?,
        business_account_id: get(row, "business_account_id")?,
        webhook_verify_token: get(row, "webhook_verify_token")?,
        webhook_secret: get(row, "webhook_secret")?,
    })
}

fn row_to_message(row: &SqliteRow) -> Result<MessageRecord, SqliteError> {
    let direction: String = get(row, "direction")?;
    let status: String = get(row, "status")?;
    let status_at: String = get(row, "status_at")?;
    let created_at: String = get(row, "created_at")?;
    Ok(MessageRecord {
        account_name: get(row, "account_name")?,
        remote_message_id: get(row, "remote_message_id")?,
        direction: MessageDirection::parse(&direction)
            .ok_or_else(|| SqliteError::corrupt(format!("unknown direction '{direction}'")))?,
        to: get(row, "recipient")?,
        from: get(row, "sender")?,
        message_type: get(row, "message_type")?,
        content: parse_json(get(row, "content")?),
        status: MessageStatus::parse(&status)
            .ok_or_else(|| SqliteError::corrupt(format!("unknown status '{status}'")))?,
        status_at: parse_ts(&status_at)?,
        created_at: parse_ts(&created_at)?,
    })
}

fn row_to_template(row: &SqliteRow) -> Result<TemplateRecord, SqliteError> {
    let status: String = get(row, "status")?;
    let components = match parse_json(get(row, "components")?) {
        Value::Null => Value::Array(Vec::new()),
        other => other,
    };
    Ok(TemplateRecord {
        account_name: get(row, "account_name")?,
        remote_template_id: get(row, "remote_template_id")?,
        name: get(row, "name")?,
        language: get(row, "language")?,
        category: get(row, "category")?,
        status: TemplateStatus::from(status),
        components,
    })
}

impl SqliteStore {
    // ── connect / disconnect ────────────────────────────────────

    pub async fn connect(config: SqliteConnectionConfig) -> Result<Self, SqliteError> {
        let url = config.to_url();

        // SQLite single-writer. An in-memory database lives only as long as
        // its one connection, so that connection must never be recycled.
        let mut options = SqlitePoolOptions::new().max_connections(1);
        if config.is_memory() {
            options = options.idle_timeout(None).max_lifetime(None);
        }
        let pool = options.connect(&url).await.map_err(|e| {
            SqliteError::new(SqliteErrorKind::ConnectionFailed, format!("SQLite connect: {e}"))
        })?;

        if let Some(ref jm) = config.journal_mode {
            if let Err(e) = sqlx::query(&format!("PRAGMA journal_mode={jm}")).execute(&pool).await {
                warn!("PRAGMA journal_mode={jm} failed: {e}");
            }
        }
        if let Some(bt) = config.busy_timeout_ms {
            if let Err(e) = sqlx::query(&format!("PRAGMA busy_timeout={bt}")).execute(&pool).await {
                warn!("PRAGMA busy_timeout={bt} failed: {e}");
            }
        }

        info!("SQLite store connected to {url}");
        Ok(Self { pool })
    }

    pub async fn connect_url(url: &str) -> Result<Self, SqliteError> {
        Self::connect(SqliteConnectionConfig::from_url(url)).await
    }

    pub async fn migrate(&self) -> Result<(), SqliteError> {
        schema::migrate(&self.pool).await
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }

    // ── Accounts ────────────────────────────────────────────────

    pub async fn upsert_account(&self, account: &Account) -> Result<(), SqliteError> {
        let now = ts(Utc::now());
        sqlx::query(
            "INSERT INTO whatsapp_accounts (name, access_token, phone_number_id, business_account_id, \
             webhook_verify_token, webhook_secret, created_at, updated_at) \
             VALUES (?, ?, ?, ?, ?, ?, ?, ?) \
             ON CONFLICT(name) DO UPDATE SET access_token = excluded.access_token, \
             phone_number_id = excluded.phone_number_id, business_account_id = excluded.business_account_id, \
             webhook_verify_token = excluded.webhook_verify_token, webhook_secret = excluded.webhook_secret, \
             updated_at = excluded.updated_at",
        )
        .bind(&account.name)
        .bind(&account.access_token)
        .bind(&account.phone_number_id)
        .bind(&account.business_account_id)
        .bind(&account.webhook_verify_token)
        .bind(&account.webhook_secret)
        .bind(&now)
        .bind(&now)
        .execute(&self.pool)
        .await
        .map_err(SqliteError::query)?;
        debug!("Account [{}] stored", account.name);
        Ok(())
    }

    /// Returns whether a row was removed.
    pub async fn delete_account(&self, name: &str) -> Result<bool, SqliteError> {
        let res = sqlx::query("DELETE FROM whatsapp_accounts WHERE name = ?")
            .bind(name)
            .execute(&self.pool)
            .await
            .map_err(SqliteError::query)?;
        Ok(res.rows_affected() > 0)
    }

    pub async fn count(&self, table: &str) -> Result<i64, SqliteError> {
        if !schema::TABLES.contains(&table) {
            return Err(SqliteError::new(
                SqliteErrorKind::QueryFailed,
                format!("unknown table {table}"),
            ));
        }
        sqlx::query_scalar(&format!("SELECT COUNT(*) FROM {table}"))
            .fetch_one(&self.pool)
            .await
            .map_err(SqliteError::query)
    }
}

#[async_trait]
impl AccountStore for SqliteStore {
    async fn find(&self, name: &str) -> WaResult<Account> {
        let row = sqlx::query("SELECT * FROM whatsapp_accounts WHERE name = ?")
            .bind(name)
            .fetch_optional(&self.pool)
            .await
            .map_err(SqliteError::query)?;
        match row {
            Some(row) => Ok(row_to_account(&row)?),
            None => Err(WhatsAppError::AccountNotFound(name.to_string())),
        }
    }

    async fn list_all(&self) -> WaResult<Vec<Account>> {
        let rows = sqlx::query("SELECT * FROM whatsapp_accounts ORDER BY name")
            .fetch_all(&self.pool)
            .await
            .map_err(SqliteError::query)?;
        let accounts = rows
            .iter()
            .map(row_to_account)
            .collect::<Result<Vec<_>, _>>()?;
        Ok(accounts)
    }
}

#[async_trait]
impl WaStore for SqliteStore {
    async fn log_api_call(&self, entry: ApiCallLog) -> WaResult<()> {
        sqlx::query(
            "INSERT INTO whatsapp_api_logs (account_name, method, endpoint, request_payload, \
             response_payload, status_code, duration_ms, created_at) VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&entry.account_name)
        .bind(&entry.method)
        .bind(&entry.endpoint)
        .bind(json_text(&entry.request_payload))
        .bind(json_text(&entry.response_payload))
        .bind(i64::from(entry.status_code))
        .bind(i64::try_from(entry.duration_ms).unwrap_or(i64::MAX))
        .bind(ts(entry.created_at))
        .execute(&self.pool)
        .await
        .map_err(SqliteError::query)?;
        Ok(())
    }

    async fn log_webhook(&self, entry: WebhookLog) -> WaResult<()> {
        sqlx::query(
            "INSERT INTO whatsapp_webhook_logs (account_name, event_type, payload, processed_at) \
             VALUES (?, ?, ?, ?)",
        )
        .bind(&entry.account_name)
        .bind(entry.event_type.as_str())
        .bind(json_text(&entry.payload))
        .bind(ts(entry.processed_at))
        .execute(&self.pool)
        .await
        .map_err(SqliteError::query)?;
        Ok(())
    }

    async fn insert_message(&self, record: MessageRecord) -> WaResult<()> {
        sqlx::query(
            "INSERT INTO whatsapp_messages (account_name, remote_message_id, direction, recipient, \
             sender, message_type, content, status, status_at, created_at) \
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&record.account_name)
        .bind(&record.remote_message_id)
        .bind(record.direction.as_str())
        .bind(&record.to)
        .bind(&record.from)
        .bind(&record.message_type)
        .bind(json_text(&record.content))
        .bind(record.status.as_str())
        .bind(ts(record.status_at))
        .bind(ts(record.created_at))
        .execute(&self.pool)
        .await
        .map_err(SqliteError::query)?;
        Ok(())
    }

    async fn update_message_status(
        &self,
        remote_message_id: &str,
        status: MessageStatus,
        at: DateTime<Utc>,
    ) -> WaResult<u64> {
        let res = sqlx::query(
            "UPDATE whatsapp_messages SET status = ?, status_at = ? WHERE remote_message_id = ?",
        )
        .bind(status.as_str())
        .bind(ts(at))
        .bind(remote_message_id)
        .execute(&self.pool)
        .await
        .map_err(SqliteError::query)?;
        Ok(res.rows_affected())
    }

    async fn messages_with_status(
        &self,
        account_name: &str,
        status: MessageStatus,
        since: Option<DateTime<Utc>>,
    ) -> WaResult<Vec<MessageRecord>> {
        let since = since.map(ts);
        let rows = sqlx::query(
            "SELECT * FROM whatsapp_messages WHERE account_name = ? AND direction = ? \
             AND status = ? AND (? IS NULL OR created_at >= ?) ORDER BY created_at, id",
        )
        .bind(account_name)
        .bind(MessageDirection::Outbound.as_str())
        .bind(status.as_str())
        .bind(&since)
        .bind(&since)
        .fetch_all(&self.pool)
        .await
        .map_err(SqliteError::query)?;
        let records = rows
            .iter()
            .map(row_to_message)
            .collect::<Result<Vec<_>, _>>()?;
        Ok(records)
    }

    async fn upsert_template(&self, record: TemplateRecord) -> WaResult<()> {
        let now = ts(Utc::now());
        sqlx::query(
            "INSERT INTO whatsapp_templates (account_name, remote_template_id, name, language, \
             category, status, components, created_at, updated_at) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?) \
             ON CONFLICT(account_name, remote_template_id) DO UPDATE SET name = excluded.name, \
             language = excluded.language, category = excluded.category, status = excluded.status, \
             components = excluded.components, updated_at = excluded.updated_at",
        )
        .bind(&record.account_name)
        .bind(&record.remote_template_id)
        .bind(&record.name)
        .bind(&record.language)
        .bind(&record.category)
        .bind(record.status.as_str())
        .bind(json_text(&record.components))
        .bind(&now)
        .bind(&now)
        .execute(&self.pool)
        .await
        .map_err(SqliteError::query)?;
        Ok(())
    }

    async fn templates(&self, account_name: &str) -> WaResult<Vec<TemplateRecord>> {
        let rows = sqlx::query(
            "SELECT * FROM whatsapp_templates WHERE account_name = ? ORDER BY remote_template_id",
        )
        .bind(account_name)
        .fetch_all(&self.pool)
        .await
        .map_err(SqliteError::query)?;
        let records = rows
            .iter()
            .map(row_to_template)
            .collect::<Result<Vec<_>, _>>()?;
        Ok(records)
    }

    async fn delete_templates_except(&self, account_name: &str, keep: &[String]) -> WaResult<u64> {
        let mut sql = String::from("DELETE FROM whatsapp_templates WHERE account_name = ?");
        if !keep.is_empty() {
            let placeholders = vec!["?"; keep.len()].join(", ");
            sql.push_str(&format!(" AND remote_template_id NOT IN ({placeholders})"));
        }
        let mut query = sqlx::query(&sql).bind(account_name);
        for id in keep {
            query = query.bind(id);
        }
        let res = query
            .execute(&self.pool)
            .await
            .map_err(SqliteError::query)?;
        Ok(res.rows_affected())
    }

    async fn delete_templates_named(&self, account_name: &str, name: &str) -> WaResult<u64> {
        let res = sqlx::query("DELETE FROM whatsapp_templates WHERE account_name = ? AND name = ?")
            .bind(account_name)
            .bind(name)
            .execute(&self.pool)
            .await
            .map_err(SqliteError::query)?;
        Ok(res.rows_affected())
    }
}
