//! Embedded schema. Every statement is idempotent.

use crate::sqlite::types::{SqliteError, SqliteErrorKind};
use log::info;
use sqlx::SqlitePool;

/// Tables created by [`migrate`].
pub const TABLES: [&str; 5] = [
    "whatsapp_accounts",
    "whatsapp_messages",
    "whatsapp_templates",
    "whatsapp_api_logs",
    "whatsapp_webhook_logs",
];

const STATEMENTS: &[&str] = &[
    r#"CREATE TABLE IF NOT EXISTS whatsapp_accounts (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        name TEXT NOT NULL UNIQUE,
        access_token TEXT NOT NULL,
        phone_number_id TEXT NOT NULL,
        business_account_id TEXT NOT NULL,
        webhook_verify_token TEXT,
        webhook_secret TEXT,
        created_at TEXT NOT NULL,
        updated_at TEXT NOT NULL
    )"#,
    r#"CREATE TABLE IF NOT EXISTS whatsapp_messages (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        account_name TEXT NOT NULL,
        remote_message_id TEXT,
        direction TEXT NOT NULL,
        recipient TEXT,
        sender TEXT,
        message_type TEXT NOT NULL,
        content TEXT,
        status TEXT NOT NULL,
        status_at TEXT NOT NULL,
        created_at TEXT NOT NULL
    )"#,
    "CREATE INDEX IF NOT EXISTS idx_whatsapp_messages_remote ON whatsapp_messages (remote_message_id)",
    "CREATE INDEX IF NOT EXISTS idx_whatsapp_messages_direction ON whatsapp_messages (account_name, direction)",
    "CREATE INDEX IF NOT EXISTS idx_whatsapp_messages_status ON whatsapp_messages (account_name, status)",
    r#"CREATE TABLE IF NOT EXISTS whatsapp_templates (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        account_name TEXT NOT NULL,
        remote_template_id TEXT NOT NULL,
        name TEXT NOT NULL,
        language TEXT NOT NULL,
        category TEXT NOT NULL,
        status TEXT NOT NULL,
        components TEXT,
        created_at TEXT NOT NULL,
        updated_at TEXT NOT NULL,
        UNIQUE (account_name, remote_template_id)
    )"#,
    "CREATE INDEX IF NOT EXISTS idx_whatsapp_templates_name ON whatsapp_templates (account_name, name)",
    r#"CREATE TABLE IF NOT EXISTS whatsapp_api_logs (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        account_name TEXT NOT NULL,
        method TEXT NOT NULL,
        endpoint TEXT NOT NULL,
        request_payload TEXT,
        response_payload TEXT,
        status_code INTEGER NOT NULL,
        duration_ms INTEGER NOT NULL,
        created_at TEXT NOT NULL
    )"#,
    "CREATE INDEX IF NOT EXISTS idx_whatsapp_api_logs_account ON whatsapp_api_logs (account_name)",
    r#"CREATE TABLE IF NOT EXISTS whatsapp_webhook_logs (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        account_name TEXT NOT NULL,
        event_type TEXT NOT NULL,
        payload TEXT,
        processed_at TEXT NOT NULL
    )"#,
    "CREATE INDEX IF NOT EXISTS idx_whatsapp_webhook_logs_event ON whatsapp_webhook_logs (account_name, event_type)",
];

/// Create all tables and indexes that do not exist yet.
pub async fn migrate(pool: &SqlitePool) -> Result<(), SqliteError> {
    for sql in STATEMENTS {
        sqlx::query(sql).execute(pool).await.map_err(|e| {
            SqliteError::new(SqliteErrorKind::MigrationFailed, format!("{e}"))
        })?;
    }
    info!("SQLite schema ready ({} tables)", TABLES.len());
    Ok(())
}
