//! Types for the SQLite persistence crate.

use std::fmt;
use wamux_whatsapp::WhatsAppError;

// ── Error ───────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SqliteErrorKind {
    ConnectionFailed,
    MigrationFailed,
    QueryFailed,
    /// A stored value could not be turned back into its domain type.
    CorruptRow,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SqliteError {
    pub kind: SqliteErrorKind,
    pub message: String,
}

impl fmt::Display for SqliteError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{:?}] {}", self.kind, self.message)
    }
}

impl std::error::Error for SqliteError {}

impl SqliteError {
    pub fn new(kind: SqliteErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn query(e: sqlx::Error) -> Self {
        Self::new(SqliteErrorKind::QueryFailed, e.to_string())
    }

    pub fn corrupt(message: impl Into<String>) -> Self {
        Self::new(SqliteErrorKind::CorruptRow, message)
    }
}

impl From<SqliteError> for WhatsAppError {
    fn from(e: SqliteError) -> Self {
        WhatsAppError::storage(e)
    }
}

// ── Connection config ───────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SqliteMode {
    File(String),
    Memory,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SqliteConnectionConfig {
    pub mode: SqliteMode,
    pub journal_mode: Option<String>,
    pub busy_timeout_ms: Option<u32>,
}

impl SqliteConnectionConfig {
    pub fn file(path: impl Into<String>) -> Self {
        Self {
            mode: SqliteMode::File(path.into()),
            journal_mode: Some("wal".to_string()),
            busy_timeout_ms: Some(5000),
        }
    }

    pub fn memory() -> Self {
        Self {
            mode: SqliteMode::Memory,
            journal_mode: None,
            busy_timeout_ms: None,
        }
    }

    /// Accepts `sqlite::memory:`, `:memory:`, `sqlite://path` or a bare path.
    pub fn from_url(url: &str) -> Self {
        match url {
            "sqlite::memory:" | ":memory:" => Self::memory(),
            other => {
                let path = other.strip_prefix("sqlite://").unwrap_or(other);
                let path = path.split('?').next().unwrap_or(path);
                Self::file(path)
            }
        }
    }

    pub fn is_memory(&self) -> bool {
        self.mode == SqliteMode::Memory
    }

    pub fn to_url(&self) -> String {
        match &self.mode {
            SqliteMode::File(path) => format!("sqlite://{}?mode=rwc", path),
            SqliteMode::Memory => "sqlite::memory:".to_string(),
        }
    }
}
