use std::collections::HashSet;
use std::path::PathBuf;

use async_trait::async_trait;
use chrono::Utc;
use sqlx::{Pool, Sqlite, sqlite::{SqliteConnectOptions, SqliteJournalMode, SqliteSynchronous}, Row};
use tokio::sync::Mutex;

use crate::session::ChatSession;

/// Storage key holding the serialized session list.
pub const SESSIONS_KEY: &str = "chat-sessions";

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("corrupt session blob: {0}")]
    Corrupt(String),
}

/// Durable home of the session blob.
///
/// Missing or corrupt data loads as an empty list, which callers treat the
/// same as a first run. A failed read is an error: the blob may still be
/// intact and must not be overwritten.
#[async_trait]
pub trait SessionStore: Send + Sync {
    async fn load(&self) -> Result<Vec<ChatSession>, StoreError>;
    async fn save(&self, sessions: &[ChatSession]) -> Result<(), StoreError>;
}

pub fn encode_sessions(sessions: &[ChatSession]) -> Result<String, StoreError> {
    Ok(serde_json::to_string(sessions)?)
}

/// Strict decode of a stored blob. Unknown fields, wrong types and duplicate
/// session ids are all rejected.
pub fn decode_sessions(raw: &str) -> Result<Vec<ChatSession>, StoreError> {
    let sessions: Vec<ChatSession> = serde_json::from_str(raw)?;
    let mut seen = HashSet::with_capacity(sessions.len());
    for s in &sessions {
        if !seen.insert(s.id) {
            return Err(StoreError::Corrupt(format!("duplicate session id {}", s.id)));
        }
    }
    Ok(sessions)
}

fn decode_or_empty(raw: Option<String>) -> Vec<ChatSession> {
    let Some(raw) = raw else { return Vec::new() };
    match decode_sessions(&raw) {
        Ok(sessions) => sessions,
        Err(e) => {
            tracing::warn!(error = %e, "discarding unreadable session blob");
            Vec::new()
        }
    }
}

#[derive(Clone)]
pub struct SqliteSessionStore {
    pool: Pool<Sqlite>,
}

impl SqliteSessionStore {
    pub async fn initialize(database_url: Option<String>) -> anyhow::Result<Self> {
        let url = match database_url {
            Some(u) => u,
            None => resolve_default_db_url()?,
        };
        let options = url.parse::<SqliteConnectOptions>()?
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Full);
        let pool = Pool::<Sqlite>::connect_with(options).await?;
        sqlx::query("PRAGMA busy_timeout = 5000;").execute(&pool).await?;
        sqlx::migrate!("./migrations").run(&pool).await?;
        tracing::debug!(%url, "session store ready");
        Ok(Self { pool })
    }

    async fn read_raw(&self) -> Result<Option<String>, sqlx::Error> {
        let row = sqlx::query("SELECT value FROM kv_store WHERE key = ?1")
            .bind(SESSIONS_KEY)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(|r| r.get::<String, _>("value")))
    }

    #[cfg(test)]
    pub(crate) async fn write_raw(&self, raw: &str) -> Result<(), sqlx::Error> {
        self.upsert(raw).await
    }

    async fn upsert(&self, raw: &str) -> Result<(), sqlx::Error> {
        sqlx::query(
            "INSERT INTO kv_store (key, value, updated_at) VALUES (?1, ?2, ?3)
             ON CONFLICT(key) DO UPDATE SET value = excluded.value, updated_at = excluded.updated_at",
        )
        .bind(SESSIONS_KEY)
        .bind(raw)
        .bind(Utc::now().to_rfc3339())
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

fn resolve_default_db_url() -> anyhow::Result<String> {
    let base = std::env::var("XDG_DATA_HOME").ok().map(PathBuf::from).unwrap_or_else(|| {
        let home = std::env::var("HOME").unwrap_or_else(|_| ".".into());
        PathBuf::from(home).join(".local").join("share")
    });
    let dir = base.join("parenting_assistant");
    std::fs::create_dir_all(&dir)?;
    let path = dir.join("sessions.db");
    Ok(format!("sqlite://{}", path.to_string_lossy()))
}

#[async_trait]
impl SessionStore for SqliteSessionStore {
    async fn load(&self) -> Result<Vec<ChatSession>, StoreError> {
        let raw = self.read_raw().await.inspect_err(|e| {
            tracing::error!(error = %e, "failed to read session blob");
        })?;
        Ok(decode_or_empty(raw))
    }

    async fn save(&self, sessions: &[ChatSession]) -> Result<(), StoreError> {
        let raw = encode_sessions(sessions)?;
        self.upsert(&raw).await?;
        Ok(())
    }
}

/// Process-local store; nothing survives a restart.
#[derive(Default)]
pub struct MemoryStore {
    blob: Mutex<Option<String>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_raw(raw: impl Into<String>) -> Self {
        Self { blob: Mutex::new(Some(raw.into())) }
    }

    pub async fn raw(&self) -> Option<String> {
        self.blob.lock().await.clone()
    }
}

#[async_trait]
impl SessionStore for MemoryStore {
    async fn load(&self) -> Result<Vec<ChatSession>, StoreError> {
        Ok(decode_or_empty(self.blob.lock().await.clone()))
    }

    async fn save(&self, sessions: &[ChatSession]) -> Result<(), StoreError> {
        let raw = encode_sessions(sessions)?;
        *self.blob.lock().await = Some(raw);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repository::SessionRepository;
    use crate::session::Message;
    use tempfile::tempdir;

    fn sample_sessions() -> Vec<ChatSession> {
        let mut a = ChatSession::new();
        a.push_message(Message::user("Help with sleep"));
        a.push_message(Message::assistant("1. **Routine**: same time every night"));
        let mut b = ChatSession::new();
        b.is_archived = true;
        vec![a, b]
    }

    async fn sqlite_store(dir: &tempfile::TempDir) -> SqliteSessionStore {
        let path = dir.path().join("test.db");
        let url = format!("sqlite://{}", path.to_string_lossy());
        SqliteSessionStore::initialize(Some(url)).await.unwrap()
    }

    #[tokio::test]
    async fn sqlite_save_then_load_roundtrip() {
        let dir = tempdir().unwrap();
        let store = sqlite_store(&dir).await;
        assert!(store.load().await.unwrap().is_empty());

        let sessions = sample_sessions();
        store.save(&sessions).await.unwrap();
        let loaded = store.load().await.unwrap();
        assert_eq!(loaded, sessions);
        assert_eq!(loaded[0].messages[1].content, "Help with sleep");
        assert_eq!(loaded[0].created_at, sessions[0].created_at);
        assert!(loaded[1].is_archived);
    }

    #[tokio::test]
    async fn sqlite_save_overwrites_previous_snapshot() {
        let dir = tempdir().unwrap();
        let store = sqlite_store(&dir).await;
        store.save(&sample_sessions()).await.unwrap();
        let only = vec![ChatSession::new()];
        store.save(&only).await.unwrap();
        assert_eq!(store.load().await.unwrap(), only);

        let row = sqlx::query("SELECT count(*) AS c FROM kv_store").fetch_one(&store.pool).await.unwrap();
        let c: i64 = row.get("c");
        assert_eq!(c, 1);
    }

    #[tokio::test]
    async fn sqlite_corrupt_blob_loads_empty() {
        let dir = tempdir().unwrap();
        let store = sqlite_store(&dir).await;
        store.write_raw("{not json").await.unwrap();
        assert!(store.load().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn sqlite_read_failure_leaves_existing_blob_alone() {
        let dir = tempdir().unwrap();
        let store = sqlite_store(&dir).await;
        let sessions = sample_sessions();
        store.save(&sessions).await.unwrap();

        sqlx::query("ALTER TABLE kv_store RENAME TO kv_store_offline").execute(&store.pool).await.unwrap();
        assert!(matches!(store.load().await, Err(StoreError::Database(_))));
        assert!(SessionRepository::initialize(store.clone()).await.is_err());

        sqlx::query("ALTER TABLE kv_store_offline RENAME TO kv_store").execute(&store.pool).await.unwrap();
        assert_eq!(store.load().await.unwrap(), sessions);
    }

    #[tokio::test]
    async fn sqlite_reopen_keeps_data() {
        let dir = tempdir().unwrap();
        let sessions = sample_sessions();
        {
            let store = sqlite_store(&dir).await;
            store.save(&sessions).await.unwrap();
        }
        let store = sqlite_store(&dir).await;
        assert_eq!(store.load().await.unwrap(), sessions);
    }

    #[tokio::test]
    async fn memory_store_roundtrip_uses_camel_case_fields() {
        let store = MemoryStore::new();
        let sessions = sample_sessions();
        store.save(&sessions).await.unwrap();
        let raw = store.raw().await.unwrap();
        assert!(raw.contains("\"isArchived\""));
        assert!(raw.contains("\"createdAt\""));
        assert!(raw.contains("\"isUser\""));
        assert_eq!(store.load().await.unwrap(), sessions);
    }

    #[test]
    fn decode_rejects_shape_mismatches() {
        assert!(decode_sessions("{}").is_err());
        assert!(decode_sessions("[{\"id\": 1}]").is_err());

        let mut v = serde_json::to_value(sample_sessions()).unwrap();
        v[0]["unexpected"] = serde_json::json!(true);
        assert!(decode_sessions(&v.to_string()).is_err());

        let mut v = serde_json::to_value(sample_sessions()).unwrap();
        v[0]["createdAt"] = serde_json::json!("yesterday");
        assert!(decode_sessions(&v.to_string()).is_err());
    }

    #[test]
    fn decode_rejects_duplicate_ids() {
        let s = ChatSession::new();
        let raw = encode_sessions(&[s.clone(), s]).unwrap();
        assert!(matches!(decode_sessions(&raw), Err(StoreError::Corrupt(_))));
    }

    #[tokio::test]
    async fn memory_store_with_garbage_loads_empty() {
        let store = MemoryStore::with_raw("[1, 2, 3]");
        assert!(store.load().await.unwrap().is_empty());
    }
}
