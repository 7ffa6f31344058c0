//! SQLite 论文记录存储（sqlx 异步连接池）
//!
//! 时间以 RFC 3339 文本保存；upsert 使用 ON CONFLICT(id) DO UPDATE。

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::{SqlitePool, SqlitePoolOptions, SqliteRow};
use sqlx::Row;

use crate::core::{PaperError, PaperStatus};
use crate::storage::{PaperRecord, PaperRecordStore};

pub struct SqliteRecordStore {
    pool: SqlitePool,
}

impl SqliteRecordStore {
    /// 连接并建表；内存库只能用单连接，否则每个连接各自一份数据
    pub async fn connect(database_url: &str) -> Result<Self, PaperError> {
        let max_connections = if database_url.contains(":memory:") { 1 } else { 5 };
        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections)
            .connect(database_url)
            .await?;
        let store = Self { pool };
        store.init_tables().await?;
        Ok(store)
    }

    async fn init_tables(&self) -> Result<(), PaperError> {
        sqlx::query(
            "CREATE TABLE IF NOT EXISTS paper_records (
                id TEXT PRIMARY KEY,
                user_id TEXT NOT NULL,
                topic TEXT NOT NULL,
                status TEXT NOT NULL,
                title TEXT,
                outline_json TEXT,
                vfs_key TEXT,
                pdf_key TEXT,
                pdf_url TEXT,
                error TEXT,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL,
                completed_at TEXT
            )",
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_paper_records_user ON paper_records(user_id, created_at)",
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}

fn parse_time(value: &str) -> Result<DateTime<Utc>, PaperError> {
    DateTime::parse_from_rfc3339(value)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| PaperError::Storage(format!("invalid timestamp {value}: {e}")))
}

fn record_from_row(row: &SqliteRow) -> Result<PaperRecord, PaperError> {
    let status: String = row.try_get("status")?;
    let created_at: String = row.try_get("created_at")?;
    let updated_at: String = row.try_get("updated_at")?;
    let completed_at: Option<String> = row.try_get("completed_at")?;

    Ok(PaperRecord {
        id: row.try_get("id")?,
        user_id: row.try_get("user_id")?,
        topic: row.try_get("topic")?,
        status: status.parse::<PaperStatus>().map_err(PaperError::Storage)?,
        title: row.try_get("title")?,
        outline_json: row.try_get("outline_json")?,
        vfs_key: row.try_get("vfs_key")?,
        pdf_key: row.try_get("pdf_key")?,
        pdf_url: row.try_get("pdf_url")?,
        error: row.try_get("error")?,
        created_at: parse_time(&created_at)?,
        updated_at: parse_time(&updated_at)?,
        completed_at: completed_at.as_deref().map(parse_time).transpose()?,
    })
}

#[async_trait]
impl PaperRecordStore for SqliteRecordStore {
    async fn get(&self, id: &str) -> Result<Option<PaperRecord>, PaperError> {
        let row = sqlx::query("SELECT * FROM paper_records WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(record_from_row).transpose()
    }

    async fn upsert(&self, record: &PaperRecord) -> Result<(), PaperError> {
        sqlx::query(
            "INSERT INTO paper_records
                (id, user_id, topic, status, title, outline_json, vfs_key, pdf_key, pdf_url, error,
                 created_at, updated_at, completed_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
             ON CONFLICT(id) DO UPDATE SET
                user_id = excluded.user_id,
                topic = excluded.topic,
                status = excluded.status,
                title = excluded.title,
                outline_json = excluded.outline_json,
                vfs_key = excluded.vfs_key,
                pdf_key = excluded.pdf_key,
                pdf_url = excluded.pdf_url,
                error = excluded.error,
                updated_at = excluded.updated_at,
                completed_at = excluded.completed_at",
        )
        .bind(&record.id)
        .bind(&record.user_id)
        .bind(&record.topic)
        .bind(record.status.as_str())
        .bind(&record.title)
        .bind(&record.outline_json)
        .bind(&record.vfs_key)
        .bind(&record.pdf_key)
        .bind(&record.pdf_url)
        .bind(&record.error)
        .bind(record.created_at.to_rfc3339())
        .bind(record.updated_at.to_rfc3339())
        .bind(record.completed_at.map(|t| t.to_rfc3339()))
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn list_by_user(&self, user_id: &str, limit: usize) -> Result<Vec<PaperRecord>, PaperError> {
        let rows = sqlx::query(
            "SELECT * FROM paper_records WHERE user_id = ? ORDER BY created_at DESC LIMIT ?",
        )
        .bind(user_id)
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(record_from_row).collect()
    }
}
