//! 持久化存储接口：对象存储（PDF、VFS 快照）与论文记录
//!
//! 对象存储失败以 None / false 表示，由调用方降级处理；记录存储返回 Result。

pub mod blob;
pub mod records;
pub mod sqlite;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::core::{PaperError, PaperStatus};

pub use blob::{LocalBlobStore, MemoryBlobStore};
pub use records::MemoryRecordStore;
pub use sqlite::SqliteRecordStore;

/// 上传成功后的对象引用
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredObject {
    pub url: String,
    pub key: String,
}

#[async_trait]
pub trait BlobStore: Send + Sync {
    async fn upload_bytes(&self, data: &[u8], key: &str, content_type: &str) -> Option<StoredObject>;

    async fn download_bytes(&self, key: &str) -> Option<Vec<u8>>;
}

/// 一篇论文的持久化记录（按会话 id 唯一）
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PaperRecord {
    pub id: String,
    pub user_id: String,
    pub topic: String,
    pub status: PaperStatus,
    pub title: Option<String>,
    /// 文件规划 JSON，供展示
    pub outline_json: Option<String>,
    pub vfs_key: Option<String>,
    pub pdf_key: Option<String>,
    pub pdf_url: Option<String>,
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl PaperRecord {
    pub fn new(id: impl Into<String>, user_id: impl Into<String>, topic: impl Into<String>, status: PaperStatus) -> Self {
        let now = Utc::now();
        Self {
            id: id.into(),
            user_id: user_id.into(),
            topic: topic.into(),
            status,
            title: None,
            outline_json: None,
            vfs_key: None,
            pdf_key: None,
            pdf_url: None,
            error: None,
            created_at: now,
            updated_at: now,
            completed_at: None,
        }
    }
}

#[async_trait]
pub trait PaperRecordStore: Send + Sync {
    async fn get(&self, id: &str) -> Result<Option<PaperRecord>, PaperError>;

    /// 按 id 插入或整体覆盖
    async fn upsert(&self, record: &PaperRecord) -> Result<(), PaperError>;

    /// 某用户的记录，按创建时间倒序
    async fn list_by_user(&self, user_id: &str, limit: usize) -> Result<Vec<PaperRecord>, PaperError>;
}
