//! 内存论文记录存储（测试与 `database_url = "memory"` 时使用）

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::core::PaperError;
use crate::storage::{PaperRecord, PaperRecordStore};

#[derive(Debug, Default)]
pub struct MemoryRecordStore {
    records: RwLock<HashMap<String, PaperRecord>>,
    writes: AtomicUsize,
}

impl MemoryRecordStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// 累计 upsert 次数
    pub fn write_count(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl PaperRecordStore for MemoryRecordStore {
    async fn get(&self, id: &str) -> Result<Option<PaperRecord>, PaperError> {
        Ok(self.records.read().await.get(id).cloned())
    }

    async fn upsert(&self, record: &PaperRecord) -> Result<(), PaperError> {
        self.writes.fetch_add(1, Ordering::SeqCst);
        self.records
            .write()
            .await
            .insert(record.id.clone(), record.clone());
        Ok(())
    }

    async fn list_by_user(&self, user_id: &str, limit: usize) -> Result<Vec<PaperRecord>, PaperError> {
        let mut records: Vec<PaperRecord> = self
            .records
            .read()
            .await
            .values()
            .filter(|r| r.user_id == user_id)
            .cloned()
            .collect();
        records.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        records.truncate(limit);
        Ok(records)
    }
}
