//! 论文归档：持久化、恢复、进度追踪记录与孤儿恢复
//!
//! - persist：上传 PDF 与 gzip 压缩的 VFS 快照，写入 / 更新论文记录
//! - track：PLANNING 完成后创建记录，之后每次状态变化同步，刷新页面也能看到进度
//! - restore：从记录与 VFS 快照重建会话外壳，供文件浏览与修订
//! - recover_orphan：记录停在非终态而内存中已无会话（服务重启），强制置为 FAILED
//! - recover_abandoned：会话还在内存里，但运行任务已经不在了（任务异常退出），同样置为 FAILED
//!
//! 存储失败一律记 warn 日志后降级继续，不影响流水线结果。

use std::io::{Read, Write};
use std::sync::Arc;

use chrono::Utc;
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;

use crate::core::{FilePlan, PaperError, PaperSession, PaperStatus};
use crate::storage::{BlobStore, PaperRecord, PaperRecordStore};
use crate::vfs::VirtualFileSystem;

/// 孤儿记录的固定错误信息
pub const ORPHAN_ERROR: &str = "generation interrupted: the service restarted before this paper finished";

/// 运行任务中途退出、会话被遗弃时的错误信息
pub const ABANDONED_ERROR: &str = "generation interrupted: the run stopped before this paper finished";

const PDF_CONTENT_TYPE: &str = "application/pdf";
const VFS_CONTENT_TYPE: &str = "application/gzip";

pub fn pdf_key(user_id: &str, paper_id: &str) -> String {
    format!("users/{user_id}/papers/{paper_id}/paper.pdf")
}

pub fn vfs_key(user_id: &str, paper_id: &str) -> String {
    format!("users/{user_id}/papers/{paper_id}/vfs.json.gz")
}

pub fn gzip(data: &[u8]) -> Result<Vec<u8>, PaperError> {
    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(data)?;
    Ok(encoder.finish()?)
}

pub fn gunzip(data: &[u8]) -> Result<String, PaperError> {
    let mut out = String::new();
    GzDecoder::new(data).read_to_string(&mut out)?;
    Ok(out)
}

fn outline_json(plan: &FilePlan) -> Option<String> {
    if plan.is_empty() {
        return None;
    }
    serde_json::to_string(plan).ok()
}

#[derive(Clone)]
pub struct PaperArchive {
    blobs: Arc<dyn BlobStore>,
    records: Arc<dyn PaperRecordStore>,
}

impl PaperArchive {
    pub fn new(blobs: Arc<dyn BlobStore>, records: Arc<dyn PaperRecordStore>) -> Self {
        Self { blobs, records }
    }

    pub async fn record(&self, id: &str) -> Result<Option<PaperRecord>, PaperError> {
        self.records.get(id).await
    }

    pub async fn list(&self, user_id: &str, limit: usize) -> Result<Vec<PaperRecord>, PaperError> {
        self.records.list_by_user(user_id, limit).await
    }

    /// 把会话当前阶段同步到论文记录；记录不存在且 create_if_missing 为 false 时不做任何事
    pub async fn track(&self, session: &PaperSession, create_if_missing: bool) {
        let existing = match self.records.get(&session.id).await {
            Ok(r) => r,
            Err(e) => {
                tracing::warn!(session_id = %session.id, error = %e, "tracking record lookup failed");
                return;
            }
        };
        let mut record = match existing {
            Some(r) => r,
            None if create_if_missing => {
                let mut r = PaperRecord::new(&session.id, &session.user_id, &session.topic, session.status());
                r.created_at = session.created_at;
                r
            }
            None => return,
        };

        record.topic = session.topic.clone();
        record.status = session.status();
        if let Some(outline) = outline_json(&session.file_plan) {
            record.outline_json = Some(outline);
            record.title = Some(session.file_plan.title.clone()).filter(|t| !t.is_empty());
        }
        record.error = session.error().map(str::to_string);
        if session.status() != PaperStatus::Completed {
            record.completed_at = None;
        }
        record.updated_at = Utc::now();

        if let Err(e) = self.records.upsert(&record).await {
            tracing::warn!(session_id = %session.id, error = %e, "tracking record sync failed");
        }
    }

    /// 上传产物与 VFS 快照并写入记录；upsert 时沿用已有记录的对象 key 与创建时间。
    /// 返回记录是否写入成功（失败只降级，不报错）
    pub async fn persist(&self, session: &mut PaperSession, upsert: bool) -> bool {
        let existing = if upsert {
            self.records.get(&session.id).await.ok().flatten()
        } else {
            None
        };

        let pdf_target = existing
            .as_ref()
            .and_then(|r| r.pdf_key.clone())
            .unwrap_or_else(|| pdf_key(&session.user_id, &session.id));
        if let Some(pdf) = session.pdf_data.as_deref() {
            match self.blobs.upload_bytes(pdf, &pdf_target, PDF_CONTENT_TYPE).await {
                Some(obj) => {
                    session.pdf_url = Some(obj.url);
                    session.pdf_key = Some(obj.key);
                }
                None => {
                    tracing::warn!(session_id = %session.id, "pdf upload failed, keeping previous reference");
                    session.pdf_url = existing.as_ref().and_then(|r| r.pdf_url.clone());
                    session.pdf_key = existing.as_ref().and_then(|r| r.pdf_key.clone());
                }
            }
        }

        let vfs_target = existing
            .as_ref()
            .and_then(|r| r.vfs_key.clone())
            .unwrap_or_else(|| vfs_key(&session.user_id, &session.id));
        match session.vfs.serialize().map_err(PaperError::from).and_then(|json| gzip(json.as_bytes())) {
            Ok(gz) => match self.blobs.upload_bytes(&gz, &vfs_target, VFS_CONTENT_TYPE).await {
                Some(obj) => session.vfs_key = Some(obj.key),
                None => {
                    tracing::warn!(session_id = %session.id, "vfs snapshot upload failed");
                    session.vfs_key = existing.as_ref().and_then(|r| r.vfs_key.clone());
                }
            },
            Err(e) => tracing::warn!(session_id = %session.id, error = %e, "vfs snapshot encoding failed"),
        }

        let now = Utc::now();
        let mut record = existing.unwrap_or_else(|| {
            let mut r = PaperRecord::new(&session.id, &session.user_id, &session.topic, session.status());
            r.created_at = session.created_at;
            r
        });
        record.user_id = session.user_id.clone();
        record.topic = session.topic.clone();
        record.status = session.status();
        record.title = Some(session.file_plan.title.clone()).filter(|t| !t.is_empty());
        record.outline_json = outline_json(&session.file_plan).or(record.outline_json);
        record.vfs_key = session.vfs_key.clone();
        record.pdf_key = session.pdf_key.clone();
        record.pdf_url = session.pdf_url.clone();
        record.error = session.error().map(str::to_string);
        record.updated_at = now;
        record.completed_at = (session.status() == PaperStatus::Completed).then_some(now);

        match self.records.upsert(&record).await {
            Ok(()) => {
                tracing::info!(session_id = %session.id, pdf_url = ?session.pdf_url, "paper persisted");
                true
            }
            Err(e) => {
                tracing::warn!(session_id = %session.id, error = %e, "paper record write failed");
                false
            }
        }
    }

    /// 从记录与 VFS 快照重建会话；快照缺失或损坏时得到空 VFS
    pub async fn restore(&self, id: &str) -> Result<Option<PaperSession>, PaperError> {
        let Some(record) = self.records.get(id).await? else {
            return Ok(None);
        };

        let mut vfs = VirtualFileSystem::new();
        if let Some(key) = record.vfs_key.as_deref() {
            match self.blobs.download_bytes(key).await {
                Some(gz) => match gunzip(&gz).and_then(|json| Ok(VirtualFileSystem::deserialize(&json)?)) {
                    Ok(restored) => vfs = restored,
                    Err(e) => tracing::warn!(paper_id = id, error = %e, "vfs snapshot unreadable"),
                },
                None => tracing::warn!(paper_id = id, key, "vfs snapshot missing"),
            }
        }

        let mut session = PaperSession::restored(
            &record.id,
            &record.user_id,
            &record.topic,
            record.status,
            record.error.clone(),
            record.created_at,
        );
        session.vfs = vfs;
        session.pdf_url = record.pdf_url.clone();
        session.pdf_key = record.pdf_key.clone();
        session.vfs_key = record.vfs_key.clone();
        session.file_plan = record
            .outline_json
            .as_deref()
            .and_then(|json| serde_json::from_str(json).ok())
            .unwrap_or_default();
        Ok(Some(session))
    }

    /// 非终态记录视为孤儿：置为 FAILED 并写入固定错误信息（只写一次）；终态记录原样返回
    pub async fn recover_orphan(&self, record: PaperRecord) -> PaperRecord {
        self.force_failed(record, ORPHAN_ERROR).await
    }

    pub async fn recover_abandoned(&self, record: PaperRecord) -> PaperRecord {
        self.force_failed(record, ABANDONED_ERROR).await
    }

    async fn force_failed(&self, mut record: PaperRecord, error: &str) -> PaperRecord {
        if record.status.is_terminal() {
            return record;
        }
        tracing::warn!(paper_id = %record.id, status = %record.status, error, "unfinished paper marked as failed");
        record.status = PaperStatus::Failed;
        record.error = Some(error.to_string());
        record.completed_at = None;
        record.updated_at = Utc::now();
        if let Err(e) = self.records.upsert(&record).await {
            tracing::warn!(paper_id = %record.id, error = %e, "orphan correction not saved");
        }
        record
    }
}
