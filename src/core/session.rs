//! 论文会话与会话注册表
//!
//! PaperSession 由运行任务独占（VFS 与中间产物都在里面）；SessionStore 只保存可并发读取的快照，
//! 供状态查询与文件浏览使用。同一会话同一时刻只允许一个运行任务，由 RunGuard 保证。

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::RwLock;

use crate::core::{FilePlan, LiteratureItem, PaperError, PaperStatus};
use crate::vfs::VirtualFileSystem;

/// 一次生成 / 修订的完整状态
#[derive(Debug, Clone)]
pub struct PaperSession {
    pub id: String,
    pub user_id: String,
    pub topic: String,
    /// 最近一条进度文案（尽力而为，会被覆盖）
    pub progress_detail: String,
    pub vfs: VirtualFileSystem,
    pub literature: Vec<LiteratureItem>,
    pub literature_summary: String,
    pub file_plan: FilePlan,
    /// 章节路径 -> 纯文本正文（Writer 产出，Formatter 消费）
    pub content: BTreeMap<String, String>,
    pub pdf_data: Option<Vec<u8>>,
    pub pdf_url: Option<String>,
    pub pdf_key: Option<String>,
    pub vfs_key: Option<String>,
    pub created_at: DateTime<Utc>,
    status: PaperStatus,
    error: Option<String>,
    history: Vec<PaperStatus>,
}

impl PaperSession {
    pub fn new(user_id: impl Into<String>, topic: impl Into<String>) -> Self {
        Self::with_id(uuid::Uuid::new_v4().to_string(), user_id, topic)
    }

    pub fn with_id(id: impl Into<String>, user_id: impl Into<String>, topic: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            user_id: user_id.into(),
            topic: topic.into(),
            progress_detail: String::new(),
            vfs: VirtualFileSystem::new(),
            literature: Vec::new(),
            literature_summary: String::new(),
            file_plan: FilePlan::default(),
            content: BTreeMap::new(),
            pdf_data: None,
            pdf_url: None,
            pdf_key: None,
            vfs_key: None,
            created_at: Utc::now(),
            status: PaperStatus::Pending,
            error: None,
            history: vec![PaperStatus::Pending],
        }
    }

    /// 从持久化记录重建的会话外壳（状态原样恢复，不经过状态机）
    pub fn restored(
        id: impl Into<String>,
        user_id: impl Into<String>,
        topic: impl Into<String>,
        status: PaperStatus,
        error: Option<String>,
        created_at: DateTime<Utc>,
    ) -> Self {
        let mut session = Self::with_id(id, user_id, topic);
        session.status = status;
        session.error = error;
        session.created_at = created_at;
        session.history = vec![status];
        session
    }

    pub fn status(&self) -> PaperStatus {
        self.status
    }

    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    /// 本次运行经过的状态序列（含初始状态）
    pub fn history(&self) -> &[PaperStatus] {
        &self.history
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// 沿状态机前进一步；非法迁移返回 InvalidTransition，状态不变
    pub fn advance(&mut self, next: PaperStatus) -> Result<(), PaperError> {
        if !self.status.can_transition_to(next) {
            return Err(PaperError::InvalidTransition {
                from: self.status,
                to: next,
            });
        }
        self.status = next;
        self.history.push(next);
        Ok(())
    }

    /// 进入 FAILED 并记录错误；已是终态时不做任何修改并返回 false
    pub fn fail(&mut self, message: impl Into<String>) -> bool {
        if self.status.is_terminal() {
            return false;
        }
        self.error = Some(message.into());
        self.status = PaperStatus::Failed;
        self.history.push(PaperStatus::Failed);
        true
    }

    /// 显式修订：重新打开会话，回到 FORMATTING
    pub fn reopen_for_revision(&mut self) {
        self.status = PaperStatus::Formatting;
        self.error = None;
        self.pdf_data = None;
        self.history.push(PaperStatus::Formatting);
    }
}

/// SessionStore 中保存的会话视图
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SessionSnapshot {
    pub id: String,
    pub user_id: String,
    pub topic: String,
    pub status: PaperStatus,
    pub progress_detail: String,
    pub error: Option<String>,
    pub pdf_url: Option<String>,
    pub title: String,
    pub created_at: DateTime<Utc>,
    pub history: Vec<PaperStatus>,
    /// VFS 副本；论文落盘后释放为 None，文件改从持久化快照读取
    #[serde(skip)]
    pub files: Option<BTreeMap<String, String>>,
}

impl From<&PaperSession> for SessionSnapshot {
    fn from(s: &PaperSession) -> Self {
        Self {
            id: s.id.clone(),
            user_id: s.user_id.clone(),
            topic: s.topic.clone(),
            status: s.status,
            progress_detail: s.progress_detail.clone(),
            error: s.error.clone(),
            pdf_url: s.pdf_url.clone(),
            title: s.file_plan.title.clone(),
            created_at: s.created_at,
            history: s.history.clone(),
            files: Some(s.vfs.snapshot()),
        }
    }
}

/// 并发安全的会话注册表（显式构造、注入编排器，可廉价 Clone）
#[derive(Debug, Clone, Default)]
pub struct SessionStore {
    sessions: Arc<RwLock<HashMap<String, SessionSnapshot>>>,
    running: Arc<Mutex<HashSet<String>>>,
}

impl SessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// 创建 PENDING 会话：先占运行权再登记快照，状态查询不会把它当成被遗弃的会话
    pub async fn create(&self, user_id: &str, topic: &str) -> Result<(PaperSession, RunGuard), PaperError> {
        let session = PaperSession::new(user_id, topic);
        let guard = self
            .try_begin_run(&session.id)
            .ok_or_else(|| PaperError::Busy(session.id.clone()))?;
        self.insert(&session).await;
        Ok((session, guard))
    }

    pub async fn insert(&self, session: &PaperSession) {
        self.sessions
            .write()
            .await
            .insert(session.id.clone(), SessionSnapshot::from(session));
    }

    /// 用运行中的会话覆盖快照
    pub async fn sync(&self, session: &PaperSession) {
        self.insert(session).await;
    }

    pub async fn get(&self, id: &str) -> Option<SessionSnapshot> {
        self.sessions.read().await.get(id).cloned()
    }

    /// 按状态机校验后更新快照状态；会话不存在或迁移非法返回 false
    pub async fn update_status(&self, id: &str, status: PaperStatus, detail: Option<&str>) -> bool {
        let mut sessions = self.sessions.write().await;
        let Some(snap) = sessions.get_mut(id) else {
            return false;
        };
        if !snap.status.can_transition_to(status) {
            tracing::warn!(session_id = id, from = %snap.status, to = %status, "rejected status update");
            return false;
        }
        snap.status = status;
        snap.history.push(status);
        if let Some(detail) = detail {
            snap.progress_detail = detail.to_string();
        }
        true
    }

    pub async fn set_progress(&self, id: &str, detail: &str) {
        if let Some(snap) = self.sessions.write().await.get_mut(id) {
            snap.progress_detail = detail.to_string();
        }
    }

    /// 论文已落盘：丢弃快照里的 VFS 副本，只保留状态
    pub async fn release_files(&self, id: &str) {
        if let Some(snap) = self.sessions.write().await.get_mut(id) {
            snap.files = None;
        }
    }

    /// 快照停在非终态、却没有运行任务持有它时置为 FAILED；返回被修正后的快照
    pub async fn fail_abandoned(&self, id: &str, error: &str) -> Option<SessionSnapshot> {
        let mut sessions = self.sessions.write().await;
        let snap = sessions.get_mut(id)?;
        if snap.status.is_terminal() || self.is_running(id) {
            return None;
        }
        tracing::warn!(session_id = id, status = %snap.status, "abandoned session marked as failed");
        snap.status = PaperStatus::Failed;
        snap.history.push(PaperStatus::Failed);
        snap.error = Some(error.to_string());
        Some(snap.clone())
    }

    pub async fn delete(&self, id: &str) -> bool {
        self.sessions.write().await.remove(id).is_some()
    }

    pub async fn len(&self) -> usize {
        self.sessions.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.sessions.read().await.is_empty()
    }

    /// 独占某个会话的运行权；已有运行中的任务时返回 None
    pub fn try_begin_run(&self, id: &str) -> Option<RunGuard> {
        let mut running = self.running.lock().ok()?;
        if !running.insert(id.to_string()) {
            return None;
        }
        Some(RunGuard {
            id: id.to_string(),
            running: Arc::clone(&self.running),
        })
    }

    pub fn is_running(&self, id: &str) -> bool {
        self.running
            .lock()
            .map(|running| running.contains(id))
            .unwrap_or(false)
    }
}

/// 会话运行权，Drop 时释放
#[derive(Debug)]
pub struct RunGuard {
    id: String,
    running: Arc<Mutex<HashSet<String>>>,
}

impl Drop for RunGuard {
    fn drop(&mut self) {
        if let Ok(mut running) = self.running.lock() {
            running.remove(&self.id);
        }
    }
}
